//! The counter-set primitive a [`Semaphore`](crate::Semaphore) is built on.
//!
//! A backend owns arrays of independently waitable integer counters, each
//! array named by a [`Key`]. Operations on a set may be registered for
//! undo-on-exit: if the issuing process terminates, the backend reverses
//! that process's net delta on each counter.

use std::fmt::Display;

use crate::error::Result;
use crate::Key;

/// Identifies a live counter set inside a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SetId(pub(crate) i32);

impl SetId {
    pub fn from_raw(raw: i32) -> Self {
        SetId(raw)
    }

    pub fn as_raw(&self) -> i32 {
        self.0
    }
}

impl Display for SetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One element of an indivisible [`Backend::blocking_delta`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterOp {
    pub index: u16,
    /// Negative deltas block until the counter can absorb them. Zero blocks
    /// until the counter reads zero.
    pub delta: i16,
    pub undo: bool,
}

impl CounterOp {
    /// Adds `delta` to the counter, registered for undo-on-exit.
    pub const fn add(index: u16, delta: i16) -> Self {
        CounterOp {
            index,
            delta,
            undo: true,
        }
    }

    /// Blocks until the counter is zero. Commits nothing, so there is
    /// nothing to undo.
    pub const fn wait_zero(index: u16) -> Self {
        CounterOp {
            index,
            delta: 0,
            undo: false,
        }
    }
}

/// Kernel-style counter sets.
///
/// Every method that takes a [`SetId`] fails with
/// [`ErrorKind::StaleHandle`](crate::ErrorKind::StaleHandle) once the set has
/// been destroyed.
pub trait Backend {
    /// Looks up the set for `key`, allocating it with `nsems` zeroed counters
    /// if it does not exist yet. Never fails because the set already exists.
    fn get_or_create(&self, key: Key, nsems: u16, mode: u32) -> Result<SetId>;

    /// Looks up an existing set; fails with `NotFound` if there is none.
    fn get_only(&self, key: Key, nsems: u16) -> Result<SetId>;

    fn read(&self, id: SetId, index: u16) -> Result<i32>;

    /// Overwrites a counter. Leaves undo bookkeeping alone.
    fn direct_set(&self, id: SetId, index: u16, value: i32) -> Result<()>;

    /// Applies all `ops` as one indivisible step, blocking until every one of
    /// them can be satisfied at once.
    fn blocking_delta(&self, id: SetId, ops: &[CounterOp]) -> Result<()>;

    fn destroy(&self, id: SetId) -> Result<()>;
}

impl<B: Backend + ?Sized> Backend for &B {
    fn get_or_create(&self, key: Key, nsems: u16, mode: u32) -> Result<SetId> {
        (**self).get_or_create(key, nsems, mode)
    }

    fn get_only(&self, key: Key, nsems: u16) -> Result<SetId> {
        (**self).get_only(key, nsems)
    }

    fn read(&self, id: SetId, index: u16) -> Result<i32> {
        (**self).read(id, index)
    }

    fn direct_set(&self, id: SetId, index: u16, value: i32) -> Result<()> {
        (**self).direct_set(id, index, value)
    }

    fn blocking_delta(&self, id: SetId, ops: &[CounterOp]) -> Result<()> {
        (**self).blocking_delta(id, ops)
    }

    fn destroy(&self, id: SetId) -> Result<()> {
        (**self).destroy(id)
    }
}
