//! Named, reference-counted counting semaphores shared between processes.
//!
//! Each semaphore is a set of three counters:
//!
//! * `[0]` the semaphore value,
//! * `[1]` a reference count, initialized once to [`BIGCOUNT`], decremented
//!   on every attach and incremented on every detach,
//! * `[2]` a lock guarding initialization and the last-detach check.
//!
//! Every delta is applied with undo-on-exit, so a process that dies without
//! detaching gives back its lock, its reference and any value it claimed.

use std::cmp::Ordering;

use nix::libc::mode_t;
use nix::sys::stat::Mode;
use tracing::{debug, error, warn};

use crate::backend::{Backend, CounterOp, SetId};
use crate::error::{Error, ErrorKind, Result};
use crate::sysv::SysV;
use crate::Key;

/// Initial reference count; far above any realistic number of attachers.
pub const BIGCOUNT: i32 = 10000;

/// Largest value a counter can hold.
pub const SEMVMX: i32 = 32767;

/// Counters in every set.
pub const NSEMS: u16 = 3;
const VALUE: u16 = 0;
const REFCOUNT: u16 = 1;
const MUTEX: u16 = 2;

const LOCK: [CounterOp; 2] = [CounterOp::wait_zero(MUTEX), CounterOp::add(MUTEX, 1)];
// Claim a reference and release the lock in one step.
const END_CREATE: [CounterOp; 2] = [CounterOp::add(REFCOUNT, -1), CounterOp::add(MUTEX, -1)];
const ATTACH: [CounterOp; 1] = [CounterOp::add(REFCOUNT, -1)];
const CLOSE: [CounterOp; 3] = [
    CounterOp::wait_zero(MUTEX),
    CounterOp::add(MUTEX, 1),
    CounterOp::add(REFCOUNT, 1),
];
const UNLOCK: [CounterOp; 1] = [CounterOp::add(MUTEX, -1)];

pub struct OpenOptions {
    mode: Mode,
    create: bool,
    initial_value: i32,
}

impl OpenOptions {
    pub fn new() -> Self {
        OpenOptions {
            mode: Mode::from_bits_truncate(0o666),
            create: false,
            initial_value: 0,
        }
    }

    /// Permission bits used if the set has to be allocated.
    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = Mode::from_bits_truncate(mode as mode_t);
        self
    }

    /// Allocate and initialize the set if nobody has yet. Without this,
    /// opening fails with `NotFound` for an unknown key.
    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    /// Value the semaphore starts at. Only the process that initializes the
    /// set applies it.
    pub fn initial_value(mut self, value: i32) -> Self {
        self.initial_value = value;
        self
    }

    pub fn open(self, key: Key) -> Result<Semaphore> {
        self.open_with(SysV, key)
    }

    pub fn open_with<B: Backend>(self, backend: B, key: Key) -> Result<Semaphore<B>> {
        if self.create {
            if !(0..=SEMVMX).contains(&self.initial_value) {
                return Err(Error::new(ErrorKind::InvalidArgument(
                    "initial value must be between 0 and 32767",
                )));
            }
            Semaphore::create_or_attach(backend, key, self.mode.bits() as u32, self.initial_value)
        } else {
            Semaphore::attach_only(backend, key)
        }
    }
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one pass through the create sequence.
enum Attempt {
    Attached(SetId),
    /// The set vanished between lookup and locking; start over.
    Retry,
}

fn stale_as_none<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(err) if err.is_stale() => Ok(None),
        Err(err) => Err(err),
    }
}

/// This process's attachment to a shared semaphore.
///
/// Dropping an attached handle detaches it. The last process to detach
/// destroys the set.
pub struct Semaphore<B: Backend = SysV> {
    backend: B,
    id: SetId,
    attached: bool,
}

impl Semaphore {
    /// Attaches to the semaphore for `key`, creating it with
    /// `initial_value` if it does not exist.
    pub fn create(key: Key, initial_value: i32) -> Result<Self> {
        Semaphore::options()
            .create(true)
            .initial_value(initial_value)
            .open(key)
    }

    /// Attaches to a semaphore that must already exist.
    ///
    /// If the set exists but its creator has not initialized it yet, this
    /// blocks until it does, indefinitely if the creator died first.
    pub fn open(key: Key) -> Result<Self> {
        Semaphore::options().open(key)
    }

    pub fn options() -> OpenOptions {
        OpenOptions::new()
    }
}

impl<B: Backend> Semaphore<B> {
    fn create_or_attach(backend: B, key: Key, mode: u32, initial_value: i32) -> Result<Self> {
        // Each retry means another process destroyed the set, so this
        // terminates as long as destroyers eventually stop.
        let mut attempts = 1u32;
        loop {
            match Self::try_create(&backend, key, mode, initial_value)? {
                Attempt::Attached(id) => {
                    debug!(%key, %id, attempts, "attached to semaphore");
                    return Ok(Semaphore {
                        backend,
                        id,
                        attached: true,
                    });
                }
                Attempt::Retry => {
                    debug!(%key, attempts, "semaphore set removed while attaching, retrying");
                    attempts += 1;
                }
            }
        }
    }

    fn try_create(backend: &B, key: Key, mode: u32, initial_value: i32) -> Result<Attempt> {
        let Some(id) = stale_as_none(backend.get_or_create(key, NSEMS, mode))? else {
            return Ok(Attempt::Retry);
        };
        if stale_as_none(backend.blocking_delta(id, &LOCK))?.is_none() {
            return Ok(Attempt::Retry);
        }
        match Self::initialize_and_claim(backend, id, initial_value) {
            Ok(()) => Ok(Attempt::Attached(id)),
            Err(err) if err.is_stale() => Ok(Attempt::Retry),
            Err(err) => {
                release(backend, id);
                Err(err)
            }
        }
    }

    /// Runs with the lock held.
    fn initialize_and_claim(backend: &B, id: SetId, initial_value: i32) -> Result<()> {
        if backend.read(id, REFCOUNT)? == 0 {
            // Direct writes, so the undo entry of our lock survives.
            backend.direct_set(id, VALUE, initial_value)?;
            backend.direct_set(id, REFCOUNT, BIGCOUNT)?;
            debug!(%id, initial_value, "initialized semaphore");
        }
        backend.blocking_delta(id, &END_CREATE)
    }

    fn attach_only(backend: B, key: Key) -> Result<Self> {
        let id = backend.get_only(key, NSEMS)?;
        // Blocks until a creator has finished initializing the set.
        backend.blocking_delta(id, &ATTACH)?;
        debug!(%key, %id, "attached to existing semaphore");
        Ok(Semaphore {
            backend,
            id,
            attached: true,
        })
    }

    /// Takes one unit, blocking until one is available.
    pub fn wait(&self) -> Result<()> {
        self.op(-1)
    }

    /// Gives back one unit.
    pub fn signal(&self) -> Result<()> {
        self.op(1)
    }

    /// Adds `delta` to the value. A negative delta blocks until the value is
    /// at least `|delta|`.
    pub fn op(&self, delta: i32) -> Result<()> {
        if delta == 0 {
            return Err(Error::new(ErrorKind::InvalidArgument(
                "delta must be non-zero",
            )));
        }
        let delta = i16::try_from(delta).map_err(|_| {
            Error::new(ErrorKind::InvalidArgument(
                "delta must fit in a 16-bit signed integer",
            ))
        })?;
        self.backend
            .blocking_delta(self.id, &[CounterOp::add(VALUE, delta)])
    }

    pub fn status(&self) -> Result<Status> {
        Status::of(&self.backend, self.id)
    }

    pub fn id(&self) -> SetId {
        self.id
    }

    /// Detaches from the semaphore, destroying it if this was the last
    /// attachment.
    ///
    /// Aborts the process if the reference count shows more detaches than
    /// attaches, since the shared state can no longer be trusted.
    pub fn close(mut self) -> Result<()> {
        self.attached = false;
        detach(&self.backend, self.id)
    }

    /// Destroys the set now, whoever else is still attached. Their next
    /// operation fails with `StaleHandle`.
    pub fn remove(mut self) -> Result<()> {
        self.attached = false;
        self.backend.destroy(self.id)?;
        debug!(id = %self.id, "removed semaphore");
        Ok(())
    }
}

impl<B: Backend> Drop for Semaphore<B> {
    fn drop(&mut self) {
        if self.attached {
            if let Err(err) = detach(&self.backend, self.id) {
                warn!(id = %self.id, %err, "failed to detach semaphore on drop");
            }
        }
    }
}

fn detach<B: Backend>(backend: &B, id: SetId) -> Result<()> {
    backend.blocking_delta(id, &CLOSE)?;
    let refcount = match backend.read(id, REFCOUNT) {
        Ok(refcount) => refcount,
        Err(err) => {
            release(backend, id);
            return Err(err);
        }
    };
    match refcount.cmp(&BIGCOUNT) {
        Ordering::Greater => corrupted(id, refcount),
        Ordering::Equal => {
            // Destroying the set releases the lock with it.
            if let Err(err) = backend.destroy(id) {
                if !err.is_stale() {
                    release(backend, id);
                }
                return Err(err);
            }
            debug!(%id, "last attachment closed, destroyed semaphore");
        }
        Ordering::Less => {
            backend.blocking_delta(id, &UNLOCK)?;
            debug!(%id, attachments = BIGCOUNT - refcount, "detached from semaphore");
        }
    }
    Ok(())
}

/// Gives up the lock after a failure inside a critical section.
fn release<B: Backend>(backend: &B, id: SetId) {
    if let Err(err) = backend.blocking_delta(id, &UNLOCK) {
        warn!(%id, %err, "failed to release semaphore lock");
    }
}

fn corrupted(id: SetId, refcount: i32) -> ! {
    error!(
        %id,
        refcount,
        bigcount = BIGCOUNT,
        "semaphore reference count exceeds its initial value, aborting"
    );
    std::process::abort()
}

/// Point-in-time view of a semaphore set. Reading it takes no lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub value: i32,
    pub attachments: i32,
    pub locked: bool,
    /// False until the first creator has set the value and reference count.
    pub initialized: bool,
}

impl Status {
    pub fn of<B: Backend + ?Sized>(backend: &B, id: SetId) -> Result<Self> {
        let value = backend.read(id, VALUE)?;
        let refcount = backend.read(id, REFCOUNT)?;
        let mutex = backend.read(id, MUTEX)?;
        let initialized = refcount != 0;
        Ok(Status {
            value,
            attachments: if initialized { BIGCOUNT - refcount } else { 0 },
            locked: mutex != 0,
            initialized,
        })
    }

    /// Looks up the set for `key` without attaching to it.
    pub fn lookup<B: Backend + ?Sized>(backend: &B, key: Key) -> Result<Self> {
        let id = backend.get_only(key, NSEMS)?;
        Status::of(backend, id)
    }
}
