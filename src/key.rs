use std::fmt::Display;
use std::path::Path;

use nix::errno::Errno;
use nix::libc::{self, key_t};
use nix::NixPath;

use crate::error::{Error, ErrorKind, Result};

/// The name cooperating processes agree on to reach the same semaphore set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key(key_t);

impl Key {
    /// Wraps a raw key. The private key and `-1` (what a failed `ftok`
    /// returns) cannot be shared between processes and are refused.
    pub fn new(raw: key_t) -> Result<Self> {
        if raw == libc::IPC_PRIVATE || raw == -1 {
            return Err(Error::new(ErrorKind::InvalidKey(raw)));
        }
        Ok(Key(raw))
    }

    /// Derives a key from an existing file and a project id, as `ftok(3)`.
    pub fn from_path<P: ?Sized + NixPath>(path: &P, project_id: u8) -> Result<Self> {
        if project_id == 0 {
            return Err(Error::new(ErrorKind::InvalidArgument(
                "project id must be non-zero",
            )));
        }
        let raw = path.with_nix_path(|p| unsafe { libc::ftok(p.as_ptr(), project_id as _) })?;
        if raw == -1 {
            return Err(Errno::last().into());
        }
        Key::new(raw)
    }

    pub fn as_raw(&self) -> key_t {
        self.0
    }
}

impl TryFrom<key_t> for Key {
    type Error = Error;

    fn try_from(raw: key_t) -> Result<Self> {
        Key::new(raw)
    }
}

impl TryFrom<&Path> for Key {
    type Error = Error;

    /// Uses project id 1.
    fn try_from(path: &Path) -> Result<Self> {
        Key::from_path(path, 1)
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
