use nix::errno::Errno;
use nix::libc::{self, c_int, c_ushort, c_void, sembuf};
use tracing::trace;

use crate::backend::{Backend, CounterOp, SetId};
use crate::error::{Error, ErrorKind, Result};
use crate::Key;

/// Counter sets backed by System V semaphores (`semget(2)`, `semop(2)`,
/// `semctl(2)`), with `SEM_UNDO` providing undo-on-exit.
#[derive(Debug, Clone, Copy, Default)]
pub struct SysV;

// Callers are required to define this themselves.
#[allow(dead_code)]
#[repr(C)]
union Semun {
    val: c_int,
    buf: *mut c_void,
    array: *mut c_ushort,
}

/// Maps an errno raised against an existing set id.
fn on_set(err: Errno) -> Error {
    match err {
        Errno::EINVAL | Errno::EIDRM => Error::new(ErrorKind::StaleHandle),
        Errno::ERANGE => Error::new(ErrorKind::InvalidArgument(
            "counter value out of range",
        )),
        Errno::EFBIG | Errno::E2BIG => Error::new(ErrorKind::InvalidArgument(
            "counter operation out of range",
        )),
        err => err.into(),
    }
}

impl Backend for SysV {
    fn get_or_create(&self, key: Key, nsems: u16, mode: u32) -> Result<SetId> {
        let flags = (mode & 0o777) as c_int | libc::IPC_CREAT;
        let id = Errno::result(unsafe { libc::semget(key.as_raw(), nsems as c_int, flags) })
            .map_err(|err| Error::new(ErrorKind::BackendUnavailable(err.into())))?;
        trace!(%key, id, "semget");
        Ok(SetId(id))
    }

    fn get_only(&self, key: Key, nsems: u16) -> Result<SetId> {
        let id = Errno::result(unsafe { libc::semget(key.as_raw(), nsems as c_int, 0) })
            .map_err(|err| match err {
                Errno::ENOENT => Error::new(ErrorKind::NotFound),
                err => Error::new(ErrorKind::BackendUnavailable(err.into())),
            })?;
        trace!(%key, id, "semget existing");
        Ok(SetId(id))
    }

    fn read(&self, id: SetId, index: u16) -> Result<i32> {
        Errno::result(unsafe { libc::semctl(id.0, index as c_int, libc::GETVAL) }).map_err(on_set)
    }

    fn direct_set(&self, id: SetId, index: u16, value: i32) -> Result<()> {
        let arg = Semun { val: value };
        Errno::result(unsafe { libc::semctl(id.0, index as c_int, libc::SETVAL, arg) })
            .map_err(on_set)?;
        Ok(())
    }

    fn blocking_delta(&self, id: SetId, ops: &[CounterOp]) -> Result<()> {
        let mut sops: Vec<sembuf> = ops
            .iter()
            .map(|op| sembuf {
                sem_num: op.index,
                sem_op: op.delta,
                sem_flg: if op.undo { libc::SEM_UNDO as _ } else { 0 },
            })
            .collect();
        loop {
            let ret = unsafe { libc::semop(id.0, sops.as_mut_ptr(), sops.len()) };
            match Errno::result(ret) {
                Ok(_) => return Ok(()),
                // A signal handler ran while we slept; nothing was applied.
                Err(Errno::EINTR) => continue,
                Err(err) => return Err(on_set(err)),
            }
        }
    }

    fn destroy(&self, id: SetId) -> Result<()> {
        Errno::result(unsafe { libc::semctl(id.0, 0, libc::IPC_RMID) }).map_err(on_set)?;
        trace!(id = id.0, "semctl IPC_RMID");
        Ok(())
    }
}
