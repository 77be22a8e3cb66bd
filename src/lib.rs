pub mod backend;
pub mod error;
mod key;
mod semaphore;
pub mod sysv;

pub use backend::{Backend, CounterOp, SetId};
pub use error::{Error, ErrorKind, Result};
pub use key::Key;
pub use semaphore::{OpenOptions, Semaphore, Status, BIGCOUNT, NSEMS, SEMVMX};
pub use sysv::SysV;
