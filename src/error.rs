use std::fmt::{Debug, Display};
use std::io;

pub type Result<T> = std::result::Result<T, Error>;

pub struct Error {
    kind: ErrorKind,
}

pub enum ErrorKind {
    /// The backend refused to allocate or look up a set (tables full,
    /// permission denied).
    BackendUnavailable(io::Error),
    /// No set exists for the key.
    NotFound,
    /// The set named by an id was destroyed underneath us.
    StaleHandle,
    InvalidArgument(&'static str),
    InvalidKey(i32),
    IoError(io::Error),
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn into_kind(self) -> ErrorKind {
        self.kind
    }

    pub fn is_stale(&self) -> bool {
        matches!(self.kind, ErrorKind::StaleHandle)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, ErrorKind::NotFound)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ErrorKind::BackendUnavailable(err) | ErrorKind::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match &self.kind {
            ErrorKind::BackendUnavailable(err) => {
                format!("semaphore backend unavailable: {}", err)
            }
            ErrorKind::NotFound => String::from("no semaphore set exists for key"),
            ErrorKind::StaleHandle => String::from("semaphore set no longer exists"),
            ErrorKind::InvalidArgument(what) => format!("invalid argument: {}", what),
            ErrorKind::InvalidKey(key) => format!("key {} cannot name a shared semaphore", key),
            ErrorKind::IoError(err) => format!("io error: {}", err),
        };
        write!(f, "{}", msg)
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Error::new(ErrorKind::IoError(value))
    }
}

impl From<nix::Error> for Error {
    fn from(value: nix::Error) -> Self {
        Error::new(ErrorKind::IoError(value.into()))
    }
}
