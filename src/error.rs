use core::fmt;
use std::io;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Reading input data failed.
    Io,
    /// The JPEG stream is truncated or violates the format.
    Malformed,
    /// The JPEG stream is valid, but uses a feature this crate does not handle.
    Unsupported,
    /// A plane buffer could not be allocated.
    OutOfMemory,
    /// Graphics adapter, device, shader or pipeline setup failed.
    Gpu,
}

pub struct Error {
    repr: Repr,
}

pub(crate) enum Repr {
    Other(ErrorKind, String),
    Io(io::Error),
}

impl From<String> for Repr {
    fn from(value: String) -> Self {
        Self::Other(ErrorKind::Malformed, value)
    }
}
impl<'a> From<&'a str> for Repr {
    fn from(value: &'a str) -> Self {
        Self::Other(ErrorKind::Malformed, value.into())
    }
}
impl From<io::Error> for Repr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl Error {
    /// Creates a [`ErrorKind::Malformed`] error (or [`ErrorKind::Io`] from an [`io::Error`]).
    pub(crate) fn from(e: impl Into<Repr>) -> Self {
        Self { repr: e.into() }
    }

    pub(crate) fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            repr: Repr::Other(kind, msg.into()),
        }
    }

    pub(crate) fn unsupported(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported, msg)
    }

    pub(crate) fn gpu(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Gpu, msg)
    }

    pub fn kind(&self) -> ErrorKind {
        match &self.repr {
            Repr::Other(kind, _) => *kind,
            Repr::Io(_) => ErrorKind::Io,
        }
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Self {
            repr: Repr::Io(value),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Other(kind, s) => write!(f, "{kind:?}: {s}"),
            Repr::Io(e) => e.fmt(f),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Other(_, s) => s.fmt(f),
            Repr::Io(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.repr {
            Repr::Other(..) => None,
            Repr::Io(e) => Some(e),
        }
    }
}
