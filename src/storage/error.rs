use crate::BoxError;
use derive_more::Display;
use thiserror::Error;

/// The error returned by storage backends.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct Error {
    kind: ErrorKind,
    #[source]
    source: Option<BoxError>,
}

impl Error {
    /// Creates a new storage error wrapping the given source.
    pub fn new<E>(kind: ErrorKind, error: E) -> Error
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error {
            kind,
            source: Some(error.into()),
        }
    }

    /// Detailed information about what the connection core should do with the
    /// failure.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error { kind, source: None }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Error::new(ErrorKind::NotFound, err),
            std::io::ErrorKind::PermissionDenied => Error::new(ErrorKind::PermissionDenied, err),
            _ => Error::new(ErrorKind::Other, err),
        }
    }
}

/// The `ErrorKind` variants that can be produced by the [`StorageBackend`]
/// implementations.
///
/// [`StorageBackend`]: trait.StorageBackend.html
#[derive(Copy, Clone, Eq, PartialEq, Debug, Display)]
pub enum ErrorKind {
    /// The requested object does not exist on the backend.
    #[display(fmt = "no such file or directory")]
    NotFound,
    /// The backend denied access to the object.
    #[display(fmt = "permission denied")]
    PermissionDenied,
    /// The operation is not implemented for this backend.
    #[display(fmt = "operation unsupported")]
    Unsupported,
    /// The backend cannot report the available storage size.
    #[display(fmt = "unable to get available size for this storage backend")]
    StorageSizeUnavailable,
    /// The underlying handle was closed while the operation was in flight.
    #[display(fmt = "file already closed")]
    Closed,
    /// Any other backend failure.
    #[display(fmt = "backend error")]
    Other,
}
