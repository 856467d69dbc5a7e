//! The error surface the connection core hands back to protocol handlers.
//!
//! The variants of [`ConnectionError`] act as sentinels: wrapping (for the
//! SFTP status surface) preserves the wrapped error so that the predicate
//! methods keep recognizing it.

use crate::server::Protocol;
use crate::storage;
use std::error::Error as StdError;
use std::fmt;

/// SSH_FXP_STATUS codes used for the SFTP error surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// SSH_FX_NO_SUCH_FILE
    NoSuchFile,
    /// SSH_FX_PERMISSION_DENIED
    PermissionDenied,
    /// SSH_FX_OP_UNSUPPORTED
    OpUnsupported,
    /// SSH_FX_FAILURE
    Failure,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusCode::NoSuchFile => write!(f, "no such file"),
            StatusCode::PermissionDenied => write!(f, "permission denied"),
            StatusCode::OpUnsupported => write!(f, "operation unsupported"),
            StatusCode::Failure => write!(f, "failure"),
        }
    }
}

/// The error type returned by connection operations.
#[derive(Debug)]
pub enum ConnectionError {
    /// The requested object does not exist.
    NotExist,
    /// The user is not allowed to perform the operation.
    PermissionDenied,
    /// The operation is not supported for the backend in use.
    OpUnsupported,
    /// The write would exceed the granted quota.
    QuotaExceeded,
    /// The read would exceed the granted download quota.
    ReadQuotaExceeded,
    /// Any other failure.
    GenericFailure,
    /// The service is shutting down and refuses new operations.
    ShuttingDown,
    /// A backend error passed through untranslated.
    Storage(storage::Error),
    /// An SFTP status error, optionally wrapping the error it was built
    /// from.
    Sftp {
        /// The status code reported to the client.
        code: StatusCode,
        /// The wrapped error, kept for the predicate methods.
        source: Option<Box<ConnectionError>>,
    },
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::NotExist => write!(f, "no such file or directory"),
            ConnectionError::PermissionDenied => write!(f, "permission denied"),
            ConnectionError::OpUnsupported => write!(f, "operation unsupported"),
            ConnectionError::QuotaExceeded => write!(f, "denying write due to space limit"),
            ConnectionError::ReadQuotaExceeded => write!(f, "denying read due to quota limit"),
            ConnectionError::GenericFailure => write!(f, "failure"),
            ConnectionError::ShuttingDown => write!(f, "the service is shutting down"),
            ConnectionError::Storage(err) => err.fmt(f),
            ConnectionError::Sftp { code, source: None } => write!(f, "sftp: {}", code),
            ConnectionError::Sftp { code, source: Some(source) } => write!(f, "sftp: {}: {}", code, source),
        }
    }
}

impl StdError for ConnectionError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ConnectionError::Storage(err) => Some(err),
            ConnectionError::Sftp { source: Some(source), .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<storage::Error> for ConnectionError {
    fn from(err: storage::Error) -> Self {
        ConnectionError::Storage(err)
    }
}

impl ConnectionError {
    /// True if this error means "the object does not exist", regardless of
    /// the protocol surface it was translated for.
    pub fn is_not_exist(&self) -> bool {
        match self {
            ConnectionError::NotExist => true,
            ConnectionError::Storage(err) => err.kind() == storage::ErrorKind::NotFound,
            ConnectionError::Sftp { code, source } => {
                *code == StatusCode::NoSuchFile || source.as_ref().is_some_and(|s| s.is_not_exist())
            }
            _ => false,
        }
    }

    /// True if this error means "access denied".
    pub fn is_permission_denied(&self) -> bool {
        match self {
            ConnectionError::PermissionDenied => true,
            ConnectionError::Storage(err) => err.kind() == storage::ErrorKind::PermissionDenied,
            ConnectionError::Sftp { code, source } => {
                *code == StatusCode::PermissionDenied || source.as_ref().is_some_and(|s| s.is_permission_denied())
            }
            _ => false,
        }
    }

    /// True if this error means "operation unsupported".
    pub fn is_op_unsupported(&self) -> bool {
        match self {
            ConnectionError::OpUnsupported => true,
            ConnectionError::Storage(err) => err.kind() == storage::ErrorKind::Unsupported,
            ConnectionError::Sftp { code, source } => {
                *code == StatusCode::OpUnsupported || source.as_ref().is_some_and(|s| s.is_op_unsupported())
            }
            _ => false,
        }
    }

    /// True if this error signals an exhausted write quota.
    pub fn is_quota_exceeded(&self) -> bool {
        match self {
            ConnectionError::QuotaExceeded => true,
            ConnectionError::Sftp { source, .. } => source.as_ref().is_some_and(|s| s.is_quota_exceeded()),
            _ => false,
        }
    }

    /// True if this error signals an exhausted read quota.
    pub fn is_read_quota_exceeded(&self) -> bool {
        match self {
            ConnectionError::ReadQuotaExceeded => true,
            ConnectionError::Sftp { source, .. } => source.as_ref().is_some_and(|s| s.is_read_quota_exceeded()),
            _ => false,
        }
    }

    /// True if this error signals that the service is shutting down.
    pub fn is_shutting_down(&self) -> bool {
        match self {
            ConnectionError::ShuttingDown => true,
            ConnectionError::Sftp { source, .. } => source.as_ref().is_some_and(|s| s.is_shutting_down()),
            _ => false,
        }
    }

    fn passes_through_generic(&self) -> bool {
        match self {
            ConnectionError::NotExist
            | ConnectionError::PermissionDenied
            | ConnectionError::OpUnsupported
            | ConnectionError::QuotaExceeded
            | ConnectionError::ReadQuotaExceeded
            | ConnectionError::ShuttingDown => true,
            ConnectionError::Storage(err) => err.kind() == storage::ErrorKind::StorageSizeUnavailable,
            _ => false,
        }
    }
}

pub(crate) fn not_exist_error(protocol: Protocol) -> ConnectionError {
    match protocol {
        Protocol::Sftp => ConnectionError::Sftp {
            code: StatusCode::NoSuchFile,
            source: None,
        },
        _ => ConnectionError::NotExist,
    }
}

pub(crate) fn permission_denied_error(protocol: Protocol) -> ConnectionError {
    match protocol {
        Protocol::Sftp => ConnectionError::Sftp {
            code: StatusCode::PermissionDenied,
            source: None,
        },
        _ => ConnectionError::PermissionDenied,
    }
}

pub(crate) fn op_unsupported_error(protocol: Protocol) -> ConnectionError {
    match protocol {
        Protocol::Sftp => ConnectionError::Sftp {
            code: StatusCode::OpUnsupported,
            source: None,
        },
        _ => ConnectionError::OpUnsupported,
    }
}

pub(crate) fn quota_exceeded_error(protocol: Protocol) -> ConnectionError {
    match protocol {
        Protocol::Sftp => ConnectionError::Sftp {
            code: StatusCode::Failure,
            source: Some(Box::new(ConnectionError::QuotaExceeded)),
        },
        _ => ConnectionError::QuotaExceeded,
    }
}

pub(crate) fn read_quota_exceeded_error(protocol: Protocol) -> ConnectionError {
    match protocol {
        Protocol::Sftp => ConnectionError::Sftp {
            code: StatusCode::Failure,
            source: Some(Box::new(ConnectionError::ReadQuotaExceeded)),
        },
        _ => ConnectionError::ReadQuotaExceeded,
    }
}

/// Maps an unclassified failure: SFTP gets a status error wrapping the
/// cause, the other protocols get the bare generic sentinel, except for
/// recognized core errors which pass through untouched.
pub(crate) fn generic_error(protocol: Protocol, source: Option<ConnectionError>) -> ConnectionError {
    match protocol {
        Protocol::Sftp => ConnectionError::Sftp {
            code: StatusCode::Failure,
            source: source.map(Box::new),
        },
        _ => match source {
            Some(err) if err.passes_through_generic() => err,
            _ => ConnectionError::GenericFailure,
        },
    }
}

/// Re-translates an already core error for the given protocol. SFTP wraps
/// non status errors in a failure status preserving the cause; everything
/// else is a fixed point.
pub(crate) fn map_error(protocol: Protocol, err: ConnectionError) -> ConnectionError {
    match err {
        err @ ConnectionError::Sftp { .. } => err,
        err => match protocol {
            Protocol::Sftp => ConnectionError::Sftp {
                code: StatusCode::Failure,
                source: Some(Box::new(err)),
            },
            _ => err,
        },
    }
}
