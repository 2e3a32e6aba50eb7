//! Error types for the id pool service.
//!
//! [`Error`] wraps every [`idpool::Error`] the manager can return together
//! with the service's own failures, and converts into a [`tonic::Status`]
//! whose code tells a client whether retrying makes sense:
//!
//! | error | status |
//! |---|---|
//! | `PoolExhausted` | `RESOURCE_EXHAUSTED` |
//! | `LockTimeout` | `DEADLINE_EXCEEDED` |
//! | `InvalidPool` | `NOT_FOUND` |
//! | `PoolConflict` | `ALREADY_EXISTS` |
//! | `StoreConflict`, `CommitFailed` | `ABORTED` |
//! | `InvalidRequest` | `INVALID_ARGUMENT` |
//! | `ServiceShutdown` | `UNAVAILABLE` |
//! | anything else | `INTERNAL` |

use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the id pool service.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The pool manager rejected or failed the operation.
    #[error(transparent)]
    Pool(#[from] idpool::Error),

    /// The request was rejected by the service before reaching the manager.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl Error {
    /// Short, stable label for metrics attributes.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Pool(e) => match e {
                idpool::Error::PoolExhausted { .. } => "exhausted",
                idpool::Error::LockTimeout { .. } => "lock_timeout",
                idpool::Error::InvalidPool { .. } => "invalid_pool",
                idpool::Error::PoolConflict { .. } => "pool_conflict",
                idpool::Error::InvalidRequest { .. } => "invalid_request",
                idpool::Error::StoreConflict { .. } | idpool::Error::CommitFailed { .. } => {
                    "commit_conflict"
                }
                _ => "internal",
            },
            Self::InvalidRequest { .. } => "invalid_request",
            Self::ServiceShutdown => "shutdown",
        }
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::Pool(e) => {
                let message = e.to_string();
                match e {
                    idpool::Error::PoolExhausted { .. } => Status::resource_exhausted(message),
                    idpool::Error::LockTimeout { .. } => Status::deadline_exceeded(message),
                    idpool::Error::InvalidPool { .. } => Status::not_found(message),
                    idpool::Error::PoolConflict { .. } => Status::already_exists(message),
                    idpool::Error::StoreConflict { .. } | idpool::Error::CommitFailed { .. } => {
                        Status::aborted(message)
                    }
                    idpool::Error::InvalidRequest { reason } => Status::invalid_argument(reason),
                    _ => Status::internal(message),
                }
            }
            Error::InvalidRequest { reason } => Status::invalid_argument(reason),
            Error::ServiceShutdown => Status::unavailable("Service is shutting down"),
        }
    }
}
