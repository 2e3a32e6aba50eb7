//! Error types for pool allocation and lifecycle operations.
//!
//! Every public operation returns [`Result`]. The variants split into two
//! groups:
//!
//! - Caller-visible outcomes: [`Error::PoolExhausted`], [`Error::LockTimeout`],
//!   [`Error::InvalidPool`], [`Error::PoolConflict`], [`Error::InvalidRequest`]
//!   and [`Error::CommitFailed`].
//! - Collaborator failures: [`Error::StoreConflict`] is retried internally by
//!   the allocator, while [`Error::Store`], [`Error::Lock`] and
//!   [`Error::Codec`] are surfaced as-is.

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All errors that the pool allocator can produce.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The root pool and every released-id source are drained.
    #[error("Pool '{pool}' is exhausted")]
    PoolExhausted { pool: String },

    /// A named lock could not be acquired within the configured bound.
    #[error("Timed out acquiring lock '{lock}'")]
    LockTimeout { lock: String },

    /// The operation referenced a pool with no root record, or the pool was
    /// deleted while the request was in flight.
    #[error("Pool '{pool}' does not exist")]
    InvalidPool { pool: String },

    /// A pool with the same name exists with different bounds.
    #[error("Pool '{pool}' already exists: {reason}")]
    PoolConflict { pool: String, reason: String },

    /// The request arguments were rejected before any state was touched.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The store rejected a commit because a record changed underneath it.
    #[error("Store conflict on '{record}'")]
    StoreConflict { record: String },

    /// Commits kept conflicting after the bounded number of retries.
    #[error("Commit for pool '{pool}' failed after {attempts} attempts")]
    CommitFailed { pool: String, attempts: usize },

    /// Any other store failure.
    #[error("Store error: {context}")]
    Store { context: String },

    /// Any other lock service failure.
    #[error("Lock error: {context}")]
    Lock { context: String },

    /// A pool record could not be encoded or decoded.
    #[error("Codec error: {context}")]
    Codec { context: String },

    /// A background task ended abnormally.
    #[error("Task error: {context}")]
    Task { context: String },
}

impl Error {
    pub(crate) fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_pool(pool: impl Into<String>) -> Self {
        Self::InvalidPool { pool: pool.into() }
    }

    pub(crate) fn exhausted(pool: impl Into<String>) -> Self {
        Self::PoolExhausted { pool: pool.into() }
    }

    /// Returns `true` when retrying the whole critical section may succeed.
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::StoreConflict { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec {
            context: err.to_string(),
        }
    }
}
