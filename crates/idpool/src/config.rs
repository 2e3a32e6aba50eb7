use crate::{Error, IdValue, LOCAL_POOL_SEPARATOR, Result};
use core::time::Duration;

/// Default bound on waiting for a pool lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of times a conflicting commit is retried.
pub const DEFAULT_COMMIT_RETRIES: usize = 1;

/// Default number of concurrent consumers a root pool is sized for.
pub const DEFAULT_EXPECTED_CONSUMERS: u32 = 10;

/// Default cooldown before a released id may be handed out again.
pub const DEFAULT_DELAYED_TIME_SEC: u64 = 30;

/// Settings for an [`IdManager`](crate::IdManager).
///
/// Every manager in a cluster shares the same store and lock service but has
/// its own `node_id`, which names its local pools.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManagerConfig {
    pub node_id: String,
    pub lock_timeout: Duration,
    pub commit_retries: usize,
    pub expected_consumers: u32,
    pub delayed_time_sec: u64,
}

impl ManagerConfig {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            commit_retries: DEFAULT_COMMIT_RETRIES,
            expected_consumers: DEFAULT_EXPECTED_CONSUMERS,
            delayed_time_sec: DEFAULT_DELAYED_TIME_SEC,
        }
    }

    #[must_use]
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    #[must_use]
    pub fn with_commit_retries(mut self, commit_retries: usize) -> Self {
        self.commit_retries = commit_retries;
        self
    }

    #[must_use]
    pub fn with_expected_consumers(mut self, expected_consumers: u32) -> Self {
        self.expected_consumers = expected_consumers;
        self
    }

    #[must_use]
    pub fn with_delayed_time_sec(mut self, delayed_time_sec: u64) -> Self {
        self.delayed_time_sec = delayed_time_sec;
        self
    }

    /// Block size for a root pool spanning `[low, high]`.
    ///
    /// `max(1, span / expected_consumers)`, capped to `u32::MAX`.
    pub fn block_size_for(&self, low: IdValue, high: IdValue) -> u32 {
        let span = u64::from(high.saturating_sub(low)) + 1;
        let size = span / u64::from(self.expected_consumers.max(1));
        u32::try_from(size.max(1)).unwrap_or(u32::MAX)
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if the node id is empty or contains
    /// the local pool separator, or if `expected_consumers` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.node_id.is_empty() {
            return Err(Error::invalid_request("node id must not be empty"));
        }
        if self.node_id.contains(LOCAL_POOL_SEPARATOR) {
            return Err(Error::invalid_request(format!(
                "node id must not contain '{LOCAL_POOL_SEPARATOR}'"
            )));
        }
        if self.expected_consumers == 0 {
            return Err(Error::invalid_request(
                "expected consumers must be greater than 0",
            ));
        }
        Ok(())
    }
}
