//! The pool allocator.
//!
//! [`IdManager`] is the per-node entry point: it allocates and releases ids
//! against a root pool through this node's local pool, and creates and
//! deletes root pools. Every read-modify-write runs with the pool locks held
//! (always the local pool's lock before the root's) and commits the touched
//! records as a single batch, so a failed call leaves no trace in the store.
//!
//! ## Structure
//!
//! - `allocate` - `allocate_id`, `allocate_id_range`, `release_id`.
//! - `lifecycle` - `create_id_pool`, `delete_id_pool`.

mod allocate;
mod lifecycle;
#[cfg(test)]
mod tests;

use crate::{
    Error, IdValue, LockService, ManagerConfig, Pool, PoolStore, Result, SystemClock,
    LOCAL_POOL_SEPARATOR, TimeSource, Versioned, local_pool_name,
};
use crate::lock::HeldLocks;
use core::ops::ControlFlow;
use std::sync::Arc;

/// Allocates ids from cluster-shared pools on behalf of one node.
pub struct IdManager<S, L, T = SystemClock> {
    store: Arc<S>,
    locks: Arc<L>,
    clock: T,
    config: Arc<ManagerConfig>,
}

impl<S, L, T: Clone> Clone for IdManager<S, L, T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            locks: Arc::clone(&self.locks),
            clock: self.clock.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S, L> IdManager<S, L, SystemClock>
where
    S: PoolStore,
    L: LockService + 'static,
{
    /// Creates a manager stamping released ids with the system clock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if `config` fails validation.
    pub fn new(store: Arc<S>, locks: Arc<L>, config: ManagerConfig) -> Result<Self> {
        Self::with_clock(store, locks, SystemClock, config)
    }
}

/// Usage counters of a root pool and this node's local pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolStats {
    pub pool: String,
    pub low: IdValue,
    pub high: IdValue,
    pub block_size: u32,
    /// Values never handed to any local pool.
    pub remaining: u64,
    /// Released ids parked on the root pool.
    pub released: u64,
    pub allocated_keys: usize,
    pub child_pools: usize,
    pub local: Option<LocalPoolStats>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalPoolStats {
    pub name: String,
    pub remaining: u64,
    pub released: u64,
    pub ready: usize,
}

impl<S, L, T> IdManager<S, L, T>
where
    S: PoolStore,
    L: LockService + 'static,
    T: TimeSource + Send + Sync,
{
    /// Creates a manager with an explicit [`TimeSource`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if `config` fails validation.
    pub fn with_clock(store: Arc<S>, locks: Arc<L>, clock: T, config: ManagerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            locks,
            clock,
            config: Arc::new(config),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Name of this node's local pool under `pool`.
    pub fn local_pool_name(&self, pool: &str) -> String {
        local_pool_name(pool, &self.config.node_id)
    }

    /// Ids currently recorded for `id_key`, read without taking any lock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPool`] if `pool` is not a root pool.
    pub async fn existing_ids(&self, pool: &str, id_key: &str) -> Result<Option<Vec<IdValue>>> {
        let root = self.read_root(pool).await?;
        Ok(root.value.ids_for(id_key).map(<[IdValue]>::to_vec))
    }

    /// A point-in-time view of `pool`, read without taking any lock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPool`] if `pool` is not a root pool.
    pub async fn pool_stats(&self, pool: &str) -> Result<PoolStats> {
        let root = self.read_root(pool).await?.value;
        let now = self.clock.current_secs();
        let local = self
            .read_local(pool)
            .await?
            .map(|local| LocalPoolStats {
                remaining: local.value.available_ids.remaining(),
                released: local.value.released_ids.available_id_count(),
                ready: local.value.released_ids.ready_count(now),
                name: local.value.name,
            });

        Ok(PoolStats {
            remaining: root.available_ids.remaining(),
            released: root.released_ids.available_id_count(),
            allocated_keys: root.id_entries.len(),
            child_pools: root.child_pools.len(),
            low: root.low,
            high: root.high,
            block_size: root.block_size,
            pool: root.name,
            local,
        })
    }

    pub(crate) fn now(&self) -> u64 {
        self.clock.current_secs()
    }

    pub(crate) async fn read_root(&self, pool: &str) -> Result<Versioned<Pool>> {
        match self.store.read_pool(pool).await? {
            Some(root) if root.value.is_root() => Ok(root),
            _ => Err(Error::invalid_pool(pool)),
        }
    }

    /// Reads this node's local pool under `pool`. A record at that name that
    /// does not belong to `pool` is reported as a conflict and never adopted.
    pub(crate) async fn read_local(&self, pool: &str) -> Result<Option<Versioned<Pool>>> {
        let name = self.local_pool_name(pool);
        match self.store.read_pool(&name).await? {
            Some(local) if local.value.parent_pool_name.as_deref() != Some(pool) => {
                Err(Error::PoolConflict {
                    pool: name,
                    reason: format!("record is not a local pool of '{pool}'"),
                })
            }
            local => Ok(local),
        }
    }

    /// Acquires `names` in order. On failure every lock already taken is
    /// released before the error is returned; if the caller is cancelled,
    /// the returned guard releases them on drop.
    pub(crate) async fn acquire(&self, names: &[&str]) -> Result<HeldLocks<L>> {
        let mut held = HeldLocks::new(Arc::clone(&self.locks));
        for name in names {
            match self.locks.lock(name, self.config.lock_timeout).await {
                Ok(token) => held.push(token),
                Err(e) => {
                    held.release().await;
                    return Err(e);
                }
            }
        }
        Ok(held)
    }

    /// Decides whether a locked critical section should run again.
    ///
    /// Store conflicts are retried up to `commit_retries` times and then
    /// reported as [`Error::CommitFailed`]; every other outcome is final.
    pub(crate) fn settle<R>(&self, pool: &str, attempt: usize, result: Result<R>) -> ControlFlow<Result<R>> {
        match result {
            Err(e) if e.is_conflict() => {
                if attempt <= self.config.commit_retries {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(pool, attempt, "commit conflicted, retrying: {e}");
                    ControlFlow::Continue(())
                } else {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(pool, attempt, "commit conflicted, giving up: {e}");
                    ControlFlow::Break(Err(Error::CommitFailed {
                        pool: pool.to_owned(),
                        attempts: attempt,
                    }))
                }
            }
            other => ControlFlow::Break(other),
        }
    }
}

pub(crate) fn validate_name(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::invalid_request(format!("{kind} must not be empty")));
    }
    Ok(())
}

/// Root pool names may not contain [`LOCAL_POOL_SEPARATOR`], so no root can
/// share its name with a local pool.
pub(crate) fn validate_pool_name(pool: &str) -> Result<()> {
    validate_name("pool name", pool)?;
    if pool.contains(LOCAL_POOL_SEPARATOR) {
        return Err(Error::invalid_request(format!(
            "pool name '{pool}' must not contain '{LOCAL_POOL_SEPARATOR}'"
        )));
    }
    Ok(())
}
