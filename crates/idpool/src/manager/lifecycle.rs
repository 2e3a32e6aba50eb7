use crate::{
    Error, IdManager, IdValue, LockService, Pool, PoolStore, PoolWrite, Result, TimeSource,
    manager::validate_pool_name,
};
use core::ops::ControlFlow;

#[cfg(feature = "tracing")]
use tracing::instrument;

impl<S, L, T> IdManager<S, L, T>
where
    S: PoolStore,
    L: LockService + 'static,
    T: TimeSource + Send + Sync,
{
    /// Creates a root pool over `[low, high]` with a block size derived from
    /// [`ManagerConfig::block_size_for`](crate::ManagerConfig::block_size_for).
    ///
    /// # Errors
    ///
    /// See [`Self::create_id_pool_with_block_size`].
    pub async fn create_id_pool(&self, pool: &str, low: IdValue, high: IdValue) -> Result<()> {
        let block_size = self.config().block_size_for(low, high);
        self.create_id_pool_with_block_size(pool, low, high, block_size)
            .await
    }

    /// Creates a root pool over `[low, high]` together with this node's
    /// local pool, which receives the first block right away.
    ///
    /// Creating a pool that already exists with the same bounds is a no-op.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] for an empty name, `low > high` or a zero
    ///   block size.
    /// - [`Error::PoolConflict`] if the name is taken with other bounds or by
    ///   a local pool.
    /// - [`Error::LockTimeout`] / [`Error::CommitFailed`] as for allocation.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self), fields(node = %self.node_id())))]
    pub async fn create_id_pool_with_block_size(
        &self,
        pool: &str,
        low: IdValue,
        high: IdValue,
        block_size: u32,
    ) -> Result<()> {
        validate_pool_name(pool)?;
        if low > high {
            return Err(Error::invalid_request(format!(
                "low ({low}) must not exceed high ({high})"
            )));
        }
        if block_size == 0 {
            return Err(Error::invalid_request("block size must be greater than 0"));
        }

        let local_name = self.local_pool_name(pool);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let held = self.acquire(&[local_name.as_str(), pool]).await?;
            let result = self.create_locked(pool, low, high, block_size).await;
            held.release().await;
            if let ControlFlow::Break(out) = self.settle(pool, attempt, result) {
                return out;
            }
        }
    }

    /// Deletes a root pool and every local pool registered under it.
    ///
    /// In-flight allocations against the pool fail with
    /// [`Error::InvalidPool`] once they obtain the locks.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidPool`] if `pool` has no root record.
    /// - [`Error::LockTimeout`] / [`Error::CommitFailed`] as for allocation.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self), fields(node = %self.node_id())))]
    pub async fn delete_id_pool(&self, pool: &str) -> Result<()> {
        validate_pool_name(pool)?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            // Children registered after this read are still deleted below,
            // under the root lock; only their own locks are skipped.
            let mut children = self.read_root(pool).await?.value.child_pools;
            children.sort_unstable();

            let mut names: Vec<&str> = children.iter().map(String::as_str).collect();
            names.push(pool);
            let held = self.acquire(&names).await?;
            let result = self.delete_locked(pool).await;
            held.release().await;
            if let ControlFlow::Break(out) = self.settle(pool, attempt, result) {
                return out;
            }
        }
    }

    async fn create_locked(&self, pool: &str, low: IdValue, high: IdValue, block_size: u32) -> Result<()> {
        if let Some(existing) = self.store.read_pool(pool).await? {
            let existing = existing.value;
            if !existing.is_root() {
                return Err(Error::PoolConflict {
                    pool: pool.to_owned(),
                    reason: "name belongs to a local pool".to_owned(),
                });
            }
            if !existing.has_bounds(low, high) {
                return Err(Error::PoolConflict {
                    pool: pool.to_owned(),
                    reason: format!(
                        "bounds [{}, {}] differ from requested [{low}, {high}]",
                        existing.low, existing.high
                    ),
                });
            }
            #[cfg(feature = "tracing")]
            tracing::debug!(pool, "pool already exists with the same bounds");
            return Ok(());
        }

        let mut root = Pool::root(pool, low, high, block_size, self.config().delayed_time_sec);
        let mut local = Pool::local(&root, self.node_id());
        if let Some(block) = root.available_ids.carve(block_size) {
            local.available_ids = block;
        }
        root.register_child(&local.name);

        // A leftover local record of this pool (e.g. from a half-cleaned
        // store) is reset.
        let local_write = match self.read_local(pool).await? {
            Some(stale) => PoolWrite::Update {
                pool: local,
                expected_version: stale.version,
            },
            None => PoolWrite::Create(local),
        };
        self.store
            .write_pools(vec![PoolWrite::Create(root), local_write])
            .await?;

        #[cfg(feature = "tracing")]
        tracing::info!(pool, low, high, block_size, "created id pool");
        Ok(())
    }

    async fn delete_locked(&self, pool: &str) -> Result<()> {
        let root = self.read_root(pool).await?;

        let mut writes = Vec::with_capacity(root.value.child_pools.len() + 1);
        for child in &root.value.child_pools {
            if let Some(record) = self.store.read_pool(child).await? {
                writes.push(PoolWrite::Delete {
                    name: child.clone(),
                    expected_version: record.version,
                });
            }
        }
        writes.push(PoolWrite::Delete {
            name: pool.to_owned(),
            expected_version: root.version,
        });
        self.store.write_pools(writes).await?;

        #[cfg(feature = "tracing")]
        tracing::info!(pool, children = root.value.child_pools.len(), "deleted id pool");
        Ok(())
    }
}
