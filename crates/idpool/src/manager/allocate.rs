use crate::{
    Error, IdManager, IdValue, LockService, Pool, PoolStore, PoolWrite, Result, TimeSource,
    Versioned, manager::{validate_name, validate_pool_name},
};
use core::ops::ControlFlow;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Working copies of the root and local records for one critical section.
///
/// Nothing here reaches the store until [`Draw::into_writes`] is committed,
/// so an exhausted draw simply drops its copies and burns no ids.
struct Draw {
    root: Pool,
    root_version: u64,
    local: Pool,
    local_version: Option<u64>,
}

impl Draw {
    fn new(root: Versioned<Pool>, local: Option<Versioned<Pool>>, node_id: &str) -> Self {
        let (local, local_version) = match local {
            Some(local) => (local.value, Some(local.version)),
            None => (Pool::local(&root.value, node_id), None),
        };
        Self {
            root: root.value,
            root_version: root.version,
            local,
            local_version,
        }
    }

    /// Next id for this node: a ready released id first, then the local
    /// range, replenishing the local pool from the root when both are dry.
    fn next_id(&mut self, now: u64) -> Result<IdValue> {
        loop {
            if let Some(id) = self.local.released_ids.pop_ready(now) {
                return Ok(id);
            }
            if let Some(id) = self.local.available_ids.take_next() {
                return Ok(id);
            }
            if !self.replenish(now) {
                return Err(Error::exhausted(&self.root.name));
            }
        }
    }

    /// Moves one block from the root to the local pool. The root's untouched
    /// range is used first; once it is gone, up to a block of its ready
    /// released ids is moved instead.
    fn replenish(&mut self, now: u64) -> bool {
        if let Some(block) = self.root.available_ids.carve(self.root.block_size) {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                pool = %self.local.name,
                start = block.start,
                end = block.end,
                "replenished from root range"
            );
            self.local.available_ids = block;
            return true;
        }

        let moved = self
            .root
            .released_ids
            .drain_ready(now, self.root.block_size as usize);
        if moved.is_empty() {
            return false;
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(
            pool = %self.local.name,
            count = moved.len(),
            "replenished from root released ids"
        );
        for entry in moved {
            self.local.released_ids.insert(entry);
        }
        true
    }

    fn into_writes(mut self) -> Vec<PoolWrite> {
        let local = match self.local_version {
            Some(expected_version) => PoolWrite::Update {
                pool: self.local,
                expected_version,
            },
            None => {
                self.root.register_child(&self.local.name);
                PoolWrite::Create(self.local)
            }
        };
        vec![
            PoolWrite::Update {
                pool: self.root,
                expected_version: self.root_version,
            },
            local,
        ]
    }
}

impl<S, L, T> IdManager<S, L, T>
where
    S: PoolStore,
    L: LockService + 'static,
    T: TimeSource + Send + Sync,
{
    /// Returns the id assigned to `id_key`, allocating one if the key has
    /// none.
    ///
    /// Calling this again for the same key returns the same id until the key
    /// is released.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidPool`] if `pool` has no root record.
    /// - [`Error::PoolExhausted`] if no range or ready released id is left.
    /// - [`Error::LockTimeout`] if a pool lock could not be taken in time.
    /// - [`Error::CommitFailed`] if the store kept rejecting the commit.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self), fields(node = %self.node_id())))]
    pub async fn allocate_id(&self, pool: &str, id_key: &str) -> Result<IdValue> {
        let ids = self.allocate(pool, id_key, 1).await?;
        ids.first().copied().ok_or_else(|| Error::exhausted(pool))
    }

    /// Allocates `size` ids for `id_key` in one locked critical section.
    ///
    /// The ids are drawn one by one, so they are only contiguous when they
    /// come from a single untouched block. An existing key returns its
    /// recorded ids unchanged.
    ///
    /// # Errors
    ///
    /// Same as [`Self::allocate_id`], plus [`Error::InvalidRequest`] if
    /// `size` is zero. On any error, no id is consumed.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self), fields(node = %self.node_id())))]
    pub async fn allocate_id_range(&self, pool: &str, id_key: &str, size: u32) -> Result<Vec<IdValue>> {
        if size == 0 {
            return Err(Error::invalid_request("size must be greater than 0"));
        }
        self.allocate(pool, id_key, size).await
    }

    /// Releases every id recorded for `id_key` into this node's local pool,
    /// where each waits out the pool's cooldown before it can be reused.
    ///
    /// Releasing a key that holds nothing is a successful no-op.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidPool`] if `pool` has no root record.
    /// - [`Error::LockTimeout`] if a pool lock could not be taken in time.
    /// - [`Error::CommitFailed`] if the store kept rejecting the commit.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self), fields(node = %self.node_id())))]
    pub async fn release_id(&self, pool: &str, id_key: &str) -> Result<()> {
        validate_pool_name(pool)?;
        validate_name("id key", id_key)?;

        let local_name = self.local_pool_name(pool);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let held = self.acquire(&[local_name.as_str(), pool]).await?;
            let result = self.release_locked(pool, id_key).await;
            held.release().await;
            if let ControlFlow::Break(out) = self.settle(pool, attempt, result) {
                return out;
            }
        }
    }

    async fn allocate(&self, pool: &str, id_key: &str, size: u32) -> Result<Vec<IdValue>> {
        validate_pool_name(pool)?;
        validate_name("id key", id_key)?;

        let local_name = self.local_pool_name(pool);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let held = self.acquire(&[local_name.as_str(), pool]).await?;
            let result = self.allocate_locked(pool, id_key, size).await;
            held.release().await;
            if let ControlFlow::Break(out) = self.settle(pool, attempt, result) {
                return out;
            }
        }
    }

    async fn allocate_locked(&self, pool: &str, id_key: &str, size: u32) -> Result<Vec<IdValue>> {
        let root = self.read_root(pool).await?;
        if let Some(ids) = root.value.ids_for(id_key) {
            return Ok(ids.to_vec());
        }

        let local = self.read_local(pool).await?;
        let now = self.now();
        let mut draw = Draw::new(root, local, self.node_id());
        let ids = (0..size)
            .map(|_| draw.next_id(now))
            .collect::<Result<Vec<_>>>()?;

        draw.root.id_entries.insert(id_key.to_owned(), ids.clone());
        self.store.write_pools(draw.into_writes()).await?;

        #[cfg(feature = "tracing")]
        tracing::debug!(pool, id_key, ?ids, "allocated");
        Ok(ids)
    }

    async fn release_locked(&self, pool: &str, id_key: &str) -> Result<()> {
        let root = self.read_root(pool).await?;
        if root.value.ids_for(id_key).is_none() {
            return Ok(());
        }

        let local = self.read_local(pool).await?;
        let now = self.now();
        let mut draw = Draw::new(root, local, self.node_id());
        let ids = draw.root.id_entries.remove(id_key).unwrap_or_default();
        for id in &ids {
            draw.local.released_ids.hold(*id, now);
        }
        self.store.write_pools(draw.into_writes()).await?;

        #[cfg(feature = "tracing")]
        tracing::debug!(pool, id_key, ?ids, "released");
        Ok(())
    }
}
