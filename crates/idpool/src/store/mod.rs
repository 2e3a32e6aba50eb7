//! The transactional record store consumed by the allocator.
//!
//! One record per pool name. Reads return the record together with the
//! version it was committed at; writes are submitted as a batch of
//! [`PoolWrite`]s that the store applies all-or-nothing, rejecting the whole
//! batch with [`Error::StoreConflict`] when any expectation does not hold.
//!
//! [`Error::StoreConflict`]: crate::Error::StoreConflict

mod memory;

pub use memory::*;

use crate::{Pool, Result};
use std::sync::Arc;

/// A record paired with the store version it was read at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

/// A single record mutation inside an atomic batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PoolWrite {
    /// Insert a record that must not exist yet.
    Create(Pool),
    /// Replace a record that must still be at `expected_version`.
    Update { pool: Pool, expected_version: u64 },
    /// Remove a record that must still be at `expected_version`.
    Delete { name: String, expected_version: u64 },
}

impl PoolWrite {
    pub fn record(&self) -> &str {
        match self {
            Self::Create(pool) | Self::Update { pool, .. } => &pool.name,
            Self::Delete { name, .. } => name,
        }
    }
}

pub trait PoolStore: Send + Sync {
    fn read_pool(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<Versioned<Pool>>>> + Send;

    /// Names of every stored record, local pools included.
    fn list_pools(&self) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Applies `writes` as one atomic unit.
    fn write_pools(&self, writes: Vec<PoolWrite>) -> impl Future<Output = Result<()>> + Send;
}

impl<S: PoolStore + ?Sized> PoolStore for Arc<S> {
    fn read_pool(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<Versioned<Pool>>>> + Send {
        (**self).read_pool(name)
    }

    fn list_pools(&self) -> impl Future<Output = Result<Vec<String>>> + Send {
        (**self).list_pools()
    }

    fn write_pools(&self, writes: Vec<PoolWrite>) -> impl Future<Output = Result<()>> + Send {
        (**self).write_pools(writes)
    }
}
