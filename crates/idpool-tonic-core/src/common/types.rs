//! Shared manager types and protobuf conversions.
//!
//! The service runs one [`Manager`] per process: an [`IdManager`] over the
//! in-process [`MemoryPoolStore`] and [`LocalLockService`], stamping released
//! ids with the system clock. A deployment backed by a replicated store or a
//! cluster lock service swaps those two type parameters and keeps the rest.

use crate::proto;
use idpool::{IdManager, LocalLockService, LocalPoolStats, MemoryPoolStore, PoolStats};

/// The concrete pool manager hosted by the service.
pub type Manager = IdManager<MemoryPoolStore, LocalLockService>;

/// The concrete reclaimer hosted by the service.
pub type Reclaimer = idpool::Reclaimer<MemoryPoolStore, LocalLockService, idpool::SystemClock>;

fn count(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

impl From<LocalPoolStats> for proto::LocalPoolStats {
    fn from(stats: LocalPoolStats) -> Self {
        Self {
            name: stats.name,
            remaining: stats.remaining,
            released: stats.released,
            ready: count(stats.ready),
        }
    }
}

impl From<PoolStats> for proto::GetPoolStatsResponse {
    fn from(stats: PoolStats) -> Self {
        Self {
            pool: stats.pool,
            low: stats.low,
            high: stats.high,
            block_size: stats.block_size,
            remaining: stats.remaining,
            released: stats.released,
            allocated_keys: count(stats.allocated_keys),
            child_pools: count(stats.child_pools),
            local: stats.local.map(Into::into),
        }
    }
}
