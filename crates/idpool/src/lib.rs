//! # `idpool`: cluster-shared integer id pools
//!
//! Hands out small integer ids (table ids, group ids, VLAN tags, ...) from
//! named pools shared by every node of a cluster.
//!
//! - Each root pool owns a range `[low, high]`. Every node draws blocks of
//!   that range into its own local pool, so most allocations only contend
//!   on the node's own records.
//! - Allocation is idempotent per caller key: the same key gets the same id
//!   back until it is released.
//! - Released ids are quarantined for a cooldown before reuse. Deadlines are
//!   absolute timestamps stored with the pool, so restarts keep them.
//! - All pool state lives in a [`PoolStore`] and is mutated under named
//!   locks from a [`LockService`]; each operation commits its records as
//!   one atomic batch.
//!
//! ```
//! # let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
//! # rt.block_on(async {
//! use idpool::{IdManager, LocalLockService, ManagerConfig, MemoryPoolStore};
//! use std::sync::Arc;
//!
//! let manager = IdManager::new(
//!     Arc::new(MemoryPoolStore::new()),
//!     Arc::new(LocalLockService::new()),
//!     ManagerConfig::new("node-1"),
//! )?;
//!
//! manager.create_id_pool_with_block_size("vlan", 100, 200, 2).await?;
//! let id = manager.allocate_id("vlan", "tenant-a").await?;
//! assert_eq!(id, 100);
//! assert_eq!(manager.allocate_id("vlan", "tenant-a").await?, id);
//! manager.release_id("vlan", "tenant-a").await?;
//! # Ok::<(), idpool::Error>(())
//! # }).unwrap();
//! ```

mod config;
mod error;
mod listener;
mod lock;
mod manager;
mod model;
mod reclaimer;
mod store;
mod time;

pub use crate::config::*;
pub use crate::error::*;
pub use crate::listener::*;
pub use crate::lock::*;
pub use crate::manager::*;
pub use crate::model::*;
pub use crate::reclaimer::*;
pub use crate::store::*;
pub use crate::time::*;
