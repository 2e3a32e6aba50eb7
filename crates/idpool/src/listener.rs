//! Change notifications for pool records.
//!
//! A store publishes one [`PoolChange`] per committed record write to every
//! subscribed [`PoolListener`]. Listeners answer with an explicit
//! [`Delivery`] so the publisher can tell an ignored change from a failed
//! one.

use crate::{Error, Pool, model::LOCAL_POOL_SEPARATOR};
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc};

/// A committed change to a single pool record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PoolChange {
    Created(Pool),
    Updated { before: Pool, after: Pool },
    Deleted(Pool),
}

impl PoolChange {
    pub fn pool_name(&self) -> &str {
        match self {
            Self::Created(pool) | Self::Deleted(pool) => &pool.name,
            Self::Updated { after, .. } => &after.name,
        }
    }
}

/// Outcome of handing a [`PoolChange`] to a listener.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The listener is not interested in this change.
    Rejected,
    Failed(Error),
}

pub trait PoolListener: Send + Sync {
    fn on_pool_changed(&self, change: &PoolChange) -> Delivery;
}

/// Per-publish tally of listener outcomes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub rejected: usize,
    pub failed: usize,
}

/// Registered listeners of a store.
#[derive(Default)]
pub struct ListenerSet {
    listeners: RwLock<Vec<Arc<dyn PoolListener>>>,
}

impl ListenerSet {
    pub fn subscribe(&self, listener: Arc<dyn PoolListener>) {
        self.listeners.write().push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn publish(&self, change: &PoolChange) -> DeliveryReport {
        let listeners = self.listeners.read().clone();
        let mut report = DeliveryReport::default();
        for listener in listeners {
            match listener.on_pool_changed(change) {
                Delivery::Delivered => report.delivered += 1,
                Delivery::Rejected => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(pool = change.pool_name(), "change rejected by listener");
                    report.rejected += 1;
                }
                Delivery::Failed(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(pool = change.pool_name(), "listener failed: {_e}");
                    report.failed += 1;
                }
            }
        }
        report
    }
}

/// A listener that mirrors the latest committed snapshot of each pool.
///
/// A cache built with [`PoolCache::for_pool`] only tracks one root pool and
/// its local pools and rejects everything else.
#[derive(Debug, Default)]
pub struct PoolCache {
    root: Option<String>,
    pools: RwLock<HashMap<String, Pool>>,
}

impl PoolCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_pool(root: impl Into<String>) -> Self {
        Self {
            root: Some(root.into()),
            pools: RwLock::default(),
        }
    }

    pub fn get(&self, name: &str) -> Option<Pool> {
        self.pools.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.pools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn tracks(&self, name: &str) -> bool {
        match &self.root {
            None => true,
            Some(root) => name
                .strip_prefix(root.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with(LOCAL_POOL_SEPARATOR)),
        }
    }
}

impl PoolListener for PoolCache {
    fn on_pool_changed(&self, change: &PoolChange) -> Delivery {
        if !self.tracks(change.pool_name()) {
            return Delivery::Rejected;
        }
        let mut pools = self.pools.write();
        match change {
            PoolChange::Created(pool) | PoolChange::Updated { after: pool, .. } => {
                pools.insert(pool.name.clone(), pool.clone());
            }
            PoolChange::Deleted(pool) => {
                pools.remove(&pool.name);
            }
        }
        Delivery::Delivered
    }
}
