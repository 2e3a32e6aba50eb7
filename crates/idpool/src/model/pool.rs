use crate::{AvailableIds, IdValue, ReleasedIds};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Separator between a root pool name and the node suffix of its local pools.
pub const LOCAL_POOL_SEPARATOR: char = '.';

/// Returns the deterministic name of `node_id`'s local pool under `global`.
///
/// ```
/// assert_eq!(idpool::local_pool_name("test-pool", "node-1"), "test-pool.node-1");
/// ```
pub fn local_pool_name(global: &str, node_id: &str) -> String {
    format!("{global}{LOCAL_POOL_SEPARATOR}{node_id}")
}

/// A named pool of ids.
///
/// Root (global) pools own the full `[low, high]` range, the per-key
/// `id_entries` table and the list of `child_pools`. Local pools carry a
/// `parent_pool_name`, draw blocks of `block_size` ids from their parent and
/// keep their own released ids; their `id_entries` and `child_pools` stay
/// empty.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub name: String,
    pub parent_pool_name: Option<String>,
    pub low: IdValue,
    pub high: IdValue,
    pub block_size: u32,
    pub available_ids: AvailableIds,
    pub released_ids: ReleasedIds,
    pub id_entries: BTreeMap<String, Vec<IdValue>>,
    pub child_pools: Vec<String>,
}

impl Pool {
    /// Creates a root pool spanning `[low, high]`.
    pub fn root(
        name: impl Into<String>,
        low: IdValue,
        high: IdValue,
        block_size: u32,
        delayed_time_sec: u64,
    ) -> Self {
        Self {
            name: name.into(),
            parent_pool_name: None,
            low,
            high,
            block_size,
            available_ids: AvailableIds::new(low, high),
            released_ids: ReleasedIds::new(delayed_time_sec),
            id_entries: BTreeMap::new(),
            child_pools: Vec::new(),
        }
    }

    /// Creates an empty local pool for `node_id` under `parent`.
    pub fn local(parent: &Self, node_id: &str) -> Self {
        Self {
            name: local_pool_name(&parent.name, node_id),
            parent_pool_name: Some(parent.name.clone()),
            low: parent.low,
            high: parent.high,
            block_size: parent.block_size,
            available_ids: AvailableIds::empty(),
            released_ids: ReleasedIds::new(parent.released_ids.delayed_time_sec()),
            id_entries: BTreeMap::new(),
            child_pools: Vec::new(),
        }
    }

    pub const fn is_root(&self) -> bool {
        self.parent_pool_name.is_none()
    }

    pub fn ids_for(&self, id_key: &str) -> Option<&[IdValue]> {
        self.id_entries.get(id_key).map(Vec::as_slice)
    }

    pub fn register_child(&mut self, child: &str) {
        if !self.child_pools.iter().any(|c| c == child) {
            self.child_pools.push(child.to_owned());
        }
    }

    /// Whether a request for the same bounds should be treated as a no-op.
    pub const fn has_bounds(&self, low: IdValue, high: IdValue) -> bool {
        self.low == low && self.high == high
    }
}
