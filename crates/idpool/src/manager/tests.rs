use crate::{
    AvailableIds, Error, IdManager, LocalLockService, LockService, ManagerConfig, MemoryPoolStore,
    Pool, PoolCache, PoolStore, PoolWrite, Result, TimeSource, Versioned,
};
use core::time::Duration;
use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

#[derive(Clone, Default)]
struct MockTime {
    secs: Arc<AtomicU64>,
}

impl MockTime {
    fn set(&self, secs: u64) {
        self.secs.store(secs, Ordering::Relaxed);
    }
}

impl TimeSource for MockTime {
    fn current_secs(&self) -> u64 {
        self.secs.load(Ordering::Relaxed)
    }
}

/// Fails the next `conflicts` commits with a store conflict.
#[derive(Default)]
struct ConflictingStore {
    inner: MemoryPoolStore,
    conflicts: AtomicUsize,
}

impl ConflictingStore {
    fn conflict_next(&self, n: usize) {
        self.conflicts.store(n, Ordering::SeqCst);
    }
}

impl PoolStore for ConflictingStore {
    async fn read_pool(&self, name: &str) -> Result<Option<Versioned<Pool>>> {
        self.inner.read_pool(name).await
    }

    async fn list_pools(&self) -> Result<Vec<String>> {
        self.inner.list_pools().await
    }

    async fn write_pools(&self, writes: Vec<PoolWrite>) -> Result<()> {
        let conflicted = self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if conflicted {
            return Err(Error::StoreConflict {
                record: writes
                    .first()
                    .map(|w| w.record().to_owned())
                    .unwrap_or_default(),
            });
        }
        self.inner.write_pools(writes).await
    }
}

type TestManager<S = MemoryPoolStore> = IdManager<S, LocalLockService, MockTime>;

fn manager_on<S: PoolStore>(
    store: &Arc<S>,
    locks: &Arc<LocalLockService>,
    node_id: &str,
    clock: &MockTime,
) -> TestManager<S> {
    let config = ManagerConfig::new(node_id)
        .with_delayed_time_sec(30)
        .with_lock_timeout(Duration::from_millis(200));
    IdManager::with_clock(Arc::clone(store), Arc::clone(locks), clock.clone(), config).unwrap()
}

fn single_node() -> (TestManager, MockTime) {
    let clock = MockTime::default();
    let manager = manager_on(
        &Arc::new(MemoryPoolStore::new()),
        &Arc::new(LocalLockService::new()),
        "node-1",
        &clock,
    );
    (manager, clock)
}

async fn record<S: PoolStore>(manager: &TestManager<S>, name: &str) -> Pool {
    manager
        .store()
        .read_pool(name)
        .await
        .unwrap()
        .unwrap_or_else(|| panic!("missing record {name}"))
        .value
}

async fn versions<S: PoolStore>(manager: &TestManager<S>) -> Vec<(String, u64)> {
    let mut names = manager.store().list_pools().await.unwrap();
    names.sort();
    let mut out = Vec::new();
    for name in names {
        let version = manager.store().read_pool(&name).await.unwrap().unwrap().version;
        out.push((name, version));
    }
    out
}

#[tokio::test]
async fn create_hands_first_block_to_local_pool() {
    let (manager, _) = single_node();
    manager
        .create_id_pool_with_block_size("test-pool", 100, 200, 2)
        .await
        .unwrap();

    let root = record(&manager, "test-pool").await;
    assert!(root.is_root());
    assert_eq!(root.child_pools, vec!["test-pool.node-1".to_owned()]);
    assert_eq!(root.available_ids.cursor, 101);

    let local = record(&manager, "test-pool.node-1").await;
    assert_eq!(local.parent_pool_name.as_deref(), Some("test-pool"));
    assert_eq!(
        local.available_ids,
        AvailableIds {
            start: 100,
            end: 101,
            cursor: 99
        }
    );
    assert_eq!(local.released_ids.delayed_time_sec(), 30);
}

#[tokio::test]
async fn allocate_then_release_round_trip() {
    let (manager, _) = single_node();
    manager
        .create_id_pool_with_block_size("test-pool", 100, 200, 2)
        .await
        .unwrap();

    let id = manager.allocate_id("test-pool", "key-1").await.unwrap();
    assert_eq!(id, 100);
    assert_eq!(record(&manager, "test-pool").await.id_entries.len(), 1);
    assert_eq!(
        record(&manager, "test-pool.node-1").await.available_ids.cursor,
        100
    );

    manager.release_id("test-pool", "key-1").await.unwrap();
    assert!(record(&manager, "test-pool").await.id_entries.is_empty());

    let local = record(&manager, "test-pool.node-1").await;
    assert_eq!(local.released_ids.available_id_count(), 1);
    let held: Vec<_> = local.released_ids.entries().map(|e| e.id).collect();
    assert_eq!(held, vec![100]);
}

#[tokio::test]
async fn allocation_is_idempotent_per_key() {
    let (manager, _) = single_node();
    manager.create_id_pool("p", 0, 99).await.unwrap();

    let first = manager.allocate_id("p", "k").await.unwrap();
    let before = versions(&manager).await;
    assert_eq!(manager.allocate_id("p", "k").await.unwrap(), first);
    assert_eq!(versions(&manager).await, before);
    assert_eq!(
        manager.existing_ids("p", "k").await.unwrap(),
        Some(vec![first])
    );
}

#[tokio::test]
async fn release_is_idempotent() {
    let (manager, _) = single_node();
    manager.create_id_pool("p", 0, 99).await.unwrap();
    manager.allocate_id("p", "k").await.unwrap();

    let before = versions(&manager).await;
    manager.release_id("p", "never-allocated").await.unwrap();
    assert_eq!(versions(&manager).await, before);

    manager.release_id("p", "k").await.unwrap();
    let after_first = versions(&manager).await;
    manager.release_id("p", "k").await.unwrap();
    assert_eq!(versions(&manager).await, after_first);
    assert_eq!(
        record(&manager, "p.node-1")
            .await
            .released_ids
            .available_id_count(),
        1
    );
}

#[tokio::test]
async fn released_id_waits_out_cooldown() {
    let (manager, clock) = single_node();
    manager
        .create_id_pool_with_block_size("p", 100, 200, 2)
        .await
        .unwrap();

    clock.set(0);
    assert_eq!(manager.allocate_id("p", "k0").await.unwrap(), 100);
    manager.release_id("p", "k0").await.unwrap();

    assert_eq!(manager.allocate_id("p", "k1").await.unwrap(), 101);
    assert_eq!(manager.allocate_id("p", "k2").await.unwrap(), 102);

    clock.set(29);
    assert_eq!(manager.allocate_id("p", "k3").await.unwrap(), 103);

    clock.set(30);
    assert_eq!(manager.allocate_id("p", "k4").await.unwrap(), 100);
}

#[tokio::test]
async fn exhausted_pool_fails_without_side_effects() {
    let (manager, _) = single_node();
    manager.create_id_pool("p", 100, 101).await.unwrap();

    let a = manager.allocate_id("p", "a").await.unwrap();
    let b = manager.allocate_id("p", "b").await.unwrap();
    assert_eq!((a, b), (100, 101));

    let before = versions(&manager).await;
    assert_eq!(
        manager.allocate_id("p", "c").await,
        Err(Error::PoolExhausted { pool: "p".into() })
    );
    assert_eq!(versions(&manager).await, before);
    assert_eq!(manager.existing_ids("p", "c").await.unwrap(), None);
}

#[tokio::test]
async fn cooling_ids_do_not_prevent_exhaustion() {
    let (manager, clock) = single_node();
    manager
        .create_id_pool_with_block_size("p", 1, 1, 1)
        .await
        .unwrap();
    manager.allocate_id("p", "a").await.unwrap();
    manager.release_id("p", "a").await.unwrap();

    assert!(matches!(
        manager.allocate_id("p", "b").await,
        Err(Error::PoolExhausted { .. })
    ));
    clock.set(30);
    assert_eq!(manager.allocate_id("p", "b").await.unwrap(), 1);
}

#[tokio::test]
async fn local_pool_replenishes_one_block_at_a_time() {
    let (manager, _) = single_node();
    manager
        .create_id_pool_with_block_size("p", 100, 200, 2)
        .await
        .unwrap();

    manager.allocate_id("p", "a").await.unwrap();
    manager.allocate_id("p", "b").await.unwrap();
    assert_eq!(record(&manager, "p").await.available_ids.cursor, 101);

    assert_eq!(manager.allocate_id("p", "c").await.unwrap(), 102);
    assert_eq!(
        record(&manager, "p.node-1").await.available_ids,
        AvailableIds {
            start: 102,
            end: 103,
            cursor: 102
        }
    );
    assert_eq!(record(&manager, "p").await.available_ids.cursor, 103);
}

#[tokio::test]
async fn range_allocation_spans_blocks() {
    let (manager, _) = single_node();
    manager
        .create_id_pool_with_block_size("p", 100, 200, 2)
        .await
        .unwrap();

    let ids = manager.allocate_id_range("p", "r", 3).await.unwrap();
    assert_eq!(ids, vec![100, 101, 102]);
    assert_eq!(manager.allocate_id_range("p", "r", 3).await.unwrap(), ids);
    assert_eq!(manager.allocate_id("p", "r").await.unwrap(), 100);

    manager.release_id("p", "r").await.unwrap();
    let local = record(&manager, "p.node-1").await;
    assert_eq!(local.released_ids.available_id_count(), 3);
}

#[tokio::test]
async fn range_allocation_rejects_zero_size() {
    let (manager, _) = single_node();
    manager.create_id_pool("p", 0, 9).await.unwrap();
    assert!(matches!(
        manager.allocate_id_range("p", "r", 0).await,
        Err(Error::InvalidRequest { .. })
    ));
}

#[tokio::test]
async fn failed_range_allocation_burns_nothing() {
    let (manager, _) = single_node();
    manager
        .create_id_pool_with_block_size("p", 100, 103, 2)
        .await
        .unwrap();

    let before = versions(&manager).await;
    assert!(matches!(
        manager.allocate_id_range("p", "big", 5).await,
        Err(Error::PoolExhausted { .. })
    ));
    assert_eq!(versions(&manager).await, before);

    let ids = manager.allocate_id_range("p", "fits", 4).await.unwrap();
    assert_eq!(ids, vec![100, 101, 102, 103]);
}

#[tokio::test]
async fn unknown_pool_is_invalid() {
    let (manager, _) = single_node();
    let missing = Err(Error::InvalidPool {
        pool: "nope".into(),
    });
    assert_eq!(manager.allocate_id("nope", "k").await, missing.clone().map(|()| 0));
    assert_eq!(manager.release_id("nope", "k").await, missing.clone());
    assert_eq!(manager.delete_id_pool("nope").await, missing);
}

#[tokio::test]
async fn pool_names_cannot_contain_the_local_separator() {
    let (manager, _) = single_node();
    manager.create_id_pool("p", 0, 9).await.unwrap();
    for result in [
        manager.create_id_pool("p.node-1", 0, 9).await,
        manager.release_id("p.node-1", "k").await,
        manager.delete_id_pool("p.node-1").await,
    ] {
        assert!(matches!(result, Err(Error::InvalidRequest { .. })));
    }
    assert!(matches!(
        manager.allocate_id("p.node-1", "k").await,
        Err(Error::InvalidRequest { .. })
    ));
    assert_eq!(record(&manager, "p.node-1").await.parent_pool_name.as_deref(), Some("p"));
}

#[tokio::test]
async fn foreign_record_at_local_name_is_never_adopted() {
    let store = Arc::new(MemoryPoolStore::new());
    let locks = Arc::new(LocalLockService::new());
    let clock = MockTime::default();
    let a = manager_on(&store, &locks, "a", &clock);
    let b = manager_on(&store, &locks, "b", &clock);

    // A root written straight to the store under the name node b would use
    // for its local pool of "vlan".
    let mut squatter = Pool::root("vlan.b", 500, 599, 10, 30);
    squatter.id_entries.insert("tenant".into(), vec![500]);
    store
        .write_pools(vec![PoolWrite::Create(squatter.clone())])
        .await
        .unwrap();

    assert!(matches!(
        b.create_id_pool("vlan", 0, 99).await,
        Err(Error::PoolConflict { .. })
    ));
    assert!(store.read_pool("vlan").await.unwrap().is_none());

    a.create_id_pool("vlan", 0, 99).await.unwrap();
    assert!(matches!(
        b.allocate_id("vlan", "k").await,
        Err(Error::PoolConflict { .. })
    ));
    assert!(matches!(
        b.pool_stats("vlan").await,
        Err(Error::PoolConflict { .. })
    ));
    assert_eq!(record(&a, "vlan.b").await, squatter);
    assert_eq!(record(&a, "vlan").await.child_pools, vec!["vlan.a".to_owned()]);
}

#[tokio::test]
async fn empty_names_are_rejected() {
    let (manager, _) = single_node();
    assert!(matches!(
        manager.create_id_pool("", 0, 9).await,
        Err(Error::InvalidRequest { .. })
    ));
    manager.create_id_pool("p", 0, 9).await.unwrap();
    assert!(matches!(
        manager.allocate_id("p", "").await,
        Err(Error::InvalidRequest { .. })
    ));
}

#[tokio::test]
async fn create_is_idempotent_for_same_bounds() {
    let (manager, _) = single_node();
    manager.create_id_pool("p", 0, 99).await.unwrap();
    manager.allocate_id("p", "k").await.unwrap();

    let before = versions(&manager).await;
    manager.create_id_pool("p", 0, 99).await.unwrap();
    assert_eq!(versions(&manager).await, before);

    assert!(matches!(
        manager.create_id_pool("p", 0, 50).await,
        Err(Error::PoolConflict { .. })
    ));
    assert!(matches!(
        manager.create_id_pool("q", 10, 9).await,
        Err(Error::InvalidRequest { .. })
    ));
    assert!(matches!(
        manager.create_id_pool_with_block_size("q", 0, 9, 0).await,
        Err(Error::InvalidRequest { .. })
    ));
}

#[tokio::test]
async fn delete_cascades_to_every_local_pool() {
    let store = Arc::new(MemoryPoolStore::new());
    let locks = Arc::new(LocalLockService::new());
    let clock = MockTime::default();
    let node1 = manager_on(&store, &locks, "node-1", &clock);
    let node2 = manager_on(&store, &locks, "node-2", &clock);

    node1.create_id_pool("p", 0, 99).await.unwrap();
    node1.allocate_id("p", "a").await.unwrap();
    node2.allocate_id("p", "b").await.unwrap();
    node2.create_id_pool("other", 0, 9).await.unwrap();
    assert_eq!(record(&node1, "p").await.child_pools.len(), 2);

    node1.delete_id_pool("p").await.unwrap();

    let mut left = store.list_pools().await.unwrap();
    left.sort();
    assert_eq!(left, vec!["other".to_owned(), "other.node-2".to_owned()]);
    assert!(matches!(
        node2.allocate_id("p", "b").await,
        Err(Error::InvalidPool { .. })
    ));
    assert!(matches!(
        node1.pool_stats("p").await,
        Err(Error::InvalidPool { .. })
    ));
}

#[tokio::test]
async fn other_nodes_create_their_local_pool_lazily() {
    let store = Arc::new(MemoryPoolStore::new());
    let locks = Arc::new(LocalLockService::new());
    let clock = MockTime::default();
    let node1 = manager_on(&store, &locks, "node-1", &clock);
    let node2 = manager_on(&store, &locks, "node-2", &clock);

    node1
        .create_id_pool_with_block_size("p", 0, 99, 4)
        .await
        .unwrap();
    assert!(store.read_pool("p.node-2").await.unwrap().is_none());

    assert_eq!(node2.allocate_id("p", "b").await.unwrap(), 4);
    let local = record(&node2, "p.node-2").await;
    assert_eq!(local.available_ids.start, 4);
    assert_eq!(local.available_ids.end, 7);
    assert_eq!(
        record(&node1, "p").await.child_pools,
        vec!["p.node-1".to_owned(), "p.node-2".to_owned()]
    );

    // A key is global: node-1 sees node-2's assignment.
    assert_eq!(node1.allocate_id("p", "b").await.unwrap(), 4);
}

#[tokio::test]
async fn release_lands_in_the_releasing_nodes_pool() {
    let store = Arc::new(MemoryPoolStore::new());
    let locks = Arc::new(LocalLockService::new());
    let clock = MockTime::default();
    let node1 = manager_on(&store, &locks, "node-1", &clock);
    let node2 = manager_on(&store, &locks, "node-2", &clock);

    node1.create_id_pool("p", 0, 99).await.unwrap();
    let id = node1.allocate_id("p", "k").await.unwrap();
    node2.release_id("p", "k").await.unwrap();

    let local = record(&node2, "p.node-2").await;
    let held: Vec<_> = local.released_ids.entries().map(|e| e.id).collect();
    assert_eq!(held, vec![id]);
    assert!(local.available_ids.remaining() == 0);
    assert!(record(&node1, "p").await.child_pools.contains(&"p.node-2".to_owned()));
}

#[tokio::test]
async fn drained_root_range_falls_back_to_released_ids() {
    let store = Arc::new(MemoryPoolStore::new());
    let locks = Arc::new(LocalLockService::new());
    let clock = MockTime::default();
    let node1 = manager_on(&store, &locks, "node-1", &clock);
    let node2 = manager_on(&store, &locks, "node-2", &clock);

    node1
        .create_id_pool_with_block_size("p", 0, 1, 1)
        .await
        .unwrap();
    node1.allocate_id("p", "a").await.unwrap();
    node1.allocate_id("p", "b").await.unwrap();

    // Park a ready id on the root as the reclaimer would.
    let root = store.read_pool("p").await.unwrap().unwrap();
    let mut pool = root.value;
    pool.id_entries.remove("a");
    pool.released_ids.hold(0, 0);
    store
        .write_pools(vec![PoolWrite::Update {
            pool,
            expected_version: root.version,
        }])
        .await
        .unwrap();

    assert!(matches!(
        node2.allocate_id("p", "c").await,
        Err(Error::PoolExhausted { .. })
    ));
    clock.set(30);
    assert_eq!(node2.allocate_id("p", "c").await.unwrap(), 0);
    assert!(record(&node2, "p").await.released_ids.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_nodes_never_share_an_id() {
    let store = Arc::new(MemoryPoolStore::new());
    let locks = Arc::new(LocalLockService::new());
    let clock = MockTime::default();
    let nodes = [
        manager_on(&store, &locks, "node-1", &clock),
        manager_on(&store, &locks, "node-2", &clock),
    ];
    nodes[0]
        .create_id_pool_with_block_size("p", 0, 999, 8)
        .await
        .unwrap();

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..64 {
        let manager = nodes[i % 2].clone();
        tasks.spawn(async move { manager.allocate_id("p", &format!("key-{i}")).await });
    }

    let mut seen = HashSet::new();
    while let Some(joined) = tasks.join_next().await {
        let id = joined.unwrap().unwrap();
        assert!(id <= 999);
        assert!(seen.insert(id), "id {id} handed out twice");
    }
    assert_eq!(seen.len(), 64);
    assert_eq!(record(&nodes[0], "p").await.id_entries.len(), 64);
}

#[tokio::test]
async fn conflicting_commit_is_retried() {
    let clock = MockTime::default();
    let store = Arc::new(ConflictingStore::default());
    let manager = manager_on(&store, &Arc::new(LocalLockService::new()), "node-1", &clock);
    manager.create_id_pool("p", 0, 99).await.unwrap();

    store.conflict_next(1);
    assert_eq!(manager.allocate_id("p", "k").await.unwrap(), 0);
}

#[tokio::test]
async fn persistent_conflict_fails_commit() {
    let clock = MockTime::default();
    let store = Arc::new(ConflictingStore::default());
    let manager = manager_on(&store, &Arc::new(LocalLockService::new()), "node-1", &clock);
    manager.create_id_pool("p", 0, 99).await.unwrap();

    store.conflict_next(2);
    assert_eq!(
        manager.allocate_id("p", "k").await,
        Err(Error::CommitFailed {
            pool: "p".into(),
            attempts: 2
        })
    );
    assert_eq!(manager.existing_ids("p", "k").await.unwrap(), None);
    assert_eq!(manager.allocate_id("p", "k").await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn lock_timeout_leaves_no_state() {
    let store = Arc::new(MemoryPoolStore::new());
    let locks = Arc::new(LocalLockService::new());
    let manager = manager_on(&store, &locks, "node-1", &MockTime::default());
    manager.create_id_pool("p", 0, 99).await.unwrap();
    let before = versions(&manager).await;

    let held = locks.lock("p", Duration::from_secs(1)).await.unwrap();
    assert_eq!(
        manager.allocate_id("p", "k").await,
        Err(Error::LockTimeout { lock: "p".into() })
    );
    // The local lock taken first was handed back.
    assert!(!locks.is_locked("p.node-1"));
    assert_eq!(versions(&manager).await, before);

    locks.unlock(held).await.unwrap();
    assert_eq!(manager.allocate_id("p", "k").await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancelled_allocation_hands_its_locks_back() {
    let store = Arc::new(MemoryPoolStore::new());
    let locks = Arc::new(LocalLockService::new());
    let manager = manager_on(&store, &locks, "node-1", &MockTime::default());
    manager.create_id_pool("p", 0, 99).await.unwrap();
    let before = versions(&manager).await;

    // The allocation takes the local lock, then parks on the root lock
    // until the caller gives up and drops it.
    let held = locks.lock("p", Duration::from_secs(1)).await.unwrap();
    let cancelled =
        tokio::time::timeout(Duration::from_millis(20), manager.allocate_id("p", "k")).await;
    assert!(cancelled.is_err());
    locks.unlock(held).await.unwrap();

    tokio::task::yield_now().await;
    assert!(!locks.is_locked("p.node-1"));
    assert_eq!(versions(&manager).await, before);
    assert_eq!(manager.allocate_id("p", "k").await.unwrap(), 0);
}

#[tokio::test]
async fn stats_reflect_root_and_local_usage() {
    let (manager, clock) = single_node();
    manager
        .create_id_pool_with_block_size("p", 100, 199, 10)
        .await
        .unwrap();
    manager.allocate_id_range("p", "a", 3).await.unwrap();
    manager.allocate_id("p", "b").await.unwrap();
    manager.release_id("p", "a").await.unwrap();

    let stats = manager.pool_stats("p").await.unwrap();
    assert_eq!(stats.pool, "p");
    assert_eq!((stats.low, stats.high, stats.block_size), (100, 199, 10));
    assert_eq!(stats.remaining, 90);
    assert_eq!(stats.released, 0);
    assert_eq!(stats.allocated_keys, 1);
    assert_eq!(stats.child_pools, 1);

    let local = stats.local.unwrap();
    assert_eq!(local.name, "p.node-1");
    assert_eq!(local.remaining, 6);
    assert_eq!(local.released, 3);
    assert_eq!(local.ready, 0);

    clock.set(30);
    assert_eq!(manager.pool_stats("p").await.unwrap().local.unwrap().ready, 3);
}

#[tokio::test]
async fn subscribed_cache_follows_commits() {
    let (manager, _) = single_node();
    let cache = Arc::new(PoolCache::for_pool("p"));
    manager.store().subscribe(Arc::clone(&cache) as _);

    manager.create_id_pool("p", 0, 99).await.unwrap();
    manager.allocate_id("p", "k").await.unwrap();
    assert_eq!(cache.len(), 2);
    assert!(cache.get("p").unwrap().ids_for("k").is_some());

    manager.delete_id_pool("p").await.unwrap();
    assert!(cache.is_empty());
}
