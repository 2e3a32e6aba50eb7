//! Background upkeep of released ids.
//!
//! Released ids sit in a local pool's holder until their cooldown elapses;
//! allocation only ever pops ready entries, so cooldowns survive restarts
//! with no timer state. The [`Reclaimer`] sweeps each root pool for this
//! node and, when the local pool holds more than two blocks of released ids,
//! hands the ready surplus back to the root so other nodes can use it.
//!
//! [`ReclaimerTask`] runs sweeps on a fixed interval, can be cancelled, and
//! publishes a [`ReclaimerStatus`] after every tick so a supervisor sees
//! failures as they happen.

use crate::{
    Error, IdManager, LockService, PoolStore, PoolWrite, Result, TimeSource,
};
use core::{ops::ControlFlow, time::Duration};
use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Result of sweeping one root pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SweepReport {
    pub pool: String,
    /// Released ids in this node's local pool whose cooldown has elapsed.
    pub ready: usize,
    /// Ready ids moved from the local pool back to the root.
    pub returned: usize,
}

/// Result of sweeping every root pool.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub reports: Vec<SweepReport>,
    pub failures: Vec<Error>,
}

/// Sweeps released ids for the node an [`IdManager`] belongs to.
pub struct Reclaimer<S, L, T> {
    manager: IdManager<S, L, T>,
}

impl<S, L, T> Reclaimer<S, L, T>
where
    S: PoolStore,
    L: LockService + 'static,
    T: TimeSource + Send + Sync,
{
    pub const fn new(manager: IdManager<S, L, T>) -> Self {
        Self { manager }
    }

    /// Sweeps every root pool in the store. A failing pool does not stop the
    /// sweep of the others.
    pub async fn sweep_all(&self) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();
        let names = match self.manager.store().list_pools().await {
            Ok(names) => names,
            Err(e) => {
                outcome.failures.push(e);
                return outcome;
            }
        };

        for name in names {
            let is_root = match self.manager.store().read_pool(&name).await {
                Ok(record) => record.is_some_and(|r| r.value.is_root()),
                Err(e) => {
                    outcome.failures.push(e);
                    continue;
                }
            };
            if !is_root {
                continue;
            }
            match self.sweep_pool(&name).await {
                Ok(Some(report)) => outcome.reports.push(report),
                Ok(None) => {}
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(pool = %name, "sweep failed: {e}");
                    outcome.failures.push(e);
                }
            }
        }
        outcome
    }

    /// Sweeps one root pool. Returns `None` when the pool, or this node's
    /// local pool under it, does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockTimeout`] or [`Error::CommitFailed`] as the
    /// allocator does.
    pub async fn sweep_pool(&self, pool: &str) -> Result<Option<SweepReport>> {
        let local_name = self.manager.local_pool_name(pool);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let held = self
                .manager
                .acquire(&[local_name.as_str(), pool])
                .await?;
            let result = self.sweep_locked(pool).await;
            held.release().await;
            if let ControlFlow::Break(out) = self.manager.settle(pool, attempt, result) {
                return out;
            }
        }
    }

    async fn sweep_locked(&self, pool: &str) -> Result<Option<SweepReport>> {
        let store = self.manager.store();
        let Some(root) = store.read_pool(pool).await?.filter(|r| r.value.is_root()) else {
            return Ok(None);
        };
        let Some(local) = self.manager.read_local(pool).await? else {
            return Ok(None);
        };
        let (mut root_pool, mut local_pool) = (root.value, local.value);

        let now = self.manager.now();
        let ready = local_pool.released_ids.ready_count(now);
        let held = local_pool.released_ids.available_id_count();
        let block = u64::from(local_pool.block_size);

        let mut returned = 0;
        if held > block.saturating_mul(2) {
            let surplus = usize::try_from(held - block).unwrap_or(usize::MAX);
            for entry in local_pool.released_ids.drain_ready(now, surplus) {
                root_pool.released_ids.insert(entry);
                returned += 1;
            }
        }

        if returned > 0 {
            store
                .write_pools(vec![
                    PoolWrite::Update {
                        pool: root_pool,
                        expected_version: root.version,
                    },
                    PoolWrite::Update {
                        pool: local_pool,
                        expected_version: local.version,
                    },
                ])
                .await?;
            #[cfg(feature = "tracing")]
            tracing::debug!(pool, returned, "returned surplus released ids to root");
        }

        Ok(Some(SweepReport {
            pool: pool.to_owned(),
            ready: ready - returned,
            returned,
        }))
    }
}

/// Health of a running [`ReclaimerTask`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReclaimerStatus {
    pub sweeps: u64,
    pub failures: u64,
    pub returned: u64,
    pub last_error: Option<Error>,
}

/// A supervised, cancellable periodic sweep.
pub struct ReclaimerTask {
    shutdown_token: CancellationToken,
    handle: JoinHandle<()>,
    status: watch::Receiver<ReclaimerStatus>,
}

impl ReclaimerTask {
    /// Spawns `reclaimer` on the current Tokio runtime, sweeping once per
    /// `interval` (the first sweep runs immediately).
    pub fn spawn<S, L, T>(reclaimer: Reclaimer<S, L, T>, interval: Duration) -> Self
    where
        S: PoolStore + 'static,
        L: LockService + 'static,
        T: TimeSource + Send + Sync + 'static,
    {
        let shutdown_token = CancellationToken::new();
        let (status_tx, status) = watch::channel(ReclaimerStatus::default());
        let handle = tokio::spawn(run(reclaimer, interval, shutdown_token.clone(), status_tx));
        Self {
            shutdown_token,
            handle,
            status,
        }
    }

    pub fn status(&self) -> watch::Receiver<ReclaimerStatus> {
        self.status.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancels the task and waits for the sweep in progress, if any, to
    /// finish.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Task`] if the task panicked.
    pub async fn shutdown(self) -> Result<ReclaimerStatus> {
        self.shutdown_token.cancel();
        self.handle.await.map_err(|e| Error::Task {
            context: e.to_string(),
        })?;
        Ok(self.status.borrow().clone())
    }
}

async fn run<S, L, T>(
    reclaimer: Reclaimer<S, L, T>,
    interval: Duration,
    shutdown_token: CancellationToken,
    status_tx: watch::Sender<ReclaimerStatus>,
) where
    S: PoolStore,
    L: LockService + 'static,
    T: TimeSource + Send + Sync,
{
    #[cfg(feature = "tracing")]
    tracing::debug!(?interval, "reclaimer started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = shutdown_token.cancelled() => break,
            _ = ticker.tick() => {
                let outcome = reclaimer.sweep_all().await;
                status_tx.send_modify(|status| {
                    status.sweeps += 1;
                    status.failures += outcome.failures.len() as u64;
                    status.returned += outcome.reports.iter().map(|r| r.returned as u64).sum::<u64>();
                    if let Some(e) = outcome.failures.last() {
                        status.last_error = Some(e.clone());
                    }
                });
            }
        }
    }

    #[cfg(feature = "tracing")]
    tracing::debug!("reclaimer stopped");
}
