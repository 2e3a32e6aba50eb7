//! gRPC service implementation for the id pool manager.
//!
//! [`IdPoolService`] implements the [`IdPool`] service from the protobuf
//! definition on top of one [`Manager`] for this node. It also owns the
//! node's [`ReclaimerTask`] and stops it on shutdown.
//!
//! ## Responsibilities
//!
//! - Validate requests the manager cannot judge (range size limit).
//! - Map manager errors to gRPC status codes.
//! - Track in-flight requests so shutdown can drain them.
//! - Forward reclaimer progress to metrics and logs.

use crate::server::{
    config::ServerConfig,
    telemetry::{
        decrement_requests_inflight, increment_ids_allocated, increment_request_errors,
        increment_requests, increment_requests_inflight, record_reclaimer_progress,
        record_request_duration,
    },
};
use idpool_tonic_core::{
    Error,
    idpool::{self, LocalLockService, MemoryPoolStore, ReclaimerStatus, ReclaimerTask},
    proto::{
        AllocateIdRangeRequest, AllocateIdRangeResponse, AllocateIdRequest, AllocateIdResponse,
        CreateIdPoolRequest, CreateIdPoolResponse, DeleteIdPoolRequest, DeleteIdPoolResponse,
        GetPoolStatsRequest, GetPoolStatsResponse, ReleaseIdRequest, ReleaseIdResponse,
        id_pool_server::IdPool,
    },
    types::{Manager, Reclaimer},
};
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};
use tokio::{
    sync::{Mutex, watch},
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};

/// gRPC front end of this node's pool manager.
#[derive(Clone)]
pub struct IdPoolService {
    manager: Manager,
    state: Arc<ServiceState>,
}

struct ServiceState {
    config: ServerConfig,
    shutdown_token: CancellationToken,
    inflight: AtomicUsize,
    reclaimer: Mutex<Option<ReclaimerTask>>,
}

/// Counts a request as in flight until dropped.
struct InflightGuard {
    state: Arc<ServiceState>,
    op: &'static str,
    start: Instant,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.state.inflight.fetch_sub(1, Ordering::AcqRel);
        decrement_requests_inflight();
        record_request_duration(self.op, self.start.elapsed().as_secs_f64() * 1_000.0);
    }
}

impl IdPoolService {
    /// Creates the manager over an in-process store and lock service and
    /// starts the reclaimer on the current runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Pool`] if the manager configuration is invalid.
    pub fn new(config: ServerConfig) -> Result<Self, Error> {
        let manager = Manager::new(
            Arc::new(MemoryPoolStore::new()),
            Arc::new(LocalLockService::new()),
            config.manager.clone(),
        )?;

        let reclaimer = ReclaimerTask::spawn(Reclaimer::new(manager.clone()), config.reclaim_interval);
        tokio::spawn(watch_reclaimer(reclaimer.status()));

        Ok(Self {
            manager,
            state: Arc::new(ServiceState {
                config,
                shutdown_token: CancellationToken::new(),
                inflight: AtomicUsize::new(0),
                reclaimer: Mutex::new(Some(reclaimer)),
            }),
        })
    }

    pub fn manager(&self) -> &Manager {
        &self.manager
    }

    /// Refuses new requests, waits up to the configured timeout for
    /// in-flight ones, then stops the reclaimer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Pool`] if the reclaimer task ended abnormally.
    pub async fn shutdown(&self) -> Result<(), Error> {
        // === Phase 0: Stop accepting new requests ===
        #[cfg(feature = "tracing")]
        tracing::info!("Refusing new requests");
        self.state.shutdown_token.cancel();

        // === Phase 1: Drain in-flight requests ===
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Draining in-flight requests ({} active)",
            self.state.inflight.load(Ordering::Acquire)
        );
        let drained = timeout(self.state.config.shutdown_timeout, async {
            while self.state.inflight.load(Ordering::Acquire) > 0 {
                sleep(Duration::from_millis(50)).await;
            }
        })
        .await;

        match drained {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("All in-flight requests drained");
            }
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "Graceful drain timed out ({} requests still active)",
                    self.state.inflight.load(Ordering::Acquire)
                );
            }
        }

        // === Phase 2: Stop the reclaimer ===
        let task = self.state.reclaimer.lock().await.take();
        if let Some(task) = task {
            let _status = task.shutdown().await?;
            #[cfg(feature = "tracing")]
            tracing::info!(
                sweeps = _status.sweeps,
                failures = _status.failures,
                returned = _status.returned,
                "Reclaimer stopped"
            );
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Id pool service shutdown complete");
        Ok(())
    }

    fn begin(&self, op: &'static str) -> Result<InflightGuard, Status> {
        // Counted before the shutdown check so a drain never misses a request
        // that slipped past it.
        self.state.inflight.fetch_add(1, Ordering::AcqRel);
        increment_requests_inflight();
        let guard = InflightGuard {
            state: Arc::clone(&self.state),
            op,
            start: Instant::now(),
        };

        if self.state.shutdown_token.is_cancelled() {
            return Err(failed(op, Error::ServiceShutdown));
        }
        increment_requests(op);
        Ok(guard)
    }
}

fn failed(op: &'static str, err: Error) -> Status {
    increment_request_errors(op, err.kind());
    #[cfg(feature = "tracing")]
    {
        if err.kind() == "internal" {
            tracing::warn!(op, "Request failed: {err}");
        } else {
            tracing::debug!(op, "Request rejected: {err}");
        }
    }
    err.into()
}

fn finish<T>(op: &'static str, result: idpool::Result<T>) -> Result<T, Status> {
    result.map_err(|e| failed(op, e.into()))
}

/// Forwards reclaimer progress to metrics until the task stops.
async fn watch_reclaimer(mut status: watch::Receiver<ReclaimerStatus>) {
    let mut seen = ReclaimerStatus::default();
    while status.changed().await.is_ok() {
        let current = status.borrow_and_update().clone();
        record_reclaimer_progress(
            current.sweeps.saturating_sub(seen.sweeps),
            current.failures.saturating_sub(seen.failures),
            current.returned.saturating_sub(seen.returned),
        );
        #[cfg(feature = "tracing")]
        {
            if current.failures > seen.failures {
                if let Some(e) = &current.last_error {
                    tracing::warn!(failures = current.failures, "Reclaimer sweep failed: {e}");
                }
            }
        }
        seen = current;
    }
}

#[tonic::async_trait]
impl IdPool for IdPoolService {
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(pool = %req.get_ref().pool)))]
    async fn create_id_pool(
        &self,
        req: Request<CreateIdPoolRequest>,
    ) -> Result<Response<CreateIdPoolResponse>, Status> {
        const OP: &str = "create_id_pool";
        let _guard = self.begin(OP)?;
        let req = req.into_inner();

        let result = match req.block_size {
            Some(block_size) => {
                self.manager
                    .create_id_pool_with_block_size(&req.pool, req.low, req.high, block_size)
                    .await
            }
            None => self.manager.create_id_pool(&req.pool, req.low, req.high).await,
        };
        finish(OP, result)?;
        Ok(Response::new(CreateIdPoolResponse {}))
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(pool = %req.get_ref().pool)))]
    async fn delete_id_pool(
        &self,
        req: Request<DeleteIdPoolRequest>,
    ) -> Result<Response<DeleteIdPoolResponse>, Status> {
        const OP: &str = "delete_id_pool";
        let _guard = self.begin(OP)?;
        let req = req.into_inner();

        finish(OP, self.manager.delete_id_pool(&req.pool).await)?;
        Ok(Response::new(DeleteIdPoolResponse {}))
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(pool = %req.get_ref().pool)))]
    async fn allocate_id(
        &self,
        req: Request<AllocateIdRequest>,
    ) -> Result<Response<AllocateIdResponse>, Status> {
        const OP: &str = "allocate_id";
        let _guard = self.begin(OP)?;
        let req = req.into_inner();

        let id = finish(OP, self.manager.allocate_id(&req.pool, &req.id_key).await)?;
        increment_ids_allocated(1);
        Ok(Response::new(AllocateIdResponse { id }))
    }

    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(skip_all, fields(pool = %req.get_ref().pool, size = req.get_ref().size))
    )]
    async fn allocate_id_range(
        &self,
        req: Request<AllocateIdRangeRequest>,
    ) -> Result<Response<AllocateIdRangeResponse>, Status> {
        const OP: &str = "allocate_id_range";
        let _guard = self.begin(OP)?;
        let req = req.into_inner();

        let max = self.state.config.max_range_size;
        if req.size > max {
            return Err(failed(
                OP,
                Error::InvalidRequest {
                    reason: format!("Size {} exceeds maximum allowed ({max})", req.size),
                },
            ));
        }

        let ids = finish(
            OP,
            self.manager
                .allocate_id_range(&req.pool, &req.id_key, req.size)
                .await,
        )?;
        increment_ids_allocated(ids.len() as u64);
        Ok(Response::new(AllocateIdRangeResponse { ids }))
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(pool = %req.get_ref().pool)))]
    async fn release_id(
        &self,
        req: Request<ReleaseIdRequest>,
    ) -> Result<Response<ReleaseIdResponse>, Status> {
        const OP: &str = "release_id";
        let _guard = self.begin(OP)?;
        let req = req.into_inner();

        finish(OP, self.manager.release_id(&req.pool, &req.id_key).await)?;
        Ok(Response::new(ReleaseIdResponse {}))
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(pool = %req.get_ref().pool)))]
    async fn get_pool_stats(
        &self,
        req: Request<GetPoolStatsRequest>,
    ) -> Result<Response<GetPoolStatsResponse>, Status> {
        const OP: &str = "get_pool_stats";
        let _guard = self.begin(OP)?;
        let req = req.into_inner();

        let stats = finish(OP, self.manager.pool_stats(&req.pool).await)?;
        Ok(Response::new(stats.into()))
    }
}
