//! Server-side components of the id pool service.
//!
//! ## Submodules
//!
//! - [`config`] - CLI/environment configuration.
//! - [`listener`] - TCP or Unix socket connection sources.
//! - [`service`] - The gRPC service wrapping the pool manager.
//! - [`telemetry`] - Logging, tracing and metrics initialization.
//!
//! [`serve`] wires them together and runs until a shutdown signal.

pub mod config;
pub mod listener;
pub mod service;
mod shutdown;
pub mod telemetry;

use config::ServerConfig;
use futures::Stream;
use idpool_tonic_core::proto::{FILE_DESCRIPTOR_SET, id_pool_server::IdPoolServer};
use listener::Listener;
use service::handler::IdPoolService;
use shutdown::shutdown_signal;
use telemetry::TelemetryProviders;
use tokio::io::{AsyncRead, AsyncWrite};
use tonic::transport::server::Connected;
use tonic::{codec::CompressionEncoding, transport::Server};
use tonic_reflection::server::Builder;

/// Binds the configured address and serves until SIGTERM or Ctrl+C.
///
/// # Errors
///
/// Fails if the address cannot be bound, the service cannot start, or the
/// transport stops with an error.
pub async fn serve(config: ServerConfig, providers: TelemetryProviders) -> anyhow::Result<()> {
    let listener = Listener::bind(&config).await?;
    log_startup_info(&listener.local_addr(), &config);
    match listener {
        Listener::Tcp(incoming) => run(incoming, config, providers).await,
        #[cfg(unix)]
        Listener::Uds(incoming, _socket) => run(incoming, config, providers).await,
    }
}

async fn run<I, IO, IE>(
    incoming: I,
    config: ServerConfig,
    providers: TelemetryProviders,
) -> anyhow::Result<()>
where
    I: Stream<Item = Result<IO, IE>>,
    IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
    IE: Into<tower::BoxError>,
{
    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<IdPoolServer<IdPoolService>>()
        .await;

    let service = IdPoolService::new(config)?;

    let reflection = Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    Server::builder()
        .http2_adaptive_window(Some(true))
        .add_service(health_service)
        .add_service(reflection)
        .add_service(id_pool_server(service.clone()))
        .serve_with_incoming_shutdown(
            incoming,
            shutdown_signal(service, health_reporter, providers),
        )
        .await?;

    #[cfg(feature = "tracing")]
    tracing::info!("Service shut down successfully");
    Ok(())
}

fn log_startup_info(_addr: &str, _config: &ServerConfig) {
    #[cfg(feature = "tracing")]
    {
        if cfg!(debug_assertions) {
            tracing::info!("Starting id pool service on {_addr} with full config: {_config:#?}");
        } else {
            tracing::info!(
                "Starting id pool service on {_addr} as node '{}'",
                _config.manager.node_id
            );
        }
    }
}

fn id_pool_server(service: IdPoolService) -> IdPoolServer<IdPoolService> {
    IdPoolServer::new(service)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Deflate)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Deflate)
}
