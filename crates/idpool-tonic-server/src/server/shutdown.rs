use super::service::handler::IdPoolService;
use super::telemetry::TelemetryProviders;
use idpool_tonic_core::proto::id_pool_server::IdPoolServer;
use tokio::signal;
use tonic_health::server::HealthReporter;

/// Resolves on the first shutdown signal, then takes the service out of
/// rotation, drains it and flushes telemetry.
pub async fn shutdown_signal(
    service: IdPoolService,
    health_reporter: HealthReporter,
    providers: TelemetryProviders,
) {
    wait_for_signal().await;

    #[cfg(feature = "tracing")]
    tracing::info!("Shutdown signal received, terminating gracefully...");

    // 1. Publish the status
    health_reporter
        .set_not_serving::<IdPoolServer<IdPoolService>>()
        .await;

    // 2. Drain requests and stop the reclaimer
    if let Err(_e) = service.shutdown().await {
        #[cfg(feature = "tracing")]
        tracing::error!("Error during service shutdown: {:?}", _e);
    }

    // 3. Flush exporters
    providers.shutdown();
}

async fn wait_for_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to install SIGTERM handler: {_e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(_e) = signal::ctrl_c().await {
            #[cfg(feature = "tracing")]
            tracing::error!("Failed to install Ctrl+C handler: {_e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received SIGTERM signal");
        },
    }
}
