//! PVC Snapshot Operator
//!
//! Main entry point. Sets up the Kubernetes client, starts the
//! SnapshotRequest controller and the metrics server, and handles graceful
//! shutdown.

use kube::Client;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pvc_snapshot_operator::{
    controllers::{snapshot_controller, Context},
    metrics,
};

/// Default metrics port
const METRICS_PORT: u16 = 8080;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting PVC Snapshot Operator");

    // Client construction is the only fatal bootstrap step.
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let context = Context::new(client);
    let shutdown = CancellationToken::new();

    let mut metrics_handle = tokio::spawn(metrics::serve(METRICS_PORT));
    info!("Metrics server starting on port {}", METRICS_PORT);

    let mut controller_handle = tokio::spawn(snapshot_controller::run(
        context,
        shutdown.clone(),
    ));

    tokio::select! {
        res = &mut controller_handle => {
            error!("SnapshotRequest controller exited unexpectedly");
            metrics_handle.abort();
            return match res {
                Ok(inner) => inner.map_err(Into::into),
                Err(e) => Err(e.into()),
            };
        }
        _ = &mut metrics_handle => {
            error!("Metrics server exited unexpectedly");
            shutdown.cancel();
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping operator");
            shutdown.cancel();
        }
    }

    // Let the controller drain in-flight work before exiting.
    if let Ok(Err(e)) = controller_handle.await {
        error!("Controller shutdown error: {}", e);
    }
    metrics_handle.abort();

    info!("PVC Snapshot Operator stopped");
    Ok(())
}

/// Initialize tracing subscriber
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pvc_snapshot_operator=debug,kube=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
