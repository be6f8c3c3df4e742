//! cjbox server entry point.
//!
//! Connects to the local Docker daemon, removes sandboxes left behind by an
//! earlier run and serves the playground over HTTP until Ctrl-C or SIGTERM.

use cjbox_core::{AdmissionGate, Playground, SysinfoProbe};
use cjbox_engine::{DockerEngine, LifecycleManager};
use cjbox_server::{http, ServerConfig};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How long open sessions and in-flight requests get to finish after a
/// shutdown signal.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("cjbox_server=info".parse()?))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting cjbox server");

    // Load configuration from environment
    let config = ServerConfig::from_env();
    tracing::info!(?config, "Configuration loaded");
    config.validate()?;

    // Connect to Docker (a missing daemon only warns, jobs fail until it appears)
    let engine = DockerEngine::connect()?;
    if let Err(e) = engine.ping().await {
        tracing::warn!(error = %e, "Docker daemon not reachable yet");
    }

    let lifecycle = LifecycleManager::new(Arc::new(engine), config.sandbox_policy()?);
    let gate = AdmissionGate::new(Arc::new(SysinfoProbe::new()), config.min_available_bytes());
    let playground = Playground::new(lifecycle, gate, config.session_config()?);

    // Remove sandboxes left behind by an earlier run
    match playground.sweep_leaked().await {
        Ok(0) => tracing::debug!("No leaked sandboxes"),
        Ok(removed) => tracing::info!(removed, "Removed leaked sandboxes"),
        Err(e) => tracing::warn!(error = %e, "Leaked sandbox sweep failed"),
    }

    // Serve until the playground is shut down
    let router = http::build_router(playground.clone(), config.max_body_bytes);
    let stop = playground.shutdown_token();
    let mut server = tokio::spawn(http::serve(router, config.http_addr, async move {
        stop.cancelled().await;
    }));
    tracing::info!(addr = %config.http_addr, "Server ready");

    // Wait for shutdown signal
    tokio::select! {
        result = &mut server => {
            result??;
            return Ok(());
        }
        _ = shutdown_signal() => {}
    }
    tracing::info!("Received shutdown signal, cleaning up...");

    // ends every open session, and with it the HTTP server's graceful shutdown
    playground.shutdown();

    // Wait for the server and open sessions to finish
    let drain = async {
        if let Err(e) = server.await {
            tracing::error!(error = %e, "HTTP server task failed");
        }
        while playground.stats().active_sessions.load(Ordering::Relaxed) > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    };
    if tokio::time::timeout(SHUTDOWN_DRAIN, drain).await.is_err() {
        tracing::warn!(
            active_sessions = playground.stats().active_sessions.load(Ordering::Relaxed),
            "Shutdown drain timed out"
        );
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
