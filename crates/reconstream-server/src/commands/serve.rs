//! The `serve` command: run the HTTP/WebSocket server until Ctrl-C.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use reconstream_core::Config;
use reconstream_pipeline::{LuminanceReconstructor, Reconstructor};
use reconstream_server::{router, AppState};
use reconstream_session::{ManagerConfig, SessionManager, SessionSweeper};

pub async fn run(config: Config) -> anyhow::Result<()> {
    let manager = Arc::new(SessionManager::new(ManagerConfig::from(&config)));
    let reconstructor: Arc<dyn Reconstructor> = Arc::new(LuminanceReconstructor::new());
    let sweeper = SessionSweeper::start(manager.clone(), config.sessions.sweep_interval());

    let state = AppState::new(
        manager.clone(),
        reconstructor.clone(),
        config.server.max_message_bytes,
    );
    let app = router(state);

    let listener = bind(&config.server.host, config.server.port).await?;
    let addr = listener.local_addr()?;

    info!(
        %addr,
        backend = reconstructor.name(),
        max_sessions = config.sessions.max_sessions,
        session_timeout_secs = config.sessions.session_timeout_secs,
        scratch_root = %config.sessions.scratch_root().display(),
        "Server listening"
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    sweeper.stop().await;
    manager.shutdown().await;
    info!("Server stopped");

    served?;
    Ok(())
}

/// Accepts hostnames such as `localhost` as well as bare IPv6 like `::`.
async fn bind(host: &str, port: u16) -> std::io::Result<TcpListener> {
    TcpListener::bind((host, port)).await
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(e) => {
            warn!(error = %e, "Ctrl-C handler unavailable; running until killed");
            std::future::pending::<()>().await;
        }
    }
}
