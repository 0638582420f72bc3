//! Background expiry of idle sessions.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::manager::SessionManager;

/// Periodic sweep task with an explicit start/stop lifecycle.
pub struct SessionSweeper {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl SessionSweeper {
    /// Spawn the sweep loop. The first sweep runs one `interval` after start.
    pub fn start(manager: Arc<SessionManager>, interval: Duration) -> Self {
        let token = CancellationToken::new();
        let child = token.clone();
        let period = interval.max(Duration::from_millis(10));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            info!(interval_secs = period.as_secs_f64(), "Session sweeper started");
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = manager.sweep_expired().await;
                        debug!(removed, "Sweep finished");
                    }
                }
            }
            info!("Session sweeper stopped");
        });

        Self { token, handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Cancel the loop and wait for it to exit.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Session sweeper task ended abnormally");
        }
    }
}
