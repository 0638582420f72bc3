//! Progress reporting from reconstruction backends.

use tokio::sync::mpsc;

/// One progress update.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    /// Short stage name, e.g. "loading" or "inference"
    pub stage: String,
    /// Fraction complete in `0.0..=1.0`
    pub progress: f32,
    /// Human-readable detail
    pub message: String,
}

/// Sending half of a progress channel.
///
/// Reporting never blocks and never fails: if nobody is listening any more
/// (the client disconnected), updates are silently dropped. Safe to call from
/// blocking worker threads.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: Option<mpsc::UnboundedSender<Progress>>,
}

impl ProgressReporter {
    /// Create a reporter and the receiver that observes it.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Progress>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A reporter that discards everything.
    pub fn noop() -> Self {
        Self { tx: None }
    }

    pub fn report(&self, stage: &str, progress: f32, message: impl Into<String>) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Progress {
                stage: stage.to_string(),
                progress: progress.clamp(0.0, 1.0),
                message: message.into(),
            });
        }
    }
}
