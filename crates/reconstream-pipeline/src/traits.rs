//! Reconstruction backend trait.

use async_trait::async_trait;

use crate::progress::ProgressReporter;
use crate::types::{ReconstructionOutput, ReconstructionRequest};
use crate::PipelineError;

/// A reconstruction backend.
///
/// Implementations must not block the async runtime: heavy work belongs on
/// `tokio::task::spawn_blocking`, a dedicated thread pool or a subprocess.
/// Callers guarantee at most one concurrent `run` per session, but a backend
/// shared between sessions sees concurrent calls for different sessions.
#[async_trait]
pub trait Reconstructor: Send + Sync {
    /// Backend identifier, for logs.
    fn name(&self) -> &str;

    /// Reconstruct a point cloud from the request's images.
    ///
    /// Progress should be reported through `progress`; the final cloud is
    /// expected to already honour the request's confidence percentile and
    /// point budget.
    async fn run(
        &self,
        request: ReconstructionRequest,
        progress: ProgressReporter,
    ) -> Result<ReconstructionOutput, PipelineError>;
}
