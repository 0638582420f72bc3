//! # reconstream-pipeline
//!
//! The boundary between session bookkeeping and the reconstruction model.
//!
//! This crate provides:
//! - The [`Reconstructor`] trait every reconstruction backend implements
//! - Point-cloud and camera types exchanged across that boundary
//! - [`ProgressReporter`], a non-blocking progress channel usable from worker threads
//! - Confidence filtering and subsampling of result clouds
//! - A binary glTF (GLB) encoder for delivering results to clients
//! - [`LuminanceReconstructor`], a deterministic reference backend
//!
//! ## Architecture
//!
//! ```text
//! Session (reconstream-session)
//!   └─> Reconstructor::run(request, progress)
//!       ├─> worker thread (spawn_blocking)
//!       │   └─> decode -> resize -> back-project -> postprocess
//!       └─> ProgressReporter ──> StreamHandler ──> client
//! ```

use thiserror::Error;

pub mod glb;
pub mod luminance;
pub mod postprocess;
pub mod progress;
pub mod traits;
pub mod types;

pub use luminance::LuminanceReconstructor;
pub use progress::{Progress, ProgressReporter};
pub use traits::Reconstructor;
pub use types::{
    Camera, PointCloud, ReconstructionMode, ReconstructionOutput, ReconstructionRequest,
};

/// Errors raised by a reconstruction backend.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The request carried no images.
    #[error("no images to reconstruct")]
    NoImages,

    /// An input image could not be read or decoded.
    #[error("failed to load image {path}: {message}")]
    ImageLoad { path: String, message: String },

    /// The worker thread panicked or was cancelled.
    #[error("reconstruction worker failed: {0}")]
    Worker(String),

    /// Backend-specific failure.
    #[error("{0}")]
    Backend(String),
}

impl From<PipelineError> for reconstream_core::Error {
    fn from(err: PipelineError) -> Self {
        reconstream_core::Error::Reconstruction(err.to_string())
    }
}
