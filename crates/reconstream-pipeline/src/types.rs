//! Types exchanged with reconstruction backends.

use std::path::PathBuf;

use reconstream_core::SessionConfig;
use serde::{Deserialize, Serialize};

/// Which kind of result the caller wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconstructionMode {
    /// Preview result while images are still arriving
    Incremental,
    /// Full-quality result over every image
    Final,
}

impl ReconstructionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ReconstructionMode::Incremental => "incremental",
            ReconstructionMode::Final => "final",
        }
    }
}

/// Input to a single reconstruction run.
#[derive(Debug, Clone)]
pub struct ReconstructionRequest {
    /// Owning session, for logging only
    pub session_id: String,
    /// Image files in ledger order
    pub images: Vec<PathBuf>,
    /// Session configuration captured at creation
    pub config: SessionConfig,
    pub mode: ReconstructionMode,
}

/// A colored point cloud with per-point confidence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    pub points: Vec<[f32; 3]>,
    pub colors: Vec<[u8; 3]>,
    /// Empty when the backend does not produce confidences
    pub confidence: Vec<f32>,
}

impl PointCloud {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: Vec::with_capacity(capacity),
            colors: Vec::with_capacity(capacity),
            confidence: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, point: [f32; 3], color: [u8; 3], confidence: f32) {
        self.points.push(point);
        self.colors.push(color);
        self.confidence.push(confidence);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Axis-aligned bounds, or `None` for an empty cloud.
    pub fn bounds(&self) -> Option<([f32; 3], [f32; 3])> {
        let first = *self.points.first()?;
        let mut min = first;
        let mut max = first;
        for p in &self.points[1..] {
            for axis in 0..3 {
                min[axis] = min[axis].min(p[axis]);
                max[axis] = max[axis].max(p[axis]);
            }
        }
        Some((min, max))
    }
}

/// Pinhole camera estimated for one input image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    /// 3x3 intrinsic matrix (pixels)
    pub intrinsics: [[f32; 3]; 3],
    /// 3x4 world-to-camera transform, OpenCV axes
    pub extrinsics: [[f32; 4]; 3],
}

impl Camera {
    /// Camera-to-world transform as a row-major 4x4 matrix.
    pub fn camera_to_world(&self) -> [[f32; 4]; 4] {
        let e = &self.extrinsics;
        // Inverse of a rigid transform: R^T and -R^T t.
        let mut out = [[0.0f32; 4]; 4];
        for r in 0..3 {
            for c in 0..3 {
                out[r][c] = e[c][r];
            }
            out[r][3] = -(e[0][r] * e[0][3] + e[1][r] * e[1][3] + e[2][r] * e[2][3]);
        }
        out[3][3] = 1.0;
        out
    }

    /// Image size implied by the principal point.
    pub fn image_size(&self) -> (f32, f32) {
        (self.intrinsics[0][2] * 2.0, self.intrinsics[1][2] * 2.0)
    }
}

/// What a backend returns on success.
#[derive(Debug, Clone, Default)]
pub struct ReconstructionOutput {
    pub cloud: PointCloud,
    /// One entry per input image, in ledger order; may be empty
    pub cameras: Vec<Camera>,
}
