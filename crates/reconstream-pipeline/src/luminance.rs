//! Deterministic reference reconstructor.
//!
//! Stands in for a learned depth model so the server can run end to end
//! without GPU weights. Each pixel is back-projected through a pinhole camera
//! with depth derived from luminance; cameras are spaced along +X. Output is
//! geometrically meaningless but has the right shape, size and timing
//! characteristics for exercising the session layer.

use std::path::Path;

use async_trait::async_trait;
use image::imageops::FilterType;
use image::RgbImage;
use tracing::{debug, info};

use reconstream_core::ResolutionMethod;

use crate::postprocess::{filter_by_confidence, limit_points};
use crate::progress::ProgressReporter;
use crate::traits::Reconstructor;
use crate::types::{
    Camera, PointCloud, ReconstructionMode, ReconstructionOutput, ReconstructionRequest,
};
use crate::PipelineError;

/// Input dimensions are aligned to this many pixels.
pub const PATCH_SIZE: u32 = 14;

/// Reference backend that derives depth from pixel luminance.
#[derive(Debug, Clone)]
pub struct LuminanceReconstructor {
    /// Distance between consecutive cameras along +X
    baseline: f32,
    /// Pixel stride used for incremental previews
    preview_stride: u32,
}

impl Default for LuminanceReconstructor {
    fn default() -> Self {
        Self {
            baseline: 0.25,
            preview_stride: 2,
        }
    }
}

impl LuminanceReconstructor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_baseline(mut self, baseline: f32) -> Self {
        self.baseline = baseline;
        self
    }
}

#[async_trait]
impl Reconstructor for LuminanceReconstructor {
    fn name(&self) -> &str {
        "luminance"
    }

    async fn run(
        &self,
        request: ReconstructionRequest,
        progress: ProgressReporter,
    ) -> Result<ReconstructionOutput, PipelineError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.reconstruct(&request, &progress))
            .await
            .map_err(|e| PipelineError::Worker(e.to_string()))?
    }
}

impl LuminanceReconstructor {
    fn reconstruct(
        &self,
        request: &ReconstructionRequest,
        progress: &ProgressReporter,
    ) -> Result<ReconstructionOutput, PipelineError> {
        if request.images.is_empty() {
            return Err(PipelineError::NoImages);
        }

        let total = request.images.len();
        let stride = match request.mode {
            ReconstructionMode::Incremental => self.preview_stride.max(1),
            ReconstructionMode::Final => 1,
        };
        info!(
            session_id = %request.session_id,
            images = total,
            mode = request.mode.as_str(),
            "Starting reconstruction"
        );
        progress.report("loading", 0.0, format!("Loading {} images", total));

        let mut cloud = PointCloud::default();
        let mut cameras = Vec::with_capacity(total);

        for (index, path) in request.images.iter().enumerate() {
            let image = load_image(path)?;
            let image = fit_to_resolution(
                image,
                request.config.process_res,
                request.config.process_res_method,
            );
            let camera = self.camera_for(index, image.width(), image.height());
            back_project(&image, &camera, stride, &mut cloud);
            cameras.push(camera);

            let fraction = 0.1 + 0.8 * (index + 1) as f32 / total as f32;
            progress.report(
                "inference",
                fraction,
                format!("Processed image {}/{}", index + 1, total),
            );
        }

        progress.report(
            "postprocess",
            0.9,
            format!("Filtering {} points", cloud.len()),
        );
        let cloud = filter_by_confidence(cloud, request.config.conf_thresh_percentile);
        let cloud = limit_points(cloud, request.config.num_max_points);
        debug!(session_id = %request.session_id, points = cloud.len(), "Point cloud ready");

        progress.report(
            "done",
            1.0,
            format!("Reconstructed {} points from {} images", cloud.len(), total),
        );
        Ok(ReconstructionOutput { cloud, cameras })
    }

    fn camera_for(&self, index: usize, width: u32, height: u32) -> Camera {
        let focal = width.max(height) as f32;
        let tx = -(index as f32) * self.baseline;
        Camera {
            intrinsics: [
                [focal, 0.0, width as f32 / 2.0],
                [0.0, focal, height as f32 / 2.0],
                [0.0, 0.0, 1.0],
            ],
            extrinsics: [
                [1.0, 0.0, 0.0, tx],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
            ],
        }
    }
}

fn load_image(path: &Path) -> Result<RgbImage, PipelineError> {
    image::open(path)
        .map(|img| img.to_rgb8())
        .map_err(|e| PipelineError::ImageLoad {
            path: path.display().to_string(),
            message: e.to_string(),
        })
}

/// Target size before patch alignment.
fn scaled_size(width: u32, height: u32, res: u32, method: ResolutionMethod) -> (u32, u32) {
    let reference = match method {
        ResolutionMethod::UpperBoundResize | ResolutionMethod::UpperBoundCrop => width.max(height),
        ResolutionMethod::LowerBoundResize | ResolutionMethod::LowerBoundCrop => width.min(height),
    };
    let scale = res as f32 / reference.max(1) as f32;
    let w = ((width as f32 * scale).round() as u32).max(1);
    let h = ((height as f32 * scale).round() as u32).max(1);
    (w, h)
}

fn fit_to_resolution(image: RgbImage, res: u32, method: ResolutionMethod) -> RgbImage {
    let (w, h) = scaled_size(image.width(), image.height(), res, method);
    match method {
        ResolutionMethod::UpperBoundResize | ResolutionMethod::LowerBoundResize => {
            let w = align_nearest(w);
            let h = align_nearest(h);
            image::imageops::resize(&image, w, h, FilterType::Triangle)
        }
        ResolutionMethod::UpperBoundCrop | ResolutionMethod::LowerBoundCrop => {
            let resized = image::imageops::resize(&image, w, h, FilterType::Triangle);
            let cw = align_down(w);
            let ch = align_down(h);
            let x = (w - cw) / 2;
            let y = (h - ch) / 2;
            image::imageops::crop_imm(&resized, x, y, cw, ch).to_image()
        }
    }
}

fn align_nearest(v: u32) -> u32 {
    (((v + PATCH_SIZE / 2) / PATCH_SIZE) * PATCH_SIZE).max(PATCH_SIZE)
}

fn align_down(v: u32) -> u32 {
    if v < PATCH_SIZE {
        v
    } else {
        (v / PATCH_SIZE) * PATCH_SIZE
    }
}

fn luminance(p: &image::Rgb<u8>) -> f32 {
    (0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32) / 255.0
}

fn back_project(image: &RgbImage, camera: &Camera, stride: u32, cloud: &mut PointCloud) {
    let (width, height) = image.dimensions();
    let fx = camera.intrinsics[0][0];
    let fy = camera.intrinsics[1][1];
    let cx = camera.intrinsics[0][2];
    let cy = camera.intrinsics[1][2];
    let offset = -camera.extrinsics[0][3];

    for y in (0..height).step_by(stride as usize) {
        for x in (0..width).step_by(stride as usize) {
            let pixel = image.get_pixel(x, y);
            let lum = luminance(pixel);
            let depth = 1.0 + 2.0 * (1.0 - lum);

            // Local contrast as confidence: edges are trusted more than flat areas.
            let right = image.get_pixel((x + 1).min(width - 1), y);
            let below = image.get_pixel(x, (y + 1).min(height - 1));
            let confidence = (lum - luminance(right)).abs() + (lum - luminance(below)).abs();

            let px = (x as f32 - cx) / fx * depth + offset;
            let py = (y as f32 - cy) / fy * depth;
            cloud.push([px, py, depth], [pixel[0], pixel[1], pixel[2]], confidence);
        }
    }
}
