//! Session configuration and status types.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Session state in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Session is accepting images and requests
    Active,
    /// A reconstruction is running for this session
    Processing,
    /// Session has been cleaned up (terminal)
    Completed,
    /// The last reconstruction failed; the session can still retry
    Error,
}

impl SessionStatus {
    /// Whether the session has reached its terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// `Completed` is reachable from everywhere and left from nowhere.
    /// `Error` is only entered from `Active` or `Processing` and is left by
    /// retrying (`Processing`) or by accepting new input (`Active`).
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (Completed, _) => false,
            (_, Completed) => true,
            (Active, Processing) | (Active, Error) => true,
            (Processing, Active) | (Processing, Error) => true,
            (Error, Active) | (Error, Processing) => true,
            (a, b) => a == b,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Processing => "processing",
            SessionStatus::Completed => "completed",
            SessionStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How input images are brought to the processing resolution.
///
/// Output dimensions are always multiples of the 14 px patch size; the
/// `*Resize` variants stretch to reach them, the `*Crop` variants crop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    /// Scale so the longer side equals the processing resolution
    #[default]
    UpperBoundResize,
    /// Like `UpperBoundResize`, but center-crop to the patch grid
    UpperBoundCrop,
    /// Scale so the shorter side equals the processing resolution
    LowerBoundResize,
    /// Like `LowerBoundResize`, but center-crop to the patch grid
    LowerBoundCrop,
}

impl std::str::FromStr for ResolutionMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "upper_bound_resize" => Ok(ResolutionMethod::UpperBoundResize),
            "upper_bound_crop" => Ok(ResolutionMethod::UpperBoundCrop),
            "lower_bound_resize" => Ok(ResolutionMethod::LowerBoundResize),
            "lower_bound_crop" => Ok(ResolutionMethod::LowerBoundCrop),
            other => Err(Error::invalid_input(format!(
                "unknown resolution method '{}'",
                other
            ))),
        }
    }
}

/// Largest accepted processing resolution. Working buffers grow with its
/// square, so larger values are rejected rather than attempted.
pub const MAX_PROCESS_RES: u32 = 4096;

/// Per-session configuration, fixed at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum number of images the session accepts
    pub max_images: usize,
    /// Processing resolution in pixels
    pub process_res: u32,
    /// Resize strategy used to reach `process_res`
    pub process_res_method: ResolutionMethod,
    /// Points below this confidence percentile (0-100) are dropped
    pub conf_thresh_percentile: f32,
    /// Upper bound on points in an output cloud
    pub num_max_points: usize,
    /// Include camera poses in encoded output
    pub show_cameras: bool,
    /// Run an incremental reconstruction after every N images (0 disables)
    pub auto_generate_after: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_images: 100,
            process_res: 504,
            process_res_method: ResolutionMethod::UpperBoundResize,
            conf_thresh_percentile: 10.0,
            num_max_points: 10_000_000,
            show_cameras: true,
            auto_generate_after: 0,
        }
    }
}

impl SessionConfig {
    /// Check the invariants a session relies on.
    pub fn validate(&self) -> Result<()> {
        if self.max_images == 0 {
            return Err(Error::invalid_input("max_images must be greater than 0"));
        }
        if self.process_res == 0 {
            return Err(Error::invalid_input("process_res must be greater than 0"));
        }
        if self.process_res > MAX_PROCESS_RES {
            return Err(Error::invalid_input(format!(
                "process_res must be at most {}",
                MAX_PROCESS_RES
            )));
        }
        if !(0.0..=100.0).contains(&self.conf_thresh_percentile) {
            return Err(Error::invalid_input(
                "conf_thresh_percentile must be between 0 and 100",
            ));
        }
        if self.num_max_points == 0 {
            return Err(Error::invalid_input("num_max_points must be greater than 0"));
        }
        Ok(())
    }
}

/// Optional overrides supplied when a session is created.
///
/// Field names match the query parameters of the creation endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfigOverrides {
    pub max_images: Option<usize>,
    pub process_res: Option<u32>,
    pub process_res_method: Option<ResolutionMethod>,
    pub conf_thresh_percentile: Option<f32>,
    pub num_max_points: Option<usize>,
    pub show_cameras: Option<bool>,
    pub auto_generate_after: Option<usize>,
}

impl SessionConfigOverrides {
    /// Merge the overrides on top of `defaults` and validate the result.
    pub fn apply(&self, defaults: &SessionConfig) -> Result<SessionConfig> {
        let config = SessionConfig {
            max_images: self.max_images.unwrap_or(defaults.max_images),
            process_res: self.process_res.unwrap_or(defaults.process_res),
            process_res_method: self
                .process_res_method
                .unwrap_or(defaults.process_res_method),
            conf_thresh_percentile: self
                .conf_thresh_percentile
                .unwrap_or(defaults.conf_thresh_percentile),
            num_max_points: self.num_max_points.unwrap_or(defaults.num_max_points),
            show_cameras: self.show_cameras.unwrap_or(defaults.show_cameras),
            auto_generate_after: self
                .auto_generate_after
                .unwrap_or(defaults.auto_generate_after),
        };
        config.validate()?;
        Ok(config)
    }
}
