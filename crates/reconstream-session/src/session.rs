//! A single client's reconstruction session.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use reconstream_core::{Error, Result, SessionConfig, SessionStatus};
use reconstream_pipeline::{
    Camera, PointCloud, ProgressReporter, ReconstructionMode, ReconstructionRequest, Reconstructor,
};

use crate::scratch::ScratchStorage;

/// An image accepted into a session's ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRef {
    /// Position in the ledger, starting at 0
    pub index: usize,
    /// File name inside the scratch directory
    pub name: String,
    /// Absolute path of the stored file
    pub path: PathBuf,
}

/// The latest reconstruction held by a session.
#[derive(Debug, Clone)]
pub struct AccumulatedResult {
    pub cloud: PointCloud,
    pub cameras: Vec<Camera>,
    /// Ledger length the result was computed from
    pub image_count: usize,
    pub mode: ReconstructionMode,
}

impl AccumulatedResult {
    pub fn point_count(&self) -> usize {
        self.cloud.len()
    }
}

/// Point-in-time view of a session, as reported by the administration API.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub status: SessionStatus,
    pub image_count: usize,
    pub max_images: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub config: SessionConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub point_count: Option<usize>,
}

struct SessionState {
    status: SessionStatus,
    last_activity: DateTime<Utc>,
    scratch_dir: Option<PathBuf>,
    images: Vec<ImageRef>,
    accumulated: Option<Arc<AccumulatedResult>>,
    error_message: Option<String>,
    last_auto_generate_count: usize,
}

impl SessionState {
    fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    fn set_status(&mut self, next: SessionStatus) {
        if self.status.can_transition_to(next) {
            self.status = next;
        }
        self.touch();
    }

    fn ensure_open(&self, id: &str) -> Result<()> {
        if self.status.is_terminal() {
            return Err(Error::NotFound(format!("{} (session closed)", id)));
        }
        Ok(())
    }
}

/// One client's isolated reconstruction context.
///
/// Quick bookkeeping goes through a synchronous state lock. `add_image` and
/// `reconstruct` additionally take the session's sequencer, a FIFO async
/// lock, so work on one session runs strictly in arrival order while other
/// sessions proceed independently. `cleanup` closes the session at once but
/// takes the sequencer before removing scratch storage, so no sequenced
/// write can land in a directory that is being deleted.
pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    config: SessionConfig,
    storage: Arc<dyn ScratchStorage>,
    state: Mutex<SessionState>,
    sequencer: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("image_count", &self.image_count())
            .finish()
    }
}

impl Session {
    /// Create a session and its scratch directory.
    ///
    /// Touches the filesystem; call it from the blocking pool when on the
    /// async runtime.
    pub fn new(
        id: impl Into<String>,
        config: SessionConfig,
        storage: Arc<dyn ScratchStorage>,
    ) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(Error::invalid_input("session id cannot be empty"));
        }
        config.validate()?;

        let scratch_dir = storage.create(&id)?;
        debug!(session_id = %id, dir = %scratch_dir.display(), "Created scratch directory");

        let now = Utc::now();
        Ok(Self {
            id,
            created_at: now,
            config,
            storage,
            state: Mutex::new(SessionState {
                status: SessionStatus::Active,
                last_activity: now,
                scratch_dir: Some(scratch_dir),
                images: Vec::new(),
                accumulated: None,
                error_message: None,
                last_auto_generate_count: 0,
            }),
            sequencer: tokio::sync::Mutex::new(()),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> SessionStatus {
        self.state.lock().status
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.state.lock().last_activity
    }

    pub fn image_count(&self) -> usize {
        self.state.lock().images.len()
    }

    pub fn images(&self) -> Vec<ImageRef> {
        self.state.lock().images.clone()
    }

    pub fn scratch_dir(&self) -> Option<PathBuf> {
        self.state.lock().scratch_dir.clone()
    }

    pub fn accumulated(&self) -> Option<Arc<AccumulatedResult>> {
        self.state.lock().accumulated.clone()
    }

    /// Refresh the idle timer.
    pub fn touch(&self) {
        self.state.lock().touch();
    }

    /// How long the session has been idle at `now`.
    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_activity()
    }

    #[cfg(test)]
    pub(crate) fn set_last_activity(&self, at: DateTime<Utc>) {
        self.state.lock().last_activity = at;
    }

    pub fn info(&self) -> SessionInfo {
        let state = self.state.lock();
        SessionInfo {
            session_id: self.id.clone(),
            status: state.status,
            image_count: state.images.len(),
            max_images: self.config.max_images,
            created_at: self.created_at,
            last_activity: state.last_activity,
            config: self.config.clone(),
            error_message: state.error_message.clone(),
            point_count: state.accumulated.as_ref().map(|r| r.point_count()),
        }
    }

    /// Validate and store one image.
    ///
    /// Fails with `CapacityExceeded` once the ledger holds `max_images`
    /// entries and with `InvalidInput` if the bytes are not a decodable
    /// image; in both cases the ledger is left unchanged.
    pub async fn add_image(&self, bytes: Vec<u8>, filename: Option<&str>) -> Result<ImageRef> {
        let _turn = self.sequencer.lock().await;

        {
            let mut state = self.state.lock();
            state.touch();
            state.ensure_open(&self.id)?;
            if state.images.len() >= self.config.max_images {
                return Err(Error::CapacityExceeded(format!(
                    "session has reached maximum image limit ({})",
                    self.config.max_images
                )));
            }
        }

        let (bytes, extension) = tokio::task::spawn_blocking(move || validate_image(bytes))
            .await
            .map_err(|e| Error::Internal(format!("image validation worker failed: {}", e)))??;

        let (index, name, path) = {
            let state = self.state.lock();
            state.ensure_open(&self.id)?;
            let dir = state
                .scratch_dir
                .clone()
                .ok_or_else(|| Error::NotFound(format!("{} (scratch released)", self.id)))?;
            let index = state.images.len();
            let name = ledger_name(index, filename, extension, &state.images);
            let path = dir.join(&name);
            (index, name, path)
        };

        tokio::fs::write(&path, &bytes).await?;

        let image = ImageRef { index, name, path };
        let mut state = self.state.lock();
        if let Err(e) = state.ensure_open(&self.id) {
            // Cleanup won the race; the directory (and this file) is gone or going.
            return Err(e);
        }
        state.images.push(image.clone());
        if state.status == SessionStatus::Error {
            state.set_status(SessionStatus::Active);
        }
        state.touch();
        info!(
            session_id = %self.id,
            image = %image.name,
            image_count = state.images.len(),
            "Stored image"
        );
        Ok(image)
    }

    /// Whether enough new images arrived to trigger an automatic
    /// reconstruction. Returns `true` at most once per threshold crossing.
    pub fn take_auto_generate(&self) -> bool {
        let every = self.config.auto_generate_after;
        if every == 0 {
            return false;
        }
        let mut state = self.state.lock();
        let count = state.images.len();
        if count >= state.last_auto_generate_count + every {
            state.last_auto_generate_count = count;
            true
        } else {
            false
        }
    }

    /// Run the reconstruction collaborator over the whole ledger.
    ///
    /// Status is `processing` while the collaborator runs and returns to
    /// `active` on success or moves to `error` on failure; the session stays
    /// usable either way. A result arriving after cleanup is discarded.
    pub async fn reconstruct(
        &self,
        reconstructor: &dyn Reconstructor,
        mode: ReconstructionMode,
        progress: ProgressReporter,
    ) -> Result<Arc<AccumulatedResult>> {
        let _turn = self.sequencer.lock().await;

        let images: Vec<PathBuf> = {
            let mut state = self.state.lock();
            state.touch();
            state.ensure_open(&self.id)?;
            if state.images.is_empty() {
                return Err(Error::invalid_input("no images received yet"));
            }
            state.set_status(SessionStatus::Processing);
            state.images.iter().map(|i| i.path.clone()).collect()
        };
        let image_count = images.len();

        info!(
            session_id = %self.id,
            image_count,
            mode = mode.as_str(),
            backend = reconstructor.name(),
            "Reconstruction started"
        );

        let request = ReconstructionRequest {
            session_id: self.id.clone(),
            images,
            config: self.config.clone(),
            mode,
        };
        let outcome = reconstructor.run(request, progress).await;

        let mut state = self.state.lock();
        state.touch();
        if state.status.is_terminal() {
            debug!(session_id = %self.id, "Discarding reconstruction for closed session");
            return Err(Error::NotFound(format!("{} (session closed)", self.id)));
        }

        match outcome {
            Ok(output) => {
                let result = Arc::new(AccumulatedResult {
                    cloud: output.cloud,
                    cameras: output.cameras,
                    image_count,
                    mode,
                });
                state.accumulated = Some(result.clone());
                state.error_message = None;
                state.set_status(SessionStatus::Active);
                info!(
                    session_id = %self.id,
                    points = result.point_count(),
                    "Reconstruction finished"
                );
                Ok(result)
            }
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "Reconstruction failed");
                state.error_message = Some(e.to_string());
                state.set_status(SessionStatus::Error);
                Err(e.into())
            }
        }
    }

    /// Release scratch storage and result buffers and mark the session
    /// completed. Safe to call more than once; never fails.
    pub async fn cleanup(&self) {
        let dir = {
            let mut state = self.state.lock();
            state.accumulated = None;
            state.images.clear();
            state.status = SessionStatus::Completed;
            state.scratch_dir.take()
        };

        let Some(dir) = dir else {
            return;
        };

        // Work already past its open check may still write into `dir`.
        let _turn = self.sequencer.lock().await;

        let storage = self.storage.clone();
        let target = dir.clone();
        match tokio::task::spawn_blocking(move || storage.remove(&target)).await {
            Ok(Ok(())) => info!(session_id = %self.id, "Cleaned up session scratch directory"),
            Ok(Err(e)) => {
                let err = Error::Cleanup {
                    session_id: self.id.clone(),
                    message: format!("{}: {}", dir.display(), e),
                };
                error!("{}", err);
            }
            Err(e) => error!(session_id = %self.id, error = %e, "Cleanup worker failed"),
        }
    }
}

/// Decode the bytes far enough to prove they are an image.
fn validate_image(bytes: Vec<u8>) -> Result<(Vec<u8>, &'static str)> {
    let format = image::guess_format(&bytes)
        .map_err(|e| Error::invalid_input(format!("Invalid image data: {}", e)))?;
    image::load_from_memory_with_format(&bytes, format)
        .map_err(|e| Error::invalid_input(format!("Invalid image data: {}", e)))?;
    let extension = format.extensions_str().first().copied().unwrap_or("img");
    Ok((bytes, extension))
}

/// File name for the `index`-th image.
///
/// Supplied names are reduced to their final path component; anything
/// unusable falls back to `image_NNNN.<ext>`. Names already in the ledger get
/// the index as a prefix.
fn ledger_name(
    index: usize,
    supplied: Option<&str>,
    extension: &str,
    existing: &[ImageRef],
) -> String {
    let supplied = supplied
        .and_then(|s| Path::new(s).file_name())
        .and_then(|s| s.to_str())
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.starts_with('.'));

    let name = match supplied {
        Some(name) => name.to_string(),
        None => format!("image_{:04}.{}", index, extension),
    };

    if existing.iter().any(|i| i.name == name) {
        format!("{:04}_{}", index, name)
    } else {
        name
    }
}
