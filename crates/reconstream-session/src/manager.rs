//! Session manager: admission, lookup, deletion and expiry.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use reconstream_core::{
    Config, Error, Result, SessionConfig, SessionConfigOverrides, SessionStatus,
};

use crate::eviction::{EvictionPolicy, IdleTimeoutPolicy};
use crate::scratch::{DirScratchStorage, ScratchStorage};
use crate::session::{Session, SessionInfo};
use crate::store::SessionStore;

/// Settings the manager needs, usually derived from [`Config`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub max_sessions: usize,
    /// Idle time after which a session expires; zero disables expiry
    pub session_timeout: Duration,
    pub scratch_root: PathBuf,
    /// Base configuration that creation overrides are applied to
    pub defaults: SessionConfig,
}

impl From<&Config> for ManagerConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_sessions: config.sessions.max_sessions,
            session_timeout: config.sessions.session_timeout(),
            scratch_root: config.sessions.scratch_root(),
            defaults: config.defaults.clone(),
        }
    }
}

/// Aggregate view over every live session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub processing_sessions: usize,
    pub total_images: usize,
    pub max_sessions: usize,
    /// Idle timeout in seconds
    pub session_timeout: u64,
}

/// Sole authority over session membership.
///
/// Constructed explicitly and shared by `Arc`; several independent managers
/// can coexist (tests do exactly that).
pub struct SessionManager {
    config: ManagerConfig,
    store: SessionStore,
    policy: Arc<dyn EvictionPolicy>,
    storage: Arc<dyn ScratchStorage>,
}

impl SessionManager {
    /// Manager with idle-timeout eviction and directory scratch storage.
    pub fn new(config: ManagerConfig) -> Self {
        let policy = Arc::new(IdleTimeoutPolicy::new(config.session_timeout));
        let storage = Arc::new(DirScratchStorage::new(config.scratch_root.clone()));
        Self::with_parts(config, policy, storage)
    }

    pub fn with_parts(
        config: ManagerConfig,
        policy: Arc<dyn EvictionPolicy>,
        storage: Arc<dyn ScratchStorage>,
    ) -> Self {
        Self {
            config,
            store: SessionStore::new(),
            policy,
            storage,
        }
    }

    pub fn defaults(&self) -> &SessionConfig {
        &self.config.defaults
    }

    pub fn max_sessions(&self) -> usize {
        self.config.max_sessions
    }

    /// Create and admit a new session.
    ///
    /// At capacity, expired sessions are evicted first; if none are expired,
    /// the least recently active session is. Evicted sessions are cleaned up
    /// after they have left the store.
    pub async fn create(&self, overrides: &SessionConfigOverrides) -> Result<Arc<Session>> {
        let config = overrides.apply(&self.config.defaults)?;
        let id = Uuid::new_v4().to_string();
        let storage = self.storage.clone();
        let session = tokio::task::spawn_blocking(move || Session::new(id, config, storage))
            .await
            .map_err(|e| Error::Internal(format!("session setup worker failed: {}", e)))??;
        let session = Arc::new(session);

        let admitted = self.store.admit(
            session.clone(),
            self.config.max_sessions,
            self.policy.as_ref(),
            Utc::now(),
        );

        match admitted {
            Ok(evicted) => {
                for victim in evicted {
                    info!(session_id = %victim.id(), "Evicting session to make room");
                    victim.cleanup().await;
                }
                info!(
                    session_id = %session.id(),
                    max_images = session.config().max_images,
                    "Created session"
                );
                Ok(session)
            }
            Err(rejected) => {
                rejected.cleanup().await;
                warn!(max_sessions = self.config.max_sessions, "Session limit reached");
                Err(Error::CapacityExceeded(format!(
                    "too many sessions (max {})",
                    self.config.max_sessions
                )))
            }
        }
    }

    /// Look up a session, refreshing its idle timer.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        let session = self.store.get(id)?;
        session.touch();
        Some(session)
    }

    /// Session info, or `NotFound`.
    pub fn info(&self, id: &str) -> Result<SessionInfo> {
        self.get(id)
            .map(|s| s.info())
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Remove and clean up a session. Returns whether it existed.
    pub async fn delete(&self, id: &str) -> bool {
        match self.store.remove(id) {
            Some(session) => {
                session.cleanup().await;
                info!(session_id = %id, "Deleted session");
                true
            }
            None => {
                debug!(session_id = %id, "Delete of unknown session");
                false
            }
        }
    }

    /// Delete every expired session. Returns how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        let expired = self.store.remove_expired(self.policy.as_ref(), Utc::now());
        let count = expired.len();
        for session in expired {
            info!(session_id = %session.id(), "Expiring idle session");
            session.cleanup().await;
        }
        if count > 0 {
            info!(count, remaining = self.store.len(), "Swept expired sessions");
        }
        count
    }

    pub fn stats(&self) -> SessionStats {
        let sessions = self.store.snapshot();
        let mut stats = SessionStats {
            total_sessions: sessions.len(),
            active_sessions: 0,
            processing_sessions: 0,
            total_images: 0,
            max_sessions: self.config.max_sessions,
            session_timeout: self.config.session_timeout.as_secs(),
        };
        for session in &sessions {
            let info = session.info();
            match info.status {
                SessionStatus::Active => stats.active_sessions += 1,
                SessionStatus::Processing => stats.processing_sessions += 1,
                SessionStatus::Completed | SessionStatus::Error => {}
            }
            stats.total_images += info.image_count;
        }
        stats
    }

    /// Info for every live session, in creation order. Does not touch.
    pub fn list(&self) -> Vec<SessionInfo> {
        self.store.snapshot().iter().map(|s| s.info()).collect()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Remove and clean up every session.
    pub async fn shutdown(&self) {
        let sessions = self.store.drain();
        let count = sessions.len();
        for session in sessions {
            session.cleanup().await;
        }
        info!(count, "Cleaned up all sessions");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::{png_bytes, FixedReconstructor};
    use chrono::Duration as Span;
    use reconstream_pipeline::{ProgressReporter, ReconstructionMode};
    use std::io;
    use std::path::Path;
    use tempfile::TempDir;

    fn manager(root: &TempDir, max_sessions: usize, timeout: Duration) -> SessionManager {
        SessionManager::new(ManagerConfig {
            max_sessions,
            session_timeout: timeout,
            scratch_root: root.path().to_path_buf(),
            defaults: SessionConfig::default(),
        })
    }

    #[tokio::test]
    async fn test_scenario_forced_eviction_removes_oldest_idle() {
        let root = TempDir::new().unwrap();
        let manager = manager(&root, 2, Duration::ZERO);
        let overrides = SessionConfigOverrides::default();

        let a = manager.create(&overrides).await.unwrap();
        let b = manager.create(&overrides).await.unwrap();
        a.set_last_activity(Utc::now() - Span::seconds(30));
        let a_dir = a.scratch_dir().unwrap();

        let c = manager.create(&overrides).await.unwrap();

        assert!(manager.get(a.id()).is_none());
        assert!(manager.get(b.id()).is_some());
        assert!(manager.get(c.id()).is_some());
        assert_eq!(a.status(), SessionStatus::Completed);
        assert!(!a_dir.exists());
    }

    #[tokio::test]
    async fn test_oldest_idle_not_oldest_created() {
        let root = TempDir::new().unwrap();
        let manager = manager(&root, 2, Duration::ZERO);
        let overrides = SessionConfigOverrides::default();

        let first = manager.create(&overrides).await.unwrap();
        let second = manager.create(&overrides).await.unwrap();
        second.set_last_activity(Utc::now() - Span::seconds(60));
        first.set_last_activity(Utc::now() - Span::seconds(10));

        manager.create(&overrides).await.unwrap();
        assert!(manager.get(first.id()).is_some());
        assert!(manager.get(second.id()).is_none());
    }

    #[tokio::test]
    async fn test_capacity_is_never_exceeded() {
        let root = TempDir::new().unwrap();
        let manager = manager(&root, 3, Duration::from_secs(3600));
        let overrides = SessionConfigOverrides::default();

        let mut created = Vec::new();
        for _ in 0..8 {
            created.push(manager.create(&overrides).await.unwrap());
            assert!(manager.len() <= 3);
        }
        assert_eq!(manager.len(), 3);
        // The three most recent survive.
        for session in &created[5..] {
            assert!(manager.get(session.id()).is_some());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_respect_capacity() {
        let root = TempDir::new().unwrap();
        let manager = Arc::new(manager(&root, 3, Duration::from_secs(3600)));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move {
                    manager.create(&SessionConfigOverrides::default()).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
            assert!(manager.len() <= 3);
        }

        assert_eq!(manager.len(), 3);
        // Every evicted session's scratch directory is gone.
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 3);
    }

    #[tokio::test]
    async fn test_expired_preferred_over_oldest() {
        let root = TempDir::new().unwrap();
        let manager = manager(&root, 2, Duration::from_secs(60));
        let overrides = SessionConfigOverrides::default();

        let oldest = manager.create(&overrides).await.unwrap();
        let expired = manager.create(&overrides).await.unwrap();
        oldest.set_last_activity(Utc::now() - Span::seconds(50));
        expired.set_last_activity(Utc::now() - Span::seconds(61));

        manager.create(&overrides).await.unwrap();
        assert!(manager.get(oldest.id()).is_some());
        assert!(manager.get(expired.id()).is_none());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let root = TempDir::new().unwrap();
        let manager = manager(&root, 4, Duration::from_secs(60));
        let session = manager
            .create(&SessionConfigOverrides::default())
            .await
            .unwrap();
        let id = session.id().to_string();

        assert!(manager.delete(&id).await);
        assert!(!manager.delete(&id).await);
        assert!(manager.get(&id).is_none());
    }

    #[tokio::test]
    async fn test_scenario_image_limit_visible_in_info() {
        let root = TempDir::new().unwrap();
        let manager = manager(&root, 4, Duration::from_secs(60));
        let overrides = SessionConfigOverrides {
            max_images: Some(2),
            ..Default::default()
        };
        let session = manager.create(&overrides).await.unwrap();

        session.add_image(png_bytes(), None).await.unwrap();
        session.add_image(png_bytes(), None).await.unwrap();
        let err = session.add_image(png_bytes(), None).await.unwrap_err();
        assert!(matches!(err, Error::CapacityExceeded(_)));

        let info = manager.info(session.id()).unwrap();
        assert_eq!(info.image_count, 2);
        assert_eq!(info.max_images, 2);
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let root = TempDir::new().unwrap();
        let manager = manager(&root, 4, Duration::from_secs(60));
        let err = manager.info(&Uuid::new_v4().to_string()).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_invalid_overrides_rejected() {
        let root = TempDir::new().unwrap();
        let manager = manager(&root, 4, Duration::from_secs(60));
        let overrides = SessionConfigOverrides {
            max_images: Some(0),
            ..Default::default()
        };
        let err = manager.create(&overrides).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_get_touches() {
        let root = TempDir::new().unwrap();
        let manager = manager(&root, 4, Duration::from_secs(60));
        let session = manager
            .create(&SessionConfigOverrides::default())
            .await
            .unwrap();
        let past = Utc::now() - Span::seconds(120);
        session.set_last_activity(past);

        manager.get(session.id()).unwrap();
        assert!(session.last_activity() > past);
        assert_eq!(manager.sweep_expired().await, 0);
    }

    #[tokio::test]
    async fn test_sweep_expired() {
        let root = TempDir::new().unwrap();
        let manager = manager(&root, 4, Duration::from_secs(60));
        let overrides = SessionConfigOverrides::default();
        let stale = manager.create(&overrides).await.unwrap();
        let fresh = manager.create(&overrides).await.unwrap();
        stale.set_last_activity(Utc::now() - Span::seconds(61));

        assert_eq!(manager.sweep_expired().await, 1);
        assert_eq!(manager.len(), 1);
        assert!(manager.get(fresh.id()).is_some());
        assert_eq!(stale.status(), SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_stats() {
        let root = TempDir::new().unwrap();
        let manager = manager(&root, 5, Duration::from_secs(90));
        let overrides = SessionConfigOverrides::default();
        let a = manager.create(&overrides).await.unwrap();
        manager.create(&overrides).await.unwrap();
        a.add_image(png_bytes(), None).await.unwrap();
        a.add_image(png_bytes(), None).await.unwrap();

        let stats = manager.stats();
        assert_eq!(
            stats,
            SessionStats {
                total_sessions: 2,
                active_sessions: 2,
                processing_sessions: 0,
                total_images: 2,
                max_sessions: 5,
                session_timeout: 90,
            }
        );
        assert_eq!(manager.list().len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_cleans_everything() {
        let root = TempDir::new().unwrap();
        let manager = manager(&root, 5, Duration::from_secs(90));
        let session = manager
            .create(&SessionConfigOverrides::default())
            .await
            .unwrap();
        session.add_image(png_bytes(), None).await.unwrap();
        session
            .reconstruct(
                &FixedReconstructor,
                ReconstructionMode::Incremental,
                ProgressReporter::noop(),
            )
            .await
            .unwrap();
        let dir = session.scratch_dir().unwrap();

        manager.shutdown().await;
        assert!(manager.is_empty());
        assert!(!dir.exists());
        assert!(session.accumulated().is_none());
    }

    /// Storage that can create but never remove.
    struct UndeletableStorage(DirScratchStorage);

    impl ScratchStorage for UndeletableStorage {
        fn create(&self, session_id: &str) -> io::Result<PathBuf> {
            self.0.create(session_id)
        }

        fn remove(&self, _path: &Path) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "device busy"))
        }
    }

    #[tokio::test]
    async fn test_delete_succeeds_when_removal_fails() {
        let root = TempDir::new().unwrap();
        let config = ManagerConfig {
            max_sessions: 2,
            session_timeout: Duration::from_secs(60),
            scratch_root: root.path().to_path_buf(),
            defaults: SessionConfig::default(),
        };
        let manager = SessionManager::with_parts(
            config,
            Arc::new(IdleTimeoutPolicy::new(Duration::from_secs(60))),
            Arc::new(UndeletableStorage(DirScratchStorage::new(root.path()))),
        );
        let session = manager
            .create(&SessionConfigOverrides::default())
            .await
            .unwrap();

        assert!(manager.delete(session.id()).await);
        assert!(session.scratch_dir().is_none());
        assert_eq!(session.status(), SessionStatus::Completed);
    }

    /// Storage that records which thread created each directory.
    struct ThreadRecordingStorage {
        inner: DirScratchStorage,
        threads: parking_lot::Mutex<Vec<std::thread::ThreadId>>,
    }

    impl ScratchStorage for ThreadRecordingStorage {
        fn create(&self, session_id: &str) -> io::Result<PathBuf> {
            self.threads.lock().push(std::thread::current().id());
            self.inner.create(session_id)
        }

        fn remove(&self, path: &Path) -> io::Result<()> {
            self.inner.remove(path)
        }
    }

    #[tokio::test]
    async fn test_scratch_created_off_the_runtime_thread() {
        let root = TempDir::new().unwrap();
        let storage = Arc::new(ThreadRecordingStorage {
            inner: DirScratchStorage::new(root.path()),
            threads: parking_lot::Mutex::new(Vec::new()),
        });
        let manager = SessionManager::with_parts(
            ManagerConfig {
                max_sessions: 2,
                session_timeout: Duration::from_secs(60),
                scratch_root: root.path().to_path_buf(),
                defaults: SessionConfig::default(),
            },
            Arc::new(IdleTimeoutPolicy::new(Duration::from_secs(60))),
            storage.clone(),
        );

        let session = manager
            .create(&SessionConfigOverrides::default())
            .await
            .unwrap();

        assert!(session.scratch_dir().unwrap().is_dir());
        let threads = storage.threads.lock();
        assert_eq!(threads.len(), 1);
        assert_ne!(threads[0], std::thread::current().id());
    }

    #[test]
    fn test_config_from_app_config() {
        let mut config = Config::default();
        config.sessions.max_sessions = 7;
        config.sessions.session_timeout_secs = 0;
        let manager_config = ManagerConfig::from(&config);
        assert_eq!(manager_config.max_sessions, 7);
        assert!(manager_config.session_timeout.is_zero());
    }
}
