//! # reconstream-session
//!
//! Session lifecycle and admission control for Reconstream.
//!
//! This crate provides:
//! - [`Session`]: one client's isolated scratch directory, image ledger and
//!   latest reconstruction, with per-session serialization of work
//! - [`SessionStore`]: the id -> session membership map
//! - [`EvictionPolicy`]: which sessions to reclaim when idle or at capacity
//! - [`SessionManager`]: the only component that changes store membership
//! - [`SessionSweeper`]: a cancellable background task that expires idle sessions
//!
//! ## Locking
//!
//! ```text
//! SessionStore (parking_lot::Mutex)   membership only, never held across I/O
//!   └─> Session
//!       ├─ state     (parking_lot::Mutex)   status, timestamps, ledger, result
//!       └─ sequencer (tokio::sync::Mutex)   FIFO turn for add_image / reconstruct
//! ```
//!
//! Teardown always happens after a session has left the store, so one slow
//! directory removal never blocks other sessions.

pub mod eviction;
pub mod manager;
pub mod scratch;
pub mod session;
pub mod store;
pub mod sweeper;

pub use eviction::{EvictionCandidate, EvictionPolicy, IdleTimeoutPolicy};
pub use manager::{ManagerConfig, SessionManager, SessionStats};
pub use scratch::{DirScratchStorage, ScratchStorage};
pub use session::{AccumulatedResult, ImageRef, Session, SessionInfo};
pub use store::SessionStore;
pub use sweeper::SessionSweeper;
