//! # reconstream-server
//!
//! Network surface of Reconstream.
//!
//! This crate provides:
//! - [`StreamHandler`]: the per-connection protocol state machine
//! - [`router`]: session administration over HTTP plus the WebSocket endpoint
//! - [`ApiError`]: HTTP status mapping for the error taxonomy
//!
//! ## Architecture
//!
//! ```text
//! client ──HTTP──> router ──> SessionManager (create / info / delete / list)
//! client ══WS════> ws adapter ──> StreamHandler ──> Session::add_image
//!                                      │               Session::reconstruct ──> Reconstructor
//!                                      └── progress / delta / complete ──> client
//! ```

pub mod error;
pub mod handler;
pub mod routes;

pub use error::ApiError;
pub use handler::{ConnectionState, InboundFrame, StreamHandler};
pub use routes::{router, AppState};
