//! # reconstream-core
//!
//! Core types and abstractions for Reconstream, the streaming 3D
//! reconstruction server.
//!
//! This crate provides:
//! - The error taxonomy shared by every layer
//! - Layered configuration (defaults, TOML files, environment)
//! - Per-session configuration and status types
//! - The streaming wire protocol (client and server messages)

pub mod config;
pub mod error;
pub mod protocol;
pub mod session;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use protocol::{ClientMessage, ResultMetadata, ServerMessage};
pub use session::{
    ResolutionMethod, SessionConfig, SessionConfigOverrides, SessionStatus, MAX_PROCESS_RES,
};
