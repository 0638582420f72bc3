//! Error types for Reconstream.
//!
//! Every failure a caller can observe maps onto one [`ErrorKind`], which the
//! server layer uses to pick an HTTP status or a protocol `error` message.

use thiserror::Error;

/// Result type alias using the Reconstream [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Reconstream.
#[derive(Error, Debug)]
pub enum Error {
    /// Session id is unknown (or the session was already torn down)
    #[error("Session not found: {0}")]
    NotFound(String),

    /// No session or image slot is available
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// Malformed image bytes or protocol message
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The reconstruction collaborator failed
    #[error("Reconstruction failed: {0}")]
    Reconstruction(String),

    /// Scratch storage could not be released
    #[error("Cleanup failed for session {session_id}: {message}")]
    Cleanup { session_id: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    CapacityExceeded,
    InvalidInput,
    ReconstructionFailure,
    ResourceCleanupFailure,
    Internal,
}

impl Error {
    /// The taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::CapacityExceeded(_) => ErrorKind::CapacityExceeded,
            Error::InvalidInput(_) | Error::Json(_) => ErrorKind::InvalidInput,
            Error::Reconstruction(_) => ErrorKind::ReconstructionFailure,
            Error::Cleanup { .. } => ErrorKind::ResourceCleanupFailure,
            Error::Config(_) | Error::Io(_) | Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Get a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Error::NotFound(_) => Some("Create a session with POST /ws/session/create first"),
            Error::CapacityExceeded(_) => {
                Some("Delete finished sessions or raise sessions.max_sessions / max_images")
            }
            Error::InvalidInput(_) => Some("Send PNG, JPEG, WebP, BMP or TIFF bytes encoded as base64"),
            Error::Reconstruction(_) => Some("The session is still usable; retry generate"),
            Error::Config(_) => Some("Check reconstream.toml and RECONSTREAM_* variables"),
            _ => None,
        }
    }

    /// Shorthand for an [`Error::InvalidInput`].
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Error::InvalidInput(message.into())
    }
}

/// Format an error with its recovery suggestion.
pub fn format_error_with_suggestion(error: &Error) -> String {
    let mut output = error.to_string();
    if let Some(suggestion) = error.recovery_suggestion() {
        output.push_str(&format!("\n  Suggestion: {}", suggestion));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_follow_taxonomy() {
        assert_eq!(Error::NotFound("x".into()).kind(), ErrorKind::NotFound);
        assert_eq!(
            Error::CapacityExceeded("full".into()).kind(),
            ErrorKind::CapacityExceeded
        );
        assert_eq!(Error::invalid_input("bad").kind(), ErrorKind::InvalidInput);
        assert_eq!(
            Error::Reconstruction("boom".into()).kind(),
            ErrorKind::ReconstructionFailure
        );
        let cleanup = Error::Cleanup {
            session_id: "abc".into(),
            message: "busy".into(),
        };
        assert_eq!(cleanup.kind(), ErrorKind::ResourceCleanupFailure);
    }

    #[test]
    fn test_json_error_is_invalid_input() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_format_with_suggestion() {
        let err = Error::NotFound("abc".into());
        let text = format_error_with_suggestion(&err);
        assert!(text.contains("abc"));
        assert!(text.contains("Suggestion"));
    }
}
