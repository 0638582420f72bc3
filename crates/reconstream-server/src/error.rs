//! HTTP mapping of the error taxonomy.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use reconstream_core::{Error, ErrorKind};

/// An [`Error`] returned from an administration route.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::CapacityExceeded => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::ReconstructionFailure
            | ErrorKind::ResourceCleanupFailure
            | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        let mut body = json!({
            "success": false,
            "error": self.0.to_string(),
            "kind": format!("{:?}", self.0.kind()),
        });
        if let Some(suggestion) = self.0.recovery_suggestion() {
            body["suggestion"] = json!(suggestion);
        }
        (status, Json(body)).into_response()
    }
}
