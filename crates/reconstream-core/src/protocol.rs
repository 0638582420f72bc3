//! Streaming wire protocol.
//!
//! Every frame is a JSON object tagged by its `type` field:
//!
//! ```text
//! client -> server   image { data, filename? } | generate { incremental } | finalize {}
//! server -> client   connected | ack | progress | delta | complete | error
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Messages sent by the client over the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// One image, base64 encoded
    Image {
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    /// Reconstruct from every image received so far
    Generate {
        #[serde(default = "default_incremental")]
        incremental: bool,
    },
    /// Produce the final reconstruction
    Finalize,
}

fn default_incremental() -> bool {
    true
}

/// Why an inbound frame could not be turned into a [`ClientMessage`].
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The frame is not JSON at all; the stream cannot be trusted further.
    #[error("Malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    /// Valid JSON with an unknown type or missing fields.
    #[error("Unexpected message: {0}")]
    Unexpected(String),
}

impl DecodeError {
    /// Whether the connection must be closed after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DecodeError::Malformed(_))
    }
}

impl ClientMessage {
    /// Decode a text frame.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let value: serde_json::Value = serde_json::from_str(text).map_err(DecodeError::Malformed)?;
        serde_json::from_value(value).map_err(|e| DecodeError::Unexpected(e.to_string()))
    }
}

/// Metadata attached to `delta` and `complete` results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    /// Size of the encoded GLB payload
    pub glb_size_bytes: usize,
    /// Points in the encoded cloud
    pub point_count: usize,
    /// Images the reconstruction was computed from
    pub num_images: usize,
    /// "incremental" or "final"
    pub mode: String,
    /// Per-camera 3x3 intrinsics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intrinsics: Option<Vec<[[f32; 3]; 3]>>,
    /// Per-camera 3x4 world-to-camera extrinsics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extrinsics: Option<Vec<[[f32; 4]; 3]>>,
}

/// Messages sent by the server over the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The stream is attached to an existing session
    Connected {
        session_id: String,
        image_count: usize,
        max_images: usize,
    },
    /// An image was stored
    Ack { image_path: String, image_count: usize },
    /// Reconstruction progress, relayed from the collaborator
    Progress {
        stage: String,
        progress: f32,
        message: String,
    },
    /// Intermediate reconstruction result
    Delta {
        image_count: usize,
        glb_base64: String,
        metadata: ResultMetadata,
    },
    /// Final reconstruction result
    Complete {
        image_count: usize,
        glb_base64: String,
        metadata: ResultMetadata,
    },
    /// A recoverable or terminal failure
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    /// The `type` tag of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Connected { .. } => "connected",
            ServerMessage::Ack { .. } => "ack",
            ServerMessage::Progress { .. } => "progress",
            ServerMessage::Delta { .. } => "delta",
            ServerMessage::Complete { .. } => "complete",
            ServerMessage::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_image() {
        let msg = ClientMessage::decode(r#"{"type":"image","data":"aGk=","filename":"a.png"}"#)
            .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Image {
                data: "aGk=".into(),
                filename: Some("a.png".into())
            }
        );
    }

    #[test]
    fn test_generate_defaults_to_incremental() {
        let msg = ClientMessage::decode(r#"{"type":"generate"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Generate { incremental: true });
    }

    #[test]
    fn test_finalize_with_empty_body() {
        let msg = ClientMessage::decode(r#"{"type":"finalize"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Finalize);
    }

    #[test]
    fn test_malformed_is_fatal_unexpected_is_not() {
        let err = ClientMessage::decode("not json").unwrap_err();
        assert!(err.is_fatal());

        let err = ClientMessage::decode(r#"{"type":"dance"}"#).unwrap_err();
        assert!(!err.is_fatal());

        let err = ClientMessage::decode(r#"{"type":"image"}"#).unwrap_err();
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_server_message_shape() {
        let msg = ServerMessage::Ack {
            image_path: "/tmp/x/image_0000.png".into(),
            image_count: 1,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"type": "ack", "image_path": "/tmp/x/image_0000.png", "image_count": 1})
        );
        assert_eq!(msg.kind(), "ack");
    }

    #[test]
    fn test_metadata_omits_missing_cameras() {
        let metadata = ResultMetadata {
            glb_size_bytes: 10,
            point_count: 2,
            num_images: 1,
            mode: "final".into(),
            intrinsics: None,
            extrinsics: None,
        };
        let value = serde_json::to_value(&metadata).unwrap();
        assert!(value.get("intrinsics").is_none());
        assert_eq!(value["glb_size_bytes"], 10);
    }
}
