//! HTTP administration routes and the WebSocket stream endpoint.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use reconstream_core::{ServerMessage, SessionConfigOverrides};
use reconstream_pipeline::Reconstructor;
use reconstream_session::SessionManager;

use crate::error::ApiError;
use crate::handler::{InboundFrame, StreamHandler};

/// Shared state handed to every route.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
    pub reconstructor: Arc<dyn Reconstructor>,
    /// Largest accepted request body or stream frame
    pub max_message_bytes: usize,
}

impl AppState {
    pub fn new(
        manager: Arc<SessionManager>,
        reconstructor: Arc<dyn Reconstructor>,
        max_message_bytes: usize,
    ) -> Self {
        Self {
            manager,
            reconstructor,
            max_message_bytes,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.max_message_bytes;
    Router::new()
        .route("/status", get(status))
        .route("/ws/session/create", post(create_session))
        .route("/ws/session/:id", get(session_info).delete(delete_session))
        .route("/ws/sessions", get(list_sessions))
        .route("/ws/reconstruct/:id", get(ws_upgrade_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "backend": state.reconstructor.name(),
        "stats": state.manager.stats(),
    }))
}

async fn create_session(
    State(state): State<AppState>,
    Query(overrides): Query<SessionConfigOverrides>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.manager.create(&overrides).await?;
    Ok(Json(json!({
        "success": true,
        "session_id": session.id(),
        "max_images": session.config().max_images,
        "config": session.config(),
    })))
}

async fn session_info(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.manager.info(&id)?))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let success = state.manager.delete(&id).await;
    Json(json!({ "success": success }))
}

async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "stats": state.manager.stats(),
        "sessions": state.manager.list(),
    }))
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    ws.max_message_size(state.max_message_bytes)
        .on_upgrade(move |socket| handle_websocket(socket, state, id))
}

/// Adapt an axum socket onto the transport-independent [`StreamHandler`].
async fn handle_websocket(socket: WebSocket, state: AppState, session_id: String) {
    info!(session_id = %session_id, "WebSocket connection opened");
    let (sender, receiver) = socket.split();

    let inbound = Box::pin(receiver.filter_map(|frame| async move {
        match frame {
            Ok(Message::Text(text)) => Some(Ok(InboundFrame::Text(text))),
            Ok(Message::Binary(bytes)) => Some(Ok(InboundFrame::Binary(bytes))),
            Ok(Message::Close(_)) => Some(Ok(InboundFrame::Close)),
            // Ping/pong is answered by the transport.
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
            Err(e) => Some(Err(e)),
        }
    }));

    let outbound = Box::pin(sender.with(|message: ServerMessage| async move {
        serde_json::to_string(&message)
            .map(Message::Text)
            .map_err(axum::Error::new)
    }));

    StreamHandler::new(state.manager, state.reconstructor, session_id)
        .run(inbound, outbound)
        .await;
}
