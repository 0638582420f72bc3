//! Per-connection stream protocol state machine.
//!
//! ```text
//! Connected -> AwaitingInput -> ImageReceiving | Generating | Finalizing -> AwaitingInput
//!                                   ...                                 -> Terminated
//! any non-terminal state -> Error (fatal decode or transport failure)
//! ```
//!
//! The handler is independent of the transport: it reads [`InboundFrame`]s
//! from any `Stream` and writes [`ServerMessage`]s to any `Sink`. The
//! WebSocket route adapts axum's socket onto it; tests drive it with
//! in-memory channels.

use std::fmt::Display;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tracing::{debug, info, warn};

use reconstream_core::{ClientMessage, Error, ResultMetadata, ServerMessage};
use reconstream_pipeline::{glb, Camera, ProgressReporter, ReconstructionMode, Reconstructor};
use reconstream_session::{AccumulatedResult, Session, SessionManager};

/// A frame received from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

/// Where a connection is in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    AwaitingInput,
    ImageReceiving,
    Generating,
    Finalizing,
    Terminated,
    Error,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Terminated | ConnectionState::Error)
    }
}

/// Whether the read loop keeps going after a message.
enum Flow {
    Continue,
    Stop(ConnectionState),
}

/// Drives one client connection against one session.
pub struct StreamHandler {
    manager: Arc<SessionManager>,
    reconstructor: Arc<dyn Reconstructor>,
    session_id: String,
    state: ConnectionState,
}

impl StreamHandler {
    pub fn new(
        manager: Arc<SessionManager>,
        reconstructor: Arc<dyn Reconstructor>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            manager,
            reconstructor,
            session_id: session_id.into(),
            state: ConnectionState::Connected,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            debug!(
                session_id = %self.session_id,
                from = ?self.state,
                to = ?next,
                "Connection state change"
            );
            self.state = next;
        }
    }

    /// Run the protocol until the client goes away or a fatal error occurs.
    ///
    /// Returns the terminal state. The outbound sink is closed on exit.
    pub async fn run<S, E, K>(mut self, mut inbound: S, mut outbound: K) -> ConnectionState
    where
        S: Stream<Item = Result<InboundFrame, E>> + Unpin,
        E: Display,
        K: Sink<ServerMessage> + Unpin,
        K::Error: Display,
    {
        let final_state = self.serve(&mut inbound, &mut outbound).await;
        self.transition(final_state);
        if let Err(e) = outbound.close().await {
            debug!(session_id = %self.session_id, error = %e, "Closing outbound stream failed");
        }
        info!(
            session_id = %self.session_id,
            state = ?self.state,
            "Stream connection closed"
        );
        self.state
    }

    async fn serve<S, E, K>(&mut self, inbound: &mut S, outbound: &mut K) -> ConnectionState
    where
        S: Stream<Item = Result<InboundFrame, E>> + Unpin,
        E: Display,
        K: Sink<ServerMessage> + Unpin,
        K::Error: Display,
    {
        // Streams attach only to sessions created out of band.
        let Some(session) = self.manager.get(&self.session_id) else {
            warn!(session_id = %self.session_id, "Stream opened for unknown session");
            let message = ServerMessage::error(format!("Session {} not found", self.session_id));
            let _ = send(outbound, message).await;
            return ConnectionState::Error;
        };

        let connected = ServerMessage::Connected {
            session_id: session.id().to_string(),
            image_count: session.image_count(),
            max_images: session.config().max_images,
        };
        if send(outbound, connected).await.is_err() {
            return ConnectionState::Terminated;
        }
        info!(session_id = %self.session_id, "Stream attached");
        self.transition(ConnectionState::AwaitingInput);

        while let Some(frame) = inbound.next().await {
            let flow = match frame {
                Ok(InboundFrame::Text(text)) => self.on_text(&text, outbound).await,
                Ok(InboundFrame::Binary(_)) => {
                    reply(
                        outbound,
                        ServerMessage::error("Binary frames are not supported; send JSON text"),
                    )
                    .await
                }
                Ok(InboundFrame::Close) => Flow::Stop(ConnectionState::Terminated),
                Err(e) => {
                    warn!(session_id = %self.session_id, error = %e, "Transport error");
                    Flow::Stop(ConnectionState::Error)
                }
            };

            match flow {
                Flow::Continue => self.transition(ConnectionState::AwaitingInput),
                Flow::Stop(state) => return state,
            }
        }

        ConnectionState::Terminated
    }

    async fn on_text<K>(&mut self, text: &str, outbound: &mut K) -> Flow
    where
        K: Sink<ServerMessage> + Unpin,
        K::Error: Display,
    {
        let message = match ClientMessage::decode(text) {
            Ok(message) => message,
            Err(e) if e.is_fatal() => {
                warn!(session_id = %self.session_id, error = %e, "Undecodable frame");
                let _ = send(outbound, ServerMessage::error(e.to_string())).await;
                return Flow::Stop(ConnectionState::Error);
            }
            Err(e) => return reply(outbound, ServerMessage::error(e.to_string())).await,
        };

        // Re-resolve on every message: refreshes the idle timer and notices
        // sessions deleted or evicted while the stream was open.
        let Some(session) = self.manager.get(&self.session_id) else {
            let message = ServerMessage::error(format!("Session {} not found", self.session_id));
            let _ = send(outbound, message).await;
            return Flow::Stop(ConnectionState::Error);
        };

        match message {
            ClientMessage::Image { data, filename } => {
                self.transition(ConnectionState::ImageReceiving);
                self.on_image(&session, &data, filename.as_deref(), outbound)
                    .await
            }
            ClientMessage::Generate { incremental } => {
                self.transition(ConnectionState::Generating);
                let mode = if incremental {
                    ReconstructionMode::Incremental
                } else {
                    ReconstructionMode::Final
                };
                self.reconstruct(&session, mode, false, outbound).await
            }
            ClientMessage::Finalize => {
                self.transition(ConnectionState::Finalizing);
                self.reconstruct(&session, ReconstructionMode::Final, true, outbound)
                    .await
            }
        }
    }

    async fn on_image<K>(
        &mut self,
        session: &Session,
        data: &str,
        filename: Option<&str>,
        outbound: &mut K,
    ) -> Flow
    where
        K: Sink<ServerMessage> + Unpin,
        K::Error: Display,
    {
        let bytes = match STANDARD.decode(data.trim()) {
            Ok(bytes) => bytes,
            Err(e) => {
                let message = format!("Invalid base64 image data: {}", e);
                return reply(outbound, ServerMessage::error(message)).await;
            }
        };

        let image = match session.add_image(bytes, filename).await {
            Ok(image) => image,
            Err(e) => {
                debug!(session_id = %self.session_id, error = %e, "Image rejected");
                return reply(outbound, ServerMessage::error(e.to_string())).await;
            }
        };

        let ack = ServerMessage::Ack {
            image_path: image.path.display().to_string(),
            image_count: image.index + 1,
        };
        if let Flow::Stop(state) = reply(outbound, ack).await {
            return Flow::Stop(state);
        }

        if session.take_auto_generate() {
            info!(
                session_id = %self.session_id,
                image_count = image.index + 1,
                "Auto-generating incremental reconstruction"
            );
            self.transition(ConnectionState::Generating);
            return self
                .reconstruct(session, ReconstructionMode::Incremental, false, outbound)
                .await;
        }
        Flow::Continue
    }

    /// Run the collaborator, relaying progress, then send `delta` (or
    /// `complete` when finalizing).
    async fn reconstruct<K>(
        &mut self,
        session: &Session,
        mode: ReconstructionMode,
        finalize: bool,
        outbound: &mut K,
    ) -> Flow
    where
        K: Sink<ServerMessage> + Unpin,
        K::Error: Display,
    {
        let (reporter, mut progress) = ProgressReporter::channel();
        let work = session.reconstruct(self.reconstructor.as_ref(), mode, reporter);

        // The reconstruction runs to completion even if the client is gone;
        // undeliverable progress is dropped.
        let mut client_gone = false;
        let relay = async {
            while let Some(p) = progress.recv().await {
                if client_gone {
                    continue;
                }
                let message = ServerMessage::Progress {
                    stage: p.stage,
                    progress: p.progress,
                    message: p.message,
                };
                if send(outbound, message).await.is_err() {
                    client_gone = true;
                }
            }
        };
        let (outcome, ()) = tokio::join!(work, relay);

        if client_gone {
            return Flow::Stop(ConnectionState::Terminated);
        }

        let result = match outcome {
            Ok(result) => result,
            Err(e) => return reply(outbound, ServerMessage::error(e.to_string())).await,
        };

        let show_cameras = session.config().show_cameras;
        let message = match encode_result(result, show_cameras, finalize).await {
            Ok(message) => message,
            Err(e) => return reply(outbound, ServerMessage::error(e.to_string())).await,
        };
        debug!(session_id = %self.session_id, kind = message.kind(), "Sending result");
        reply(outbound, message).await
    }
}

/// Encode a result as GLB on the blocking pool and wrap it for the wire.
async fn encode_result(
    result: Arc<AccumulatedResult>,
    show_cameras: bool,
    finalize: bool,
) -> Result<ServerMessage, Error> {
    tokio::task::spawn_blocking(move || {
        let cameras: &[Camera] = if show_cameras {
            result.cameras.as_slice()
        } else {
            &[]
        };
        let glb = glb::encode(&result.cloud, cameras);
        let metadata = ResultMetadata {
            glb_size_bytes: glb.len(),
            point_count: result.point_count(),
            num_images: result.image_count,
            mode: result.mode.as_str().to_string(),
            intrinsics: (!result.cameras.is_empty())
                .then(|| result.cameras.iter().map(|c| c.intrinsics).collect()),
            extrinsics: (!result.cameras.is_empty())
                .then(|| result.cameras.iter().map(|c| c.extrinsics).collect()),
        };
        let glb_base64 = STANDARD.encode(&glb);
        let image_count = result.image_count;

        if finalize {
            ServerMessage::Complete {
                image_count,
                glb_base64,
                metadata,
            }
        } else {
            ServerMessage::Delta {
                image_count,
                glb_base64,
                metadata,
            }
        }
    })
    .await
    .map_err(|e| Error::Internal(format!("result encoding failed: {}", e)))
}

async fn send<K>(outbound: &mut K, message: ServerMessage) -> Result<(), ()>
where
    K: Sink<ServerMessage> + Unpin,
    K::Error: Display,
{
    outbound.send(message).await.map_err(|e| {
        debug!(error = %e, "Client unreachable");
    })
}

/// Send a message; an unreachable client ends the connection.
async fn reply<K>(outbound: &mut K, message: ServerMessage) -> Flow
where
    K: Sink<ServerMessage> + Unpin,
    K::Error: Display,
{
    match send(outbound, message).await {
        Ok(()) => Flow::Continue,
        Err(()) => Flow::Stop(ConnectionState::Terminated),
    }
}
