//! Stream protocol behaviour across connections.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::channel::mpsc;
use futures::StreamExt;
use tempfile::TempDir;

use reconstream_core::{ServerMessage, SessionConfig, SessionConfigOverrides};
use reconstream_pipeline::LuminanceReconstructor;
use reconstream_server::{ConnectionState, InboundFrame, StreamHandler};
use reconstream_session::{ManagerConfig, SessionManager};

fn manager(root: &TempDir) -> Arc<SessionManager> {
    Arc::new(SessionManager::new(ManagerConfig {
        max_sessions: 4,
        session_timeout: Duration::from_secs(60),
        scratch_root: root.path().to_path_buf(),
        defaults: SessionConfig {
            process_res: 28,
            ..Default::default()
        },
    }))
}

fn png() -> Vec<u8> {
    let img = image::RgbImage::from_fn(20, 12, |x, y| image::Rgb([x as u8 * 12, y as u8 * 20, 200]));
    let mut buf = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

fn frame(value: serde_json::Value) -> Result<InboundFrame, String> {
    Ok(InboundFrame::Text(value.to_string()))
}

fn handler(manager: &Arc<SessionManager>, id: &str) -> StreamHandler {
    StreamHandler::new(
        manager.clone(),
        Arc::new(LuminanceReconstructor::new()),
        id,
    )
}

#[tokio::test]
async fn test_reconnect_resumes_existing_session() {
    let root = TempDir::new().unwrap();
    let manager = manager(&root);
    let session = manager
        .create(&SessionConfigOverrides::default())
        .await
        .unwrap();

    // First connection stores one image, then goes away.
    let (input, inbound) = mpsc::unbounded::<Result<InboundFrame, String>>();
    let (outbound, mut output) = mpsc::unbounded::<ServerMessage>();
    let task = tokio::spawn(handler(&manager, session.id()).run(inbound, outbound));
    output.next().await.unwrap();
    input
        .unbounded_send(frame(serde_json::json!({
            "type": "image",
            "data": STANDARD.encode(png()),
            "filename": "left.png",
        })))
        .unwrap();
    assert_eq!(output.next().await.unwrap().kind(), "ack");
    drop(input);
    assert_eq!(task.await.unwrap(), ConnectionState::Terminated);

    // Second connection sees it.
    let (input, inbound) = mpsc::unbounded::<Result<InboundFrame, String>>();
    let (outbound, mut output) = mpsc::unbounded::<ServerMessage>();
    let task = tokio::spawn(handler(&manager, session.id()).run(inbound, outbound));
    match output.next().await.unwrap() {
        ServerMessage::Connected {
            session_id,
            image_count,
            ..
        } => {
            assert_eq!(session_id, session.id());
            assert_eq!(image_count, 1);
        }
        other => panic!("unexpected {:?}", other),
    }
    drop(input);
    task.await.unwrap();
}

#[tokio::test]
async fn test_disconnect_during_generate_still_stores_result() {
    let root = TempDir::new().unwrap();
    let manager = manager(&root);
    let session = manager
        .create(&SessionConfigOverrides::default())
        .await
        .unwrap();
    session.add_image(png(), None).await.unwrap();

    let (input, inbound) = mpsc::unbounded::<Result<InboundFrame, String>>();
    let (outbound, mut output) = mpsc::unbounded::<ServerMessage>();
    let task = tokio::spawn(handler(&manager, session.id()).run(inbound, outbound));
    output.next().await.unwrap();

    input
        .unbounded_send(frame(serde_json::json!({"type": "generate", "incremental": false})))
        .unwrap();
    // The client vanishes before any result arrives.
    drop(output);
    drop(input);

    task.await.unwrap();
    let result = session.accumulated().expect("result stored");
    assert_eq!(result.image_count, 1);
    assert!(manager.get(session.id()).is_some());
}

#[tokio::test]
async fn test_deleted_session_ends_stream() {
    let root = TempDir::new().unwrap();
    let manager = manager(&root);
    let session = manager
        .create(&SessionConfigOverrides::default())
        .await
        .unwrap();
    let id = session.id().to_string();

    let (input, inbound) = mpsc::unbounded::<Result<InboundFrame, String>>();
    let (outbound, mut output) = mpsc::unbounded::<ServerMessage>();
    let task = tokio::spawn(handler(&manager, &id).run(inbound, outbound));
    output.next().await.unwrap();

    assert!(manager.delete(&id).await);
    input
        .unbounded_send(frame(serde_json::json!({"type": "generate"})))
        .unwrap();

    assert_eq!(output.next().await.unwrap().kind(), "error");
    assert_eq!(task.await.unwrap(), ConnectionState::Error);
}
