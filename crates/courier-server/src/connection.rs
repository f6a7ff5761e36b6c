//! One WebSocket connection: a writer draining the session outbox and a
//! reader feeding frames to the connection manager.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use courier_core::{names, ConnectionManager, Envelope};
use futures::{SinkExt, StreamExt};
use metrics::counter;

/// Drive a connection until the client leaves, the socket fails, or the
/// session is closed by the broker. Teardown runs once on the way out.
pub async fn handle_connection(
    socket: WebSocket,
    manager: Arc<ConnectionManager>,
    heartbeat_interval: Duration,
) {
    let session = manager.on_connect();
    let session_id = session.id().clone();
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer: outbox → socket, plus periodic ping.
    let writer_session = Arc::clone(&session);
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat_interval);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                next = writer_session.outbox().next() => {
                    let Some(envelope) = next else {
                        // Sealed and flushed, or closed.
                        let _ = ws_tx.send(WsMessage::Close(None)).await;
                        break;
                    };
                    let text = match serde_json::to_string(&*envelope) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::error!(session_id = %writer_session.id(), error = %e, "failed to encode envelope");
                            continue;
                        }
                    };
                    if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(session_id = %writer_session.id(), "sent ping");
                }
            }
        }
    });

    // Reader: socket → manager, any frame counts as activity.
    let reader_session = Arc::clone(&session);
    let reader_manager = Arc::clone(&manager);
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => reader_manager.handle_frame(&reader_session, text.as_str()),
                WsMessage::Binary(_) => {
                    reader_session.touch();
                    counter!(names::REJECTED_FRAMES_TOTAL, "kind" => "binary_frame").increment(1);
                    let _ = reader_session.reply(Envelope::error("binary frames are not supported"));
                }
                WsMessage::Pong(_) | WsMessage::Ping(_) => reader_session.touch(),
                WsMessage::Close(_) => break,
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => {}
    }

    let _ = manager.on_disconnect(&session_id);
    writer.abort();
}
