//! Terminal WebSocket handler
//!
//! Bridges the learner's browser to an interactive shell in a throwaway
//! container. Two pumps share the session: a reader forwarding PTY output to
//! the client and a writer dispatching client frames to the container.
//! Either side ending cancels both, and the container is torn down after
//! both pumps have stopped.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::database::{EnrollmentStore, TrackStore};
use crate::router::middleware::auth::{decode_token, require_owner};
use crate::router::AppState;
use crate::terminal::{chunk_text, ClientFrame, TerminalSession};

/// Close codes the UI distinguishes
const CLOSE_AUTH: u16 = 4001;
const CLOSE_MISSING: u16 = 4004;
const CLOSE_ENGINE: u16 = 4500;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// JWT in the query string: a browser WebSocket cannot set headers
    pub token: String,
}

pub async fn terminal_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(enrollment_id): Path<i64>,
    Query(query): Query<WsQuery>,
) -> Response {
    ws.on_upgrade(move |socket| handle_terminal(socket, state, enrollment_id, query.token))
}

async fn reject(mut socket: WebSocket, code: u16, message: String) {
    let frame = json!({ "type": "error", "message": message }).to_string();
    let _ = socket.send(Message::Text(frame)).await;
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: message.into(),
        })))
        .await;
}

async fn handle_terminal(socket: WebSocket, state: AppState, enrollment_id: i64, token: String) {
    let claims = match decode_token(&token, &state.config.auth.jwt_secret) {
        Ok(claims) => claims,
        Err(_) => {
            return reject(socket, CLOSE_AUTH, "Invalid token".to_string()).await;
        }
    };

    let track = {
        let conn = state.db.conn().await;

        let enrollment = match EnrollmentStore.get(&conn, enrollment_id) {
            Ok(Some(enrollment)) => enrollment,
            _ => {
                drop(conn);
                return reject(socket, CLOSE_MISSING, "Enrollment not found".to_string()).await;
            }
        };

        if require_owner(&claims, enrollment.user_id).is_err() {
            drop(conn);
            return reject(socket, CLOSE_MISSING, "Enrollment not found".to_string()).await;
        }

        match TrackStore.get(&conn, enrollment.track_id) {
            Ok(Some(track)) => track,
            _ => {
                drop(conn);
                return reject(socket, CLOSE_MISSING, "Track not found".to_string()).await;
            }
        }
    };

    let mut session = match TerminalSession::allocate(
        state.engine.clone(),
        &track.docker_image,
        &track.env_secrets,
        enrollment_id,
    )
    .await
    {
        Ok(session) => session,
        Err(e) => {
            warn!(
                "Terminal container failed to start | enrollment_id={} | error={}",
                enrollment_id, e
            );
            return reject(
                socket,
                CLOSE_ENGINE,
                format!("Failed to start container: {}", e),
            )
            .await;
        }
    };

    let stream = match session.take_stream() {
        Some(stream) => stream,
        None => {
            session.teardown().await;
            return reject(socket, CLOSE_ENGINE, "Failed to attach shell".to_string()).await;
        }
    };

    let (mut sender, mut receiver) = socket.split();

    let ready = json!({ "type": "ready", "message": "Terminal connected" }).to_string();
    if sender.send(Message::Text(ready)).await.is_err() {
        session.teardown().await;
        return;
    }

    let cancel = CancellationToken::new();
    let mut input = stream.input;
    let mut output = stream.output;

    // Reader pump: container -> client, bounded writes
    let reader_cancel = cancel.clone();
    let reader = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = reader_cancel.cancelled() => break,

                frame = output.next() => {
                    let bytes = match frame {
                        Some(Ok(bytes)) => bytes,
                        Some(Err(e)) => {
                            debug!("Terminal output stream error | error={}", e);
                            reader_cancel.cancel();
                            break;
                        }
                        None => {
                            reader_cancel.cancel();
                            break;
                        }
                    };

                    let mut failed = false;
                    for chunk in chunk_text(&bytes) {
                        if sender.send(Message::Text(chunk)).await.is_err() {
                            failed = true;
                            break;
                        }
                    }

                    if failed {
                        reader_cancel.cancel();
                        break;
                    }
                }
            }
        }
    });

    // Writer pump: client frames -> container, serialized in arrival order
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(ClientFrame::Input { data }) => {
                                if input.write_all(data.as_bytes()).await.is_err()
                                    || input.flush().await.is_err()
                                {
                                    debug!("Terminal stdin write failed | enrollment_id={}", enrollment_id);
                                    break;
                                }
                            }
                            Ok(ClientFrame::Resize { rows, cols }) => {
                                session.resize(rows, cols).await;
                            }
                            Ok(ClientFrame::Close) => break,
                            Err(_) => {
                                debug!("Ignoring malformed terminal frame | enrollment_id={}", enrollment_id);
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!("Terminal socket error | enrollment_id={} | error={}", enrollment_id, e);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    // Cancel, await both pumps, then tear down; no orphaned containers on
    // any exit path
    cancel.cancel();
    let _ = reader.await;
    session.teardown().await;
}
