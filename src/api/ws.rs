// WebSocket handlers bridging sockets to the matchmaking controller and
// the session runtime.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use serde::Deserialize;

use crate::metrics;
use crate::protocol::{MatchInbound, QueueInbound, QueueOutbound};

use super::AppState;

// ── Queue socket ──────────────────────────────────────────────────────

pub async fn ws_queue(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_queue_ws(socket, state))
}

async fn handle_queue_ws(mut socket: WebSocket, state: AppState) {
    metrics::CONNECTED_WEBSOCKETS.inc();
    let mut joined_user: Option<String> = None;
    let mut notifications: Option<tokio::sync::mpsc::UnboundedReceiver<serde_json::Value>> = None;

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let Some(Ok(message)) = incoming else { break };
                let Message::Text(text) = message else {
                    if matches!(message, Message::Close(_)) { break; }
                    continue;
                };
                let frame: QueueInbound = match serde_json::from_str(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!("Unparseable queue frame: {e}");
                        continue;
                    }
                };
                match frame {
                    QueueInbound::Join { user_id, rating } => {
                        // Register the live connection before joining so a
                        // same-tick match_found has somewhere to land.
                        if joined_user.is_none() {
                            notifications = Some(state.notifier.connect(&user_id));
                            joined_user = Some(user_id.clone());
                        }
                        let reply = match state.matchmaking.join(&user_id, rating).await {
                            Ok(reply) => reply,
                            Err(e) => {
                                tracing::warn!(user_id = %user_id, "Queue join rejected: {e}");
                                QueueOutbound::Error { message: "join rejected".into() }
                            }
                        };
                        let redirected = matches!(reply, QueueOutbound::AlreadyInMatch { .. });
                        let payload = reply.to_value().to_string();
                        if socket.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                        // Reserved players are detached; they belong on the
                        // match socket.
                        if redirected {
                            break;
                        }
                    }
                    QueueInbound::Leave => {
                        if let Some(ref user_id) = joined_user {
                            if let Err(e) = state.matchmaking.leave(user_id).await {
                                tracing::error!(user_id = %user_id, "Queue leave failed: {e}");
                            }
                        }
                        break;
                    }
                }
            }
            notification = async {
                match notifications.as_mut() {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending::<Option<serde_json::Value>>().await,
                }
            } => {
                let Some(frame) = notification else { break };
                if socket.send(Message::Text(frame.to_string().into())).await.is_err() {
                    break;
                }
                // A match_found closes the queue connection; the client
                // reconnects on the match socket.
                if frame["type"] == "match_found" {
                    break;
                }
            }
        }
    }

    // A dangling queue membership on disconnect is removed; leave() is a
    // no-op for players already reserved into a match.
    if let Some(user_id) = joined_user {
        if state.matchmaking.leave(&user_id).await.is_err() {
            tracing::warn!(user_id = %user_id, "Cleanup leave failed");
        }
    }
    metrics::CONNECTED_WEBSOCKETS.dec();
}

// ── Match socket ──────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct MatchWsParams {
    user: String,
}

pub async fn ws_match(
    ws: WebSocketUpgrade,
    Path(match_id): Path<String>,
    Query(params): Query<MatchWsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_match_ws(socket, state, match_id, params.user))
}

async fn handle_match_ws(mut socket: WebSocket, state: AppState, match_id: String, user_id: String) {
    let Some(room) = state.rooms.room_for_match(&match_id) else {
        tracing::warn!(match_id = %match_id, "Match socket for unknown room");
        let _ = socket
            .send(Message::Text(
                serde_json::json!({"type": "error", "message": "unknown match"})
                    .to_string()
                    .into(),
            ))
            .await;
        return;
    };

    metrics::CONNECTED_WEBSOCKETS.inc();
    let mut outbound = room.subscribe(&user_id);

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let frame: MatchInbound = match serde_json::from_str(&text) {
                            Ok(frame) => frame,
                            Err(e) => {
                                tracing::warn!(match_id = %match_id, "Unparseable match frame: {e}");
                                continue;
                            }
                        };
                        if !state.sessions.dispatch(&match_id, frame).await {
                            tracing::warn!(match_id = %match_id, "Frame for finished session");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    // Room torn down; session is over.
                    break;
                };
                if socket.send(Message::Text(frame.to_string().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    metrics::CONNECTED_WEBSOCKETS.dec();
}
