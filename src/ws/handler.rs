//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::http::middleware::verify_jwt;
use crate::matchmaking::QueuedPlayer;
use crate::util::rate_limit::PlayerRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, Envelope, ServerMsg};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// JWT token for authentication
    pub token: String,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    // Verify JWT token before upgrading
    match verify_jwt(&query.token, &state.config.auth_jwt_secret) {
        Ok(claims) => {
            let display_name = claims.display_name();
            info!(user_id = %claims.sub, username = %display_name, "WebSocket upgrade for authenticated user");
            ws.on_upgrade(move |socket| handle_socket(socket, claims.sub, display_name, state))
        }
        Err(e) => {
            warn!(error = %e, "WebSocket auth failed");
            e.into_response()
        }
    }
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, user_id: Uuid, display_name: String, state: AppState) {
    info!(user_id = %user_id, "New WebSocket connection");

    let (mut ws_sink, mut ws_stream) = socket.split();

    // Send welcome message
    let welcome = ServerMsg::Welcome {
        user_id,
        server_time: unix_millis(),
    };
    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(user_id = %user_id, error = %e, "Failed to send welcome");
        return;
    }

    let (conn_id, outbound_rx) = state.sessions.register(user_id, &display_name);
    let writer_handle = tokio::spawn(run_writer(user_id, ws_sink, outbound_rx));

    let rate_limiter = PlayerRateLimiter::new();

    // Reader loop: WebSocket -> matchmaking / match
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_message() {
                    warn!(user_id = %user_id, "Rate limited inbound message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(client_msg) => {
                        handle_client_msg(&state, user_id, &display_name, &rate_limiter, client_msg)
                            .await;
                    }
                    Err(e) => {
                        warn!(user_id = %user_id, error = %e, "Failed to parse client message");
                        state.sessions.send(
                            &user_id,
                            ServerMsg::error("bad_message", format!("could not parse message: {e}")),
                        );
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(user_id = %user_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                debug!(user_id = %user_id, "Received ping/pong frame");
            }
            Ok(Message::Close(_)) => {
                info!(user_id = %user_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(user_id = %user_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // A newer connection for the same user keeps its queue entry and match
    if state.sessions.unregister(&user_id, conn_id) {
        state.matchmaking.disconnect(user_id).await;
    }
    writer_handle.abort();

    info!(user_id = %user_id, "WebSocket connection closed");
}

/// Apply one parsed client message
async fn handle_client_msg(
    state: &AppState,
    user_id: Uuid,
    display_name: &str,
    rate_limiter: &PlayerRateLimiter,
    msg: ClientMsg,
) {
    match msg {
        ClientMsg::JoinQueue { mode } => {
            if !rate_limiter.check_queue_join() {
                warn!(user_id = %user_id, "Rate limited queue join");
                return;
            }
            let player = QueuedPlayer::new(user_id, display_name.to_string(), mode);
            let reply = match state.matchmaking.join_queue(player).await {
                Ok(queue_size) => ServerMsg::Queued { mode, queue_size },
                Err(e) => ServerMsg::error("queue_rejected", e.to_string()),
            };
            state.sessions.send(&user_id, reply);
        }
        ClientMsg::LeaveQueue => {
            state.matchmaking.leave_queue(user_id).await;
        }
        ClientMsg::Move { payload } => {
            // Decoding `{row, col}` is the match's job
            let data = match serde_json::to_vec(&payload) {
                Ok(data) => Bytes::from(data),
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Failed to re-encode move");
                    return;
                }
            };
            if let Err(e) = state.matchmaking.forward_move(user_id, data).await {
                state
                    .sessions
                    .send(&user_id, ServerMsg::error("not_in_match", e.to_string()));
            }
        }
        ClientMsg::LeaveMatch => {
            state.matchmaking.leave_match(user_id).await;
        }
        ClientMsg::Ping { t } => {
            state.sessions.send(&user_id, ServerMsg::Pong { t });
        }
    }
}

/// Outbound channel -> WebSocket
async fn run_writer(
    user_id: Uuid,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<ServerMsg>,
) {
    while let Some(msg) = outbound_rx.recv().await {
        if let Err(e) = send_msg(&mut ws_sink, &msg).await {
            debug!(user_id = %user_id, error = %e, "WebSocket send failed");
            break;
        }
    }
    let _ = ws_sink.close().await;
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(&Envelope::from(msg)).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
