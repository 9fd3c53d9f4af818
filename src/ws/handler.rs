//! WebSocket upgrade handler and session loops
//!
//! A session binds to exactly one room in exactly one role. The first
//! client message decides: create_room binds the display, join_room binds
//! a controller. After binding, inputs go to the room's intent register,
//! membership changes go over the command channel, and the writer half
//! forwards broadcast frames plus session-private messages.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::room::{JoinAck, JoinError, RoomCommand, RoomHandle};
use crate::util::rate_limit::SessionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, GameKind, RoomOptions, ServerMsg};

/// How long a fresh connection may idle before sending its binding message
const BIND_TIMEOUT: Duration = Duration::from_secs(30);
/// How long a binding command may wait for the room task's tick boundary
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);
/// Session-private outbound queue depth
const PRIVATE_QUEUE_DEPTH: usize = 32;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Decrements the room's bound-session counter when the session ends
struct SessionBinding {
    counter: Arc<AtomicUsize>,
}

impl SessionBinding {
    fn bind(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self { counter }
    }
}

impl Drop for SessionBinding {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let session_id = Uuid::new_v4();
    info!(session_id = %session_id, "New WebSocket connection");

    let (mut ws_sink, mut ws_stream) = socket.split();

    let first = match tokio::time::timeout(BIND_TIMEOUT, next_client_msg(&mut ws_stream)).await {
        Ok(Some(msg)) => msg,
        Ok(None) => {
            debug!(session_id = %session_id, "Connection closed before binding");
            return;
        }
        Err(_) => {
            let _ = send_direct(
                &mut ws_sink,
                &error_msg("bind_timeout", "no binding message received"),
            )
            .await;
            return;
        }
    };

    match first {
        ClientMsg::CreateRoom {
            room_id,
            kind,
            config,
        } => {
            run_display_session(session_id, room_id, kind, config, ws_sink, ws_stream, state)
                .await;
        }
        ClientMsg::JoinRoom {
            room_id,
            player_name,
            password,
            player_id,
        } => {
            run_controller_session(
                session_id,
                room_id,
                player_name,
                password,
                player_id,
                ws_sink,
                ws_stream,
                state,
            )
            .await;
        }
        other => {
            debug!(session_id = %session_id, msg = ?other, "Invalid binding message");
            let _ = send_direct(
                &mut ws_sink,
                &error_msg(
                    "invalid_first_message",
                    "expected create_room or join_room",
                ),
            )
            .await;
        }
    }

    info!(session_id = %session_id, "WebSocket connection closed");
}

/// Display session: owns room creation, start, and screen dimensions
async fn run_display_session(
    session_id: Uuid,
    room_id: String,
    kind: GameKind,
    config: RoomOptions,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut ws_stream: SplitStream<WebSocket>,
    state: AppState,
) {
    let (handle, _created) = match state.registry.create_or_get(&room_id, kind, config) {
        Ok(pair) => pair,
        Err(e) => {
            let _ = send_direct(&mut ws_sink, &error_msg(e.code(), &e.to_string())).await;
            return;
        }
    };

    if handle.kind != kind {
        let _ = send_direct(
            &mut ws_sink,
            &error_msg("room_conflict", "room exists with a different game type"),
        )
        .await;
        return;
    }

    let (reply_tx, reply_rx) = oneshot::channel();
    let ack = match room_request(
        &handle,
        RoomCommand::BindDisplay { reply: reply_tx },
        reply_rx,
    )
    .await
    {
        Ok(Ok(ack)) => ack,
        Ok(Err(e)) => {
            let _ = send_direct(&mut ws_sink, &error_msg(e.code(), &e.to_string())).await;
            return;
        }
        Err(()) => {
            let _ = send_direct(&mut ws_sink, &error_msg("room_closed", "room is gone")).await;
            return;
        }
    };

    let _binding = SessionBinding::bind(handle.bound_sessions.clone());
    let (private_tx, private_rx) = mpsc::channel::<ServerMsg>(PRIVATE_QUEUE_DEPTH);
    let writer = spawn_writer(session_id, ws_sink, handle.frames.subscribe(), private_rx);

    let _ = private_tx
        .send(ServerMsg::RoomCreated {
            room_id: ack.room_id.clone(),
            kind: ack.kind,
            join_url: state.config.join_url(&ack.room_id),
            max_players: ack.max_players,
        })
        .await;

    info!(session_id = %session_id, room_id = %ack.room_id, "Display bound to room");

    let rate_limiter = SessionRateLimiter::new();
    let host_player_id = ack.host_player_id;
    let mut closed_by_host = false;

    while let Some(msg) = next_client_msg(&mut ws_stream).await {
        if !rate_limiter.check_input() {
            warn!(session_id = %session_id, "Rate limited display message");
            continue;
        }
        match msg {
            ClientMsg::ScreenDimensions { width, height } => {
                let _ = handle
                    .commands
                    .send(RoomCommand::ScreenDimensions { width, height })
                    .await;
            }
            ClientMsg::StartGame => {
                let _ = handle.commands.send(RoomCommand::Start).await;
            }
            ClientMsg::CloseRoom => {
                closed_by_host = true;
                let _ = handle.commands.send(RoomCommand::Close).await;
                break;
            }
            // A participating host plays through the display connection
            ClientMsg::PlayerInput { seq, payload } if host_player_id.is_some() => {
                let player_id = host_player_id.unwrap();
                if let Err(e) = handle.intents.submit(player_id, seq, payload, unix_millis()) {
                    debug!(player_id = %player_id, error = %e, "Host intent rejected");
                }
            }
            ClientMsg::Ready { ready } if host_player_id.is_some() => {
                let _ = handle
                    .commands
                    .send(RoomCommand::Ready {
                        player_id: host_player_id.unwrap(),
                        ready,
                    })
                    .await;
            }
            ClientMsg::Ping { t } => {
                let _ = private_tx.send(ServerMsg::Pong { t }).await;
            }
            other => {
                debug!(session_id = %session_id, msg = ?other, "Unexpected display message");
                let _ = private_tx
                    .send(error_msg(
                        "unexpected_message",
                        "not valid for a display session",
                    ))
                    .await;
            }
        }
    }

    if !closed_by_host {
        let _ = handle.commands.send(RoomCommand::DisplayClosed).await;
    }

    writer.abort();
}

/// Controller session: joins a room and streams player input
#[allow(clippy::too_many_arguments)]
async fn run_controller_session(
    session_id: Uuid,
    room_id: String,
    player_name: String,
    password: Option<String>,
    reconnect_id: Option<Uuid>,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut ws_stream: SplitStream<WebSocket>,
    state: AppState,
) {
    let Some(handle) = state.registry.get(&room_id) else {
        let e = JoinError::RoomNotFound;
        let _ = send_direct(&mut ws_sink, &error_msg(e.code(), &e.to_string())).await;
        return;
    };

    let (reply_tx, reply_rx) = oneshot::channel();
    let ack: JoinAck = match room_request(
        &handle,
        RoomCommand::Join {
            player_name,
            password,
            reconnect_id,
            reply: reply_tx,
        },
        reply_rx,
    )
    .await
    {
        Ok(Ok(ack)) => ack,
        Ok(Err(e)) => {
            let _ = send_direct(&mut ws_sink, &error_msg(e.code(), &e.to_string())).await;
            return;
        }
        Err(()) => {
            let _ = send_direct(&mut ws_sink, &error_msg("room_closed", "room is gone")).await;
            return;
        }
    };

    let player_id = ack.player_id;
    let _binding = SessionBinding::bind(handle.bound_sessions.clone());
    let (private_tx, private_rx) = mpsc::channel::<ServerMsg>(PRIVATE_QUEUE_DEPTH);
    let writer = spawn_writer(session_id, ws_sink, handle.frames.subscribe(), private_rx);

    let _ = private_tx
        .send(ServerMsg::RoomJoined {
            room_id: ack.room_id.clone(),
            kind: ack.kind,
            player_id,
            player_name: ack.player_name.clone(),
            color: ack.color.clone(),
            reconnected: ack.reconnected,
        })
        .await;

    info!(
        session_id = %session_id,
        room_id = %ack.room_id,
        player_id = %player_id,
        reconnected = ack.reconnected,
        "Controller bound to room"
    );

    let rate_limiter = SessionRateLimiter::new();
    let mut left_explicitly = false;

    while let Some(msg) = next_client_msg(&mut ws_stream).await {
        if !rate_limiter.check_input() {
            warn!(session_id = %session_id, player_id = %player_id, "Rate limited input message");
            continue;
        }
        match msg {
            ClientMsg::PlayerInput { seq, payload } => {
                // Rejections are silent by design: the previous valid intent
                // stays in the register and the client is not spammed
                if let Err(e) = handle.intents.submit(player_id, seq, payload, unix_millis()) {
                    debug!(player_id = %player_id, error = %e, "Intent rejected");
                }
            }
            ClientMsg::Ready { ready } => {
                let _ = handle
                    .commands
                    .send(RoomCommand::Ready { player_id, ready })
                    .await;
            }
            ClientMsg::LeaveRoom => {
                left_explicitly = true;
                let _ = handle.commands.send(RoomCommand::Leave { player_id }).await;
                break;
            }
            ClientMsg::Ping { t } => {
                let _ = private_tx.send(ServerMsg::Pong { t }).await;
            }
            other => {
                debug!(session_id = %session_id, msg = ?other, "Unexpected controller message");
                let _ = private_tx
                    .send(error_msg(
                        "unexpected_message",
                        "not valid for a controller session",
                    ))
                    .await;
            }
        }
    }

    // A dropped socket is a disconnect with reconnect grace, not a leave
    if !left_explicitly {
        let _ = handle
            .commands
            .send(RoomCommand::Disconnect { player_id })
            .await;
    }

    writer.abort();
}

/// Send a binding command and wait for the room task's reply at its next
/// tick boundary. Err(()) means the room died underneath us.
async fn room_request<T>(
    handle: &RoomHandle,
    command: RoomCommand,
    reply_rx: oneshot::Receiver<Result<T, JoinError>>,
) -> Result<Result<T, JoinError>, ()> {
    if handle.commands.send(command).await.is_err() {
        return Err(());
    }
    match tokio::time::timeout(REPLY_TIMEOUT, reply_rx).await {
        Ok(Ok(result)) => Ok(result),
        _ => Err(()),
    }
}

/// Writer task: fans room broadcast frames and session-private messages
/// into this session's socket. A lagged receiver skips frames for this
/// session only; it never blocks the room.
fn spawn_writer(
    session_id: Uuid,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut frames: broadcast::Receiver<Arc<str>>,
    mut private_rx: mpsc::Receiver<ServerMsg>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = frames.recv() => match frame {
                    Ok(frame) => {
                        if ws_sink.send(Message::Text(frame.to_string())).await.is_err() {
                            debug!(session_id = %session_id, "WebSocket send failed");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(session_id = %session_id, lagged_count = n, "Client lagged, skipping {} frames", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(session_id = %session_id, "Room frame channel closed");
                        break;
                    }
                },
                private = private_rx.recv() => match private {
                    Some(msg) => {
                        if send_direct(&mut ws_sink, &msg).await.is_err() {
                            debug!(session_id = %session_id, "WebSocket send failed");
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    })
}

/// Read the next parseable client message; None when the socket is done
async fn next_client_msg(ws_stream: &mut SplitStream<WebSocket>) -> Option<ClientMsg> {
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMsg>(&text) {
                Ok(msg) => return Some(msg),
                Err(e) => {
                    warn!(error = %e, "Failed to parse client message");
                }
            },
            Ok(Message::Binary(_)) => {
                warn!("Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                return None;
            }
            Err(e) => {
                error!(error = %e, "WebSocket error");
                return None;
            }
        }
    }
    None
}

async fn send_direct(
    sink: &mut SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}

fn error_msg(code: &str, message: &str) -> ServerMsg {
    ServerMsg::Error {
        code: code.to_string(),
        message: message.to_string(),
    }
}
