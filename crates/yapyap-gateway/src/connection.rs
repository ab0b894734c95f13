use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{error, info, warn};
use uuid::Uuid;

use yapyap_db::Database;
use yapyap_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a WebSocket whose JWT was already validated at the HTTP upgrade.
/// Sends Ready, then relays room events until either side goes away.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    user_id: Uuid,
    username: String,
) {
    let (mut sender, mut receiver) = socket.split();

    info!("{} ({}) connected to gateway", username, user_id);

    let ready = GatewayEvent::Ready {
        user_id,
        username: username.clone(),
    };
    if send_event(&mut sender, &ready).await.is_err() {
        return;
    }

    let (conn_id, mut events_rx) = dispatcher.register(user_id).await;

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward room events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    let Some(event) = event else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let dispatcher_recv = dispatcher.clone();
    let username_recv = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&dispatcher_recv, &db, conn_id, user_id, cmd).await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            username_recv,
                            user_id,
                            e,
                            preview(&text)
                        );
                        dispatcher_recv
                            .send_to_connection(
                                conn_id,
                                GatewayEvent::Error {
                                    message: "unrecognized command".into(),
                                },
                            )
                            .await;
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.unregister(conn_id).await;
    info!("{} ({}) disconnected from gateway", username, user_id);
}

async fn handle_command(
    dispatcher: &Dispatcher,
    db: &Arc<Database>,
    conn_id: Uuid,
    user_id: Uuid,
    cmd: GatewayCommand,
) {
    match cmd {
        GatewayCommand::JoinRoom { chat_id } => {
            let db = db.clone();
            let is_member = tokio::task::spawn_blocking(move || {
                db.is_chat_member(&chat_id.to_string(), &user_id.to_string())
            })
            .await;

            let reply = match is_member {
                Ok(Ok(true)) => {
                    dispatcher.join_room(conn_id, chat_id).await;
                    info!("{} joined room {}", user_id, chat_id);
                    GatewayEvent::RoomJoined { chat_id }
                }
                Ok(Ok(false)) => {
                    warn!("{} tried to join room {} without membership", user_id, chat_id);
                    GatewayEvent::Error {
                        message: "not a member of this chat".into(),
                    }
                }
                Ok(Err(e)) => {
                    error!("membership check failed for room {}: {}", chat_id, e);
                    GatewayEvent::Error {
                        message: "could not join room".into(),
                    }
                }
                Err(e) => {
                    error!("spawn_blocking join error: {}", e);
                    GatewayEvent::Error {
                        message: "could not join room".into(),
                    }
                }
            };
            dispatcher.send_to_connection(conn_id, reply).await;
        }

        GatewayCommand::LeaveRoom { chat_id } => {
            if dispatcher.leave_room(conn_id, chat_id).await {
                info!("{} left room {}", user_id, chat_id);
            }
            dispatcher
                .send_to_connection(conn_id, GatewayEvent::RoomLeft { chat_id })
                .await;
        }
    }
}

async fn send_event(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), ()> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            error!("failed to encode gateway event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}

/// The first 200 characters of a raw frame, for logging.
fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_stops_on_a_char_boundary() {
        let text = format!("x{}", "é".repeat(300));
        let cut = preview(&text);
        assert_eq!(cut.chars().count(), 200);
        assert!(text.starts_with(&cut));

        let long = "a".repeat(500);
        assert_eq!(preview(&long).len(), 200);
        assert_eq!(preview("short"), "short");
    }
}
