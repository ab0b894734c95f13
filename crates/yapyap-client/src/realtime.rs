use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use yapyap_types::events::{GatewayCommand, GatewayEvent};

use crate::error::{ClientError, Result};

/// Subscribes the client to the live events of one chat at a time.
pub trait RoomSubscriber: Send + Sync {
    fn join_room(&self, chat_id: Uuid);
    fn leave_room(&self, chat_id: Uuid);
}

/// A live gateway connection. Parsed events arrive on the receiver returned
/// by [`RealtimeClient::connect`]; it yields `None` once the socket is gone.
pub struct RealtimeClient {
    commands: mpsc::UnboundedSender<GatewayCommand>,
    task: JoinHandle<()>,
}

impl RealtimeClient {
    /// Open `ws_url` (e.g. `ws://localhost:3000/ws`) authenticated with the
    /// session token.
    pub async fn connect(
        ws_url: &str,
        token: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<GatewayEvent>)> {
        let mut request = ws_url.into_client_request()?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| ClientError::Socket(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (stream, _) = connect_async(request).await?;
        info!("connected to gateway at {}", ws_url);

        let (mut sink, mut source) = stream.split();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, mut commands_rx) = mpsc::unbounded_channel::<GatewayCommand>();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    cmd = commands_rx.recv() => {
                        // Every handle is gone: close the socket.
                        let Some(cmd) = cmd else { break };
                        let text = match serde_json::to_string(&cmd) {
                            Ok(text) => text,
                            Err(e) => {
                                error!("failed to encode gateway command: {}", e);
                                continue;
                            }
                        };
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    frame = source.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<GatewayEvent>(&text) {
                                Ok(event) => {
                                    if events_tx.send(event).is_err() {
                                        break;
                                    }
                                }
                                Err(e) => warn!("unreadable gateway event: {}", e),
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("gateway connection failed: {}", e);
                            break;
                        }
                    }
                }
            }

            let _ = sink.close().await;
            info!("gateway connection closed");
        });

        Ok((
            Self {
                commands: commands_tx,
                task,
            },
            events_rx,
        ))
    }

    pub fn is_connected(&self) -> bool {
        !self.task.is_finished()
    }

    fn send(&self, cmd: GatewayCommand) {
        debug!("gateway command {:?}", cmd);
        if self.commands.send(cmd).is_err() {
            warn!("gateway connection is closed, command dropped");
        }
    }

    /// Close the socket and wait for the connection task to finish.
    pub async fn close(self) {
        drop(self.commands);
        let _ = self.task.await;
    }
}

impl RoomSubscriber for RealtimeClient {
    fn join_room(&self, chat_id: Uuid) {
        self.send(GatewayCommand::JoinRoom { chat_id });
    }

    fn leave_room(&self, chat_id: Uuid) {
        self.send(GatewayCommand::LeaveRoom { chat_id });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn relays_events_and_room_commands() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let chat_id = Uuid::new_v4();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();

            let joined = GatewayEvent::RoomJoined { chat_id };
            let text = serde_json::to_string(&joined).unwrap();
            ws.send(Message::Text(text.into())).await.unwrap();

            loop {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => {
                        return serde_json::from_str::<GatewayCommand>(&text).unwrap();
                    }
                    Some(Ok(_)) => continue,
                    other => panic!("socket ended early: {:?}", other),
                }
            }
        });

        let (client, mut events) = RealtimeClient::connect(&format!("ws://{}/ws", addr), "token")
            .await
            .unwrap();
        assert_eq!(events.recv().await, Some(GatewayEvent::RoomJoined { chat_id }));

        client.join_room(chat_id);
        assert_eq!(server.await.unwrap(), GatewayCommand::JoinRoom { chat_id });

        client.close().await;
        assert_eq!(events.recv().await, None);
    }
}
