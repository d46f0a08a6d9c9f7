//! Live Subscriber Channel
//!
//! Each upgraded connection becomes one hub subscription. Frames are sent
//! as binary WebSocket messages exactly as the hub published them (one
//! zlib-compressed JSON batch per upstream message). Inbound text and
//! binary messages are ignored; a close frame, a socket error, server
//! shutdown or deregistration by the hub ends the connection.

use std::net::SocketAddr;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};

use super::ApiState;
use crate::infrastructure::broadcast::SubscriberError;

/// Upgrade to a live subscriber connection.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<ApiState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, remote, state))
}

async fn handle_socket(socket: WebSocket, remote: SocketAddr, state: ApiState) {
    let mut subscription = state.hub.register(Some(remote));
    let subscriber_id = subscription.id();
    let (mut sender, mut receiver) = socket.split();

    let reason = loop {
        tokio::select! {
            () = state.shutdown.cancelled() => {
                let _ = sender
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::AWAY,
                        reason: "server shutting down".into(),
                    })))
                    .await;
                break "shutdown";
            }
            frame = subscription.recv() => match frame {
                Ok(frame) => {
                    if sender.send(Message::Binary(frame)).await.is_err() {
                        break "send failed";
                    }
                }
                Err(SubscriberError::Lagged { .. }) => {
                    let _ = sender
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::POLICY,
                            reason: "subscriber too slow".into(),
                        })))
                        .await;
                    break "lagged";
                }
                Err(SubscriberError::Closed | SubscriberError::HubClosed) => break "closed by hub",
            },
            inbound = receiver.next() => match inbound {
                Some(Ok(Message::Close(_))) | None => break "client closed",
                Some(Err(_)) => break "socket error",
                Some(Ok(_)) => {}
            },
        }
    };

    drop(subscription);
    tracing::debug!(subscriber_id = %subscriber_id, %remote, reason, "Subscriber connection ended");
}
