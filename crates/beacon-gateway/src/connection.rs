use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};

use beacon_types::api::Claims;
use beacon_types::events::{GatewayCommand, Ready, Room, SocketEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long an unauthenticated socket may take to send `Identify`.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Rooms a user joins on connect: their own user room and their role room.
pub fn rooms_for(claims: &Claims) -> Vec<Room> {
    vec![Room::User(claims.sub), Room::Role(claims.role)]
}

/// Handle a WebSocket whose JWT was already validated at the HTTP upgrade.
pub async fn handle_connection_authenticated(socket: WebSocket, dispatcher: Dispatcher, claims: Claims) {
    let (sender, receiver) = socket.split();
    run_connection_loop(sender, receiver, dispatcher, claims).await;
}

/// Handle a WebSocket that authenticates with an `Identify` command.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, jwt_secret: String) {
    let (sender, mut receiver) = socket.split();

    let claims = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(claims) => claims,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    run_connection_loop(sender, receiver, dispatcher, claims).await;
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    claims: Claims,
) {
    let rooms = rooms_for(&claims);
    let user_id = claims.sub;
    let username = claims.username.clone();

    // Rooms are joined before `ready` goes out; events queued meanwhile follow it.
    let (conn_id, mut outbound_rx) = dispatcher.register(user_id, rooms.clone()).await;

    let ready = SocketEvent::Ready(Ready {
        user_id,
        username: username.clone(),
        rooms: rooms.iter().map(|r| r.to_string()).collect(),
    });
    let ready_text = match serde_json::to_string(&ready) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to encode ready frame: {}", e);
            dispatcher.unregister(conn_id).await;
            return;
        }
    };
    if sender.send(Message::Text(ready_text.into())).await.is_err() {
        dispatcher.unregister(conn_id).await;
        return;
    }

    info!(
        "{} ({}) connected to gateway as {} ({} open)",
        username,
        user_id,
        claims.role,
        dispatcher.connection_count().await
    );

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
                msg = outbound_rx.recv() => {
                    let Some(text) = msg else { break };
                    if sender.send(Message::Text(text.as_ref().into())).await.is_err() {
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
                    if sender.send(Message::Ping(Bytes::new())).await.is_err() {
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
                    Ok(GatewayCommand::Ping) => {
                        dispatcher_recv
                            .send_to_connection(conn_id, &SocketEvent::Pong)
                            .await;
                    }
                    Ok(GatewayCommand::Identify { .. }) => {} // Already authenticated
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            username_recv,
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
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

async fn wait_for_identify(receiver: &mut SplitStream<WebSocket>, jwt_secret: &str) -> Option<Claims> {
    use jsonwebtoken::{DecodingKey, Validation, decode};

    let identify = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) = serde_json::from_str::<GatewayCommand>(&text) {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some(token_data.claims);
                }
            }
        }
        None
    });

    identify.await.ok().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_types::models::Role;
    use uuid::Uuid;

    #[test]
    fn joins_user_and_role_rooms() {
        let claims = Claims {
            sub: Uuid::new_v4(),
            username: "sam".into(),
            role: Role::Support,
            exp: 0,
        };
        let rooms: Vec<String> = rooms_for(&claims).iter().map(|r| r.to_string()).collect();
        assert_eq!(rooms, vec![format!("user:{}", claims.sub), "role:support".to_string()]);
    }
}
