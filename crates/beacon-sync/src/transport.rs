use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use beacon_types::events::{GatewayCommand, SocketEvent};

use crate::bus::LocalEventBus;
use crate::error::SyncError;

/// Connects to the gateway, identifies with `token`, and publishes every
/// event it pushes onto `bus` until the socket closes or `shutdown` fires.
///
/// There is no reconnect: callers that need one run this in a loop and
/// refetch their queries afterwards, since events missed while offline are
/// gone.
pub async fn run(url: &str, token: &str, bus: &LocalEventBus, shutdown: CancellationToken) -> Result<(), SyncError> {
    let (stream, _) = connect_async(url)
        .await
        .map_err(|e| SyncError::Connect(e.to_string()))?;
    info!("Connected to gateway at {}", url);

    let (mut ws_tx, mut ws_rx) = stream.split();

    let identify = serde_json::to_string(&GatewayCommand::Identify {
        token: token.to_string(),
    })?;
    ws_tx.send(Message::Text(identify.into())).await?;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                info!("Gateway connection shut down");
                return Ok(());
            }
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let event: SocketEvent = match serde_json::from_str(text.as_str()) {
                        Ok(event) => event,
                        Err(e) => {
                            warn!("Dropping malformed gateway event: {}", e);
                            continue;
                        }
                    };
                    if let SocketEvent::Ready(ready) = &event {
                        info!("Gateway ready for {} in rooms {:?}", ready.username, ready.rooms);
                    }
                    bus.publish(&event);
                }
                Some(Ok(Message::Ping(payload))) => {
                    ws_tx.send(Message::Pong(payload)).await?;
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("Gateway closed the connection: {:?}", frame);
                    return Ok(());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventSource;
    use beacon_types::events::GroupRemoved;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn identifies_then_feeds_the_bus() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            let first = ws.next().await.unwrap().unwrap();
            let identify: GatewayCommand = serde_json::from_str(first.to_text().unwrap()).unwrap();

            ws.send(Message::Text("not json".into())).await.unwrap();
            let event = SocketEvent::GroupDeleted(GroupRemoved { id: "g1".into() });
            ws.send(Message::Text(serde_json::to_string(&event).unwrap().into()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
            identify
        });

        let bus = LocalEventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        let _sub = bus.on(
            SocketEvent::GROUP_DELETED,
            Arc::new(move |_: &SocketEvent| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );

        run(&format!("ws://{}", addr), "secret-token", &bus, CancellationToken::new())
            .await
            .unwrap();

        match server.await.unwrap() {
            GatewayCommand::Identify { token } => assert_eq!(token, "secret-token"),
            other => panic!("expected identify, got {:?}", other),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unreachable_gateway_is_a_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = run(&format!("ws://{}", addr), "t", &LocalEventBus::new(), CancellationToken::new()).await;
        assert!(matches!(result, Err(SyncError::Connect(_))));
    }
}
