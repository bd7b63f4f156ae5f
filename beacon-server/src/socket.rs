//! WebSocket transport for the relay.
//!
//! One task per socket: inbound text frames are parsed into
//! [`InboundEvent`]s and handed to the relay, and events the relay addresses
//! to this connection are written back out. Narration jobs are spawned so the
//! socket keeps reading while a narrative is generated.

use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
};
use beacon_core::{BeaconRelay, InboundEvent, OutboundEvent};
use tracing::{debug, warn};

use crate::routes::AppState;

pub async fn beacon_socket(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_socket(socket, state.relay, addr))
}

async fn serve_socket(mut socket: WebSocket, relay: BeaconRelay, addr: SocketAddr) {
    let mut conn = relay.connect(addr.to_string()).await;

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match InboundEvent::from_frame(text.as_str()) {
                            Ok(event) => {
                                debug!(connection = %conn.id, event = event.name(), "Inbound event");
                                if let Some(job) = relay.handle(conn.id, event).await {
                                    tokio::spawn(job.run());
                                }
                            }
                            Err(e) => {
                                warn!(connection = %conn.id, error = %e, "Malformed event");
                                let reply = OutboundEvent::error(format!("Malformed event: {e}"));
                                if send_event(&mut socket, &reply).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                        break;
                    }
                    _ => {}
                }
            }
            outgoing = conn.events.recv() => {
                let Some(event) = outgoing else {
                    break;
                };
                if send_event(&mut socket, &event).await.is_err() {
                    break;
                }
            }
        }
    }

    relay.disconnect(conn.id).await;
}

async fn send_event(socket: &mut WebSocket, event: &OutboundEvent) -> Result<(), axum::Error> {
    let payload = event.to_frame().map_err(axum::Error::new)?;
    socket.send(Message::Text(payload.into())).await
}
