//! WebSocket endpoint for live vehicle updates. Clients subscribe to
//! map tiles; the hub pushes per-tile delta batches, and every
//! subscribe is answered with a snapshot of the requested tiles so the
//! client can render immediately and apply deltas idempotently on top.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::hub::{Client, Hub, CLIENT_SEND_BUFFER};
use crate::models::Vehicle;
use crate::store::VehicleStore;

/// Transport-level keepalive period.
const PING_INTERVAL: Duration = Duration::from_secs(30);
/// Budget for a single socket write; a client slower than this is cut.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct WsState {
    pub hub: Arc<Hub>,
    pub store: Arc<VehicleStore>,
}

#[derive(Debug, Deserialize)]
struct ClientMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct TilesPayload {
    #[serde(rename = "tileIds")]
    tile_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
struct SnapshotMessage {
    #[serde(rename = "type")]
    kind: &'static str,
    payload: SnapshotPayload,
}

#[derive(Debug, Serialize)]
struct SnapshotPayload {
    vehicles: Vec<Vehicle>,
}

#[derive(Debug, Serialize)]
struct PongMessage {
    #[serde(rename = "type")]
    kind: &'static str,
}

pub async fn ws_vehicles(
    ws: WebSocketUpgrade,
    State(state): State<WsState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: WsState) {
    let (client, send_rx) = Client::new(Uuid::new_v4(), CLIENT_SEND_BUFFER);
    state.hub.register(client.clone()).await;

    let (sink, stream) = socket.split();
    let write_task = tokio::spawn(write_loop(sink, send_rx, client.closed()));

    read_loop(stream, &state, &client).await;

    state.hub.unregister(client).await;
    write_task.abort();
}

async fn read_loop(mut stream: SplitStream<WebSocket>, state: &WsState, client: &Arc<Client>) {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => handle_client_message(text.as_str(), state, client).await,
            Ok(Message::Close(_)) => return,
            // axum answers transport pings itself
            Ok(_) => {}
            Err(e) => {
                debug!(client_id = %client.id, error = %e, "websocket read error");
                return;
            }
        }
    }
}

async fn handle_client_message(text: &str, state: &WsState, client: &Arc<Client>) {
    let Ok(message) = serde_json::from_str::<ClientMessage>(text) else {
        debug!(client_id = %client.id, "invalid message format");
        return;
    };

    match message.kind.as_str() {
        "subscribe" => {
            let Ok(payload) = serde_json::from_value::<TilesPayload>(message.payload) else {
                return;
            };
            if payload.tile_ids.is_empty() {
                return;
            }
            state.hub.subscribe(client, &payload.tile_ids).await;
            send_snapshot(state, client, &payload.tile_ids).await;
        }
        "unsubscribe" => {
            let Ok(payload) = serde_json::from_value::<TilesPayload>(message.payload) else {
                return;
            };
            if !payload.tile_ids.is_empty() {
                state.hub.unsubscribe(client, &payload.tile_ids).await;
            }
        }
        "ping" => {
            if let Ok(frame) = serde_json::to_string(&PongMessage { kind: "pong" }) {
                client.try_send(frame);
            }
        }
        other => debug!(client_id = %client.id, kind = other, "unknown message type"),
    }
}

async fn send_snapshot(state: &WsState, client: &Arc<Client>, tile_ids: &[String]) {
    let vehicles = state.store.snapshot_for_tiles(tile_ids).await;
    let message = SnapshotMessage {
        kind: "snapshot",
        payload: SnapshotPayload { vehicles },
    };
    let Ok(frame) = serde_json::to_string(&message) else {
        return;
    };
    if !client.try_send(frame) {
        debug!(client_id = %client.id, "failed to send snapshot, buffer full");
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut send_rx: mpsc::Receiver<String>,
    closed: CancellationToken,
) {
    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.tick().await;

    loop {
        tokio::select! {
            _ = closed.cancelled() => return,
            frame = send_rx.recv() => {
                let Some(frame) = frame else { return };
                let write = tokio::time::timeout(WRITE_TIMEOUT, sink.send(Message::Text(frame.into()))).await;
                if !matches!(write, Ok(Ok(()))) {
                    return;
                }
            }
            _ = ping.tick() => {
                let write = tokio::time::timeout(WRITE_TIMEOUT, sink.send(Message::Ping(Bytes::new()))).await;
                if !matches!(write, Ok(Ok(()))) {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_decode() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"subscribe","payload":{"tileIds":["14/9148/5394","14/9149/5394"]}}"#,
        )
        .unwrap();
        assert_eq!(msg.kind, "subscribe");
        let payload: TilesPayload = serde_json::from_value(msg.payload).unwrap();
        assert_eq!(payload.tile_ids.len(), 2);

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(msg.kind, "ping");
        assert!(msg.payload.is_null());
    }

    #[test]
    fn server_messages_have_wire_shape() {
        let snapshot = SnapshotMessage {
            kind: "snapshot",
            payload: SnapshotPayload { vehicles: vec![] },
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["type"], "snapshot");
        assert!(json["payload"]["vehicles"].is_array());

        let pong = serde_json::to_value(PongMessage { kind: "pong" }).unwrap();
        assert_eq!(pong["type"], "pong");
    }
}
