//! Fanout hub: tracks connected WebSocket clients, their tile
//! subscriptions, and routes vehicle deltas to the clients watching the
//! affected tiles. Delivery is lossy under backpressure; a client whose
//! queue is full simply misses that batch and recovers on resubscribe.

pub mod tile;

use std::collections::{HashMap, HashSet};
use std::sync::RwLock as StdRwLock;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{Vehicle, VehicleDelta};

const REGISTER_BUFFER: usize = 16;
const BROADCAST_BUFFER: usize = 256;

/// Default per-client outbound queue capacity.
pub const CLIENT_SEND_BUFFER: usize = 256;

/// One connected WebSocket client. The send queue carries pre-serialized
/// JSON frames; `closed` replaces the queue being closed on the Go-style
/// hub and stops the connection's write loop.
pub struct Client {
    pub id: Uuid,
    send: mpsc::Sender<String>,
    tiles: StdRwLock<HashSet<String>>,
    closed: CancellationToken,
}

impl Client {
    pub fn new(id: Uuid, buffer: usize) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (send, recv) = mpsc::channel(buffer);
        let client = Arc::new(Self {
            id,
            send,
            tiles: StdRwLock::new(HashSet::new()),
            closed: CancellationToken::new(),
        });
        (client, recv)
    }

    /// Non-blocking enqueue. Returns false when the queue is full or the
    /// connection is gone.
    pub fn try_send(&self, frame: String) -> bool {
        self.send.try_send(frame).is_ok()
    }

    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    fn close(&self) {
        self.closed.cancel();
    }

    fn add_tiles(&self, tile_ids: &[String]) {
        let mut tiles = self.tiles.write().unwrap();
        for id in tile_ids {
            tiles.insert(id.clone());
        }
    }

    fn remove_tiles(&self, tile_ids: &[String]) {
        let mut tiles = self.tiles.write().unwrap();
        for id in tile_ids {
            tiles.remove(id);
        }
    }

    pub fn tiles(&self) -> Vec<String> {
        self.tiles.read().unwrap().iter().cloned().collect()
    }
}

#[derive(Default)]
struct HubState {
    clients: HashMap<Uuid, Arc<Client>>,
    tile_clients: HashMap<String, HashMap<Uuid, Arc<Client>>>,
    /// Set on shutdown; a terminated hub ignores further broadcasts so a
    /// racing fanout can never write to a closed client.
    terminated: bool,
}

enum Command {
    Register(Arc<Client>),
    Unregister(Arc<Client>),
    Broadcast(Vec<VehicleDelta>),
}

pub struct Hub {
    state: RwLock<HubState>,
    register_tx: mpsc::Sender<Command>,
    broadcast_tx: mpsc::Sender<Command>,
    receivers: Mutex<Option<(mpsc::Receiver<Command>, mpsc::Receiver<Command>)>>,
}

impl Hub {
    pub fn new() -> Self {
        let (register_tx, register_rx) = mpsc::channel(REGISTER_BUFFER);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(BROADCAST_BUFFER);
        Self {
            state: RwLock::new(HubState::default()),
            register_tx,
            broadcast_tx,
            receivers: Mutex::new(Some((register_rx, broadcast_rx))),
        }
    }

    /// The single fanout actor. Runs until `shutdown` fires, then closes
    /// every client and clears the indices.
    pub async fn run(&self, shutdown: CancellationToken) {
        let Some((mut register_rx, mut broadcast_rx)) = self.receivers.lock().await.take() else {
            warn!("hub run loop started twice, ignoring");
            return;
        };

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.close_all_clients().await;
                    return;
                }
                Some(cmd) = register_rx.recv() => match cmd {
                    Command::Register(client) => {
                        let mut state = self.state.write().await;
                        if state.terminated {
                            client.close();
                            continue;
                        }
                        state.clients.insert(client.id, client.clone());
                        debug!(client_id = %client.id, total = state.clients.len(), "client registered");
                    }
                    Command::Unregister(client) => self.remove_client(&client).await,
                    Command::Broadcast(_) => unreachable!("broadcast on register channel"),
                },
                Some(cmd) = broadcast_rx.recv() => {
                    if let Command::Broadcast(deltas) = cmd {
                        self.fanout(&deltas).await;
                    }
                }
            }
        }
    }

    pub async fn register(&self, client: Arc<Client>) {
        let _ = self.register_tx.send(Command::Register(client)).await;
    }

    pub async fn unregister(&self, client: Arc<Client>) {
        let _ = self.register_tx.send(Command::Unregister(client)).await;
    }

    /// Offer a delta batch to the fanout actor. The hub channel is
    /// bounded; when it is full the whole batch is dropped, since the
    /// next poll supersedes it anyway.
    pub fn broadcast(&self, deltas: Vec<VehicleDelta>) {
        if deltas.is_empty() {
            return;
        }
        let count = deltas.len();
        if let Err(mpsc::error::TrySendError::Full(_)) =
            self.broadcast_tx.try_send(Command::Broadcast(deltas))
        {
            warn!(count, "broadcast channel full, dropping deltas");
        }
    }

    pub async fn subscribe(&self, client: &Arc<Client>, tile_ids: &[String]) {
        client.add_tiles(tile_ids);

        let mut state = self.state.write().await;
        if state.terminated {
            return;
        }
        for tile_id in tile_ids {
            state
                .tile_clients
                .entry(tile_id.clone())
                .or_default()
                .insert(client.id, client.clone());
        }
    }

    pub async fn unsubscribe(&self, client: &Arc<Client>, tile_ids: &[String]) {
        client.remove_tiles(tile_ids);

        let mut state = self.state.write().await;
        for tile_id in tile_ids {
            if let Some(subscribers) = state.tile_clients.get_mut(tile_id) {
                subscribers.remove(&client.id);
                if subscribers.is_empty() {
                    state.tile_clients.remove(tile_id);
                }
            }
        }
    }

    pub async fn client_count(&self) -> usize {
        self.state.read().await.clients.len()
    }

    async fn fanout(&self, deltas: &[VehicleDelta]) {
        let state = self.state.read().await;
        if state.terminated {
            return;
        }

        let mut per_client: HashMap<Uuid, (Arc<Client>, Vec<&VehicleDelta>)> = HashMap::new();
        for delta in deltas {
            if let Some(subscribers) = state.tile_clients.get(delta.tile_id()) {
                for (id, client) in subscribers {
                    per_client
                        .entry(*id)
                        .or_insert_with(|| (client.clone(), Vec::new()))
                        .1
                        .push(delta);
                }
            }
        }

        for (client, client_deltas) in per_client.into_values() {
            let msg = DeltaMessage::from_deltas(&client_deltas);
            let Ok(frame) = serde_json::to_string(&msg) else {
                continue;
            };
            if !client.try_send(frame) {
                debug!(client_id = %client.id, "client send buffer full, dropping message");
            }
        }
    }

    async fn remove_client(&self, client: &Arc<Client>) {
        let mut state = self.state.write().await;
        if state.clients.remove(&client.id).is_none() {
            return;
        }
        for tile_id in client.tiles() {
            if let Some(subscribers) = state.tile_clients.get_mut(&tile_id) {
                subscribers.remove(&client.id);
                if subscribers.is_empty() {
                    state.tile_clients.remove(&tile_id);
                }
            }
        }
        client.close();
        debug!(client_id = %client.id, total = state.clients.len(), "client unregistered");
    }

    async fn close_all_clients(&self) {
        let mut state = self.state.write().await;
        for client in state.clients.values() {
            client.close();
        }
        state.clients.clear();
        state.tile_clients.clear();
        state.terminated = true;
    }

    #[cfg(test)]
    async fn subscriber_count(&self, tile_id: &str) -> usize {
        self.state
            .read()
            .await
            .tile_clients
            .get(tile_id)
            .map_or(0, |s| s.len())
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct DeltaMessage {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub payload: DeltaPayload,
}

#[derive(Debug, Serialize)]
pub struct DeltaPayload {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub updates: Vec<Vehicle>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub removes: Vec<String>,
}

impl DeltaMessage {
    fn from_deltas(deltas: &[&VehicleDelta]) -> Self {
        let mut updates = Vec::new();
        let mut removes = Vec::new();
        for delta in deltas {
            match delta {
                VehicleDelta::Update { vehicle, .. } => updates.push(vehicle.clone()),
                VehicleDelta::Remove { key, .. } => removes.push(key.clone()),
            }
        }
        DeltaMessage {
            kind: "delta",
            payload: DeltaPayload { updates, removes },
        }
    }
}
