//! Network transport abstractions for grid synchronization.
//!
//! Replicas never talk to each other directly. Each one connects to a relay
//! that keeps an ordered log of every update per room, answers a sync request
//! with that backlog and forwards new updates to the other members of the
//! room. [`MemoryRelay`] is an in-process relay used by tests, the simulation
//! and the CLI.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};
use ulid::Ulid;

/// Unique identifier for a peer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh, collision-resistant peer id.
    pub fn random() -> Self {
        Self(Ulid::new().to_string())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reachability of the relay as seen by one replica.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Reachable,
    Connecting,
    Unreachable,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Reachable => write!(f, "reachable"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Unreachable => write!(f, "unreachable"),
        }
    }
}

/// Messages exchanged with the relay.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Ask for every update the room has seen.
    SyncRequest { room: String },
    /// The room's backlog, oldest first.
    SyncResponse { room: String, updates: Vec<Vec<u8>> },
    /// One encoded update.
    Update { room: String, payload: Vec<u8> },
}

/// Network error type.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Relay unreachable")]
    Unreachable,

    #[error("Not connected")]
    NotConnected,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Incoming messages already subscribed")]
    AlreadySubscribed,
}

impl NetworkError {
    /// Whether the error is an outage that a later reconnect can fix.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            NetworkError::Unreachable | NetworkError::NotConnected | NetworkError::SendFailed(_)
        )
    }
}

/// Abstract network transport trait.
#[async_trait]
pub trait NetworkTransport: Send + Sync + 'static {
    /// Open the connection to the relay.
    async fn connect(&self) -> Result<(), NetworkError>;

    /// Close the connection to the relay.
    async fn disconnect(&self) -> Result<(), NetworkError>;

    /// Send a message to the relay.
    async fn send(&self, message: Message) -> Result<(), NetworkError>;

    /// Current reachability.
    fn status(&self) -> ConnectionStatus;

    /// Take the stream of incoming messages. Can only be done once.
    fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<Message>, NetworkError>;
}

#[derive(Debug, Default)]
struct Room {
    /// Every update the room has seen, in arrival order.
    log: Vec<Vec<u8>>,
    members: HashSet<PeerId>,
}

#[derive(Debug)]
struct RelayState {
    reachable: bool,
    connections: HashMap<PeerId, mpsc::UnboundedSender<Message>>,
    rooms: HashMap<String, Room>,
}

/// In-memory room server.
#[derive(Clone, Debug)]
pub struct MemoryRelay {
    state: Arc<RwLock<RelayState>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(RelayState {
                reachable: true,
                connections: HashMap::new(),
                rooms: HashMap::new(),
            })),
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.state.read().reachable
    }

    /// Simulate an outage or its end. Going down drops every connection.
    pub fn set_reachable(&self, reachable: bool) {
        let mut state = self.state.write();
        state.reachable = reachable;
        if !reachable {
            state.connections.clear();
            for room in state.rooms.values_mut() {
                room.members.clear();
            }
        }
        info!(reachable, "relay reachability changed");
    }

    /// Whether `peer` holds an open connection.
    pub fn is_connected(&self, peer: &PeerId) -> bool {
        self.state.read().connections.contains_key(peer)
    }

    /// Number of updates logged for `room`.
    pub fn backlog_len(&self, room: &str) -> usize {
        self.state
            .read()
            .rooms
            .get(room)
            .map(|room| room.log.len())
            .unwrap_or(0)
    }

    /// Peers currently subscribed to `room`.
    pub fn members(&self, room: &str) -> Vec<PeerId> {
        self.state
            .read()
            .rooms
            .get(room)
            .map(|room| room.members.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn open(&self, peer: PeerId, inbound: mpsc::UnboundedSender<Message>) -> Result<(), NetworkError> {
        let mut state = self.state.write();
        if !state.reachable {
            return Err(NetworkError::Unreachable);
        }
        debug!(%peer, "peer connected to relay");
        state.connections.insert(peer, inbound);
        Ok(())
    }

    fn close(&self, peer: &PeerId) {
        let mut state = self.state.write();
        state.connections.remove(peer);
        for room in state.rooms.values_mut() {
            room.members.remove(peer);
        }
    }

    fn handle(&self, from: &PeerId, message: Message) -> Result<(), NetworkError> {
        let mut state = self.state.write();
        if !state.reachable {
            return Err(NetworkError::Unreachable);
        }
        let RelayState {
            connections, rooms, ..
        } = &mut *state;
        let sender = connections.get(from).ok_or(NetworkError::NotConnected)?;

        match message {
            Message::SyncRequest { room } => {
                let entry = rooms.entry(room.clone()).or_default();
                entry.members.insert(from.clone());
                debug!(%from, %room, backlog = entry.log.len(), "answering sync request");
                sender
                    .send(Message::SyncResponse {
                        room,
                        updates: entry.log.clone(),
                    })
                    .map_err(|e| NetworkError::SendFailed(e.to_string()))
            }
            Message::Update { room, payload } => {
                let entry = rooms.entry(room.clone()).or_default();
                entry.log.push(payload.clone());
                for member in entry.members.iter().filter(|member| *member != from) {
                    if let Some(tx) = connections.get(member) {
                        // A closed receiver only means that member went away
                        let _ = tx.send(Message::Update {
                            room: room.clone(),
                            payload: payload.clone(),
                        });
                    }
                }
                Ok(())
            }
            Message::SyncResponse { .. } => Ok(()),
        }
    }
}

impl Default for MemoryRelay {
    fn default() -> Self {
        Self::new()
    }
}

/// Type alias for the message receiver shared across threads.
type SharedMessageReceiver = Arc<RwLock<Option<mpsc::UnboundedReceiver<Message>>>>;

/// A replica's connection to a [`MemoryRelay`].
pub struct MemoryTransport {
    local_id: PeerId,
    relay: MemoryRelay,
    status: RwLock<ConnectionStatus>,
    inbound_tx: mpsc::UnboundedSender<Message>,
    inbound_rx: SharedMessageReceiver,
}

impl MemoryTransport {
    pub fn new(local_id: PeerId, relay: &MemoryRelay) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            local_id,
            relay: relay.clone(),
            status: RwLock::new(ConnectionStatus::Unreachable),
            inbound_tx: tx,
            inbound_rx: Arc::new(RwLock::new(Some(rx))),
        }
    }

    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    pub fn relay(&self) -> &MemoryRelay {
        &self.relay
    }
}

#[async_trait]
impl NetworkTransport for MemoryTransport {
    async fn connect(&self) -> Result<(), NetworkError> {
        *self.status.write() = ConnectionStatus::Connecting;
        match self.relay.open(self.local_id.clone(), self.inbound_tx.clone()) {
            Ok(()) => {
                *self.status.write() = ConnectionStatus::Reachable;
                Ok(())
            }
            Err(e) => {
                *self.status.write() = ConnectionStatus::Unreachable;
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> Result<(), NetworkError> {
        self.relay.close(&self.local_id);
        *self.status.write() = ConnectionStatus::Unreachable;
        Ok(())
    }

    async fn send(&self, message: Message) -> Result<(), NetworkError> {
        if self.status() != ConnectionStatus::Reachable {
            return Err(NetworkError::NotConnected);
        }
        self.relay.handle(&self.local_id, message).map_err(|e| {
            *self.status.write() = ConnectionStatus::Unreachable;
            e
        })
    }

    fn status(&self) -> ConnectionStatus {
        let status = *self.status.read();
        // The relay may have dropped us since the last call
        if status == ConnectionStatus::Reachable && !self.relay.is_connected(&self.local_id) {
            return ConnectionStatus::Unreachable;
        }
        status
    }

    fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<Message>, NetworkError> {
        self.inbound_rx
            .write()
            .take()
            .ok_or(NetworkError::AlreadySubscribed)
    }
}

/// Create a relay and `count` transports attached to it.
pub fn create_network(count: usize) -> (MemoryRelay, Vec<MemoryTransport>) {
    let relay = MemoryRelay::new();
    let transports = (0..count)
        .map(|i| MemoryTransport::new(PeerId::new(format!("peer-{}", i)), &relay))
        .collect();
    (relay, transports)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(payload: &[u8]) -> Message {
        Message::Update {
            room: "room".to_string(),
            payload: payload.to_vec(),
        }
    }

    fn sync_request() -> Message {
        Message::SyncRequest {
            room: "room".to_string(),
        }
    }

    #[tokio::test]
    async fn test_connect_and_status() {
        let (_relay, transports) = create_network(1);
        let transport = &transports[0];

        assert_eq!(transport.status(), ConnectionStatus::Unreachable);
        transport.connect().await.unwrap();
        assert_eq!(transport.status(), ConnectionStatus::Reachable);
        transport.disconnect().await.unwrap();
        assert_eq!(transport.status(), ConnectionStatus::Unreachable);
    }

    #[tokio::test]
    async fn test_sync_request_returns_backlog() {
        let (relay, transports) = create_network(2);
        let (a, b) = (&transports[0], &transports[1]);

        a.connect().await.unwrap();
        a.send(sync_request()).await.unwrap();
        a.send(update(b"one")).await.unwrap();
        a.send(update(b"two")).await.unwrap();
        assert_eq!(relay.backlog_len("room"), 2);

        let mut rx = b.subscribe().unwrap();
        b.connect().await.unwrap();
        b.send(sync_request()).await.unwrap();

        assert_eq!(
            rx.recv().await,
            Some(Message::SyncResponse {
                room: "room".to_string(),
                updates: vec![b"one".to_vec(), b"two".to_vec()],
            })
        );
    }

    #[tokio::test]
    async fn test_updates_are_forwarded_to_other_members() {
        let (_relay, transports) = create_network(2);
        let (a, b) = (&transports[0], &transports[1]);
        let mut rx_a = a.subscribe().unwrap();
        let mut rx_b = b.subscribe().unwrap();

        for t in [a, b] {
            t.connect().await.unwrap();
            t.send(sync_request()).await.unwrap();
        }
        rx_a.recv().await.unwrap();
        rx_b.recv().await.unwrap();

        a.send(update(b"x")).await.unwrap();
        assert_eq!(rx_b.recv().await, Some(update(b"x")));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_outage_drops_connections() {
        let (relay, transports) = create_network(1);
        let transport = &transports[0];
        transport.connect().await.unwrap();

        relay.set_reachable(false);
        assert_eq!(transport.status(), ConnectionStatus::Unreachable);
        assert_eq!(
            transport.send(update(b"lost")).await,
            Err(NetworkError::NotConnected)
        );
        assert_eq!(transport.connect().await, Err(NetworkError::Unreachable));

        relay.set_reachable(true);
        transport.connect().await.unwrap();
        assert_eq!(transport.status(), ConnectionStatus::Reachable);
    }

    #[test]
    fn test_subscribe_once() {
        let (_relay, transports) = create_network(1);
        assert!(transports[0].subscribe().is_ok());
        assert_eq!(
            transports[0].subscribe().unwrap_err(),
            NetworkError::AlreadySubscribed
        );
    }
}
