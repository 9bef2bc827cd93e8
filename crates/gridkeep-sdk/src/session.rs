//! Session management for a collaboratively edited grid.
//!
//! A [`SheetSession`] drives one replica of a grid document over a
//! transport. Local edits apply immediately and queue encoded updates in an
//! outbox; nothing waits for the network. The outbox drains whenever the
//! relay is reachable, so a replica keeps working offline and catches up
//! on reconnect.

use crate::error::{Result, SdkError};
use crate::network::{ConnectionStatus, Message, NetworkTransport};
use futures::stream::{self, Stream};
use gridkeep_sheet::{Grid, GridPolicy};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, warn};

/// Events emitted by a session.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// Reachability of the relay changed.
    StatusChanged(ConnectionStatus),
    /// The first sync after connecting finished. Fired once per session.
    SyncCompleted {
        /// Whether the session created the default document.
        seeded: bool,
    },
    /// The projected grid changed.
    GridChanged(Grid),
}

/// Configuration for a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Room on the relay holding the document.
    pub room: String,
    /// Flush the outbox after connecting and after processing incoming updates.
    pub auto_flush: bool,
    /// Capacity of the event channel.
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            room: "removeKeep".to_string(),
            auto_flush: true,
            event_capacity: 100,
        }
    }
}

/// Builder for session configuration.
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
        }
    }

    pub fn room(mut self, room: impl Into<String>) -> Self {
        self.config.room = room.into();
        self
    }

    pub fn auto_flush(mut self, enabled: bool) -> Self {
        self.config.auto_flush = enabled;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn build(self) -> SessionConfig {
        self.config
    }
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// One replica of a grid document bound to a transport.
pub struct SheetSession<P: GridPolicy + 'static, T: NetworkTransport> {
    config: SessionConfig,
    policy: Arc<RwLock<P>>,
    transport: Arc<T>,
    incoming: Mutex<mpsc::UnboundedReceiver<Message>>,
    outbox: RwLock<VecDeque<Vec<u8>>>,
    synced: AtomicBool,
    last_status: RwLock<ConnectionStatus>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl<P: GridPolicy + 'static, T: NetworkTransport> SheetSession<P, T> {
    /// Create a session. Takes over the transport's incoming messages.
    pub fn new(policy: P, transport: Arc<T>, config: SessionConfig) -> Result<Self> {
        let incoming = transport.subscribe()?;
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let last_status = transport.status();

        Ok(Self {
            config,
            policy: Arc::new(RwLock::new(policy)),
            transport,
            incoming: Mutex::new(incoming),
            outbox: RwLock::new(VecDeque::new()),
            synced: AtomicBool::new(false),
            last_status: RwLock::new(last_status),
            event_tx,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Shared handle to the document.
    pub fn policy(&self) -> Arc<RwLock<P>> {
        self.policy.clone()
    }

    pub fn replica_id(&self) -> String {
        self.policy.read().replica_id().to_string()
    }

    /// Current projection of the document.
    pub fn grid(&self) -> Grid {
        self.policy.read().grid().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.transport.status()
    }

    /// Whether the first sync has completed.
    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    /// Number of encoded updates waiting to be sent.
    pub fn pending(&self) -> usize {
        self.outbox.read().len()
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Session events as a stream. Lagged events are skipped.
    pub fn events(&self) -> impl Stream<Item = SessionEvent> {
        stream::unfold(self.event_tx.subscribe(), |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "session event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
    }

    /// Connect to the relay and request the room's backlog.
    ///
    /// An unreachable relay is not an error; the returned status says so and
    /// local editing continues.
    pub async fn connect(&self) -> Result<ConnectionStatus> {
        self.emit_status(ConnectionStatus::Connecting);
        if let Err(e) = self.transport.connect().await {
            warn!(error = %e, "connect failed");
            return Ok(self.refresh_status());
        }

        let request = Message::SyncRequest {
            room: self.config.room.clone(),
        };
        if let Err(e) = self.transport.send(request).await {
            warn!(error = %e, "sync request failed");
        }
        let status = self.refresh_status();

        if self.config.auto_flush {
            self.flush().await?;
        }
        Ok(status)
    }

    /// Disconnect from the relay. Local edits keep queueing.
    pub async fn disconnect(&self) -> Result<()> {
        self.transport.disconnect().await?;
        self.refresh_status();
        Ok(())
    }

    /// Drop the connection and connect again.
    pub async fn reconnect(&self) -> Result<ConnectionStatus> {
        self.disconnect().await?;
        self.connect().await
    }

    /// Send queued updates while the relay is reachable.
    ///
    /// Returns the number of updates sent; the rest stay queued.
    pub async fn flush(&self) -> Result<usize> {
        let mut sent = 0;
        loop {
            if self.transport.status() != ConnectionStatus::Reachable {
                break;
            }
            let next = self.outbox.write().pop_front();
            let Some(payload) = next else {
                break;
            };
            let message = Message::Update {
                room: self.config.room.clone(),
                payload: payload.clone(),
            };
            match self.transport.send(message).await {
                Ok(()) => sent += 1,
                Err(e) if e.is_transient() => {
                    warn!(error = %e, "send failed, keeping update queued");
                    self.outbox.write().push_front(payload);
                    break;
                }
                Err(e) => {
                    self.outbox.write().push_front(payload);
                    return Err(e.into());
                }
            }
        }
        self.refresh_status();
        if sent > 0 {
            debug!(sent, pending = self.pending(), "flushed outbox");
        }
        Ok(sent)
    }

    /// Apply every message that has already arrived.
    ///
    /// Returns the number of messages handled.
    pub async fn process_incoming(&self) -> Result<usize> {
        let mut handled = 0;
        {
            let mut incoming = self.incoming.lock().await;
            while let Ok(message) = incoming.try_recv() {
                self.handle_message(message)?;
                handled += 1;
            }
        }
        if handled > 0 && self.config.auto_flush {
            self.flush().await?;
        }
        Ok(handled)
    }

    /// Wait for the next message and apply it.
    ///
    /// Returns `false` once the transport has gone away for good.
    pub async fn process_next(&self) -> Result<bool> {
        let message = {
            let mut incoming = self.incoming.lock().await;
            incoming.recv().await
        };
        let Some(message) = message else {
            return Ok(false);
        };
        self.handle_message(message)?;
        if self.config.auto_flush {
            self.flush().await?;
        }
        Ok(true)
    }

    fn handle_message(&self, message: Message) -> Result<()> {
        match message {
            Message::SyncResponse { room, updates } if room == self.config.room => {
                self.with_policy(|policy| {
                    for payload in &updates {
                        apply_payload(policy, payload);
                    }
                })?;
                if !self.synced.swap(true, Ordering::SeqCst) {
                    self.complete_sync()?;
                }
            }
            Message::Update { room, payload } if room == self.config.room => {
                self.with_policy(|policy| apply_payload(policy, &payload))?;
            }
            other => debug!(?other, "ignoring message for another room"),
        }
        Ok(())
    }

    /// Seed an empty document, otherwise rebuild the view from what arrived.
    fn complete_sync(&self) -> Result<()> {
        let mut seeded = false;
        self.with_policy(|policy| {
            if !policy.is_seeded() {
                policy.seed();
                seeded = true;
            }
        })?;
        info!(replica = %self.replica_id(), seeded, "sync completed");
        let _ = self.event_tx.send(SessionEvent::SyncCompleted { seeded });
        Ok(())
    }

    /// Write a cell value at a position.
    pub fn edit_cell(&self, row: usize, col: usize, value: &str) -> Result<()> {
        self.mutate(|policy| policy.edit_cell(row, col, value))
    }

    /// Write a column label at a position.
    pub fn edit_label(&self, col: usize, value: &str) -> Result<()> {
        self.mutate(|policy| policy.edit_label(col, value))
    }

    pub fn insert_row(&self, at: usize) -> Result<()> {
        self.mutate(|policy| policy.insert_row(at))
    }

    pub fn insert_col(&self, at: usize) -> Result<()> {
        self.mutate(|policy| policy.insert_col(at))
    }

    pub fn delete_row(&self, at: usize) -> Result<()> {
        self.mutate(|policy| policy.delete_row(at))
    }

    pub fn delete_col(&self, at: usize) -> Result<()> {
        self.mutate(|policy| policy.delete_col(at))
    }

    fn mutate<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut P) -> gridkeep_sheet::Result<()>,
    {
        let mut outcome = Ok(());
        self.with_policy(|policy| outcome = f(policy))?;
        outcome.map_err(SdkError::from)
    }

    /// Run `f` on the document, then queue its updates and announce grid changes.
    fn with_policy<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut P),
    {
        let (encoded, grid) = {
            let mut policy = self.policy.write();
            let before = policy.grid().clone();
            f(&mut *policy);
            let encoded = policy.take_encoded()?;
            let after = policy.grid();
            (encoded, (after != &before).then(|| after.clone()))
        };

        if !encoded.is_empty() {
            self.outbox.write().extend(encoded);
        }
        if let Some(grid) = grid {
            let _ = self.event_tx.send(SessionEvent::GridChanged(grid));
        }
        Ok(())
    }

    fn emit_status(&self, status: ConnectionStatus) {
        let mut last = self.last_status.write();
        if *last != status {
            info!(%status, "connection status changed");
            *last = status;
            let _ = self.event_tx.send(SessionEvent::StatusChanged(status));
        }
    }

    fn refresh_status(&self) -> ConnectionStatus {
        let status = self.transport.status();
        self.emit_status(status);
        status
    }
}

/// Decode and integrate one payload; malformed payloads are skipped.
fn apply_payload<P: GridPolicy>(policy: &mut P, payload: &[u8]) {
    if let Err(e) = policy.apply_encoded(payload) {
        warn!(error = %e, "dropping undecodable update");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{MemoryRelay, MemoryTransport, PeerId};
    use gridkeep_sheet::KeepSheet;

    fn session(
        relay: &MemoryRelay,
        name: &str,
    ) -> SheetSession<KeepSheet, MemoryTransport> {
        let transport = Arc::new(MemoryTransport::new(PeerId::new(name), relay));
        SheetSession::new(KeepSheet::new(name), transport, SessionConfig::default()).unwrap()
    }

    #[test]
    fn test_config_builder() {
        let config = SessionConfigBuilder::new()
            .room("sheet-1")
            .auto_flush(false)
            .event_capacity(8)
            .build();

        assert_eq!(config.room, "sheet-1");
        assert!(!config.auto_flush);
        assert_eq!(config.event_capacity, 8);
    }

    #[tokio::test]
    async fn test_first_sync_seeds_empty_room() {
        let relay = MemoryRelay::new();
        let alice = session(&relay, "alice");

        assert_eq!(alice.connect().await.unwrap(), ConnectionStatus::Reachable);
        assert_eq!(alice.process_incoming().await.unwrap(), 1);

        assert!(alice.is_synced());
        assert_eq!(alice.grid().row_count(), 3);
        assert_eq!(alice.pending(), 0);
        assert_eq!(relay.backlog_len("removeKeep"), 1);
    }

    #[tokio::test]
    async fn test_local_edits_queue_while_offline() {
        let relay = MemoryRelay::new();
        let alice = session(&relay, "alice");
        alice.connect().await.unwrap();
        alice.process_incoming().await.unwrap();

        alice.disconnect().await.unwrap();
        alice.edit_cell(0, 0, "offline").unwrap();
        assert_eq!(alice.grid().cell(0, 0), Some("offline"));
        assert_eq!(alice.flush().await.unwrap(), 0);
        assert_eq!(alice.pending(), 1);

        alice.connect().await.unwrap();
        assert_eq!(alice.pending(), 0);
        assert_eq!(relay.backlog_len("removeKeep"), 2);
    }

    #[tokio::test]
    async fn test_rejected_edit_is_an_error() {
        let relay = MemoryRelay::new();
        let alice = session(&relay, "alice");
        alice.connect().await.unwrap();
        alice.process_incoming().await.unwrap();

        assert!(matches!(
            alice.delete_row(7),
            Err(SdkError::Sheet(gridkeep_sheet::SheetError::IndexOutOfBounds { .. }))
        ));
        assert_eq!(alice.pending(), 0);
    }
}
