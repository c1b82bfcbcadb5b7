//! Broadcast groups (lobby and rooms) and per-connection forwarding

use std::collections::HashMap;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::protocol::{ConnectionId, RoomId, ServerMsg};

/// Buffered events per lobby subscriber
pub const LOBBY_CAPACITY: usize = 64;
/// Buffered events per room subscriber (about two seconds of snapshots)
pub const ROOM_CAPACITY: usize = 128;
/// Outbound queue per connection
pub const OUTBOX_CAPACITY: usize = 256;

/// A connection's outbound queue, drained by its socket writer
pub type Outbox = mpsc::Sender<ServerMsg>;

/// Send to a group; having no subscribers is not an error
pub fn publish(channel: &broadcast::Sender<ServerMsg>, msg: ServerMsg) {
    let _ = channel.send(msg);
}

/// The lobby group every `joinLobby` connection listens to
#[derive(Clone)]
pub struct Lobby {
    tx: broadcast::Sender<ServerMsg>,
}

impl Lobby {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(LOBBY_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, msg: ServerMsg) {
        publish(&self.tx, msg);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerMsg> {
        self.tx.subscribe()
    }
}

impl Default for Lobby {
    fn default() -> Self {
        Self::new()
    }
}

/// A group a connection can be subscribed to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Group {
    Lobby,
    Room(RoomId),
}

/// Forwarder tasks feeding one connection's outbox. Dropping this stops them all.
pub struct Subscriptions {
    connection: ConnectionId,
    outbox: Outbox,
    forwarders: HashMap<Group, JoinHandle<()>>,
}

impl Subscriptions {
    pub fn new(connection: ConnectionId, outbox: Outbox) -> Self {
        Self {
            connection,
            outbox,
            forwarders: HashMap::new(),
        }
    }

    /// Start forwarding a group into the outbox, replacing any earlier forwarder for it
    pub fn subscribe(&mut self, group: Group, events: broadcast::Receiver<ServerMsg>) {
        let task = tokio::spawn(forward(
            self.connection,
            group.clone(),
            events,
            self.outbox.clone(),
        ));
        if let Some(previous) = self.forwarders.insert(group, task) {
            previous.abort();
        }
    }
}

impl Drop for Subscriptions {
    fn drop(&mut self) {
        for (_, task) in self.forwarders.drain() {
            task.abort();
        }
    }
}

async fn forward(
    connection: ConnectionId,
    group: Group,
    mut events: broadcast::Receiver<ServerMsg>,
    outbox: Outbox,
) {
    loop {
        match events.recv().await {
            Ok(msg) => {
                if outbox.send(msg).await.is_err() {
                    debug!(connection = %connection, ?group, "Outbox closed");
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                // Continue - don't disconnect for lag
                warn!(connection = %connection, ?group, lagged_count = n, "Subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!(connection = %connection, ?group, "Group closed");
                break;
            }
        }
    }
}
