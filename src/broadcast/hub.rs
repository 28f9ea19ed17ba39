use crate::broadcast::protocol::{ClientMessage, ServerMessage, ServerPayload};
use crate::progress::{ProgressSnapshot, ProgressStore};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::MissedTickBehavior;

pub type ClientId = u64;

/// Floor for the store polling period
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Fans progress snapshots out to connected clients
///
/// Each client owns the receiving half of an unbounded channel; the registry
/// only keeps senders, so a send never waits on a slow socket.
pub struct Broadcaster {
    store: ProgressStore,
    clients: Mutex<HashMap<ClientId, UnboundedSender<ServerMessage>>>,
    next_id: AtomicU64,
    last_broadcast: Mutex<Option<ProgressSnapshot>>,
}

impl Broadcaster {
    #[must_use]
    pub fn new(store: ProgressStore) -> Self {
        Self {
            store,
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            last_broadcast: Mutex::new(None),
        }
    }

    pub fn register(&self) -> (ClientId, UnboundedReceiver<ServerMessage>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.clients.lock().insert(id, tx);
        tracing::debug!("Client {id} connected");
        (id, rx)
    }

    pub fn unregister(&self, id: ClientId) {
        if self.clients.lock().remove(&id).is_some() {
            tracing::debug!("Client {id} disconnected");
        }
    }

    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    #[must_use]
    pub fn current(&self) -> ProgressSnapshot {
        self.store.load()
    }

    /// Send to one client; a closed client is dropped from the registry
    pub fn send_to(&self, id: ClientId, message: ServerMessage) -> bool {
        let mut clients = self.clients.lock();
        let Some(tx) = clients.get(&id) else {
            return false;
        };
        if tx.send(message).is_ok() {
            true
        } else {
            clients.remove(&id);
            false
        }
    }

    /// Deliver to every client, returning how many received it
    pub fn broadcast(&self, message: &ServerMessage) -> usize {
        let mut clients = self.clients.lock();
        clients.retain(|id, tx| {
            let delivered = tx.send(message.clone()).is_ok();
            if !delivered {
                tracing::debug!("Dropping client {id}: channel closed");
            }
            delivered
        });
        clients.len()
    }

    /// Push the store's snapshot if it changed since the last push
    pub fn tick(&self) -> bool {
        let snapshot = self.store.load();

        {
            let mut last = self.last_broadcast.lock();
            if last.as_ref() == Some(&snapshot) {
                return false;
            }
            *last = Some(snapshot.clone());
        }

        let delivered = self.broadcast(&ServerMessage::progress(snapshot));
        tracing::trace!("Progress pushed to {delivered} clients");
        true
    }

    /// Poll the store every `interval` until `shutdown` resolves
    pub async fn run<S>(&self, interval: Duration, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        if interval.is_zero() {
            tracing::warn!("Poll interval of 0 ms is not allowed, using {MIN_POLL_INTERVAL:?}");
        }
        let mut ticker = tokio::time::interval(interval.max(MIN_POLL_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::debug!("Broadcaster stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick();
                }
            }
        }
    }

    /// Answer one client message
    #[must_use]
    pub fn handle_message(&self, text: &str) -> ServerMessage {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(ClientMessage::Ping) => ServerMessage::new(ServerPayload::Pong),
            Ok(ClientMessage::Subscribe { channel }) => {
                ServerMessage::new(ServerPayload::Subscribed { channel })
            }
            Ok(ClientMessage::GetProgress) => ServerMessage::progress(self.store.load()),
            Err(e) => ServerMessage::error(format!("Invalid message: {e}")),
        }
    }
}
