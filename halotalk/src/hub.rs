use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{
    Mutex,
    broadcast::{self, error::RecvError, error::TryRecvError},
};
use tracing::{debug, info, warn};

use crate::{
    message::{ChatLine, Presence, ServerEvent, timestamp_now},
    registry::{ConnectionId, Registry},
};

/// Sender name used for chat messages from connections that never joined.
pub const ANONYMOUS: &str = "Anonymous";

/// Broadcast channel buffers a modest number of events before lagging subscribers skip ahead.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 128;

/// Which live connections a broadcast is delivered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Everyone,
    AllExcept(ConnectionId),
}

impl Scope {
    fn includes(self, id: ConnectionId) -> bool {
        match self {
            Scope::Everyone => true,
            Scope::AllExcept(excluded) => excluded != id,
        }
    }
}

#[derive(Debug, Clone)]
struct Delivery {
    scope: Scope,
    event: ServerEvent,
}

/// Presence registry plus the fan-out channel every connection subscribes to.
///
/// One hub is created per server and shared as `Arc<Hub>`. Registry mutations
/// and the announcement they trigger happen under the same lock, so join and
/// leave totals reach subscribers in the order the registry changed.
pub struct Hub {
    registry: Mutex<Registry>,
    sender: broadcast::Sender<Delivery>,
    next_id: AtomicU64,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl Hub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            registry: Mutex::new(Registry::new()),
            sender,
            next_id: AtomicU64::new(1),
        }
    }

    /// Assigns a fresh connection id and subscribes it to broadcasts.
    pub fn connect(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(connection = id, "connection subscribed");
        Subscription {
            id,
            receiver: self.sender.subscribe(),
        }
    }

    pub async fn join(&self, id: ConnectionId, username: String) {
        let mut registry = self.registry.lock().await;
        if let Some(previous) = registry.record(id, username.clone()) {
            info!(connection = id, %previous, %username, "participant renamed");
        }
        let total_users = registry.size();
        info!(connection = id, %username, total_users, "participant joined");
        self.broadcast(
            Scope::Everyone,
            ServerEvent::UserJoined(Presence {
                username,
                total_users,
            }),
        );
    }

    pub async fn message(&self, id: ConnectionId, message: String) {
        let username = {
            let registry = self.registry.lock().await;
            registry.lookup(id).unwrap_or(ANONYMOUS).to_string()
        };
        self.broadcast(
            Scope::Everyone,
            ServerEvent::ChatMessage(ChatLine {
                username,
                message,
                timestamp: timestamp_now(),
            }),
        );
    }

    pub async fn typing(&self, id: ConnectionId) {
        let username = {
            let registry = self.registry.lock().await;
            registry.lookup(id).map(str::to_owned)
        };
        self.broadcast(Scope::AllExcept(id), ServerEvent::Typing(username));
    }

    pub fn stop_typing(&self, id: ConnectionId) {
        self.broadcast(Scope::AllExcept(id), ServerEvent::StopTyping);
    }

    /// Removes `id` from the registry and announces the departure.
    ///
    /// Connections that never joined, or were already removed, leave silently.
    pub async fn disconnect(&self, id: ConnectionId) -> Option<String> {
        let mut registry = self.registry.lock().await;
        let username = registry.remove(id)?;
        let total_users = registry.size();
        info!(connection = id, %username, total_users, "participant left");
        self.broadcast(
            Scope::Everyone,
            ServerEvent::UserLeft(Presence {
                username: username.clone(),
                total_users,
            }),
        );
        Some(username)
    }

    pub async fn present(&self) -> usize {
        self.registry.lock().await.size()
    }

    pub async fn lookup(&self, id: ConnectionId) -> Option<String> {
        self.registry.lock().await.lookup(id).map(str::to_owned)
    }

    pub async fn roster(&self) -> Vec<String> {
        self.registry.lock().await.names()
    }

    fn broadcast(&self, scope: Scope, event: ServerEvent) {
        let name = event.name();
        if let Err(error) = self.sender.send(Delivery { scope, event }) {
            debug!(event = name, ?error, "no live subscribers for broadcast");
        }
    }
}

/// One connection's view of the broadcast channel.
pub struct Subscription {
    id: ConnectionId,
    receiver: broadcast::Receiver<Delivery>,
}

impl Subscription {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Waits for the next event addressed to this connection.
    ///
    /// Returns `None` once the hub is gone. A subscriber that falls behind
    /// skips the events it missed and keeps going.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(delivery) if delivery.scope.includes(self.id) => return Some(delivery.event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(connection = self.id, skipped, "subscriber lagged behind broadcasts");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`Subscription::recv`]; `None` when nothing is queued.
    pub fn try_recv(&mut self) -> Option<ServerEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(delivery) if delivery.scope.includes(self.id) => return Some(delivery.event),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(connection = self.id, skipped, "subscriber lagged behind broadcasts");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}
