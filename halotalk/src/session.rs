use std::sync::Arc;

use tracing::debug;

use crate::{hub::Hub, message::ClientEvent, registry::ConnectionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport open, no registry entry yet.
    Connected,
    Joined,
    /// Terminal. The registry entry is gone and further events are ignored.
    Disconnected,
}

/// Protocol state machine for a single connection.
pub struct Session {
    id: ConnectionId,
    hub: Arc<Hub>,
    state: ConnectionState,
}

impl Session {
    pub fn new(id: ConnectionId, hub: Arc<Hub>) -> Self {
        Self {
            id,
            hub,
            state: ConnectionState::Connected,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub async fn handle(&mut self, event: ClientEvent) {
        if self.state == ConnectionState::Disconnected {
            debug!(connection = self.id, ?event, "ignoring event after disconnect");
            return;
        }

        match event {
            ClientEvent::Join(username) => {
                self.hub.join(self.id, username).await;
                self.state = ConnectionState::Joined;
            }
            ClientEvent::ChatMessage(request) => self.hub.message(self.id, request.message).await,
            ClientEvent::Typing => self.hub.typing(self.id).await,
            ClientEvent::StopTyping => self.hub.stop_typing(self.id),
        }
    }

    /// Leaves the room. Calling it again is a no-op.
    pub async fn close(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        self.hub.disconnect(self.id).await;
        self.state = ConnectionState::Disconnected;
    }
}
