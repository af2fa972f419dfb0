//! Room-scoped peer channels.
//!
//! A room is addressed by `(app_id, room)`. Joining returns a [`RoomHandle`]:
//! a [`RoomLink`] for sending named actions and a stream of [`RoomEvent`]s
//! for membership changes and incoming actions. Delivery is best-effort and
//! unacknowledged; a send to a departed peer is silently dropped.
//!
//! ```text
//!   BoardSession ── RoomLink::send ──►┌───────────────┐──► peers
//!        ▲                            │ MemoryNetwork │
//!        └──── RoomEvent stream ◄─────│ RelayTransport│◄── peers
//!                                     └───────────────┘
//! ```

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::ProtocolError;

pub mod memory;
pub mod relay;

pub use memory::MemoryNetwork;
pub use relay::RelayTransport;

/// Transport-assigned identity of a room member.
pub type PeerId = Uuid;

/// Namespaced room address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomKey {
    pub app_id: String,
    pub room: String,
}

impl RoomKey {
    pub fn new(app_id: &str, room: &str) -> Self {
        Self {
            app_id: app_id.to_string(),
            room: room.to_string(),
        }
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.app_id, self.room)
    }
}

/// Something that happened in a joined room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    PeerJoined(PeerId),
    PeerLeft(PeerId),
    Message {
        from: PeerId,
        action: String,
        body: String,
    },
}

/// Sending half of a joined room.
pub trait RoomLink: Send + Sync {
    /// Our own identity in the room.
    fn local_peer(&self) -> PeerId;

    /// Send `action` to `target`, or to every other member when `None`.
    fn send(&self, target: Option<PeerId>, action: &str, body: &str);

    /// Leave the room. Later sends are dropped.
    fn leave(&self);
}

/// A joined room.
pub struct RoomHandle {
    pub link: Arc<dyn RoomLink>,
    pub events: mpsc::UnboundedReceiver<RoomEvent>,
}

/// Factory for room memberships.
pub trait Transport: Send + Sync {
    fn join(&self, app_id: &str, room: &str) -> Result<RoomHandle, ProtocolError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_key_display() {
        let key = RoomKey::new("wf-kanban", "board-1");
        assert_eq!(key.to_string(), "wf-kanban/board-1");
        assert_ne!(key, RoomKey::new("other", "board-1"));
    }
}
