//! In-process transport.
//!
//! Rooms live in a shared map; each member owns an unbounded event channel.
//! Used for tests and for running several replicas inside one process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use uuid::Uuid;

use super::{PeerId, RoomEvent, RoomHandle, RoomKey, RoomLink, Transport};
use crate::protocol::ProtocolError;

type Members = HashMap<PeerId, mpsc::UnboundedSender<RoomEvent>>;

/// Delivery counters for a network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkStats {
    /// Actions handed to `send`
    pub actions_sent: u64,
    /// Individual deliveries into member channels
    pub deliveries: u64,
}

#[derive(Default)]
struct NetworkState {
    rooms: Mutex<HashMap<RoomKey, Members>>,
    actions_sent: AtomicU64,
    deliveries: AtomicU64,
}

impl NetworkState {
    fn rooms(&self) -> std::sync::MutexGuard<'_, HashMap<RoomKey, Members>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared in-memory room registry. Clones share rooms.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<NetworkState>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of members currently in `(app_id, room)`.
    pub fn member_count(&self, app_id: &str, room: &str) -> usize {
        self.state
            .rooms()
            .get(&RoomKey::new(app_id, room))
            .map_or(0, HashMap::len)
    }

    pub fn room_count(&self) -> usize {
        self.state.rooms().len()
    }

    pub fn stats(&self) -> NetworkStats {
        NetworkStats {
            actions_sent: self.state.actions_sent.load(Ordering::Relaxed),
            deliveries: self.state.deliveries.load(Ordering::Relaxed),
        }
    }
}

impl Transport for MemoryNetwork {
    fn join(&self, app_id: &str, room: &str) -> Result<RoomHandle, ProtocolError> {
        let key = RoomKey::new(app_id, room);
        let peer_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut rooms = self.state.rooms();
            let members = rooms.entry(key.clone()).or_default();
            // Both sides learn about each other, as with a real P2P room.
            for (existing, channel) in members.iter() {
                let _ = channel.send(RoomEvent::PeerJoined(peer_id));
                let _ = tx.send(RoomEvent::PeerJoined(*existing));
            }
            members.insert(peer_id, tx);
        }
        log::debug!("Peer {peer_id} joined memory room {key}");

        let link = MemoryLink {
            state: self.state.clone(),
            key,
            peer_id,
            left: AtomicBool::new(false),
        };
        Ok(RoomHandle {
            link: Arc::new(link),
            events: rx,
        })
    }
}

struct MemoryLink {
    state: Arc<NetworkState>,
    key: RoomKey,
    peer_id: PeerId,
    left: AtomicBool,
}

impl RoomLink for MemoryLink {
    fn local_peer(&self) -> PeerId {
        self.peer_id
    }

    fn send(&self, target: Option<PeerId>, action: &str, body: &str) {
        if self.left.load(Ordering::Acquire) {
            return;
        }
        self.state.actions_sent.fetch_add(1, Ordering::Relaxed);

        let rooms = self.state.rooms();
        let Some(members) = rooms.get(&self.key) else {
            return;
        };
        let event = RoomEvent::Message {
            from: self.peer_id,
            action: action.to_string(),
            body: body.to_string(),
        };
        for (peer, channel) in members {
            if *peer == self.peer_id || target.is_some_and(|t| t != *peer) {
                continue;
            }
            if channel.send(event.clone()).is_ok() {
                self.state.deliveries.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn leave(&self) {
        if self.left.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut rooms = self.state.rooms();
        if let Some(members) = rooms.get_mut(&self.key) {
            members.remove(&self.peer_id);
            for channel in members.values() {
                let _ = channel.send(RoomEvent::PeerLeft(self.peer_id));
            }
            if members.is_empty() {
                rooms.remove(&self.key);
            }
        }
        log::debug!("Peer {} left memory room {}", self.peer_id, self.key);
    }
}

impl Drop for MemoryLink {
    fn drop(&mut self) {
        self.leave();
    }
}
