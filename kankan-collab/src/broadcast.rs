//! Relay-side fan-out of frames to the members of a room.
//!
//! Every room shares one tokio broadcast channel; each member holds an
//! independent receiver buffering up to `capacity` frames. Each receiving
//! side filters with [`RelayFrame::is_for`], which skips the sender and
//! honours the target.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::protocol::RelayFrame;

/// The members of a single relay room.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<RelayFrame>>,
    peers: RwLock<HashSet<Uuid>>,
}

impl BroadcastGroup {
    /// `capacity` frames can be buffered per member before it starts lagging.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            peers: RwLock::new(HashSet::new()),
        }
    }

    /// Add a member and return its receiver along with the members that
    /// were already present.
    pub async fn add_peer(
        &self,
        peer_id: Uuid,
    ) -> (broadcast::Receiver<Arc<RelayFrame>>, Vec<Uuid>) {
        let mut peers = self.peers.write().await;
        let existing = peers.iter().copied().filter(|p| *p != peer_id).collect();
        peers.insert(peer_id);
        (self.sender.subscribe(), existing)
    }

    pub async fn remove_peer(&self, peer_id: &Uuid) -> bool {
        self.peers.write().await.remove(peer_id)
    }

    /// Returns the number of receivers the frame was queued for.
    pub fn broadcast(&self, frame: RelayFrame) -> usize {
        self.sender.send(Arc::new(frame)).unwrap_or(0)
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }
}

/// Maps room keys to broadcast groups so rooms stay isolated.
pub struct RoomManager {
    rooms: RwLock<HashMap<String, Arc<BroadcastGroup>>>,
    default_capacity: usize,
}

impl RoomManager {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            default_capacity,
        }
    }

    /// Get or create the group for `room`.
    pub async fn get_or_create(&self, room: &str) -> Arc<BroadcastGroup> {
        // Fast path: read lock
        {
            let rooms = self.rooms.read().await;
            if let Some(group) = rooms.get(room) {
                return group.clone();
            }
        }

        let mut rooms = self.rooms.write().await;
        // Double-check after acquiring write lock
        if let Some(group) = rooms.get(room) {
            return group.clone();
        }
        let group = Arc::new(BroadcastGroup::new(self.default_capacity));
        rooms.insert(room.to_string(), group.clone());
        group
    }

    pub async fn get(&self, room: &str) -> Option<Arc<BroadcastGroup>> {
        self.rooms.read().await.get(room).cloned()
    }

    /// Drop `room` if nobody is left in it.
    pub async fn remove_if_empty(&self, room: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        if let Some(group) = rooms.get(room) {
            if group.peer_count().await == 0 {
                rooms.remove(room);
                return true;
            }
        }
        false
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}
