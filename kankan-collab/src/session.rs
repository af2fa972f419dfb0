//! One locally open board: document, persistence and room, kept convergent.
//!
//! ```text
//!                 ┌─────────────── BoardSession ───────────────┐
//!   RoomEvent ──► │ room task ── vector ──► diff ── update ──► │ ──► RoomLink
//!                 │     │                                      │
//!                 │     └─ update ──► apply(Remote(tag)) ─┐    │
//!                 │                                       ▼    │
//!   local edit ─► │ BoardDocument ── observer ──► projection   │
//!                 │                     │    └──► listener     │
//!                 │                     └── broadcast unless   │ ──► RoomLink
//!                 │                         Remote(own tag)    │
//!                 └────────────────────────────────────────────┘
//! ```

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use kankan_core::{
    is_empty_update, now_millis, BoardDocument, BoardProjection, BoardSummary, NetworkTag,
    ObserverId, Origin, Replica,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::SyncConfig;
use crate::protocol::{ProtocolError, SyncAction, SyncMessage};
use crate::storage::{BoardPersistence, BoardStore, StoreError};
use crate::transport::{PeerId, RoomEvent, RoomLink, Transport};

/// Receives board-level consequences of committed changes.
pub trait SessionListener: Send + Sync {
    /// Called after every committed transaction on `board_id`.
    fn board_changed(&self, board_id: &str, summary: BoardSummary, doc_name: Option<String>);
}

pub struct BoardSession {
    board_id: String,
    document: Arc<BoardDocument>,
    persistence: BoardPersistence,
    tag: NetworkTag,
    link: Arc<dyn RoomLink>,
    peers: Arc<RwLock<HashSet<PeerId>>>,
    projection: Arc<RwLock<BoardProjection>>,
    listener: Arc<dyn SessionListener>,
    observer: Mutex<Option<ObserverId>>,
    room_task: Mutex<Option<JoinHandle<()>>>,
    ready: watch::Sender<bool>,
}

impl std::fmt::Debug for BoardSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoardSession")
            .field("board_id", &self.board_id)
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}

fn send_sync(link: &dyn RoomLink, target: Option<PeerId>, message: SyncMessage) {
    match message.body() {
        Ok(body) => link.send(target, message.action.name(), &body),
        Err(e) => log::warn!("Failed to encode {} message: {e}", message.action.name()),
    }
}

impl BoardSession {
    /// Create the document, attach persistence, join the board room and
    /// start exchanging state with peers. Must run inside a tokio runtime.
    ///
    /// The session is not ready until [`prepare`](Self::prepare) completes.
    pub fn start(
        board_id: &str,
        config: &SyncConfig,
        store: Arc<BoardStore>,
        transport: &dyn Transport,
        listener: Arc<dyn SessionListener>,
    ) -> Result<Arc<Self>, ProtocolError> {
        let document = Arc::new(BoardDocument::new(board_id));
        let persistence = BoardPersistence::attach(store, config.board_key(board_id), &document);
        let room = transport.join(&config.app_id, board_id)?;
        let (ready, _) = watch::channel(false);

        let session = Arc::new(Self {
            board_id: board_id.to_string(),
            document,
            persistence,
            tag: NetworkTag::new(),
            link: room.link,
            peers: Arc::new(RwLock::new(HashSet::new())),
            projection: Arc::new(RwLock::new(BoardProjection::default())),
            listener,
            observer: Mutex::new(None),
            room_task: Mutex::new(None),
            ready,
        });

        let observer = session.document.observe(Self::change_observer(&session));
        *session.observer.lock().unwrap_or_else(PoisonError::into_inner) = Some(observer);

        let task = tokio::spawn(Self::run_room(
            Arc::downgrade(&session.document),
            session.link.clone(),
            session.tag,
            session.peers.clone(),
            room.events,
            session.board_id.clone(),
        ));
        *session.room_task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);

        log::info!("Board {board_id} joined room {}/{board_id} as {}", config.app_id, session.tag);
        Ok(session)
    }

    /// Observer run after every committed transaction.
    fn change_observer(session: &Arc<Self>) -> kankan_core::UpdateObserver {
        let weak = Arc::downgrade(session);
        let link = session.link.clone();
        let tag = session.tag;
        Arc::new(move |update: &[u8], origin: Origin| {
            if let Some(session) = weak.upgrade() {
                session.reproject();
            }
            // Updates that arrived from our own room are already known there.
            if origin.is_network(tag) {
                return;
            }
            send_sync(link.as_ref(), None, SyncMessage::update(update.to_vec()));
        })
    }

    async fn run_room(
        document: Weak<BoardDocument>,
        link: Arc<dyn RoomLink>,
        tag: NetworkTag,
        peers: Arc<RwLock<HashSet<PeerId>>>,
        mut events: mpsc::UnboundedReceiver<RoomEvent>,
        board_id: String,
    ) {
        // Ask whoever is already here for what we lack.
        if let Some(document) = document.upgrade() {
            send_sync(link.as_ref(), None, SyncMessage::vector(document.state_vector()));
        }

        while let Some(event) = events.recv().await {
            let Some(document) = document.upgrade() else {
                break;
            };
            match event {
                RoomEvent::PeerJoined(peer) => {
                    peers.write().unwrap_or_else(PoisonError::into_inner).insert(peer);
                    log::info!("Peer {peer} joined board {board_id}");
                    let vector = SyncMessage::vector(document.state_vector());
                    send_sync(link.as_ref(), Some(peer), vector);
                }
                RoomEvent::PeerLeft(peer) => {
                    peers.write().unwrap_or_else(PoisonError::into_inner).remove(&peer);
                    log::info!("Peer {peer} left board {board_id}");
                }
                RoomEvent::Message { from, action, body } => {
                    let message = match SyncMessage::parse(&action, &body) {
                        Ok(message) => message,
                        Err(e) => {
                            log::warn!(
                                "Dropping malformed '{action}' from {from} on {board_id}: {e}"
                            );
                            continue;
                        }
                    };
                    if message.bytes.is_empty() {
                        continue;
                    }
                    match message.action {
                        SyncAction::Vector => match document.diff(&message.bytes) {
                            Ok(diff) if !is_empty_update(&diff) => {
                                log::debug!(
                                    "Sending {} byte delta to {from} on {board_id}",
                                    diff.len()
                                );
                                send_sync(link.as_ref(), Some(from), SyncMessage::update(diff));
                            }
                            Ok(_) => {}
                            Err(e) => log::warn!("Bad state vector from {from} on {board_id}: {e}"),
                        },
                        SyncAction::Update => {
                            if let Err(e) = document.apply(&message.bytes, Origin::Remote(tag)) {
                                log::warn!("Dropping bad update from {from} on {board_id}: {e}");
                            }
                        }
                    }
                }
            }
        }
        log::debug!("Room event stream for board {board_id} ended");
    }

    /// Replay persisted state, optionally seed the default columns, and
    /// publish the first projection.
    pub async fn prepare(&self, seed_defaults: bool) {
        self.persistence.load().await;
        if seed_defaults && self.document.seed_default_columns() {
            log::debug!("Seeded default columns for board {}", self.board_id);
        }
        self.reproject();
    }

    /// Rebuild the projection and report the change to the listener.
    pub fn reproject(&self) {
        let projection = self.document.projection(now_millis());
        let summary = projection.summary();
        *self.projection.write().unwrap_or_else(PoisonError::into_inner) = projection;
        self.listener
            .board_changed(&self.board_id, summary, self.document.name());
    }

    pub fn mark_ready(&self) {
        self.ready.send_replace(true);
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    pub async fn wait_ready(&self) {
        let mut ready = self.ready.subscribe();
        let _ = ready.wait_for(|ready| *ready).await;
    }

    pub fn board_id(&self) -> &str {
        &self.board_id
    }

    /// The replicated document; mutate it to edit the board.
    pub fn document(&self) -> &Arc<BoardDocument> {
        &self.document
    }

    pub fn local_peer(&self) -> PeerId {
        self.link.local_peer()
    }

    pub fn projection(&self) -> BoardProjection {
        self.projection.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn summary(&self) -> BoardSummary {
        self.projection.read().unwrap_or_else(PoisonError::into_inner).summary()
    }

    /// Recompute relative-age labels. Returns true if any label changed.
    pub fn refresh_age_labels(&self, now: i64) -> bool {
        self.projection
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .refresh_age_labels(now)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Tear the session down: delete stored data, leave the room and stop
    /// reacting to document changes.
    pub fn shutdown(&self) -> Result<(), StoreError> {
        if let Some(id) = self.observer.lock().unwrap_or_else(PoisonError::into_inner).take() {
            self.document.unobserve(id);
        }
        self.link.leave();
        if let Some(task) = self.room_task.lock().unwrap_or_else(PoisonError::into_inner).take() {
            task.abort();
        }
        self.peers.write().unwrap_or_else(PoisonError::into_inner).clear();
        log::info!("Board session {} shut down", self.board_id);
        self.persistence.clear()
    }
}

impl Drop for BoardSession {
    fn drop(&mut self) {
        self.link.leave();
        let task = self.room_task.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::transport::MemoryNetwork;
    use kankan_core::CardDraft;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    #[derive(Default)]
    struct RecordingListener {
        changes: Mutex<Vec<(String, BoardSummary, Option<String>)>>,
    }

    impl SessionListener for RecordingListener {
        fn board_changed(&self, board_id: &str, summary: BoardSummary, doc_name: Option<String>) {
            self.changes.lock().unwrap().push((board_id.to_string(), summary, doc_name));
        }
    }

    fn open_store() -> (TempDir, Arc<BoardStore>) {
        let dir = tempdir().unwrap();
        let store = BoardStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();
        (dir, Arc::new(store))
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_prepare_seeds_and_projects() {
        let (_dir, store) = open_store();
        let network = MemoryNetwork::new();
        let listener = Arc::new(RecordingListener::default());

        let config = SyncConfig::default();
        let session =
            BoardSession::start("b1", &config, store, &network, listener.clone()).unwrap();
        assert!(!session.is_ready());
        session.prepare(true).await;
        session.mark_ready();
        session.wait_ready().await;

        let projection = session.projection();
        assert_eq!(projection.columns.len(), 4);
        assert_eq!(session.summary(), BoardSummary { column_count: 4, card_count: 0 });

        let changes = listener.changes.lock().unwrap();
        let last = changes.last().unwrap();
        assert_eq!(last.0, "b1");
        assert_eq!(last.1.column_count, 4);
        assert_eq!(last.2, None);
    }

    #[tokio::test]
    async fn test_two_sessions_converge() {
        let (_dir_a, store_a) = open_store();
        let (_dir_b, store_b) = open_store();
        let network = MemoryNetwork::new();
        let config = SyncConfig::default();
        let listener = Arc::new(RecordingListener::default());

        let a =
            BoardSession::start("shared", &config, store_a, &network, listener.clone()).unwrap();
        a.prepare(true).await;
        let b =
            BoardSession::start("shared", &config, store_b, &network, listener.clone()).unwrap();
        b.prepare(false).await;

        eventually(|| b.summary().column_count == 4).await;
        eventually(|| a.peer_count() == 1 && b.peer_count() == 1).await;

        let backlog = b.projection().column_named("Backlog").unwrap().id.clone();
        b.document()
            .create_card(&backlog, &CardDraft { title: "From B".into(), ..CardDraft::default() })
            .unwrap();
        eventually(|| a.summary().card_count == 1).await;
        let card_ids = |s: &BoardSession| -> Vec<String> {
            s.projection()
                .columns
                .iter()
                .flat_map(|c| c.cards.iter().map(|k| k.id.clone()))
                .collect()
        };
        assert_eq!(card_ids(&a), card_ids(&b));
        assert_eq!(a.projection().column_named("Backlog").unwrap().cards[0].title, "From B");
    }

    #[tokio::test]
    async fn test_shutdown_leaves_room_and_clears_store() {
        let (_dir, store) = open_store();
        let network = MemoryNetwork::new();
        let config = SyncConfig::default();
        let listener = Arc::new(RecordingListener::default());

        let session =
            BoardSession::start("gone", &config, store.clone(), &network, listener).unwrap();
        session.prepare(true).await;
        assert!(store.board_exists(&config.board_key("gone")).unwrap());
        assert_eq!(network.member_count(&config.app_id, "gone"), 1);

        session.shutdown().unwrap();
        assert_eq!(network.member_count(&config.app_id, "gone"), 0);
        assert!(!store.board_exists(&config.board_key("gone")).unwrap());

        // Edits after teardown are neither stored nor sent.
        let before = network.stats().actions_sent;
        session.document().add_column("late");
        assert_eq!(network.stats().actions_sent, before);
        assert!(store.load_board(&config.board_key("gone")).unwrap().is_empty());
    }
}
