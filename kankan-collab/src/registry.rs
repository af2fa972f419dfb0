//! Application root: the board directory plus the cache of open sessions.
//!
//! Sessions are created on demand, at most one per board id, and live until
//! the board is deleted. Every session reports committed changes back here
//! so board summaries and names learned from peers stay current even for
//! boards that are not being looked at.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use kankan_core::{
    build_join_url, consume_join_param, BoardDirectory, BoardEntry, BoardSummary, JoinRequest,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::session::{BoardSession, SessionListener};
use crate::storage::BoardStore;
use crate::transport::Transport;

/// State shared between the registry and its sessions' observers.
struct RegistryShared {
    store: Arc<BoardStore>,
    directory_key: String,
    directory: RwLock<BoardDirectory>,
    summaries: RwLock<HashMap<String, BoardSummary>>,
}

impl RegistryShared {
    fn persist_directory(&self) {
        let json = self.directory.read().unwrap_or_else(PoisonError::into_inner).to_json();
        if let Err(e) = self.store.save_directory(&self.directory_key, &json) {
            log::error!("Failed to persist board directory: {e}");
        }
    }

    /// Apply `f` to the directory and persist it if `f` reports a change.
    fn update_directory<R>(&self, f: impl FnOnce(&mut BoardDirectory) -> (R, bool)) -> R {
        let (result, changed) = {
            let mut directory = self.directory.write().unwrap_or_else(PoisonError::into_inner);
            f(&mut directory)
        };
        if changed {
            self.persist_directory();
        }
        result
    }

    fn entry(&self, board_id: &str) -> Option<BoardEntry> {
        self.directory
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(board_id)
            .cloned()
    }
}

impl SessionListener for RegistryShared {
    fn board_changed(&self, board_id: &str, summary: BoardSummary, doc_name: Option<String>) {
        self.summaries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(board_id.to_string(), summary);

        if let Some(name) = doc_name {
            let adopted = self.update_directory(|directory| {
                let changed = directory.adopt_document_name(board_id, &name);
                (changed, changed)
            });
            if adopted {
                log::info!("Board {board_id} is now named '{name}'");
            }
        }
    }
}

/// Readiness chain of a freshly created session.
async fn prepare(shared: Arc<RegistryShared>, session: Arc<BoardSession>, seed_defaults: bool) {
    session.prepare(seed_defaults).await;

    let board_id = session.board_id();
    let document = session.document();
    if let Some(entry) = shared.entry(board_id) {
        // A locally named board gives its name to a nameless document.
        if !entry.placeholder && document.name().is_none() {
            document.seed_name(&entry.name);
        }
    }
    if let Some(name) = document.name() {
        shared.update_directory(|directory| {
            let changed = directory.adopt_document_name(board_id, &name);
            ((), changed)
        });
    }

    session.mark_ready();
    log::info!("Board {board_id} ready");
}

pub struct SessionRegistry {
    config: SyncConfig,
    store: Arc<BoardStore>,
    transport: Arc<dyn Transport>,
    shared: Arc<RegistryShared>,
    sessions: Mutex<HashMap<String, Arc<BoardSession>>>,
}

impl SessionRegistry {
    /// Load the board directory from `store`. Unreadable data yields an
    /// empty directory.
    pub fn new(config: SyncConfig, store: Arc<BoardStore>, transport: Arc<dyn Transport>) -> Self {
        let directory = match store.load_directory(&config.directory_key) {
            Ok(Some(json)) => BoardDirectory::from_json(&json),
            Ok(None) => BoardDirectory::new(),
            Err(e) => {
                log::warn!("Could not read board directory: {e}");
                BoardDirectory::new()
            }
        };
        log::info!("Loaded {} boards from directory", directory.len());

        let shared = Arc::new(RegistryShared {
            store: store.clone(),
            directory_key: config.directory_key.clone(),
            directory: RwLock::new(directory),
            summaries: RwLock::new(HashMap::new()),
        });
        Self {
            config,
            store,
            transport,
            shared,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Known boards, sorted by name.
    pub fn boards(&self) -> Vec<BoardEntry> {
        self.shared
            .directory
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries()
            .to_vec()
    }

    pub fn board(&self, board_id: &str) -> Option<BoardEntry> {
        self.shared.entry(board_id)
    }

    /// Return the session for `board_id`, creating and preparing it first if
    /// needed. `None` for an empty id or a board missing from the directory.
    ///
    /// The readiness chain of a new session runs on its own task, so a
    /// caller dropped mid-load never leaves a session that cannot become
    /// ready.
    pub async fn ensure_session(
        &self,
        board_id: &str,
        seed_defaults: bool,
    ) -> Option<Arc<BoardSession>> {
        let board_id = board_id.trim();
        if board_id.is_empty() || self.shared.entry(board_id).is_none() {
            return None;
        }

        let session = {
            let mut sessions = self.sessions.lock().await;
            // Double-check under the lock: another caller may have won.
            match sessions.get(board_id) {
                Some(session) => session.clone(),
                None => {
                    let listener: Arc<dyn SessionListener> = self.shared.clone();
                    let session = match BoardSession::start(
                        board_id,
                        &self.config,
                        self.store.clone(),
                        self.transport.as_ref(),
                        listener,
                    ) {
                        Ok(session) => session,
                        Err(e) => {
                            log::warn!("Could not open board {board_id}: {e}");
                            return None;
                        }
                    };
                    sessions.insert(board_id.to_string(), session.clone());
                    tokio::spawn(prepare(self.shared.clone(), session.clone(), seed_defaults));
                    session
                }
            }
        };

        session.wait_ready().await;
        Some(session)
    }

    /// Create a new board with default columns.
    pub async fn create_board(&self, name: &str) -> Option<(BoardEntry, Arc<BoardSession>)> {
        let entry = BoardEntry::new(Uuid::new_v4().to_string(), name);
        self.shared.update_directory(|directory| {
            directory.insert(entry.clone());
            ((), true)
        });
        log::info!("Created board {} ('{}')", entry.id, entry.name);

        // The readiness chain seeds the document name from the entry.
        let session = self.ensure_session(&entry.id, true).await?;
        Some((entry, session))
    }

    /// Open a board shared by someone else. Unknown ids get a placeholder
    /// entry until the board's name arrives from a peer.
    pub async fn join_board_by_id(&self, board_id: &str) -> Option<Arc<BoardSession>> {
        let board_id = board_id.trim();
        if board_id.is_empty() {
            return None;
        }
        let added = self.shared.update_directory(|directory| {
            let added = directory.ensure_placeholder(board_id);
            (added, added)
        });
        if added {
            log::info!("Joining unknown board {board_id} with a placeholder entry");
        }
        self.ensure_session(board_id, false).await
    }

    /// Join the board named by an invite link.
    pub async fn join_from_invite(&self, link: &str) -> Option<(JoinRequest, Arc<BoardSession>)> {
        let request = consume_join_param(link)?;
        let session = self.join_board_by_id(&request.board_id).await?;
        Some((request, session))
    }

    pub fn invite_url(&self, board_id: &str) -> Result<String, url::ParseError> {
        build_join_url(&self.config.invite_base, board_id)
    }

    /// Rename a board locally and in its replicated document. Blank names
    /// keep the current name. Returns the resulting name.
    pub async fn rename_board(&self, board_id: &str, name: &str) -> Option<String> {
        let renamed = self.shared.update_directory(|directory| {
            let renamed = directory.rename(board_id, name);
            let changed = renamed.is_some();
            (renamed, changed)
        })?;
        self.update_board_doc_name(board_id, &renamed).await;
        Some(renamed)
    }

    /// Write `name` into the board's document if it differs.
    pub async fn update_board_doc_name(&self, board_id: &str, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        let Some(session) = self.ensure_session(board_id, false).await else {
            return false;
        };
        if session.document().name().as_deref() == Some(name) {
            return false;
        }
        session.document().set_name(name)
    }

    /// Delete a board: its stored data, its room membership, its session and
    /// its directory entry.
    pub async fn delete_board(&self, board_id: &str) -> bool {
        let session = self.sessions.lock().await.remove(board_id);
        let had_session = session.is_some();
        match session {
            Some(session) => {
                if let Err(e) = session.shutdown() {
                    log::error!("Failed to clear stored data of {board_id}: {e}");
                }
            }
            None => {
                if let Err(e) = self.store.clear_board(&self.config.board_key(board_id)) {
                    log::error!("Failed to clear stored data of {board_id}: {e}");
                }
            }
        }

        let removed = self.shared.update_directory(|directory| {
            let removed = directory.remove(board_id).is_some();
            (removed, removed)
        });
        self.shared
            .summaries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(board_id);

        if removed || had_session {
            log::info!("Deleted board {board_id}");
        }
        removed || had_session
    }

    pub fn summary(&self, board_id: &str) -> Option<BoardSummary> {
        self.shared
            .summaries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(board_id)
            .copied()
    }

    pub fn summaries(&self) -> HashMap<String, BoardSummary> {
        self.shared.summaries.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Connected peers of a board; zero when it has no session.
    pub async fn peer_count(&self, board_id: &str) -> usize {
        self.sessions
            .lock()
            .await
            .get(board_id)
            .map_or(0, |session| session.peer_count())
    }

    pub async fn session(&self, board_id: &str) -> Option<Arc<BoardSession>> {
        self.sessions.lock().await.get(board_id).cloned()
    }

    /// Refresh age labels of every open board. Returns the ids whose labels
    /// changed.
    pub async fn refresh_age_labels(&self, now: i64) -> Vec<String> {
        self.sessions
            .lock()
            .await
            .iter()
            .filter(|(_, session)| session.refresh_age_labels(now))
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::transport::MemoryNetwork;
    use tempfile::{tempdir, TempDir};
    use tokio::time::{timeout, Duration};

    fn registry(network: &MemoryNetwork) -> (TempDir, SessionRegistry) {
        let dir = tempdir().unwrap();
        let config = StoreConfig::for_testing(dir.path().join("db"));
        let store = Arc::new(BoardStore::open(config).unwrap());
        let transport = Arc::new(network.clone());
        (dir, SessionRegistry::new(SyncConfig::default(), store, transport))
    }

    #[tokio::test]
    async fn test_ensure_session_requires_directory_entry() {
        let network = MemoryNetwork::new();
        let (_dir, registry) = registry(&network);
        assert!(registry.ensure_session("", true).await.is_none());
        assert!(registry.ensure_session("unknown", true).await.is_none());
        assert_eq!(network.room_count(), 0);
    }

    #[tokio::test]
    async fn test_create_board_seeds_columns_and_name() {
        let network = MemoryNetwork::new();
        let (_dir, registry) = registry(&network);

        let (entry, session) = registry.create_board("  Roadmap ").await.unwrap();
        assert_eq!(entry.name, "Roadmap");
        assert!(!entry.placeholder);
        assert!(session.is_ready());
        assert_eq!(session.document().name().as_deref(), Some("Roadmap"));
        assert_eq!(
            registry.summary(&entry.id),
            Some(BoardSummary { column_count: 4, card_count: 0 })
        );

        // Cached: the same session comes back.
        let again = registry.ensure_session(&entry.id, true).await.unwrap();
        assert!(Arc::ptr_eq(&session, &again));
    }

    #[tokio::test]
    async fn test_join_unknown_board_adds_placeholder() {
        let network = MemoryNetwork::new();
        let (_dir, registry) = registry(&network);

        let session = registry.join_board_by_id(" 9f8e7d6c5b ").await.unwrap();
        assert_eq!(session.board_id(), "9f8e7d6c5b");
        let entry = registry.board("9f8e7d6c5b").unwrap();
        assert_eq!(entry.name, "Shared Board (9f8e7d)");
        assert!(entry.placeholder);
        // Nothing seeded; the board waits for peers.
        assert_eq!(session.summary().column_count, 0);
        assert_eq!(session.document().name(), None);
    }

    #[tokio::test]
    async fn test_rename_updates_document() {
        let network = MemoryNetwork::new();
        let (_dir, registry) = registry(&network);
        let (entry, session) = registry.create_board("Old").await.unwrap();

        assert_eq!(registry.rename_board(&entry.id, "New").await.as_deref(), Some("New"));
        assert_eq!(session.document().name().as_deref(), Some("New"));
        assert_eq!(registry.board(&entry.id).unwrap().name, "New");
        assert_eq!(registry.rename_board("missing", "x").await, None);
    }

    #[tokio::test]
    async fn test_delete_board_clears_everything() {
        let network = MemoryNetwork::new();
        let (_dir, registry) = registry(&network);
        let (entry, _session) = registry.create_board("Temp").await.unwrap();
        let key = registry.config().board_key(&entry.id);
        assert!(registry.store.board_exists(&key).unwrap());

        assert!(registry.delete_board(&entry.id).await);
        assert!(registry.board(&entry.id).is_none());
        assert!(registry.summary(&entry.id).is_none());
        assert!(registry.session(&entry.id).await.is_none());
        assert_eq!(registry.peer_count(&entry.id).await, 0);
        assert!(!registry.store.board_exists(&key).unwrap());
        assert_eq!(network.member_count("wf-kanban", &entry.id), 0);
        assert!(!registry.delete_board(&entry.id).await);
    }

    #[tokio::test]
    async fn test_directory_survives_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        let network = MemoryNetwork::new();
        let id = {
            let store = Arc::new(BoardStore::open(StoreConfig::for_testing(&path)).unwrap());
            let transport = Arc::new(network.clone());
            let registry = SessionRegistry::new(SyncConfig::default(), store, transport);
            let (entry, _) = registry.create_board("Keep").await.unwrap();
            registry.delete_board("never-existed").await;
            entry.id
        };

        let store = Arc::new(BoardStore::open(StoreConfig::for_testing(&path)).unwrap());
        let transport = Arc::new(MemoryNetwork::new());
        let registry = SessionRegistry::new(SyncConfig::default(), store, transport);
        assert_eq!(registry.boards().len(), 1);
        let session = registry.ensure_session(&id, false).await.unwrap();
        assert_eq!(session.summary().column_count, 4);
        assert_eq!(session.document().name().as_deref(), Some("Keep"));
    }

    #[tokio::test]
    async fn test_abandoned_open_still_becomes_ready() {
        let network = MemoryNetwork::new();
        let (_dir, registry) = registry(&network);
        registry.shared.update_directory(|directory| {
            directory.insert(BoardEntry::new("abandoned".to_string(), "Abandoned"));
            ((), true)
        });

        // The first caller gives up before the board has loaded.
        let _ = timeout(Duration::ZERO, registry.ensure_session("abandoned", true)).await;

        let session = timeout(Duration::from_secs(5), registry.ensure_session("abandoned", true))
            .await
            .expect("second open completes")
            .unwrap();
        assert!(session.is_ready());
        assert_eq!(session.summary().column_count, 4);
        assert_eq!(session.document().name().as_deref(), Some("Abandoned"));
    }

    #[tokio::test]
    async fn test_invite_url() {
        let network = MemoryNetwork::new();
        let (_dir, registry) = registry(&network);
        assert_eq!(
            registry.invite_url("abc").unwrap(),
            "https://kankan-demo.netlify.app/?joinBoard=abc"
        );
    }
}
