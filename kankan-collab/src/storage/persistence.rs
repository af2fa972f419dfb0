//! Binds one board document to the durable store.
//!
//! ```text
//!  BoardStore ──load (blocking worker)──► BoardDocument   Origin::Persistence
//!  BoardStore ◄──append_update────────── observer         any other origin
//!             ◄──compact (every N)─────
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use kankan_core::{BoardDocument, ObserverId, Origin, Replica};

use super::rocks::{BoardStore, StoreError};

pub struct BoardPersistence {
    store: Arc<BoardStore>,
    board_key: String,
    document: Weak<BoardDocument>,
    observer: Mutex<Option<ObserverId>>,
    closed: Arc<AtomicBool>,
    loaded: Arc<AtomicBool>,
}

impl BoardPersistence {
    /// Start persisting every non-persistence update of `document` under
    /// `board_key`. Call [`load`](Self::load) to replay stored state.
    ///
    /// Updates arriving before the load finishes are logged, but the log is
    /// not compacted until the document holds the stored state.
    pub fn attach(
        store: Arc<BoardStore>,
        board_key: String,
        document: &Arc<BoardDocument>,
    ) -> Self {
        let closed = Arc::new(AtomicBool::new(false));
        let loaded = Arc::new(AtomicBool::new(false));
        let threshold = store.config().compaction_threshold.max(1);

        let observer = {
            let store = store.clone();
            let key = board_key.clone();
            let closed = closed.clone();
            let loaded = loaded.clone();
            let weak = Arc::downgrade(document);
            document.observe(Arc::new(move |update: &[u8], origin: Origin| {
                if origin == Origin::Persistence || closed.load(Ordering::Acquire) {
                    return;
                }
                let meta = match store.append_update(&key, update) {
                    Ok(meta) => meta,
                    Err(e) => {
                        log::error!("Failed to persist update for {key}: {e}");
                        return;
                    }
                };
                if meta.update_count < threshold || !loaded.load(Ordering::Acquire) {
                    return;
                }
                let Some(document) = weak.upgrade() else {
                    return;
                };
                // Everything up to this update is contained in the snapshot.
                let snapshot = document.encode_state();
                if let Err(e) = store.compact(&key, &snapshot, meta.next_seq - 1) {
                    log::error!("Failed to compact {key}: {e}");
                }
            }))
        };

        Self {
            store,
            board_key,
            document: Arc::downgrade(document),
            observer: Mutex::new(Some(observer)),
            closed,
            loaded,
        }
    }

    /// Replay stored state into the document.
    ///
    /// Missing or unreadable data leaves the document as it is. Returns the
    /// number of stored updates applied. Compaction is enabled afterwards.
    pub async fn load(&self) -> usize {
        let applied = self.replay().await;
        self.loaded.store(true, Ordering::Release);
        applied
    }

    async fn replay(&self) -> usize {
        let store = self.store.clone();
        let key = self.board_key.clone();
        let loaded = tokio::task::spawn_blocking(move || store.load_board(&key))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))
            .and_then(|result| result);

        let updates = match loaded {
            Ok(updates) => updates,
            Err(e) => {
                log::warn!("Could not load {}: {e}; starting fresh", self.board_key);
                return 0;
            }
        };
        let Some(document) = self.document.upgrade() else {
            return 0;
        };

        let mut applied = 0;
        for update in &updates {
            match document.apply(update, Origin::Persistence) {
                Ok(()) => applied += 1,
                Err(e) => {
                    log::warn!("Skipping unreadable stored update for {}: {e}", self.board_key)
                }
            }
        }
        log::debug!("Loaded {applied}/{} stored updates for {}", updates.len(), self.board_key);
        applied
    }

    pub fn board_key(&self) -> &str {
        &self.board_key
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop persisting and delete everything stored for the board.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::Release);
        let observer = self.observer.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let (Some(id), Some(document)) = (observer, self.document.upgrade()) {
            document.unobserve(id);
        }
        self.store.clear_board(&self.board_key)
    }
}
