//! Replicated board document backed by a Yrs `Doc`.
//!
//! Layout inside the CRDT:
//! ```text
//! meta     : Map   { name }
//! columns  : Array [ Map { id, name, cards: Array [ Map { id, title,
//!                          description, tag?, createdAt } ] } ]
//! ```
//!
//! Every mutation runs inside one Yrs transaction. Once it commits, the
//! encoded update is handed to the registered observers, in registration
//! order, together with its [`Origin`]. Observers therefore only ever see
//! fully committed state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{
    Any, Array, ArrayPrelim, ArrayRef, Doc, Map, MapPrelim, MapRef, Options, Out, ReadTxn,
    StateVector, Transact, TransactionMut, Update, WriteTxn,
};

use crate::error::DocumentError;
use crate::projection::{age_label, BoardProjection, CardView, ColumnView};
use crate::replica::{is_empty_update, Origin, Replica};

const META: &str = "meta";
const COLUMNS: &str = "columns";
const CARDS: &str = "cards";

pub const DEFAULT_COLUMNS: [&str; 4] = ["Backlog", "In Progress", "Review", "Done"];
pub const DEFAULT_CARD_TITLE: &str = "Untitled";
pub const DEFAULT_COLUMN_NAME: &str = "Untitled Column";

/// Document identifier shared by every replica of `board_id`.
pub fn document_guid(board_id: &str) -> String {
    format!("kanban-board-{board_id}")
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Callback invoked after each committed transaction.
pub type UpdateObserver = Arc<dyn Fn(&[u8], Origin) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Fields supplied when creating a card.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CardDraft {
    pub title: String,
    pub description: String,
    pub tag: String,
}

/// Fields supplied when editing a card. `column_id` moves the card.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CardEdit {
    pub title: String,
    pub description: String,
    pub tag: String,
    pub column_id: Option<String>,
}

/// A single card looked up for detail display.
#[derive(Debug, Clone, PartialEq)]
pub struct CardDetail {
    pub id: String,
    pub title: String,
    pub description: String,
    pub tag: Option<String>,
    pub created_at: Option<i64>,
    pub column_id: String,
    pub column_name: String,
}

/// Card fields as stored, used to re-create a card in another column.
#[derive(Debug, Clone)]
struct CardRecord {
    id: String,
    title: String,
    description: String,
    tag: Option<String>,
    created_at: Option<i64>,
}

fn normalize_title(title: &str) -> String {
    let title = title.trim();
    if title.is_empty() {
        DEFAULT_CARD_TITLE.to_string()
    } else {
        title.to_string()
    }
}

fn normalize_tag(tag: &str) -> Option<String> {
    let tag = tag.trim();
    (!tag.is_empty()).then(|| tag.to_string())
}

// ── Helpers for reading Yrs values ──────────────────────────────────────────

fn read_string<T: ReadTxn>(txn: &T, map: &MapRef, key: &str) -> Option<String> {
    match map.get(txn, key)? {
        Out::Any(Any::String(s)) => Some(s.to_string()),
        _ => None,
    }
}

fn read_millis<T: ReadTxn>(txn: &T, map: &MapRef, key: &str) -> Option<i64> {
    match map.get(txn, key)? {
        Out::Any(Any::Number(n)) if n.is_finite() => Some(n as i64),
        Out::Any(Any::BigInt(n)) => Some(n),
        _ => None,
    }
}

fn read_array<T: ReadTxn>(txn: &T, map: &MapRef, key: &str) -> Option<ArrayRef> {
    match map.get(txn, key)? {
        Out::YArray(array) => Some(array),
        _ => None,
    }
}

fn map_at<T: ReadTxn>(txn: &T, array: &ArrayRef, index: u32) -> Option<MapRef> {
    match array.get(txn, index)? {
        Out::YMap(map) => Some(map),
        _ => None,
    }
}

fn find_column<T: ReadTxn>(txn: &T, columns: &ArrayRef, column_id: &str) -> Option<(u32, MapRef)> {
    (0..columns.len(txn)).find_map(|i| {
        let column = map_at(txn, columns, i)?;
        (read_string(txn, &column, "id").as_deref() == Some(column_id)).then_some((i, column))
    })
}

struct CardLocation {
    column: MapRef,
    cards: ArrayRef,
    card: MapRef,
    index: u32,
}

fn locate_card<T: ReadTxn>(
    txn: &T,
    columns: &ArrayRef,
    column_id: &str,
    card_id: &str,
) -> Option<CardLocation> {
    if column_id.is_empty() || card_id.is_empty() {
        return None;
    }
    let (_, column) = find_column(txn, columns, column_id)?;
    let cards = read_array(txn, &column, CARDS)?;
    (0..cards.len(txn)).find_map(|index| {
        let card = map_at(txn, &cards, index)?;
        (read_string(txn, &card, "id").as_deref() == Some(card_id)).then(|| CardLocation {
            column: column.clone(),
            cards: cards.clone(),
            card,
            index,
        })
    })
}

fn read_card<T: ReadTxn>(txn: &T, card: &MapRef) -> CardRecord {
    CardRecord {
        id: read_string(txn, card, "id").unwrap_or_default(),
        title: read_string(txn, card, "title").unwrap_or_default(),
        description: read_string(txn, card, "description").unwrap_or_default(),
        tag: read_string(txn, card, "tag").filter(|t| !t.is_empty()),
        created_at: read_millis(txn, card, "createdAt"),
    }
}

// ── Writing Yrs values ──────────────────────────────────────────────────────

fn cards_of(txn: &mut TransactionMut<'_>, column: &MapRef) -> ArrayRef {
    match read_array(&*txn, column, CARDS) {
        Some(cards) => cards,
        None => column.insert(txn, CARDS, ArrayPrelim::default()),
    }
}

fn push_column(txn: &mut TransactionMut<'_>, columns: &ArrayRef, id: String, name: String) {
    let column = columns.push_back(txn, MapPrelim::default());
    column.insert(txn, "id", id);
    column.insert(txn, "name", name);
    column.insert(txn, CARDS, ArrayPrelim::default());
}

fn push_card(txn: &mut TransactionMut<'_>, cards: &ArrayRef, card: &CardRecord) {
    let map = cards.push_back(txn, MapPrelim::default());
    map.insert(txn, "id", card.id.clone());
    map.insert(txn, "title", card.title.clone());
    map.insert(txn, "description", card.description.clone());
    if let Some(tag) = &card.tag {
        map.insert(txn, "tag", tag.clone());
    }
    if let Some(created_at) = card.created_at {
        map.insert(txn, "createdAt", created_at as f64);
    }
}

// ── BoardDocument ───────────────────────────────────────────────────────────

/// One board's replicated document plus its observer list.
pub struct BoardDocument {
    guid: String,
    doc: Doc,
    observers: RwLock<Vec<(ObserverId, UpdateObserver)>>,
    next_observer: AtomicU64,
}

impl std::fmt::Debug for BoardDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoardDocument")
            .field("guid", &self.guid)
            .finish_non_exhaustive()
    }
}

impl BoardDocument {
    /// Create an empty document scoped to `board_id`.
    pub fn new(board_id: &str) -> Self {
        let guid = document_guid(board_id);
        let options = Options {
            guid: guid.as_str().into(),
            ..Options::default()
        };
        Self {
            guid,
            doc: Doc::with_options(options),
            observers: RwLock::new(Vec::new()),
            next_observer: AtomicU64::new(0),
        }
    }

    pub fn guid(&self) -> &str {
        &self.guid
    }

    /// Register a callback for committed transactions.
    pub fn observe(&self, observer: UpdateObserver) -> ObserverId {
        let id = ObserverId(self.next_observer.fetch_add(1, Ordering::Relaxed));
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, observer));
        id
    }

    pub fn unobserve(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write().unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    fn notify(&self, update: &[u8], origin: Origin) {
        // Snapshot the list so observers may (un)register or transact.
        let observers: Vec<UpdateObserver> = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();
        for observer in observers {
            observer(update, origin);
        }
    }

    /// Run `f` inside a single transaction and notify observers on commit.
    ///
    /// Transactions that change nothing produce no notification.
    pub fn transact<F, R>(&self, origin: Origin, f: F) -> R
    where
        F: FnOnce(&mut TransactionMut<'_>) -> R,
    {
        let (result, update) = {
            let mut txn = self.doc.transact_mut();
            let result = f(&mut txn);
            (result, txn.encode_update_v1())
        };
        if !is_empty_update(&update) {
            self.notify(&update, origin);
        }
        result
    }

    // ── Metadata ───────────────────────────────────────────────────────────

    /// The board name stored in the document, if any.
    pub fn name(&self) -> Option<String> {
        let txn = self.doc.transact();
        let meta = txn.get_map(META)?;
        read_string(&txn, &meta, "name")
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
    }

    /// Overwrite the board name. Blank names are ignored.
    pub fn set_name(&self, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        self.transact(Origin::Local, |txn| {
            let meta = txn.get_or_insert_map(META);
            meta.insert(txn, "name", name.to_string());
        });
        true
    }

    /// Write `name` only if the document has none yet.
    pub fn seed_name(&self, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        self.transact(Origin::Local, |txn| {
            let meta = txn.get_or_insert_map(META);
            let existing = read_string(&*txn, &meta, "name").unwrap_or_default();
            if !existing.trim().is_empty() {
                return false;
            }
            meta.insert(txn, "name", name.to_string());
            true
        })
    }

    // ── Columns ────────────────────────────────────────────────────────────

    pub fn column_count(&self) -> usize {
        let txn = self.doc.transact();
        txn.get_array(COLUMNS)
            .map(|columns| columns.len(&txn) as usize)
            .unwrap_or(0)
    }

    /// Seed the default columns into an empty board, in one transaction.
    pub fn seed_default_columns(&self) -> bool {
        self.transact(Origin::Local, |txn| {
            let columns = txn.get_or_insert_array(COLUMNS);
            if columns.len(&*txn) > 0 {
                return false;
            }
            for name in DEFAULT_COLUMNS {
                push_column(txn, &columns, Uuid::new_v4().to_string(), name.to_string());
            }
            true
        })
    }

    /// Append a column and return its id.
    pub fn add_column(&self, name: &str) -> String {
        let id = Uuid::new_v4().to_string();
        let name = match name.trim() {
            "" => DEFAULT_COLUMN_NAME.to_string(),
            trimmed => trimmed.to_string(),
        };
        self.transact(Origin::Local, |txn| {
            let columns = txn.get_or_insert_array(COLUMNS);
            push_column(txn, &columns, id.clone(), name);
        });
        id
    }

    /// Remove a column and every card in it.
    pub fn delete_column(&self, column_id: &str) -> bool {
        if column_id.is_empty() {
            return false;
        }
        self.transact(Origin::Local, |txn| {
            let columns = txn.get_or_insert_array(COLUMNS);
            match find_column(&*txn, &columns, column_id) {
                Some((index, _)) => {
                    columns.remove_range(txn, index, 1);
                    true
                }
                None => false,
            }
        })
    }

    // ── Cards ──────────────────────────────────────────────────────────────

    /// Append a card to `column_id`. Returns the new card id, or `None`
    /// when the column does not exist.
    pub fn create_card(&self, column_id: &str, draft: &CardDraft) -> Option<String> {
        if column_id.is_empty() {
            return None;
        }
        let record = CardRecord {
            id: Uuid::new_v4().to_string(),
            title: normalize_title(&draft.title),
            description: draft.description.trim().to_string(),
            tag: normalize_tag(&draft.tag),
            created_at: Some(now_millis()),
        };
        self.transact(Origin::Local, |txn| {
            let columns = txn.get_or_insert_array(COLUMNS);
            let (_, column) = find_column(&*txn, &columns, column_id)?;
            let cards = cards_of(txn, &column);
            push_card(txn, &cards, &record);
            Some(record.id.clone())
        })
    }

    /// Update a card's fields and optionally move it to another column.
    ///
    /// An empty tag removes the tag key. A move deletes the card from its
    /// current column and appends it to the target within the same
    /// transaction, keeping its id and creation time.
    pub fn edit_card(&self, column_id: &str, card_id: &str, edit: &CardEdit) -> bool {
        self.transact(Origin::Local, |txn| {
            let columns = txn.get_or_insert_array(COLUMNS);
            let Some(found) = locate_card(&*txn, &columns, column_id, card_id) else {
                return false;
            };
            let target_id = edit
                .column_id
                .as_deref()
                .filter(|id| !id.is_empty())
                .unwrap_or(column_id);
            let Some((_, target)) = find_column(&*txn, &columns, target_id) else {
                return false;
            };

            found.card.insert(txn, "title", normalize_title(&edit.title));
            found.card.insert(txn, "description", edit.description.trim().to_string());
            match normalize_tag(&edit.tag) {
                Some(tag) => {
                    found.card.insert(txn, "tag", tag);
                }
                None => {
                    found.card.remove(txn, "tag");
                }
            }

            if target_id != column_id {
                let record = read_card(&*txn, &found.card);
                found.cards.remove_range(txn, found.index, 1);
                let target_cards = cards_of(txn, &target);
                push_card(txn, &target_cards, &record);
            }
            true
        })
    }

    pub fn delete_card(&self, column_id: &str, card_id: &str) -> bool {
        self.transact(Origin::Local, |txn| {
            let columns = txn.get_or_insert_array(COLUMNS);
            match locate_card(&*txn, &columns, column_id, card_id) {
                Some(found) => {
                    found.cards.remove_range(txn, found.index, 1);
                    true
                }
                None => false,
            }
        })
    }

    pub fn find_card(&self, column_id: &str, card_id: &str) -> Option<CardDetail> {
        let txn = self.doc.transact();
        let columns = txn.get_array(COLUMNS)?;
        let found = locate_card(&txn, &columns, column_id, card_id)?;
        let record = read_card(&txn, &found.card);
        Some(CardDetail {
            id: record.id,
            title: if record.title.is_empty() {
                DEFAULT_CARD_TITLE.to_string()
            } else {
                record.title
            },
            description: record.description,
            tag: record.tag,
            created_at: record.created_at,
            column_id: column_id.to_string(),
            column_name: read_string(&txn, &found.column, "name")
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| "Column".to_string()),
        })
    }

    /// True if the card map carries a `tag` key at all.
    pub fn card_has_tag_field(&self, column_id: &str, card_id: &str) -> bool {
        let txn = self.doc.transact();
        txn.get_array(COLUMNS)
            .and_then(|columns| locate_card(&txn, &columns, column_id, card_id))
            .map(|found| found.card.contains_key(&txn, "tag"))
            .unwrap_or(false)
    }

    // ── Projection ─────────────────────────────────────────────────────────

    /// Derive the read-only board snapshot, labelling ages against `now`.
    pub fn projection(&self, now: i64) -> BoardProjection {
        let txn = self.doc.transact();
        let Some(columns) = txn.get_array(COLUMNS) else {
            return BoardProjection::default();
        };

        let mut views = Vec::with_capacity(columns.len(&txn) as usize);
        for i in 0..columns.len(&txn) {
            let Some(column) = map_at(&txn, &columns, i) else {
                continue;
            };
            let column_id = read_string(&txn, &column, "id").unwrap_or_default();
            let cards = match read_array(&txn, &column, CARDS) {
                Some(cards) => (0..cards.len(&txn))
                    .filter_map(|j| map_at(&txn, &cards, j))
                    .map(|card| {
                        let record = read_card(&txn, &card);
                        CardView {
                            id: record.id,
                            title: if record.title.is_empty() {
                                DEFAULT_CARD_TITLE.to_string()
                            } else {
                                record.title
                            },
                            description: record.description,
                            tag: record.tag,
                            column_id: column_id.clone(),
                            created_at: record.created_at,
                            age_label: age_label(record.created_at, now),
                        }
                    })
                    .collect(),
                None => Vec::new(),
            };
            views.push(ColumnView {
                name: read_string(&txn, &column, "name")
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| DEFAULT_COLUMN_NAME.to_string()),
                id: column_id,
                cards,
            });
        }
        BoardProjection { columns: views }
    }
}

impl Replica for BoardDocument {
    fn state_vector(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.state_vector().encode_v1()
    }

    fn diff(&self, remote_vector: &[u8]) -> Result<Vec<u8>, DocumentError> {
        let remote = if remote_vector.is_empty() {
            StateVector::default()
        } else {
            StateVector::decode_v1(remote_vector)?
        };
        let txn = self.doc.transact();
        Ok(txn.encode_diff_v1(&remote))
    }

    fn apply(&self, update: &[u8], origin: Origin) -> Result<(), DocumentError> {
        if is_empty_update(update) {
            return Ok(());
        }
        let decoded = Update::decode_v1(update)?;
        let integrated = {
            let mut txn = self.doc.transact_mut();
            txn.apply_update(decoded)
                .map_err(|e| DocumentError::Apply(format!("{e:?}")))?;
            txn.encode_update_v1()
        };
        // Re-applying known operations integrates nothing and stays silent.
        if !is_empty_update(&integrated) {
            self.notify(&integrated, origin);
        }
        Ok(())
    }

    fn encode_state(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn draft(title: &str, tag: &str) -> CardDraft {
        CardDraft {
            title: title.to_string(),
            description: String::new(),
            tag: tag.to_string(),
        }
    }

    fn seeded(board_id: &str) -> BoardDocument {
        let doc = BoardDocument::new(board_id);
        assert!(doc.seed_default_columns());
        doc
    }

    fn column_id(doc: &BoardDocument, name: &str) -> String {
        doc.projection(now_millis())
            .column_named(name)
            .map(|c| c.id.clone())
            .expect("column exists")
    }

    /// Exchange vectors and deltas in both directions.
    fn sync_pair(a: &BoardDocument, b: &BoardDocument) {
        let to_b = a.diff(&b.state_vector()).unwrap();
        b.apply(&to_b, Origin::Persistence).unwrap();
        let to_a = b.diff(&a.state_vector()).unwrap();
        a.apply(&to_a, Origin::Persistence).unwrap();
    }

    #[test]
    fn test_document_guid_is_deterministic() {
        let a = BoardDocument::new("board-1");
        let b = BoardDocument::new("board-1");
        assert_eq!(a.guid(), "kanban-board-board-1");
        assert_eq!(a.guid(), b.guid());
    }

    #[test]
    fn test_seed_default_columns() {
        let doc = seeded("b");
        let projection = doc.projection(now_millis());
        let names: Vec<&str> = projection.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, DEFAULT_COLUMNS);
        assert!(projection.columns.iter().all(|c| c.cards.is_empty()));

        // Seeding a non-empty board is a no-op.
        assert!(!doc.seed_default_columns());
        assert_eq!(doc.column_count(), 4);
    }

    #[test]
    fn test_seed_is_one_transaction() {
        let doc = BoardDocument::new("b");
        let count = Arc::new(Mutex::new(0));
        let seen = count.clone();
        doc.observe(Arc::new(move |_: &[u8], _: Origin| *seen.lock().unwrap() += 1));
        doc.seed_default_columns();
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn test_create_card_defaults() {
        let doc = seeded("b");
        let backlog = column_id(&doc, "Backlog");
        let card_id = doc.create_card(&backlog, &draft("   ", "")).unwrap();

        let card = doc.find_card(&backlog, &card_id).unwrap();
        assert_eq!(card.title, "Untitled");
        assert_eq!(card.description, "");
        assert_eq!(card.tag, None);
        assert_eq!(card.column_name, "Backlog");
        assert!(card.created_at.is_some());
        assert!(!doc.card_has_tag_field(&backlog, &card_id));
    }

    #[test]
    fn test_create_card_missing_column_is_noop() {
        let doc = seeded("b");
        assert!(doc.create_card("nope", &draft("x", "")).is_none());
        assert!(doc.create_card("", &draft("x", "")).is_none());
        assert_eq!(doc.projection(now_millis()).summary().card_count, 0);
    }

    #[test]
    fn test_edit_card_clears_tag_field() {
        let doc = seeded("b");
        let backlog = column_id(&doc, "Backlog");
        let card_id = doc.create_card(&backlog, &draft("Task", " urgent ")).unwrap();
        assert!(doc.card_has_tag_field(&backlog, &card_id));
        assert_eq!(doc.find_card(&backlog, &card_id).unwrap().tag.as_deref(), Some("urgent"));

        let edit = CardEdit {
            title: "Task".into(),
            description: "details".into(),
            tag: "  ".into(),
            column_id: None,
        };
        assert!(doc.edit_card(&backlog, &card_id, &edit));
        assert!(!doc.card_has_tag_field(&backlog, &card_id));
        assert_eq!(doc.find_card(&backlog, &card_id).unwrap().description, "details");
    }

    #[test]
    fn test_move_card_is_atomic() {
        let doc = seeded("b");
        let backlog = column_id(&doc, "Backlog");
        let done = column_id(&doc, "Done");
        let card_id = doc.create_card(&backlog, &draft("Ship", "")).unwrap();
        let created_at = doc.find_card(&backlog, &card_id).unwrap().created_at;

        let observed: Arc<Mutex<Vec<BoardProjection>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = observed.clone();
        // Observers run after commit, so reading the document here is safe.
        let doc = Arc::new(doc);
        let weak = Arc::downgrade(&doc);
        doc.observe(Arc::new(move |_: &[u8], _: Origin| {
            if let Some(doc) = weak.upgrade() {
                sink.lock().unwrap().push(doc.projection(now_millis()));
            }
        }));

        let edit = CardEdit {
            title: "Ship".into(),
            column_id: Some(done.clone()),
            ..CardEdit::default()
        };
        assert!(doc.edit_card(&backlog, &card_id, &edit));

        let snapshots = observed.lock().unwrap();
        assert_eq!(snapshots.len(), 1);
        let after = &snapshots[0];
        assert!(after.column(&backlog).unwrap().cards.is_empty());
        let moved = &after.column(&done).unwrap().cards;
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].id, card_id);
        assert_eq!(moved[0].column_id, done);
        assert_eq!(moved[0].created_at, created_at);
    }

    #[test]
    fn test_edit_to_missing_target_is_noop() {
        let doc = seeded("b");
        let backlog = column_id(&doc, "Backlog");
        let card_id = doc.create_card(&backlog, &draft("Keep", "")).unwrap();
        let edit = CardEdit {
            title: "Changed".into(),
            column_id: Some("missing".into()),
            ..CardEdit::default()
        };
        assert!(!doc.edit_card(&backlog, &card_id, &edit));
        assert_eq!(doc.find_card(&backlog, &card_id).unwrap().title, "Keep");
    }

    #[test]
    fn test_delete_card_and_column() {
        let doc = seeded("b");
        let review = column_id(&doc, "Review");
        let card_id = doc.create_card(&review, &draft("Gone", "")).unwrap();
        assert!(doc.delete_card(&review, &card_id));
        assert!(!doc.delete_card(&review, &card_id));
        assert!(doc.delete_column(&review));
        assert!(!doc.delete_column(&review));
        assert_eq!(doc.column_count(), 3);
    }

    #[test]
    fn test_seed_name_never_overwrites() {
        let doc = BoardDocument::new("b");
        assert_eq!(doc.name(), None);
        assert!(doc.seed_name("Roadmap"));
        assert!(!doc.seed_name("Other"));
        assert_eq!(doc.name().as_deref(), Some("Roadmap"));
        assert!(doc.set_name("Renamed"));
        assert!(!doc.set_name("   "));
        assert_eq!(doc.name().as_deref(), Some("Renamed"));
    }

    #[test]
    fn test_remote_update_converges() {
        let a = seeded("shared");
        let b = BoardDocument::new("shared");
        sync_pair(&a, &b);

        let backlog = column_id(&a, "Backlog");
        a.create_card(&backlog, &draft("Fix bug", "")).unwrap();
        sync_pair(&a, &b);

        let now = now_millis();
        assert_eq!(a.projection(now), b.projection(now));
        let column = b.projection(now).column_named("Backlog").cloned().unwrap();
        assert_eq!(column.cards.len(), 1);
        assert_eq!(column.cards[0].title, "Fix bug");
    }

    #[test]
    fn test_concurrent_edits_converge_in_any_order() {
        let a = seeded("shared");
        let b = BoardDocument::new("shared");
        let c = BoardDocument::new("shared");
        sync_pair(&a, &b);
        sync_pair(&a, &c);
        let backlog = column_id(&a, "Backlog");

        let sv = a.state_vector();
        a.create_card(&backlog, &draft("from a", "")).unwrap();
        b.create_card(&backlog, &draft("from b", "x")).unwrap();
        c.delete_column(&column_id(&c, "Review"));
        let ua = a.diff(&sv).unwrap();
        let ub = b.diff(&sv).unwrap();
        let uc = c.diff(&sv).unwrap();

        let left = BoardDocument::new("shared");
        let right = BoardDocument::new("shared");
        left.apply(&a.encode_state(), Origin::Persistence).unwrap();
        right.apply(&a.encode_state(), Origin::Persistence).unwrap();
        for u in [&ua, &ub, &uc] {
            left.apply(u, Origin::Persistence).unwrap();
        }
        for u in [&uc, &ub, &ua] {
            right.apply(u, Origin::Persistence).unwrap();
        }

        let now = now_millis();
        assert_eq!(left.projection(now), right.projection(now));
        assert_eq!(left.projection(now).summary().column_count, 3);
        assert_eq!(left.projection(now).summary().card_count, 2);
    }

    #[test]
    fn test_apply_is_idempotent() {
        let a = seeded("shared");
        let backlog = column_id(&a, "Backlog");
        a.create_card(&backlog, &draft("Once", "")).unwrap();
        let state = a.encode_state();

        let b = BoardDocument::new("shared");
        let notified = Arc::new(Mutex::new(0));
        let counter = notified.clone();
        b.observe(Arc::new(move |_: &[u8], _: Origin| *counter.lock().unwrap() += 1));

        b.apply(&state, Origin::Persistence).unwrap();
        let once = b.projection(0);
        b.apply(&state, Origin::Persistence).unwrap();
        assert_eq!(b.projection(0), once);
        assert_eq!(*notified.lock().unwrap(), 1);
    }

    #[test]
    fn test_diff_contains_only_missing_operations() {
        let a = seeded("shared");
        let b = BoardDocument::new("shared");
        sync_pair(&a, &b);

        // Nothing is missing once b has everything a produced.
        assert_eq!(a.diff(&b.state_vector()).unwrap(), crate::replica::EMPTY_UPDATE.to_vec());

        let backlog = column_id(&a, "Backlog");
        a.create_card(&backlog, &draft("New", "")).unwrap();
        let delta = a.diff(&b.state_vector()).unwrap();
        assert!(!is_empty_update(&delta));
        assert!(delta.len() < a.encode_state().len());

        b.apply(&delta, Origin::Persistence).unwrap();
        assert_eq!(a.state_vector(), b.state_vector());
        assert_eq!(a.diff(&b.state_vector()).unwrap(), crate::replica::EMPTY_UPDATE.to_vec());
    }

    #[test]
    fn test_observers_receive_origin_in_order() {
        let doc = BoardDocument::new("b");
        let log: Arc<Mutex<Vec<(u8, Origin)>>> = Arc::new(Mutex::new(Vec::new()));
        let first = log.clone();
        let second = log.clone();
        doc.observe(Arc::new(move |_: &[u8], origin: Origin| {
            first.lock().unwrap().push((1, origin))
        }));
        let id = doc.observe(Arc::new(move |_: &[u8], origin: Origin| {
            second.lock().unwrap().push((2, origin))
        }));

        doc.seed_default_columns();
        assert_eq!(*log.lock().unwrap(), vec![(1, Origin::Local), (2, Origin::Local)]);

        assert!(doc.unobserve(id));
        doc.add_column("Extra");
        assert_eq!(log.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_malformed_update_is_rejected() {
        let doc = BoardDocument::new("b");
        assert!(doc.apply(&[0xFF, 0xFE, 0xFD], Origin::Persistence).is_err());
        assert!(doc.apply(&[], Origin::Persistence).is_ok());
    }
}
