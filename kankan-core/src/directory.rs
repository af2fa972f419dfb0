//! Local list of known boards.
//!
//! The directory is a device-local record and is never replicated. Entries
//! stay sorted by case-insensitive name after every mutation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::now_millis;

pub const DEFAULT_BOARD_NAME: &str = "Untitled Board";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardEntry {
    pub id: String,
    pub name: String,
    pub created_at: i64,
    /// True until a name has been learned from the replicated document.
    #[serde(default)]
    pub placeholder: bool,
}

impl BoardEntry {
    pub fn new(id: impl Into<String>, name: &str) -> Self {
        Self {
            id: id.into(),
            name: clean_name(name),
            created_at: now_millis(),
            placeholder: false,
        }
    }
}

/// Name given to a board joined by id before its real name is known.
pub fn placeholder_name(board_id: &str) -> String {
    let short: String = board_id.chars().take(6).collect();
    if short.is_empty() {
        "Shared Board".to_string()
    } else {
        format!("Shared Board ({short})")
    }
}

fn clean_name(name: &str) -> String {
    match name.trim() {
        "" => DEFAULT_BOARD_NAME.to_string(),
        trimmed => trimmed.to_string(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoardDirectory {
    entries: Vec<BoardEntry>,
}

impl BoardDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse stored directory JSON.
    ///
    /// Anything that is not an array yields an empty directory. Entries
    /// without an id are dropped and missing fields get defaults.
    pub fn from_json(raw: &str) -> Self {
        let items = match serde_json::from_str::<Value>(raw) {
            Ok(Value::Array(items)) => items,
            Ok(_) => {
                log::warn!("Board directory is not an array, starting empty");
                Vec::new()
            }
            Err(e) => {
                log::warn!("Board directory is unreadable ({e}), starting empty");
                Vec::new()
            }
        };

        let entries = items
            .iter()
            .filter_map(|item| {
                let id = match item.get("id")? {
                    Value::String(s) if !s.is_empty() => s.clone(),
                    Value::Number(n) => n.to_string(),
                    _ => return None,
                };
                let name = item.get("name").and_then(Value::as_str).unwrap_or("");
                let created_at = item
                    .get("createdAt")
                    .and_then(Value::as_f64)
                    .filter(|ts| *ts != 0.0)
                    .map(|ts| ts as i64)
                    .unwrap_or_else(now_millis);
                let placeholder = match item.get("placeholder") {
                    Some(Value::Bool(b)) => *b,
                    Some(Value::Null) | None => false,
                    Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
                    Some(Value::String(s)) => !s.is_empty(),
                    Some(_) => true,
                };
                Some(BoardEntry {
                    id,
                    name: clean_name(name),
                    created_at,
                    placeholder,
                })
            })
            .collect();

        let mut directory = Self { entries };
        directory.sort();
        directory
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.entries).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn entries(&self) -> &[BoardEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, board_id: &str) -> Option<&BoardEntry> {
        self.entries.iter().find(|e| e.id == board_id)
    }

    pub fn contains(&self, board_id: &str) -> bool {
        self.get(board_id).is_some()
    }

    fn get_mut(&mut self, board_id: &str) -> Option<&mut BoardEntry> {
        self.entries.iter_mut().find(|e| e.id == board_id)
    }

    fn sort(&mut self) {
        self.entries.sort_by_cached_key(|e| e.name.to_lowercase());
    }

    /// Add `entry`, replacing any entry with the same id.
    pub fn insert(&mut self, entry: BoardEntry) {
        self.entries.retain(|e| e.id != entry.id);
        self.entries.push(entry);
        self.sort();
    }

    /// Ensure an entry exists for `board_id`, adding a placeholder if not.
    ///
    /// Returns true if a placeholder was added.
    pub fn ensure_placeholder(&mut self, board_id: &str) -> bool {
        if self.contains(board_id) {
            return false;
        }
        self.insert(BoardEntry {
            id: board_id.to_string(),
            name: placeholder_name(board_id),
            created_at: now_millis(),
            placeholder: true,
        });
        true
    }

    /// Rename an entry and clear its placeholder flag. Blank names keep the
    /// current name. Returns the resulting name.
    pub fn rename(&mut self, board_id: &str, name: &str) -> Option<String> {
        let entry = self.get_mut(board_id)?;
        let name = name.trim();
        if !name.is_empty() {
            entry.name = name.to_string();
        }
        entry.placeholder = false;
        let result = entry.name.clone();
        self.sort();
        Some(result)
    }

    /// Take over a name learned from the replicated document.
    ///
    /// Returns true if the entry changed and should be persisted.
    pub fn adopt_document_name(&mut self, board_id: &str, doc_name: &str) -> bool {
        let doc_name = doc_name.trim();
        if doc_name.is_empty() {
            return false;
        }
        let Some(entry) = self.get_mut(board_id) else {
            return false;
        };
        if entry.name == doc_name {
            return false;
        }
        entry.name = doc_name.to_string();
        entry.placeholder = false;
        self.sort();
        true
    }

    pub fn remove(&mut self, board_id: &str) -> Option<BoardEntry> {
        let index = self.entries.iter().position(|e| e.id == board_id)?;
        Some(self.entries.remove(index))
    }
}
