//! Read-only snapshot of a board, derived from its replicated document.
//!
//! The projection is the only state surface UI collaborators read. It is
//! rebuilt after every committed transaction; nothing in it is written back.

use serde::{Deserialize, Serialize};

pub const SECOND_MS: i64 = 1_000;
pub const MINUTE_MS: i64 = 60 * SECOND_MS;
pub const HOUR_MS: i64 = 60 * MINUTE_MS;
pub const DAY_MS: i64 = 24 * HOUR_MS;

/// One card as shown on the board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardView {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub column_id: String,
    pub created_at: Option<i64>,
    pub age_label: String,
}

/// One column with its cards in document order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnView {
    pub id: String,
    pub name: String,
    pub cards: Vec<CardView>,
}

/// Aggregate figures for the board-list overview.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardSummary {
    pub column_count: usize,
    pub card_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardProjection {
    pub columns: Vec<ColumnView>,
}

impl BoardProjection {
    pub fn summary(&self) -> BoardSummary {
        BoardSummary {
            column_count: self.columns.len(),
            card_count: self.columns.iter().map(|c| c.cards.len()).sum(),
        }
    }

    pub fn column(&self, column_id: &str) -> Option<&ColumnView> {
        self.columns.iter().find(|c| c.id == column_id)
    }

    pub fn column_named(&self, name: &str) -> Option<&ColumnView> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Recompute every age label against `now`.
    ///
    /// Returns true if at least one label changed.
    pub fn refresh_age_labels(&mut self, now: i64) -> bool {
        let mut mutated = false;
        for card in self.columns.iter_mut().flat_map(|c| c.cards.iter_mut()) {
            let label = age_label(card.created_at, now);
            if card.age_label != label {
                card.age_label = label;
                mutated = true;
            }
        }
        mutated
    }
}

/// Relative age of a card, e.g. `"45s"`, `"3m"`, `"2h"`, `"5d"`.
///
/// Timestamps in the future count as zero elapsed; every bucket reports at
/// least one unit. A missing timestamp has no label.
pub fn age_label(created_at: Option<i64>, now: i64) -> String {
    let Some(created_at) = created_at.filter(|ts| *ts != 0) else {
        return String::new();
    };
    let delta = now.saturating_sub(created_at).max(0);

    let (unit, suffix) = if delta >= DAY_MS {
        (DAY_MS, "d")
    } else if delta >= HOUR_MS {
        (HOUR_MS, "h")
    } else if delta >= MINUTE_MS {
        (MINUTE_MS, "m")
    } else {
        (SECOND_MS, "s")
    };
    let count = ((delta as f64 / unit as f64).round() as i64).max(1);
    format!("{count}{suffix}")
}
