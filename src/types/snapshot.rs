use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::bookmark::Bookmark;

/// Full, ordered view of one identity's bookmarks.
///
/// Never patched in place: every reconciliation pass builds a new snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionSnapshot {
    pub owner: String,
    pub records: Vec<Bookmark>,
    /// Number of completed reads that produced this snapshot; 0 before the first read.
    pub generation: u64,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl CollectionSnapshot {
    /// The placeholder published before the first read completes.
    pub fn empty(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            records: Vec::new(),
            generation: 0,
            refreshed_at: None,
        }
    }

    /// Builds a snapshot, re-sorting records newest first regardless of input order.
    pub fn from_records(
        owner: impl Into<String>,
        mut records: Vec<Bookmark>,
        generation: u64,
        refreshed_at: DateTime<Utc>,
    ) -> Self {
        records.sort_by(newest_first);
        Self {
            owner: owner.into(),
            records,
            generation,
            refreshed_at: Some(refreshed_at),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Bookmark> {
        self.records.iter().find(|b| b.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// `created_at` descending; ties broken by id descending so the order is total.
fn newest_first(a: &Bookmark, b: &Bookmark) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.id.cmp(&a.id))
}
