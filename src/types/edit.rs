use serde::{Deserialize, Serialize};

use super::bookmark::BookmarkDraft;

/// Per-bookmark edit/delete state.
///
/// Bookmarks without an entry in the controller are implicitly `Viewing`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EditState {
    Viewing,
    Editing {
        draft: BookmarkDraft,
        error: Option<String>,
    },
    Saving {
        draft: BookmarkDraft,
    },
    Deleting,
    /// The bookmark disappeared from the snapshot while being edited.
    /// Terminal until dismissed; the unsaved draft is kept for the user.
    RecordGone {
        draft: BookmarkDraft,
    },
}

impl EditState {
    /// Returns true if a write for this bookmark is in flight.
    pub fn is_busy(&self) -> bool {
        matches!(self, EditState::Saving { .. } | EditState::Deleting)
    }

    /// Returns true if this state holds the single edit slot.
    pub fn holds_edit_slot(&self) -> bool {
        matches!(self, EditState::Editing { .. } | EditState::Saving { .. })
    }
}
