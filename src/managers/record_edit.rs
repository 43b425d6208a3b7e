//! Record edit controller for Marksync.
//!
//! Owns the per-bookmark edit/delete state machine:
//!
//! ```text
//! Viewing --start_edit--> Editing --save--> Saving --ok--> Viewing
//!                            |  ^              |
//!                            |  +----failed----+
//!                            +--cancel--> Viewing
//! Viewing --start_delete--> Deleting --done--> Viewing
//! Editing --record vanished from snapshot--> RecordGone
//! ```
//!
//! At most one bookmark holds the edit slot. A write in flight (`Saving`,
//! `Deleting`) is claimed before the remote call starts, so repeating the
//! action while it runs is a no-op instead of a second write.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::managers::reconciliation::{RefreshReason, RefreshTrigger};
use crate::services::remote_store::RemoteStoreTrait;
use crate::types::bookmark::{validate_fields, Bookmark, BookmarkDraft};
use crate::types::edit::EditState;
use crate::types::errors::{StoreError, SyncError};
use crate::types::snapshot::CollectionSnapshot;

/// Result of a save or delete request that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The remote store acknowledged the write.
    Completed,
    /// A write for this bookmark was already running; nothing was sent.
    AlreadyInFlight,
}

struct EditBook {
    states: HashMap<String, EditState>,
    errors: HashMap<String, String>,
    snapshot: Arc<CollectionSnapshot>,
}

impl EditBook {
    fn state(&self, id: &str) -> EditState {
        self.states.get(id).cloned().unwrap_or(EditState::Viewing)
    }

    fn slot_holder(&self) -> Option<&str> {
        self.states
            .iter()
            .find(|(_, state)| state.holds_edit_slot())
            .map(|(id, _)| id.as_str())
    }
}

pub struct RecordEditController {
    owner: String,
    store: Arc<dyn RemoteStoreTrait>,
    trigger: RefreshTrigger,
    book: Mutex<EditBook>,
}

impl RecordEditController {
    pub fn new(
        owner: impl Into<String>,
        store: Arc<dyn RemoteStoreTrait>,
        trigger: RefreshTrigger,
    ) -> Self {
        let owner = owner.into();
        let snapshot = Arc::new(CollectionSnapshot::empty(owner.clone()));
        Self {
            owner,
            store,
            trigger,
            book: Mutex::new(EditBook {
                states: HashMap::new(),
                errors: HashMap::new(),
                snapshot,
            }),
        }
    }

    fn book(&self) -> MutexGuard<'_, EditBook> {
        self.book.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Validates and inserts a new bookmark, then requests a refresh.
    pub async fn create(&self, draft: BookmarkDraft) -> Result<Bookmark, SyncError> {
        let fields = validate_fields(&draft)?;
        let bookmark = self.store.insert(&self.owner, &fields).await.map_err(|e| {
            warn!(error = %e, "bookmark insert failed");
            SyncError::from(e)
        })?;
        info!(id = %bookmark.id, "bookmark created");
        self.trigger.request(RefreshReason::LocalMutationCompleted).await;
        Ok(bookmark)
    }

    /// Enters `Editing` for `id` with a draft copied from the latest snapshot.
    ///
    /// Re-entering an edit already open keeps its draft. A bookmark with a
    /// write in flight is left untouched.
    pub fn start_edit(&self, id: &str) -> Result<EditState, SyncError> {
        let mut book = self.book();

        let current = book.state(id);
        match current {
            EditState::Editing { .. } | EditState::Saving { .. } | EditState::Deleting => {
                return Ok(current)
            }
            EditState::RecordGone { .. } => return Err(SyncError::StaleReference(id.to_string())),
            EditState::Viewing => {}
        }

        if let Some(other) = book.slot_holder() {
            return Err(SyncError::EditInProgress(other.to_string()));
        }

        let draft = match book.snapshot.get(id) {
            Some(bookmark) => BookmarkDraft::from(bookmark),
            None => return Err(SyncError::StaleReference(id.to_string())),
        };

        let state = EditState::Editing { draft, error: None };
        book.states.insert(id.to_string(), state.clone());
        book.errors.remove(id);
        debug!(id, "edit started");
        Ok(state)
    }

    /// Replaces the draft of an open edit.
    pub fn update_draft(&self, id: &str, draft: BookmarkDraft) -> Result<(), SyncError> {
        let mut book = self.book();
        match book.states.get_mut(id) {
            Some(EditState::Editing { draft: current, .. }) => {
                *current = draft;
                Ok(())
            }
            _ => Err(SyncError::NotEditing(id.to_string())),
        }
    }

    /// Leaves an open edit, or dismisses a `RecordGone` notice. Discards the draft.
    pub fn cancel(&self, id: &str) -> EditState {
        let mut book = self.book();
        match book.state(id) {
            EditState::Editing { .. } | EditState::RecordGone { .. } => {
                book.states.remove(id);
                book.errors.remove(id);
                debug!(id, "edit cancelled");
                EditState::Viewing
            }
            other => other,
        }
    }

    /// Acknowledges a `RecordGone` notice.
    pub fn dismiss_gone(&self, id: &str) -> bool {
        let mut book = self.book();
        if matches!(book.states.get(id), Some(EditState::RecordGone { .. })) {
            book.states.remove(id);
            true
        } else {
            false
        }
    }

    /// Validates the draft and writes it.
    ///
    /// Invalid input keeps the edit open with the error attached and never
    /// reaches the store. A failed write returns to `Editing` with the draft
    /// intact. A target deleted elsewhere moves to `RecordGone`.
    pub async fn save(&self, id: &str) -> Result<WriteOutcome, SyncError> {
        let (draft, fields) = {
            let mut book = self.book();
            let claimed = match book.states.get_mut(id) {
                Some(EditState::Saving { .. }) => return Ok(WriteOutcome::AlreadyInFlight),
                Some(EditState::Editing { draft, error }) => match validate_fields(draft) {
                    Ok(fields) => (draft.clone(), fields),
                    Err(e) => {
                        *error = Some(e.to_string());
                        return Err(SyncError::Validation(e));
                    }
                },
                _ => return Err(SyncError::NotEditing(id.to_string())),
            };
            book.states.insert(
                id.to_string(),
                EditState::Saving {
                    draft: claimed.0.clone(),
                },
            );
            claimed
        };

        let result = self.store.update(&self.owner, id, &fields).await;

        {
            let mut book = self.book();
            match &result {
                Ok(()) => {
                    book.states.remove(id);
                    book.errors.remove(id);
                }
                Err(StoreError::NotFound(_)) => {
                    book.states
                        .insert(id.to_string(), EditState::RecordGone { draft: draft.clone() });
                }
                Err(e) => {
                    book.states.insert(
                        id.to_string(),
                        EditState::Editing {
                            draft: draft.clone(),
                            error: Some(e.to_string()),
                        },
                    );
                }
            }
        }

        match result {
            Ok(()) => {
                info!(id, "bookmark saved");
                self.trigger.request(RefreshReason::LocalMutationCompleted).await;
                Ok(WriteOutcome::Completed)
            }
            Err(e) => {
                warn!(id, error = %e, "bookmark save failed");
                Err(SyncError::from(e))
            }
        }
    }

    /// Deletes a bookmark that is not being edited.
    ///
    /// A target already gone resolves back to `Viewing`; the next refresh
    /// removes it from the snapshot.
    pub async fn start_delete(&self, id: &str) -> Result<WriteOutcome, SyncError> {
        {
            let mut book = self.book();
            match book.state(id) {
                EditState::Deleting => return Ok(WriteOutcome::AlreadyInFlight),
                EditState::Editing { .. } | EditState::Saving { .. } => {
                    return Err(SyncError::EditInProgress(id.to_string()))
                }
                EditState::RecordGone { .. } => {
                    return Err(SyncError::StaleReference(id.to_string()))
                }
                EditState::Viewing => {}
            }
            if !book.snapshot.contains(id) {
                return Err(SyncError::StaleReference(id.to_string()));
            }
            book.states.insert(id.to_string(), EditState::Deleting);
            book.errors.remove(id);
        }

        let result = self.store.delete(&self.owner, id).await;

        {
            let mut book = self.book();
            book.states.remove(id);
            if let Err(e) = &result {
                if !matches!(e, StoreError::NotFound(_)) {
                    book.errors.insert(id.to_string(), e.to_string());
                }
            }
        }

        match result {
            Ok(()) => {
                info!(id, "bookmark deleted");
                self.trigger.request(RefreshReason::LocalMutationCompleted).await;
                Ok(WriteOutcome::Completed)
            }
            Err(StoreError::NotFound(_)) => {
                debug!(id, "bookmark already deleted elsewhere");
                self.trigger.request(RefreshReason::LocalMutationCompleted).await;
                Err(SyncError::StaleReference(id.to_string()))
            }
            Err(e) => {
                warn!(id, error = %e, "bookmark delete failed");
                Err(SyncError::from(e))
            }
        }
    }

    /// Adopts a freshly published snapshot.
    ///
    /// Open edits keep their drafts. An edit whose bookmark is missing becomes
    /// `RecordGone`. Writes in flight are settled by their own completion.
    pub fn apply_snapshot(&self, snapshot: Arc<CollectionSnapshot>) {
        let mut book = self.book();
        let mut gone = Vec::new();

        for (id, state) in book.states.iter_mut() {
            if let EditState::Editing { draft, .. } = state {
                if !snapshot.contains(id) {
                    gone.push(id.clone());
                    *state = EditState::RecordGone {
                        draft: std::mem::take(draft),
                    };
                }
            }
        }
        for id in &gone {
            info!(id = %id, "bookmark being edited was removed");
        }

        book.errors.retain(|id, _| snapshot.contains(id));
        book.snapshot = snapshot;
    }

    /// Current state of `id`; `Viewing` when the controller holds nothing for it.
    pub fn state(&self, id: &str) -> EditState {
        self.book().state(id)
    }

    /// The last write error recorded for `id`, if any.
    pub fn last_error(&self, id: &str) -> Option<String> {
        let book = self.book();
        match book.states.get(id) {
            Some(EditState::Editing {
                error: Some(error), ..
            }) => Some(error.clone()),
            _ => book.errors.get(id).cloned(),
        }
    }

    /// The bookmark currently holding the edit slot.
    pub fn editing_id(&self) -> Option<String> {
        self.book().slot_holder().map(str::to_string)
    }

    /// All bookmarks not in `Viewing`, keyed by id.
    pub fn states(&self) -> HashMap<String, EditState> {
        self.book().states.clone()
    }
}
