use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::PayloadError;

/// Kind of row change announced by the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

impl ChangeOperation {
    /// Wire name used in realtime payloads.
    pub fn as_event_type(&self) -> &'static str {
        match self {
            ChangeOperation::Insert => "INSERT",
            ChangeOperation::Update => "UPDATE",
            ChangeOperation::Delete => "DELETE",
        }
    }

    fn from_event_type(raw: &str) -> Option<Self> {
        match raw {
            "INSERT" => Some(ChangeOperation::Insert),
            "UPDATE" => Some(ChangeOperation::Update),
            "DELETE" => Some(ChangeOperation::Delete),
            _ => None,
        }
    }
}

/// A typed change notification for one bookmark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub operation: ChangeOperation,
    pub affected_id: String,
    /// Owner carried by the payload, when the backend includes it.
    pub owner: Option<String>,
}

impl ChangeEvent {
    /// Parses a realtime `postgres_changes` payload.
    ///
    /// Expected shape: `{"eventType": "INSERT"|"UPDATE"|"DELETE", "new": {...}, "old": {...}}`.
    /// The affected id is taken from `new.id`, falling back to `old.id` for deletes.
    pub fn from_payload(payload: &Value) -> Result<Self, PayloadError> {
        let obj = payload.as_object().ok_or(PayloadError::NotAnObject)?;

        let event_type = obj.get("eventType").and_then(Value::as_str).unwrap_or("");
        let operation = ChangeOperation::from_event_type(event_type)
            .ok_or_else(|| PayloadError::UnknownEventType(event_type.to_string()))?;

        let row_field = |row: &str, field: &str| -> Option<String> {
            obj.get(row)
                .and_then(|r| r.get(field))
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let affected_id = row_field("new", "id")
            .or_else(|| row_field("old", "id"))
            .ok_or(PayloadError::MissingId)?;
        let owner = row_field("new", "user_id").or_else(|| row_field("old", "user_id"));

        Ok(Self {
            operation,
            affected_id,
            owner,
        })
    }

    /// Builds the realtime payload announcing this change.
    pub fn to_payload(&self) -> Value {
        let row = match &self.owner {
            Some(owner) => serde_json::json!({ "id": self.affected_id, "user_id": owner }),
            None => serde_json::json!({ "id": self.affected_id }),
        };
        let (new, old) = match self.operation {
            ChangeOperation::Delete => (serde_json::json!({}), row),
            _ => (row, serde_json::json!({})),
        };
        serde_json::json!({
            "eventType": self.operation.as_event_type(),
            "schema": "public",
            "table": "bookmarks",
            "new": new,
            "old": old,
        })
    }

    /// Returns false if the payload names an owner other than `owner`.
    pub fn belongs_to(&self, owner: &str) -> bool {
        self.owner.as_deref().map_or(true, |o| o == owner)
    }
}
