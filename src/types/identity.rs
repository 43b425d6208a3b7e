use serde::{Deserialize, Serialize};

/// The authenticated user a session belongs to.
///
/// Held immutable for the lifetime of a session; cleared on sign-out.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    /// Human-readable label, typically the account e-mail.
    pub label: String,
}

impl Identity {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}
