use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use super::errors::ValidationError;

/// Represents a saved bookmark as stored by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    pub id: String,
    pub title: String,
    pub url: String,
    #[serde(rename = "user_id")]
    pub owner: String,
    pub created_at: DateTime<Utc>,
}

/// Raw, unvalidated title/url pair as typed by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookmarkDraft {
    pub title: String,
    pub url: String,
}

impl BookmarkDraft {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
        }
    }
}

impl From<&Bookmark> for BookmarkDraft {
    fn from(bookmark: &Bookmark) -> Self {
        Self::new(bookmark.title.clone(), bookmark.url.clone())
    }
}

/// Validated write payload: trimmed, non-empty title and an absolute http(s) url.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookmarkFields {
    pub title: String,
    pub url: String,
}

const DEFAULT_SCHEME: &str = "https://";

/// Validates a draft and normalizes its url.
///
/// A url without a scheme gets `https://` prepended. A url carrying an explicit
/// scheme other than http/https is rejected instead of being double-prefixed.
pub fn validate_fields(draft: &BookmarkDraft) -> Result<BookmarkFields, ValidationError> {
    let title = draft.title.trim();
    if title.is_empty() {
        return Err(ValidationError::EmptyTitle);
    }
    let url = normalize_url(&draft.url)?;
    Ok(BookmarkFields {
        title: title.to_string(),
        url,
    })
}

/// Normalizes a user-entered url into absolute, scheme-qualified form.
pub fn normalize_url(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyUrl);
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err(ValidationError::MalformedUrl(trimmed.to_string()));
    }

    let lower = trimmed.to_ascii_lowercase();
    let candidate = if lower.starts_with("http://") || lower.starts_with("https://") {
        trimmed.to_string()
    } else if let Some(scheme) = explicit_scheme(trimmed) {
        return Err(ValidationError::UnsupportedScheme(scheme.to_string()));
    } else {
        format!("{}{}", DEFAULT_SCHEME, trimmed)
    };

    let parsed =
        Url::parse(&candidate).map_err(|_| ValidationError::MalformedUrl(trimmed.to_string()))?;
    match parsed.host_str() {
        Some(host) if !host.is_empty() => Ok(candidate),
        _ => Err(ValidationError::MalformedUrl(trimmed.to_string())),
    }
}

/// Returns the scheme of `raw` if it starts with `scheme://`.
fn explicit_scheme(raw: &str) -> Option<&str> {
    let (scheme, _) = raw.split_once("://")?;
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if first.is_ascii_alphabetic()
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    {
        Some(scheme)
    } else {
        None
    }
}
