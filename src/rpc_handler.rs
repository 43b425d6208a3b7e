//! RPC method handler for the Marksync JSON-RPC protocol.
//!
//! Extracted from `rpc_server.rs` so it can be unit-tested independently.
//! The `handle_method` function dispatches JSON-RPC method calls to the
//! session gate, reconciler, edit controller and settings engine via the
//! `SyncApp` struct.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::app::SyncApp;
use crate::managers::record_edit::WriteOutcome;
use crate::managers::session_gate::GateDecision;
use crate::services::settings_engine::{SettingsEngine, SettingsEngineTrait};
use crate::types::bookmark::{Bookmark, BookmarkDraft};
use crate::types::errors::SyncError;

/// Human-readable age of a bookmark, as shown next to it in the list.
pub fn format_age(created_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - created_at).num_seconds().max(0);
    if seconds < 60 {
        return "just now".to_string();
    }
    let minutes = seconds / 60;
    if minutes < 60 {
        return format!("{}m ago", minutes);
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("{}h ago", hours);
    }
    format!("{}d ago", hours / 24)
}

fn bookmark_json(bookmark: &Bookmark, now: DateTime<Utc>) -> Value {
    json!({
        "id": bookmark.id,
        "title": bookmark.title,
        "url": bookmark.url,
        "created_at": bookmark.created_at.to_rfc3339(),
        "age": format_age(bookmark.created_at, now),
    })
}

fn str_param<'a>(params: &'a Value, key: &str) -> Result<&'a str, String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("missing {}", key))
}

fn draft_param(params: &Value) -> Result<BookmarkDraft, String> {
    Ok(BookmarkDraft::new(
        str_param(params, "title")?,
        str_param(params, "url")?,
    ))
}

fn write_json(id: &str, outcome: WriteOutcome) -> Value {
    json!({
        "id": id,
        "ok": true,
        "already_in_flight": outcome == WriteOutcome::AlreadyInFlight,
    })
}

fn err(e: SyncError) -> String {
    e.to_string()
}

fn settings_engine(app: &SyncApp) -> Result<&Mutex<SettingsEngine>, String> {
    app.settings()
        .ok_or_else(|| "settings are not available in this session".to_string())
}

/// Dispatch a JSON-RPC method call to the appropriate handler.
///
/// Returns `Ok(Value)` on success or `Err(String)` with an error message.
pub async fn handle_method(app: &SyncApp, method: &str, params: &Value) -> Result<Value, String> {
    if method == "ping" {
        return Ok(json!({"pong": true}));
    }
    if !app.is_active() {
        return Err(err(SyncError::AuthAbsent));
    }

    match method {
        // ─── Session ───
        "session.whoami" => {
            let identity = app.identity();
            let channel = app.channel().await;
            Ok(json!({
                "id": identity.id,
                "label": identity.label,
                "channel": channel,
            }))
        }
        "session.sign_out" => match app.sign_out().await {
            GateDecision::RedirectToLogin => Ok(json!({"ok": true, "redirect": "/login"})),
            GateDecision::Proceed(_) => Err("sign-out did not clear the session".to_string()),
        },

        // ─── Bookmarks ───
        "bookmark.list" => {
            let snapshot = app.snapshot();
            let now = Utc::now();
            let items: Vec<Value> = snapshot
                .records
                .iter()
                .map(|b| bookmark_json(b, now))
                .collect();
            Ok(json!({
                "count": snapshot.len(),
                "generation": snapshot.generation,
                "bookmarks": items,
            }))
        }
        "bookmark.add" => {
            let draft = draft_param(params)?;
            let bookmark = app.edits().create(draft).await.map_err(err)?;
            Ok(bookmark_json(&bookmark, Utc::now()))
        }
        "bookmark.edit.start" => {
            let id = str_param(params, "id")?;
            let state = app.edits().start_edit(id).map_err(err)?;
            serde_json::to_value(state).map_err(|e| e.to_string())
        }
        "bookmark.edit.draft" => {
            let id = str_param(params, "id")?;
            let draft = draft_param(params)?;
            app.edits().update_draft(id, draft).map_err(err)?;
            Ok(json!({"ok": true}))
        }
        "bookmark.edit.save" => {
            let id = str_param(params, "id")?;
            let outcome = app.edits().save(id).await.map_err(err)?;
            Ok(write_json(id, outcome))
        }
        "bookmark.edit.cancel" => {
            let id = str_param(params, "id")?;
            let state = app.edits().cancel(id);
            serde_json::to_value(state).map_err(|e| e.to_string())
        }
        "bookmark.delete" => {
            let id = str_param(params, "id")?;
            let outcome = app.edits().start_delete(id).await.map_err(err)?;
            Ok(write_json(id, outcome))
        }
        "bookmark.state" => {
            let id = str_param(params, "id")?;
            let state = app.edits().state(id);
            let mut value = serde_json::to_value(state).map_err(|e| e.to_string())?;
            if let Some(obj) = value.as_object_mut() {
                obj.insert("last_error".to_string(), json!(app.edits().last_error(id)));
            }
            Ok(value)
        }

        // ─── Settings ───
        "settings.get" => {
            let engine = settings_engine(app)?.lock().map_err(|e| e.to_string())?;
            let settings = engine.get_settings();
            serde_json::to_value(settings).map_err(|e| e.to_string())
        }
        "settings.set" => {
            let key = str_param(params, "key")?;
            let value = params.get("value").cloned().ok_or("missing value")?;
            let mut engine = settings_engine(app)?.lock().map_err(|e| e.to_string())?;
            engine.set_value(key, value).map_err(|e| e.to_string())?;
            // Backend and sync settings apply to the next session.
            Ok(json!({"ok": true, "path": engine.get_config_path()}))
        }
        "settings.reset" => {
            let mut engine = settings_engine(app)?.lock().map_err(|e| e.to_string())?;
            engine.reset().map_err(|e| e.to_string())?;
            Ok(json!({"ok": true}))
        }

        // ─── Sync ───
        "sync.refresh" => {
            app.refresh().await.map_err(err)?;
            Ok(json!({"ok": true}))
        }

        _ => Err(format!("unknown method: {}", method)),
    }
}
