use serde::{Deserialize, Serialize};

/// Top-level settings container. Missing keys fall back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct SyncSettings {
    pub backend: BackendSettings,
    pub sync: ReconcileSettings,
    pub logging: LoggingSettings,
}

/// Which remote store / auth / push collaborators to wire up.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BackendKind {
    /// SQLite store and in-process push hub.
    Local,
    /// Hosted PostgREST store and auth endpoints.
    Rest,
}

/// Remote store connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendSettings {
    pub kind: BackendKind,
    /// SQLite file for the local backend; `None` uses the platform data dir.
    pub database_path: Option<String>,
    /// Project URL for the REST backend, e.g. `https://xyz.supabase.co`.
    pub rest_url: Option<String>,
    /// Public API key sent as the `apikey` header.
    pub api_key: Option<String>,
    /// Realtime websocket URL; derived from `rest_url` when unset.
    pub realtime_url: Option<String>,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            kind: BackendKind::Local,
            database_path: None,
            rest_url: None,
            api_key: None,
            realtime_url: None,
        }
    }
}

/// Reconciliation queue sizing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconcileSettings {
    /// Capacity of the bounded queue feeding the reconciliation loop.
    pub queue_capacity: usize,
    /// How many read failures are buffered for slow observers.
    pub failure_buffer: usize,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            failure_buffer: 16,
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    /// `tracing-subscriber` filter directive.
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "marksync=info".to_string(),
        }
    }
}
