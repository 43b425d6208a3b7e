//! Marksync RPC Server: JSON-RPC over stdin/stdout for a front-end process.
//!
//! Protocol: one JSON object per line (newline-delimited JSON).
//! Request:  {"id":1, "method":"bookmark.add", "params":{"url":"...","title":"..."}}
//! Response: {"id":1, "result":{...}} or {"id":1, "error":"..."}
//! Events:   {"event":"ready"|"snapshot"|"sync_error"|"redirect", ...}

use std::process::ExitCode;
use std::time::Instant;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use marksync::app::{Collaborators, SyncApp, TOKEN_ENV};
use marksync::logging::init_tracing;
use marksync::rpc_handler::handle_method;
use marksync::services::settings_engine::{SettingsEngine, SettingsEngineTrait};
use marksync::types::errors::AppError;

/// Simple rate limiter: max requests per second.
struct RateLimiter {
    window_start: Instant,
    request_count: u32,
    max_per_second: u32,
}

impl RateLimiter {
    fn new(max_per_second: u32) -> Self {
        Self {
            window_start: Instant::now(),
            request_count: 0,
            max_per_second,
        }
    }

    /// Returns true if the request is allowed, false if rate-limited.
    fn check(&mut self) -> bool {
        if self.window_start.elapsed().as_secs() >= 1 {
            self.window_start = Instant::now();
            self.request_count = 0;
        }
        self.request_count += 1;
        self.request_count <= self.max_per_second
    }
}

fn redirect_event() -> Value {
    json!({"event": "redirect", "to": "/login"})
}

#[tokio::main]
async fn main() -> ExitCode {
    let mut settings_engine = SettingsEngine::new(None);
    let settings = match settings_engine.load() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("marksync-rpc: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&settings.logging.filter);

    // Single writer so responses and events never interleave mid-line.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Value>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(message) = out_rx.recv().await {
            let line = format!("{}\n", message);
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    let token = std::env::var(TOKEN_ENV).ok();
    let started = match Collaborators::from_settings(&settings.backend, token) {
        Ok(collaborators) => SyncApp::start(collaborators, &settings.sync).await,
        Err(e) => Err(e),
    };
    let app = match started {
        Ok(app) => app.with_settings(settings_engine),
        Err(AppError::AuthAbsent) => {
            let _ = out_tx.send(redirect_event());
            drop(out_tx);
            let _ = writer.await;
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start sync session");
            let _ = out_tx.send(json!({"event": "error", "message": e.to_string()}));
            drop(out_tx);
            let _ = writer.await;
            return ExitCode::FAILURE;
        }
    };

    let _ = out_tx.send(json!({
        "event": "ready",
        "version": env!("CARGO_PKG_VERSION"),
        "identity": app.identity(),
    }));

    let mut snapshots = app.subscribe_snapshots();
    let events = out_tx.clone();
    let snapshot_events = tokio::spawn(async move {
        while snapshots.changed().await.is_ok() {
            let snapshot = snapshots.borrow_and_update().clone();
            let event = json!({
                "event": "snapshot",
                "generation": snapshot.generation,
                "count": snapshot.len(),
            });
            if events.send(event).is_err() {
                break;
            }
        }
    });

    let mut failures = app.subscribe_failures();
    let events = out_tx.clone();
    let failure_events = tokio::spawn(async move {
        while let Ok(error) = failures.recv().await {
            if events
                .send(json!({"event": "sync_error", "message": error.to_string()}))
                .is_err()
            {
                break;
            }
        }
    });

    // Max 200 RPC requests per second.
    let mut rate_limiter = RateLimiter::new(200);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }

        let req: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                let _ = out_tx.send(json!({"id": null, "error": format!("parse error: {}", e)}));
                continue;
            }
        };

        let id = req.get("id").cloned().unwrap_or(Value::Null);

        if !rate_limiter.check() {
            let _ = out_tx.send(json!({"id": id, "error": "rate limit exceeded"}));
            continue;
        }

        let method = req.get("method").and_then(|v| v.as_str()).unwrap_or("");
        let params = req.get("params").cloned().unwrap_or(json!({}));

        let response = match handle_method(&app, method, &params).await {
            Ok(val) => json!({"id": id, "result": val}),
            Err(err) => json!({"id": id, "error": err}),
        };
        let _ = out_tx.send(response);

        if method == "session.sign_out" && !app.is_active() {
            let _ = out_tx.send(redirect_event());
        }
    }

    app.shutdown().await;
    snapshot_events.abort();
    failure_events.abort();
    drop(out_tx);
    let _ = writer.await;
    ExitCode::SUCCESS
}
