//! App Core for Marksync.
//!
//! Wires the collaborators and the four core managers into one running sync
//! session for a single identity, and tears it down again.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, Instrument};

use crate::database::Database;
use crate::managers::reconciliation::{
    ReconciliationHandle, ReconciliationLoop, RefreshReason, RefreshTrigger,
};
use crate::managers::record_edit::RecordEditController;
use crate::managers::session_gate::{GateDecision, SessionGate};
use crate::managers::subscription_lifecycle::SubscriptionLifecycle;
use crate::platform;
use crate::services::auth::{AuthProviderTrait, LocalAuth, RestAuth};
use crate::services::push_hub::{PushHub, PushService};
use crate::services::realtime::RealtimeClient;
use crate::services::remote_store::{RemoteStoreTrait, SqliteStore};
use crate::services::rest_store::{RestConfig, RestStore};
use crate::services::settings_engine::SettingsEngine;
use crate::types::errors::{AppError, SyncError};
use crate::types::identity::Identity;
use crate::types::settings::{BackendKind, BackendSettings, ReconcileSettings};
use crate::types::snapshot::CollectionSnapshot;
use crate::types::subscription::SubscriptionChannel;

/// Environment variable carrying the session or access token.
pub const TOKEN_ENV: &str = "MARKSYNC_TOKEN";

/// The three collaborators a sync session talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub auth: Arc<dyn AuthProviderTrait>,
    pub store: Arc<dyn RemoteStoreTrait>,
    pub push: Arc<dyn PushService>,
}

impl Collaborators {
    /// Local backend: SQLite store announcing its writes on `hub`.
    ///
    /// Clients sharing `db` and `hub` see each other's changes.
    pub fn local(db: Arc<Database>, hub: Arc<PushHub>, token: Option<String>) -> Self {
        let auth = match token {
            Some(token) => LocalAuth::with_token(db.clone(), token),
            None => LocalAuth::new(db.clone()),
        };
        Self {
            auth: Arc::new(auth),
            store: Arc::new(SqliteStore::with_hub(db, hub.clone())),
            push: hub,
        }
    }

    /// Hosted backend: PostgREST store, auth endpoints and the realtime
    /// websocket, which delivers every client's committed changes.
    pub fn rest(config: RestConfig) -> Self {
        Self {
            auth: Arc::new(RestAuth::new(config.clone())),
            push: Arc::new(RealtimeClient::new(&config)),
            store: Arc::new(RestStore::new(config)),
        }
    }

    /// Builds the collaborators named by `backend`.
    pub fn from_settings(backend: &BackendSettings, token: Option<String>) -> Result<Self, AppError> {
        match backend.kind {
            BackendKind::Local => {
                let path = backend
                    .database_path
                    .as_ref()
                    .map(PathBuf::from)
                    .unwrap_or_else(platform::default_database_path);
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        AppError::Config(format!("cannot create {}: {}", parent.display(), e))
                    })?;
                }
                let db = Arc::new(Database::open(&path)?);
                Ok(Self::local(db, Arc::new(PushHub::new()), token))
            }
            BackendKind::Rest => {
                let url = backend
                    .rest_url
                    .clone()
                    .ok_or_else(|| AppError::Config("backend.rest_url is not set".to_string()))?;
                let api_key = backend
                    .api_key
                    .clone()
                    .ok_or_else(|| AppError::Config("backend.api_key is not set".to_string()))?;
                let token = token.ok_or(AppError::AuthAbsent)?;
                let mut config = RestConfig::new(url, api_key, token);
                if let Some(realtime_url) = &backend.realtime_url {
                    config = config.with_realtime_url(realtime_url.clone());
                }
                Ok(Self::rest(config))
            }
        }
    }
}

/// A running sync session for one identity.
pub struct SyncApp {
    identity: Identity,
    gate: SessionGate,
    lifecycle: Mutex<SubscriptionLifecycle>,
    reconciler: Mutex<Option<ReconciliationHandle>>,
    trigger: RefreshTrigger,
    edits: Arc<RecordEditController>,
    snapshots: watch::Receiver<Arc<CollectionSnapshot>>,
    failures: broadcast::Receiver<SyncError>,
    relay: JoinHandle<()>,
    active: AtomicBool,
    settings: Option<std::sync::Mutex<SettingsEngine>>,
}

impl SyncApp {
    /// Resolves the identity and starts syncing its collection.
    ///
    /// The subscription is opened before the initial read, so no change
    /// committed after that read can go unnoticed.
    pub async fn start(
        collaborators: Collaborators,
        settings: &ReconcileSettings,
    ) -> Result<Self, AppError> {
        let gate = SessionGate::new(collaborators.auth);
        let identity = match gate.resolve_identity().await {
            GateDecision::Proceed(identity) => identity,
            GateDecision::RedirectToLogin => return Err(AppError::AuthAbsent),
        };
        let span = tracing::info_span!("sync_app", owner = %identity.id);

        let handle = ReconciliationLoop::spawn(
            identity.id.clone(),
            Arc::clone(&collaborators.store),
            settings,
        );
        let trigger = handle.trigger();

        let mut lifecycle = SubscriptionLifecycle::new(collaborators.push);
        if let Err(e) = lifecycle
            .open(&identity, trigger.clone())
            .instrument(span.clone())
            .await
        {
            handle.shutdown().await;
            return Err(e.into());
        }

        let edits = Arc::new(RecordEditController::new(
            identity.id.clone(),
            collaborators.store,
            trigger.clone(),
        ));

        let (snapshots_tx, snapshots) =
            watch::channel(Arc::new(CollectionSnapshot::empty(identity.id.clone())));
        let relay = tokio::spawn(
            relay_snapshots(handle.subscribe_snapshots(), Arc::clone(&edits), snapshots_tx)
                .instrument(span.clone()),
        );
        let failures = handle.subscribe_failures();

        trigger.request(RefreshReason::Initial).await;
        span.in_scope(|| info!("sync session started"));

        Ok(Self {
            identity,
            gate,
            lifecycle: Mutex::new(lifecycle),
            reconciler: Mutex::new(Some(handle)),
            trigger,
            edits,
            snapshots,
            failures,
            relay,
            active: AtomicBool::new(true),
            settings: None,
        })
    }

    /// Attaches the settings engine the session was configured from.
    pub fn with_settings(mut self, engine: SettingsEngine) -> Self {
        self.settings = Some(std::sync::Mutex::new(engine));
        self
    }

    pub fn settings(&self) -> Option<&std::sync::Mutex<SettingsEngine>> {
        self.settings.as_ref()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// True until `sign_out` or `shutdown` runs.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// The latest snapshot the edit controller has adopted.
    pub fn snapshot(&self) -> Arc<CollectionSnapshot> {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<Arc<CollectionSnapshot>> {
        self.snapshots.clone()
    }

    pub fn subscribe_failures(&self) -> broadcast::Receiver<SyncError> {
        self.failures.resubscribe()
    }

    pub fn edits(&self) -> &RecordEditController {
        &self.edits
    }

    /// Waits until a snapshot of at least `generation` is published.
    ///
    /// Returns `None` if the session ends first.
    pub async fn wait_for_generation(&self, generation: u64) -> Option<Arc<CollectionSnapshot>> {
        let mut rx = self.snapshots.clone();
        loop {
            let current = rx.borrow_and_update().clone();
            if current.generation >= generation {
                return Some(current);
            }
            if rx.changed().await.is_err() {
                return None;
            }
        }
    }

    /// Requests a refresh on behalf of the user.
    pub async fn refresh(&self) -> Result<(), SyncError> {
        if !self.is_active() || !self.trigger.request(RefreshReason::Manual).await {
            return Err(SyncError::AuthAbsent);
        }
        Ok(())
    }

    pub async fn channel(&self) -> Option<SubscriptionChannel> {
        self.lifecycle.lock().await.channel()
    }

    /// Tears the session down and ends it with the auth provider.
    pub async fn sign_out(&self) -> GateDecision {
        self.teardown().await;
        self.gate.sign_out().await
    }

    /// Tears the session down without signing out.
    pub async fn shutdown(&self) {
        self.teardown().await;
    }

    async fn teardown(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        self.lifecycle.lock().await.close().await;
        if let Some(handle) = self.reconciler.lock().await.take() {
            let stats = handle.shutdown().await;
            info!(
                owner = %self.identity.id,
                reads = stats.reads_issued,
                generation = stats.generation,
                "sync session stopped"
            );
        }
        self.relay.abort();
    }
}

impl Drop for SyncApp {
    fn drop(&mut self) {
        // The relay keeps a trigger alive through the edit controller; the
        // loop only stops once every trigger is gone.
        self.relay.abort();
    }
}

/// Hands each published snapshot to the edit controller, then republishes it.
async fn relay_snapshots(
    mut source: watch::Receiver<Arc<CollectionSnapshot>>,
    edits: Arc<RecordEditController>,
    sink: watch::Sender<Arc<CollectionSnapshot>>,
) {
    while source.changed().await.is_ok() {
        let snapshot = source.borrow_and_update().clone();
        edits.apply_snapshot(Arc::clone(&snapshot));
        sink.send_replace(snapshot);
    }
}
