//! Reconciliation for Marksync.
//!
//! Decides when the full bookmark collection is re-read and republished.
//! `ReconciliationEngine` is the pure policy: at most one read in flight, and
//! any number of triggers arriving during that read collapse into exactly one
//! trailing read. `ReconciliationLoop` drives the engine as the single consumer
//! of a bounded message queue, so no two reconciliation steps ever overlap.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::services::remote_store::RemoteStoreTrait;
use crate::types::bookmark::Bookmark;
use crate::types::change::ChangeEvent;
use crate::types::errors::{StoreError, SyncError};
use crate::types::settings::ReconcileSettings;
use crate::types::snapshot::CollectionSnapshot;

/// Why a refresh was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    /// A local insert, update or delete was acknowledged by the store.
    LocalMutationCompleted,
    /// The push channel announced a change.
    PushNotificationReceived,
    /// First load after the subscription is open.
    Initial,
    /// Explicitly requested by the user.
    Manual,
}

/// What the engine decided to do with a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshDecision {
    /// No read was in flight; the caller must start one now.
    Launch,
    /// A read is in flight; a trailing read is now scheduled.
    Queued,
    /// A read is in flight and a trailing read was already scheduled.
    Coalesced,
}

/// Result of feeding a completed read into the engine.
#[derive(Debug)]
pub struct ReadOutcome {
    /// The replacement snapshot, on success.
    pub snapshot: Option<CollectionSnapshot>,
    /// The failure to surface, on error. The previous snapshot stays current.
    pub error: Option<SyncError>,
    /// True if the caller must immediately start the trailing read.
    pub relaunch: bool,
}

/// Counters reported when the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub reads_issued: u64,
    pub generation: u64,
}

/// Refresh coalescing state for one identity's collection.
#[derive(Debug)]
pub struct ReconciliationEngine {
    owner: String,
    last_requested_at: Option<DateTime<Utc>>,
    refresh_in_flight: bool,
    refresh_queued: bool,
    reads_issued: u64,
    generation: u64,
}

impl ReconciliationEngine {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            last_requested_at: None,
            refresh_in_flight: false,
            refresh_queued: false,
            reads_issued: 0,
            generation: 0,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Registers a trigger. Never allows a second concurrent read.
    pub fn trigger_refresh(&mut self, reason: RefreshReason) -> RefreshDecision {
        self.last_requested_at = Some(Utc::now());

        if self.refresh_in_flight {
            let decision = if self.refresh_queued {
                RefreshDecision::Coalesced
            } else {
                RefreshDecision::Queued
            };
            self.refresh_queued = true;
            debug!(?reason, ?decision, "refresh already in flight");
            return decision;
        }

        self.refresh_in_flight = true;
        self.reads_issued += 1;
        debug!(?reason, "launching refresh");
        RefreshDecision::Launch
    }

    /// Applies the result of the in-flight read.
    ///
    /// Success replaces the snapshot wholesale; failure leaves it untouched.
    /// Either way, a queued trigger turns into exactly one new read.
    pub fn complete_read(&mut self, result: Result<Vec<Bookmark>, StoreError>) -> ReadOutcome {
        self.refresh_in_flight = false;

        let (snapshot, error) = match result {
            Ok(records) => {
                self.generation += 1;
                let snapshot = CollectionSnapshot::from_records(
                    self.owner.clone(),
                    records,
                    self.generation,
                    Utc::now(),
                );
                (Some(snapshot), None)
            }
            Err(e) => (None, Some(SyncError::from(e))),
        };

        let relaunch = self.refresh_queued;
        if relaunch {
            self.refresh_queued = false;
            self.refresh_in_flight = true;
            self.reads_issued += 1;
        }

        ReadOutcome {
            snapshot,
            error,
            relaunch,
        }
    }

    pub fn is_refresh_in_flight(&self) -> bool {
        self.refresh_in_flight
    }

    pub fn is_refresh_queued(&self) -> bool {
        self.refresh_queued
    }

    pub fn last_requested_at(&self) -> Option<DateTime<Utc>> {
        self.last_requested_at
    }

    /// Total reads started since creation.
    pub fn reads_issued(&self) -> u64 {
        self.reads_issued
    }

    /// Number of successful reads applied.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn stats(&self) -> ReconcileStats {
        ReconcileStats {
            reads_issued: self.reads_issued,
            generation: self.generation,
        }
    }
}

/// Messages accepted by the reconciliation loop.
#[derive(Debug)]
pub enum SyncMessage {
    Refresh(RefreshReason),
    Push(ChangeEvent),
    Shutdown,
}

/// Cloneable sender side of the reconciliation queue.
#[derive(Debug, Clone)]
pub struct RefreshTrigger {
    tx: mpsc::Sender<SyncMessage>,
}

impl RefreshTrigger {
    /// Creates a trigger and the queue it feeds.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SyncMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Requests a refresh. Returns false if the loop has stopped.
    pub async fn request(&self, reason: RefreshReason) -> bool {
        self.tx.send(SyncMessage::Refresh(reason)).await.is_ok()
    }

    /// Forwards a push notification. Returns false if the loop has stopped.
    pub async fn notify(&self, change: ChangeEvent) -> bool {
        self.tx.send(SyncMessage::Push(change)).await.is_ok()
    }

    /// Returns true once the loop has stopped consuming messages.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Handle to a running reconciliation loop.
pub struct ReconciliationHandle {
    trigger: RefreshTrigger,
    snapshots: watch::Receiver<Arc<CollectionSnapshot>>,
    failures: broadcast::Sender<SyncError>,
    task: JoinHandle<ReconcileStats>,
}

impl ReconciliationHandle {
    pub fn trigger(&self) -> RefreshTrigger {
        self.trigger.clone()
    }

    /// The most recently published snapshot.
    pub fn snapshot(&self) -> Arc<CollectionSnapshot> {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<Arc<CollectionSnapshot>> {
        self.snapshots.clone()
    }

    /// Receives read failures published after this call.
    pub fn subscribe_failures(&self) -> broadcast::Receiver<SyncError> {
        self.failures.subscribe()
    }

    /// Stops the loop and returns its counters. In-flight reads are abandoned.
    pub async fn shutdown(self) -> ReconcileStats {
        let _ = self.trigger.tx.send(SyncMessage::Shutdown).await;
        match self.task.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "reconciliation loop ended abnormally");
                ReconcileStats::default()
            }
        }
    }
}

/// Single consumer driving a `ReconciliationEngine`.
pub struct ReconciliationLoop {
    engine: ReconciliationEngine,
    store: Arc<dyn RemoteStoreTrait>,
    rx: mpsc::Receiver<SyncMessage>,
    snapshots: watch::Sender<Arc<CollectionSnapshot>>,
    failures: broadcast::Sender<SyncError>,
}

type ReadResult = Result<Vec<Bookmark>, StoreError>;

impl ReconciliationLoop {
    /// Spawns the loop for `owner` and returns its handle.
    ///
    /// Nothing is read until the first trigger arrives.
    pub fn spawn(
        owner: impl Into<String>,
        store: Arc<dyn RemoteStoreTrait>,
        settings: &ReconcileSettings,
    ) -> ReconciliationHandle {
        let owner = owner.into();
        let (trigger, rx) = RefreshTrigger::channel(settings.queue_capacity);
        let (snapshots_tx, snapshots_rx) =
            watch::channel(Arc::new(CollectionSnapshot::empty(owner.clone())));
        let (failures, _) = broadcast::channel(settings.failure_buffer.max(1));

        let this = Self {
            engine: ReconciliationEngine::new(owner),
            store,
            rx,
            snapshots: snapshots_tx,
            failures: failures.clone(),
        };
        let task = tokio::spawn(this.run());

        ReconciliationHandle {
            trigger,
            snapshots: snapshots_rx,
            failures,
            task,
        }
    }

    async fn run(mut self) -> ReconcileStats {
        info!(owner = %self.engine.owner(), "reconciliation loop started");
        // Read completions come back on their own queue so they can never be
        // forged by senders of the public one.
        let (done_tx, mut done_rx) = mpsc::channel::<ReadResult>(1);

        loop {
            tokio::select! {
                biased;
                Some(result) = done_rx.recv() => self.on_read_completed(result, &done_tx),
                message = self.rx.recv() => match message {
                    Some(SyncMessage::Refresh(reason)) => self.on_trigger(reason, &done_tx),
                    Some(SyncMessage::Push(change)) => {
                        debug!(
                            operation = ?change.operation,
                            affected_id = %change.affected_id,
                            "push notification received"
                        );
                        self.on_trigger(RefreshReason::PushNotificationReceived, &done_tx);
                    }
                    Some(SyncMessage::Shutdown) | None => break,
                },
            }
        }

        info!(
            owner = %self.engine.owner(),
            reads = self.engine.reads_issued(),
            "reconciliation loop stopped"
        );
        self.engine.stats()
    }

    fn on_trigger(&mut self, reason: RefreshReason, done_tx: &mpsc::Sender<ReadResult>) {
        if self.engine.trigger_refresh(reason) == RefreshDecision::Launch {
            self.launch_read(done_tx);
        }
    }

    fn on_read_completed(&mut self, result: ReadResult, done_tx: &mpsc::Sender<ReadResult>) {
        let outcome = self.engine.complete_read(result);

        if let Some(snapshot) = outcome.snapshot {
            debug!(
                generation = snapshot.generation,
                records = snapshot.len(),
                "publishing snapshot"
            );
            self.snapshots.send_replace(Arc::new(snapshot));
        }
        if let Some(error) = outcome.error {
            warn!(error = %error, "refresh failed; keeping previous snapshot");
            // No observers is fine; the failure is only informational.
            let _ = self.failures.send(error);
        }
        if outcome.relaunch {
            self.launch_read(done_tx);
        }
    }

    fn launch_read(&self, done_tx: &mpsc::Sender<ReadResult>) {
        let store = Arc::clone(&self.store);
        let owner = self.engine.owner().to_string();
        let done_tx = done_tx.clone();
        tokio::spawn(async move {
            let result = store.list_by_owner(&owner).await;
            // The loop may have shut down meanwhile; the result is then moot.
            let _ = done_tx.send(result).await;
        });
    }
}
