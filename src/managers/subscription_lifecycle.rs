//! Push subscription lifecycle for Marksync.
//!
//! Owns the single push channel of the active identity. Opening is idempotent
//! per identity; closing releases the channel exactly once and stops the
//! forwarder, so no notification is delivered after teardown. The channel
//! status is published on a watch that outlives individual channels:
//! `Connecting` while the backend subscription is pending, then `Open` or
//! `Closed`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::managers::reconciliation::RefreshTrigger;
use crate::services::push_hub::PushService;
use crate::types::change::ChangeEvent;
use crate::types::errors::PushError;
use crate::types::identity::Identity;
use crate::types::subscription::{topic_for, ChannelStatus, SubscriptionChannel};

struct ActiveChannel {
    channel_id: String,
    topic: String,
    owner: String,
    /// Cleared before the forwarder is aborted so a late exit cannot
    /// overwrite the status of a newer channel.
    live: Arc<AtomicBool>,
    forwarder: JoinHandle<()>,
}

impl ActiveChannel {
    fn describe(&self, status: ChannelStatus) -> SubscriptionChannel {
        SubscriptionChannel {
            channel_id: self.channel_id.clone(),
            topic: self.topic.clone(),
            owner: self.owner.clone(),
            status,
        }
    }
}

pub struct SubscriptionLifecycle {
    push: Arc<dyn PushService>,
    status: Arc<watch::Sender<ChannelStatus>>,
    active: Option<ActiveChannel>,
}

impl SubscriptionLifecycle {
    pub fn new(push: Arc<dyn PushService>) -> Self {
        let (status, _) = watch::channel(ChannelStatus::Closed);
        Self {
            push,
            status: Arc::new(status),
            active: None,
        }
    }

    /// Watches the status of whichever channel is current.
    pub fn subscribe_status(&self) -> watch::Receiver<ChannelStatus> {
        self.status.subscribe()
    }

    fn current_status(&self) -> ChannelStatus {
        *self.status.borrow()
    }

    /// Opens the push channel for `identity`, forwarding its changes to `sink`.
    ///
    /// Returns the existing channel if one is already open for the same
    /// identity. A channel for a different identity, or one the backend has
    /// closed, is released first.
    pub async fn open(
        &mut self,
        identity: &Identity,
        sink: RefreshTrigger,
    ) -> Result<SubscriptionChannel, PushError> {
        if let Some(active) = &self.active {
            let reusable =
                active.owner == identity.id && self.current_status() == ChannelStatus::Open;
            if reusable {
                return Ok(active.describe(ChannelStatus::Open));
            }
            self.close().await;
        }

        let owner = identity.id.clone();
        let topic = topic_for(&owner);
        self.status.send_replace(ChannelStatus::Connecting);
        debug!(owner = %owner, topic = %topic, "opening push channel");

        let subscription = match self.push.subscribe(&owner, &topic).await {
            Ok(subscription) => subscription,
            Err(e) => {
                self.status.send_replace(ChannelStatus::Closed);
                return Err(e);
            }
        };
        // Must precede the forwarder so its Closed lands last.
        self.status.send_replace(ChannelStatus::Open);
        let live = Arc::new(AtomicBool::new(true));
        let forwarder = tokio::spawn(forward_changes(
            owner.clone(),
            subscription.receiver,
            sink,
            Arc::clone(&self.status),
            Arc::clone(&live),
        ));

        let active = ActiveChannel {
            channel_id: subscription.channel_id,
            topic,
            owner,
            live,
            forwarder,
        };
        info!(channel_id = %active.channel_id, owner = %active.owner, "push channel open");
        let channel = active.describe(ChannelStatus::Open);
        self.active = Some(active);
        Ok(channel)
    }

    /// Releases the open channel. Returns the closed channel, or `None` if
    /// nothing was open.
    pub async fn close(&mut self) -> Option<SubscriptionChannel> {
        let active = self.active.take()?;
        active.live.store(false, Ordering::SeqCst);
        active.forwarder.abort();

        if let Err(e) = self.push.unsubscribe(&active.channel_id).await {
            warn!(channel_id = %active.channel_id, error = %e, "push unsubscribe failed");
        }
        self.status.send_replace(ChannelStatus::Closed);
        info!(channel_id = %active.channel_id, "push channel closed");

        Some(active.describe(ChannelStatus::Closed))
    }

    /// The currently held channel, if any.
    pub fn channel(&self) -> Option<SubscriptionChannel> {
        let status = self.current_status();
        self.active.as_ref().map(|a| a.describe(status))
    }

    pub fn is_open(&self) -> bool {
        self.active.is_some() && self.current_status() == ChannelStatus::Open
    }
}

impl Drop for SubscriptionLifecycle {
    fn drop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.live.store(false, Ordering::SeqCst);
        active.forwarder.abort();
        self.status.send_replace(ChannelStatus::Closed);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let push = Arc::clone(&self.push);
                runtime.spawn(async move {
                    let _ = push.unsubscribe(&active.channel_id).await;
                });
            }
            Err(_) => {
                warn!(channel_id = %active.channel_id, "push channel dropped outside a runtime");
            }
        }
    }
}

/// Parses payloads and forwards the ones owned by `owner` to the reconciler.
async fn forward_changes(
    owner: String,
    mut receiver: mpsc::Receiver<Value>,
    sink: RefreshTrigger,
    status: Arc<watch::Sender<ChannelStatus>>,
    live: Arc<AtomicBool>,
) {
    while let Some(payload) = receiver.recv().await {
        match ChangeEvent::from_payload(&payload) {
            Ok(change) if change.belongs_to(&owner) => {
                if !sink.notify(change).await {
                    debug!(owner = %owner, "reconciler gone; stopping forwarder");
                    break;
                }
            }
            Ok(change) => {
                warn!(
                    affected_id = %change.affected_id,
                    "discarding change for another owner"
                );
            }
            Err(e) => warn!(error = %e, "discarding malformed push payload"),
        }
    }
    status.send_if_modified(|current| {
        if live.load(Ordering::SeqCst) && *current != ChannelStatus::Closed {
            *current = ChannelStatus::Closed;
            return true;
        }
        false
    });
}
