//! Push collaborator for Marksync.
//!
//! Defines `PushService`, the boundary a realtime backend must satisfy, and
//! `PushHub`, an in-process fan-out implementation used by the local backend.
//! Payloads cross this boundary as raw JSON; typing happens in the subscriber.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::types::change::ChangeEvent;
use crate::types::errors::PushError;

const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

/// A live subscription handed out by a push backend.
pub struct PushSubscription {
    pub channel_id: String,
    pub receiver: mpsc::Receiver<Value>,
}

/// Trait defining the push-channel operations the core relies on.
#[async_trait]
pub trait PushService: Send + Sync {
    /// Opens a channel delivering change payloads for rows owned by `owner`.
    async fn subscribe(&self, owner: &str, topic: &str) -> Result<PushSubscription, PushError>;
    /// Releases a channel previously returned by `subscribe`.
    async fn unsubscribe(&self, channel_id: &str) -> Result<(), PushError>;
}

struct Subscriber {
    owner: String,
    topic: String,
    tx: mpsc::Sender<Value>,
}

/// In-process push hub: every committed write is fanned out to the
/// subscribers whose owner filter matches.
pub struct PushHub {
    subscribers: Mutex<HashMap<String, Subscriber>>,
    capacity: usize,
}

impl Default for PushHub {
    fn default() -> Self {
        Self::new()
    }
}

impl PushHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }

    /// Creates a hub whose per-subscriber queues hold at most `capacity` payloads.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Number of currently open channels.
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Publishes a typed change to the subscribers of its owner.
    pub fn publish_change(&self, owner: &str, change: &ChangeEvent) -> usize {
        self.deliver(|s| s.owner == owner, change.to_payload())
    }

    /// Publishes a raw payload to every subscriber of `topic`, bypassing the
    /// owner filter. Mirrors the realtime "broadcast" feature.
    pub fn broadcast_to_topic(&self, topic: &str, payload: Value) -> usize {
        self.deliver(|s| s.topic == topic, payload)
    }

    fn deliver(&self, matches: impl Fn(&Subscriber) -> bool, payload: Value) -> usize {
        let mut subscribers = self.lock();
        let mut delivered = 0;
        let mut gone = Vec::new();

        for (channel_id, sub) in subscribers.iter().filter(|(_, s)| matches(s)) {
            match sub.tx.try_send(payload.clone()) {
                Ok(()) => delivered += 1,
                // A full queue still holds undelivered notifications that will
                // trigger a read after this commit, so dropping this one is safe.
                Err(TrySendError::Full(_)) => {
                    tracing::debug!(channel_id = %channel_id, "push queue full, dropping payload");
                }
                Err(TrySendError::Closed(_)) => gone.push(channel_id.clone()),
            }
        }

        for channel_id in gone {
            subscribers.remove(&channel_id);
            tracing::debug!(channel_id = %channel_id, "pruned closed push channel");
        }
        delivered
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl PushService for PushHub {
    async fn subscribe(&self, owner: &str, topic: &str) -> Result<PushSubscription, PushError> {
        let (tx, receiver) = mpsc::channel(self.capacity);
        let channel_id = Uuid::new_v4().to_string();
        self.lock().insert(
            channel_id.clone(),
            Subscriber {
                owner: owner.to_string(),
                topic: topic.to_string(),
                tx,
            },
        );
        tracing::debug!(channel_id = %channel_id, topic, "push channel subscribed");
        Ok(PushSubscription {
            channel_id,
            receiver,
        })
    }

    async fn unsubscribe(&self, channel_id: &str) -> Result<(), PushError> {
        match self.lock().remove(channel_id) {
            Some(_) => Ok(()),
            None => Err(PushError::ChannelNotFound(channel_id.to_string())),
        }
    }
}
