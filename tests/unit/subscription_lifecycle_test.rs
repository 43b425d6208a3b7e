//! Unit tests for the push subscription lifecycle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;

use marksync::managers::reconciliation::{RefreshTrigger, SyncMessage};
use marksync::managers::subscription_lifecycle::SubscriptionLifecycle;
use marksync::services::push_hub::{PushHub, PushService, PushSubscription};
use marksync::types::change::{ChangeEvent, ChangeOperation};
use marksync::types::errors::PushError;
use marksync::types::identity::Identity;
use marksync::types::subscription::ChannelStatus;

fn alice() -> Identity {
    Identity::new("u1", "alice@example.com")
}

fn insert_of(id: &str, owner: &str) -> ChangeEvent {
    ChangeEvent {
        operation: ChangeOperation::Insert,
        affected_id: id.to_string(),
        owner: Some(owner.to_string()),
    }
}

async fn next_push(rx: &mut mpsc::Receiver<SyncMessage>) -> Option<ChangeEvent> {
    match timeout(Duration::from_secs(2), rx.recv()).await {
        Ok(Some(SyncMessage::Push(change))) => Some(change),
        _ => None,
    }
}

/// Push service wrapper counting subscribe/unsubscribe calls.
struct CountingPush {
    hub: PushHub,
    subscribes: AtomicUsize,
    unsubscribes: AtomicUsize,
}

impl CountingPush {
    fn new() -> Self {
        Self {
            hub: PushHub::new(),
            subscribes: AtomicUsize::new(0),
            unsubscribes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PushService for CountingPush {
    async fn subscribe(&self, owner: &str, topic: &str) -> Result<PushSubscription, PushError> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        self.hub.subscribe(owner, topic).await
    }

    async fn unsubscribe(&self, channel_id: &str) -> Result<(), PushError> {
        self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        self.hub.unsubscribe(channel_id).await
    }
}

/// Push service whose subscribe waits until the test releases it.
struct GatedPush {
    hub: PushHub,
    release: Notify,
    refuse: bool,
}

impl GatedPush {
    fn new(refuse: bool) -> Self {
        Self {
            hub: PushHub::new(),
            release: Notify::new(),
            refuse,
        }
    }
}

#[async_trait]
impl PushService for GatedPush {
    async fn subscribe(&self, owner: &str, topic: &str) -> Result<PushSubscription, PushError> {
        self.release.notified().await;
        if self.refuse {
            return Err(PushError::SubscribeFailed("join rejected".to_string()));
        }
        self.hub.subscribe(owner, topic).await
    }

    async fn unsubscribe(&self, channel_id: &str) -> Result<(), PushError> {
        self.hub.unsubscribe(channel_id).await
    }
}

#[tokio::test]
async fn open_forwards_owner_changes() {
    let hub = Arc::new(PushHub::new());
    let (trigger, mut rx) = RefreshTrigger::channel(8);
    let mut lifecycle = SubscriptionLifecycle::new(hub.clone());

    let channel = lifecycle.open(&alice(), trigger).await.unwrap();
    assert_eq!(channel.topic, "bookmarks-u1");
    assert_eq!(channel.status, ChannelStatus::Open);

    assert_eq!(hub.publish_change("u1", &insert_of("bm-1", "u1")), 1);
    assert_eq!(next_push(&mut rx).await, Some(insert_of("bm-1", "u1")));
}

#[tokio::test]
async fn open_is_idempotent_for_same_identity() {
    let push = Arc::new(CountingPush::new());
    let (trigger, _rx) = RefreshTrigger::channel(8);
    let mut lifecycle = SubscriptionLifecycle::new(push.clone());

    let first = lifecycle.open(&alice(), trigger.clone()).await.unwrap();
    let second = lifecycle.open(&alice(), trigger).await.unwrap();

    assert_eq!(first.channel_id, second.channel_id);
    assert_eq!(push.subscribes.load(Ordering::SeqCst), 1);
    assert_eq!(push.hub.subscriber_count(), 1);
}

#[tokio::test]
async fn open_for_another_identity_replaces_channel() {
    let push = Arc::new(CountingPush::new());
    let (trigger, _rx) = RefreshTrigger::channel(8);
    let mut lifecycle = SubscriptionLifecycle::new(push.clone());

    let first = lifecycle.open(&alice(), trigger.clone()).await.unwrap();
    let second = lifecycle
        .open(&Identity::new("u2", "bob@example.com"), trigger)
        .await
        .unwrap();

    assert_ne!(first.channel_id, second.channel_id);
    assert_eq!(second.owner, "u2");
    assert_eq!(push.unsubscribes.load(Ordering::SeqCst), 1);
    assert_eq!(push.hub.subscriber_count(), 1);
}

#[tokio::test]
async fn close_unsubscribes_exactly_once() {
    let push = Arc::new(CountingPush::new());
    let (trigger, _rx) = RefreshTrigger::channel(8);
    let mut lifecycle = SubscriptionLifecycle::new(push.clone());
    lifecycle.open(&alice(), trigger).await.unwrap();

    let closed = lifecycle.close().await.unwrap();
    assert_eq!(closed.status, ChannelStatus::Closed);
    assert!(lifecycle.close().await.is_none());
    assert!(lifecycle.channel().is_none());

    assert_eq!(push.unsubscribes.load(Ordering::SeqCst), 1);
    assert_eq!(push.hub.subscriber_count(), 0);
}

#[tokio::test]
async fn nothing_is_delivered_after_close() {
    let hub = Arc::new(PushHub::new());
    let (trigger, mut rx) = RefreshTrigger::channel(8);
    let mut lifecycle = SubscriptionLifecycle::new(hub.clone());
    lifecycle.open(&alice(), trigger).await.unwrap();
    lifecycle.close().await;

    assert_eq!(hub.publish_change("u1", &insert_of("bm-1", "u1")), 0);
    assert!(next_push(&mut rx).await.is_none());
}

#[tokio::test]
async fn malformed_and_foreign_payloads_are_dropped() {
    let hub = Arc::new(PushHub::new());
    let (trigger, mut rx) = RefreshTrigger::channel(8);
    let mut lifecycle = SubscriptionLifecycle::new(hub.clone());
    lifecycle.open(&alice(), trigger).await.unwrap();

    hub.broadcast_to_topic("bookmarks-u1", json!("not an object"));
    hub.broadcast_to_topic("bookmarks-u1", json!({"eventType": "INSERT", "new": {}}));
    hub.broadcast_to_topic("bookmarks-u1", insert_of("bm-x", "u2").to_payload());
    hub.broadcast_to_topic("bookmarks-u1", insert_of("bm-ok", "u1").to_payload());

    assert_eq!(next_push(&mut rx).await, Some(insert_of("bm-ok", "u1")));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn backend_closing_channel_allows_reopen() {
    let push = Arc::new(CountingPush::new());
    let (trigger, _rx) = RefreshTrigger::channel(8);
    let mut lifecycle = SubscriptionLifecycle::new(push.clone());
    let first = lifecycle.open(&alice(), trigger.clone()).await.unwrap();

    // The backend dropping the channel ends the forwarder.
    push.hub.unsubscribe(&first.channel_id).await.unwrap();
    timeout(Duration::from_secs(2), async {
        while lifecycle.is_open() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("channel should be reported closed");

    let second = lifecycle.open(&alice(), trigger).await.unwrap();
    assert_ne!(first.channel_id, second.channel_id);
    assert_eq!(push.subscribes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn dropping_lifecycle_releases_channel() {
    let hub = Arc::new(PushHub::new());
    let (trigger, _rx) = RefreshTrigger::channel(8);
    {
        let mut lifecycle = SubscriptionLifecycle::new(hub.clone());
        lifecycle.open(&alice(), trigger).await.unwrap();
        assert_eq!(hub.subscriber_count(), 1);
    }
    timeout(Duration::from_secs(2), async {
        while hub.subscriber_count() > 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("dropped lifecycle should unsubscribe");
}

#[tokio::test]
async fn status_is_connecting_until_backend_confirms() {
    let push = Arc::new(GatedPush::new(false));
    let (trigger, _rx) = RefreshTrigger::channel(8);
    let mut lifecycle = SubscriptionLifecycle::new(push.clone());
    let mut status = lifecycle.subscribe_status();
    assert_eq!(*status.borrow(), ChannelStatus::Closed);

    let opening = tokio::spawn(async move {
        let result = lifecycle.open(&alice(), trigger).await;
        (lifecycle, result)
    });
    timeout(Duration::from_secs(2), status.wait_for(|s| *s == ChannelStatus::Connecting))
        .await
        .expect("Connecting never published")
        .unwrap();

    push.release.notify_one();
    let (mut lifecycle, result) = opening.await.unwrap();
    assert_eq!(result.unwrap().status, ChannelStatus::Open);
    assert_eq!(*status.borrow_and_update(), ChannelStatus::Open);

    lifecycle.close().await;
    assert_eq!(*status.borrow(), ChannelStatus::Closed);
}

#[tokio::test]
async fn refused_subscribe_falls_back_to_closed() {
    let push = Arc::new(GatedPush::new(true));
    let (trigger, _rx) = RefreshTrigger::channel(8);
    let mut lifecycle = SubscriptionLifecycle::new(push.clone());
    let status = lifecycle.subscribe_status();

    push.release.notify_one();
    let result = lifecycle.open(&alice(), trigger).await;

    assert!(matches!(result, Err(PushError::SubscribeFailed(_))));
    assert_eq!(*status.borrow(), ChannelStatus::Closed);
    assert!(lifecycle.channel().is_none());
}

#[tokio::test]
async fn backend_close_is_published() {
    let push = Arc::new(CountingPush::new());
    let (trigger, _rx) = RefreshTrigger::channel(8);
    let mut lifecycle = SubscriptionLifecycle::new(push.clone());
    let mut status = lifecycle.subscribe_status();
    let channel = lifecycle.open(&alice(), trigger).await.unwrap();

    push.hub.unsubscribe(&channel.channel_id).await.unwrap();
    timeout(Duration::from_secs(2), status.wait_for(|s| *s == ChannelStatus::Closed))
        .await
        .expect("Closed never published")
        .unwrap();
    assert_eq!(lifecycle.channel().unwrap().status, ChannelStatus::Closed);
}
