//! Unit tests for the hosted realtime push client against an in-process socket server.

#[path = "../support/realtime_server.rs"]
mod realtime_server;

use std::time::Duration;

use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

use marksync::services::push_hub::PushService;
use marksync::services::realtime::RealtimeClient;
use marksync::services::rest_store::RestConfig;
use marksync::types::change::{ChangeEvent, ChangeOperation};
use marksync::types::errors::PushError;
use realtime_server::RealtimeServer;

fn client(server: &RealtimeServer, token: &str) -> RealtimeClient {
    let config = RestConfig::new("http://127.0.0.1:9", "anon-key", token)
        .with_realtime_url(server.url.clone());
    RealtimeClient::new(&config)
}

fn row(id: &str, owner: &str) -> Value {
    json!({
        "id": id,
        "title": "Rust",
        "url": "https://rust-lang.org",
        "user_id": owner,
        "created_at": "2024-05-01T10:00:00Z",
    })
}

async fn next_change(receiver: &mut mpsc::Receiver<Value>) -> ChangeEvent {
    let payload = timeout(Duration::from_secs(5), receiver.recv())
        .await
        .expect("no change delivered")
        .expect("channel ended");
    ChangeEvent::from_payload(&payload).unwrap()
}

#[tokio::test]
async fn join_carries_owner_filter_and_token() {
    let server = RealtimeServer::start().await;
    let realtime = client(&server, "laptop-token");

    let _subscription = realtime.subscribe("u1", "bookmarks-u1").await.unwrap();

    let joins = server.joins();
    assert_eq!(joins.len(), 1);
    let join = &joins[0];
    assert_eq!(join["topic"], "realtime:bookmarks-u1");
    assert_eq!(join["event"], "phx_join");
    assert_eq!(join["payload"]["access_token"], "laptop-token");
    let changes = &join["payload"]["config"]["postgres_changes"][0];
    assert_eq!(changes["table"], "bookmarks");
    assert_eq!(changes["filter"], "user_id=eq.u1");
    assert_eq!(realtime.channel_count(), 1);
}

#[tokio::test]
async fn insert_by_one_client_reaches_both_subscribers() {
    let server = RealtimeServer::start().await;
    let laptop = client(&server, "laptop-token");
    let phone = client(&server, "phone-token");
    let mut laptop_sub = laptop.subscribe("u1", "bookmarks-u1").await.unwrap();
    let mut phone_sub = phone.subscribe("u1", "bookmarks-u1").await.unwrap();

    // The laptop's insert commits; the service announces it to every joined socket.
    server.announce("u1", "INSERT", row("b7", "u1"));

    let seen = next_change(&mut phone_sub.receiver).await;
    assert_eq!(seen.operation, ChangeOperation::Insert);
    assert_eq!(seen.affected_id, "b7");
    assert_eq!(seen.owner.as_deref(), Some("u1"));
    assert_eq!(next_change(&mut laptop_sub.receiver).await.affected_id, "b7");
}

#[tokio::test]
async fn changes_for_other_owners_are_not_delivered() {
    let server = RealtimeServer::start().await;
    let realtime = client(&server, "token");
    let mut subscription = realtime.subscribe("u1", "bookmarks-u1").await.unwrap();

    server.announce("u2", "INSERT", row("foreign", "u2"));
    server.announce("u1", "INSERT", row("mine", "u1"));

    assert_eq!(next_change(&mut subscription.receiver).await.affected_id, "mine");
}

#[tokio::test]
async fn delete_is_reported_from_old_record() {
    let server = RealtimeServer::start().await;
    let realtime = client(&server, "token");
    let mut subscription = realtime.subscribe("u1", "bookmarks-u1").await.unwrap();

    server.announce("u1", "DELETE", json!({ "id": "b3" }));

    let seen = next_change(&mut subscription.receiver).await;
    assert_eq!(seen.operation, ChangeOperation::Delete);
    assert_eq!(seen.affected_id, "b3");
}

#[tokio::test]
async fn refused_join_is_subscribe_failed() {
    let server = RealtimeServer::start_refusing(Some("expired")).await;
    let realtime = client(&server, "expired");

    match realtime.subscribe("u1", "bookmarks-u1").await {
        Err(PushError::SubscribeFailed(message)) => assert!(message.contains("join rejected")),
        other => panic!("expected SubscribeFailed, got {:?}", other.map(|s| s.channel_id)),
    }
    assert_eq!(realtime.channel_count(), 0);
}

#[tokio::test]
async fn unreachable_endpoint_is_subscribe_failed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = RestConfig::new("http://127.0.0.1:9", "anon-key", "token")
        .with_realtime_url(format!("ws://{}/realtime/v1/websocket", addr));
    let realtime = RealtimeClient::new(&config);

    assert!(matches!(
        realtime.subscribe("u1", "bookmarks-u1").await,
        Err(PushError::SubscribeFailed(_))
    ));
}

#[tokio::test]
async fn unsubscribe_leaves_channel_and_ends_stream() {
    let server = RealtimeServer::start().await;
    let realtime = client(&server, "token");
    let mut subscription = realtime.subscribe("u1", "bookmarks-u1").await.unwrap();

    realtime.unsubscribe(&subscription.channel_id).await.unwrap();
    server.wait_for("a leave", |s| s.leaves() == 1).await;

    let ended = timeout(Duration::from_secs(5), subscription.receiver.recv())
        .await
        .unwrap();
    assert!(ended.is_none());
    assert_eq!(realtime.channel_count(), 0);
    assert!(matches!(
        realtime.unsubscribe(&subscription.channel_id).await,
        Err(PushError::ChannelNotFound(_))
    ));
}

#[tokio::test]
async fn server_close_ends_stream() {
    let server = RealtimeServer::start().await;
    let realtime = client(&server, "token");
    let mut subscription = realtime.subscribe("u1", "bookmarks-u1").await.unwrap();

    server.drop_connections();

    let ended = timeout(Duration::from_secs(5), subscription.receiver.recv())
        .await
        .unwrap();
    assert!(ended.is_none());
    // The channel id stays registered until the owner releases it.
    realtime.unsubscribe(&subscription.channel_id).await.unwrap();
}

#[tokio::test]
async fn heartbeats_keep_the_socket_alive() {
    let server = RealtimeServer::start().await;
    let realtime = client(&server, "token").with_heartbeat(Duration::from_millis(20));
    let _subscription = realtime.subscribe("u1", "bookmarks-u1").await.unwrap();

    server.wait_for("two heartbeats", |s| s.heartbeats() >= 2).await;
}

#[test]
fn endpoint_is_derived_from_project_url() {
    let config = RestConfig::new("https://abc.supabase.co/", "anon", "token");
    assert_eq!(
        RealtimeClient::new(&config).endpoint(),
        "wss://abc.supabase.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
    );
}
