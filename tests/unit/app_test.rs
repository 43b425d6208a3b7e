//! Integration tests for a full sync session over the local and hosted backends.

#[path = "../support/realtime_server.rs"]
mod realtime_server;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use mockito::{Matcher, Server, ServerGuard};
use serde_json::{json, Value};
use tokio::time::timeout;

use marksync::app::{Collaborators, SyncApp};
use marksync::database::Database;
use marksync::managers::session_gate::GateDecision;
use marksync::services::auth::LocalAuth;
use marksync::services::push_hub::PushHub;
use marksync::services::rest_store::RestConfig;
use marksync::types::bookmark::BookmarkDraft;
use marksync::types::change::{ChangeEvent, ChangeOperation};
use marksync::types::edit::EditState;
use marksync::types::errors::{AppError, SyncError};
use marksync::types::settings::{BackendKind, BackendSettings, ReconcileSettings};
use marksync::types::snapshot::CollectionSnapshot;
use marksync::types::subscription::ChannelStatus;
use realtime_server::RealtimeServer;

struct Backend {
    db: Arc<Database>,
    hub: Arc<PushHub>,
    owner: String,
}

impl Backend {
    fn new() -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let owner = LocalAuth::new(db.clone())
            .register_account("ada@example.com")
            .unwrap()
            .id;
        Self {
            db,
            hub: Arc::new(PushHub::new()),
            owner,
        }
    }

    async fn client(&self) -> SyncApp {
        let token = LocalAuth::new(self.db.clone())
            .issue_session(&self.owner)
            .unwrap();
        let collaborators = Collaborators::local(self.db.clone(), self.hub.clone(), Some(token));
        SyncApp::start(collaborators, &ReconcileSettings::default())
            .await
            .unwrap()
    }
}

async fn wait_until(
    app: &SyncApp,
    done: impl Fn(&CollectionSnapshot) -> bool,
) -> Arc<CollectionSnapshot> {
    let mut rx = app.subscribe_snapshots();
    timeout(Duration::from_secs(5), async {
        loop {
            let current = rx.borrow_and_update().clone();
            if done(&current) {
                return current;
            }
            rx.changed().await.expect("session ended while waiting");
        }
    })
    .await
    .expect("timed out waiting for snapshot")
}

#[tokio::test]
async fn start_without_session_is_auth_absent() {
    let backend = Backend::new();
    let collaborators = Collaborators::local(backend.db.clone(), backend.hub.clone(), None);
    let result = SyncApp::start(collaborators, &ReconcileSettings::default()).await;
    assert!(matches!(result, Err(AppError::AuthAbsent)));
    assert_eq!(backend.hub.subscriber_count(), 0);
}

#[tokio::test]
async fn start_opens_channel_and_loads_initial_snapshot() {
    let backend = Backend::new();
    let app = backend.client().await;

    let channel = app.channel().await.unwrap();
    assert_eq!(channel.status, ChannelStatus::Open);
    assert_eq!(channel.topic, format!("bookmarks-{}", backend.owner));

    let snapshot = app.wait_for_generation(1).await.unwrap();
    assert!(snapshot.is_empty());
    assert_eq!(app.identity().label, "ada@example.com");
    app.shutdown().await;
}

#[tokio::test]
async fn insert_on_one_client_reaches_the_other() {
    let backend = Backend::new();
    let laptop = backend.client().await;
    let phone = backend.client().await;

    let created = laptop
        .edits()
        .create(BookmarkDraft::new("Example", "example.com"))
        .await
        .unwrap();
    assert_eq!(created.url, "https://example.com");

    let seen = wait_until(&phone, |s| s.contains(&created.id)).await;
    assert_eq!(seen.get(&created.id).unwrap().title, "Example");
    wait_until(&laptop, |s| s.contains(&created.id)).await;

    laptop.shutdown().await;
    phone.shutdown().await;
}

#[tokio::test]
async fn rapid_inserts_are_listed_newest_first() {
    let backend = Backend::new();
    let app = backend.client().await;

    let mut ids = Vec::new();
    for title in ["t1", "t2", "t3"] {
        let created = app
            .edits()
            .create(BookmarkDraft::new(title, format!("{}.io", title)))
            .await
            .unwrap();
        ids.push(created.id);
    }

    let snapshot = wait_until(&app, |s| s.len() == 3).await;
    let titles: Vec<&str> = snapshot.records.iter().map(|b| b.title.as_str()).collect();
    assert_eq!(titles, vec!["t3", "t2", "t1"]);
    app.shutdown().await;
}

#[tokio::test]
async fn edit_survives_unrelated_remote_insert() {
    let backend = Backend::new();
    let laptop = backend.client().await;
    let phone = backend.client().await;

    let target = laptop
        .edits()
        .create(BookmarkDraft::new("Target", "target.io"))
        .await
        .unwrap();
    wait_until(&laptop, |s| s.contains(&target.id)).await;

    laptop.edits().start_edit(&target.id).unwrap();
    laptop
        .edits()
        .update_draft(&target.id, BookmarkDraft::new("Half typed", "target.io"))
        .unwrap();

    let other = phone
        .edits()
        .create(BookmarkDraft::new("Other", "other.io"))
        .await
        .unwrap();
    wait_until(&laptop, |s| s.contains(&other.id)).await;

    assert_eq!(
        laptop.edits().state(&target.id),
        EditState::Editing {
            draft: BookmarkDraft::new("Half typed", "target.io"),
            error: None,
        }
    );
    laptop.shutdown().await;
    phone.shutdown().await;
}

#[tokio::test]
async fn remote_delete_under_edit_is_record_gone() {
    let backend = Backend::new();
    let laptop = backend.client().await;
    let phone = backend.client().await;

    let target = laptop
        .edits()
        .create(BookmarkDraft::new("Doomed", "doomed.io"))
        .await
        .unwrap();
    wait_until(&laptop, |s| s.contains(&target.id)).await;
    wait_until(&phone, |s| s.contains(&target.id)).await;

    laptop.edits().start_edit(&target.id).unwrap();
    phone.edits().start_delete(&target.id).await.unwrap();
    wait_until(&laptop, |s| !s.contains(&target.id)).await;

    assert!(matches!(
        laptop.edits().state(&target.id),
        EditState::RecordGone { .. }
    ));
    laptop.shutdown().await;
    phone.shutdown().await;
}

#[tokio::test]
async fn sign_out_closes_channel_once_and_stops_delivery() {
    let backend = Backend::new();
    let app = backend.client().await;
    let other = backend.client().await;
    app.wait_for_generation(1).await.unwrap();
    assert_eq!(backend.hub.subscriber_count(), 2);

    assert_eq!(app.sign_out().await, GateDecision::RedirectToLogin);
    assert!(!app.is_active());
    assert_eq!(backend.hub.subscriber_count(), 1);
    assert!(app.channel().await.is_none());

    // A second teardown must not touch the push backend again.
    app.shutdown().await;
    assert_eq!(backend.hub.subscriber_count(), 1);

    let generation = app.snapshot().generation;
    other
        .edits()
        .create(BookmarkDraft::new("After", "after.io"))
        .await
        .unwrap();
    let change = ChangeEvent {
        operation: ChangeOperation::Update,
        affected_id: "x".to_string(),
        owner: Some(backend.owner.clone()),
    };
    assert_eq!(backend.hub.publish_change(&backend.owner, &change), 1);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(app.snapshot().generation, generation);
    assert_eq!(app.refresh().await.unwrap_err(), SyncError::AuthAbsent);
    other.shutdown().await;
}

#[tokio::test]
async fn signed_out_token_cannot_start_again() {
    let backend = Backend::new();
    let token = LocalAuth::new(backend.db.clone())
        .issue_session(&backend.owner)
        .unwrap();
    let app = SyncApp::start(
        Collaborators::local(backend.db.clone(), backend.hub.clone(), Some(token.clone())),
        &ReconcileSettings::default(),
    )
    .await
    .unwrap();
    app.sign_out().await;

    let again = SyncApp::start(
        Collaborators::local(backend.db.clone(), backend.hub.clone(), Some(token)),
        &ReconcileSettings::default(),
    )
    .await;
    assert!(matches!(again, Err(AppError::AuthAbsent)));
}

#[tokio::test]
async fn local_settings_create_database_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data").join("marksync.db");
    let settings = BackendSettings {
        database_path: Some(path.to_string_lossy().to_string()),
        ..BackendSettings::default()
    };

    let collaborators = Collaborators::from_settings(&settings, None).unwrap();
    assert!(path.exists());
    let result = SyncApp::start(collaborators, &ReconcileSettings::default()).await;
    assert!(matches!(result, Err(AppError::AuthAbsent)));
}

#[test]
fn rest_settings_require_url_and_key() {
    let settings = BackendSettings {
        kind: BackendKind::Rest,
        ..BackendSettings::default()
    };
    assert!(matches!(
        Collaborators::from_settings(&settings, Some("token".to_string())),
        Err(AppError::Config(_))
    ));

    let settings = BackendSettings {
        kind: BackendKind::Rest,
        rest_url: Some("https://x.supabase.co".to_string()),
        api_key: Some("anon".to_string()),
        ..BackendSettings::default()
    };
    assert!(matches!(
        Collaborators::from_settings(&settings, None),
        Err(AppError::AuthAbsent)
    ));
    assert!(Collaborators::from_settings(&settings, Some("token".to_string())).is_ok());
}

/// Hosted project double: PostgREST table and auth on a mock HTTP server,
/// change feed on an in-process realtime socket.
struct HostedProject {
    http: ServerGuard,
    realtime: RealtimeServer,
    rows: Arc<Mutex<Vec<Value>>>,
}

impl HostedProject {
    async fn start() -> Self {
        let mut http = Server::new_async().await;
        let rows: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));

        http.mock("GET", "/auth/v1/user")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"id": "u1", "email": "ada@example.com"}).to_string())
            .create_async()
            .await;

        let listed = rows.clone();
        http.mock("GET", "/rest/v1/bookmarks")
            .match_query(Matcher::UrlEncoded("user_id".into(), "eq.u1".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body_from_request(move |_| {
                let rows = listed.lock().unwrap();
                Value::Array(rows.iter().rev().cloned().collect())
                    .to_string()
                    .into_bytes()
            })
            .create_async()
            .await;

        let inserted = rows.clone();
        http.mock("POST", "/rest/v1/bookmarks")
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body_from_request(move |request| {
                let body: Value = serde_json::from_slice(request.body().unwrap()).unwrap();
                let mut rows = inserted.lock().unwrap();
                let row = json!({
                    "id": format!("b{}", rows.len() + 1),
                    "title": body["title"],
                    "url": body["url"],
                    "user_id": body["user_id"],
                    "created_at": format!("2024-05-0{}T10:00:00Z", rows.len() + 1),
                });
                rows.push(row.clone());
                json!([row]).to_string().into_bytes()
            })
            .create_async()
            .await;

        let deleted = rows.clone();
        http.mock("DELETE", "/rest/v1/bookmarks")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body_from_request(move |_| {
                let removed: Vec<Value> = deleted.lock().unwrap().drain(..).collect();
                Value::Array(removed).to_string().into_bytes()
            })
            .create_async()
            .await;

        Self {
            http,
            realtime: RealtimeServer::start().await,
            rows,
        }
    }

    async fn client(&self, token: &str) -> SyncApp {
        let config = RestConfig::new(self.http.url(), "anon-key", token)
            .with_realtime_url(self.realtime.url.clone());
        SyncApp::start(Collaborators::rest(config), &ReconcileSettings::default())
            .await
            .unwrap()
    }

    /// Announces the most recent committed row the way the database would.
    fn announce_last(&self, event_type: &str) {
        let row = self.rows.lock().unwrap().last().cloned().unwrap();
        self.realtime.announce("u1", event_type, row);
    }
}

#[tokio::test]
async fn rest_clients_converge_through_realtime() {
    let project = HostedProject::start().await;
    let laptop = project.client("laptop-token").await;
    let phone = project.client("phone-token").await;
    project
        .realtime
        .wait_for("both joins", |s| s.joins().len() == 2)
        .await;
    phone.wait_for_generation(1).await.unwrap();
    laptop.wait_for_generation(1).await.unwrap();

    let created = laptop
        .edits()
        .create(BookmarkDraft::new("Hosted", "hosted.io"))
        .await
        .unwrap();
    assert_eq!(created.owner, "u1");
    project.announce_last("INSERT");

    let seen = wait_until(&phone, |s| s.contains(&created.id)).await;
    assert_eq!(seen.get(&created.id).unwrap().url, "https://hosted.io");
    assert!(seen.generation >= 2);
    wait_until(&laptop, |s| s.contains(&created.id)).await;

    laptop.shutdown().await;
    phone.shutdown().await;
    project
        .realtime
        .wait_for("both leaves", |s| s.leaves() == 2)
        .await;
}

#[tokio::test]
async fn rest_remote_delete_under_edit_is_record_gone() {
    let project = HostedProject::start().await;
    let laptop = project.client("laptop-token").await;
    let phone = project.client("phone-token").await;
    project
        .realtime
        .wait_for("both joins", |s| s.joins().len() == 2)
        .await;

    let target = laptop
        .edits()
        .create(BookmarkDraft::new("Doomed", "doomed.io"))
        .await
        .unwrap();
    project.announce_last("INSERT");
    wait_until(&laptop, |s| s.contains(&target.id)).await;
    wait_until(&phone, |s| s.contains(&target.id)).await;

    laptop.edits().start_edit(&target.id).unwrap();
    phone.edits().start_delete(&target.id).await.unwrap();
    project.realtime.announce("u1", "DELETE", json!({ "id": target.id }));
    wait_until(&laptop, |s| !s.contains(&target.id)).await;

    assert!(matches!(
        laptop.edits().state(&target.id),
        EditState::RecordGone { .. }
    ));
    laptop.shutdown().await;
    phone.shutdown().await;
}
