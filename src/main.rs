//! Marksync: real-time bookmark sync core.
//!
//! Entry point: runs a console demo with two clients of the same account
//! sharing one local store, showing push-driven convergence between them.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use marksync::app::{Collaborators, SyncApp};
use marksync::database::Database;
use marksync::logging::init_tracing;
use marksync::services::auth::LocalAuth;
use marksync::services::push_hub::PushHub;
use marksync::types::bookmark::BookmarkDraft;
use marksync::types::edit::EditState;
use marksync::types::settings::SyncSettings;
use marksync::types::snapshot::CollectionSnapshot;

type DemoResult<T> = Result<T, Box<dyn Error>>;

const CONVERGE_TIMEOUT: Duration = Duration::from_secs(5);

fn section(name: &str) {
    println!("───────────────────────────────────────────────────────────────");
    println!("  📦 {}", name);
    println!("───────────────────────────────────────────────────────────────");
}

fn print_snapshot(label: &str, snapshot: &CollectionSnapshot) {
    println!(
        "  [{}] generation {} · {} bookmark(s)",
        label,
        snapshot.generation,
        snapshot.len()
    );
    for bookmark in &snapshot.records {
        println!("      - {} <{}>", bookmark.title, bookmark.url);
    }
}

/// Waits until `app` publishes a snapshot satisfying `done`.
async fn wait_until(
    app: &SyncApp,
    done: impl Fn(&CollectionSnapshot) -> bool,
) -> DemoResult<Arc<CollectionSnapshot>> {
    let mut rx = app.subscribe_snapshots();
    let wait = async {
        loop {
            let current = rx.borrow_and_update().clone();
            if done(&current) {
                return Some(current);
            }
            if rx.changed().await.is_err() {
                return None;
            }
        }
    };
    match tokio::time::timeout(CONVERGE_TIMEOUT, wait).await {
        Ok(Some(snapshot)) => Ok(snapshot),
        _ => Err("timed out waiting for clients to converge".into()),
    }
}

#[tokio::main]
async fn main() -> DemoResult<()> {
    let settings = SyncSettings::default();
    init_tracing("marksync=warn");

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║              Marksync v{} - Demo Mode                  ║", env!("CARGO_PKG_VERSION"));
    println!("║        Real-time bookmark sync across open clients          ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    section("Session");
    let db = Arc::new(Database::open_in_memory()?);
    let hub = Arc::new(PushHub::new());
    let accounts = LocalAuth::new(db.clone());
    let identity = accounts.register_account("demo@marksync.local")?;
    let laptop_token = accounts.issue_session(&identity.id)?;
    let phone_token = accounts.issue_session(&identity.id)?;
    println!("  Signed in as {} ({})", identity.label, identity.id);

    let laptop = SyncApp::start(
        Collaborators::local(db.clone(), hub.clone(), Some(laptop_token)),
        &settings.sync,
    )
    .await?;
    let phone = SyncApp::start(
        Collaborators::local(db.clone(), hub.clone(), Some(phone_token)),
        &settings.sync,
    )
    .await?;
    println!("  Two clients started; {} push channel(s) open", hub.subscriber_count());

    let anonymous =
        SyncApp::start(Collaborators::local(db.clone(), hub.clone(), None), &settings.sync).await;
    match anonymous {
        Err(e) => println!("  Client without a session: {}", e),
        Ok(_) => println!("  Client without a session unexpectedly started"),
    }
    println!();

    section("Add on one client, see it on the other");
    let created = laptop
        .edits()
        .create(BookmarkDraft::new("The Rust Book", "doc.rust-lang.org/book"))
        .await?;
    println!("  Laptop added \"{}\" -> {}", created.title, created.url);
    let seen = wait_until(&phone, |s| s.contains(&created.id)).await?;
    print_snapshot("phone", &seen);
    println!();

    section("Edit while the other client adds");
    wait_until(&laptop, |s| s.contains(&created.id)).await?;
    laptop.edits().start_edit(&created.id)?;
    laptop.edits().update_draft(
        &created.id,
        BookmarkDraft::new("The Rust Programming Language", "https://doc.rust-lang.org/book/"),
    )?;
    let other = phone
        .edits()
        .create(BookmarkDraft::new("Tokio", "https://tokio.rs"))
        .await?;
    wait_until(&laptop, |s| s.contains(&other.id)).await?;
    if let EditState::Editing { draft, .. } = laptop.edits().state(&created.id) {
        println!("  Laptop draft survived the refresh: \"{}\"", draft.title);
    }
    laptop.edits().save(&created.id).await?;
    let seen = wait_until(&phone, |s| {
        s.get(&created.id)
            .map_or(false, |b| b.title == "The Rust Programming Language")
    })
    .await?;
    print_snapshot("phone", &seen);
    println!();

    section("Delete under an open edit");
    wait_until(&phone, |s| s.contains(&other.id)).await?;
    phone.edits().start_edit(&other.id)?;
    laptop.edits().start_delete(&other.id).await?;
    wait_until(&phone, |s| !s.contains(&other.id)).await?;
    println!("  Phone edit state: {:?}", phone.edits().state(&other.id));
    phone.edits().dismiss_gone(&other.id);
    println!();

    section("Sign out");
    laptop.sign_out().await;
    println!("  Laptop signed out; {} push channel(s) open", hub.subscriber_count());
    phone.shutdown().await;
    println!("  Phone closed; {} push channel(s) open", hub.subscriber_count());

    println!();
    println!("═══════════════════════════════════════════════════════════════");
    println!("  ✅ Both clients converged on every change.");
    println!("═══════════════════════════════════════════════════════════════");
    Ok(())
}
