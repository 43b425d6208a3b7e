//! Remote store collaborator for Marksync.
//!
//! `RemoteStoreTrait` is the CRUD boundary the core issues writes and reads
//! through. `SqliteStore` is the local implementation, backed by SQLite via
//! `rusqlite`, announcing every committed write on an attached `PushHub`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::database::Database;
use crate::services::push_hub::PushHub;
use crate::types::bookmark::{Bookmark, BookmarkFields};
use crate::types::change::{ChangeEvent, ChangeOperation};
use crate::types::errors::StoreError;

/// Trait defining the owner-scoped CRUD operations of the remote store.
#[async_trait]
pub trait RemoteStoreTrait: Send + Sync {
    async fn insert(&self, owner: &str, fields: &BookmarkFields) -> Result<Bookmark, StoreError>;
    async fn update(&self, owner: &str, id: &str, fields: &BookmarkFields) -> Result<(), StoreError>;
    async fn delete(&self, owner: &str, id: &str) -> Result<(), StoreError>;
    /// Lists the owner's bookmarks, newest first.
    async fn list_by_owner(&self, owner: &str) -> Result<Vec<Bookmark>, StoreError>;
}

/// Remote store backed by the local SQLite database.
pub struct SqliteStore {
    db: Arc<Database>,
    hub: Option<Arc<PushHub>>,
}

impl SqliteStore {
    /// Creates a store that does not announce writes.
    pub fn new(db: Arc<Database>) -> Self {
        Self { db, hub: None }
    }

    /// Creates a store that announces every committed write on `hub`.
    pub fn with_hub(db: Arc<Database>, hub: Arc<PushHub>) -> Self {
        Self { db, hub: Some(hub) }
    }

    fn announce(&self, owner: &str, operation: ChangeOperation, id: &str) {
        if let Some(hub) = &self.hub {
            let change = ChangeEvent {
                operation,
                affected_id: id.to_string(),
                owner: Some(owner.to_string()),
            };
            let delivered = hub.publish_change(owner, &change);
            tracing::trace!(?operation, id, delivered, "announced bookmark change");
        }
    }

    /// Returns a creation timestamp strictly after the owner's newest bookmark,
    /// so rapid inserts keep a stable newest-first order.
    fn next_created_at(conn: &Connection, owner: &str) -> Result<i64, StoreError> {
        let latest: Option<i64> = conn
            .query_row(
                "SELECT MAX(created_at) FROM bookmarks WHERE owner_id = ?1",
                params![owner],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        let now = Utc::now().timestamp_millis();
        Ok(match latest {
            Some(latest) if latest >= now => latest + 1,
            _ => now,
        })
    }

    fn row_to_bookmark(row: &rusqlite::Row) -> rusqlite::Result<Bookmark> {
        let millis: i64 = row.get(4)?;
        Ok(Bookmark {
            id: row.get(0)?,
            title: row.get(1)?,
            url: row.get(2)?,
            owner: row.get(3)?,
            created_at: millis_to_datetime(millis),
        })
    }
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn db_err(e: rusqlite::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

#[async_trait]
impl RemoteStoreTrait for SqliteStore {
    async fn insert(&self, owner: &str, fields: &BookmarkFields) -> Result<Bookmark, StoreError> {
        let bookmark = {
            let conn = self.db.connection();
            let id = Uuid::new_v4().to_string();
            let created_at = Self::next_created_at(&conn, owner)?;
            conn.execute(
                "INSERT INTO bookmarks (id, owner_id, title, url, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, owner, fields.title, fields.url, created_at],
            )
            .map_err(db_err)?;
            Bookmark {
                id,
                title: fields.title.clone(),
                url: fields.url.clone(),
                owner: owner.to_string(),
                created_at: millis_to_datetime(created_at),
            }
        };

        self.announce(owner, ChangeOperation::Insert, &bookmark.id);
        Ok(bookmark)
    }

    async fn update(&self, owner: &str, id: &str, fields: &BookmarkFields) -> Result<(), StoreError> {
        let affected = self
            .db
            .connection()
            .execute(
                "UPDATE bookmarks SET title = ?1, url = ?2 WHERE id = ?3 AND owner_id = ?4",
                params![fields.title, fields.url, id, owner],
            )
            .map_err(db_err)?;

        if affected == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        self.announce(owner, ChangeOperation::Update, id);
        Ok(())
    }

    async fn delete(&self, owner: &str, id: &str) -> Result<(), StoreError> {
        let affected = self
            .db
            .connection()
            .execute(
                "DELETE FROM bookmarks WHERE id = ?1 AND owner_id = ?2",
                params![id, owner],
            )
            .map_err(db_err)?;

        if affected == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        self.announce(owner, ChangeOperation::Delete, id);
        Ok(())
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<Bookmark>, StoreError> {
        let conn = self.db.connection();
        let mut stmt = conn
            .prepare(
                "SELECT id, title, url, owner_id, created_at FROM bookmarks \
                 WHERE owner_id = ?1 ORDER BY created_at DESC, id DESC",
            )
            .map_err(db_err)?;

        let rows = stmt
            .query_map(params![owner], Self::row_to_bookmark)
            .map_err(db_err)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row.map_err(db_err)?);
        }
        Ok(results)
    }
}
