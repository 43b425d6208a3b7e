//! Hosted remote store for Marksync.
//!
//! Talks to a PostgREST endpoint (the `/rest/v1/bookmarks` table of a hosted
//! project) over `reqwest`. Row-level security on the server restricts every
//! request to the bearer token's owner; the owner filter is sent anyway so the
//! query plan matches the local store's.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;

use crate::services::remote_store::RemoteStoreTrait;
use crate::types::bookmark::{Bookmark, BookmarkFields};
use crate::types::errors::StoreError;

const TABLE_PATH: &str = "/rest/v1/bookmarks";

/// Connection parameters shared by the hosted store and auth clients.
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Project base URL without trailing slash.
    pub base_url: String,
    pub api_key: String,
    pub access_token: String,
    /// Realtime websocket endpoint; derived from `base_url` when unset.
    pub realtime_url: Option<String>,
}

impl RestConfig {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            access_token: access_token.into(),
            realtime_url: None,
        }
    }

    pub fn with_realtime_url(mut self, url: impl Into<String>) -> Self {
        self.realtime_url = Some(url.into());
        self
    }

    /// Attaches the `apikey` and bearer headers every endpoint expects.
    pub(crate) fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.access_token)
    }
}

#[derive(Serialize)]
struct InsertRow<'a> {
    title: &'a str,
    url: &'a str,
    user_id: &'a str,
}

/// Remote store backed by a hosted PostgREST table.
pub struct RestStore {
    client: Client,
    config: RestConfig,
}

impl RestStore {
    pub fn new(config: RestConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn table_url(&self) -> String {
        format!("{}{}", self.config.base_url, TABLE_PATH)
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, StoreError> {
        let response = self
            .config
            .authorize(request)
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(StoreError::Unauthorized),
            status if status.is_success() => Ok(response),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(StoreError::Network(format!("HTTP {}: {}", status.as_u16(), body)))
            }
        }
    }

    /// Sends a filtered write and maps an empty representation to `NotFound`.
    async fn write_one(&self, request: RequestBuilder, id: &str) -> Result<(), StoreError> {
        let response = self
            .send(request.header("Prefer", "return=representation"))
            .await?;
        let rows: Vec<Bookmark> = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        if rows.is_empty() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStoreTrait for RestStore {
    async fn insert(&self, owner: &str, fields: &BookmarkFields) -> Result<Bookmark, StoreError> {
        let row = InsertRow {
            title: &fields.title,
            url: &fields.url,
            user_id: owner,
        };
        let request = self
            .client
            .post(self.table_url())
            .header("Prefer", "return=representation")
            .json(&row);
        let response = self.send(request).await?;

        let mut rows: Vec<Bookmark> = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        let bookmark = rows
            .pop()
            .ok_or_else(|| StoreError::Decode("insert returned no row".to_string()))?;
        Ok(bookmark)
    }

    async fn update(&self, owner: &str, id: &str, fields: &BookmarkFields) -> Result<(), StoreError> {
        let request = self
            .client
            .patch(self.table_url())
            .query(&[("id", format!("eq.{}", id)), ("user_id", format!("eq.{}", owner))])
            .json(fields);
        self.write_one(request, id).await
    }

    async fn delete(&self, owner: &str, id: &str) -> Result<(), StoreError> {
        let request = self
            .client
            .delete(self.table_url())
            .query(&[("id", format!("eq.{}", id)), ("user_id", format!("eq.{}", owner))]);
        self.write_one(request, id).await
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<Bookmark>, StoreError> {
        let request = self.client.get(self.table_url()).query(&[
            ("select", "*".to_string()),
            ("user_id", format!("eq.{}", owner)),
            ("order", "created_at.desc".to_string()),
        ]);
        let response = self.send(request).await?;
        response
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }
}
