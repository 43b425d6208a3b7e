//! Auth collaborators for Marksync.
//!
//! `AuthProviderTrait` answers "who is signed in" and performs sign-out.
//! `LocalAuth` resolves a session token against the local database;
//! `RestAuth` asks the hosted auth endpoint.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use rusqlite::{params, OptionalExtension};
use serde::Deserialize;
use uuid::Uuid;

use crate::database::Database;
use crate::services::rest_store::RestConfig;
use crate::types::errors::AuthError;
use crate::types::identity::Identity;

/// Trait defining the auth operations the session gate relies on.
#[async_trait]
pub trait AuthProviderTrait: Send + Sync {
    /// Returns the signed-in identity, `None` when there is no valid session.
    async fn current_identity(&self) -> Result<Option<Identity>, AuthError>;
    /// Ends the current session.
    async fn sign_out(&self) -> Result<(), AuthError>;
}

/// Auth provider backed by the `accounts` and `auth_sessions` tables.
pub struct LocalAuth {
    db: Arc<Database>,
    token: Mutex<Option<String>>,
}

impl LocalAuth {
    /// Creates a provider with no session token; resolves to no identity.
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            token: Mutex::new(None),
        }
    }

    /// Creates a provider presenting `token`.
    pub fn with_token(db: Arc<Database>, token: impl Into<String>) -> Self {
        Self {
            db,
            token: Mutex::new(Some(token.into())),
        }
    }

    /// Returns the account for `email`, creating it if needed.
    pub fn register_account(&self, email: &str) -> Result<Identity, AuthError> {
        let conn = self.db.connection();
        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM accounts WHERE email = ?1",
                params![email],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend_err)?;

        let id = match existing {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                conn.execute(
                    "INSERT INTO accounts (id, email, created_at) VALUES (?1, ?2, ?3)",
                    params![id, email, Utc::now().timestamp()],
                )
                .map_err(backend_err)?;
                id
            }
        };
        Ok(Identity::new(id, email))
    }

    /// Issues a new session token for `account_id`.
    pub fn issue_session(&self, account_id: &str) -> Result<String, AuthError> {
        let token = Uuid::new_v4().simple().to_string();
        self.db
            .connection()
            .execute(
                "INSERT INTO auth_sessions (token, account_id, created_at) VALUES (?1, ?2, ?3)",
                params![token, account_id, Utc::now().timestamp()],
            )
            .map_err(backend_err)?;
        Ok(token)
    }

    /// Replaces the token this provider presents.
    pub fn set_token(&self, token: Option<String>) {
        *self.token_slot() = token;
    }

    fn token_slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.token.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn backend_err(e: rusqlite::Error) -> AuthError {
    AuthError::Backend(e.to_string())
}

#[async_trait]
impl AuthProviderTrait for LocalAuth {
    async fn current_identity(&self) -> Result<Option<Identity>, AuthError> {
        let token = match self.token_slot().clone() {
            Some(token) => token,
            None => return Ok(None),
        };

        self.db
            .connection()
            .query_row(
                "SELECT a.id, a.email FROM auth_sessions s \
                 JOIN accounts a ON a.id = s.account_id WHERE s.token = ?1",
                params![token],
                |row| Ok(Identity::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .map_err(backend_err)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let token = self.token_slot().take();
        if let Some(token) = token {
            self.db
                .connection()
                .execute("DELETE FROM auth_sessions WHERE token = ?1", params![token])
                .map_err(backend_err)?;
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct RemoteUser {
    id: String,
    email: Option<String>,
}

/// Auth provider backed by the hosted `/auth/v1` endpoints.
pub struct RestAuth {
    client: Client,
    config: RestConfig,
}

impl RestAuth {
    pub fn new(config: RestConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }
}

#[async_trait]
impl AuthProviderTrait for RestAuth {
    async fn current_identity(&self) -> Result<Option<Identity>, AuthError> {
        let url = format!("{}/auth/v1/user", self.config.base_url);
        let response = self
            .config
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(None),
            status if status.is_success() => {
                let user: RemoteUser = response
                    .json()
                    .await
                    .map_err(|e| AuthError::Backend(e.to_string()))?;
                let label = user.email.unwrap_or_default();
                Ok(Some(Identity::new(user.id, label)))
            }
            status => Err(AuthError::Backend(format!("HTTP {}", status.as_u16()))),
        }
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let url = format!("{}/auth/v1/logout", self.config.base_url);
        let response = self
            .config
            .authorize(self.client.post(url))
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        match response.status() {
            // An already-expired session is signed out either way.
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(()),
            status if status.is_success() => Ok(()),
            status => Err(AuthError::Backend(format!("HTTP {}", status.as_u16()))),
        }
    }
}
