//! Session gate for Marksync.
//!
//! Resolves the signed-in identity once per process and decides whether the
//! bookmark view may proceed. A missing session, an expired session and an
//! unreachable auth backend all resolve to `RedirectToLogin`.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::services::auth::AuthProviderTrait;
use crate::types::identity::Identity;

/// Outcome of resolving the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Proceed(Identity),
    RedirectToLogin,
}

#[derive(Debug, Clone)]
enum GateState {
    Unresolved,
    Resolved(Option<Identity>),
}

pub struct SessionGate {
    auth: Arc<dyn AuthProviderTrait>,
    state: Mutex<GateState>,
}

impl SessionGate {
    pub fn new(auth: Arc<dyn AuthProviderTrait>) -> Self {
        Self {
            auth,
            state: Mutex::new(GateState::Unresolved),
        }
    }

    /// Resolves the identity, consulting the auth provider at most once.
    ///
    /// Concurrent callers wait for the first resolution and share its result.
    pub async fn resolve_identity(&self) -> GateDecision {
        let mut state = self.state.lock().await;

        let identity = match &*state {
            GateState::Resolved(identity) => identity.clone(),
            GateState::Unresolved => {
                let resolved = match self.auth.current_identity().await {
                    Ok(identity) => identity,
                    Err(e) => {
                        warn!(error = %e, "identity lookup failed; treating as signed out");
                        None
                    }
                };
                match &resolved {
                    Some(identity) => info!(owner = %identity.id, "session resolved"),
                    None => info!("no active session"),
                }
                *state = GateState::Resolved(resolved.clone());
                resolved
            }
        };

        match identity {
            Some(identity) => GateDecision::Proceed(identity),
            None => GateDecision::RedirectToLogin,
        }
    }

    /// The resolved identity, if resolution happened and found one.
    pub async fn identity(&self) -> Option<Identity> {
        match &*self.state.lock().await {
            GateState::Resolved(identity) => identity.clone(),
            GateState::Unresolved => None,
        }
    }

    /// Ends the session. Local state is cleared even if the provider fails,
    /// so later resolutions always redirect to login.
    pub async fn sign_out(&self) -> GateDecision {
        let mut state = self.state.lock().await;
        if let Err(e) = self.auth.sign_out().await {
            warn!(error = %e, "auth provider sign-out failed");
        }
        *state = GateState::Resolved(None);
        info!("signed out");
        GateDecision::RedirectToLogin
    }
}
