//! Session state and its transitions.
//!
//! The state lives in a `watch` channel so views and the route guard can react
//! to changes. Only the named transitions below mutate it.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use super::types::{User, UserRole};

/// Where the session currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// The startup load has not resolved yet.
    Initializing,
    Unauthenticated,
    /// The backend reported the account as unverified.
    PendingVerification { email: String },
    Authenticated(User),
}

/// Discriminant of [`SessionState`] without the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Initializing,
    Unauthenticated,
    PendingVerification,
    Authenticated,
}

impl SessionState {
    pub fn status(&self) -> SessionStatus {
        match self {
            SessionState::Initializing => SessionStatus::Initializing,
            SessionState::Unauthenticated => SessionStatus::Unauthenticated,
            SessionState::PendingVerification { .. } => SessionStatus::PendingVerification,
            SessionState::Authenticated(_) => SessionStatus::Authenticated,
        }
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            SessionState::Authenticated(user) => Some(user),
            _ => None,
        }
    }

    pub fn role(&self) -> Option<UserRole> {
        self.user().map(|user| user.role)
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }
}

/// Shared handle on the session state.
#[derive(Clone)]
pub struct SessionSignal {
    tx: Arc<watch::Sender<SessionState>>,
}

impl Default for SessionSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::Initializing);
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    pub(crate) fn authenticate(&self, user: User) {
        debug!(user_id = user.id, role = user.role.as_str(), "Session authenticated");
        self.tx.send_replace(SessionState::Authenticated(user));
    }

    pub(crate) fn await_verification(&self, email: &str) {
        debug!(email = %email, "Session waiting for email verification");
        self.tx.send_replace(SessionState::PendingVerification {
            email: email.to_string(),
        });
    }

    pub(crate) fn sign_out(&self) {
        let previous = self.tx.send_replace(SessionState::Unauthenticated);
        if previous != SessionState::Unauthenticated {
            debug!(from = ?previous.status(), "Session signed out");
        }
    }
}
