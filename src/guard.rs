//! Route guard: keeps the current location consistent with the session.
//!
//! [`evaluate`] is a pure decision over the session state and a location.
//! [`RouteGuard`] re-runs it whenever either changes and hands redirects to a
//! [`Navigator`].

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};
use url::form_urlencoded;

use crate::routes::{
    activation_location, is_protected, is_public_only, landing_for, login_for, path_of,
    required_role,
};
use crate::session::SessionState;

/// Something that can move the user to another location.
pub trait Navigator: Send + Sync {
    fn navigate(&self, location: &str);
}

/// Where the guard sends the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub target: String,
    /// Location that was blocked, so login can return to it.
    pub from: Option<String>,
}

impl Redirect {
    fn to(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            from: None,
        }
    }

    /// Full location including the `from` return path.
    pub fn location(&self) -> String {
        match &self.from {
            Some(from) => {
                let query: String = form_urlencoded::Serializer::new(String::new())
                    .append_pair("from", from)
                    .finish();
                format!("{}?{}", self.target, query)
            }
            None => self.target.clone(),
        }
    }
}

/// Decide whether `location` is acceptable for `state`.
pub fn evaluate(state: &SessionState, location: &str) -> Option<Redirect> {
    match state {
        SessionState::Initializing => None,
        SessionState::Authenticated(user) => {
            let landing = landing_for(user.role);
            if is_public_only(location) {
                return Some(Redirect::to(landing));
            }
            match required_role(location) {
                Some(role) if role != user.role => Some(Redirect::to(landing)),
                _ => None,
            }
        }
        SessionState::Unauthenticated => is_protected(location).then(|| Redirect {
            target: login_for(location).to_string(),
            from: Some(location.to_string()),
        }),
        SessionState::PendingVerification { email } => {
            is_protected(location).then(|| Redirect::to(activation_location(email)))
        }
    }
}

/// Current location, observable by the guard.
#[derive(Clone)]
pub struct Location {
    tx: Arc<watch::Sender<String>>,
}

impl Location {
    pub fn new(initial: impl Into<String>) -> Self {
        let (tx, _rx) = watch::channel(initial.into());
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> String {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.tx.subscribe()
    }
}

impl Navigator for Location {
    fn navigate(&self, location: &str) {
        self.tx.send_if_modified(|current| {
            if current == location {
                false
            } else {
                *current = location.to_string();
                true
            }
        });
    }
}

pub struct RouteGuard {
    navigator: Arc<dyn Navigator>,
}

impl RouteGuard {
    pub fn new(navigator: Arc<dyn Navigator>) -> Self {
        Self { navigator }
    }

    /// Re-evaluate on every session or location change until either channel closes.
    pub async fn run(
        self,
        mut states: watch::Receiver<SessionState>,
        mut locations: watch::Receiver<String>,
    ) {
        loop {
            let state = states.borrow_and_update().clone();
            let location = locations.borrow_and_update().clone();
            self.apply(&state, &location);

            tokio::select! {
                changed = states.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = locations.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        debug!("Route guard stopped");
    }

    /// Run the guard on a background task.
    pub fn spawn(
        self,
        states: watch::Receiver<SessionState>,
        locations: watch::Receiver<String>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(states, locations))
    }

    fn apply(&self, state: &SessionState, location: &str) {
        let Some(redirect) = evaluate(state, location) else {
            return;
        };
        let target = redirect.location();
        if path_of(&target) == path_of(location) {
            return;
        }
        info!(from = %location, to = %target, "Redirecting");
        self.navigator.navigate(&target);
    }
}
