pub mod api;
pub mod cli;
pub mod db;
pub mod guard;
pub mod jwt;
pub mod routes;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use api::{ApiClient, ApiError};
use db::Database;
use guard::Navigator;
use session::SessionManager;
use url::Url;

pub use guard::{Location, Redirect, RouteGuard, evaluate};
pub use session::{LoginOutcome, RegistrationForm, SessionError, SessionState, User, UserRole};

pub struct ClientConfig {
    /// Backend API base, e.g. `https://api.banadoctor.com/api/v1/`
    pub api_url: Url,
    /// Path to the SQLite file holding the tokens, or `:memory:`
    pub store_path: String,
    /// Timeout applied to every backend call
    pub request_timeout: Duration,
}

/// Open the token store and build a session manager.
///
/// The session starts out `Initializing`; call [`SessionManager::load`] to
/// restore it from stored tokens.
pub async fn open_session(
    config: &ClientConfig,
    navigator: Arc<dyn Navigator>,
) -> Result<SessionManager, ApiError> {
    let db = Database::open(&config.store_path).await?;
    let client = ApiClient::new(config.api_url.clone(), config.request_timeout, db.tokens())?;
    Ok(SessionManager::new(client, navigator))
}
