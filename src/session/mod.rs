//! Session lifecycle: startup load, login, registration and logout.
//!
//! The manager owns the request pipeline and funnels every state change
//! through the transitions on [`SessionSignal`]. Role-based landing and
//! activation redirects are pushed to the injected [`Navigator`].

mod errors;
mod state;
mod types;

use std::sync::Arc;

use reqwest::StatusCode;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError, ApiRequest, error_message};
use crate::guard::Navigator;
use crate::jwt;
use crate::routes::{activation_location, landing_for};

pub use errors::{DEFAULT_LOGIN_ERROR, SessionError, ValidationError};
pub use state::{SessionSignal, SessionState, SessionStatus};
pub use types::{LoginOutcome, MIN_PASSWORD_LENGTH, RegistrationForm, User, UserRole};

use types::{
    EmailAvailability, EmailRequest, LoginRequest, MessageResponse, TokenPairResponse,
};

pub const LOGIN_PATH: &str = "auth/login/";
pub const REGISTER_PATH: &str = "auth/register/";
pub const PROFILE_PATH: &str = "users/profile/";
pub const RESEND_VERIFICATION_PATH: &str = "auth/resend-verification-email/";
pub const CHECK_EMAIL_PATH: &str = "auth/check-email/";

/// Marker sent by the backend with a 403 on login for unverified accounts.
const EMAIL_NOT_VERIFIED: &str = "email_not_verified";

/// The process-wide session.
#[derive(Clone)]
pub struct SessionManager {
    client: ApiClient,
    navigator: Arc<dyn Navigator>,
}

impl SessionManager {
    pub fn new(client: ApiClient, navigator: Arc<dyn Navigator>) -> Self {
        Self { client, navigator }
    }

    /// Pipeline for arbitrary authenticated calls.
    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn state(&self) -> SessionState {
        self.client.session().current()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.client.session().subscribe()
    }

    pub fn current_user(&self) -> Option<User> {
        self.state().user().cloned()
    }

    /// Restore the session from stored tokens.
    ///
    /// Never fails: any problem degrades to an unauthenticated session.
    pub async fn load(&self) -> SessionState {
        let access = match self.client.tokens().load_access().await {
            Ok(Some(access)) => access,
            Ok(None) => {
                debug!("No stored access token");
                self.client.session().sign_out();
                return self.state();
            }
            Err(e) => {
                warn!(error = %e, "Failed to read stored tokens");
                self.discard().await;
                return self.state();
            }
        };

        match jwt::is_expired(&access) {
            Ok(false) => {}
            Ok(true) => {
                debug!("Stored access token has expired");
                self.discard().await;
                return self.state();
            }
            Err(e) => {
                debug!(error = %e, "Stored access token is unreadable");
                self.discard().await;
                return self.state();
            }
        }

        self.client.set_bearer(Some(access));
        match self.client.get::<User>(PROFILE_PATH).await {
            Ok(user) if user.verified => {
                info!(user_id = user.id, "Session restored");
                self.client.session().authenticate(user);
            }
            Ok(user) => {
                info!(user_id = user.id, "Stored session belongs to an unverified account");
                self.hold_for_verification(&user.email).await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to load profile, discarding session");
                self.discard().await;
            }
        }
        self.state()
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, SessionError> {
        let email = email.trim();
        let request = ApiRequest::post(LOGIN_PATH)
            .anonymous()
            .json(&LoginRequest { email, password })?;

        match self.client.send(&request).await {
            Ok(response) => {
                let pair: TokenPairResponse = response.json()?;
                self.establish(pair).await
            }
            Err(e) => Err(self.login_rejection(email, e).await),
        }
    }

    pub async fn register(&self, form: &RegistrationForm) -> Result<LoginOutcome, SessionError> {
        form.validate()?;

        let request = ApiRequest::post(REGISTER_PATH)
            .anonymous()
            .json(&form.to_request())?;

        match self.client.send(&request).await {
            Ok(response) => {
                let pair: TokenPairResponse = response.json()?;
                info!(email = %pair.user.email, "Account registered");
                self.establish(pair).await
            }
            Err(e) => Err(rejection(e, "Registration failed")),
        }
    }

    /// End the session. Calling it again is harmless.
    pub async fn logout(&self) -> Result<(), SessionError> {
        self.client.clear_credentials().await?;
        info!("Logged out");
        Ok(())
    }

    /// Ask the backend to send the activation email again.
    pub async fn resend_verification(&self, email: &str) -> Result<String, SessionError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(ValidationError::Required("email").into());
        }

        let request = ApiRequest::post(RESEND_VERIFICATION_PATH)
            .anonymous()
            .json(&EmailRequest { email })?;

        match self.client.send(&request).await {
            Ok(response) => {
                let message = response
                    .json::<MessageResponse>()
                    .ok()
                    .and_then(|body| body.message)
                    .unwrap_or_else(|| {
                        "Verification email resent successfully. Please check your inbox."
                            .to_string()
                    });
                Ok(message)
            }
            Err(e) => Err(rejection(e, "Failed to resend verification email")),
        }
    }

    /// Whether an email address is still free for registration.
    pub async fn check_email_available(&self, email: &str) -> Result<bool, SessionError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(ValidationError::Required("email").into());
        }

        let request = ApiRequest::get(CHECK_EMAIL_PATH)
            .anonymous()
            .query("email", email);

        match self.client.send(&request).await {
            Ok(response) => Ok(response.json::<EmailAvailability>()?.available),
            Err(e) => Err(rejection(e, "Unable to check email availability")),
        }
    }

    /// Apply a token pair returned by login or registration.
    async fn establish(&self, pair: TokenPairResponse) -> Result<LoginOutcome, SessionError> {
        let TokenPairResponse {
            access,
            refresh,
            user,
        } = pair;

        if !user.verified {
            info!(user_id = user.id, "Account not verified, routing to activation");
            self.hold_for_verification(&user.email).await;
            self.navigator.navigate(&activation_location(&user.email));
            return Ok(LoginOutcome::VerificationRequired { user });
        }

        self.client.install(access, &refresh).await?;
        self.client.session().authenticate(user.clone());

        let landing = landing_for(user.role);
        info!(user_id = user.id, role = user.role.as_str(), "Logged in");
        self.navigator.navigate(landing);
        Ok(LoginOutcome::Authenticated { user, landing })
    }

    async fn login_rejection(&self, email: &str, e: ApiError) -> SessionError {
        let unverified = e.status() == Some(StatusCode::FORBIDDEN)
            && e.body()
                .and_then(|body| body.get("status"))
                .and_then(|status| status.as_str())
                == Some(EMAIL_NOT_VERIFIED);

        if !unverified {
            return rejection(e, DEFAULT_LOGIN_ERROR);
        }

        let message = e
            .body()
            .and_then(error_message)
            .unwrap_or_else(|| "Please verify your email address".to_string());

        info!(email = %email, "Login refused until email is verified");
        self.hold_for_verification(email).await;
        self.navigator.navigate(&activation_location(email));
        SessionError::EmailNotVerified {
            email: email.to_string(),
            message,
        }
    }

    /// Drop any earlier credentials and wait for `email` to be verified.
    async fn hold_for_verification(&self, email: &str) {
        if let Err(e) = self.client.forget_tokens().await {
            warn!(error = %e, "Failed to discard stored tokens");
        }
        self.client.session().await_verification(email);
    }

    async fn discard(&self) {
        if let Err(e) = self.client.clear_credentials().await {
            warn!(error = %e, "Failed to discard stored tokens");
        }
    }
}

/// Map a backend rejection to a displayable error, keeping other failures as-is.
fn rejection(e: ApiError, fallback: &str) -> SessionError {
    match e {
        ApiError::Status { status, body, .. } => SessionError::Rejected {
            status,
            message: error_message(&body).unwrap_or_else(|| fallback.to_string()),
        },
        other => SessionError::Api(other),
    }
}
