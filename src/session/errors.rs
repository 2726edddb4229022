//! Session error types.

use reqwest::StatusCode;

use super::types::UserRole;
use crate::api::ApiError;

/// Fallback shown when a login rejection carries no usable message.
pub const DEFAULT_LOGIN_ERROR: &str =
    "Invalid credentials. Please check your email and password and try again.";

/// Errors surfaced by session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The backend refused the credentials or the submitted fields.
    #[error("{message}")]
    Rejected { status: StatusCode, message: String },
    /// The account exists but the email address has not been verified.
    #[error("{message}")]
    EmailNotVerified { email: String, message: String },
    /// The form failed client-side checks and was not submitted.
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl SessionError {
    /// Email to carry into the activation flow, if this error calls for it.
    pub fn activation_email(&self) -> Option<&str> {
        match self {
            SessionError::EmailNotVerified { email, .. } => Some(email),
            _ => None,
        }
    }
}

/// Client-side form validation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("The {0} field is required")]
    Required(&'static str),
    #[error("The email address is not valid")]
    InvalidEmail,
    #[error("The password must contain at least {0} characters")]
    PasswordTooShort(usize),
    #[error("The passwords do not match")]
    PasswordMismatch,
    #[error("The terms of use must be accepted")]
    TermsNotAccepted,
    #[error("Cannot register with the {} role", .0.as_str())]
    RoleNotAllowed(UserRole),
}
