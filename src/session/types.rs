//! Identity and payload types exchanged with the backend.

use serde::{Deserialize, Serialize};

use super::errors::ValidationError;

/// Minimum password length accepted by the registration form.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Coarse permission class of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Patient,
    Doctor,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Patient => "patient",
            UserRole::Doctor => "doctor",
            UserRole::Admin => "admin",
        }
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "patient" => Ok(UserRole::Patient),
            "doctor" => Ok(UserRole::Doctor),
            "admin" => Ok(UserRole::Admin),
            other => Err(format!("Unknown role: {}", other)),
        }
    }
}

/// The authenticated principal as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(rename = "user_type")]
    pub role: UserRole,
    #[serde(rename = "is_verified", default)]
    pub verified: bool,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// Result of a login or registration that the backend accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Tokens were stored and the session is authenticated.
    Authenticated { user: User, landing: &'static str },
    /// The account exists but its email is not verified yet. No tokens were kept.
    VerificationRequired { user: User },
}

/// Fields collected by the registration form.
#[derive(Debug, Clone)]
pub struct RegistrationForm {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
    pub password_confirmation: String,
    pub role: UserRole,
    pub accepted_terms: bool,
}

impl RegistrationForm {
    /// Check the form before it is submitted. The backend still has the final word.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.email.trim().is_empty() {
            return Err(ValidationError::Required("email"));
        }
        if !looks_like_email(self.email.trim()) {
            return Err(ValidationError::InvalidEmail);
        }
        if self.first_name.trim().is_empty() {
            return Err(ValidationError::Required("first_name"));
        }
        if self.last_name.trim().is_empty() {
            return Err(ValidationError::Required("last_name"));
        }
        if self.password.is_empty() {
            return Err(ValidationError::Required("password"));
        }
        if self.password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(ValidationError::PasswordTooShort(MIN_PASSWORD_LENGTH));
        }
        if self.password_confirmation.is_empty() {
            return Err(ValidationError::Required("password_confirmation"));
        }
        if self.password != self.password_confirmation {
            return Err(ValidationError::PasswordMismatch);
        }
        if self.role == UserRole::Admin {
            return Err(ValidationError::RoleNotAllowed(self.role));
        }
        if !self.accepted_terms {
            return Err(ValidationError::TermsNotAccepted);
        }
        Ok(())
    }

    pub(crate) fn to_request(&self) -> RegisterRequest<'_> {
        RegisterRequest {
            email: self.email.trim(),
            first_name: self.first_name.trim(),
            last_name: self.last_name.trim(),
            password: &self.password,
            password2: &self.password_confirmation,
            user_type: self.role,
        }
    }
}

fn looks_like_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
}

#[derive(Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Serialize)]
pub(crate) struct RegisterRequest<'a> {
    pub email: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub password: &'a str,
    pub password2: &'a str,
    pub user_type: UserRole,
}

/// `{access, refresh, user}` returned by login and registration.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenPairResponse {
    pub access: String,
    pub refresh: String,
    pub user: User,
}

#[derive(Serialize)]
pub(crate) struct EmailRequest<'a> {
    pub email: &'a str,
}

#[derive(Deserialize)]
pub(crate) struct MessageResponse {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct EmailAvailability {
    pub available: bool,
}
