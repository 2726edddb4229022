//! Shared error handling for backend calls.

use reqwest::StatusCode;
use serde_json::Value;

/// Errors produced by the request pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The backend answered with a non-success status.
    #[error("{message} ({status})")]
    Status {
        status: StatusCode,
        message: String,
        body: Value,
    },
    /// The access token could not be renewed; the session has been ended.
    #[error("Session refresh failed: {source}")]
    Refresh {
        #[source]
        source: Box<ApiError>,
    },
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Invalid request URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("Token storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl ApiError {
    /// Build a status error from a raw response body.
    pub fn from_response(status: StatusCode, body: &[u8]) -> Self {
        let body: Value = serde_json::from_slice(body).unwrap_or(Value::Null);
        let message = error_message(&body).unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("Request failed")
                .to_string()
        });
        Self::Status {
            status,
            message,
            body,
        }
    }

    /// HTTP status of a backend rejection, if this is one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }

    /// JSON body of a backend rejection.
    pub fn body(&self) -> Option<&Value> {
        match self {
            ApiError::Status { body, .. } => Some(body),
            _ => None,
        }
    }
}

/// Extract a displayable message from an error body.
///
/// Looks at `error`, `detail` and `message` first, then falls back to field
/// errors shaped like `{"email": ["user with this email already exists."]}`.
pub fn error_message(body: &Value) -> Option<String> {
    if let Some(text) = body.as_str() {
        return non_blank(text);
    }

    for key in ["error", "detail", "message"] {
        if let Some(text) = body.get(key).and_then(Value::as_str).and_then(non_blank) {
            return Some(text);
        }
    }

    let fields = body.as_object()?;
    let messages: Vec<String> = fields
        .iter()
        .filter_map(|(field, value)| {
            let text = match value {
                Value::String(text) => non_blank(text),
                Value::Array(items) => items.iter().filter_map(Value::as_str).find_map(non_blank),
                _ => None,
            }?;
            if field == "non_field_errors" {
                Some(text)
            } else {
                Some(format!("{}: {}", field, text))
            }
        })
        .collect();

    if messages.is_empty() {
        None
    } else {
        Some(messages.join("; "))
    }
}

fn non_blank(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}
