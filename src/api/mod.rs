mod client;
mod error;
mod request;

pub use client::{ApiClient, DEFAULT_REQUEST_TIMEOUT, REFRESH_PATH};
pub use error::{ApiError, error_message};
pub use request::{ApiRequest, ApiResponse, Credentials};
