//! CLI argument parsing, validation, and command handlers.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use url::Url;

use crate::api::ApiRequest;
use crate::guard::{Navigator, evaluate};
use crate::session::{
    LoginOutcome, RegistrationForm, SessionError, SessionManager, SessionState, UserRole,
};
use crate::{ClientConfig, open_session};

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "banadoctor", about = "BanaDoctor session client")]
pub struct Args {
    /// Backend API base URL
    #[arg(
        long,
        env = "BANADOCTOR_API_URL",
        default_value = "http://localhost:8000/api/v1/",
        global = true
    )]
    pub api_url: String,

    /// Path to the SQLite file holding the session tokens
    #[arg(long, env = "BANADOCTOR_STORE", default_value = "banadoctor.db", global = true)]
    pub store: String,

    /// Request timeout in seconds
    #[arg(long, default_value = "30", global = true)]
    pub timeout: u64,

    /// Log output format
    #[arg(short, long, default_value = "pretty", global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Log in with email and password
    Login {
        email: String,
        #[arg(long, env = "BANADOCTOR_PASSWORD")]
        password: String,
    },
    /// Create an account and log in
    Register {
        email: String,
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long, env = "BANADOCTOR_PASSWORD")]
        password: String,
        /// Defaults to the password
        #[arg(long)]
        password_confirmation: Option<String>,
        /// patient or doctor
        #[arg(long, default_value = "patient")]
        role: UserRole,
        /// Accept the terms of use
        #[arg(long)]
        accept_terms: bool,
    },
    /// Forget the stored session
    Logout,
    /// Show the current session
    Whoami,
    /// Send the activation email again
    ResendVerification { email: String },
    /// Check whether an email can still be registered
    CheckEmail { email: String },
    /// Authenticated GET against the API, printing the response body
    Get { path: String },
    /// Show where the route guard would send the current session
    Route { location: String },
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Parse and validate the API base URL.
/// Returns None and logs an error if validation fails.
pub fn validate_api_url(api_url: &str) -> Option<Url> {
    let url = match Url::parse(api_url) {
        Ok(url) => url,
        Err(e) => {
            error!(url = %api_url, error = %e, "Invalid API URL");
            return None;
        }
    };

    match url.scheme() {
        "https" => {}
        "http" => {
            let is_local = matches!(url.host_str(), Some("localhost" | "127.0.0.1" | "[::1]"));
            if !is_local {
                warn!(url = %url, "API URL is not using HTTPS, tokens will travel in clear text");
            }
        }
        scheme => {
            error!(scheme = %scheme, "API URL must use http or https");
            return None;
        }
    }

    Some(url)
}

/// Build ClientConfig from validated arguments.
pub fn build_config(api_url: Url, store: String, timeout: u64) -> ClientConfig {
    ClientConfig {
        api_url,
        store_path: store,
        request_timeout: Duration::from_secs(timeout.max(1)),
    }
}

/// Navigator that reports redirects on stdout.
pub struct PrintNavigator;

impl Navigator for PrintNavigator {
    fn navigate(&self, location: &str) {
        println!("Next: {}", location);
    }
}

/// Open the session, logging errors if it fails.
pub async fn open_client(config: &ClientConfig) -> Option<SessionManager> {
    match open_session(config, Arc::new(PrintNavigator)).await {
        Ok(session) => {
            info!(store = %config.store_path, api = %config.api_url, "Session store opened");
            Some(session)
        }
        Err(e) => {
            error!(store = %config.store_path, error = %e, "Failed to open session store");
            None
        }
    }
}

/// Run one command against a loaded session.
pub async fn execute(session: &SessionManager, command: Command) -> Result<(), SessionError> {
    match command {
        Command::Login { email, password } => {
            report_outcome(session.login(&email, &password).await?);
        }
        Command::Register {
            email,
            first_name,
            last_name,
            password,
            password_confirmation,
            role,
            accept_terms,
        } => {
            let form = RegistrationForm {
                email,
                first_name,
                last_name,
                password_confirmation: password_confirmation.unwrap_or_else(|| password.clone()),
                password,
                role,
                accepted_terms: accept_terms,
            };
            report_outcome(session.register(&form).await?);
        }
        Command::Logout => {
            session.logout().await?;
            println!("Logged out");
        }
        Command::Whoami => match session.state() {
            SessionState::Authenticated(user) => {
                println!("{} <{}> ({})", user.full_name(), user.email, user.role.as_str());
            }
            SessionState::PendingVerification { email } => {
                println!("Waiting for email verification: {}", email);
            }
            SessionState::Initializing | SessionState::Unauthenticated => {
                println!("Not logged in");
            }
        },
        Command::ResendVerification { email } => {
            println!("{}", session.resend_verification(&email).await?);
        }
        Command::CheckEmail { email } => {
            if session.check_email_available(&email).await? {
                println!("{} is available", email.trim());
            } else {
                println!("{} is already registered", email.trim());
            }
        }
        Command::Get { path } => {
            let response = session.client().send(&ApiRequest::get(path)).await?;
            match serde_json::from_slice::<serde_json::Value>(response.bytes()) {
                Ok(json) => println!(
                    "{}",
                    serde_json::to_string_pretty(&json).unwrap_or_else(|_| json.to_string())
                ),
                Err(_) => println!("{}", String::from_utf8_lossy(response.bytes())),
            }
        }
        Command::Route { location } => match evaluate(&session.state(), &location) {
            Some(redirect) => println!("{} -> {}", location, redirect.location()),
            None => println!("{} is allowed", location),
        },
    }
    Ok(())
}

fn report_outcome(outcome: LoginOutcome) {
    match outcome {
        LoginOutcome::Authenticated { user, landing } => {
            println!("Logged in as {} ({}), landing on {}", user.email, user.role.as_str(), landing);
        }
        LoginOutcome::VerificationRequired { user } => {
            println!("Check {} for the activation link before logging in", user.email);
        }
    }
}
