#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use banadoctor::api::{ApiClient, DEFAULT_REQUEST_TIMEOUT};
use banadoctor::db::Database;
use banadoctor::guard::Navigator;
use banadoctor::session::{SessionManager, UserRole};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde::Serialize;
use serde_json::{Value, json};
use url::Url;
use uuid::Uuid;

pub const PASSWORD: &str = "correct-horse";

const SECRET: &[u8] = b"mock-backend-secret";
const ACCESS_LIFETIME_SECS: u64 = 300;
const REFRESH_LIFETIME_SECS: u64 = 86_400;

// =============================================================================
// Mock backend
// =============================================================================

#[derive(Serialize)]
struct Claims {
    sub: String,
    exp: u64,
    jti: String,
    token_type: &'static str,
}

struct Account {
    user: Value,
    password: String,
}

#[derive(Default)]
struct Tokens {
    accounts: HashMap<String, Account>,
    access: HashMap<String, String>,
    refresh: HashMap<String, String>,
    next_id: i64,
}

/// In-memory stand-in for the platform API.
#[derive(Default)]
pub struct Backend {
    tokens: Mutex<Tokens>,
    refresh_calls: AtomicUsize,
    profile_calls: AtomicUsize,
    login_calls: AtomicUsize,
    register_calls: AtomicUsize,
    refresh_delay_ms: AtomicU64,
    /// Answer login for unverified accounts with 403 instead of a token pair.
    reject_unverified: AtomicBool,
    /// Reject every bearer token, even freshly issued ones.
    reject_bearer: AtomicBool,
    /// Mark newly registered accounts as verified.
    verify_registrations: AtomicBool,
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Mint a JWT for `email` expiring at `exp`.
pub fn mint(email: &str, exp: u64, token_type: &'static str) -> String {
    let claims = Claims {
        sub: email.to_string(),
        exp,
        jti: Uuid::new_v4().to_string(),
        token_type,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET)).unwrap()
}

impl Backend {
    pub fn add_account(&self, email: &str, role: UserRole, verified: bool) -> i64 {
        let mut tokens = self.tokens.lock().unwrap();
        tokens.next_id += 1;
        let id = tokens.next_id;
        tokens.accounts.insert(
            email.to_string(),
            Account {
                user: json!({
                    "id": id,
                    "email": email,
                    "first_name": "Test",
                    "last_name": role.as_str(),
                    "user_type": role.as_str(),
                    "is_verified": verified,
                }),
                password: PASSWORD.to_string(),
            },
        );
        id
    }

    /// Issue a valid pair for an existing account, as a previous login would have.
    pub fn issue_pair(&self, email: &str) -> (String, String) {
        let mut tokens = self.tokens.lock().unwrap();
        issue(&mut tokens, email)
    }

    /// Access token with an `exp` in the past.
    pub fn expired_access(&self, email: &str) -> String {
        mint(email, now() - 60, "access")
    }

    /// Make every issued access token unusable, as if they had all expired.
    pub fn expire_access_tokens(&self) {
        self.tokens.lock().unwrap().access.clear();
    }

    pub fn revoke_refresh_tokens(&self) {
        self.tokens.lock().unwrap().refresh.clear();
    }

    pub fn is_refresh_valid(&self, refresh: &str) -> bool {
        self.tokens.lock().unwrap().refresh.contains_key(refresh)
    }

    pub fn has_account(&self, email: &str) -> bool {
        self.tokens.lock().unwrap().accounts.contains_key(email)
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        self.refresh_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_reject_unverified(&self, reject: bool) {
        self.reject_unverified.store(reject, Ordering::SeqCst);
    }

    pub fn set_reject_bearer(&self, reject: bool) {
        self.reject_bearer.store(reject, Ordering::SeqCst);
    }

    pub fn set_verify_registrations(&self, verify: bool) {
        self.verify_registrations.store(verify, Ordering::SeqCst);
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn profile_calls(&self) -> usize {
        self.profile_calls.load(Ordering::SeqCst)
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn register_calls(&self) -> usize {
        self.register_calls.load(Ordering::SeqCst)
    }

    /// Account behind a bearer header, if the token is currently valid.
    fn authorize(&self, headers: &HeaderMap) -> Option<Value> {
        if self.reject_bearer.load(Ordering::SeqCst) {
            return None;
        }
        let token = headers
            .get(header::AUTHORIZATION)?
            .to_str()
            .ok()?
            .strip_prefix("Bearer ")?;
        let tokens = self.tokens.lock().unwrap();
        let email = tokens.access.get(token)?;
        tokens.accounts.get(email).map(|account| account.user.clone())
    }
}

fn issue(tokens: &mut Tokens, email: &str) -> (String, String) {
    let access = mint(email, now() + ACCESS_LIFETIME_SECS, "access");
    let refresh = mint(email, now() + REFRESH_LIFETIME_SECS, "refresh");
    tokens.access.insert(access.clone(), email.to_string());
    tokens.refresh.insert(refresh.clone(), email.to_string());
    (access, refresh)
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "detail": "Given token not valid for any token type",
            "code": "token_not_valid"
        })),
    )
        .into_response()
}

async fn login(State(backend): State<Arc<Backend>>, Json(body): Json<Value>) -> Response {
    backend.login_calls.fetch_add(1, Ordering::SeqCst);
    let email = body["email"].as_str().unwrap_or_default();
    let password = body["password"].as_str().unwrap_or_default();

    let mut tokens = backend.tokens.lock().unwrap();
    let user = match tokens.accounts.get(email) {
        Some(account) if account.password == password => account.user.clone(),
        _ => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"detail": "No active account found with the given credentials"})),
            )
                .into_response();
        }
    };

    if user["is_verified"] == false && backend.reject_unverified.load(Ordering::SeqCst) {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({
                "error": "Please verify your email address before logging in.",
                "status": "email_not_verified",
                "email": email,
            })),
        )
            .into_response();
    }

    let (access, refresh) = issue(&mut tokens, email);
    Json(json!({"access": access, "refresh": refresh, "user": user})).into_response()
}

async fn register(State(backend): State<Arc<Backend>>, Json(body): Json<Value>) -> Response {
    backend.register_calls.fetch_add(1, Ordering::SeqCst);
    let email = body["email"].as_str().unwrap_or_default().to_string();
    if backend.has_account(&email) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"email": ["user with this email already exists."]})),
        )
            .into_response();
    }

    let role: UserRole = body["user_type"]
        .as_str()
        .unwrap_or("patient")
        .parse()
        .unwrap();
    let verified = backend.verify_registrations.load(Ordering::SeqCst);
    backend.add_account(&email, role, verified);

    let mut tokens = backend.tokens.lock().unwrap();
    let user = tokens.accounts[&email].user.clone();
    let (access, refresh) = issue(&mut tokens, &email);
    (
        StatusCode::CREATED,
        Json(json!({"access": access, "refresh": refresh, "user": user})),
    )
        .into_response()
}

async fn refresh(State(backend): State<Arc<Backend>>, Json(body): Json<Value>) -> Response {
    backend.refresh_calls.fetch_add(1, Ordering::SeqCst);
    let delay = backend.refresh_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    let presented = body["refresh"].as_str().unwrap_or_default();
    let mut tokens = backend.tokens.lock().unwrap();
    let Some(email) = tokens.refresh.remove(presented) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "Token is invalid or expired", "code": "token_not_valid"})),
        )
            .into_response();
    };

    let (access, refresh) = issue(&mut tokens, &email);
    Json(json!({"access": access, "refresh": refresh})).into_response()
}

async fn profile(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    backend.profile_calls.fetch_add(1, Ordering::SeqCst);
    match backend.authorize(&headers) {
        Some(user) => Json(user).into_response(),
        None => unauthorized(),
    }
}

async fn appointments(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    match backend.authorize(&headers) {
        Some(user) => Json(json!([
            {"id": 1, "patient": user["email"], "doctor": "Dr Kone", "status": "confirmed"}
        ]))
        .into_response(),
        None => unauthorized(),
    }
}

async fn book_appointment(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    match backend.authorize(&headers) {
        Some(user) => (
            StatusCode::CREATED,
            Json(json!({
                "id": 2,
                "patient": user["email"],
                "doctor": body["doctor"],
                "status": "pending"
            })),
        )
            .into_response(),
        None => unauthorized(),
    }
}

async fn update_appointment(
    State(backend): State<Arc<Backend>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    match backend.authorize(&headers) {
        Some(_) => Json(json!({"id": id, "status": body["status"]})).into_response(),
        None => unauthorized(),
    }
}

async fn cancel_appointment(
    State(backend): State<Arc<Backend>>,
    Path(_id): Path<i64>,
    headers: HeaderMap,
) -> Response {
    match backend.authorize(&headers) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => unauthorized(),
    }
}

async fn resend_verification(
    State(backend): State<Arc<Backend>>,
    Json(body): Json<Value>,
) -> Response {
    let email = body["email"].as_str().unwrap_or_default();
    let tokens = backend.tokens.lock().unwrap();
    match tokens.accounts.get(email) {
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "No account found with this email address"})),
        )
            .into_response(),
        Some(account) if account.user["is_verified"] == true => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Email is already verified"})),
        )
            .into_response(),
        Some(_) => Json(json!({"message": "Verification email sent"})).into_response(),
    }
}

async fn check_email(
    State(backend): State<Arc<Backend>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let email = params.get("email").map(String::as_str).unwrap_or_default();
    Json(json!({"available": !backend.has_account(email)})).into_response()
}

pub struct MockServer {
    pub backend: Arc<Backend>,
    pub base_url: Url,
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub async fn start_backend() -> MockServer {
    let backend = Arc::new(Backend::default());
    backend.set_verify_registrations(true);

    let app = Router::new()
        .route("/api/v1/auth/login/", post(login))
        .route("/api/v1/auth/register/", post(register))
        .route("/api/v1/auth/token/refresh/", post(refresh))
        .route(
            "/api/v1/auth/resend-verification-email/",
            post(resend_verification),
        )
        .route("/api/v1/auth/check-email/", get(check_email))
        .route("/api/v1/users/profile/", get(profile))
        .route(
            "/api/v1/appointments/",
            get(appointments).post(book_appointment),
        )
        .route(
            "/api/v1/appointments/{id}/",
            put(update_appointment).delete(cancel_appointment),
        )
        .with_state(backend.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind mock backend");
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    MockServer {
        backend,
        base_url: Url::parse(&format!("http://{}/api/v1", addr)).unwrap(),
        handle,
    }
}

// =============================================================================
// Client side
// =============================================================================

/// Navigator that remembers every location it was sent to.
#[derive(Default)]
pub struct RecordingNavigator {
    visits: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn visits(&self) -> Vec<String> {
        self.visits.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<String> {
        self.visits.lock().unwrap().last().cloned()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, location: &str) {
        self.visits.lock().unwrap().push(location.to_string());
    }
}

pub struct TestSession {
    pub session: SessionManager,
    pub navigator: Arc<RecordingNavigator>,
    pub db: Database,
}

pub async fn session_with_db(server: &MockServer, db: Database) -> TestSession {
    let client = ApiClient::new(server.base_url.clone(), DEFAULT_REQUEST_TIMEOUT, db.tokens())
        .expect("Failed to build client");
    let navigator = Arc::new(RecordingNavigator::default());
    let session = SessionManager::new(client, navigator.clone());
    TestSession {
        session,
        navigator,
        db,
    }
}

pub async fn session(server: &MockServer) -> TestSession {
    let db = Database::open(":memory:")
        .await
        .expect("Failed to open test database");
    session_with_db(server, db).await
}

/// SQLite file removed when dropped.
pub struct TempStore {
    pub path: std::path::PathBuf,
}

impl TempStore {
    pub fn new() -> Self {
        Self {
            path: std::env::temp_dir().join(format!("banadoctor-{}.db", Uuid::new_v4())),
        }
    }

    pub fn path_str(&self) -> &str {
        self.path.to_str().unwrap()
    }
}

impl Drop for TempStore {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm", "-journal"] {
            let _ = std::fs::remove_file(format!("{}{}", self.path.display(), suffix));
        }
    }
}
