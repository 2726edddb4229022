//! Authenticated request pipeline.
//!
//! Every bearer request carries the current access token. A 401 on the first
//! attempt triggers one refresh through `auth/token/refresh/` followed by one
//! retry; a failed refresh ends the session. Refreshes are serialized so a
//! burst of 401s results in a single refresh call.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use url::Url;

use super::error::ApiError;
use super::request::{ApiRequest, ApiResponse, Attempt, Credentials};
use crate::db::TokenStore;
use crate::session::SessionSignal;

/// Token refresh endpoint, relative to the API base.
pub const REFRESH_PATH: &str = "auth/token/refresh/";

/// Default timeout applied to each backend call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access: String,
    /// Present when the backend rotates refresh tokens.
    #[serde(default)]
    refresh: Option<String>,
}

/// HTTP client bound to one session. Clones share credentials and state.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    tokens: TokenStore,
    bearer: Arc<RwLock<Option<String>>>,
    refresh_gate: Arc<Mutex<()>>,
    session: SessionSignal,
}

impl ApiClient {
    pub fn new(base: Url, timeout: Duration, tokens: TokenStore) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("banadoctor/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base: with_trailing_slash(base),
            tokens,
            bearer: Arc::new(RwLock::new(None)),
            refresh_gate: Arc::new(Mutex::new(())),
            session: SessionSignal::new(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn session(&self) -> &SessionSignal {
        &self.session
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// Access token currently attached to bearer requests.
    pub fn bearer(&self) -> Option<String> {
        self.bearer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_bearer(&self, token: Option<String>) {
        *self.bearer.write().unwrap_or_else(PoisonError::into_inner) = token;
    }

    /// Resolve a path relative to the API base.
    pub fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base.join(path.trim_start_matches('/'))?)
    }

    /// Send a request through the pipeline.
    pub async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        self.dispatch(request, Attempt::First).await
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(&ApiRequest::get(path)).await?.json()
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(&ApiRequest::post(path).json(body)?).await?.json()
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(&ApiRequest::put(path).json(body)?).await?.json()
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.send(&ApiRequest::delete(path)).await?;
        Ok(())
    }

    /// Store a new token pair and attach its access token.
    ///
    /// Waits for any refresh in flight so it cannot overwrite the new pair.
    pub(crate) async fn install(&self, access: String, refresh: &str) -> Result<(), ApiError> {
        let _gate = self.refresh_gate.lock().await;
        self.tokens.save(&access, refresh).await?;
        self.set_bearer(Some(access));
        Ok(())
    }

    /// Forget both tokens and mark the session unauthenticated.
    ///
    /// The in-memory credential and the session state are reset even when the
    /// store cannot be cleared; the storage error is still returned.
    pub(crate) async fn clear_credentials(&self) -> Result<(), ApiError> {
        let _gate = self.refresh_gate.lock().await;
        let cleared = self.wipe().await;
        self.session.sign_out();
        cleared
    }

    /// Forget both tokens without changing the session state.
    pub(crate) async fn forget_tokens(&self) -> Result<(), ApiError> {
        let _gate = self.refresh_gate.lock().await;
        self.wipe().await
    }

    /// Callers hold the refresh gate.
    async fn wipe(&self) -> Result<(), ApiError> {
        self.set_bearer(None);
        Ok(self.tokens.clear().await?)
    }

    /// End the session from inside a refresh. The gate is already held.
    async fn terminate(&self) {
        if let Err(e) = self.wipe().await {
            error!(error = %e, "Failed to clear stored tokens");
        }
        self.session.sign_out();
    }

    fn dispatch<'a>(
        &'a self,
        request: &'a ApiRequest,
        attempt: Attempt,
    ) -> BoxFuture<'a, Result<ApiResponse, ApiError>> {
        async move {
            let bearer = match request.credentials() {
                Credentials::Bearer => self.bearer(),
                Credentials::Anonymous => None,
            };

            let response = self.send_once(request, bearer.as_deref()).await?;

            if response.status() != StatusCode::UNAUTHORIZED
                || request.credentials() == Credentials::Anonymous
                || attempt == Attempt::Retry
            {
                return response.into_result();
            }

            debug!(path = %request.path(), "Access token rejected, refreshing");
            match self.renew_access(bearer.as_deref()).await? {
                Some(_) => self.dispatch(request, Attempt::Retry).await,
                None => response.into_result(),
            }
        }
        .boxed()
    }

    async fn send_once(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> Result<ApiResponse, ApiError> {
        let url = self.endpoint(request.path())?;
        let mut builder = self.http.request(request.method().clone(), url);

        if !request.query_pairs().is_empty() {
            builder = builder.query(request.query_pairs());
        }
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = request.body() {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.bytes().await?.to_vec();

        debug!(
            method = %request.method(),
            path = %request.path(),
            status = %status,
            "Backend response"
        );
        Ok(ApiResponse::new(status, body))
    }

    /// Obtain a usable access token after `stale` was rejected.
    ///
    /// Returns `Ok(None)` when there is no refresh token: the session is ended
    /// and the caller propagates its original failure.
    async fn renew_access(&self, stale: Option<&str>) -> Result<Option<String>, ApiError> {
        let _gate = self.refresh_gate.lock().await;

        // Another request may have renewed the token while we waited.
        if let Some(current) = self.bearer() {
            if stale != Some(current.as_str()) {
                debug!("Access token already renewed");
                return Ok(Some(current));
            }
        }

        let refresh = match self.tokens.load_refresh().await {
            Ok(Some(refresh)) => refresh,
            Ok(None) => {
                warn!("No refresh token available, ending session");
                self.terminate().await;
                return Ok(None);
            }
            Err(e) => {
                self.terminate().await;
                return Err(ApiError::Refresh {
                    source: Box::new(e.into()),
                });
            }
        };

        match self.request_refresh(&refresh).await {
            Ok(renewed) => {
                let refresh = renewed.refresh.unwrap_or(refresh);
                if let Err(e) = self.tokens.save(&renewed.access, &refresh).await {
                    self.terminate().await;
                    return Err(ApiError::Refresh {
                        source: Box::new(e.into()),
                    });
                }
                self.set_bearer(Some(renewed.access.clone()));
                info!("Access token refreshed");
                Ok(Some(renewed.access))
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, ending session");
                self.terminate().await;
                Err(ApiError::Refresh {
                    source: Box::new(e),
                })
            }
        }
    }

    async fn request_refresh(&self, refresh: &str) -> Result<RefreshResponse, ApiError> {
        let request = ApiRequest::post(REFRESH_PATH)
            .anonymous()
            .json(&RefreshRequest { refresh })?;
        self.send(&request).await?.json()
    }
}

/// `Url::join` replaces the last segment unless the base ends with `/`.
fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
