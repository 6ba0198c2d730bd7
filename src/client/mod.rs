//! Request client for the control panel REST API
//!
//! Every call runs the same pipeline:
//!
//! 1. Refresh the credential if it expires within the configured window
//! 2. Attach the bearer credential when one is held
//! 3. Dispatch with the configured timeout
//! 4. On 401, purge the credential and send the user to the login view
//! 5. Retry transient failures with exponential backoff
//! 6. Strip `data` envelopes from the response body
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use remedy_link::{ClientConfig, CredentialStore, RequestClient, RouteTracker};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = RequestClient::new(
//!     ClientConfig::new("http://localhost:8000/api"),
//!     Arc::new(CredentialStore::in_memory()),
//!     Arc::new(RouteTracker::default()),
//! )?;
//!
//! let incident: serde_json::Value = client.get("/incidents/42").await?;
//! let sites = client.get_paginated::<serde_json::Value>("/sites").await?;
//! println!("{} of {} sites", sites.items.len(), sites.total);
//! # Ok(())
//! # }
//! ```

pub mod envelope;
pub mod navigator;
pub mod retry;
pub mod session;

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, ACCEPT, RETRY_AFTER};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::auth::{token, CredentialStore};
use crate::config::ClientConfig;
use crate::types::{ClientError, Result};

pub use envelope::Page;
pub use navigator::{Navigator, RouteTracker};
pub use retry::{RetryPolicy, RetryState};
pub use session::{AuthSession, LoginRequest};

/// Pipeline switches for a single call
#[derive(Debug, Clone, Copy)]
pub(crate) struct CallOptions {
    authenticate: bool,
    refresh_first: bool,
    handle_unauthorized: bool,
    retry: bool,
}

impl CallOptions {
    /// Regular API calls
    pub(crate) const STANDARD: Self = Self {
        authenticate: true,
        refresh_first: true,
        handle_unauthorized: true,
        retry: true,
    };

    /// Login: no credential, a 401 just means bad credentials
    pub(crate) const LOGIN: Self = Self {
        authenticate: false,
        refresh_first: false,
        handle_unauthorized: false,
        retry: true,
    };

    /// Refresh and logout: single shot, never purges on its own
    pub(crate) const SESSION: Self = Self {
        authenticate: true,
        refresh_first: false,
        handle_unauthorized: false,
        retry: false,
    };
}

/// Fully resolved outbound request, reusable across retries
#[derive(Debug, Clone)]
pub(crate) struct PreparedRequest {
    method: Method,
    url: Url,
    query: Vec<(String, String)>,
    body: Option<Value>,
}

/// HTTP client for the control panel API
pub struct RequestClient {
    config: ClientConfig,
    base: Url,
    http: Client,
    credentials: Arc<CredentialStore>,
    navigator: Arc<dyn Navigator>,
    policy: RetryPolicy,
    refresh_lock: AsyncMutex<()>,
}

impl RequestClient {
    /// Create a new request client
    pub fn new(
        config: ClientConfig,
        credentials: Arc<CredentialStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self> {
        Self::build(config, credentials, navigator, None)
    }

    /// Create a client whose cookie jar is shared with the credential store
    pub fn with_cookie_jar(
        config: ClientConfig,
        credentials: Arc<CredentialStore>,
        navigator: Arc<dyn Navigator>,
        jar: Arc<Jar>,
    ) -> Result<Self> {
        Self::build(config, credentials, navigator, Some(jar))
    }

    fn build(
        config: ClientConfig,
        credentials: Arc<CredentialStore>,
        navigator: Arc<dyn Navigator>,
        jar: Option<Arc<Jar>>,
    ) -> Result<Self> {
        config.validate()?;
        let base = config.base()?;

        let mut builder =
            Client::builder().user_agent(concat!("remedy-link/", env!("CARGO_PKG_VERSION")));
        if let Some(jar) = jar {
            builder = builder.cookie_provider(jar);
        }
        let http = builder
            .build()
            .map_err(|e| ClientError::Config(format!("Failed to build HTTP client: {}", e)))?;

        info!(
            base_url = %base,
            timeout_ms = config.timeout.as_millis() as u64,
            max_retries = config.max_retries,
            "RequestClient created"
        );

        Ok(Self {
            policy: RetryPolicy::from_config(&config),
            config,
            base,
            http,
            credentials,
            navigator,
            refresh_lock: AsyncMutex::new(()),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    // ==================== Verbs ====================

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.call(Method::GET, path, Vec::new(), None).await
    }

    pub async fn get_with_query<T, Q>(&self, path: &str, query: &Q) -> Result<T>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        self.call(Method::GET, path, query_pairs(query)?, None).await
    }

    /// Fetch a collection, reporting the total from the pagination envelope
    pub async fn get_paginated<T: DeserializeOwned>(&self, path: &str) -> Result<Page<T>> {
        let prepared = self.prepare(Method::GET, path, Vec::new(), None)?;
        let body = self.execute(&prepared, CallOptions::STANDARD).await?;
        envelope::paginate(body)
    }

    pub async fn get_paginated_with_query<T, Q>(&self, path: &str, query: &Q) -> Result<Page<T>>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let prepared = self.prepare(Method::GET, path, query_pairs(query)?, None)?;
        let body = self.execute(&prepared, CallOptions::STANDARD).await?;
        envelope::paginate(body)
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = serde_json::to_value(body)?;
        self.call(Method::POST, path, Vec::new(), Some(body)).await
    }

    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = serde_json::to_value(body)?;
        self.call(Method::PUT, path, Vec::new(), Some(body)).await
    }

    pub async fn patch<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = serde_json::to_value(body)?;
        self.call(Method::PATCH, path, Vec::new(), Some(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.call(Method::DELETE, path, Vec::new(), None).await
    }

    /// Run the pipeline and return the body without unwrapping envelopes
    pub async fn send_raw(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value> {
        let prepared = self.prepare(method, path, Vec::new(), body)?;
        self.execute(&prepared, CallOptions::STANDARD).await
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: Vec<(String, String)>,
        body: Option<Value>,
    ) -> Result<T> {
        let prepared = self.prepare(method, path, query, body)?;
        let body = self.execute(&prepared, CallOptions::STANDARD).await?;
        Ok(serde_json::from_value(envelope::unwrap(body))?)
    }

    // ==================== Pipeline ====================

    pub(crate) fn prepare(
        &self,
        method: Method,
        path: &str,
        query: Vec<(String, String)>,
        body: Option<Value>,
    ) -> Result<PreparedRequest> {
        let url = self.base.join(path.trim_start_matches('/'))?;
        Ok(PreparedRequest {
            method,
            url,
            query,
            body,
        })
    }

    pub(crate) async fn execute(
        &self,
        prepared: &PreparedRequest,
        options: CallOptions,
    ) -> Result<Value> {
        if options.refresh_first {
            self.refresh_if_expiring().await;
        }
        self.send_with_retry(prepared, options).await
    }

    /// Dispatch and retry without the refresh step. The refresh call itself
    /// goes through here, so the pipeline never re-enters itself.
    pub(crate) async fn send_with_retry(
        &self,
        prepared: &PreparedRequest,
        options: CallOptions,
    ) -> Result<Value> {
        let policy = if options.retry {
            self.policy
        } else {
            RetryPolicy::none()
        };
        let mut retry = RetryState::new(policy);

        loop {
            let err = match self.dispatch(prepared, options).await {
                Ok(body) => return Ok(body),
                Err(err) => err,
            };

            match retry.schedule(&err) {
                Some(delay) => {
                    warn!(
                        method = %prepared.method,
                        url = %prepared.url,
                        attempt = retry.attempts(),
                        max_retries = policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retry.begin_attempt();
                }
                None => {
                    if err.is_retryable() && retry.attempts() > 0 {
                        error!(
                            method = %prepared.method,
                            url = %prepared.url,
                            retries = retry.attempts(),
                            error = %err,
                            "Giving up after retries"
                        );
                    }
                    return Err(err);
                }
            }
        }
    }

    async fn dispatch(&self, prepared: &PreparedRequest, options: CallOptions) -> Result<Value> {
        let mut request = self
            .http
            .request(prepared.method.clone(), prepared.url.clone())
            .timeout(self.config.timeout)
            .header(ACCEPT, "application/json");

        if !prepared.query.is_empty() {
            request = request.query(&prepared.query);
        }
        if let Some(ref body) = prepared.body {
            request = request.json(body);
        }
        if options.authenticate {
            if let Some(credential) = self.credentials.get() {
                request = request.bearer_auth(credential);
            }
        }

        if self.config.logging_enabled {
            debug!(method = %prepared.method, url = %prepared.url, "Request");
        }

        let started = Instant::now();
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                let err = ClientError::from(e);
                if self.config.logging_enabled {
                    debug!(
                        method = %prepared.method,
                        url = %prepared.url,
                        error = %err,
                        "Request failed"
                    );
                }
                return Err(err);
            }
        };

        let status = response.status();
        if self.config.logging_enabled {
            debug!(
                method = %prepared.method,
                url = %prepared.url,
                status = status.as_u16(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Response"
            );
        }

        if status.is_success() {
            return read_body(response).await;
        }

        let err = error_from_response(response).await;
        if status == StatusCode::UNAUTHORIZED && options.handle_unauthorized {
            self.handle_unauthorized();
        }
        Err(err)
    }

    /// Purge the credential and leave for the login view
    fn handle_unauthorized(&self) {
        warn!("Credential rejected by server, ending session");

        if let Err(e) = self.credentials.clear() {
            error!(error = %e, "Failed to clear credential after 401");
        }

        let current = self.navigator.current_route();
        if !navigator::is_login_route(&current, &self.config.login_route) {
            self.navigator.navigate(&self.config.login_route);
        }
    }

    /// Refresh ahead of expiry; failures are logged and swallowed
    async fn refresh_if_expiring(&self) {
        let threshold = self.config.refresh_threshold;
        let Some(current) = self.credentials.get() else {
            return;
        };
        if !token::expires_within(&current, threshold, token::now_secs()) {
            return;
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited for the lock
        match self.credentials.get() {
            None => return,
            Some(latest)
                if latest != current
                    && !token::expires_within(&latest, threshold, token::now_secs()) =>
            {
                return
            }
            _ => {}
        }

        if let Err(e) = self.refresh_credential().await {
            warn!(error = %e, "Credential refresh failed, continuing with current credential");
        }
    }
}

/// Read a success body; empty bodies become `null`
async fn read_body(response: Response) -> Result<Value> {
    let bytes = response.bytes().await?;
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    match serde_json::from_slice(&bytes) {
        Ok(value) => Ok(value),
        Err(_) => Ok(Value::String(String::from_utf8_lossy(&bytes).into_owned())),
    }
}

/// Classify a non-success response
async fn error_from_response(response: Response) -> ClientError {
    let status = response.status();
    let retry_after = retry_after(response.headers());

    let body = response
        .bytes()
        .await
        .ok()
        .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).ok())
        .unwrap_or(Value::Null);

    let message = envelope::error_message(&body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("Request failed")
            .to_string()
    });
    let details = body.get("errors").or_else(|| body.get("details")).cloned();

    ClientError::from_status(status.as_u16(), message, details, retry_after)
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Flatten a serializable query object into string pairs, skipping nulls
fn query_pairs<Q: Serialize + ?Sized>(query: &Q) -> Result<Vec<(String, String)>> {
    match serde_json::to_value(query)? {
        Value::Null => Ok(Vec::new()),
        Value::Object(map) => Ok(map
            .into_iter()
            .filter_map(|(key, value)| match value {
                Value::Null => None,
                Value::String(s) => Some((key, s)),
                other => Some((key, other.to_string())),
            })
            .collect()),
        _ => Err(ClientError::Config(
            "Query parameters must serialize to an object".into(),
        )),
    }
}
