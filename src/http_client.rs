use anyhow::Context;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, Request, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

use crate::auth::{LoginPrompt, TokenAcquisition, TokenSource};
use crate::error::{ApiError, Result};

/// Outcome handed to every caller waiting on a refresh
type RefreshOutcome = Result<String>;

/// A caller parked until the in-flight refresh settles
type PendingRequest = oneshot::Sender<RefreshOutcome>;

/// Refresh coordination state
/// Only touched inside short synchronous critical sections, never across an await
#[derive(Default)]
struct RefreshState {
    in_progress: bool,
    pending: Vec<PendingRequest>,
}

/// Shared refresh gate: a flag plus the callers queued behind it
#[derive(Default)]
struct RefreshGate {
    state: Mutex<RefreshState>,
}

/// What a caller must do after hitting a 401
enum RefreshTicket<'a> {
    /// This caller owns the refresh flow
    Lead(RefreshLease<'a>),
    /// Another caller is refreshing; wait for its outcome
    Wait(oneshot::Receiver<RefreshOutcome>),
}

impl RefreshGate {
    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check-and-set the in-progress flag in one step
    fn enter(&self) -> RefreshTicket<'_> {
        let mut state = self.lock();
        if state.in_progress {
            let (tx, rx) = oneshot::channel();
            state.pending.push(tx);
            RefreshTicket::Wait(rx)
        } else {
            state.in_progress = true;
            RefreshTicket::Lead(RefreshLease {
                gate: self,
                settled: false,
            })
        }
    }

    /// Clear the flag and release every queued caller with the same outcome
    fn settle(&self, outcome: &RefreshOutcome) {
        let pending = {
            let mut state = self.lock();
            state.in_progress = false;
            std::mem::take(&mut state.pending)
        };

        if !pending.is_empty() {
            tracing::debug!(
                queued = pending.len(),
                success = outcome.is_ok(),
                "Releasing requests queued behind token refresh"
            );
        }

        for waiter in pending {
            // A caller that went away no longer needs the outcome
            let _ = waiter.send(outcome.clone());
        }
    }
}

/// Ownership of the refresh flow; settles the gate even if the leader is dropped
struct RefreshLease<'a> {
    gate: &'a RefreshGate,
    settled: bool,
}

impl RefreshLease<'_> {
    fn settle(mut self, outcome: &RefreshOutcome) {
        self.settled = true;
        self.gate.settle(outcome);
    }
}

impl Drop for RefreshLease<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!("Token refresh abandoned before completion");
            self.gate.settle(&Err(ApiError::reauth_failed()));
        }
    }
}

/// Failed dispatch; `unauthorized` is set only for a 401 answered by the server
struct Rejection {
    error: ApiError,
    unauthorized: bool,
}

impl From<ApiError> for Rejection {
    fn from(error: ApiError) -> Self {
        Self {
            error,
            unauthorized: false,
        }
    }
}

/// HTTP client for the Savvy API
/// Attaches the bearer token to every request and recovers from a rejected
/// token by prompting for login once, shared by all callers that failed meanwhile
pub struct AuthenticatedClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Every request path is appended to this URL
    base_url: Url,

    /// Login page opened by the reauthentication prompt
    login_url: Url,

    /// Where tokens come from
    acquisition: Arc<TokenAcquisition>,

    /// Out-of-band login trigger
    login: Arc<dyn LoginPrompt>,

    /// Refresh-in-progress flag and queued callers
    refresh: RefreshGate,
}

impl AuthenticatedClient {
    /// Create a new client bound to `base_url`; no network call is made
    pub fn new(
        base_url: Url,
        login_path: &str,
        acquisition: Arc<TokenAcquisition>,
        login: Arc<dyn LoginPrompt>,
        connect_timeout: u64,
        request_timeout: u64,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        let login_url = join_path(&base_url, login_path)
            .with_context(|| format!("Invalid login path: {}", login_path))?;

        Ok(Self {
            client,
            base_url,
            login_url,
            acquisition,
            login,
            refresh: RefreshGate::default(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn login_url(&self) -> &Url {
        &self.login_url
    }

    pub fn acquisition(&self) -> &Arc<TokenAcquisition> {
        &self.acquisition
    }

    pub fn login_prompt(&self) -> &Arc<dyn LoginPrompt> {
        &self.login
    }

    /// Whether a reauthentication flow is running right now
    pub fn is_refreshing(&self) -> bool {
        self.refresh.lock().in_progress
    }

    /// Number of callers parked behind the running refresh
    pub fn queued_requests(&self) -> usize {
        self.refresh.lock().pending.len()
    }

    /// Start a request against `path` relative to the base URL
    pub fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = join_path(&self.base_url, path).map_err(ApiError::invalid_request)?;
        Ok(self.client.request(method, url))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(self.request(Method::GET, path)?).await
    }

    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send(self.request(Method::POST, path)?.json(body)).await
    }

    pub async fn put<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send(self.request(Method::PUT, path)?.json(body)).await
    }

    pub async fn patch<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send(self.request(Method::PATCH, path)?.json(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(self.request(Method::DELETE, path)?).await
    }

    /// Build, execute and decode the body into `T`
    pub async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let request = builder.build().map_err(ApiError::invalid_request)?;
        let body = self.execute(request).await?;
        serde_json::from_value(body).map_err(ApiError::invalid_response)
    }

    /// Execute a request and return its unwrapped body
    ///
    /// A 401 triggers at most one reauthentication for this request. If the
    /// replayed request is rejected again the caller gets the normalized error.
    pub async fn execute(&self, request: Request) -> Result<Value> {
        let mut request = self.attach_token(request).await;

        match self.dispatch(&request).await {
            Ok(body) => Ok(body),
            Err(rejection) if rejection.unauthorized => {
                tracing::warn!(
                    method = %request.method(),
                    url = %request.url(),
                    "Received 401, refreshing token"
                );

                let token = self.recover().await?;
                request.headers_mut().insert(AUTHORIZATION, bearer(&token)?);

                tracing::debug!(url = %request.url(), "Replaying request with refreshed token");
                self.dispatch(&request).await.map_err(|rejection| rejection.error)
            }
            Err(rejection) => Err(rejection.error),
        }
    }

    /// Request interceptor: add a bearer token unless one is already set
    async fn attach_token(&self, mut request: Request) -> Request {
        if request.headers().contains_key(AUTHORIZATION) {
            return request;
        }

        match self.acquisition.acquire().await {
            Some(token) => match bearer(&token) {
                Ok(value) => {
                    request.headers_mut().insert(AUTHORIZATION, value);
                }
                Err(e) => tracing::warn!(error = %e, "Ignoring unusable token"),
            },
            None => tracing::debug!(url = %request.url(), "No token available, sending unauthenticated"),
        }

        request
    }

    /// Send once and normalize the outcome; no recovery
    async fn dispatch(&self, request: &Request) -> std::result::Result<Value, Rejection> {
        let attempt = request
            .try_clone()
            .ok_or_else(|| ApiError::invalid_request("Request body is not cloneable"))?;

        let method = request.method().clone();
        let url = request.url().clone();
        tracing::debug!(method = %method, url = %url, "Sending HTTP request");

        let response = match self.client.execute(attempt).await {
            Ok(response) => response,
            Err(e) => {
                let error_kind = if e.is_timeout() {
                    "timeout"
                } else if e.is_connect() {
                    "connection_failed"
                } else if e.is_request() {
                    "request_error"
                } else {
                    "unknown"
                };

                tracing::error!(
                    error_kind = error_kind,
                    error = %e,
                    url = %url,
                    "HTTP request failed"
                );
                return Err(ApiError::transport(&e).into());
            }
        };

        let status = response.status();
        if status.is_success() {
            tracing::debug!(status = %status, "Request successful");
            return unwrap_body(response).await.map_err(Rejection::from);
        }

        let err = ApiError::from_response(response).await;
        tracing::warn!(
            status = err.status,
            code = %err.code,
            url = %url,
            "Received error response"
        );
        Err(Rejection {
            unauthorized: status == StatusCode::UNAUTHORIZED,
            error: err,
        })
    }

    /// Obtain a fresh token, either by leading the refresh or waiting for it
    async fn recover(&self) -> Result<String> {
        match self.refresh.enter() {
            RefreshTicket::Wait(rx) => {
                tracing::debug!("Token refresh already running, queueing request");
                rx.await.unwrap_or_else(|_| Err(ApiError::reauth_failed()))
            }
            RefreshTicket::Lead(lease) => {
                let outcome = self.reauthenticate().await;
                lease.settle(&outcome);
                outcome
            }
        }
    }

    /// Reauthentication flow: forget the rejected token, prompt, acquire again
    async fn reauthenticate(&self) -> Result<String> {
        self.acquisition.invalidate().await;

        tracing::info!(url = %self.login_url, "Prompting for login");
        if let Err(e) = self.login.prompt_login(&self.login_url).await {
            tracing::error!(error = %e, "Login prompt failed");
            return Err(ApiError::reauth_failed());
        }

        match self.acquisition.reacquire().await {
            Some(token) => {
                tracing::info!("Token refreshed after login");
                Ok(token)
            }
            None => {
                tracing::error!("No token after login");
                Err(ApiError::reauth_failed())
            }
        }
    }
}

/// Append `path` to `base`, keeping any path prefix the base URL has
pub fn join_path(base: &Url, path: &str) -> anyhow::Result<Url> {
    let joined = format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Url::parse(&joined).with_context(|| format!("Invalid URL: {}", joined))
}

fn bearer(token: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(&format!("Bearer {}", token)).map_err(ApiError::invalid_request)
}

/// Response interceptor success path: hand back the body, not the envelope
async fn unwrap_body(response: reqwest::Response) -> Result<Value> {
    let text = response.text().await.map_err(|e| ApiError::transport(&e))?;

    if text.trim().is_empty() {
        return Ok(Value::Null);
    }

    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_path_keeps_prefix() {
        let base = Url::parse("https://app.getsavvy.so/app/").unwrap();
        assert_eq!(
            join_path(&base, "/api/v1/whoami").unwrap().as_str(),
            "https://app.getsavvy.so/app/api/v1/whoami"
        );

        let base = Url::parse("http://localhost:5173").unwrap();
        assert_eq!(
            join_path(&base, "login").unwrap().as_str(),
            "http://localhost:5173/login"
        );
    }

    #[test]
    fn test_bearer_header() {
        assert_eq!(bearer("abc123").unwrap(), "Bearer abc123");
        assert!(bearer("bad\ntoken").is_err());
    }

    #[tokio::test]
    async fn test_gate_queues_while_refreshing() {
        let gate = RefreshGate::default();

        let lease = match gate.enter() {
            RefreshTicket::Lead(lease) => lease,
            RefreshTicket::Wait(_) => panic!("first caller must lead"),
        };
        assert!(gate.lock().in_progress);

        let waiter = match gate.enter() {
            RefreshTicket::Wait(rx) => rx,
            RefreshTicket::Lead(_) => panic!("second caller must wait"),
        };
        assert_eq!(gate.lock().pending.len(), 1);

        lease.settle(&Ok("xyz".to_string()));
        assert!(!gate.lock().in_progress);
        assert!(gate.lock().pending.is_empty());
        assert_eq!(waiter.await.unwrap(), Ok("xyz".to_string()));
    }

    #[tokio::test]
    async fn test_dropped_lease_fails_waiters() {
        let gate = RefreshGate::default();

        let lease = match gate.enter() {
            RefreshTicket::Lead(lease) => lease,
            RefreshTicket::Wait(_) => panic!("first caller must lead"),
        };
        let waiter = match gate.enter() {
            RefreshTicket::Wait(rx) => rx,
            RefreshTicket::Lead(_) => panic!("second caller must wait"),
        };

        drop(lease);

        assert!(!gate.lock().in_progress);
        assert_eq!(waiter.await.unwrap(), Err(ApiError::reauth_failed()));
    }
}
