use std::future::Future;
use std::sync::Arc;

use reqwest::Method;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use serde::de::DeserializeOwned;

use apc_core::{Ack, AgentStatus, LogsResponse, PolicyLockRequest, SessionRequest};

use crate::config::ClientConfig;
use crate::error::TransportError;

/// Request/response surface of the agent's HTTP API.
///
/// The view synchronizer and session controller only talk to the agent
/// through this trait, so tests can drive them with in-process fakes.
pub trait AgentApi: Send + Sync + 'static {
    fn get_status(&self) -> impl Future<Output = Result<AgentStatus, TransportError>> + Send;

    fn get_logs(&self) -> impl Future<Output = Result<LogsResponse, TransportError>> + Send;

    fn start_session(
        &self,
        request: &SessionRequest,
    ) -> impl Future<Output = Result<Ack, TransportError>> + Send;

    fn stop_session(&self) -> impl Future<Output = Result<Ack, TransportError>> + Send;

    /// Not used by the live view; kept because the agent exposes it.
    fn set_policy_lock(
        &self,
        locked: bool,
    ) -> impl Future<Output = Result<Ack, TransportError>> + Send;

    fn health(&self) -> impl Future<Output = Result<Ack, TransportError>> + Send;
}

/// HTTP client for the agent. Cheap to clone; holds no per-request state.
#[derive(Clone)]
pub struct AgentClient {
    http: reqwest::Client,
    config: Arc<ClientConfig>,
}

impl AgentClient {
    pub fn new(config: ClientConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("apc-client/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_http(config, http))
    }

    /// Build around an existing `reqwest::Client` (shared connection pool).
    pub fn with_http(config: ClientConfig, http: reqwest::Client) -> Self {
        Self {
            http,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Send one request and decode the JSON response.
    ///
    /// `Content-Type: application/json` is always attached; the bearer token
    /// only when configured. Non-2xx responses fail with the body text (or the
    /// status phrase when the body is empty). Nothing is retried here.
    pub async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, TransportError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = self.config.endpoint(path);
        let mut req = self
            .http
            .request(method.clone(), &url)
            .timeout(self.config.request_timeout())
            .header(CONTENT_TYPE, "application/json");
        if let Some(token) = self.config.bearer_token() {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await.map_err(|e| {
            tracing::debug!(%method, path, error = %e, "Agent request failed");
            TransportError::Network(e.to_string())
        })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let text = text.trim_end();
            let message = if text.is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or(status.as_str())
                    .to_string()
            } else {
                text.to_string()
            };
            tracing::debug!(%method, path, status = status.as_u16(), "Agent returned error");
            return Err(TransportError::Status {
                status: status.as_u16(),
                message,
            });
        }

        resp.json::<T>().await.map_err(TransportError::from)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, TransportError> {
        self.request(Method::GET, path, None::<&()>).await
    }
}

impl AgentApi for AgentClient {
    async fn get_status(&self) -> Result<AgentStatus, TransportError> {
        self.get("/status").await
    }

    async fn get_logs(&self) -> Result<LogsResponse, TransportError> {
        self.get("/logs").await
    }

    async fn start_session(&self, request: &SessionRequest) -> Result<Ack, TransportError> {
        self.request(Method::POST, "/session/start", Some(request))
            .await
    }

    async fn stop_session(&self) -> Result<Ack, TransportError> {
        self.request(Method::POST, "/session/stop", None::<&()>)
            .await
    }

    async fn set_policy_lock(&self, locked: bool) -> Result<Ack, TransportError> {
        self.request(
            Method::POST,
            "/policy/lock",
            Some(&PolicyLockRequest { locked }),
        )
        .await
    }

    async fn health(&self) -> Result<Ack, TransportError> {
        self.get("/health").await
    }
}
