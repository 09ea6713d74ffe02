//! Rate-limited, retrying API client.

use crate::error::ApiError;
use crate::rate_limit::CredentialLimiter;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use serde_json::Value;
use slotwatch_core::Clock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Per-request timeout for the real transport.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// One outbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub url: String,
    /// Sent as the `Authorization` header.
    pub credential: String,
    pub body: Option<Value>,
}

/// Raw response: status plus body text.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

/// Network seam. The real implementation uses reqwest; tests script responses.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError>;
}

/// reqwest-backed transport.
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let builder = match request.method {
            HttpMethod::Get => self.http.get(&request.url),
            HttpMethod::Post => self.http.post(&request.url),
        };
        let mut builder = builder.header("Authorization", &request.credential);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(ApiResponse { status, body })
    }
}

/// Upstream client shared by every tick.
///
/// Every attempt (retries included) first takes a token from the
/// credential's bucket.
pub struct ApiClient {
    transport: Arc<dyn HttpTransport>,
    limiter: CredentialLimiter,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn HttpTransport>, clock: Arc<dyn Clock>) -> Self {
        Self {
            transport,
            limiter: CredentialLimiter::new(clock.clone()),
            clock,
            policy: RetryPolicy::default(),
        }
    }

    /// Replace the default retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch JSON with the default retry policy.
    pub async fn fetch(
        &self,
        endpoint: &str,
        credential: &str,
        method: HttpMethod,
        body: Option<Value>,
    ) -> Result<Value, ApiError> {
        let policy = self.policy.clone();
        self.fetch_with_policy(endpoint, credential, method, body, &policy)
            .await
    }

    /// Fetch JSON, retrying transient failures per `policy`.
    pub async fn fetch_with_policy(
        &self,
        endpoint: &str,
        credential: &str,
        method: HttpMethod,
        body: Option<Value>,
        policy: &RetryPolicy,
    ) -> Result<Value, ApiError> {
        let mut attempt = 1;
        loop {
            self.limiter.acquire(credential).await;

            let request = ApiRequest {
                method,
                url: endpoint.to_string(),
                credential: credential.to_string(),
                body: body.clone(),
            };

            let error = match self.transport.send(request).await {
                Ok(response) if (200..300).contains(&response.status) => {
                    return Ok(serde_json::from_str(&response.body_or_null())?);
                }
                Ok(response) => ApiError::from_status(response.status, response.body)
                    .unwrap_or_else(|| ApiError::ParseError("unexpected status".into())),
                Err(err) => err,
            };

            if !error.is_transient() {
                debug!(endpoint, error = %error, "Upstream request failed permanently");
                return Err(error);
            }
            if !policy.should_retry(attempt) {
                warn!(endpoint, attempts = attempt, error = %error, "Upstream retries exhausted");
                return Err(error.exhausted(attempt));
            }

            let delay = policy.calculate_delay_duration(attempt);
            warn!(
                endpoint,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient upstream failure, retrying"
            );
            self.clock.sleep(delay).await;
            attempt += 1;
        }
    }
}

impl ApiResponse {
    /// Empty bodies parse as JSON `null`.
    fn body_or_null(&self) -> String {
        if self.body.trim().is_empty() {
            "null".to_string()
        } else {
            self.body.clone()
        }
    }
}
