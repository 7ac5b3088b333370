//! Orchestrator capability and its Agones implementation.
//!
//! The Agones SDK server runs next to every game server and exposes an HTTP gateway
//! on `localhost:${AGONES_SDK_HTTP_PORT}`. Only the calls the sidecar needs are wired.

use std::time;

use async_trait::async_trait;
use reqwest::header;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, Instrument, Span};

use crate::error::SdkError;
use crate::retry::RetryPolicy;
use crate::shutdown::Shutdown;

/// Lifecycle calls consumed from the orchestrator.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Mark the game server as ready to accept players. Called once.
    async fn ready(&self) -> Result<(), SdkError>;
    /// Heartbeat telling the orchestrator the game server is still alive.
    async fn health(&self) -> Result<(), SdkError>;
}

#[derive(Debug, Clone)]
pub struct SdkConfig {
    pub host: String,
    pub http_port: u16,
    /// How long to keep retrying the SDK server before giving up.
    pub connect_timeout: time::Duration,
    pub request_timeout: time::Duration,
    pub retry_policy: RetryPolicy,
}

impl SdkConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.http_port)
    }
}

/// Client for the Agones SDK server's HTTP gateway.
pub struct AgonesSdk {
    client: reqwest::Client,
    base_url: String,
    span: Span,
}

impl AgonesSdk {
    /// Connect to the SDK server, retrying with backoff until it answers, the connect
    /// timeout elapses, or shutdown is requested.
    pub async fn connect(
        config: &SdkConfig,
        shutdown: &Shutdown,
        span: Span,
    ) -> Result<Self, SdkError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent("agnostic-agones-sidecar")
            .timeout(config.request_timeout)
            .build()
            .map_err(SdkError::Client)?;

        let sdk = Self {
            client,
            base_url: config.base_url(),
            span,
        };
        sdk.wait_for_server(config, shutdown)
            .instrument(sdk.span.clone())
            .await?;

        Ok(sdk)
    }

    async fn wait_for_server(&self, config: &SdkConfig, shutdown: &Shutdown) -> Result<(), SdkError> {
        let deadline = Instant::now() + config.connect_timeout;
        let mut attempt: u32 = 0;

        loop {
            let error = match self.get("gameserver").await {
                Ok(()) => {
                    info!(url = %self.base_url, "successfully connected to Agones SDK");
                    return Ok(());
                }
                Err(error) => error,
            };

            let wait = config.retry_policy.time_until_next_retry(attempt);
            if Instant::now() + wait > deadline {
                return Err(SdkError::ConnectTimeout {
                    url: self.base_url.clone(),
                    timeout: config.connect_timeout,
                    source: Box::new(error),
                });
            }

            debug!(error = %error, retry_in = ?wait, "Agones SDK not reachable yet");
            tokio::select! {
                biased;
                _ = shutdown.triggered() => return Err(SdkError::ConnectCancelled),
                _ = sleep(wait) => {}
            }
            attempt = attempt.saturating_add(1);
        }
    }

    async fn get(&self, call: &'static str) -> Result<(), SdkError> {
        let request = self.client.get(format!("{}/{}", self.base_url, call));
        self.send(call, request).await
    }

    async fn post(&self, call: &'static str) -> Result<(), SdkError> {
        let request = self
            .client
            .post(format!("{}/{}", self.base_url, call))
            .body("{}");
        self.send(call, request).await
    }

    async fn send(&self, call: &'static str, request: reqwest::RequestBuilder) -> Result<(), SdkError> {
        let response = request
            .send()
            .await
            .map_err(|source| SdkError::Request { call, source })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SdkError::Status { call, status })
        }
    }
}

#[async_trait]
impl Orchestrator for AgonesSdk {
    async fn ready(&self) -> Result<(), SdkError> {
        self.post("ready").instrument(self.span.clone()).await
    }

    async fn health(&self) -> Result<(), SdkError> {
        self.post("health").instrument(self.span.clone()).await
    }
}
