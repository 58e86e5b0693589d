//! Network half of the sync transport.
//!
//! [`SyncTransport`] moves whole deltas to and from the server; [`with_retry`]
//! wraps a single operation in the fixed attempt budget. Implementations:
//! - [`HttpTransport`]: reqwest against the daemon's HTTP API
//! - test doubles in this crate's tests

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tasksync_core::protocol::{decode_delta, encode_delta, CONTENT_TYPE};
use tasksync_core::{CodecError, SyncDelta, UserId};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Server returned status {0}")]
    Status(u16),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            TransportError::ConnectionFailed(e.to_string())
        } else if let Some(status) = e.status() {
            TransportError::Status(status.as_u16())
        } else {
            TransportError::Request(e.to_string())
        }
    }
}

/// Request/response channel to the sync server.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Fetch the full snapshot of the user's partition.
    async fn fetch(&self, user: &UserId) -> Result<SyncDelta>;

    /// Push a delta for the server to merge.
    async fn push(&self, user: &UserId, delta: &SyncDelta) -> Result<()>;
}

/// Fixed-delay retry budget for one transport operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Wait between consecutive attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// Run `op` up to `policy.max_attempts` times, sleeping `policy.delay`
/// between attempts. Returns the first success or the last error.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", label, attempt);
                }
                return Ok(value);
            }
            Err(e) if attempt < attempts => {
                warn!("{} failed (attempt {}/{}): {}", label, attempt, attempts, e);
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(e) => {
                warn!("{} failed (attempt {}/{}): {}", label, attempt, attempts, e);
                return Err(e);
            }
        }
    }
}

/// Transport speaking the daemon's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: reqwest::Url,
}

impl HttpTransport {
    pub fn new(
        server_url: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self> {
        let base_url = reqwest::Url::parse(server_url).map_err(|e| {
            TransportError::Client(format!("Invalid server URL {:?}: {}", server_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(TransportError::Client(format!(
                "Server URL {:?} cannot carry a path",
                server_url
            )));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;

        Ok(Self { client, base_url })
    }

    /// `{base}/api/tasks/{route}/{user}`, with the user id percent-encoded as
    /// a single path segment.
    fn endpoint(&self, route: &str, user: &UserId) -> Result<reqwest::Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::Client(format!("{} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(["api", "tasks", route, user.as_str()]);
        Ok(url)
    }

    fn fetch_url(&self, user: &UserId) -> Result<reqwest::Url> {
        self.endpoint("user", user)
    }

    fn push_url(&self, user: &UserId) -> Result<reqwest::Url> {
        self.endpoint("sync", user)
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn fetch(&self, user: &UserId) -> Result<SyncDelta> {
        let response = self.client.get(self.fetch_url(user)?).send().await?;
        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()));
        }

        let body = response.bytes().await?;
        debug!("Fetched snapshot for {} ({} bytes)", user, body.len());
        Ok(decode_delta(&body)?)
    }

    async fn push(&self, user: &UserId, delta: &SyncDelta) -> Result<()> {
        let body = encode_delta(delta)?;
        let size = body.len();

        let response = self
            .client
            .post(self.push_url(user)?)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .body(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()));
        }

        debug!("Pushed delta for {} ({} bytes)", user, size);
        Ok(())
    }
}
