use std::time::{Duration, Instant};

use anyhow::Result;

use super::types::ProbeSuccess;
use crate::error::ProbeError;

/// Checker trait for probing a monitor target
#[async_trait::async_trait]
pub trait Checker: Send + Sync {
    /// Perform the check, returning latency and status code on success.
    ///
    /// Implementations must bound their own runtime.
    async fn check(&self, target: &str) -> Result<ProbeSuccess, ProbeError>;
}

/// HTTP/HTTPS checker
pub struct HttpChecker {
    client: reqwest::Client,
    timeout_seconds: u64,
}

impl HttpChecker {
    pub fn new(timeout_seconds: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .user_agent(concat!("clusteruptime/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, timeout_seconds })
    }
}

#[async_trait::async_trait]
impl Checker for HttpChecker {
    async fn check(&self, target: &str) -> Result<ProbeSuccess, ProbeError> {
        let start = Instant::now();

        let response = self.client.get(target).send().await.map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout(self.timeout_seconds)
            } else if e.is_connect() {
                ProbeError::Connection(root_cause(&e))
            } else {
                ProbeError::Request(root_cause(&e))
            }
        })?;

        let latency_ms = start.elapsed().as_millis() as u64;
        let status = response.status();

        // 2xx and 3xx count as success
        if status.is_success() || status.is_redirection() {
            Ok(ProbeSuccess { latency_ms, status_code: Some(status.as_u16()) })
        } else {
            Err(ProbeError::Status(status.as_u16()))
        }
    }
}

/// reqwest wraps the interesting part ("Connection refused") several
/// sources deep
fn root_cause(error: &(dyn std::error::Error + 'static)) -> String {
    let mut current = error;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string()
}
