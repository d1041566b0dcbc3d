use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;

use super::checker::{Checker, HttpChecker};
use super::types::{CheckResult, MonitorStatus, classify};

/// Latency boundary between `up` and `degraded`, shared by every worker.
///
/// Cloning hands out another view of the same value; writes become visible to
/// each worker on its next check.
#[derive(Debug, Clone)]
pub struct LatencyThreshold(Arc<AtomicU64>);

impl LatencyThreshold {
    pub fn new(ms: u64) -> Self {
        Self(Arc::new(AtomicU64::new(ms)))
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, ms: u64) {
        self.0.store(ms, Ordering::Release);
    }
}

/// Monitoring executor - executes individual monitoring checks
pub struct MonitoringExecutor {
    checker: Arc<dyn Checker>,
    threshold: LatencyThreshold,
}

impl MonitoringExecutor {
    /// Create an executor probing over HTTP
    pub fn http(timeout_seconds: u64, threshold: LatencyThreshold) -> Result<Self> {
        Ok(Self::new(Arc::new(HttpChecker::new(timeout_seconds)?), threshold))
    }

    pub fn new(checker: Arc<dyn Checker>, threshold: LatencyThreshold) -> Self {
        Self { checker, threshold }
    }

    /// Execute a monitoring check
    pub async fn execute_check(&self, target: &str) -> CheckResult {
        let result = CheckResult::new(target.to_string());
        let outcome = self.checker.check(target).await;
        // Read after the probe so a threshold change made mid-flight applies
        let threshold_ms = self.threshold.get();

        match (classify(&outcome, threshold_ms), outcome) {
            (_, Err(e)) => result.failure(&e),
            (MonitorStatus::Degraded, Ok(success)) => {
                result.degraded(success.latency_ms, success.status_code, threshold_ms)
            }
            (_, Ok(success)) => result.success(success.latency_ms, success.status_code),
        }
    }
}
