use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProbeError;

/// Health classification of a monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    Up,
    Degraded,
    Down,
    /// No probe has completed yet
    Unknown,
}

impl MonitorStatus {
    /// Ordering used for escalation: down is worse than degraded, which is
    /// worse than up. `Unknown` ranks with `Up`.
    pub fn severity(self) -> u8 {
        match self {
            MonitorStatus::Up | MonitorStatus::Unknown => 0,
            MonitorStatus::Degraded => 1,
            MonitorStatus::Down => 2,
        }
    }

    pub fn is_failing(self) -> bool {
        self.severity() > 0
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MonitorStatus::Up => "up",
            MonitorStatus::Down => "down",
            MonitorStatus::Degraded => "degraded",
            MonitorStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MonitorStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "up" => Ok(MonitorStatus::Up),
            "down" => Ok(MonitorStatus::Down),
            "degraded" => Ok(MonitorStatus::Degraded),
            "unknown" => Ok(MonitorStatus::Unknown),
            other => Err(anyhow::anyhow!("unknown monitor status: {other}")),
        }
    }
}

/// Successful probe measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSuccess {
    pub latency_ms: u64,
    pub status_code: Option<u16>,
}

/// Classify a probe outcome against the latency threshold.
///
/// Any probe error is `Down`. A success at or above the threshold is
/// `Degraded`, below it `Up`.
pub fn classify(outcome: &Result<ProbeSuccess, ProbeError>, threshold_ms: u64) -> MonitorStatus {
    match outcome {
        Err(_) => MonitorStatus::Down,
        Ok(success) if success.latency_ms >= threshold_ms => MonitorStatus::Degraded,
        Ok(_) => MonitorStatus::Up,
    }
}

/// Result of a monitoring check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    /// URL that was checked
    pub target: String,

    /// When the check completed
    pub timestamp: DateTime<Utc>,

    pub status: MonitorStatus,

    /// Response time in milliseconds
    pub latency_ms: Option<u64>,

    /// HTTP status code (if applicable)
    pub status_code: Option<u16>,

    /// Human readable description of the outcome
    pub message: String,
}

impl CheckResult {
    pub fn new(target: String) -> Self {
        Self {
            target,
            timestamp: Utc::now(),
            status: MonitorStatus::Unknown,
            latency_ms: None,
            status_code: None,
            message: String::new(),
        }
    }

    /// Mark the check as successful with latency
    pub fn success(mut self, latency_ms: u64, status_code: Option<u16>) -> Self {
        self.status = MonitorStatus::Up;
        self.latency_ms = Some(latency_ms);
        self.status_code = status_code;
        self.message = format!("Responding in {latency_ms}ms");
        self
    }

    /// Mark the check as failed with error
    pub fn failure(mut self, error: &ProbeError) -> Self {
        self.status = MonitorStatus::Down;
        if let ProbeError::Status(code) = error {
            self.status_code = Some(*code);
        }
        self.message = error.to_string();
        self
    }

    /// Mark the check as degraded (slow response)
    pub fn degraded(mut self, latency_ms: u64, status_code: Option<u16>, threshold_ms: u64) -> Self {
        self.status = MonitorStatus::Degraded;
        self.latency_ms = Some(latency_ms);
        self.status_code = status_code;
        self.message = format!("High latency: {latency_ms}ms (threshold {threshold_ms}ms)");
        self
    }
}

/// Point-in-time view of a live worker, handed out by the manager
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatus {
    pub monitor_id: String,
    pub name: String,
    pub url: String,
    #[serde(with = "interval_seconds")]
    pub interval: Duration,
    pub status: MonitorStatus,
    pub last_checked: Option<DateTime<Utc>>,
    pub latency_ms: Option<u64>,
    pub message: Option<String>,
    /// When the worker owning this status was spawned
    pub running_since: DateTime<Utc>,
}

mod interval_seconds {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }
}
