use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::monitoring::types::MonitorStatus;

/// Monitor model - a configured endpoint to probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Monitor {
    pub id: String,
    pub group_id: String,
    pub name: String,
    pub url: String,
    pub active: bool,
    pub interval_seconds: u64,
}

impl Monitor {
    /// Create a new active monitor polled every minute
    pub fn new(
        id: impl Into<String>,
        group_id: impl Into<String>,
        name: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            group_id: group_id.into(),
            name: name.into(),
            url: url.into(),
            active: true,
            interval_seconds: 60,
        }
    }

    pub fn with_interval(mut self, interval_seconds: u64) -> Self {
        self.interval_seconds = interval_seconds;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

/// Raw availability transition, append-only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemEvent {
    pub id: i64,
    pub monitor_id: String,
    pub monitor_name: String,
    #[serde(rename = "type")]
    pub kind: MonitorStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Event about to be appended; the store assigns the id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub monitor_id: String,
    pub monitor_name: String,
    pub kind: MonitorStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Persisted span of a monitor being degraded or down
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorOutage {
    pub id: i64,
    pub monitor_id: String,
    #[serde(rename = "type")]
    pub kind: MonitorStatus,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl MonitorOutage {
    pub fn is_active(&self) -> bool {
        self.resolved_at.is_none()
    }
}

/// Millisecond unix timestamps are what the LibSQL store persists
pub fn timestamp_to_i64(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

pub fn i64_to_timestamp(millis: i64) -> anyhow::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| anyhow::anyhow!("timestamp out of range: {millis}"))
}
