/// Store abstraction layer
///
/// The monitoring core only talks to persistence through the [`Store`]
/// trait. Two backends are provided: LibSQL (SQLite) for the service and an
/// in-process store used by tests and ephemeral runs.
pub mod memory;
pub mod migrations;
pub mod models;
pub mod pool;
pub mod repository;

pub use memory::MemoryStore;
pub use repository::LibsqlStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::monitoring::types::MonitorStatus;
use models::{Monitor, MonitorOutage, NewEvent, SystemEvent};

/// Read/write contract the scheduler and workers depend on
#[async_trait]
pub trait Store: Send + Sync {
    /// Get all monitors with the active flag set
    async fn active_monitors(&self) -> Result<Vec<Monitor>>;

    async fn get_monitor(&self, id: &str) -> Result<Option<Monitor>>;

    /// Insert or replace a monitor by id
    async fn save_monitor(&self, monitor: &Monitor) -> Result<()>;

    /// Returns false when the monitor does not exist
    async fn set_monitor_active(&self, id: &str, active: bool) -> Result<bool>;

    /// Delete a monitor together with its events and outages
    async fn delete_monitor(&self, id: &str) -> Result<bool>;

    /// Append a raw event. Fails if the monitor does not exist.
    async fn append_event(&self, event: NewEvent) -> Result<SystemEvent>;

    /// Open an outage unless one is already open for the monitor.
    ///
    /// Returns whether a new row was created.
    async fn open_outage(
        &self,
        monitor_id: &str,
        kind: MonitorStatus,
        message: &str,
        started_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Raise the open outage from degraded to down.
    ///
    /// Returns false when nothing was open or it was already down.
    async fn escalate_outage(&self, monitor_id: &str, message: &str) -> Result<bool>;

    /// Close the open outage and return it, or `None` when nothing was open
    async fn resolve_outage(&self, monitor_id: &str, resolved_at: DateTime<Utc>) -> Result<Option<MonitorOutage>>;

    /// Outages without a resolution time, newest first
    async fn active_outages(&self) -> Result<Vec<MonitorOutage>>;

    /// Every outage row of a monitor, oldest first
    async fn monitor_outages(&self, monitor_id: &str) -> Result<Vec<MonitorOutage>>;

    /// Events of one monitor with an id greater than `since_id`, ascending
    async fn monitor_events(&self, monitor_id: &str, since_id: i64) -> Result<Vec<SystemEvent>>;

    /// Most recent event of a monitor
    async fn last_event(&self, monitor_id: &str) -> Result<Option<SystemEvent>>;

    /// Events of all monitors with an id greater than `since_id`, ascending
    async fn system_events(&self, since_id: i64) -> Result<Vec<SystemEvent>>;

    async fn get_setting(&self, key: &str) -> Result<Option<String>>;

    async fn set_setting(&self, key: &str, value: &str) -> Result<()>;

    /// Wipe monitors, events, outages and settings
    async fn reset(&self) -> Result<()>;
}

/// Open the LibSQL database at `path` and bring its schema up to date
pub async fn initialize_store(path: &str) -> Result<LibsqlStore> {
    let pool = pool::open_pool(path).await?;
    let conn = pool.get().await?;
    migrations::run_migrations(&conn).await?;
    drop(conn);
    Ok(LibsqlStore::new_from_pool(pool))
}
