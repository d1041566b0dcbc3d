use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::params::Params;
use libsql::{Connection, Row, Value, params};

use super::Store;
use super::models::{
    Monitor, MonitorOutage, NewEvent, SystemEvent, i64_to_timestamp, timestamp_to_i64,
};
use super::pool::{LibsqlManager, LibsqlPool};
use crate::monitoring::types::MonitorStatus;

const MONITOR_COLUMNS: &str = "id, group_id, name, url, active, interval_seconds";
const EVENT_COLUMNS: &str = "id, monitor_id, monitor_name, type, message, timestamp";
const OUTAGE_COLUMNS: &str = "id, monitor_id, type, message, started_at, resolved_at";

/// LibSQL store implementation
pub struct LibsqlStore {
    pool: LibsqlPool,
}

impl LibsqlStore {
    /// Create a new store from a pool. The schema must already be migrated.
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>> {
        Ok(self.pool.get().await?)
    }

    async fn query_outages(&self, filter: &str, args: Vec<Value>) -> Result<Vec<MonitorOutage>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(&format!("SELECT {OUTAGE_COLUMNS} FROM monitor_outages {filter}"), Params::Positional(args))
            .await?;

        let mut outages = Vec::new();
        while let Some(row) = rows.next().await? {
            outages.push(outage_from_row(&row)?);
        }
        Ok(outages)
    }

    async fn query_events(&self, filter: &str, args: Vec<Value>) -> Result<Vec<SystemEvent>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(&format!("SELECT {EVENT_COLUMNS} FROM system_events {filter}"), Params::Positional(args))
            .await?;

        let mut events = Vec::new();
        while let Some(row) = rows.next().await? {
            events.push(event_from_row(&row)?);
        }
        Ok(events)
    }
}

fn monitor_from_row(row: &Row) -> Result<Monitor> {
    Ok(Monitor {
        id: row.get(0)?,
        group_id: row.get(1)?,
        name: row.get(2)?,
        url: row.get(3)?,
        active: row.get::<i64>(4)? != 0,
        interval_seconds: row.get::<i64>(5)?.max(0) as u64,
    })
}

fn event_from_row(row: &Row) -> Result<SystemEvent> {
    let kind: String = row.get(3)?;
    Ok(SystemEvent {
        id: row.get(0)?,
        monitor_id: row.get(1)?,
        monitor_name: row.get(2)?,
        kind: kind.parse()?,
        message: row.get(4)?,
        timestamp: i64_to_timestamp(row.get(5)?)?,
    })
}

fn outage_from_row(row: &Row) -> Result<MonitorOutage> {
    let kind: String = row.get(2)?;
    Ok(MonitorOutage {
        id: row.get(0)?,
        monitor_id: row.get(1)?,
        kind: kind.parse()?,
        message: row.get(3)?,
        started_at: i64_to_timestamp(row.get(4)?)?,
        resolved_at: row.get::<Option<i64>>(5)?.map(i64_to_timestamp).transpose()?,
    })
}

/// Children before parents so foreign keys hold at every step
async fn delete_all(conn: &Connection) -> Result<()> {
    for table in ["system_events", "monitor_outages", "monitors", "settings"] {
        conn.execute(&format!("DELETE FROM {table}"), ()).await?;
    }
    Ok(())
}

#[async_trait]
impl Store for LibsqlStore {
    async fn active_monitors(&self) -> Result<Vec<Monitor>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(&format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE active = 1 ORDER BY id"), ())
            .await?;

        let mut monitors = Vec::new();
        while let Some(row) = rows.next().await? {
            monitors.push(monitor_from_row(&row)?);
        }
        Ok(monitors)
    }

    async fn get_monitor(&self, id: &str) -> Result<Option<Monitor>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(&format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE id = ?"), params![id])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(monitor_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn save_monitor(&self, monitor: &Monitor) -> Result<()> {
        let conn = self.get_conn().await?;
        // Upsert rather than REPLACE, which would cascade-delete the history
        conn.execute(
            "INSERT INTO monitors (id, group_id, name, url, active, interval_seconds) VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                group_id = excluded.group_id,
                name = excluded.name,
                url = excluded.url,
                active = excluded.active,
                interval_seconds = excluded.interval_seconds",
            params![
                monitor.id.clone(),
                monitor.group_id.clone(),
                monitor.name.clone(),
                monitor.url.clone(),
                if monitor.active { 1 } else { 0 },
                monitor.interval_seconds as i64
            ],
        )
        .await?;
        Ok(())
    }

    async fn set_monitor_active(&self, id: &str, active: bool) -> Result<bool> {
        let conn = self.get_conn().await?;
        let changed = conn
            .execute(
                "UPDATE monitors SET active = ? WHERE id = ?",
                params![if active { 1 } else { 0 }, id],
            )
            .await?;
        Ok(changed > 0)
    }

    async fn delete_monitor(&self, id: &str) -> Result<bool> {
        let conn = self.get_conn().await?;
        // Events and outages go with it via ON DELETE CASCADE
        let changed = conn.execute("DELETE FROM monitors WHERE id = ?", params![id]).await?;
        Ok(changed > 0)
    }

    async fn append_event(&self, event: NewEvent) -> Result<SystemEvent> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO system_events (monitor_id, monitor_name, type, message, timestamp) VALUES (?, ?, ?, ?, ?)",
            params![
                event.monitor_id.clone(),
                event.monitor_name.clone(),
                event.kind.as_str(),
                event.message.clone(),
                timestamp_to_i64(event.timestamp)
            ],
        )
        .await?;

        Ok(SystemEvent {
            id: conn.last_insert_rowid(),
            monitor_id: event.monitor_id,
            monitor_name: event.monitor_name,
            kind: event.kind,
            message: event.message,
            timestamp: event.timestamp,
        })
    }

    async fn open_outage(
        &self,
        monitor_id: &str,
        kind: MonitorStatus,
        message: &str,
        started_at: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.get_conn().await?;
        // The partial unique index turns a second open outage into a no-op
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO monitor_outages (monitor_id, type, message, started_at) VALUES (?, ?, ?, ?)",
                params![monitor_id, kind.as_str(), message, timestamp_to_i64(started_at)],
            )
            .await?;
        Ok(inserted > 0)
    }

    async fn escalate_outage(&self, monitor_id: &str, message: &str) -> Result<bool> {
        let conn = self.get_conn().await?;
        let changed = conn
            .execute(
                "UPDATE monitor_outages SET type = 'down', message = ?
                 WHERE monitor_id = ? AND resolved_at IS NULL AND type = 'degraded'",
                params![message, monitor_id],
            )
            .await?;
        Ok(changed > 0)
    }

    async fn resolve_outage(&self, monitor_id: &str, resolved_at: DateTime<Utc>) -> Result<Option<MonitorOutage>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!(
                    "UPDATE monitor_outages SET resolved_at = ? WHERE monitor_id = ? AND resolved_at IS NULL
                     RETURNING {OUTAGE_COLUMNS}"
                ),
                params![timestamp_to_i64(resolved_at), monitor_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(outage_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn active_outages(&self) -> Result<Vec<MonitorOutage>> {
        self.query_outages("WHERE resolved_at IS NULL ORDER BY started_at DESC", Vec::new()).await
    }

    async fn monitor_outages(&self, monitor_id: &str) -> Result<Vec<MonitorOutage>> {
        self.query_outages("WHERE monitor_id = ? ORDER BY id ASC", vec![Value::Text(monitor_id.to_string())]).await
    }

    async fn monitor_events(&self, monitor_id: &str, since_id: i64) -> Result<Vec<SystemEvent>> {
        self.query_events(
            "WHERE monitor_id = ? AND id > ? ORDER BY id ASC",
            vec![Value::Text(monitor_id.to_string()), Value::Integer(since_id)],
        )
        .await
    }

    async fn last_event(&self, monitor_id: &str) -> Result<Option<SystemEvent>> {
        let mut events = self
            .query_events("WHERE monitor_id = ? ORDER BY id DESC LIMIT 1", vec![Value::Text(monitor_id.to_string())])
            .await?;
        Ok(events.pop())
    }

    async fn system_events(&self, since_id: i64) -> Result<Vec<SystemEvent>> {
        self.query_events("WHERE id > ? ORDER BY id ASC", vec![Value::Integer(since_id)]).await
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.get_conn().await?;
        let mut rows = conn.query("SELECT value FROM settings WHERE key = ?", params![key]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().timestamp()],
        )
        .await?;
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        let conn = self.get_conn().await?;
        let tx = conn.transaction().await?;

        // The pooled connection must not be handed back mid-transaction
        if let Err(e) = delete_all(&tx).await {
            tx.rollback().await?;
            return Err(e);
        }
        tx.commit().await?;

        tracing::info!("Store reset: all monitors, events, outages and settings removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::initialize_store;
    use tempfile::{TempDir, tempdir};

    /// Helper to create a migrated on-disk store; keep the dir alive
    async fn create_test_store() -> Result<(LibsqlStore, TempDir)> {
        let temp_dir = tempdir()?;
        let db_path = temp_dir.path().join("test.db");
        let store = initialize_store(&db_path.to_string_lossy()).await?;
        Ok((store, temp_dir))
    }

    fn event(monitor_id: &str, kind: MonitorStatus, at: DateTime<Utc>) -> NewEvent {
        NewEvent {
            monitor_id: monitor_id.to_string(),
            monitor_name: "Test Monitor".to_string(),
            kind,
            message: format!("went {kind}"),
            timestamp: at,
        }
    }

    #[tokio::test]
    async fn test_monitor_upsert_and_active_filter() -> Result<()> {
        let (store, _dir) = create_test_store().await?;

        let monitor = Monitor::new("m-test-1", "g-default", "Test Monitor", "http://example.com");
        store.save_monitor(&monitor).await?;
        store.save_monitor(&Monitor::new("m-test-2", "g-default", "Other", "http://example.org")).await?;
        assert!(store.set_monitor_active("m-test-2", false).await?);
        assert!(!store.set_monitor_active("m-missing", false).await?);

        let updated = monitor.clone().with_interval(120);
        store.save_monitor(&updated).await?;

        let active = store.active_monitors().await?;
        assert_eq!(active, vec![updated]);
        assert!(store.get_monitor("m-test-2").await?.is_some_and(|m| !m.active));
        Ok(())
    }

    #[tokio::test]
    async fn test_outage_rows_enforce_single_open() -> Result<()> {
        let (store, _dir) = create_test_store().await?;
        store.save_monitor(&Monitor::new("m1", "g-default", "One", "http://example.com")).await?;

        let t1 = Utc::now();
        assert!(store.open_outage("m1", MonitorStatus::Degraded, "slow", t1).await?);
        assert!(!store.open_outage("m1", MonitorStatus::Down, "dead", t1).await?);
        assert!(store.escalate_outage("m1", "dead").await?);

        let active = store.active_outages().await?;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].kind, MonitorStatus::Down);
        assert_eq!(active[0].message, "dead");
        assert_eq!(active[0].started_at.timestamp_millis(), t1.timestamp_millis());

        let resolved = store.resolve_outage("m1", Utc::now()).await?.expect("open outage");
        assert_eq!(resolved.kind, MonitorStatus::Down);
        assert!(resolved.resolved_at.is_some());
        assert!(store.resolve_outage("m1", Utc::now()).await?.is_none());
        assert!(store.active_outages().await?.is_empty());

        // a fresh outage may open once the previous one is resolved
        assert!(store.open_outage("m1", MonitorStatus::Down, "again", Utc::now()).await?);
        assert_eq!(store.monitor_outages("m1").await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_events_ascending_and_since() -> Result<()> {
        let (store, _dir) = create_test_store().await?;
        store.save_monitor(&Monitor::new("m1", "g-default", "One", "http://example.com")).await?;
        store.save_monitor(&Monitor::new("m2", "g-default", "Two", "http://example.org")).await?;

        let now = Utc::now();
        let first = store.append_event(event("m1", MonitorStatus::Down, now)).await?;
        store.append_event(event("m2", MonitorStatus::Degraded, now)).await?;
        let third = store.append_event(event("m1", MonitorStatus::Up, now)).await?;

        assert_eq!(store.last_event("m1").await?.map(|e| e.id), Some(third.id));
        assert_eq!(store.last_event("ghost").await?, None);

        let m1 = store.monitor_events("m1", 0).await?;
        assert_eq!(m1.iter().map(|e| e.id).collect::<Vec<_>>(), vec![first.id, third.id]);
        assert_eq!(m1[1].kind, MonitorStatus::Up);

        let since = store.system_events(first.id).await?;
        assert_eq!(since.len(), 2);
        assert!(since.windows(2).all(|w| w[0].id < w[1].id));

        // events for unknown monitors violate the foreign key
        assert!(store.append_event(event("ghost", MonitorStatus::Down, now)).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_settings_and_reset() -> Result<()> {
        let (store, _dir) = create_test_store().await?;
        assert_eq!(store.get_setting("latency_threshold").await?, None);

        store.set_setting("latency_threshold", "500").await?;
        store.set_setting("latency_threshold", "750").await?;
        assert_eq!(store.get_setting("latency_threshold").await?.as_deref(), Some("750"));

        store.save_monitor(&Monitor::new("m1", "g-default", "One", "http://example.com")).await?;
        store.append_event(event("m1", MonitorStatus::Down, Utc::now())).await?;
        store.reset().await?;

        assert!(store.active_monitors().await?.is_empty());
        assert!(store.system_events(0).await?.is_empty());
        assert_eq!(store.get_setting("latency_threshold").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_reset_rolls_back() -> Result<()> {
        let (store, _dir) = create_test_store().await?;
        store.save_monitor(&Monitor::new("m1", "g-default", "One", "http://example.com")).await?;
        store.append_event(event("m1", MonitorStatus::Down, Utc::now())).await?;

        // the last DELETE of the reset fails
        store.get_conn().await?.execute("DROP TABLE settings", ()).await?;
        assert!(store.reset().await.is_err());

        assert_eq!(store.active_monitors().await?.len(), 1);
        assert_eq!(store.system_events(0).await?.len(), 1);

        // connections handed back to the pool are not stuck in a transaction
        store.save_monitor(&Monitor::new("m2", "g-default", "Two", "http://example.org")).await?;
        assert_eq!(store.active_monitors().await?.len(), 2);
        Ok(())
    }
}
