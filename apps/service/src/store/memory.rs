//! In-process store.
//!
//! Keeps everything behind one lock so each operation is atomic, the same
//! guarantee a single SQL statement gives the LibSQL backend. Used by tests
//! and by `--ephemeral` runs of the service.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::Store;
use super::models::{Monitor, MonitorOutage, NewEvent, SystemEvent};
use crate::monitoring::types::MonitorStatus;

#[derive(Debug, Default)]
struct State {
    monitors: BTreeMap<String, Monitor>,
    events: Vec<SystemEvent>,
    outages: Vec<MonitorOutage>,
    settings: HashMap<String, String>,
    next_event_id: i64,
    next_outage_id: i64,
}

/// Worker-facing write operations, for targeted failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteKind {
    Event,
    Outage,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    fail_writes: AtomicBool,
    fail_events: AtomicBool,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent event/outage write fail until switched back
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make only `append_event` fail, leaving outage writes working
    pub fn set_fail_events(&self, fail: bool) {
        self.fail_events.store(fail, Ordering::SeqCst);
    }

    /// Number of successful event/outage writes so far
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock().map_err(|_| anyhow!("poisoned lock: memory store"))?;
        f(&mut state)
    }

    /// Worker-facing writes go through here so failures can be injected
    fn write<T>(&self, kind: WriteKind, f: impl FnOnce(&mut State) -> Result<T>) -> Result<T> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("memory store: writes disabled");
        }
        if kind == WriteKind::Event && self.fail_events.load(Ordering::SeqCst) {
            bail!("memory store: event writes disabled");
        }
        let value = self.with_state(f)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(value)
    }
}

impl State {
    fn open_outage_mut(&mut self, monitor_id: &str) -> Option<&mut MonitorOutage> {
        self.outages.iter_mut().find(|o| o.monitor_id == monitor_id && o.is_active())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn active_monitors(&self) -> Result<Vec<Monitor>> {
        self.with_state(|state| Ok(state.monitors.values().filter(|m| m.active).cloned().collect()))
    }

    async fn get_monitor(&self, id: &str) -> Result<Option<Monitor>> {
        self.with_state(|state| Ok(state.monitors.get(id).cloned()))
    }

    async fn save_monitor(&self, monitor: &Monitor) -> Result<()> {
        self.with_state(|state| {
            state.monitors.insert(monitor.id.clone(), monitor.clone());
            Ok(())
        })
    }

    async fn set_monitor_active(&self, id: &str, active: bool) -> Result<bool> {
        self.with_state(|state| {
            Ok(state.monitors.get_mut(id).map(|m| m.active = active).is_some())
        })
    }

    async fn delete_monitor(&self, id: &str) -> Result<bool> {
        self.with_state(|state| {
            let existed = state.monitors.remove(id).is_some();
            state.events.retain(|e| e.monitor_id != id);
            state.outages.retain(|o| o.monitor_id != id);
            Ok(existed)
        })
    }

    async fn append_event(&self, event: NewEvent) -> Result<SystemEvent> {
        self.write(WriteKind::Event, |state| {
            if !state.monitors.contains_key(&event.monitor_id) {
                bail!("monitor {} does not exist", event.monitor_id);
            }
            state.next_event_id += 1;
            let stored = SystemEvent {
                id: state.next_event_id,
                monitor_id: event.monitor_id,
                monitor_name: event.monitor_name,
                kind: event.kind,
                message: event.message,
                timestamp: event.timestamp,
            };
            state.events.push(stored.clone());
            Ok(stored)
        })
    }

    async fn open_outage(
        &self,
        monitor_id: &str,
        kind: MonitorStatus,
        message: &str,
        started_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.write(WriteKind::Outage, |state| {
            if !state.monitors.contains_key(monitor_id) {
                bail!("monitor {monitor_id} does not exist");
            }
            if state.open_outage_mut(monitor_id).is_some() {
                return Ok(false);
            }
            state.next_outage_id += 1;
            let outage = MonitorOutage {
                id: state.next_outage_id,
                monitor_id: monitor_id.to_string(),
                kind,
                message: message.to_string(),
                started_at,
                resolved_at: None,
            };
            state.outages.push(outage);
            Ok(true)
        })
    }

    async fn escalate_outage(&self, monitor_id: &str, message: &str) -> Result<bool> {
        self.write(WriteKind::Outage, |state| match state.open_outage_mut(monitor_id) {
            Some(outage) if outage.kind == MonitorStatus::Degraded => {
                outage.kind = MonitorStatus::Down;
                outage.message = message.to_string();
                Ok(true)
            }
            _ => Ok(false),
        })
    }

    async fn resolve_outage(&self, monitor_id: &str, resolved_at: DateTime<Utc>) -> Result<Option<MonitorOutage>> {
        self.write(WriteKind::Outage, |state| {
            Ok(state.open_outage_mut(monitor_id).map(|outage| {
                outage.resolved_at = Some(resolved_at);
                outage.clone()
            }))
        })
    }

    async fn active_outages(&self) -> Result<Vec<MonitorOutage>> {
        self.with_state(|state| {
            let mut active: Vec<_> = state.outages.iter().filter(|o| o.is_active()).cloned().collect();
            active.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            Ok(active)
        })
    }

    async fn monitor_outages(&self, monitor_id: &str) -> Result<Vec<MonitorOutage>> {
        self.with_state(|state| {
            Ok(state.outages.iter().filter(|o| o.monitor_id == monitor_id).cloned().collect())
        })
    }

    async fn monitor_events(&self, monitor_id: &str, since_id: i64) -> Result<Vec<SystemEvent>> {
        self.with_state(|state| {
            Ok(state
                .events
                .iter()
                .filter(|e| e.monitor_id == monitor_id && e.id > since_id)
                .cloned()
                .collect())
        })
    }

    async fn last_event(&self, monitor_id: &str) -> Result<Option<SystemEvent>> {
        self.with_state(|state| Ok(state.events.iter().rev().find(|e| e.monitor_id == monitor_id).cloned()))
    }

    async fn system_events(&self, since_id: i64) -> Result<Vec<SystemEvent>> {
        self.with_state(|state| Ok(state.events.iter().filter(|e| e.id > since_id).cloned().collect()))
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        self.with_state(|state| Ok(state.settings.get(key).cloned()))
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.with_state(|state| {
            state.settings.insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    async fn reset(&self) -> Result<()> {
        self.with_state(|state| {
            *state = State::default();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(monitor_id: &str, kind: MonitorStatus) -> NewEvent {
        NewEvent {
            monitor_id: monitor_id.to_string(),
            monitor_name: "Test Monitor".to_string(),
            kind,
            message: kind.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_outage_lifecycle() -> Result<()> {
        let store = MemoryStore::new();
        store.save_monitor(&Monitor::new("m1", "g", "One", "http://example.com")).await?;

        let now = Utc::now();
        assert!(store.open_outage("m1", MonitorStatus::Degraded, "slow", now).await?);
        // second open is a no-op
        assert!(!store.open_outage("m1", MonitorStatus::Down, "down", now).await?);
        assert!(store.escalate_outage("m1", "down").await?);
        assert!(!store.escalate_outage("m1", "still down").await?);

        let active = store.active_outages().await?;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].kind, MonitorStatus::Down);
        assert_eq!(active[0].message, "down");

        let resolved = store.resolve_outage("m1", now).await?.expect("open outage");
        assert_eq!(resolved.kind, MonitorStatus::Down);
        assert_eq!(resolved.resolved_at, Some(now));
        assert!(store.resolve_outage("m1", now).await?.is_none());
        assert!(store.active_outages().await?.is_empty());
        assert_eq!(store.monitor_outages("m1").await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_events_require_monitor() -> Result<()> {
        let store = MemoryStore::new();
        assert!(store.append_event(event("ghost", MonitorStatus::Down)).await.is_err());

        store.save_monitor(&Monitor::new("m1", "g", "One", "http://example.com")).await?;
        let first = store.append_event(event("m1", MonitorStatus::Down)).await?;
        let second = store.append_event(event("m1", MonitorStatus::Up)).await?;
        assert!(second.id > first.id);

        let since = store.monitor_events("m1", first.id).await?;
        assert_eq!(since, vec![second]);
        Ok(())
    }

    #[tokio::test]
    async fn test_fail_writes_and_reset() -> Result<()> {
        let store = MemoryStore::new();
        store.save_monitor(&Monitor::new("m1", "g", "One", "http://example.com")).await?;

        store.set_fail_writes(true);
        assert!(store.append_event(event("m1", MonitorStatus::Down)).await.is_err());
        assert_eq!(store.write_count(), 0);

        store.set_fail_writes(false);
        store.append_event(event("m1", MonitorStatus::Down)).await?;
        assert_eq!(store.write_count(), 1);

        store.reset().await?;
        assert!(store.active_monitors().await?.is_empty());
        assert!(store.system_events(0).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_fail_events_only() -> Result<()> {
        let store = MemoryStore::new();
        store.save_monitor(&Monitor::new("m1", "g", "One", "http://example.com")).await?;

        store.set_fail_events(true);
        assert!(store.open_outage("m1", MonitorStatus::Down, "down", Utc::now()).await?);
        assert!(store.append_event(event("m1", MonitorStatus::Down)).await.is_err());
        assert_eq!(store.last_event("m1").await?, None);

        store.set_fail_events(false);
        store.append_event(event("m1", MonitorStatus::Down)).await?;
        let up = store.append_event(event("m1", MonitorStatus::Up)).await?;
        assert_eq!(store.last_event("m1").await?, Some(up));
        assert_eq!(store.write_count(), 3);
        Ok(())
    }
}
