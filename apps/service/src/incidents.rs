//! Incident timeline derived from the raw event log.
//!
//! Incidents are never stored. They are rebuilt on demand by walking each
//! monitor's events in order: a `degraded` or `down` event opens an incident,
//! a `down` event escalates an open `degraded` one in place, and an `up` event
//! closes it. Whatever is still open after the last event is active.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::monitoring::types::MonitorStatus;
use crate::store::Store;
use crate::store::models::SystemEvent;

/// Display-oriented reconstruction of one outage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    /// `evt-<id>` of the event that opened the incident
    pub id: String,
    pub monitor_id: String,
    pub monitor_name: String,
    /// Worst severity seen while open
    #[serde(rename = "type")]
    pub kind: MonitorStatus,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Human readable, measured up to `now` while the incident is active
    pub duration: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IncidentTimeline {
    /// Newest start first
    pub active: Vec<Incident>,
    /// Most recently resolved first
    pub history: Vec<Incident>,
}

/// Incident still being accumulated
struct OpenIncident<'a> {
    opened_by: &'a SystemEvent,
    kind: MonitorStatus,
    message: &'a str,
}

impl OpenIncident<'_> {
    fn finish(self, resolved_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Incident {
        let started_at = self.opened_by.timestamp;
        let end = resolved_at.unwrap_or(now);
        Incident {
            id: format!("evt-{}", self.opened_by.id),
            monitor_id: self.opened_by.monitor_id.clone(),
            monitor_name: self.opened_by.monitor_name.clone(),
            kind: self.kind,
            message: self.message.to_string(),
            started_at,
            resolved_at,
            duration: format_duration(end - started_at),
        }
    }
}

/// Derive incidents from one monitor's events, given in ascending order.
///
/// Returns the incident left open (if any) and the closed ones, oldest first.
pub fn derive_monitor_incidents(
    events: &[SystemEvent],
    now: DateTime<Utc>,
) -> (Option<Incident>, Vec<Incident>) {
    let mut history = Vec::new();
    let mut current: Option<OpenIncident<'_>> = None;

    for event in events {
        match event.kind {
            MonitorStatus::Up => {
                // a recovery with nothing open is ignored
                if let Some(open) = current.take() {
                    history.push(open.finish(Some(event.timestamp), now));
                }
            }
            MonitorStatus::Degraded | MonitorStatus::Down => match &mut current {
                Some(open) => {
                    // escalate only; repeated or milder failures change nothing
                    if open.kind == MonitorStatus::Degraded && event.kind == MonitorStatus::Down {
                        open.kind = MonitorStatus::Down;
                        open.message = &event.message;
                    }
                }
                None => {
                    current = Some(OpenIncident { opened_by: event, kind: event.kind, message: &event.message });
                }
            },
            MonitorStatus::Unknown => {}
        }
    }

    (current.map(|open| open.finish(None, now)), history)
}

/// Derive the incident timeline across every monitor in `events`.
///
/// Events are grouped per monitor and ordered by id within each group, so the
/// input may interleave monitors freely.
pub fn derive_incidents(events: &[SystemEvent], now: DateTime<Utc>) -> IncidentTimeline {
    let mut by_monitor: BTreeMap<&str, Vec<SystemEvent>> = BTreeMap::new();
    for event in events {
        by_monitor.entry(event.monitor_id.as_str()).or_default().push(event.clone());
    }

    let mut timeline = IncidentTimeline::default();
    for mut monitor_events in by_monitor.into_values() {
        monitor_events.sort_by_key(|e| e.id);
        let (active, history) = derive_monitor_incidents(&monitor_events, now);
        timeline.active.extend(active);
        timeline.history.extend(history);
    }

    timeline.active.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    timeline.history.sort_by(|a, b| b.resolved_at.cmp(&a.resolved_at));
    timeline
}

/// Read the whole event log from `store` and derive its timeline
pub async fn load_timeline(store: &dyn Store) -> Result<IncidentTimeline> {
    let events = store.system_events(0).await?;
    Ok(derive_incidents(&events, Utc::now()))
}

/// `"2d 3h"`, `"1h 5m"`, `"4m 10s"`, `"12s"`
pub fn format_duration(delta: TimeDelta) -> String {
    let total = delta.num_seconds().max(0);
    let (days, hours, minutes, seconds) =
        (total / 86_400, total % 86_400 / 3600, total % 3600 / 60, total % 60);

    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + TimeDelta::minutes(minute)
    }

    fn event(id: i64, monitor_id: &str, kind: MonitorStatus, minute: i64) -> SystemEvent {
        SystemEvent {
            id,
            monitor_id: monitor_id.to_string(),
            monitor_name: format!("Monitor {monitor_id}"),
            kind,
            message: format!("{kind} at {minute}"),
            timestamp: at(minute),
        }
    }

    use MonitorStatus::{Degraded, Down, Up};

    #[test]
    fn test_escalation_keeps_start_time() {
        let events = [event(1, "m", Degraded, 1), event(2, "m", Down, 2), event(3, "m", Up, 3)];

        let (active, history) = derive_monitor_incidents(&events, at(10));

        assert!(active.is_none());
        assert_eq!(history.len(), 1);
        let incident = &history[0];
        assert_eq!(incident.id, "evt-1");
        assert_eq!(incident.started_at, at(1));
        assert_eq!(incident.kind, Down);
        assert_eq!(incident.message, "down at 2");
        assert_eq!(incident.resolved_at, Some(at(3)));
        assert_eq!(incident.duration, "2m 0s");
    }

    #[test]
    fn test_simple_resolution() {
        let events = [event(1, "m", Down, 1), event(2, "m", Up, 2)];

        let (active, history) = derive_monitor_incidents(&events, at(10));

        assert!(active.is_none());
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].started_at, at(1));
        assert_eq!(history[0].resolved_at, Some(at(2)));
    }

    #[test]
    fn test_dangling_incident_is_active() {
        let events = [event(1, "m", Down, 1)];

        let (active, history) = derive_monitor_incidents(&events, at(61));

        let active = active.expect("incident should still be open");
        assert_eq!(active.resolved_at, None);
        assert_eq!(active.duration, "1h 0m");
        assert!(history.is_empty());
    }

    #[test]
    fn test_no_deescalation_and_repeats_ignored() {
        let events = [
            event(1, "m", Down, 1),
            event(2, "m", Degraded, 2),
            event(3, "m", Down, 3),
            event(4, "m", Up, 4),
        ];

        let (active, history) = derive_monitor_incidents(&events, at(10));

        assert!(active.is_none());
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, Down);
        assert_eq!(history[0].message, "down at 1");
        assert_eq!(history[0].started_at, at(1));
    }

    #[test]
    fn test_stray_up_events_ignored() {
        let events = [event(1, "m", Up, 1), event(2, "m", Up, 2)];

        let (active, history) = derive_monitor_incidents(&events, at(10));

        assert!(active.is_none());
        assert!(history.is_empty());
    }

    #[test]
    fn test_at_most_one_open_incident_per_monitor() {
        let kinds = [Down, Degraded, Up, Degraded, Down, Down, Up, Up, Down, Degraded];
        let events: Vec<_> =
            kinds.iter().enumerate().map(|(i, k)| event(i as i64 + 1, "m", *k, i as i64)).collect();

        // every prefix of the log leaves at most one incident open
        for end in 0..=events.len() {
            let (active, history) = derive_monitor_incidents(&events[..end], at(100));
            assert!(history.iter().all(|i| i.resolved_at.is_some()));
            if let Some(active) = active {
                assert!(history.iter().all(|i| i.resolved_at.unwrap() <= active.started_at));
            }
        }

        let (active, history) = derive_monitor_incidents(&events, at(100));
        assert_eq!(history.len(), 2);
        assert_eq!(active.map(|a| a.id), Some("evt-9".to_string()));
    }

    #[test]
    fn test_timeline_across_monitors_sorted() {
        let events = [
            event(1, "a", Down, 1),
            event(2, "b", Degraded, 2),
            event(3, "a", Up, 5),
            event(4, "c", Down, 6),
            event(5, "b", Up, 7),
            event(6, "d", Degraded, 8),
        ];

        let timeline = derive_incidents(&events, at(20));

        let active: Vec<_> = timeline.active.iter().map(|i| i.monitor_id.as_str()).collect();
        assert_eq!(active, vec!["d", "c"]);
        let history: Vec<_> = timeline.history.iter().map(|i| i.monitor_id.as_str()).collect();
        assert_eq!(history, vec!["b", "a"]);
    }

    #[test]
    fn test_timeline_serializes_for_presentation() {
        let timeline = derive_incidents(&[event(7, "m-1", Down, 0)], at(1));
        let json = serde_json::to_value(&timeline).unwrap();

        let incident = &json["active"][0];
        assert_eq!(incident["id"], "evt-7");
        assert_eq!(incident["monitorId"], "m-1");
        assert_eq!(incident["type"], "down");
        assert!(incident["resolvedAt"].is_null());
        assert_eq!(incident["duration"], "1m 0s");
        assert_eq!(json["history"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_load_timeline_from_store() -> anyhow::Result<()> {
        use crate::store::MemoryStore;
        use crate::store::models::{Monitor, NewEvent};

        let store = MemoryStore::new();
        store.save_monitor(&Monitor::new("m", "g", "Monitor m", "http://m.test")).await?;
        for kind in [Degraded, Down] {
            store
                .append_event(NewEvent {
                    monitor_id: "m".to_string(),
                    monitor_name: "Monitor m".to_string(),
                    kind,
                    message: kind.to_string(),
                    timestamp: Utc::now(),
                })
                .await?;
        }

        let timeline = load_timeline(&store).await?;
        assert_eq!(timeline.active.len(), 1);
        assert_eq!(timeline.active[0].kind, Down);
        assert!(timeline.history.is_empty());
        Ok(())
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(TimeDelta::seconds(12)), "12s");
        assert_eq!(format_duration(TimeDelta::seconds(250)), "4m 10s");
        assert_eq!(format_duration(TimeDelta::seconds(3900)), "1h 5m");
        assert_eq!(format_duration(TimeDelta::hours(51)), "2d 3h");
        assert_eq!(format_duration(TimeDelta::seconds(-5)), "0s");
    }
}
