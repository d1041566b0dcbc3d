//! Per-monitor polling worker.
//!
//! Each worker is a tokio task that owns its timer, its probe and its view of
//! what has been persisted for the monitor. The manager talks to it through a
//! [`WorkerHandle`]: configuration goes in and status snapshots come out over
//! `watch` channels, and shutdown is a separate `watch` flag.
//!
//! The first probe fires as soon as the worker starts; later probes follow the
//! configured interval.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, warn};

use super::executor::MonitoringExecutor;
use super::types::{CheckResult, MonitorStatus, WorkerStatus};
use crate::store::Store;
use crate::store::models::{Monitor, NewEvent};

/// The part of a monitor's configuration a worker acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub name: String,
    pub url: String,
    pub interval: Duration,
}

impl From<&Monitor> for WorkerConfig {
    fn from(monitor: &Monitor) -> Self {
        Self { name: monitor.name.clone(), url: monitor.url.clone(), interval: monitor.interval() }
    }
}

/// Probe-side half of a status snapshot, published by the worker
#[derive(Debug, Clone)]
struct ProbeState {
    status: MonitorStatus,
    last_checked: Option<DateTime<Utc>>,
    latency_ms: Option<u64>,
    message: Option<String>,
}

/// Store writes a classification change requires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    /// Nothing to persist
    None,
    /// up -> degraded/down
    Open,
    /// degraded -> down
    Escalate,
    /// degraded/down -> up
    Resolve,
    /// First `up` with unconfirmed store state: close any outage a previous
    /// run or failed write left open, and bring the event log in line
    Reconcile,
}

/// Decide what to persist given the last persisted and the new classification.
///
/// Repeated failures of the same or lower severity persist nothing, so one
/// outage yields one opening event, at most one escalation and one recovery.
pub(crate) fn transition(persisted: MonitorStatus, current: MonitorStatus) -> Transition {
    use MonitorStatus::*;

    match (persisted, current) {
        (_, Unknown) => Transition::None,
        (Unknown, Up) => Transition::Reconcile,
        (Up, Up) => Transition::None,
        (Up | Unknown, Degraded | Down) => Transition::Open,
        (Degraded, Down) => Transition::Escalate,
        (Degraded | Down, Degraded | Down) => Transition::None,
        (Degraded | Down, Up) => Transition::Resolve,
    }
}

/// Whether the event log, whose last event is `logged`, needs an event for
/// `current`.
///
/// Mirrors incident derivation: an `up` log has nothing open, a failure opens
/// or escalates, and `up` closes. `logged` is `Up` for an empty log.
pub(crate) fn needs_event(logged: MonitorStatus, current: MonitorStatus) -> bool {
    use MonitorStatus::*;

    match current {
        Up => logged.is_failing(),
        Degraded => !logged.is_failing(),
        Down => logged != Down,
        Unknown => false,
    }
}

/// Manager-side handle of a running worker
pub struct WorkerHandle {
    monitor_id: String,
    running_since: DateTime<Utc>,
    config_tx: watch::Sender<WorkerConfig>,
    probe_rx: watch::Receiver<ProbeState>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Spawn a worker for `monitor`. Its first probe runs immediately.
    pub fn spawn(
        monitor: &Monitor,
        store: Arc<dyn Store>,
        executor: Arc<MonitoringExecutor>,
    ) -> Self {
        let (config_tx, config_rx) = watch::channel(WorkerConfig::from(monitor));
        let (probe_tx, probe_rx) = watch::channel(ProbeState {
            status: MonitorStatus::Unknown,
            last_checked: None,
            latency_ms: None,
            message: None,
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = Worker {
            monitor_id: monitor.id.clone(),
            store,
            executor,
            config_rx,
            shutdown_rx,
            probe_tx,
            persisted: MonitorStatus::Unknown,
            logged: None,
        };
        let task = tokio::spawn(worker.run());

        Self {
            monitor_id: monitor.id.clone(),
            running_since: Utc::now(),
            config_tx,
            probe_rx,
            shutdown_tx,
            task,
        }
    }

    /// Apply new configuration from the next tick on. Returns whether
    /// anything changed.
    pub fn reconfigure(&self, config: WorkerConfig) -> bool {
        self.config_tx.send_if_modified(|current| {
            if *current == config {
                return false;
            }
            *current = config;
            true
        })
    }

    /// Owned snapshot of the worker's live status
    pub fn status(&self) -> WorkerStatus {
        let config = self.config_tx.borrow().clone();
        let probe = self.probe_rx.borrow().clone();
        WorkerStatus {
            monitor_id: self.monitor_id.clone(),
            name: config.name,
            url: config.url,
            interval: config.interval,
            status: probe.status,
            last_checked: probe.last_checked,
            latency_ms: probe.latency_ms,
            message: probe.message,
            running_since: self.running_since,
        }
    }

    /// Signal the worker to stop without waiting for it
    pub fn cancel(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Stop the worker and wait until its task has finished. An in-flight
    /// probe is abandoned; an in-flight store write completes first.
    pub async fn stop(self) {
        self.cancel();
        if let Err(e) = self.task.await {
            error!(monitor_id = %self.monitor_id, "Worker task ended abnormally: {}", e);
        }
    }
}

struct Worker {
    monitor_id: String,
    store: Arc<dyn Store>,
    executor: Arc<MonitoringExecutor>,
    config_rx: watch::Receiver<WorkerConfig>,
    shutdown_rx: watch::Receiver<bool>,
    probe_tx: watch::Sender<ProbeState>,
    /// Last classification known to be reflected in the outage rows
    persisted: MonitorStatus,
    /// Kind of the last event known to be in the log; `None` until read back
    logged: Option<MonitorStatus>,
}

/// Shortest period the timer accepts; validation keeps real monitors far above it
const MIN_PERIOD: Duration = Duration::from_millis(10);

fn ticker(period: Duration, first_tick: Instant) -> Interval {
    let mut timer = interval_at(first_tick, period.max(MIN_PERIOD));
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

impl Worker {
    async fn run(mut self) {
        let mut period = self.config_rx.borrow_and_update().interval;
        let mut timer = ticker(period, Instant::now());

        info!(monitor_id = %self.monitor_id, interval_secs = period.as_secs(), "Worker started");

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_rx.changed() => break,
                changed = self.config_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let new_period = self.config_rx.borrow_and_update().interval;
                    if new_period != period {
                        debug!(monitor_id = %self.monitor_id, interval_secs = new_period.as_secs(), "Interval changed");
                        period = new_period;
                        timer = ticker(period, Instant::now() + period);
                    }
                    continue;
                }
                _ = timer.tick() => {}
            }

            let config = self.config_rx.borrow().clone();
            let result = tokio::select! {
                biased;
                _ = self.shutdown_rx.changed() => break,
                result = self.executor.execute_check(&config.url) => result,
            };

            self.record(&config, result).await;
        }

        info!(monitor_id = %self.monitor_id, "Worker stopped");
    }

    async fn record(&mut self, config: &WorkerConfig, result: CheckResult) {
        debug!(
            monitor_id = %self.monitor_id,
            status = %result.status,
            latency_ms = ?result.latency_ms,
            "Check completed"
        );

        // Live status never waits on the store
        self.probe_tx.send_replace(ProbeState {
            status: result.status,
            last_checked: Some(result.timestamp),
            latency_ms: result.latency_ms,
            message: Some(result.message.clone()),
        });

        let step = transition(self.persisted, result.status);
        match self.persist(step, config, &result).await {
            Ok(()) => {
                if step != Transition::None {
                    self.persisted = result.status;
                }
            }
            Err(e) => {
                // Leave both cursors unconfirmed so the next tick reconciles
                warn!(
                    monitor_id = %self.monitor_id,
                    "Failed to persist {} transition, retrying next tick: {:#}",
                    result.status,
                    e
                );
                self.persisted = MonitorStatus::Unknown;
                self.logged = None;
            }
        }
    }

    async fn persist(&mut self, step: Transition, config: &WorkerConfig, result: &CheckResult) -> Result<()> {
        let now = result.timestamp;

        let closed = match step {
            Transition::None => return Ok(()),
            Transition::Open => {
                let opened = self
                    .store
                    .open_outage(&self.monitor_id, result.status, &result.message, now)
                    .await?;
                if !opened && result.status == MonitorStatus::Down {
                    // An outage survived from an earlier run or failed write
                    self.store.escalate_outage(&self.monitor_id, &result.message).await?;
                }
                warn!(monitor_id = %self.monitor_id, url = %config.url, "Monitor is {}: {}", result.status, result.message);
                None
            }
            Transition::Escalate => {
                self.store.escalate_outage(&self.monitor_id, &result.message).await?;
                warn!(monitor_id = %self.monitor_id, url = %config.url, "Monitor escalated to down: {}", result.message);
                None
            }
            Transition::Resolve | Transition::Reconcile => {
                let closed = self.store.resolve_outage(&self.monitor_id, now).await?;
                if step == Transition::Resolve {
                    info!(monitor_id = %self.monitor_id, url = %config.url, "Monitor recovered");
                } else if closed.is_some() {
                    info!(monitor_id = %self.monitor_id, "Closed outage left open by a previous run or failed write");
                }
                closed
            }
        };

        // A closed outage the log never saw opened or escalated is written
        // first, so it shows up in the incident history
        if let Some(outage) = &closed {
            let at = if self.logged().await?.is_failing() { now } else { outage.started_at };
            self.log_event(config, outage.kind, &outage.message, at).await?;
        }
        self.log_event(config, result.status, &result.message, now).await
    }

    /// Kind of the monitor's last event, `Up` for an empty log
    async fn logged(&mut self) -> Result<MonitorStatus> {
        if let Some(kind) = self.logged {
            return Ok(kind);
        }
        let kind = self
            .store
            .last_event(&self.monitor_id)
            .await?
            .map_or(MonitorStatus::Up, |event| event.kind);
        self.logged = Some(kind);
        Ok(kind)
    }

    /// Append an event unless the log already reflects `kind`
    async fn log_event(
        &mut self,
        config: &WorkerConfig,
        kind: MonitorStatus,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        if !needs_event(self.logged().await?, kind) {
            return Ok(());
        }

        self.store
            .append_event(NewEvent {
                monitor_id: self.monitor_id.clone(),
                monitor_name: config.name.clone(),
                kind,
                message: message.to_string(),
                timestamp: at,
            })
            .await?;
        self.logged = Some(kind);
        Ok(())
    }
}
