use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::checker::Checker;
use super::executor::{LatencyThreshold, MonitoringExecutor};
use super::types::WorkerStatus;
use super::validation::validate_monitor;
use super::worker::{WorkerConfig, WorkerHandle};
use crate::error::UptimeError;
use crate::settings::{LATENCY_THRESHOLD_KEY, Setting};
use crate::store::Store;

/// What a [`Manager::sync`] call changed
#[derive(Debug, Default)]
pub struct SyncReport {
    pub started: Vec<String>,
    pub reconfigured: Vec<String>,
    pub stopped: Vec<String>,
    /// Monitors that were skipped, each with its own error
    pub failures: Vec<UptimeError>,
}

impl SyncReport {
    /// True when the live worker set was left untouched
    pub fn is_unchanged(&self) -> bool {
        self.started.is_empty() && self.reconfigured.is_empty() && self.stopped.is_empty()
    }
}

/// Owns one worker per active monitor and keeps that set in line with the
/// store.
///
/// All changes to the worker registry go through a single async mutex, so
/// `sync`, `stop` and `reset` are serialized against each other. Workers
/// themselves never touch the registry and keep probing while it is locked.
pub struct Manager {
    store: Arc<dyn Store>,
    executor: Arc<MonitoringExecutor>,
    threshold: LatencyThreshold,
    default_threshold_ms: u64,
    workers: Mutex<HashMap<String, WorkerHandle>>,
}

impl Manager {
    pub fn new(store: Arc<dyn Store>, checker: Arc<dyn Checker>, default_threshold_ms: u64) -> Self {
        let threshold = LatencyThreshold::new(default_threshold_ms);
        let executor = Arc::new(MonitoringExecutor::new(checker, threshold.clone()));
        Self::with_executor(store, executor, threshold, default_threshold_ms)
    }

    /// Manager probing over HTTP with the given request timeout
    pub fn with_http(
        store: Arc<dyn Store>,
        probe_timeout_seconds: u64,
        default_threshold_ms: u64,
    ) -> anyhow::Result<Self> {
        let threshold = LatencyThreshold::new(default_threshold_ms);
        let executor = Arc::new(MonitoringExecutor::http(probe_timeout_seconds, threshold.clone())?);
        Ok(Self::with_executor(store, executor, threshold, default_threshold_ms))
    }

    fn with_executor(
        store: Arc<dyn Store>,
        executor: Arc<MonitoringExecutor>,
        threshold: LatencyThreshold,
        default_threshold_ms: u64,
    ) -> Self {
        Self { store, executor, threshold, default_threshold_ms, workers: Mutex::new(HashMap::new()) }
    }

    /// Reconcile running workers with the active monitors in the store.
    ///
    /// Only a failure to read the monitor list fails the call; a monitor with
    /// unusable configuration is reported in [`SyncReport::failures`] and gets
    /// no worker.
    pub async fn sync(&self) -> Result<SyncReport, UptimeError> {
        let mut workers = self.workers.lock().await;
        let monitors = self.store.active_monitors().await?;

        let mut report = SyncReport::default();
        let mut desired = HashSet::new();

        for monitor in &monitors {
            if let Err(e) = validate_monitor(monitor) {
                warn!(monitor_id = %monitor.id, "Skipping monitor: {}", e);
                report.failures.push(e);
                continue;
            }
            desired.insert(monitor.id.clone());

            match workers.get(&monitor.id) {
                Some(handle) => {
                    if handle.reconfigure(WorkerConfig::from(monitor)) {
                        info!(monitor_id = %monitor.id, url = %monitor.url, interval_secs = monitor.interval_seconds, "Reconfigured worker");
                        report.reconfigured.push(monitor.id.clone());
                    }
                }
                None => {
                    let handle = WorkerHandle::spawn(monitor, self.store.clone(), self.executor.clone());
                    info!(monitor_id = %monitor.id, url = %monitor.url, "Started worker");
                    workers.insert(monitor.id.clone(), handle);
                    report.started.push(monitor.id.clone());
                }
            }
        }

        let retired: Vec<String> =
            workers.keys().filter(|id| !desired.contains(*id)).cloned().collect();
        let handles: Vec<WorkerHandle> =
            retired.iter().filter_map(|id| workers.remove(id)).collect();
        stop_all(handles).await;
        for id in retired {
            info!(monitor_id = %id, "Stopped worker");
            report.stopped.push(id);
        }

        debug!(
            started = report.started.len(),
            reconfigured = report.reconfigured.len(),
            stopped = report.stopped.len(),
            failed = report.failures.len(),
            "Sync complete"
        );
        Ok(report)
    }

    /// Cold start: load persisted settings, then sync. Workers begin probing
    /// as soon as they are spawned.
    pub async fn start(&self) -> Result<SyncReport, UptimeError> {
        match self.store.get_setting(LATENCY_THRESHOLD_KEY).await {
            Ok(Some(raw)) => match Setting::parse(LATENCY_THRESHOLD_KEY, &raw) {
                Ok(setting) => self.apply(setting),
                Err(e) => warn!("Ignoring persisted setting: {}", e),
            },
            Ok(None) => {}
            Err(e) => warn!("Failed to load settings, using defaults: {:#}", e),
        }

        let report = self.sync().await?;
        info!(
            workers = self.workers.lock().await.len(),
            threshold_ms = self.threshold.get(),
            "Monitoring started"
        );
        Ok(report)
    }

    /// Stop every worker and wait for all of them to finish. No store write
    /// from a worker happens after this returns.
    pub async fn stop(&self) {
        let mut workers = self.workers.lock().await;
        if workers.is_empty() {
            return;
        }

        let handles: Vec<WorkerHandle> = workers.drain().map(|(_, handle)| handle).collect();
        let count = handles.len();
        stop_all(handles).await;
        info!(workers = count, "Monitoring stopped");
    }

    /// Stop everything and return to a freshly constructed state, ready for a
    /// `sync` against a wiped store.
    pub async fn reset(&self) {
        self.stop().await;
        self.threshold.set(self.default_threshold_ms);
        info!("Manager reset");
    }

    pub async fn get_monitor(&self, id: &str) -> Result<WorkerStatus, UptimeError> {
        self.workers
            .lock()
            .await
            .get(id)
            .map(WorkerHandle::status)
            .ok_or_else(|| UptimeError::NotFound(id.to_string()))
    }

    pub async fn get_all(&self) -> Vec<WorkerStatus> {
        self.workers.lock().await.values().map(WorkerHandle::status).collect()
    }

    /// Change the `up`/`degraded` boundary; workers pick it up on their next
    /// check.
    pub fn set_latency_threshold(&self, ms: u64) {
        info!(threshold_ms = ms, "Latency threshold updated");
        self.threshold.set(ms);
    }

    pub fn latency_threshold(&self) -> u64 {
        self.threshold.get()
    }

    /// Persist a setting and apply it to the running workers
    pub async fn update_setting(&self, setting: Setting) -> Result<(), UptimeError> {
        self.store.set_setting(setting.key(), &setting.value()).await?;
        self.apply(setting);
        Ok(())
    }

    fn apply(&self, setting: Setting) {
        match setting {
            Setting::LatencyThreshold(ms) => self.set_latency_threshold(ms),
        }
    }
}

/// Signal every worker first so they wind down in parallel, then wait
async fn stop_all(handles: Vec<WorkerHandle>) {
    for handle in &handles {
        handle.cancel();
    }
    join_all(handles.into_iter().map(WorkerHandle::stop)).await;
}
