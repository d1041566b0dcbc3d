/// Monitoring engine module - probes monitors and tracks their health
///
/// This module is responsible for:
/// - Executing HTTP/HTTPS checks and classifying them
/// - Running one worker per active monitor
/// - Reconciling the worker set with the store
/// - Recording outages and availability events
pub mod checker;
pub mod executor;
pub mod manager;
pub mod types;
pub mod validation;
pub mod worker;


pub use checker::{Checker, HttpChecker};
pub use executor::{LatencyThreshold, MonitoringExecutor};
pub use manager::{Manager, SyncReport};
pub use types::{CheckResult, MonitorStatus, WorkerStatus};
