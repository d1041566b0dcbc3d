//! Uptime monitoring core for the clusteruptime dashboard.
//!
//! One worker per active monitor probes its endpoint on a fixed interval,
//! classifies the result as up, degraded or down, and persists outages and
//! availability events on state changes. Incidents for display are derived
//! from those events on demand.

pub mod config;
pub mod error;
pub mod incidents;
pub mod monitoring;
pub mod settings;
pub mod store;

pub use error::{ProbeError, UptimeError};
pub use monitoring::Manager;
