//! Validation of persisted monitor configuration before it is scheduled.
//!
//! A monitor failing these checks is skipped by the manager and reported as a
//! configuration error; it never takes down the other workers.

use url::Url;

use crate::error::UptimeError;
use crate::store::models::Monitor;

const MIN_INTERVAL: u64 = 1; // 1 second
const MAX_INTERVAL: u64 = 86400; // 24 hours

/// Validate everything the worker relies on
pub fn validate_monitor(monitor: &Monitor) -> Result<(), UptimeError> {
    if monitor.id.trim().is_empty() {
        return Err(UptimeError::config(&monitor.id, "monitor id is empty"));
    }

    validate_target(&monitor.url).map_err(|reason| UptimeError::config(&monitor.id, reason))?;
    validate_check_interval(monitor.interval_seconds)
        .map_err(|reason| UptimeError::config(&monitor.id, reason))
}

/// Validate an HTTP/HTTPS target
fn validate_target(target: &str) -> Result<(), String> {
    let url = Url::parse(target).map_err(|e| format!("invalid URL {target:?}: {e}"))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(format!("unsupported scheme: {other}")),
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(format!("URL has no host: {target}"));
    }

    if url.port() == Some(0) {
        return Err("port 0 is not valid".to_string());
    }

    Ok(())
}

/// Validate check interval
fn validate_check_interval(interval_seconds: u64) -> Result<(), String> {
    if interval_seconds < MIN_INTERVAL {
        return Err(format!(
            "check interval too short: {interval_seconds} seconds (minimum: {MIN_INTERVAL})"
        ));
    }

    if interval_seconds > MAX_INTERVAL {
        return Err(format!(
            "check interval too long: {interval_seconds} seconds (maximum: {MAX_INTERVAL})"
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_target() {
        assert!(validate_target("https://example.com").is_ok());
        assert!(validate_target("http://example.com:8080/health").is_ok());
        // local targets are allowed, clusters monitor their own services
        assert!(validate_target("http://127.0.0.1:48201").is_ok());

        assert!(validate_target("ftp://example.com").is_err());
        assert!(validate_target("example.com").is_err());
        assert!(validate_target("http://example.com:0").is_err());
        assert!(validate_target("").is_err());
    }

    #[test]
    fn test_validate_check_interval() {
        assert!(validate_check_interval(1).is_ok()); // Min
        assert!(validate_check_interval(60).is_ok());
        assert!(validate_check_interval(86400).is_ok()); // Max

        assert!(validate_check_interval(0).is_err());
        assert!(validate_check_interval(100000).is_err());
    }

    #[test]
    fn test_validate_monitor_reports_id() {
        let mut monitor = Monitor::new("m-bad", "g-default", "Bad", "not a url");
        let err = validate_monitor(&monitor).unwrap_err();
        assert_eq!(err.monitor_id(), Some("m-bad"));

        monitor.url = "https://example.com".into();
        assert!(validate_monitor(&monitor).is_ok());

        monitor.interval_seconds = 0;
        assert!(matches!(validate_monitor(&monitor), Err(UptimeError::Config { .. })));
    }
}
