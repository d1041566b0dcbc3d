use std::{env, fmt, fs, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::settings::DEFAULT_LATENCY_THRESHOLD_MS;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read config {path}: {source}")]
    ReadFailed { path: path::PathBuf, source: std::io::Error },
    #[error("failed to write config {path}: {source}")]
    WriteFailed { path: path::PathBuf, source: std::io::Error },
    #[error("failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("invalid value for {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },
    #[error("no config directory available, set XDG_CONFIG_HOME or HOME")]
    ConfigPathUnavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub database: Database,
    pub monitoring: Monitoring,
    pub logging: Logging,
    pub server: Server,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Database {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Monitoring {
    /// Whole-request timeout for a single probe
    pub probe_timeout_seconds: u64,
    /// Used until a `latency_threshold` setting is persisted
    pub default_latency_threshold_ms: u64,
    /// How often the worker set is reconciled with the store
    pub sync_interval_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    /// `compact` or `json`
    pub format: String,
}

/// Read by the HTTP layer that serves the dashboard; the monitoring core
/// only carries these through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Server {
    pub listen_addr: String,
    pub cookie_secure: bool,
    pub admin_secret: Option<String>,
}

impl Default for Database {
    fn default() -> Self {
        Self { path: "clusteruptime.db".into() }
    }
}

impl Default for Monitoring {
    fn default() -> Self {
        Self {
            probe_timeout_seconds: 10,
            default_latency_threshold_ms: DEFAULT_LATENCY_THRESHOLD_MS,
            sync_interval_seconds: 30,
        }
    }
}

impl Default for Logging {
    fn default() -> Self {
        Self { level: "info".into(), format: "compact".into() }
    }
}

impl Default for Server {
    fn default() -> Self {
        Self { listen_addr: "0.0.0.0:9096".into(), cookie_secure: false, admin_secret: None }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/clusteruptime/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("clusteruptime/config.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path)?;
        write_title_1(f, "Monitoring")?;
        write_1(f, "Probe Timeout (s)", &self.monitoring.probe_timeout_seconds)?;
        write_1(f, "Latency Threshold (ms)", &self.monitoring.default_latency_threshold_ms)?;
        write_1(f, "Sync Interval (s)", &self.monitoring.sync_interval_seconds)?;
        write_title_1(f, "Logging")?;
        write_1(f, "Level", &self.logging.level)?;
        write_1(f, "Format", &self.logging.format)?;
        write_title_1(f, "Server")?;
        write_1(f, "Listen Address", &self.server.listen_addr)?;
        write_1(f, "Secure Cookies", &self.server.cookie_secure)?;
        let secret = if self.server.admin_secret.is_some() { "(set)" } else { "(unset)" };
        write_1(f, "Admin Secret", &secret)?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/clusteruptime/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    ///
    /// ```rust,no_run
    /// use clusteruptime::config::Config;
    ///
    /// let cfg = Config::from_config(None::<&std::path::Path>)?;
    /// println!("{}", cfg);
    /// # Ok::<(), clusteruptime::config::Error>(())
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| Error::ReadFailed { path: config_path.clone(), source })?;
            Ok(toml::from_str(raw_string.as_str())?)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self)?;
        let write_failed = |source| Error::WriteFailed { path: path.to_path_buf(), source };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_failed)?;
        }

        fs::write(path, config_str).map_err(write_failed)
    }

    /// Apply `DB_PATH`, `LISTEN_ADDR`, `ADMIN_SECRET` and `COOKIE_SECURE`
    /// from the process environment
    pub fn apply_env(&mut self) -> Result<(), Error> {
        self.apply_overrides(|name| env::var(name).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), Error> {
        if let Some(path) = lookup("DB_PATH") {
            self.database.path = path;
        }
        if let Some(addr) = lookup("LISTEN_ADDR") {
            self.server.listen_addr = addr;
        }
        if let Some(secret) = lookup("ADMIN_SECRET").filter(|s| !s.is_empty()) {
            self.server.admin_secret = Some(secret);
        }
        if let Some(value) = lookup("COOKIE_SECURE") {
            self.server.cookie_secure = match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" | "" => false,
                _ => return Err(Error::InvalidEnv { name: "COOKIE_SECURE", value }),
            };
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [monitoring]
            sync_interval_seconds = 5

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.monitoring.sync_interval_seconds, 5);
        assert_eq!(cfg.monitoring.default_latency_threshold_ms, DEFAULT_LATENCY_THRESHOLD_MS);
        assert_eq!(cfg.logging.format, "json");
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.database, Database::default());
    }

    #[test]
    fn test_missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config");

        let cfg = Config::from_config(Some(&path)).unwrap();

        assert_eq!(cfg, Config::default());
        let written = dir.path().join("nested").join("config.toml");
        assert!(written.exists());
        assert_eq!(Config::from_config(Some(&written)).unwrap(), cfg);
    }

    #[test]
    fn test_server_defaults() {
        let server = Server::default();
        assert_eq!(server.listen_addr, "0.0.0.0:9096");
        assert!(!server.cookie_secure);
        assert_eq!(server.admin_secret, None);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("DB_PATH", "/var/lib/clusteruptime/data.db"),
            ("LISTEN_ADDR", "127.0.0.1:8080"),
            ("ADMIN_SECRET", "hunter2"),
            ("COOKIE_SECURE", "TRUE"),
        ]
        .into();
        let mut cfg = Config::default();

        cfg.apply_overrides(|name| vars.get(name).map(|v| v.to_string())).unwrap();

        assert_eq!(cfg.database.path, "/var/lib/clusteruptime/data.db");
        assert_eq!(cfg.server.listen_addr, "127.0.0.1:8080");
        assert_eq!(cfg.server.admin_secret.as_deref(), Some("hunter2"));
        assert!(cfg.server.cookie_secure);
    }

    #[test]
    fn test_invalid_cookie_flag_rejected() {
        let mut cfg = Config::default();
        let err = cfg
            .apply_overrides(|name| (name == "COOKIE_SECURE").then(|| "maybe".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidEnv { name: "COOKIE_SECURE", .. }));
    }

    #[test]
    fn test_display_hides_secret() {
        let mut cfg = Config::default();
        cfg.server.admin_secret = Some("hunter2".into());
        let rendered = cfg.to_string();
        assert!(rendered.contains("Admin Secret: (set)"));
        assert!(!rendered.contains("hunter2"));
    }
}
