//! Process-wide runtime settings.
//!
//! Read once at startup. Every value has a default so the monitor can run
//! with an empty environment.

use std::path::PathBuf;
use std::time::Duration;

/// Default location of the cameras TOML file.
pub const DEFAULT_CONFIG_PATH: &str = "config/cameras.toml";

/// Default location of the aggregates `SQLite` database.
pub const DEFAULT_DB_PATH: &str = "data/db/crowd_stats.db";

/// Default directory relative file locators are resolved against.
pub const DEFAULT_SAMPLES_DIR: &str = "data/samples";

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1";

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 8000;

/// Sleep between two full passes over the active cameras.
pub const DEFAULT_PASS_INTERVAL: Duration = Duration::from_secs(1);

/// Sleep while no camera is active.
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_secs(5);

/// Wait before reopening a dropped live stream.
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Runtime settings for the monitor process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Path to the cameras TOML file (`CONFIG_PATH`).
    pub config_path: PathBuf,
    /// Path to the aggregates database (`DB_PATH`).
    pub db_path: PathBuf,
    /// Base directory for relative file locators (`SAMPLES_DIR`).
    pub samples_dir: PathBuf,
    /// HTTP bind address (`BIND_ADDR`).
    pub bind_addr: String,
    /// HTTP port (`PORT`).
    pub port: u16,
    /// Sleep between passes.
    pub pass_interval: Duration,
    /// Sleep while idle.
    pub idle_interval: Duration,
    /// First reconnect wait for a live stream.
    pub reconnect_backoff: Duration,
    /// Upper bound for the reconnect wait (`RECONNECT_BACKOFF_MAX_SECS`).
    ///
    /// Equal to [`Self::reconnect_backoff`] by default, which keeps the
    /// wait fixed.
    pub reconnect_backoff_max: Duration,
    /// Concurrent camera ticks within a pass (`SCHEDULER_WORKERS`).
    pub workers: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            samples_dir: PathBuf::from(DEFAULT_SAMPLES_DIR),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            port: DEFAULT_PORT,
            pass_interval: DEFAULT_PASS_INTERVAL,
            idle_interval: DEFAULT_IDLE_INTERVAL,
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
            reconnect_backoff_max: DEFAULT_RECONNECT_BACKOFF,
            workers: 1,
        }
    }
}

impl MonitorSettings {
    /// Reads settings from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through an arbitrary key lookup.
    ///
    /// Unparseable values fall back to their defaults with a warning.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let reconnect_backoff_max = parse_or(&lookup, "RECONNECT_BACKOFF_MAX_SECS", None)
            .map_or(defaults.reconnect_backoff_max, Duration::from_secs)
            .max(defaults.reconnect_backoff);

        Self {
            config_path: lookup("CONFIG_PATH").map_or(defaults.config_path, PathBuf::from),
            db_path: lookup("DB_PATH").map_or(defaults.db_path, PathBuf::from),
            samples_dir: lookup("SAMPLES_DIR").map_or(defaults.samples_dir, PathBuf::from),
            bind_addr: lookup("BIND_ADDR").unwrap_or(defaults.bind_addr),
            port: parse_or(&lookup, "PORT", Some(defaults.port)).unwrap_or(defaults.port),
            reconnect_backoff_max,
            workers: parse_or(&lookup, "SCHEDULER_WORKERS", Some(defaults.workers))
                .unwrap_or(defaults.workers)
                .max(1),
            ..defaults
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: Option<T>) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let Some(raw) = lookup(key) else {
        return default;
    };

    raw.trim().parse().map_or_else(
        |_| {
            log::warn!("Ignoring unparseable {key}={raw:?}");
            default
        },
        Some,
    )
}
