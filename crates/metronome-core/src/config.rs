use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

// Scheduling defaults.
pub const DEFAULT_LOCK_TTL_SECS: u64 = 60; // stale-holder recovery bound
pub const DEFAULT_RANDOM_RATIO: f64 = 0.1; // ±5% interval jitter
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 1;
pub const DEFAULT_NAMESPACE: &str = "scheduler";

/// Top-level config (metronome.toml + METRONOME_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetronomeConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Scheduler subsystem configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Distributed-lock time-to-live. Bounds how long a crashed holder can
    /// block the fleet.
    /// Override with env var: METRONOME_SCHEDULER_LOCK_TTL_SECS=30
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,

    /// Default fractional jitter applied to job intervals (0 <= r < 1).
    /// Individual jobs may override it at registration time.
    #[serde(default = "default_random_ratio")]
    pub random_ratio: f64,

    /// Cadence of the scheduler's tick loop.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,

    /// Optional wall-clock cap on a single `perform()`. When unset, a hung
    /// job blocks all later jobs in its process.
    #[serde(default)]
    pub job_timeout_secs: Option<u64>,

    /// Key namespace shared by every process of one scheduler cluster.
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lock_ttl_secs: DEFAULT_LOCK_TTL_SECS,
            random_ratio: DEFAULT_RANDOM_RATIO,
            tick_interval_secs: DEFAULT_TICK_INTERVAL_SECS,
            job_timeout_secs: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path of the SQLite coordination store shared by co-located processes.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for MetronomeConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl MetronomeConfig {
    /// Load config from a TOML file with METRONOME_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.metronome/metronome.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: MetronomeConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("METRONOME_").split("_"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_lock_ttl_secs() -> u64 {
    DEFAULT_LOCK_TTL_SECS
}
fn default_random_ratio() -> f64 {
    DEFAULT_RANDOM_RATIO
}
fn default_tick_interval_secs() -> u64 {
    DEFAULT_TICK_INTERVAL_SECS
}
fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.metronome/metronome.db", home)
}
fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.metronome/metronome.toml", home)
}
