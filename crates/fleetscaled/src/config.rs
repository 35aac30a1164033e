//! fleetscaled.toml configuration parser.
//!
//! ```toml
//! data_dir = "/var/lib/fleetscale"
//! metrics_file = "/var/lib/node_exporter/fleetscale.prom"
//!
//! [engine]
//! tick_interval = "30s"
//! refresh_interval = "1m"
//! max_concurrency = 16
//! store_timeout = "10s"
//! metric_timeout = "5s"
//! actuation_timeout = "10s"
//! degraded_after = 3
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};

use fleetscale_engine::EngineConfig;
use fleetscale_engine::cache::DEFAULT_STORE_TIMEOUT;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub data_dir: PathBuf,
    /// Prometheus textfile rewritten after every round.
    pub metrics_file: Option<PathBuf>,
    #[serde(default)]
    pub engine: EngineSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineSection {
    pub tick_interval: Option<String>,
    pub refresh_interval: Option<String>,
    pub max_concurrency: Option<usize>,
    pub store_timeout: Option<String>,
    pub metric_timeout: Option<String>,
    pub actuation_timeout: Option<String>,
    pub degraded_after: Option<u32>,
}

/// Fully resolved daemon settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub metrics_file: Option<PathBuf>,
    pub store_timeout: Duration,
    pub engine: EngineConfig,
}

impl Settings {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE)
    }
}

/// State file name inside the data directory.
pub const DB_FILE: &str = "fleetscale.redb";

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: DaemonConfig =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Apply defaults and parse every duration.
    pub fn resolve(&self) -> anyhow::Result<Settings> {
        let defaults = EngineConfig::default();
        let e = &self.engine;

        let engine = EngineConfig {
            tick_interval: duration_or("tick_interval", &e.tick_interval, defaults.tick_interval)?,
            refresh_interval: duration_or("refresh_interval", &e.refresh_interval, defaults.refresh_interval)?,
            max_concurrency: e.max_concurrency.unwrap_or(defaults.max_concurrency),
            metric_timeout: duration_or("metric_timeout", &e.metric_timeout, defaults.metric_timeout)?,
            actuation_timeout: duration_or("actuation_timeout", &e.actuation_timeout, defaults.actuation_timeout)?,
            degraded_after: e.degraded_after.unwrap_or(defaults.degraded_after),
        };
        if engine.tick_interval.is_zero() || engine.refresh_interval.is_zero() {
            return Err(anyhow!("tick_interval and refresh_interval must be non-zero"));
        }
        if engine.max_concurrency == 0 {
            return Err(anyhow!("max_concurrency must be at least 1"));
        }

        Ok(Settings {
            data_dir: self.data_dir.clone(),
            metrics_file: self.metrics_file.clone(),
            store_timeout: duration_or("store_timeout", &e.store_timeout, DEFAULT_STORE_TIMEOUT)?,
            engine,
        })
    }
}

fn duration_or(field: &str, value: &Option<String>, default: Duration) -> anyhow::Result<Duration> {
    match value {
        Some(s) => parse_duration(s).ok_or_else(|| anyhow!("invalid duration for {field}: {s:?}")),
        None => Ok(default),
    }
}

/// Parse durations like `"250ms"`, `"30s"`, `"5m"`, `"1h"`, or bare seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok()?.checked_mul(60).map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok()?.checked_mul(3600).map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
