use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;

/// Path used when no config file is passed on the command line.
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

// ------------------------------------------------------------
// Root configuration
// ------------------------------------------------------------
//
// Top-level configuration loaded from `config.json`.
//
// It defines:
// - Where the ingestion socket lives
// - Which rolling windows are tracked
// - How often expired windows are rolled over
// - Where the metrics endpoint is served
//
// Every field has a default, so an empty `{}` file is valid.
//
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Filesystem path of the Unix domain ingestion socket
    pub socket_path: PathBuf,

    /// Rolling window durations in seconds
    pub windows: Vec<u64>,

    /// Poll interval of the background rollover task, in seconds
    ///
    /// Independent of the window lengths. Actual rollover latency is
    /// the window length plus up to one poll interval.
    pub rollover_interval_secs: u64,

    /// Bind address of the HTTP metrics endpoint
    pub metrics_addr: SocketAddr,

    /// Interval of the internal pipeline stats log line, in seconds
    pub report_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/tmp/activity-collector.sock"),
            windows: vec![30, 60, 300],
            rollover_interval_secs: 5,
            metrics_addr: SocketAddr::from(([127, 0, 0, 1], 9100)),
            report_interval_secs: 10,
        }
    }
}

impl Config {
    pub fn rollover_interval(&self) -> Duration {
        Duration::from_secs(self.rollover_interval_secs)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    /// Rejects values the runtime cannot operate with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.windows.is_empty() {
            bail!("`windows` must list at least one duration");
        }
        if self.windows.contains(&0) {
            bail!("`windows` must not contain a zero duration");
        }
        if self.rollover_interval_secs == 0 {
            bail!("`rollover_interval_secs` must be greater than zero");
        }
        if self.report_interval_secs == 0 {
            bail!("`report_interval_secs` must be greater than zero");
        }
        Ok(())
    }
}

// ------------------------------------------------------------
// Configuration loader
// ------------------------------------------------------------
//
// Reads a JSON configuration file from disk, deserializes it into
// `Config` and validates it.
//
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let cfg: Config = serde_json::from_str(&data)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Resolves the config from an optional CLI argument.
///
/// An explicit path must exist. Without one, `config.json` is used
/// when present and the built-in defaults otherwise.
pub fn resolve_config(arg: Option<&str>) -> anyhow::Result<Config> {
    match arg {
        Some(path) => load_config(Path::new(path)),
        None => {
            let path = Path::new(DEFAULT_CONFIG_PATH);
            if path.exists() {
                load_config(path)
            } else {
                let cfg = Config::default();
                cfg.validate()?;
                Ok(cfg)
            }
        }
    }
}
