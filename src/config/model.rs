// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Configuration file as read from TOML, before validation.
///
/// ```toml
/// [registry]
/// namespace = "/dagflow"
/// heartbeat_interval = "10s"
/// worker_group = "default"
///
/// [worker]
/// host = "10.0.0.5"
/// port = 1234
/// tenant = "etl"
/// exec_base_dir = "/tmp/dagflow/exec"
/// use_sudo = true
///
/// [executor]
/// log_flush_rows = 4
/// log_flush_interval = "1s"
///
/// [dependent]
/// poll_interval = "1s"
/// wait_budget = "10m"
/// ```
///
/// All sections are optional and have defaults.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub registry: RawRegistrySection,
    #[serde(default)]
    pub worker: RawWorkerSection,
    #[serde(default)]
    pub executor: RawExecutorSection,
    #[serde(default)]
    pub dependent: RawDependentSection,
}

/// `[registry]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawRegistrySection {
    pub namespace: Option<String>,
    pub heartbeat_interval: Option<String>,
    pub monitor_interval: Option<String>,
    pub worker_group: Option<String>,
}

/// `[worker]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawWorkerSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tenant: Option<String>,
    pub exec_base_dir: Option<PathBuf>,
    #[serde(default)]
    pub use_sudo: bool,
}

/// `[executor]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawExecutorSection {
    pub log_flush_rows: Option<usize>,
    pub log_flush_interval: Option<String>,
    pub job_poll_interval: Option<String>,
    pub kill_grace_period: Option<String>,
}

/// `[dependent]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawDependentSection {
    pub poll_interval: Option<String>,
    pub wait_budget: Option<String>,
}

/// Validated configuration. Construct via `ConfigFile::try_from(raw)`.
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    pub registry: RegistrySettings,
    pub worker: WorkerSettings,
    pub executor: ExecutorSettings,
    pub dependent: DependentSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySettings {
    /// Root path of every registry entry; starts with `/`.
    pub namespace: String,
    pub heartbeat_interval: Duration,
    pub monitor_interval: Duration,
    pub worker_group: String,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            namespace: "/dagflow".to_string(),
            heartbeat_interval: Duration::from_secs(10),
            monitor_interval: Duration::from_secs(5),
            worker_group: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    pub host: String,
    pub port: u16,
    /// OS user tasks run as when `use_sudo` is set.
    pub tenant: String,
    pub exec_base_dir: PathBuf,
    pub use_sudo: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1234,
            tenant: "dagflow".to_string(),
            exec_base_dir: std::env::temp_dir().join("dagflow").join("exec"),
            use_sudo: false,
        }
    }
}

impl WorkerSettings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorSettings {
    /// Buffered log lines that trigger a flush.
    pub log_flush_rows: usize,
    /// Time since the last flush that triggers a flush.
    pub log_flush_interval: Duration,
    pub job_poll_interval: Duration,
    /// Wait after the soft kill before escalating to a hard kill.
    pub kill_grace_period: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            log_flush_rows: 4,
            log_flush_interval: Duration::from_secs(1),
            job_poll_interval: Duration::from_secs(1),
            kill_grace_period: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependentSettings {
    pub poll_interval: Duration,
    /// How long a missing upstream run counts as WAITING.
    pub wait_budget: Duration,
}

impl Default for DependentSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            wait_budget: Duration::ZERO,
        }
    }
}

/// Parse a duration string like `"250ms"`, `"3s"`, `"2m"` or `"1h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| format!("duration '{s}' is missing a unit suffix"))?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{num_part}': {e}"))?;

    let seconds_per_unit = match unit_part.trim().to_lowercase().as_str() {
        "ms" => return Ok(Duration::from_millis(value)),
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        unit => {
            return Err(format!(
                "unsupported duration unit '{unit}'; expected ms, s, m, or h"
            ));
        }
    };

    value
        .checked_mul(seconds_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{s}' is too large"))
}
