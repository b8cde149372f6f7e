// src/config/validate.rs

use std::time::Duration;

use crate::config::model::{
    ConfigFile, DependentSettings, ExecutorSettings, RawConfigFile, RawDependentSection,
    RawExecutorSection, RawRegistrySection, RawWorkerSection, RegistrySettings, WorkerSettings,
    parse_duration,
};
use crate::errors::{DagflowError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = DagflowError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        Ok(ConfigFile {
            registry: validate_registry(raw.registry)?,
            worker: validate_worker(raw.worker)?,
            executor: validate_executor(raw.executor)?,
            dependent: validate_dependent(raw.dependent)?,
        })
    }
}

fn duration_or(field: &str, value: Option<String>, default: Duration) -> Result<Duration> {
    match value {
        Some(s) => parse_duration(&s)
            .map_err(|e| DagflowError::ConfigError(format!("{field}: {e}"))),
        None => Ok(default),
    }
}

fn validate_registry(raw: RawRegistrySection) -> Result<RegistrySettings> {
    let defaults = RegistrySettings::default();

    let namespace = raw.namespace.unwrap_or(defaults.namespace);
    if !namespace.starts_with('/') {
        return Err(DagflowError::ConfigError(format!(
            "[registry].namespace must start with '/' (got '{namespace}')"
        )));
    }
    let namespace = namespace.trim_end_matches('/').to_string();

    let worker_group = raw.worker_group.unwrap_or(defaults.worker_group);
    if worker_group.is_empty() || worker_group.contains('/') {
        return Err(DagflowError::ConfigError(format!(
            "[registry].worker_group must be a non-empty name without '/' (got '{worker_group}')"
        )));
    }

    let heartbeat_interval = duration_or(
        "[registry].heartbeat_interval",
        raw.heartbeat_interval,
        defaults.heartbeat_interval,
    )?;
    let monitor_interval = duration_or(
        "[registry].monitor_interval",
        raw.monitor_interval,
        defaults.monitor_interval,
    )?;
    if heartbeat_interval.is_zero() || monitor_interval.is_zero() {
        return Err(DagflowError::ConfigError(
            "[registry] intervals must be greater than zero".to_string(),
        ));
    }

    Ok(RegistrySettings {
        namespace,
        heartbeat_interval,
        monitor_interval,
        worker_group,
    })
}

fn validate_worker(raw: RawWorkerSection) -> Result<WorkerSettings> {
    let defaults = WorkerSettings::default();

    let port = raw.port.unwrap_or(defaults.port);
    if port == 0 {
        return Err(DagflowError::ConfigError(
            "[worker].port must be non-zero".to_string(),
        ));
    }

    let tenant = raw.tenant.unwrap_or(defaults.tenant);
    if raw.use_sudo && tenant.trim().is_empty() {
        return Err(DagflowError::ConfigError(
            "[worker].tenant is required when use_sudo = true".to_string(),
        ));
    }

    Ok(WorkerSettings {
        host: raw.host.unwrap_or(defaults.host),
        port,
        tenant,
        exec_base_dir: raw.exec_base_dir.unwrap_or(defaults.exec_base_dir),
        use_sudo: raw.use_sudo,
    })
}

fn validate_executor(raw: RawExecutorSection) -> Result<ExecutorSettings> {
    let defaults = ExecutorSettings::default();

    let log_flush_rows = raw.log_flush_rows.unwrap_or(defaults.log_flush_rows);
    if log_flush_rows == 0 {
        return Err(DagflowError::ConfigError(
            "[executor].log_flush_rows must be >= 1 (got 0)".to_string(),
        ));
    }

    Ok(ExecutorSettings {
        log_flush_rows,
        log_flush_interval: duration_or(
            "[executor].log_flush_interval",
            raw.log_flush_interval,
            defaults.log_flush_interval,
        )?,
        job_poll_interval: duration_or(
            "[executor].job_poll_interval",
            raw.job_poll_interval,
            defaults.job_poll_interval,
        )?,
        kill_grace_period: duration_or(
            "[executor].kill_grace_period",
            raw.kill_grace_period,
            defaults.kill_grace_period,
        )?,
    })
}

fn validate_dependent(raw: RawDependentSection) -> Result<DependentSettings> {
    let defaults = DependentSettings::default();

    let poll_interval = duration_or(
        "[dependent].poll_interval",
        raw.poll_interval,
        defaults.poll_interval,
    )?;
    if poll_interval.is_zero() {
        return Err(DagflowError::ConfigError(
            "[dependent].poll_interval must be greater than zero".to_string(),
        ));
    }

    Ok(DependentSettings {
        poll_interval,
        wait_budget: duration_or("[dependent].wait_budget", raw.wait_budget, defaults.wait_budget)?,
    })
}
