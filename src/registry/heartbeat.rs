// src/registry/heartbeat.rs

//! Heartbeat payloads and the periodic heartbeat writer.

use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::context::Stopper;
use crate::registry::client::RegistryClient;

/// Date-time format used inside heartbeat payloads.
pub const HEARTBEAT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const HEARTBEAT_FIELDS: usize = 7;

/// Resource usage snapshot carried by a heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResInfo {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub load_average: f64,
}

/// A registered master or worker as read back from the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct Server {
    pub host: String,
    pub port: u16,
    pub res_info: ResInfo,
    pub create_time: NaiveDateTime,
    pub last_heartbeat_time: NaiveDateTime,
    /// Registry path the payload was read from; empty when parsed standalone.
    pub registry_path: String,
}

impl Server {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Render `host,port,cpu,mem,load,createTime,lastHeartbeatTime`.
pub fn build_heartbeat(
    host: &str,
    port: u16,
    res: ResInfo,
    create_time: NaiveDateTime,
    last_heartbeat_time: NaiveDateTime,
) -> String {
    format!(
        "{host},{port},{:.2},{:.2},{:.2},{},{}",
        res.cpu_usage,
        res.memory_usage,
        res.load_average,
        create_time.format(HEARTBEAT_DATE_FORMAT),
        last_heartbeat_time.format(HEARTBEAT_DATE_FORMAT),
    )
}

/// Parse a heartbeat payload. `None` unless it has exactly seven well-formed
/// fields.
pub fn parse_heartbeat(payload: &str) -> Option<Server> {
    let fields: Vec<&str> = payload.split(',').map(str::trim).collect();
    if fields.len() != HEARTBEAT_FIELDS {
        return None;
    }

    let parse_time = |s: &str| NaiveDateTime::parse_from_str(s, HEARTBEAT_DATE_FORMAT).ok();

    Some(Server {
        host: fields[0].to_string(),
        port: fields[1].parse().ok()?,
        res_info: ResInfo {
            cpu_usage: fields[2].parse().ok()?,
            memory_usage: fields[3].parse().ok()?,
            load_average: fields[4].parse().ok()?,
        },
        create_time: parse_time(fields[5])?,
        last_heartbeat_time: parse_time(fields[6])?,
        registry_path: String::new(),
    })
}

/// Best-effort resource sampling from `/proc`. Unreadable values are 0.
#[derive(Debug, Default)]
pub struct ResourceSampler {
    /// (busy, total) jiffies of the previous sample.
    last_cpu: Mutex<Option<(u64, u64)>>,
}

impl ResourceSampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample(&self) -> ResInfo {
        ResInfo {
            cpu_usage: self.cpu_usage().unwrap_or(0.0),
            memory_usage: fs::read_to_string("/proc/meminfo")
                .ok()
                .and_then(|s| memory_usage(&s))
                .unwrap_or(0.0),
            load_average: fs::read_to_string("/proc/loadavg")
                .ok()
                .and_then(|s| load_average(&s))
                .unwrap_or(0.0),
        }
    }

    fn cpu_usage(&self) -> Option<f64> {
        let stat = fs::read_to_string("/proc/stat").ok()?;
        let (busy, total) = cpu_jiffies(&stat)?;
        let mut last = self.last_cpu.lock().unwrap_or_else(|e| e.into_inner());
        let previous = last.replace((busy, total));

        let (prev_busy, prev_total) = previous.unwrap_or((0, 0));
        let delta_total = total.checked_sub(prev_total)?;
        if delta_total == 0 {
            return None;
        }
        Some(busy.saturating_sub(prev_busy) as f64 / delta_total as f64)
    }
}

/// First field of `/proc/loadavg`.
fn load_average(loadavg: &str) -> Option<f64> {
    loadavg.split_whitespace().next()?.parse().ok()
}

/// Used memory ratio from `/proc/meminfo`.
fn memory_usage(meminfo: &str) -> Option<f64> {
    let field = |name: &str| -> Option<f64> {
        meminfo
            .lines()
            .find(|line| line.starts_with(name))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()
    };
    let total = field("MemTotal:")?;
    let available = field("MemAvailable:")?;
    if total <= 0.0 {
        return None;
    }
    Some((total - available) / total)
}

/// (busy, total) jiffies from the aggregate `cpu` line of `/proc/stat`.
fn cpu_jiffies(stat: &str) -> Option<(u64, u64)> {
    let line = stat.lines().find(|l| l.starts_with("cpu "))?;
    let values: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|v| v.parse().ok())
        .collect();
    if values.len() < 4 {
        return None;
    }
    let total: u64 = values.iter().sum();
    let idle = values[3] + values.get(4).copied().unwrap_or(0);
    Some((total.saturating_sub(idle), total))
}

/// Periodically rewrites the heartbeat payload of a registered node.
#[derive(Debug)]
pub struct HeartbeatWriter {
    registry: Arc<RegistryClient>,
    path: String,
    host: String,
    port: u16,
    create_time: NaiveDateTime,
    sampler: ResourceSampler,
}

impl HeartbeatWriter {
    pub fn new(registry: Arc<RegistryClient>, path: String, host: String, port: u16) -> Self {
        Self {
            registry,
            path,
            host,
            port,
            create_time: Local::now().naive_local(),
            sampler: ResourceSampler::new(),
        }
    }

    /// Current heartbeat payload for this node.
    pub fn payload(&self) -> String {
        build_heartbeat(
            &self.host,
            self.port,
            self.sampler.sample(),
            self.create_time,
            Local::now().naive_local(),
        )
    }

    /// Write one heartbeat. Failures are logged, never fatal.
    pub fn beat(&self) {
        let payload = self.payload();
        match self.registry.update_heartbeat(&self.path, &payload) {
            Ok(()) => debug!(path = %self.path, %payload, "heartbeat written"),
            Err(e) => warn!(path = %self.path, error = %e, "failed to write heartbeat"),
        }
    }

    /// Beat every `interval` until the stopper fires.
    pub fn spawn(self, interval: Duration, stopper: Stopper) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = stopper.stopped() => {
                        info!(path = %self.path, "heartbeat writer stopped");
                        break;
                    }
                    _ = ticker.tick() => self.beat(),
                }
            }
        })
    }
}
