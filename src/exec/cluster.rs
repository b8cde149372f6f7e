// src/exec/cluster.rs

//! External cluster-compute jobs submitted by task processes.

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::LazyLock;

use anyhow::Context;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::errors::Result;

/// Boxed future returned by [`ClusterJobClient`] methods.
pub type JobFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Identifier of a job submitted to the cluster scheduler.
static APPLICATION_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"application_\d+_\d+").expect("application id regex"));

/// Every job id mentioned in `line`.
pub fn find_app_ids(line: &str) -> impl Iterator<Item = &str> {
    APPLICATION_ID.find_iter(line).map(|m| m.as_str())
}

/// Status of an external job as far as the task is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Submitted,
    Running,
    Succeeded,
    Failed,
    Killed,
}

impl JobState {
    /// Failure or kill: the task result is decided.
    pub fn is_bad(self) -> bool {
        matches!(self, JobState::Failed | JobState::Killed)
    }
}

/// Query and control of jobs on the external scheduler.
pub trait ClusterJobClient: Send + Sync + Debug {
    fn application_status<'a>(&'a self, app_id: &'a str) -> JobFuture<'a, JobState>;

    fn kill_applications<'a>(&'a self, app_ids: &'a [String]) -> JobFuture<'a, ()>;
}

/// Shells out to `yarn application`.
#[derive(Debug, Clone)]
pub struct YarnCliClient {
    program: String,
}

impl Default for YarnCliClient {
    fn default() -> Self {
        Self {
            program: "yarn".to_string(),
        }
    }
}

impl YarnCliClient {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn yarn(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("running {} {}", self.program, args.join(" ")))?;

        if !output.status.success() {
            warn!(
                program = %self.program,
                ?args,
                status = %output.status,
                "yarn command returned non-zero status"
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl ClusterJobClient for YarnCliClient {
    fn application_status<'a>(&'a self, app_id: &'a str) -> JobFuture<'a, JobState> {
        Box::pin(async move {
            let report = self.yarn(&["application", "-status", app_id]).await?;
            let state = parse_application_report(&report).unwrap_or(JobState::Submitted);
            debug!(%app_id, ?state, "queried application status");
            Ok(state)
        })
    }

    fn kill_applications<'a>(&'a self, app_ids: &'a [String]) -> JobFuture<'a, ()> {
        Box::pin(async move {
            for app_id in app_ids {
                self.yarn(&["application", "-kill", app_id.as_str()]).await?;
                info!(%app_id, "requested application kill");
            }
            Ok(())
        })
    }
}

/// Read `State` and `Final-State` from a `yarn application -status` report.
pub fn parse_application_report(report: &str) -> Option<JobState> {
    let field = |name: &str| {
        report.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            (key.trim() == name).then(|| value.trim().to_uppercase())
        })
    };

    let state = field("State")?;
    Some(match state.as_str() {
        "NEW" | "NEW_SAVING" | "SUBMITTED" | "ACCEPTED" => JobState::Submitted,
        "RUNNING" => JobState::Running,
        "FAILED" => JobState::Failed,
        "KILLED" => JobState::Killed,
        "FINISHED" => match field("Final-State").as_deref() {
            Some("SUCCEEDED") => JobState::Succeeded,
            Some("KILLED") => JobState::Killed,
            _ => JobState::Failed,
        },
        _ => JobState::Submitted,
    })
}
