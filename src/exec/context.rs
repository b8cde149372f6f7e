// src/exec/context.rs

use std::path::PathBuf;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};

use crate::errors::{DagflowError, Result};

/// Everything a task attempt needs to know about itself.
#[derive(Debug, Clone)]
pub struct TaskExecutionContext {
    pub task_instance_id: i64,
    pub process_instance_id: i64,
    pub task_name: String,
    /// OS user the task runs as when elevation is enabled.
    pub tenant: String,
    /// Working directory of the attempt; the script file is written here.
    pub execute_path: PathBuf,
    /// File receiving the task output.
    pub log_path: PathBuf,
    /// Shell file sourced before the command, when present.
    pub env_file: Option<PathBuf>,
    pub start_time: NaiveDateTime,
    /// Scheduled time of the owning process instance, if any.
    pub schedule_time: Option<NaiveDateTime>,
    pub timeout: Option<Duration>,
}

impl TaskExecutionContext {
    pub fn new(
        process_instance_id: i64,
        task_instance_id: i64,
        task_name: impl Into<String>,
        execute_path: impl Into<PathBuf>,
    ) -> Self {
        let execute_path = execute_path.into();
        let log_path = execute_path.join(format!("{process_instance_id}_{task_instance_id}.log"));
        Self {
            task_instance_id,
            process_instance_id,
            task_name: task_name.into(),
            tenant: String::new(),
            execute_path,
            log_path,
            env_file: None,
            start_time: Local::now().naive_local(),
            schedule_time: None,
            timeout: None,
        }
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = tenant.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// `{processInstanceId}_{taskInstanceId}`; names the script file.
    pub fn app_id(&self) -> String {
        format!("{}_{}", self.process_instance_id, self.task_instance_id)
    }

    pub fn script_path(&self) -> PathBuf {
        self.execute_path.join(format!("{}.command", self.app_id()))
    }

    /// Reference instant for dependency windows.
    pub fn reference_time(&self) -> NaiveDateTime {
        self.schedule_time.unwrap_or(self.start_time)
    }

    /// Time left before the timeout; `None` without a timeout.
    ///
    /// Fails with [`DagflowError::Timeout`] once the budget is used up.
    pub fn remaining_time(&self) -> Result<Option<Duration>> {
        let Some(timeout) = self.timeout else {
            return Ok(None);
        };
        let elapsed = (Local::now().naive_local() - self.start_time)
            .to_std()
            .unwrap_or(Duration::ZERO);

        match timeout.checked_sub(elapsed) {
            Some(remaining) if !remaining.is_zero() => Ok(Some(remaining)),
            _ => Err(DagflowError::Timeout(timeout)),
        }
    }
}
