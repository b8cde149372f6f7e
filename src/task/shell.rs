// src/task/shell.rs

use tracing::info;

use crate::errors::{DagflowError, Result};
use crate::exec::CommandExecutor;
use crate::task::params::{ShellParameters, TaskParams};
use crate::task::{TaskExecutor, TaskFuture};

/// Runs a raw shell script.
#[derive(Debug)]
pub struct ShellTask {
    params: ShellParameters,
    executor: CommandExecutor,
}

impl ShellTask {
    pub fn new(params: ShellParameters, executor: CommandExecutor) -> Self {
        Self { params, executor }
    }

    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }
}

impl TaskExecutor for ShellTask {
    fn init(&mut self) -> Result<()> {
        if self.params.raw_script.trim().is_empty() {
            return Err(DagflowError::ConfigError(format!(
                "shell task '{}' has an empty script",
                self.executor.context().task_name
            )));
        }
        info!(task = %self.executor.context().task_name, "shell task initialised");
        Ok(())
    }

    fn execute(&self) -> TaskFuture<'_, i32> {
        Box::pin(async move {
            let result = self.executor.run(&self.params.raw_script).await?;
            Ok(result.exit_status_code)
        })
    }

    fn cancel(&self) -> TaskFuture<'_, ()> {
        Box::pin(self.executor.cancel_application())
    }

    fn parameters(&self) -> TaskParams {
        TaskParams::Shell(self.params.clone())
    }
}
