// src/task/spark.rs

use tracing::info;

use crate::errors::{DagflowError, Result};
use crate::exec::CommandExecutor;
use crate::task::params::{DeployMode, SparkParameters, TaskParams};
use crate::task::{TaskExecutor, TaskFuture};

/// Submits a Spark application with `spark-submit`.
#[derive(Debug)]
pub struct SparkTask {
    params: SparkParameters,
    executor: CommandExecutor,
}

impl SparkTask {
    pub fn new(params: SparkParameters, executor: CommandExecutor) -> Self {
        Self { params, executor }
    }
}

/// Render the `spark-submit` command line.
pub fn spark_submit_command(params: &SparkParameters) -> String {
    let mut args: Vec<String> = vec!["spark-submit".into()];

    match params.deploy_mode {
        DeployMode::Local => args.push("--master local".into()),
        mode => {
            args.push("--master yarn".into());
            args.push(format!("--deploy-mode {}", mode.as_str()));
        }
    }

    if let Some(class) = params.main_class.as_deref().filter(|c| !c.is_empty()) {
        args.push(format!("--class {class}"));
    }
    if let Some(cores) = params.driver_cores {
        args.push(format!("--driver-cores {cores}"));
    }
    if let Some(memory) = params.driver_memory.as_deref() {
        args.push(format!("--driver-memory {memory}"));
    }
    if let Some(n) = params.num_executors {
        args.push(format!("--num-executors {n}"));
    }
    if let Some(cores) = params.executor_cores {
        args.push(format!("--executor-cores {cores}"));
    }
    if let Some(memory) = params.executor_memory.as_deref() {
        args.push(format!("--executor-memory {memory}"));
    }
    if let Some(name) = params.app_name.as_deref().filter(|n| !n.is_empty()) {
        args.push(format!("--name {name}"));
    }

    let others = params.others.as_deref().unwrap_or("").trim();
    if let Some(queue) = params.queue.as_deref().filter(|q| !q.is_empty()) {
        if !others.contains("--queue") {
            args.push(format!("--queue {queue}"));
        }
    }
    if !others.is_empty() {
        args.push(others.to_string());
    }

    args.push(params.main_jar.clone());
    if let Some(main_args) = params.main_args.as_deref().filter(|a| !a.trim().is_empty()) {
        args.push(main_args.trim().to_string());
    }

    args.join(" ")
}

impl TaskExecutor for SparkTask {
    fn init(&mut self) -> Result<()> {
        if self.params.main_jar.trim().is_empty() {
            return Err(DagflowError::ConfigError(format!(
                "spark task '{}' has no main jar",
                self.executor.context().task_name
            )));
        }
        info!(
            task = %self.executor.context().task_name,
            command = %spark_submit_command(&self.params),
            "spark task initialised"
        );
        Ok(())
    }

    fn execute(&self) -> TaskFuture<'_, i32> {
        Box::pin(async move {
            let command = spark_submit_command(&self.params);
            let result = self.executor.run(&command).await?;
            Ok(result.exit_status_code)
        })
    }

    fn cancel(&self) -> TaskFuture<'_, ()> {
        Box::pin(self.executor.cancel_application())
    }

    fn parameters(&self) -> TaskParams {
        TaskParams::Spark(self.params.clone())
    }
}
