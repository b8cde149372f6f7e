// src/engine/runner.rs

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use tokio::task::{Id, JoinSet};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};

use crate::config::WorkerSettings;
use crate::dag::WorkflowDefinition;
use crate::dependent::{MemoryProcessStore, ProcessInstance, TaskInstance};
use crate::engine::core::RunCore;
use crate::engine::{TaskName, TaskOutcome};
use crate::errors::{DagflowError, Result};
use crate::exec::{FileLogSink, LogSink, TaskExecutionContext, TracingLogSink};
use crate::task::{Task, TaskEnvironment, TaskExecutor};
use crate::types::{EXIT_CODE_FAILURE, ExecutionStatus};

/// Result of one workflow run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowReport {
    pub process_instance_id: i64,
    pub state: ExecutionStatus,
    /// Outcome per task, in topological order.
    pub tasks: Vec<(TaskName, TaskOutcome)>,
}

impl WorkflowReport {
    pub fn is_success(&self) -> bool {
        self.state.is_success()
    }

    pub fn outcome(&self, name: &str) -> Option<TaskOutcome> {
        self.tasks
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, o)| *o)
    }
}

#[derive(Debug)]
struct RunningTask {
    task_instance_id: i64,
    task: Arc<Task>,
}

/// Runs a workflow definition on this node.
///
/// Ready tasks run concurrently. Every run is recorded as a process instance
/// and every started task as a task instance in the store, so dependent
/// tasks of later runs can observe them.
#[derive(Debug)]
pub struct WorkflowRunner {
    definition: WorkflowDefinition,
    definition_id: i64,
    store: Arc<MemoryProcessStore>,
    env: TaskEnvironment,
    worker: WorkerSettings,
    schedule_time: Option<NaiveDateTime>,
}

impl WorkflowRunner {
    /// The store given here also replaces the one in `env`, so tasks read
    /// the instances this runner records.
    pub fn new(
        definition: WorkflowDefinition,
        definition_id: i64,
        store: Arc<MemoryProcessStore>,
        mut env: TaskEnvironment,
        worker: WorkerSettings,
    ) -> Self {
        env.store = store.clone();
        Self {
            definition,
            definition_id,
            store,
            env,
            worker,
            schedule_time: None,
        }
    }

    /// Record the run as scheduled at `time` rather than manual.
    pub fn with_schedule_time(mut self, time: Option<NaiveDateTime>) -> Self {
        self.schedule_time = time;
        self
    }

    pub async fn run(&self) -> Result<WorkflowReport> {
        let mut core = RunCore::from_definition(&self.definition)?;

        let process_instance_id = self.store.upsert_process(ProcessInstance {
            id: 0,
            definition_id: self.definition_id,
            state: ExecutionStatus::RunningExecution,
            schedule_time: self.schedule_time,
            start_time: now(),
            end_time: None,
            manual: self.schedule_time.is_none(),
        });
        info!(
            definition_id = self.definition_id,
            process_instance_id,
            tasks = self.definition.tasks.len(),
            "workflow run started"
        );

        let deadline = self
            .definition
            .timeout
            .map(|secs| Instant::now() + Duration::from_secs(secs));
        let mut joins: JoinSet<(TaskName, i32)> = JoinSet::new();
        let mut ids: HashMap<Id, TaskName> = HashMap::new();
        let mut running: HashMap<TaskName, RunningTask> = HashMap::new();
        let mut timed_out = false;

        loop {
            for name in core.take_ready() {
                self.launch(&mut core, &mut joins, &mut ids, &mut running, process_instance_id, name);
            }

            if joins.is_empty() {
                break;
            }

            tokio::select! {
                joined = joins.join_next_with_id() => {
                    let (name, code) = match joined {
                        Some(Ok((id, (name, code)))) => {
                            ids.remove(&id);
                            (name, code)
                        }
                        Some(Err(e)) => {
                            let Some(name) = ids.remove(&e.id()) else {
                                error!(error = %e, "unknown task join failure");
                                continue;
                            };
                            error!(task = %name, error = %e, "task panicked or was aborted");
                            (name, EXIT_CODE_FAILURE)
                        }
                        None => break,
                    };
                    if let Some(done) = running.remove(&name) {
                        self.finish_task(&mut core, &name, done.task_instance_id, code);
                    }
                }
                _ = self.env.stopper.stopped(), if !core.is_stopping() => {
                    warn!(process_instance_id, "stop requested; cancelling running tasks");
                    core.stop();
                    cancel_all(&running).await;
                }
                _ = wait_deadline(deadline), if !core.is_stopping() => {
                    warn!(process_instance_id, "workflow timed out; cancelling running tasks");
                    timed_out = true;
                    core.stop();
                    cancel_all(&running).await;
                }
            }
        }

        let state = if timed_out {
            ExecutionStatus::Failure
        } else {
            core.workflow_status()
        };
        self.store
            .set_process_state(process_instance_id, state, Some(now()));
        info!(process_instance_id, state = ?state, "workflow run finished");

        Ok(WorkflowReport {
            process_instance_id,
            state,
            tasks: core.outcomes(),
        })
    }

    fn launch(
        &self,
        core: &mut RunCore,
        joins: &mut JoinSet<(TaskName, i32)>,
        ids: &mut HashMap<Id, TaskName>,
        running: &mut HashMap<TaskName, RunningTask>,
        process_instance_id: i64,
        name: TaskName,
    ) {
        let task_instance_id = self.store.upsert_task(TaskInstance {
            id: 0,
            process_instance_id,
            name: name.clone(),
            state: ExecutionStatus::RunningExecution,
            start_time: now(),
            end_time: None,
        });

        let task = match self.build_task(process_instance_id, task_instance_id, &name) {
            Ok(task) => Arc::new(task),
            Err(e) => {
                error!(task = %name, error = %e, "task could not be prepared");
                self.finish_task(core, &name, task_instance_id, EXIT_CODE_FAILURE);
                return;
            }
        };

        debug!(task = %name, task_instance_id, kind = ?task.task_type(), "launching task");
        let handle = joins.spawn({
            let task = Arc::clone(&task);
            let name = name.clone();
            async move {
                let code = match task.execute().await {
                    Ok(code) => code,
                    Err(e) => {
                        error!(task = %name, error = %e, "task execution failed");
                        EXIT_CODE_FAILURE
                    }
                };
                (name, code)
            }
        });
        ids.insert(handle.id(), name.clone());
        running.insert(
            name,
            RunningTask {
                task_instance_id,
                task,
            },
        );
    }

    fn build_task(
        &self,
        process_instance_id: i64,
        task_instance_id: i64,
        name: &str,
    ) -> Result<Task> {
        let node = self
            .definition
            .task(name)
            .ok_or_else(|| DagflowError::TaskNotFound(name.to_string()))?;
        let params = node.task_params()?;

        let execute_path = self
            .worker
            .exec_base_dir
            .join(self.definition_id.to_string())
            .join(process_instance_id.to_string())
            .join(task_instance_id.to_string());
        let mut ctx = TaskExecutionContext::new(process_instance_id, task_instance_id, name, execute_path)
            .with_tenant(self.worker.tenant.clone())
            .with_timeout(node.timeout.map(Duration::from_secs));
        ctx.schedule_time = self.schedule_time;

        let sink = task_log_sink(&ctx);
        let mut task = Task::new(ctx, params, &self.env, sink);
        task.init()?;
        Ok(task)
    }

    fn finish_task(&self, core: &mut RunCore, name: &str, task_instance_id: i64, code: i32) {
        let outcome = TaskOutcome::from_exit_code(code);
        if let Some(state) = outcome.execution_status() {
            self.store
                .set_task_state(task_instance_id, state, Some(now()));
        }
        info!(task = %name, task_instance_id, exit_code = code, outcome = ?outcome, "task finished");
        core.complete(name, outcome);
    }
}

/// File sink at the attempt's log path, or tracing output when the file
/// cannot be created.
fn task_log_sink(ctx: &TaskExecutionContext) -> Arc<dyn LogSink> {
    match FileLogSink::create(&ctx.log_path) {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            warn!(task = %ctx.task_name, error = %e, "task log file unavailable; logging to tracing");
            Arc::new(TracingLogSink::new(ctx.task_name.clone()))
        }
    }
}

async fn cancel_all(running: &HashMap<TaskName, RunningTask>) {
    for (name, entry) in running {
        if let Err(e) = entry.task.cancel().await {
            error!(task = %name, error = %e, "failed to cancel task");
        }
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}
