// src/task/dependent.rs

//! Task that waits until upstream workflow runs satisfy its dependency
//! configuration.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::Stopper;
use crate::dependent::{
    DependentExecute, DependentParameters, ProcessInstanceStore, depend_result_for_relation,
};
use crate::errors::Result;
use crate::exec::TaskExecutionContext;
use crate::task::params::TaskParams;
use crate::task::{TaskEnvironment, TaskExecutor, TaskFuture};
use crate::types::{
    DependResult, EXIT_CODE_FAILURE, EXIT_CODE_KILL, EXIT_CODE_SUCCESS, ExecutionStatus,
};

#[derive(Debug, Default)]
struct PollState {
    executes: Vec<DependentExecute>,
    /// Item keys already reported as complete.
    completed: BTreeSet<String>,
}

/// Polls the process store until every dependency group is decided.
#[derive(Debug)]
pub struct DependentTask {
    ctx: TaskExecutionContext,
    params: DependentParameters,
    store: Arc<dyn ProcessInstanceStore>,
    stopper: Stopper,
    cancel: CancellationToken,
    poll_interval: Duration,
    wait_budget: Duration,
    state: Mutex<PollState>,
}

impl DependentTask {
    pub fn new(ctx: TaskExecutionContext, params: DependentParameters, env: &TaskEnvironment) -> Self {
        Self {
            ctx,
            params,
            store: Arc::clone(&env.store),
            stopper: env.stopper.clone(),
            cancel: CancellationToken::new(),
            poll_interval: env.dependent.poll_interval,
            wait_budget: env.dependent.wait_budget,
            state: Mutex::new(PollState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PollState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Item keys reported as complete so far, sorted.
    pub fn completed_items(&self) -> Vec<String> {
        self.lock().completed.iter().cloned().collect()
    }

    /// Combined verdict of all groups as evaluated so far.
    pub fn depend_result(&self) -> DependResult {
        let state = self.lock();
        let results: Vec<DependResult> = state.executes.iter().map(|e| e.model_result()).collect();
        depend_result_for_relation(self.params.relation, &results)
    }

    /// Evaluate every group once. True when all groups are decided.
    fn all_groups_finished(&self) -> Result<bool> {
        let reference = self.ctx.reference_time();
        let mut state = self.lock();
        let PollState { executes, completed } = &mut *state;

        let mut finished = true;
        for execute in executes.iter_mut() {
            if !execute.finish(self.store.as_ref(), reference)? {
                finished = false;
            }
            for (key, result) in execute.depend_result_map() {
                if completed.insert(key.clone()) {
                    info!(task = %self.ctx.task_name, item = %key, result = %result, "dependent item complete");
                }
            }
        }
        Ok(finished)
    }

    async fn poll_until_decided(&self) -> i32 {
        while self.stopper.is_running() {
            match self.store.find_task_instance(self.ctx.task_instance_id) {
                Ok(None) => {
                    error!(
                        task = %self.ctx.task_name,
                        task_instance_id = self.ctx.task_instance_id,
                        "task instance not found"
                    );
                    return EXIT_CODE_FAILURE;
                }
                Ok(Some(instance)) if instance.state == ExecutionStatus::Kill => {
                    info!(task = %self.ctx.task_name, "task instance marked killed");
                    self.cancel.cancel();
                }
                Ok(Some(_)) => {}
                Err(e) => {
                    error!(task = %self.ctx.task_name, error = %e, "task instance lookup failed");
                    return EXIT_CODE_FAILURE;
                }
            }

            if self.cancel.is_cancelled() {
                break;
            }

            match self.all_groups_finished() {
                Ok(true) => break,
                Ok(false) => debug!(task = %self.ctx.task_name, "dependencies still waiting"),
                Err(e) => {
                    error!(task = %self.ctx.task_name, error = %e, "dependency evaluation failed");
                    return EXIT_CODE_FAILURE;
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {}
                _ = self.stopper.stopped() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        if self.cancel.is_cancelled() {
            return EXIT_CODE_KILL;
        }

        let result = self.depend_result();
        info!(task = %self.ctx.task_name, result = %result, "dependent task finished");
        if result == DependResult::Success {
            EXIT_CODE_SUCCESS
        } else {
            EXIT_CODE_FAILURE
        }
    }
}

impl TaskExecutor for DependentTask {
    fn init(&mut self) -> Result<()> {
        self.params.validate()?;
        let executes = self
            .params
            .depend_task_list
            .iter()
            .map(|model| DependentExecute::from_model(model).with_wait_budget(self.wait_budget))
            .collect();
        self.lock().executes = executes;
        info!(
            task = %self.ctx.task_name,
            groups = self.params.depend_task_list.len(),
            "dependent task initialised"
        );
        Ok(())
    }

    fn execute(&self) -> TaskFuture<'_, i32> {
        Box::pin(async move { Ok(self.poll_until_decided().await) })
    }

    fn cancel(&self) -> TaskFuture<'_, ()> {
        Box::pin(async move {
            if self.cancel.is_cancelled() {
                warn!(task = %self.ctx.task_name, "dependent task already cancelled");
            }
            self.cancel.cancel();
            Ok(())
        })
    }

    fn parameters(&self) -> TaskParams {
        TaskParams::Dependent(self.params.clone())
    }
}
