// src/engine/mod.rs

//! Local workflow engine.
//!
//! Runs one workflow definition to completion on this node:
//! - the pure state machine lives in [`core`] (which tasks are ready, what a
//!   failure does to downstream tasks, the final workflow state);
//! - the async shell in [`runner`] launches tasks, records instances in the
//!   process store and reacts to stop requests and the workflow timeout.

use crate::types::{EXIT_CODE_KILL, EXIT_CODE_SUCCESS, ExecutionStatus};

/// Canonical task name type used throughout the engine.
pub type TaskName = String;

/// Final outcome of one task in a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded,
    Failed(i32),
    Killed,
    /// Not run because its run flag is `FORBIDDEN`; counts as success.
    Forbidden,
    /// Not run because an upstream task did not succeed or the run stopped.
    Skipped,
}

impl TaskOutcome {
    pub fn from_exit_code(code: i32) -> Self {
        match code {
            EXIT_CODE_SUCCESS => TaskOutcome::Succeeded,
            EXIT_CODE_KILL => TaskOutcome::Killed,
            other => TaskOutcome::Failed(other),
        }
    }

    /// Whether downstream tasks may start after this outcome.
    pub fn satisfies_dependents(self) -> bool {
        matches!(self, TaskOutcome::Succeeded | TaskOutcome::Forbidden)
    }

    /// State recorded for the task instance; `None` for tasks never run.
    pub fn execution_status(self) -> Option<ExecutionStatus> {
        match self {
            TaskOutcome::Succeeded => Some(ExecutionStatus::Success),
            TaskOutcome::Failed(_) => Some(ExecutionStatus::Failure),
            TaskOutcome::Killed => Some(ExecutionStatus::Kill),
            TaskOutcome::Forbidden | TaskOutcome::Skipped => None,
        }
    }
}

pub mod core;
pub mod runner;

pub use core::RunCore;
pub use runner::{WorkflowReport, WorkflowRunner};
