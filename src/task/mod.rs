// src/task/mod.rs

//! Task kinds and the capability set they share.
//!
//! Every kind implements [`TaskExecutor`]. [`Task`] is the closed set of
//! kinds; [`Task::new`] is the one place where stored parameters select the
//! behaviour.

pub mod dependent;
pub mod params;
pub mod shell;
pub mod spark;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::config::{DependentSettings, ExecutorSettings};
use crate::context::Stopper;
use crate::dependent::ProcessInstanceStore;
use crate::errors::Result;
use crate::exec::{ClusterJobClient, CommandExecutor, LogSink, TaskExecutionContext};

pub use dependent::DependentTask;
pub use params::{ShellParameters, SparkParameters, TaskParams, TaskType};
pub use shell::ShellTask;
pub use spark::SparkTask;

/// Boxed future returned by [`TaskExecutor`] methods.
pub type TaskFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// What every task kind can do.
pub trait TaskExecutor: Send + Sync {
    /// Validate parameters and prepare state. Called once before `execute`.
    fn init(&mut self) -> Result<()>;

    /// Run the task to completion and return its exit code.
    fn execute(&self) -> TaskFuture<'_, i32>;

    /// Stop a running `execute`. Safe to call more than once.
    fn cancel(&self) -> TaskFuture<'_, ()>;

    fn parameters(&self) -> TaskParams;
}

/// Collaborators shared by all tasks of a node.
#[derive(Debug, Clone)]
pub struct TaskEnvironment {
    pub executor: ExecutorSettings,
    pub dependent: DependentSettings,
    pub use_sudo: bool,
    pub jobs: Arc<dyn ClusterJobClient>,
    pub store: Arc<dyn ProcessInstanceStore>,
    pub stopper: Stopper,
}

impl TaskEnvironment {
    /// Process supervisor for a command-based task.
    pub fn command_executor(
        &self,
        ctx: TaskExecutionContext,
        sink: Arc<dyn LogSink>,
    ) -> CommandExecutor {
        CommandExecutor::new(
            ctx,
            self.executor,
            sink,
            Arc::clone(&self.jobs),
            self.stopper.clone(),
        )
        .with_sudo(self.use_sudo)
    }
}

/// A task of one of the known kinds.
#[derive(Debug)]
pub enum Task {
    Shell(ShellTask),
    Spark(SparkTask),
    Dependent(DependentTask),
}

impl Task {
    pub fn new(
        ctx: TaskExecutionContext,
        params: TaskParams,
        env: &TaskEnvironment,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        match params {
            TaskParams::Shell(p) => Task::Shell(ShellTask::new(p, env.command_executor(ctx, sink))),
            TaskParams::Spark(p) => Task::Spark(SparkTask::new(p, env.command_executor(ctx, sink))),
            TaskParams::Dependent(p) => Task::Dependent(DependentTask::new(ctx, p, env)),
        }
    }

    fn as_executor(&self) -> &dyn TaskExecutor {
        match self {
            Task::Shell(t) => t,
            Task::Spark(t) => t,
            Task::Dependent(t) => t,
        }
    }

    pub fn task_type(&self) -> TaskType {
        match self {
            Task::Shell(_) => TaskType::Shell,
            Task::Spark(_) => TaskType::Spark,
            Task::Dependent(_) => TaskType::Dependent,
        }
    }
}

impl TaskExecutor for Task {
    fn init(&mut self) -> Result<()> {
        match self {
            Task::Shell(t) => t.init(),
            Task::Spark(t) => t.init(),
            Task::Dependent(t) => t.init(),
        }
    }

    fn execute(&self) -> TaskFuture<'_, i32> {
        self.as_executor().execute()
    }

    fn cancel(&self) -> TaskFuture<'_, ()> {
        self.as_executor().cancel()
    }

    fn parameters(&self) -> TaskParams {
        self.as_executor().parameters()
    }
}
