#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dagflow::config::{DependentSettings, ExecutorSettings, WorkerSettings};
use dagflow::context::Stopper;
use dagflow::dependent::ProcessInstanceStore;
use dagflow::exec::{ClusterJobClient, TaskExecutionContext};
use dagflow::task::TaskEnvironment;

pub use dagflow_test_utils::init_tracing;

/// Executor settings with short intervals so tests stay fast.
pub fn fast_executor_settings() -> ExecutorSettings {
    ExecutorSettings {
        log_flush_rows: 2,
        log_flush_interval: Duration::from_millis(50),
        job_poll_interval: Duration::from_millis(20),
        kill_grace_period: Duration::from_millis(200),
    }
}

pub fn fast_dependent_settings() -> DependentSettings {
    DependentSettings {
        poll_interval: Duration::from_millis(20),
        wait_budget: Duration::ZERO,
    }
}

pub fn environment(
    store: Arc<dyn ProcessInstanceStore>,
    jobs: Arc<dyn ClusterJobClient>,
    stopper: Stopper,
) -> TaskEnvironment {
    TaskEnvironment {
        executor: fast_executor_settings(),
        dependent: fast_dependent_settings(),
        use_sudo: false,
        jobs,
        store,
        stopper,
    }
}

pub fn worker_settings(exec_dir: &Path) -> WorkerSettings {
    WorkerSettings {
        exec_base_dir: exec_dir.to_path_buf(),
        ..WorkerSettings::default()
    }
}

pub fn task_context(dir: &Path, name: &str) -> TaskExecutionContext {
    TaskExecutionContext::new(1, 1, name, dir)
}
