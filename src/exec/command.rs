// src/exec/command.rs

//! Supervision of one task process.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, anyhow};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ExecutorSettings;
use crate::context::Stopper;
use crate::errors::Result;
use crate::exec::cluster::{ClusterJobClient, JobState, find_app_ids};
use crate::exec::context::TaskExecutionContext;
use crate::exec::log_buffer::LogBuffer;
use crate::exec::sink::LogSink;
use crate::types::{EXIT_CODE_FAILURE, EXIT_CODE_KILL, EXIT_CODE_SUCCESS};

/// Lifecycle of a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Build,
    /// `run` was called; the script is being written or the process spawned.
    Starting,
    Running,
    Exited,
    TimedOut,
    Killed,
}

impl ExecutorState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutorState::Exited | ExecutorState::TimedOut | ExecutorState::Killed
        )
    }
}

/// Outcome of [`CommandExecutor::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandExecuteResult {
    /// OS process id; 0 when nothing was spawned.
    pub process_id: u32,
    /// Cluster job ids found in the output.
    pub app_ids: Vec<String>,
    pub exit_status_code: i32,
}

enum WaitOutcome {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

enum JobsVerdict {
    Succeeded,
    Failed,
    Cancelled,
}

/// Runs a command as a script under the tenant, streams its output through
/// a [`LogBuffer`], enforces the timeout and follows submitted cluster jobs.
///
/// One executor supervises one attempt. [`CommandExecutor::cancel_application`]
/// may be called from another task while [`CommandExecutor::run`] is in
/// progress.
#[derive(Debug)]
pub struct CommandExecutor {
    ctx: TaskExecutionContext,
    settings: ExecutorSettings,
    use_sudo: bool,
    buffer: Arc<LogBuffer>,
    jobs: Arc<dyn ClusterJobClient>,
    stopper: Stopper,
    cancel: CancellationToken,
    state: watch::Sender<ExecutorState>,
    pid: AtomicU32,
    app_ids: Arc<Mutex<Vec<String>>>,
}

impl CommandExecutor {
    pub fn new(
        ctx: TaskExecutionContext,
        settings: ExecutorSettings,
        sink: Arc<dyn LogSink>,
        jobs: Arc<dyn ClusterJobClient>,
        stopper: Stopper,
    ) -> Self {
        let buffer = LogBuffer::new(sink, settings.log_flush_rows, settings.log_flush_interval);
        let (state, _) = watch::channel(ExecutorState::Build);
        Self {
            ctx,
            settings,
            use_sudo: false,
            buffer: Arc::new(buffer),
            jobs,
            stopper,
            cancel: CancellationToken::new(),
            state,
            pid: AtomicU32::new(0),
            app_ids: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Run through `sudo -u <tenant>`.
    pub fn with_sudo(mut self, use_sudo: bool) -> Self {
        self.use_sudo = use_sudo;
        self
    }

    pub fn context(&self) -> &TaskExecutionContext {
        &self.ctx
    }

    pub fn state(&self) -> ExecutorState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ExecutorState> {
        self.state.subscribe()
    }

    pub fn process_id(&self) -> u32 {
        self.pid.load(Ordering::SeqCst)
    }

    pub fn app_ids(&self) -> Vec<String> {
        self.app_ids.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Run `command` to completion, time-out or cancellation.
    ///
    /// An empty command is a successful no-op. An exhausted timeout fails
    /// with [`DagflowError::Timeout`] before anything is spawned; a timeout
    /// reached while waiting kills the process and yields the failure exit
    /// code. After [`CommandExecutor::cancel_application`] nothing is
    /// spawned and the kill exit code is returned.
    pub async fn run(&self, command: &str) -> Result<CommandExecuteResult> {
        if command.trim().is_empty() {
            info!(task = %self.ctx.task_name, "empty command; nothing to run");
            return Ok(CommandExecuteResult::default());
        }
        if self.state() != ExecutorState::Build {
            return Err(anyhow!("executor for task '{}' was already used", self.ctx.task_name).into());
        }

        let remaining = match self.ctx.remaining_time() {
            Ok(remaining) => remaining,
            Err(e) => {
                error!(task = %self.ctx.task_name, error = %e, "no time left to start task");
                self.state.send_replace(ExecutorState::TimedOut);
                return Err(e);
            }
        };

        if self.cancel.is_cancelled() {
            info!(task = %self.ctx.task_name, "task cancelled before start");
            self.state.send_replace(ExecutorState::Killed);
            return Ok(cancelled_result());
        }
        self.state.send_replace(ExecutorState::Starting);

        let result = self.supervise(command, remaining).await;

        self.state.send_if_modified(|state| {
            if matches!(*state, ExecutorState::Starting | ExecutorState::Running) {
                *state = ExecutorState::Exited;
                true
            } else {
                false
            }
        });
        self.buffer.flush();
        result
    }

    async fn supervise(
        &self,
        command: &str,
        remaining: Option<Duration>,
    ) -> Result<CommandExecuteResult> {
        let script = self.write_script(command).await?;
        if self.cancel.is_cancelled() {
            info!(task = %self.ctx.task_name, "task cancelled before spawn");
            self.state.send_replace(ExecutorState::Killed);
            return Ok(cancelled_result());
        }

        let mut child = self
            .build_command(&script)
            .spawn()
            .with_context(|| format!("spawning process for task '{}'", self.ctx.task_name))?;

        let pid = child.id().unwrap_or(0);
        self.pid.store(pid, Ordering::SeqCst);

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(self.spawn_reader(stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(self.spawn_reader(stderr));
        }

        self.state.send_replace(ExecutorState::Running);
        info!(
            task = %self.ctx.task_name,
            pid,
            app_id = %self.ctx.app_id(),
            timeout = ?remaining,
            "task process started"
        );

        let outcome = tokio::select! {
            status = child.wait() => WaitOutcome::Exited(
                status.with_context(|| format!("waiting for task '{}'", self.ctx.task_name))?,
            ),
            _ = sleep_or_forever(remaining) => WaitOutcome::TimedOut,
            _ = self.cancel.cancelled() => WaitOutcome::Cancelled,
        };

        let (mut state, mut exit_code) = match outcome {
            WaitOutcome::Exited(status) => {
                let code = exit_code_of(status);
                info!(task = %self.ctx.task_name, pid, exit_code = code, "task process exited");
                (ExecutorState::Exited, code)
            }
            WaitOutcome::TimedOut => {
                warn!(task = %self.ctx.task_name, pid, "task timed out; killing process");
                self.terminate(&mut child, pid).await;
                (ExecutorState::TimedOut, EXIT_CODE_FAILURE)
            }
            WaitOutcome::Cancelled => {
                info!(task = %self.ctx.task_name, pid, "task cancelled; killing process");
                self.terminate(&mut child, pid).await;
                (ExecutorState::Killed, EXIT_CODE_KILL)
            }
        };

        for reader in readers {
            if tokio::time::timeout(self.settings.kill_grace_period, reader)
                .await
                .is_err()
            {
                warn!(task = %self.ctx.task_name, "output reader did not finish after exit");
            }
        }
        self.buffer.flush();

        let app_ids = self.app_ids();
        if state == ExecutorState::Exited && exit_code == EXIT_CODE_SUCCESS && !app_ids.is_empty()
        {
            match self.wait_for_jobs(&app_ids).await {
                JobsVerdict::Succeeded => {}
                JobsVerdict::Failed => exit_code = EXIT_CODE_FAILURE,
                JobsVerdict::Cancelled => {
                    state = ExecutorState::Killed;
                    exit_code = EXIT_CODE_KILL;
                }
            }
        }

        self.state.send_replace(state);
        Ok(CommandExecuteResult {
            process_id: pid,
            app_ids,
            exit_status_code: exit_code,
        })
    }

    /// Kill the running process and any cluster jobs it submitted.
    ///
    /// Flushes buffered output first. A cancel before or during start-up
    /// keeps the process from being spawned. A no-op once the executor has
    /// finished, so repeated calls are harmless. Returns once a started run
    /// is over.
    pub async fn cancel_application(&self) -> Result<()> {
        self.buffer.flush();

        let mut state_rx = self.state.subscribe();
        let current = *state_rx.borrow_and_update();
        if current.is_terminal() {
            debug!(task = %self.ctx.task_name, state = ?current, "nothing to cancel");
            return Ok(());
        }

        self.cancel.cancel();
        if current == ExecutorState::Build {
            debug!(task = %self.ctx.task_name, "cancelled before run");
            return Ok(());
        }
        state_rx
            .wait_for(|state| state.is_terminal())
            .await
            .map(|_| ())
            .context("executor state channel closed")?;

        let app_ids = self.app_ids();
        if !app_ids.is_empty() {
            if let Err(e) = self.jobs.kill_applications(&app_ids).await {
                warn!(task = %self.ctx.task_name, ?app_ids, error = %e, "failed to kill cluster jobs");
            }
        }
        Ok(())
    }

    /// Soft kill, then hard kill if the process outlives the grace period.
    async fn terminate(&self, child: &mut Child, pid: u32) {
        if pid == 0 {
            error!(task = %self.ctx.task_name, "process id is 0; nothing to kill");
            return;
        }

        self.signal(pid, "TERM").await;
        match tokio::time::timeout(self.settings.kill_grace_period, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(pid, %status, "process ended after soft kill");
                return;
            }
            Ok(Err(e)) => warn!(pid, error = %e, "failed to wait for process after soft kill"),
            Err(_) => warn!(pid, "process still alive after soft kill"),
        }

        self.signal(pid, "KILL").await;
        if let Err(e) = child.kill().await {
            warn!(pid, error = %e, "failed to destroy process handle");
        }
    }

    /// Signal the process group led by `pid`.
    async fn signal(&self, pid: u32, signal: &str) {
        let kill = format!("kill -s {signal} -- -{pid}");
        let mut cmd = if self.use_sudo {
            let mut c = Command::new("sudo");
            c.args(["sh", "-c", kill.as_str()]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", kill.as_str()]);
            c
        };
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        match cmd.status().await {
            Ok(status) if status.success() => debug!(pid, signal, "signal sent"),
            Ok(status) => debug!(pid, signal, %status, "kill reported failure"),
            Err(e) => warn!(pid, signal, error = %e, "failed to run kill"),
        }
    }

    async fn wait_for_jobs(&self, app_ids: &[String]) -> JobsVerdict {
        info!(task = %self.ctx.task_name, ?app_ids, "waiting for cluster jobs");

        while self.stopper.is_running() {
            let mut all_succeeded = true;
            for app_id in app_ids {
                match self.jobs.application_status(app_id).await {
                    Ok(state) if state.is_bad() => {
                        warn!(%app_id, ?state, "cluster job did not succeed");
                        return JobsVerdict::Failed;
                    }
                    Ok(JobState::Succeeded) => {}
                    Ok(_) => all_succeeded = false,
                    Err(e) => {
                        warn!(%app_id, error = %e, "failed to query cluster job");
                        all_succeeded = false;
                    }
                }
            }
            if all_succeeded {
                info!(task = %self.ctx.task_name, "all cluster jobs succeeded");
                return JobsVerdict::Succeeded;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return JobsVerdict::Cancelled,
                _ = self.stopper.stopped() => {}
                _ = tokio::time::sleep(self.settings.job_poll_interval) => {}
            }
        }

        warn!(task = %self.ctx.task_name, "stopped while waiting for cluster jobs");
        JobsVerdict::Failed
    }

    async fn write_script(&self, command: &str) -> Result<PathBuf> {
        let dir = &self.ctx.execute_path;
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating execute path {}", dir.display()))?;

        let mut body = String::from("#!/bin/sh\nexec 2>&1\n");
        if let Some(env_file) = self.ctx.env_file.as_ref().filter(|p| p.exists()) {
            body.push_str(&format!(". {}\n", shell_quote(env_file)));
        }
        body.push_str(&format!("cd {}\n", shell_quote(dir)));
        body.push_str(command);
        body.push('\n');

        let path = self.ctx.script_path();
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("writing task script {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .await
                .with_context(|| format!("making {} executable", path.display()))?;
        }

        debug!(script = %path.display(), "task script written");
        Ok(path)
    }

    fn build_command(&self, script: &Path) -> Command {
        let mut cmd = if self.use_sudo {
            let mut c = Command::new("sudo");
            c.args(["-u", self.ctx.tenant.as_str(), "-E", "sh"]).arg(script);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg(script);
            c
        };

        cmd.current_dir(&self.ctx.execute_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }

    fn spawn_reader<R>(&self, stream: R) -> tokio::task::JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::clone(&self.buffer);
        let app_ids = Arc::clone(&self.app_ids);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        record_app_ids(&app_ids, &line);
                        buffer.append(line);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "failed to read task output");
                        break;
                    }
                }
            }
        })
    }
}

fn cancelled_result() -> CommandExecuteResult {
    CommandExecuteResult {
        exit_status_code: EXIT_CODE_KILL,
        ..CommandExecuteResult::default()
    }
}

fn record_app_ids(app_ids: &Mutex<Vec<String>>, line: &str) {
    let mut ids = app_ids.lock().unwrap_or_else(|e| e.into_inner());
    for id in find_app_ids(line) {
        if !ids.iter().any(|known| known == id) {
            debug!(app_id = %id, "found cluster job id");
            ids.push(id.to_string());
        }
    }
}

async fn sleep_or_forever(duration: Option<Duration>) {
    match duration {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}

fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    EXIT_CODE_FAILURE
}

fn shell_quote(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!ExecutorState::Build.is_terminal());
        assert!(!ExecutorState::Starting.is_terminal());
        assert!(!ExecutorState::Running.is_terminal());
        assert!(ExecutorState::TimedOut.is_terminal());
        assert!(ExecutorState::Killed.is_terminal());
    }

    #[test]
    fn records_each_app_id_once() {
        let ids = Mutex::new(Vec::new());
        record_app_ids(&ids, "submitted application_1_1");
        record_app_ids(&ids, "tracking application_1_1 and application_1_2");
        assert_eq!(*ids.lock().unwrap(), vec!["application_1_1", "application_1_2"]);
    }

    #[test]
    fn quotes_paths_for_the_shell() {
        assert_eq!(shell_quote(Path::new("/tmp/a b")), "'/tmp/a b'");
        assert_eq!(shell_quote(Path::new("/tmp/it's")), r"'/tmp/it'\''s'");
    }
}
