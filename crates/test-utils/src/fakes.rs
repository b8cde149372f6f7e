use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use dagflow::dependent::{DateInterval, ProcessInstance, ProcessInstanceStore, TaskInstance};
use dagflow::errors::{DagflowError, Result};
use dagflow::exec::cluster::JobFuture;
use dagflow::exec::{ClusterJobClient, JobState, LogSink};
use dagflow::registry::{FailoverHandler, MemoryRegistry, RegistryCenter};
use dagflow::types::NodeType;

/// Collects every flushed batch in memory.
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    batches: Mutex<Vec<Vec<String>>>,
}

impl MemoryLogSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn lines(&self) -> Vec<String> {
        self.batches.lock().unwrap().iter().flatten().cloned().collect()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }
}

impl LogSink for MemoryLogSink {
    fn handle(&self, lines: &[String]) -> Result<()> {
        self.batches.lock().unwrap().push(lines.to_vec());
        Ok(())
    }
}

/// Cluster client answering from a fixed table of job states.
///
/// Unknown jobs report `Running`. Kill requests are recorded.
#[derive(Debug, Default)]
pub struct FakeClusterJobClient {
    states: Mutex<HashMap<String, JobState>>,
    killed: Mutex<Vec<String>>,
    queries: Mutex<usize>,
}

impl FakeClusterJobClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_state(&self, app_id: &str, state: JobState) {
        self.states.lock().unwrap().insert(app_id.to_string(), state);
    }

    pub fn killed(&self) -> Vec<String> {
        self.killed.lock().unwrap().clone()
    }

    pub fn query_count(&self) -> usize {
        *self.queries.lock().unwrap()
    }
}

impl ClusterJobClient for FakeClusterJobClient {
    fn application_status<'a>(&'a self, app_id: &'a str) -> JobFuture<'a, JobState> {
        Box::pin(async move {
            *self.queries.lock().unwrap() += 1;
            Ok(self
                .states
                .lock()
                .unwrap()
                .get(app_id)
                .copied()
                .unwrap_or(JobState::Running))
        })
    }

    fn kill_applications<'a>(&'a self, app_ids: &'a [String]) -> JobFuture<'a, ()> {
        Box::pin(async move {
            self.killed.lock().unwrap().extend(app_ids.iter().cloned());
            Ok(())
        })
    }
}

/// Failover handler that records every call.
#[derive(Debug, Default)]
pub struct RecordingFailoverHandler {
    calls: Mutex<Vec<(NodeType, String)>>,
}

impl RecordingFailoverHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<(NodeType, String)> {
        self.calls.lock().unwrap().clone()
    }
}

impl FailoverHandler for RecordingFailoverHandler {
    fn failover(&self, node_type: NodeType, host: &str) -> Result<()> {
        self.calls.lock().unwrap().push((node_type, host.to_string()));
        Ok(())
    }
}

/// When [`FlakyRegistry`] reads fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadFailure {
    #[default]
    Never,
    Always,
    /// Only while this session holds a lock.
    WhileLocked,
}

/// Registry session whose reads can be made to fail, as during a lost
/// connection. Writes and locks go straight to the wrapped session.
#[derive(Debug)]
pub struct FlakyRegistry {
    inner: MemoryRegistry,
    mode: Mutex<ReadFailure>,
    locks_held: AtomicUsize,
}

impl FlakyRegistry {
    pub fn new(inner: MemoryRegistry) -> Arc<Self> {
        Arc::new(Self {
            inner,
            mode: Mutex::new(ReadFailure::Never),
            locks_held: AtomicUsize::new(0),
        })
    }

    pub fn set_reads(&self, mode: ReadFailure) {
        *self.mode.lock().unwrap() = mode;
    }

    fn check_read(&self) -> Result<()> {
        let failing = match *self.mode.lock().unwrap() {
            ReadFailure::Never => false,
            ReadFailure::Always => true,
            ReadFailure::WhileLocked => self.locks_held.load(Ordering::SeqCst) > 0,
        };
        if failing {
            Err(DagflowError::Registry("connection lost".into()))
        } else {
            Ok(())
        }
    }
}

impl RegistryCenter for FlakyRegistry {
    fn is_existed(&self, key: &str) -> Result<bool> {
        self.check_read()?;
        self.inner.is_existed(key)
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_read()?;
        self.inner.get(key)
    }

    fn get_children_keys(&self, key: &str) -> Result<Vec<String>> {
        self.check_read()?;
        self.inner.get_children_keys(key)
    }

    fn persist(&self, key: &str, value: &str) -> Result<()> {
        self.inner.persist(key, value)
    }

    fn persist_ephemeral(&self, key: &str, value: &str) -> Result<()> {
        self.inner.persist_ephemeral(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.inner.remove(key)
    }

    fn acquire_lock(&self, key: &str) -> Result<()> {
        self.inner.acquire_lock(key)?;
        self.locks_held.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release_lock(&self, key: &str) -> Result<()> {
        self.inner.release_lock(key)?;
        self.locks_held.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.inner.close()
    }
}

/// Store whose every query fails, as an unreachable database would.
#[derive(Debug, Default)]
pub struct UnavailableStore;

impl UnavailableStore {
    fn down<T>() -> Result<T> {
        Err(DagflowError::Other(anyhow::anyhow!("process store unavailable")))
    }
}

impl ProcessInstanceStore for UnavailableStore {
    fn find_last_running_process(&self, _: i64, _: &DateInterval) -> Result<Option<ProcessInstance>> {
        Self::down()
    }

    fn find_last_scheduled_process(&self, _: i64, _: &DateInterval) -> Result<Option<ProcessInstance>> {
        Self::down()
    }

    fn find_last_manual_process(&self, _: i64, _: &DateInterval) -> Result<Option<ProcessInstance>> {
        Self::down()
    }

    fn find_valid_task_instances(&self, _: i64) -> Result<Vec<TaskInstance>> {
        Self::down()
    }

    fn find_task_instance(&self, _: i64) -> Result<Option<TaskInstance>> {
        Self::down()
    }
}
