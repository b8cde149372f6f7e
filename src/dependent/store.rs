// src/dependent/store.rs

//! Process-instance query collaborator used by dependency evaluation.

use std::fmt::Debug;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::NaiveDateTime;

use crate::dependent::date_window::DateInterval;
use crate::errors::Result;
use crate::types::ExecutionStatus;

/// One run of a workflow definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessInstance {
    pub id: i64,
    pub definition_id: i64,
    pub state: ExecutionStatus,
    /// Scheduled fire time; `None` for runs without a schedule.
    pub schedule_time: Option<NaiveDateTime>,
    pub start_time: NaiveDateTime,
    pub end_time: Option<NaiveDateTime>,
    /// Started by hand rather than by the scheduler.
    pub manual: bool,
}

/// One task attempt inside a process instance.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskInstance {
    pub id: i64,
    pub process_instance_id: i64,
    pub name: String,
    pub state: ExecutionStatus,
    pub start_time: NaiveDateTime,
    pub end_time: Option<NaiveDateTime>,
}

/// Read access to stored process and task instances.
///
/// Lookups for absent data return `Ok(None)` or an empty list. `Err` is
/// reserved for an unavailable store.
pub trait ProcessInstanceStore: Send + Sync + Debug {
    /// Most recently started instance of `definition_id` that is still
    /// running and started inside `window`.
    fn find_last_running_process(
        &self,
        definition_id: i64,
        window: &DateInterval,
    ) -> Result<Option<ProcessInstance>>;

    /// Latest-ending scheduled instance whose schedule time lies in `window`.
    fn find_last_scheduled_process(
        &self,
        definition_id: i64,
        window: &DateInterval,
    ) -> Result<Option<ProcessInstance>>;

    /// Latest-ending manual instance that started inside `window`.
    fn find_last_manual_process(
        &self,
        definition_id: i64,
        window: &DateInterval,
    ) -> Result<Option<ProcessInstance>>;

    /// Task instances of a process instance, latest attempt per task name.
    fn find_valid_task_instances(&self, process_instance_id: i64) -> Result<Vec<TaskInstance>>;

    fn find_task_instance(&self, task_instance_id: i64) -> Result<Option<TaskInstance>>;
}

#[derive(Debug, Default)]
struct StoreInner {
    processes: Vec<ProcessInstance>,
    tasks: Vec<TaskInstance>,
    next_process_id: i64,
    next_task_id: i64,
}

/// In-memory [`ProcessInstanceStore`] used by the local runner and tests.
#[derive(Debug, Default)]
pub struct MemoryProcessStore {
    inner: RwLock<StoreInner>,
}

impl MemoryProcessStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert or replace a process instance. An id of 0 is assigned a fresh
    /// id, which is returned.
    pub fn upsert_process(&self, mut process: ProcessInstance) -> i64 {
        let mut inner = self.write();
        if process.id == 0 {
            inner.next_process_id += 1;
            process.id = inner.next_process_id;
        } else {
            inner.next_process_id = inner.next_process_id.max(process.id);
        }
        let id = process.id;
        match inner.processes.iter_mut().find(|p| p.id == id) {
            Some(existing) => *existing = process,
            None => inner.processes.push(process),
        }
        id
    }

    /// Insert or replace a task instance. An id of 0 is assigned a fresh id.
    pub fn upsert_task(&self, mut task: TaskInstance) -> i64 {
        let mut inner = self.write();
        if task.id == 0 {
            inner.next_task_id += 1;
            task.id = inner.next_task_id;
        } else {
            inner.next_task_id = inner.next_task_id.max(task.id);
        }
        let id = task.id;
        match inner.tasks.iter_mut().find(|t| t.id == id) {
            Some(existing) => *existing = task,
            None => inner.tasks.push(task),
        }
        id
    }

    /// Update the state of a process instance; returns false if unknown.
    pub fn set_process_state(
        &self,
        id: i64,
        state: ExecutionStatus,
        end_time: Option<NaiveDateTime>,
    ) -> bool {
        let mut inner = self.write();
        match inner.processes.iter_mut().find(|p| p.id == id) {
            Some(process) => {
                process.state = state;
                process.end_time = end_time;
                true
            }
            None => false,
        }
    }

    /// Update the state of a task instance; returns false if unknown.
    pub fn set_task_state(
        &self,
        id: i64,
        state: ExecutionStatus,
        end_time: Option<NaiveDateTime>,
    ) -> bool {
        let mut inner = self.write();
        match inner.tasks.iter_mut().find(|t| t.id == id) {
            Some(task) => {
                task.state = state;
                task.end_time = end_time;
                true
            }
            None => false,
        }
    }

    pub fn process(&self, id: i64) -> Option<ProcessInstance> {
        self.read().processes.iter().find(|p| p.id == id).cloned()
    }
}

fn latest_ending<'a>(
    candidates: impl Iterator<Item = &'a ProcessInstance>,
) -> Option<ProcessInstance> {
    candidates.max_by_key(|p| (p.end_time, p.id)).cloned()
}

impl ProcessInstanceStore for MemoryProcessStore {
    fn find_last_running_process(
        &self,
        definition_id: i64,
        window: &DateInterval,
    ) -> Result<Option<ProcessInstance>> {
        let inner = self.read();
        Ok(inner
            .processes
            .iter()
            .filter(|p| p.definition_id == definition_id)
            .filter(|p| !p.state.is_finished() && window.contains(p.start_time))
            .max_by_key(|p| (p.start_time, p.id))
            .cloned())
    }

    fn find_last_scheduled_process(
        &self,
        definition_id: i64,
        window: &DateInterval,
    ) -> Result<Option<ProcessInstance>> {
        let inner = self.read();
        Ok(latest_ending(inner.processes.iter().filter(|p| {
            p.definition_id == definition_id
                && !p.manual
                && p.schedule_time.is_some_and(|t| window.contains(t))
        })))
    }

    fn find_last_manual_process(
        &self,
        definition_id: i64,
        window: &DateInterval,
    ) -> Result<Option<ProcessInstance>> {
        let inner = self.read();
        Ok(latest_ending(inner.processes.iter().filter(|p| {
            p.definition_id == definition_id && p.manual && window.contains(p.start_time)
        })))
    }

    fn find_valid_task_instances(&self, process_instance_id: i64) -> Result<Vec<TaskInstance>> {
        let inner = self.read();
        let mut latest: Vec<TaskInstance> = Vec::new();
        for task in inner
            .tasks
            .iter()
            .filter(|t| t.process_instance_id == process_instance_id)
        {
            match latest.iter_mut().find(|t| t.name == task.name) {
                Some(existing) if existing.id < task.id => *existing = task.clone(),
                Some(_) => {}
                None => latest.push(task.clone()),
            }
        }
        Ok(latest)
    }

    fn find_task_instance(&self, task_instance_id: i64) -> Result<Option<TaskInstance>> {
        Ok(self
            .read()
            .tasks
            .iter()
            .find(|t| t.id == task_instance_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn process(definition_id: i64, state: ExecutionStatus, start: &str, manual: bool) -> ProcessInstance {
        ProcessInstance {
            id: 0,
            definition_id,
            state,
            schedule_time: (!manual).then(|| at(start)),
            start_time: at(start),
            end_time: state.is_finished().then(|| at(start)),
            manual,
        }
    }

    #[test]
    fn assigns_ids_and_filters_by_window() {
        let store = MemoryProcessStore::new();
        let first = store.upsert_process(process(1, ExecutionStatus::Success, "2023-03-15 01:00:00", false));
        let second = store.upsert_process(process(1, ExecutionStatus::RunningExecution, "2023-03-15 02:00:00", false));
        assert_eq!((first, second), (1, 2));

        let day = DateInterval::new(at("2023-03-15 00:00:00"), at("2023-03-16 00:00:00"));
        let running = store.find_last_running_process(1, &day).unwrap().unwrap();
        assert_eq!(running.id, second);

        let scheduled = store.find_last_scheduled_process(1, &day).unwrap().unwrap();
        assert_eq!(scheduled.id, first);
        assert!(store.find_last_manual_process(1, &day).unwrap().is_none());

        let other_day = DateInterval::new(at("2023-03-16 00:00:00"), at("2023-03-17 00:00:00"));
        assert!(store.find_last_scheduled_process(1, &other_day).unwrap().is_none());
    }

    #[test]
    fn valid_task_instances_keep_latest_attempt() {
        let store = MemoryProcessStore::new();
        let start = at("2023-03-15 01:00:00");
        for state in [ExecutionStatus::Failure, ExecutionStatus::Success] {
            store.upsert_task(TaskInstance {
                id: 0,
                process_instance_id: 5,
                name: "load".into(),
                state,
                start_time: start,
                end_time: Some(start),
            });
        }

        let tasks = store.find_valid_task_instances(5).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].state, ExecutionStatus::Success);
        assert!(store.set_task_state(1, ExecutionStatus::Kill, None));
        assert_eq!(
            store.find_task_instance(1).unwrap().unwrap().state,
            ExecutionStatus::Kill
        );
    }
}
