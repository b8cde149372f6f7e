// src/dependent/execute.rs

//! Evaluation of one dependency group against the process-instance store.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use tracing::{debug, info};

use crate::dependent::date_window::DateInterval;
use crate::dependent::model::{DependentItem, DependentTaskModel};
use crate::dependent::store::{ProcessInstance, ProcessInstanceStore};
use crate::errors::Result;
use crate::types::{DependResult, DependentRelation, ExecutionStatus};

/// Combine verdicts with a relation.
///
/// - `AND`: FAILED if any item failed, WAITING if any item is still
///   waiting, SUCCESS otherwise (including the empty list).
/// - `OR`: SUCCESS if any item succeeded, WAITING if any item is still
///   waiting, FAILED otherwise (including the empty list).
pub fn depend_result_for_relation(
    relation: DependentRelation,
    results: &[DependResult],
) -> DependResult {
    let any = |wanted: DependResult| results.iter().any(|r| *r == wanted);
    match relation {
        DependentRelation::And if any(DependResult::Failed) => DependResult::Failed,
        DependentRelation::And if any(DependResult::Waiting) => DependResult::Waiting,
        DependentRelation::And => DependResult::Success,
        DependentRelation::Or if any(DependResult::Success) => DependResult::Success,
        DependentRelation::Or if any(DependResult::Waiting) => DependResult::Waiting,
        DependentRelation::Or => DependResult::Failed,
    }
}

/// Evaluator for one [`DependentTaskModel`].
///
/// Item verdicts are cached by [`DependentItem::key`] once terminal and are
/// never recomputed.
#[derive(Debug)]
pub struct DependentExecute {
    items: Vec<DependentItem>,
    relation: DependentRelation,
    model_result: DependResult,
    results: HashMap<String, DependResult>,
    created: Instant,
    wait_budget: Duration,
}

impl DependentExecute {
    pub fn new(items: Vec<DependentItem>, relation: DependentRelation) -> Self {
        Self {
            items,
            relation,
            model_result: DependResult::Waiting,
            results: HashMap::new(),
            created: Instant::now(),
            wait_budget: Duration::ZERO,
        }
    }

    pub fn from_model(model: &DependentTaskModel) -> Self {
        Self::new(model.depend_item_list.clone(), model.relation)
    }

    /// How long a missing upstream instance counts as WAITING before it
    /// counts as FAILED. Zero fails immediately.
    pub fn with_wait_budget(mut self, budget: Duration) -> Self {
        self.wait_budget = budget;
        self
    }

    pub fn items(&self) -> &[DependentItem] {
        &self.items
    }

    /// Last combined verdict computed for this group.
    pub fn model_result(&self) -> DependResult {
        self.model_result
    }

    /// Terminal verdicts observed so far, by item key.
    pub fn depend_result_map(&self) -> &HashMap<String, DependResult> {
        &self.results
    }

    /// Re-evaluate every item not yet terminal and combine with the group
    /// relation.
    pub fn get_model_depend_result(
        &mut self,
        store: &dyn ProcessInstanceStore,
        reference: NaiveDateTime,
    ) -> Result<DependResult> {
        let mut verdicts = Vec::with_capacity(self.items.len());

        for item in &self.items {
            let key = item.key();
            let verdict = match self.results.get(&key) {
                Some(cached) => *cached,
                None => {
                    let verdict = self.depend_result_for_item(store, item, reference)?;
                    if verdict.is_terminal() {
                        self.results.insert(key, verdict);
                    }
                    verdict
                }
            };
            verdicts.push(verdict);
        }

        self.model_result = depend_result_for_relation(self.relation, &verdicts);
        Ok(self.model_result)
    }

    /// Whether this group has reached a terminal verdict, evaluating once
    /// more if it has not.
    pub fn finish(
        &mut self,
        store: &dyn ProcessInstanceStore,
        reference: NaiveDateTime,
    ) -> Result<bool> {
        if self.model_result.is_terminal() {
            return Ok(true);
        }
        Ok(self.get_model_depend_result(store, reference)?.is_terminal())
    }

    /// Verdict of a single item: every resolved window must succeed.
    fn depend_result_for_item(
        &self,
        store: &dyn ProcessInstanceStore,
        item: &DependentItem,
        reference: NaiveDateTime,
    ) -> Result<DependResult> {
        let windows = item.date()?.intervals(reference);
        let mut result = DependResult::Failed;

        for window in &windows {
            result = match find_last_process_interval(store, item.definition_id, window)? {
                None => self.missing_instance_result(),
                Some(process) if item.depends_on_all_tasks() => {
                    depend_result_by_process(&process)
                }
                Some(process) => depend_result_by_task(store, &process, &item.dep_tasks)?,
            };

            debug!(
                item = %item.key(),
                window = %window,
                result = %result,
                "evaluated dependent item window"
            );

            if result != DependResult::Success {
                break;
            }
        }

        Ok(result)
    }

    fn missing_instance_result(&self) -> DependResult {
        if self.created.elapsed() < self.wait_budget {
            DependResult::Waiting
        } else {
            DependResult::Failed
        }
    }
}

/// A running instance wins; otherwise the later-ending of the last scheduled
/// and the last manual run.
fn find_last_process_interval(
    store: &dyn ProcessInstanceStore,
    definition_id: i64,
    window: &DateInterval,
) -> Result<Option<ProcessInstance>> {
    if let Some(running) = store.find_last_running_process(definition_id, window)? {
        return Ok(Some(running));
    }

    let scheduled = store.find_last_scheduled_process(definition_id, window)?;
    let manual = store.find_last_manual_process(definition_id, window)?;

    Ok(match (scheduled, manual) {
        (Some(scheduled), Some(manual)) => {
            if manual.end_time > scheduled.end_time {
                Some(manual)
            } else {
                Some(scheduled)
            }
        }
        (scheduled, manual) => scheduled.or(manual),
    })
}

fn result_for_state(state: ExecutionStatus) -> DependResult {
    if state.is_success() {
        DependResult::Success
    } else if state.is_finished() {
        DependResult::Failed
    } else {
        DependResult::Waiting
    }
}

fn depend_result_by_process(process: &ProcessInstance) -> DependResult {
    result_for_state(process.state)
}

fn depend_result_by_task(
    store: &dyn ProcessInstanceStore,
    process: &ProcessInstance,
    task_name: &str,
) -> Result<DependResult> {
    let tasks = store.find_valid_task_instances(process.id)?;

    match tasks.iter().find(|t| t.name == task_name) {
        Some(task) => Ok(result_for_state(task.state)),
        None if process.state.is_finished() => {
            info!(
                process_instance = process.id,
                task = %task_name,
                "dependent task not found in finished process instance"
            );
            Ok(DependResult::Failed)
        }
        None => Ok(DependResult::Waiting),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DependResult::{Failed, Success, Waiting};

    #[test]
    fn and_relation() {
        let and = |r: &[DependResult]| depend_result_for_relation(DependentRelation::And, r);
        assert_eq!(and(&[Success, Success, Waiting]), Waiting);
        assert_eq!(and(&[Success, Success, Failed]), Failed);
        assert_eq!(and(&[Success, Success, Success]), Success);
        assert_eq!(and(&[Waiting, Failed]), Failed);
        assert_eq!(and(&[]), Success);
    }

    #[test]
    fn or_relation() {
        let or = |r: &[DependResult]| depend_result_for_relation(DependentRelation::Or, r);
        assert_eq!(or(&[Failed, Failed, Success]), Success);
        assert_eq!(or(&[Failed, Failed, Waiting]), Waiting);
        assert_eq!(or(&[Failed, Failed]), Failed);
        assert_eq!(or(&[]), Failed);
    }

    #[test]
    fn state_classification() {
        assert_eq!(result_for_state(ExecutionStatus::ForcedSuccess), Success);
        assert_eq!(result_for_state(ExecutionStatus::Kill), Failed);
        assert_eq!(result_for_state(ExecutionStatus::RunningExecution), Waiting);
        assert_eq!(result_for_state(ExecutionStatus::SubmittedSuccess), Waiting);
    }
}
