// src/engine/core.rs

//! Pure run-state machine for one workflow run.
//!
//! No Tokio types, no processes and no store access: the runner feeds task
//! completions in and asks which tasks may start.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::dag::{WorkflowDag, WorkflowDefinition, build_dag};
use crate::engine::{TaskName, TaskOutcome};
use crate::errors::Result;
use crate::types::ExecutionStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Pending,
    Running,
    Done(TaskOutcome),
}

/// Run state of every task in a workflow.
#[derive(Debug)]
pub struct RunCore {
    /// Topological order; ready tasks are handed out in this order.
    order: Vec<TaskName>,
    predecessors: HashMap<TaskName, HashSet<TaskName>>,
    successors: HashMap<TaskName, HashSet<TaskName>>,
    forbidden: HashSet<TaskName>,
    states: HashMap<TaskName, NodeState>,
    stopping: bool,
}

impl RunCore {
    /// Fails when the graph has a cycle.
    pub fn new(dag: &WorkflowDag, forbidden: HashSet<TaskName>) -> Result<Self> {
        let order = dag.topological_sort()?;
        let predecessors = order
            .iter()
            .map(|n| (n.clone(), dag.get_previous_nodes(n)))
            .collect();
        let successors = order
            .iter()
            .map(|n| (n.clone(), dag.get_subsequent_nodes(n)))
            .collect();
        let states = order
            .iter()
            .map(|n| (n.clone(), NodeState::Pending))
            .collect();

        Ok(Self {
            order,
            predecessors,
            successors,
            forbidden,
            states,
            stopping: false,
        })
    }

    pub fn from_definition(definition: &WorkflowDefinition) -> Result<Self> {
        let dag = build_dag(definition)?;
        let forbidden = definition
            .tasks
            .iter()
            .filter(|t| t.is_forbidden())
            .map(|t| t.name.clone())
            .collect();
        Self::new(&dag, forbidden)
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    /// Tasks whose predecessors all satisfied their dependents, in
    /// topological order. They are marked running.
    ///
    /// Forbidden tasks never start: they complete as
    /// [`TaskOutcome::Forbidden`] as soon as they become ready.
    pub fn take_ready(&mut self) -> Vec<TaskName> {
        if self.stopping {
            return Vec::new();
        }

        let mut ready = Vec::new();
        // One pass over the topological order sees every predecessor first,
        // so forbidden chains resolve in a single call.
        for name in &self.order {
            if self.states.get(name) != Some(&NodeState::Pending) {
                continue;
            }
            let unblocked = self.predecessors.get(name).is_none_or(|preds| {
                preds.iter().all(|p| {
                    matches!(self.states.get(p), Some(NodeState::Done(o)) if o.satisfies_dependents())
                })
            });
            if !unblocked {
                continue;
            }
            if self.forbidden.contains(name) {
                debug!(task = %name, "skipping forbidden task");
                self.states
                    .insert(name.clone(), NodeState::Done(TaskOutcome::Forbidden));
            } else {
                self.states.insert(name.clone(), NodeState::Running);
                ready.push(name.clone());
            }
        }
        ready
    }

    /// Record the outcome of a task. A task that does not satisfy its
    /// dependents skips everything downstream that has not started.
    pub fn complete(&mut self, name: &str, outcome: TaskOutcome) {
        let Some(state) = self.states.get_mut(name) else {
            return;
        };
        *state = NodeState::Done(outcome);

        if outcome.satisfies_dependents() {
            return;
        }

        let mut stack: Vec<TaskName> = self
            .successors
            .get(name)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        while let Some(next) = stack.pop() {
            if self.states.get(&next) == Some(&NodeState::Pending) {
                debug!(task = %next, upstream = %name, "skipping downstream task");
                self.states
                    .insert(next.clone(), NodeState::Done(TaskOutcome::Skipped));
                if let Some(s) = self.successors.get(&next) {
                    stack.extend(s.iter().cloned());
                }
            }
        }
    }

    /// Stop handing out tasks; every pending task is skipped.
    pub fn stop(&mut self) {
        self.stopping = true;
        for state in self.states.values_mut() {
            if *state == NodeState::Pending {
                *state = NodeState::Done(TaskOutcome::Skipped);
            }
        }
    }

    pub fn running(&self) -> Vec<TaskName> {
        self.order
            .iter()
            .filter(|n| self.states.get(*n) == Some(&NodeState::Running))
            .cloned()
            .collect()
    }

    /// True once no task is pending or running.
    pub fn is_finished(&self) -> bool {
        self.states
            .values()
            .all(|s| matches!(s, NodeState::Done(_)))
    }

    pub fn outcome(&self, name: &str) -> Option<TaskOutcome> {
        match self.states.get(name) {
            Some(NodeState::Done(o)) => Some(*o),
            _ => None,
        }
    }

    /// Outcomes of finished tasks, in topological order.
    pub fn outcomes(&self) -> Vec<(TaskName, TaskOutcome)> {
        self.order
            .iter()
            .filter_map(|n| self.outcome(n).map(|o| (n.clone(), o)))
            .collect()
    }

    /// State of the workflow as a whole once finished.
    pub fn workflow_status(&self) -> ExecutionStatus {
        let outcomes = self.outcomes();
        if outcomes.iter().any(|(_, o)| *o == TaskOutcome::Killed) {
            ExecutionStatus::Kill
        } else if outcomes.len() == self.order.len()
            && outcomes.iter().all(|(_, o)| o.satisfies_dependents())
        {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Failure
        }
    }
}
