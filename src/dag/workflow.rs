// src/dag/workflow.rs

//! Stored workflow definition: task nodes and the relations between them.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::errors::{DagflowError, Result};
use crate::task::params::{TaskParams, TaskType};

/// Whether a task node takes part in execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunFlag {
    #[default]
    Normal,
    Forbidden,
}

/// One task of a workflow definition.
///
/// The payload in `params` is kept as raw JSON and decoded with
/// [`TaskNode::task_params`] according to `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskNode {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: TaskType,

    #[serde(default)]
    pub params: serde_json::Value,

    #[serde(default)]
    pub pre_tasks: Vec<String>,

    #[serde(default)]
    pub run_flag: RunFlag,

    /// Per-task timeout in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl TaskNode {
    pub fn is_forbidden(&self) -> bool {
        self.run_flag == RunFlag::Forbidden
    }

    pub fn task_params(&self) -> Result<TaskParams> {
        TaskParams::from_value(self.kind, self.params.clone()).map_err(|e| {
            DagflowError::ConfigError(format!(
                "task '{}' has invalid {:?} parameters: {e}",
                self.name, self.kind
            ))
        })
    }
}

/// Edge between two task nodes: `start` must finish before `end`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskNodeRelation {
    pub start: String,
    pub end: String,
}

impl TaskNodeRelation {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }
}

/// A workflow definition as stored, e.g.
///
/// ```json
/// {"tasks": [{"name": "a", "type": "SHELL", "params": {"rawScript": "echo a"}},
///            {"name": "b", "type": "SHELL", "params": {"rawScript": "echo b"},
///             "preTasks": ["a"]}],
///  "timeout": 3600}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    #[serde(default)]
    pub tasks: Vec<TaskNode>,

    /// Whole-workflow timeout in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl WorkflowDefinition {
    pub fn from_json(text: &str) -> Result<Self> {
        let definition: WorkflowDefinition = serde_json::from_str(text)?;
        definition.ensure_unique_names()?;
        Ok(definition)
    }

    pub fn task(&self, name: &str) -> Option<&TaskNode> {
        self.tasks.iter().find(|t| t.name == name)
    }

    /// One relation per `preTasks` entry, in task order.
    pub fn relations(&self) -> Vec<TaskNodeRelation> {
        self.tasks
            .iter()
            .flat_map(|task| {
                task.pre_tasks
                    .iter()
                    .map(|pre| TaskNodeRelation::new(pre.clone(), task.name.clone()))
            })
            .collect()
    }

    fn ensure_unique_names(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for task in &self.tasks {
            if !seen.insert(task.name.as_str()) {
                return Err(DagflowError::ConfigError(format!(
                    "task name '{}' is defined more than once",
                    task.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "tasks": [
            {"name": "extract", "type": "SHELL", "params": {"rawScript": "echo e"}},
            {"name": "load", "type": "SHELL", "params": {"rawScript": "echo l"},
             "preTasks": ["extract"], "runFlag": "FORBIDDEN", "timeout": 30}
        ],
        "timeout": 600
    }"#;

    #[test]
    fn parses_definition_and_relations() {
        let def = WorkflowDefinition::from_json(SAMPLE).unwrap();
        assert_eq!(def.tasks.len(), 2);
        assert_eq!(def.timeout, Some(600));

        let load = def.task("load").unwrap();
        assert!(load.is_forbidden());
        assert_eq!(load.timeout, Some(30));
        assert_eq!(def.relations(), vec![TaskNodeRelation::new("extract", "load")]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let text = r#"{"tasks": [
            {"name": "a", "type": "SHELL", "params": {"rawScript": ""}},
            {"name": "a", "type": "SHELL", "params": {"rawScript": ""}}
        ]}"#;
        assert!(matches!(
            WorkflowDefinition::from_json(text),
            Err(DagflowError::ConfigError(_))
        ));
    }

    #[test]
    fn invalid_params_surface_as_config_error() {
        let text = r#"{"tasks": [{"name": "a", "type": "SHELL", "params": {}}]}"#;
        let def = WorkflowDefinition::from_json(text).unwrap();
        let err = def.tasks[0].task_params().unwrap_err();
        assert!(err.to_string().contains("task 'a'"));
    }
}
