use chrono::NaiveDateTime;
use serde_json::{Value, json};

use dagflow::dag::WorkflowDefinition;
use dagflow::dependent::{DependentItem, DependentParameters, DependentTaskModel, ProcessInstance};
use dagflow::types::{DependentRelation, ExecutionStatus};

/// Parse `"YYYY-MM-DD HH:MM:SS"`.
pub fn dt(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").expect("valid test datetime")
}

/// Builder for `WorkflowDefinition` via its stored JSON form.
#[derive(Debug, Default)]
pub struct WorkflowBuilder {
    tasks: Vec<Value>,
    timeout: Option<u64>,
}

impl WorkflowBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, name: &str, kind: &str, params: Value, after: &[&str]) -> Self {
        self.tasks.push(json!({
            "name": name,
            "type": kind,
            "params": params,
            "preTasks": after,
        }));
        self
    }

    pub fn shell(self, name: &str, script: &str, after: &[&str]) -> Self {
        self.push(name, "SHELL", json!({ "rawScript": script }), after)
    }

    pub fn spark(self, name: &str, main_jar: &str, after: &[&str]) -> Self {
        self.push(name, "SPARK", json!({ "mainJar": main_jar }), after)
    }

    pub fn dependent(self, name: &str, params: &DependentParameters, after: &[&str]) -> Self {
        let params = serde_json::to_value(params).expect("dependent params serialise");
        self.push(name, "DEPENDENT", params, after)
    }

    fn task_mut(&mut self, name: &str) -> &mut Value {
        self.tasks
            .iter_mut()
            .find(|t| t["name"] == name)
            .expect("task added before it is modified")
    }

    pub fn forbidden(mut self, name: &str) -> Self {
        self.task_mut(name)["runFlag"] = json!("FORBIDDEN");
        self
    }

    pub fn task_timeout(mut self, name: &str, secs: u64) -> Self {
        self.task_mut(name)["timeout"] = json!(secs);
        self
    }

    pub fn timeout(mut self, secs: u64) -> Self {
        self.timeout = Some(secs);
        self
    }

    pub fn to_json(&self) -> String {
        json!({ "tasks": self.tasks, "timeout": self.timeout }).to_string()
    }

    pub fn build(self) -> WorkflowDefinition {
        WorkflowDefinition::from_json(&self.to_json()).expect("Failed to build valid workflow")
    }
}

/// Builder for `DependentParameters`.
#[derive(Debug, Default)]
pub struct DependentParamsBuilder {
    params: DependentParameters,
}

impl DependentParamsBuilder {
    pub fn new(relation: DependentRelation) -> Self {
        Self {
            params: DependentParameters {
                depend_task_list: Vec::new(),
                relation,
            },
        }
    }

    pub fn group(mut self, relation: DependentRelation, items: Vec<DependentItem>) -> Self {
        self.params.depend_task_list.push(DependentTaskModel {
            depend_item_list: items,
            relation,
        });
        self
    }

    pub fn build(self) -> DependentParameters {
        self.params
    }
}

/// Builder for `ProcessInstance` records seeded into a store.
#[derive(Debug)]
pub struct ProcessInstanceBuilder {
    process: ProcessInstance,
}

impl ProcessInstanceBuilder {
    /// A finished, successful, manual run started at `start`.
    pub fn new(definition_id: i64, start: NaiveDateTime) -> Self {
        Self {
            process: ProcessInstance {
                id: 0,
                definition_id,
                state: ExecutionStatus::Success,
                schedule_time: None,
                start_time: start,
                end_time: Some(start),
                manual: true,
            },
        }
    }

    pub fn state(mut self, state: ExecutionStatus) -> Self {
        self.process.state = state;
        if !state.is_finished() {
            self.process.end_time = None;
        }
        self
    }

    pub fn scheduled_at(mut self, time: NaiveDateTime) -> Self {
        self.process.schedule_time = Some(time);
        self.process.manual = false;
        self
    }

    pub fn ended_at(mut self, time: NaiveDateTime) -> Self {
        self.process.end_time = Some(time);
        self
    }

    pub fn build(self) -> ProcessInstance {
        self.process
    }
}
