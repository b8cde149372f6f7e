// src/task/params.rs

//! Typed parameter payloads for each task kind.

use serde::{Deserialize, Serialize};

use crate::dependent::DependentParameters;

/// Kind tag carried by a stored task node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskType {
    Shell,
    Spark,
    Dependent,
}

/// Parameters of a `SHELL` task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellParameters {
    pub raw_script: String,
}

/// Where the Spark driver runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeployMode {
    #[default]
    Cluster,
    Client,
    Local,
}

impl DeployMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DeployMode::Cluster => "cluster",
            DeployMode::Client => "client",
            DeployMode::Local => "local",
        }
    }
}

/// Parameters of a `SPARK` task, rendered into a `spark-submit` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SparkParameters {
    pub main_jar: String,
    pub main_class: Option<String>,
    pub deploy_mode: DeployMode,
    pub app_name: Option<String>,
    pub driver_cores: Option<u32>,
    pub driver_memory: Option<String>,
    pub num_executors: Option<u32>,
    pub executor_cores: Option<u32>,
    pub executor_memory: Option<String>,
    pub queue: Option<String>,
    pub main_args: Option<String>,
    pub others: Option<String>,
}

/// Closed set of task kinds with their typed parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskParams {
    Shell(ShellParameters),
    Spark(SparkParameters),
    Dependent(DependentParameters),
}

impl TaskParams {
    pub fn task_type(&self) -> TaskType {
        match self {
            TaskParams::Shell(_) => TaskType::Shell,
            TaskParams::Spark(_) => TaskType::Spark,
            TaskParams::Dependent(_) => TaskType::Dependent,
        }
    }

    /// Decode a raw JSON payload according to the kind tag.
    pub fn from_value(kind: TaskType, value: serde_json::Value) -> serde_json::Result<Self> {
        Ok(match kind {
            TaskType::Shell => TaskParams::Shell(serde_json::from_value(value)?),
            TaskType::Spark => TaskParams::Spark(serde_json::from_value(value)?),
            TaskType::Dependent => TaskParams::Dependent(serde_json::from_value(value)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_by_kind() {
        let params =
            TaskParams::from_value(TaskType::Shell, json!({"rawScript": "echo hi"})).unwrap();
        assert_eq!(
            params,
            TaskParams::Shell(ShellParameters {
                raw_script: "echo hi".into()
            })
        );

        let spark = TaskParams::from_value(
            TaskType::Spark,
            json!({"mainJar": "app.jar", "deployMode": "client", "numExecutors": 2}),
        )
        .unwrap();
        match spark {
            TaskParams::Spark(p) => {
                assert_eq!(p.deploy_mode, DeployMode::Client);
                assert_eq!(p.num_executors, Some(2));
            }
            other => panic!("unexpected params {other:?}"),
        }
    }

    #[test]
    fn wrong_payload_for_kind_is_rejected() {
        assert!(TaskParams::from_value(TaskType::Shell, json!({"mainJar": "x"})).is_err());
    }
}
