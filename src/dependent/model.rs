// src/dependent/model.rs

//! Dependency configuration as stored on a `DEPENDENT` task.

use serde::{Deserialize, Serialize};

use crate::dependent::date_window::DateValue;
use crate::errors::{DagflowError, Result};
use crate::types::{CycleType, DependentRelation};

/// `depTasks` value selecting the whole upstream process instead of one task.
pub const ALL_TASKS: &str = "ALL";

/// Reference to an upstream workflow (or one of its tasks) over a date window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependentItem {
    pub definition_id: i64,

    /// Upstream task name, or [`ALL_TASKS`].
    #[serde(default = "all_tasks")]
    pub dep_tasks: String,

    pub cycle: CycleType,

    pub date_value: String,
}

fn all_tasks() -> String {
    ALL_TASKS.to_string()
}

impl DependentItem {
    pub fn new(
        definition_id: i64,
        dep_tasks: impl Into<String>,
        cycle: CycleType,
        date_value: impl Into<String>,
    ) -> Self {
        Self {
            definition_id,
            dep_tasks: dep_tasks.into(),
            cycle,
            date_value: date_value.into(),
        }
    }

    /// Cache key identifying this item across polls.
    pub fn key(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.definition_id, self.dep_tasks, self.cycle, self.date_value
        )
    }

    pub fn depends_on_all_tasks(&self) -> bool {
        self.dep_tasks == ALL_TASKS
    }

    /// Parse `date_value` and check that it belongs to `cycle`.
    pub fn date(&self) -> Result<DateValue> {
        let value: DateValue = self
            .date_value
            .parse()
            .map_err(|e: String| DagflowError::InvalidDependent(format!("{}: {e}", self.key())))?;
        if value.cycle() != self.cycle {
            return Err(DagflowError::InvalidDependent(format!(
                "date value '{}' does not belong to cycle '{}'",
                self.date_value, self.cycle
            )));
        }
        Ok(value)
    }
}

/// A group of items combined with one relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DependentTaskModel {
    #[serde(default)]
    pub depend_item_list: Vec<DependentItem>,
    #[serde(default)]
    pub relation: DependentRelation,
}

/// Full dependency configuration: groups combined with one relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DependentParameters {
    #[serde(default)]
    pub depend_task_list: Vec<DependentTaskModel>,
    #[serde(default)]
    pub relation: DependentRelation,
}

impl DependentParameters {
    pub fn from_json(text: &str) -> Result<Self> {
        let params: DependentParameters = serde_json::from_str(text)
            .map_err(|e| DagflowError::InvalidDependent(e.to_string()))?;
        params.validate()?;
        Ok(params)
    }

    /// Reject date expressions that are unknown or do not match their cycle.
    pub fn validate(&self) -> Result<()> {
        for model in &self.depend_task_list {
            for item in &model.depend_item_list {
                item.date()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stored_json() {
        let params = DependentParameters::from_json(
            r#"{"relation": "OR", "dependTaskList": [
                {"relation": "AND", "dependItemList": [
                    {"definitionId": 7, "depTasks": "load", "cycle": "day", "dateValue": "today"},
                    {"definitionId": 8, "cycle": "hour", "dateValue": "last2Hours"}
                ]}
            ]}"#,
        )
        .unwrap();

        assert_eq!(params.relation, DependentRelation::Or);
        let items = &params.depend_task_list[0].depend_item_list;
        assert_eq!(items[0].key(), "7-load-day-today");
        assert!(items[1].depends_on_all_tasks());
        assert_eq!(items[1].key(), "8-ALL-hour-last2Hours");
    }

    #[test]
    fn mismatched_cycle_is_invalid() {
        let err = DependentParameters::from_json(
            r#"{"dependTaskList": [{"dependItemList": [
                {"definitionId": 1, "cycle": "week", "dateValue": "today"}
            ]}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, DagflowError::InvalidDependent(_)));
    }

    #[test]
    fn unknown_expression_is_invalid() {
        let item = DependentItem::new(1, ALL_TASKS, CycleType::Day, "yesterday");
        assert!(item.date().is_err());
    }
}
