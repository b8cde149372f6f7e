use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Exit code reported by a task that completed successfully.
pub const EXIT_CODE_SUCCESS: i32 = 0;
/// Exit code reported by a task that failed (including internal errors).
pub const EXIT_CODE_FAILURE: i32 = -1;
/// Exit code reported by a task that was killed.
pub const EXIT_CODE_KILL: i32 = 137;

/// State of a process instance or task instance as recorded by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    SubmittedSuccess,
    RunningExecution,
    ReadyPause,
    Pause,
    ReadyStop,
    Stop,
    Failure,
    Success,
    NeedFaultTolerance,
    Kill,
    WaitingThread,
    WaitingDepend,
    DelayExecution,
    ForcedSuccess,
}

impl ExecutionStatus {
    pub fn is_success(self) -> bool {
        matches!(self, ExecutionStatus::Success | ExecutionStatus::ForcedSuccess)
    }

    pub fn is_failure(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Failure | ExecutionStatus::NeedFaultTolerance
        )
    }

    pub fn is_cancel(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Kill | ExecutionStatus::Stop | ExecutionStatus::Pause
        )
    }

    /// Terminal state: no further transition occurs.
    pub fn is_finished(self) -> bool {
        self.is_success() || self.is_failure() || self.is_cancel()
    }

    pub fn is_running(self) -> bool {
        matches!(
            self,
            ExecutionStatus::RunningExecution
                | ExecutionStatus::WaitingDepend
                | ExecutionStatus::DelayExecution
                | ExecutionStatus::SubmittedSuccess
        )
    }
}

/// Kind of node registered in the coordination service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Master,
    Worker,
    DeadServer,
}

impl NodeType {
    /// Prefix used for entries under the dead-server path.
    pub fn prefix(self) -> &'static str {
        match self {
            NodeType::Master => "master",
            NodeType::Worker => "worker",
            NodeType::DeadServer => "dead-server",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// How a list of dependency verdicts is combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum DependentRelation {
    #[default]
    And,
    Or,
}

/// Verdict for a single dependency, a dependency group, or a whole
/// dependent task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependResult {
    Waiting,
    Success,
    Failed,
}

impl DependResult {
    pub fn is_terminal(self) -> bool {
        !matches!(self, DependResult::Waiting)
    }
}

impl fmt::Display for DependResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependResult::Waiting => f.write_str("WAITING"),
            DependResult::Success => f.write_str("SUCCESS"),
            DependResult::Failed => f.write_str("FAILED"),
        }
    }
}

/// Time cycle of a dependency item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleType {
    Hour,
    Day,
    Week,
    Month,
}

impl fmt::Display for CycleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleType::Hour => f.write_str("hour"),
            CycleType::Day => f.write_str("day"),
            CycleType::Week => f.write_str("week"),
            CycleType::Month => f.write_str("month"),
        }
    }
}

impl FromStr for CycleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hour" => Ok(CycleType::Hour),
            "day" => Ok(CycleType::Day),
            "week" => Ok(CycleType::Week),
            "month" => Ok(CycleType::Month),
            other => Err(format!(
                "invalid cycle: {other} (expected hour, day, week or month)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_states_cover_success_failure_and_cancel() {
        assert!(ExecutionStatus::Success.is_finished());
        assert!(ExecutionStatus::ForcedSuccess.is_finished());
        assert!(ExecutionStatus::NeedFaultTolerance.is_finished());
        assert!(ExecutionStatus::Kill.is_finished());
        assert!(!ExecutionStatus::RunningExecution.is_finished());
        assert!(!ExecutionStatus::WaitingThread.is_finished());
    }

    #[test]
    fn cycle_parses_case_insensitively() {
        assert_eq!("Week".parse::<CycleType>(), Ok(CycleType::Week));
        assert!("year".parse::<CycleType>().is_err());
    }
}
