use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};

/// The closed set of task types the Worker knows how to dispatch.
///
/// Deliberately *not* open for runtime extension — §9 calls this out as
/// a fixed dispatch table, not introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[serde(rename = "tool.call")]
    ToolCall,
    #[serde(rename = "repo.change")]
    RepoChange,
    #[serde(rename = "doc.build")]
    DocBuild,
    #[serde(rename = "patch.apply")]
    PatchApply,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::ToolCall => "tool.call",
            TaskType::RepoChange => "repo.change",
            TaskType::DocBuild => "doc.build",
            TaskType::PatchApply => "patch.apply",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "tool.call" => Ok(TaskType::ToolCall),
            "repo.change" => Ok(TaskType::RepoChange),
            "doc.build" => Ok(TaskType::DocBuild),
            "patch.apply" => Ok(TaskType::PatchApply),
            other => Err(Error::UnknownTaskType(other.to_string())),
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    /// A task in a terminal status never transitions again.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(TaskStatus::Queued),
            "running" => Ok(TaskStatus::Running),
            "succeeded" => Ok(TaskStatus::Succeeded),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(Error::Other(format!("unknown task status: {other}"))),
        }
    }
}

/// A queued unit of work, plus its full lease/accounting state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub task_type: String,
    pub payload: Value,
    pub priority: i32,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub available_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub lock_expires_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub last_error: Option<String>,
    pub run_id: Option<Uuid>,
}

/// Default attempt budget for newly enqueued tasks.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Default priority for newly enqueued tasks (lower services earlier).
/// Distinct from the incidental `priority=10` used by the original
/// source's demo enqueuer.
pub const DEFAULT_PRIORITY: i32 = 100;

/// `backoff_s = min(30, 2^max(0, attempts-1))`, owned by the Worker per
/// the spec, not by the TaskQueue itself.
pub fn backoff_seconds(attempts: i32) -> i64 {
    let exp = (attempts - 1).max(0);
    let base: i64 = 1i64 << exp.min(32) as u32;
    base.min(30)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_type_round_trips() {
        for t in [TaskType::ToolCall, TaskType::RepoChange, TaskType::DocBuild, TaskType::PatchApply] {
            assert_eq!(TaskType::parse(t.as_str()).unwrap(), t);
        }
    }

    #[test]
    fn task_type_unknown_is_error() {
        assert!(matches!(TaskType::parse("frobnicate"), Err(Error::UnknownTaskType(_))));
    }

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Succeeded.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn backoff_schedule_matches_spec() {
        assert_eq!(backoff_seconds(1), 1);
        assert_eq!(backoff_seconds(2), 2);
        assert_eq!(backoff_seconds(3), 4);
        assert_eq!(backoff_seconds(4), 8);
        assert_eq!(backoff_seconds(5), 16);
        assert_eq!(backoff_seconds(6), 30);
        assert_eq!(backoff_seconds(100), 30);
    }

    #[test]
    fn backoff_clamps_non_positive_attempts() {
        assert_eq!(backoff_seconds(0), 1);
        assert_eq!(backoff_seconds(-5), 1);
    }
}
