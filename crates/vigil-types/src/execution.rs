use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a single execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failure,
    Timeout,
    Skipped,
    Stopped,
    WaitingApproval,
    Running,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failure => "failure",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::Skipped => "skipped",
            ExecutionStatus::Stopped => "stopped",
            ExecutionStatus::WaitingApproval => "waiting_approval",
            ExecutionStatus::Running => "running",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionStatus::Success)
    }
}

/// Append-only record of one execution attempt. Never mutated after emission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub task_id: String,
    pub session_id: String,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ExecutionResult {
    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

/// Correlation record between an execution attempt and the agent subprocess.
///
/// Created exactly once per attempt; when the provider mints its own session
/// id mid-stream, the record is re-keyed to the provider id and the internal
/// id is kept as `alias`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub task_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&ExecutionStatus::WaitingApproval).unwrap();
        assert_eq!(json, "\"waiting_approval\"");
    }

    #[test]
    fn result_jsonl_roundtrip() {
        let result = ExecutionResult {
            task_id: "t1".into(),
            session_id: "s1".into(),
            status: ExecutionStatus::Success,
            output: "done".into(),
            error: None,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            exit_code: Some(0),
            metadata: HashMap::new(),
        };
        let line = serde_json::to_string(&result).unwrap();
        let back: ExecutionResult = serde_json::from_str(&line).unwrap();
        assert_eq!(back.task_id, "t1");
        assert_eq!(back.status, ExecutionStatus::Success);
        assert_eq!(back.exit_code, Some(0));
    }

    #[test]
    fn duration_is_in_seconds() {
        let started = Utc::now();
        let result = ExecutionResult {
            task_id: "t1".into(),
            session_id: "s1".into(),
            status: ExecutionStatus::Timeout,
            output: String::new(),
            error: None,
            started_at: started,
            finished_at: started + chrono::Duration::milliseconds(2500),
            exit_code: None,
            metadata: HashMap::new(),
        };
        assert!((result.duration_secs() - 2.5).abs() < f64::EPSILON);
    }
}
