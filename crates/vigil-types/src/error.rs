use std::path::PathBuf;

use thiserror::Error;

/// Error taxonomy shared by every Vigil crate.
///
/// Validation problems surface to the caller without producing an execution
/// record; execution-time problems are persisted as results before they
/// propagate; notification-side provider failures are logged and swallowed
/// by the dispatcher.
#[derive(Debug, Error)]
pub enum VigilError {
    #[error("validation failed{}: {reason}", fmt_task(.task))]
    Validation {
        task: Option<String>,
        reason: String,
    },

    #[error("a task named '{0}' already exists")]
    DuplicateName(String),

    #[error("skill not found: {0}")]
    SkillNotFound(String),

    #[error("working directory does not exist: {}", .path.display())]
    WorkingDirMissing { task_id: String, path: PathBuf },

    #[error("execution failed for task {task_id}: {reason}")]
    Execution { task_id: String, reason: String },

    #[error("task {task_id} timed out after {seconds}s")]
    Timeout { task_id: String, seconds: u64 },

    #[error("execution for task {0} was stopped")]
    Stopped(String),

    #[error("provider '{provider}' error: {detail}")]
    Provider { provider: String, detail: String },

    #[error("provider not found: {0}")]
    ProviderNotFound(String),

    #[error("task '{0}' is already running or waiting for approval")]
    AlreadyRunning(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn fmt_task(task: &Option<String>) -> String {
    match task {
        Some(id) => format!(" for task {id}"),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, VigilError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_context() {
        let err = VigilError::Timeout {
            task_id: "t1".into(),
            seconds: 30,
        };
        assert_eq!(err.to_string(), "task t1 timed out after 30s");

        let err = VigilError::Validation {
            task: Some("t2".into()),
            reason: "bad cron".into(),
        };
        assert!(err.to_string().contains("t2"));
        assert!(err.to_string().contains("bad cron"));

        let err = VigilError::Validation {
            task: None,
            reason: "bad cron".into(),
        };
        assert_eq!(err.to_string(), "validation failed: bad cron");
    }
}
