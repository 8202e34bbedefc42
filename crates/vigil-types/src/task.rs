use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::VigilError;

/// Abstract model size, mapped to a concrete model id per agent provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Small,
    #[default]
    Medium,
    Large,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Small => "small",
            ModelTier::Medium => "medium",
            ModelTier::Large => "large",
        }
    }
}

/// Lifecycle events a task can subscribe notification channels to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    TaskStart,
    TaskComplete,
    TaskSuccess,
    TaskFailure,
    PlanReady,
    PlanApproved,
    PlanRejected,
}

impl NotificationEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationEvent::TaskStart => "task_start",
            NotificationEvent::TaskComplete => "task_complete",
            NotificationEvent::TaskSuccess => "task_success",
            NotificationEvent::TaskFailure => "task_failure",
            NotificationEvent::PlanReady => "plan_ready",
            NotificationEvent::PlanApproved => "plan_approved",
            NotificationEvent::PlanRejected => "plan_rejected",
        }
    }
}

/// Per-task notification policy: which channels hear about which events.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotificationPolicy {
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub events: Vec<NotificationEvent>,
    #[serde(default)]
    pub include_output: bool,
}

impl NotificationPolicy {
    pub fn subscribes(&self, event: NotificationEvent) -> bool {
        self.events.contains(&event)
    }
}

pub const MIN_TIMEOUT_SECS: u64 = 30;
pub const MAX_TIMEOUT_SECS: u64 = 3600;

fn default_timeout() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

/// A persisted, scheduled unit of agent work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    /// Five-field cron expression.
    pub schedule: String,
    pub working_dir: PathBuf,
    /// Exactly one of `skill` / `prompt` must be set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    #[serde(default)]
    pub model: ModelTier,
    /// Agent provider name; `None` uses the registry default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default)]
    pub autonomous: bool,
    /// Route through the two-phase plan/approve protocol instead of
    /// executing directly.
    #[serde(default)]
    pub plan_mode: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
    /// Subprocess watchdog in seconds, clamped to [30, 3600] at save time.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifications: Option<NotificationPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status: Option<String>,
}

impl Task {
    /// Structural invariants that hold independent of the repository
    /// (cron parseability and name uniqueness are checked there).
    pub fn check_invariants(&self) -> Result<(), VigilError> {
        if self.name.trim().is_empty() {
            return Err(VigilError::Validation {
                task: Some(self.id.clone()),
                reason: "task name must not be empty".into(),
            });
        }
        match (&self.skill, &self.prompt) {
            (None, None) => {
                return Err(VigilError::Validation {
                    task: Some(self.id.clone()),
                    reason: "task needs either a skill or a prompt".into(),
                })
            }
            (Some(_), Some(_)) => {
                return Err(VigilError::Validation {
                    task: Some(self.id.clone()),
                    reason: "task may set a skill or a prompt, not both".into(),
                })
            }
            _ => {}
        }
        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&self.timeout) {
            return Err(VigilError::Validation {
                task: Some(self.id.clone()),
                reason: format!(
                    "timeout {}s outside [{MIN_TIMEOUT_SECS}, {MAX_TIMEOUT_SECS}]",
                    self.timeout
                ),
            });
        }
        if let Some(turns) = self.max_turns {
            if turns == 0 {
                return Err(VigilError::Validation {
                    task: Some(self.id.clone()),
                    reason: "max_turns must be positive".into(),
                });
            }
        }
        Ok(())
    }

    pub fn update_last_run(&mut self, status: &str) {
        self.last_run = Some(Utc::now());
        self.last_status = Some(status.to_string());
    }
}
