use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where an interactive approval message landed: enough to edit it later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRef {
    pub channel_id: String,
    pub provider: String,
    pub chat_id: String,
    pub message_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Discussing,
    Expired,
}

impl ApprovalStatus {
    /// Terminal states accept no further callbacks.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ApprovalStatus::Approved | ApprovalStatus::Rejected | ApprovalStatus::Expired
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Discussing => "discussing",
            ApprovalStatus::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAction {
    Approve,
    Reject,
    Discuss,
}

impl ApprovalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalAction::Approve => "approve",
            ApprovalAction::Reject => "reject",
            ApprovalAction::Discuss => "discuss",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "approve" => Some(ApprovalAction::Approve),
            "reject" => Some(ApprovalAction::Reject),
            "discuss" => Some(ApprovalAction::Discuss),
            _ => None,
        }
    }
}

/// Build the opaque button token carried by chat-platform callbacks.
pub fn encode_callback_data(action: ApprovalAction, approval_id: &str) -> String {
    format!("plan:{}:{}", action.as_str(), approval_id)
}

/// Inverse of [`encode_callback_data`]. Returns `None` for anything that is
/// not a well-formed `plan:<action>:<approval_id>` token.
pub fn parse_callback_data(data: &str) -> Option<(ApprovalAction, String)> {
    let rest = data.strip_prefix("plan:")?;
    let (action, id) = rest.split_once(':')?;
    if id.is_empty() {
        return None;
    }
    Some((ApprovalAction::parse(action)?, id.to_string()))
}

/// A plan awaiting a human decision. Owned by the approval store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApproval {
    pub id: String,
    pub task_id: String,
    pub task_name: String,
    /// Cron fire time that produced the plan.
    pub scheduled_at: DateTime<Utc>,
    /// Session of the paused agent, used for resume.
    pub session_id: String,
    pub plan: String,
    #[serde(default)]
    pub channel_messages: Vec<MessageRef>,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_data_roundtrip() {
        for action in [
            ApprovalAction::Approve,
            ApprovalAction::Reject,
            ApprovalAction::Discuss,
        ] {
            let data = encode_callback_data(action, "a1b2c3");
            let (parsed, id) = parse_callback_data(&data).unwrap();
            assert_eq!(parsed, action);
            assert_eq!(id, "a1b2c3");
        }
    }

    #[test]
    fn malformed_callback_data_rejected() {
        assert!(parse_callback_data("plan:approve:").is_none());
        assert!(parse_callback_data("plan:banana:a1").is_none());
        assert!(parse_callback_data("tool:approve:a1").is_none());
        assert!(parse_callback_data("plan:approve").is_none());
        assert!(parse_callback_data("").is_none());
    }

    #[test]
    fn terminal_states() {
        assert!(ApprovalStatus::Approved.is_terminal());
        assert!(ApprovalStatus::Rejected.is_terminal());
        assert!(ApprovalStatus::Expired.is_terminal());
        assert!(!ApprovalStatus::Pending.is_terminal());
        assert!(!ApprovalStatus::Discussing.is_terminal());
    }
}
