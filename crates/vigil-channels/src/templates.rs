//! Per-event message templates.
//!
//! Templates emit the dispatcher's HTML dialect; each provider's
//! `format_message` reduces it to the platform's own markup.

use vigil_types::{ExecutionResult, ExecutionStatus, NotificationEvent, Task};

const OUTPUT_PREVIEW_CHARS: usize = 1500;

pub fn status_emoji(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Success => "✅",
        ExecutionStatus::Failure => "❌",
        ExecutionStatus::Timeout => "⏱️",
        ExecutionStatus::Skipped => "⏭️",
        ExecutionStatus::Stopped => "🚫",
        ExecutionStatus::WaitingApproval => "📋",
        ExecutionStatus::Running => "▶️",
    }
}

/// Render the message body for one lifecycle event.
pub fn render_event(
    event: NotificationEvent,
    task: &Task,
    result: Option<&ExecutionResult>,
    include_output: bool,
) -> String {
    let mut text = match event {
        NotificationEvent::TaskStart => {
            format!("▶️ <b>{}</b> started", task.name)
        }
        NotificationEvent::TaskComplete => match result {
            Some(result) => format!(
                "{} <b>{}</b> finished with {} in {:.1}s",
                status_emoji(result.status),
                task.name,
                result.status.as_str(),
                result.duration_secs()
            ),
            None => format!("<b>{}</b> finished", task.name),
        },
        NotificationEvent::TaskSuccess => match result {
            Some(result) => format!(
                "✅ <b>{}</b> succeeded in {:.1}s",
                task.name,
                result.duration_secs()
            ),
            None => format!("✅ <b>{}</b> succeeded", task.name),
        },
        NotificationEvent::TaskFailure => {
            let detail = result
                .and_then(|r| r.error.clone())
                .unwrap_or_else(|| "unknown error".to_string());
            format!("❌ <b>{}</b> failed: {}", task.name, detail)
        }
        NotificationEvent::PlanReady => {
            format!("📋 <b>{}</b> produced a plan and is waiting for review", task.name)
        }
        NotificationEvent::PlanApproved => {
            format!("✅ Plan for <b>{}</b> approved, executing now", task.name)
        }
        NotificationEvent::PlanRejected => {
            format!("🚫 Plan for <b>{}</b> rejected", task.name)
        }
    };

    if include_output {
        if let Some(result) = result {
            if !result.output.trim().is_empty() {
                let preview: String = result.output.chars().take(OUTPUT_PREVIEW_CHARS).collect();
                text.push_str("\n\n<pre>");
                text.push_str(&preview);
                if result.output.chars().count() > OUTPUT_PREVIEW_CHARS {
                    text.push('…');
                }
                text.push_str("</pre>");
            }
        }
    }
    text
}

/// Interactive message body for a freshly produced plan.
pub fn plan_ready_message(task_name: &str, plan: &str) -> String {
    format!(
        "📋 <b>{task_name}</b> proposes the following plan:\n\n{plan}\n\nApprove to execute, reject to drop it, or discuss to refine it."
    )
}

/// Final text stamped onto approval messages once a decision lands.
pub fn approval_status_message(task_name: &str, status: &str, details: &str) -> String {
    let headline = match status {
        "approved" => format!("✅ Plan for <b>{task_name}</b> approved"),
        "rejected" => format!("🚫 Plan for <b>{task_name}</b> rejected"),
        "expired" => format!("⌛ Plan for <b>{task_name}</b> expired without a decision"),
        other => format!("Plan for <b>{task_name}</b>: {other}"),
    };
    if details.is_empty() {
        headline
    } else {
        format!("{headline}\n{details}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use chrono::Utc;
    use vigil_types::ModelTier;

    fn task() -> Task {
        Task {
            id: "t1".into(),
            name: "nightly".into(),
            schedule: "0 3 * * *".into(),
            working_dir: PathBuf::from("/tmp"),
            skill: None,
            prompt: Some("p".into()),
            allowed_tools: vec![],
            model: ModelTier::Medium,
            provider: None,
            autonomous: false,
            plan_mode: false,
            max_turns: None,
            timeout: 300,
            enabled: true,
            variables: HashMap::new(),
            notifications: None,
            last_run: None,
            last_status: None,
        }
    }

    fn result(status: ExecutionStatus) -> ExecutionResult {
        let now = Utc::now();
        ExecutionResult {
            task_id: "t1".into(),
            session_id: "s1".into(),
            status,
            output: "the output".into(),
            error: Some("broke".into()),
            started_at: now,
            finished_at: now + chrono::Duration::seconds(3),
            exit_code: Some(1),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn start_and_failure_templates() {
        let t = task();
        let start = render_event(NotificationEvent::TaskStart, &t, None, false);
        assert!(start.contains("nightly"));
        assert!(start.contains("started"));

        let failure = render_event(
            NotificationEvent::TaskFailure,
            &t,
            Some(&result(ExecutionStatus::Failure)),
            false,
        );
        assert!(failure.contains("failed"));
        assert!(failure.contains("broke"));
    }

    #[test]
    fn output_block_only_when_requested() {
        let t = task();
        let r = result(ExecutionStatus::Success);
        let without = render_event(NotificationEvent::TaskSuccess, &t, Some(&r), false);
        assert!(!without.contains("the output"));
        let with = render_event(NotificationEvent::TaskSuccess, &t, Some(&r), true);
        assert!(with.contains("<pre>the output"));
    }

    #[test]
    fn plan_messages_mention_the_task() {
        let message = plan_ready_message("nightly", "1. think 2. act");
        assert!(message.contains("nightly"));
        assert!(message.contains("1. think 2. act"));

        let approved = approval_status_message("nightly", "approved", "");
        assert!(approved.contains("approved"));
        let expired = approval_status_message("nightly", "expired", "no decision in 24h");
        assert!(expired.contains("expired"));
        assert!(expired.contains("no decision in 24h"));
    }
}
