//! The approval service: plan capture, interactive review, and resume.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::{info, warn};

use vigil_agents::{Executor, Strategy};
use vigil_channels::templates::{approval_status_message, plan_ready_message};
use vigil_channels::{CallbackHandler, Dispatcher, InteractiveButton, InteractiveMessage};
use vigil_core::TaskRepository;
use vigil_types::{
    encode_callback_data, ApprovalAction, ApprovalStatus, ExecutionResult, ExecutionStatus,
    MessageRef, NotificationEvent, PendingApproval, Result, Task,
};

use crate::store::ApprovalStore;

enum Decision {
    Ignored,
    Approved(PendingApproval),
    Rejected(PendingApproval),
    Discussing(PendingApproval, String),
}

pub struct ApprovalService {
    store: Arc<ApprovalStore>,
    tasks: Arc<TaskRepository>,
    executor: Arc<Executor>,
    dispatcher: Arc<Dispatcher>,
    ttl: Duration,
}

impl ApprovalService {
    pub fn new(
        store: Arc<ApprovalStore>,
        tasks: Arc<TaskRepository>,
        executor: Arc<Executor>,
        dispatcher: Arc<Dispatcher>,
        ttl_hours: u64,
    ) -> Self {
        Self {
            store,
            tasks,
            executor,
            dispatcher,
            ttl: Duration::hours(ttl_hours as i64),
        }
    }

    pub fn store(&self) -> &Arc<ApprovalStore> {
        &self.store
    }

    /// Phase 1 landed: register the plan, ask the humans.
    pub async fn begin(&self, task: &Task, plan_result: &ExecutionResult) -> Result<PendingApproval> {
        let approval = self.store.create(
            task,
            plan_result.started_at,
            &plan_result.session_id,
            &plan_result.output,
        )?;
        self.executor.tracker().link_approval(&task.id, &approval.id);
        info!(task = %task.name, approval = %approval.id, "plan awaiting approval");

        let refs = self.send_approval_request(task, &approval).await;
        let updated = self
            .store
            .with_approval(&approval.id, |a| {
                a.channel_messages = refs.clone();
                a.clone()
            })?
            .unwrap_or(approval);
        Ok(updated)
    }

    async fn send_approval_request(
        &self,
        task: &Task,
        approval: &PendingApproval,
    ) -> Vec<MessageRef> {
        let channel_ids = task
            .notifications
            .as_ref()
            .map(|p| p.channels.clone())
            .unwrap_or_default();
        if channel_ids.is_empty() {
            warn!(task = %task.name, "plan approval has no notification channels to ask");
            return Vec::new();
        }
        let message = InteractiveMessage {
            text: plan_ready_message(&task.name, &approval.plan),
            buttons: vec![
                InteractiveButton {
                    label: "✅ Approve".into(),
                    callback_data: encode_callback_data(ApprovalAction::Approve, &approval.id),
                },
                InteractiveButton {
                    label: "❌ Reject".into(),
                    callback_data: encode_callback_data(ApprovalAction::Reject, &approval.id),
                },
                InteractiveButton {
                    label: "💬 Discuss".into(),
                    callback_data: encode_callback_data(ApprovalAction::Discuss, &approval.id),
                },
            ],
        };
        self.dispatcher.send_interactive(&channel_ids, &message).await
    }

    /// Route one button press. Safe to call concurrently for the same
    /// approval id: the store transition is atomic, so exactly one caller
    /// wins and the rest observe a terminal state and no-op.
    pub async fn handle_callback(
        &self,
        approval_id: &str,
        action: ApprovalAction,
        feedback: Option<String>,
    ) -> Result<()> {
        match self.decide(approval_id, action, feedback)? {
            Decision::Ignored => {
                info!(approval = %approval_id, "callback ignored (already decided or unknown)");
                Ok(())
            }
            Decision::Approved(approval) => self.on_approved(approval).await,
            Decision::Rejected(approval) => self.on_rejected(approval).await,
            Decision::Discussing(approval, feedback) => {
                self.on_discussing(approval, feedback).await
            }
        }
    }

    fn decide(
        &self,
        approval_id: &str,
        action: ApprovalAction,
        feedback: Option<String>,
    ) -> Result<Decision> {
        let decision = self.store.with_approval(approval_id, |approval| {
            if approval.status.is_terminal() {
                return Decision::Ignored;
            }
            match action {
                ApprovalAction::Approve => {
                    approval.status = ApprovalStatus::Approved;
                    approval.decided_at = Some(Utc::now());
                    Decision::Approved(approval.clone())
                }
                ApprovalAction::Reject => {
                    approval.status = ApprovalStatus::Rejected;
                    approval.decided_at = Some(Utc::now());
                    Decision::Rejected(approval.clone())
                }
                ApprovalAction::Discuss => match feedback {
                    Some(feedback) if !feedback.trim().is_empty() => {
                        approval.status = ApprovalStatus::Discussing;
                        Decision::Discussing(approval.clone(), feedback)
                    }
                    _ => Decision::Ignored,
                },
            }
        })?;
        Ok(decision.unwrap_or(Decision::Ignored))
    }

    async fn on_approved(&self, approval: PendingApproval) -> Result<()> {
        self.dispatcher
            .retire_messages(
                &approval.channel_messages,
                Some(&approval_status_message(&approval.task_name, "approved", "")),
            )
            .await;

        let Some(task) = self.tasks.find_by_id(&approval.task_id) else {
            warn!(task = %approval.task_id, "approved task no longer exists");
            self.executor.tracker().finish(&approval.task_id);
            return Ok(());
        };
        self.dispatcher
            .notify(NotificationEvent::PlanApproved, &task, None)
            .await;

        let strategy = Strategy::ResumeWithApproval {
            session_id: approval.session_id.clone(),
        };
        match self.executor.execute_with_strategy(&task, strategy, false).await {
            Ok(result) => {
                self.notify_completion(&task, &result).await;
                // The resumed run's final state lands on the review message.
                self.dispatcher
                    .retire_messages(
                        &approval.channel_messages,
                        Some(&approval_status_message(
                            &approval.task_name,
                            "approved",
                            &format!("Execution finished: {}", result.status.as_str()),
                        )),
                    )
                    .await;
            }
            Err(e) => {
                warn!(task = %task.name, "approved resume failed: {e}");
            }
        }
        Ok(())
    }

    async fn on_rejected(&self, approval: PendingApproval) -> Result<()> {
        self.dispatcher
            .retire_messages(
                &approval.channel_messages,
                Some(&approval_status_message(&approval.task_name, "rejected", "")),
            )
            .await;
        // No resume; the parked plan session is abandoned.
        self.executor.tracker().finish(&approval.task_id);
        if let Some(task) = self.tasks.find_by_id(&approval.task_id) {
            self.dispatcher
                .notify(NotificationEvent::PlanRejected, &task, None)
                .await;
        }
        Ok(())
    }

    async fn on_discussing(&self, approval: PendingApproval, feedback: String) -> Result<()> {
        // Buttons come off the old message (text stays) so it cannot be
        // double-actioned while the plan is being refined.
        self.dispatcher
            .retire_messages(&approval.channel_messages, None)
            .await;

        let Some(task) = self.tasks.find_by_id(&approval.task_id) else {
            warn!(task = %approval.task_id, "discussed task no longer exists");
            self.executor.tracker().finish(&approval.task_id);
            return Ok(());
        };

        let strategy = Strategy::ResumeWithFeedback {
            session_id: approval.session_id.clone(),
            feedback,
        };
        let refreshed = self.executor.execute_with_strategy(&task, strategy, false).await;

        match refreshed {
            Ok(result) if result.status == ExecutionStatus::WaitingApproval => {
                let updated = self.store.with_approval(&approval.id, |a| {
                    a.plan = result.output.clone();
                    a.session_id = result.session_id.clone();
                    a.status = ApprovalStatus::Pending;
                    // A refreshed plan restarts the review clock.
                    a.created_at = Utc::now();
                    a.channel_messages = Vec::new();
                    a.clone()
                })?;
                if let Some(updated) = updated {
                    self.executor.tracker().link_approval(&task.id, &updated.id);
                    let refs = self.send_approval_request(&task, &updated).await;
                    self.store.with_approval(&updated.id, |a| {
                        a.channel_messages = refs.clone();
                    })?;
                }
            }
            Ok(result) => {
                warn!(
                    task = %task.name,
                    status = result.status.as_str(),
                    "feedback run did not produce a plan; keeping the previous one"
                );
                self.reopen(&approval, &task).await?;
            }
            Err(e) => {
                warn!(task = %task.name, "feedback resume failed: {e}");
                self.reopen(&approval, &task).await?;
            }
        }
        Ok(())
    }

    /// Put a discussion that failed to produce a new plan back to pending
    /// with its original plan, and re-ask.
    async fn reopen(&self, approval: &PendingApproval, task: &Task) -> Result<()> {
        let updated = self.store.with_approval(&approval.id, |a| {
            a.status = ApprovalStatus::Pending;
            a.channel_messages = Vec::new();
            a.clone()
        })?;
        if let Some(updated) = updated {
            let refs = self.send_approval_request(task, &updated).await;
            self.store.with_approval(&updated.id, |a| {
                a.channel_messages = refs.clone();
            })?;
        }
        Ok(())
    }

    async fn notify_completion(&self, task: &Task, result: &ExecutionResult) {
        self.dispatcher
            .notify(NotificationEvent::TaskComplete, task, Some(result))
            .await;
        let event = if result.status.is_success() {
            NotificationEvent::TaskSuccess
        } else {
            NotificationEvent::TaskFailure
        };
        self.dispatcher.notify(event, task, Some(result)).await;
    }

    /// On-tick TTL sweep: expire overdue approvals and release their slots.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let expired = self.store.expire_overdue(self.ttl)?;
        for approval in &expired {
            info!(approval = %approval.id, task = %approval.task_name, "approval expired");
            self.dispatcher
                .retire_messages(
                    &approval.channel_messages,
                    Some(&approval_status_message(&approval.task_name, "expired", "")),
                )
                .await;
            self.executor.tracker().finish(&approval.task_id);
        }
        Ok(expired.len())
    }

    /// Startup pass: drop tracker entries parked on approvals that no
    /// longer exist.
    pub fn startup_cleanup(&self) -> Result<()> {
        let active = self.store.active_ids()?;
        self.executor.tracker().cleanup_stale(&active);
        Ok(())
    }
}

/// Adapts the poller's fire-and-forget callback into the service without
/// stalling the poll loop behind a resumed execution.
pub struct CallbackBridge(pub Arc<ApprovalService>);

#[async_trait]
impl CallbackHandler for CallbackBridge {
    async fn handle_action(
        &self,
        approval_id: &str,
        action: ApprovalAction,
        feedback: Option<String>,
    ) {
        let service = self.0.clone();
        let approval_id = approval_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = service.handle_callback(&approval_id, action, feedback).await {
                warn!(approval = %approval_id, "callback handling failed: {e}");
            }
        });
    }
}
