//! Execution strategies: how a task plus its context becomes one concrete
//! agent invocation.

use std::path::PathBuf;

use vigil_types::{Result, Task};

use vigil_skills::Skill;

use crate::provider::{AgentProvider, ExecutionRequest};

/// System prompt appended to primary scheduled executions.
pub const SCHEDULED_TASK_PROMPT: &str = "You are running as a scheduled, unattended task agent. \
Carry out the scheduled work directly, whether it is coding, content creation, research, \
writing, analysis or automation. Do not refuse or defer the task; the user scheduled it and \
expects it completed. Produce the requested content or file changes in full.";

/// System prompt for the read-only planning phase.
pub const PLAN_PHASE_PROMPT: &str = "You are running as a scheduled task agent in planning mode. \
Analyze the request and produce a concrete, step-by-step plan without modifying anything. \
A human will review the plan before any of it is executed. If the task is content generation, \
draft the content as part of the plan; if it involves file operations, plan those operations.";

/// System prompt for the execution phase after a human approved the plan.
pub const APPROVED_PHASE_PROMPT: &str = "You are running as a scheduled task agent. The user has \
reviewed and APPROVED your plan. Execute it now, completely and without further confirmation. \
Create or modify files where the plan calls for it; if it is content generation, emit the final \
content.";

/// Canned user prompt sent on an approved resume.
pub const APPROVED_RESUME_PROMPT: &str = "USER APPROVED. Complete the task now.";

/// Inputs a strategy turns into an [`ExecutionRequest`].
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub task: Task,
    pub skill: Option<Skill>,
    pub prompt: String,
    pub working_dir: PathBuf,
    pub session_id: Option<String>,
}

impl ExecutionContext {
    pub fn for_task(task: &Task) -> Self {
        Self {
            task: task.clone(),
            skill: None,
            prompt: task.prompt.clone().unwrap_or_default(),
            working_dir: task.working_dir.clone(),
            session_id: None,
        }
    }

    /// `/skill-name arguments` invocation text, or the bare prompt when no
    /// skill is attached.
    fn invocation_prompt(&self) -> String {
        match &self.skill {
            Some(skill) if self.prompt.is_empty() => format!("/{}", skill.name),
            Some(skill) => format!("/{} {}", skill.name, self.prompt),
            None => self.prompt.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// Plain one-shot prompt; the agent asks before touching anything.
    Headless,
    /// One-shot with the provider's skip-permissions flag.
    Autonomous,
    /// `/skill-name` invocation.
    Skill,
    /// Read-only planning phase of the approval protocol.
    PlanMode,
    /// Resume an approved plan with elevated permissions.
    ResumeWithApproval { session_id: String },
    /// Resume in plan mode carrying reviewer feedback.
    ResumeWithFeedback { session_id: String, feedback: String },
    /// Direct provider dispatch: the task's own flags map straight onto the
    /// request and the provider builds whatever command it builds. Used for
    /// providers that know nothing of slash commands or claude-style
    /// system-prompt flags.
    Provider,
}

impl Strategy {
    /// Primary dispatch selection: skill wins, then the autonomous flag.
    pub fn select(task: &Task) -> Strategy {
        if task.skill.is_some() {
            Strategy::Skill
        } else if task.autonomous {
            Strategy::Autonomous
        } else {
            Strategy::Headless
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Headless => "headless",
            Strategy::Autonomous => "autonomous",
            Strategy::Skill => "skill",
            Strategy::PlanMode => "plan_mode",
            Strategy::ResumeWithApproval { .. } => "resume_with_approval",
            Strategy::ResumeWithFeedback { .. } => "resume_with_feedback",
            Strategy::Provider => "provider",
        }
    }

    pub fn request(&self, ctx: &ExecutionContext) -> ExecutionRequest {
        let task = &ctx.task;
        let mut request = ExecutionRequest::new(String::new(), ctx.working_dir.clone());
        request.model = ctx.skill.as_ref().and_then(|s| s.model).unwrap_or(task.model);
        request.timeout = task.timeout;
        request.max_turns = task.max_turns;
        request.allowed_tools = task.allowed_tools.clone();

        match self {
            Strategy::Headless => {
                request.prompt = ctx.prompt.clone();
                request.append_system_prompt = Some(SCHEDULED_TASK_PROMPT.into());
            }
            Strategy::Autonomous => {
                request.prompt = ctx.prompt.clone();
                request.autonomous = true;
                request.append_system_prompt = Some(SCHEDULED_TASK_PROMPT.into());
            }
            Strategy::Skill => {
                request.prompt = ctx.invocation_prompt();
                request.autonomous = task.autonomous;
                request.append_system_prompt = Some(SCHEDULED_TASK_PROMPT.into());
            }
            Strategy::PlanMode => {
                request.prompt = ctx.invocation_prompt();
                request.plan_mode = true;
                request.append_system_prompt = Some(PLAN_PHASE_PROMPT.into());
                // In plan mode a skill's tool list overrides the task's.
                if let Some(skill) = &ctx.skill {
                    if !skill.allowed_tools.is_empty() {
                        request.allowed_tools = skill.allowed_tools.clone();
                    }
                }
            }
            Strategy::ResumeWithApproval { session_id } => {
                request.prompt = APPROVED_RESUME_PROMPT.into();
                request.session_id = Some(session_id.clone());
                request.autonomous = true;
                request.append_system_prompt = Some(APPROVED_PHASE_PROMPT.into());
            }
            Strategy::ResumeWithFeedback {
                session_id,
                feedback,
            } => {
                request.prompt = feedback.clone();
                request.session_id = Some(session_id.clone());
                request.plan_mode = true;
                request.append_system_prompt = Some(PLAN_PHASE_PROMPT.into());
            }
            Strategy::Provider => {
                request.prompt = ctx.prompt.clone();
                request.autonomous = task.autonomous;
                request.plan_mode = task.plan_mode;
            }
        }
        request
    }

    /// Validate against the provider's capabilities and build the argv.
    pub fn build_command(
        &self,
        ctx: &ExecutionContext,
        provider: &dyn AgentProvider,
    ) -> Result<Vec<String>> {
        let request = self.request(ctx);
        provider.validate_request(&request)?;
        provider.build_command(&request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use vigil_skills::SkillLocation;
    use vigil_types::ModelTier;

    fn task() -> Task {
        Task {
            id: "t1".into(),
            name: "demo".into(),
            schedule: "* * * * *".into(),
            working_dir: PathBuf::from("/tmp"),
            skill: None,
            prompt: Some("do it".into()),
            allowed_tools: vec!["Read".into()],
            model: ModelTier::Medium,
            provider: None,
            autonomous: false,
            plan_mode: false,
            max_turns: Some(3),
            timeout: 120,
            enabled: true,
            variables: HashMap::new(),
            notifications: None,
            last_run: None,
            last_status: None,
        }
    }

    fn skill(name: &str, tools: Vec<String>) -> Skill {
        Skill {
            name: name.into(),
            description: "test".into(),
            allowed_tools: tools,
            model: None,
            location: SkillLocation::Global,
            path: PathBuf::from("/tmp"),
            body: "body $ARGUMENTS".into(),
        }
    }

    #[test]
    fn selection_order() {
        let mut t = task();
        assert_eq!(Strategy::select(&t), Strategy::Headless);
        t.autonomous = true;
        assert_eq!(Strategy::select(&t), Strategy::Autonomous);
        t.skill = Some("report".into());
        assert_eq!(Strategy::select(&t), Strategy::Skill);
    }

    #[test]
    fn skill_prompt_prefixes_slash_name() {
        let mut t = task();
        t.skill = Some("report".into());
        let mut ctx = ExecutionContext::for_task(&t);
        ctx.skill = Some(skill("report", vec![]));
        let request = Strategy::Skill.request(&ctx);
        assert_eq!(request.prompt, "/report do it");

        ctx.prompt = String::new();
        let request = Strategy::Skill.request(&ctx);
        assert_eq!(request.prompt, "/report");
    }

    #[test]
    fn plan_mode_prefers_skill_tools() {
        let t = task();
        let mut ctx = ExecutionContext::for_task(&t);
        ctx.skill = Some(skill("report", vec!["Bash".into(), "Write".into()]));
        let request = Strategy::PlanMode.request(&ctx);
        assert!(request.plan_mode);
        assert_eq!(request.allowed_tools, vec!["Bash", "Write"]);
        assert_eq!(
            request.append_system_prompt.as_deref(),
            Some(PLAN_PHASE_PROMPT)
        );
    }

    #[test]
    fn approved_resume_is_autonomous_with_canned_prompt() {
        let t = task();
        let ctx = ExecutionContext::for_task(&t);
        let strategy = Strategy::ResumeWithApproval {
            session_id: "sess-9".into(),
        };
        let request = strategy.request(&ctx);
        assert_eq!(request.prompt, APPROVED_RESUME_PROMPT);
        assert_eq!(request.session_id.as_deref(), Some("sess-9"));
        assert!(request.autonomous);
        assert!(!request.plan_mode);
    }

    #[test]
    fn provider_strategy_maps_task_flags_verbatim() {
        let mut t = task();
        t.autonomous = true;
        let ctx = ExecutionContext::for_task(&t);
        let request = Strategy::Provider.request(&ctx);
        assert_eq!(request.prompt, "do it");
        assert!(request.autonomous);
        assert!(!request.plan_mode);
        assert!(request.append_system_prompt.is_none());
    }

    #[test]
    fn feedback_resume_stays_in_plan_mode() {
        let t = task();
        let ctx = ExecutionContext::for_task(&t);
        let strategy = Strategy::ResumeWithFeedback {
            session_id: "sess-9".into(),
            feedback: "use Python 3.12".into(),
        };
        let request = strategy.request(&ctx);
        assert_eq!(request.prompt, "use Python 3.12");
        assert!(request.plan_mode);
        assert!(!request.autonomous);
    }
}
