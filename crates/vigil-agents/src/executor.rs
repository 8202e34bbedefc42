//! Subprocess execution of agent tasks.
//!
//! The executor owns the full lifecycle of one attempt: session minting,
//! strategy selection, spawning the agent CLI in the task's working
//! directory, streaming stdout through the provider's parser, the timeout
//! watchdog, and persisting exactly one `ExecutionResult` per attempt,
//! including on the error paths.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use vigil_core::{LogRepository, SessionManager, TaskRepository};
use vigil_skills::SkillRegistry;
use vigil_types::{ExecutionResult, ExecutionStatus, Result, Task, VigilError};

use crate::provider::{AgentProvider, OutputAccumulator};
use crate::registry::{AgentRegistry, DEFAULT_PROVIDER};
use crate::strategy::{ExecutionContext, Strategy};
use crate::tracker::ExecutionTracker;

/// Seconds between SIGTERM and SIGKILL when a run is cut short.
const KILL_GRACE_SECS: u64 = 5;

enum Waited {
    Exited(std::process::ExitStatus),
    TimedOut,
    Stopped,
}

struct RunOutcome {
    status: ExecutionStatus,
    exit_code: Option<i32>,
    error: Option<String>,
    acc: OutputAccumulator,
    raw_stdout: String,
}

pub struct Executor {
    tasks: Arc<TaskRepository>,
    logs: Arc<LogRepository>,
    sessions: Arc<SessionManager>,
    skills: Arc<SkillRegistry>,
    agents: Arc<AgentRegistry>,
    tracker: Arc<ExecutionTracker>,
}

impl Executor {
    pub fn new(
        tasks: Arc<TaskRepository>,
        logs: Arc<LogRepository>,
        sessions: Arc<SessionManager>,
        skills: Arc<SkillRegistry>,
        agents: Arc<AgentRegistry>,
        tracker: Arc<ExecutionTracker>,
    ) -> Self {
        Self {
            tasks,
            logs,
            sessions,
            skills,
            agents,
            tracker,
        }
    }

    pub fn tracker(&self) -> &Arc<ExecutionTracker> {
        &self.tracker
    }

    /// Execute with the primary-dispatch strategy for the task.
    pub async fn execute(&self, task: &Task, dry_run: bool) -> Result<ExecutionResult> {
        self.execute_with_strategy(task, Strategy::select(task), dry_run)
            .await
    }

    /// The command that would be spawned, without spawning it.
    pub fn preview_command(&self, task: &Task) -> Result<Vec<String>> {
        let provider = self.agents.get_or_default(task.provider.as_deref())?;
        let (ctx, strategy) = self.prepare(task, Strategy::select(task), provider.as_ref())?;
        strategy.build_command(&ctx, provider.as_ref())
    }

    pub async fn execute_with_strategy(
        &self,
        task: &Task,
        strategy: Strategy,
        dry_run: bool,
    ) -> Result<ExecutionResult> {
        if !task.working_dir.exists() {
            return Err(VigilError::WorkingDirMissing {
                task_id: task.id.clone(),
                path: task.working_dir.clone(),
            });
        }
        let provider = self.agents.get_or_default(task.provider.as_deref())?;

        let mut metadata = HashMap::new();
        metadata.insert("task_name".to_string(), json!(task.name));
        metadata.insert("strategy".to_string(), json!(strategy.name()));
        metadata.insert("dry_run".to_string(), json!(dry_run));
        let session = self.sessions.create_session(&task.id, metadata)?;
        let started_at = Utc::now();

        let (mut ctx, strategy) = match self.prepare(task, strategy, provider.as_ref()) {
            Ok(prepared) => prepared,
            Err(e) => return self.fail(task, &session.id, started_at, e),
        };
        ctx.session_id = Some(session.id.clone());

        let argv = match strategy.build_command(&ctx, provider.as_ref()) {
            Ok(argv) => argv,
            Err(e) => return self.fail(task, &session.id, started_at, e),
        };

        if dry_run {
            let finished_at = Utc::now();
            let result = ExecutionResult {
                task_id: task.id.clone(),
                session_id: session.id.clone(),
                status: ExecutionStatus::Skipped,
                output: format!("dry run - command: {}", argv.join(" ")),
                error: None,
                started_at,
                finished_at,
                exit_code: None,
                metadata: run_metadata(provider.as_ref(), &strategy),
            };
            self.persist(task, &result)?;
            return Ok(result);
        }

        // Claim the task's execution slot; resumes convert a parked
        // waiting_approval entry instead of being rejected by it.
        let handle = match &strategy {
            Strategy::ResumeWithApproval { .. } | Strategy::ResumeWithFeedback { .. } => {
                self.tracker.resume(&task.id)?
            }
            _ => self.tracker.start(&task.id)?,
        };

        debug!(task = %task.name, strategy = strategy.name(), "spawning agent");
        let run = self
            .run_subprocess(task, provider.clone(), &argv, &ctx.working_dir, handle.cancel)
            .await;

        let outcome = match run {
            Ok(outcome) => outcome,
            Err(e) => {
                self.tracker.finish(&task.id);
                return self.fail(task, &session.id, started_at, e);
            }
        };

        let mut status = outcome.status;
        if status == ExecutionStatus::Success
            && matches!(
                strategy,
                Strategy::PlanMode | Strategy::ResumeWithFeedback { .. }
            )
        {
            // A successful planning run parks the task until a human decides.
            status = ExecutionStatus::WaitingApproval;
        }

        // The provider's own session id becomes authoritative when present.
        let session_id = match outcome.acc.session_id() {
            Some(provider_sid) => {
                self.sessions.adopt_provider_id(&session.id, provider_sid)?;
                provider_sid.to_string()
            }
            None => session.id.clone(),
        };

        let text = outcome.acc.text();
        let output = if text.is_empty() {
            outcome.raw_stdout.trim_end().to_string()
        } else {
            text
        };

        let result = ExecutionResult {
            task_id: task.id.clone(),
            session_id,
            status,
            output,
            error: outcome.error,
            started_at,
            finished_at: Utc::now(),
            exit_code: outcome.exit_code,
            metadata: run_metadata(provider.as_ref(), &strategy),
        };
        self.persist(task, &result)?;

        if status == ExecutionStatus::WaitingApproval {
            self.tracker.set_waiting_approval(&task.id, None);
        } else {
            self.tracker.finish(&task.id);
        }
        Ok(result)
    }

    fn prepare(
        &self,
        task: &Task,
        strategy: Strategy,
        provider: &dyn AgentProvider,
    ) -> Result<(ExecutionContext, Strategy)> {
        let mut ctx = ExecutionContext::for_task(task);
        let mut strategy = strategy;
        let claude_style = provider.name() == DEFAULT_PROVIDER;
        if let Some(skill_name) = &task.skill {
            let skill = self.skills.get(skill_name)?;
            if claude_style {
                ctx.skill = Some(skill);
            } else {
                // Slash-command invocation is a claude-CLI feature; other
                // providers get the rendered skill body as a plain prompt.
                ctx.prompt = skill.render(&ctx.prompt);
            }
        }
        // Primary dispatch on a non-claude provider goes through the
        // generic provider strategy; resume/plan phases keep their shape so
        // capability validation can reject them where unsupported.
        if !claude_style
            && matches!(
                strategy,
                Strategy::Headless | Strategy::Autonomous | Strategy::Skill
            )
        {
            strategy = Strategy::Provider;
        }
        Ok((ctx, strategy))
    }

    async fn run_subprocess(
        &self,
        task: &Task,
        provider: Arc<dyn AgentProvider>,
        argv: &[String],
        working_dir: &Path,
        cancel: CancellationToken,
    ) -> Result<RunOutcome> {
        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .current_dir(working_dir)
            .env_remove(provider.api_key_env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| VigilError::Execution {
            task_id: task.id.clone(),
            reason: format!("failed to spawn '{}': {e}", argv[0]),
        })?;

        let stdout = child.stdout.take().ok_or_else(|| VigilError::Execution {
            task_id: task.id.clone(),
            reason: "child stdout was not captured".into(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| VigilError::Execution {
            task_id: task.id.clone(),
            reason: "child stderr was not captured".into(),
        })?;

        let parser = provider.clone();
        let stdout_reader = tokio::spawn(async move {
            let mut acc = OutputAccumulator::default();
            let mut raw = String::new();
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                parser.parse_line(&line, &mut acc);
                raw.push_str(&line);
                raw.push('\n');
            }
            (acc, raw)
        });
        let stderr_reader = tokio::spawn(async move {
            let mut buf = String::new();
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                buf.push_str(&line);
                buf.push('\n');
            }
            buf
        });

        let waited = tokio::select! {
            status = child.wait() => Waited::Exited(status.map_err(|e| VigilError::Execution {
                task_id: task.id.clone(),
                reason: format!("wait failed: {e}"),
            })?),
            _ = tokio::time::sleep(Duration::from_secs(task.timeout)) => Waited::TimedOut,
            _ = cancel.cancelled() => Waited::Stopped,
        };

        if !matches!(waited, Waited::Exited(_)) {
            terminate_gracefully(&mut child).await;
        }

        let (acc, raw_stdout) = stdout_reader
            .await
            .unwrap_or_else(|_| (OutputAccumulator::default(), String::new()));
        let stderr_text = stderr_reader.await.unwrap_or_default();

        let (status, exit_code, error) = match waited {
            Waited::Exited(exit) => {
                if exit.success() {
                    (ExecutionStatus::Success, exit.code(), None)
                } else {
                    let error = if stderr_text.trim().is_empty() {
                        format!("agent exited with {exit}")
                    } else {
                        stderr_text.trim_end().to_string()
                    };
                    (ExecutionStatus::Failure, exit.code(), Some(error))
                }
            }
            Waited::TimedOut => (
                ExecutionStatus::Timeout,
                None,
                Some(format!("Execution timed out after {}s", task.timeout)),
            ),
            Waited::Stopped => (
                ExecutionStatus::Stopped,
                None,
                Some("Execution stopped by user".to_string()),
            ),
        };

        Ok(RunOutcome {
            status,
            exit_code,
            error,
            acc,
            raw_stdout,
        })
    }

    /// Build, persist and propagate a failure for errors caught mid-attempt.
    /// The result always reaches the log before the error reaches the caller.
    fn fail(
        &self,
        task: &Task,
        session_id: &str,
        started_at: DateTime<Utc>,
        err: VigilError,
    ) -> Result<ExecutionResult> {
        let result = ExecutionResult {
            task_id: task.id.clone(),
            session_id: session_id.to_string(),
            status: ExecutionStatus::Failure,
            output: String::new(),
            error: Some(err.to_string()),
            started_at,
            finished_at: Utc::now(),
            exit_code: None,
            metadata: HashMap::new(),
        };
        if let Err(persist_err) = self.persist(task, &result) {
            warn!(task = %task.id, "could not persist failure result: {persist_err}");
        }
        Err(err)
    }

    fn persist(&self, task: &Task, result: &ExecutionResult) -> Result<()> {
        self.tasks.record_run(&task.id, result.status.as_str())?;
        self.sessions.complete_session(
            &result.session_id,
            result.status.as_str(),
            Some(result.output.clone()).filter(|o| !o.is_empty()),
            result.error.clone(),
        )?;
        self.logs.save(result)?;
        Ok(())
    }
}

fn run_metadata(
    provider: &dyn AgentProvider,
    strategy: &Strategy,
) -> HashMap<String, serde_json::Value> {
    let mut metadata = HashMap::new();
    metadata.insert("provider".to_string(), json!(provider.name()));
    metadata.insert("strategy".to_string(), json!(strategy.name()));
    metadata
}

/// SIGTERM, a bounded grace period, then SIGKILL.
async fn terminate_gracefully(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
        if tokio::time::timeout(Duration::from_secs(KILL_GRACE_SECS), child.wait())
            .await
            .is_ok()
        {
            return;
        }
    }
    let _ = child.kill().await;
    let _ = child.wait().await;
}
