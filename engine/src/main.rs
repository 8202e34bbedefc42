use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vigil_agents::{AgentRegistry, ExecutionTracker, Executor};
use vigil_approvals::{ApprovalService, ApprovalStore, CallbackBridge};
use vigil_channels::{
    CallbackPoller, ChannelStore, CredentialStore, Dispatcher, KeyringCredentialStore,
    NotificationRegistry,
};
use vigil_core::{resolve_state_dir, DataPaths, EngineConfig, LogRepository, SessionManager, TaskRepository};
use vigil_scheduler::{CompleteCallback, Scheduler, StartCallback};
use vigil_skills::SkillRegistry;
use vigil_types::{ExecutionStatus, NotificationEvent};

#[derive(Parser, Debug)]
#[command(name = "vigil-engine")]
#[command(about = "Cron-style task runner for LLM agent sessions")]
struct Cli {
    /// State directory (defaults to $VIGIL_STATE_DIR, then ~/.vigil)
    #[arg(long, global = true)]
    state_dir: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler loop, approval sweeps and callback pollers.
    Serve,
    /// Run a single task by name.
    Run {
        name: String,
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Run every task due within the window.
    RunDue {
        #[arg(long, default_value_t = 60)]
        window: u64,
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Run all enabled tasks regardless of schedule.
    RunAll {
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// List configured tasks.
    List,
    /// Scheduler status: counts, due tasks and next runs.
    Status,
    /// Fire times within the next N hours.
    Upcoming {
        #[arg(long, default_value_t = 24)]
        hours: u64,
    },
    /// Validate a cron expression and show its next fire times.
    Validate { expression: String },
    /// List agent providers and their capabilities.
    Providers,
    /// Probe a notification channel's connectivity.
    TestChannel { id: String },
}

struct AppState {
    config: EngineConfig,
    tasks: Arc<TaskRepository>,
    channels: Arc<ChannelStore>,
    credentials: Arc<dyn CredentialStore>,
    dispatcher: Arc<Dispatcher>,
    approvals: Arc<ApprovalService>,
    scheduler: Arc<Scheduler>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let state_dir = resolve_state_dir(cli.state_dir.clone());
    let state = build_state(&state_dir).await?;

    match cli.command {
        Command::Serve => serve(state, &state_dir).await?,
        Command::Run { name, dry_run } => {
            let result = state.scheduler.run_by_name(&name, dry_run).await?;
            print_result(&result);
        }
        Command::RunDue { window, dry_run } => {
            let results = state.scheduler.clone().run_due(window, dry_run).await;
            if results.is_empty() {
                println!("no tasks due");
            }
            for result in &results {
                print_result(result);
            }
        }
        Command::RunAll { dry_run } => {
            for result in &state.scheduler.clone().run_all(dry_run).await {
                print_result(result);
            }
        }
        Command::List => {
            for task in state.tasks.find_all() {
                println!(
                    "{:<24} {:<16} {:<10} last: {}",
                    task.name,
                    task.schedule,
                    if task.enabled { "enabled" } else { "disabled" },
                    task.last_status.as_deref().unwrap_or("never")
                );
            }
        }
        Command::Status => {
            let status = state.scheduler.status();
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Upcoming { hours } => {
            for run in state.scheduler.get_upcoming(hours) {
                println!(
                    "{}  {:<24} ({})",
                    run.scheduled_at.format("%Y-%m-%d %H:%M"),
                    run.task_name,
                    run.schedule_description
                );
            }
        }
        Command::Validate { expression } => {
            let report = validate_report(&expression);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Providers => {
            let registry = AgentRegistry::new();
            for info in registry.list_info() {
                println!(
                    "{:<8} {:<16} available: {:<5} plan_mode: {:<5} resume: {}",
                    info.name,
                    info.display_name,
                    info.is_available,
                    info.capabilities.plan_mode,
                    info.capabilities.resume
                );
            }
        }
        Command::TestChannel { id } => {
            let (ok, detail) = state.dispatcher.test_channel(&id).await;
            println!("{}: {detail}", if ok { "ok" } else { "failed" });
            if !ok {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

async fn build_state(state_dir: &PathBuf) -> anyhow::Result<AppState> {
    let paths = DataPaths::new(state_dir.clone());
    paths.ensure().context("cannot create state directory")?;

    let config = EngineConfig::load(&paths.config_file())?;
    let tasks = Arc::new(TaskRepository::load(paths.tasks_file())?);
    let logs = Arc::new(LogRepository::new(paths.logs_dir())?);
    let sessions = Arc::new(SessionManager::new(paths.sessions_dir())?);
    let skills = Arc::new(SkillRegistry::for_workspace(std::env::current_dir().ok())?);
    let agents = Arc::new(AgentRegistry::new());
    let tracker = Arc::new(ExecutionTracker::new());
    let executor = Arc::new(Executor::new(
        tasks.clone(),
        logs,
        sessions,
        skills,
        agents,
        tracker,
    ));

    let channels = Arc::new(ChannelStore::load(paths.channels_file())?);
    let credentials: Arc<dyn CredentialStore> = Arc::new(KeyringCredentialStore::new());
    let dispatcher = Arc::new(Dispatcher::new(
        channels.clone(),
        credentials.clone(),
        Arc::new(NotificationRegistry::new()),
    ));

    let approval_store = Arc::new(ApprovalStore::new(paths.approvals_dir())?);
    let approvals = Arc::new(ApprovalService::new(
        approval_store,
        tasks.clone(),
        executor.clone(),
        dispatcher.clone(),
        config.approval_ttl_hours,
    ));
    approvals.startup_cleanup()?;

    let scheduler = Arc::new(Scheduler::new(
        tasks.clone(),
        executor,
        config.max_concurrent,
    ));
    wire_callbacks(&scheduler, &dispatcher, &approvals);

    Ok(AppState {
        config,
        tasks,
        channels,
        credentials,
        dispatcher,
        approvals,
        scheduler,
    })
}

/// Scheduler → notifications/approvals wiring. The kernel only sees the two
/// callbacks; the approval service only sees the executor.
fn wire_callbacks(
    scheduler: &Arc<Scheduler>,
    dispatcher: &Arc<Dispatcher>,
    approvals: &Arc<ApprovalService>,
) {
    let start_dispatcher = dispatcher.clone();
    let on_start: StartCallback = Arc::new(move |task| {
        let dispatcher = start_dispatcher.clone();
        Box::pin(async move {
            dispatcher
                .notify(NotificationEvent::TaskStart, &task, None)
                .await;
        })
    });

    let complete_dispatcher = dispatcher.clone();
    let complete_approvals = approvals.clone();
    let on_complete: CompleteCallback = Arc::new(move |task, result| {
        let dispatcher = complete_dispatcher.clone();
        let approvals = complete_approvals.clone();
        Box::pin(async move {
            if result.status == ExecutionStatus::WaitingApproval {
                if let Err(e) = approvals.begin(&task, &result).await {
                    warn!(task = %task.name, "could not open plan approval: {e}");
                }
                dispatcher
                    .notify(NotificationEvent::PlanReady, &task, Some(&result))
                    .await;
                return;
            }
            dispatcher
                .notify(NotificationEvent::TaskComplete, &task, Some(&result))
                .await;
            let event = if result.status.is_success() {
                NotificationEvent::TaskSuccess
            } else {
                NotificationEvent::TaskFailure
            };
            dispatcher.notify(event, &task, Some(&result)).await;
        })
    });

    scheduler.set_callbacks(Some(on_start), Some(on_complete));
}

async fn serve(state: AppState, state_dir: &PathBuf) -> anyhow::Result<()> {
    info!(
        "starting vigil-engine: state_dir={} tick={}s window={}s max_concurrent={}",
        state_dir.display(),
        state.config.tick_interval_secs,
        state.config.due_window_secs,
        state.config.max_concurrent
    );

    let cancel = CancellationToken::new();

    let poller = Arc::new(CallbackPoller::new(
        state.channels.clone(),
        state.credentials.clone(),
        Arc::new(CallbackBridge(state.approvals.clone())),
        state.config.poll_timeout_secs,
    ));
    let poller_handles = poller.spawn(cancel.clone());

    let sweep = {
        let approvals = state.approvals.clone();
        let cancel = cancel.clone();
        let interval = state.config.tick_interval_secs;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(Duration::from_secs(interval)) => {}
                }
                match approvals.sweep_expired().await {
                    Ok(0) => {}
                    Ok(n) => info!(count = n, "expired stale approvals"),
                    Err(e) => warn!("approval sweep failed: {e}"),
                }
            }
        })
    };

    let loop_handle = tokio::spawn(state.scheduler.clone().run_loop(
        state.config.due_window_secs,
        state.config.tick_interval_secs,
        cancel.clone(),
    ));

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    cancel.cancel();

    let _ = loop_handle.await;
    let _ = sweep.await;
    // Pollers sit in long polls; give them a bounded window to notice.
    let _ = tokio::time::timeout(
        Duration::from_secs(5),
        futures::future::join_all(poller_handles),
    )
    .await;

    Ok(())
}

fn print_result(result: &vigil_types::ExecutionResult) {
    println!(
        "{} [{}] session={} exit={}",
        result.task_id,
        result.status.as_str(),
        result.session_id,
        result
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".into())
    );
    if !result.output.is_empty() {
        println!("{}", result.output);
    }
    if let Some(error) = &result.error {
        eprintln!("error: {error}");
    }
}

fn validate_report(expression: &str) -> serde_json::Value {
    if !vigil_cron::validate(expression) {
        return serde_json::json!({
            "valid": false,
            "error": format!("unparseable cron expression '{expression}'"),
        });
    }
    let next_runs = vigil_cron::next_n(expression, 5, chrono::Utc::now())
        .unwrap_or_default()
        .into_iter()
        .map(|t| t.to_rfc3339())
        .collect::<Vec<_>>();
    serde_json::json!({
        "valid": true,
        "description": vigil_cron::describe(expression),
        "next_runs": next_runs,
    })
}
