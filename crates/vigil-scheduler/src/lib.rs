//! Scheduler kernel: finds due tasks, enforces the concurrency cap, drives
//! the executor, and fires the injected lifecycle callbacks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use vigil_agents::{Executor, Strategy};
use vigil_core::TaskRepository;
use vigil_types::{ExecutionResult, Result, Task, VigilError};

/// Fired before an execution's subprocess spawns.
pub type StartCallback = Arc<dyn Fn(Task) -> BoxFuture<'static, ()> + Send + Sync>;
/// Fired after an execution's result is persisted.
pub type CompleteCallback = Arc<dyn Fn(Task, ExecutionResult) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub enabled_tasks: usize,
    pub disabled_tasks: usize,
    pub due_tasks: Vec<String>,
    pub next_runs: HashMap<String, DateTime<Utc>>,
    pub running_executions: usize,
    pub current_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpcomingRun {
    pub task_id: String,
    pub task_name: String,
    pub scheduled_at: DateTime<Utc>,
    pub schedule: String,
    pub schedule_description: String,
}

pub struct Scheduler {
    tasks: Arc<TaskRepository>,
    executor: Arc<Executor>,
    semaphore: Arc<Semaphore>,
    on_start: RwLock<Option<StartCallback>>,
    on_complete: RwLock<Option<CompleteCallback>>,
}

impl Scheduler {
    pub fn new(tasks: Arc<TaskRepository>, executor: Arc<Executor>, max_concurrent: usize) -> Self {
        Self {
            tasks,
            executor,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            on_start: RwLock::new(None),
            on_complete: RwLock::new(None),
        }
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// Register the notification/approval handlers. The kernel holds no
    /// back-pointers; everything downstream is reached through these.
    pub fn set_callbacks(
        &self,
        on_start: Option<StartCallback>,
        on_complete: Option<CompleteCallback>,
    ) {
        *self.on_start.write() = on_start;
        *self.on_complete.write() = on_complete;
    }

    pub fn find_due(&self, window_seconds: u64) -> Vec<Task> {
        self.tasks.find_due(window_seconds)
    }

    /// Run one task now. Rejects with `AlreadyRunning` when the task is
    /// live or parked on an approval.
    pub async fn run_task(&self, task: &Task, dry_run: bool) -> Result<ExecutionResult> {
        if !dry_run && self.executor.tracker().get_by_task(&task.id).is_some() {
            return Err(VigilError::AlreadyRunning(task.name.clone()));
        }

        let on_start = self.on_start.read().clone();
        if let Some(on_start) = on_start {
            on_start(task.clone()).await;
        }

        // Plan-mode tasks take the two-phase path: run phase 1 read-only;
        // the approval service picks the result up via on_complete.
        let result = if task.plan_mode && !dry_run {
            self.executor
                .execute_with_strategy(task, Strategy::PlanMode, false)
                .await?
        } else {
            self.executor.execute(task, dry_run).await?
        };

        let on_complete = self.on_complete.read().clone();
        if let Some(on_complete) = on_complete {
            on_complete(task.clone(), result.clone()).await;
        }
        Ok(result)
    }

    /// Run every due task, at most `max_concurrent` at a time, claiming
    /// permits in name order so dispatch is FIFO and deterministic.
    pub async fn run_due(
        self: Arc<Self>,
        window_seconds: u64,
        dry_run: bool,
    ) -> Vec<ExecutionResult> {
        let due = self.find_due(window_seconds);
        if !due.is_empty() {
            info!(count = due.len(), "dispatching due tasks");
        }
        self.run_batch(due, dry_run).await
    }

    /// Run all enabled tasks regardless of schedule.
    pub async fn run_all(self: Arc<Self>, dry_run: bool) -> Vec<ExecutionResult> {
        let mut tasks = self.tasks.find_enabled();
        tasks.sort_by(|a, b| a.name.cmp(&b.name));
        self.run_batch(tasks, dry_run).await
    }

    pub async fn run_by_name(&self, name: &str, dry_run: bool) -> Result<ExecutionResult> {
        let Some(task) = self.tasks.find_by_name(name) else {
            return Err(VigilError::Validation {
                task: None,
                reason: format!("no task named '{name}'"),
            });
        };
        self.run_task(&task, dry_run).await
    }

    async fn run_batch(self: Arc<Self>, tasks: Vec<Task>, dry_run: bool) -> Vec<ExecutionResult> {
        let mut handles = Vec::new();
        for task in tasks {
            // Acquiring in iteration order keeps dispatch FIFO under the cap.
            let Ok(permit) = self.semaphore.clone().acquire_owned().await else {
                break;
            };
            let scheduler = self.clone();
            handles.push(tokio::spawn(async move {
                let outcome = scheduler.run_task(&task, dry_run).await;
                drop(permit);
                match outcome {
                    Ok(result) => Some(result),
                    Err(e) => {
                        warn!(task = %task.name, "execution failed: {e}");
                        None
                    }
                }
            }));
        }
        let mut results = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Some(result)) => results.push(result),
                Ok(None) => {}
                Err(e) => error!("execution task panicked: {e}"),
            }
        }
        results
    }

    pub fn status(&self) -> SchedulerStatus {
        let all = self.tasks.find_all();
        let now = Utc::now();
        let enabled: Vec<&Task> = all.iter().filter(|t| t.enabled).collect();
        let mut next_runs = HashMap::new();
        for task in &enabled {
            if let Ok(next) = vigil_cron::next_after(&task.schedule, now) {
                next_runs.insert(task.name.clone(), next);
            }
        }
        SchedulerStatus {
            enabled_tasks: enabled.len(),
            disabled_tasks: all.len() - enabled.len(),
            due_tasks: self.find_due(60).into_iter().map(|t| t.name).collect(),
            next_runs,
            running_executions: self.executor.tracker().running_count(),
            current_time: now,
        }
    }

    /// Fire times for every enabled task within the next `hours`, sorted.
    pub fn get_upcoming(&self, hours: u64) -> Vec<UpcomingRun> {
        let now = Utc::now();
        let cutoff = now + chrono::Duration::hours(hours as i64);
        let mut upcoming = Vec::new();
        for task in self.tasks.find_enabled() {
            let Ok(runs) = vigil_cron::next_n(&task.schedule, 10, now) else {
                continue;
            };
            for scheduled_at in runs.into_iter().filter(|t| *t <= cutoff) {
                upcoming.push(UpcomingRun {
                    task_id: task.id.clone(),
                    task_name: task.name.clone(),
                    scheduled_at,
                    schedule: task.schedule.clone(),
                    schedule_description: vigil_cron::describe(&task.schedule),
                });
            }
        }
        upcoming.sort_by(|a, b| {
            a.scheduled_at
                .cmp(&b.scheduled_at)
                .then_with(|| a.task_name.cmp(&b.task_name))
        });
        upcoming
    }

    /// Periodic tick loop for serve mode. A failing tick is logged and the
    /// next tick proceeds normally.
    pub async fn run_loop(
        self: Arc<Self>,
        window_seconds: u64,
        interval_seconds: u64,
        cancel: CancellationToken,
    ) {
        info!(interval = interval_seconds, "scheduler loop started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("scheduler loop stopping");
                    return;
                }
                _ = tokio::time::sleep(Duration::from_secs(interval_seconds)) => {}
            }
            let results = self.clone().run_due(window_seconds, false).await;
            if !results.is_empty() {
                info!(count = results.len(), "tick finished");
            }
        }
    }
}
