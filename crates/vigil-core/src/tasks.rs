use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use vigil_types::{Result, Task, VigilError};

#[derive(Debug, Default, Serialize, Deserialize)]
struct TaskFile {
    #[serde(default)]
    tasks: Vec<Task>,
}

/// Durable task store over a single YAML document.
///
/// Reads serve from the last-loaded snapshot; writes mutate the snapshot and
/// rewrite the whole document atomically (write-temp-rename).
pub struct TaskRepository {
    path: PathBuf,
    tasks: RwLock<Vec<Task>>,
}

impl TaskRepository {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let tasks = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let file: TaskFile = serde_yaml::from_str(&raw)?;
            file.tasks
        } else {
            Vec::new()
        };
        debug!(count = tasks.len(), path = %path.display(), "loaded task file");
        Ok(Self {
            path,
            tasks: RwLock::new(tasks),
        })
    }

    pub fn find_all(&self) -> Vec<Task> {
        self.tasks.read().clone()
    }

    pub fn find_enabled(&self) -> Vec<Task> {
        self.tasks.read().iter().filter(|t| t.enabled).cloned().collect()
    }

    pub fn find_by_id(&self, id: &str) -> Option<Task> {
        self.tasks.read().iter().find(|t| t.id == id).cloned()
    }

    pub fn find_by_name(&self, name: &str) -> Option<Task> {
        self.tasks.read().iter().find(|t| t.name == name).cloned()
    }

    /// Enabled tasks whose schedule fired within the last `window_seconds`,
    /// sorted by name for a deterministic dispatch order.
    pub fn find_due(&self, window_seconds: u64) -> Vec<Task> {
        let now = Utc::now();
        let window_start = now - Duration::seconds(window_seconds as i64);
        let mut due: Vec<Task> = self
            .tasks
            .read()
            .iter()
            .filter(|t| t.enabled)
            .filter(|t| match vigil_cron::next_after(&t.schedule, window_start) {
                Ok(fire) => fire <= now,
                Err(_) => false,
            })
            .cloned()
            .collect();
        due.sort_by(|a, b| a.name.cmp(&b.name));
        due
    }

    pub fn save(&self, task: Task) -> Result<()> {
        self.validate(&task)?;
        let mut tasks = self.tasks.write();
        if tasks.iter().any(|t| t.name == task.name) {
            return Err(VigilError::DuplicateName(task.name));
        }
        if tasks.iter().any(|t| t.id == task.id) {
            return Err(VigilError::Validation {
                task: Some(task.id.clone()),
                reason: "a task with this id already exists; use update".into(),
            });
        }
        tasks.push(task);
        self.flush(&tasks)
    }

    pub fn update(&self, task: Task) -> Result<()> {
        self.validate(&task)?;
        let mut tasks = self.tasks.write();
        if tasks.iter().any(|t| t.name == task.name && t.id != task.id) {
            return Err(VigilError::DuplicateName(task.name));
        }
        let Some(slot) = tasks.iter_mut().find(|t| t.id == task.id) else {
            return Err(VigilError::Validation {
                task: Some(task.id.clone()),
                reason: "unknown task id".into(),
            });
        };
        *slot = task;
        self.flush(&tasks)
    }

    pub fn delete_by_id(&self, id: &str) -> Result<bool> {
        let mut tasks = self.tasks.write();
        let before = tasks.len();
        tasks.retain(|t| t.id != id);
        if tasks.len() == before {
            return Ok(false);
        }
        self.flush(&tasks)?;
        Ok(true)
    }

    pub fn delete_by_name(&self, name: &str) -> Result<bool> {
        let mut tasks = self.tasks.write();
        let before = tasks.len();
        tasks.retain(|t| t.name != name);
        if tasks.len() == before {
            return Ok(false);
        }
        self.flush(&tasks)?;
        Ok(true)
    }

    /// Record the outcome of the latest run on the task row.
    pub fn record_run(&self, task_id: &str, status: &str) -> Result<()> {
        let mut tasks = self.tasks.write();
        if let Some(task) = tasks.iter_mut().find(|t| t.id == task_id) {
            task.update_last_run(status);
            self.flush(&tasks)?;
        }
        Ok(())
    }

    fn validate(&self, task: &Task) -> Result<()> {
        task.check_invariants()?;
        if !vigil_cron::validate(&task.schedule) {
            return Err(VigilError::Validation {
                task: Some(task.id.clone()),
                reason: format!("unparseable cron expression '{}'", task.schedule),
            });
        }
        if !task.working_dir.is_absolute() {
            return Err(VigilError::Validation {
                task: Some(task.id.clone()),
                reason: format!(
                    "working directory must be absolute: {}",
                    task.working_dir.display()
                ),
            });
        }
        if !task.working_dir.exists() {
            return Err(VigilError::Validation {
                task: Some(task.id.clone()),
                reason: format!(
                    "working directory does not exist: {}",
                    task.working_dir.display()
                ),
            });
        }
        Ok(())
    }

    fn flush(&self, tasks: &[Task]) -> Result<()> {
        let file = TaskFile {
            tasks: tasks.to_vec(),
        };
        let yaml = serde_yaml::to_string(&file)?;
        write_atomic(&self.path, yaml.as_bytes())?;
        Ok(())
    }
}

/// Write-temp-rename so readers never observe a half-written document.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}
