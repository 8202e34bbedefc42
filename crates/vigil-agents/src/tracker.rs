use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use vigil_types::{ExecutionStatus, Result, VigilError};

/// Public view of a live execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionEntry {
    pub execution_id: String,
    pub task_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<String>,
}

struct TrackedExecution {
    entry: ExecutionEntry,
    cancel: CancellationToken,
}

/// Handle given to the executor for one run: the id for stop lookups and
/// the token it must watch.
#[derive(Debug, Clone)]
pub struct ExecutionHandle {
    pub execution_id: String,
    pub cancel: CancellationToken,
}

/// In-memory registry of live executions, keyed by task id.
///
/// Enforces the re-entrancy rule: one execution per task at a time, where a
/// paused `waiting_approval` run still counts as occupying the slot.
pub struct ExecutionTracker {
    entries: Mutex<HashMap<String, TrackedExecution>>,
}

impl ExecutionTracker {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Claim the task's execution slot. Fails with `AlreadyRunning` when the
    /// task is running or parked on an approval.
    pub fn start(&self, task_id: &str) -> Result<ExecutionHandle> {
        let mut entries = self.entries.lock();
        if entries.contains_key(task_id) {
            return Err(VigilError::AlreadyRunning(task_id.to_string()));
        }
        Ok(insert_entry(&mut entries, task_id))
    }

    /// Claim the slot for a resume: converts a `waiting_approval` entry into
    /// a running one. A plain running entry still rejects.
    pub fn resume(&self, task_id: &str) -> Result<ExecutionHandle> {
        let mut entries = self.entries.lock();
        match entries.get(task_id) {
            Some(existing) if existing.entry.status == ExecutionStatus::Running => {
                return Err(VigilError::AlreadyRunning(task_id.to_string()));
            }
            Some(_) => {
                entries.remove(task_id);
            }
            None => {}
        }
        Ok(insert_entry(&mut entries, task_id))
    }

    /// Park the task's entry while its plan awaits a decision.
    pub fn set_waiting_approval(&self, task_id: &str, approval_id: Option<String>) {
        let mut entries = self.entries.lock();
        if let Some(tracked) = entries.get_mut(task_id) {
            tracked.entry.status = ExecutionStatus::WaitingApproval;
            tracked.entry.approval_id = approval_id;
        }
    }

    pub fn link_approval(&self, task_id: &str, approval_id: &str) {
        let mut entries = self.entries.lock();
        if let Some(tracked) = entries.get_mut(task_id) {
            tracked.entry.approval_id = Some(approval_id.to_string());
        }
    }

    pub fn finish(&self, task_id: &str) {
        self.entries.lock().remove(task_id);
    }

    /// Signal the subprocess behind an execution id. Returns `false` when no
    /// such execution is live.
    pub fn stop(&self, execution_id: &str) -> bool {
        let entries = self.entries.lock();
        for tracked in entries.values() {
            if tracked.entry.execution_id == execution_id {
                tracked.cancel.cancel();
                return true;
            }
        }
        false
    }

    pub fn get_by_task(&self, task_id: &str) -> Option<ExecutionEntry> {
        self.entries.lock().get(task_id).map(|t| t.entry.clone())
    }

    pub fn list(&self) -> Vec<ExecutionEntry> {
        self.entries.lock().values().map(|t| t.entry.clone()).collect()
    }

    pub fn running_count(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|t| t.entry.status == ExecutionStatus::Running)
            .count()
    }

    /// Startup scan: drop `waiting_approval` entries whose approval no
    /// longer exists.
    pub fn cleanup_stale(&self, valid_approval_ids: &HashSet<String>) {
        let mut entries = self.entries.lock();
        entries.retain(|_, tracked| {
            if tracked.entry.status != ExecutionStatus::WaitingApproval {
                return true;
            }
            match &tracked.entry.approval_id {
                Some(id) => valid_approval_ids.contains(id),
                None => false,
            }
        });
    }
}

impl Default for ExecutionTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn insert_entry(
    entries: &mut HashMap<String, TrackedExecution>,
    task_id: &str,
) -> ExecutionHandle {
    let cancel = CancellationToken::new();
    let entry = ExecutionEntry {
        execution_id: Uuid::new_v4().to_string(),
        task_id: task_id.to_string(),
        status: ExecutionStatus::Running,
        started_at: Utc::now(),
        approval_id: None,
    };
    let handle = ExecutionHandle {
        execution_id: entry.execution_id.clone(),
        cancel: cancel.clone(),
    };
    entries.insert(task_id.to_string(), TrackedExecution { entry, cancel });
    handle
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_start_rejected() {
        let tracker = ExecutionTracker::new();
        let _handle = tracker.start("t1").unwrap();
        assert!(matches!(
            tracker.start("t1"),
            Err(VigilError::AlreadyRunning(id)) if id == "t1"
        ));
        tracker.finish("t1");
        assert!(tracker.start("t1").is_ok());
    }

    #[test]
    fn waiting_approval_still_occupies_the_slot() {
        let tracker = ExecutionTracker::new();
        let _handle = tracker.start("t1").unwrap();
        tracker.set_waiting_approval("t1", Some("a1".into()));
        assert!(tracker.start("t1").is_err());
        // But a resume converts it.
        let handle = tracker.resume("t1").unwrap();
        assert!(!handle.execution_id.is_empty());
        assert_eq!(
            tracker.get_by_task("t1").unwrap().status,
            ExecutionStatus::Running
        );
    }

    #[test]
    fn resume_rejects_an_actively_running_task() {
        let tracker = ExecutionTracker::new();
        let _handle = tracker.start("t1").unwrap();
        assert!(tracker.resume("t1").is_err());
    }

    #[test]
    fn stop_cancels_by_execution_id() {
        let tracker = ExecutionTracker::new();
        let handle = tracker.start("t1").unwrap();
        assert!(!handle.cancel.is_cancelled());
        assert!(tracker.stop(&handle.execution_id));
        assert!(handle.cancel.is_cancelled());
        assert!(!tracker.stop("no-such-execution"));
    }

    #[test]
    fn cleanup_drops_only_stale_waiting_entries() {
        let tracker = ExecutionTracker::new();
        tracker.start("running").unwrap();
        tracker.start("kept").unwrap();
        tracker.set_waiting_approval("kept", Some("a-live".into()));
        tracker.start("stale").unwrap();
        tracker.set_waiting_approval("stale", Some("a-gone".into()));
        tracker.start("unlinked").unwrap();
        tracker.set_waiting_approval("unlinked", None);

        let valid: HashSet<String> = ["a-live".to_string()].into_iter().collect();
        tracker.cleanup_stale(&valid);

        assert!(tracker.get_by_task("running").is_some());
        assert!(tracker.get_by_task("kept").is_some());
        assert!(tracker.get_by_task("stale").is_none());
        assert!(tracker.get_by_task("unlinked").is_none());
    }
}
