use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::warn;
use uuid::Uuid;

use vigil_types::{ApprovalStatus, PendingApproval, Result, Task, VigilError};

/// File-backed store of pending approvals: one JSON document per approval.
///
/// All read-modify-write cycles go through one mutex, which is what makes
/// concurrent callbacks on the same approval id race-free: the first writer
/// flips the status, later writers observe a terminal state.
pub struct ApprovalStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl ApprovalStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    pub fn create(
        &self,
        task: &Task,
        scheduled_at: DateTime<Utc>,
        session_id: &str,
        plan: &str,
    ) -> Result<PendingApproval> {
        let approval = PendingApproval {
            // Hex uuid: URL and callback-data safe.
            id: Uuid::new_v4().simple().to_string(),
            task_id: task.id.clone(),
            task_name: task.name.clone(),
            scheduled_at,
            session_id: session_id.to_string(),
            plan: plan.to_string(),
            channel_messages: Vec::new(),
            status: ApprovalStatus::Pending,
            created_at: Utc::now(),
            decided_at: None,
        };
        let _guard = self.lock.lock();
        self.write(&approval)?;
        Ok(approval)
    }

    pub fn get(&self, id: &str) -> Result<Option<PendingApproval>> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    pub fn save(&self, approval: &PendingApproval) -> Result<()> {
        let _guard = self.lock.lock();
        self.write(approval)
    }

    /// Atomic read-modify-write. The closure sees the current record and
    /// may mutate it; the mutation is persisted before the lock drops.
    pub fn with_approval<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut PendingApproval) -> T,
    ) -> Result<Option<T>> {
        let _guard = self.lock.lock();
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        let mut approval: PendingApproval = serde_json::from_str(&raw)?;
        let out = f(&mut approval);
        self.write(&approval)?;
        Ok(Some(out))
    }

    pub fn list(&self) -> Result<Vec<PendingApproval>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read_to_string(&path)
                .map_err(VigilError::from)
                .and_then(|raw| serde_json::from_str(&raw).map_err(VigilError::from))
            {
                Ok(approval) => out.push(approval),
                Err(e) => warn!(path = %path.display(), "skipping bad approval file: {e}"),
            }
        }
        out.sort_by(|a: &PendingApproval, b: &PendingApproval| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    /// Approvals still awaiting a decision.
    pub fn list_active(&self) -> Result<Vec<PendingApproval>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|a| !a.status.is_terminal())
            .collect())
    }

    pub fn active_ids(&self) -> Result<HashSet<String>> {
        Ok(self.list_active()?.into_iter().map(|a| a.id).collect())
    }

    /// Move TTL-exceeded non-terminal approvals to `expired`, returning the
    /// ones that changed.
    pub fn expire_overdue(&self, ttl: Duration) -> Result<Vec<PendingApproval>> {
        let cutoff = Utc::now() - ttl;
        let mut expired = Vec::new();
        let _guard = self.lock.lock();
        for mut approval in self.list()? {
            if approval.status.is_terminal() || approval.created_at > cutoff {
                continue;
            }
            approval.status = ApprovalStatus::Expired;
            approval.decided_at = Some(Utc::now());
            self.write(&approval)?;
            expired.push(approval);
        }
        Ok(expired)
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn write(&self, approval: &PendingApproval) -> Result<()> {
        let json = serde_json::to_string_pretty(approval)?;
        let path = self.path_for(&approval.id);
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf as StdPathBuf;
    use tempfile::TempDir;
    use vigil_types::ModelTier;

    fn task() -> Task {
        Task {
            id: "t1".into(),
            name: "planner".into(),
            schedule: "0 3 * * *".into(),
            working_dir: StdPathBuf::from("/tmp"),
            skill: None,
            prompt: Some("p".into()),
            allowed_tools: vec![],
            model: ModelTier::Medium,
            provider: None,
            autonomous: false,
            plan_mode: true,
            max_turns: None,
            timeout: 300,
            enabled: true,
            variables: HashMap::new(),
            notifications: None,
            last_run: None,
            last_status: None,
        }
    }

    #[test]
    fn create_get_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = ApprovalStore::new(tmp.path()).unwrap();
        let approval = store
            .create(&task(), Utc::now(), "sess-1", "1. do the thing")
            .unwrap();
        assert_eq!(approval.status, ApprovalStatus::Pending);
        assert!(approval.id.chars().all(|c| c.is_ascii_alphanumeric()));

        let loaded = store.get(&approval.id).unwrap().unwrap();
        assert_eq!(loaded.task_id, "t1");
        assert_eq!(loaded.plan, "1. do the thing");
        assert_eq!(loaded.session_id, "sess-1");
    }

    #[test]
    fn with_approval_persists_the_mutation() {
        let tmp = TempDir::new().unwrap();
        let store = ApprovalStore::new(tmp.path()).unwrap();
        let approval = store.create(&task(), Utc::now(), "sess-1", "plan").unwrap();

        let decided = store
            .with_approval(&approval.id, |a| {
                if a.status.is_terminal() {
                    return false;
                }
                a.status = ApprovalStatus::Approved;
                a.decided_at = Some(Utc::now());
                true
            })
            .unwrap()
            .unwrap();
        assert!(decided);

        // Second writer observes the terminal state: idempotent no-op.
        let second = store
            .with_approval(&approval.id, |a| {
                if a.status.is_terminal() {
                    return false;
                }
                a.status = ApprovalStatus::Rejected;
                true
            })
            .unwrap()
            .unwrap();
        assert!(!second);
        assert_eq!(
            store.get(&approval.id).unwrap().unwrap().status,
            ApprovalStatus::Approved
        );
    }

    #[test]
    fn unknown_id_is_none_not_error() {
        let tmp = TempDir::new().unwrap();
        let store = ApprovalStore::new(tmp.path()).unwrap();
        assert!(store.get("nope").unwrap().is_none());
        assert!(store.with_approval("nope", |_| ()).unwrap().is_none());
    }

    #[test]
    fn expiry_sweep_only_touches_overdue_pending() {
        let tmp = TempDir::new().unwrap();
        let store = ApprovalStore::new(tmp.path()).unwrap();

        let fresh = store.create(&task(), Utc::now(), "s1", "plan a").unwrap();
        let mut old = store.create(&task(), Utc::now(), "s2", "plan b").unwrap();
        old.created_at = Utc::now() - Duration::hours(30);
        store.save(&old).unwrap();
        let mut done = store.create(&task(), Utc::now(), "s3", "plan c").unwrap();
        done.created_at = Utc::now() - Duration::hours(30);
        done.status = ApprovalStatus::Rejected;
        store.save(&done).unwrap();

        let expired = store.expire_overdue(Duration::hours(24)).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, old.id);
        assert_eq!(
            store.get(&fresh.id).unwrap().unwrap().status,
            ApprovalStatus::Pending
        );
        assert_eq!(
            store.get(&done.id).unwrap().unwrap().status,
            ApprovalStatus::Rejected
        );
    }

    #[test]
    fn active_ids_excludes_terminal_states() {
        let tmp = TempDir::new().unwrap();
        let store = ApprovalStore::new(tmp.path()).unwrap();
        let open = store.create(&task(), Utc::now(), "s1", "plan").unwrap();
        let mut closed = store.create(&task(), Utc::now(), "s2", "plan").unwrap();
        closed.status = ApprovalStatus::Expired;
        store.save(&closed).unwrap();

        let ids = store.active_ids().unwrap();
        assert!(ids.contains(&open.id));
        assert!(!ids.contains(&closed.id));
    }
}
