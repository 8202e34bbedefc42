use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::warn;
use uuid::Uuid;

use vigil_types::{Result, Session, VigilError};

use crate::tasks::write_atomic;

/// Mints session ids and tracks one JSON file per session.
///
/// Sessions left open by a crashed process are marked `orphaned` on startup.
pub struct SessionManager {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl SessionManager {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let manager = Self {
            dir,
            lock: Mutex::new(()),
        };
        manager.mark_orphans()?;
        Ok(manager)
    }

    /// 128-bit random id rendered in base36, collision-resistant and
    /// URL/path safe.
    pub fn mint_id() -> String {
        to_base36(Uuid::new_v4().as_u128())
    }

    pub fn create_session(
        &self,
        task_id: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<Session> {
        let session = Session {
            id: Self::mint_id(),
            task_id: task_id.to_string(),
            created_at: Utc::now(),
            ended_at: None,
            status: None,
            output: None,
            error: None,
            alias: None,
            metadata,
        };
        let _guard = self.lock.lock();
        self.write(&session)?;
        Ok(session)
    }

    pub fn complete_session(
        &self,
        id: &str,
        status: &str,
        output: Option<String>,
        error: Option<String>,
    ) -> Result<()> {
        let _guard = self.lock.lock();
        let Some(mut session) = self.read(id)? else {
            return Err(VigilError::Validation {
                task: None,
                reason: format!("unknown session '{id}'"),
            });
        };
        session.ended_at = Some(Utc::now());
        session.status = Some(status.to_string());
        session.output = output;
        session.error = error;
        self.write(&session)
    }

    /// Re-key a session onto the id the provider minted for it. The provider
    /// id becomes authoritative; the internal id is kept as an alias so both
    /// resolve.
    pub fn adopt_provider_id(&self, internal_id: &str, provider_id: &str) -> Result<Session> {
        let _guard = self.lock.lock();
        let Some(mut session) = self.read(internal_id)? else {
            return Err(VigilError::Validation {
                task: None,
                reason: format!("unknown session '{internal_id}'"),
            });
        };
        if session.id == provider_id {
            return Ok(session);
        }
        let old_path = self.path_for(&session.id);
        session.alias = Some(session.id.clone());
        session.id = provider_id.to_string();
        self.write(&session)?;
        if old_path.exists() {
            std::fs::remove_file(old_path)?;
        }
        Ok(session)
    }

    /// Look a session up by its id or by a retired alias.
    pub fn get(&self, id: &str) -> Result<Option<Session>> {
        if let Some(session) = self.read(id)? {
            return Ok(Some(session));
        }
        for session in self.list()? {
            if session.alias.as_deref() == Some(id) {
                return Ok(Some(session));
            }
        }
        Ok(None)
    }

    pub fn list(&self) -> Result<Vec<Session>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read_to_string(&path) {
                Ok(raw) => match serde_json::from_str::<Session>(&raw) {
                    Ok(session) => out.push(session),
                    Err(e) => warn!(path = %path.display(), "skipping bad session file: {e}"),
                },
                Err(e) => warn!(path = %path.display(), "unreadable session file: {e}"),
            }
        }
        Ok(out)
    }

    fn mark_orphans(&self) -> Result<()> {
        let _guard = self.lock.lock();
        for mut session in self.list()? {
            if session.ended_at.is_none() {
                warn!(session = %session.id, task = %session.task_id, "marking orphaned session");
                session.ended_at = Some(Utc::now());
                session.status = Some("orphaned".to_string());
                self.write(&session)?;
            }
        }
        Ok(())
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn write(&self, session: &Session) -> Result<()> {
        let json = serde_json::to_string_pretty(session)?;
        write_atomic(&self.path_for(&session.id), json.as_bytes())?;
        Ok(())
    }

    fn read(&self, id: &str) -> Result<Option<Session>> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }
}

fn to_base36(mut value: u128) -> String {
    const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(ALPHABET[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8(digits).expect("base36 digits are ascii")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn minted_ids_are_base36_and_distinct() {
        let a = SessionManager::mint_id();
        let b = SessionManager::mint_id();
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        // 128 bits in base36 is at most 25 digits.
        assert!(a.len() <= 25);
    }

    #[test]
    fn create_complete_get() {
        let tmp = TempDir::new().unwrap();
        let manager = SessionManager::new(tmp.path()).unwrap();
        let session = manager.create_session("t1", HashMap::new()).unwrap();
        manager
            .complete_session(&session.id, "success", Some("out".into()), None)
            .unwrap();
        let loaded = manager.get(&session.id).unwrap().unwrap();
        assert_eq!(loaded.status.as_deref(), Some("success"));
        assert!(loaded.ended_at.is_some());
    }

    #[test]
    fn provider_id_adoption_aliases_the_internal_id() {
        let tmp = TempDir::new().unwrap();
        let manager = SessionManager::new(tmp.path()).unwrap();
        let session = manager.create_session("t1", HashMap::new()).unwrap();
        let internal = session.id.clone();

        let adopted = manager.adopt_provider_id(&internal, "sess-provider-1").unwrap();
        assert_eq!(adopted.id, "sess-provider-1");
        assert_eq!(adopted.alias.as_deref(), Some(internal.as_str()));

        // Both ids resolve to the same record.
        let by_provider = manager.get("sess-provider-1").unwrap().unwrap();
        let by_alias = manager.get(&internal).unwrap().unwrap();
        assert_eq!(by_provider.id, by_alias.id);
    }

    #[test]
    fn incomplete_sessions_become_orphaned_on_restart() {
        let tmp = TempDir::new().unwrap();
        let id = {
            let manager = SessionManager::new(tmp.path()).unwrap();
            manager.create_session("t1", HashMap::new()).unwrap().id
        };
        let manager = SessionManager::new(tmp.path()).unwrap();
        let session = manager.get(&id).unwrap().unwrap();
        assert_eq!(session.status.as_deref(), Some("orphaned"));
        assert!(session.ended_at.is_some());
    }

    #[test]
    fn base36_encoding() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }
}
