use std::io;
use std::path::{Path, PathBuf};

/// On-disk layout of a Vigil state directory.
///
/// ```text
/// <root>/
///   config.yaml     engine configuration
///   tasks.yaml      task repository
///   channels.yaml   notification channel descriptors
///   logs/           per-task JSONL execution logs
///   sessions/       one JSON file per session
///   approvals/      one JSON file per pending approval
/// ```
#[derive(Debug, Clone)]
pub struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.yaml")
    }

    pub fn tasks_file(&self) -> PathBuf {
        self.root.join("tasks.yaml")
    }

    pub fn channels_file(&self) -> PathBuf {
        self.root.join("channels.yaml")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    pub fn approvals_dir(&self) -> PathBuf {
        self.root.join("approvals")
    }

    pub fn ensure(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.logs_dir())?;
        std::fs::create_dir_all(self.sessions_dir())?;
        std::fs::create_dir_all(self.approvals_dir())?;
        Ok(())
    }
}

/// State directory resolution: explicit flag, then `VIGIL_STATE_DIR`, then
/// `~/.vigil`, then a relative fallback.
pub fn resolve_state_dir(flag: Option<String>) -> PathBuf {
    if let Some(dir) = flag {
        return PathBuf::from(dir);
    }
    if let Ok(dir) = std::env::var("VIGIL_STATE_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::home_dir()
        .map(|home| home.join(".vigil"))
        .unwrap_or_else(|| PathBuf::from(".vigil"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_rooted() {
        let paths = DataPaths::new("/srv/vigil");
        assert_eq!(paths.tasks_file(), PathBuf::from("/srv/vigil/tasks.yaml"));
        assert_eq!(paths.logs_dir(), PathBuf::from("/srv/vigil/logs"));
        assert_eq!(paths.sessions_dir(), PathBuf::from("/srv/vigil/sessions"));
        assert_eq!(paths.approvals_dir(), PathBuf::from("/srv/vigil/approvals"));
    }

    #[test]
    fn explicit_flag_wins() {
        assert_eq!(
            resolve_state_dir(Some("/tmp/custom".into())),
            PathBuf::from("/tmp/custom")
        );
    }
}
