use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use vigil_types::{ExecutionResult, ExecutionStatus, Result};

/// Query over the execution log.
#[derive(Debug, Default, Clone)]
pub struct LogFilter {
    pub task_id: Option<String>,
    pub status: Option<ExecutionStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskStats {
    pub task_id: String,
    pub total_runs: usize,
    pub successful_runs: usize,
    pub failed_runs: usize,
    pub timeout_runs: usize,
    pub success_rate: f64,
    pub avg_duration_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OverallStats {
    pub total_executions: usize,
    pub tasks_with_logs: usize,
    pub by_status: HashMap<String, usize>,
}

/// Append-only execution log: one JSONL file per task under the logs dir.
///
/// Records are never rewritten after emission; the only mutation is the
/// startup pass that drops a torn final line left by a crashed writer.
pub struct LogRepository {
    dir: PathBuf,
    append_lock: Mutex<()>,
}

impl LogRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let repo = Self {
            dir,
            append_lock: Mutex::new(()),
        };
        repo.truncate_torn_tails()?;
        Ok(repo)
    }

    fn file_for(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{task_id}.jsonl"))
    }

    pub fn save(&self, result: &ExecutionResult) -> Result<()> {
        let line = serde_json::to_string(result)?;
        let _guard = self.append_lock.lock();
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_for(&result.task_id))?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// All results for one task, ascending by (started_at, session_id).
    /// With a limit, the most recent `limit` entries are kept.
    pub fn find_by_task(&self, task_id: &str, limit: Option<usize>) -> Result<Vec<ExecutionResult>> {
        let mut results = self.read_file(&self.file_for(task_id))?;
        sort_results(&mut results);
        if let Some(limit) = limit {
            let skip = results.len().saturating_sub(limit);
            results.drain(..skip);
        }
        Ok(results)
    }

    pub fn find_latest(&self, task_id: &str) -> Result<Option<ExecutionResult>> {
        Ok(self.find_by_task(task_id, Some(1))?.pop())
    }

    pub fn find(&self, filter: &LogFilter) -> Result<Vec<ExecutionResult>> {
        let mut results = match &filter.task_id {
            Some(task_id) => self.read_file(&self.file_for(task_id))?,
            None => {
                let mut all = Vec::new();
                for path in self.log_files()? {
                    all.extend(self.read_file(&path)?);
                }
                all
            }
        };
        results.retain(|r| {
            filter.status.map_or(true, |s| r.status == s)
                && filter.from.map_or(true, |from| r.started_at >= from)
                && filter.to.map_or(true, |to| r.started_at <= to)
        });
        sort_results(&mut results);
        let offset = filter.offset.min(results.len());
        results.drain(..offset);
        if let Some(limit) = filter.limit {
            results.truncate(limit);
        }
        Ok(results)
    }

    pub fn task_stats(&self, task_id: &str) -> Result<TaskStats> {
        let results = self.find_by_task(task_id, None)?;
        let total = results.len();
        let successes = results.iter().filter(|r| r.status.is_success()).count();
        let failures = results
            .iter()
            .filter(|r| r.status == ExecutionStatus::Failure)
            .count();
        let timeouts = results
            .iter()
            .filter(|r| r.status == ExecutionStatus::Timeout)
            .count();
        let avg = if total == 0 {
            0.0
        } else {
            results.iter().map(|r| r.duration_secs()).sum::<f64>() / total as f64
        };
        Ok(TaskStats {
            task_id: task_id.to_string(),
            total_runs: total,
            successful_runs: successes,
            failed_runs: failures,
            timeout_runs: timeouts,
            success_rate: if total == 0 {
                0.0
            } else {
                successes as f64 / total as f64
            },
            avg_duration_seconds: avg,
        })
    }

    pub fn overall_stats(&self) -> Result<OverallStats> {
        let mut stats = OverallStats::default();
        for path in self.log_files()? {
            let results = self.read_file(&path)?;
            if results.is_empty() {
                continue;
            }
            stats.tasks_with_logs += 1;
            stats.total_executions += results.len();
            for result in results {
                *stats
                    .by_status
                    .entry(result.status.as_str().to_string())
                    .or_default() += 1;
            }
        }
        Ok(stats)
    }

    pub fn clear_task(&self, task_id: &str) -> Result<bool> {
        let path = self.file_for(task_id);
        if path.exists() {
            std::fs::remove_file(path)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn log_files(&self) -> Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
                out.push(path);
            }
        }
        Ok(out)
    }

    fn read_file(&self, path: &Path) -> Result<Vec<ExecutionResult>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(path)?;
        let mut out = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ExecutionResult>(line) {
                Ok(result) => out.push(result),
                Err(e) => warn!(path = %path.display(), "skipping malformed log line: {e}"),
            }
        }
        Ok(out)
    }

    /// A crash mid-append leaves bytes after the last newline; drop them so
    /// every line in the file is complete.
    fn truncate_torn_tails(&self) -> Result<()> {
        for path in self.log_files()? {
            let bytes = std::fs::read(&path)?;
            if bytes.is_empty() || bytes.ends_with(b"\n") {
                continue;
            }
            let keep = bytes.iter().rposition(|b| *b == b'\n').map_or(0, |p| p + 1);
            warn!(
                path = %path.display(),
                dropped = bytes.len() - keep,
                "truncating torn log tail"
            );
            std::fs::write(&path, &bytes[..keep])?;
        }
        Ok(())
    }
}

fn sort_results(results: &mut [ExecutionResult]) {
    results.sort_by(|a, b| {
        a.started_at
            .cmp(&b.started_at)
            .then_with(|| a.session_id.cmp(&b.session_id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn result(task: &str, session: &str, status: ExecutionStatus, offset_secs: i64) -> ExecutionResult {
        let started = Utc::now() + chrono::Duration::seconds(offset_secs);
        ExecutionResult {
            task_id: task.into(),
            session_id: session.into(),
            status,
            output: "out".into(),
            error: None,
            started_at: started,
            finished_at: started + chrono::Duration::seconds(2),
            exit_code: Some(0),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn append_and_query_ordering() {
        let tmp = TempDir::new().unwrap();
        let repo = LogRepository::new(tmp.path()).unwrap();
        repo.save(&result("t1", "s2", ExecutionStatus::Success, 10)).unwrap();
        repo.save(&result("t1", "s1", ExecutionStatus::Failure, 0)).unwrap();

        let all = repo.find_by_task("t1", None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].session_id, "s1");
        assert_eq!(all[1].session_id, "s2");

        let latest = repo.find_latest("t1").unwrap().unwrap();
        assert_eq!(latest.session_id, "s2");
    }

    #[test]
    fn ties_break_by_session_id() {
        let tmp = TempDir::new().unwrap();
        let repo = LogRepository::new(tmp.path()).unwrap();
        let mut a = result("t1", "bbb", ExecutionStatus::Success, 0);
        let b = result("t1", "aaa", ExecutionStatus::Success, 0);
        a.started_at = b.started_at;
        repo.save(&a).unwrap();
        repo.save(&b).unwrap();
        let all = repo.find_by_task("t1", None).unwrap();
        assert_eq!(all[0].session_id, "aaa");
        assert_eq!(all[1].session_id, "bbb");
    }

    #[test]
    fn filter_by_status_and_limit() {
        let tmp = TempDir::new().unwrap();
        let repo = LogRepository::new(tmp.path()).unwrap();
        repo.save(&result("t1", "s1", ExecutionStatus::Success, 0)).unwrap();
        repo.save(&result("t1", "s2", ExecutionStatus::Timeout, 1)).unwrap();
        repo.save(&result("t2", "s3", ExecutionStatus::Timeout, 2)).unwrap();

        let timeouts = repo
            .find(&LogFilter {
                status: Some(ExecutionStatus::Timeout),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(timeouts.len(), 2);

        let limited = repo
            .find(&LogFilter {
                limit: Some(1),
                offset: 1,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn torn_tail_is_dropped_on_startup() {
        let tmp = TempDir::new().unwrap();
        {
            let repo = LogRepository::new(tmp.path()).unwrap();
            repo.save(&result("t1", "s1", ExecutionStatus::Success, 0)).unwrap();
        }
        // Simulate a crash mid-append.
        let path = tmp.path().join("t1.jsonl");
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"task_id\":\"t1\",\"sess").unwrap();
        drop(file);

        let repo = LogRepository::new(tmp.path()).unwrap();
        let all = repo.find_by_task("t1", None).unwrap();
        assert_eq!(all.len(), 1);
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.ends_with('\n'));
    }

    #[test]
    fn stats_roll_up() {
        let tmp = TempDir::new().unwrap();
        let repo = LogRepository::new(tmp.path()).unwrap();
        repo.save(&result("t1", "s1", ExecutionStatus::Success, 0)).unwrap();
        repo.save(&result("t1", "s2", ExecutionStatus::Failure, 1)).unwrap();
        repo.save(&result("t1", "s3", ExecutionStatus::Timeout, 2)).unwrap();

        let stats = repo.task_stats("t1").unwrap();
        assert_eq!(stats.total_runs, 3);
        assert_eq!(stats.successful_runs, 1);
        assert_eq!(stats.failed_runs, 1);
        assert_eq!(stats.timeout_runs, 1);
        assert!((stats.success_rate - 1.0 / 3.0).abs() < 1e-9);
        assert!((stats.avg_duration_seconds - 2.0).abs() < 1e-9);

        let overall = repo.overall_stats().unwrap();
        assert_eq!(overall.total_executions, 3);
        assert_eq!(overall.tasks_with_logs, 1);
        assert_eq!(overall.by_status.get("success"), Some(&1));
    }

    #[test]
    fn clear_task_removes_only_that_file() {
        let tmp = TempDir::new().unwrap();
        let repo = LogRepository::new(tmp.path()).unwrap();
        repo.save(&result("t1", "s1", ExecutionStatus::Success, 0)).unwrap();
        repo.save(&result("t2", "s2", ExecutionStatus::Success, 0)).unwrap();
        assert!(repo.clear_task("t1").unwrap());
        assert!(!repo.clear_task("t1").unwrap());
        assert_eq!(repo.find_by_task("t2", None).unwrap().len(), 1);
    }
}
