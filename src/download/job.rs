use crate::error::{PullError, Result};
use crate::progress::{write_atomic, ProgressSnapshot, ProgressStatus};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// Settle the status of an exited job from what it left in the store
    #[must_use]
    pub fn settled(job_id: &str, snapshot: &ProgressSnapshot) -> Self {
        if snapshot.job_id.as_deref() != Some(job_id) {
            return Self::Failed;
        }
        let all_completed = snapshot
            .presets
            .values()
            .all(|r| r.status == ProgressStatus::Completed);
        if all_completed {
            Self::Completed
        } else {
            Self::Failed
        }
    }
}

/// One launched run of a download procedure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadJob {
    pub job_id: String,
    pub preset_ids: Vec<String>,
    pub pid: u32,
    pub started_at: String,
    pub status: JobStatus,
    pub plan_path: PathBuf,
    pub log_path: PathBuf,
}

/// Liveness of the recorded job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    NotRunning,
    Running(DownloadJob),
    Finished(DownloadJob),
}

impl JobState {
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running(_))
    }
}

/// PID side file recording the last launched job
#[derive(Debug, Clone)]
pub struct JobFile {
    path: PathBuf,
}

impl JobFile {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the recorded job; absent or malformed files yield `None`
    #[must_use]
    pub fn load(&self) -> Option<DownloadJob> {
        let content = fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&content)
            .map_err(|e| tracing::debug!("Ignoring malformed job file: {e}"))
            .ok()
    }

    /// Record a job atomically (tmp + rename)
    pub fn save(&self, job: &DownloadJob) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(job)
            .map_err(|e| PullError::Other(format!("Failed to serialize job record: {e}")))?;

        write_atomic(&self.path, &content)
    }

    /// Forget the recorded job
    pub fn clear(&self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove {}: {e}", self.path.display());
            }
        }
    }

    /// Probe the recorded PID without raising
    #[must_use]
    pub fn state(&self) -> JobState {
        match self.load() {
            None => JobState::NotRunning,
            // Recorded ahead of a spawn that has not reported a PID
            Some(job) if job.status == JobStatus::Pending => JobState::NotRunning,
            Some(job) if is_process_alive(job.pid) => JobState::Running(job),
            Some(job) => JobState::Finished(job),
        }
    }
}

/// Zero-signal liveness probe
#[must_use]
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }

    match signal::kill(Pid::from_raw(raw), None) {
        Ok(()) => !is_zombie(pid),
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Ask a job to stop
pub fn terminate(pid: u32) -> Result<()> {
    let raw = i32::try_from(pid).map_err(|_| PullError::Other(format!("Invalid pid {pid}")))?;
    signal::kill(Pid::from_raw(raw), Signal::SIGTERM)
        .map_err(|e| PullError::Other(format!("Failed to signal pid {pid}: {e}")))
}

/// An exited child nobody has reaped still answers signal 0
#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    fs::read_to_string(format!("/proc/{pid}/stat"))
        .ok()
        .and_then(|stat| {
            let after_comm = &stat[stat.rfind(')')? + 1..];
            after_comm.trim_start().chars().next()
        })
        .is_some_and(|state| state == 'Z')
}

#[cfg(not(target_os = "linux"))]
const fn is_zombie(_pid: u32) -> bool {
    false
}
