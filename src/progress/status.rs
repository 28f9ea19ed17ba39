use crate::progress::store::{ProgressRecord, ProgressSnapshot, ProgressStatus};
use serde::{Deserialize, Serialize};

/// Overall state reported by the status surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    NotStarted,
    Running,
    Completed,
    Failed,
    /// Job exited with presets still queued or in flight
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetStatus {
    pub id: String,
    pub status: ProgressStatus,
    pub progress: u8,
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub files_done: usize,
    pub files_total: usize,
    pub current_file: Option<String>,
    pub error: Option<String>,
}

/// `{status, message, progress, presets, timestamp}` answer for status queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: OverallStatus,
    pub message: String,
    pub progress: u8,
    pub presets: Vec<PresetStatus>,
    pub timestamp: String,
}

impl StatusReport {
    /// Fold a snapshot and the job's liveness into a report
    #[must_use]
    pub fn build(snapshot: &ProgressSnapshot, job_running: bool) -> Self {
        let timestamp = chrono::Utc::now().to_rfc3339();

        if snapshot.is_empty() {
            return Self {
                status: OverallStatus::NotStarted,
                message: "No downloads configured".to_string(),
                progress: 0,
                presets: Vec::new(),
                timestamp,
            };
        }

        let presets: Vec<PresetStatus> = snapshot
            .presets
            .iter()
            .map(|(id, record)| PresetStatus {
                id: id.clone(),
                status: record.status,
                progress: record_percent(record),
                bytes_done: record.bytes_done,
                bytes_total: record.bytes_total,
                files_done: record.files_done,
                files_total: record.files_total,
                current_file: record.current_file.clone(),
                error: record.error.clone(),
            })
            .collect();

        let total = presets.len();
        let completed = count(snapshot, ProgressStatus::Completed);
        let failed = count(snapshot, ProgressStatus::Failed);
        let active = total - completed - failed;

        let (status, message) = if job_running {
            let current = snapshot
                .presets
                .values()
                .find_map(|r| r.current_file.as_deref())
                .map(|f| format!(" ({f})"))
                .unwrap_or_default();
            (
                OverallStatus::Running,
                format!("Downloading: {completed} of {total} presets complete{current}"),
            )
        } else if active > 0 {
            (
                OverallStatus::Stopped,
                format!("Job stopped with {active} of {total} presets unfinished; launch again to resume"),
            )
        } else if failed > 0 {
            (
                OverallStatus::Failed,
                format!("{failed} of {total} presets failed"),
            )
        } else {
            (
                OverallStatus::Completed,
                format!("All {total} presets downloaded"),
            )
        };

        let progress = if status == OverallStatus::Completed {
            100
        } else {
            overall_percent(snapshot, completed)
        };

        Self {
            status,
            message,
            progress,
            presets,
            timestamp,
        }
    }
}

fn count(snapshot: &ProgressSnapshot, status: ProgressStatus) -> usize {
    snapshot
        .presets
        .values()
        .filter(|r| r.status == status)
        .count()
}

fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    u8::try_from((u128::from(done) * 100 / u128::from(total)).min(100)).unwrap_or(100)
}

fn record_percent(record: &ProgressRecord) -> u8 {
    match record.status {
        ProgressStatus::Completed => 100,
        _ if record.bytes_total > 0 => percent(record.bytes_done, record.bytes_total),
        _ => percent(record.files_done as u64, record.files_total as u64),
    }
}

fn overall_percent(snapshot: &ProgressSnapshot, completed: usize) -> u8 {
    let (done, total) = snapshot
        .presets
        .values()
        .fold((0u64, 0u64), |(d, t), r| (d + r.bytes_done, t + r.bytes_total));

    if total > 0 {
        percent(done, total)
    } else {
        percent(completed as u64, snapshot.presets.len() as u64)
    }
}
