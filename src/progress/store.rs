use crate::error::{PullError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Per-preset transfer state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Queued,
    Downloading,
    Completed,
    Failed,
}

impl ProgressStatus {
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Queued | Self::Downloading)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub status: ProgressStatus,
    #[serde(default)]
    pub bytes_done: u64,
    #[serde(default)]
    pub bytes_total: u64,
    #[serde(default)]
    pub current_file: Option<String>,
    #[serde(default)]
    pub files_done: usize,
    #[serde(default)]
    pub files_failed: usize,
    #[serde(default)]
    pub files_total: usize,
    #[serde(default)]
    pub error: Option<String>,
}

impl ProgressRecord {
    #[must_use]
    pub const fn queued(files_total: usize, bytes_total: u64) -> Self {
        Self {
            status: ProgressStatus::Queued,
            bytes_done: 0,
            bytes_total,
            current_file: None,
            files_done: 0,
            files_failed: 0,
            files_total,
            error: None,
        }
    }
}

/// The whole progress document, replaced atomically on every write
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub presets: BTreeMap<String, ProgressRecord>,
}

impl ProgressSnapshot {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}

/// File-backed progress document shared between the job and its readers
#[derive(Debug, Clone)]
pub struct ProgressStore {
    path: PathBuf,
}

impl ProgressStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the latest snapshot
    ///
    /// A missing or unreadable document is "no progress yet", never an error.
    #[must_use]
    pub fn load(&self) -> ProgressSnapshot {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return ProgressSnapshot::default(),
            Err(e) => {
                tracing::debug!("Failed to read {}: {e}", self.path.display());
                return ProgressSnapshot::default();
            }
        };

        serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::debug!("Ignoring malformed progress document: {e}");
            ProgressSnapshot::default()
        })
    }

    /// Replace the document atomically (tmp + rename)
    pub fn save(&self, snapshot: &ProgressSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(snapshot)
            .map_err(|e| PullError::Progress(format!("Failed to serialize progress: {e}")))?;

        write_atomic(&self.path, &content)
    }
}

/// Sibling scratch name for `path`, keeping its full file name
///
/// `state.json` and `state.pid` get distinct scratch files.
pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Replace `path` with `content` through a rename
pub(crate) fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let tmp = tmp_path(path);
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// The job's handle on the store: owns the snapshot and throttles writes
#[derive(Debug)]
pub struct ProgressWriter {
    store: ProgressStore,
    snapshot: ProgressSnapshot,
    interval: Duration,
    last_flush: Option<Instant>,
}

impl ProgressWriter {
    /// Start a fresh document for `job_id`, replacing the previous run's
    pub fn begin(
        store: ProgressStore,
        job_id: &str,
        presets: impl IntoIterator<Item = (String, ProgressRecord)>,
        interval: Duration,
    ) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        let snapshot = ProgressSnapshot {
            job_id: Some(job_id.to_string()),
            started_at: Some(now.clone()),
            updated_at: Some(now),
            presets: presets.into_iter().collect(),
        };

        let mut writer = Self {
            store,
            snapshot,
            interval,
            last_flush: None,
        };
        writer.flush();
        writer
    }

    #[must_use]
    pub const fn snapshot(&self) -> &ProgressSnapshot {
        &self.snapshot
    }

    /// Mutate one preset's record and write it out, throttled unless `force`
    pub fn update<F>(&mut self, preset_id: &str, force: bool, f: F)
    where
        F: FnOnce(&mut ProgressRecord),
    {
        let Some(record) = self.snapshot.presets.get_mut(preset_id) else {
            tracing::debug!("No progress record for '{preset_id}'");
            return;
        };
        f(record);

        let due = self
            .last_flush
            .map_or(true, |last| last.elapsed() >= self.interval);
        if force || due {
            self.flush();
        }
    }

    /// Write the current snapshot; failures are logged, never fatal to the job
    pub fn flush(&mut self) {
        self.snapshot.updated_at = Some(chrono::Utc::now().to_rfc3339());
        if let Err(e) = self.store.save(&self.snapshot) {
            tracing::warn!("Failed to write progress: {e}");
        }
        self.last_flush = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = ProgressStore::new(temp_dir.path().join("progress.json"));
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_load_malformed_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("progress.json");
        fs::write(&path, "{\"presets\": {\"A\": {\"status\": ").unwrap();

        let store = ProgressStore::new(&path);
        assert_eq!(store.load(), ProgressSnapshot::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = ProgressStore::new(temp_dir.path().join("nested/progress.json"));

        let mut snapshot = ProgressSnapshot {
            job_id: Some("job-1".to_string()),
            ..ProgressSnapshot::default()
        };
        snapshot
            .presets
            .insert("A".to_string(), ProgressRecord::queued(2, 2048));

        store.save(&snapshot).unwrap();
        assert_eq!(store.load(), snapshot);
        assert!(!tmp_path(store.path()).exists());
    }

    #[test]
    fn test_documents_sharing_a_stem_do_not_collide() {
        let temp_dir = TempDir::new().unwrap();
        let json = ProgressStore::new(temp_dir.path().join("state.json"));
        let other = ProgressStore::new(temp_dir.path().join("state.pid"));

        assert_eq!(
            tmp_path(json.path()),
            temp_dir.path().join("state.json.tmp")
        );
        assert_ne!(tmp_path(json.path()), tmp_path(other.path()));

        let first = ProgressSnapshot {
            job_id: Some("job-1".to_string()),
            ..ProgressSnapshot::default()
        };
        let second = ProgressSnapshot {
            job_id: Some("job-2".to_string()),
            ..ProgressSnapshot::default()
        };
        json.save(&first).unwrap();
        other.save(&second).unwrap();

        assert_eq!(json.load(), first);
        assert_eq!(other.load(), second);
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_writer_throttles_unforced_updates() {
        let temp_dir = TempDir::new().unwrap();
        let store = ProgressStore::new(temp_dir.path().join("progress.json"));

        let mut writer = ProgressWriter::begin(
            store.clone(),
            "job-1",
            [("A".to_string(), ProgressRecord::queued(1, 100))],
            Duration::from_secs(3600),
        );
        assert_eq!(store.load().presets["A"].status, ProgressStatus::Queued);

        writer.update("A", false, |r| r.bytes_done = 50);
        assert_eq!(store.load().presets["A"].bytes_done, 0);
        assert_eq!(writer.snapshot().presets["A"].bytes_done, 50);

        writer.update("A", true, |r| r.status = ProgressStatus::Completed);
        let on_disk = store.load();
        assert_eq!(on_disk.presets["A"].bytes_done, 50);
        assert_eq!(on_disk.presets["A"].status, ProgressStatus::Completed);
    }

    #[test]
    fn test_writer_ignores_unknown_preset() {
        let temp_dir = TempDir::new().unwrap();
        let store = ProgressStore::new(temp_dir.path().join("progress.json"));
        let mut writer = ProgressWriter::begin(store.clone(), "job-1", [], Duration::ZERO);

        writer.update("missing", true, |r| r.bytes_done = 1);
        assert!(store.load().is_empty());
    }
}
