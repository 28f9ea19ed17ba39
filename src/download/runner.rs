use crate::download::fetch::{Fetcher, HttpFetcher};
use crate::download::procedure::{DownloadStep, PresetPlan, Procedure};
use crate::error::{PullError, Result};
use crate::presets::format_bytes;
use crate::progress::{ProgressRecord, ProgressStatus, ProgressStore, ProgressWriter};
use indicatif::{ProgressBar, ProgressStyle};
use nix::errno::Errno;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tally of one job run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOutcome {
    pub files_downloaded: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub bytes_downloaded: u64,
    pub presets_completed: Vec<String>,
    pub presets_failed: Vec<String>,
    pub unmatched: Vec<String>,
}

impl JobOutcome {
    #[must_use]
    pub fn success(&self) -> bool {
        self.files_failed == 0 && self.presets_failed.is_empty()
    }

    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.success())
    }
}

enum StepOutcome {
    Skipped { bytes: u64 },
    Downloaded { bytes: u64 },
}

/// Executes a compiled [`Procedure`]; the only writer of the progress store
pub struct JobRunner<F: Fetcher> {
    fetcher: F,
    quiet: bool,
}

impl<F: Fetcher> JobRunner<F> {
    pub const fn new(fetcher: F, quiet: bool) -> Self {
        Self { fetcher, quiet }
    }

    /// Run every preset of the procedure; failures stay per file
    pub async fn run(&self, procedure: &Procedure) -> JobOutcome {
        remove_stale_side_files(&procedure.scratch_dir, &procedure.job_id);

        let records = procedure.presets.iter().filter_map(|plan| match plan {
            PresetPlan::Download {
                preset_id, steps, ..
            } => Some((
                preset_id.clone(),
                ProgressRecord::queued(
                    steps.len(),
                    steps.iter().filter_map(|s| s.declared_bytes).sum(),
                ),
            )),
            PresetPlan::NoMatch { .. } => None,
        });

        let mut writer = ProgressWriter::begin(
            ProgressStore::new(&procedure.progress_file),
            &procedure.job_id,
            records,
            Duration::from_millis(procedure.download.progress_interval_ms),
        );

        tracing::info!(
            "Job {} starting: {}",
            procedure.job_id,
            procedure.preset_ids().join(",")
        );

        let mut outcome = JobOutcome::default();
        for plan in &procedure.presets {
            match plan {
                PresetPlan::NoMatch { preset_id } => {
                    tracing::warn!("No matching preset: {preset_id}");
                    if !self.quiet {
                        println!("No matching preset: {preset_id}");
                    }
                    outcome.unmatched.push(preset_id.clone());
                }
                PresetPlan::Download {
                    preset_id,
                    name,
                    steps,
                } => {
                    self.run_preset(procedure, preset_id, name, steps, &mut writer, &mut outcome)
                        .await;
                }
            }
        }

        writer.flush();

        tracing::info!(
            "Job {} finished: {} downloaded ({}), {} skipped, {} failed",
            procedure.job_id,
            outcome.files_downloaded,
            format_bytes(outcome.bytes_downloaded),
            outcome.files_skipped,
            outcome.files_failed
        );

        outcome
    }

    async fn run_preset(
        &self,
        procedure: &Procedure,
        preset_id: &str,
        name: &str,
        steps: &[DownloadStep],
        writer: &mut ProgressWriter,
        outcome: &mut JobOutcome,
    ) {
        if !self.quiet {
            println!("==> {name} ({preset_id})");
        }

        if steps.is_empty() {
            tracing::info!("Preset '{preset_id}' has nothing to download");
            writer.update(preset_id, true, |r| r.status = ProgressStatus::Completed);
            outcome.presets_completed.push(preset_id.to_string());
            return;
        }

        let missing: Vec<&DownloadStep> =
            steps.iter().filter(|s| !s.destination.exists()).collect();
        let required: u64 = missing.iter().filter_map(|s| s.declared_bytes).sum();
        if let Err(e) = check_disk_space(
            &procedure.install_root,
            required,
            procedure.download.min_free_space_mb,
        ) {
            tracing::warn!("Skipping preset '{preset_id}': {e}");
            writer.update(preset_id, true, |r| {
                r.status = ProgressStatus::Failed;
                r.files_failed = missing.len();
                r.error = Some(e.to_string());
            });
            outcome.files_failed += missing.len();
            outcome.presets_failed.push(preset_id.to_string());
            return;
        }

        writer.update(preset_id, true, |r| r.status = ProgressStatus::Downloading);

        for step in steps {
            let base = writer
                .snapshot()
                .presets
                .get(preset_id)
                .map_or(0, |r| r.bytes_done);
            let file_name = step.file_name();

            match self.run_step(procedure, preset_id, step, base, writer).await {
                Ok(StepOutcome::Skipped { bytes }) => {
                    if !self.quiet {
                        println!("✓ {file_name} already present");
                    }
                    writer.update(preset_id, true, |r| {
                        r.files_done += 1;
                        r.bytes_done = base + step.declared_bytes.unwrap_or(bytes);
                        if step.declared_bytes.is_none() {
                            r.bytes_total += bytes;
                        }
                    });
                    outcome.files_skipped += 1;
                }
                Ok(StepOutcome::Downloaded { bytes }) => {
                    if !self.quiet {
                        println!("✓ Downloaded {file_name} ({})", format_bytes(bytes));
                    }
                    writer.update(preset_id, true, |r| {
                        r.files_done += 1;
                        r.bytes_done = base + bytes;
                        if let Some(declared) = step.declared_bytes {
                            r.bytes_total = r.bytes_total.saturating_sub(declared) + bytes;
                        }
                    });
                    outcome.files_downloaded += 1;
                    outcome.bytes_downloaded += bytes;
                }
                Err(e) => {
                    tracing::warn!("Failed to download {} for '{preset_id}': {e}", step.url);
                    if !self.quiet {
                        eprintln!("✗ {file_name}: {e}");
                    }
                    writer.update(preset_id, true, |r| {
                        r.files_failed += 1;
                        r.bytes_done = base;
                        if r.error.is_none() {
                            r.error = Some(format!("{file_name}: {e}"));
                        }
                    });
                    outcome.files_failed += 1;
                }
            }
        }

        let mut failed = false;
        writer.update(preset_id, true, |r| {
            r.current_file = None;
            failed = r.files_failed > 0;
            r.status = if failed {
                ProgressStatus::Failed
            } else {
                ProgressStatus::Completed
            };
        });

        if failed {
            outcome.presets_failed.push(preset_id.to_string());
        } else {
            outcome.presets_completed.push(preset_id.to_string());
        }
    }

    async fn run_step(
        &self,
        procedure: &Procedure,
        preset_id: &str,
        step: &DownloadStep,
        base: u64,
        writer: &mut ProgressWriter,
    ) -> Result<StepOutcome> {
        if step.destination.exists() {
            let on_disk = tokio::fs::metadata(&step.destination)
                .await
                .map_or(0, |m| m.len());
            if step.declared_bytes.is_some_and(|declared| declared != on_disk) {
                tracing::warn!(
                    "{} is present but its size differs from the catalog; run `modelpull validate {preset_id}`",
                    step.destination.display()
                );
            }
            return Ok(StepOutcome::Skipped { bytes: on_disk });
        }

        if let Some(parent) = step.destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::create_dir_all(&procedure.scratch_dir).await?;

        let side_file = side_file_path(&procedure.scratch_dir, &procedure.job_id, step);
        let file_name = step.file_name();
        writer.update(preset_id, true, |r| {
            r.current_file = Some(file_name.clone());
        });

        let bar = self.progress_bar(&file_name, step.declared_bytes);
        let declared_known = step.declared_bytes.is_some();
        let mut counted_total = false;

        let result = {
            let mut on_progress = |written: u64, total: Option<u64>| {
                if let Some(total) = total {
                    bar.set_length(total);
                }
                bar.set_position(written);

                let extra_total = match total {
                    Some(total) if !declared_known && !counted_total => {
                        counted_total = true;
                        total
                    }
                    _ => 0,
                };
                writer.update(preset_id, false, |r| {
                    r.bytes_done = base + written;
                    r.bytes_total += extra_total;
                });
            };
            self.fetcher
                .fetch(&step.url, &side_file, &mut on_progress)
                .await
        };
        bar.finish_and_clear();

        let bytes = match result {
            Ok(bytes) => bytes,
            Err(e) => {
                discard(&side_file).await;
                return Err(e);
            }
        };

        if let Err(e) = move_into_place(&side_file, &step.destination).await {
            discard(&side_file).await;
            return Err(e);
        }

        Ok(StepOutcome::Downloaded { bytes })
    }

    fn progress_bar(&self, file_name: &str, length: Option<u64>) -> ProgressBar {
        if self.quiet {
            return ProgressBar::hidden();
        }

        let bar = ProgressBar::new(length.unwrap_or(0));
        let style = ProgressStyle::with_template(
            "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
        )
        .map(|s| s.progress_chars("=> "))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        bar.set_message(file_name.to_string());
        bar
    }
}

/// Body of `modelpull run-job`
pub async fn run_job(plan_path: &Path, only: Option<&[String]>, quiet: bool) -> Result<JobOutcome> {
    let mut procedure = Procedure::load(plan_path)?;
    if let Some(preset_ids) = only {
        procedure.retain_presets(preset_ids);
    }

    let fetcher = HttpFetcher::new(&procedure.download)?;
    Ok(JobRunner::new(fetcher, quiet).run(&procedure).await)
}

/// Scratch side-file for a step, unique per job and relative path
fn side_file_path(scratch_dir: &Path, job_id: &str, step: &DownloadStep) -> PathBuf {
    let flat = step.relative_path.replace(['/', '\\'], "_");
    scratch_dir.join(format!("{job_id}-{flat}.part"))
}

/// Side-files left behind by a killed job
fn remove_stale_side_files(scratch_dir: &Path, job_id: &str) {
    let Ok(entries) = std::fs::read_dir(scratch_dir) else {
        return;
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.ends_with(".part") && !name.starts_with(job_id) {
            tracing::debug!("Removing stale side-file {name}");
            let _ = std::fs::remove_file(entry.path());
        }
    }
}

async fn discard(side_file: &Path) {
    if let Err(e) = tokio::fs::remove_file(side_file).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove {}: {e}", side_file.display());
        }
    }
}

/// Atomically publish a finished side-file at `dest`
///
/// Falls back to copy + rename through a sibling staging file when the
/// scratch directory lives on another filesystem.
async fn move_into_place(side_file: &Path, dest: &Path) -> Result<()> {
    match tokio::fs::rename(side_file, dest).await {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(Errno::EXDEV as i32) => {
            let name = dest
                .file_name()
                .map_or_else(|| "download".into(), |n| n.to_string_lossy().into_owned());
            let staging = dest.with_file_name(format!(".{name}.partial"));

            if let Err(e) = tokio::fs::copy(side_file, &staging).await {
                discard(&staging).await;
                return Err(e.into());
            }
            tokio::fs::rename(&staging, dest).await?;
            tokio::fs::remove_file(side_file).await?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Check if enough disk space is available below `install_root`
fn check_disk_space(install_root: &Path, required_bytes: u64, reserve_mb: u64) -> Result<()> {
    if required_bytes == 0 {
        return Ok(());
    }
    std::fs::create_dir_all(install_root)?;

    let stats = nix::sys::statvfs::statvfs(install_root)
        .map_err(|e| PullError::Other(format!("Failed to check disk space: {e}")))?;

    #[allow(clippy::unnecessary_cast, clippy::useless_conversion)]
    let available_bytes = u64::from(stats.blocks_available()) * u64::from(stats.fragment_size());
    let required_with_reserve =
        required_bytes.saturating_add(reserve_mb.saturating_mul(1_024 * 1_024));

    if available_bytes < required_with_reserve {
        return Err(PullError::Transfer(format!(
            "Not enough disk space: {} required, {} available",
            format_bytes(required_with_reserve),
            format_bytes(available_bytes)
        )));
    }

    Ok(())
}
