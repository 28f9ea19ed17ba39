use crate::config::Config;
use crate::download::job::{self, DownloadJob, JobFile, JobState, JobStatus};
use crate::download::procedure::ScriptGenerator;
use crate::download::selection::PresetSelection;
use crate::error::{PullError, Result};
use crate::presets::PresetCatalog;
use crate::progress::ProgressStore;
use std::fs::{self, OpenOptions};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Requested preset IDs partitioned against the catalog
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub valid: Vec<String>,
    pub invalid: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    Launched {
        job: DownloadJob,
        invalid: Vec<String>,
    },
    /// No valid preset was requested; not an error
    NothingToDo { invalid: Vec<String> },
}

/// Short-lived launcher for detached download jobs
///
/// The orchestrator never waits for a job. It writes the compiled plan and
/// its launcher to the scratch directory, starts the launcher in its own
/// process group and records the PID in the job file.
pub struct Orchestrator<'a> {
    catalog: &'a PresetCatalog,
    config: &'a Config,
    executable: PathBuf,
}

impl<'a> Orchestrator<'a> {
    /// Jobs are run by the current executable
    pub fn new(catalog: &'a PresetCatalog, config: &'a Config) -> Result<Self> {
        let executable = std::env::current_exe()
            .map_err(|e| PullError::Spawn(format!("Cannot locate own executable: {e}")))?;
        Ok(Self::with_executable(catalog, config, executable))
    }

    #[must_use]
    pub fn with_executable(
        catalog: &'a PresetCatalog,
        config: &'a Config,
        executable: impl Into<PathBuf>,
    ) -> Self {
        Self {
            catalog,
            config,
            executable: executable.into(),
        }
    }

    #[must_use]
    pub fn job_file(&self) -> JobFile {
        JobFile::new(&self.config.paths.job_file)
    }

    #[must_use]
    pub fn progress_store(&self) -> ProgressStore {
        ProgressStore::new(&self.config.paths.progress_file)
    }

    pub fn validate(&self, preset_ids: &[String]) -> Resolution {
        let (valid, invalid): (Vec<String>, Vec<String>) = preset_ids
            .iter()
            .cloned()
            .partition(|id| self.catalog.contains(id));

        let resolution = Resolution { valid, invalid };
        for id in &resolution.invalid {
            match self.catalog.suggest(id) {
                Some(hint) => tracing::warn!("Unknown preset '{id}' (did you mean '{hint}'?)"),
                None => tracing::warn!("Unknown preset '{id}'"),
            }
        }
        resolution
    }

    /// Compile, write and start a job for `preset_ids`
    pub fn launch(&self, preset_ids: &[String]) -> Result<DownloadJob> {
        if let JobState::Running(active) = self.job_file().state() {
            return Err(PullError::JobActive { pid: active.pid });
        }

        let procedure =
            ScriptGenerator::new(self.catalog, self.config).compile_procedure(preset_ids);

        let scratch_dir = &self.config.paths.scratch_dir;
        fs::create_dir_all(scratch_dir)?;
        let plan_path = scratch_dir.join(format!("{}.json", procedure.job_id));
        let launcher_path = scratch_dir.join(format!("{}.sh", procedure.job_id));
        let log_path = scratch_dir.join(format!("{}.log", procedure.job_id));

        procedure.save(&plan_path)?;
        fs::write(
            &launcher_path,
            procedure.render_launcher(&self.executable, &plan_path),
        )?;
        fs::set_permissions(&launcher_path, fs::Permissions::from_mode(0o755))?;

        // Recorded before spawning so an unwritable job file never leaves an
        // untracked job behind
        let mut job = DownloadJob {
            job_id: procedure.job_id,
            preset_ids: preset_ids.to_vec(),
            pid: 0,
            started_at: chrono::Utc::now().to_rfc3339(),
            status: JobStatus::Pending,
            plan_path,
            log_path,
        };
        let job_file = self.job_file();
        job_file.save(&job)?;

        job.pid = match spawn_detached(&launcher_path, &[], &job.log_path) {
            Ok(pid) => pid,
            Err(e) => {
                job_file.clear();
                return Err(e);
            }
        };
        job.status = JobStatus::Running;

        if let Err(e) = job_file.save(&job) {
            tracing::error!("Failed to record job {}, stopping it: {e}", job.job_id);
            if let Err(kill_err) = job::terminate(job.pid) {
                tracing::warn!("{kill_err}");
            }
            job_file.clear();
            return Err(e);
        }

        tracing::info!(
            "Launched job {} (pid {}) for {}",
            job.job_id,
            job.pid,
            job.preset_ids.join(",")
        );

        Ok(job)
    }

    /// Validate a selection and launch its valid subset
    pub fn start(&self, selection: &PresetSelection) -> Result<LaunchOutcome> {
        tracing::debug!(
            "Starting {:?} selection: {}",
            selection.source,
            selection.ids.join(",")
        );

        let Resolution { valid, invalid } = self.validate(&selection.ids);
        if valid.is_empty() {
            tracing::info!("No valid presets requested, nothing to do");
            return Ok(LaunchOutcome::NothingToDo { invalid });
        }

        let job = self.launch(&valid)?;
        Ok(LaunchOutcome::Launched { job, invalid })
    }

    /// Liveness of the recorded job; a finished job is settled from the store
    #[must_use]
    pub fn job_state(&self) -> JobState {
        match self.job_file().state() {
            JobState::Finished(mut finished) => {
                finished.status =
                    JobStatus::settled(&finished.job_id, &self.progress_store().load());
                JobState::Finished(finished)
            }
            state => state,
        }
    }

    /// Terminate the running job, if any
    ///
    /// Files already moved into place stay and are skipped by the next run.
    pub fn stop(&self) -> Result<Option<DownloadJob>> {
        match self.job_state() {
            JobState::Running(running) => {
                job::terminate(running.pid)?;
                tracing::info!("Sent SIGTERM to job {} (pid {})", running.job_id, running.pid);
                Ok(Some(running))
            }
            _ => Ok(None),
        }
    }
}

/// Start `program` in its own process group with output appended to `log_path`
///
/// The child is not waited on; its PID is returned for liveness probes.
pub(crate) fn spawn_detached(program: &Path, args: &[&str], log_path: &Path) -> Result<u32> {
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|e| PullError::Spawn(format!("Cannot open {}: {e}", log_path.display())))?;
    let log_err = log.try_clone()?;

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .process_group(0)
        .spawn()
        .map_err(|e| PullError::Spawn(format!("{}: {e}", program.display())))?;

    Ok(child.id())
}
