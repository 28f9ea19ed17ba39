use crate::config::schema::{Config, DownloadConfig};
use crate::error::{PullError, Result};
use crate::presets::{FileSpec, PresetCatalog};
use crate::progress::write_atomic;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// One file transfer in a compiled procedure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadStep {
    pub relative_path: String,
    pub destination: PathBuf,
    pub url: String,
    pub declared_size: Option<String>,
    pub declared_bytes: Option<u64>,
}

impl DownloadStep {
    fn from_spec(spec: &FileSpec, install_root: &Path) -> Self {
        Self {
            relative_path: spec.relative_path.clone(),
            destination: install_root.join(&spec.relative_path),
            url: spec.source_url.clone(),
            declared_size: spec.declared_size.clone(),
            declared_bytes: spec.declared_bytes(),
        }
    }

    /// Final path component of the destination
    #[must_use]
    pub fn file_name(&self) -> String {
        self.destination.file_name().map_or_else(
            || self.relative_path.clone(),
            |n| n.to_string_lossy().into_owned(),
        )
    }
}

/// Per-preset branch of a procedure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PresetPlan {
    Download {
        preset_id: String,
        name: String,
        steps: Vec<DownloadStep>,
    },
    /// Unknown ID: reported at run time, never fails the procedure
    NoMatch { preset_id: String },
}

impl PresetPlan {
    #[must_use]
    pub fn preset_id(&self) -> &str {
        match self {
            Self::Download { preset_id, .. } | Self::NoMatch { preset_id } => preset_id,
        }
    }
}

/// A compiled, self-contained download procedure for one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Procedure {
    pub job_id: String,
    pub compiled_at: String,
    pub install_root: PathBuf,
    pub scratch_dir: PathBuf,
    pub progress_file: PathBuf,
    pub download: DownloadConfig,
    pub presets: Vec<PresetPlan>,
}

impl Procedure {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PullError::Config(format!("Failed to read job plan {}: {e}", path.display()))
        })?;

        serde_json::from_str(&content)
            .map_err(|e| PullError::Config(format!("Failed to parse job plan: {e}")))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| PullError::Other(format!("Failed to serialize job plan: {e}")))?;

        write_atomic(path, &content)
    }

    #[must_use]
    pub fn preset_ids(&self) -> Vec<&str> {
        self.presets.iter().map(PresetPlan::preset_id).collect()
    }

    /// Keep only the listed presets, in procedure order
    pub fn retain_presets(&mut self, preset_ids: &[String]) {
        self.presets
            .retain(|p| preset_ids.iter().any(|id| id == p.preset_id()));
    }

    /// Total declared bytes still missing on disk
    #[must_use]
    pub fn pending_bytes(&self) -> u64 {
        self.presets
            .iter()
            .filter_map(|p| match p {
                PresetPlan::Download { steps, .. } => Some(steps),
                PresetPlan::NoMatch { .. } => None,
            })
            .flatten()
            .filter(|s| !s.destination.exists())
            .filter_map(|s| s.declared_bytes)
            .sum()
    }

    /// Shell launcher that runs this procedure's plan through `exe`
    ///
    /// Arguments given to the launcher (`--presets A,B`, `--quiet`) are
    /// forwarded to the job.
    #[must_use]
    pub fn render_launcher(&self, exe: &Path, plan_path: &Path) -> String {
        format!(
            "#!/bin/sh\n\
             # modelpull download job {job_id}\n\
             # presets: {presets}\n\
             exec {exe} run-job --plan {plan} \"$@\"\n",
            job_id = self.job_id,
            presets = comment_safe(&self.preset_ids().join(",")),
            exe = shell_quote(&exe.to_string_lossy()),
            plan = shell_quote(&plan_path.to_string_lossy()),
        )
    }
}

/// Text that cannot leave a `#` comment line
fn comment_safe(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_control() { '?' } else { c })
        .collect()
}

/// Single-quote a value for POSIX sh
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Compiles preset IDs into a [`Procedure`]
pub struct ScriptGenerator<'a> {
    catalog: &'a PresetCatalog,
    config: &'a Config,
}

impl<'a> ScriptGenerator<'a> {
    #[must_use]
    pub const fn new(catalog: &'a PresetCatalog, config: &'a Config) -> Self {
        Self { catalog, config }
    }

    /// Well-formed file entries of a preset
    ///
    /// Malformed entries are skipped with a warning; only an unknown preset
    /// ID is an error.
    pub fn resolve_files(&self, preset_id: &str) -> Result<Vec<FileSpec>> {
        let preset = self.catalog.get(preset_id)?;
        let (specs, warnings) = preset.file_specs();

        for warning in &warnings {
            tracing::warn!("Skipping file entry: {warning}");
        }

        Ok(specs)
    }

    /// Compile a procedure covering `preset_ids` in the given order
    #[must_use]
    pub fn compile_procedure(&self, preset_ids: &[String]) -> Procedure {
        let install_root = &self.config.paths.install_root;

        let presets = preset_ids
            .iter()
            .map(|preset_id| match self.resolve_files(preset_id) {
                Ok(specs) => {
                    if specs.is_empty() {
                        tracing::info!("Preset '{preset_id}' has no downloadable files");
                    }
                    PresetPlan::Download {
                        preset_id: preset_id.clone(),
                        name: self
                            .catalog
                            .get(preset_id)
                            .map_or_else(|_| preset_id.clone(), |p| p.name.clone()),
                        steps: specs
                            .iter()
                            .map(|spec| DownloadStep::from_spec(spec, install_root))
                            .collect(),
                    }
                }
                Err(e) => {
                    tracing::warn!("{e}");
                    PresetPlan::NoMatch {
                        preset_id: preset_id.clone(),
                    }
                }
            })
            .collect();

        let now = chrono::Utc::now();
        Procedure {
            job_id: format!("job-{}", now.format("%Y%m%d-%H%M%S-%3f")),
            compiled_at: now.to_rfc3339(),
            install_root: install_root.clone(),
            scratch_dir: self.config.paths.scratch_dir.clone(),
            progress_file: self.config.paths.progress_file.clone(),
            download: self.config.download.clone(),
            presets,
        }
    }
}
