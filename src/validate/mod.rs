//! Post-download integrity checks.
//!
//! A file is checked by size only: it must exist under the install root and
//! its length must equal the catalog's declared size. Files whose declared
//! size cannot be parsed are reported as unverified and do not fail a preset.

use crate::error::Result;
use crate::presets::{PresetCatalog, PresetEntry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    Valid,
    Missing,
    Corrupted,
    /// Present, but the declared size is unknown
    Unverified,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCheck {
    pub path: String,
    pub destination: PathBuf,
    pub state: FileState,
    pub expected_bytes: Option<u64>,
    pub actual_bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorruptedFile {
    pub path: String,
    pub expected_bytes: u64,
    pub actual_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub preset_id: String,
    pub preset_name: String,
    pub category: String,
    pub valid: bool,
    pub files: Vec<FileCheck>,
    pub missing: Vec<String>,
    pub corrupted: Vec<CorruptedFile>,
    pub unverified: Vec<String>,
    pub validated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallValidation {
    Valid,
    Invalid,
    NotValidated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub total_presets: usize,
    pub total_files: usize,
    pub valid_presets: usize,
    pub invalid_presets: usize,
    pub overall_status: OverallValidation,
    pub validated_at: Option<String>,
}

/// Checks installed presets against the catalog
///
/// Reports accumulate per instance; [`Validator::get_summary`] aggregates the
/// latest report of every preset validated so far.
#[derive(Debug)]
pub struct Validator {
    catalog: Arc<PresetCatalog>,
    install_root: PathBuf,
    reports: BTreeMap<String, ValidationReport>,
}

impl Validator {
    pub fn new(catalog: Arc<PresetCatalog>, install_root: impl Into<PathBuf>) -> Self {
        Self {
            catalog,
            install_root: install_root.into(),
            reports: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn install_root(&self) -> &Path {
        &self.install_root
    }

    pub fn validate_preset(&mut self, preset_id: &str) -> Result<ValidationReport> {
        let report = check_preset(self.catalog.get(preset_id)?, &self.install_root);

        tracing::debug!(
            "Validated '{preset_id}': {} missing, {} corrupted",
            report.missing.len(),
            report.corrupted.len()
        );

        self.reports.insert(preset_id.to_string(), report.clone());
        Ok(report)
    }

    /// Validate every preset, or those of one category
    pub fn validate_all_presets(&mut self, category: Option<&str>) -> Vec<ValidationReport> {
        let catalog = Arc::clone(&self.catalog);
        let presets: Vec<&PresetEntry> = match category {
            Some(category) => catalog.by_category(category).collect(),
            None => catalog.iter().collect(),
        };

        presets
            .into_iter()
            .map(|preset| {
                let report = check_preset(preset, &self.install_root);
                self.reports.insert(preset.id.clone(), report.clone());
                report
            })
            .collect()
    }

    #[must_use]
    pub fn get_summary(&self) -> ValidationSummary {
        let total_presets = self.reports.len();
        let valid_presets = self.reports.values().filter(|r| r.valid).count();
        let invalid_presets = total_presets - valid_presets;

        let overall_status = if total_presets == 0 {
            OverallValidation::NotValidated
        } else if invalid_presets == 0 {
            OverallValidation::Valid
        } else {
            OverallValidation::Invalid
        };

        ValidationSummary {
            total_presets,
            total_files: self.reports.values().map(|r| r.files.len()).sum(),
            valid_presets,
            invalid_presets,
            overall_status,
            validated_at: self.reports.values().map(|r| r.validated_at.clone()).max(),
        }
    }
}

fn check_preset(preset: &PresetEntry, install_root: &Path) -> ValidationReport {
    let (specs, warnings) = preset.file_specs();
    for warning in &warnings {
        tracing::warn!("Not validating file entry: {warning}");
    }

    let mut report = ValidationReport {
        preset_id: preset.id.clone(),
        preset_name: preset.name.clone(),
        category: preset.category.clone(),
        valid: true,
        files: Vec::with_capacity(specs.len()),
        missing: Vec::new(),
        corrupted: Vec::new(),
        unverified: Vec::new(),
        validated_at: chrono::Utc::now().to_rfc3339(),
    };

    for spec in specs {
        let destination = install_root.join(&spec.relative_path);
        let expected_bytes = spec.declared_bytes();
        let actual_bytes = std::fs::metadata(&destination)
            .ok()
            .filter(std::fs::Metadata::is_file)
            .map(|m| m.len());

        let state = match (actual_bytes, expected_bytes) {
            (None, _) => {
                report.missing.push(spec.relative_path.clone());
                FileState::Missing
            }
            (Some(_), None) => {
                report.unverified.push(spec.relative_path.clone());
                FileState::Unverified
            }
            (Some(actual), Some(expected)) if actual != expected => {
                report.corrupted.push(CorruptedFile {
                    path: spec.relative_path.clone(),
                    expected_bytes: expected,
                    actual_bytes: actual,
                });
                FileState::Corrupted
            }
            (Some(_), Some(_)) => FileState::Valid,
        };

        report.files.push(FileCheck {
            path: spec.relative_path,
            destination,
            state,
            expected_bytes,
            actual_bytes,
        });
    }

    report.valid = report.missing.is_empty() && report.corrupted.is_empty();
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const CATALOG: &str = r#"
[presets.P1]
name = "Preset One"
category = "Image"
files = [{ path = "checkpoints/m.safetensors", url = "https://x/m.safetensors", size = "100MB" }]

[presets.P2]
name = "Preset Two"
category = "Audio"
files = [
    { path = "audio/a.bin", url = "https://x/a.bin", size = "1KB" },
    { path = "audio/b.bin", url = "https://x/b.bin", size = "about a gig" },
    "legacy.bin",
]

[presets.EMPTY]
category = "Audio"
"#;

    fn validator(root: &Path) -> Validator {
        let catalog = PresetCatalog::from_toml_str(CATALOG).unwrap();
        Validator::new(Arc::new(catalog), root)
    }

    fn write_sized(root: &Path, relative: &str, len: u64) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::File::create(&path).unwrap().set_len(len).unwrap();
    }

    #[test]
    fn test_exact_size_is_valid() {
        let temp_dir = TempDir::new().unwrap();
        write_sized(temp_dir.path(), "checkpoints/m.safetensors", 104_857_600);

        let report = validator(temp_dir.path()).validate_preset("P1").unwrap();

        assert!(report.valid);
        assert!(report.missing.is_empty());
        assert!(report.corrupted.is_empty());
        assert_eq!(report.files[0].state, FileState::Valid);
    }

    #[test]
    fn test_short_file_is_corrupted_not_missing() {
        let temp_dir = TempDir::new().unwrap();
        write_sized(temp_dir.path(), "checkpoints/m.safetensors", 104_857_590);

        let report = validator(temp_dir.path()).validate_preset("P1").unwrap();

        assert!(!report.valid);
        assert!(report.missing.is_empty());
        assert_eq!(
            report.corrupted,
            vec![CorruptedFile {
                path: "checkpoints/m.safetensors".to_string(),
                expected_bytes: 104_857_600,
                actual_bytes: 104_857_590,
            }]
        );
    }

    #[test]
    fn test_absent_file_is_missing() {
        let temp_dir = TempDir::new().unwrap();
        let report = validator(temp_dir.path()).validate_preset("P1").unwrap();

        assert!(!report.valid);
        assert_eq!(report.missing, vec!["checkpoints/m.safetensors"]);
    }

    #[test]
    fn test_unparsable_size_is_unverified() {
        let temp_dir = TempDir::new().unwrap();
        write_sized(temp_dir.path(), "audio/a.bin", 1024);
        write_sized(temp_dir.path(), "audio/b.bin", 7);

        let report = validator(temp_dir.path()).validate_preset("P2").unwrap();

        assert!(report.valid);
        assert_eq!(report.files.len(), 2);
        assert_eq!(report.unverified, vec!["audio/b.bin"]);
    }

    #[test]
    fn test_unknown_preset_is_error() {
        let temp_dir = TempDir::new().unwrap();
        assert!(validator(temp_dir.path()).validate_preset("NOPE").is_err());
    }

    #[test]
    fn test_summary_accumulates() {
        let temp_dir = TempDir::new().unwrap();
        let mut validator = validator(temp_dir.path());
        assert_eq!(
            validator.get_summary().overall_status,
            OverallValidation::NotValidated
        );

        let reports = validator.validate_all_presets(Some("audio"));
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.category == "Audio"));

        validator.validate_preset("P1").unwrap();
        let summary = validator.get_summary();

        assert_eq!(summary.total_presets, 3);
        assert_eq!(summary.total_files, 3);
        assert_eq!(summary.valid_presets, 1);
        assert_eq!(summary.invalid_presets, 2);
        assert_eq!(summary.overall_status, OverallValidation::Invalid);
        assert!(summary.validated_at.is_some());
    }
}
