//! Download orchestration.
//!
//! Preset IDs are compiled into a [`Procedure`] (a JSON plan plus a small
//! shell launcher). The [`Orchestrator`] starts that launcher as a detached
//! process and returns immediately; the launcher re-enters this binary as
//! `modelpull run-job`, where the [`JobRunner`] performs the transfers and
//! reports through the progress store.

pub mod fetch;
pub mod job;
pub mod orchestrator;
pub mod procedure;
pub mod runner;
pub mod selection;

pub use fetch::{Fetcher, HttpFetcher, ProgressFn};
pub use job::{is_process_alive, DownloadJob, JobFile, JobState, JobStatus};
pub use orchestrator::{LaunchOutcome, Orchestrator, Resolution};
pub use procedure::{DownloadStep, PresetPlan, Procedure, ScriptGenerator};
pub use runner::{run_job, JobOutcome, JobRunner};
pub use selection::{merge_channels, parse_preset_list, PresetChannel, PresetSelection};
