use clap::{Parser, Subcommand};
use modelpull::broadcast::{self, AppState, Broadcaster};
use modelpull::config::Config;
use modelpull::download::{
    self, parse_preset_list, JobFile, JobState, LaunchOutcome, Orchestrator, PresetSelection,
};
use modelpull::error::{PullError, Result};
use modelpull::presets::{format_bytes, PresetCatalog};
use modelpull::progress::{ProgressStore, StatusReport};
use modelpull::validate::Validator;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "modelpull")]
#[command(about = "Resumable model preset downloads with live progress", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.config/modelpull/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Preset catalog (TOML or JSON)
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Directory models are installed under
    #[arg(long, global = true)]
    install_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List catalog presets
    List {
        #[arg(long)]
        category: Option<String>,
    },
    /// Start a background download job
    Launch {
        /// Comma-separated preset IDs; overrides the *_PRESET_DOWNLOAD variables
        #[arg(long)]
        presets: Option<String>,
    },
    /// Run a compiled job plan in the foreground (used by the job launcher)
    #[command(hide = true)]
    RunJob {
        #[arg(long)]
        plan: PathBuf,
        #[arg(long)]
        presets: Option<String>,
        #[arg(long)]
        quiet: bool,
    },
    /// Print download status as JSON
    Status,
    /// Stop the running job
    Stop,
    /// Check installed files against the catalog
    Validate {
        preset: Option<String>,
        #[arg(long)]
        category: Option<String>,
    },
    /// Serve progress over WebSocket and the JSON status API
    Serve {
        /// Overrides [server] bind
        #[arg(long)]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(catalog) = cli.catalog {
        config.paths.catalog = catalog;
    }
    if let Some(install_root) = cli.install_root {
        config.paths.install_root = install_root;
    }

    match cli.command {
        Commands::List { category } => list(&config, category.as_deref()),
        Commands::Launch { presets } => launch(&config, presets.as_deref()),
        Commands::RunJob {
            plan,
            presets,
            quiet,
        } => {
            let only = presets.as_deref().map(parse_preset_list);
            let outcome = download::run_job(&plan, only.as_deref(), quiet).await?;
            if !outcome.success() {
                std::process::exit(outcome.exit_code());
            }
            Ok(())
        }
        Commands::Status => status(&config),
        Commands::Stop => stop(&config),
        Commands::Validate { preset, category } => {
            validate(&config, preset.as_deref(), category.as_deref())
        }
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            serve(&config).await
        }
    }
}

fn list(config: &Config, category: Option<&str>) -> Result<()> {
    let catalog = PresetCatalog::load(&config.paths.catalog)?;
    let presets: Vec<_> = match category {
        Some(category) => catalog.by_category(category).collect(),
        None => catalog.iter().collect(),
    };

    if presets.is_empty() {
        println!("No presets found");
        return Ok(());
    }

    for preset in presets {
        let (specs, warnings) = preset.file_specs();
        let size: u64 = specs.iter().filter_map(|s| s.declared_bytes()).sum();
        println!(
            "{:<28} {:<32} {:<20} {} files, {}",
            preset.id,
            preset.name,
            preset.category,
            specs.len(),
            format_bytes(size)
        );
        if !warnings.is_empty() {
            println!("    ({} malformed file entries ignored)", warnings.len());
        }
    }

    Ok(())
}

fn launch(config: &Config, presets: Option<&str>) -> Result<()> {
    let selection = PresetSelection::resolve(presets);
    if selection.is_empty() {
        println!("No presets selected. Pass --presets or set PRESET_IDS.");
        return Ok(());
    }

    let catalog = PresetCatalog::load(&config.paths.catalog)?;
    let orchestrator = Orchestrator::new(&catalog, config)?;

    match orchestrator.start(&selection)? {
        LaunchOutcome::Launched { job, invalid } => {
            for id in &invalid {
                eprintln!("Skipping unknown preset '{id}'");
            }
            println!(
                "✓ Started job {} (pid {}) for {}",
                job.job_id,
                job.pid,
                job.preset_ids.join(", ")
            );
            println!("Log: {}", job.log_path.display());
        }
        LaunchOutcome::NothingToDo { invalid } => {
            println!("Nothing to do: no valid presets in {}", invalid.join(", "));
        }
    }

    Ok(())
}

fn status(config: &Config) -> Result<()> {
    let job_running = JobFile::new(&config.paths.job_file).state().is_running();
    let report = StatusReport::build(
        &ProgressStore::new(&config.paths.progress_file).load(),
        job_running,
    );

    let json = serde_json::to_string_pretty(&report)
        .map_err(|e| PullError::Other(format!("Failed to encode status: {e}")))?;
    println!("{json}");
    Ok(())
}

fn stop(config: &Config) -> Result<()> {
    // Stopping only consults the job file, never the catalog
    let catalog = PresetCatalog::default();
    let orchestrator = Orchestrator::new(&catalog, config)?;

    match orchestrator.stop()? {
        Some(job) => println!("✓ Stopped job {} (pid {})", job.job_id, job.pid),
        None => match orchestrator.job_state() {
            JobState::Finished(job) => {
                println!("No job running (last job {} {:?})", job.job_id, job.status);
            }
            _ => println!("No job running"),
        },
    }

    Ok(())
}

fn validate(config: &Config, preset: Option<&str>, category: Option<&str>) -> Result<()> {
    let catalog = Arc::new(PresetCatalog::load(&config.paths.catalog)?);
    let mut validator = Validator::new(catalog, &config.paths.install_root);

    let reports = match preset {
        Some(preset_id) => vec![validator.validate_preset(preset_id)?],
        None => validator.validate_all_presets(category),
    };

    for report in &reports {
        if report.valid {
            println!("✓ {} ({})", report.preset_id, report.preset_name);
        } else {
            println!(
                "✗ {} ({}): {} missing, {} corrupted",
                report.preset_id,
                report.preset_name,
                report.missing.len(),
                report.corrupted.len()
            );
        }
        for path in &report.missing {
            println!("    missing   {path}");
        }
        for file in &report.corrupted {
            println!(
                "    corrupted {} ({} on disk, {} expected)",
                file.path,
                format_bytes(file.actual_bytes),
                format_bytes(file.expected_bytes)
            );
        }
        for path in &report.unverified {
            println!("    unverified {path} (size unknown)");
        }
    }

    let summary = validator.get_summary();
    println!(
        "{} of {} presets valid ({} files checked)",
        summary.valid_presets, summary.total_presets, summary.total_files
    );

    if summary.invalid_presets > 0 {
        std::process::exit(1);
    }
    Ok(())
}

async fn serve(config: &Config) -> Result<()> {
    let catalog = Arc::new(PresetCatalog::load(&config.paths.catalog)?);
    let store = ProgressStore::new(&config.paths.progress_file);

    let state = AppState {
        broadcaster: Arc::new(Broadcaster::new(store.clone())),
        validator: Arc::new(Mutex::new(Validator::new(
            catalog,
            &config.paths.install_root,
        ))),
        store,
        job_file: JobFile::new(&config.paths.job_file),
    };

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .map_err(|e| PullError::Server(format!("Failed to bind {}: {e}", config.server.bind)))?;

    broadcast::serve(
        listener,
        state,
        Duration::from_millis(config.server.poll_interval_ms),
        async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutting down");
        },
    )
    .await
}
