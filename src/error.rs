use thiserror::Error;

/// Main error type for modelpull
#[derive(Error, Debug)]
pub enum PullError {
    #[error("Config error: {0}\n\nTroubleshooting:\n- Check config file: ~/.config/modelpull/config.toml\n- Override the location with MODELPULL_CONFIG\n- Run with RUST_LOG=debug for more details")]
    Config(String),

    #[error("Catalog error: {0}\n\nTroubleshooting:\n- Check the catalog path in [paths] catalog or pass --catalog\n- The document must contain a top-level `presets` table\n- Validate the file with a TOML/JSON linter")]
    Catalog(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("A download job is already running (pid {pid})\n\nTroubleshooting:\n- Check progress with: modelpull status\n- Stop it first with: modelpull stop")]
    JobActive { pid: u32 },

    #[error("Failed to start download job: {0}\n\nTroubleshooting:\n- Check that the scratch directory is writable and not mounted noexec\n- Check the job log in the scratch directory")]
    Spawn(String),

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Progress store error: {0}")]
    Progress(String),

    #[error("Server error: {0}\n\nTroubleshooting:\n- Is another process bound to the same address?\n- Change [server] bind in the config")]
    Server(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, PullError>;
