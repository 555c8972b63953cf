use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

use crate::config::Config;

fn log_file_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".claude").join("logs").join("tidal-mcp.log"))
}

/// Install the global subscriber. stdout carries MCP JSON-RPC, so every
/// layer writes to stderr (and optionally a log file).
pub fn init(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false);

    let file = if config.log_to_file {
        open_log_file()
    } else {
        None
    };

    let installed = match file {
        Some((path, file)) => {
            let result = builder
                .with_writer(std::io::stderr.and(Mutex::new(file)))
                .try_init();
            if result.is_ok() {
                tracing::info!(path = %path.display(), "file logging enabled");
            }
            result
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };

    if let Err(e) = installed {
        eprintln!("[tidal-mcp] logging already initialised: {e}");
    }
}

fn open_log_file() -> Option<(PathBuf, std::fs::File)> {
    let path = log_file_path()?;
    if let Some(parent) = path.parent()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        eprintln!("[tidal-mcp] could not create log directory: {e}");
        return None;
    }
    match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => Some((path, file)),
        Err(e) => {
            eprintln!("[tidal-mcp] could not open log file: {e}");
            None
        }
    }
}
