//! Dispatch to the external `tidal-dl-ng` downloader (`tdn`).

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;
use tokio::time::timeout;

use crate::error::ToolError;
use crate::types::{FavoriteKind, album_url, track_url};

const EXECUTABLE_NAMES: [&str; 2] = ["tdn", "tidal-dl-ng"];
const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
/// Characters of tool output kept in a dispatch result.
const OUTPUT_TAIL_CHARS: usize = 4000;

pub const INSTALL_HINT: &str = "tidal-dl-ng is not installed. Install it with `pip install tidal-dl-ng` \
     (or set TIDAL_DL_PATH), then run `tdn login` once.";
pub const LOGIN_HINT: &str =
    "tidal-dl-ng is not authenticated. Run `tdn login` in a terminal, then retry.";

#[derive(Debug, Clone, PartialEq)]
pub enum DownloadTarget {
    Track(String),
    Album(String),
    Playlist(String),
    Favorites(FavoriteKind),
}

impl DownloadTarget {
    pub fn url(&self) -> Option<String> {
        match self {
            Self::Track(id) => Some(track_url(id)),
            Self::Album(id) => Some(album_url(id)),
            Self::Playlist(id) => Some(format!("https://tidal.com/browse/playlist/{id}")),
            Self::Favorites(_) => None,
        }
    }

    fn args(&self) -> Vec<String> {
        match (self, self.url()) {
            (Self::Favorites(kind), _) => vec!["dl_fav".to_string(), kind.as_str().to_string()],
            (_, Some(url)) => vec!["dl".to_string(), url],
            (_, None) => Vec::new(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(match self {
            Self::Track(_) => 300,
            Self::Album(_) => 600,
            Self::Playlist(_) => 1200,
            Self::Favorites(_) => 1800,
        })
    }

    fn describe(&self) -> String {
        match self {
            Self::Track(id) => format!("track {id}"),
            Self::Album(id) => format!("album {id}"),
            Self::Playlist(id) => format!("playlist {id}"),
            Self::Favorites(kind) => format!("favorite {}", kind.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStatus {
    Ok,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    pub status: DispatchStatus,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub output: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolStatus {
    pub installed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn is_file(path: &Path) -> bool {
    path.metadata().map(|m| m.is_file()).unwrap_or(false)
}

fn fallback_locations() -> Vec<PathBuf> {
    let mut dirs_to_check = Vec::new();
    if let Some(home) = dirs::home_dir() {
        dirs_to_check.push(home.join(".local").join("bin"));
    }
    dirs_to_check.push(PathBuf::from("/usr/local/bin"));
    dirs_to_check
        .into_iter()
        .flat_map(|dir| EXECUTABLE_NAMES.iter().map(move |name| dir.join(name)))
        .collect()
}

/// Keep the last `max` characters, on a char boundary.
fn tail(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        return text.to_string();
    }
    text.chars().skip(count - max).collect()
}

fn mentions_login(output: &str) -> bool {
    let lower = output.to_lowercase();
    ["not logged in", "authentication", "login"]
        .iter()
        .any(|pattern| lower.contains(pattern))
}

#[derive(Debug, Clone, Default)]
pub struct Downloader {
    override_path: Option<PathBuf>,
}

impl Downloader {
    pub fn new(override_path: Option<PathBuf>) -> Self {
        Self { override_path }
    }

    /// An explicit override is authoritative; otherwise `PATH`, then the
    /// usual install directories.
    pub fn locate(&self) -> Option<PathBuf> {
        if let Some(path) = &self.override_path {
            return is_file(path).then(|| path.clone());
        }
        EXECUTABLE_NAMES
            .iter()
            .find_map(|name| which::which(name).ok())
            .or_else(|| fallback_locations().into_iter().find(|p| is_file(p)))
    }

    pub async fn dispatch(&self, target: DownloadTarget) -> Result<DispatchOutcome, ToolError> {
        let exe = self
            .locate()
            .ok_or_else(|| ToolError::DownloadToolMissing(INSTALL_HINT.to_string()))?;
        let what = target.describe();
        let limit = target.timeout();
        tracing::info!(exe = %exe.display(), target = %what, "starting download");

        let mut command = Command::new(&exe);
        command
            .args(target.args())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match timeout(limit, command.output()).await {
            Err(_) => {
                tracing::warn!(target = %what, "download timed out");
                return Ok(DispatchOutcome {
                    status: DispatchStatus::Failed,
                    detail: format!(
                        "Download of {what} timed out after {} minutes",
                        limit.as_secs() / 60
                    ),
                    url: target.url(),
                    output: String::new(),
                });
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ToolError::DownloadToolMissing(INSTALL_HINT.to_string()));
            }
            Ok(Err(e)) => {
                return Ok(DispatchOutcome {
                    status: DispatchStatus::Failed,
                    detail: format!("Could not start {}: {e}", exe.display()),
                    url: target.url(),
                    output: String::new(),
                });
            }
            Ok(Ok(output)) => output,
        };

        let combined = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        let trimmed = tail(combined.trim(), OUTPUT_TAIL_CHARS);

        if output.status.success() {
            tracing::info!(target = %what, "download finished");
            return Ok(DispatchOutcome {
                status: DispatchStatus::Ok,
                detail: format!("Downloaded {what}"),
                url: target.url(),
                output: trimmed,
            });
        }

        if mentions_login(&combined) {
            return Err(ToolError::DownloadToolMissing(LOGIN_HINT.to_string()));
        }
        let code = output
            .status
            .code()
            .map_or_else(|| "signal".to_string(), |c| c.to_string());
        tracing::warn!(target = %what, code = %code, "download failed");
        Ok(DispatchOutcome {
            status: DispatchStatus::Failed,
            detail: format!("Download of {what} failed (exit {code})"),
            url: target.url(),
            output: trimmed,
        })
    }

    pub async fn status(&self) -> ToolStatus {
        let Some(exe) = self.locate() else {
            return ToolStatus {
                installed: false,
                path: None,
                version: None,
                message: Some(INSTALL_HINT.to_string()),
            };
        };
        let mut command = Command::new(&exe);
        command.arg("--version").stdin(Stdio::null()).kill_on_drop(true);
        let (version, message) = match timeout(VERSION_PROBE_TIMEOUT, command.output()).await {
            Ok(Ok(out)) if out.status.success() => {
                let text = String::from_utf8_lossy(&out.stdout).trim().to_string();
                (Some(if text.is_empty() { "unknown".into() } else { text }), None)
            }
            Ok(Ok(out)) => (
                Some("unknown".to_string()),
                Some(format!("--version exited with {}", out.status)),
            ),
            Ok(Err(e)) => (Some("unknown".to_string()), Some(e.to_string())),
            Err(_) => (
                Some("unknown".to_string()),
                Some("--version probe timed out".to_string()),
            ),
        };
        ToolStatus {
            installed: true,
            path: Some(exe.display().to_string()),
            version,
            message,
        }
    }
}
