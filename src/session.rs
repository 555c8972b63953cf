use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::error::ToolError;

/// Sessions this close to expiry are treated as expired.
const EXPIRY_SKEW_SECS: i64 = 30;

pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Authenticated upstream session. Acquired at login, replaced on refresh,
/// dropped at logout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub expires_at: i64,
    pub user_id: u64,
    pub country_code: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl Session {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now + EXPIRY_SKEW_SECS
    }

    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

/// Process-wide session slot backed by a JSON file.
pub struct SessionStore {
    path: PathBuf,
    slot: Mutex<Option<Session>>,
}

impl SessionStore {
    /// Open the store, loading a previously persisted session if one exists.
    /// An unreadable file is logged and treated as "no session".
    pub fn open(path: PathBuf) -> Self {
        let session = match load_session_file(&path) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable session file");
                None
            }
        };
        Self {
            path,
            slot: Mutex::new(session),
        }
    }

    #[cfg(test)]
    pub fn with_session(path: PathBuf, session: Option<Session>) -> Self {
        Self {
            path,
            slot: Mutex::new(session),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn slot(&self) -> MutexGuard<'_, Option<Session>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> Option<Session> {
        self.slot().clone()
    }

    /// The live session, or `AuthRequired` when it is missing or expired.
    pub fn current(&self, now: i64) -> Result<Session, ToolError> {
        match self.snapshot() {
            Some(session) if !session.is_expired(now) => Ok(session),
            _ => Err(ToolError::auth_required()),
        }
    }

    /// Replace the session in memory, then persist it.
    pub fn install(&self, session: Session) -> std::io::Result<()> {
        *self.slot() = Some(session.clone());
        write_session_file(&self.path, &session)
    }

    /// Drop the session from memory and disk. Returns whether one existed.
    pub fn invalidate(&self) -> std::io::Result<bool> {
        let had_session = self.slot().take().is_some();
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(had_session),
            Err(e) => Err(e),
        }
    }
}

fn load_session_file(path: &Path) -> std::io::Result<Option<Session>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

fn write_session_file(path: &Path, session: &Session) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(session)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(path, json)
}

#[cfg(test)]
pub(crate) fn test_session() -> Session {
    Session {
        access_token: "test-token".into(),
        refresh_token: Some("test-refresh".into()),
        token_type: "Bearer".into(),
        expires_at: unix_now() + 3600,
        user_id: 42,
        country_code: "US".into(),
    }
}
