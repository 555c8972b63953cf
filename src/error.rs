use rmcp::model::{CallToolResult, Content};
use thiserror::Error;

pub const LOGIN_REMEDIATION: &str =
    "Not authenticated with TIDAL (no session, or the session expired). Call tidal_login first.";

/// Failure surfaced to the calling model as a structured tool error.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("{0}")]
    AuthRequired(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    UpstreamUnavailable(String),
    /// Reported under the `UpstreamUnavailable` kind; kept apart so batch
    /// callers can label the query `upstream-timeout`.
    #[error("{0}")]
    UpstreamTimeout(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{message}")]
    PartialFailure {
        message: String,
        details: serde_json::Value,
    },
    #[error("{0}")]
    DownloadToolMissing(String),
}

impl ToolError {
    pub fn auth_required() -> Self {
        Self::AuthRequired(LOGIN_REMEDIATION.to_string())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Map a non-success upstream HTTP status onto an error kind.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => Self::AuthRequired(format!("{message}. {LOGIN_REMEDIATION}")),
            404 => Self::NotFound(message),
            400 | 409 | 412 | 422 => Self::Validation(message),
            _ => Self::UpstreamUnavailable(message),
        }
    }

    pub fn from_transport(err: &reqwest::Error, context: &str) -> Self {
        if err.is_timeout() {
            Self::UpstreamTimeout(format!("{context}: request timed out"))
        } else {
            Self::UpstreamUnavailable(format!("{context}: {err}"))
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthRequired(_) => "AuthRequired",
            Self::Validation(_) => "ValidationError",
            Self::UpstreamUnavailable(_) | Self::UpstreamTimeout(_) => "UpstreamUnavailable",
            Self::NotFound(_) => "NotFound",
            Self::PartialFailure { .. } => "PartialFailure",
            Self::DownloadToolMissing(_) => "DownloadToolMissing",
        }
    }

    /// Transient upstream failures worth one retry on read-only calls.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable(_) | Self::UpstreamTimeout(_))
    }

    pub fn to_payload(&self) -> serde_json::Value {
        let mut error = serde_json::json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });
        if let Self::PartialFailure { details, .. } = self
            && let (Some(obj), Some(extra)) = (error.as_object_mut(), details.as_object())
        {
            for (key, value) in extra {
                obj.insert(key.clone(), value.clone());
            }
        }
        serde_json::json!({ "error": error })
    }

    pub fn into_call_result(self) -> CallToolResult {
        tracing::warn!(kind = self.kind(), error = %self, "tool call failed");
        let text = serde_json::to_string_pretty(&self.to_payload())
            .unwrap_or_else(|_| format!("{}: {}", self.kind(), self));
        CallToolResult::error(vec![Content::text(text)])
    }
}
