use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://api.tidal.com/v1";
pub const DEFAULT_AUTH_BASE: &str = "https://auth.tidal.com/v1";
pub const SESSION_FILE_NAME: &str = "tidal-session-oauth.json";
/// Hard ceiling for batch operations; the configured cap can only lower it.
pub const MAX_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct Config {
    /// Serve MCP over streamable HTTP on 127.0.0.1 when set; stdio otherwise.
    pub port: Option<u16>,
    pub session_path: PathBuf,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub api_base: String,
    pub auth_base: String,
    /// Top-N candidates fetched per batch query.
    pub search_page_size: u32,
    pub batch_cap: usize,
    pub min_match_confidence: f64,
    pub match_tie_epsilon: f64,
    pub batch_concurrency: usize,
    pub request_timeout: Duration,
    pub download_tool_path: Option<PathBuf>,
    pub log_level: String,
    pub log_to_file: bool,
    /// Values that failed to parse, reported once logging is up.
    pub warnings: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: None,
            session_path: std::env::temp_dir().join(SESSION_FILE_NAME),
            client_id: None,
            client_secret: None,
            api_base: DEFAULT_API_BASE.to_string(),
            auth_base: DEFAULT_AUTH_BASE.to_string(),
            search_page_size: 5,
            batch_cap: MAX_BATCH_SIZE,
            min_match_confidence: 0.75,
            match_tie_epsilon: 0.02,
            batch_concurrency: 4,
            request_timeout: Duration::from_secs(15),
            download_tool_path: None,
            log_level: "info".to_string(),
            log_to_file: false,
            warnings: Vec::new(),
        }
    }
}

impl Config {
    /// Read configuration from the process environment (and `.env`).
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::build(|key| std::env::var(key).ok())
    }

    pub fn build(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Config::default();
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut warnings = Vec::new();
        let mut config = Config {
            port: parse_var(&var, "TIDAL_MCP_PORT", &mut warnings),
            session_path: var("TIDAL_SESSION_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.session_path),
            client_id: var("TIDAL_CLIENT_ID"),
            client_secret: var("TIDAL_CLIENT_SECRET"),
            api_base: var("TIDAL_API_BASE")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base),
            auth_base: var("TIDAL_AUTH_BASE")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.auth_base),
            search_page_size: parse_var(&var, "TIDAL_SEARCH_PAGE_SIZE", &mut warnings)
                .unwrap_or(defaults.search_page_size)
                .clamp(1, 20),
            batch_cap: parse_var(&var, "TIDAL_BATCH_CAP", &mut warnings)
                .unwrap_or(defaults.batch_cap)
                .clamp(1, MAX_BATCH_SIZE),
            min_match_confidence: parse_var(&var, "TIDAL_MIN_MATCH_CONFIDENCE", &mut warnings)
                .unwrap_or(defaults.min_match_confidence)
                .clamp(0.0, 1.0),
            match_tie_epsilon: parse_var(&var, "TIDAL_MATCH_TIE_EPSILON", &mut warnings)
                .unwrap_or(defaults.match_tie_epsilon)
                .clamp(0.0, 0.5),
            batch_concurrency: parse_var(&var, "TIDAL_BATCH_CONCURRENCY", &mut warnings)
                .unwrap_or(defaults.batch_concurrency)
                .clamp(1, 16),
            request_timeout: parse_var(&var, "TIDAL_REQUEST_TIMEOUT_SECS", &mut warnings)
                .map(|secs: u64| Duration::from_secs(secs.clamp(1, 300)))
                .unwrap_or(defaults.request_timeout),
            download_tool_path: var("TIDAL_DL_PATH").map(PathBuf::from),
            log_level: var("TIDAL_MCP_LOG_LEVEL")
                .map(|v| v.to_lowercase())
                .unwrap_or(defaults.log_level),
            log_to_file: var("TIDAL_MCP_LOG_FILE")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.log_to_file),
            warnings: Vec::new(),
        };
        config.warnings = warnings;
        config
    }
}

fn parse_var<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    warnings: &mut Vec<String>,
) -> Option<T> {
    let raw = var(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warnings.push(format!("{key}={raw:?} is not valid, using the default"));
            None
        }
    }
}
