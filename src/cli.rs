use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::download::Downloader;
use crate::session::{SessionStore, unix_now};

#[derive(Parser)]
#[command(name = "tidal-mcp", version, about = "MCP server for TIDAL")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Serve MCP (stdio, or streamable HTTP when a port is set)
    Serve {
        /// Listen on 127.0.0.1:<PORT> instead of stdio
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print session and download-tool status as JSON
    Status,
}

pub async fn status(config: &Config) -> anyhow::Result<()> {
    let store = SessionStore::open(config.session_path.clone());
    let now = unix_now();
    let session = match store.snapshot() {
        Some(s) => serde_json::json!({
            "logged_in": !s.is_expired(now),
            "user_id": s.user_id,
            "country_code": s.country_code,
            "expires_in_seconds": s.expires_at - now,
            "refreshable": s.refresh_token.is_some(),
        }),
        None => serde_json::json!({ "logged_in": false }),
    };
    let download = Downloader::new(config.download_tool_path.clone())
        .status()
        .await;

    let report = serde_json::json!({
        "session_file": store.path().display().to_string(),
        "session": session,
        "download_tool": download,
        "api_base": config.api_base,
        "login_configured": config.client_id.is_some(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
