mod assembler;
mod auth;
mod catalog;
mod cli;
mod config;
mod download;
mod error;
mod logging;
mod matcher;
mod recommend;
mod session;
mod tools;
mod types;

use anyhow::Context;
use clap::Parser;
use rmcp::ServiceExt;
use rmcp::transport::stdio;
use rmcp::transport::streamable_http_server::{
    StreamableHttpService, session::local::LocalSessionManager,
};

use crate::cli::{Cli, Command};
use crate::config::Config;

async fn serve_stdio(config: Config) -> anyhow::Result<()> {
    let server = tools::TidalServer::new(config)?;
    tracing::info!("serving MCP over stdio");
    let service = server.serve(stdio()).await?;
    service.waiting().await?;
    Ok(())
}

async fn serve_http(config: Config, port: u16) -> anyhow::Result<()> {
    let server = tools::TidalServer::new(config)?;
    let service = StreamableHttpService::new(
        move || Ok(server.clone()),
        LocalSessionManager::default().into(),
        Default::default(),
    );
    let app = axum::Router::new().nest_service("/mcp", service);
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .with_context(|| format!("failed to bind 127.0.0.1:{port}"))?;
    tracing::info!(port, "serving MCP over streamable HTTP at /mcp");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("HTTP server failed")?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env();
    logging::init(&config);
    for warning in &config.warnings {
        tracing::warn!("config: {warning}");
    }

    let port = match cli.command {
        Some(Command::Status) => return cli::status(&config).await,
        Some(Command::Serve { port }) => port.or(config.port),
        None => config.port,
    };
    match port {
        Some(port) => serve_http(config, port).await,
        None => serve_stdio(config).await,
    }
}
