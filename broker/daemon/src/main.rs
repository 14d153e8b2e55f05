//! DocChat Daemon
//!
//! HTTP server putting the docchat broker in front of a local Ollama.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (listen on 127.0.0.1:5000, Ollama on localhost:11434)
//! docchat-daemon
//!
//! # Custom config file and port
//! docchat-daemon --config ./broker.toml --port 8080
//!
//! # With verbose logging
//! RUST_LOG=debug docchat-daemon
//! ```
//!
//! # Environment Variables
//!
//! - `DOCCHAT_CONFIG`: Path to the TOML configuration file
//! - `OLLAMA_HOST` / `OLLAMA_PORT`: Ollama endpoint
//! - `DOCCHAT_CHAT_MODEL` / `DOCCHAT_ANALYSIS_MODEL`: Default models
//! - `DOCCHAT_HOST` / `DOCCHAT_PORT`: Listen address
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)
//!
//! # Signals
//!
//! - SIGINT: Graceful shutdown (in-flight requests finish first)

mod api_error;
mod extract;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use docchat_core::{
    default_config_path, load_config_from_path, ConfigOverrides, OllamaBackend, RequestRouter,
};

use crate::extract::PdfTextExtractor;

/// Command-line arguments
#[derive(Debug, Parser)]
#[command(name = "docchat-daemon", version, about = "Chat and document Q&A broker for Ollama")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "DOCCHAT_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address
    #[arg(long)]
    host: Option<String>,

    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Ollama host
    #[arg(long)]
    ollama_host: Option<String>,

    /// Ollama port
    #[arg(long)]
    ollama_port: Option<u16>,

    /// Default chat model
    #[arg(long)]
    chat_model: Option<String>,

    /// Model for document analysis and questions
    #[arg(long)]
    analysis_model: Option<String>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            host: self.host.clone(),
            port: self.port,
            ollama_host: self.ollama_host.clone(),
            ollama_port: self.ollama_port,
            chat_model: self.chat_model.clone(),
            analysis_model: self.analysis_model.clone(),
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("docchat_daemon=info".parse()?)
                .add_directive("docchat_core=info".parse()?),
        )
        .with_target(true)
        .init();

    let args = Args::parse();

    let config_path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(config_path).context("Failed to load configuration")?;
    args.overrides().apply(&mut config);

    info!(
        source = %config.source(),
        ollama = %format!("{}:{}", config.backend.host, config.backend.port),
        chat_model = %config.models.chat_model,
        analysis_model = %config.models.analysis_model,
        "Starting DocChat daemon"
    );

    let backend = OllamaBackend::from_config(&config.backend)
        .context("Failed to create Ollama client")?;
    let broker = Arc::new(RequestRouter::from_config(
        Arc::new(backend),
        Arc::new(PdfTextExtractor),
        &config,
    ));

    // Health initialization runs in the background; requests are served meanwhile
    let init = Arc::clone(&broker);
    tokio::spawn(async move {
        init.initialize().await;
    });

    let app = server::build_router(broker);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(addr = %addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("DocChat daemon stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_flags_become_overrides() {
        let args = Args::parse_from([
            "docchat-daemon",
            "--port",
            "8080",
            "--ollama-host",
            "gpu-box",
            "--chat-model",
            "llava:latest",
        ]);

        let mut config = docchat_core::BrokerConfig::new();
        args.overrides().apply(&mut config);

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.backend.host, "gpu-box");
        assert_eq!(config.backend.port, 11434);
        assert_eq!(config.models.chat_model, "llava:latest");
        assert_eq!(config.source(), docchat_core::ConfigSource::Cli);
    }

    #[test]
    fn test_no_flags_leave_config_untouched() {
        let args = Args::parse_from(["docchat-daemon"]);
        let mut config = docchat_core::BrokerConfig::new();
        args.overrides().apply(&mut config);

        assert_eq!(config.source(), docchat_core::ConfigSource::Default);
    }
}
