//! Reverse tunnel endpoint.
//!
//! Makes a service that lives behind NAT or a firewall reachable through a
//! public relay.
//!
//! # Architecture Overview
//!
//! ```text
//!   Relay (public)                      this process                   Backend
//!   ──────────────                      ────────────                   ───────
//!        │  ws(s)://relay/_tunnel  ┌────────────────────┐
//!        │◀────────────────────────│ net::dial (+proxy) │
//!        │                         └─────────┬──────────┘
//!        │  0001GET /foo ...       ┌─────────▼──────────┐   HTTP   ┌──────────┐
//!        │────────────────────────▶│ session read loop  │─────────▶│ backend  │
//!        │                         │  → worker per req  │◀─────────│ or local │
//!        │  0001HTTP/1.1 200 ...   │  → FrameWriter     │          │ handler  │
//!        │◀────────────────────────│  keepalive pinger  │          └──────────┘
//!        │                         └────────────────────┘
//!                                  engine: reconnect loop, stop handle
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use reverse_tunnel::config::{load_config, ConfigError, TunnelConfig};
use reverse_tunnel::lifecycle::wait_for_signal;
use reverse_tunnel::observability::{init_logging, metrics};
use reverse_tunnel::TunnelEngine;

#[derive(Parser)]
#[command(name = "reverse-tunnel")]
#[command(about = "Expose a local HTTP server through a tunnel relay", long_about = None)]
struct Cli {
    /// TOML configuration file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Rendez-vous token identifying this endpoint
    #[arg(long)]
    token: Option<String>,

    /// Relay address, e.g. wss://relay.example.com
    #[arg(long)]
    tunnel_url: Option<String>,

    /// Local server requests are forwarded to, e.g. http://127.0.0.1:8080
    #[arg(long)]
    server_url: Option<String>,

    /// Pattern the X-Host header must match to select a backend
    #[arg(long)]
    regexp: Option<String>,

    /// Accept invalid certificates from HTTPS backends
    #[arg(long)]
    insecure: bool,

    /// Keepalive timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// HTTP proxy for reaching the relay
    #[arg(long)]
    proxy: Option<String>,

    /// File rewritten with a timestamp on every keepalive answer
    #[arg(long)]
    status_file: Option<PathBuf>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn into_config(self) -> Result<TunnelConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => TunnelConfig::default(),
        };

        if let Some(token) = self.token {
            config.token = token;
        }
        if let Some(url) = self.tunnel_url {
            config.tunnel_url = url;
        }
        if self.server_url.is_some() {
            config.backend_url = self.server_url;
        }
        if self.regexp.is_some() {
            config.host_pattern = self.regexp;
        }
        if self.insecure {
            config.insecure = true;
        }
        if let Some(secs) = self.timeout {
            config.timeouts.keepalive_secs = secs;
        }
        if self.proxy.is_some() {
            config.proxy = self.proxy;
        }
        if self.status_file.is_some() {
            config.status_file = self.status_file;
        }
        if let Some(level) = self.log_level {
            config.observability.log_level = level;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Cli::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("reverse-tunnel: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&config.observability) {
        eprintln!("reverse-tunnel: cannot initialize logging: {e}");
    }

    // Process-wide TLS crypto provider for wss:// dials.
    let _ = rustls::crypto::ring::default_provider().install_default();

    if let Some(raw) = &config.observability.metrics_address {
        match raw.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics endpoint");
                }
            }
            Err(_) => {
                tracing::error!(metrics_address = %raw, "Failed to parse metrics address");
            }
        }
    }

    let engine = match TunnelEngine::new(&config) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            eprintln!("reverse-tunnel: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        tunnel_url = %engine.settings().tunnel_url,
        destination = %engine.settings().destination.describe(),
        "reverse-tunnel v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let handle = engine.start();
    wait_for_signal().await;
    handle.stop();
    tracing::info!("Waiting for the current session to end; signal again to exit now");
    tokio::select! {
        _ = handle.wait() => {}
        _ = wait_for_signal() => tracing::warn!("Forced exit"),
    }

    tracing::info!("Shutdown complete");
    ExitCode::SUCCESS
}
