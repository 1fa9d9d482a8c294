#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # transitctl
//!
//! Admin console for GOST relay transits.
//!
//! transitctl keeps a registry of relay servers (verified over SSH before they
//! are stored, passwords encrypted at rest) and of transits between them,
//! compiles the transits into a GOST v2 JSON document, writes it atomically and
//! restarts the relay service. Everything is driven through an HTTP API
//! protected by a pre-shared API key.
//!
//! ## Subcommands
//!
//! - `transitctl serve` (default): run the HTTP server
//! - `transitctl apply`: one-shot apply, same semantics as `POST /api/config/apply`
//! - `transitctl preview`: print the document apply would write
//! - `transitctl gen-key`: print a fresh credential key
//!
//! ## API surface
//!
//! | Method | Path                       | Auth | Description                         |
//! |--------|----------------------------|------|-------------------------------------|
//! | GET    | `/api/health`              | No   | Liveness probe                      |
//! | GET    | `/api/servers`             | Yes  | List servers                        |
//! | POST   | `/api/servers`             | Yes  | Add server (SSH-verified)           |
//! | GET    | `/api/servers/{id}`        | Yes  | One server                          |
//! | DELETE | `/api/servers/{id}`        | Yes  | Delete unreferenced server          |
//! | POST   | `/api/servers/{id}/probe`  | Yes  | Re-check reachability               |
//! | GET    | `/api/transits`            | Yes  | List transits                       |
//! | POST   | `/api/transits`            | Yes  | Add transit (pending)               |
//! | GET    | `/api/transits/{id}`       | Yes  | One transit                         |
//! | DELETE | `/api/transits/{id}`       | Yes  | Delete transit                      |
//! | GET    | `/api/config/preview`      | Yes  | Compiled document, no side effects  |
//! | POST   | `/api/config/apply`        | Yes  | Write document, restart relay       |
//! | GET    | `/api/service/status`      | Yes  | Relay unit state                    |
//! | POST   | `/api/service/{action}`    | Yes  | start / stop / restart              |
//! | GET    | `/api/status`              | Yes  | Dashboard snapshot                  |
//! | GET    | `/api/activity`            | Yes  | Operator journal                    |

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use transitctl::cipher::{self, CredentialKey};
use transitctl::config::Config;
use transitctl::{AppState, Store};

/// Admin console for GOST relay transits.
#[derive(Parser)]
#[command(name = "transitctl", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (default when no subcommand given).
    Serve {
        /// Path to TOML config file.
        #[arg(long)]
        config: Option<String>,
    },
    /// Compile, write and restart once, then exit.
    Apply {
        /// Path to TOML config file.
        #[arg(long)]
        config: Option<String>,
    },
    /// Print the document apply would write.
    Preview {
        /// Path to TOML config file.
        #[arg(long)]
        config: Option<String>,
    },
    /// Print a fresh base64 credential key for TRANSITCTL_CREDENTIAL_KEY.
    GenKey,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::GenKey) => {
            println!("{}", cipher::generate_key());
            ExitCode::SUCCESS
        }
        Some(Commands::Apply { config }) => run_apply(config.as_deref()).await,
        Some(Commands::Preview { config }) => run_preview(config.as_deref()).await,
        Some(Commands::Serve { config }) => run_server(config.as_deref()).await,
        None => run_server(None).await,
    }
}

/// Load config, initialize tracing, open the registries.
async fn bootstrap(config_path: Option<&str>) -> Option<AppState> {
    let config = match Config::load(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            return None;
        }
    };

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    // stdout carries `apply`/`preview` output.
    tracing_subscriber::fmt()
        .with_env_filter(log_filter)
        .with_writer(std::io::stderr)
        .init();

    let data_dir = config.data_dir();
    if let Err(e) = tokio::fs::create_dir_all(&data_dir).await {
        error!("Cannot create data directory {}: {e}", data_dir.display());
        return None;
    }

    let store = match Store::connect(&config.database_url(), config.database.max_connections).await
    {
        Ok(s) => s,
        Err(e) => {
            error!("Cannot open registry database: {e}");
            return None;
        }
    };

    let key = CredentialKey::from_env();
    Some(AppState::from_config(config, store, key))
}

async fn run_server(config_path: Option<&str>) -> ExitCode {
    let Some(state) = bootstrap(config_path).await else {
        return ExitCode::FAILURE;
    };

    info!("transitctl v{} starting", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}", state.config.server.listen);
    info!(
        "Relay config: {} (service {})",
        state.gateway.config_path().display(),
        state.config.service.name
    );

    if state.config.auth.api_key == "change-me" {
        warn!("Using default API key, set TRANSITCTL_API_KEY or update config");
    }
    if state.credential_key.is_development() {
        warn!("Stored SSH passwords are sealed with the development key");
    }

    let app = transitctl::router(state.clone());

    let listener = match TcpListener::bind(&state.config.server.listen).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind {}: {e}", state.config.server.listen);
            return ExitCode::FAILURE;
        }
    };

    info!("Server ready");

    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => info!("Received SIGINT"),
                        _ = sigterm.recv() => info!("Received SIGTERM"),
                    }
                }
                Err(e) => {
                    warn!("Failed to register SIGTERM handler: {e}");
                    ctrl_c.await.ok();
                    info!("Received SIGINT");
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("Received SIGINT");
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Shutting down...");
    state.store.pool().close().await;
    info!("Goodbye");
    ExitCode::SUCCESS
}

async fn run_apply(config_path: Option<&str>) -> ExitCode {
    let Some(state) = bootstrap(config_path).await else {
        return ExitCode::FAILURE;
    };

    let outcome = match state.gateway.apply().await {
        Ok(o) => o,
        Err(e) => {
            error!("Apply failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    match serde_json::to_string_pretty(&outcome) {
        Ok(json) => println!("{json}"),
        Err(e) => error!("Cannot render apply outcome: {e}"),
    }
    if outcome.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run_preview(config_path: Option<&str>) -> ExitCode {
    let Some(state) = bootstrap(config_path).await else {
        return ExitCode::FAILURE;
    };

    let compiled = match state.gateway.preview().await {
        Ok(c) => c,
        Err(e) => {
            error!("Preview failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    match compiled.document.to_json_pretty() {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Cannot render document: {e}");
            ExitCode::FAILURE
        }
    }
}
