//! Main Entrypoint for the Jarvis Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment and the command line.
//! 2. Loading the system instruction for the voice model.
//! 3. Starting the HTTP server for session controls and HUD state.
//! 4. Running the live session engine until shutdown.

use anyhow::Context;
use clap::Parser;
use jarvis::{
    config::Config,
    devices::SystemAudio,
    live::{LiveEngine, LiveHandle},
    router::create_router,
    state::AppState,
};
use jarvis_core::{hud::HudSnapshot, spectrum::FrequencyTap};
use std::{collections::HashMap, fs, net::SocketAddr, sync::Arc};
use tokio::sync::{mpsc, watch};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

const DEFAULT_SYSTEM_PROMPT: &str = "You are J.A.R.V.I.S., a concise voice assistant driving a \
two-panel holographic HUD. Use update_screen to show information (left panel) and images or \
maps (right panel), and manage_timer for every timer or alarm request.";

#[derive(Parser, Debug)]
#[command(version, about = "Voice-driven HUD assistant")]
struct Cli {
    /// Start a voice session as soon as the service is up.
    #[arg(long)]
    start: bool,
}

/// Listens for the `Ctrl+C` signal to gracefully shut down.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

/// A helper function to load prompts from a directory.
fn load_prompts(prompts_path: &std::path::Path) -> anyhow::Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();
    for entry in std::fs::read_dir(prompts_path)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem")?
                .to_string();
            let content = fs::read_to_string(&path)?;
            prompts.insert(prompt_key, content);
        }
    }
    Ok(prompts)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let cli = Cli::parse();
    let config = Arc::new(Config::from_env().context("Failed to load configuration")?);

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Load the System Instruction ---
    let instructions = match load_prompts(&config.prompts_path) {
        Ok(mut prompts) => prompts.remove("system_prompt"),
        Err(e) => {
            warn!(path = ?config.prompts_path, error = %e, "Could not read prompts directory");
            None
        }
    }
    .unwrap_or_else(|| {
        info!("Using the built-in system prompt.");
        DEFAULT_SYSTEM_PROMPT.to_string()
    });

    // --- 4. Wire the Engine and the HTTP State ---
    let (hud_tx, hud_rx) = watch::channel(HudSnapshot::default());
    let (command_tx, command_rx) = mpsc::channel(8);
    let tap = FrequencyTap::new();
    let live = LiveHandle::new(command_tx);
    let engine = LiveEngine::new(config.clone(), instructions, hud_tx, tap.clone(), SystemAudio);

    let app_state = Arc::new(AppState {
        live: live.clone(),
        hud: hud_rx,
        tap,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 5. Start Server ---
    info!(
        model = %config.model,
        voice = %config.voice_name,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    let server = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
    });

    if cli.start {
        tokio::spawn(async move {
            match live.start().await {
                Ok(Ok(())) => info!("Session started on launch."),
                Ok(Err(e)) => warn!(error = %e, "Session could not start on launch"),
                Err(e) => error!(error = ?e, "Live session engine unavailable"),
            }
        });
    }

    // --- 6. Run the Live Engine on this task (device streams are not Send) ---
    engine.run(command_rx, shutdown_signal()).await;
    server.await??;

    info!("Server has shut down.");
    Ok(())
}
