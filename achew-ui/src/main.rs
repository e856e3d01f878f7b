//! achew client (achew-ui) - headless driver
//!
//! Drives a running achew backend from the terminal: inspect or follow
//! the session, roll it back, export chapters, and preview segments
//! through the local audio output.

use std::path::PathBuf;

use achew_ap::audio::AudioOutput;
use achew_ap::PlayOutcome;
use achew_common::config::{resolve_server_url, TomlConfig, SERVER_URL_ENV};
use achew_common::models::Step;
use achew_ui::{App, SessionApi, SessionState};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for achew-ui
#[derive(Parser, Debug)]
#[command(name = "achew-ui")]
#[command(about = "Headless client for the achew chapter generator")]
#[command(version)]
struct Args {
    /// Backend URL (overrides config file)
    #[arg(short, long)]
    server: Option<String>,

    /// Path to the TOML config file
    #[arg(short, long, env = "ACHEW_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the server status probe
    Status,
    /// Follow the session and log every change until Ctrl+C
    Watch,
    /// Roll the pipeline back to a step (idle deletes the session)
    Restart { step: Step },
    /// Roll back to the nearest restart option
    Back,
    /// Delete the current session
    Delete,
    /// Export chapters in a backend-supported format
    Export {
        format: String,
        /// Output file (defaults to the server-provided filename)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Play one segment through the local audio output
    Preview {
        segment: String,
        /// Start offset in seconds
        #[arg(long)]
        offset: Option<f64>,
        /// Output device name
        #[arg(long)]
        device: Option<String>,
    },
    /// List audio output devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    let config = TomlConfig::load(args.config.as_deref()).context("Failed to load config")?;

    // Initialize tracing
    let default_filter = format!(
        "achew_ui={level},achew_ap={level},achew_common={level}",
        level = config.logging.level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let server_url = resolve_server_url(args.server.as_deref(), SERVER_URL_ENV, &config)
        .context("Failed to resolve server URL")?;
    info!("Using backend at {}", server_url);

    let mut app = App::new(&server_url, &config).context("Failed to initialize client")?;

    let result = run(&mut app, args.command).await;
    app.shutdown();
    result
}

async fn run(app: &mut App, command: Command) -> Result<()> {
    let session = app.session.clone();

    match command {
        Command::Status => {
            let status = session.api().status().await.context("Status probe failed")?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Watch => watch(app).await?,
        Command::Restart { step } => {
            session.load_active_session().await.context("Failed to load session")?;
            session
                .restart_session(step)
                .await
                .with_context(|| format!("Restart at {} failed", step))?;
            info!(step = %session.snapshot().step, "Restart requested");
        }
        Command::Back => {
            session.load_active_session().await.context("Failed to load session")?;
            let before = session.snapshot().step;
            session
                .go_back_to_previous_step()
                .await
                .context("Going back failed")?;
            info!(from = %before, to = %session.snapshot().step, "Went back");
        }
        Command::Delete => {
            session.delete_session(None).await.context("Delete failed")?;
            info!("Session deleted");
        }
        Command::Export { format, out } => {
            let document = session
                .export_chapters(&format)
                .await
                .context("Export failed")?;
            let path = out.unwrap_or_else(|| PathBuf::from(&document.filename));
            tokio::fs::write(&path, &document.body)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(
                path = %path.display(),
                mime_type = %document.mime_type,
                bytes = document.body.len(),
                "Export written"
            );
        }
        Command::Preview {
            segment,
            offset,
            device,
        } => preview(app, &segment, offset, device).await?,
        Command::Devices => {
            for name in AudioOutput::list_devices().context("Failed to list audio devices")? {
                println!("{}", name);
            }
        }
    }
    Ok(())
}

async fn watch(app: &App) -> Result<()> {
    let session = app.session.clone();
    let mut rx = session.subscribe();

    if let Err(e) = session.load_active_session().await {
        warn!(error = %e, "Initial load failed; waiting for pushes");
    }
    let mut previous = rx.borrow_and_update().clone();
    log_state(&previous);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = rx.borrow_and_update().clone();
                log_transition(&previous, &current);
                previous = current;
            }
            _ = &mut shutdown => break,
        }
    }

    info!("Stopped watching");
    Ok(())
}

fn log_state(state: &SessionState) {
    info!(
        step = %state.step,
        item_id = ?state.item_id,
        chapters = state.chapters.len(),
        selected = state.selection_stats.selected,
        "Session"
    );
}

fn log_transition(previous: &SessionState, current: &SessionState) {
    if previous.step != current.step {
        info!(from = %previous.step, to = %current.step, "Step changed");
    }
    if previous.progress != current.progress && current.progress.percent > 0.0 {
        info!(
            step = %current.progress.step,
            percent = current.progress.percent,
            message = %current.progress.message,
            "Progress"
        );
    }
    if previous.chapters != current.chapters || previous.selection_stats != current.selection_stats {
        info!(
            total = current.selection_stats.total,
            selected = current.selection_stats.selected,
            "Chapters updated"
        );
    }
    if (previous.can_undo, previous.can_redo) != (current.can_undo, current.can_redo) {
        info!(can_undo = current.can_undo, can_redo = current.can_redo, "History changed");
    }
    if previous.book != current.book {
        if let Some(book) = &current.book {
            info!(title = %book.title, duration = book.duration, "Book metadata");
        }
    }
    if previous.channel != current.channel {
        info!(status = ?current.channel, "Event channel");
    }
    if previous.error != current.error {
        if let Some(err) = &current.error {
            error!(message = %err.message, "Session error");
        }
    }
}

async fn preview(app: &mut App, segment: &str, offset: Option<f64>, device: Option<String>) -> Result<()> {
    let playback = app
        .start_preview(device)
        .context("Failed to open audio output")?;
    let mut state = playback.subscribe();

    match playback.play(segment, offset).await {
        PlayOutcome::Started => info!(segment = %segment, "Preview started"),
        PlayOutcome::Failed(message) => bail!("Preview failed: {}", message),
        other => bail!("Preview did not start: {:?}", other),
    }

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = state.borrow_and_update().clone();
                if let Some(message) = snapshot.error {
                    bail!("Playback error: {}", message);
                }
                if !snapshot.is_playing && !snapshot.loading {
                    break;
                }
            }
            _ = &mut shutdown => break,
        }
    }

    playback.stop();
    info!("Preview finished");
    Ok(())
}

/// Ctrl+C / SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
