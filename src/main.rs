//! # Matsuri — event notification system
//!
//! Runs the LINE webhook gateway and the reminder scheduler in a single
//! process. Shutdown is cooperative: the scheduler finishes its in-flight
//! cycle before the process exits.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use matsuri_channels::{DiscordAnnouncer, LineChannel};
use matsuri_core::config::MatsuriConfig;
use matsuri_gateway::AppState;
use matsuri_scheduler::ReminderScheduler;
use matsuri_store::SqliteStore;

#[derive(Parser)]
#[command(
    name = "matsuri",
    version,
    about = "🎉 Matsuri — event reminders for LINE communities"
)]
struct Cli {
    /// Path to matsuri.toml (default: ~/.matsuri/matsuri.toml)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => {
            let mut config = MatsuriConfig::load_from(path)?;
            config.apply_env();
            config
        }
        None => MatsuriConfig::load()?,
    };
    config.validate()?;

    if let Some(parent) = std::path::Path::new(&config.store.db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(SqliteStore::open(&config.store.db_path)?);
    tracing::info!("💾 Event store: {}", config.store.db_path);

    let line = Arc::new(LineChannel::new(config.line.clone()));
    let announcer = Arc::new(DiscordAnnouncer::new(config.discord.clone()));
    if config.discord.enabled {
        tracing::info!("📣 Discord announcements enabled");
    }

    let scheduler = Arc::new(ReminderScheduler::new(
        store.clone(),
        line.clone(),
        &config.scheduler,
    ));
    let scheduler_task = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run().await })
    };

    let state = Arc::new(AppState {
        store: store.clone(),
        line,
        announcer,
    });
    let gateway_config = config.gateway.clone();
    let mut gateway_task =
        tokio::spawn(async move { matsuri_gateway::start(&gateway_config, state).await });

    tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("🛑 Shutdown requested");
        }
        result = &mut gateway_task => {
            match result {
                Ok(Err(e)) => tracing::error!("❌ Gateway exited: {e}"),
                Err(e) => tracing::error!("❌ Gateway task panicked: {e}"),
                Ok(Ok(())) => {}
            }
        }
    }

    // Scheduler first, so an in-flight cycle finishes marking before exit.
    scheduler.stop();
    let _ = scheduler_task.await;
    gateway_task.abort();

    tracing::info!("👋 Matsuri stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("❌ Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("❌ Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
