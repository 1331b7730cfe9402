//! Camdeck Gateway – drives IP cameras over their CGI interface.
//!
//! This binary:
//! 1. Reads configuration from `camdeck.conf` (defaults if absent)
//! 2. Prepares the artifact store
//! 3. Runs an axum HTTP server that executes step bundles, downloads
//!    scheduled recordings, gates firmware uploads and serves stored files.

mod artifact;
mod browse;
mod device;
mod error;
mod executor;
mod firmware;
mod server;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use camdeck_common::config::{self, Config};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── load config ──────────────────────────────────────────────────
    let config_path = PathBuf::from(
        std::env::args()
            .nth(1)
            .unwrap_or_else(|| Config::default_path().to_string()),
    );
    let config = if config_path.exists() {
        config::load(&config_path).context("Config load failed")?
    } else {
        warn!("{} not found, using defaults", config_path.display());
        Config::default()
    };

    info!(
        "Camdeck Gateway starting (listen={}, storage={})",
        config.listen_addr,
        config.storage_dir.display()
    );

    std::fs::create_dir_all(&config.storage_dir)
        .context("Cannot create storage directory")?;

    // ── ctrl-c ───────────────────────────────────────────────────────
    // Running bundles see the flag and cancel their remaining steps.
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_flag.store(true, Ordering::Relaxed);
        info!("Shutdown signal received");
    })
    .context("Cannot set Ctrl-C handler")?;

    // ── HTTP server ──────────────────────────────────────────────────
    if let Err(e) = server::run(&config, shutdown).await {
        tracing::error!("HTTP server error: {e:#}");
        return Err(e);
    }

    info!("Camdeck Gateway stopped");
    Ok(())
}
