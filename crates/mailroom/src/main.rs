//! `mailroomd` - persistent mailbox service
//!
//! Hosts the mailroom core: restores drafts and loads mail at startup, sweeps
//! expired mail on an interval and persists drafts on shutdown.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mailroom_core::{AppContext, Mailer, MailerConfig, RetentionSweeper};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailroom=debug,mailroom_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting mailroomd");

    let config = load_config().await?;
    let sweep_interval = config.sweep_interval();
    info!("Data directory: {}", config.data_dir.display());

    let ctx = Arc::new(AppContext::offline(config));
    let mut mailer = Mailer::new(ctx);
    if let Some(reload) = mailer.start().await {
        let report = reload.await.context("mail reload task failed")?;
        if !mailer.is_ready() {
            warn!("Mail data did not load; sends will be dropped");
        }
        info!("Ready with {} mails", report.loaded);
    }

    let mailer = Arc::new(Mutex::new(mailer));
    let sweeper = RetentionSweeper::spawn(Arc::clone(&mailer), sweep_interval);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutting down");
    sweeper.abort();

    let persisted = mailer
        .lock()
        .await
        .shutdown()
        .await
        .context("failed to persist drafts")?;
    info!("Persisted {persisted} drafts");
    Ok(())
}

/// Configuration file location: `$MAILROOM_CONFIG` or the user config dir.
fn config_path() -> PathBuf {
    std::env::var_os("MAILROOM_CONFIG").map_or_else(
        || {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("mailroom")
                .join("config.json")
        },
        PathBuf::from,
    )
}

/// Load the mailer configuration, writing defaults on first run.
async fn load_config() -> anyhow::Result<MailerConfig> {
    let path = config_path();
    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return MailerConfig::load(&path)
            .await
            .with_context(|| format!("failed to load {}", path.display()));
    }

    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailroom");
    let config = MailerConfig::new(data_dir);
    config
        .save(&path)
        .await
        .with_context(|| format!("failed to write default config to {}", path.display()))?;
    Ok(config)
}
