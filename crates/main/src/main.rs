/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

mod config;

use alerting::AlertingService;
use anyhow::Context;
use clap::Parser;
use config::ServerConfig;
use std::path::PathBuf;
use std::sync::Arc;
use store::SnapshotStore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use trapper::TrapperServer;

#[cfg(not(target_env = "msvc"))]
use jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

/// Trigger evaluation and escalation server
#[derive(Parser)]
#[command(name = "monitord")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", default_value = "/etc/monitord/monitord.toml")]
    config: PathBuf,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ServerConfig::load(&cli.config)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let store = Arc::new(
        SnapshotStore::with_configuration(config.configuration.clone())
            .context("Invalid monitoring configuration")?,
    );
    let snapshot = store.load();
    info!(
        version = snapshot.version(),
        hosts = snapshot.hosts().count(),
        triggers = snapshot.triggers().count(),
        actions = snapshot.actions().len(),
        "Configuration loaded"
    );
    if cli.check {
        info!("Configuration is valid");
        return Ok(());
    }

    let service = AlertingService::new(config.alerting.clone(), store)?;
    service.start()?;

    let token = CancellationToken::new();
    let trapper = if config.trapper.enabled {
        let server = Arc::new(TrapperServer::new(config.trapper.clone(), service.clone()));
        let listener = server.bind().await?;
        Some(tokio::spawn(server.serve(listener, token.clone())))
    } else {
        info!("Trapper disabled");
        None
    };

    info!("monitord started");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for the shutdown signal");
    }
    info!("Shutdown signal received, stopping");

    token.cancel();
    if let Some(trapper) = trapper {
        trapper.await?;
    }
    service.stop().await?;

    info!("monitord stopped");
    Ok(())
}
