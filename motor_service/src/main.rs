use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use tracing::{error, info};

use crate::config::{create_default_config, init_config};

pub mod cards;
pub mod commands;
pub mod communication;
pub mod config;
pub mod logging;

fn should_create_config() -> bool {
    std::env::var("CREATE_CONFIG")
        .map(|val| val == "1" || val.to_lowercase() == "true")
        .unwrap_or(false)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if should_create_config() {
        create_default_config(None::<PathBuf>)?;
    }

    let (_config_manager, config) = init_config().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        eprintln!("Run with CREATE_CONFIG=1 to create a default configuration file.");
        e
    })?;

    let _log_guard = logging::init(&config.logging)?;
    info!("Loaded {} card(s)", config.cards.len());

    let cards = config.cards.clone();
    let registry = tokio::task::spawn_blocking(move || cards::build_registry(&cards))
        .await
        .context("Card startup panicked")?;
    let registry = Arc::new(registry);

    tokio::select! {
        result = communication::run_communication_layer(&config.service.socket_path, registry.clone()) => {
            if let Err(e) = result {
                error!("Communication layer stopped: {:#}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    // connection tasks may still hold clones; their controllers stop on drop
    match Arc::try_unwrap(registry) {
        Ok(mut registry) => registry.shutdown(),
        Err(_) => info!("Registry still shared, pollers stop on drop"),
    }

    if std::fs::remove_file(&config.service.socket_path).is_err() {
        info!("Socket {} already gone", config.service.socket_path.display());
    }

    Ok(())
}
