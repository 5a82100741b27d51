mod config;
mod platform;
mod recorder;
mod store;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use teloxide::Bot;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::recorder::Recorder;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,convolog=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = dotenvy::dotenv() {
        debug!("No .env file loaded: {}", e);
    }

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}. Bot cannot start.", e);
            std::process::exit(1);
        }
    };

    info!("Configuration loaded successfully");
    info!("  Database: {}", config.database);

    let store = store::connect(&config.database).await;
    match store.as_deref() {
        Some(db) => {
            if store::ensure_schema(Some(db)).await {
                match db.count().await {
                    Ok(rows) => info!(
                        "Database initialized (if needed), {} messages logged so far.",
                        rows
                    ),
                    Err(e) => error!("Could not count logged messages: {}", e),
                }
            }
        }
        None => {
            error!("Failed to connect to the database. Bot starting without DB functionality.")
        }
    }

    let recorder = Arc::new(Recorder::new(store.clone()));
    let bot = Bot::new(&config.telegram.bot_token);

    info!("Bot started and listening for messages...");
    let result = platform::telegram::run(bot, recorder).await;

    if let Some(db) = store {
        match db.close().await {
            Ok(()) => info!("Database connection closed."),
            Err(e) => error!("Error closing database connection: {}", e),
        }
    }

    result
}
