#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

mod bridge;
mod cli;
mod config;
mod db;
mod discord;
mod metrics;
mod parsers;
mod platform;
mod revolt;
mod utils;
mod web;

use bridge::dispatch::EventDispatcher;
use bridge::mappings::{MappingRegistry, MappingSource};
use bridge::{BridgeClients, BridgeCore};
use config::{Config, ConfigError};
use discord::DiscordClient;
use platform::{Platform, event_channel};
use revolt::RevoltClient;
use web::WebServer;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(path) = &cli.mappings {
        config.mappings_file = Some(path.display().to_string());
    }
    utils::logging::init_tracing(&config.logging);

    if cli.check_config {
        let declarative = config::load_declarative_mappings(&config)?;
        info!(
            "configuration is valid declarative_mappings={}",
            declarative.len()
        );
        return Ok(());
    }
    let declarative = config::declarative_mappings_or_empty(&config);
    info!("revolt-discord bridge starting up");

    let db_manager = db::DatabaseManager::new(&config.database).await?;
    db_manager.migrate().await?;
    let store = db_manager.mapping_store();

    let registry = match MappingRegistry::load(declarative, store.as_ref()).await {
        Ok(registry) => registry,
        Err(ConfigError::NoMappings) => {
            warn!("no channel mappings configured; use the connect command to add one");
            MappingRegistry::new(MappingSource::Persisted, Vec::new())
        }
        Err(err) => return Err(err.into()),
    };

    let (discord_tx, discord_rx) = event_channel();
    let (revolt_tx, revolt_rx) = event_channel();
    let discord = Arc::new(DiscordClient::new(config.discord.clone(), discord_tx));
    let revolt = Arc::new(RevoltClient::new(config.revolt.clone(), revolt_tx)?);

    let bridge = Arc::new(BridgeCore::new(
        &config,
        Arc::new(registry),
        Some(store),
        BridgeClients {
            discord: discord.clone(),
            discord_webhooks: discord.clone(),
            revolt: revolt.clone(),
        },
    ));

    let mut dispatcher = EventDispatcher::new();
    bridge.subscribe(&mut dispatcher);
    let dispatcher = Arc::new(dispatcher);
    let (shutdown, shutdown_rx) = watch::channel(false);
    let discord_queue = dispatcher
        .clone()
        .spawn_queue(Platform::Discord, discord_rx, shutdown_rx.clone());
    let revolt_queue = dispatcher.spawn_queue(Platform::Revolt, revolt_rx, shutdown_rx);

    let web_server = WebServer::new(config.web.clone(), bridge.clone());
    let web_handle = tokio::spawn(async move {
        if let Err(e) = web_server.start().await {
            error!("web server error: {}", e);
        }
    });

    let attempts = config.bridge.login_attempts;
    let retry_delay = Duration::from_secs(config.bridge.login_retry_seconds);
    let login = tokio::try_join!(
        discord.start(attempts, retry_delay),
        revolt.start(attempts, retry_delay),
    );
    if let Err(err) = login {
        error!("giving up on login: {:#}", err);
        discord.stop().await;
        revolt.stop().await;
        web_handle.abort();
        shutdown.send_replace(true);
        return Err(err);
    }
    info!("both platforms connected, relaying messages");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("failed to listen for shutdown signal: {}", e);
            }
        }
        _ = web_handle => {
            warn!("web server exited");
        }
    }

    info!("revolt-discord bridge shutting down");
    discord.stop().await;
    revolt.stop().await;
    shutdown.send_replace(true);
    drain_queue(Platform::Discord, discord_queue).await;
    drain_queue(Platform::Revolt, revolt_queue).await;
    Ok(())
}

const QUEUE_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

async fn drain_queue(platform: Platform, queue: JoinHandle<()>) {
    match tokio::time::timeout(QUEUE_DRAIN_TIMEOUT, queue).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!("{} event queue task failed: {}", platform, err),
        Err(_) => warn!(
            "{} event queue still busy after {:?}, abandoning it",
            platform, QUEUE_DRAIN_TIMEOUT
        ),
    }
}
