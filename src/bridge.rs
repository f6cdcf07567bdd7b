use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::MappingStore;
use crate::metrics::RelayMetrics;
use crate::platform::{ChatClient, Platform, PlatformEvent, WebhookApi};

pub mod commands;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod logic;
pub mod mappings;
pub mod message_cache;
pub mod relay;
pub mod webhooks;

use self::commands::CommandRouter;
use self::dispatch::{EventDispatcher, EventHandler, EventKind};
use self::executor::UniversalExecutor;
use self::mappings::{MappingAdmin, MappingRegistry, MappingSource};
use self::relay::{MessageRelay, SelfIdentities};
use self::webhooks::WebhookProvisioner;

/// The platform adapters the bridge drives.
pub struct BridgeClients {
    pub discord: Arc<dyn ChatClient>,
    pub discord_webhooks: Arc<dyn WebhookApi>,
    pub revolt: Arc<dyn ChatClient>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BridgeStatus {
    pub ready: bool,
    pub discord_ready: bool,
    pub revolt_ready: bool,
    pub mappings: usize,
    pub mapping_source: MappingSource,
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: i64,
}

/// Owns every piece of bridge state; platform queues feed it through the dispatcher.
pub struct BridgeCore {
    registry: Arc<MappingRegistry>,
    relay: Arc<MessageRelay>,
    commands: Arc<CommandRouter>,
    webhooks: Arc<WebhookProvisioner>,
    executor: Arc<OnceLock<UniversalExecutor>>,
    identities: Arc<SelfIdentities>,
    clients: BridgeClients,
    metrics: Arc<RelayMetrics>,
    register_slash_commands: bool,
    started_at: DateTime<Utc>,
}

impl BridgeCore {
    pub fn new(
        config: &Config,
        registry: Arc<MappingRegistry>,
        store: Option<Arc<dyn MappingStore>>,
        clients: BridgeClients,
    ) -> Self {
        let timeout = Duration::from_millis(config.bridge.send_timeout_ms);
        let metrics = Arc::new(RelayMetrics::default());
        let identities = Arc::new(SelfIdentities::default());
        let executor = Arc::new(OnceLock::new());
        let webhooks = Arc::new(WebhookProvisioner::new(
            clients.discord_webhooks.clone(),
            timeout,
        ));

        let relay = Arc::new(MessageRelay::new(
            registry.clone(),
            clients.discord.clone(),
            clients.revolt.clone(),
            webhooks.clone(),
            identities.clone(),
            metrics.clone(),
            config.bridge.message_cache_capacity,
            timeout,
        ));
        let commands = Arc::new(CommandRouter::new(
            &config.revolt.command_prefix,
            executor.clone(),
            Arc::new(MappingAdmin::new(registry.clone(), store)),
            clients.discord.clone(),
            clients.revolt.clone(),
            metrics.clone(),
        ));

        Self {
            registry,
            relay,
            commands,
            webhooks,
            executor,
            identities,
            clients,
            metrics,
            register_slash_commands: config.discord.register_slash_commands,
            started_at: Utc::now(),
        }
    }

    /// Wires the relay, the command router and the ready handler into `dispatcher`.
    pub fn subscribe(self: &Arc<Self>, dispatcher: &mut EventDispatcher) {
        dispatcher.subscribe(EventKind::Ready, self.clone());
        for kind in [
            EventKind::MessageCreate,
            EventKind::MessageUpdate,
            EventKind::MessageDelete,
        ] {
            dispatcher.subscribe(kind, self.relay.clone());
        }
        dispatcher.subscribe(EventKind::Command, self.commands.clone());
    }

    pub fn registry(&self) -> &Arc<MappingRegistry> {
        &self.registry
    }

    pub fn relay(&self) -> &Arc<MessageRelay> {
        &self.relay
    }

    pub fn commands(&self) -> &Arc<CommandRouter> {
        &self.commands
    }

    pub fn metrics(&self) -> &Arc<RelayMetrics> {
        &self.metrics
    }

    pub fn executor(&self) -> Option<&UniversalExecutor> {
        self.executor.get()
    }

    pub fn is_ready(&self) -> bool {
        self.executor.get().is_some()
    }

    pub fn status(&self) -> BridgeStatus {
        let now = Utc::now();
        BridgeStatus {
            ready: self.is_ready(),
            discord_ready: self.identities.get(Platform::Discord).is_some(),
            revolt_ready: self.identities.get(Platform::Revolt).is_some(),
            mappings: self.registry.len(),
            mapping_source: self.registry.source(),
            started_at: self.started_at,
            uptime_seconds: (now - self.started_at).num_seconds(),
        }
    }

    async fn on_ready(&self, platform: Platform, self_id: &str) {
        self.identities.set(platform, self_id);
        info!("{} client ready self_id={}", platform, self_id);

        if !self.identities.all_known() {
            return;
        }
        let executor = UniversalExecutor::new(self.clients.discord.clone(), self.clients.revolt.clone());
        if self.executor.set(executor).is_err() {
            // reconnects deliver Ready again
            return;
        }
        info!(
            "bridge ready mappings={} source={:?}",
            self.registry.len(),
            self.registry.source()
        );

        if self.register_slash_commands {
            if let Some(executor) = self.executor.get() {
                let specs = self.commands.registry(Platform::Discord).specs();
                match executor.register_commands(Platform::Discord, &specs).await {
                    Ok(()) => info!("registered slash commands count={}", specs.len()),
                    Err(err) => warn!("failed to register slash commands: {err}"),
                }
            }
        }

        let webhooks = self.webhooks.clone();
        let channels: Vec<String> = self
            .registry
            .all()
            .into_iter()
            .map(|mapping| mapping.discord_channel_id)
            .collect();
        tokio::spawn(async move {
            webhooks.warm(channels).await;
        });
    }
}

#[async_trait]
impl EventHandler for BridgeCore {
    async fn handle(&self, event: &PlatformEvent) -> anyhow::Result<()> {
        if let PlatformEvent::Ready { platform, self_id } = event {
            self.on_ready(*platform, self_id).await;
        }
        Ok(())
    }
}
