use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::dispatch::EventHandler;
use super::error::RelayError;
use super::logic::{
    DropReason, classify_create, format_edit_for_target, format_for_target, resolve_reply,
};
use super::mappings::MappingRegistry;
use super::message_cache::{CachedMessage, MessageCache, MirrorFraming, MirrorRoute};
use super::webhooks::WebhookProvisioner;
use crate::metrics::RelayMetrics;
use crate::parsers::{DiscordToRevoltConverter, MessageUtils, RevoltToDiscordConverter};
use crate::platform::{
    ChatClient, InboundMessage, Masquerade, MessageEdit, MessageRef, MessageRemoval,
    OutboundMessage, Platform, PlatformEvent,
};
use crate::utils::retry::with_retry;

/// The bridge's own user id on each platform, learned from `Ready`.
#[derive(Debug, Default)]
pub struct SelfIdentities {
    discord: RwLock<Option<String>>,
    revolt: RwLock<Option<String>>,
}

impl SelfIdentities {
    fn slot(&self, platform: Platform) -> &RwLock<Option<String>> {
        match platform {
            Platform::Discord => &self.discord,
            Platform::Revolt => &self.revolt,
        }
    }

    pub fn set(&self, platform: Platform, id: impl Into<String>) {
        *self.slot(platform).write() = Some(id.into());
    }

    pub fn get(&self, platform: Platform) -> Option<String> {
        self.slot(platform).read().clone()
    }

    pub fn all_known(&self) -> bool {
        self.discord.read().is_some() && self.revolt.read().is_some()
    }
}

/// A mirror that reached the target platform, and how it got there.
struct Emitted {
    mirror_id: String,
    route: MirrorRoute,
    attributed_to: Option<String>,
}

impl Emitted {
    fn new(mirror_id: String, route: MirrorRoute) -> Self {
        Self {
            mirror_id,
            route,
            attributed_to: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Relayed { mirror_id: String },
    Edited,
    Deleted,
    Dropped(DropReason),
}

pub struct MessageRelay {
    registry: Arc<MappingRegistry>,
    discord: Arc<dyn ChatClient>,
    revolt: Arc<dyn ChatClient>,
    webhooks: Arc<WebhookProvisioner>,
    identities: Arc<SelfIdentities>,
    metrics: Arc<RelayMetrics>,
    discord_to_revolt: MessageCache,
    revolt_to_discord: MessageCache,
    timeout: Duration,
}

impl MessageRelay {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<MappingRegistry>,
        discord: Arc<dyn ChatClient>,
        revolt: Arc<dyn ChatClient>,
        webhooks: Arc<WebhookProvisioner>,
        identities: Arc<SelfIdentities>,
        metrics: Arc<RelayMetrics>,
        cache_capacity: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            discord,
            revolt,
            webhooks,
            identities,
            metrics,
            discord_to_revolt: MessageCache::new(Platform::Discord, cache_capacity),
            revolt_to_discord: MessageCache::new(Platform::Revolt, cache_capacity),
            timeout,
        }
    }

    fn client(&self, platform: Platform) -> &Arc<dyn ChatClient> {
        match platform {
            Platform::Discord => &self.discord,
            Platform::Revolt => &self.revolt,
        }
    }

    /// Cache of messages that originated on `platform`.
    fn outbound_cache(&self, platform: Platform) -> &MessageCache {
        match platform {
            Platform::Discord => &self.discord_to_revolt,
            Platform::Revolt => &self.revolt_to_discord,
        }
    }

    /// Cache whose mirrors live on `platform`.
    fn inbound_cache(&self, platform: Platform) -> &MessageCache {
        self.outbound_cache(platform.opposite())
    }

    #[cfg(test)]
    pub fn cache(&self, origin: Platform) -> &MessageCache {
        self.outbound_cache(origin)
    }

    fn dropped(
        &self,
        platform: Platform,
        channel_id: &str,
        message_id: &str,
        reason: DropReason,
    ) -> RelayOutcome {
        if reason.is_echo() {
            self.metrics.record_dropped_echo();
        } else {
            self.metrics.record_dropped_filtered();
        }
        debug!(
            "{} inbound dropped channel_id={} message_id={} reason={}",
            platform,
            channel_id,
            message_id,
            reason.as_str()
        );
        RelayOutcome::Dropped(reason)
    }

    pub async fn handle_create(&self, message: &InboundMessage) -> Result<RelayOutcome, RelayError> {
        self.metrics.record_received();
        let platform = message.platform;

        let self_id = self.identities.get(platform);
        let from_own_webhook = message
            .author
            .webhook_id
            .as_deref()
            .is_some_and(|id| self.webhooks.owns_webhook(id));
        let is_known_mirror = self
            .inbound_cache(platform)
            .is_mirror_of(platform, &message.id);
        let mapping = self
            .registry
            .find_by_source_channel(platform, &message.channel_id);

        let mapping = match classify_create(
            message,
            self_id.as_deref(),
            from_own_webhook,
            is_known_mirror,
            mapping.as_ref(),
        ) {
            Ok(mapping) => mapping.clone(),
            Err(reason) => {
                return Ok(self.dropped(platform, &message.channel_id, &message.id, reason));
            }
        };

        let cache = self.outbound_cache(platform);
        if !cache.claim(&message.id) {
            return Ok(self.dropped(
                platform,
                &message.channel_id,
                &message.id,
                DropReason::Duplicate,
            ));
        }

        let target = platform.opposite();
        let target_channel = mapping.channel_on(target).to_string();
        let outbound = OutboundMessage {
            content: format_for_target(message),
            embeds: message.embeds.clone(),
            reply_to: resolve_reply(
                platform,
                message.reply_to.as_deref(),
                cache,
                self.inbound_cache(platform),
            ),
            masquerade: None,
            nonce: Some(format!("{}-{}", platform, message.id)),
        };

        debug!(
            "{} inbound relaying channel_id={} message_id={} target_channel={} preview={:?}",
            platform,
            message.channel_id,
            message.id,
            target_channel,
            MessageUtils::preview_text(&outbound.content)
        );

        let emitted = match target {
            Platform::Discord => self.emit_to_discord(&target_channel, message, outbound).await,
            Platform::Revolt => self.emit_to_revolt(&target_channel, message, outbound).await,
        };

        match emitted {
            Ok(Emitted {
                mirror_id,
                route,
                attributed_to,
            }) => {
                cache.record(
                    message.message_ref(),
                    MessageRef::new(target, target_channel, mirror_id.clone()),
                    route,
                    MirrorFraming {
                        attachments: message.attachments.clone(),
                        attributed_to,
                    },
                );
                self.metrics.record_relayed();
                Ok(RelayOutcome::Relayed { mirror_id })
            }
            Err(err) => {
                cache.release(&message.id);
                self.metrics.record_failed();
                Err(err)
            }
        }
    }

    async fn emit_to_discord(
        &self,
        channel_id: &str,
        origin: &InboundMessage,
        outbound: OutboundMessage,
    ) -> Result<Emitted, RelayError> {
        let name = RevoltToDiscordConverter::webhook_username(&origin.author.display_name);
        let avatar = origin.author.avatar_url.as_deref();

        let handle = match self.webhooks.get_or_create(channel_id).await {
            Ok(handle) => handle,
            Err(err) => {
                warn!(
                    "webhook unavailable, sending as bot channel_id={} error={}",
                    channel_id, err
                );
                let mut fallback = outbound;
                fallback.content =
                    RevoltToDiscordConverter::attributed_content(&name, &fallback.content);
                let mirror_id = self
                    .send_direct(Platform::Discord, channel_id, &fallback)
                    .await?;
                return Ok(Emitted {
                    mirror_id,
                    route: MirrorRoute::Direct,
                    attributed_to: Some(name),
                });
            }
        };

        match self.webhooks.send(&handle, &name, avatar, &outbound).await {
            Ok(mirror_id) => Ok(Emitted::new(mirror_id, MirrorRoute::Webhook)),
            Err(err) if err.is_not_found() => {
                debug!("webhook vanished, reprovisioning channel_id={}", channel_id);
                let handle = self.webhooks.get_or_create(channel_id).await?;
                let mirror_id = self.webhooks.send(&handle, &name, avatar, &outbound).await?;
                Ok(Emitted::new(mirror_id, MirrorRoute::Webhook))
            }
            Err(err) => Err(err),
        }
    }

    async fn emit_to_revolt(
        &self,
        channel_id: &str,
        origin: &InboundMessage,
        mut outbound: OutboundMessage,
    ) -> Result<Emitted, RelayError> {
        outbound.masquerade = Some(Masquerade {
            name: DiscordToRevoltConverter::masquerade_name(&origin.author.display_name),
            avatar_url: origin.author.avatar_url.clone(),
        });
        let mirror_id = self
            .send_direct(Platform::Revolt, channel_id, &outbound)
            .await?;
        Ok(Emitted::new(mirror_id, MirrorRoute::Direct))
    }

    async fn send_direct(
        &self,
        platform: Platform,
        channel_id: &str,
        message: &OutboundMessage,
    ) -> Result<String, RelayError> {
        let client = self.client(platform);
        with_retry("send message", self.timeout, || {
            client.send_message(channel_id, message)
        })
        .await
        .map_err(|err| RelayError::client("send message", platform, err))
    }

    pub async fn handle_update(&self, edit: &MessageEdit) -> Result<RelayOutcome, RelayError> {
        let platform = edit.platform;
        if self
            .inbound_cache(platform)
            .is_mirror_of(platform, &edit.message_id)
        {
            return Ok(self.dropped(
                platform,
                &edit.channel_id,
                &edit.message_id,
                DropReason::Echo,
            ));
        }

        let Some(entry) = self
            .outbound_cache(platform)
            .find_mirror(platform, &edit.message_id)
        else {
            return Ok(self.dropped(
                platform,
                &edit.channel_id,
                &edit.message_id,
                DropReason::NotCached,
            ));
        };

        let content = format_edit_for_target(edit, &entry.framing);
        let result = match entry.route {
            MirrorRoute::Webhook => {
                let handle = self
                    .webhooks
                    .get_or_create(&entry.mirror.channel_id)
                    .await?;
                self.webhooks
                    .edit(&handle, &entry.mirror.message_id, &content)
                    .await
            }
            MirrorRoute::Direct => {
                let mirror = &entry.mirror;
                let client = self.client(mirror.platform);
                with_retry("edit message", self.timeout, || {
                    client.edit_message(&mirror.channel_id, &mirror.message_id, &content)
                })
                .await
                .map_err(|err| RelayError::client("edit message", mirror.platform, err))
            }
        };

        match result {
            Ok(()) => {
                self.metrics.record_edited();
                Ok(RelayOutcome::Edited)
            }
            Err(err) if err.is_not_found() => Ok(self.mirror_missing(&entry)),
            Err(err) => {
                self.metrics.record_failed();
                Err(err)
            }
        }
    }

    pub async fn handle_delete(&self, removal: &MessageRemoval) -> Result<RelayOutcome, RelayError> {
        let platform = removal.platform;

        // one of our mirrors was removed by someone else
        if let Some(entry) = self
            .inbound_cache(platform)
            .find_origin(platform, &removal.message_id)
        {
            self.inbound_cache(platform)
                .forget(&entry.origin.message_id);
            return Ok(self.dropped(
                platform,
                &removal.channel_id,
                &removal.message_id,
                DropReason::Echo,
            ));
        }

        let Some(entry) = self
            .outbound_cache(platform)
            .find_mirror(platform, &removal.message_id)
        else {
            return Ok(self.dropped(
                platform,
                &removal.channel_id,
                &removal.message_id,
                DropReason::NotCached,
            ));
        };

        let result = match entry.route {
            MirrorRoute::Webhook => {
                let handle = self
                    .webhooks
                    .get_or_create(&entry.mirror.channel_id)
                    .await?;
                self.webhooks
                    .delete(&handle, &entry.mirror.message_id)
                    .await
            }
            MirrorRoute::Direct => {
                let mirror = &entry.mirror;
                let client = self.client(mirror.platform);
                with_retry("delete message", self.timeout, || {
                    client.delete_message(&mirror.channel_id, &mirror.message_id)
                })
                .await
                .map_err(|err| RelayError::client("delete message", mirror.platform, err))
            }
        };

        match result {
            Ok(()) => {
                self.outbound_cache(platform)
                    .forget(&entry.origin.message_id);
                self.metrics.record_deleted();
                Ok(RelayOutcome::Deleted)
            }
            Err(err) if err.is_not_found() => Ok(self.mirror_missing(&entry)),
            Err(err) => {
                self.metrics.record_failed();
                Err(err)
            }
        }
    }

    fn mirror_missing(&self, entry: &CachedMessage) -> RelayOutcome {
        self.outbound_cache(entry.origin.platform)
            .forget(&entry.origin.message_id);
        debug!(
            "{} mirror missing, forgetting origin_id={} mirror_id={}",
            entry.mirror.platform, entry.origin.message_id, entry.mirror.message_id
        );
        RelayOutcome::Dropped(DropReason::MirrorMissing)
    }
}

#[async_trait]
impl EventHandler for MessageRelay {
    async fn handle(&self, event: &PlatformEvent) -> anyhow::Result<()> {
        let outcome = match event {
            PlatformEvent::MessageCreate(message) => self.handle_create(message).await?,
            PlatformEvent::MessageUpdate(edit) => self.handle_update(edit).await?,
            PlatformEvent::MessageDelete(removal) => self.handle_delete(removal).await?,
            _ => return Ok(()),
        };
        if let RelayOutcome::Relayed { mirror_id } = &outcome {
            debug!(
                "{} message relayed mirror_id={}",
                event.platform(),
                mirror_id
            );
        }
        Ok(())
    }
}
