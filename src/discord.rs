use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::all::{
    ChannelId, Client as SerenityClient, Command as SerenityCommand, CommandInteraction,
    Context as SerenityContext, CreateAllowedMentions, CreateEmbed, CreateInteractionResponse,
    CreateInteractionResponseMessage, CreateMessage, CreateWebhook, EditMessage,
    EditWebhookMessage, Embed, EventHandler as SerenityEventHandler, ExecuteWebhook,
    GatewayIntents, GuildId, Http, Interaction, Message as SerenityMessage, MessageId,
    MessageUpdateEvent, Ready, User, UserId, Webhook,
};
use serenity::http::HttpError;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::DiscordConfig;
use crate::parsers::MessageUtils;
use crate::parsers::common::MESSAGE_CHAR_LIMIT;
use crate::platform::{
    Attachment, Author, ChannelRef, ChatClient, ClientError, CommandInvocation, CommandSpec,
    EmbedPayload, EventSender, InboundMessage, MentionedUser, MessageEdit, MessageRemoval,
    ModerationAction, OutboundMessage, Platform, PlatformChannel, PlatformEvent, PlatformUser,
    ReplyTarget, WebhookApi, WebhookHandle,
};
use crate::utils::retry::login_with_backoff;

pub mod commands;

const READY_TIMEOUT_SECONDS: u64 = 30;
/// Interaction tokens stop working after fifteen minutes.
const INTERACTION_TTL: Duration = Duration::from_secs(15 * 60);

type PendingInteractions = Arc<Mutex<HashMap<String, (Instant, CommandInteraction)>>>;

fn classify(err: serenity::Error) -> ClientError {
    match &err {
        serenity::Error::Http(HttpError::UnsuccessfulRequest(response)) => {
            ClientError::from_status(response.status_code.as_u16(), response.error.message.clone())
        }
        serenity::Error::Http(HttpError::Request(_)) | serenity::Error::Io(_) => {
            ClientError::Transient(err.to_string())
        }
        _ => ClientError::Rejected(err.to_string()),
    }
}

fn snowflake(value: &str) -> Result<u64, ClientError> {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .ok_or_else(|| ClientError::InvalidId(value.to_string()))
}

fn channel_id(value: &str) -> Result<ChannelId, ClientError> {
    snowflake(value).map(ChannelId::new)
}

fn message_id(value: &str) -> Result<MessageId, ClientError> {
    snowflake(value).map(MessageId::new)
}

fn user_display_name(user: &User) -> String {
    user.global_name.clone().unwrap_or_else(|| user.name.clone())
}

fn unique_message_ids(ids: Vec<MessageId>) -> Vec<MessageId> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

fn embed_payload(embed: &Embed) -> EmbedPayload {
    EmbedPayload {
        title: embed.title.clone(),
        description: embed.description.clone(),
        url: embed.url.clone(),
        colour: embed.colour.map(|colour| colour.0),
        icon_url: embed
            .author
            .as_ref()
            .and_then(|author| author.icon_url.clone()),
    }
}

fn create_embed(payload: &EmbedPayload) -> CreateEmbed {
    let mut embed = CreateEmbed::new();
    if let Some(title) = &payload.title {
        embed = embed.title(title);
    }
    if let Some(description) = &payload.description {
        embed = embed.description(description);
    }
    if let Some(url) = &payload.url {
        embed = embed.url(url);
    }
    if let Some(colour) = payload.colour {
        embed = embed.colour(colour);
    }
    embed
}

fn content_for_discord(content: &str) -> String {
    MessageUtils::clamp(content, MESSAGE_CHAR_LIMIT)
}

fn inbound_message(msg: &SerenityMessage) -> InboundMessage {
    let display_name = msg
        .member
        .as_ref()
        .and_then(|member| member.nick.clone())
        .unwrap_or_else(|| user_display_name(&msg.author));

    InboundMessage {
        platform: Platform::Discord,
        id: msg.id.to_string(),
        channel_id: msg.channel_id.to_string(),
        author: Author {
            id: msg.author.id.to_string(),
            display_name,
            avatar_url: Some(msg.author.face()),
            bot: msg.author.bot,
            webhook_id: msg.webhook_id.map(|id| id.to_string()),
        },
        content: msg.content.clone(),
        attachments: msg
            .attachments
            .iter()
            .map(|attachment| Attachment {
                url: attachment.url.clone(),
                filename: attachment.filename.clone(),
            })
            .collect(),
        embeds: msg
            .embeds
            .iter()
            .map(embed_payload)
            .filter(|embed| !embed.is_empty())
            .collect(),
        mentions: msg
            .mentions
            .iter()
            .map(|user| MentionedUser {
                id: user.id.to_string(),
                display_name: user_display_name(user),
            })
            .collect(),
        reply_to: msg
            .message_reference
            .as_ref()
            .and_then(|reference| reference.message_id)
            .map(|id| id.to_string()),
    }
}

struct GatewayHandler {
    events: EventSender,
    ready_signal: Arc<Mutex<Option<oneshot::Sender<()>>>>,
    interactions: PendingInteractions,
}

impl GatewayHandler {
    fn emit(&self, event: PlatformEvent) {
        if self.events.send(event).is_err() {
            debug!("discord event dropped, queue closed");
        }
    }

    fn remember_interaction(&self, interaction: CommandInteraction) {
        let mut pending = self.interactions.lock();
        pending.retain(|_, (received, _)| received.elapsed() < INTERACTION_TTL);
        pending.insert(interaction.id.to_string(), (Instant::now(), interaction));
    }
}

#[serenity::async_trait]
impl SerenityEventHandler for GatewayHandler {
    async fn ready(&self, _ctx: SerenityContext, ready: Ready) {
        info!(
            "discord gateway ready as {} ({})",
            ready.user.name, ready.user.id
        );
        if let Some(sender) = self.ready_signal.lock().take() {
            let _ = sender.send(());
        }
        self.emit(PlatformEvent::Ready {
            platform: Platform::Discord,
            self_id: ready.user.id.to_string(),
        });
    }

    async fn message(&self, _ctx: SerenityContext, msg: SerenityMessage) {
        if msg.guild_id.is_none() {
            return;
        }
        debug!(
            "discord message received channel_id={} message_id={} author_id={}",
            msg.channel_id, msg.id, msg.author.id
        );
        self.emit(PlatformEvent::MessageCreate(inbound_message(&msg)));
    }

    async fn message_update(
        &self,
        _ctx: SerenityContext,
        _old_if_available: Option<SerenityMessage>,
        _new_if_available: Option<SerenityMessage>,
        update: MessageUpdateEvent,
    ) {
        // embed-only updates carry no content
        let Some(content) = update.content.clone() else {
            return;
        };
        self.emit(PlatformEvent::MessageUpdate(MessageEdit {
            platform: Platform::Discord,
            channel_id: update.channel_id.to_string(),
            message_id: update.id.to_string(),
            content,
            mentions: update
                .mentions
                .as_deref()
                .unwrap_or_default()
                .iter()
                .map(|user| MentionedUser {
                    id: user.id.to_string(),
                    display_name: user_display_name(user),
                })
                .collect(),
        }));
    }

    async fn message_delete(
        &self,
        _ctx: SerenityContext,
        channel_id: ChannelId,
        deleted_message_id: MessageId,
        _guild_id: Option<GuildId>,
    ) {
        self.emit(PlatformEvent::MessageDelete(MessageRemoval {
            platform: Platform::Discord,
            channel_id: channel_id.to_string(),
            message_id: deleted_message_id.to_string(),
        }));
    }

    async fn message_delete_bulk(
        &self,
        _ctx: SerenityContext,
        channel_id: ChannelId,
        multiple_deleted_messages_ids: Vec<MessageId>,
        _guild_id: Option<GuildId>,
    ) {
        for id in unique_message_ids(multiple_deleted_messages_ids) {
            self.emit(PlatformEvent::MessageDelete(MessageRemoval {
                platform: Platform::Discord,
                channel_id: channel_id.to_string(),
                message_id: id.to_string(),
            }));
        }
    }

    async fn interaction_create(&self, _ctx: SerenityContext, interaction: Interaction) {
        let Interaction::Command(command) = interaction else {
            return;
        };
        let invocation = CommandInvocation {
            platform: Platform::Discord,
            name: command.data.name.clone(),
            args: commands::invocation_args(&command.data.options),
            channel: ChannelRef::new(Platform::Discord, command.channel_id.to_string()),
            author: Author {
                id: command.user.id.to_string(),
                display_name: user_display_name(&command.user),
                avatar_url: Some(command.user.face()),
                bot: command.user.bot,
                webhook_id: None,
            },
            privileged: commands::is_privileged(command.member.as_deref()),
            reply: ReplyTarget::Interaction {
                interaction_id: command.id.to_string(),
            },
        };
        debug!(
            "discord command received name={} channel_id={} user_id={}",
            invocation.name, command.channel_id, command.user.id
        );
        self.remember_interaction(command);
        self.emit(PlatformEvent::Command(invocation));
    }
}

/// Serenity gateway plus REST access, reporting events into the bridge queue.
pub struct DiscordClient {
    config: DiscordConfig,
    http: Arc<Http>,
    events: EventSender,
    interactions: PendingInteractions,
    gateway: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl DiscordClient {
    pub fn new(config: DiscordConfig, events: EventSender) -> Self {
        info!("initializing discord client");
        let http = Arc::new(Http::new(&config.bot_token));
        Self {
            config,
            http,
            events,
            interactions: Arc::new(Mutex::new(HashMap::new())),
            gateway: tokio::sync::Mutex::new(None),
        }
    }

    async fn login(&self) -> Result<()> {
        let mut gateway = self.gateway.lock().await;
        if gateway.is_some() {
            return Ok(());
        }

        let intents = GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT;
        let (ready_tx, ready_rx) = oneshot::channel();
        let handler = GatewayHandler {
            events: self.events.clone(),
            ready_signal: Arc::new(Mutex::new(Some(ready_tx))),
            interactions: self.interactions.clone(),
        };

        let mut client = SerenityClient::builder(&self.config.bot_token, intents)
            .event_handler(handler)
            .await
            .map_err(|err| anyhow!("failed to build discord gateway client: {err}"))?;

        let task = tokio::spawn(async move {
            if let Err(err) = client.start_autosharded().await {
                error!("discord gateway stopped: {err}");
            }
        });

        match tokio::time::timeout(Duration::from_secs(READY_TIMEOUT_SECONDS), ready_rx).await {
            Ok(Ok(())) => {
                *gateway = Some(task);
                Ok(())
            }
            Ok(Err(_)) => {
                task.abort();
                Err(anyhow!("discord gateway exited before receiving Ready event"))
            }
            Err(_) => {
                task.abort();
                Err(anyhow!("timed out waiting for discord Ready event"))
            }
        }
    }

    pub async fn start(&self, attempts: u32, retry_delay: Duration) -> Result<()> {
        login_with_backoff("discord", attempts, retry_delay, || self.login()).await
    }

    pub async fn stop(&self) {
        let Some(task) = self.gateway.lock().await.take() else {
            return;
        };
        task.abort();
        match task.await {
            Ok(()) => info!("discord gateway task exited"),
            Err(join_err) if join_err.is_cancelled() => info!("discord gateway task aborted"),
            Err(join_err) => error!("discord gateway task join error: {join_err}"),
        }
    }

    async fn webhook(&self, handle: &WebhookHandle) -> Result<Webhook, ClientError> {
        let url = format!(
            "https://discord.com/api/webhooks/{}/{}",
            handle.endpoint_id,
            handle.token()
        );
        Webhook::from_url(&self.http, &url).await.map_err(classify)
    }

    fn handle_for(&self, channel_id: &str, webhook: &Webhook) -> Result<WebhookHandle, ClientError> {
        let url = webhook.url().map_err(classify)?;
        let token = url
            .rsplit('/')
            .next()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ClientError::Rejected("webhook has no token".to_string()))?;
        Ok(WebhookHandle::new(channel_id, webhook.id.to_string(), token))
    }

    async fn guild_of(&self, channel: ChannelId) -> Result<GuildId, ClientError> {
        let channel = channel.to_channel(&self.http).await.map_err(classify)?;
        channel
            .guild()
            .map(|channel| channel.guild_id)
            .ok_or_else(|| ClientError::Rejected("channel is not in a guild".to_string()))
    }
}

#[async_trait]
impl ChatClient for DiscordClient {
    fn platform(&self) -> Platform {
        Platform::Discord
    }

    async fn send_message(
        &self,
        channel_id: &str,
        message: &OutboundMessage,
    ) -> Result<String, ClientError> {
        let channel = self::channel_id(channel_id)?;
        let mut builder = CreateMessage::new()
            .content(content_for_discord(&message.content))
            .allowed_mentions(CreateAllowedMentions::new())
            .embeds(message.embeds.iter().map(create_embed).collect());
        if let Some(reply_to) = message.reply_to.as_deref() {
            builder = builder.reference_message((channel, message_id(reply_to)?));
        }
        let sent = channel
            .send_message(&self.http, builder)
            .await
            .map_err(classify)?;
        debug!(
            "discord message sent channel_id={} message_id={}",
            channel_id, sent.id
        );
        Ok(sent.id.to_string())
    }

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<(), ClientError> {
        let channel = self::channel_id(channel_id)?;
        channel
            .edit_message(
                &self.http,
                self::message_id(message_id)?,
                EditMessage::new()
                    .content(content_for_discord(content))
                    .allowed_mentions(CreateAllowedMentions::new()),
            )
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> Result<(), ClientError> {
        self::channel_id(channel_id)?
            .delete_message(&self.http, self::message_id(message_id)?)
            .await
            .map_err(classify)
    }

    async fn fetch_user(&self, user_id: &str) -> Result<PlatformUser, ClientError> {
        let user = UserId::new(snowflake(user_id)?)
            .to_user(&self.http)
            .await
            .map_err(classify)?;
        Ok(PlatformUser {
            id: user.id.to_string(),
            username: user.name.clone(),
            display_name: user_display_name(&user),
            avatar_url: Some(user.face()),
            bot: user.bot,
        })
    }

    async fn fetch_channel(&self, channel_id: &str) -> Result<PlatformChannel, ClientError> {
        let channel = self::channel_id(channel_id)?
            .to_channel(&self.http)
            .await
            .map_err(classify)?;
        Ok(match channel.guild() {
            Some(guild_channel) => PlatformChannel {
                id: guild_channel.id.to_string(),
                name: guild_channel.name.clone(),
                server_id: Some(guild_channel.guild_id.to_string()),
            },
            None => PlatformChannel {
                id: channel_id.to_string(),
                name: String::new(),
                server_id: None,
            },
        })
    }

    async fn moderate(
        &self,
        channel_id: &str,
        user_id: &str,
        action: ModerationAction,
    ) -> Result<(), ClientError> {
        let guild = self.guild_of(self::channel_id(channel_id)?).await?;
        let user = UserId::new(snowflake(user_id)?);
        let result = match action {
            ModerationAction::Kick => guild.kick(&self.http, user).await,
            ModerationAction::Ban => guild.ban(&self.http, user, 0).await,
            ModerationAction::Unban => guild.unban(&self.http, user).await,
        };
        result.map_err(classify)?;
        info!(
            "discord moderation applied guild_id={} user_id={} action={:?}",
            guild, user_id, action
        );
        Ok(())
    }

    async fn register_commands(&self, specs: &[CommandSpec]) -> Result<(), ClientError> {
        SerenityCommand::set_global_commands(&self.http, commands::build_commands(specs))
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn respond_interaction(
        &self,
        interaction_id: &str,
        content: &str,
    ) -> Result<(), ClientError> {
        let Some((_, interaction)) = self.interactions.lock().remove(interaction_id) else {
            return Err(ClientError::NotFound(format!("interaction {interaction_id}")));
        };
        let message = CreateInteractionResponseMessage::new()
            .content(content_for_discord(content))
            .allowed_mentions(CreateAllowedMentions::new());
        interaction
            .create_response(&self.http, CreateInteractionResponse::Message(message))
            .await
            .map_err(classify)
    }
}

#[async_trait]
impl WebhookApi for DiscordClient {
    /// Reuses a webhook we can post through that already carries the configured name.
    async fn create_webhook(&self, channel_id: &str) -> Result<WebhookHandle, ClientError> {
        let channel = self::channel_id(channel_id)?;
        let existing = channel.webhooks(&self.http).await.map_err(classify)?;
        let reusable = existing.iter().find(|webhook| {
            webhook.token.is_some() && webhook.name.as_deref() == Some(self.config.webhook_name.as_str())
        });
        if let Some(webhook) = reusable {
            debug!(
                "reusing discord webhook channel_id={} webhook_id={}",
                channel_id, webhook.id
            );
            return self.handle_for(channel_id, webhook);
        }

        let webhook = channel
            .create_webhook(&self.http, CreateWebhook::new(&self.config.webhook_name))
            .await
            .map_err(classify)?;
        info!(
            "created discord webhook channel_id={} webhook_id={}",
            channel_id, webhook.id
        );
        self.handle_for(channel_id, &webhook)
    }

    async fn execute_webhook(
        &self,
        handle: &WebhookHandle,
        message: &OutboundMessage,
    ) -> Result<String, ClientError> {
        let webhook = self.webhook(handle).await?;
        let mut builder = ExecuteWebhook::new()
            .content(content_for_discord(&message.content))
            .allowed_mentions(CreateAllowedMentions::new())
            .embeds(message.embeds.iter().map(create_embed).collect());
        if let Some(masquerade) = &message.masquerade {
            builder = builder.username(&masquerade.name);
            if let Some(avatar) = &masquerade.avatar_url {
                builder = builder.avatar_url(avatar);
            }
        }

        let sent = webhook
            .execute(&self.http, true, builder)
            .await
            .map_err(classify)?
            .ok_or_else(|| ClientError::Transient("webhook execution returned no message".to_string()))?;
        debug!(
            "discord webhook message sent channel_id={} message_id={}",
            handle.channel_id, sent.id
        );
        Ok(sent.id.to_string())
    }

    async fn edit_webhook_message(
        &self,
        handle: &WebhookHandle,
        message_id: &str,
        content: &str,
    ) -> Result<(), ClientError> {
        let webhook = self.webhook(handle).await?;
        webhook
            .edit_message(
                &self.http,
                self::message_id(message_id)?,
                EditWebhookMessage::new()
                    .content(content_for_discord(content))
                    .allowed_mentions(CreateAllowedMentions::new()),
            )
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn delete_webhook_message(
        &self,
        handle: &WebhookHandle,
        message_id: &str,
    ) -> Result<(), ClientError> {
        let webhook = self.webhook(handle).await?;
        webhook
            .delete_message(&self.http, None, self::message_id(message_id)?)
            .await
            .map_err(classify)
    }
}

#[cfg(test)]
mod tests {
    use serenity::all::MessageId;

    use super::{snowflake, unique_message_ids};
    use crate::platform::ClientError;

    #[test]
    fn unique_message_ids_deduplicates_and_preserves_order() {
        let ids = vec![
            MessageId::new(3),
            MessageId::new(1),
            MessageId::new(3),
            MessageId::new(2),
            MessageId::new(1),
        ];
        assert_eq!(
            unique_message_ids(ids),
            vec![MessageId::new(3), MessageId::new(1), MessageId::new(2)]
        );
    }

    #[test]
    fn snowflakes_must_be_non_zero_integers() {
        assert_eq!(snowflake("1234567890"), Ok(1234567890));
        assert_eq!(snowflake(" 42 "), Ok(42));
        assert!(matches!(snowflake("0"), Err(ClientError::InvalidId(_))));
        assert!(matches!(snowflake("01HCHANNEL"), Err(ClientError::InvalidId(_))));
    }
}
