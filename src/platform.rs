use std::fmt;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

#[cfg(test)]
pub(crate) mod testing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Discord,
    Revolt,
}

impl Platform {
    pub fn opposite(self) -> Self {
        match self {
            Platform::Discord => Platform::Revolt,
            Platform::Revolt => Platform::Discord,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Discord => "discord",
            Platform::Revolt => "revolt",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelRef {
    pub platform: Platform,
    pub channel_id: String,
}

impl ChannelRef {
    pub fn new(platform: Platform, channel_id: impl Into<String>) -> Self {
        Self {
            platform,
            channel_id: channel_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub platform: Platform,
    pub channel_id: String,
    pub message_id: String,
}

impl MessageRef {
    pub fn new(
        platform: Platform,
        channel_id: impl Into<String>,
        message_id: impl Into<String>,
    ) -> Self {
        Self {
            platform,
            channel_id: channel_id.into(),
            message_id: message_id.into(),
        }
    }

    pub fn channel(&self) -> ChannelRef {
        ChannelRef::new(self.platform, self.channel_id.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub bot: bool,
    /// Set when the message was emitted through a webhook rather than a user account.
    pub webhook_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub url: String,
    pub filename: String,
}

/// Embed carried through the bridge as-is; only the fields both platforms share.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedPayload {
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub colour: Option<u32>,
    pub icon_url: Option<String>,
}

impl EmbedPayload {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.url.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionedUser {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub platform: Platform,
    pub id: String,
    pub channel_id: String,
    pub author: Author,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub embeds: Vec<EmbedPayload>,
    pub mentions: Vec<MentionedUser>,
    pub reply_to: Option<String>,
}

impl InboundMessage {
    pub fn message_ref(&self) -> MessageRef {
        MessageRef::new(self.platform, self.channel_id.clone(), self.id.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEdit {
    pub platform: Platform,
    pub channel_id: String,
    pub message_id: String,
    pub content: String,
    pub mentions: Vec<MentionedUser>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRemoval {
    pub platform: Platform,
    pub channel_id: String,
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Masquerade {
    pub name: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundMessage {
    pub content: String,
    pub embeds: Vec<EmbedPayload>,
    pub reply_to: Option<String>,
    pub masquerade: Option<Masquerade>,
    /// Stable per relayed origin, so a retried send is recognised as the same request.
    pub nonce: Option<String>,
}

impl OutboundMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformUser {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub bot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformChannel {
    pub id: String,
    pub name: String,
    /// Discord guild or Revolt server owning the channel.
    pub server_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationAction {
    Kick,
    Ban,
    Unban,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandArg {
    String(String),
    Integer(i64),
    Boolean(bool),
    Channel(String),
}

impl CommandArg {
    pub fn as_text(&self) -> String {
        match self {
            CommandArg::String(value) | CommandArg::Channel(value) => value.clone(),
            CommandArg::Integer(value) => value.to_string(),
            CommandArg::Boolean(value) => value.to_string(),
        }
    }
}

/// Arguments of a command, either typed options (slash commands) or whitespace tokens (prefix commands).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandArgs {
    positional: Vec<String>,
    named: Vec<(String, CommandArg)>,
}

impl CommandArgs {
    pub fn from_tokens(tokens: Vec<String>) -> Self {
        Self {
            positional: tokens,
            named: Vec::new(),
        }
    }

    pub fn from_options(options: Vec<(String, CommandArg)>) -> Self {
        Self {
            positional: Vec::new(),
            named: options,
        }
    }

    /// Looks up an argument by option name first, then by token position.
    pub fn text(&self, name: &str, position: usize) -> Option<String> {
        self.named
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_text())
            .or_else(|| self.positional.get(position).cloned())
            .filter(|value| !value.trim().is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyTarget {
    Message(MessageRef),
    Interaction { interaction_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    pub platform: Platform,
    pub name: String,
    pub args: CommandArgs,
    pub channel: ChannelRef,
    pub author: Author,
    /// Whether the invoker may change bridge configuration for this channel.
    pub privileged: bool,
    pub reply: ReplyTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOptionKind {
    String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOptionSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: CommandOptionKind,
    pub required: bool,
}

/// Metadata describing a command to platforms that expose structured commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub options: Vec<CommandOptionSpec>,
    pub privileged: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    Ready { platform: Platform, self_id: String },
    MessageCreate(InboundMessage),
    MessageUpdate(MessageEdit),
    MessageDelete(MessageRemoval),
    Command(CommandInvocation),
}

impl PlatformEvent {
    pub fn platform(&self) -> Platform {
        match self {
            PlatformEvent::Ready { platform, .. } => *platform,
            PlatformEvent::MessageCreate(message) => message.platform,
            PlatformEvent::MessageUpdate(edit) => edit.platform,
            PlatformEvent::MessageDelete(removal) => removal.platform,
            PlatformEvent::Command(invocation) => invocation.platform,
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<PlatformEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<PlatformEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("{0} is not supported on this platform")]
    NotSupported(&'static str),
    #[error("invalid id: {0}")]
    InvalidId(String),
}

impl ClientError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Transient(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }

    /// Classifies an unsuccessful HTTP response from either platform.
    pub fn from_status(status: u16, detail: impl Into<String>) -> Self {
        let detail = format!("{status} {}", detail.into());
        match status {
            404 => ClientError::NotFound(detail),
            408 | 429 | 500..=599 => ClientError::Transient(detail),
            _ => ClientError::Rejected(detail),
        }
    }
}

/// A webhook endpoint owned by the bridge for one channel.
#[derive(Debug)]
pub struct WebhookHandle {
    pub channel_id: String,
    pub endpoint_id: String,
    pub endpoint_token: SecretString,
}

impl WebhookHandle {
    pub fn new(
        channel_id: impl Into<String>,
        endpoint_id: impl Into<String>,
        endpoint_token: impl Into<String>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            endpoint_id: endpoint_id.into(),
            endpoint_token: SecretString::from(endpoint_token.into()),
        }
    }

    pub fn token(&self) -> &str {
        self.endpoint_token.expose_secret()
    }
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    fn platform(&self) -> Platform;

    async fn send_message(
        &self,
        channel_id: &str,
        message: &OutboundMessage,
    ) -> Result<String, ClientError>;

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<(), ClientError>;

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> Result<(), ClientError>;

    async fn fetch_user(&self, user_id: &str) -> Result<PlatformUser, ClientError>;

    async fn fetch_channel(&self, channel_id: &str) -> Result<PlatformChannel, ClientError>;

    async fn moderate(
        &self,
        _channel_id: &str,
        _user_id: &str,
        _action: ModerationAction,
    ) -> Result<(), ClientError> {
        Err(ClientError::NotSupported("moderation"))
    }

    async fn register_commands(&self, _specs: &[CommandSpec]) -> Result<(), ClientError> {
        Err(ClientError::NotSupported("command metadata"))
    }

    async fn respond_interaction(
        &self,
        _interaction_id: &str,
        _content: &str,
    ) -> Result<(), ClientError> {
        Err(ClientError::NotSupported("interaction responses"))
    }
}

#[async_trait]
pub trait WebhookApi: Send + Sync {
    async fn create_webhook(&self, channel_id: &str) -> Result<WebhookHandle, ClientError>;

    async fn execute_webhook(
        &self,
        handle: &WebhookHandle,
        message: &OutboundMessage,
    ) -> Result<String, ClientError>;

    async fn edit_webhook_message(
        &self,
        handle: &WebhookHandle,
        message_id: &str,
        content: &str,
    ) -> Result<(), ClientError>;

    async fn delete_webhook_message(
        &self,
        handle: &WebhookHandle,
        message_id: &str,
    ) -> Result<(), ClientError>;
}
