use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{Context as _, Result, anyhow};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Method, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::RevoltConfig;
use crate::parsers::MessageUtils;
use crate::parsers::common::MESSAGE_CHAR_LIMIT;
use crate::platform::{
    ChatClient, ClientError, EmbedPayload, EventSender, ModerationAction, OutboundMessage,
    Platform, PlatformChannel, PlatformUser,
};
use crate::utils::retry::login_with_backoff;

pub mod gateway;
pub mod models;

use self::models::{
    Channel, EditMessage, Masquerade, ReplyIntent, RootInfo, SendMessage, SendableEmbed, Server,
    User,
};

const REQUEST_TIMEOUT_SECONDS: u64 = 30;
const USER_CACHE_LIMIT: usize = 5000;

/// Endpoints learned from the API root at login.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub ws_url: String,
    pub autumn_url: String,
}

fn transport_error(err: reqwest::Error) -> ClientError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        ClientError::Transient(err.to_string())
    } else {
        ClientError::Rejected(err.to_string())
    }
}

/// Revolt ids are 26 character ULIDs.
fn revolt_id(value: &str) -> Result<&str, ClientError> {
    let value = value.trim();
    if value.len() == 26 && value.chars().all(|c| c.is_ascii_alphanumeric()) {
        Ok(value)
    } else {
        Err(ClientError::InvalidId(value.to_string()))
    }
}

fn colour_hex(colour: u32) -> String {
    format!("#{:06x}", colour & 0x00ff_ffff)
}

pub(crate) fn parse_colour(value: &str) -> Option<u32> {
    let hex = value.trim().strip_prefix('#')?;
    if hex.len() != 6 {
        return None;
    }
    u32::from_str_radix(hex, 16).ok()
}

fn sendable_embed(payload: &EmbedPayload) -> SendableEmbed {
    SendableEmbed {
        title: payload.title.clone(),
        description: payload.description.clone(),
        url: payload.url.clone(),
        colour: payload.colour.map(colour_hex),
        icon_url: payload.icon_url.clone(),
    }
}

pub(crate) fn idempotency_key(message: &OutboundMessage) -> String {
    message
        .nonce
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

pub(crate) fn send_body(message: &OutboundMessage) -> SendMessage {
    SendMessage {
        content: MessageUtils::clamp(&message.content, MESSAGE_CHAR_LIMIT),
        replies: message
            .reply_to
            .iter()
            .map(|id| ReplyIntent {
                id: id.clone(),
                mention: false,
            })
            .collect(),
        embeds: message.embeds.iter().map(sendable_embed).collect(),
        masquerade: message.masquerade.as_ref().map(|masquerade| Masquerade {
            name: Some(masquerade.name.clone()),
            avatar: masquerade.avatar_url.clone(),
        }),
    }
}

/// REST access to the Revolt API plus the websocket gateway task.
pub struct RevoltClient {
    config: RevoltConfig,
    token: SecretString,
    http: reqwest::Client,
    events: EventSender,
    endpoints: OnceLock<Endpoints>,
    users: Mutex<HashMap<String, PlatformUser>>,
    server_owners: Mutex<HashMap<String, String>>,
    gateway: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl RevoltClient {
    pub fn new(config: RevoltConfig, events: EventSender) -> Result<Self> {
        info!("initializing revolt client api_url={}", config.api_url);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .build()
            .context("failed to build revolt http client")?;
        Ok(Self {
            token: SecretString::from(config.bot_token.clone()),
            config,
            http,
            events,
            endpoints: OnceLock::new(),
            users: Mutex::new(HashMap::new()),
            server_owners: Mutex::new(HashMap::new()),
            gateway: tokio::sync::Mutex::new(None),
        })
    }

    pub fn command_prefix(&self) -> &str {
        &self.config.command_prefix
    }

    pub fn autumn_url(&self) -> &str {
        self.endpoints
            .get()
            .map(|endpoints| endpoints.autumn_url.as_str())
            .unwrap_or("https://autumn.revolt.chat")
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    async fn execute(&self, builder: RequestBuilder) -> Result<Response, ClientError> {
        let response = builder
            .header("x-bot-token", self.token.expose_secret())
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ClientError::from_status(
            status.as_u16(),
            MessageUtils::preview_text(&body),
        ))
    }

    async fn json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ClientError> {
        self.execute(builder)
            .await?
            .json::<T>()
            .await
            .map_err(|err| ClientError::Rejected(format!("unexpected revolt response: {err}")))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, self.url(path))
    }

    async fn discover(&self) -> Result<Endpoints> {
        let root: RootInfo = self
            .json(self.http.get(self.url("/")))
            .await
            .map_err(|err| anyhow!("failed to query revolt api root: {err}"))?;
        let ws_url = self.config.ws_url.clone().unwrap_or(root.ws);
        if !root.features.autumn.enabled {
            debug!("revolt file server reported as disabled");
        }
        Ok(Endpoints {
            ws_url,
            autumn_url: root.features.autumn.url,
        })
    }

    async fn login(self: &Arc<Self>) -> Result<()> {
        let mut gateway = self.gateway.lock().await;
        if gateway.is_some() {
            return Ok(());
        }

        let endpoints = match self.endpoints.get() {
            Some(endpoints) => endpoints.clone(),
            None => {
                let endpoints = self.discover().await?;
                let _ = self.endpoints.set(endpoints.clone());
                endpoints
            }
        };
        let me: User = self
            .json(self.request(Method::GET, "/users/@me"))
            .await
            .map_err(|err| anyhow!("revolt token rejected: {err}"))?;
        info!("revolt authenticated as {} ({})", me.username, me.id);

        let ready = self::gateway::spawn(self.clone(), endpoints.ws_url, me.id);
        match tokio::time::timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS), ready.ready).await {
            Ok(Ok(())) => {
                *gateway = Some(ready.task);
                Ok(())
            }
            Ok(Err(_)) => {
                ready.task.abort();
                Err(anyhow!("revolt gateway exited before receiving Ready"))
            }
            Err(_) => {
                ready.task.abort();
                Err(anyhow!("timed out waiting for revolt Ready"))
            }
        }
    }

    pub async fn start(self: &Arc<Self>, attempts: u32, retry_delay: Duration) -> Result<()> {
        login_with_backoff("revolt", attempts, retry_delay, || self.login()).await
    }

    pub async fn stop(&self) {
        if let Some(task) = self.gateway.lock().await.take() {
            task.abort();
            let _ = task.await;
            info!("revolt gateway stopped");
        }
    }

    pub(crate) fn events(&self) -> &EventSender {
        &self.events
    }

    pub(crate) fn token(&self) -> &str {
        self.token.expose_secret()
    }

    fn user_from(&self, user: User) -> PlatformUser {
        PlatformUser {
            display_name: user
                .display_name
                .clone()
                .unwrap_or_else(|| user.username.clone()),
            avatar_url: user.avatar.as_ref().map(|file| file.url(self.autumn_url())),
            bot: user.bot.is_some(),
            id: user.id,
            username: user.username,
        }
    }

    /// Cached user lookup used for author identity and mention names.
    pub(crate) async fn user(&self, user_id: &str) -> Result<PlatformUser, ClientError> {
        if let Some(user) = self.users.lock().get(user_id) {
            return Ok(user.clone());
        }
        let user: User = self
            .json(self.request(Method::GET, &format!("/users/{}", revolt_id(user_id)?)))
            .await?;
        let user = self.user_from(user);
        let mut users = self.users.lock();
        if users.len() >= USER_CACHE_LIMIT {
            users.clear();
        }
        users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn channel(&self, channel_id: &str) -> Result<Channel, ClientError> {
        self.json(self.request(
            Method::GET,
            &format!("/channels/{}", revolt_id(channel_id)?),
        ))
        .await
    }

    async fn server_of(&self, channel_id: &str) -> Result<String, ClientError> {
        self.channel(channel_id)
            .await?
            .server
            .ok_or_else(|| ClientError::Rejected(format!("channel {channel_id} is not in a server")))
    }

    /// Whether `user_id` owns the server the channel belongs to.
    pub(crate) async fn is_server_owner(&self, channel_id: &str, user_id: &str) -> Result<bool, ClientError> {
        let server_id = self.server_of(channel_id).await?;
        if let Some(owner) = self.server_owners.lock().get(&server_id) {
            return Ok(owner == user_id);
        }
        let server: Server = self
            .json(self.request(Method::GET, &format!("/servers/{server_id}")))
            .await?;
        let owner = server.owner.clone();
        self.server_owners.lock().insert(server.id, server.owner);
        Ok(owner == user_id)
    }
}

#[async_trait]
impl ChatClient for RevoltClient {
    fn platform(&self) -> Platform {
        Platform::Revolt
    }

    async fn send_message(
        &self,
        channel_id: &str,
        message: &OutboundMessage,
    ) -> Result<String, ClientError> {
        let path = format!("/channels/{}/messages", revolt_id(channel_id)?);
        let sent: models::Message = self
            .json(
                self.request(Method::POST, &path)
                    .header("Idempotency-Key", idempotency_key(message))
                    .json(&send_body(message)),
            )
            .await?;
        debug!(
            "revolt message sent channel_id={} message_id={}",
            channel_id, sent.id
        );
        Ok(sent.id)
    }

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<(), ClientError> {
        let path = format!(
            "/channels/{}/messages/{}",
            revolt_id(channel_id)?,
            revolt_id(message_id)?
        );
        self.execute(self.request(Method::PATCH, &path).json(&EditMessage {
            content: MessageUtils::clamp(content, MESSAGE_CHAR_LIMIT),
        }))
        .await?;
        Ok(())
    }

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> Result<(), ClientError> {
        let path = format!(
            "/channels/{}/messages/{}",
            revolt_id(channel_id)?,
            revolt_id(message_id)?
        );
        self.execute(self.request(Method::DELETE, &path)).await?;
        Ok(())
    }

    async fn fetch_user(&self, user_id: &str) -> Result<PlatformUser, ClientError> {
        self.user(user_id).await
    }

    async fn fetch_channel(&self, channel_id: &str) -> Result<PlatformChannel, ClientError> {
        let channel = self.channel(channel_id).await?;
        Ok(PlatformChannel {
            name: channel.name.unwrap_or_default(),
            server_id: channel.server,
            id: channel.id,
        })
    }

    async fn moderate(
        &self,
        channel_id: &str,
        user_id: &str,
        action: ModerationAction,
    ) -> Result<(), ClientError> {
        let server_id = self.server_of(channel_id).await?;
        let user_id = revolt_id(user_id)?;
        let builder = match action {
            ModerationAction::Kick => self.request(
                Method::DELETE,
                &format!("/servers/{server_id}/members/{user_id}"),
            ),
            ModerationAction::Ban => self
                .request(Method::PUT, &format!("/servers/{server_id}/bans/{user_id}"))
                .json(&serde_json::json!({})),
            ModerationAction::Unban => self.request(
                Method::DELETE,
                &format!("/servers/{server_id}/bans/{user_id}"),
            ),
        };
        self.execute(builder).await?;
        info!(
            "revolt moderation applied server_id={} user_id={} action={:?}",
            server_id, user_id, action
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{colour_hex, idempotency_key, parse_colour, revolt_id, send_body};
    use crate::platform::{ClientError, EmbedPayload, Masquerade, OutboundMessage};

    #[test]
    fn ids_must_look_like_ulids() {
        assert_eq!(
            revolt_id("01HZX3Y4J5K6M7N8P9Q0R1S2T3"),
            Ok("01HZX3Y4J5K6M7N8P9Q0R1S2T3")
        );
        assert!(matches!(revolt_id("1234"), Err(ClientError::InvalidId(_))));
        assert!(matches!(
            revolt_id("01HZX3Y4J5K6M7N8P9Q0R1S2/3"),
            Err(ClientError::InvalidId(_))
        ));
    }

    #[test]
    fn colours_convert_between_integer_and_css() {
        assert_eq!(colour_hex(0x5865f2), "#5865f2");
        assert_eq!(parse_colour("#5865F2"), Some(0x5865f2));
        assert_eq!(parse_colour("red"), None);
    }

    #[test]
    fn send_body_carries_masquerade_reply_and_embeds() {
        let body = send_body(&OutboundMessage {
            content: "hello".to_string(),
            embeds: vec![EmbedPayload {
                title: Some("release".to_string()),
                colour: Some(0xff0000),
                ..EmbedPayload::default()
            }],
            reply_to: Some("01HREPLY".to_string()),
            masquerade: Some(Masquerade {
                name: "Alice".to_string(),
                avatar_url: Some("https://cdn.example.org/a.png".to_string()),
            }),
            nonce: None,
        });
        let json = serde_json::to_value(&body).expect("body");
        assert_eq!(json["content"], "hello");
        assert_eq!(json["replies"][0]["id"], "01HREPLY");
        assert_eq!(json["replies"][0]["mention"], false);
        assert_eq!(json["masquerade"]["name"], "Alice");
        assert_eq!(json["masquerade"]["avatar"], "https://cdn.example.org/a.png");
        assert_eq!(json["embeds"][0]["colour"], "#ff0000");
        assert!(json["embeds"][0].get("url").is_none());
    }

    #[test]
    fn idempotency_key_is_stable_for_a_relayed_message() {
        let relayed = OutboundMessage {
            nonce: Some("discord-1234".to_string()),
            ..OutboundMessage::text("hello")
        };
        assert_eq!(idempotency_key(&relayed), "discord-1234");
        assert_eq!(idempotency_key(&relayed), idempotency_key(&relayed.clone()));

        let ad_hoc = OutboundMessage::text("hello");
        assert_ne!(idempotency_key(&ad_hoc), idempotency_key(&ad_hoc));
    }
}
