use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info, warn};
use url::Url;

use super::models::{ClientFrame, Embed, File, Message, ServerFrame};
use super::{RevoltClient, parse_colour};
use crate::parsers::{RevoltToDiscordConverter, parse_prefixed_command};
use crate::platform::{
    Attachment, Author, ChannelRef, CommandArgs, CommandInvocation, EmbedPayload, InboundMessage,
    MentionedUser, MessageEdit, MessageRef, MessageRemoval, Platform, PlatformEvent, ReplyTarget,
};

const PING_INTERVAL_SECONDS: u64 = 20;
const MAX_BACKOFF_SECONDS: u64 = 30;

pub(crate) struct GatewayTask {
    pub ready: oneshot::Receiver<()>,
    pub task: JoinHandle<()>,
}

pub(crate) fn gateway_url(ws_url: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(ws_url)?;
    url.query_pairs_mut()
        .append_pair("version", "1")
        .append_pair("format", "json");
    Ok(url)
}

fn backoff(attempt: u32) -> Duration {
    std::cmp::min(
        Duration::from_secs(2u64.pow(attempt.min(5))),
        Duration::from_secs(MAX_BACKOFF_SECONDS),
    )
}

pub(crate) fn spawn(client: Arc<RevoltClient>, ws_url: String, self_id: String) -> GatewayTask {
    let (ready_tx, ready) = oneshot::channel();
    let task = tokio::spawn(connection_loop(client, ws_url, self_id, ready_tx));
    GatewayTask { ready, task }
}

async fn connection_loop(
    client: Arc<RevoltClient>,
    ws_url: String,
    self_id: String,
    ready_tx: oneshot::Sender<()>,
) {
    let url = match gateway_url(&ws_url) {
        Ok(url) => url,
        Err(err) => {
            error!("invalid revolt gateway url {}: {}", ws_url, err);
            return;
        }
    };
    let mut ready_tx = Some(ready_tx);
    let mut attempt = 0u32;

    loop {
        info!("connecting to revolt gateway url={}", ws_url);
        match connect_async(url.as_str()).await {
            Ok((stream, _)) => {
                attempt = 0;
                let (mut write, mut read) = stream.split();

                let auth = ClientFrame::Authenticate {
                    token: client.token().to_string(),
                };
                let sent = match serde_json::to_string(&auth) {
                    Ok(json) => write.send(WsMessage::Text(json.into())).await,
                    Err(err) => {
                        error!("failed to encode revolt authenticate frame: {}", err);
                        return;
                    }
                };
                if let Err(err) = sent {
                    warn!("failed to authenticate with revolt gateway: {}", err);
                } else {
                    let period = Duration::from_secs(PING_INTERVAL_SECONDS);
                    let mut heartbeat =
                        tokio::time::interval_at(tokio::time::Instant::now() + period, period);

                    loop {
                        tokio::select! {
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(WsMessage::Text(text))) => {
                                        match serde_json::from_str::<ServerFrame>(text.as_str()) {
                                            Ok(ServerFrame::Ready) => {
                                                info!("revolt gateway ready");
                                                if let Some(tx) = ready_tx.take() {
                                                    let _ = tx.send(());
                                                }
                                                emit(&client, PlatformEvent::Ready {
                                                    platform: Platform::Revolt,
                                                    self_id: self_id.clone(),
                                                });
                                            }
                                            Ok(ServerFrame::Error { error }) => {
                                                error!("revolt gateway error: {}", error);
                                                break;
                                            }
                                            Ok(frame) => {
                                                if let Some(event) = frame_event(&client, frame).await {
                                                    emit(&client, event);
                                                }
                                            }
                                            Err(err) => {
                                                debug!("skipping undecodable revolt frame: {}", err);
                                            }
                                        }
                                    }
                                    Some(Ok(WsMessage::Ping(data))) => {
                                        if let Err(err) = write.send(WsMessage::Pong(data)).await {
                                            warn!("failed to send pong: {}", err);
                                        }
                                    }
                                    Some(Ok(WsMessage::Close(_))) => {
                                        info!("revolt gateway closed the connection");
                                        break;
                                    }
                                    Some(Err(err)) => {
                                        error!("revolt gateway error: {}", err);
                                        break;
                                    }
                                    None => {
                                        info!("revolt gateway stream ended");
                                        break;
                                    }
                                    _ => {}
                                }
                            }
                            _ = heartbeat.tick() => {
                                let ping = ClientFrame::Ping {
                                    data: chrono::Utc::now().timestamp_millis().max(0) as u64,
                                };
                                let Ok(json) = serde_json::to_string(&ping) else {
                                    continue;
                                };
                                if let Err(err) = write.send(WsMessage::Text(json.into())).await {
                                    warn!("failed to send revolt ping: {}", err);
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            Err(err) => {
                error!("failed to connect to revolt gateway: {}", err);
            }
        }

        attempt += 1;
        let delay = backoff(attempt);
        info!(
            "reconnecting to revolt gateway in {:?} attempt={}",
            delay, attempt
        );
        tokio::time::sleep(delay).await;
    }
}

fn emit(client: &RevoltClient, event: PlatformEvent) {
    if client.events().send(event).is_err() {
        warn!("revolt event queue closed, dropping event");
    }
}

async fn frame_event(client: &RevoltClient, frame: ServerFrame) -> Option<PlatformEvent> {
    match frame {
        ServerFrame::Message(message) => message_event(client, message).await,
        ServerFrame::MessageUpdate { id, channel, data } => {
            let content = data.content?;
            let mentions = resolve_mentions(
                client,
                &RevoltToDiscordConverter::mention_ids(&content),
            )
            .await;
            Some(PlatformEvent::MessageUpdate(MessageEdit {
                platform: Platform::Revolt,
                channel_id: channel,
                message_id: id,
                content,
                mentions,
            }))
        }
        ServerFrame::MessageDelete { id, channel } => {
            Some(PlatformEvent::MessageDelete(MessageRemoval {
                platform: Platform::Revolt,
                channel_id: channel,
                message_id: id,
            }))
        }
        ServerFrame::Authenticated => {
            debug!("revolt gateway authenticated");
            None
        }
        _ => None,
    }
}

async fn resolve_mentions(client: &RevoltClient, ids: &[String]) -> Vec<MentionedUser> {
    let mut mentions = Vec::with_capacity(ids.len());
    for id in ids {
        match client.user(id).await {
            Ok(user) => mentions.push(MentionedUser {
                id: user.id,
                display_name: user.display_name,
            }),
            Err(err) => debug!("could not resolve revolt mention user_id={}: {}", id, err),
        }
    }
    mentions
}

async fn author_of(client: &RevoltClient, message: &Message) -> Author {
    let mut author = match client.user(&message.author).await {
        Ok(user) => Author {
            id: user.id,
            display_name: user.display_name,
            avatar_url: user.avatar_url,
            bot: user.bot,
            webhook_id: None,
        },
        Err(err) => {
            debug!(
                "could not resolve revolt author user_id={}: {}",
                message.author, err
            );
            Author {
                id: message.author.clone(),
                display_name: message.author.clone(),
                avatar_url: None,
                bot: false,
                webhook_id: None,
            }
        }
    };
    if let Some(masquerade) = &message.masquerade {
        if let Some(name) = &masquerade.name {
            author.display_name = name.clone();
        }
        if let Some(avatar) = &masquerade.avatar {
            author.avatar_url = Some(avatar.clone());
        }
    }
    author
}

async fn message_event(client: &RevoltClient, message: Message) -> Option<PlatformEvent> {
    if !is_relayable(&message) {
        return None;
    }
    let author = author_of(client, &message).await;
    let content = message.content.clone().unwrap_or_default();

    if let Some(command) = parse_prefixed_command(client.command_prefix(), &content) {
        let privileged = match client.is_server_owner(&message.channel, &author.id).await {
            Ok(owner) => owner,
            Err(err) => {
                debug!(
                    "could not check revolt server owner channel_id={}: {}",
                    message.channel, err
                );
                false
            }
        };
        return Some(PlatformEvent::Command(CommandInvocation {
            platform: Platform::Revolt,
            name: command.name,
            args: CommandArgs::from_tokens(command.args),
            channel: ChannelRef::new(Platform::Revolt, message.channel.clone()),
            author,
            privileged,
            reply: ReplyTarget::Message(MessageRef::new(
                Platform::Revolt,
                message.channel,
                message.id,
            )),
        }));
    }

    let mentions = resolve_mentions(client, &message.mentions).await;
    Some(PlatformEvent::MessageCreate(inbound_message(
        message,
        author,
        mentions,
        client.autumn_url(),
    )))
}

/// System messages and messages with nothing to carry are never relayed.
pub(crate) fn is_relayable(message: &Message) -> bool {
    if message.system.is_some() {
        return false;
    }
    let has_text = message
        .content
        .as_deref()
        .is_some_and(|content| !content.trim().is_empty());
    has_text
        || !message.attachments.is_empty()
        || message
            .embeds
            .iter()
            .any(|embed| matches!(embed, Embed::Text { .. }))
}

fn embed_payload(embed: &Embed) -> Option<EmbedPayload> {
    match embed {
        Embed::Text {
            title,
            description,
            url,
            colour,
            icon_url,
        } => {
            let payload = EmbedPayload {
                title: title.clone(),
                description: description.clone(),
                url: url.clone(),
                colour: colour.as_deref().and_then(parse_colour),
                icon_url: icon_url.clone(),
            };
            (!payload.is_empty()).then_some(payload)
        }
        Embed::Other => None,
    }
}

fn attachment(file: &File, autumn_url: &str) -> Attachment {
    Attachment {
        url: file.url(autumn_url),
        filename: file.filename.clone(),
    }
}

pub(crate) fn inbound_message(
    message: Message,
    author: Author,
    mentions: Vec<MentionedUser>,
    autumn_url: &str,
) -> InboundMessage {
    InboundMessage {
        platform: Platform::Revolt,
        attachments: message
            .attachments
            .iter()
            .map(|file| attachment(file, autumn_url))
            .collect(),
        embeds: message.embeds.iter().filter_map(embed_payload).collect(),
        reply_to: message.replies.first().cloned(),
        content: message.content.unwrap_or_default(),
        id: message.id,
        channel_id: message.channel,
        author,
        mentions,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{backoff, gateway_url, inbound_message, is_relayable};
    use crate::platform::testing::author;
    use crate::revolt::models::Message;

    fn message(raw: serde_json::Value) -> Message {
        serde_json::from_value(raw).expect("message")
    }

    #[test]
    fn gateway_url_requests_json_protocol_v1() {
        let url = gateway_url("wss://ws.revolt.chat").expect("url");
        assert_eq!(url.as_str(), "wss://ws.revolt.chat/?version=1&format=json");
    }

    #[test]
    fn reconnect_backoff_is_capped() {
        assert_eq!(backoff(1), Duration::from_secs(2));
        assert_eq!(backoff(4), Duration::from_secs(16));
        assert_eq!(backoff(9), Duration::from_secs(30));
    }

    #[test]
    fn system_and_empty_messages_are_not_relayable() {
        let system = message(serde_json::json!({
            "_id": "m1", "channel": "c1", "author": "00000000000000000000000000",
            "system": { "type": "user_joined", "id": "u1" }
        }));
        assert!(!is_relayable(&system));

        let blank = message(serde_json::json!({
            "_id": "m2", "channel": "c1", "author": "u1", "content": "   "
        }));
        assert!(!is_relayable(&blank));

        let file_only = message(serde_json::json!({
            "_id": "m3", "channel": "c1", "author": "u1",
            "attachments": [{ "_id": "f1", "tag": "attachments", "filename": "cat.png" }]
        }));
        assert!(is_relayable(&file_only));
    }

    #[test]
    fn inbound_messages_carry_files_embeds_and_replies() {
        let raw = message(serde_json::json!({
            "_id": "m1",
            "channel": "c1",
            "author": "u1",
            "content": "look",
            "replies": ["m0"],
            "attachments": [{ "_id": "f1", "tag": "attachments", "filename": "cat.png" }],
            "embeds": [
                { "type": "Text", "title": "notice", "colour": "#00ff00" },
                { "type": "Image", "url": "https://example.org/i.png" }
            ]
        }));
        let inbound = inbound_message(
            raw,
            author("u1", "bob", false),
            Vec::new(),
            "https://autumn.example.org/",
        );

        assert_eq!(inbound.content, "look");
        assert_eq!(inbound.reply_to.as_deref(), Some("m0"));
        assert_eq!(
            inbound.attachments[0].url,
            "https://autumn.example.org/attachments/f1"
        );
        assert_eq!(inbound.attachments[0].filename, "cat.png");
        assert_eq!(inbound.embeds.len(), 1);
        assert_eq!(inbound.embeds[0].colour, Some(0x00ff00));
    }
}
