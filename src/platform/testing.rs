use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    Author, ChatClient, ClientError, CommandSpec, InboundMessage, ModerationAction,
    OutboundMessage, Platform, PlatformChannel, PlatformUser, WebhookApi, WebhookHandle,
};
use crate::db::{DatabaseError, MappingRecord, MappingStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SentMessage {
    pub channel_id: String,
    pub message_id: String,
    pub message: OutboundMessage,
    pub webhook_id: Option<String>,
}

/// Records every outbound call; failures can be queued for the next send, edit or delete.
pub(crate) struct FakeClient {
    platform: Platform,
    next_id: AtomicU64,
    webhook_delay: Duration,
    webhooks_denied: AtomicBool,
    failures: Mutex<VecDeque<ClientError>>,
    channels: Mutex<HashMap<String, PlatformChannel>>,
    pub sent: Mutex<Vec<SentMessage>>,
    /// Nonce of every send attempt, failed ones included.
    pub send_attempts: Mutex<Vec<Option<String>>>,
    pub edits: Mutex<Vec<(String, String)>>,
    pub deletes: Mutex<Vec<String>>,
    pub interaction_responses: Mutex<Vec<(String, String)>>,
    pub registered_commands: Mutex<Vec<String>>,
    pub moderation: Mutex<Vec<(String, ModerationAction)>>,
    pub webhooks_created: AtomicUsize,
}

impl FakeClient {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            next_id: AtomicU64::new(1),
            webhook_delay: Duration::ZERO,
            webhooks_denied: AtomicBool::new(false),
            failures: Mutex::new(VecDeque::new()),
            channels: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            send_attempts: Mutex::new(Vec::new()),
            edits: Mutex::new(Vec::new()),
            deletes: Mutex::new(Vec::new()),
            interaction_responses: Mutex::new(Vec::new()),
            registered_commands: Mutex::new(Vec::new()),
            moderation: Mutex::new(Vec::new()),
            webhooks_created: AtomicUsize::new(0),
        }
    }

    pub fn with_webhook_delay(mut self, delay: Duration) -> Self {
        self.webhook_delay = delay;
        self
    }

    /// Every webhook creation is rejected, as when the bot lacks Manage Webhooks.
    pub fn deny_webhooks(&self) {
        self.webhooks_denied.store(true, Ordering::SeqCst);
    }

    pub fn with_channel(self, id: &str, name: &str) -> Self {
        self.channels.lock().insert(
            id.to_string(),
            PlatformChannel {
                id: id.to_string(),
                name: name.to_string(),
                server_id: Some("server-1".to_string()),
            },
        );
        self
    }

    pub fn fail_next(&self, err: ClientError) {
        self.failures.lock().push_back(err);
    }

    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    fn prefix(&self) -> &'static str {
        match self.platform {
            Platform::Discord => "d",
            Platform::Revolt => "r",
        }
    }

    fn take_failure(&self) -> Result<(), ClientError> {
        match self.failures.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn push_sent(
        &self,
        channel_id: &str,
        message: &OutboundMessage,
        webhook_id: Option<String>,
    ) -> String {
        let message_id = format!(
            "{}-{}",
            self.prefix(),
            self.next_id.fetch_add(1, Ordering::SeqCst)
        );
        self.sent.lock().push(SentMessage {
            channel_id: channel_id.to_string(),
            message_id: message_id.clone(),
            message: message.clone(),
            webhook_id,
        });
        message_id
    }
}

#[async_trait]
impl ChatClient for FakeClient {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn send_message(
        &self,
        channel_id: &str,
        message: &OutboundMessage,
    ) -> Result<String, ClientError> {
        self.send_attempts.lock().push(message.nonce.clone());
        self.take_failure()?;
        Ok(self.push_sent(channel_id, message, None))
    }

    async fn edit_message(
        &self,
        _channel_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<(), ClientError> {
        self.take_failure()?;
        self.edits
            .lock()
            .push((message_id.to_string(), content.to_string()));
        Ok(())
    }

    async fn delete_message(&self, _channel_id: &str, message_id: &str) -> Result<(), ClientError> {
        self.take_failure()?;
        self.deletes.lock().push(message_id.to_string());
        Ok(())
    }

    async fn fetch_user(&self, user_id: &str) -> Result<PlatformUser, ClientError> {
        Ok(PlatformUser {
            id: user_id.to_string(),
            username: format!("user-{user_id}"),
            display_name: format!("User {user_id}"),
            avatar_url: None,
            bot: false,
        })
    }

    async fn fetch_channel(&self, channel_id: &str) -> Result<PlatformChannel, ClientError> {
        self.channels
            .lock()
            .get(channel_id)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("channel {channel_id}")))
    }

    async fn moderate(
        &self,
        _channel_id: &str,
        user_id: &str,
        action: ModerationAction,
    ) -> Result<(), ClientError> {
        self.moderation.lock().push((user_id.to_string(), action));
        Ok(())
    }

    async fn register_commands(&self, specs: &[CommandSpec]) -> Result<(), ClientError> {
        if self.platform == Platform::Revolt {
            return Err(ClientError::NotSupported("command metadata"));
        }
        self.registered_commands
            .lock()
            .extend(specs.iter().map(|spec| spec.name.to_string()));
        Ok(())
    }

    async fn respond_interaction(
        &self,
        interaction_id: &str,
        content: &str,
    ) -> Result<(), ClientError> {
        if self.platform == Platform::Revolt {
            return Err(ClientError::NotSupported("interaction responses"));
        }
        self.interaction_responses
            .lock()
            .push((interaction_id.to_string(), content.to_string()));
        Ok(())
    }
}

#[async_trait]
impl WebhookApi for FakeClient {
    async fn create_webhook(&self, channel_id: &str) -> Result<WebhookHandle, ClientError> {
        if !self.webhook_delay.is_zero() {
            tokio::time::sleep(self.webhook_delay).await;
        }
        if self.webhooks_denied.load(Ordering::SeqCst) {
            return Err(ClientError::Rejected("missing manage webhooks".to_string()));
        }
        let n = self.webhooks_created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(WebhookHandle::new(
            channel_id,
            format!("wh-{n}"),
            format!("token-{n}"),
        ))
    }

    async fn execute_webhook(
        &self,
        handle: &WebhookHandle,
        message: &OutboundMessage,
    ) -> Result<String, ClientError> {
        self.take_failure()?;
        Ok(self.push_sent(
            &handle.channel_id,
            message,
            Some(handle.endpoint_id.clone()),
        ))
    }

    async fn edit_webhook_message(
        &self,
        _handle: &WebhookHandle,
        message_id: &str,
        content: &str,
    ) -> Result<(), ClientError> {
        self.take_failure()?;
        self.edits
            .lock()
            .push((message_id.to_string(), content.to_string()));
        Ok(())
    }

    async fn delete_webhook_message(
        &self,
        _handle: &WebhookHandle,
        message_id: &str,
    ) -> Result<(), ClientError> {
        self.take_failure()?;
        self.deletes.lock().push(message_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MemoryMappingStore {
    records: Mutex<Vec<MappingRecord>>,
}

#[async_trait]
impl MappingStore for MemoryMappingStore {
    async fn load_mappings(&self) -> Result<Vec<MappingRecord>, DatabaseError> {
        Ok(self.records.lock().clone())
    }

    async fn create_mapping(&self, record: &MappingRecord) -> Result<(), DatabaseError> {
        let mut records = self.records.lock();
        let taken = records.iter().any(|existing| {
            existing.discord_channel == record.discord_channel
                || existing.revolt_channel == record.revolt_channel
        });
        if taken {
            return Err(DatabaseError::Query("UNIQUE constraint failed".to_string()));
        }
        let mut record = record.clone();
        record.id = records.len() as i64 + 1;
        records.push(record);
        Ok(())
    }

    async fn delete_mapping(&self, discord_channel: &str) -> Result<(), DatabaseError> {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|record| record.discord_channel != discord_channel);
        if records.len() == before {
            return Err(DatabaseError::NotFound(discord_channel.to_string()));
        }
        Ok(())
    }

    async fn set_allow_bots(
        &self,
        discord_channel: &str,
        allow_bots: bool,
    ) -> Result<(), DatabaseError> {
        let mut records = self.records.lock();
        let record = records
            .iter_mut()
            .find(|record| record.discord_channel == discord_channel)
            .ok_or_else(|| DatabaseError::NotFound(discord_channel.to_string()))?;
        record.allow_bots = allow_bots;
        Ok(())
    }
}

pub(crate) fn author(id: &str, name: &str, bot: bool) -> Author {
    Author {
        id: id.to_string(),
        display_name: name.to_string(),
        avatar_url: Some(format!("https://cdn.example.org/avatars/{id}.png")),
        bot,
        webhook_id: None,
    }
}

pub(crate) fn inbound(
    platform: Platform,
    channel_id: &str,
    id: &str,
    author: Author,
    content: &str,
) -> InboundMessage {
    InboundMessage {
        platform,
        id: id.to_string(),
        channel_id: channel_id.to_string(),
        author,
        content: content.to_string(),
        attachments: Vec::new(),
        embeds: Vec::new(),
        mentions: Vec::new(),
        reply_to: None,
    }
}
