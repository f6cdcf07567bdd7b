use std::sync::Arc;

use tracing::debug;

use crate::platform::{
    ChannelRef, ChatClient, ClientError, CommandInvocation, CommandSpec, MessageRef,
    ModerationAction, OutboundMessage, Platform, PlatformChannel, PlatformUser, ReplyTarget,
};

/// Answers an invocation through `client`: an interaction response when there is one,
/// otherwise a reply to the triggering message.
pub(crate) async fn respond_raw(
    client: &dyn ChatClient,
    invocation: &CommandInvocation,
    content: &str,
) -> Result<(), ClientError> {
    match &invocation.reply {
        ReplyTarget::Interaction { interaction_id } => {
            client.respond_interaction(interaction_id, content).await
        }
        ReplyTarget::Message(message) => {
            let outbound = OutboundMessage {
                reply_to: Some(message.message_id.clone()),
                ..OutboundMessage::text(content)
            };
            client
                .send_message(&message.channel_id, &outbound)
                .await
                .map(|_| ())
        }
    }
}

/// The capability surface command handlers see, dispatching to whichever platform a reference names.
#[derive(Clone)]
pub struct UniversalExecutor {
    discord: Arc<dyn ChatClient>,
    revolt: Arc<dyn ChatClient>,
}

impl UniversalExecutor {
    pub fn new(discord: Arc<dyn ChatClient>, revolt: Arc<dyn ChatClient>) -> Self {
        Self { discord, revolt }
    }

    fn client(&self, platform: Platform) -> &dyn ChatClient {
        match platform {
            Platform::Discord => self.discord.as_ref(),
            Platform::Revolt => self.revolt.as_ref(),
        }
    }

    pub async fn send(&self, channel: &ChannelRef, content: &str) -> Result<String, ClientError> {
        self.client(channel.platform)
            .send_message(&channel.channel_id, &OutboundMessage::text(content))
            .await
    }

    pub async fn reply(&self, message: &MessageRef, content: &str) -> Result<String, ClientError> {
        let outbound = OutboundMessage {
            reply_to: Some(message.message_id.clone()),
            ..OutboundMessage::text(content)
        };
        self.client(message.platform)
            .send_message(&message.channel_id, &outbound)
            .await
    }

    pub async fn respond(
        &self,
        invocation: &CommandInvocation,
        content: &str,
    ) -> Result<(), ClientError> {
        debug!(
            "{} responding to command name={} channel_id={}",
            invocation.platform, invocation.name, invocation.channel.channel_id
        );
        respond_raw(self.client(invocation.platform), invocation, content).await
    }

    pub async fn fetch_user(
        &self,
        platform: Platform,
        user_id: &str,
    ) -> Result<PlatformUser, ClientError> {
        self.client(platform).fetch_user(user_id).await
    }

    pub async fn fetch_channel(
        &self,
        platform: Platform,
        channel_id: &str,
    ) -> Result<PlatformChannel, ClientError> {
        self.client(platform).fetch_channel(channel_id).await
    }

    pub async fn moderate(
        &self,
        channel: &ChannelRef,
        user_id: &str,
        action: ModerationAction,
    ) -> Result<(), ClientError> {
        self.client(channel.platform)
            .moderate(&channel.channel_id, user_id, action)
            .await
    }

    pub async fn register_commands(
        &self,
        platform: Platform,
        specs: &[CommandSpec],
    ) -> Result<(), ClientError> {
        self.client(platform).register_commands(specs).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::UniversalExecutor;
    use crate::platform::testing::{FakeClient, author};
    use crate::platform::{
        ChannelRef, ClientError, CommandArgs, CommandInvocation, MessageRef, ModerationAction,
        Platform, ReplyTarget,
    };

    fn executor() -> (Arc<FakeClient>, Arc<FakeClient>, UniversalExecutor) {
        let discord = Arc::new(FakeClient::new(Platform::Discord));
        let revolt = Arc::new(FakeClient::new(Platform::Revolt).with_channel("R1", "general"));
        let executor = UniversalExecutor::new(discord.clone(), revolt.clone());
        (discord, revolt, executor)
    }

    fn invocation(platform: Platform, reply: ReplyTarget) -> CommandInvocation {
        CommandInvocation {
            platform,
            name: "ping".to_string(),
            args: CommandArgs::default(),
            channel: ChannelRef::new(platform, "C1"),
            author: author("u1", "alice", false),
            privileged: false,
            reply,
        }
    }

    #[tokio::test]
    async fn send_and_reply_go_to_the_referenced_platform() {
        let (discord, revolt, executor) = executor();
        executor
            .send(&ChannelRef::new(Platform::Revolt, "R1"), "hello")
            .await
            .expect("send");
        executor
            .reply(&MessageRef::new(Platform::Discord, "D1", "d-9"), "hi back")
            .await
            .expect("reply");

        assert_eq!(revolt.sent_messages()[0].message.content, "hello");
        let reply = &discord.sent_messages()[0];
        assert_eq!(reply.channel_id, "D1");
        assert_eq!(reply.message.reply_to.as_deref(), Some("d-9"));
    }

    #[tokio::test]
    async fn respond_uses_interactions_on_discord_and_replies_on_revolt() {
        let (discord, revolt, executor) = executor();
        executor
            .respond(
                &invocation(
                    Platform::Discord,
                    ReplyTarget::Interaction {
                        interaction_id: "i-1".to_string(),
                    },
                ),
                "Pong!",
            )
            .await
            .expect("interaction");
        executor
            .respond(
                &invocation(
                    Platform::Revolt,
                    ReplyTarget::Message(MessageRef::new(Platform::Revolt, "R1", "rm-1")),
                ),
                "Pong!",
            )
            .await
            .expect("reply");

        assert_eq!(
            discord.interaction_responses.lock().clone(),
            vec![("i-1".to_string(), "Pong!".to_string())]
        );
        let reply = &revolt.sent_messages()[0];
        assert_eq!(reply.message.reply_to.as_deref(), Some("rm-1"));
    }

    #[tokio::test]
    async fn asymmetric_capabilities_report_not_supported() {
        let (discord, _revolt, executor) = executor();
        let err = executor
            .register_commands(Platform::Revolt, &[])
            .await
            .expect_err("revolt has no command metadata");
        assert!(matches!(err, ClientError::NotSupported(_)));

        executor
            .register_commands(Platform::Discord, &[])
            .await
            .expect("discord registers");
        executor
            .moderate(
                &ChannelRef::new(Platform::Discord, "D1"),
                "u2",
                ModerationAction::Kick,
            )
            .await
            .expect("kick");
        assert_eq!(
            discord.moderation.lock().clone(),
            vec![("u2".to_string(), ModerationAction::Kick)]
        );
    }

    #[tokio::test]
    async fn fetch_channel_reads_from_the_named_platform() {
        let (_discord, _revolt, executor) = executor();
        let channel = executor
            .fetch_channel(Platform::Revolt, "R1")
            .await
            .expect("channel");
        assert_eq!(channel.name, "general");
        assert!(
            executor
                .fetch_channel(Platform::Discord, "R1")
                .await
                .expect_err("unknown on discord")
                .is_not_found()
        );
    }
}
