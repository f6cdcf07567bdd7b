use super::mappings::Mapping;
use super::message_cache::{MessageCache, MirrorFraming};
use crate::parsers::{DiscordToRevoltConverter, RevoltToDiscordConverter};
use crate::platform::{InboundMessage, MessageEdit, Platform};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    OwnMessage,
    OwnWebhook,
    Echo,
    Unmapped,
    BotAuthor,
    Empty,
    Duplicate,
    NotCached,
    MirrorMissing,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::OwnMessage => "own_message",
            DropReason::OwnWebhook => "own_webhook",
            DropReason::Echo => "mirror_echo",
            DropReason::Unmapped => "no_mapping",
            DropReason::BotAuthor => "bot_author",
            DropReason::Empty => "empty",
            DropReason::Duplicate => "duplicate",
            DropReason::NotCached => "not_cached",
            DropReason::MirrorMissing => "mirror_missing",
        }
    }

    /// Drops caused by the bridge seeing its own output.
    pub fn is_echo(self) -> bool {
        matches!(
            self,
            DropReason::OwnMessage | DropReason::OwnWebhook | DropReason::Echo
        )
    }
}

/// Decides whether a newly created message should be relayed, returning its mapping if so.
pub(crate) fn classify_create<'a>(
    message: &InboundMessage,
    self_id: Option<&str>,
    from_own_webhook: bool,
    is_known_mirror: bool,
    mapping: Option<&'a Mapping>,
) -> Result<&'a Mapping, DropReason> {
    if self_id.is_some_and(|id| id == message.author.id) {
        return Err(DropReason::OwnMessage);
    }
    if from_own_webhook {
        return Err(DropReason::OwnWebhook);
    }
    if is_known_mirror {
        return Err(DropReason::Echo);
    }
    let mapping = mapping.ok_or(DropReason::Unmapped)?;
    if message.author.bot && !mapping.allow_bot_authored_relay {
        return Err(DropReason::BotAuthor);
    }
    if message.content.trim().is_empty()
        && message.attachments.is_empty()
        && message.embeds.is_empty()
    {
        return Err(DropReason::Empty);
    }
    Ok(mapping)
}

/// Maps a reply reference on `platform` to the matching message id on the other platform.
///
/// The referenced message is either an origin we mirrored, or itself a mirror of a message
/// that originated on the other side.
pub(crate) fn resolve_reply(
    platform: Platform,
    reply_to: Option<&str>,
    outbound: &MessageCache,
    inbound: &MessageCache,
) -> Option<String> {
    let reply_to = reply_to?;
    outbound
        .find_mirror(platform, reply_to)
        .map(|entry| entry.mirror.message_id)
        .or_else(|| {
            inbound
                .find_origin(platform, reply_to)
                .map(|entry| entry.origin.message_id)
        })
}

pub(crate) fn format_for_target(message: &InboundMessage) -> String {
    match message.platform {
        Platform::Discord => DiscordToRevoltConverter::format_content(
            &message.content,
            &message.mentions,
            &message.attachments,
        ),
        Platform::Revolt => RevoltToDiscordConverter::format_content(
            &message.content,
            &message.mentions,
            &message.attachments,
        ),
    }
}

/// Edits carry only text, so attachments and attribution come from the cached framing.
pub(crate) fn format_edit_for_target(edit: &MessageEdit, framing: &MirrorFraming) -> String {
    let content = match edit.platform {
        Platform::Discord => DiscordToRevoltConverter::format_content(
            &edit.content,
            &edit.mentions,
            &framing.attachments,
        ),
        Platform::Revolt => RevoltToDiscordConverter::format_content(
            &edit.content,
            &edit.mentions,
            &framing.attachments,
        ),
    };
    match &framing.attributed_to {
        Some(name) => RevoltToDiscordConverter::attributed_content(name, &content),
        None => content,
    }
}
