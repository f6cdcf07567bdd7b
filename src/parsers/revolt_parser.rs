use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::common::{MESSAGE_CHAR_LIMIT, MessageUtils};
use crate::platform::{Attachment, MentionedUser};

pub const WEBHOOK_NAME_LIMIT: usize = 80;

static USER_MENTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<@([0-9A-HJKMNP-TV-Z]{26})>").expect("valid revolt mention regex")
});
// Discord refuses webhook usernames containing these words.
static RESERVED_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)discord|clyde").expect("valid reserved name regex"));

/// Formats Revolt message content for posting on Discord.
pub struct RevoltToDiscordConverter;

impl RevoltToDiscordConverter {
    pub fn format_content(
        content: &str,
        mentions: &[MentionedUser],
        attachments: &[Attachment],
    ) -> String {
        let text = MessageUtils::replace_user_mentions(content, &USER_MENTION, mentions);
        let text = MessageUtils::neutralize_mass_mentions(&text);
        let text = MessageUtils::append_attachments(&text, attachments);
        MessageUtils::clamp(&text, MESSAGE_CHAR_LIMIT)
    }

    pub fn webhook_username(display_name: &str) -> String {
        let name = RESERVED_NAME.replace_all(display_name, |caps: &Captures<'_>| {
            let word = &caps[0];
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => format!("{first}\u{200b}{}", chars.as_str()),
                None => String::new(),
            }
        });
        let name = match name.trim() {
            "everyone" | "here" => format!("{name} (Revolt)"),
            _ => name.into_owned(),
        };
        MessageUtils::display_name(&name, WEBHOOK_NAME_LIMIT, "Revolt user")
    }

    /// User ids mentioned in raw content, first occurrence order.
    pub fn mention_ids(content: &str) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for caps in USER_MENTION.captures_iter(content) {
            let id = caps[1].to_string();
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    /// Used when no webhook is available and the bot posts in its own name.
    pub fn attributed_content(display_name: &str, content: &str) -> String {
        MessageUtils::clamp(
            &format!("**{}**: {}", display_name, content),
            MESSAGE_CHAR_LIMIT,
        )
    }
}
