use std::sync::LazyLock;

use regex::Regex;

use super::common::{MESSAGE_CHAR_LIMIT, MessageUtils};
use crate::platform::{Attachment, MentionedUser};

/// Revolt masquerade names are limited to 32 characters.
pub const MASQUERADE_NAME_LIMIT: usize = 32;

static USER_MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<@!?(\d+)>").expect("valid user mention regex"));
static ROLE_MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<@&(\d+)>").expect("valid role mention regex"));
static CHANNEL_MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<#(\d+)>").expect("valid channel mention regex"));
static CUSTOM_EMOJI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<a?:(\w+):\d+>").expect("valid custom emoji regex"));

/// Formats Discord message content for posting on Revolt.
pub struct DiscordToRevoltConverter;

impl DiscordToRevoltConverter {
    pub fn format_content(
        content: &str,
        mentions: &[MentionedUser],
        attachments: &[Attachment],
    ) -> String {
        let text = MessageUtils::replace_user_mentions(content, &USER_MENTION, mentions);
        let text = ROLE_MENTION.replace_all(&text, "@role");
        let text = CHANNEL_MENTION.replace_all(&text, "#$1");
        let text = CUSTOM_EMOJI.replace_all(&text, ":$1:");
        let text = MessageUtils::neutralize_mass_mentions(&text);
        let text = MessageUtils::append_attachments(&text, attachments);
        MessageUtils::clamp(&text, MESSAGE_CHAR_LIMIT)
    }

    pub fn masquerade_name(display_name: &str) -> String {
        MessageUtils::display_name(display_name, MASQUERADE_NAME_LIMIT, "Discord user")
    }
}

#[cfg(test)]
mod tests {
    use super::DiscordToRevoltConverter;
    use crate::platform::{Attachment, MentionedUser};

    #[test]
    fn mentions_and_emoji_are_flattened() {
        let mentions = vec![MentionedUser {
            id: "42".to_string(),
            display_name: "alice".to_string(),
        }];
        let text = DiscordToRevoltConverter::format_content(
            "hi <@42> and <@!42> <:blob:123> <a:party:456> in <#789> cc <@&5>",
            &mentions,
            &[],
        );
        assert_eq!(text, "hi @alice and @alice :blob: :party: in #789 cc @role");
    }

    #[test]
    fn long_content_with_attachments_is_clamped() {
        let attachments = vec![Attachment {
            url: "https://cdn.discordapp.com/attachments/1/2/file.txt".to_string(),
            filename: "file.txt".to_string(),
        }];
        let text = DiscordToRevoltConverter::format_content(&"a".repeat(2500), &[], &attachments);
        assert_eq!(text.chars().count(), 2000);
    }

    #[test]
    fn masquerade_names_fit_revolt_limits() {
        let name = DiscordToRevoltConverter::masquerade_name(&"x".repeat(40));
        assert_eq!(name.chars().count(), 32);
        assert_eq!(DiscordToRevoltConverter::masquerade_name(""), "Discord user");
    }
}
