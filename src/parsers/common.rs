use std::collections::HashMap;

use regex::{Captures, Regex};

use crate::platform::{Attachment, MentionedUser};

/// Both platforms cap message content at 2000 characters.
pub const MESSAGE_CHAR_LIMIT: usize = 2000;

pub struct MessageUtils;

impl MessageUtils {
    /// Truncates on a char boundary, marking the cut with an ellipsis.
    pub fn clamp(text: &str, limit: usize) -> String {
        if text.chars().count() <= limit {
            return text.to_string();
        }
        let mut clamped: String = text.chars().take(limit.saturating_sub(1)).collect();
        clamped.push('…');
        clamped
    }

    pub fn preview_text(value: &str) -> String {
        const MAX_PREVIEW_CHARS: usize = 120;
        let mut chars = value.chars();
        let preview: String = chars.by_ref().take(MAX_PREVIEW_CHARS).collect();
        if chars.next().is_some() {
            format!("{preview}…")
        } else {
            preview
        }
    }

    /// Breaks `@everyone` and `@here` with a zero-width space so they render inert.
    pub fn neutralize_mass_mentions(text: &str) -> String {
        text.replace("@everyone", "@\u{200b}everyone")
            .replace("@here", "@\u{200b}here")
    }

    pub fn append_attachments(content: &str, attachments: &[Attachment]) -> String {
        let mut lines: Vec<&str> = Vec::with_capacity(attachments.len() + 1);
        if !content.trim().is_empty() {
            lines.push(content);
        }
        lines.extend(attachments.iter().map(|attachment| attachment.url.as_str()));
        lines.join("\n")
    }

    /// Rewrites each user mention matched by `pattern` (capture 1 = id) to `@display name`.
    pub fn replace_user_mentions(text: &str, pattern: &Regex, mentions: &[MentionedUser]) -> String {
        let names: HashMap<&str, &str> = mentions
            .iter()
            .map(|user| (user.id.as_str(), user.display_name.as_str()))
            .collect();
        pattern
            .replace_all(text, |caps: &Captures<'_>| {
                let id = &caps[1];
                format!("@{}", names.get(id).copied().unwrap_or(id))
            })
            .into_owned()
    }

    pub fn display_name(name: &str, limit: usize, fallback: &str) -> String {
        let trimmed = name.trim();
        let name = if trimmed.is_empty() { fallback } else { trimmed };
        name.chars().take(limit).collect()
    }
}
