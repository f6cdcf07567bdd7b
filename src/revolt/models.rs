use serde::{Deserialize, Serialize};

/// `GET /` on the API root.
#[derive(Debug, Clone, Deserialize)]
pub struct RootInfo {
    pub ws: String,
    pub features: RootFeatures,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RootFeatures {
    pub autumn: FeatureUrl,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeatureUrl {
    #[serde(default)]
    pub enabled: bool,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct File {
    #[serde(rename = "_id")]
    pub id: String,
    pub tag: String,
    #[serde(default)]
    pub filename: String,
}

impl File {
    pub fn url(&self, autumn_url: &str) -> String {
        format!("{}/{}/{}", autumn_url.trim_end_matches('/'), self.tag, self.id)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotInformation {
    pub owner: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<File>,
    #[serde(default)]
    pub bot: Option<BotInformation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Channel {
    #[serde(rename = "_id")]
    pub id: String,
    pub channel_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub server: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    #[serde(rename = "_id")]
    pub id: String,
    pub owner: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Masquerade {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// Received embeds; only text embeds carry fields worth relaying.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum Embed {
    Text {
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        colour: Option<String>,
        #[serde(default)]
        icon_url: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: String,
    pub channel: String,
    pub author: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub attachments: Vec<File>,
    #[serde(default)]
    pub embeds: Vec<Embed>,
    #[serde(default)]
    pub mentions: Vec<String>,
    #[serde(default)]
    pub replies: Vec<String>,
    #[serde(default)]
    pub masquerade: Option<Masquerade>,
    /// Present on system messages (joins, renames), which are never relayed.
    #[serde(default)]
    pub system: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartialMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplyIntent {
    pub id: String,
    pub mention: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SendableEmbed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colour: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SendMessage {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub replies: Vec<ReplyIntent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<SendableEmbed>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub masquerade: Option<Masquerade>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EditMessage {
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    Authenticate { token: String },
    Ping { data: u64 },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    Authenticated,
    Ready,
    Pong,
    Error {
        error: String,
    },
    Message(Message),
    MessageUpdate {
        id: String,
        channel: String,
        data: PartialMessage,
    },
    MessageDelete {
        id: String,
        channel: String,
    },
    #[serde(other)]
    Unknown,
}
