use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted shape of a channel mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRecord {
    pub id: i64,
    pub discord_channel: String,
    pub revolt_channel: String,
    pub discord_channel_name: String,
    pub revolt_channel_name: String,
    pub allow_bots: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
