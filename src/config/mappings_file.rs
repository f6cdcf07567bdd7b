use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Config, ConfigError};
use crate::bridge::mappings::Mapping;

/// One declarative mapping, as written in `mappings.json` or the `mappings` config list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingEntry {
    #[serde(alias = "discord", alias = "discord_channel")]
    pub discord_channel: String,
    #[serde(alias = "revolt", alias = "revolt_channel")]
    pub revolt_channel: String,
    #[serde(default, alias = "discord_channel_name")]
    pub discord_channel_name: String,
    #[serde(default, alias = "revolt_channel_name")]
    pub revolt_channel_name: String,
    #[serde(default = "default_allow_bots", alias = "allow_bots")]
    pub allow_bots: bool,
}

impl From<MappingEntry> for Mapping {
    fn from(entry: MappingEntry) -> Self {
        Mapping {
            discord_channel_id: entry.discord_channel.trim().to_string(),
            revolt_channel_id: entry.revolt_channel.trim().to_string(),
            discord_channel_name: entry.discord_channel_name,
            revolt_channel_name: entry.revolt_channel_name,
            allow_bot_authored_relay: entry.allow_bots,
        }
    }
}

fn default_allow_bots() -> bool {
    true
}

/// Reads a JSON array of mapping entries. A missing file yields no entries.
pub fn load_mappings_file<P: AsRef<Path>>(path: P) -> Result<Vec<MappingEntry>, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        debug!("mappings file absent path={}", path.display());
        return Ok(Vec::new());
    }

    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&content)?)
}

/// Collects the inline `mappings` list and the mappings file into bridge mappings.
pub fn load_declarative_mappings(config: &Config) -> Result<Vec<Mapping>, ConfigError> {
    let mut entries = config.mappings.clone();
    if let Some(path) = &config.mappings_file {
        entries.extend(load_mappings_file(path)?);
    }

    Ok(entries
        .into_iter()
        .map(Mapping::from)
        .filter(|mapping| {
            let complete =
                !mapping.discord_channel_id.is_empty() && !mapping.revolt_channel_id.is_empty();
            if !complete {
                warn!(
                    "skipping declarative mapping with empty channel id discord={:?} revolt={:?}",
                    mapping.discord_channel_id, mapping.revolt_channel_id
                );
            }
            complete
        })
        .collect())
}

/// Like [`load_declarative_mappings`], but an unreadable mappings file leaves the bridge on
/// persisted mappings instead of refusing to start.
pub fn declarative_mappings_or_empty(config: &Config) -> Vec<Mapping> {
    match load_declarative_mappings(config) {
        Ok(mappings) => mappings,
        Err(err) => {
            warn!(
                "ignoring declarative mappings path={:?} error={}",
                config.mappings_file, err
            );
            Vec::new()
        }
    }
}
