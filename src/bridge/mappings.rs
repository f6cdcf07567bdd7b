use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::ConfigError;
use crate::db::{DatabaseError, MappingRecord, MappingStore};
use crate::platform::Platform;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    pub discord_channel_id: String,
    pub revolt_channel_id: String,
    pub discord_channel_name: String,
    pub revolt_channel_name: String,
    pub allow_bot_authored_relay: bool,
}

impl Mapping {
    pub fn channel_on(&self, platform: Platform) -> &str {
        match platform {
            Platform::Discord => &self.discord_channel_id,
            Platform::Revolt => &self.revolt_channel_id,
        }
    }

    pub fn name_on(&self, platform: Platform) -> &str {
        let name = match platform {
            Platform::Discord => &self.discord_channel_name,
            Platform::Revolt => &self.revolt_channel_name,
        };
        if name.is_empty() {
            self.channel_on(platform)
        } else {
            name
        }
    }
}

impl From<&MappingRecord> for Mapping {
    fn from(record: &MappingRecord) -> Self {
        Self {
            discord_channel_id: record.discord_channel.clone(),
            revolt_channel_id: record.revolt_channel.clone(),
            discord_channel_name: record.discord_channel_name.clone(),
            revolt_channel_name: record.revolt_channel_name.clone(),
            allow_bot_authored_relay: record.allow_bots,
        }
    }
}

impl From<&Mapping> for MappingRecord {
    fn from(mapping: &Mapping) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            discord_channel: mapping.discord_channel_id.clone(),
            revolt_channel: mapping.revolt_channel_id.clone(),
            discord_channel_name: mapping.discord_channel_name.clone(),
            revolt_channel_name: mapping.revolt_channel_name.clone(),
            allow_bots: mapping.allow_bot_authored_relay,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingSource {
    Declarative,
    Persisted,
}

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("{platform} channel {channel_id} is already mapped")]
    AlreadyMapped {
        platform: Platform,
        channel_id: String,
    },
    #[error("{platform} channel {channel_id} is not mapped")]
    NotMapped {
        platform: Platform,
        channel_id: String,
    },
    #[error("mappings come from the configuration file and cannot be changed at runtime")]
    ReadOnly,
    #[error(transparent)]
    Store(#[from] DatabaseError),
}

#[derive(Debug, Default)]
struct MappingIndex {
    mappings: Vec<Mapping>,
    by_discord: HashMap<String, usize>,
    by_revolt: HashMap<String, usize>,
}

impl MappingIndex {
    /// Builds an index, skipping any mapping whose channel is already taken.
    fn build(mappings: Vec<Mapping>) -> (Self, Vec<MappingError>) {
        let mut index = Self::default();
        let mut rejected = Vec::new();
        for mapping in mappings {
            if let Err(err) = index.push(mapping) {
                rejected.push(err);
            }
        }
        (index, rejected)
    }

    fn push(&mut self, mapping: Mapping) -> Result<(), MappingError> {
        for platform in [Platform::Discord, Platform::Revolt] {
            let channel_id = mapping.channel_on(platform);
            if self.position(platform, channel_id).is_some() {
                return Err(MappingError::AlreadyMapped {
                    platform,
                    channel_id: channel_id.to_string(),
                });
            }
        }

        let slot = self.mappings.len();
        self.by_discord
            .insert(mapping.discord_channel_id.clone(), slot);
        self.by_revolt.insert(mapping.revolt_channel_id.clone(), slot);
        self.mappings.push(mapping);
        Ok(())
    }

    fn position(&self, platform: Platform, channel_id: &str) -> Option<usize> {
        match platform {
            Platform::Discord => self.by_discord.get(channel_id).copied(),
            Platform::Revolt => self.by_revolt.get(channel_id).copied(),
        }
    }

    fn get(&self, platform: Platform, channel_id: &str) -> Option<&Mapping> {
        self.position(platform, channel_id)
            .and_then(|slot| self.mappings.get(slot))
    }
}

/// Channel pairs indexed per platform. Readers take an `Arc` snapshot; writers swap in a rebuilt index.
pub struct MappingRegistry {
    source: MappingSource,
    index: RwLock<Arc<MappingIndex>>,
}

impl MappingRegistry {
    pub fn new(source: MappingSource, mappings: Vec<Mapping>) -> Self {
        let (index, rejected) = MappingIndex::build(mappings);
        for err in rejected {
            warn!("skipping duplicate mapping: {err}");
        }
        Self {
            source,
            index: RwLock::new(Arc::new(index)),
        }
    }

    /// A non-empty declarative list wins over the persisted store.
    pub async fn load(
        declarative: Vec<Mapping>,
        store: &dyn MappingStore,
    ) -> Result<Self, ConfigError> {
        if !declarative.is_empty() {
            let registry = Self::new(MappingSource::Declarative, declarative);
            info!(
                "loaded mappings source=declarative count={}",
                registry.len()
            );
            return Ok(registry);
        }

        let persisted = match store.load_mappings().await {
            Ok(records) => records.iter().map(Mapping::from).collect::<Vec<_>>(),
            Err(err) => {
                warn!("failed to read persisted mappings: {err}");
                Vec::new()
            }
        };

        if persisted.is_empty() {
            return Err(ConfigError::NoMappings);
        }

        let registry = Self::new(MappingSource::Persisted, persisted);
        info!("loaded mappings source=persisted count={}", registry.len());
        Ok(registry)
    }

    pub fn source(&self) -> MappingSource {
        self.source
    }

    fn snapshot(&self) -> Arc<MappingIndex> {
        self.index.read().clone()
    }

    pub fn find_by_source_channel(&self, platform: Platform, channel_id: &str) -> Option<Mapping> {
        self.snapshot().get(platform, channel_id).cloned()
    }

    pub fn all(&self) -> Vec<Mapping> {
        self.snapshot().mappings.clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot().mappings.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_writable(&self) -> Result<(), MappingError> {
        match self.source {
            MappingSource::Declarative => Err(MappingError::ReadOnly),
            MappingSource::Persisted => Ok(()),
        }
    }

    /// Rebuilds the index from the current mappings transformed by `edit`, then swaps it in.
    fn rewrite<T, F>(&self, edit: F) -> Result<T, MappingError>
    where
        F: FnOnce(&mut Vec<Mapping>) -> Result<T, MappingError>,
    {
        let mut guard = self.index.write();
        let mut mappings = guard.mappings.clone();
        let value = edit(&mut mappings)?;

        let mut index = MappingIndex::default();
        for mapping in mappings {
            index.push(mapping)?;
        }
        *guard = Arc::new(index);
        Ok(value)
    }

    pub fn insert(&self, mapping: Mapping) -> Result<(), MappingError> {
        self.ensure_writable()?;
        self.rewrite(|mappings| {
            mappings.push(mapping);
            Ok(())
        })
    }

    pub fn remove(&self, platform: Platform, channel_id: &str) -> Result<Mapping, MappingError> {
        self.ensure_writable()?;
        self.rewrite(|mappings| {
            let slot = mappings
                .iter()
                .position(|mapping| mapping.channel_on(platform) == channel_id)
                .ok_or_else(|| MappingError::NotMapped {
                    platform,
                    channel_id: channel_id.to_string(),
                })?;
            Ok(mappings.remove(slot))
        })
    }

    pub fn set_allow_bots(
        &self,
        platform: Platform,
        channel_id: &str,
        allow: bool,
    ) -> Result<Mapping, MappingError> {
        self.ensure_writable()?;
        self.rewrite(|mappings| {
            let mapping = mappings
                .iter_mut()
                .find(|mapping| mapping.channel_on(platform) == channel_id)
                .ok_or_else(|| MappingError::NotMapped {
                    platform,
                    channel_id: channel_id.to_string(),
                })?;
            mapping.allow_bot_authored_relay = allow;
            Ok(mapping.clone())
        })
    }
}

/// Registry mutations that also persist to the store, used by the mutating commands.
pub struct MappingAdmin {
    registry: Arc<MappingRegistry>,
    store: Option<Arc<dyn MappingStore>>,
}

impl MappingAdmin {
    pub fn new(registry: Arc<MappingRegistry>, store: Option<Arc<dyn MappingStore>>) -> Self {
        Self { registry, store }
    }

    pub fn registry(&self) -> &MappingRegistry {
        &self.registry
    }

    pub async fn connect(&self, mapping: Mapping) -> Result<(), MappingError> {
        self.registry.insert(mapping.clone())?;
        if let Some(store) = &self.store {
            if let Err(err) = store.create_mapping(&MappingRecord::from(&mapping)).await {
                // roll back the in-memory insert
                let _ = self
                    .registry
                    .remove(Platform::Discord, &mapping.discord_channel_id);
                return Err(err.into());
            }
        }
        info!(
            "mapping created discord_channel={} revolt_channel={}",
            mapping.discord_channel_id, mapping.revolt_channel_id
        );
        Ok(())
    }

    pub async fn disconnect(
        &self,
        platform: Platform,
        channel_id: &str,
    ) -> Result<Mapping, MappingError> {
        self.registry.ensure_writable()?;
        let mapping = self
            .registry
            .find_by_source_channel(platform, channel_id)
            .ok_or_else(|| MappingError::NotMapped {
                platform,
                channel_id: channel_id.to_string(),
            })?;
        if let Some(store) = &self.store {
            match store.delete_mapping(&mapping.discord_channel_id).await {
                Ok(()) | Err(DatabaseError::NotFound(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }
        let removed = self.registry.remove(platform, channel_id)?;
        info!(
            "mapping removed discord_channel={} revolt_channel={}",
            removed.discord_channel_id, removed.revolt_channel_id
        );
        Ok(removed)
    }

    /// Flips bot relay for the mapping containing `channel_id`, returning the updated mapping.
    pub async fn toggle_bots(
        &self,
        platform: Platform,
        channel_id: &str,
    ) -> Result<Mapping, MappingError> {
        self.registry.ensure_writable()?;
        let current = self
            .registry
            .find_by_source_channel(platform, channel_id)
            .ok_or_else(|| MappingError::NotMapped {
                platform,
                channel_id: channel_id.to_string(),
            })?;
        let allow = !current.allow_bot_authored_relay;
        if let Some(store) = &self.store {
            store
                .set_allow_bots(&current.discord_channel_id, allow)
                .await?;
        }
        self.registry.set_allow_bots(platform, channel_id, allow)
    }
}
