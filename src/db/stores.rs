use async_trait::async_trait;

use super::DatabaseError;
use super::models::MappingRecord;

#[async_trait]
pub trait MappingStore: Send + Sync {
    async fn load_mappings(&self) -> Result<Vec<MappingRecord>, DatabaseError>;
    async fn create_mapping(&self, record: &MappingRecord) -> Result<(), DatabaseError>;
    /// Removes the mapping whose Discord side is `discord_channel`.
    async fn delete_mapping(&self, discord_channel: &str) -> Result<(), DatabaseError>;
    async fn set_allow_bots(
        &self,
        discord_channel: &str,
        allow_bots: bool,
    ) -> Result<(), DatabaseError>;
}
