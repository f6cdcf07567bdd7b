use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use std::sync::Arc;

use crate::db::schema_sqlite::channel_mappings;

use super::{DatabaseError, models::MappingRecord};

// SQLite keeps timestamps as RFC 3339 text
fn datetime_to_string(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn string_to_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Query(format!("invalid datetime format: {}", e)))
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = channel_mappings)]
struct DbChannelMapping {
    id: i32,
    discord_channel: String,
    revolt_channel: String,
    discord_channel_name: String,
    revolt_channel_name: String,
    allow_bots: bool,
    created_at: String,
    updated_at: String,
}

impl DbChannelMapping {
    fn to_record(&self) -> Result<MappingRecord, DatabaseError> {
        Ok(MappingRecord {
            id: self.id as i64,
            discord_channel: self.discord_channel.clone(),
            revolt_channel: self.revolt_channel.clone(),
            discord_channel_name: self.discord_channel_name.clone(),
            revolt_channel_name: self.revolt_channel_name.clone(),
            allow_bots: self.allow_bots,
            created_at: string_to_datetime(&self.created_at)?,
            updated_at: string_to_datetime(&self.updated_at)?,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = channel_mappings)]
struct NewChannelMapping<'a> {
    discord_channel: &'a str,
    revolt_channel: &'a str,
    discord_channel_name: &'a str,
    revolt_channel_name: &'a str,
    allow_bots: bool,
    created_at: String,
    updated_at: String,
}

#[derive(AsChangeset)]
#[diesel(table_name = channel_mappings)]
struct UpdateAllowBots {
    allow_bots: bool,
    updated_at: String,
}

fn establish_connection(path: &str) -> Result<SqliteConnection, DatabaseError> {
    SqliteConnection::establish(path).map_err(|e| DatabaseError::Connection(e.to_string()))
}

pub struct SqliteMappingStore {
    db_path: Arc<String>,
}

impl SqliteMappingStore {
    pub fn new(db_path: Arc<String>) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl super::MappingStore for SqliteMappingStore {
    async fn load_mappings(&self) -> Result<Vec<MappingRecord>, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema_sqlite::channel_mappings::dsl::*;
            let results = channel_mappings
                .order(id.asc())
                .select(DbChannelMapping::as_select())
                .load::<DbChannelMapping>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;
            results.iter().map(DbChannelMapping::to_record).collect()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn create_mapping(&self, record: &MappingRecord) -> Result<(), DatabaseError> {
        let record = record.clone();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let new_mapping = NewChannelMapping {
                discord_channel: &record.discord_channel,
                revolt_channel: &record.revolt_channel,
                discord_channel_name: &record.discord_channel_name,
                revolt_channel_name: &record.revolt_channel_name,
                allow_bots: record.allow_bots,
                created_at: datetime_to_string(&record.created_at),
                updated_at: datetime_to_string(&record.updated_at),
            };

            diesel::insert_into(channel_mappings::table)
                .values(&new_mapping)
                .execute(&mut conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn delete_mapping(&self, discord_channel: &str) -> Result<(), DatabaseError> {
        let discord_channel = discord_channel.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let deleted = diesel::delete(
                channel_mappings::table
                    .filter(channel_mappings::discord_channel.eq(&discord_channel)),
            )
            .execute(&mut conn)
            .map_err(|e| DatabaseError::Query(e.to_string()))?;
            if deleted == 0 {
                return Err(DatabaseError::NotFound(discord_channel));
            }
            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn set_allow_bots(
        &self,
        discord_channel: &str,
        allow_bots: bool,
    ) -> Result<(), DatabaseError> {
        let discord_channel = discord_channel.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let changes = UpdateAllowBots {
                allow_bots,
                updated_at: datetime_to_string(&Utc::now()),
            };
            let updated = diesel::update(
                channel_mappings::table
                    .filter(channel_mappings::discord_channel.eq(&discord_channel)),
            )
            .set(changes)
            .execute(&mut conn)
            .map_err(|e| DatabaseError::Query(e.to_string()))?;
            if updated == 0 {
                return Err(DatabaseError::NotFound(discord_channel));
            }
            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}
