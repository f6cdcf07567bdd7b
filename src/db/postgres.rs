use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;

use crate::db::manager::Pool;
use crate::db::schema::channel_mappings;

use super::{DatabaseError, models::MappingRecord};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = channel_mappings)]
struct DbChannelMapping {
    id: i64,
    discord_channel: String,
    revolt_channel: String,
    discord_channel_name: String,
    revolt_channel_name: String,
    allow_bots: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<DbChannelMapping> for MappingRecord {
    fn from(value: DbChannelMapping) -> Self {
        Self {
            id: value.id,
            discord_channel: value.discord_channel,
            revolt_channel: value.revolt_channel,
            discord_channel_name: value.discord_channel_name,
            revolt_channel_name: value.revolt_channel_name,
            allow_bots: value.allow_bots,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
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
    created_at: &'a DateTime<Utc>,
    updated_at: &'a DateTime<Utc>,
}

async fn with_connection<T, F>(pool: Pool, operation: F) -> Result<T, DatabaseError>
where
    T: Send + 'static,
    F: FnOnce(&mut PgConnection) -> Result<T, DatabaseError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;
        operation(&mut conn)
    })
    .await
    .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
}

pub struct PostgresMappingStore {
    pool: Pool,
}

impl PostgresMappingStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl super::MappingStore for PostgresMappingStore {
    async fn load_mappings(&self) -> Result<Vec<MappingRecord>, DatabaseError> {
        let pool = self.pool.clone();
        with_connection(pool, move |conn| {
            use crate::db::schema::channel_mappings::dsl::*;
            channel_mappings
                .order(id.asc())
                .select(DbChannelMapping::as_select())
                .load::<DbChannelMapping>(conn)
                .map(|rows| rows.into_iter().map(Into::into).collect())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn create_mapping(&self, record: &MappingRecord) -> Result<(), DatabaseError> {
        let pool = self.pool.clone();
        let record = record.clone();
        with_connection(pool, move |conn| {
            let new_mapping = NewChannelMapping {
                discord_channel: &record.discord_channel,
                revolt_channel: &record.revolt_channel,
                discord_channel_name: &record.discord_channel_name,
                revolt_channel_name: &record.revolt_channel_name,
                allow_bots: record.allow_bots,
                created_at: &record.created_at,
                updated_at: &record.updated_at,
            };
            diesel::insert_into(channel_mappings::table)
                .values(&new_mapping)
                .execute(conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn delete_mapping(&self, discord_channel: &str) -> Result<(), DatabaseError> {
        let pool = self.pool.clone();
        let discord_channel = discord_channel.to_string();
        with_connection(pool, move |conn| {
            let deleted = diesel::delete(
                channel_mappings::table
                    .filter(channel_mappings::discord_channel.eq(&discord_channel)),
            )
            .execute(conn)
            .map_err(|e| DatabaseError::Query(e.to_string()))?;
            if deleted == 0 {
                return Err(DatabaseError::NotFound(discord_channel));
            }
            Ok(())
        })
        .await
    }

    async fn set_allow_bots(
        &self,
        discord_channel: &str,
        allow_bots: bool,
    ) -> Result<(), DatabaseError> {
        let pool = self.pool.clone();
        let discord_channel = discord_channel.to_string();
        with_connection(pool, move |conn| {
            let updated = diesel::update(
                channel_mappings::table
                    .filter(channel_mappings::discord_channel.eq(&discord_channel)),
            )
            .set((
                channel_mappings::allow_bots.eq(allow_bots),
                channel_mappings::updated_at.eq(Utc::now()),
            ))
            .execute(conn)
            .map_err(|e| DatabaseError::Query(e.to_string()))?;
            if updated == 0 {
                return Err(DatabaseError::NotFound(discord_channel));
            }
            Ok(())
        })
        .await
    }
}
