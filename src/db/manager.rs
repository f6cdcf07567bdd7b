use crate::config::{DatabaseConfig as ConfigDatabaseConfig, DbType as ConfigDbType};
use crate::db::{DatabaseError, MappingStore};
use std::sync::Arc;
use tracing::info;

#[cfg(feature = "postgres")]
use crate::db::postgres::PostgresMappingStore;
#[cfg(feature = "postgres")]
use diesel::RunQueryDsl;
#[cfg(feature = "postgres")]
use diesel::pg::PgConnection;
#[cfg(feature = "postgres")]
use diesel::r2d2::{self, ConnectionManager};

#[cfg(feature = "postgres")]
pub type Pool = r2d2::Pool<ConnectionManager<PgConnection>>;

#[cfg(feature = "sqlite")]
use crate::db::sqlite::SqliteMappingStore;
#[cfg(feature = "sqlite")]
use diesel::Connection;
#[cfg(feature = "sqlite")]
use diesel::sqlite::SqliteConnection;

#[derive(Clone)]
pub struct DatabaseManager {
    #[cfg(feature = "postgres")]
    postgres_pool: Option<Pool>,
    #[cfg(feature = "sqlite")]
    sqlite_path: Option<String>,
    mapping_store: Arc<dyn MappingStore>,
    db_type: DbType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DbType {
    Postgres,
    Sqlite,
}

impl From<ConfigDbType> for DbType {
    fn from(value: ConfigDbType) -> Self {
        match value {
            ConfigDbType::Postgres => DbType::Postgres,
            ConfigDbType::Sqlite => DbType::Sqlite,
        }
    }
}

impl DatabaseManager {
    pub async fn new(config: &ConfigDatabaseConfig) -> Result<Self, DatabaseError> {
        let db_type = DbType::from(config.db_type());

        match db_type {
            #[cfg(feature = "postgres")]
            DbType::Postgres => {
                let manager = ConnectionManager::<PgConnection>::new(config.connection_string());
                let pool = r2d2::Pool::builder()
                    .max_size(config.max_connections.unwrap_or(10))
                    .min_idle(Some(config.min_connections.unwrap_or(1)))
                    .build(manager)
                    .map_err(|e| DatabaseError::Connection(e.to_string()))?;

                info!("database backend=postgres");
                Ok(Self {
                    postgres_pool: Some(pool.clone()),
                    #[cfg(feature = "sqlite")]
                    sqlite_path: None,
                    mapping_store: Arc::new(PostgresMappingStore::new(pool)),
                    db_type,
                })
            }
            #[cfg(feature = "sqlite")]
            DbType::Sqlite => {
                let path = config.sqlite_path().ok_or_else(|| {
                    DatabaseError::Connection("sqlite path is not configured".to_string())
                })?;

                info!("database backend=sqlite path={}", path);
                Ok(Self {
                    #[cfg(feature = "postgres")]
                    postgres_pool: None,
                    mapping_store: Arc::new(SqliteMappingStore::new(Arc::new(path.clone()))),
                    sqlite_path: Some(path),
                    db_type,
                })
            }
            #[cfg(not(feature = "postgres"))]
            DbType::Postgres => Err(DatabaseError::Connection(
                "PostgreSQL feature not enabled".to_string(),
            )),
            #[cfg(not(feature = "sqlite"))]
            DbType::Sqlite => Err(DatabaseError::Connection(
                "SQLite feature not enabled".to_string(),
            )),
        }
    }

    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        match self.db_type {
            #[cfg(feature = "postgres")]
            DbType::Postgres => {
                let pool = self.postgres_pool.as_ref().ok_or_else(|| {
                    DatabaseError::Migration("postgres pool is not initialized".to_string())
                })?;
                Self::migrate_postgres(pool).await
            }
            #[cfg(feature = "sqlite")]
            DbType::Sqlite => {
                let path = self.sqlite_path.as_ref().ok_or_else(|| {
                    DatabaseError::Migration("sqlite path is not initialized".to_string())
                })?;
                Self::migrate_sqlite(path).await
            }
            #[cfg(not(feature = "postgres"))]
            DbType::Postgres => Err(DatabaseError::Migration(
                "PostgreSQL feature not enabled".to_string(),
            )),
            #[cfg(not(feature = "sqlite"))]
            DbType::Sqlite => Err(DatabaseError::Migration(
                "SQLite feature not enabled".to_string(),
            )),
        }
    }

    #[cfg(feature = "postgres")]
    async fn migrate_postgres(pool: &Pool) -> Result<(), DatabaseError> {
        let pool = pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| DatabaseError::Connection(e.to_string()))?;

            let statements = [
                r#"
                CREATE TABLE IF NOT EXISTS channel_mappings (
                    id BIGSERIAL PRIMARY KEY,
                    discord_channel TEXT NOT NULL UNIQUE,
                    revolt_channel TEXT NOT NULL UNIQUE,
                    discord_channel_name TEXT NOT NULL DEFAULT '',
                    revolt_channel_name TEXT NOT NULL DEFAULT '',
                    allow_bots BOOLEAN NOT NULL DEFAULT TRUE,
                    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
                )
                "#,
                "CREATE INDEX IF NOT EXISTS idx_channel_mappings_revolt ON channel_mappings(revolt_channel)",
            ];

            for statement in statements {
                diesel::sql_query(statement)
                    .execute(&mut conn)
                    .map_err(|e| DatabaseError::Migration(e.to_string()))?;
            }

            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Migration(format!("migration task failed: {e}")))?
    }

    #[cfg(feature = "sqlite")]
    async fn migrate_sqlite(path: &str) -> Result<(), DatabaseError> {
        use diesel::RunQueryDsl;

        let path = path.to_string();
        tokio::task::spawn_blocking(move || {
            let mut conn = SqliteConnection::establish(&path)
                .map_err(|e| DatabaseError::Connection(e.to_string()))?;

            let statements = [
                r#"
                CREATE TABLE IF NOT EXISTS channel_mappings (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    discord_channel TEXT NOT NULL UNIQUE,
                    revolt_channel TEXT NOT NULL UNIQUE,
                    discord_channel_name TEXT NOT NULL DEFAULT '',
                    revolt_channel_name TEXT NOT NULL DEFAULT '',
                    allow_bots BOOLEAN NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                )
                "#,
                "CREATE INDEX IF NOT EXISTS idx_channel_mappings_revolt ON channel_mappings(revolt_channel)",
            ];

            for statement in statements {
                diesel::sql_query(statement)
                    .execute(&mut conn)
                    .map_err(|e| DatabaseError::Migration(e.to_string()))?;
            }

            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Migration(format!("migration task failed: {e}")))?
    }

    pub fn mapping_store(&self) -> Arc<dyn MappingStore> {
        self.mapping_store.clone()
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use chrono::Utc;
    use tempfile::NamedTempFile;

    use super::DatabaseManager;
    use crate::config::DatabaseConfig;
    use crate::db::{DatabaseError, MappingRecord};

    fn record(discord: &str, revolt: &str) -> MappingRecord {
        let now = Utc::now();
        MappingRecord {
            id: 0,
            discord_channel: discord.to_string(),
            revolt_channel: revolt.to_string(),
            discord_channel_name: "general".to_string(),
            revolt_channel_name: "lounge".to_string(),
            allow_bots: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn sqlite_channel_mapping_roundtrip() {
        let file = NamedTempFile::new().expect("temp sqlite file");
        let db_path = file.path().to_string_lossy().to_string();

        let config = DatabaseConfig {
            url: None,
            filename: Some(db_path),
            max_connections: None,
            min_connections: None,
        };

        let manager = DatabaseManager::new(&config).await.expect("db manager");
        manager.migrate().await.expect("migrate");

        let store = manager.mapping_store();
        store
            .create_mapping(&record("100", "01HREVOLT"))
            .await
            .expect("insert mapping");
        store
            .set_allow_bots("100", false)
            .await
            .expect("toggle bots");

        let manager_reopened = DatabaseManager::new(&config).await.expect("db manager reopened");
        manager_reopened.migrate().await.expect("migrate reopened");

        let loaded = manager_reopened
            .mapping_store()
            .load_mappings()
            .await
            .expect("load after reopen");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].revolt_channel, "01HREVOLT");
        assert!(!loaded[0].allow_bots);

        manager_reopened
            .mapping_store()
            .delete_mapping("100")
            .await
            .expect("delete mapping");
        let after_delete = manager_reopened
            .mapping_store()
            .load_mappings()
            .await
            .expect("load after delete");
        assert!(after_delete.is_empty());
    }

    #[tokio::test]
    async fn sqlite_rejects_duplicate_channels_and_missing_rows() {
        let file = NamedTempFile::new().expect("temp sqlite file");
        let config = DatabaseConfig {
            url: None,
            filename: Some(file.path().to_string_lossy().to_string()),
            max_connections: None,
            min_connections: None,
        };
        let manager = DatabaseManager::new(&config).await.expect("db manager");
        manager.migrate().await.expect("migrate");
        let store = manager.mapping_store();

        store
            .create_mapping(&record("100", "01HA"))
            .await
            .expect("first insert");
        let duplicate = store.create_mapping(&record("100", "01HB")).await;
        assert!(matches!(duplicate, Err(DatabaseError::Query(_))));

        let missing = store.delete_mapping("999").await;
        assert!(matches!(missing, Err(DatabaseError::NotFound(_))));
    }
}
