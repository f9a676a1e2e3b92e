#![allow(async_fn_in_trait)]

use chrono::{DateTime, Utc};
use lockhub_core::ZoneConfig;
use sqlx::SqlitePool;

use crate::error::StorageResult;
use crate::models::ZoneConfigRow;

/// Persistence of the active zone configuration.
///
/// Only validated configurations are handed to [`ZoneConfigRepository::save`];
/// the row is replaced as a whole, never patched.
pub trait ZoneConfigRepository: Send + Sync {
    async fn load(&self) -> StorageResult<Option<ZoneConfig>>;

    async fn save(&self, config: &ZoneConfig, now: DateTime<Utc>) -> StorageResult<()>;

    /// Hash of the stored configuration without decoding it.
    async fn stored_hash(&self) -> StorageResult<Option<String>>;
}

#[derive(Debug, Clone)]
pub struct SqliteZoneConfigRepository {
    pool: SqlitePool,
}

impl SqliteZoneConfigRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl ZoneConfigRepository for SqliteZoneConfigRepository {
    async fn load(&self) -> StorageResult<Option<ZoneConfig>> {
        let row = sqlx::query_as::<_, ZoneConfigRow>(
            "SELECT config_json, config_hash, updated_at FROM zone_config WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| row.config()).transpose()
    }

    async fn save(&self, config: &ZoneConfig, now: DateTime<Utc>) -> StorageResult<()> {
        let row = ZoneConfigRow::new(config, now)?;
        sqlx::query(
            r#"
            INSERT INTO zone_config (id, config_json, config_hash, updated_at)
            VALUES (1, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                config_json = excluded.config_json,
                config_hash = excluded.config_hash,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&row.config_json)
        .bind(&row.config_hash)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn stored_hash(&self) -> StorageResult<Option<String>> {
        let hash: Option<(String,)> =
            sqlx::query_as("SELECT config_hash FROM zone_config WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;
        Ok(hash.map(|(hash,)| hash))
    }
}
