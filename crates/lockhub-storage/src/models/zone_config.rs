use chrono::{DateTime, Utc};
use lockhub_core::ZoneConfig;

use crate::error::StorageResult;

/// The single row of the `zone_config` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ZoneConfigRow {
    pub config_json: String,
    pub config_hash: String,
    pub updated_at: DateTime<Utc>,
}

impl ZoneConfigRow {
    pub fn new(config: &ZoneConfig, now: DateTime<Utc>) -> StorageResult<Self> {
        Ok(Self {
            config_json: serde_json::to_string(config)?,
            config_hash: config.hash(),
            updated_at: now,
        })
    }

    pub fn config(&self) -> StorageResult<ZoneConfig> {
        Ok(serde_json::from_str(&self.config_json)?)
    }
}
