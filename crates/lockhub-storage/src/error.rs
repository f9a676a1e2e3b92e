use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite: {0}")]
    Database(#[from] sqlx::Error),

    #[error("schema migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("no {entity} with key {key}")]
    NotFound { entity: &'static str, key: String },

    /// A stored row no longer parses into a domain value.
    #[error("bad row in {table}: {reason}")]
    InvalidRecord { table: &'static str, reason: String },

    #[error("json column: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage setup: {0}")]
    Configuration(String),
}

impl StorageError {
    pub fn invalid_record(table: &'static str, reason: impl ToString) -> Self {
        Self::InvalidRecord {
            table,
            reason: reason.to_string(),
        }
    }

    pub fn locker_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            entity: "locker",
            key: id.to_string(),
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
