use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::ConnectOptions;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};

/// How long a writer waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Where the node database lives and how its pool is sized.
///
/// A kiosk keeps a single writer in practice, so the pool stays small.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub database_path: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// Connections older than this are recycled.
    pub max_lifetime: Duration,
    pub acquire_timeout: Duration,
    pub create_if_missing: bool,
    /// Apply pending migrations as part of [`Database::new`].
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::new("lockhub.db")
    }
}

impl DatabaseConfig {
    pub fn new(database_path: impl Into<String>) -> Self {
        Self {
            database_path: database_path.into(),
            max_connections: 8,
            min_connections: 1,
            max_lifetime: Duration::from_secs(30 * 60),
            acquire_timeout: Duration::from_secs(30),
            create_if_missing: true,
            auto_migrate: true,
        }
    }

    pub fn max_connections(self, max_connections: u32) -> Self {
        Self {
            max_connections,
            ..self
        }
    }

    pub fn min_connections(self, min_connections: u32) -> Self {
        Self {
            min_connections,
            ..self
        }
    }

    pub fn create_if_missing(self, create_if_missing: bool) -> Self {
        Self {
            create_if_missing,
            ..self
        }
    }

    pub fn auto_migrate(self, auto_migrate: bool) -> Self {
        Self {
            auto_migrate,
            ..self
        }
    }

    fn ensure_parent_dir(&self) -> StorageResult<()> {
        let Some(dir) = Path::new(&self.database_path).parent() else {
            return Ok(());
        };
        if dir.as_os_str().is_empty() || dir.exists() {
            return Ok(());
        }
        std::fs::create_dir_all(dir).map_err(|e| {
            StorageError::Configuration(format!("cannot create {}: {e}", dir.display()))
        })
    }

    /// WAL with normal sync: a power cut may lose the last commit but never
    /// corrupts the file.
    fn connect_options(&self) -> StorageResult<SqliteConnectOptions> {
        let url = format!("sqlite://{}", self.database_path);
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| StorageError::Configuration(format!("bad database path {url}: {e}")))?;
        Ok(options
            .create_if_missing(self.create_if_missing)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT)
            .disable_statement_logging())
    }
}

/// Shared handle to the node's SQLite pool. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open the database file, creating its directory when needed.
    ///
    /// ```no_run
    /// use lockhub_storage::{Database, DatabaseConfig};
    ///
    /// # async fn open() -> lockhub_storage::StorageResult<()> {
    /// let db = Database::new(DatabaseConfig::new("/var/lib/lockhub/node.db")).await?;
    /// db.health_check().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new(config: DatabaseConfig) -> StorageResult<Self> {
        config.ensure_parent_dir()?;

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .max_lifetime(Some(config.max_lifetime))
            .acquire_timeout(config.acquire_timeout)
            .connect_with(config.connect_options()?)
            .await?;
        let db = Self { pool };

        if config.auto_migrate {
            db.migrate().await?;
        }
        info!(path = %config.database_path, "Opened node database");
        Ok(db)
    }

    /// Migrated in-memory database on a single connection; a second
    /// connection would see its own empty schema.
    pub async fn in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    pub async fn migrate(&self) -> StorageResult<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        debug!("Schema up to date");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn health_check(&self) -> StorageResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_overrides_defaults() {
        let config = DatabaseConfig::new("node.db")
            .max_connections(4)
            .min_connections(0)
            .create_if_missing(false)
            .auto_migrate(false);

        assert_eq!(config.database_path, "node.db");
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.min_connections, 0);
        assert!(!config.create_if_missing);
        assert!(!config.auto_migrate);
        assert_eq!(DatabaseConfig::default().database_path, "lockhub.db");
    }

    #[tokio::test]
    async fn test_in_memory_database_has_schema() {
        let db = Database::in_memory().await.unwrap();
        db.health_check().await.unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM lockers")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_file_database_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("node.db");

        let db = Database::new(DatabaseConfig::new(path.to_string_lossy()))
            .await
            .unwrap();
        db.health_check().await.unwrap();
        db.close().await;
        assert!(path.exists());
    }
}
