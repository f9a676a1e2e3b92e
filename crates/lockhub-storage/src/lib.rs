//! SQLite persistence for kiosk nodes.
//!
//! A node keeps three things on disk:
//!
//! - `lockers`: the current record of every locker
//! - `locker_events`: the append-only transition log, written in the same
//!   transaction as the locker row it describes
//! - `zone_config`: the active zone configuration as one JSON row
//!
//! Access goes through repository traits ([`LockerRepository`],
//! [`ZoneConfigRepository`]) with SQLite implementations sharing one pool.
//!
//! # Example
//!
//! ```no_run
//! use lockhub_storage::{Database, DatabaseConfig, LockerRepository, SqliteLockerRepository};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(DatabaseConfig::new("lockhub.db")).await?;
//! let lockers = SqliteLockerRepository::new(db.pool().clone());
//!
//! lockers.ensure_range(48, chrono::Utc::now()).await?;
//! for locker in lockers.find_all().await? {
//!     println!("{} {}", locker.id, locker.status);
//! }
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod error;
pub mod models;
pub mod repositories;
pub mod transaction;

pub use connection::{Database, DatabaseConfig};
pub use error::{StorageError, StorageResult};
pub use repositories::{
    LockerRepository, SqliteLockerRepository, SqliteZoneConfigRepository, ZoneConfigRepository,
};
