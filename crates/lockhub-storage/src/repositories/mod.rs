pub mod locker;
pub mod zone_config;

pub use locker::{LockerRepository, SqliteLockerRepository};
pub use zone_config::{SqliteZoneConfigRepository, ZoneConfigRepository};
