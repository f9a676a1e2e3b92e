pub mod locker;
pub mod zone_config;

pub use locker::{LockerEventRow, LockerRow};
pub use zone_config::ZoneConfigRow;
