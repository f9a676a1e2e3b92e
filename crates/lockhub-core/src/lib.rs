pub mod command;
pub mod constants;
pub mod error;
pub mod lifecycle;
pub mod types;
pub mod zones;

pub use command::CommandKind;
pub use error::{
    CommandPayloadError, ConfigValidationError, Error, Result, StateTransitionError,
    ZoneMappingError,
};
pub use lifecycle::{LockerEvent, TransitionRecord};
pub use types::*;
pub use zones::{Zone, ZoneConfig, ZoneRange};

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
