//! Kiosk node of the locker fleet.
//!
//! A node owns one relay bus and the lockers wired to it. It keeps the
//! locker state machine ([`LockerStateManager`]), resolves locker ids to
//! relay addresses through the active zone configuration
//! ([`ZoneRegistry`]), and executes commands delivered by the fleet
//! coordinator ([`CommandHandlers`]).
//!
//! [`KioskNode`] wires these together from a [`Config`] and runs the
//! heartbeat, poll and reservation-sweep loops until cancelled.
//!
//! # Example
//!
//! ```no_run
//! use lockhub_node::{Config, KioskNode};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> lockhub_node::Result<()> {
//! let config = Config::load("/etc/lockhub/node.toml")?;
//! let node = KioskNode::start(&config).await?;
//!
//! let cancel = CancellationToken::new();
//! node.run(cancel).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod handlers;
pub mod lockers;
pub mod runtime;
pub mod zones;

pub use config::{BusSettings, Config, CoordinatorSettings, NodeSettings, TransportKind, ZoneSettings};
pub use context::{Clock, ManualClock, NodeContext, SystemClock};
pub use error::{ErrorKind, NodeError, Result};
pub use handlers::CommandHandlers;
pub use lockers::{
    BulkOpenOptions, BulkOpenReport, CardScanOutcome, FailedOpen, LockerSettings,
    LockerStateManager, OpenOutcome,
};
pub use runtime::{KioskNode, open_transport};
pub use zones::{AddressSource, FallbackPolicy, ResolvedAddress, ZoneHealth, ZoneRegistry};
