//! Relay bus access for kiosk nodes.
//!
//! Lockers are opened by pulsing a relay channel on one of the relay cards
//! chained on the node's RS-485 bus. This crate owns everything between a
//! [`HardwareAddress`](lockhub_core::HardwareAddress) and the wire:
//!
//! - [`traits::RelayTransport`]: moves one frame and its response
//! - [`devices::AnyRelayTransport`]: enum dispatch over serial, TCP gateway
//!   and mock transports
//! - [`bus::RelayBus`]: the single-consumer queue that serializes all bus
//!   traffic, paces frames and retries transient faults
//! - [`driver::RelayDriver`]: open pulses, relay reads and card maintenance
//!   (slave addressing, bus scan)
//! - [`mock`]: a simulated relay chain with scriptable faults
//!
//! # Example
//!
//! ```
//! use lockhub_core::HardwareAddress;
//! use lockhub_hardware::bus::{BusConfig, RelayBus};
//! use lockhub_hardware::devices::AnyRelayTransport;
//! use lockhub_hardware::driver::{DriverConfig, RelayDriver};
//! use lockhub_hardware::mock::MockRelayBoard;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (board, handle) = MockRelayBoard::new(&[1]);
//!     let (bus, worker) = RelayBus::spawn(AnyRelayTransport::Mock(board), BusConfig::default());
//!     let driver = RelayDriver::new(bus, DriverConfig::default());
//!
//!     driver.open(HardwareAddress::new(1, 3)?).await?;
//!     assert_eq!(handle.pulses(1, 2), 1);
//!
//!     worker.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod devices;
pub mod driver;
pub mod error;
pub mod mock;
pub mod retry;
pub mod serial;
pub mod tcp;
pub mod traits;

pub use bus::{BusConfig, BusHandle, PulseReport, PulseSequence, RelayBus};
pub use devices::AnyRelayTransport;
pub use driver::{DriverConfig, RelayDriver, WriteMode};
pub use error::{HardwareError, Result};
pub use retry::RetryPolicy;
pub use serial::{SerialConfig, SerialTransport};
pub use tcp::{TcpGatewayConfig, TcpTransport};
pub use traits::RelayTransport;
