//! Simulated relay hardware for tests and bench setups.
//!
//! The mock board answers frames the way a chain of relay cards on one
//! RS-485 bus would, and lets tests script faults through a handle.

pub mod relay_board;

pub use relay_board::{MockFault, MockRelayBoard, MockRelayHandle};
