//! Wire formats used by lockhub.
//!
//! - [`frame`], [`crc`], [`function`], [`codec`]: the binary relay bus
//!   spoken to the locker relay cards.
//! - [`fleet`]: the JSON messages exchanged between kiosk nodes and the
//!   fleet coordinator.

pub mod codec;
pub mod crc;
pub mod error;
pub mod fleet;
pub mod frame;
pub mod function;

pub use codec::RtuCodec;
pub use crc::crc16;
pub use error::{ProtocolError, Result};
pub use fleet::{
    CommandCompletion, CoordinatorCodec, CoordinatorMessage, FleetCodec, HeartbeatRequest,
    NodeCodec, NodeMessage, PollRequest, WireCommand,
};
pub use frame::{RequestFrame, ResponseFrame, frame_len};
pub use function::{ExceptionCode, FunctionCode};
