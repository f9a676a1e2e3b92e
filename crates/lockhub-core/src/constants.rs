//! Core constants shared by every lockhub crate.
//!
//! These values define relay bus limits, addressing defaults and the timing
//! defaults used when a configuration file leaves a setting out. Crates that
//! expose configuration structs build their `Default` impls from here so the
//! documented defaults live in one place.
//!
//! # Usage
//!
//! ```
//! use lockhub_core::constants::*;
//!
//! assert_eq!(DEFAULT_CHANNELS_PER_CARD, 16);
//! assert!(MAX_SLAVE_ID >= MIN_SLAVE_ID);
//! ```

// ============================================================================
// Relay bus addressing
// ============================================================================

/// Lowest unicast slave address on the relay bus.
pub const MIN_SLAVE_ID: u8 = 1;

/// Highest unicast slave address on the relay bus.
///
/// Addresses above 247 are reserved by the bus protocol.
pub const MAX_SLAVE_ID: u8 = 247;

/// Broadcast address. Slaves act on broadcast frames but never answer them.
pub const BROADCAST_SLAVE_ID: u8 = 0;

/// Relay channels per card when a configuration does not say otherwise.
pub const DEFAULT_CHANNELS_PER_CARD: u16 = 16;

/// Holding register where relay cards store their own slave address.
pub const SLAVE_ADDRESS_REGISTER: u16 = 0x4000;

// ============================================================================
// Locker lifecycle
// ============================================================================

/// Reservation time-to-live in seconds.
///
/// A reservation that is not confirmed within this window reverts to free.
pub const DEFAULT_RESERVATION_TTL_SECS: u64 = 90;

/// Interval between reservation expiry sweeps in seconds.
pub const DEFAULT_RESERVATION_SWEEP_SECS: u64 = 5;

/// Delay between successful opens of a bulk open, in milliseconds.
pub const DEFAULT_BULK_INTERVAL_MS: u64 = 1000;

/// Maximum length of a locker display name.
pub const MAX_DISPLAY_NAME_LENGTH: usize = 64;

// ============================================================================
// Hardware timing
// ============================================================================

/// How long a relay stays energized during an open, in milliseconds.
pub const DEFAULT_PULSE_MS: u64 = 400;

/// Minimum gap between two frames on the bus, in milliseconds.
///
/// Bounds the instantaneous current draw when many relays are driven in a row.
pub const DEFAULT_BURST_INTERVAL_MS: u64 = 300;

/// Per-frame response timeout, in milliseconds.
pub const DEFAULT_BUS_TIMEOUT_MS: u64 = 1000;

/// Serial baud rate used by the relay cards out of the box.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Retries for transient bus faults.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// First backoff delay after a transient fault, in milliseconds.
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 50;

/// Upper bound for the exponential backoff, in milliseconds.
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 1000;

/// Capacity of the bus work queue.
pub const DEFAULT_BUS_QUEUE_DEPTH: usize = 64;

// ============================================================================
// Fleet channel
// ============================================================================

/// Interval between heartbeats pushed by a kiosk node, in seconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 10;

/// Interval between command polls, in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;

/// Heartbeat silence after which the coordinator reports a node offline.
pub const DEFAULT_OFFLINE_THRESHOLD_SECS: u64 = 30;

/// Time a delivered command may stay without a result before it is failed.
pub const DEFAULT_RESULT_TIMEOUT_SECS: u64 = 120;

/// How long the coordinator keeps completed and failed commands, in seconds.
pub const DEFAULT_COMMAND_RETENTION_SECS: u64 = 3600;

/// Timeout for a single request/response exchange with the coordinator.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 3000;

/// First reconnect delay after the coordinator becomes unreachable.
pub const RECONNECT_BASE_SECS: u64 = 1;

/// Upper bound for the reconnect delay.
pub const RECONNECT_MAX_SECS: u64 = 30;

/// Default coordinator port.
pub const DEFAULT_COORDINATOR_PORT: u16 = 7400;

/// Maximum accepted length of a fleet frame, in bytes.
pub const MAX_FLEET_FRAME_SIZE: usize = 256 * 1024;

/// Maximum length of a kiosk identifier.
pub const MAX_KIOSK_ID_LENGTH: usize = 64;
