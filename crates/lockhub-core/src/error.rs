use crate::lifecycle::LockerEvent;
use crate::types::{LockerId, LockerStatus, TraceId};
use thiserror::Error;

/// Reasons a zone configuration is rejected.
///
/// Validation is all-or-nothing: a single variant returned from
/// [`validate`](crate::zones::validate) rejects the whole configuration and
/// the caller keeps the configuration that was active before.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigValidationError {
    #[error("Zone id must not be empty")]
    EmptyZoneId,

    #[error("Duplicate zone id: {id}")]
    DuplicateZoneId { id: String },

    #[error("Zone '{zone}' has invalid range {start}-{end}")]
    InvalidRange { zone: String, start: u32, end: u32 },

    #[error("Zone '{zone}' range ends at {end}, beyond the total locker count {total}")]
    ExceedsCapacity { zone: String, end: u32, total: u32 },

    #[error("Zone '{zone}' has self-overlapping ranges starting at {first} and {second}")]
    SelfOverlap { zone: String, first: u32, second: u32 },

    #[error("Zones '{first}' and '{second}' overlap at locker {at}")]
    Overlap {
        first: String,
        second: String,
        at: u32,
    },

    #[error("Channels per card must be greater than zero")]
    ZeroChannelsPerCard,

    #[error("Zone '{zone}' uses invalid relay slave id {slave_id}")]
    InvalidRelayCard { zone: String, slave_id: u32 },

    #[error("Relay slave id {slave_id} is shared by zones '{first}' and '{second}'")]
    SharedRelayCard {
        slave_id: u8,
        first: String,
        second: String,
    },

    #[error("Zone '{zone}' needs {required} relay cards but lists {configured}")]
    InsufficientRelayCards {
        zone: String,
        required: u32,
        configured: u32,
    },
}

/// A locker or zone could not be mapped for an external request.
///
/// Every variant carries the trace id that is logged alongside it, so a
/// 4xx answer can be correlated with the node logs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ZoneMappingError {
    #[error("Unknown zone '{zone}' (trace {trace_id})")]
    UnknownZone { zone: String, trace_id: TraceId },

    #[error("Locker {locker_id} is outside all enabled zones (trace {trace_id})")]
    OutsideZones {
        locker_id: LockerId,
        trace_id: TraceId,
    },

    #[error("Locker {locker_id} has no hardware address: {reason} (trace {trace_id})")]
    Unmappable {
        locker_id: LockerId,
        reason: String,
        trace_id: TraceId,
    },
}

impl ZoneMappingError {
    pub fn unknown_zone(zone: impl Into<String>) -> Self {
        Self::UnknownZone {
            zone: zone.into(),
            trace_id: TraceId::generate(),
        }
    }

    pub fn outside_zones(locker_id: LockerId) -> Self {
        Self::OutsideZones {
            locker_id,
            trace_id: TraceId::generate(),
        }
    }

    pub fn unmappable(locker_id: LockerId, reason: impl Into<String>) -> Self {
        Self::Unmappable {
            locker_id,
            reason: reason.into(),
            trace_id: TraceId::generate(),
        }
    }

    #[must_use]
    pub fn trace_id(&self) -> TraceId {
        match self {
            Self::UnknownZone { trace_id, .. }
            | Self::OutsideZones { trace_id, .. }
            | Self::Unmappable { trace_id, .. } => *trace_id,
        }
    }

    /// HTTP status the routing layer answers with.
    ///
    /// An unknown zone is a bad request; a known locker that cannot be
    /// placed on the hardware is unprocessable.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::UnknownZone { .. } => 400,
            Self::OutsideZones { .. } | Self::Unmappable { .. } => 422,
        }
    }
}

/// An event was rejected by the locker lifecycle. The locker is unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateTransitionError {
    #[error("Locker {locker_id} cannot {event} while {state}")]
    InvalidEvent {
        locker_id: LockerId,
        state: LockerStatus,
        event: LockerEvent,
    },

    #[error("Locker {locker_id} is held by another owner")]
    OwnerMismatch { locker_id: LockerId },

    #[error("Reservation of locker {locker_id} has expired")]
    ReservationExpired { locker_id: LockerId },

    #[error("Locker {locker_id} already has a transition in progress")]
    TransitionPending { locker_id: LockerId },

    #[error("Owner already holds locker {held}")]
    OwnerHoldsLocker { held: LockerId },
}

impl StateTransitionError {
    #[must_use]
    pub fn locker_id(&self) -> Option<LockerId> {
        match self {
            Self::InvalidEvent { locker_id, .. }
            | Self::OwnerMismatch { locker_id }
            | Self::ReservationExpired { locker_id }
            | Self::TransitionPending { locker_id } => Some(*locker_id),
            Self::OwnerHoldsLocker { .. } => None,
        }
    }
}

/// A command payload is missing a required field or carries an invalid one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandPayloadError {
    #[error("Unknown command type: {0}")]
    UnknownType(String),

    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl CommandPayloadError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    ConfigValidation(#[from] ConfigValidationError),

    #[error(transparent)]
    ZoneMapping(#[from] ZoneMappingError),

    #[error(transparent)]
    StateTransition(#[from] StateTransitionError),

    #[error(transparent)]
    CommandPayload(#[from] CommandPayloadError),

    #[error("Locker {0} not found")]
    LockerNotFound(LockerId),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
}

pub type Result<T> = std::result::Result<T, Error>;
