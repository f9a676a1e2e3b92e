//! Error type of the kiosk node.
//!
//! Every client-facing (4xx-class) variant carries a [`TraceId`] that is
//! generated when the error is created and logged where it is surfaced.
//! [`NodeError::kind`] gives callers an exhaustive tag to match on and
//! [`NodeError::http_status`] the status the routing layer answers with.

use lockhub_core::{
    CommandPayloadError, ConfigValidationError, LockerId, StateTransitionError, TraceId,
    ZoneMappingError,
};
use lockhub_hardware::HardwareError;
use lockhub_storage::StorageError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, NodeError>;

/// Coarse classification of a [`NodeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConfigValidation,
    ZoneMapping,
    HardwareTimeout,
    HardwareFault,
    CommandPayload,
    StateTransition,
    NotFound,
    Storage,
    Internal,
}

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("{source} (trace {trace_id})")]
    ConfigValidation {
        #[source]
        source: ConfigValidationError,
        trace_id: TraceId,
    },

    #[error(transparent)]
    ZoneMapping(#[from] ZoneMappingError),

    #[error("{source} (trace {trace_id})")]
    StateTransition {
        #[source]
        source: StateTransitionError,
        trace_id: TraceId,
    },

    #[error("{source} (trace {trace_id})")]
    CommandPayload {
        #[source]
        source: CommandPayloadError,
        trace_id: TraceId,
    },

    #[error("Locker {locker_id} not found (trace {trace_id})")]
    LockerNotFound {
        locker_id: LockerId,
        trace_id: TraceId,
    },

    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Node settings that cannot be used (bad file, bad address, bad transport).
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl NodeError {
    pub fn locker_not_found(locker_id: LockerId) -> Self {
        Self::LockerNotFound {
            locker_id,
            trace_id: TraceId::generate(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigValidation { .. } => ErrorKind::ConfigValidation,
            Self::ZoneMapping(_) => ErrorKind::ZoneMapping,
            Self::StateTransition { .. } => ErrorKind::StateTransition,
            Self::CommandPayload { .. } => ErrorKind::CommandPayload,
            Self::LockerNotFound { .. } => ErrorKind::NotFound,
            Self::Hardware(e) if e.is_timeout() => ErrorKind::HardwareTimeout,
            Self::Hardware(_) => ErrorKind::HardwareFault,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Configuration(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::ZoneMapping(e) => e.http_status(),
            Self::ConfigValidation { .. } | Self::CommandPayload { .. } => 400,
            Self::LockerNotFound { .. } => 404,
            Self::StateTransition { .. } => 409,
            Self::Hardware(e) if e.is_timeout() => 504,
            Self::Hardware(_) => 502,
            Self::Storage(_) | Self::Configuration(_) | Self::Internal(_) => 500,
        }
    }

    /// Correlation id of a client-facing error; `None` for server-side faults.
    #[must_use]
    pub fn trace_id(&self) -> Option<TraceId> {
        match self {
            Self::ZoneMapping(e) => Some(e.trace_id()),
            Self::ConfigValidation { trace_id, .. }
            | Self::StateTransition { trace_id, .. }
            | Self::CommandPayload { trace_id, .. }
            | Self::LockerNotFound { trace_id, .. } => Some(*trace_id),
            Self::Hardware(_) | Self::Storage(_) | Self::Configuration(_) | Self::Internal(_) => {
                None
            }
        }
    }
}

impl From<ConfigValidationError> for NodeError {
    fn from(source: ConfigValidationError) -> Self {
        Self::ConfigValidation {
            source,
            trace_id: TraceId::generate(),
        }
    }
}

impl From<StateTransitionError> for NodeError {
    fn from(source: StateTransitionError) -> Self {
        Self::StateTransition {
            source,
            trace_id: TraceId::generate(),
        }
    }
}

impl From<CommandPayloadError> for NodeError {
    fn from(source: CommandPayloadError) -> Self {
        Self::CommandPayload {
            source,
            trace_id: TraceId::generate(),
        }
    }
}
