//! Error types for relay bus operations.
//!
//! Errors are split by what a retry can achieve. [`HardwareError::is_transient`]
//! marks the faults the bus worker retries with backoff: response timeouts,
//! corrupted frames and the busy/acknowledge exception codes. Everything
//! else is permanent and surfaces to the caller on the first attempt.

use lockhub_protocol::{ExceptionCode, ProtocolError};

/// Result type alias for hardware operations.
pub type Result<T> = std::result::Result<T, HardwareError>;

/// Errors that can occur while talking to the relay cards.
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    /// No response arrived within the per-frame timeout.
    #[error("Slave {slave_id} did not respond within {duration_ms}ms")]
    Timeout { slave_id: u8, duration_ms: u64 },

    /// A response arrived but failed its checksum or length check.
    #[error("Corrupted response from slave {slave_id}: {source}")]
    Corrupted {
        slave_id: u8,
        #[source]
        source: ProtocolError,
    },

    /// The slave answered with an exception response.
    #[error("Slave {slave_id} rejected function {function:#04x}: {code}")]
    Exception {
        slave_id: u8,
        function: u8,
        code: ExceptionCode,
    },

    /// The response was well-formed but does not answer the request.
    #[error("Unexpected response from slave {slave_id}: {source}")]
    UnexpectedResponse {
        slave_id: u8,
        #[source]
        source: ProtocolError,
    },

    /// A transient fault persisted through every retry.
    #[error("Slave {slave_id} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        slave_id: u8,
        attempts: u32,
        last: Box<HardwareError>,
    },

    /// Read-back after an open shows the relay still energized.
    #[error("Relay slave {slave_id} coil {coil} reads {value} after release")]
    ReadbackMismatch { slave_id: u8, coil: u16, value: u16 },

    /// The transport lost its connection to the bus.
    #[error("Bus disconnected: {device}")]
    Disconnected { device: String },

    /// The bus worker has stopped and accepts no more work.
    #[error("Relay bus is shut down")]
    BusClosed,

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HardwareError {
    pub fn timeout(slave_id: u8, duration_ms: u64) -> Self {
        Self::Timeout {
            slave_id,
            duration_ms,
        }
    }

    pub fn disconnected(device: impl Into<String>) -> Self {
        Self::Disconnected {
            device: device.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Classify a framing error raised while reading from `slave_id`.
    #[must_use]
    pub fn from_protocol(slave_id: u8, source: ProtocolError) -> Self {
        if source.is_corruption() {
            Self::Corrupted { slave_id, source }
        } else {
            Self::UnexpectedResponse { slave_id, source }
        }
    }

    /// Returns `true` if the same frame may succeed when sent again.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Corrupted { .. } => true,
            Self::Exception { code, .. } => code.is_transient(),
            _ => false,
        }
    }

    /// Returns `true` if the failure was the slave staying silent.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::RetriesExhausted { last, .. } => last.is_timeout(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(HardwareError::timeout(1, 1000), true)]
    #[case(HardwareError::from_protocol(1, ProtocolError::CrcMismatch { expected: 1, actual: 2 }), true)]
    #[case(HardwareError::Exception { slave_id: 1, function: 6, code: ExceptionCode::SlaveDeviceBusy }, true)]
    #[case(HardwareError::Exception { slave_id: 1, function: 6, code: ExceptionCode::Acknowledge }, true)]
    #[case(HardwareError::Exception { slave_id: 1, function: 6, code: ExceptionCode::IllegalDataAddress }, false)]
    #[case(HardwareError::from_protocol(1, ProtocolError::SlaveMismatch { expected: 1, actual: 2 }), false)]
    #[case(HardwareError::BusClosed, false)]
    fn test_transient_classification(#[case] error: HardwareError, #[case] transient: bool) {
        assert_eq!(error.is_transient(), transient);
    }

    #[test]
    fn test_exhausted_timeout_is_timeout() {
        let error = HardwareError::RetriesExhausted {
            slave_id: 3,
            attempts: 4,
            last: Box::new(HardwareError::timeout(3, 1000)),
        };
        assert!(error.is_timeout());
        assert!(!error.is_transient());
        assert!(error.to_string().contains("after 4 attempts"));
    }
}
