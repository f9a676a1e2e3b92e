use thiserror::Error;

/// Errors raised while framing relay bus or fleet channel traffic.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("CRC mismatch: expected {expected:#06x}, got {actual:#06x}")]
    CrcMismatch { expected: u16, actual: u16 },

    #[error("Unexpected slave id: expected {expected}, got {actual}")]
    SlaveMismatch { expected: u8, actual: u8 },

    #[error("Unexpected function code: expected {expected:#04x}, got {actual:#04x}")]
    FunctionMismatch { expected: u8, actual: u8 },

    #[error("Unsupported function code: {0:#04x}")]
    UnsupportedFunction(u8),

    #[error("Response does not echo the request: {0}")]
    EchoMismatch(String),

    #[error("Invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Frame too large: {size} bytes (max {max_size})")]
    FrameTooLarge { size: usize, max_size: usize },

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns `true` for corruption that a retransmission can cure.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            ProtocolError::CrcMismatch { .. } | ProtocolError::InvalidLength { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
