use std::net::SocketAddr;

use lockhub_core::{CommandId, KioskId, TraceId};
use lockhub_protocol::ProtocolError;
use thiserror::Error;

/// Errors raised by [`crate::FleetClient`].
#[derive(Debug, Error)]
pub enum FleetClientError {
    #[error("Not connected to coordinator")]
    NotConnected,

    #[error("Connection timeout after {0}ms")]
    ConnectionTimeout(u64),

    #[error("Read timeout after {0}ms")]
    ReadTimeout(u64),

    #[error("Write timeout after {0}ms")]
    WriteTimeout(u64),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The coordinator answered with an `error` document.
    #[error("Coordinator rejected request (trace {trace_id}): {message}")]
    Rejected { message: String, trace_id: TraceId },

    /// The coordinator answered with a document of the wrong kind.
    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FleetClientError {
    /// Returns `true` if the connection should be dropped and re-established.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        !matches!(self, FleetClientError::Rejected { .. })
    }
}

/// Errors raised by [`crate::FleetServer`].
#[derive(Debug, Error)]
pub enum FleetServerError {
    #[error("Failed to bind to {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(String),
}

/// Rejections raised by [`crate::CommandQueue::complete`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("Unknown command {0}")]
    UnknownCommand(CommandId),

    #[error("Command {0} has not been delivered")]
    NotDelivered(CommandId),

    #[error("Command {command_id} was not delivered to {kiosk_id}")]
    WrongNode {
        command_id: CommandId,
        kiosk_id: KioskId,
    },
}
