//! Enum dispatch over the concrete relay transports.
//!
//! `async fn` in traits is not object safe, so the bus worker owns an
//! [`AnyRelayTransport`] instead of a `Box<dyn RelayTransport>`. The enum
//! keeps the worker future `Send` without boxing every call.
//!
//! # Examples
//!
//! ```
//! use lockhub_hardware::devices::AnyRelayTransport;
//! use lockhub_hardware::mock::MockRelayBoard;
//!
//! let (board, _handle) = MockRelayBoard::new(&[1, 2]);
//! let transport = AnyRelayTransport::Mock(board);
//! ```

use std::time::Duration;

use lockhub_protocol::{RequestFrame, ResponseFrame};

use crate::error::{HardwareError, Result};
use crate::mock::MockRelayBoard;
use crate::serial::SerialTransport;
use crate::tcp::TcpTransport;
use crate::traits::RelayTransport;

#[derive(Debug)]
#[non_exhaustive]
pub enum AnyRelayTransport {
    /// RS-485 adapter on a local serial port.
    Serial(SerialTransport),
    /// RTU frames tunnelled through a TCP serial gateway.
    Tcp(TcpTransport),
    /// In-process simulated relay cards.
    Mock(MockRelayBoard),
}

impl RelayTransport for AnyRelayTransport {
    async fn transact(
        &mut self,
        request: RequestFrame,
        timeout: Duration,
    ) -> Result<Option<ResponseFrame>> {
        match self {
            Self::Serial(transport) => transport.transact(request, timeout).await,
            Self::Tcp(transport) => transport.transact(request, timeout).await,
            Self::Mock(transport) => transport.transact(request, timeout).await,
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Serial(transport) => transport.describe(),
            Self::Tcp(transport) => transport.describe(),
            Self::Mock(transport) => transport.describe(),
        }
    }
}

/// Validate a raw transport response against its request.
///
/// Broadcasts yield `Ok(None)`. A unicast request must be answered by a
/// frame that matches it; exception frames become
/// [`HardwareError::Exception`].
///
/// # Errors
/// Returns `UnexpectedResponse` for a missing or mismatched frame and
/// `Exception` when the slave rejected the request.
pub fn check_response(
    request: &RequestFrame,
    response: Option<ResponseFrame>,
) -> Result<Option<ResponseFrame>> {
    if request.is_broadcast() {
        return Ok(None);
    }

    let Some(response) = response else {
        return Err(HardwareError::UnexpectedResponse {
            slave_id: request.slave_id,
            source: lockhub_protocol::ProtocolError::InvalidMessage(
                "no response to a unicast request".to_string(),
            ),
        });
    };

    response
        .verify_against(request)
        .map_err(|e| HardwareError::from_protocol(request.slave_id, e))?;

    match response {
        ResponseFrame::Exception {
            slave_id,
            function,
            code,
        } => Err(HardwareError::Exception {
            slave_id,
            function,
            code,
        }),
        frame => Ok(Some(frame)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockhub_protocol::ExceptionCode;

    #[test]
    fn test_broadcast_has_no_response() {
        let request = RequestFrame::write_register(0, 0x4000, 5);
        assert_eq!(check_response(&request, None).unwrap(), None);
    }

    #[test]
    fn test_missing_unicast_response() {
        let request = RequestFrame::write_coil(1, 0, true);
        assert!(matches!(
            check_response(&request, None),
            Err(HardwareError::UnexpectedResponse { slave_id: 1, .. })
        ));
    }

    #[test]
    fn test_exception_becomes_error() {
        let request = RequestFrame::write_coil(2, 40, true);
        let response = ResponseFrame::Exception {
            slave_id: 2,
            function: 0x05,
            code: ExceptionCode::IllegalDataAddress,
        };
        let err = check_response(&request, Some(response)).unwrap_err();
        assert!(matches!(
            err,
            HardwareError::Exception {
                code: ExceptionCode::IllegalDataAddress,
                ..
            }
        ));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_echo_from_other_slave_is_rejected() {
        let request = RequestFrame::write_coil(2, 0, true);
        let response = ResponseFrame::echo(&RequestFrame::write_coil(3, 0, true));
        assert!(matches!(
            check_response(&request, Some(response)),
            Err(HardwareError::UnexpectedResponse { slave_id: 2, .. })
        ));
    }
}
