//! Request and response frames of the relay bus.
//!
//! Requests are always eight bytes:
//!
//! ```text
//! [slave, function, addr_hi, addr_lo, val_hi, val_lo, crc_lo, crc_hi]
//! ```
//!
//! Responses come in three shapes:
//!
//! ```text
//! read      [slave, 0x03, byte_count, data.., crc_lo, crc_hi]
//! write     [slave, func, addr_hi, addr_lo, val_hi, val_lo, crc_lo, crc_hi]   (echo)
//! exception [slave, func | 0x80, code, crc_lo, crc_hi]
//! ```

use crate::crc::{append_crc, verify_crc};
use crate::error::{ProtocolError, Result};
use crate::function::{COIL_OFF, COIL_ON, EXCEPTION_BIT, ExceptionCode, FunctionCode};
use lockhub_core::constants::BROADCAST_SLAVE_ID;

/// Length of every request frame.
pub const REQUEST_LEN: usize = 8;

/// Length of a write echo response.
pub const WRITE_RESPONSE_LEN: usize = 8;

/// Length of an exception response.
pub const EXCEPTION_RESPONSE_LEN: usize = 5;

/// Most registers a single read may ask for.
pub const MAX_READ_REGISTERS: u16 = 125;

/// A request frame addressed to one slave (or broadcast).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestFrame {
    pub slave_id: u8,
    pub function: FunctionCode,
    /// Zero-based register or coil number.
    pub address: u16,
    /// Register count for reads, value for writes.
    pub value: u16,
}

impl RequestFrame {
    #[must_use]
    pub fn read_registers(slave_id: u8, address: u16, count: u16) -> Self {
        Self {
            slave_id,
            function: FunctionCode::ReadHoldingRegisters,
            address,
            value: count,
        }
    }

    #[must_use]
    pub fn write_register(slave_id: u8, address: u16, value: u16) -> Self {
        Self {
            slave_id,
            function: FunctionCode::WriteSingleRegister,
            address,
            value,
        }
    }

    #[must_use]
    pub fn write_coil(slave_id: u8, address: u16, on: bool) -> Self {
        Self {
            slave_id,
            function: FunctionCode::WriteSingleCoil,
            address,
            value: if on { COIL_ON } else { COIL_OFF },
        }
    }

    /// Broadcast frames are executed by every slave and answered by none.
    #[inline]
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.slave_id == BROADCAST_SLAVE_ID
    }

    /// Length of a successful response to this request.
    #[must_use]
    pub fn expected_response_len(&self) -> usize {
        match self.function {
            FunctionCode::ReadHoldingRegisters => 5 + 2 * usize::from(self.value),
            FunctionCode::WriteSingleCoil | FunctionCode::WriteSingleRegister => {
                WRITE_RESPONSE_LEN
            }
        }
    }

    #[must_use]
    pub fn encode(&self) -> [u8; REQUEST_LEN] {
        let [addr_hi, addr_lo] = self.address.to_be_bytes();
        let [val_hi, val_lo] = self.value.to_be_bytes();
        let body = [
            self.slave_id,
            self.function.to_u8(),
            addr_hi,
            addr_lo,
            val_hi,
            val_lo,
        ];
        let [crc_lo, crc_hi] = crate::crc::crc16(&body).to_le_bytes();
        [
            body[0], body[1], body[2], body[3], body[4], body[5], crc_lo, crc_hi,
        ]
    }

    /// Parse a request frame, as a slave would.
    ///
    /// # Errors
    /// Returns an error for a wrong length, a bad checksum or an unsupported
    /// function code.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != REQUEST_LEN {
            return Err(ProtocolError::InvalidLength {
                expected: REQUEST_LEN,
                actual: bytes.len(),
            });
        }
        verify_crc(bytes)?;
        Ok(Self {
            slave_id: bytes[0],
            function: FunctionCode::from_u8(bytes[1])?,
            address: u16::from_be_bytes([bytes[2], bytes[3]]),
            value: u16::from_be_bytes([bytes[4], bytes[5]]),
        })
    }
}

/// A decoded response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseFrame {
    Registers {
        slave_id: u8,
        values: Vec<u16>,
    },
    WriteEcho {
        slave_id: u8,
        function: FunctionCode,
        address: u16,
        value: u16,
    },
    Exception {
        slave_id: u8,
        /// Function code of the rejected request, without the exception bit.
        function: u8,
        code: ExceptionCode,
    },
}

impl ResponseFrame {
    /// Echo response a slave sends after executing a write.
    #[must_use]
    pub fn echo(request: &RequestFrame) -> Self {
        ResponseFrame::WriteEcho {
            slave_id: request.slave_id,
            function: request.function,
            address: request.address,
            value: request.value,
        }
    }

    #[must_use]
    pub fn slave_id(&self) -> u8 {
        match self {
            ResponseFrame::Registers { slave_id, .. }
            | ResponseFrame::WriteEcho { slave_id, .. }
            | ResponseFrame::Exception { slave_id, .. } => *slave_id,
        }
    }

    /// Encode the response with its checksum.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(WRITE_RESPONSE_LEN);
        match self {
            ResponseFrame::Registers { slave_id, values } => {
                frame.push(*slave_id);
                frame.push(FunctionCode::ReadHoldingRegisters.to_u8());
                // Reads are capped at 125 registers, so the byte count fits.
                frame.push((values.len() * 2) as u8);
                for value in values {
                    frame.extend_from_slice(&value.to_be_bytes());
                }
            }
            ResponseFrame::WriteEcho {
                slave_id,
                function,
                address,
                value,
            } => {
                frame.push(*slave_id);
                frame.push(function.to_u8());
                frame.extend_from_slice(&address.to_be_bytes());
                frame.extend_from_slice(&value.to_be_bytes());
            }
            ResponseFrame::Exception {
                slave_id,
                function,
                code,
            } => {
                frame.push(*slave_id);
                frame.push(function | EXCEPTION_BIT);
                frame.push(code.to_u8());
            }
        }
        append_crc(&mut frame);
        frame
    }

    /// Decode one complete response frame.
    ///
    /// # Errors
    /// Returns an error when the length does not match the frame's shape,
    /// the checksum fails or the function code is not supported.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let expected = match frame_len(bytes)? {
            Some(len) => len,
            None => {
                return Err(ProtocolError::InvalidLength {
                    expected: EXCEPTION_RESPONSE_LEN,
                    actual: bytes.len(),
                });
            }
        };
        if bytes.len() != expected {
            return Err(ProtocolError::InvalidLength {
                expected,
                actual: bytes.len(),
            });
        }
        verify_crc(bytes)?;

        let slave_id = bytes[0];
        let function_byte = bytes[1];
        if function_byte & EXCEPTION_BIT != 0 {
            return Ok(ResponseFrame::Exception {
                slave_id,
                function: function_byte & !EXCEPTION_BIT,
                code: ExceptionCode::from_u8(bytes[2]),
            });
        }

        match FunctionCode::from_u8(function_byte)? {
            FunctionCode::ReadHoldingRegisters => {
                let count = usize::from(bytes[2]);
                let values = bytes[3..3 + count]
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                Ok(ResponseFrame::Registers { slave_id, values })
            }
            function => Ok(ResponseFrame::WriteEcho {
                slave_id,
                function,
                address: u16::from_be_bytes([bytes[2], bytes[3]]),
                value: u16::from_be_bytes([bytes[4], bytes[5]]),
            }),
        }
    }

    /// Check that this response answers `request`.
    ///
    /// Exception responses pass this check when they name the request's
    /// function; turning them into errors is up to the caller.
    ///
    /// # Errors
    /// Returns an error when the slave or function differs, a write echo
    /// carries another address or value, or a read returns the wrong count.
    pub fn verify_against(&self, request: &RequestFrame) -> Result<()> {
        if self.slave_id() != request.slave_id {
            return Err(ProtocolError::SlaveMismatch {
                expected: request.slave_id,
                actual: self.slave_id(),
            });
        }
        match self {
            ResponseFrame::Exception { function, .. } => {
                if *function != request.function.to_u8() {
                    return Err(ProtocolError::FunctionMismatch {
                        expected: request.function.to_u8(),
                        actual: *function,
                    });
                }
            }
            ResponseFrame::Registers { values, .. } => {
                if request.function != FunctionCode::ReadHoldingRegisters {
                    return Err(ProtocolError::FunctionMismatch {
                        expected: request.function.to_u8(),
                        actual: FunctionCode::ReadHoldingRegisters.to_u8(),
                    });
                }
                if values.len() != usize::from(request.value) {
                    return Err(ProtocolError::EchoMismatch(format!(
                        "asked for {} registers, got {}",
                        request.value,
                        values.len()
                    )));
                }
            }
            ResponseFrame::WriteEcho {
                function,
                address,
                value,
                ..
            } => {
                if *function != request.function {
                    return Err(ProtocolError::FunctionMismatch {
                        expected: request.function.to_u8(),
                        actual: function.to_u8(),
                    });
                }
                if *address != request.address || *value != request.value {
                    return Err(ProtocolError::EchoMismatch(format!(
                        "wrote {:#06x}={:#06x}, echoed {:#06x}={:#06x}",
                        request.address, request.value, address, value
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Total length of the response frame at the start of `buf`.
///
/// Returns `Ok(None)` while too few bytes have arrived to tell.
///
/// # Errors
/// Returns `ProtocolError::UnsupportedFunction` for an unknown function byte.
pub fn frame_len(buf: &[u8]) -> Result<Option<usize>> {
    let Some(&function) = buf.get(1) else {
        return Ok(None);
    };
    if function & EXCEPTION_BIT != 0 {
        return Ok(Some(EXCEPTION_RESPONSE_LEN));
    }
    match FunctionCode::from_u8(function)? {
        FunctionCode::ReadHoldingRegisters => Ok(buf.get(2).map(|count| 5 + usize::from(*count))),
        FunctionCode::WriteSingleCoil | FunctionCode::WriteSingleRegister => {
            Ok(Some(WRITE_RESPONSE_LEN))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_read_request() {
        let frame = RequestFrame::read_registers(1, 0x0000, 1).encode();
        assert_eq!(frame, [0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A]);
    }

    #[test]
    fn test_encode_coil_request() {
        let frame = RequestFrame::write_coil(1, 0, true).encode();
        assert_eq!(frame, [0x01, 0x05, 0x00, 0x00, 0xFF, 0x00, 0x8C, 0x3A]);
    }

    #[test]
    fn test_request_decode_matches_encode() {
        let request = RequestFrame::write_register(7, 0x4000, 12);
        assert_eq!(RequestFrame::decode(&request.encode()).unwrap(), request);
    }

    #[test]
    fn test_decode_read_response() {
        let response = ResponseFrame::Registers {
            slave_id: 2,
            values: vec![0x0001],
        };
        let bytes = response.encode();
        assert_eq!(bytes.len(), 7);
        assert_eq!(&bytes[..5], &[0x02, 0x03, 0x02, 0x00, 0x01]);
        assert_eq!(ResponseFrame::decode(&bytes).unwrap(), response);
    }

    #[test]
    fn test_decode_exception() {
        let response = ResponseFrame::Exception {
            slave_id: 3,
            function: 0x06,
            code: ExceptionCode::SlaveDeviceBusy,
        };
        let bytes = response.encode();
        assert_eq!(bytes.len(), EXCEPTION_RESPONSE_LEN);
        assert_eq!(bytes[1], 0x86);
        assert_eq!(ResponseFrame::decode(&bytes).unwrap(), response);
    }

    #[test]
    fn test_decode_rejects_bad_crc() {
        let mut bytes = ResponseFrame::echo(&RequestFrame::write_register(1, 0, 1)).encode();
        bytes[7] ^= 0xFF;
        assert!(matches!(
            ResponseFrame::decode(&bytes),
            Err(ProtocolError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_truncated_frame() {
        let bytes = ResponseFrame::echo(&RequestFrame::write_register(1, 0, 1)).encode();
        assert!(matches!(
            ResponseFrame::decode(&bytes[..6]),
            Err(ProtocolError::InvalidLength { expected: 8, actual: 6 })
        ));
    }

    #[test]
    fn test_verify_echo() {
        let request = RequestFrame::write_register(4, 2, 1);
        assert!(ResponseFrame::echo(&request).verify_against(&request).is_ok());

        let wrong_slave = ResponseFrame::echo(&RequestFrame::write_register(5, 2, 1));
        assert!(matches!(
            wrong_slave.verify_against(&request),
            Err(ProtocolError::SlaveMismatch { expected: 4, actual: 5 })
        ));

        let wrong_value = ResponseFrame::echo(&RequestFrame::write_register(4, 2, 0));
        assert!(matches!(
            wrong_value.verify_against(&request),
            Err(ProtocolError::EchoMismatch(_))
        ));
    }

    #[test]
    fn test_verify_read_count() {
        let request = RequestFrame::read_registers(1, 0x4000, 1);
        let response = ResponseFrame::Registers {
            slave_id: 1,
            values: vec![1, 2],
        };
        assert!(response.verify_against(&request).is_err());
    }

    #[test]
    fn test_frame_len_needs_header() {
        assert_eq!(frame_len(&[0x01]).unwrap(), None);
        assert_eq!(frame_len(&[0x01, 0x03]).unwrap(), None);
        assert_eq!(frame_len(&[0x01, 0x03, 0x02]).unwrap(), Some(7));
        assert_eq!(frame_len(&[0x01, 0x86]).unwrap(), Some(5));
        assert_eq!(frame_len(&[0x01, 0x06]).unwrap(), Some(8));
        assert!(frame_len(&[0x01, 0x10]).is_err());
    }

    #[test]
    fn test_expected_response_len() {
        assert_eq!(RequestFrame::read_registers(1, 0, 1).expected_response_len(), 7);
        assert_eq!(RequestFrame::write_coil(1, 0, false).expected_response_len(), 8);
        assert!(RequestFrame::write_coil(0, 0, false).is_broadcast());
    }
}
