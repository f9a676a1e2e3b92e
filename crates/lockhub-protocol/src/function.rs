//! Function and exception codes of the relay bus.

use crate::error::{ProtocolError, Result};
use std::fmt;

/// High bit set on the function code of an exception response.
pub const EXCEPTION_BIT: u8 = 0x80;

/// Coil value that energizes a relay.
pub const COIL_ON: u16 = 0xFF00;

/// Coil value that releases a relay.
pub const COIL_OFF: u16 = 0x0000;

/// Supported function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FunctionCode {
    ReadHoldingRegisters = 0x03,
    WriteSingleCoil = 0x05,
    WriteSingleRegister = 0x06,
}

impl FunctionCode {
    /// # Errors
    /// Returns `ProtocolError::UnsupportedFunction` for any other code.
    pub fn from_u8(code: u8) -> Result<Self> {
        match code {
            0x03 => Ok(FunctionCode::ReadHoldingRegisters),
            0x05 => Ok(FunctionCode::WriteSingleCoil),
            0x06 => Ok(FunctionCode::WriteSingleRegister),
            other => Err(ProtocolError::UnsupportedFunction(other)),
        }
    }

    #[inline]
    #[must_use]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Function byte of the matching exception response.
    #[inline]
    #[must_use]
    pub fn exception_code(self) -> u8 {
        self.to_u8() | EXCEPTION_BIT
    }

    #[inline]
    #[must_use]
    pub fn is_write(self) -> bool {
        matches!(
            self,
            FunctionCode::WriteSingleCoil | FunctionCode::WriteSingleRegister
        )
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FunctionCode::ReadHoldingRegisters => write!(f, "read holding registers"),
            FunctionCode::WriteSingleCoil => write!(f, "write single coil"),
            FunctionCode::WriteSingleRegister => write!(f, "write single register"),
        }
    }
}

/// Error code carried by an exception response.
///
/// Only `Acknowledge` and `SlaveDeviceBusy` describe a slave that will
/// accept the same request later; every other code is permanent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    SlaveDeviceFailure,
    Acknowledge,
    SlaveDeviceBusy,
    MemoryParityError,
    GatewayPathUnavailable,
    GatewayTargetFailed,
    Unknown(u8),
}

impl ExceptionCode {
    #[must_use]
    pub fn from_u8(code: u8) -> Self {
        match code {
            0x01 => ExceptionCode::IllegalFunction,
            0x02 => ExceptionCode::IllegalDataAddress,
            0x03 => ExceptionCode::IllegalDataValue,
            0x04 => ExceptionCode::SlaveDeviceFailure,
            0x05 => ExceptionCode::Acknowledge,
            0x06 => ExceptionCode::SlaveDeviceBusy,
            0x08 => ExceptionCode::MemoryParityError,
            0x0A => ExceptionCode::GatewayPathUnavailable,
            0x0B => ExceptionCode::GatewayTargetFailed,
            other => ExceptionCode::Unknown(other),
        }
    }

    #[must_use]
    pub fn to_u8(self) -> u8 {
        match self {
            ExceptionCode::IllegalFunction => 0x01,
            ExceptionCode::IllegalDataAddress => 0x02,
            ExceptionCode::IllegalDataValue => 0x03,
            ExceptionCode::SlaveDeviceFailure => 0x04,
            ExceptionCode::Acknowledge => 0x05,
            ExceptionCode::SlaveDeviceBusy => 0x06,
            ExceptionCode::MemoryParityError => 0x08,
            ExceptionCode::GatewayPathUnavailable => 0x0A,
            ExceptionCode::GatewayTargetFailed => 0x0B,
            ExceptionCode::Unknown(code) => code,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ExceptionCode::Acknowledge | ExceptionCode::SlaveDeviceBusy
        )
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExceptionCode::IllegalFunction => write!(f, "illegal function"),
            ExceptionCode::IllegalDataAddress => write!(f, "illegal data address"),
            ExceptionCode::IllegalDataValue => write!(f, "illegal data value"),
            ExceptionCode::SlaveDeviceFailure => write!(f, "slave device failure"),
            ExceptionCode::Acknowledge => write!(f, "acknowledge"),
            ExceptionCode::SlaveDeviceBusy => write!(f, "slave device busy"),
            ExceptionCode::MemoryParityError => write!(f, "memory parity error"),
            ExceptionCode::GatewayPathUnavailable => write!(f, "gateway path unavailable"),
            ExceptionCode::GatewayTargetFailed => write!(f, "gateway target failed to respond"),
            ExceptionCode::Unknown(code) => write!(f, "unknown exception {code:#04x}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0x03, FunctionCode::ReadHoldingRegisters)]
    #[case(0x05, FunctionCode::WriteSingleCoil)]
    #[case(0x06, FunctionCode::WriteSingleRegister)]
    fn test_function_codes(#[case] byte: u8, #[case] code: FunctionCode) {
        assert_eq!(FunctionCode::from_u8(byte).unwrap(), code);
        assert_eq!(code.to_u8(), byte);
        assert_eq!(code.exception_code(), byte | 0x80);
    }

    #[test]
    fn test_unsupported_function() {
        assert!(matches!(
            FunctionCode::from_u8(0x10),
            Err(ProtocolError::UnsupportedFunction(0x10))
        ));
    }

    #[rstest]
    #[case(0x01, false)]
    #[case(0x02, false)]
    #[case(0x03, false)]
    #[case(0x04, false)]
    #[case(0x05, true)]
    #[case(0x06, true)]
    #[case(0x0B, false)]
    #[case(0x7F, false)]
    fn test_exception_classification(#[case] byte: u8, #[case] transient: bool) {
        let code = ExceptionCode::from_u8(byte);
        assert_eq!(code.is_transient(), transient);
        assert_eq!(code.to_u8(), byte);
    }
}
