//! CRC-16 used by the relay bus (reflected polynomial `0xA001`, init `0xFFFF`).
//!
//! The checksum covers every byte before it and is appended low byte first.

use crate::error::{ProtocolError, Result};

const POLYNOMIAL: u16 = 0xA001;
const INITIAL: u16 = 0xFFFF;

/// Compute the checksum of `data`, bit by bit.
#[must_use]
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = INITIAL;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ POLYNOMIAL;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Append the checksum of `frame` to it, little-endian.
pub fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc16(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// Check the trailing two checksum bytes of a complete frame.
///
/// # Errors
/// Returns `ProtocolError::InvalidLength` for frames shorter than three bytes
/// and `ProtocolError::CrcMismatch` when the checksum does not match.
pub fn verify_crc(frame: &[u8]) -> Result<()> {
    if frame.len() < 3 {
        return Err(ProtocolError::InvalidLength {
            expected: 3,
            actual: frame.len(),
        });
    }
    let (body, tail) = frame.split_at(frame.len() - 2);
    let expected = crc16(body);
    let actual = u16::from_le_bytes([tail[0], tail[1]]);
    if expected != actual {
        return Err(ProtocolError::CrcMismatch { expected, actual });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_check_value() {
        assert_eq!(crc16(b"123456789"), 0x4B37);
    }

    #[rstest]
    #[case(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01], [0x84, 0x0A])]
    #[case(&[0x01, 0x06, 0x00, 0x01, 0x00, 0x03], [0x98, 0x0B])]
    #[case(&[0x01, 0x05, 0x00, 0x00, 0xFF, 0x00], [0x8C, 0x3A])]
    fn test_known_frames(#[case] body: &[u8], #[case] trailer: [u8; 2]) {
        let mut frame = body.to_vec();
        append_crc(&mut frame);
        assert_eq!(&frame[body.len()..], &trailer);
        assert!(verify_crc(&frame).is_ok());
    }

    #[test]
    fn test_flipped_bit_is_detected() {
        let mut frame = vec![0x02, 0x06, 0x00, 0x00, 0x00, 0x01];
        append_crc(&mut frame);
        frame[5] ^= 0x01;
        assert!(matches!(
            verify_crc(&frame),
            Err(ProtocolError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn test_short_frame() {
        assert!(matches!(
            verify_crc(&[0x01, 0x02]),
            Err(ProtocolError::InvalidLength { actual: 2, .. })
        ));
    }
}
