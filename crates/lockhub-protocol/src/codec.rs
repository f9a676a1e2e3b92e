//! Tokio codec for relay bus frames.
//!
//! [`RtuCodec`] is the client side of the bus: it encodes [`RequestFrame`]s
//! and decodes [`ResponseFrame`]s from a byte stream. Responses carry no
//! delimiter, so the decoder derives the frame length from the function
//! byte (and the byte count of a read) and waits until that many bytes are
//! buffered.
//!
//! # Usage with Tokio Framed
//!
//! ```rust,no_run
//! use futures::{SinkExt, StreamExt};
//! use lockhub_protocol::{RequestFrame, RtuCodec};
//! use tokio::net::TcpStream;
//! use tokio_util::codec::Framed;
//!
//! # async fn example() -> Result<(), lockhub_protocol::ProtocolError> {
//! let stream = TcpStream::connect("10.0.0.20:4196").await?;
//! let mut framed = Framed::new(stream, RtuCodec::new());
//!
//! framed.send(RequestFrame::read_registers(1, 0x4000, 1)).await?;
//! if let Some(response) = framed.next().await {
//!     println!("{:?}", response?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! An unsupported function byte means the stream lost synchronization; the
//! decoder drops everything buffered before returning the error. A frame
//! with a bad checksum is consumed and reported so the caller can retry.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{ProtocolError, Result};
use crate::frame::{RequestFrame, ResponseFrame, frame_len};

#[derive(Debug, Default, Clone, Copy)]
pub struct RtuCodec;

impl RtuCodec {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for RtuCodec {
    type Item = ResponseFrame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let len = match frame_len(src) {
            Ok(Some(len)) => len,
            Ok(None) => return Ok(None),
            Err(e) => {
                src.clear();
                return Err(e);
            }
        };

        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }

        let frame = src.split_to(len);
        ResponseFrame::decode(&frame).map(Some)
    }
}

impl Encoder<RequestFrame> for RtuCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: RequestFrame, dst: &mut BytesMut) -> Result<()> {
        dst.extend_from_slice(&item.encode());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::ExceptionCode;

    #[test]
    fn test_decode_partial_then_complete() {
        let mut codec = RtuCodec::new();
        let bytes = ResponseFrame::Registers {
            slave_id: 1,
            values: vec![5],
        }
        .encode();

        let mut buf = BytesMut::from(&bytes[..4]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&bytes[4..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(
            frame,
            ResponseFrame::Registers {
                slave_id: 1,
                values: vec![5]
            }
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_back_to_back_frames() {
        let mut codec = RtuCodec::new();
        let first = ResponseFrame::echo(&RequestFrame::write_register(1, 0, 1));
        let second = ResponseFrame::Exception {
            slave_id: 1,
            function: 0x06,
            code: ExceptionCode::IllegalDataAddress,
        };

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&first.encode());
        buf.extend_from_slice(&second.encode());

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(first));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(second));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_garbage_clears_buffer() {
        let mut codec = RtuCodec::new();
        let mut buf = BytesMut::from(&[0x01, 0x42, 0x00, 0x00][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::UnsupportedFunction(0x42))
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_encode_request() {
        let mut codec = RtuCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(RequestFrame::read_registers(1, 0, 1), &mut buf)
            .unwrap();
        assert_eq!(&buf[..], &[0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A]);
    }
}
