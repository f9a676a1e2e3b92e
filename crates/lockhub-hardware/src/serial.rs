//! Serial (RS-485) transport.
//!
//! The port is opened 8N1 at the configured baud rate. `serialport` is a
//! blocking API, so every exchange runs on Tokio's blocking pool with the
//! port moved in and handed back afterwards.

use std::io::ErrorKind;
use std::time::{Duration, Instant};

use lockhub_core::constants::DEFAULT_BAUD_RATE;
use lockhub_protocol::{RequestFrame, ResponseFrame, frame_len};
use serialport::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};
use tracing::{debug, trace};

use crate::error::{HardwareError, Result};
use crate::traits::RelayTransport;

/// Read granularity while waiting for a response.
const READ_SLICE: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Device path, e.g. `/dev/ttyUSB0`.
    pub device: String,
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: "/dev/ttyUSB0".to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

pub struct SerialTransport {
    device: String,
    port: Option<Box<dyn SerialPort>>,
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("device", &self.device)
            .field("open", &self.port.is_some())
            .finish()
    }
}

impl SerialTransport {
    /// Open the serial device.
    ///
    /// # Errors
    /// Returns `HardwareError::Serial` if the port cannot be opened.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let port = serialport::new(&config.device, config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(READ_SLICE)
            .open()?;
        debug!(device = %config.device, baud_rate = config.baud_rate, "Opened serial port");

        Ok(Self {
            device: config.device.clone(),
            port: Some(port),
        })
    }
}

impl RelayTransport for SerialTransport {
    async fn transact(
        &mut self,
        request: RequestFrame,
        timeout: Duration,
    ) -> Result<Option<ResponseFrame>> {
        let mut port = self
            .port
            .take()
            .ok_or_else(|| HardwareError::disconnected(&self.device))?;

        let joined = tokio::task::spawn_blocking(move || {
            let result = exchange(port.as_mut(), &request, timeout);
            (port, result)
        })
        .await;

        match joined {
            Ok((port, result)) => {
                self.port = Some(port);
                let Some(bytes) = result? else {
                    return Ok(None);
                };
                trace!(slave_id = request.slave_id, len = bytes.len(), "Serial response");
                ResponseFrame::decode(&bytes)
                    .map(Some)
                    .map_err(|e| HardwareError::from_protocol(request.slave_id, e))
            }
            // The port went down with the blocking task.
            Err(e) => Err(HardwareError::disconnected(format!("{}: {e}", self.device))),
        }
    }

    fn describe(&self) -> String {
        format!("serial {}", self.device)
    }
}

/// Write one frame and collect its response bytes.
fn exchange(
    port: &mut dyn SerialPort,
    request: &RequestFrame,
    timeout: Duration,
) -> Result<Option<Vec<u8>>> {
    // Stale bytes from an earlier timed-out exchange would shift the frame.
    port.clear(ClearBuffer::Input)?;
    port.write_all(&request.encode())?;
    port.flush()?;

    if request.is_broadcast() {
        return Ok(None);
    }

    let deadline = Instant::now() + timeout;
    let mut buf = Vec::with_capacity(request.expected_response_len());
    let mut chunk = [0u8; 64];
    loop {
        let expected =
            frame_len(&buf).map_err(|e| HardwareError::from_protocol(request.slave_id, e))?;
        if let Some(len) = expected
            && buf.len() >= len
        {
            buf.truncate(len);
            return Ok(Some(buf));
        }
        if Instant::now() >= deadline {
            return Err(HardwareError::timeout(
                request.slave_id,
                timeout.as_millis() as u64,
            ));
        }
        match port.read(&mut chunk) {
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == ErrorKind::TimedOut => {}
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 9600);
    }

    #[test]
    fn test_open_missing_device_fails() {
        let config = SerialConfig {
            device: "/dev/lockhub-does-not-exist".to_string(),
            baud_rate: 9600,
        };
        assert!(matches!(
            SerialTransport::open(&config),
            Err(HardwareError::Serial(_))
        ));
    }
}
