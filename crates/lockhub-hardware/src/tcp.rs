//! RTU-over-TCP transport for serial device servers.
//!
//! Some sites mount the relay cards behind an Ethernet-to-RS-485 gateway
//! that passes raw RTU frames through a TCP socket. The transport connects
//! lazily and drops the connection after any timeout or framing error, so
//! the next request starts from a clean stream.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use lockhub_protocol::{RequestFrame, ResponseFrame, RtuCodec};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::error::{HardwareError, Result};
use crate::traits::RelayTransport;

#[derive(Debug, Clone)]
pub struct TcpGatewayConfig {
    pub addr: SocketAddr,
    pub connect_timeout: Duration,
}

impl TcpGatewayConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: Duration::from_secs(3),
        }
    }
}

#[derive(Debug)]
pub struct TcpTransport {
    config: TcpGatewayConfig,
    framed: Option<Framed<TcpStream, RtuCodec>>,
}

impl TcpTransport {
    pub fn new(config: TcpGatewayConfig) -> Self {
        Self {
            config,
            framed: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.framed.is_some()
    }

    async fn connect(&mut self) -> Result<&mut Framed<TcpStream, RtuCodec>> {
        if self.framed.is_none() {
            let addr = self.config.addr;
            let stream =
                match tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr))
                    .await
                {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_) => {
                        warn!(%addr, "Gateway connection timed out");
                        return Err(HardwareError::disconnected(format!(
                            "{addr}: connect timeout"
                        )));
                    }
                };

            if let Err(e) = stream.set_nodelay(true) {
                warn!("Failed to set TCP_NODELAY: {}", e);
            }
            info!(%addr, "Connected to relay gateway");
            self.framed = Some(Framed::new(stream, RtuCodec::new()));
        }

        self.framed
            .as_mut()
            .ok_or_else(|| HardwareError::disconnected(self.config.addr.to_string()))
    }

    async fn exchange(
        &mut self,
        request: RequestFrame,
        timeout: Duration,
    ) -> Result<Option<ResponseFrame>> {
        let addr = self.config.addr;
        let framed = self.connect().await?;

        // A late answer to an earlier request would be taken for this one.
        framed.read_buffer_mut().clear();
        framed.send(request).await.map_err(|e| match e {
            lockhub_protocol::ProtocolError::Io(io) => HardwareError::Io(io),
            other => HardwareError::from_protocol(request.slave_id, other),
        })?;

        if request.is_broadcast() {
            return Ok(None);
        }

        match tokio::time::timeout(timeout, framed.next()).await {
            Ok(Some(Ok(response))) => Ok(Some(response)),
            Ok(Some(Err(e))) => Err(HardwareError::from_protocol(request.slave_id, e)),
            Ok(None) => Err(HardwareError::disconnected(format!(
                "{addr}: closed by gateway"
            ))),
            Err(_) => Err(HardwareError::timeout(
                request.slave_id,
                timeout.as_millis() as u64,
            )),
        }
    }
}

impl RelayTransport for TcpTransport {
    async fn transact(
        &mut self,
        request: RequestFrame,
        timeout: Duration,
    ) -> Result<Option<ResponseFrame>> {
        let result = self.exchange(request, timeout).await;
        if result.is_err() && self.framed.take().is_some() {
            debug!(addr = %self.config.addr, "Dropped gateway connection after error");
        }
        result
    }

    fn describe(&self) -> String {
        format!("tcp gateway {}", self.config.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn gateway() -> (TcpListener, TcpGatewayConfig) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = TcpGatewayConfig::new(listener.local_addr().unwrap());
        (listener, config)
    }

    #[tokio::test]
    async fn test_write_echo_over_gateway() {
        let (listener, config) = gateway().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 8];
            socket.read_exact(&mut buf).await.unwrap();
            let request = RequestFrame::decode(&buf).unwrap();
            socket
                .write_all(&ResponseFrame::echo(&request).encode())
                .await
                .unwrap();
        });

        let mut transport = TcpTransport::new(config);
        let request = RequestFrame::write_coil(1, 3, true);
        let response = transport
            .transact(request, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(response, Some(ResponseFrame::echo(&request)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_silent_gateway_times_out_and_disconnects() {
        let (listener, config) = gateway().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 8];
            socket.read_exact(&mut buf).await.unwrap();
            tokio::time::sleep(Duration::from_millis(300)).await;
        });

        let mut transport = TcpTransport::new(config);
        let err = transport
            .transact(
                RequestFrame::read_registers(4, 0x4000, 1),
                Duration::from_millis(50),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HardwareError::Timeout { slave_id: 4, .. }));
        assert!(!transport.is_connected());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_gateway() {
        let (listener, config) = gateway().await;
        drop(listener);

        let mut transport = TcpTransport::new(config);
        let result = transport
            .transact(RequestFrame::write_coil(1, 0, false), Duration::from_millis(100))
            .await;
        assert!(result.is_err());
    }
}
