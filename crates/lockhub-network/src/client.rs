//! Node-side connection to the fleet coordinator.
//!
//! The client is a plain request/reply transport: it does not retry and it
//! does not reconnect on its own. Any transport error drops the connection
//! so that a late reply can never be matched to the next request; callers
//! reconnect through [`crate::ReconnectBackoff`].

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use lockhub_core::constants::{DEFAULT_COORDINATOR_PORT, DEFAULT_REQUEST_TIMEOUT_MS};
use lockhub_protocol::{
    CommandCompletion, CoordinatorMessage, HeartbeatRequest, NodeCodec, NodeMessage, PollRequest,
    WireCommand,
};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

use crate::error::FleetClientError;

#[derive(Debug, Clone)]
pub struct FleetClientConfig {
    /// `host:port` of the coordinator.
    pub server_addr: String,
    /// Applies separately to connect, send and receive.
    pub timeout: Duration,
}

impl Default for FleetClientConfig {
    fn default() -> Self {
        Self {
            server_addr: format!("127.0.0.1:{DEFAULT_COORDINATOR_PORT}"),
            timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }
}

pub struct FleetClient {
    server_addr: String,
    framed: Option<Framed<TcpStream, NodeCodec>>,
    timeout: Duration,
}

impl FleetClient {
    #[must_use]
    pub fn new(config: FleetClientConfig) -> Self {
        Self {
            server_addr: config.server_addr,
            framed: None,
            timeout: config.timeout,
        }
    }

    /// # Errors
    /// `ConnectionTimeout` when the coordinator does not accept in time, `Io`
    /// when it refuses.
    pub async fn connect(&mut self) -> Result<(), FleetClientError> {
        let stream = match tokio::time::timeout(
            self.timeout,
            TcpStream::connect(self.server_addr.as_str()),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                debug!(addr = %self.server_addr, error = %e, "Connection failed");
                return Err(e.into());
            }
            Err(_) => return Err(FleetClientError::ConnectionTimeout(self.timeout_ms())),
        };

        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "Failed to set TCP_NODELAY");
        }
        info!(addr = %self.server_addr, "Connected to coordinator");
        self.framed = Some(Framed::new(stream, NodeCodec::new()));
        Ok(())
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.framed.is_some()
    }

    pub fn close(&mut self) {
        if self.framed.take().is_some() {
            debug!(addr = %self.server_addr, "Closed coordinator connection");
        }
    }

    /// Send one message and wait for its reply.
    ///
    /// # Errors
    /// `NotConnected` before [`FleetClient::connect`]. Every other error
    /// except `Rejected` leaves the client disconnected.
    pub async fn exchange(
        &mut self,
        message: NodeMessage,
    ) -> Result<CoordinatorMessage, FleetClientError> {
        let result = self.exchange_inner(message).await;
        match result {
            Ok(CoordinatorMessage::Error { message, trace_id }) => {
                Err(FleetClientError::Rejected { message, trace_id })
            }
            Ok(reply) => Ok(reply),
            Err(e) => {
                if !matches!(e, FleetClientError::NotConnected) {
                    self.close();
                }
                Err(e)
            }
        }
    }

    /// Report liveness and collect any commands delivered with the reply.
    ///
    /// # Errors
    /// As [`FleetClient::exchange`], plus `UnexpectedReply`.
    pub async fn heartbeat(
        &mut self,
        heartbeat: HeartbeatRequest,
    ) -> Result<Vec<WireCommand>, FleetClientError> {
        let reply = self.exchange(NodeMessage::Heartbeat(heartbeat)).await?;
        self.expect_commands(reply)
    }

    /// # Errors
    /// As [`FleetClient::exchange`], plus `UnexpectedReply`.
    pub async fn poll(&mut self, poll: PollRequest) -> Result<Vec<WireCommand>, FleetClientError> {
        let reply = self.exchange(NodeMessage::Poll(poll)).await?;
        self.expect_commands(reply)
    }

    /// # Errors
    /// As [`FleetClient::exchange`]; an ack for another command is `UnexpectedReply`.
    pub async fn complete(
        &mut self,
        completion: CommandCompletion,
    ) -> Result<(), FleetClientError> {
        let expected = completion.command_id;
        match self.exchange(NodeMessage::Completion(completion)).await? {
            CoordinatorMessage::Ack { command_id } if command_id == expected => Ok(()),
            other => {
                self.close();
                Err(FleetClientError::UnexpectedReply(format!("{other:?}")))
            }
        }
    }

    async fn exchange_inner(
        &mut self,
        message: NodeMessage,
    ) -> Result<CoordinatorMessage, FleetClientError> {
        let timeout = self.timeout;
        let timeout_ms = self.timeout_ms();
        let framed = self.framed.as_mut().ok_or(FleetClientError::NotConnected)?;

        trace!(message = ?message, "Sending to coordinator");
        match tokio::time::timeout(timeout, framed.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(FleetClientError::WriteTimeout(timeout_ms)),
        }

        match tokio::time::timeout(timeout, framed.next()).await {
            Ok(Some(Ok(reply))) => {
                trace!(reply = ?reply, "Received from coordinator");
                Ok(reply)
            }
            Ok(Some(Err(e))) => Err(e.into()),
            Ok(None) => Err(FleetClientError::ConnectionLost(
                "Coordinator closed connection".to_string(),
            )),
            Err(_) => Err(FleetClientError::ReadTimeout(timeout_ms)),
        }
    }

    fn expect_commands(
        &mut self,
        reply: CoordinatorMessage,
    ) -> Result<Vec<WireCommand>, FleetClientError> {
        match reply {
            CoordinatorMessage::Commands { commands } => Ok(commands),
            other => {
                self.close();
                Err(FleetClientError::UnexpectedReply(format!("{other:?}")))
            }
        }
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

impl std::fmt::Debug for FleetClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetClient")
            .field("server_addr", &self.server_addr)
            .field("connected", &self.is_connected())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockhub_core::KioskId;

    #[tokio::test]
    async fn test_exchange_requires_connection() {
        let mut client = FleetClient::new(FleetClientConfig::default());
        let poll = PollRequest {
            kiosk_id: KioskId::new("k1").unwrap(),
            zone: None,
        };
        assert!(matches!(
            client.poll(poll).await,
            Err(FleetClientError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut client = FleetClient::new(FleetClientConfig {
            server_addr: addr.to_string(),
            timeout: Duration::from_millis(500),
        });
        assert!(client.connect().await.is_err());
        assert!(!client.is_connected());
    }
}
