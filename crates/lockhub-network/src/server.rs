//! TCP front end of the fleet coordinator.
//!
//! ```text
//! kiosk-1 ┐
//!         │   one task per connection
//! kiosk-2 ├──> FleetServer ──────────────> Arc<Mutex<Coordinator>>
//!         │        │
//! kiosk-n ┘        └──> CoordinatorCodec (length-delimited JSON)
//! ```
//!
//! Every request gets exactly one reply on the same connection. A frame
//! that is not valid JSON is answered with an `error` document carrying a
//! trace id and the connection stays open; an I/O or framing error closes
//! it. The accept loop also runs the periodic sweep that fails overdue
//! command deliveries.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use lockhub_core::{KioskId, TraceId};
use lockhub_protocol::{CoordinatorCodec, CoordinatorMessage, ProtocolError};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::coordinator::Coordinator;
use crate::error::FleetServerError;

#[derive(Debug, Clone)]
pub struct FleetServerConfig {
    pub bind_addr: SocketAddr,
    pub max_connections: usize,
    /// How often overdue deliveries are failed.
    pub sweep_interval: Duration,
}

impl Default for FleetServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((
                [0, 0, 0, 0],
                lockhub_core::constants::DEFAULT_COORDINATOR_PORT,
            )),
            max_connections: 256,
            sweep_interval: Duration::from_secs(10),
        }
    }
}

pub struct FleetServer {
    listener: TcpListener,
    config: FleetServerConfig,
    coordinator: Arc<Mutex<Coordinator>>,
}

impl FleetServer {
    /// # Errors
    /// Returns `FleetServerError::BindFailed` if the address cannot be bound.
    pub async fn bind(
        config: FleetServerConfig,
        coordinator: Arc<Mutex<Coordinator>>,
    ) -> Result<Self, FleetServerError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|source| FleetServerError::BindFailed {
                addr: config.bind_addr,
                source,
            })?;

        info!(
            addr = %config.bind_addr,
            max_connections = config.max_connections,
            "Fleet coordinator listening"
        );

        Ok(Self {
            listener,
            config,
            coordinator,
        })
    }

    /// Actual bound address; differs from the configured one when port 0 was used.
    ///
    /// # Errors
    /// Propagates the socket error.
    pub fn local_addr(&self) -> Result<SocketAddr, FleetServerError> {
        Ok(self.listener.local_addr()?)
    }

    #[must_use]
    pub fn coordinator(&self) -> Arc<Mutex<Coordinator>> {
        Arc::clone(&self.coordinator)
    }

    /// Serve until `cancel` fires. Open connections are closed on exit.
    ///
    /// # Errors
    /// Currently never fails once bound; accept errors are logged and retried.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), FleetServerError> {
        let mut connections = JoinSet::new();
        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,

                accepted = self.listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "Accept failed");
                            continue;
                        }
                    };

                    if connections.len() >= self.config.max_connections {
                        error!(
                            addr = %addr,
                            max_connections = self.config.max_connections,
                            "Connection rejected: maximum connections reached"
                        );
                        drop(stream);
                        continue;
                    }

                    if let Err(e) = stream.set_nodelay(true) {
                        warn!(addr = %addr, error = %e, "Failed to set TCP_NODELAY");
                    }
                    debug!(addr = %addr, active = connections.len() + 1, "Node connected");
                    connections.spawn(serve_connection(
                        stream,
                        addr,
                        Arc::clone(&self.coordinator),
                        cancel.child_token(),
                    ));
                }

                _ = sweep.tick() => {
                    let failed = self.coordinator.lock().await.sweep(Utc::now());
                    if !failed.is_empty() {
                        warn!(count = failed.len(), "Failed overdue command deliveries");
                    }
                }

                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    match joined {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => warn!(error = %e, "Connection closed with error"),
                        Err(e) if e.is_panic() => error!(error = %e, "Connection task panicked"),
                        Err(_) => {}
                    }
                }
            }
        }

        info!(active = connections.len(), "Fleet coordinator shutting down");
        connections.shutdown().await;
        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    coordinator: Arc<Mutex<Coordinator>>,
    cancel: CancellationToken,
) -> Result<(), FleetServerError> {
    let mut framed = Framed::new(stream, CoordinatorCodec::new());
    let mut peer: Option<KioskId> = None;

    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => break,
            next = framed.next() => next,
        };

        let reply = match next {
            None => {
                debug!(addr = %addr, kiosk_id = ?peer, "Node disconnected");
                break;
            }
            Some(Ok(message)) => {
                trace!(addr = %addr, message = ?message, "Node message");
                coordinator
                    .lock()
                    .await
                    .handle(&mut peer, message, Utc::now())
            }
            Some(Err(ProtocolError::Json(e))) => {
                let trace_id = TraceId::generate();
                warn!(
                    addr = %addr,
                    kiosk_id = ?peer,
                    trace_id = %trace_id,
                    error = %e,
                    "Malformed node message"
                );
                CoordinatorMessage::Error {
                    message: format!("malformed message: {e}"),
                    trace_id,
                }
            }
            Some(Err(ProtocolError::Io(e))) => return Err(e.into()),
            Some(Err(e)) => return Err(FleetServerError::Codec(e.to_string())),
        };

        framed
            .send(reply)
            .await
            .map_err(|e| FleetServerError::Codec(e.to_string()))?;
    }

    Ok(())
}
