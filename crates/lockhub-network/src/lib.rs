//! Fleet command channel between kiosk nodes and the coordinator.
//!
//! Nodes open TCP connections to the coordinator and speak the JSON
//! documents defined in [`lockhub_protocol::fleet`]:
//!
//! - [`FleetClient`]: node side, one request and one reply at a time.
//! - [`FleetServer`]: coordinator side, one task per node connection.
//! - [`Coordinator`]: heartbeat registry and command queue behind the server.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lockhub_network::{Coordinator, CoordinatorConfig, FleetServer, FleetServerConfig};
//! use tokio::sync::Mutex;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let coordinator = Arc::new(Mutex::new(Coordinator::new(CoordinatorConfig::default())));
//! let server = FleetServer::bind(FleetServerConfig::default(), coordinator).await?;
//! server.run(CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod client;
pub mod coordinator;
pub mod error;
pub mod queue;
pub mod registry;
pub mod server;

pub use backoff::ReconnectBackoff;
pub use client::{FleetClient, FleetClientConfig};
pub use coordinator::{Coordinator, CoordinatorConfig};
pub use error::{FleetClientError, FleetServerError, QueueError};
pub use queue::{CommandQueue, CompletionAck};
pub use registry::{HeartbeatRegistry, NodeSummary};
pub use server::{FleetServer, FleetServerConfig};
