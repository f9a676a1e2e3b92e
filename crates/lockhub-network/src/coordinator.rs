//! Message handling of the fleet coordinator.
//!
//! [`Coordinator`] is transport-free: the server feeds it decoded
//! [`NodeMessage`]s together with the identity of the connection and writes
//! back whatever it returns.

use chrono::{DateTime, Utc};
use lockhub_core::{CommandId, CommandKind, CommandTarget, KioskId, TraceId};
use lockhub_protocol::{CoordinatorMessage, NodeMessage, WireCommand};
use tracing::{debug, warn};

use crate::queue::CommandQueue;
use crate::registry::{HeartbeatRegistry, NodeSummary};

/// Timing knobs of the coordinator.
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    pub offline_threshold: chrono::Duration,
    pub result_timeout: chrono::Duration,
    /// Terminal commands older than this are dropped by [`Coordinator::sweep`].
    pub command_retention: chrono::Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        use lockhub_core::constants::{
            DEFAULT_COMMAND_RETENTION_SECS, DEFAULT_OFFLINE_THRESHOLD_SECS,
            DEFAULT_RESULT_TIMEOUT_SECS,
        };
        Self {
            offline_threshold: chrono::Duration::seconds(DEFAULT_OFFLINE_THRESHOLD_SECS as i64),
            result_timeout: chrono::Duration::seconds(DEFAULT_RESULT_TIMEOUT_SECS as i64),
            command_retention: chrono::Duration::seconds(DEFAULT_COMMAND_RETENTION_SECS as i64),
        }
    }
}

#[derive(Debug)]
pub struct Coordinator {
    registry: HeartbeatRegistry,
    queue: CommandQueue,
    command_retention: chrono::Duration,
}

impl Coordinator {
    #[must_use]
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            registry: HeartbeatRegistry::new(config.offline_threshold),
            queue: CommandQueue::new(config.result_timeout),
            command_retention: config.command_retention,
        }
    }

    /// Queue a command for later delivery.
    pub fn submit(
        &mut self,
        kind: CommandKind,
        target: CommandTarget,
        now: DateTime<Utc>,
    ) -> CommandId {
        self.queue.enqueue(kind, target, now)
    }

    /// Answer one node message.
    ///
    /// `peer` is the kiosk bound to the connection. A heartbeat or poll binds
    /// it; a completion on a connection that has not identified itself is
    /// rejected.
    pub fn handle(
        &mut self,
        peer: &mut Option<KioskId>,
        message: NodeMessage,
        now: DateTime<Utc>,
    ) -> CoordinatorMessage {
        match message {
            NodeMessage::Heartbeat(heartbeat) => {
                self.registry.record(&heartbeat, now);
                *peer = Some(heartbeat.kiosk_id.clone());
                self.deliver(&heartbeat.kiosk_id, heartbeat.zone.as_deref(), now)
            }
            NodeMessage::Poll(poll) => {
                *peer = Some(poll.kiosk_id.clone());
                self.deliver(&poll.kiosk_id, poll.zone.as_deref(), now)
            }
            NodeMessage::Completion(completion) => {
                let Some(kiosk_id) = peer.as_ref() else {
                    return rejection(
                        "completion before heartbeat or poll on this connection".to_string(),
                    );
                };
                match self.queue.complete(kiosk_id, &completion, now) {
                    Ok(_) => CoordinatorMessage::Ack {
                        command_id: completion.command_id,
                    },
                    Err(e) => rejection(e.to_string()),
                }
            }
        }
    }

    /// Fail overdue deliveries and forget terminal commands past retention.
    ///
    /// Returns the ids failed by this sweep.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<CommandId> {
        let failed = self.queue.fail_stale(now);
        let pruned = self.queue.prune(now - self.command_retention);
        if pruned > 0 {
            debug!(pruned, "Pruned finished commands");
        }
        failed
    }

    #[must_use]
    pub fn fleet_status(&self, now: DateTime<Utc>) -> Vec<NodeSummary> {
        self.registry.fleet_status(now)
    }

    #[must_use]
    pub fn registry(&self) -> &HeartbeatRegistry {
        &self.registry
    }

    #[must_use]
    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut CommandQueue {
        &mut self.queue
    }

    fn deliver(
        &mut self,
        kiosk_id: &KioskId,
        zone: Option<&str>,
        now: DateTime<Utc>,
    ) -> CoordinatorMessage {
        let commands = self
            .queue
            .take_for(kiosk_id, zone, now)
            .iter()
            .map(WireCommand::from_command)
            .collect();
        CoordinatorMessage::Commands { commands }
    }
}

fn rejection(message: String) -> CoordinatorMessage {
    let trace_id = TraceId::generate();
    warn!(trace_id = %trace_id, error = %message, "Rejected node message");
    CoordinatorMessage::Error { message, trace_id }
}
