//! Wire messages of the fleet command channel.
//!
//! Nodes and the coordinator exchange JSON documents over TCP, one document
//! per length-delimited frame. Every document carries a `type` tag:
//!
//! ```text
//! node → coordinator   heartbeat | poll | completion
//! coordinator → node   commands  | ack  | error
//! ```
//!
//! Heartbeats and polls are answered with `commands` (possibly empty), a
//! completion with `ack`, and anything the coordinator cannot process with
//! `error`.

use std::marker::PhantomData;

use bytes::{Bytes, BytesMut};
use lockhub_core::constants::MAX_FLEET_FRAME_SIZE;
use lockhub_core::{
    Command, CommandId, CommandKind, CommandOutcome, CommandPayloadError, KioskId, NodeStatus,
    TraceId,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::error::{ProtocolError, Result};

/// Periodic liveness report of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub kiosk_id: KioskId,
    pub zone: Option<String>,
    pub version: String,
    pub status: NodeStatus,
    pub config_hash: String,
}

/// Request for commands queued for a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollRequest {
    pub kiosk_id: KioskId,
    pub zone: Option<String>,
}

/// Result of one command, reported by the node that executed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandCompletion {
    pub command_id: CommandId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CommandCompletion {
    #[must_use]
    pub fn new(command_id: CommandId, outcome: CommandOutcome) -> Self {
        Self {
            command_id,
            success: outcome.success,
            error: outcome.error,
            message: outcome.message,
        }
    }

    #[must_use]
    pub fn outcome(&self) -> CommandOutcome {
        CommandOutcome {
            success: self.success,
            error: self.error.clone(),
            message: self.message.clone(),
        }
    }
}

/// A queued command as it travels to a node: `{id, type, payload}`.
///
/// The payload stays untyped on the wire so that a node can report a
/// payload error for a command it cannot parse instead of dropping the frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireCommand {
    pub id: CommandId,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl WireCommand {
    #[must_use]
    pub fn from_command(command: &Command) -> Self {
        Self {
            id: command.id,
            kind: command.kind.type_name().to_string(),
            payload: command.kind.payload(),
        }
    }

    /// # Errors
    /// Returns the payload error for unknown types or invalid fields.
    pub fn parse(&self) -> std::result::Result<CommandKind, CommandPayloadError> {
        CommandKind::from_wire(&self.kind, &self.payload)
    }
}

/// Messages sent by a kiosk node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeMessage {
    Heartbeat(HeartbeatRequest),
    Poll(PollRequest),
    Completion(CommandCompletion),
}

/// Messages sent by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorMessage {
    Commands {
        commands: Vec<WireCommand>,
    },
    Ack {
        command_id: CommandId,
    },
    Error {
        message: String,
        trace_id: TraceId,
    },
}

/// Length-delimited JSON codec, generic over the inbound and outbound types.
///
/// Frames above [`MAX_FLEET_FRAME_SIZE`] are rejected by the length prefix
/// check before any JSON is parsed.
pub struct FleetCodec<In, Out> {
    inner: LengthDelimitedCodec,
    _marker: PhantomData<fn(Out) -> In>,
}

/// Codec used by a node: sends [`NodeMessage`], receives [`CoordinatorMessage`].
pub type NodeCodec = FleetCodec<CoordinatorMessage, NodeMessage>;

/// Codec used by the coordinator: sends [`CoordinatorMessage`], receives [`NodeMessage`].
pub type CoordinatorCodec = FleetCodec<NodeMessage, CoordinatorMessage>;

impl<In, Out> FleetCodec<In, Out> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FLEET_FRAME_SIZE)
    }

    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .max_frame_length(max_frame_size)
                .new_codec(),
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn max_frame_size(&self) -> usize {
        self.inner.max_frame_length()
    }
}

impl<In, Out> Default for FleetCodec<In, Out> {
    fn default() -> Self {
        Self::new()
    }
}

impl<In, Out> std::fmt::Debug for FleetCodec<In, Out> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetCodec")
            .field("max_frame_size", &self.max_frame_size())
            .finish()
    }
}

impl<In: DeserializeOwned, Out> Decoder for FleetCodec<In, Out> {
    type Item = In;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<In>> {
        match self.inner.decode(src)? {
            Some(frame) => Ok(Some(serde_json::from_slice(&frame)?)),
            None => Ok(None),
        }
    }
}

impl<In, Out: Serialize> Encoder<Out> for FleetCodec<In, Out> {
    type Error = ProtocolError;

    fn encode(&mut self, item: Out, dst: &mut BytesMut) -> Result<()> {
        let json = serde_json::to_vec(&item)?;
        if json.len() > self.max_frame_size() {
            return Err(ProtocolError::FrameTooLarge {
                size: json.len(),
                max_size: self.max_frame_size(),
            });
        }
        self.inner.encode(Bytes::from(json), dst)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lockhub_core::{CommandTarget, LockerId};
    use serde_json::json;

    fn kiosk() -> KioskId {
        KioskId::new("kiosk-1").unwrap()
    }

    #[test]
    fn test_heartbeat_wire_shape() {
        let msg = NodeMessage::Heartbeat(HeartbeatRequest {
            kiosk_id: kiosk(),
            zone: Some("A".to_string()),
            version: "0.1.0".to_string(),
            status: NodeStatus::Online,
            config_hash: "0123456789abcdef".to_string(),
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "heartbeat",
                "kiosk_id": "kiosk-1",
                "zone": "A",
                "version": "0.1.0",
                "status": "online",
                "config_hash": "0123456789abcdef",
            })
        );
    }

    #[test]
    fn test_completion_omits_empty_error() {
        let id = CommandId::generate();
        let msg = NodeMessage::Completion(CommandCompletion::new(id, CommandOutcome::ok("opened")));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "completion");
        assert_eq!(value["success"], true);
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_wire_command_from_command() {
        let command = Command::new(
            CommandKind::UnblockLocker {
                locker_id: LockerId::new(9).unwrap(),
            },
            CommandTarget::Kiosk(kiosk()),
            Utc::now(),
        );
        let wire = WireCommand::from_command(&command);
        let value = serde_json::to_value(&wire).unwrap();
        assert_eq!(value["type"], "unblock_locker");
        assert_eq!(value["payload"], json!({ "locker_id": 9 }));
        assert_eq!(wire.parse().unwrap(), command.kind);
    }

    #[test]
    fn test_unknown_command_still_decodes() {
        let raw = json!({
            "type": "commands",
            "commands": [{ "id": CommandId::generate(), "type": "reboot", "payload": {} }],
        });
        let msg: CoordinatorMessage = serde_json::from_value(raw).unwrap();
        let CoordinatorMessage::Commands { commands } = msg else {
            panic!("expected commands");
        };
        assert!(matches!(
            commands[0].parse(),
            Err(CommandPayloadError::UnknownType(_))
        ));
    }

    #[test]
    fn test_codec_round_trip() {
        let mut node = NodeCodec::new();
        let mut coordinator = CoordinatorCodec::new();
        let mut buf = BytesMut::new();

        let poll = NodeMessage::Poll(PollRequest {
            kiosk_id: kiosk(),
            zone: None,
        });
        node.encode(poll.clone(), &mut buf).unwrap();
        assert_eq!(coordinator.decode(&mut buf).unwrap(), Some(poll));

        let ack = CoordinatorMessage::Ack {
            command_id: CommandId::generate(),
        };
        coordinator.encode(ack.clone(), &mut buf).unwrap();
        assert_eq!(node.decode(&mut buf).unwrap(), Some(ack));
    }

    #[test]
    fn test_codec_rejects_oversized_frame() {
        let mut node = NodeCodec::with_max_frame_size(32);
        let mut buf = BytesMut::new();
        let msg = NodeMessage::Heartbeat(HeartbeatRequest {
            kiosk_id: kiosk(),
            zone: None,
            version: "0.1.0".to_string(),
            status: NodeStatus::Provisioning,
            config_hash: String::new(),
        });
        assert!(matches!(
            node.encode(msg, &mut buf),
            Err(ProtocolError::FrameTooLarge { max_size: 32, .. })
        ));
    }

    #[test]
    fn test_codec_rejects_malformed_json() {
        let mut coordinator = CoordinatorCodec::new();
        let mut buf = BytesMut::new();
        LengthDelimitedCodec::new()
            .encode(Bytes::from_static(b"{not json"), &mut buf)
            .unwrap();
        assert!(matches!(
            coordinator.decode(&mut buf),
            Err(ProtocolError::Json(_))
        ));
    }
}
