//! Typed fleet commands.
//!
//! Commands travel as `{id, type, payload}` where `payload` is a loose JSON
//! object. [`CommandKind::from_wire`] turns that into a closed enum and
//! rejects unknown types and missing or ill-typed fields before any handler
//! runs, so a bad payload never reaches the hardware.

use crate::error::CommandPayloadError;
use crate::types::{LockerId, OwnerKey};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Every command a kiosk node can execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum CommandKind {
    OpenLocker {
        locker_id: LockerId,
        owner_key: Option<OwnerKey>,
        force: bool,
    },
    BulkOpen {
        locker_ids: Vec<LockerId>,
        exclude_vip: bool,
        interval_ms: Option<u64>,
    },
    BlockLocker {
        locker_id: LockerId,
        reason: Option<String>,
    },
    UnblockLocker {
        locker_id: LockerId,
    },
    ReleaseLocker {
        locker_id: LockerId,
    },
    SyncHardware {
        total_lockers: u32,
    },
}

impl CommandKind {
    /// Wire name of the command type.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            CommandKind::OpenLocker { .. } => "open_locker",
            CommandKind::BulkOpen { .. } => "bulk_open",
            CommandKind::BlockLocker { .. } => "block_locker",
            CommandKind::UnblockLocker { .. } => "unblock_locker",
            CommandKind::ReleaseLocker { .. } => "release_locker",
            CommandKind::SyncHardware { .. } => "sync_hardware",
        }
    }

    /// Parse a command from its wire type and payload.
    ///
    /// Numeric fields accept JSON numbers or numeric strings. `exclude_vip`
    /// defaults to `true` and `force` to `false`.
    ///
    /// # Errors
    /// - `CommandPayloadError::UnknownType` for an unrecognised type
    /// - `CommandPayloadError::MissingField` when a required field is absent or null
    /// - `CommandPayloadError::InvalidField` when a field has the wrong shape
    pub fn from_wire(kind: &str, payload: &Value) -> Result<Self, CommandPayloadError> {
        let empty = Map::new();
        let fields = match payload {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => return Err(CommandPayloadError::invalid("payload", "expected an object")),
        };

        match kind {
            "open_locker" => Ok(CommandKind::OpenLocker {
                locker_id: locker_id(fields, "locker_id")?,
                owner_key: optional_string(fields, "owner_key")?
                    .map(|key| {
                        key.parse::<OwnerKey>()
                            .map_err(|e| CommandPayloadError::invalid("owner_key", e.to_string()))
                    })
                    .transpose()?,
                force: optional_bool(fields, "force")?.unwrap_or(false),
            }),
            "bulk_open" => Ok(CommandKind::BulkOpen {
                locker_ids: locker_ids(fields, "locker_ids")?,
                exclude_vip: optional_bool(fields, "exclude_vip")?.unwrap_or(true),
                interval_ms: optional_u64(fields, "interval_ms")?,
            }),
            "block_locker" => Ok(CommandKind::BlockLocker {
                locker_id: locker_id(fields, "locker_id")?,
                reason: optional_string(fields, "reason")?,
            }),
            "unblock_locker" => Ok(CommandKind::UnblockLocker {
                locker_id: locker_id(fields, "locker_id")?,
            }),
            "release_locker" => Ok(CommandKind::ReleaseLocker {
                locker_id: locker_id(fields, "locker_id")?,
            }),
            "sync_hardware" => {
                let total = required(fields, "total_lockers")?;
                let total = as_u64(total, "total_lockers")?;
                let total_lockers = u32::try_from(total)
                    .ok()
                    .filter(|t| *t > 0)
                    .ok_or_else(|| {
                        CommandPayloadError::invalid("total_lockers", format!("{total} out of range"))
                    })?;
                Ok(CommandKind::SyncHardware { total_lockers })
            }
            other => Err(CommandPayloadError::UnknownType(other.to_string())),
        }
    }

    /// Wire payload of the command, without the type tag.
    #[must_use]
    pub fn payload(&self) -> Value {
        match self {
            CommandKind::OpenLocker {
                locker_id,
                owner_key,
                force,
            } => {
                let mut payload = json!({ "locker_id": locker_id.get(), "force": force });
                if let Some(key) = owner_key {
                    payload["owner_key"] = Value::String(key.to_string());
                }
                payload
            }
            CommandKind::BulkOpen {
                locker_ids,
                exclude_vip,
                interval_ms,
            } => {
                let ids: Vec<u32> = locker_ids.iter().map(|id| id.get()).collect();
                let mut payload = json!({ "locker_ids": ids, "exclude_vip": exclude_vip });
                if let Some(interval) = interval_ms {
                    payload["interval_ms"] = json!(interval);
                }
                payload
            }
            CommandKind::BlockLocker { locker_id, reason } => {
                let mut payload = json!({ "locker_id": locker_id.get() });
                if let Some(reason) = reason {
                    payload["reason"] = Value::String(reason.clone());
                }
                payload
            }
            CommandKind::UnblockLocker { locker_id } | CommandKind::ReleaseLocker { locker_id } => {
                json!({ "locker_id": locker_id.get() })
            }
            CommandKind::SyncHardware { total_lockers } => json!({ "total_lockers": total_lockers }),
        }
    }
}

fn required<'a>(
    fields: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a Value, CommandPayloadError> {
    fields
        .get(field)
        .filter(|value| !value.is_null())
        .ok_or(CommandPayloadError::MissingField { field })
}

fn as_u64(value: &Value, field: &'static str) -> Result<u64, CommandPayloadError> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| CommandPayloadError::invalid(field, format!("{n} is not a non-negative integer"))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| CommandPayloadError::invalid(field, format!("{s:?} is not a number"))),
        other => Err(CommandPayloadError::invalid(
            field,
            format!("expected a number, got {other}"),
        )),
    }
}

fn to_locker_id(value: &Value, field: &'static str) -> Result<LockerId, CommandPayloadError> {
    let raw = as_u64(value, field)?;
    u32::try_from(raw)
        .ok()
        .and_then(|id| LockerId::new(id).ok())
        .ok_or_else(|| CommandPayloadError::invalid(field, format!("{raw} is not a locker id")))
}

fn locker_id(fields: &Map<String, Value>, field: &'static str) -> Result<LockerId, CommandPayloadError> {
    to_locker_id(required(fields, field)?, field)
}

fn locker_ids(
    fields: &Map<String, Value>,
    field: &'static str,
) -> Result<Vec<LockerId>, CommandPayloadError> {
    let Value::Array(items) = required(fields, field)? else {
        return Err(CommandPayloadError::invalid(field, "expected an array"));
    };
    if items.is_empty() {
        return Err(CommandPayloadError::invalid(field, "must not be empty"));
    }
    items.iter().map(|item| to_locker_id(item, field)).collect()
}

fn optional_bool(
    fields: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<bool>, CommandPayloadError> {
    match fields.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(CommandPayloadError::invalid(
            field,
            format!("expected a boolean, got {other}"),
        )),
    }
}

fn optional_u64(
    fields: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<u64>, CommandPayloadError> {
    match fields.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => as_u64(value, field).map(Some),
    }
}

fn optional_string(
    fields: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<String>, CommandPayloadError> {
    match fields.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(CommandPayloadError::invalid(
            field,
            format!("expected a string, got {other}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn id(n: u32) -> LockerId {
        LockerId::new(n).unwrap()
    }

    #[test]
    fn test_open_locker_defaults() {
        let cmd = CommandKind::from_wire("open_locker", &json!({ "locker_id": 5 })).unwrap();
        assert_eq!(
            cmd,
            CommandKind::OpenLocker {
                locker_id: id(5),
                owner_key: None,
                force: false,
            }
        );
    }

    #[test]
    fn test_numeric_string_is_accepted() {
        let cmd = CommandKind::from_wire("release_locker", &json!({ "locker_id": "12" })).unwrap();
        assert_eq!(cmd, CommandKind::ReleaseLocker { locker_id: id(12) });
    }

    #[test]
    fn test_bulk_open_payload() {
        let cmd = CommandKind::from_wire(
            "bulk_open",
            &json!({ "locker_ids": [10, 11, "12"], "interval_ms": 250 }),
        )
        .unwrap();
        assert_eq!(
            cmd,
            CommandKind::BulkOpen {
                locker_ids: vec![id(10), id(11), id(12)],
                exclude_vip: true,
                interval_ms: Some(250),
            }
        );
    }

    #[rstest]
    #[case("open_locker", json!({}), "locker_id")]
    #[case("open_locker", json!({ "locker_id": null }), "locker_id")]
    #[case("block_locker", Value::Null, "locker_id")]
    #[case("bulk_open", json!({ "exclude_vip": false }), "locker_ids")]
    #[case("sync_hardware", json!({}), "total_lockers")]
    fn test_missing_fields(
        #[case] kind: &str,
        #[case] payload: Value,
        #[case] field: &'static str,
    ) {
        let err = CommandKind::from_wire(kind, &payload).unwrap_err();
        assert_eq!(err, CommandPayloadError::MissingField { field });
    }

    #[rstest]
    #[case("open_locker", json!({ "locker_id": 0 }))]
    #[case("open_locker", json!({ "locker_id": -3 }))]
    #[case("open_locker", json!({ "locker_id": 1, "force": "yes" }))]
    #[case("bulk_open", json!({ "locker_ids": [] }))]
    #[case("bulk_open", json!({ "locker_ids": 4 }))]
    #[case("sync_hardware", json!({ "total_lockers": 0 }))]
    #[case("unblock_locker", json!([1]))]
    fn test_invalid_fields(#[case] kind: &str, #[case] payload: Value) {
        let err = CommandKind::from_wire(kind, &payload).unwrap_err();
        assert!(matches!(err, CommandPayloadError::InvalidField { .. }), "{err}");
    }

    #[test]
    fn test_unknown_type() {
        let err = CommandKind::from_wire("self_destruct", &json!({})).unwrap_err();
        assert_eq!(err, CommandPayloadError::UnknownType("self_destruct".to_string()));
    }

    #[test]
    fn test_payload_is_accepted_back() {
        let commands = [
            CommandKind::OpenLocker {
                locker_id: id(3),
                owner_key: Some(OwnerKey::Staff("ops".to_string())),
                force: true,
            },
            CommandKind::BlockLocker {
                locker_id: id(4),
                reason: Some("door jammed".to_string()),
            },
            CommandKind::SyncHardware { total_lockers: 48 },
        ];
        for cmd in commands {
            let parsed = CommandKind::from_wire(cmd.type_name(), &cmd.payload()).unwrap();
            assert_eq!(parsed, cmd);
        }
    }
}
