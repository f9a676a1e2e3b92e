use chrono::{DateTime, Utc};
use lockhub_core::{Locker, LockerEvent, LockerId, LockerStatus, OwnerKey, TransitionRecord};
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Row of the `lockers` table.
///
/// Enum and key columns are stored as their textual forms (`free`,
/// `card:04AB..`) so the database stays readable with the sqlite shell.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LockerRow {
    pub id: i64,
    pub status: String,
    pub zone_id: Option<String>,
    pub owner_key: Option<String>,
    pub is_vip: bool,
    pub reserved_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub display_name: String,
    pub block_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Locker> for LockerRow {
    fn from(locker: &Locker) -> Self {
        Self {
            id: i64::from(locker.id.get()),
            status: locker.status.as_str().to_string(),
            zone_id: locker.zone_id.clone(),
            owner_key: locker.owner_key.as_ref().map(ToString::to_string),
            is_vip: locker.is_vip,
            reserved_at: locker.reserved_at,
            expires_at: locker.expires_at,
            display_name: locker.display_name.clone(),
            block_reason: locker.block_reason.clone(),
            updated_at: locker.updated_at,
        }
    }
}

impl TryFrom<LockerRow> for Locker {
    type Error = StorageError;

    fn try_from(row: LockerRow) -> StorageResult<Self> {
        Ok(Locker {
            id: parse_locker_id("lockers", row.id)?,
            status: row
                .status
                .parse::<LockerStatus>()
                .map_err(|e| StorageError::invalid_record("lockers", e))?,
            zone_id: row.zone_id,
            owner_key: parse_owner("lockers", row.owner_key)?,
            is_vip: row.is_vip,
            reserved_at: row.reserved_at,
            expires_at: row.expires_at,
            display_name: row.display_name,
            block_reason: row.block_reason,
            updated_at: row.updated_at,
        })
    }
}

/// Row of the `locker_events` audit table.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LockerEventRow {
    pub id: i64,
    pub locker_id: i64,
    pub from_status: String,
    pub to_status: String,
    pub event: String,
    pub owner_key: Option<String>,
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

impl TryFrom<LockerEventRow> for TransitionRecord {
    type Error = StorageError;

    fn try_from(row: LockerEventRow) -> StorageResult<Self> {
        let status = |value: &str| {
            value
                .parse::<LockerStatus>()
                .map_err(|e| StorageError::invalid_record("locker_events", e))
        };
        Ok(TransitionRecord {
            locker_id: parse_locker_id("locker_events", row.locker_id)?,
            from: status(&row.from_status)?,
            to: status(&row.to_status)?,
            event: row
                .event
                .parse::<LockerEvent>()
                .map_err(|e| StorageError::invalid_record("locker_events", e))?,
            owner_key: parse_owner("locker_events", row.owner_key)?,
            detail: row.detail,
            at: row.at,
        })
    }
}

fn parse_locker_id(table: &'static str, id: i64) -> StorageResult<LockerId> {
    u32::try_from(id)
        .map_err(|e| StorageError::invalid_record(table, e))
        .and_then(|id| LockerId::new(id).map_err(|e| StorageError::invalid_record(table, e)))
}

fn parse_owner(table: &'static str, key: Option<String>) -> StorageResult<Option<OwnerKey>> {
    key.map(|key| {
        key.parse::<OwnerKey>()
            .map_err(|e| StorageError::invalid_record(table, e))
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_conversion_keeps_owner() {
        let mut locker = Locker::new(LockerId::new(7).unwrap(), Utc::now());
        locker.status = LockerStatus::Owned;
        locker.owner_key = Some(OwnerKey::card("04abcd").unwrap());

        let row = LockerRow::from(&locker);
        assert_eq!(row.owner_key.as_deref(), Some("card:04ABCD"));
        assert_eq!(row.status, "owned");

        let back = Locker::try_from(row).unwrap();
        assert_eq!(back, locker);
    }

    #[test]
    fn test_unknown_status_is_invalid_record() {
        let mut row = LockerRow::from(&Locker::new(LockerId::new(1).unwrap(), Utc::now()));
        row.status = "melted".to_string();
        assert!(matches!(
            Locker::try_from(row),
            Err(StorageError::InvalidRecord { table: "lockers", .. })
        ));
    }
}
