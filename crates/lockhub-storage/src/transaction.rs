//! Statements that run inside a caller-owned transaction.
//!
//! A locker transition is durable only together with its audit row, so the
//! repository writes both through these helpers on one transaction and
//! commits once.
//!
//! ```no_run
//! use lockhub_storage::{Database, transaction};
//! # use lockhub_core::{Locker, TransitionRecord};
//!
//! # async fn example(db: Database, locker: Locker, record: TransitionRecord) -> Result<(), Box<dyn std::error::Error>> {
//! let mut tx = db.pool().begin().await?;
//! transaction::upsert_locker(&mut tx, &locker).await?;
//! transaction::append_event(&mut tx, &record).await?;
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```

use crate::error::StorageResult;
use crate::models::LockerRow;
use lockhub_core::{Locker, TransitionRecord};
use sqlx::{Sqlite, Transaction};

/// Insert the locker or overwrite every column of the existing row.
pub async fn upsert_locker(tx: &mut Transaction<'_, Sqlite>, locker: &Locker) -> StorageResult<()> {
    let row = LockerRow::from(locker);
    sqlx::query(
        r#"
        INSERT INTO lockers (
            id, status, zone_id, owner_key, is_vip,
            reserved_at, expires_at, display_name, block_reason, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (id) DO UPDATE SET
            status = excluded.status,
            zone_id = excluded.zone_id,
            owner_key = excluded.owner_key,
            is_vip = excluded.is_vip,
            reserved_at = excluded.reserved_at,
            expires_at = excluded.expires_at,
            display_name = excluded.display_name,
            block_reason = excluded.block_reason,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(row.id)
    .bind(&row.status)
    .bind(&row.zone_id)
    .bind(&row.owner_key)
    .bind(row.is_vip)
    .bind(row.reserved_at)
    .bind(row.expires_at)
    .bind(&row.display_name)
    .bind(&row.block_reason)
    .bind(row.updated_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Append one audit row and return its id.
pub async fn append_event(
    tx: &mut Transaction<'_, Sqlite>,
    record: &TransitionRecord,
) -> StorageResult<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO locker_events (
            locker_id, from_status, to_status, event, owner_key, detail, at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(i64::from(record.locker_id.get()))
    .bind(record.from.as_str())
    .bind(record.to.as_str())
    .bind(record.event.as_str())
    .bind(record.owner_key.as_ref().map(ToString::to_string))
    .bind(&record.detail)
    .bind(record.at)
    .execute(&mut **tx)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Create a `free` locker unless the id already exists. Returns `true` if inserted.
pub async fn insert_locker_if_missing(
    tx: &mut Transaction<'_, Sqlite>,
    locker: &Locker,
) -> StorageResult<bool> {
    let row = LockerRow::from(locker);
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO lockers (id, status, is_vip, display_name, updated_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(row.id)
    .bind(&row.status)
    .bind(row.is_vip)
    .bind(&row.display_name)
    .bind(row.updated_at)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() > 0)
}
