#![allow(async_fn_in_trait)]

use chrono::{DateTime, Utc};
use lockhub_core::{Locker, LockerId, TransitionRecord};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::models::{LockerEventRow, LockerRow};
use crate::transaction;

/// Persistence of locker records and their transition log.
pub trait LockerRepository: Send + Sync {
    async fn find(&self, id: LockerId) -> StorageResult<Option<Locker>>;

    /// All lockers ordered by id.
    async fn find_all(&self) -> StorageResult<Vec<Locker>>;

    /// Create missing `free` lockers `1..=total`. Existing rows are untouched.
    ///
    /// Returns the number of lockers created.
    async fn ensure_range(&self, total: u32, now: DateTime<Utc>) -> StorageResult<u32>;

    /// Write attribute changes that are not lifecycle transitions.
    async fn save(&self, locker: &Locker) -> StorageResult<()>;

    /// Write the locker row and its transition records atomically.
    async fn save_transition(
        &self,
        locker: &Locker,
        records: &[TransitionRecord],
    ) -> StorageResult<()>;

    /// Most recent transitions of a locker, newest first.
    async fn events(&self, id: LockerId, limit: u32) -> StorageResult<Vec<TransitionRecord>>;
}

/// SQLite implementation of [`LockerRepository`]
#[derive(Debug, Clone)]
pub struct SqliteLockerRepository {
    pool: SqlitePool,
}

impl SqliteLockerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl LockerRepository for SqliteLockerRepository {
    async fn find(&self, id: LockerId) -> StorageResult<Option<Locker>> {
        let row = sqlx::query_as::<_, LockerRow>(
            r#"
            SELECT id, status, zone_id, owner_key, is_vip,
                   reserved_at, expires_at, display_name, block_reason, updated_at
            FROM lockers
            WHERE id = ?
            "#,
        )
        .bind(i64::from(id.get()))
        .fetch_optional(&self.pool)
        .await?;

        row.map(Locker::try_from).transpose()
    }

    async fn find_all(&self) -> StorageResult<Vec<Locker>> {
        let rows = sqlx::query_as::<_, LockerRow>(
            r#"
            SELECT id, status, zone_id, owner_key, is_vip,
                   reserved_at, expires_at, display_name, block_reason, updated_at
            FROM lockers
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Locker::try_from).collect()
    }

    async fn ensure_range(&self, total: u32, now: DateTime<Utc>) -> StorageResult<u32> {
        let mut tx = self.pool.begin().await?;
        let mut created = 0;
        for id in 1..=total {
            let id = LockerId::new(id).map_err(|e| StorageError::Configuration(e.to_string()))?;
            if transaction::insert_locker_if_missing(&mut tx, &Locker::new(id, now)).await? {
                created += 1;
            }
        }
        tx.commit().await?;

        if created > 0 {
            debug!(created, total, "Created missing locker records");
        }
        Ok(created)
    }

    async fn save(&self, locker: &Locker) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE lockers
            SET zone_id = ?, is_vip = ?, display_name = ?, block_reason = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&locker.zone_id)
        .bind(locker.is_vip)
        .bind(&locker.display_name)
        .bind(&locker.block_reason)
        .bind(locker.updated_at)
        .bind(i64::from(locker.id.get()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::locker_not_found(locker.id));
        }
        Ok(())
    }

    async fn save_transition(
        &self,
        locker: &Locker,
        records: &[TransitionRecord],
    ) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;
        transaction::upsert_locker(&mut tx, locker).await?;
        for record in records {
            transaction::append_event(&mut tx, record).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn events(&self, id: LockerId, limit: u32) -> StorageResult<Vec<TransitionRecord>> {
        let rows = sqlx::query_as::<_, LockerEventRow>(
            r#"
            SELECT id, locker_id, from_status, to_status, event, owner_key, detail, at
            FROM locker_events
            WHERE locker_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(i64::from(id.get()))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TransitionRecord::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Database;
    use lockhub_core::{LockerEvent, LockerStatus, OwnerKey};

    async fn setup() -> SqliteLockerRepository {
        let db = Database::in_memory().await.unwrap();
        SqliteLockerRepository::new(db.pool().clone())
    }

    fn id(n: u32) -> LockerId {
        LockerId::new(n).unwrap()
    }

    #[tokio::test]
    async fn test_ensure_range_is_idempotent() {
        let repo = setup().await;
        let now = Utc::now();

        assert_eq!(repo.ensure_range(4, now).await.unwrap(), 4);
        assert_eq!(repo.ensure_range(6, now).await.unwrap(), 2);
        assert_eq!(repo.ensure_range(6, now).await.unwrap(), 0);

        let all = repo.find_all().await.unwrap();
        assert_eq!(all.len(), 6);
        assert!(all.iter().all(|l| l.status == LockerStatus::Free));
        assert_eq!(all[2].display_name, "Locker 3");
    }

    #[tokio::test]
    async fn test_ensure_range_keeps_existing_state() {
        let repo = setup().await;
        let now = Utc::now();
        repo.ensure_range(2, now).await.unwrap();

        let mut locker = repo.find(id(2)).await.unwrap().unwrap();
        locker.status = LockerStatus::Blocked;
        locker.block_reason = Some("broken hinge".to_string());
        repo.save_transition(&locker, &[]).await.unwrap();

        repo.ensure_range(3, now).await.unwrap();
        let locker = repo.find(id(2)).await.unwrap().unwrap();
        assert_eq!(locker.status, LockerStatus::Blocked);
    }

    #[tokio::test]
    async fn test_transition_is_written_with_event() {
        let repo = setup().await;
        let now = Utc::now();
        repo.ensure_range(1, now).await.unwrap();

        let owner = OwnerKey::card("A1B2").unwrap();
        let mut locker = repo.find(id(1)).await.unwrap().unwrap();
        locker.status = LockerStatus::Reserved;
        locker.owner_key = Some(owner.clone());
        locker.reserved_at = Some(now);
        let record = TransitionRecord::new(
            id(1),
            LockerStatus::Free,
            LockerStatus::Reserved,
            LockerEvent::Assign,
            now,
        )
        .with_owner(Some(owner.clone()));

        repo.save_transition(&locker, std::slice::from_ref(&record))
            .await
            .unwrap();

        let stored = repo.find(id(1)).await.unwrap().unwrap();
        assert_eq!(stored.status, LockerStatus::Reserved);
        assert!(stored.is_held_by(&owner));

        let events = repo.events(id(1), 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, LockerEvent::Assign);
        assert_eq!(events[0].owner_key, Some(owner));
    }

    #[tokio::test]
    async fn test_save_unknown_locker_is_not_found() {
        let repo = setup().await;
        let locker = Locker::new(id(99), Utc::now());
        assert!(matches!(
            repo.save(&locker).await,
            Err(StorageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_find_missing_locker() {
        let repo = setup().await;
        assert!(repo.find(id(5)).await.unwrap().is_none());
    }
}
