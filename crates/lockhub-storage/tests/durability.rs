//! Records survive closing and reopening the database file.

use chrono::Utc;
use lockhub_core::{
    LockerEvent, LockerId, LockerStatus, OwnerKey, TransitionRecord, Zone, ZoneConfig, ZoneRange,
};
use lockhub_storage::{
    Database, DatabaseConfig, LockerRepository, SqliteLockerRepository,
    SqliteZoneConfigRepository, ZoneConfigRepository,
};

#[tokio::test]
async fn test_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("node.db").to_string_lossy().into_owned();
    let id = LockerId::new(3).unwrap();
    let owner = OwnerKey::card("CAFE01").unwrap();
    let zones = ZoneConfig::with_zones(16, vec![Zone::new("lobby", vec![ZoneRange::new(1, 16)])]);

    {
        let db = Database::new(DatabaseConfig::new(&path)).await.unwrap();
        let lockers = SqliteLockerRepository::new(db.pool().clone());
        let configs = SqliteZoneConfigRepository::new(db.pool().clone());
        let now = Utc::now();

        lockers.ensure_range(16, now).await.unwrap();
        configs.save(&zones, now).await.unwrap();

        let mut locker = lockers.find(id).await.unwrap().unwrap();
        locker.status = LockerStatus::Owned;
        locker.owner_key = Some(owner.clone());
        locker.is_vip = true;
        let records = [
            TransitionRecord::new(id, LockerStatus::Free, LockerStatus::Reserved, LockerEvent::Assign, now)
                .with_owner(Some(owner.clone())),
            TransitionRecord::new(id, LockerStatus::Reserved, LockerStatus::Owned, LockerEvent::Confirm, now)
                .with_owner(Some(owner.clone())),
        ];
        lockers.save_transition(&locker, &records).await.unwrap();
        db.close().await;
    }

    let db = Database::new(DatabaseConfig::new(&path)).await.unwrap();
    let lockers = SqliteLockerRepository::new(db.pool().clone());
    let configs = SqliteZoneConfigRepository::new(db.pool().clone());

    let locker = lockers.find(id).await.unwrap().unwrap();
    assert_eq!(locker.status, LockerStatus::Owned);
    assert!(locker.is_vip);
    assert!(locker.is_held_by(&owner));
    assert_eq!(lockers.find_all().await.unwrap().len(), 16);

    let events = lockers.events(id, 10).await.unwrap();
    let kinds: Vec<_> = events.iter().map(|e| e.event).collect();
    assert_eq!(kinds, vec![LockerEvent::Confirm, LockerEvent::Assign]);

    assert_eq!(configs.load().await.unwrap(), Some(zones));
}
