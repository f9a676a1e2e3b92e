//! Shared fixture for node integration tests.
//!
//! A fixture is an in-memory database, a mock relay chain driven through a
//! real bus worker, and a [`ManualClock`] the test moves by hand. Bus and
//! pulse timings are kept in the millisecond range so tests run on real time.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use lockhub_core::{KioskId, LockerId, ZoneConfig};
use lockhub_hardware::mock::{MockRelayBoard, MockRelayHandle};
use lockhub_hardware::{
    AnyRelayTransport, BusConfig, BusHandle, DriverConfig, RelayBus, RelayDriver, RetryPolicy,
    WriteMode,
};
use lockhub_node::{FallbackPolicy, LockerSettings, LockerStateManager, ManualClock, NodeContext, ZoneRegistry};
use lockhub_storage::{
    Database, LockerRepository, SqliteLockerRepository, SqliteZoneConfigRepository,
};

pub struct Fixture {
    pub manager: Arc<LockerStateManager>,
    pub board: MockRelayHandle,
    pub clock: Arc<ManualClock>,
    pub db: Database,
    pub bus: BusHandle,
}

pub struct FixtureBuilder {
    zones: ZoneConfig,
    slaves: Vec<u8>,
    pulse: Duration,
    missing: Vec<u32>,
}

impl FixtureBuilder {
    pub fn legacy(total: u32) -> Self {
        Self {
            zones: ZoneConfig::legacy(total),
            slaves: vec![1],
            pulse: Duration::from_millis(5),
            missing: Vec::new(),
        }
    }

    pub fn zoned(config: ZoneConfig, slaves: &[u8]) -> Self {
        Self {
            zones: config,
            slaves: slaves.to_vec(),
            pulse: Duration::from_millis(5),
            missing: Vec::new(),
        }
    }

    pub fn pulse(mut self, pulse: Duration) -> Self {
        self.pulse = pulse;
        self
    }

    /// Locker ids whose records are deleted before the manager loads.
    pub fn missing(mut self, ids: &[u32]) -> Self {
        self.missing = ids.to_vec();
        self
    }

    pub async fn build(self) -> Fixture {
        let db = Database::in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
        ));

        let repo = SqliteLockerRepository::new(db.pool().clone());
        repo.ensure_range(self.zones.total_lockers, Utc::now())
            .await
            .unwrap();
        for id in &self.missing {
            sqlx::query("DELETE FROM lockers WHERE id = ?")
                .bind(i64::from(*id))
                .execute(db.pool())
                .await
                .unwrap();
        }

        let (board, handle) = MockRelayBoard::new(&self.slaves);
        let (bus, bus_handle) = RelayBus::spawn(
            AnyRelayTransport::Mock(board),
            BusConfig {
                timeout: Duration::from_millis(50),
                burst_interval: Duration::from_millis(1),
                retry: RetryPolicy::none(),
                queue_depth: 16,
            },
        );
        let driver = RelayDriver::new(
            bus,
            DriverConfig {
                pulse: self.pulse,
                write_mode: WriteMode::Register,
                verify_readback: false,
            },
        );

        let ctx = NodeContext {
            kiosk_id: KioskId::new("kiosk-test").unwrap(),
            zone: None,
            clock: clock.clone(),
            lockers: repo,
            zone_store: SqliteZoneConfigRepository::new(db.pool().clone()),
            zones: Arc::new(ZoneRegistry::new(self.zones, FallbackPolicy::PerLocker).unwrap()),
            driver,
        };
        let manager = LockerStateManager::load(ctx, LockerSettings::default())
            .await
            .unwrap();

        Fixture {
            manager: Arc::new(manager),
            board: handle,
            clock,
            db,
            bus: bus_handle,
        }
    }
}

pub fn id(n: u32) -> LockerId {
    LockerId::new(n).unwrap()
}
