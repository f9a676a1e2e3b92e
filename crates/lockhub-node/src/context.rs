//! Explicit per-node context.
//!
//! Everything a node component needs is handed to it at construction
//! through [`NodeContext`], so several independent nodes can live in one
//! process (tests run many side by side).

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use lockhub_core::KioskId;
use lockhub_hardware::RelayDriver;
use lockhub_storage::{SqliteLockerRepository, SqliteZoneConfigRepository};

use crate::zones::ZoneRegistry;

/// Source of wall-clock time.
pub trait Clock: fmt::Debug + Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared collaborators of one kiosk node.
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub kiosk_id: KioskId,
    pub zone: Option<String>,
    pub clock: Arc<dyn Clock>,
    pub lockers: SqliteLockerRepository,
    pub zone_store: SqliteZoneConfigRepository,
    pub zones: Arc<ZoneRegistry>,
    pub driver: RelayDriver,
}

impl NodeContext {
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
