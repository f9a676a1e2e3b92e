//! Heartbeat bookkeeping on the coordinator.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use lockhub_core::{HeartbeatRecord, KioskId, NodeStatus};
use lockhub_protocol::HeartbeatRequest;
use serde::Serialize;
use tracing::info;

/// Fleet view of one node at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSummary {
    pub kiosk_id: KioskId,
    pub zone: Option<String>,
    pub status: NodeStatus,
    pub last_seen: DateTime<Utc>,
    pub version: String,
    pub config_hash: String,
}

/// Last heartbeat of every node that has ever reported.
///
/// Offline is never written; it is derived at read time from `last_seen`
/// and the threshold.
#[derive(Debug)]
pub struct HeartbeatRegistry {
    records: HashMap<KioskId, HeartbeatRecord>,
    offline_threshold: chrono::Duration,
}

impl HeartbeatRegistry {
    #[must_use]
    pub fn new(offline_threshold: chrono::Duration) -> Self {
        Self {
            records: HashMap::new(),
            offline_threshold,
        }
    }

    pub fn record(&mut self, heartbeat: &HeartbeatRequest, now: DateTime<Utc>) {
        let record = HeartbeatRecord {
            kiosk_id: heartbeat.kiosk_id.clone(),
            zone: heartbeat.zone.clone(),
            last_seen: now,
            status: heartbeat.status,
            version: heartbeat.version.clone(),
            config_hash: heartbeat.config_hash.clone(),
        };

        let previous = self.records.insert(heartbeat.kiosk_id.clone(), record);
        match previous {
            None => info!(kiosk_id = %heartbeat.kiosk_id, zone = ?heartbeat.zone, "Node registered"),
            Some(prev) if prev.status_at(now, self.offline_threshold) == NodeStatus::Offline => {
                info!(kiosk_id = %heartbeat.kiosk_id, "Node back online");
            }
            Some(prev) if prev.config_hash != heartbeat.config_hash => {
                info!(
                    kiosk_id = %heartbeat.kiosk_id,
                    old_hash = %prev.config_hash,
                    new_hash = %heartbeat.config_hash,
                    "Node zone configuration changed"
                );
            }
            Some(_) => {}
        }
    }

    /// Status of a node at `now`, or `None` if it never reported.
    #[must_use]
    pub fn status(&self, kiosk_id: &KioskId, now: DateTime<Utc>) -> Option<NodeStatus> {
        self.records
            .get(kiosk_id)
            .map(|record| record.status_at(now, self.offline_threshold))
    }

    #[must_use]
    pub fn get(&self, kiosk_id: &KioskId) -> Option<&HeartbeatRecord> {
        self.records.get(kiosk_id)
    }

    /// Every known node, sorted by id.
    #[must_use]
    pub fn fleet_status(&self, now: DateTime<Utc>) -> Vec<NodeSummary> {
        let mut nodes: Vec<NodeSummary> = self
            .records
            .values()
            .map(|record| NodeSummary {
                kiosk_id: record.kiosk_id.clone(),
                zone: record.zone.clone(),
                status: record.status_at(now, self.offline_threshold),
                last_seen: record.last_seen,
                version: record.version.clone(),
                config_hash: record.config_hash.clone(),
            })
            .collect();
        nodes.sort_by(|a, b| a.kiosk_id.cmp(&b.kiosk_id));
        nodes
    }

    #[must_use]
    pub fn online_count(&self, now: DateTime<Utc>) -> usize {
        self.records
            .values()
            .filter(|record| record.status_at(now, self.offline_threshold) == NodeStatus::Online)
            .count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
