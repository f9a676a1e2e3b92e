//! TOML configuration of a node and of the coordinator.
//!
//! ```toml
//! [node]
//! kiosk_id = "kiosk-1"
//! zone = "mens"
//! coordinator_addr = "10.0.0.5:7400"
//!
//! [bus]
//! transport = "serial"
//! device = "/dev/ttyUSB0"
//!
//! [zones]
//! zones_enabled = true
//! total_lockers = 32
//!
//! [[zones.zones]]
//! id = "mens"
//! enabled = true
//! ranges = [{ start = 1, end = 32 }]
//! ```
//!
//! Every section and key is optional; missing values take the defaults from
//! [`lockhub_core::constants`].

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use lockhub_core::constants::{
    DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_MAX_MS, DEFAULT_BAUD_RATE, DEFAULT_BURST_INTERVAL_MS,
    DEFAULT_BUS_QUEUE_DEPTH, DEFAULT_BUS_TIMEOUT_MS, DEFAULT_CHANNELS_PER_CARD,
    DEFAULT_COMMAND_RETENTION_SECS, DEFAULT_COORDINATOR_PORT, DEFAULT_HEARTBEAT_INTERVAL_SECS,
    DEFAULT_MAX_RETRIES, DEFAULT_OFFLINE_THRESHOLD_SECS, DEFAULT_POLL_INTERVAL_SECS,
    DEFAULT_PULSE_MS, DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_RESERVATION_SWEEP_SECS,
    DEFAULT_RESERVATION_TTL_SECS, DEFAULT_RESULT_TIMEOUT_SECS,
};
use lockhub_core::{KioskId, Zone, ZoneConfig};
use lockhub_hardware::{BusConfig, DriverConfig, RetryPolicy, SerialConfig, WriteMode};
use lockhub_network::{CoordinatorConfig, FleetClientConfig, FleetServerConfig};
use serde::{Deserialize, Serialize};

use crate::error::{NodeError, Result};
use crate::lockers::LockerSettings;
use crate::zones::FallbackPolicy;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node: NodeSettings,
    pub bus: BusSettings,
    pub zones: ZoneSettings,
    pub coordinator: CoordinatorSettings,
}

impl Config {
    /// Read and parse a TOML file.
    ///
    /// # Errors
    /// `NodeError::Configuration` if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            NodeError::configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// # Errors
    /// `NodeError::Configuration` on invalid TOML or mistyped keys.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| NodeError::configuration(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    pub kiosk_id: String,
    /// Zone this kiosk serves in the fleet; `None` for a kiosk outside zones.
    pub zone: Option<String>,
    pub version: String,
    pub coordinator_addr: String,
    pub heartbeat_interval_secs: u64,
    pub poll_interval_secs: u64,
    pub request_timeout_ms: u64,
    pub reservation_ttl_secs: u64,
    pub reservation_sweep_secs: u64,
    pub fallback_policy: FallbackPolicy,
    pub database_path: String,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            kiosk_id: "kiosk-1".to_string(),
            zone: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
            coordinator_addr: format!("127.0.0.1:{DEFAULT_COORDINATOR_PORT}"),
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            reservation_ttl_secs: DEFAULT_RESERVATION_TTL_SECS,
            reservation_sweep_secs: DEFAULT_RESERVATION_SWEEP_SECS,
            fallback_policy: FallbackPolicy::default(),
            database_path: "lockhub.db".to_string(),
        }
    }
}

impl NodeSettings {
    /// # Errors
    /// `NodeError::Configuration` for an invalid kiosk id.
    pub fn kiosk_id(&self) -> Result<KioskId> {
        KioskId::new(&self.kiosk_id)
            .map_err(|e| NodeError::configuration(format!("node.kiosk_id: {e}")))
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    #[must_use]
    pub fn reservation_sweep(&self) -> Duration {
        Duration::from_secs(self.reservation_sweep_secs.max(1))
    }

    #[must_use]
    pub fn locker_settings(&self) -> LockerSettings {
        LockerSettings {
            reservation_ttl: secs(self.reservation_ttl_secs),
        }
    }

    #[must_use]
    pub fn fleet_client_config(&self) -> FleetClientConfig {
        FleetClientConfig {
            server_addr: self.coordinator_addr.clone(),
            timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    #[default]
    Serial,
    Tcp,
    /// Simulated relay cards; no hardware needed.
    Mock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    pub transport: TransportKind,
    pub device: String,
    pub baud_rate: u32,
    /// `host:port` of the RTU-over-TCP gateway.
    pub gateway_addr: Option<String>,
    pub timeout_ms: u64,
    pub pulse_ms: u64,
    pub burst_interval_ms: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub write_mode: WriteMode,
    pub verify_readback: bool,
    pub queue_depth: usize,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            device: SerialConfig::default().device,
            baud_rate: DEFAULT_BAUD_RATE,
            gateway_addr: None,
            timeout_ms: DEFAULT_BUS_TIMEOUT_MS,
            pulse_ms: DEFAULT_PULSE_MS,
            burst_interval_ms: DEFAULT_BURST_INTERVAL_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            write_mode: WriteMode::default(),
            verify_readback: false,
            queue_depth: DEFAULT_BUS_QUEUE_DEPTH,
        }
    }
}

impl BusSettings {
    #[must_use]
    pub fn bus_config(&self) -> BusConfig {
        BusConfig {
            timeout: Duration::from_millis(self.timeout_ms),
            burst_interval: Duration::from_millis(self.burst_interval_ms),
            retry: RetryPolicy {
                max_retries: self.max_retries,
                base_delay: Duration::from_millis(self.backoff_base_ms),
                max_delay: Duration::from_millis(self.backoff_max_ms),
            },
            queue_depth: self.queue_depth.max(1),
        }
    }

    #[must_use]
    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            pulse: Duration::from_millis(self.pulse_ms),
            write_mode: self.write_mode,
            verify_readback: self.verify_readback,
        }
    }

    #[must_use]
    pub fn serial_config(&self) -> SerialConfig {
        SerialConfig {
            device: self.device.clone(),
            baud_rate: self.baud_rate,
        }
    }

    /// # Errors
    /// `NodeError::Configuration` when the gateway address is missing or invalid.
    pub fn gateway_addr(&self) -> Result<SocketAddr> {
        let addr = self
            .gateway_addr
            .as_deref()
            .ok_or_else(|| NodeError::configuration("bus.gateway_addr is required for tcp"))?;
        addr.parse()
            .map_err(|e| NodeError::configuration(format!("bus.gateway_addr {addr}: {e}")))
    }
}

/// Zone layout used to seed storage on first start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneSettings {
    pub zones_enabled: bool,
    pub total_lockers: u32,
    pub channels_per_card: u16,
    pub zones: Vec<Zone>,
}

impl Default for ZoneSettings {
    fn default() -> Self {
        Self {
            zones_enabled: false,
            total_lockers: 0,
            channels_per_card: DEFAULT_CHANNELS_PER_CARD,
            zones: Vec::new(),
        }
    }
}

impl ZoneSettings {
    #[must_use]
    pub fn to_zone_config(&self) -> ZoneConfig {
        ZoneConfig {
            zones_enabled: self.zones_enabled,
            total_lockers: self.total_lockers,
            channels_per_card: self.channels_per_card,
            zones: self.zones.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorSettings {
    pub bind_addr: String,
    pub max_connections: usize,
    pub offline_threshold_secs: u64,
    pub result_timeout_secs: u64,
    pub command_retention_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{DEFAULT_COORDINATOR_PORT}"),
            max_connections: 256,
            offline_threshold_secs: DEFAULT_OFFLINE_THRESHOLD_SECS,
            result_timeout_secs: DEFAULT_RESULT_TIMEOUT_SECS,
            command_retention_secs: DEFAULT_COMMAND_RETENTION_SECS,
            sweep_interval_secs: 10,
        }
    }
}

impl CoordinatorSettings {
    #[must_use]
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            offline_threshold: secs(self.offline_threshold_secs),
            result_timeout: secs(self.result_timeout_secs),
            command_retention: secs(self.command_retention_secs),
        }
    }

    /// # Errors
    /// `NodeError::Configuration` for an unparsable bind address.
    pub fn server_config(&self) -> Result<FleetServerConfig> {
        let bind_addr = self.bind_addr.parse().map_err(|e| {
            NodeError::configuration(format!("coordinator.bind_addr {}: {e}", self.bind_addr))
        })?;
        Ok(FleetServerConfig {
            bind_addr,
            max_connections: self.max_connections.max(1),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs.max(1)),
        })
    }
}

fn secs(value: u64) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX / 1000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockhub_core::ZoneRange;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.node.heartbeat_interval(), Duration::from_secs(10));
        assert_eq!(config.node.fallback_policy, FallbackPolicy::PerLocker);
        assert_eq!(config.bus.pulse_ms, 400);
        assert_eq!(config.bus.bus_config().retry.max_retries, 3);
        assert_eq!(config.zones.channels_per_card, 16);
        assert_eq!(
            config.coordinator.server_config().unwrap().bind_addr.port(),
            DEFAULT_COORDINATOR_PORT
        );
    }

    #[test]
    fn test_full_file() {
        let text = r#"
            [node]
            kiosk_id = "kiosk-7"
            zone = "mens"
            fallback_policy = "system_wide"
            reservation_ttl_secs = 30

            [bus]
            transport = "tcp"
            gateway_addr = "192.168.1.50:502"
            write_mode = "coil"
            verify_readback = true

            [zones]
            zones_enabled = true
            total_lockers = 48

            [[zones.zones]]
            id = "mens"
            enabled = true
            ranges = [{ start = 1, end = 32 }]

            [[zones.zones]]
            id = "staff"
            enabled = true
            ranges = [{ start = 33, end = 48 }]
            relay_cards = [9]
        "#;
        let config = Config::from_toml_str(text).unwrap();

        assert_eq!(config.node.kiosk_id().unwrap().as_str(), "kiosk-7");
        assert_eq!(config.node.zone.as_deref(), Some("mens"));
        assert_eq!(config.node.fallback_policy, FallbackPolicy::SystemWide);
        assert_eq!(
            config.node.locker_settings().reservation_ttl,
            chrono::Duration::seconds(30)
        );

        assert_eq!(config.bus.transport, TransportKind::Tcp);
        assert_eq!(config.bus.gateway_addr().unwrap().port(), 502);
        assert_eq!(config.bus.driver_config().write_mode, WriteMode::Coil);

        let zones = config.zones.to_zone_config();
        assert_eq!(zones.zones.len(), 2);
        assert_eq!(zones.zones[0].ranges, vec![ZoneRange::new(1, 32)]);
        assert_eq!(zones.zones[1].relay_cards, vec![9]);
        assert!(lockhub_core::zones::validate(&zones).is_ok());
    }

    #[test]
    fn test_bad_values_are_configuration_errors() {
        let err = Config::from_toml_str("[bus]\ntransport = \"usb\"").unwrap_err();
        assert!(matches!(err, NodeError::Configuration(_)));

        let config = Config::from_toml_str("[bus]\ntransport = \"tcp\"").unwrap();
        assert!(config.bus.gateway_addr().is_err());

        let config = Config::from_toml_str("[coordinator]\nbind_addr = \"nowhere\"").unwrap();
        assert!(config.coordinator.server_config().is_err());
    }
}
