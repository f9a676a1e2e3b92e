//! Active zone configuration of a node.
//!
//! The configuration lives behind an `RwLock<Arc<ZoneConfig>>`: readers
//! clone the `Arc` and work on a snapshot, writers validate a complete
//! replacement first and swap the pointer only if it passes. A rejected
//! configuration leaves the active one untouched.
//!
//! Resolution falls back to the legacy formula when zone resolution fails.
//! [`FallbackPolicy`] decides whether that fallback applies to the failing
//! locker only or latches legacy addressing for every locker until the
//! next swap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use lockhub_core::zones::{self, SyncOutcome};
use lockhub_core::{
    ConfigValidationError, HardwareAddress, Locker, LockerId, ZoneConfig, ZoneMappingError,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Scope of the legacy-address fallback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Only the locker whose zone resolution failed uses the legacy formula.
    #[default]
    PerLocker,
    /// The first failure switches every locker to the legacy formula.
    SystemWide,
}

/// How an address was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressSource {
    Zone,
    /// Zones are disabled.
    Legacy,
    /// Zone resolution failed and the legacy formula was used instead.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAddress {
    pub address: HardwareAddress,
    pub zone_id: Option<String>,
    pub source: AddressSource,
}

/// Zone part of the node health payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneHealth {
    pub zones_enabled: bool,
    pub config_hash: String,
    pub total_lockers: u32,
    pub legacy_latched: bool,
}

#[derive(Debug)]
pub struct ZoneRegistry {
    active: RwLock<Arc<ZoneConfig>>,
    policy: FallbackPolicy,
    latched: AtomicBool,
}

impl ZoneRegistry {
    /// # Errors
    /// Returns the validation error if `config` is not a valid configuration.
    pub fn new(config: ZoneConfig, policy: FallbackPolicy) -> Result<Self, ConfigValidationError> {
        zones::validate(&config)?;
        Ok(Self {
            active: RwLock::new(Arc::new(config)),
            policy,
            latched: AtomicBool::new(false),
        })
    }

    /// Snapshot of the active configuration.
    #[must_use]
    pub fn current(&self) -> Arc<ZoneConfig> {
        Arc::clone(&self.active.read().unwrap_or_else(PoisonError::into_inner))
    }

    #[must_use]
    pub fn policy(&self) -> FallbackPolicy {
        self.policy
    }

    #[must_use]
    pub fn is_latched(&self) -> bool {
        self.latched.load(Ordering::Acquire)
    }

    /// Validate `next` and make it the active configuration.
    ///
    /// Resets the system-wide fallback latch.
    ///
    /// # Errors
    /// Returns the validation error; the active configuration is unchanged.
    pub fn replace(&self, next: ZoneConfig) -> Result<Arc<ZoneConfig>, ConfigValidationError> {
        if let Err(e) = zones::validate(&next) {
            warn!(error = %e, "Rejected zone configuration");
            return Err(e);
        }

        let next = Arc::new(next);
        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        *active = Arc::clone(&next);
        self.latched.store(false, Ordering::Release);
        drop(active);

        info!(
            zones_enabled = next.zones_enabled,
            total_lockers = next.total_lockers,
            zone_count = next.zones.len(),
            config_hash = %next.hash(),
            "Zone configuration applied"
        );
        Ok(next)
    }

    /// Compute the configuration that covers `new_total` lockers without applying it.
    ///
    /// # Errors
    /// Returns the validation error of the grown configuration.
    pub fn plan_sync(&self, new_total: u32) -> Result<SyncOutcome, ConfigValidationError> {
        let current = self.current();
        zones::sync_with_hardware(&current, new_total).inspect_err(|e| {
            warn!(new_total, error = %e, "Rejected hardware sync");
        })
    }

    /// Hardware address of `locker_id` under the active configuration.
    ///
    /// # Errors
    /// Returns `ZoneMappingError::Unmappable` when neither zone nor legacy
    /// resolution yields an address.
    pub fn resolve(&self, locker_id: LockerId) -> Result<ResolvedAddress, ZoneMappingError> {
        let config = self.current();
        let id = locker_id.get();

        if !config.zones_enabled {
            return legacy(locker_id, &config, AddressSource::Legacy);
        }

        if self.policy == FallbackPolicy::SystemWide && self.is_latched() {
            debug!(locker_id = %locker_id, "Legacy addressing latched");
            return legacy(locker_id, &config, AddressSource::Fallback);
        }

        if let Some(resolved) = zones::resolve_in_zones(id, &config) {
            return Ok(ResolvedAddress {
                address: resolved.address,
                zone_id: Some(resolved.zone_id),
                source: AddressSource::Zone,
            });
        }

        match self.policy {
            FallbackPolicy::PerLocker => {
                warn!(locker_id = %locker_id, "Zone resolution failed, using legacy address");
            }
            FallbackPolicy::SystemWide => {
                if !self.latched.swap(true, Ordering::AcqRel) {
                    warn!(
                        locker_id = %locker_id,
                        "Zone resolution failed, latching legacy addressing for all lockers"
                    );
                }
            }
        }
        legacy(locker_id, &config, AddressSource::Fallback)
    }

    /// # Errors
    /// Returns `ZoneMappingError::UnknownZone` for a zone id that is not configured.
    pub fn filter_by_zone(
        &self,
        lockers: &[Locker],
        zone_id: &str,
    ) -> Result<Vec<Locker>, ZoneMappingError> {
        zones::filter_by_zone(lockers, zone_id, &self.current())
    }

    /// # Errors
    /// Returns `ZoneMappingError::OutsideZones` when zones are enabled and no
    /// enabled zone contains the locker.
    pub fn ensure_in_zone(&self, locker_id: LockerId) -> Result<(), ZoneMappingError> {
        zones::ensure_in_zone(locker_id, &self.current())
    }

    /// Id of the enabled zone containing `locker_id`.
    #[must_use]
    pub fn zone_of(&self, locker_id: LockerId) -> Option<String> {
        let config = self.current();
        zones::zone_of(locker_id.get(), &config).map(|zone| zone.id.clone())
    }

    #[must_use]
    pub fn health(&self) -> ZoneHealth {
        let config = self.current();
        ZoneHealth {
            zones_enabled: config.zones_enabled,
            config_hash: config.hash(),
            total_lockers: config.total_lockers,
            legacy_latched: self.is_latched(),
        }
    }
}

fn legacy(
    locker_id: LockerId,
    config: &ZoneConfig,
    source: AddressSource,
) -> Result<ResolvedAddress, ZoneMappingError> {
    match zones::legacy_address(locker_id.get(), config) {
        Some(address) => Ok(ResolvedAddress {
            address,
            zone_id: None,
            source,
        }),
        None => {
            let err = ZoneMappingError::unmappable(
                locker_id,
                format!(
                    "legacy address out of range (total {}, {} channels per card)",
                    config.total_lockers, config.channels_per_card
                ),
            );
            warn!(locker_id = %locker_id, trace_id = %err.trace_id(), error = %err, "Locker unmappable");
            Err(err)
        }
    }
}
