//! Zone configuration and locker-to-relay addressing.
//!
//! A site's lockers are numbered globally. Zones group locker ids into named
//! sets of inclusive ranges, and each zone is served by its own relay cards.
//! Everything in this module is a pure function of a [`ZoneConfig`]: the
//! hardware address of a locker is recomputed on demand and never stored.
//!
//! # Addressing
//!
//! A locker's position inside its zone is counted across the zone's ranges
//! in declaration order, starting at 1. With `cpc` channels per card:
//!
//! ```text
//! card_index = (position - 1) / cpc
//! coil       = (position - 1) % cpc + 1
//! slave_id   = relay_cards[card_index]                        (explicit cards)
//!            = (first_start - 1) / cpc + card_index + 1       (implicit cards)
//! ```
//!
//! With zones disabled the legacy formula applies the same arithmetic to the
//! global locker id, so a single zone starting at 1 and legacy mode agree.

use crate::constants::{DEFAULT_CHANNELS_PER_CARD, MAX_SLAVE_ID, MIN_SLAVE_ID};
use crate::error::{ConfigValidationError, ZoneMappingError};
use crate::types::{HardwareAddress, Locker, LockerId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

/// Inclusive range of locker ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ZoneRange {
    pub start: u32,
    pub end: u32,
}

impl ZoneRange {
    #[must_use]
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, locker_id: u32) -> bool {
        (self.start..=self.end).contains(&locker_id)
    }

    /// Number of lockers in the range. Zero for an inverted range.
    #[inline]
    #[must_use]
    pub fn len(&self) -> u32 {
        if self.end < self.start {
            0
        } else {
            self.end - self.start + 1
        }
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A named, enableable group of locker ranges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub enabled: bool,
    pub ranges: Vec<ZoneRange>,
    /// Bus slave ids serving this zone, in card order. Empty means the
    /// implicit numbering derived from the zone's first locker id.
    #[serde(default)]
    pub relay_cards: Vec<u8>,
}

impl Zone {
    pub fn new(id: impl Into<String>, ranges: Vec<ZoneRange>) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            ranges,
            relay_cards: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_relay_cards(mut self, cards: Vec<u8>) -> Self {
        self.relay_cards = cards;
        self
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    #[must_use]
    pub fn locker_count(&self) -> u32 {
        self.ranges.iter().map(ZoneRange::len).sum()
    }

    #[must_use]
    pub fn contains(&self, locker_id: u32) -> bool {
        self.ranges.iter().any(|r| r.contains(locker_id))
    }

    /// Relay cards serving the zone: the explicit list when there is one,
    /// otherwise the implicit cards its lockers need.
    #[must_use]
    pub fn relay_card_count(&self, channels_per_card: u16) -> u32 {
        if self.relay_cards.is_empty() {
            self.required_cards(channels_per_card)
        } else {
            u32::try_from(self.relay_cards.len()).unwrap_or(u32::MAX)
        }
    }

    /// Relay cards the zone's lockers occupy with `channels_per_card` channels each.
    #[must_use]
    pub fn required_cards(&self, channels_per_card: u16) -> u32 {
        if channels_per_card == 0 {
            return 0;
        }
        self.locker_count().div_ceil(u32::from(channels_per_card))
    }

    /// 1-based position of `locker_id` counted across ranges in order.
    #[must_use]
    pub fn position_of(&self, locker_id: u32) -> Option<u32> {
        let mut offset = 0;
        for range in &self.ranges {
            if range.contains(locker_id) {
                return Some(offset + locker_id - range.start + 1);
            }
            offset += range.len();
        }
        None
    }

    /// Reverse of [`Zone::position_of`].
    #[must_use]
    pub fn locker_at(&self, position: u32) -> Option<u32> {
        if position == 0 {
            return None;
        }
        let mut remaining = position;
        for range in &self.ranges {
            let len = range.len();
            if remaining <= len {
                return Some(range.start + remaining - 1);
            }
            remaining -= len;
        }
        None
    }

    /// Slave id of the card at `card_index` (0-based).
    #[must_use]
    pub fn slave_for_card(&self, card_index: u32, channels_per_card: u16) -> Option<u8> {
        if !self.relay_cards.is_empty() {
            return self.relay_cards.get(card_index as usize).copied();
        }
        let first_start = self.ranges.first()?.start;
        if channels_per_card == 0 || first_start == 0 {
            return None;
        }
        let base = (first_start - 1) / u32::from(channels_per_card);
        u8::try_from(base + card_index + 1)
            .ok()
            .filter(|slave| (MIN_SLAVE_ID..=MAX_SLAVE_ID).contains(slave))
    }

    /// Hardware address of the locker at `position` within this zone.
    #[must_use]
    pub fn address_at(&self, position: u32, channels_per_card: u16) -> Option<HardwareAddress> {
        if position == 0 || channels_per_card == 0 {
            return None;
        }
        let cpc = u32::from(channels_per_card);
        let card_index = (position - 1) / cpc;
        let coil = u16::try_from((position - 1) % cpc + 1).ok()?;
        let slave_id = self.slave_for_card(card_index, channels_per_card)?;
        HardwareAddress::new(slave_id, coil).ok()
    }

    /// Slave ids the zone occupies, explicit or implicit.
    fn effective_slaves(&self, channels_per_card: u16) -> Result<Vec<u8>, ConfigValidationError> {
        (0..self.required_cards(channels_per_card))
            .map(|index| {
                self.slave_for_card(index, channels_per_card).ok_or_else(|| {
                    let first = self.ranges.first().map_or(0, |r| r.start);
                    let implicit = (first.saturating_sub(1)) / u32::from(channels_per_card.max(1));
                    ConfigValidationError::InvalidRelayCard {
                        zone: self.id.clone(),
                        slave_id: implicit + index + 1,
                    }
                })
            })
            .collect()
    }
}

fn default_channels_per_card() -> u16 {
    DEFAULT_CHANNELS_PER_CARD
}

/// The complete zone configuration of one site.
///
/// Replaced only as a whole, after [`validate`] accepts it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneConfig {
    pub zones_enabled: bool,
    pub total_lockers: u32,
    #[serde(default = "default_channels_per_card")]
    pub channels_per_card: u16,
    #[serde(default)]
    pub zones: Vec<Zone>,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self::legacy(0)
    }
}

impl ZoneConfig {
    /// Configuration without zones: every locker uses the legacy formula.
    #[must_use]
    pub fn legacy(total_lockers: u32) -> Self {
        Self {
            zones_enabled: false,
            total_lockers,
            channels_per_card: DEFAULT_CHANNELS_PER_CARD,
            zones: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_zones(total_lockers: u32, zones: Vec<Zone>) -> Self {
        Self {
            zones_enabled: true,
            total_lockers,
            channels_per_card: DEFAULT_CHANNELS_PER_CARD,
            zones,
        }
    }

    pub fn enabled_zones(&self) -> impl Iterator<Item = &Zone> {
        self.zones.iter().filter(|z| z.enabled)
    }

    #[must_use]
    pub fn zone(&self, zone_id: &str) -> Option<&Zone> {
        self.zones.iter().find(|z| z.id == zone_id)
    }

    #[must_use]
    pub fn hash(&self) -> String {
        config_hash(self)
    }
}

/// A locker resolved through its zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneAddress {
    pub zone_id: String,
    pub position: u32,
    pub address: HardwareAddress,
}

/// Validate a configuration as a unit.
///
/// # Errors
/// Returns the first rule the configuration breaks. Rules cover zone ids,
/// range bounds and capacity, overlaps within a zone and across enabled
/// zones, and relay card assignments.
pub fn validate(config: &ZoneConfig) -> Result<(), ConfigValidationError> {
    let cpc = config.channels_per_card;
    if cpc == 0 {
        return Err(ConfigValidationError::ZeroChannelsPerCard);
    }

    let mut seen = HashSet::new();
    for zone in &config.zones {
        if zone.id.trim().is_empty() {
            return Err(ConfigValidationError::EmptyZoneId);
        }
        if !seen.insert(zone.id.as_str()) {
            return Err(ConfigValidationError::DuplicateZoneId {
                id: zone.id.clone(),
            });
        }
        validate_zone_ranges(zone, config.total_lockers)?;

        if let Some(&slave_id) = zone
            .relay_cards
            .iter()
            .find(|s| !(MIN_SLAVE_ID..=MAX_SLAVE_ID).contains(*s))
        {
            return Err(ConfigValidationError::InvalidRelayCard {
                zone: zone.id.clone(),
                slave_id: u32::from(slave_id),
            });
        }
        let required = zone.required_cards(cpc);
        let configured = zone.relay_cards.len() as u32;
        if configured > 0 && configured < required {
            return Err(ConfigValidationError::InsufficientRelayCards {
                zone: zone.id.clone(),
                required,
                configured,
            });
        }
    }

    // Neighbors after sorting by start are the only candidates for overlap.
    let mut spans: Vec<(ZoneRange, &str)> = config
        .enabled_zones()
        .flat_map(|z| z.ranges.iter().map(move |r| (*r, z.id.as_str())))
        .collect();
    spans.sort_by_key(|(range, _)| range.start);
    for pair in spans.windows(2) {
        let (prev, prev_zone) = pair[0];
        let (next, next_zone) = pair[1];
        if next.start <= prev.end {
            return Err(ConfigValidationError::Overlap {
                first: prev_zone.to_string(),
                second: next_zone.to_string(),
                at: next.start,
            });
        }
    }

    let mut owners: HashMap<u8, &str> = HashMap::new();
    for zone in config.enabled_zones() {
        for slave_id in zone.effective_slaves(cpc)? {
            if let Some(first) = owners.insert(slave_id, zone.id.as_str()) {
                if first != zone.id {
                    return Err(ConfigValidationError::SharedRelayCard {
                        slave_id,
                        first: first.to_string(),
                        second: zone.id.clone(),
                    });
                }
            }
        }
    }

    Ok(())
}

fn validate_zone_ranges(zone: &Zone, total: u32) -> Result<(), ConfigValidationError> {
    for range in &zone.ranges {
        if range.start == 0 || range.start > range.end {
            return Err(ConfigValidationError::InvalidRange {
                zone: zone.id.clone(),
                start: range.start,
                end: range.end,
            });
        }
        if range.end > total {
            return Err(ConfigValidationError::ExceedsCapacity {
                zone: zone.id.clone(),
                end: range.end,
                total,
            });
        }
    }

    let mut sorted = zone.ranges.clone();
    sorted.sort_by_key(|r| r.start);
    if let Some(pair) = sorted.windows(2).find(|pair| pair[1].start <= pair[0].end) {
        return Err(ConfigValidationError::SelfOverlap {
            zone: zone.id.clone(),
            first: pair[0].start,
            second: pair[1].start,
        });
    }
    Ok(())
}

/// Resolve a locker through the enabled zone that contains it.
///
/// Returns `None` when zones are disabled, when no enabled zone contains the
/// locker, or when the zone has no relay card for the locker's position.
#[must_use]
pub fn resolve_in_zones(locker_id: u32, config: &ZoneConfig) -> Option<ZoneAddress> {
    if !config.zones_enabled {
        return None;
    }
    let zone = zone_of(locker_id, config)?;
    let position = zone.position_of(locker_id)?;
    let address = zone.address_at(position, config.channels_per_card)?;
    Some(ZoneAddress {
        zone_id: zone.id.clone(),
        position,
        address,
    })
}

/// Resolve a locker id to its relay address under the active mode.
///
/// Zone mode when zones are enabled, legacy formula otherwise. A failed zone
/// resolution is returned as `None` here; falling back to the legacy formula
/// is a decision for the caller.
#[must_use]
pub fn resolve(locker_id: u32, config: &ZoneConfig) -> Option<HardwareAddress> {
    if config.zones_enabled {
        resolve_in_zones(locker_id, config).map(|resolved| resolved.address)
    } else {
        legacy_address(locker_id, config)
    }
}

/// Global formula applied to the raw locker id.
///
/// Fails for id 0, ids above the configured total and ids whose card would
/// be above the highest slave address.
#[must_use]
pub fn legacy_address(locker_id: u32, config: &ZoneConfig) -> Option<HardwareAddress> {
    if locker_id == 0 || locker_id > config.total_lockers || config.channels_per_card == 0 {
        return None;
    }
    let cpc = u32::from(config.channels_per_card);
    let slave_id = u8::try_from((locker_id - 1) / cpc + 1).ok()?;
    let coil = u16::try_from((locker_id - 1) % cpc + 1).ok()?;
    HardwareAddress::new(slave_id, coil).ok()
}

/// Reverse lookup: the locker id at `position` within `zone_id`.
#[must_use]
pub fn locker_at(zone_id: &str, position: u32, config: &ZoneConfig) -> Option<u32> {
    config.zone(zone_id)?.locker_at(position)
}

/// The enabled zone that contains `locker_id`.
#[must_use]
pub fn zone_of(locker_id: u32, config: &ZoneConfig) -> Option<&Zone> {
    config.enabled_zones().find(|z| z.contains(locker_id))
}

/// Lockers that belong to `zone_id`.
///
/// # Errors
/// Returns `ZoneMappingError::UnknownZone` when no zone has that id.
pub fn filter_by_zone(
    lockers: &[Locker],
    zone_id: &str,
    config: &ZoneConfig,
) -> Result<Vec<Locker>, ZoneMappingError> {
    let zone = config
        .zone(zone_id)
        .ok_or_else(|| ZoneMappingError::unknown_zone(zone_id))?;
    Ok(lockers
        .iter()
        .filter(|locker| zone.contains(locker.id.get()))
        .cloned()
        .collect())
}

/// Check that a locker may be served while zones are enabled.
///
/// # Errors
/// Returns `ZoneMappingError::OutsideZones` when zones are enabled and no
/// enabled zone contains the locker.
pub fn ensure_in_zone(locker_id: LockerId, config: &ZoneConfig) -> Result<(), ZoneMappingError> {
    if config.zones_enabled && zone_of(locker_id.get(), config).is_none() {
        return Err(ZoneMappingError::outside_zones(locker_id));
    }
    Ok(())
}

/// Outcome of [`sync_with_hardware`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub config: ZoneConfig,
    pub changed: bool,
    /// Zone whose final range was extended, if any.
    pub extended_zone: Option<String>,
}

/// Grow the configuration to cover `new_total` lockers.
///
/// The final range of the last enabled zone is extended to `new_total`,
/// merged with any range of the same zone it now touches, and an explicit
/// relay card list is extended with the next slave ids. A total that does
/// not grow is a no-op.
///
/// # Errors
/// Returns the validation error of the grown configuration. The input is
/// never modified, so the caller keeps its current configuration.
pub fn sync_with_hardware(
    config: &ZoneConfig,
    new_total: u32,
) -> Result<SyncOutcome, ConfigValidationError> {
    if new_total <= config.total_lockers {
        return Ok(SyncOutcome {
            config: config.clone(),
            changed: false,
            extended_zone: None,
        });
    }

    let mut next = config.clone();
    next.total_lockers = new_total;

    let last_enabled = next.zones.iter().rposition(|z| z.enabled);
    let extended_zone = match last_enabled {
        Some(index) if next.zones_enabled => {
            let cpc = next.channels_per_card;
            let zone = &mut next.zones[index];
            extend_final_range(zone, new_total);
            extend_relay_cards(zone, cpc)?;
            Some(zone.id.clone())
        }
        _ => None,
    };

    validate(&next)?;
    Ok(SyncOutcome {
        config: next,
        changed: true,
        extended_zone,
    })
}

fn extend_final_range(zone: &mut Zone, new_total: u32) {
    let Some(final_index) = zone
        .ranges
        .iter()
        .enumerate()
        .max_by_key(|(_, r)| r.end)
        .map(|(index, _)| index)
    else {
        return;
    };

    let mut slot = final_index;
    let mut extended = zone.ranges.remove(final_index);
    extended.end = new_total;

    // Absorb ranges of the same zone the extended range now touches.
    while let Some(index) = zone.ranges.iter().position(|r| {
        r.start <= extended.end.saturating_add(1) && r.end.saturating_add(1) >= extended.start
    }) {
        let absorbed = zone.ranges.remove(index);
        if index < slot {
            slot -= 1;
        }
        extended.start = extended.start.min(absorbed.start);
        extended.end = extended.end.max(absorbed.end);
    }
    zone.ranges.insert(slot, extended);
}

fn extend_relay_cards(zone: &mut Zone, channels_per_card: u16) -> Result<(), ConfigValidationError> {
    if zone.relay_cards.is_empty() {
        return Ok(());
    }
    let required = zone.required_cards(channels_per_card) as usize;
    while zone.relay_cards.len() < required {
        let highest = zone.relay_cards.iter().copied().max().unwrap_or(0);
        let next = highest
            .checked_add(1)
            .filter(|slave| *slave <= MAX_SLAVE_ID)
            .ok_or_else(|| ConfigValidationError::InvalidRelayCard {
                zone: zone.id.clone(),
                slave_id: u32::from(highest) + 1,
            })?;
        zone.relay_cards.push(next);
    }
    Ok(())
}

/// Short fingerprint of a configuration: the first 16 hex characters of the
/// SHA-256 of its JSON form.
#[must_use]
pub fn config_hash(config: &ZoneConfig) -> String {
    // Serializing plain structs of strings and integers cannot fail.
    let json = serde_json::to_vec(config).unwrap_or_default();
    let digest = Sha256::digest(&json);
    hex::encode(&digest[..8])
}
