//! Locker ownership state machine of a node.
//!
//! Records live in an arena keyed by [`LockerId`], each behind its own
//! async mutex, so transitions of one locker are serialized while different
//! lockers proceed concurrently. A mutation works on a copy of the record,
//! persists the copy together with its transition records, and only then
//! replaces the in-memory record: nothing reports success before it is on
//! disk.
//!
//! An open runs in three steps. The record moves to `opening` under the
//! lock, the relay pulse runs without the lock, and the outcome is applied
//! under the lock again. The persisted `opening` state is what turns a
//! second open of the same locker into `TransitionPending`.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use lockhub_core::constants::{DEFAULT_RESERVATION_TTL_SECS, MAX_DISPLAY_NAME_LENGTH};
use lockhub_core::lifecycle::{self, LockerEvent, TransitionRecord};
use lockhub_core::{
    CommandPayloadError, HardwareAddress, Locker, LockerId, LockerStatus, OwnerKey,
    StateTransitionError,
};
use lockhub_storage::LockerRepository;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::context::NodeContext;
use crate::error::{NodeError, Result};

type Slot = Arc<Mutex<Locker>>;

#[derive(Debug, Clone)]
pub struct LockerSettings {
    pub reservation_ttl: chrono::Duration,
}

impl Default for LockerSettings {
    fn default() -> Self {
        Self {
            reservation_ttl: chrono::Duration::seconds(DEFAULT_RESERVATION_TTL_SECS as i64),
        }
    }
}

/// Result of a successful open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOutcome {
    pub locker: Locker,
    pub address: HardwareAddress,
    /// The owner kept the locker (VIP, not forced).
    pub retained: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkOpenOptions {
    pub exclude_vip: bool,
    /// Pause after every successful open before the next one.
    pub interval: Duration,
    /// Release VIP ownership as well.
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedOpen {
    pub locker_id: LockerId,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkOpenReport {
    pub success_count: usize,
    pub succeeded: Vec<LockerId>,
    pub failed: Vec<FailedOpen>,
    pub vip_skipped: Vec<LockerId>,
}

/// What a card scan led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardScanOutcome {
    Opened(OpenOutcome),
    /// The card holds no locker on this node.
    NoLocker,
}

#[derive(Debug)]
pub struct LockerStateManager {
    ctx: NodeContext,
    settings: LockerSettings,
    slots: RwLock<BTreeMap<LockerId, Slot>>,
    /// Serializes `assign` so a card cannot reserve two lockers at once.
    assign_gate: Mutex<()>,
}

impl LockerStateManager {
    /// Load every persisted locker into memory.
    ///
    /// # Errors
    /// Propagates storage errors.
    pub async fn load(ctx: NodeContext, settings: LockerSettings) -> Result<Self> {
        let lockers = ctx.lockers.find_all().await?;
        info!(count = lockers.len(), "Loaded lockers");
        let slots = lockers
            .into_iter()
            .map(|locker| (locker.id, Arc::new(Mutex::new(locker))))
            .collect();
        Ok(Self {
            ctx,
            settings,
            slots: RwLock::new(slots),
            assign_gate: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn context(&self) -> &NodeContext {
        &self.ctx
    }

    fn slot(&self, id: LockerId) -> Result<Slot> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or_else(|| NodeError::locker_not_found(id))
    }

    fn all_slots(&self) -> Vec<Slot> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Persist `next` with its records, then make it the in-memory record.
    async fn commit(
        &self,
        current: &mut Locker,
        next: Locker,
        records: &[TransitionRecord],
    ) -> Result<()> {
        self.ctx.lockers.save_transition(&next, records).await?;
        for record in records {
            debug!(
                locker_id = %record.locker_id,
                from = %record.from,
                to = %record.to,
                event = %record.event,
                "Locker transition"
            );
        }
        *current = next;
        Ok(())
    }

    /// # Errors
    /// `LockerNotFound` for an unknown id.
    pub async fn get_locker(&self, id: LockerId) -> Result<Locker> {
        let slot = self.slot(id)?;
        let locker = slot.lock().await.clone();
        Ok(locker)
    }

    /// Every locker, ordered by id.
    pub async fn list_lockers(&self) -> Vec<Locker> {
        let mut lockers = Vec::new();
        for slot in self.all_slots() {
            lockers.push(slot.lock().await.clone());
        }
        lockers
    }

    /// Lockers of one zone.
    ///
    /// # Errors
    /// `ZoneMapping` for an unknown zone id.
    pub async fn list_in_zone(&self, zone_id: &str) -> Result<Vec<Locker>> {
        let lockers = self.list_lockers().await;
        Ok(self.ctx.zones.filter_by_zone(&lockers, zone_id)?)
    }

    /// Reserve a free locker for `owner` until the reservation TTL elapses.
    ///
    /// # Errors
    /// - `StateTransition` if the locker is not free, or the card already
    ///   holds another locker
    /// - `LockerNotFound` for an unknown id
    pub async fn assign(&self, id: LockerId, owner: OwnerKey) -> Result<Locker> {
        let _gate = self.assign_gate.lock().await;

        if !owner.is_staff()
            && let Some(held) = self.locker_held_by(&owner).await
            && held != id
        {
            return Err(StateTransitionError::OwnerHoldsLocker { held }.into());
        }

        let slot = self.slot(id)?;
        let mut current = slot.lock().await;
        let now = self.ctx.now();

        let mut next = current.clone();
        let record = step(&mut next, LockerEvent::Assign, now)?.with_owner(Some(owner.clone()));
        next.owner_key = Some(owner);
        next.reserved_at = Some(now);
        next.expires_at = Some(now + self.settings.reservation_ttl);
        next.zone_id = self.ctx.zones.zone_of(id);

        self.commit(&mut current, next, &[record]).await?;
        info!(locker_id = %id, expires_at = ?current.expires_at, "Locker reserved");
        Ok(current.clone())
    }

    /// Confirm a reservation if needed and pulse the locker open.
    ///
    /// Card keys must match the stored owner. Staff keys may open any
    /// reserved, owned or free locker. Opening a locker in `error` recovers
    /// it first, for staff and for the owner's card.
    /// A VIP owner keeps the locker unless `force` is set.
    ///
    /// # Errors
    /// - `ZoneMapping` if the locker has no hardware address
    /// - `StateTransition` for a wrong owner, an expired reservation, a state
    ///   that does not accept an open, or an open already in progress
    /// - `Hardware` when the pulse failed; the locker is then in `error`
    pub async fn confirm_and_open(
        &self,
        id: LockerId,
        owner: &OwnerKey,
        force: bool,
    ) -> Result<OpenOutcome> {
        let resolved = self.ctx.zones.resolve(id)?;
        let slot = self.slot(id)?;

        {
            let mut current = slot.lock().await;
            let now = self.ctx.now();
            let mut next = current.clone();
            let mut records = Vec::new();

            if next.reservation_expired(now) {
                let record = step(&mut next, LockerEvent::Expire, now)?
                    .with_owner(next.owner_key.clone())
                    .with_detail("reservation ttl elapsed before confirm");
                next.clear_owner();
                self.commit(&mut current, next, &[record]).await?;
                return Err(StateTransitionError::ReservationExpired { locker_id: id }.into());
            }

            let staff = owner.is_staff();
            match next.status {
                LockerStatus::Reserved | LockerStatus::Owned | LockerStatus::Error
                    if !staff && !next.is_held_by(owner) =>
                {
                    return Err(StateTransitionError::OwnerMismatch { locker_id: id }.into());
                }
                LockerStatus::Reserved => {
                    records.push(
                        step(&mut next, LockerEvent::Confirm, now)?.with_owner(next.owner_key.clone()),
                    );
                }
                LockerStatus::Free if !staff => {
                    return Err(StateTransitionError::InvalidEvent {
                        locker_id: id,
                        state: LockerStatus::Free,
                        event: LockerEvent::Open,
                    }
                    .into());
                }
                LockerStatus::Error => {
                    records.push(
                        step(&mut next, LockerEvent::Recover, now)?
                            .with_owner(next.owner_key.clone())
                            .with_detail("recovered by open"),
                    );
                    // The owner reopening keeps the locker; a staff open hands it back.
                    if staff {
                        next.clear_owner();
                    }
                }
                _ => {}
            }

            records.push(
                step(&mut next, LockerEvent::Open, now)?
                    .with_owner(Some(owner.clone()))
                    .with_detail(format!("relay {}", resolved.address)),
            );
            self.commit(&mut current, next, &records).await?;
        }

        let pulse = self.ctx.driver.open(resolved.address).await;

        let mut current = slot.lock().await;
        let now = self.ctx.now();
        let mut next = current.clone();

        if next.status != LockerStatus::Opening {
            // Blocked while the pulse was running: keep the block, log the pulse.
            let (event, detail) = match &pulse {
                Ok(_) => (LockerEvent::PulseConfirmed, "pulse completed after block".to_string()),
                Err(e) => (LockerEvent::HardwareFailure, format!("pulse failed after block: {e}")),
            };
            let record =
                TransitionRecord::new(id, next.status, next.status, event, now).with_detail(detail);
            next.updated_at = now;
            self.commit(&mut current, next, &[record]).await?;
            return match pulse {
                Ok(_) => Err(StateTransitionError::InvalidEvent {
                    locker_id: id,
                    state: current.status,
                    event,
                }
                .into()),
                Err(e) => Err(e.into()),
            };
        }

        match pulse {
            Ok(_) => {
                let retained = next.is_vip && !force && next.owner_key.is_some();
                let event = if retained {
                    LockerEvent::PulseRetained
                } else {
                    LockerEvent::PulseConfirmed
                };
                let record = step(&mut next, event, now)?.with_owner(next.owner_key.clone());
                if !retained {
                    next.clear_owner();
                }
                self.commit(&mut current, next, &[record]).await?;
                info!(
                    locker_id = %id,
                    slave_id = resolved.address.slave_id,
                    coil = resolved.address.coil,
                    retained,
                    "Locker opened"
                );
                Ok(OpenOutcome {
                    locker: current.clone(),
                    address: resolved.address,
                    retained,
                })
            }
            Err(e) => {
                let record = step(&mut next, LockerEvent::HardwareFailure, now)?
                    .with_owner(next.owner_key.clone())
                    .with_detail(e.to_string());
                self.commit(&mut current, next, &[record]).await?;
                warn!(
                    locker_id = %id,
                    slave_id = resolved.address.slave_id,
                    coil = resolved.address.coil,
                    error = %e,
                    "Locker open failed"
                );
                Err(e.into())
            }
        }
    }

    /// Release ownership without a pulse. Releasing a free locker succeeds
    /// and changes nothing.
    ///
    /// # Errors
    /// `StateTransition` while opening or blocked.
    pub async fn release(&self, id: LockerId) -> Result<Locker> {
        let slot = self.slot(id)?;
        let mut current = slot.lock().await;
        if current.status == LockerStatus::Free {
            return Ok(current.clone());
        }

        let now = self.ctx.now();
        let mut next = current.clone();
        let record = step(&mut next, LockerEvent::Release, now)?.with_owner(next.owner_key.clone());
        next.clear_owner();
        self.commit(&mut current, next, &[record]).await?;
        info!(locker_id = %id, "Locker released");
        Ok(current.clone())
    }

    /// Take a locker out of service from any state. Ownership is dropped.
    ///
    /// # Errors
    /// `LockerNotFound` or storage errors.
    pub async fn block(&self, id: LockerId, reason: Option<String>) -> Result<Locker> {
        let slot = self.slot(id)?;
        let mut current = slot.lock().await;
        let now = self.ctx.now();
        let mut next = current.clone();

        let mut record = step(&mut next, LockerEvent::Block, now)?.with_owner(next.owner_key.clone());
        if let Some(reason) = &reason {
            record = record.with_detail(reason.clone());
        }
        next.clear_owner();
        next.block_reason = reason;
        self.commit(&mut current, next, &[record]).await?;
        info!(locker_id = %id, reason = ?current.block_reason, "Locker blocked");
        Ok(current.clone())
    }

    /// # Errors
    /// `StateTransition` unless the locker is blocked.
    pub async fn unblock(&self, id: LockerId) -> Result<Locker> {
        let slot = self.slot(id)?;
        let mut current = slot.lock().await;
        let now = self.ctx.now();
        let mut next = current.clone();

        let record = step(&mut next, LockerEvent::Unblock, now)?;
        next.block_reason = None;
        self.commit(&mut current, next, &[record]).await?;
        info!(locker_id = %id, "Locker unblocked");
        Ok(current.clone())
    }

    /// Manual recovery of a locker in `error`.
    ///
    /// # Errors
    /// `StateTransition` unless the locker is in `error`.
    pub async fn recover(&self, id: LockerId) -> Result<Locker> {
        let slot = self.slot(id)?;
        let mut current = slot.lock().await;
        let now = self.ctx.now();
        let mut next = current.clone();

        let record = step(&mut next, LockerEvent::Recover, now)?.with_detail("manual recovery");
        next.clear_owner();
        self.commit(&mut current, next, &[record]).await?;
        info!(locker_id = %id, "Locker recovered");
        Ok(current.clone())
    }

    /// # Errors
    /// `LockerNotFound` or storage errors.
    pub async fn set_vip(&self, id: LockerId, is_vip: bool) -> Result<Locker> {
        self.update_attributes(id, |locker| {
            locker.is_vip = is_vip;
            Ok(())
        })
        .await
    }

    /// # Errors
    /// `CommandPayload` for an empty or over-long name.
    pub async fn set_display_name(&self, id: LockerId, name: &str) -> Result<Locker> {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > MAX_DISPLAY_NAME_LENGTH {
            return Err(CommandPayloadError::invalid(
                "display_name",
                format!("must be 1-{MAX_DISPLAY_NAME_LENGTH} characters"),
            )
            .into());
        }
        let name = name.to_string();
        self.update_attributes(id, move |locker| {
            locker.display_name = name;
            Ok(())
        })
        .await
    }

    async fn update_attributes<F>(&self, id: LockerId, apply: F) -> Result<Locker>
    where
        F: FnOnce(&mut Locker) -> Result<()>,
    {
        let slot = self.slot(id)?;
        let mut current = slot.lock().await;
        let mut next = current.clone();
        apply(&mut next)?;
        next.updated_at = self.ctx.now();
        self.ctx.lockers.save(&next).await?;
        *current = next;
        Ok(current.clone())
    }

    /// Free every reservation whose TTL has elapsed. Returns the freed ids.
    ///
    /// # Errors
    /// Storage errors; lockers handled before the failure stay expired.
    pub async fn expire_reservations(&self) -> Result<Vec<LockerId>> {
        let mut expired = Vec::new();
        for slot in self.all_slots() {
            let mut current = slot.lock().await;
            let now = self.ctx.now();
            if !current.reservation_expired(now) {
                continue;
            }
            let mut next = current.clone();
            let record = step(&mut next, LockerEvent::Expire, now)?.with_owner(next.owner_key.clone());
            next.clear_owner();
            self.commit(&mut current, next, &[record]).await?;
            expired.push(current.id);
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "Expired reservations");
        }
        Ok(expired)
    }

    /// Open the locker a scanned card holds, if any.
    ///
    /// # Errors
    /// As [`LockerStateManager::confirm_and_open`], plus `CommandPayload`
    /// for an unreadable card id.
    pub async fn on_card_scanned(&self, card_id: &str) -> Result<CardScanOutcome> {
        let owner = OwnerKey::card(card_id)
            .map_err(|e| NodeError::from(CommandPayloadError::invalid("card_id", e.to_string())))?;
        let Some(id) = self.locker_held_by(&owner).await else {
            debug!(owner = %owner, "Scanned card holds no locker");
            return Ok(CardScanOutcome::NoLocker);
        };
        self.confirm_and_open(id, &owner, false)
            .await
            .map(CardScanOutcome::Opened)
    }

    /// Open lockers one after another.
    ///
    /// Missing lockers and failed opens are recorded and the batch moves
    /// on. VIP lockers are skipped when `exclude_vip` is set.
    pub async fn bulk_open(&self, ids: &[LockerId], options: BulkOpenOptions) -> BulkOpenReport {
        let staff = OwnerKey::Staff("bulk-open".to_string());
        let mut report = BulkOpenReport::default();
        let mut pause_before_next = false;

        for &id in ids {
            let locker = match self.get_locker(id).await {
                Ok(locker) => locker,
                Err(e) => {
                    report.failed.push(FailedOpen {
                        locker_id: id,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            if options.exclude_vip && locker.is_vip {
                report.vip_skipped.push(id);
                continue;
            }

            if pause_before_next {
                tokio::time::sleep(options.interval).await;
                pause_before_next = false;
            }

            match self.confirm_and_open(id, &staff, options.force).await {
                Ok(_) => {
                    report.succeeded.push(id);
                    pause_before_next = true;
                }
                Err(e) => report.failed.push(FailedOpen {
                    locker_id: id,
                    reason: e.to_string(),
                }),
            }
        }

        report.success_count = report.succeeded.len();
        info!(
            requested = ids.len(),
            succeeded = report.success_count,
            failed = report.failed.len(),
            vip_skipped = report.vip_skipped.len(),
            "Bulk open finished"
        );
        report
    }

    /// Create missing `free` lockers `1..=total`. Never deletes.
    ///
    /// Returns the number of lockers created.
    ///
    /// # Errors
    /// Propagates storage errors.
    pub async fn ensure_lockers(&self, total: u32) -> Result<u32> {
        let created = self.ctx.lockers.ensure_range(total, self.ctx.now()).await?;
        if created == 0 {
            return Ok(0);
        }

        let known: HashSet<LockerId> = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        let fresh: Vec<Locker> = self
            .ctx
            .lockers
            .find_all()
            .await?
            .into_iter()
            .filter(|locker| !known.contains(&locker.id))
            .collect();

        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        for locker in fresh {
            slots
                .entry(locker.id)
                .or_insert_with(|| Arc::new(Mutex::new(locker)));
        }
        info!(created, total, "Locker records created");
        Ok(created)
    }

    /// Most recent transitions of a locker, newest first.
    ///
    /// # Errors
    /// Propagates storage errors.
    pub async fn history(&self, id: LockerId, limit: u32) -> Result<Vec<TransitionRecord>> {
        Ok(self.ctx.lockers.events(id, limit).await?)
    }

    async fn locker_held_by(&self, owner: &OwnerKey) -> Option<LockerId> {
        for slot in self.all_slots() {
            let locker = slot.lock().await;
            let holds = locker.status.is_held() || locker.status == LockerStatus::Error;
            if holds && locker.is_held_by(owner) {
                return Some(locker.id);
            }
        }
        None
    }
}

/// Apply `event` to `locker` and return the record describing it.
fn step(
    locker: &mut Locker,
    event: LockerEvent,
    now: chrono::DateTime<chrono::Utc>,
) -> std::result::Result<TransitionRecord, StateTransitionError> {
    let from = locker.status;
    let to = lifecycle::transition(locker.id, from, event)?;
    locker.status = to;
    locker.updated_at = now;
    Ok(TransitionRecord::new(locker.id, from, to, event, now))
}
