//! Locker lifecycle transition table.
//!
//! Every state change a locker goes through is one [`LockerEvent`] applied to
//! its current [`LockerStatus`]. The table is a pure function so it can be
//! checked exhaustively in tests; the state manager is responsible for
//! serializing events per locker and persisting the result.
//!
//! ```text
//! free ──assign──▶ reserved ──confirm──▶ owned ──open──▶ opening
//!  ▲                  │                                   │
//!  └─────expire───────┘          pulse_confirmed ◀────────┤
//!  ▲                                                      │ pulse_retained ──▶ owned (VIP)
//!  └──────recover──── error ◀──── hardware_failure ◀──────┘
//!
//! any ──block──▶ blocked ──unblock──▶ free
//! ```

use crate::error::StateTransitionError;
use crate::types::{LockerId, LockerStatus, OwnerKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Events accepted by the locker lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockerEvent {
    /// An owner reserves a free locker.
    Assign,
    /// The reserving owner confirms before the TTL elapses.
    Confirm,
    /// The reservation TTL elapsed.
    Expire,
    /// An open command starts a relay pulse.
    Open,
    /// Pulse succeeded and ownership is released.
    PulseConfirmed,
    /// Pulse succeeded and a VIP owner keeps the locker.
    PulseRetained,
    /// The relay pulse failed.
    HardwareFailure,
    /// Manual or automatic recovery from a hardware error.
    Recover,
    Block,
    Unblock,
    /// Ownership released without a pulse.
    Release,
}

impl LockerEvent {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LockerEvent::Assign => "assign",
            LockerEvent::Confirm => "confirm",
            LockerEvent::Expire => "expire",
            LockerEvent::Open => "open",
            LockerEvent::PulseConfirmed => "pulse_confirmed",
            LockerEvent::PulseRetained => "pulse_retained",
            LockerEvent::HardwareFailure => "hardware_failure",
            LockerEvent::Recover => "recover",
            LockerEvent::Block => "block",
            LockerEvent::Unblock => "unblock",
            LockerEvent::Release => "release",
        }
    }
}

impl fmt::Display for LockerEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LockerEvent {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        const ALL: [LockerEvent; 11] = [
            LockerEvent::Assign,
            LockerEvent::Confirm,
            LockerEvent::Expire,
            LockerEvent::Open,
            LockerEvent::PulseConfirmed,
            LockerEvent::PulseRetained,
            LockerEvent::HardwareFailure,
            LockerEvent::Recover,
            LockerEvent::Block,
            LockerEvent::Unblock,
            LockerEvent::Release,
        ];
        ALL.into_iter()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| crate::Error::InvalidIdentifier(format!("Unknown locker event: {s}")))
    }
}

impl LockerStatus {
    /// Target state for `event`, or `None` if the event is not accepted here.
    ///
    /// # Examples
    ///
    /// ```
    /// use lockhub_core::{LockerStatus, lifecycle::LockerEvent};
    ///
    /// assert_eq!(LockerStatus::Free.next(LockerEvent::Assign), Some(LockerStatus::Reserved));
    /// assert_eq!(LockerStatus::Blocked.next(LockerEvent::Assign), None);
    /// ```
    #[must_use]
    pub fn next(self, event: LockerEvent) -> Option<LockerStatus> {
        use LockerEvent as E;
        use LockerStatus as S;

        match (self, event) {
            (_, E::Block) => Some(S::Blocked),
            (S::Blocked, E::Unblock) => Some(S::Free),

            (S::Free, E::Assign) => Some(S::Reserved),
            (S::Reserved, E::Confirm) => Some(S::Owned),
            (S::Reserved, E::Expire) => Some(S::Free),

            // Free lockers are only opened by staff; the caller checks the key.
            (S::Owned | S::Free, E::Open) => Some(S::Opening),
            (S::Opening, E::PulseConfirmed) => Some(S::Free),
            (S::Opening, E::PulseRetained) => Some(S::Owned),
            (S::Opening, E::HardwareFailure) => Some(S::Error),

            (S::Error, E::Recover) => Some(S::Free),
            (S::Reserved | S::Owned | S::Error, E::Release) => Some(S::Free),

            _ => None,
        }
    }

    #[must_use]
    pub fn accepts(self, event: LockerEvent) -> bool {
        self.next(event).is_some()
    }
}

/// Apply `event` to a locker in `state`.
///
/// # Errors
/// Returns `StateTransitionError::InvalidEvent` when the table has no row for
/// the pair. A locker in `opening` is reported as `TransitionPending` for
/// every event except the pulse outcomes and `block`.
pub fn transition(
    locker_id: LockerId,
    state: LockerStatus,
    event: LockerEvent,
) -> Result<LockerStatus, StateTransitionError> {
    match state.next(event) {
        Some(next) => Ok(next),
        None if state == LockerStatus::Opening => {
            Err(StateTransitionError::TransitionPending { locker_id })
        }
        None => Err(StateTransitionError::InvalidEvent {
            locker_id,
            state,
            event,
        }),
    }
}

/// Audit record of one applied transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub locker_id: LockerId,
    pub from: LockerStatus,
    pub to: LockerStatus,
    pub event: LockerEvent,
    pub owner_key: Option<OwnerKey>,
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

impl TransitionRecord {
    #[must_use]
    pub fn new(
        locker_id: LockerId,
        from: LockerStatus,
        to: LockerStatus,
        event: LockerEvent,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            locker_id,
            from,
            to,
            event,
            owner_key: None,
            detail: None,
            at,
        }
    }

    #[must_use]
    pub fn with_owner(mut self, owner: Option<OwnerKey>) -> Self {
        self.owner_key = owner;
        self
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
