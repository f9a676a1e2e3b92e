use crate::{
    Result,
    command::CommandKind,
    constants::{MAX_KIOSK_ID_LENGTH, MAX_SLAVE_ID, MIN_SLAVE_ID},
    error::Error,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// Locker identifier (positive integer, unique within a site)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct LockerId(u32);

impl LockerId {
    /// Create a new locker ID with validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidIdentifier` if the ID is zero.
    pub fn new(id: u32) -> Result<Self> {
        if id == 0 {
            return Err(Error::InvalidIdentifier(
                "Locker ID must be positive".to_string(),
            ));
        }
        Ok(LockerId(id))
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for LockerId {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        LockerId::new(value)
    }
}

impl From<LockerId> for u32 {
    fn from(id: LockerId) -> Self {
        id.0
    }
}

impl fmt::Display for LockerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for LockerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let id: u32 = s
            .trim()
            .parse()
            .map_err(|_| Error::InvalidIdentifier(format!("Invalid locker ID: {s}")))?;
        LockerId::new(id)
    }
}

/// Kiosk node identifier.
///
/// Trimmed, 1-64 characters of ASCII letters, digits, `-`, `_` or `.`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KioskId(String);

impl KioskId {
    /// # Errors
    /// Returns `Error::InvalidIdentifier` for empty, oversized or non-ASCII ids.
    pub fn new(id: &str) -> Result<Self> {
        let id = id.trim();
        if id.is_empty() || id.len() > MAX_KIOSK_ID_LENGTH {
            return Err(Error::InvalidIdentifier(format!(
                "Kiosk ID must be 1-{MAX_KIOSK_ID_LENGTH} chars, got {}",
                id.len()
            )));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(Error::InvalidIdentifier(format!("Invalid kiosk ID: {id}")));
        }
        Ok(KioskId(id.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for KioskId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        KioskId::new(&value)
    }
}

impl From<KioskId> for String {
    fn from(id: KioskId) -> Self {
        id.0
    }
}

impl fmt::Display for KioskId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for KioskId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        KioskId::new(s)
    }
}

/// Opaque token identifying who currently holds a locker.
///
/// The textual form is `card:<id>` or `staff:<session>`. Bare values without
/// a prefix are read as card ids, which is what RFID readers emit.
///
/// # Security
/// Equality is constant-time over the kind and token bytes so that card
/// comparisons do not leak how many leading bytes matched.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OwnerKey {
    Card(String),
    Staff(String),
}

impl OwnerKey {
    /// Build a card key. The card id is trimmed and upper-cased.
    ///
    /// # Errors
    /// Returns `Error::InvalidIdentifier` if the card id is empty or not ASCII.
    pub fn card(id: &str) -> Result<Self> {
        let id = id.trim().to_uppercase();
        Self::check_token(&id)?;
        Ok(OwnerKey::Card(id))
    }

    /// # Errors
    /// Returns `Error::InvalidIdentifier` if the session token is empty or not ASCII.
    pub fn staff(session: &str) -> Result<Self> {
        let session = session.trim();
        Self::check_token(session)?;
        Ok(OwnerKey::Staff(session.to_string()))
    }

    fn check_token(token: &str) -> Result<()> {
        if token.is_empty() || !token.is_ascii() || token.contains(char::is_whitespace) {
            return Err(Error::InvalidIdentifier(format!("Invalid owner key: {token:?}")));
        }
        Ok(())
    }

    #[must_use]
    pub fn is_staff(&self) -> bool {
        matches!(self, OwnerKey::Staff(_))
    }

    #[must_use]
    pub fn token(&self) -> &str {
        match self {
            OwnerKey::Card(token) | OwnerKey::Staff(token) => token,
        }
    }

    fn kind_tag(&self) -> u8 {
        match self {
            OwnerKey::Card(_) => 0,
            OwnerKey::Staff(_) => 1,
        }
    }
}

impl PartialEq for OwnerKey {
    fn eq(&self, other: &Self) -> bool {
        let same_kind = self.kind_tag().ct_eq(&other.kind_tag());
        let same_token = self.token().as_bytes().ct_eq(other.token().as_bytes());
        (same_kind & same_token).into()
    }
}

impl std::hash::Hash for OwnerKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.kind_tag().hash(state);
        self.token().hash(state);
    }
}

impl fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OwnerKey::Card(id) => write!(f, "card:{id}"),
            OwnerKey::Staff(session) => write!(f, "staff:{session}"),
        }
    }
}

impl std::str::FromStr for OwnerKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().split_once(':') {
            Some(("card", id)) => OwnerKey::card(id),
            Some(("staff", session)) => OwnerKey::staff(session),
            Some((kind, _)) => Err(Error::InvalidIdentifier(format!(
                "Unknown owner key kind: {kind}"
            ))),
            None => OwnerKey::card(s),
        }
    }
}

impl TryFrom<String> for OwnerKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<OwnerKey> for String {
    fn from(key: OwnerKey) -> Self {
        key.to_string()
    }
}

/// Locker lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockerStatus {
    Free,
    Reserved,
    Owned,
    Opening,
    Blocked,
    Error,
}

impl LockerStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LockerStatus::Free => "free",
            LockerStatus::Reserved => "reserved",
            LockerStatus::Owned => "owned",
            LockerStatus::Opening => "opening",
            LockerStatus::Blocked => "blocked",
            LockerStatus::Error => "error",
        }
    }

    /// Returns `true` while the locker is held by an owner.
    #[inline]
    #[must_use]
    pub fn is_held(self) -> bool {
        matches!(self, LockerStatus::Reserved | LockerStatus::Owned)
    }
}

impl fmt::Display for LockerStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LockerStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "free" => Ok(LockerStatus::Free),
            "reserved" => Ok(LockerStatus::Reserved),
            "owned" => Ok(LockerStatus::Owned),
            "opening" => Ok(LockerStatus::Opening),
            "blocked" => Ok(LockerStatus::Blocked),
            "error" => Ok(LockerStatus::Error),
            other => Err(Error::InvalidIdentifier(format!(
                "Unknown locker status: {other}"
            ))),
        }
    }
}

/// A physical locker compartment.
///
/// Records are never deleted. A locker that leaves service is blocked, and a
/// locker that is re-provisioned is re-initialized with [`Locker::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locker {
    pub id: LockerId,
    pub status: LockerStatus,
    pub zone_id: Option<String>,
    pub owner_key: Option<OwnerKey>,
    pub is_vip: bool,
    pub reserved_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub display_name: String,
    pub block_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Locker {
    /// A free, non-VIP locker with the default display name.
    #[must_use]
    pub fn new(id: LockerId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            status: LockerStatus::Free,
            zone_id: None,
            owner_key: None,
            is_vip: false,
            reserved_at: None,
            expires_at: None,
            display_name: format!("Locker {id}"),
            block_reason: None,
            updated_at: now,
        }
    }

    /// Returns `true` if the locker is reserved and its TTL has elapsed at `now`.
    #[must_use]
    pub fn reservation_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == LockerStatus::Reserved && self.expires_at.is_some_and(|at| now >= at)
    }

    #[must_use]
    pub fn is_held_by(&self, key: &OwnerKey) -> bool {
        self.owner_key.as_ref().is_some_and(|owner| owner == key)
    }

    /// Clear ownership and reservation data.
    pub fn clear_owner(&mut self) {
        self.owner_key = None;
        self.reserved_at = None;
        self.expires_at = None;
    }
}

/// Physical relay address (both parts 1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HardwareAddress {
    pub slave_id: u8,
    pub coil: u16,
}

impl HardwareAddress {
    /// # Errors
    /// Returns `Error::InvalidIdentifier` if the slave id is outside 1-247 or
    /// the coil is zero.
    pub fn new(slave_id: u8, coil: u16) -> Result<Self> {
        if !(MIN_SLAVE_ID..=MAX_SLAVE_ID).contains(&slave_id) {
            return Err(Error::InvalidIdentifier(format!(
                "Slave ID must be {MIN_SLAVE_ID}-{MAX_SLAVE_ID}, got {slave_id}"
            )));
        }
        if coil == 0 {
            return Err(Error::InvalidIdentifier(
                "Coil address must be positive".to_string(),
            ));
        }
        Ok(Self { slave_id, coil })
    }

    /// Zero-based register/coil number used on the wire.
    #[must_use]
    pub fn wire_address(&self) -> u16 {
        self.coil.saturating_sub(1)
    }
}

impl fmt::Display for HardwareAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "slave {} coil {}", self.slave_id, self.coil)
    }
}

/// Kiosk node liveness as seen by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Online,
    Offline,
    Provisioning,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NodeStatus::Online => write!(f, "online"),
            NodeStatus::Offline => write!(f, "offline"),
            NodeStatus::Provisioning => write!(f, "provisioning"),
        }
    }
}

/// Last heartbeat received from a kiosk node.
///
/// Updated only when a heartbeat arrives. The offline state is never stored;
/// it is inferred from `last_seen` by [`HeartbeatRecord::status_at`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub kiosk_id: KioskId,
    pub zone: Option<String>,
    pub last_seen: DateTime<Utc>,
    pub status: NodeStatus,
    pub version: String,
    pub config_hash: String,
}

impl HeartbeatRecord {
    /// Status at `now`: offline once the silence strictly exceeds `threshold`,
    /// otherwise the status the node last reported.
    #[must_use]
    pub fn status_at(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> NodeStatus {
        if now - self.last_seen > threshold {
            NodeStatus::Offline
        } else {
            self.status
        }
    }
}

/// Correlation id attached to every externally surfaced 4xx-class error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceId(Uuid);

impl TraceId {
    #[must_use]
    pub fn generate() -> Self {
        TraceId(Uuid::new_v4())
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Fleet command identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(Uuid);

impl CommandId {
    #[must_use]
    pub fn generate() -> Self {
        CommandId(Uuid::new_v4())
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for CommandId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(CommandId)
            .map_err(|_| Error::InvalidIdentifier(format!("Invalid command ID: {s}")))
    }
}

/// Command delivery state on the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Delivered,
    Completed,
    Failed,
}

impl CommandStatus {
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, CommandStatus::Completed | CommandStatus::Failed)
    }
}

/// Who a command is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CommandTarget {
    Kiosk(KioskId),
    Zone(String),
}

impl CommandTarget {
    /// Returns `true` if a node with this id and zone may take the command.
    #[must_use]
    pub fn matches(&self, kiosk_id: &KioskId, zone: Option<&str>) -> bool {
        match self {
            CommandTarget::Kiosk(target) => target == kiosk_id,
            CommandTarget::Zone(target) => zone == Some(target.as_str()),
        }
    }
}

/// Result of executing a command on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CommandOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            error: None,
            message: Some(message.into()),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            message: None,
        }
    }

    /// A failure that still carries a report, such as a bulk open where
    /// some lockers failed.
    pub fn partial(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            message: Some(message.into()),
        }
    }
}

/// A command created by the coordinator.
///
/// Consumed exactly once by the node it is delivered to and terminal once a
/// result is reported or the result timeout elapses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub id: CommandId,
    pub kind: CommandKind,
    pub target: CommandTarget,
    pub status: CommandStatus,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub delivered_to: Option<KioskId>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<CommandOutcome>,
}

impl Command {
    #[must_use]
    pub fn new(kind: CommandKind, target: CommandTarget, now: DateTime<Utc>) -> Self {
        Self {
            id: CommandId::generate(),
            kind,
            target,
            status: CommandStatus::Pending,
            created_at: now,
            delivered_at: None,
            delivered_to: None,
            completed_at: None,
            result: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_locker_id_rejects_zero() {
        assert!(LockerId::new(0).is_err());
        assert_eq!(LockerId::new(7).unwrap().get(), 7);
        assert_eq!("12".parse::<LockerId>().unwrap().get(), 12);
        assert!("abc".parse::<LockerId>().is_err());
    }

    #[test]
    fn test_locker_id_serde_validates() {
        assert!(serde_json::from_str::<LockerId>("0").is_err());
        let id: LockerId = serde_json::from_str("42").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "42");
    }

    #[rstest]
    #[case("kiosk-1", true)]
    #[case("  lobby.east_2 ", true)]
    #[case("", false)]
    #[case("has space", false)]
    #[case("ünicode", false)]
    fn test_kiosk_id_validation(#[case] input: &str, #[case] valid: bool) {
        assert_eq!(KioskId::new(input).is_ok(), valid);
    }

    #[rstest]
    #[case("card:ab12", OwnerKey::Card("AB12".to_string()))]
    #[case("AB12", OwnerKey::Card("AB12".to_string()))]
    #[case("staff:sess-9", OwnerKey::Staff("sess-9".to_string()))]
    fn test_owner_key_parsing(#[case] input: &str, #[case] expected: OwnerKey) {
        assert_eq!(input.parse::<OwnerKey>().unwrap(), expected);
    }

    #[test]
    fn test_owner_key_kinds_differ() {
        let card = OwnerKey::Card("X1".to_string());
        let staff = OwnerKey::Staff("X1".to_string());
        assert_ne!(card, staff);
        assert!("robot:1".parse::<OwnerKey>().is_err());
        assert_eq!(card.to_string(), "card:X1");
    }

    #[test]
    fn test_hardware_address_bounds() {
        assert!(HardwareAddress::new(0, 1).is_err());
        assert!(HardwareAddress::new(248, 1).is_err());
        assert!(HardwareAddress::new(1, 0).is_err());
        assert_eq!(HardwareAddress::new(2, 1).unwrap().wire_address(), 0);
    }

    #[test]
    fn test_reservation_expiry() {
        let now = Utc::now();
        let mut locker = Locker::new(LockerId::new(1).unwrap(), now);
        assert!(!locker.reservation_expired(now));

        locker.status = LockerStatus::Reserved;
        locker.expires_at = Some(now + chrono::Duration::seconds(90));
        assert!(!locker.reservation_expired(now));
        assert!(locker.reservation_expired(now + chrono::Duration::seconds(90)));
    }

    #[test]
    fn test_heartbeat_offline_inference() {
        let seen = Utc::now();
        let record = HeartbeatRecord {
            kiosk_id: KioskId::new("kiosk-1").unwrap(),
            zone: Some("A".to_string()),
            last_seen: seen,
            status: NodeStatus::Online,
            version: "1.0.0".to_string(),
            config_hash: "abc".to_string(),
        };
        let threshold = chrono::Duration::seconds(30);

        assert_eq!(
            record.status_at(seen + chrono::Duration::seconds(30), threshold),
            NodeStatus::Online
        );
        assert_eq!(
            record.status_at(seen + chrono::Duration::seconds(31), threshold),
            NodeStatus::Offline
        );
    }

    #[test]
    fn test_command_target_matching() {
        let kiosk = KioskId::new("kiosk-1").unwrap();
        let other = KioskId::new("kiosk-2").unwrap();

        let by_kiosk = CommandTarget::Kiosk(kiosk.clone());
        assert!(by_kiosk.matches(&kiosk, None));
        assert!(!by_kiosk.matches(&other, Some("A")));

        let by_zone = CommandTarget::Zone("A".to_string());
        assert!(by_zone.matches(&other, Some("A")));
        assert!(!by_zone.matches(&kiosk, None));
    }

    #[test]
    fn test_command_outcome_shapes() {
        let ok = CommandOutcome::ok("opened");
        assert!(ok.success);
        assert_eq!(ok.error, None);

        let failed = CommandOutcome::failed("bus timeout");
        assert!(!failed.success);
        assert_eq!(failed.message, None);

        let partial = CommandOutcome::partial("1 of 3 lockers failed", "{\"success_count\":2}");
        assert!(!partial.success);
        assert_eq!(partial.error.as_deref(), Some("1 of 3 lockers failed"));
        assert_eq!(partial.message.as_deref(), Some("{\"success_count\":2}"));
    }
}
