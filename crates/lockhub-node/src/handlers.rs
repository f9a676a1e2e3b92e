//! Execution of fleet commands on a node.
//!
//! A [`WireCommand`] is parsed into a [`CommandKind`] first; a payload that
//! does not parse is reported as a failed outcome and nothing else happens.
//! Every handler returns a [`CommandOutcome`], which is what goes back to
//! the coordinator as the command's result.

use std::sync::Arc;
use std::time::Duration;

use lockhub_core::constants::DEFAULT_BULK_INTERVAL_MS;
use lockhub_core::{CommandKind, CommandOutcome, LockerId, OwnerKey};
use lockhub_protocol::WireCommand;
use lockhub_storage::ZoneConfigRepository;
use tracing::{info, warn};

use crate::error::{NodeError, Result};
use crate::lockers::{BulkOpenOptions, LockerStateManager};

/// Staff key recorded for opens issued by the fleet.
const FLEET_STAFF_SESSION: &str = "fleet";

#[derive(Debug, Clone)]
pub struct CommandHandlers {
    lockers: Arc<LockerStateManager>,
}

impl CommandHandlers {
    #[must_use]
    pub fn new(lockers: Arc<LockerStateManager>) -> Self {
        Self { lockers }
    }

    /// Run one command to completion.
    pub async fn execute(&self, command: &WireCommand) -> CommandOutcome {
        let kind = match command.parse() {
            Ok(kind) => kind,
            Err(e) => {
                let err = NodeError::from(e);
                warn!(
                    command_id = %command.id,
                    command_type = %command.kind,
                    trace_id = ?err.trace_id(),
                    error = %err,
                    "Rejected command payload"
                );
                return CommandOutcome::failed(err.to_string());
            }
        };

        info!(command_id = %command.id, command_type = kind.type_name(), "Executing command");
        match self.dispatch(kind).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    command_id = %command.id,
                    kind = ?e.kind(),
                    trace_id = ?e.trace_id(),
                    error = %e,
                    "Command failed"
                );
                CommandOutcome::failed(e.to_string())
            }
        }
    }

    /// # Errors
    /// Whatever the operation behind the command returns.
    pub async fn dispatch(&self, kind: CommandKind) -> Result<CommandOutcome> {
        match kind {
            CommandKind::OpenLocker {
                locker_id,
                owner_key,
                force,
            } => self.open_locker(locker_id, owner_key, force).await,
            CommandKind::BulkOpen {
                locker_ids,
                exclude_vip,
                interval_ms,
            } => self.bulk_open(&locker_ids, exclude_vip, interval_ms).await,
            CommandKind::BlockLocker { locker_id, reason } => {
                self.lockers.block(locker_id, reason).await?;
                Ok(CommandOutcome::ok(format!("locker {locker_id} blocked")))
            }
            CommandKind::UnblockLocker { locker_id } => {
                self.lockers.unblock(locker_id).await?;
                Ok(CommandOutcome::ok(format!("locker {locker_id} unblocked")))
            }
            CommandKind::ReleaseLocker { locker_id } => {
                self.lockers.release(locker_id).await?;
                Ok(CommandOutcome::ok(format!("locker {locker_id} released")))
            }
            CommandKind::SyncHardware { total_lockers } => self.sync_hardware(total_lockers).await,
        }
    }

    async fn open_locker(
        &self,
        locker_id: LockerId,
        owner_key: Option<OwnerKey>,
        force: bool,
    ) -> Result<CommandOutcome> {
        let owner = owner_key.unwrap_or_else(|| OwnerKey::Staff(FLEET_STAFF_SESSION.to_string()));
        let outcome = self.lockers.confirm_and_open(locker_id, &owner, force).await?;
        let message = if outcome.retained {
            format!("locker {locker_id} opened at {}, owner kept", outcome.address)
        } else {
            format!("locker {locker_id} opened at {}", outcome.address)
        };
        Ok(CommandOutcome::ok(message))
    }

    async fn bulk_open(
        &self,
        locker_ids: &[LockerId],
        exclude_vip: bool,
        interval_ms: Option<u64>,
    ) -> Result<CommandOutcome> {
        let options = BulkOpenOptions {
            exclude_vip,
            interval: Duration::from_millis(interval_ms.unwrap_or(DEFAULT_BULK_INTERVAL_MS)),
            force: false,
        };
        let report = self.lockers.bulk_open(locker_ids, options).await;
        let summary = serde_json::to_string(&report)
            .map_err(|e| NodeError::Internal(format!("bulk open report: {e}")))?;

        if report.failed.is_empty() {
            Ok(CommandOutcome::ok(summary))
        } else {
            Ok(CommandOutcome::partial(
                format!("{} of {} lockers failed", report.failed.len(), locker_ids.len()),
                summary,
            ))
        }
    }

    /// Grow the zone configuration to the reported locker count, persist it,
    /// swap it in and create the missing locker records.
    async fn sync_hardware(&self, total_lockers: u32) -> Result<CommandOutcome> {
        let ctx = self.lockers.context();
        let outcome = ctx.zones.plan_sync(total_lockers)?;

        if outcome.changed {
            ctx.zone_store.save(&outcome.config, ctx.now()).await?;
            ctx.zones.replace(outcome.config.clone())?;
        }
        let created = self.lockers.ensure_lockers(outcome.config.total_lockers).await?;

        let message = match (&outcome.extended_zone, outcome.changed) {
            (_, false) => format!("hardware in sync at {} lockers", outcome.config.total_lockers),
            (Some(zone), true) => format!(
                "synced to {} lockers, zone {zone} extended, {created} lockers created",
                outcome.config.total_lockers
            ),
            (None, true) => format!(
                "synced to {} lockers, {created} lockers created",
                outcome.config.total_lockers
            ),
        };
        info!(total_lockers, changed = outcome.changed, created, "Hardware sync applied");
        Ok(CommandOutcome::ok(message))
    }
}
