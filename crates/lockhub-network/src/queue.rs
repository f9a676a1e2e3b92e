//! Coordinator-side command queue.
//!
//! A command moves `pending → delivered → completed | failed`. Delivery hands
//! it to exactly one node: a kiosk-targeted command to its kiosk, a
//! zone-targeted command to the first node of that zone that polls. Only the
//! node it was delivered to may complete it, and a repeated completion of a
//! terminal command is acknowledged without changing anything.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use lockhub_core::{
    Command, CommandId, CommandKind, CommandOutcome, CommandStatus, CommandTarget, KioskId,
};
use lockhub_protocol::CommandCompletion;
use tracing::{debug, info, warn};

use crate::error::QueueError;

/// What [`CommandQueue::complete`] did with a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionAck {
    /// The command moved to a terminal state.
    Recorded(CommandStatus),
    /// The command was already terminal; nothing changed.
    Duplicate(CommandStatus),
}

#[derive(Debug)]
pub struct CommandQueue {
    commands: HashMap<CommandId, Command>,
    /// Insertion order, so delivery is FIFO.
    order: Vec<CommandId>,
    result_timeout: chrono::Duration,
}

impl CommandQueue {
    #[must_use]
    pub fn new(result_timeout: chrono::Duration) -> Self {
        Self {
            commands: HashMap::new(),
            order: Vec::new(),
            result_timeout,
        }
    }

    pub fn enqueue(
        &mut self,
        kind: CommandKind,
        target: CommandTarget,
        now: DateTime<Utc>,
    ) -> CommandId {
        let command = Command::new(kind, target, now);
        let id = command.id;
        info!(
            command_id = %id,
            command_type = command.kind.type_name(),
            target = ?command.target,
            "Command queued"
        );
        self.order.push(id);
        self.commands.insert(id, command);
        id
    }

    /// Hand every pending command addressed to this node over to it.
    pub fn take_for(
        &mut self,
        kiosk_id: &KioskId,
        zone: Option<&str>,
        now: DateTime<Utc>,
    ) -> Vec<Command> {
        let mut delivered = Vec::new();
        for id in &self.order {
            let Some(command) = self.commands.get_mut(id) else {
                continue;
            };
            if command.status != CommandStatus::Pending || !command.target.matches(kiosk_id, zone)
            {
                continue;
            }
            command.status = CommandStatus::Delivered;
            command.delivered_at = Some(now);
            command.delivered_to = Some(kiosk_id.clone());
            debug!(command_id = %id, kiosk_id = %kiosk_id, "Command delivered");
            delivered.push(command.clone());
        }
        delivered
    }

    /// Record the result a node reported for a command.
    ///
    /// # Errors
    /// - `QueueError::UnknownCommand` if the id was never queued
    /// - `QueueError::NotDelivered` if the command is still pending
    /// - `QueueError::WrongNode` if another node holds the command
    pub fn complete(
        &mut self,
        kiosk_id: &KioskId,
        completion: &CommandCompletion,
        now: DateTime<Utc>,
    ) -> Result<CompletionAck, QueueError> {
        let id = completion.command_id;
        let command = self
            .commands
            .get_mut(&id)
            .ok_or(QueueError::UnknownCommand(id))?;

        if command.delivered_to.as_ref() != Some(kiosk_id) {
            return Err(match command.status {
                CommandStatus::Pending => QueueError::NotDelivered(id),
                _ => QueueError::WrongNode {
                    command_id: id,
                    kiosk_id: kiosk_id.clone(),
                },
            });
        }
        if command.status.is_terminal() {
            debug!(command_id = %id, status = ?command.status, "Duplicate completion ignored");
            return Ok(CompletionAck::Duplicate(command.status));
        }

        let outcome = completion.outcome();
        command.status = if outcome.success {
            CommandStatus::Completed
        } else {
            CommandStatus::Failed
        };
        command.completed_at = Some(now);
        info!(
            command_id = %id,
            kiosk_id = %kiosk_id,
            success = outcome.success,
            error = ?outcome.error,
            "Command completed"
        );
        command.result = Some(outcome);
        Ok(CompletionAck::Recorded(command.status))
    }

    /// Fail every delivered command whose result is overdue. Returns their ids.
    pub fn fail_stale(&mut self, now: DateTime<Utc>) -> Vec<CommandId> {
        let mut failed = Vec::new();
        for id in &self.order {
            let Some(command) = self.commands.get_mut(id) else {
                continue;
            };
            let Some(delivered_at) = command.delivered_at else {
                continue;
            };
            if command.status != CommandStatus::Delivered
                || now - delivered_at <= self.result_timeout
            {
                continue;
            }
            warn!(
                command_id = %id,
                kiosk_id = ?command.delivered_to,
                "No result within timeout, failing command"
            );
            command.status = CommandStatus::Failed;
            command.completed_at = Some(now);
            command.result = Some(CommandOutcome::failed(format!(
                "no result within {}s",
                self.result_timeout.num_seconds()
            )));
            failed.push(*id);
        }
        failed
    }

    /// Drop terminal commands completed before `cutoff`.
    pub fn prune(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.order.len();
        let commands = &mut self.commands;
        self.order.retain(|id| {
            let expired = commands.get(id).is_some_and(|command| {
                command.status.is_terminal()
                    && command.completed_at.is_some_and(|at| at < cutoff)
            });
            if expired {
                commands.remove(id);
            }
            !expired
        });
        before - self.order.len()
    }

    #[must_use]
    pub fn get(&self, id: &CommandId) -> Option<&Command> {
        self.commands.get(id)
    }

    /// All commands in queue order.
    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.order.iter().filter_map(|id| self.commands.get(id))
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.commands
            .values()
            .filter(|command| command.status == CommandStatus::Pending)
            .count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use lockhub_core::LockerId;

    fn kiosk(id: &str) -> KioskId {
        KioskId::new(id).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap()
    }

    fn release(id: u32) -> CommandKind {
        CommandKind::ReleaseLocker {
            locker_id: LockerId::new(id).unwrap(),
        }
    }

    fn queue() -> CommandQueue {
        CommandQueue::new(Duration::seconds(120))
    }

    #[test]
    fn test_kiosk_command_goes_to_its_kiosk_only() {
        let mut q = queue();
        let id = q.enqueue(release(1), CommandTarget::Kiosk(kiosk("k1")), t0());

        assert!(q.take_for(&kiosk("k2"), Some("A"), t0()).is_empty());
        let taken = q.take_for(&kiosk("k1"), None, t0());
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].id, id);
        assert!(q.take_for(&kiosk("k1"), None, t0()).is_empty());
        assert_eq!(q.get(&id).unwrap().status, CommandStatus::Delivered);
    }

    #[test]
    fn test_zone_command_delivered_once() {
        let mut q = queue();
        q.enqueue(release(1), CommandTarget::Zone("A".to_string()), t0());

        assert!(q.take_for(&kiosk("k1"), Some("B"), t0()).is_empty());
        assert_eq!(q.take_for(&kiosk("k2"), Some("A"), t0()).len(), 1);
        assert!(q.take_for(&kiosk("k3"), Some("A"), t0()).is_empty());
    }

    #[test]
    fn test_delivery_preserves_order() {
        let mut q = queue();
        let target = CommandTarget::Kiosk(kiosk("k1"));
        let ids: Vec<CommandId> = (1..=4)
            .map(|n| q.enqueue(release(n), target.clone(), t0()))
            .collect();
        let taken: Vec<CommandId> = q
            .take_for(&kiosk("k1"), None, t0())
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(taken, ids);
    }

    #[test]
    fn test_completion_is_idempotent() {
        let mut q = queue();
        let id = q.enqueue(release(1), CommandTarget::Kiosk(kiosk("k1")), t0());
        q.take_for(&kiosk("k1"), None, t0());

        let completion = CommandCompletion::new(id, CommandOutcome::ok("released"));
        assert_eq!(
            q.complete(&kiosk("k1"), &completion, t0()).unwrap(),
            CompletionAck::Recorded(CommandStatus::Completed)
        );
        let failure = CommandCompletion::new(id, CommandOutcome::failed("late"));
        assert_eq!(
            q.complete(&kiosk("k1"), &failure, t0()).unwrap(),
            CompletionAck::Duplicate(CommandStatus::Completed)
        );
        assert!(q.get(&id).unwrap().result.as_ref().unwrap().success);
    }

    #[test]
    fn test_completion_rejections() {
        let mut q = queue();
        let id = q.enqueue(release(1), CommandTarget::Kiosk(kiosk("k1")), t0());
        let completion = CommandCompletion::new(id, CommandOutcome::ok("released"));

        assert_eq!(
            q.complete(&kiosk("k1"), &completion, t0()).unwrap_err(),
            QueueError::NotDelivered(id)
        );

        q.take_for(&kiosk("k1"), None, t0());
        assert!(matches!(
            q.complete(&kiosk("k2"), &completion, t0()).unwrap_err(),
            QueueError::WrongNode { .. }
        ));

        let unknown = CommandCompletion::new(CommandId::generate(), CommandOutcome::ok("x"));
        assert!(matches!(
            q.complete(&kiosk("k1"), &unknown, t0()).unwrap_err(),
            QueueError::UnknownCommand(_)
        ));
    }

    #[test]
    fn test_stale_delivery_fails() {
        let mut q = queue();
        let id = q.enqueue(release(1), CommandTarget::Kiosk(kiosk("k1")), t0());
        let pending = q.enqueue(release(2), CommandTarget::Kiosk(kiosk("k2")), t0());
        q.take_for(&kiosk("k1"), None, t0());

        assert!(q.fail_stale(t0() + Duration::seconds(120)).is_empty());
        assert_eq!(q.fail_stale(t0() + Duration::seconds(121)), vec![id]);

        let command = q.get(&id).unwrap();
        assert_eq!(command.status, CommandStatus::Failed);
        assert!(!command.result.as_ref().unwrap().success);
        assert_eq!(q.get(&pending).unwrap().status, CommandStatus::Pending);
    }

    #[test]
    fn test_prune_drops_old_terminal_commands() {
        let mut q = queue();
        let id = q.enqueue(release(1), CommandTarget::Kiosk(kiosk("k1")), t0());
        q.enqueue(release(2), CommandTarget::Kiosk(kiosk("k1")), t0());
        q.take_for(&kiosk("k1"), None, t0());
        let completion = CommandCompletion::new(id, CommandOutcome::ok("released"));
        q.complete(&kiosk("k1"), &completion, t0()).unwrap();

        assert_eq!(q.prune(t0() + Duration::hours(1)), 1);
        assert_eq!(q.len(), 1);
        assert!(q.get(&id).is_none());
    }
}
