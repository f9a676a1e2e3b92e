//! Assembly and task layout of a running kiosk node.
//!
//! ```text
//!  heartbeat loop ──┐                    ┌──> completions ──> poll loop
//!                   ├──> mpsc<WireCommand> ──> executor
//!  poll loop ───────┘        (one command at a time)
//!
//!  reservation sweeper ──> LockerStateManager ──> RelayBus worker ──> relay cards
//! ```
//!
//! The heartbeat and poll loops each own a connection to the coordinator and
//! reconnect with their own backoff. Shutdown cancels the loops, lets the
//! executor finish the command it is running, delivers what completions it
//! can, then stops the bus worker after its in-flight job and closes the
//! database.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use lockhub_core::constants::MAX_SLAVE_ID;
use lockhub_core::{CommandId, KioskId, NodeStatus};
use lockhub_hardware::mock::MockRelayBoard;
use lockhub_hardware::{
    AnyRelayTransport, BusHandle, RelayBus, RelayDriver, SerialTransport, TcpGatewayConfig,
    TcpTransport,
};
use lockhub_network::{FleetClient, FleetClientConfig, FleetClientError, ReconnectBackoff};
use lockhub_protocol::{CommandCompletion, HeartbeatRequest, PollRequest, WireCommand};
use lockhub_storage::{
    Database, DatabaseConfig, SqliteLockerRepository, SqliteZoneConfigRepository,
    ZoneConfigRepository,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, NodeSettings, TransportKind};
use crate::context::{Clock, NodeContext, SystemClock};
use crate::error::Result;
use crate::handlers::CommandHandlers;
use crate::lockers::LockerStateManager;
use crate::zones::{ZoneHealth, ZoneRegistry};

/// Commands buffered between the fleet loops and the executor.
const COMMAND_BUFFER: usize = 32;

/// Executed command ids remembered for duplicate suppression.
const EXECUTED_HISTORY: usize = 1024;

/// Build the relay transport selected in the bus settings.
///
/// # Errors
/// `Hardware` if the serial port cannot be opened, `Configuration` for a
/// missing gateway address.
pub fn open_transport(config: &Config) -> Result<AnyRelayTransport> {
    let transport = match config.bus.transport {
        TransportKind::Serial => {
            AnyRelayTransport::Serial(SerialTransport::open(&config.bus.serial_config())?)
        }
        TransportKind::Tcp => {
            let addr = config.bus.gateway_addr()?;
            AnyRelayTransport::Tcp(TcpTransport::new(TcpGatewayConfig::new(addr)))
        }
        TransportKind::Mock => {
            let (board, _handle) = MockRelayBoard::new(&mock_slaves(config));
            AnyRelayTransport::Mock(board)
        }
    };
    info!(transport = ?config.bus.transport, "Relay transport ready");
    Ok(transport)
}

/// One simulated card per slave id the configured zones can address.
fn mock_slaves(config: &Config) -> Vec<u8> {
    let zones = &config.zones;
    let cpc = u32::from(zones.channels_per_card.max(1));
    let implicit = zones.total_lockers.div_ceil(cpc).clamp(1, u32::from(MAX_SLAVE_ID));

    let mut slaves: Vec<u8> = (1..=implicit).filter_map(|s| u8::try_from(s).ok()).collect();
    for zone in &zones.zones {
        slaves.extend(zone.relay_cards.iter().copied());
    }
    slaves.sort_unstable();
    slaves.dedup();
    slaves
}

#[derive(Debug)]
pub struct KioskNode {
    settings: NodeSettings,
    lockers: Arc<LockerStateManager>,
    handlers: CommandHandlers,
    bus: BusHandle,
    db: Database,
}

impl KioskNode {
    /// Open the database and relay transport named in `config` and assemble the node.
    ///
    /// # Errors
    /// Storage, hardware and configuration errors from start-up.
    pub async fn start(config: &Config) -> Result<Self> {
        let db = Database::new(DatabaseConfig::new(config.node.database_path.as_str())).await?;
        let transport = open_transport(config)?;
        Self::assemble(config, db, transport, Arc::new(SystemClock)).await
    }

    /// Assemble a node on an already opened database and transport.
    ///
    /// The zone configuration is loaded from storage; the `[zones]` section
    /// only seeds storage when nothing has been persisted yet.
    ///
    /// # Errors
    /// `ConfigValidation` if the stored or seeded zone configuration is
    /// invalid, plus storage errors.
    pub async fn assemble(
        config: &Config,
        db: Database,
        transport: AnyRelayTransport,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let kiosk_id = config.node.kiosk_id()?;
        let zone_store = SqliteZoneConfigRepository::new(db.pool().clone());

        let zone_config = match zone_store.load().await? {
            Some(stored) => {
                info!(config_hash = %stored.hash(), "Loaded stored zone configuration");
                stored
            }
            None => {
                let seed = config.zones.to_zone_config();
                lockhub_core::zones::validate(&seed).inspect_err(|e| {
                    warn!(error = %e, "Rejected zone configuration from config file");
                })?;
                zone_store.save(&seed, clock.now()).await?;
                info!(config_hash = %seed.hash(), "Seeded zone configuration");
                seed
            }
        };
        let total_lockers = zone_config.total_lockers;
        let zones = Arc::new(ZoneRegistry::new(zone_config, config.node.fallback_policy)?);

        let (bus, bus_handle) = RelayBus::spawn(transport, config.bus.bus_config());
        let driver = RelayDriver::new(bus, config.bus.driver_config());

        let ctx = NodeContext {
            kiosk_id: kiosk_id.clone(),
            zone: config.node.zone.clone(),
            clock,
            lockers: SqliteLockerRepository::new(db.pool().clone()),
            zone_store,
            zones,
            driver,
        };

        let lockers = Arc::new(LockerStateManager::load(ctx, config.node.locker_settings()).await?);
        lockers.ensure_lockers(total_lockers).await?;
        let handlers = CommandHandlers::new(Arc::clone(&lockers));

        info!(kiosk_id = %kiosk_id, zone = ?config.node.zone, total_lockers, "Kiosk node assembled");
        Ok(Self {
            settings: config.node.clone(),
            lockers,
            handlers,
            bus: bus_handle,
            db,
        })
    }

    #[must_use]
    pub fn lockers(&self) -> &Arc<LockerStateManager> {
        &self.lockers
    }

    #[must_use]
    pub fn handlers(&self) -> &CommandHandlers {
        &self.handlers
    }

    #[must_use]
    pub fn kiosk_id(&self) -> &KioskId {
        &self.lockers.context().kiosk_id
    }

    #[must_use]
    pub fn health(&self) -> ZoneHealth {
        self.lockers.context().zones.health()
    }

    /// Run the fleet loops and the reservation sweeper until `cancel` fires,
    /// then shut down in order.
    ///
    /// # Errors
    /// Currently only hardware shutdown errors are surfaced.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        let executor = tokio::spawn(run_executor(
            self.handlers.clone(),
            command_rx,
            completion_tx,
            cancel.clone(),
        ));
        let heartbeat = tokio::spawn(heartbeat_loop(
            FleetIdentity::new(&self.settings, &self.lockers),
            self.settings.heartbeat_interval(),
            command_tx.clone(),
            cancel.clone(),
        ));
        let poll = tokio::spawn(poll_loop(
            FleetIdentity::new(&self.settings, &self.lockers),
            self.settings.poll_interval(),
            command_tx,
            completion_rx,
            cancel.clone(),
        ));
        let sweeper = tokio::spawn(reservation_sweeper(
            Arc::clone(&self.lockers),
            self.settings.reservation_sweep(),
            cancel.clone(),
        ));

        info!(kiosk_id = %self.kiosk_id(), "Kiosk node running");
        cancel.cancelled().await;
        info!(kiosk_id = %self.kiosk_id(), "Kiosk node shutting down");

        join("heartbeat loop", heartbeat).await;
        join("reservation sweeper", sweeper).await;
        join("command executor", executor).await;
        join("poll loop", poll).await;

        self.bus.shutdown().await?;
        self.db.close().await;
        info!("Kiosk node stopped");
        Ok(())
    }
}

async fn join(task: &'static str, handle: JoinHandle<()>) {
    if let Err(e) = handle.await
        && e.is_panic()
    {
        error!(task, error = %e, "Node task panicked");
    }
}

/// What the node tells the coordinator about itself.
#[derive(Debug, Clone)]
struct FleetIdentity {
    kiosk_id: KioskId,
    zone: Option<String>,
    version: String,
    zones: Arc<ZoneRegistry>,
    client: FleetClientConfig,
}

impl FleetIdentity {
    fn new(settings: &NodeSettings, lockers: &LockerStateManager) -> Self {
        let ctx = lockers.context();
        Self {
            kiosk_id: ctx.kiosk_id.clone(),
            zone: ctx.zone.clone(),
            version: settings.version.clone(),
            zones: Arc::clone(&ctx.zones),
            client: settings.fleet_client_config(),
        }
    }

    fn heartbeat(&self) -> HeartbeatRequest {
        let config = self.zones.current();
        let status = if config.total_lockers == 0 {
            NodeStatus::Provisioning
        } else {
            NodeStatus::Online
        };
        HeartbeatRequest {
            kiosk_id: self.kiosk_id.clone(),
            zone: self.zone.clone(),
            version: self.version.clone(),
            status,
            config_hash: config.hash(),
        }
    }

    fn poll(&self) -> PollRequest {
        PollRequest {
            kiosk_id: self.kiosk_id.clone(),
            zone: self.zone.clone(),
        }
    }
}

/// Bounded memory of executed command ids.
#[derive(Debug)]
struct ExecutedIds {
    order: VecDeque<CommandId>,
    seen: HashSet<CommandId>,
    capacity: usize,
}

impl ExecutedIds {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns `false` if `id` was already recorded.
    fn insert(&mut self, id: CommandId) -> bool {
        if !self.seen.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            self.seen.remove(&oldest);
        }
        true
    }
}

async fn run_executor(
    handlers: CommandHandlers,
    mut commands: mpsc::Receiver<WireCommand>,
    completions: mpsc::UnboundedSender<CommandCompletion>,
    cancel: CancellationToken,
) {
    let mut executed = ExecutedIds::new(EXECUTED_HISTORY);

    loop {
        let command = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = commands.recv() => match next {
                Some(command) => command,
                None => break,
            },
        };

        if !executed.insert(command.id) {
            debug!(command_id = %command.id, "Ignoring already executed command");
            continue;
        }

        let outcome = handlers.execute(&command).await;
        debug!(command_id = %command.id, success = outcome.success, "Command finished");
        if completions
            .send(CommandCompletion::new(command.id, outcome))
            .is_err()
        {
            break;
        }
    }
    debug!("Command executor stopped");
}

async fn connected(client: &mut FleetClient) -> std::result::Result<(), FleetClientError> {
    if client.is_connected() {
        return Ok(());
    }
    client.connect().await
}

/// Sleep for `delay` unless cancelled first. Returns `false` on cancellation.
async fn pause(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

/// Hand delivered commands to the executor. Returns `false` once it is gone.
async fn forward(commands: &mpsc::Sender<WireCommand>, delivered: Vec<WireCommand>) -> bool {
    for command in delivered {
        debug!(command_id = %command.id, command_type = %command.kind, "Command delivered");
        if commands.send(command).await.is_err() {
            return false;
        }
    }
    true
}

async fn heartbeat_loop(
    identity: FleetIdentity,
    period: Duration,
    commands: mpsc::Sender<WireCommand>,
    cancel: CancellationToken,
) {
    let mut client = FleetClient::new(identity.client.clone());
    let mut backoff = ReconnectBackoff::default();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = match connected(&mut client).await {
            Ok(()) => client.heartbeat(identity.heartbeat()).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(delivered) => {
                backoff.reset();
                if !forward(&commands, delivered).await {
                    break;
                }
            }
            Err(e) => {
                let delay = backoff.next_delay();
                warn!(
                    kiosk_id = %identity.kiosk_id,
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "Heartbeat failed"
                );
                if !pause(delay, &cancel).await {
                    break;
                }
            }
        }
    }
    client.close();
}

async fn poll_loop(
    identity: FleetIdentity,
    period: Duration,
    commands: mpsc::Sender<WireCommand>,
    mut completions: mpsc::UnboundedReceiver<CommandCompletion>,
    cancel: CancellationToken,
) {
    let mut client = FleetClient::new(identity.client.clone());
    let mut backoff = ReconnectBackoff::default();
    let mut outbox: VecDeque<CommandCompletion> = VecDeque::new();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let result = tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => poll_once(&mut client, &identity, &commands, &mut outbox).await,
            Some(completion) = completions.recv() => {
                outbox.push_back(completion);
                flush(&mut client, &mut outbox).await
            }
        };

        match result {
            Ok(true) => backoff.reset(),
            Ok(false) => break,
            Err(e) => {
                let delay = backoff.next_delay();
                warn!(
                    kiosk_id = %identity.kiosk_id,
                    error = %e,
                    pending_completions = outbox.len(),
                    retry_in_ms = delay.as_millis() as u64,
                    "Poll failed"
                );
                if !pause(delay, &cancel).await {
                    break;
                }
            }
        }
    }

    // The executor drops its sender after the command it is running.
    drop(commands);
    while let Some(completion) = completions.recv().await {
        outbox.push_back(completion);
    }
    if !outbox.is_empty()
        && let Err(e) = flush(&mut client, &mut outbox).await
    {
        warn!(
            kiosk_id = %identity.kiosk_id,
            error = %e,
            lost = outbox.len(),
            "Completions not delivered before shutdown"
        );
    }
    client.close();
}

/// Poll for commands, then flush pending completions on the same connection.
///
/// `Ok(false)` means the executor is gone.
async fn poll_once(
    client: &mut FleetClient,
    identity: &FleetIdentity,
    commands: &mpsc::Sender<WireCommand>,
    outbox: &mut VecDeque<CommandCompletion>,
) -> std::result::Result<bool, FleetClientError> {
    connected(client).await?;
    let delivered = client.poll(identity.poll()).await?;
    if !forward(commands, delivered).await {
        return Ok(false);
    }
    flush(client, outbox).await
}

/// Deliver queued completions in order until the outbox is empty.
///
/// A completion the coordinator rejects is dropped; any other failure keeps
/// it queued for the next attempt. Completions are only accepted on a
/// connection that has identified itself, so a fresh connection polls first.
async fn flush(
    client: &mut FleetClient,
    outbox: &mut VecDeque<CommandCompletion>,
) -> std::result::Result<bool, FleetClientError> {
    if outbox.is_empty() {
        return Ok(true);
    }
    if !client.is_connected() {
        return Err(FleetClientError::NotConnected);
    }

    while let Some(completion) = outbox.front().cloned() {
        let command_id = completion.command_id;
        match client.complete(completion).await {
            Ok(()) => {
                debug!(command_id = %command_id, "Completion acknowledged");
                outbox.pop_front();
            }
            Err(FleetClientError::Rejected { message, trace_id }) => {
                warn!(
                    command_id = %command_id,
                    trace_id = %trace_id,
                    reason = %message,
                    "Coordinator rejected completion"
                );
                outbox.pop_front();
            }
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

async fn reservation_sweeper(
    lockers: Arc<LockerStateManager>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if let Err(e) = lockers.expire_reservations().await {
            warn!(error = %e, "Reservation sweep failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executed_ids_forget_oldest() {
        let mut executed = ExecutedIds::new(2);
        let ids: Vec<CommandId> = (0..3).map(|_| CommandId::generate()).collect();

        assert!(executed.insert(ids[0]));
        assert!(!executed.insert(ids[0]));
        assert!(executed.insert(ids[1]));
        assert!(executed.insert(ids[2]));
        assert!(executed.insert(ids[0]));
    }

    #[test]
    fn test_mock_slaves_cover_zones() {
        let text = r#"
            [zones]
            zones_enabled = true
            total_lockers = 40

            [[zones.zones]]
            id = "A"
            enabled = true
            ranges = [{ start = 1, end = 40 }]
            relay_cards = [1, 2, 9]
        "#;
        let config = Config::from_toml_str(text).unwrap();
        assert_eq!(mock_slaves(&config), vec![1, 2, 3, 9]);

        assert_eq!(mock_slaves(&Config::default()), vec![1]);
    }
}
