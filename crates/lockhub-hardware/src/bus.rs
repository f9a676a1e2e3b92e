//! Single-consumer work queue in front of the physical bus.
//!
//! Only one frame may be on the RS-485 wire at a time, so every caller
//! submits work to a bounded queue and one worker task, the sole owner of
//! the transport, executes it in order.
//!
//! ```text
//! ┌──────────────┐
//! │ RelayDriver  │──┐
//! └──────────────┘  │     ┌──────────────┐     ┌───────────┐
//! ┌──────────────┐  ├────►│ mpsc (Job)   │────►│ BusWorker │────► transport
//! │ RelayDriver  │──┘     └──────────────┘     └───────────┘
//! └──────────────┘
//! ```
//!
//! The worker paces consecutive frames by `burst_interval` to bound the
//! inrush current of several relays switching at once, retries transient
//! faults with backoff, and runs a whole open pulse (energize, hold,
//! release, optional read-back) as one job. Shutdown stops taking new jobs
//! but lets the current one finish, so no relay is left energized.

use std::time::Duration;

use lockhub_core::constants::{
    DEFAULT_BURST_INTERVAL_MS, DEFAULT_BUS_QUEUE_DEPTH, DEFAULT_BUS_TIMEOUT_MS,
};
use lockhub_protocol::{RequestFrame, ResponseFrame};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::devices::{AnyRelayTransport, check_response};
use crate::error::{HardwareError, Result};
use crate::retry::RetryPolicy;
use crate::traits::RelayTransport;

/// Bus worker settings.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Per-frame response timeout.
    pub timeout: Duration,
    /// Minimum gap between the end of one frame and the start of the next.
    pub burst_interval: Duration,
    pub retry: RetryPolicy,
    pub queue_depth: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_BUS_TIMEOUT_MS),
            burst_interval: Duration::from_millis(DEFAULT_BURST_INTERVAL_MS),
            retry: RetryPolicy::default(),
            queue_depth: DEFAULT_BUS_QUEUE_DEPTH,
        }
    }
}

/// One relay pulse, executed atomically by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseSequence {
    pub energize: RequestFrame,
    pub hold: Duration,
    pub release: RequestFrame,
    /// Read issued after the release to confirm the relay dropped.
    pub readback: Option<RequestFrame>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PulseReport {
    /// First register returned by the read-back, if one was requested.
    pub readback: Option<u16>,
}

enum Job {
    Frame {
        request: RequestFrame,
        /// Overrides the worker's policy for this frame only.
        retry: Option<RetryPolicy>,
        reply: oneshot::Sender<Result<Option<ResponseFrame>>>,
    },
    Pulse {
        sequence: PulseSequence,
        reply: oneshot::Sender<Result<PulseReport>>,
    },
}

impl Job {
    fn reject(self) {
        match self {
            Job::Frame { reply, .. } => {
                let _ = reply.send(Err(HardwareError::BusClosed));
            }
            Job::Pulse { reply, .. } => {
                let _ = reply.send(Err(HardwareError::BusClosed));
            }
        }
    }
}

/// Cloneable submission side of the bus queue.
#[derive(Debug, Clone)]
pub struct RelayBus {
    tx: mpsc::Sender<Job>,
}

impl RelayBus {
    /// Start the worker task that owns `transport`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(transport: AnyRelayTransport, config: BusConfig) -> (RelayBus, BusHandle) {
        let (tx, rx) = mpsc::channel(config.queue_depth.max(1));
        let cancel = CancellationToken::new();

        let worker = BusWorker {
            transport,
            config,
            last_frame: None,
        };
        let task = tokio::spawn(worker.run(rx, cancel.clone()));

        (RelayBus { tx }, BusHandle { cancel, task })
    }

    /// Send one frame and return its verified response.
    ///
    /// Broadcast frames resolve to `Ok(None)`.
    ///
    /// # Errors
    /// `HardwareError::BusClosed` after shutdown, otherwise the error of the
    /// last attempt (wrapped in `RetriesExhausted` if it was transient).
    pub async fn transact(&self, request: RequestFrame) -> Result<Option<ResponseFrame>> {
        self.frame(request, None).await
    }

    /// Send one frame without retrying, for probing slaves that may not exist.
    ///
    /// # Errors
    /// Same as [`RelayBus::transact`], but a transient fault is returned as is.
    pub async fn probe(&self, request: RequestFrame) -> Result<Option<ResponseFrame>> {
        self.frame(request, Some(RetryPolicy::none())).await
    }

    async fn frame(
        &self,
        request: RequestFrame,
        retry: Option<RetryPolicy>,
    ) -> Result<Option<ResponseFrame>> {
        let (reply, rx) = oneshot::channel();
        self.submit(Job::Frame {
            request,
            retry,
            reply,
        })
        .await?;
        rx.await.map_err(|_| HardwareError::BusClosed)?
    }

    /// Run a complete pulse sequence as one queue job.
    ///
    /// # Errors
    /// Same as [`RelayBus::transact`]. The release frame is sent even when
    /// the energize frame failed.
    pub async fn pulse(&self, sequence: PulseSequence) -> Result<PulseReport> {
        let (reply, rx) = oneshot::channel();
        self.submit(Job::Pulse { sequence, reply }).await?;
        rx.await.map_err(|_| HardwareError::BusClosed)?
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn submit(&self, job: Job) -> Result<()> {
        self.tx.send(job).await.map_err(|_| HardwareError::BusClosed)
    }
}

/// Owner side of a running bus worker.
#[derive(Debug)]
pub struct BusHandle {
    cancel: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl BusHandle {
    /// Stop the worker after its in-flight job.
    ///
    /// Jobs still queued are answered with `HardwareError::BusClosed`.
    pub async fn shutdown(self) -> Result<()> {
        self.cancel.cancel();

        match classify_task_result(self.task.await) {
            TaskTermination::Success | TaskTermination::Cancelled => {}
            TaskTermination::Error => warn!("Relay bus worker stopped with an error"),
            TaskTermination::Panic => error!("Relay bus worker panicked"),
        }
        Ok(())
    }
}

fn classify_task_result(
    result: std::result::Result<Result<()>, tokio::task::JoinError>,
) -> TaskTermination {
    match result {
        Ok(Ok(())) => TaskTermination::Success,
        Ok(Err(_)) => TaskTermination::Error,
        Err(e) if e.is_cancelled() => TaskTermination::Cancelled,
        Err(_) => TaskTermination::Panic,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskTermination {
    Success,
    Error,
    Cancelled,
    Panic,
}

struct BusWorker {
    transport: AnyRelayTransport,
    config: BusConfig,
    last_frame: Option<Instant>,
}

impl BusWorker {
    async fn run(mut self, mut rx: mpsc::Receiver<Job>, cancel: CancellationToken) -> Result<()> {
        info!(transport = %self.transport.describe(), "Relay bus worker started");

        loop {
            let job = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                job = rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            // Not raced against the token: a started pulse always completes.
            match job {
                Job::Frame {
                    request,
                    retry,
                    reply,
                } => {
                    let policy = retry.unwrap_or(self.config.retry);
                    let _ = reply.send(self.send(request, policy).await);
                }
                Job::Pulse { sequence, reply } => {
                    let _ = reply.send(self.pulse(sequence).await);
                }
            }
        }

        rx.close();
        let mut rejected = 0usize;
        while let Ok(job) = rx.try_recv() {
            job.reject();
            rejected += 1;
        }
        info!(rejected, "Relay bus worker stopped");
        Ok(())
    }

    fn pace(&self) -> impl Future<Output = ()> + Send + 'static {
        let deadline = self
            .last_frame
            .map(|last| last + self.config.burst_interval);
        async move {
            if let Some(deadline) = deadline {
                tokio::time::sleep_until(deadline).await;
            }
        }
    }

    async fn send(
        &mut self,
        request: RequestFrame,
        policy: RetryPolicy,
    ) -> Result<Option<ResponseFrame>> {
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.pace().await;
            let result = self
                .transport
                .transact(request, self.config.timeout)
                .await
                .and_then(|response| check_response(&request, response));
            self.last_frame = Some(Instant::now());

            let error = match result {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };
            if !error.is_transient() || policy.max_retries == 0 {
                return Err(error);
            }
            if attempt >= policy.max_attempts() {
                return Err(HardwareError::RetriesExhausted {
                    slave_id: request.slave_id,
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            let delay = policy.delay_for(attempt);
            warn!(
                slave_id = request.slave_id,
                function = %request.function,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying bus frame"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn pulse(&mut self, sequence: PulseSequence) -> Result<PulseReport> {
        let policy = self.config.retry;
        let slave_id = sequence.energize.slave_id;
        debug!(slave_id, address = sequence.energize.address, "Pulsing relay");

        let energized = self.send(sequence.energize, policy).await;
        if energized.is_ok() {
            tokio::time::sleep(sequence.hold).await;
        }
        // A timed-out energize may still have switched the relay.
        let released = self.send(sequence.release, policy).await;
        energized?;
        released?;

        let readback = match sequence.readback {
            Some(request) => match self.send(request, policy).await? {
                Some(ResponseFrame::Registers { values, .. }) => values.first().copied(),
                _ => None,
            },
            None => None,
        };
        Ok(PulseReport { readback })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockFault, MockRelayBoard};
    use lockhub_protocol::ExceptionCode;

    fn spawn_mock(slaves: &[u8]) -> (RelayBus, BusHandle, crate::mock::MockRelayHandle) {
        let (board, handle) = MockRelayBoard::new(slaves);
        let (bus, bus_handle) = RelayBus::spawn(AnyRelayTransport::Mock(board), BusConfig::default());
        (bus, bus_handle, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_fault_is_retried() {
        let (bus, worker, board) = spawn_mock(&[1]);
        board.inject_fault(MockFault::Exception(ExceptionCode::SlaveDeviceBusy));

        let request = RequestFrame::write_coil(1, 0, true);
        let response = bus.transact(request).await.unwrap();
        assert_eq!(response, Some(ResponseFrame::echo(&request)));
        assert_eq!(board.frames().len(), 2);
        worker.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_fault_is_not_retried() {
        let (bus, worker, board) = spawn_mock(&[1]);
        board.inject_fault(MockFault::Exception(ExceptionCode::IllegalDataAddress));

        let err = bus
            .transact(RequestFrame::write_coil(1, 0, true))
            .await
            .unwrap_err();
        assert!(matches!(err, HardwareError::Exception { .. }));
        assert_eq!(board.frames().len(), 1);
        worker.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let (bus, worker, board) = spawn_mock(&[1]);
        for _ in 0..4 {
            board.inject_fault(MockFault::CorruptCrc);
        }

        let err = bus
            .transact(RequestFrame::read_registers(1, 0, 1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HardwareError::RetriesExhausted { attempts: 4, .. }
        ));
        assert_eq!(board.frames().len(), 4);
        worker.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_bus_rejects_work() {
        let (bus, worker, _board) = spawn_mock(&[1]);
        worker.shutdown().await.unwrap();

        let err = bus
            .transact(RequestFrame::write_coil(1, 0, true))
            .await
            .unwrap_err();
        assert!(matches!(err, HardwareError::BusClosed));
        assert!(bus.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_does_not_retry() {
        let (bus, worker, board) = spawn_mock(&[1]);
        let err = bus
            .probe(RequestFrame::read_registers(5, 0x4000, 1))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(board.frames().len(), 1);
        worker.shutdown().await.unwrap();
    }
}
