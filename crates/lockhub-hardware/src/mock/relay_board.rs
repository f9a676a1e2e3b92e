//! Mock chain of relay cards.
//!
//! [`MockRelayBoard`] is the transport side and is moved into the bus
//! worker; [`MockRelayHandle`] stays with the test and shares the same
//! board state. Each simulated card has 32 channels and answers:
//!
//! - read holding registers on relay channels (1 = energized) and on the
//!   slave address register `0x4000`
//! - write single register on relay channels (non-zero energizes) and on
//!   `0x4000` (re-addresses the card)
//! - write single coil with `0xFF00` / `0x0000`
//!
//! A request for a slave that is not on the bus gets no answer, like real
//! hardware.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use lockhub_core::constants::{MAX_SLAVE_ID, MIN_SLAVE_ID, SLAVE_ADDRESS_REGISTER};
use lockhub_protocol::function::{COIL_OFF, COIL_ON};
use lockhub_protocol::{ExceptionCode, FunctionCode, RequestFrame, ResponseFrame};

use crate::error::{HardwareError, Result};
use crate::traits::RelayTransport;

/// Channels on each simulated card.
pub const MOCK_CHANNELS: u16 = 32;

/// Fault applied to the next request the board receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFault {
    /// Stay silent until the caller's timeout elapses.
    Timeout,
    /// Answer with a flipped checksum byte.
    CorruptCrc,
    /// Answer with an exception response.
    Exception(ExceptionCode),
}

#[derive(Debug, Default)]
struct BoardState {
    /// Energized flag per channel, keyed by slave id.
    cards: BTreeMap<u8, Vec<bool>>,
    faults: VecDeque<MockFault>,
    frames: Vec<RequestFrame>,
    /// Energize count per (slave, zero-based channel).
    pulses: HashMap<(u8, u16), u32>,
}

enum Reply {
    Frame(ResponseFrame),
    Silent,
}

impl BoardState {
    fn handle(&mut self, request: &RequestFrame) -> Reply {
        if request.is_broadcast() {
            self.handle_broadcast(request);
            return Reply::Silent;
        }
        if !self.cards.contains_key(&request.slave_id) {
            return Reply::Silent;
        }

        let result = match request.function {
            FunctionCode::ReadHoldingRegisters => self.read(request),
            FunctionCode::WriteSingleRegister => self.write_register(request),
            FunctionCode::WriteSingleCoil => self.write_coil(request),
        };
        Reply::Frame(result.unwrap_or_else(|code| ResponseFrame::Exception {
            slave_id: request.slave_id,
            function: request.function.to_u8(),
            code,
        }))
    }

    /// Broadcast writes to the address register re-address a lone card.
    fn handle_broadcast(&mut self, request: &RequestFrame) {
        if request.function == FunctionCode::WriteSingleRegister
            && request.address == SLAVE_ADDRESS_REGISTER
            && self.cards.len() == 1
            && valid_slave(request.value)
            && let Some((&current, _)) = self.cards.iter().next()
        {
            self.readdress(current, request.value as u8);
        }
    }

    fn read(&self, request: &RequestFrame) -> std::result::Result<ResponseFrame, ExceptionCode> {
        if request.address == SLAVE_ADDRESS_REGISTER {
            if request.value != 1 {
                return Err(ExceptionCode::IllegalDataValue);
            }
            return Ok(ResponseFrame::Registers {
                slave_id: request.slave_id,
                values: vec![u16::from(request.slave_id)],
            });
        }

        let start = usize::from(request.address);
        let end = start + usize::from(request.value);
        let channels = self
            .cards
            .get(&request.slave_id)
            .ok_or(ExceptionCode::SlaveDeviceFailure)?;
        if request.value == 0 || end > channels.len() {
            return Err(ExceptionCode::IllegalDataAddress);
        }
        Ok(ResponseFrame::Registers {
            slave_id: request.slave_id,
            values: channels[start..end].iter().map(|on| u16::from(*on)).collect(),
        })
    }

    fn write_register(
        &mut self,
        request: &RequestFrame,
    ) -> std::result::Result<ResponseFrame, ExceptionCode> {
        if request.address == SLAVE_ADDRESS_REGISTER {
            if !valid_slave(request.value) {
                return Err(ExceptionCode::IllegalDataValue);
            }
            // The echo still comes from the old address.
            let echo = ResponseFrame::echo(request);
            self.readdress(request.slave_id, request.value as u8);
            return Ok(echo);
        }
        self.set_channel(request.slave_id, request.address, request.value != 0)?;
        Ok(ResponseFrame::echo(request))
    }

    fn write_coil(
        &mut self,
        request: &RequestFrame,
    ) -> std::result::Result<ResponseFrame, ExceptionCode> {
        let on = match request.value {
            COIL_ON => true,
            COIL_OFF => false,
            _ => return Err(ExceptionCode::IllegalDataValue),
        };
        self.set_channel(request.slave_id, request.address, on)?;
        Ok(ResponseFrame::echo(request))
    }

    fn set_channel(
        &mut self,
        slave_id: u8,
        channel: u16,
        on: bool,
    ) -> std::result::Result<(), ExceptionCode> {
        let relay = self
            .cards
            .get_mut(&slave_id)
            .and_then(|channels| channels.get_mut(usize::from(channel)))
            .ok_or(ExceptionCode::IllegalDataAddress)?;
        if on && !*relay {
            *self.pulses.entry((slave_id, channel)).or_default() += 1;
        }
        *relay = on;
        Ok(())
    }

    fn readdress(&mut self, from: u8, to: u8) {
        if let Some(channels) = self.cards.remove(&from) {
            self.cards.insert(to, channels);
        }
    }
}

fn valid_slave(value: u16) -> bool {
    (u16::from(MIN_SLAVE_ID)..=u16::from(MAX_SLAVE_ID)).contains(&value)
}

fn lock(state: &Mutex<BoardState>) -> MutexGuard<'_, BoardState> {
    // A panicking test thread must not take the other side down with it.
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Transport half of the mock relay chain.
///
/// # Examples
///
/// ```
/// use lockhub_hardware::mock::MockRelayBoard;
/// use lockhub_hardware::traits::RelayTransport;
/// use lockhub_protocol::{RequestFrame, ResponseFrame};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> lockhub_hardware::Result<()> {
///     let (mut board, handle) = MockRelayBoard::new(&[1]);
///
///     let request = RequestFrame::write_coil(1, 0, true);
///     let response = board.transact(request, Duration::from_millis(100)).await?;
///     assert_eq!(response, Some(ResponseFrame::echo(&request)));
///     assert!(handle.is_energized(1, 0));
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct MockRelayBoard {
    state: Arc<Mutex<BoardState>>,
}

impl MockRelayBoard {
    /// Create a board with one card per slave id in `slaves`.
    pub fn new(slaves: &[u8]) -> (Self, MockRelayHandle) {
        let mut state = BoardState::default();
        for &slave in slaves {
            state.cards.insert(slave, vec![false; usize::from(MOCK_CHANNELS)]);
        }
        let state = Arc::new(Mutex::new(state));
        (
            Self {
                state: Arc::clone(&state),
            },
            MockRelayHandle { state },
        )
    }
}

impl RelayTransport for MockRelayBoard {
    async fn transact(
        &mut self,
        request: RequestFrame,
        timeout: Duration,
    ) -> Result<Option<ResponseFrame>> {
        let (fault, reply) = {
            let mut state = lock(&self.state);
            state.frames.push(request);
            let fault = state.faults.pop_front();
            let reply = match fault {
                Some(MockFault::Timeout) => Reply::Silent,
                // A rejected request leaves the card untouched.
                Some(MockFault::Exception(code))
                    if state.cards.contains_key(&request.slave_id) =>
                {
                    Reply::Frame(ResponseFrame::Exception {
                        slave_id: request.slave_id,
                        function: request.function.to_u8(),
                        code,
                    })
                }
                _ => state.handle(&request),
            };
            (fault, reply)
        };

        let response = match reply {
            Reply::Frame(frame) => frame,
            Reply::Silent if request.is_broadcast() => return Ok(None),
            Reply::Silent => {
                tokio::time::sleep(timeout).await;
                return Err(HardwareError::timeout(
                    request.slave_id,
                    timeout.as_millis() as u64,
                ));
            }
        };

        let mut bytes = response.encode();
        if fault == Some(MockFault::CorruptCrc)
            && let Some(last) = bytes.last_mut()
        {
            *last ^= 0xFF;
        }
        ResponseFrame::decode(&bytes)
            .map(Some)
            .map_err(|e| HardwareError::from_protocol(request.slave_id, e))
    }

    fn describe(&self) -> String {
        "mock relay board".to_string()
    }
}

/// Test-side handle of a [`MockRelayBoard`].
#[derive(Debug, Clone)]
pub struct MockRelayHandle {
    state: Arc<Mutex<BoardState>>,
}

impl MockRelayHandle {
    /// Queue a fault for the next request on the bus.
    pub fn inject_fault(&self, fault: MockFault) {
        lock(&self.state).faults.push_back(fault);
    }

    /// Every request the board has received, in order.
    pub fn frames(&self) -> Vec<RequestFrame> {
        lock(&self.state).frames.clone()
    }

    /// How many times the relay at `(slave_id, channel)` was energized.
    ///
    /// `channel` is the zero-based wire address.
    pub fn pulses(&self, slave_id: u8, channel: u16) -> u32 {
        lock(&self.state)
            .pulses
            .get(&(slave_id, channel))
            .copied()
            .unwrap_or(0)
    }

    pub fn is_energized(&self, slave_id: u8, channel: u16) -> bool {
        lock(&self.state)
            .cards
            .get(&slave_id)
            .and_then(|channels| channels.get(usize::from(channel)).copied())
            .unwrap_or(false)
    }

    /// Force a relay state, e.g. to simulate a welded contact.
    pub fn set_energized(&self, slave_id: u8, channel: u16, on: bool) {
        if let Some(relay) = lock(&self.state)
            .cards
            .get_mut(&slave_id)
            .and_then(|channels| channels.get_mut(usize::from(channel)))
        {
            *relay = on;
        }
    }

    pub fn add_slave(&self, slave_id: u8) {
        lock(&self.state)
            .cards
            .entry(slave_id)
            .or_insert_with(|| vec![false; usize::from(MOCK_CHANNELS)]);
    }

    /// Slave ids currently on the bus.
    pub fn slaves(&self) -> Vec<u8> {
        lock(&self.state).cards.keys().copied().collect()
    }
}
