//! Relay operations built on the bus queue.
//!
//! [`RelayDriver`] turns a [`HardwareAddress`] into the frames that open a
//! locker, and carries the card maintenance operations used when
//! commissioning a bus: reading and changing a card's slave address and
//! scanning the bus for responding cards.

use std::ops::RangeInclusive;
use std::time::Duration;

use lockhub_core::HardwareAddress;
use lockhub_core::constants::{
    BROADCAST_SLAVE_ID, DEFAULT_PULSE_MS, MAX_SLAVE_ID, MIN_SLAVE_ID, SLAVE_ADDRESS_REGISTER,
};
use lockhub_protocol::{ProtocolError, RequestFrame, ResponseFrame};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bus::{PulseReport, PulseSequence, RelayBus};
use crate::error::{HardwareError, Result};

/// Register or coil writes, depending on the relay card firmware.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Function 0x06, `1` energizes and `0` releases.
    #[default]
    Register,
    /// Function 0x05, `0xFF00` energizes and `0x0000` releases.
    Coil,
}

#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// How long the relay stays energized during an open.
    pub pulse: Duration,
    pub write_mode: WriteMode,
    /// Read the channel back after the release and require it to be `0`.
    pub verify_readback: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            pulse: Duration::from_millis(DEFAULT_PULSE_MS),
            write_mode: WriteMode::default(),
            verify_readback: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayDriver {
    bus: RelayBus,
    config: DriverConfig,
}

impl RelayDriver {
    pub fn new(bus: RelayBus, config: DriverConfig) -> Self {
        Self { bus, config }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    fn write_frame(&self, address: HardwareAddress, on: bool) -> RequestFrame {
        match self.config.write_mode {
            WriteMode::Register => {
                RequestFrame::write_register(address.slave_id, address.wire_address(), u16::from(on))
            }
            WriteMode::Coil => RequestFrame::write_coil(address.slave_id, address.wire_address(), on),
        }
    }

    /// Pulse the relay at `address` to open a locker door.
    ///
    /// # Errors
    /// Any bus error from the pulse, or `HardwareError::ReadbackMismatch`
    /// when read-back is enabled and the relay still reads energized.
    pub async fn open(&self, address: HardwareAddress) -> Result<PulseReport> {
        let sequence = PulseSequence {
            energize: self.write_frame(address, true),
            hold: self.config.pulse,
            release: self.write_frame(address, false),
            readback: self.config.verify_readback.then(|| {
                RequestFrame::read_registers(address.slave_id, address.wire_address(), 1)
            }),
        };

        let report = self.bus.pulse(sequence).await?;
        if let Some(value) = report.readback
            && value != 0
        {
            return Err(HardwareError::ReadbackMismatch {
                slave_id: address.slave_id,
                coil: address.coil,
                value,
            });
        }
        debug!(%address, "Relay pulse complete");
        Ok(report)
    }

    /// Switch a relay on or off without a timed release.
    pub async fn set_relay(&self, address: HardwareAddress, on: bool) -> Result<()> {
        self.bus.transact(self.write_frame(address, on)).await?;
        Ok(())
    }

    pub async fn read_relay(&self, address: HardwareAddress) -> Result<bool> {
        let request = RequestFrame::read_registers(address.slave_id, address.wire_address(), 1);
        let value = first_register(request, self.bus.transact(request).await?)?;
        Ok(value != 0)
    }

    /// Read the address a card stores in its slave address register.
    ///
    /// # Errors
    /// Bus errors, or `UnexpectedResponse` if the register holds a value
    /// outside `1..=247`.
    pub async fn read_slave_address(&self, slave_id: u8) -> Result<u8> {
        let request = RequestFrame::read_registers(slave_id, SLAVE_ADDRESS_REGISTER, 1);
        let value = first_register(request, self.bus.transact(request).await?)?;
        u8::try_from(value)
            .ok()
            .filter(|id| (MIN_SLAVE_ID..=MAX_SLAVE_ID).contains(id))
            .ok_or_else(|| HardwareError::UnexpectedResponse {
                slave_id,
                source: ProtocolError::InvalidMessage(format!(
                    "slave address register holds {value}"
                )),
            })
    }

    /// Change a card's slave address.
    ///
    /// With `current` set to the broadcast id `0`, every card on the bus
    /// takes the new address and none answers, so only one card may be
    /// connected. Either way the change is confirmed by reading the address
    /// register at the new id.
    ///
    /// # Errors
    /// `Configuration` for an address outside `1..=247`, bus errors, or
    /// `UnexpectedResponse` if the card reports another address afterwards.
    pub async fn set_slave_address(&self, current: u8, new: u8) -> Result<()> {
        if !(MIN_SLAVE_ID..=MAX_SLAVE_ID).contains(&new) {
            return Err(HardwareError::configuration(format!(
                "slave address {new} outside {MIN_SLAVE_ID}..={MAX_SLAVE_ID}"
            )));
        }
        if current != BROADCAST_SLAVE_ID && !(MIN_SLAVE_ID..=MAX_SLAVE_ID).contains(&current) {
            return Err(HardwareError::configuration(format!(
                "current slave address {current} is not a valid id"
            )));
        }

        self.bus
            .transact(RequestFrame::write_register(
                current,
                SLAVE_ADDRESS_REGISTER,
                u16::from(new),
            ))
            .await?;

        let reported = self.read_slave_address(new).await?;
        if reported != new {
            return Err(HardwareError::UnexpectedResponse {
                slave_id: new,
                source: ProtocolError::EchoMismatch(format!(
                    "set address {new}, card reports {reported}"
                )),
            });
        }
        info!(from = current, to = new, "Changed relay card slave address");
        Ok(())
    }

    /// Probe every id in `range` and return those that answered.
    ///
    /// A card that answers with an exception is present. Probes are sent
    /// once, without retries, `probe_delay` apart.
    ///
    /// # Errors
    /// Only `HardwareError::BusClosed`; per-id failures are skipped.
    pub async fn scan(&self, range: RangeInclusive<u8>, probe_delay: Duration) -> Result<Vec<u8>> {
        let start = (*range.start()).max(MIN_SLAVE_ID);
        let end = (*range.end()).min(MAX_SLAVE_ID);
        let mut found = Vec::new();

        for slave_id in start..=end {
            let request = RequestFrame::read_registers(slave_id, SLAVE_ADDRESS_REGISTER, 1);
            match self.bus.probe(request).await {
                Ok(_) | Err(HardwareError::Exception { .. }) => {
                    debug!(slave_id, "Relay card responded");
                    found.push(slave_id);
                }
                Err(HardwareError::BusClosed) => return Err(HardwareError::BusClosed),
                Err(e) if e.is_timeout() => {}
                Err(e) => warn!(slave_id, error = %e, "Garbled probe response"),
            }
            if slave_id < end {
                tokio::time::sleep(probe_delay).await;
            }
        }

        info!(count = found.len(), "Bus scan complete");
        Ok(found)
    }
}

fn first_register(request: RequestFrame, response: Option<ResponseFrame>) -> Result<u16> {
    match response {
        Some(ResponseFrame::Registers { values, .. }) if !values.is_empty() => Ok(values[0]),
        _ => Err(HardwareError::UnexpectedResponse {
            slave_id: request.slave_id,
            source: ProtocolError::InvalidMessage("expected a register value".to_string()),
        }),
    }
}
