//! Transport trait for the relay bus.
//!
//! A transport moves one request frame onto the wire and brings back the
//! matching response. It knows nothing about retries, pacing or queueing;
//! those belong to the [`RelayBus`](crate::bus::RelayBus) worker, which is
//! the only owner of a transport.

#![allow(async_fn_in_trait)]

use std::time::Duration;

use crate::error::Result;
use lockhub_protocol::{RequestFrame, ResponseFrame};

pub trait RelayTransport: Send {
    /// Send `request` and wait up to `timeout` for its response.
    ///
    /// Broadcast requests are written and return `Ok(None)` immediately,
    /// since no slave answers them. Exception responses are returned as
    /// frames; interpreting them is up to the caller.
    ///
    /// # Errors
    /// `HardwareError::Timeout` when nothing arrives in time, and transport
    /// specific I/O or framing errors otherwise.
    async fn transact(
        &mut self,
        request: RequestFrame,
        timeout: Duration,
    ) -> Result<Option<ResponseFrame>>;

    /// Human readable description used in logs, such as the device path.
    fn describe(&self) -> String;
}
