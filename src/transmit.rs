//! Periodic register broadcast to the device

use crate::link::{EthernetFrame, LinkSocket, MacAddr, encode_register_payload};
use crate::registers::RegisterBank;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_SEND_INTERVAL: Duration = Duration::from_millis(50);

/// Sends a snapshot of every register at a fixed cadence
///
/// Each frame carries the full bank, so a lost frame is repaired by the next
/// one. Nothing is acknowledged or retried.
pub struct RegisterTransmitter {
    bank: Arc<RegisterBank>,
    socket: Arc<dyn LinkSocket>,
    source: MacAddr,
    destination: MacAddr,
    ethertype: u16,
    interval: Duration,
}

impl RegisterTransmitter {
    pub fn new(
        bank: Arc<RegisterBank>,
        socket: Arc<dyn LinkSocket>,
        source: MacAddr,
        destination: MacAddr,
        ethertype: u16,
    ) -> Self {
        Self {
            bank,
            socket,
            source,
            destination,
            ethertype,
            interval: DEFAULT_SEND_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Frame for the current register snapshot
    pub fn build_frame(&self) -> Vec<u8> {
        let payload = encode_register_payload(&self.bank.dump());
        EthernetFrame {
            destination: self.destination,
            source: self.source,
            ethertype: self.ethertype,
            payload: &payload,
        }
        .encode()
    }

    /// Build and send one frame
    pub fn transmit_once(&self) -> Result<(), crate::link::LinkError> {
        self.socket.send_frame(&self.build_frame())
    }

    /// Send every interval until cancelled; returns the number of frames sent
    pub async fn run(self, token: CancellationToken) -> u64 {
        log::info!(
            "Register transmitter started: {} -> {} every {:?}",
            self.source,
            self.destination,
            self.interval
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut sent = 0u64;
        let mut failing = false;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    match self.transmit_once() {
                        Ok(()) => {
                            if failing {
                                log::info!("Register transmission recovered");
                                failing = false;
                            }
                            sent += 1;
                        }
                        Err(e) if failing => log::debug!("Register send failed: {}", e),
                        Err(e) => {
                            log::warn!("Register send failed: {}", e);
                            failing = true;
                        }
                    }
                }
            }
        }

        log::info!("Register transmitter stopped after {} frames", sent);
        sent
    }
}
