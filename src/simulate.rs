//! Synthetic sample source for running without a device
//!
//! Produces a full-scale sine on the left channel and its inverse on the right,
//! paced to the device's packet rate.

use crate::audio::{SAMPLE_RATE, SampleRingBuffer};
use crate::link::StereoBatch;
use std::f64::consts::TAU;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Sample pairs per simulated packet
pub const PACKET_SAMPLES: usize = 250;

/// Peak amplitude of the generated tone
pub const AMPLITUDE: f64 = 4_194_303.0;

pub struct SineSource {
    frequency_hz: f64,
    sample_rate: u32,
    phase: u64,
}

impl SineSource {
    pub fn new(frequency_hz: f64) -> Self {
        Self {
            frequency_hz,
            sample_rate: SAMPLE_RATE,
            phase: 0,
        }
    }

    /// Time covered by one packet at the sample rate
    pub fn packet_interval(&self) -> Duration {
        Duration::from_secs_f64(PACKET_SAMPLES as f64 / self.sample_rate as f64)
    }

    /// Next packet of samples, continuing the waveform from the previous one
    pub fn next_packet(&mut self) -> StereoBatch {
        let mut batch = StereoBatch::with_capacity(PACKET_SAMPLES);
        let step = TAU * self.frequency_hz / self.sample_rate as f64;

        for n in self.phase..self.phase + PACKET_SAMPLES as u64 {
            let left = (AMPLITUDE * (step * n as f64).sin()).round() as i32;
            batch.left.push(left);
            batch.right.push(-left);
        }
        self.phase += PACKET_SAMPLES as u64;

        batch
    }

    /// Feed both buffers one packet per interval until cancelled
    pub async fn run(
        mut self,
        left: Arc<SampleRingBuffer>,
        right: Arc<SampleRingBuffer>,
        token: CancellationToken,
    ) {
        log::info!("Simulating a {} Hz tone", self.frequency_hz);

        let mut ticker = tokio::time::interval(self.packet_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let batch = self.next_packet();
                    if let Err(e) = left.write(&batch.left).and_then(|_| right.write(&batch.right)) {
                        log::warn!("Simulated write rejected: {}", e);
                    }
                }
            }
        }

        log::debug!("Simulator stopped after {} samples", self.phase);
    }
}
