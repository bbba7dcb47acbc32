//! Sample storage and spectral analysis
//!
//! - `buffer`: per-channel circular PCM store with cached FFTs
//! - `window`: window functions and their cache
//! - `spectrum`: power conversion and the rolling average / max-hold aggregator

mod buffer;
mod spectrum;
mod window;

pub use buffer::{BufferError, SampleRingBuffer, frequency_axis, padded_len};
pub use spectrum::{
    FULL_SCALE, HoldMode, POWER_FLOOR, SpectrumAggregator, power_spectrum, to_dbfs,
};
pub use window::{WindowCache, WindowKind};

/// Fixed device sample rate in Hz (not negotiated)
pub const SAMPLE_RATE: u32 = 48_000;
