//! Per-channel circular sample storage with cached spectral views
//!
//! The buffer keeps the most recent `capacity` PCM samples of one channel and
//! hands out copies of them to readers. Spectra are computed on demand and cached
//! until the next write: validity is tied to the write cursor, not to the sample
//! content, so any write at all drops every cached spectrum.

use super::SAMPLE_RATE;
use super::window::{WindowCache, WindowKind};
use rustfft::FftPlanner;
use rustfft::num_complex::Complex;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    #[error("Write of {len} samples exceeds buffer capacity of {capacity}")]
    WriteTooLarge { len: usize, capacity: usize },
}

/// Transform length used for `n_fft` samples: the next power of two
pub fn padded_len(n_fft: usize) -> usize {
    n_fft.next_power_of_two()
}

/// Bin center frequencies of a real FFT over `n_fft` samples at `sample_rate`
pub fn frequency_axis(n_fft: usize, sample_rate: u32) -> Vec<f64> {
    let padded = padded_len(n_fft);
    let bin_width = sample_rate as f64 / padded as f64;
    (0..=padded / 2).map(|bin| bin as f64 * bin_width).collect()
}

struct CachedSpectrum {
    cursor: usize,
    spectrum: Vec<Complex<f64>>,
}

struct RingState {
    samples: Box<[i32]>,
    cursor: usize,
    // Bumped on every non-empty write. A full-capacity write leaves the cursor
    // where it was, so the generation is what tells an in-flight FFT it went stale.
    generation: u64,
    fft_cache: HashMap<(usize, WindowKind), CachedSpectrum>,
}

impl RingState {
    fn latest(&self, n: usize) -> Vec<i32> {
        let capacity = self.samples.len();
        let n = n.min(capacity);
        if n == 0 {
            return Vec::new();
        }

        let start = (self.cursor + capacity - n) % capacity;
        if start < self.cursor {
            self.samples[start..self.cursor].to_vec()
        } else {
            let mut out = Vec::with_capacity(n);
            out.extend_from_slice(&self.samples[start..]);
            out.extend_from_slice(&self.samples[..self.cursor]);
            out
        }
    }
}

/// Fixed-capacity circular store of signed 32-bit PCM samples for one channel
///
/// Writers never block on readers for longer than a slice copy, and the buffer
/// never refuses data: once full, the oldest samples are overwritten.
pub struct SampleRingBuffer {
    state: Mutex<RingState>,
    capacity: usize,
    windows: WindowCache,
    planner: Mutex<FftPlanner<f64>>,
}

impl SampleRingBuffer {
    /// Create a zero-filled buffer holding `capacity` samples
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "sample buffer capacity must be non-zero");

        Self {
            state: Mutex::new(RingState {
                samples: vec![0; capacity].into_boxed_slice(),
                cursor: 0,
                generation: 0,
                fft_cache: HashMap::new(),
            }),
            capacity,
            windows: WindowCache::new(),
            planner: Mutex::new(FftPlanner::new()),
        }
    }

    /// Create a buffer sized to hold `seconds` of audio at the fixed sample rate
    pub fn with_duration(seconds: f64) -> Self {
        let capacity = (seconds * SAMPLE_RATE as f64).round().max(1.0) as usize;
        Self::new(capacity)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    /// Index one past the most recently written sample
    pub fn cursor(&self) -> usize {
        self.lock().cursor
    }

    fn lock(&self) -> MutexGuard<'_, RingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append samples, overwriting the oldest data once the buffer is full
    ///
    /// Any non-empty write invalidates every cached spectrum.
    pub fn write(&self, samples: &[i32]) -> Result<(), BufferError> {
        if samples.len() > self.capacity {
            return Err(BufferError::WriteTooLarge {
                len: samples.len(),
                capacity: self.capacity,
            });
        }
        if samples.is_empty() {
            return Ok(());
        }

        let mut state = self.lock();
        let start = state.cursor;
        let end = start + samples.len();

        if end <= self.capacity {
            state.samples[start..end].copy_from_slice(samples);
        } else {
            let (head, tail) = samples.split_at(self.capacity - start);
            state.samples[start..].copy_from_slice(head);
            state.samples[..tail.len()].copy_from_slice(tail);
        }

        state.cursor = end % self.capacity;
        state.generation = state.generation.wrapping_add(1);
        state.fft_cache.clear();
        Ok(())
    }

    /// Copy out the most recent `n` samples, oldest first
    ///
    /// Requests larger than the capacity are clamped to the capacity.
    pub fn read(&self, n: usize) -> Vec<i32> {
        self.lock().latest(n)
    }

    /// Complex spectrum of the most recent `n_fft` samples
    ///
    /// The block is windowed, zero-padded to the next power of two and transformed,
    /// yielding `padded_len / 2 + 1` bins. Results are cached per `(n_fft, window)`
    /// until the next write.
    pub fn get_fft(&self, n_fft: usize, window: WindowKind) -> Vec<Complex<f64>> {
        let key = (n_fft, window);

        // Cache lookup and sample snapshot share one critical section so the
        // spectrum always matches the cursor it is filed under.
        let (samples, cursor, generation) = {
            let state = self.lock();
            if let Some(cached) = state.fft_cache.get(&key)
                && cached.cursor == state.cursor
            {
                return cached.spectrum.clone();
            }
            (state.latest(n_fft), state.cursor, state.generation)
        };

        let spectrum = self.transform(&samples, padded_len(n_fft), window);

        let mut state = self.lock();
        if state.generation == generation {
            state.fft_cache.insert(
                key,
                CachedSpectrum {
                    cursor,
                    spectrum: spectrum.clone(),
                },
            );
        }

        spectrum
    }

    /// Frequency of each bin returned by [`get_fft`](Self::get_fft)
    pub fn get_freq_axis(&self, n_fft: usize) -> Vec<f64> {
        frequency_axis(n_fft, SAMPLE_RATE)
    }

    fn transform(
        &self,
        samples: &[i32],
        padded_len: usize,
        window: WindowKind,
    ) -> Vec<Complex<f64>> {
        let coefficients = self.windows.get(samples.len(), window);

        let mut buffer = vec![Complex::new(0.0, 0.0); padded_len];
        for ((slot, &sample), &weight) in buffer.iter_mut().zip(samples).zip(coefficients.iter()) {
            *slot = Complex::new(sample as f64 * weight, 0.0);
        }

        let fft = self
            .planner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .plan_fft_forward(padded_len);
        fft.process(&mut buffer);

        // Real input: the upper half mirrors the lower half
        buffer.truncate(padded_len / 2 + 1);
        buffer
    }

    #[cfg(test)]
    fn cached_spectra(&self) -> usize {
        self.lock().fft_cache.len()
    }
}
