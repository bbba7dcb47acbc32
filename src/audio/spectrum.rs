//! Rolling spectral aggregation for display
//!
//! Keeps the last `depth` power spectra and reduces them to a single row,
//! either as a running average (smooths noise) or a max-hold (catches
//! transients).

use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};

/// Full-scale amplitude of a 24-bit sample
pub const FULL_SCALE: f64 = 8_388_608.0;

/// Added to every power bin so dB conversion never sees zero
pub const POWER_FLOOR: f64 = 1e-30;

/// Reduction applied across the buffered spectra
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HoldMode {
    #[default]
    Average,
    MaxHold,
}

impl HoldMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldMode::Average => "average",
            HoldMode::MaxHold => "max_hold",
        }
    }
}

impl std::str::FromStr for HoldMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "average" => Ok(HoldMode::Average),
            "max_hold" => Ok(HoldMode::MaxHold),
            other => Err(format!("Invalid hold mode: {}", other)),
        }
    }
}

/// Normalized power per bin, relative to a full-scale 24-bit sine
pub fn power_spectrum(spectrum: &[Complex<f64>], n_fft: usize) -> Vec<f64> {
    let scale = FULL_SCALE * n_fft.max(1) as f64;
    spectrum
        .iter()
        .map(|bin| (bin.norm() / scale).powi(2) + POWER_FLOOR)
        .collect()
}

/// Convert normalized power to dBFS
pub fn to_dbfs(power: &[f64]) -> Vec<f64> {
    power.iter().map(|p| 10.0 * p.log10()).collect()
}

/// Circular history of power spectra with average / max-hold reduction
#[derive(Debug)]
pub struct SpectrumAggregator {
    depth: usize,
    bins: usize,
    // `depth` rows of `bins` values, allocated on first push
    rows: Option<Vec<f64>>,
    index: usize,
    count: usize,
}

impl SpectrumAggregator {
    pub fn new(depth: usize) -> Self {
        Self {
            depth: depth.max(1),
            bins: 0,
            rows: None,
            index: 0,
            count: 0,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Number of spectra currently contributing to the reduction
    pub fn count(&self) -> usize {
        self.count
    }

    /// Change the number of frames kept; a new depth discards all history
    pub fn configure(&mut self, depth: usize) {
        let depth = depth.max(1);
        if depth == self.depth {
            return;
        }

        self.depth = depth;
        if self.rows.is_some() {
            self.rows = Some(vec![0.0; self.depth * self.bins]);
        }
        self.index = 0;
        self.count = 0;
    }

    /// Record one power spectrum, evicting the oldest once `depth` are held
    pub fn push(&mut self, power: &[f64]) {
        if self.bins != power.len() || self.rows.is_none() {
            self.bins = power.len();
            self.rows = Some(vec![0.0; self.depth * self.bins]);
            self.index = 0;
            self.count = 0;
        }

        let Some(rows) = self.rows.as_mut() else {
            return;
        };

        let start = self.index * self.bins;
        rows[start..start + self.bins].copy_from_slice(power);
        self.index = (self.index + 1) % self.depth;
        self.count = (self.count + 1).min(self.depth);
    }

    /// Reduce the held spectra to one row
    ///
    /// Returns zeros when nothing has been pushed since the last reset.
    pub fn get(&self, mode: HoldMode) -> Vec<f64> {
        let mut out = vec![0.0; self.bins];
        let Some(rows) = self.rows.as_ref() else {
            return out;
        };
        if self.count == 0 || self.bins == 0 {
            return out;
        }

        let mut held = rows.chunks_exact(self.bins).take(self.count);
        match mode {
            HoldMode::Average => {
                for row in held {
                    for (acc, &value) in out.iter_mut().zip(row) {
                        *acc += value;
                    }
                }
                let count = self.count as f64;
                out.iter_mut().for_each(|acc| *acc /= count);
            }
            HoldMode::MaxHold => {
                if let Some(first) = held.next() {
                    out.copy_from_slice(first);
                }
                for row in held {
                    for (acc, &value) in out.iter_mut().zip(row) {
                        *acc = acc.max(value);
                    }
                }
            }
        }

        out
    }
}
