//! Window functions applied to sample blocks before spectral transforms
//!
//! Windows are symmetric (the first and last coefficients mirror each other) and
//! cached per (length, kind) pair, since the same few FFT sizes are requested
//! over and over by the display loop.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    #[default]
    Hann,
    Hamming,
    Blackman,
}

impl WindowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowKind::Hann => "hann",
            WindowKind::Hamming => "hamming",
            WindowKind::Blackman => "blackman",
        }
    }

    /// Build the window coefficients for a block of `length` samples
    pub fn coefficients(&self, length: usize) -> Vec<f64> {
        match length {
            0 => Vec::new(),
            1 => vec![1.0],
            _ => {
                let span = (length - 1) as f64;
                (0..length)
                    .map(|n| {
                        let phase = 2.0 * PI * n as f64 / span;
                        match self {
                            WindowKind::Hann => 0.5 - 0.5 * phase.cos(),
                            WindowKind::Hamming => 0.54 - 0.46 * phase.cos(),
                            WindowKind::Blackman => {
                                0.42 - 0.5 * phase.cos() + 0.08 * (2.0 * phase).cos()
                            }
                        }
                    })
                    .collect()
            }
        }
    }
}

impl std::fmt::Display for WindowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WindowKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hann" => Ok(WindowKind::Hann),
            "hamming" => Ok(WindowKind::Hamming),
            "blackman" => Ok(WindowKind::Blackman),
            other => Err(format!("Invalid window kind: {}", other)),
        }
    }
}

/// Lazily-built window coefficients, computed once and reused forever
#[derive(Debug, Default)]
pub struct WindowCache {
    windows: Mutex<HashMap<(usize, WindowKind), Arc<[f64]>>>,
}

impl WindowCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the window of the given length and kind, building it on first use
    pub fn get(&self, length: usize, kind: WindowKind) -> Arc<[f64]> {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        windows
            .entry((length, kind))
            .or_insert_with(|| kind.coefficients(length).into())
            .clone()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
