use crate::audio::{HoldMode, SAMPLE_RATE, WindowKind};
use crate::link::{ETHERTYPE, MAX_FRAME_PAIRS, MacAddr};
use crate::registers::RegisterId;
use anyhow::Context;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Longest history a channel buffer may be configured to hold
pub const MAX_BUFFER_SECONDS: f64 = 600.0;

/// Service settings, read from `config.toml`
///
/// Every field has a default, so a partial file (or none at all) is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Network interface the device is attached to
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Device address; sample frames from anyone else are ignored
    #[serde(default = "default_peer_mac")]
    pub peer_mac: MacAddr,

    /// Source address written into register frames
    /// The device firmware expects broadcast here rather than the host's own address
    #[serde(default = "default_local_mac")]
    pub local_mac: MacAddr,

    #[serde(default = "default_ethertype")]
    pub ethertype: u16,

    /// Register broadcast period
    #[serde(default = "default_send_interval_ms")]
    pub send_interval_ms: u64,

    /// How long a receive may block before the capture loop rechecks for shutdown
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,

    /// History kept per channel
    #[serde(default = "default_buffer_seconds")]
    pub buffer_seconds: f64,

    #[serde(default = "default_fft_points")]
    pub fft_points: usize,

    #[serde(default)]
    pub window: WindowKind,

    /// Spectra combined by the aggregator
    #[serde(default = "default_average_frames")]
    pub average_frames: usize,

    #[serde(default)]
    pub spectrum_mode: HoldMode,

    /// Spectrum refresh period (33 ms is roughly 30 FPS)
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,

    /// Tone generated in simulation mode
    #[serde(default = "default_simulate_frequency_hz")]
    pub simulate_frequency_hz: f64,

    /// Register values applied over the power-on defaults, by register name
    /// Values are truncated to 32 bits, so negative numbers are two's complement
    #[serde(default)]
    pub registers: BTreeMap<String, i64>,
}

fn default_interface() -> String {
    "eth0".to_string()
}

fn default_peer_mac() -> MacAddr {
    MacAddr::new([0x80, 0x1F, 0x12, 0xCA, 0x83, 0x63])
}

fn default_local_mac() -> MacAddr {
    MacAddr::BROADCAST
}

fn default_ethertype() -> u16 {
    ETHERTYPE
}

fn default_send_interval_ms() -> u64 {
    50
}

fn default_receive_timeout_ms() -> u64 {
    100
}

fn default_buffer_seconds() -> f64 {
    5.0
}

fn default_fft_points() -> usize {
    16384
}

fn default_average_frames() -> usize {
    2
}

fn default_monitor_interval_ms() -> u64 {
    33
}

fn default_simulate_frequency_hz() -> f64 {
    10.0
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            peer_mac: default_peer_mac(),
            local_mac: default_local_mac(),
            ethertype: default_ethertype(),
            send_interval_ms: default_send_interval_ms(),
            receive_timeout_ms: default_receive_timeout_ms(),
            buffer_seconds: default_buffer_seconds(),
            fft_points: default_fft_points(),
            window: WindowKind::default(),
            average_frames: default_average_frames(),
            spectrum_mode: HoldMode::default(),
            monitor_interval_ms: default_monitor_interval_ms(),
            simulate_frequency_hz: default_simulate_frequency_hz(),
            registers: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Load settings from `path`, or from the default location if `None`
    ///
    /// A missing file at the default location yields defaults. An explicit path
    /// must exist.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match config_path() {
                Some(path) => (path, false),
                None => {
                    log::warn!("Could not determine config directory, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        if !required && !path.exists() {
            log::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let settings = Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded settings from: {}", path.display());
        Ok(settings)
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let settings: Self = toml::from_str(contents)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize settings to TOML")
    }

    /// Reject values the service cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.fft_points > 0, "fft_points must be positive");
        anyhow::ensure!(
            self.buffer_seconds.is_finite() && self.buffer_seconds <= MAX_BUFFER_SECONDS,
            "buffer_seconds must be at most {}",
            MAX_BUFFER_SECONDS
        );
        let capacity = (self.buffer_seconds * SAMPLE_RATE as f64).round();
        anyhow::ensure!(
            capacity >= MAX_FRAME_PAIRS as f64,
            "buffer_seconds must hold at least one full frame ({} samples, {:.3} s)",
            MAX_FRAME_PAIRS,
            MAX_FRAME_PAIRS as f64 / SAMPLE_RATE as f64
        );
        anyhow::ensure!(self.send_interval_ms > 0, "send_interval_ms must be positive");
        anyhow::ensure!(
            self.monitor_interval_ms > 0,
            "monitor_interval_ms must be positive"
        );
        for name in self.registers.keys() {
            RegisterId::Name(name.as_str()).resolve()?;
        }
        Ok(())
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }
}

/// Get the path to the config file: ~/.config/modpanel/config.toml
pub fn config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "modpanel").map(|dirs| dirs.config_dir().join("config.toml"))
}
