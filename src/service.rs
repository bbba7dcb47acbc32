//! Service wiring
//!
//! Owns the shared state (one sample buffer per channel and the register bank)
//! and runs the background activities against it:
//! - capture: link frames into the buffers (device mode)
//! - transmitter: register snapshots out to the device (device mode)
//! - simulator: synthetic tone into the buffers (simulate mode)
//! - monitor: periodic spectrum readout from the buffers
//! - reloader: re-reads the config file on SIGHUP
//!
//! Every activity shares one cancellation token; shutdown cancels it and then
//! waits briefly for each task.

use crate::audio::SampleRingBuffer;
use crate::config::Settings;
use crate::ingest::{CaptureHandle, FrameIngestor};
use crate::link::{LinkSocket, RawSocket};
use crate::monitor::{MonitorConfig, SpectrumMonitor};
use crate::registers::{RegisterBank, RegisterError};
use crate::simulate::SineSource;
use crate::transmit::RegisterTransmitter;
use anyhow::Context;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long shutdown waits for the capture loop to notice cancellation
pub const CAPTURE_GRACE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Exchange frames with the device over the configured interface
    Device,
    /// Feed the buffers from a generated tone; no socket is opened
    Simulate,
}

pub struct Service {
    settings: Settings,
    config_path: Option<PathBuf>,
    left: Arc<SampleRingBuffer>,
    right: Arc<SampleRingBuffer>,
    registers: Arc<RegisterBank>,
}

impl Service {
    /// Build the shared state, with the settings' register table applied
    pub fn new(settings: Settings) -> anyhow::Result<Self> {
        settings.validate()?;

        let registers = Arc::new(RegisterBank::new());
        apply_registers(&registers, &settings.registers)?;

        Ok(Self {
            left: Arc::new(SampleRingBuffer::with_duration(settings.buffer_seconds)),
            right: Arc::new(SampleRingBuffer::with_duration(settings.buffer_seconds)),
            registers,
            config_path: None,
            settings,
        })
    }

    /// Config file re-read on SIGHUP (the default location if unset)
    pub fn with_config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn left(&self) -> &Arc<SampleRingBuffer> {
        &self.left
    }

    pub fn right(&self) -> &Arc<SampleRingBuffer> {
        &self.right
    }

    pub fn registers(&self) -> &Arc<RegisterBank> {
        &self.registers
    }

    /// Run until Ctrl-C
    pub async fn run(&self, mode: RunMode) -> anyhow::Result<()> {
        self.run_until(mode, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for Ctrl-C: {}", e);
            }
        })
        .await
    }

    /// Run until `shutdown` completes
    pub async fn run_until<F>(&self, mode: RunMode, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        let socket = match mode {
            RunMode::Device => Some(self.open_link()?),
            RunMode::Simulate => None,
        };

        let token = CancellationToken::new();
        let mut tasks: Vec<(&str, JoinHandle<()>)> = Vec::new();

        let monitor_config = MonitorConfig::from_settings(&self.settings);
        let (monitor_updates, monitor_receiver) = watch::channel(monitor_config);
        let monitor = SpectrumMonitor::new(
            Arc::clone(&self.left),
            Arc::clone(&self.right),
            monitor_config,
        );
        tasks.push((
            "monitor",
            tokio::spawn(monitor.run(
                self.settings.monitor_interval(),
                monitor_receiver,
                token.clone(),
            )),
        ));
        tasks.push((
            "reloader",
            tokio::spawn(reload_on_hangup(
                self.config_path.clone(),
                Arc::clone(&self.registers),
                monitor_updates,
                token.clone(),
            )),
        ));

        let capture = match socket {
            Some(socket) => {
                tasks.push(("transmitter", self.spawn_transmitter(&socket, &token)));
                Some(self.spawn_capture(socket, &token))
            }
            None => {
                let source = SineSource::new(self.settings.simulate_frequency_hz);
                tasks.push((
                    "simulator",
                    tokio::spawn(source.run(
                        Arc::clone(&self.left),
                        Arc::clone(&self.right),
                        token.clone(),
                    )),
                ));
                None
            }
        };

        log::info!("Service running ({:?} mode)", mode);
        shutdown.await;
        log::info!("Shutdown signal received, stopping service...");

        token.cancel();
        for (name, task) in tasks {
            if let Err(e) = task.await {
                log::error!("{} task failed: {}", name, e);
            }
        }
        if let Some(capture) = capture
            && let Some(stats) = capture.shutdown(CAPTURE_GRACE).await
        {
            log::info!(
                "Capture stopped: {} frames accepted, {} dropped, {} samples per channel",
                stats.accepted,
                stats.dropped,
                stats.pairs
            );
        }

        Ok(())
    }

    fn open_link(&self) -> anyhow::Result<Arc<dyn LinkSocket>> {
        let socket = RawSocket::open(
            &self.settings.interface,
            self.settings.ethertype,
            self.settings.receive_timeout(),
        )
        .with_context(|| {
            format!(
                "Failed to open raw socket on {} (raw sockets need CAP_NET_RAW)",
                self.settings.interface
            )
        })?;
        Ok(Arc::new(socket))
    }

    fn spawn_transmitter(
        &self,
        socket: &Arc<dyn LinkSocket>,
        token: &CancellationToken,
    ) -> JoinHandle<()> {
        let transmitter = RegisterTransmitter::new(
            Arc::clone(&self.registers),
            Arc::clone(socket),
            self.settings.local_mac,
            self.settings.peer_mac,
            self.settings.ethertype,
        )
        .with_interval(self.settings.send_interval());

        let token = token.clone();
        tokio::spawn(async move {
            transmitter.run(token).await;
        })
    }

    fn spawn_capture(
        &self,
        socket: Arc<dyn LinkSocket>,
        token: &CancellationToken,
    ) -> CaptureHandle {
        let ingestor = FrameIngestor::new(
            self.settings.ethertype,
            self.settings.peer_mac,
            Arc::clone(&self.left),
            Arc::clone(&self.right),
        );
        CaptureHandle::spawn(socket, ingestor, token.clone())
    }
}

/// Reset the bank to power-on values, then apply `table` over them
fn apply_registers(
    bank: &RegisterBank,
    table: &BTreeMap<String, i64>,
) -> Result<(), RegisterError> {
    bank.reset();
    for (name, &value) in table {
        bank.set(name.as_str(), value)?;
    }
    Ok(())
}

/// Re-apply the config file's registers and display settings
///
/// A file that fails to load leaves everything as it was.
fn reload(path: Option<&Path>, bank: &RegisterBank, monitor: &watch::Sender<MonitorConfig>) {
    let settings = match Settings::load(path) {
        Ok(settings) => settings,
        Err(e) => {
            log::warn!("Reload failed, keeping current settings: {:#}", e);
            return;
        }
    };

    if let Err(e) = apply_registers(bank, &settings.registers) {
        log::warn!("Reload failed, keeping current settings: {}", e);
        return;
    }
    monitor.send_replace(MonitorConfig::from_settings(&settings));
    log::info!(
        "Reloaded settings ({} register overrides)",
        settings.registers.len()
    );
}

async fn reload_on_hangup(
    path: Option<PathBuf>,
    bank: Arc<RegisterBank>,
    monitor: watch::Sender<MonitorConfig>,
    token: CancellationToken,
) {
    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            log::warn!("Config reload on SIGHUP unavailable: {}", e);
            return;
        }
    };

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            Some(()) = hangup.recv() => reload(path.as_deref(), &bank, &monitor),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::ETHERNET_HEADER_LEN;
    use crate::link::testing::MemoryLink;

    fn settings() -> Settings {
        Settings {
            buffer_seconds: 0.5,
            fft_points: 1024,
            monitor_interval_ms: 5,
            simulate_frequency_hz: 1_000.0,
            ..Settings::default()
        }
    }

    fn register_word(frame: &[u8], index: usize) -> u32 {
        let start = ETHERNET_HEADER_LEN + 4 * index;
        u32::from_be_bytes([
            frame[start],
            frame[start + 1],
            frame[start + 2],
            frame[start + 3],
        ])
    }

    #[test]
    fn test_buffers_sized_from_settings() {
        let service = Service::new(settings()).unwrap();
        assert_eq!(service.left().capacity(), 24_000);
        assert_eq!(service.right().capacity(), 24_000);
        assert_eq!(service.registers().get("distortion"), Ok(11));
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let result = Service::new(Settings {
            buffer_seconds: 0.01,
            ..settings()
        });
        assert!(result.is_err());

        let result = Service::new(Settings {
            registers: BTreeMap::from([("volume".to_string(), 1)]),
            ..settings()
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_configured_registers_reach_the_wire() {
        let service = Service::new(Settings {
            registers: BTreeMap::from([
                ("mixer_select".to_string(), 3),
                ("delay_left".to_string(), 480),
                ("delay_right".to_string(), -2),
            ]),
            send_interval_ms: 5,
            ..settings()
        })
        .unwrap();
        let link = Arc::new(MemoryLink::default());
        let socket: Arc<dyn LinkSocket> = link.clone();
        let token = CancellationToken::new();

        let task = service.spawn_transmitter(&socket, &token);
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
        task.await.unwrap();

        let frames = link.sent_frames();
        assert!(!frames.is_empty());
        let frame = &frames[0];
        assert_eq!(register_word(frame, 0), 3);
        assert_eq!(register_word(frame, 1), 0x3FFF_FFFF);
        assert_eq!(register_word(frame, 10), 480);
        assert_eq!(register_word(frame, 11), 0xFFFF_FFFE);
    }

    #[test]
    fn test_reload_applies_file_over_defaults() {
        let service = Service::new(Settings {
            registers: BTreeMap::from([("tremolo".to_string(), 0x100)]),
            ..settings()
        })
        .unwrap();
        let (updates, receiver) = watch::channel(MonitorConfig::from_settings(&settings()));

        let path = std::env::temp_dir().join(format!("modpanel-reload-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            "average_frames = 7\n[registers]\nvol_left = 5\n",
        )
        .unwrap();
        reload(Some(path.as_path()), service.registers(), &updates);
        std::fs::remove_file(&path).unwrap();

        // Registers absent from the file return to power-on values
        assert_eq!(service.registers().get("vol_left"), Ok(5));
        assert_eq!(service.registers().get("tremolo"), Ok(0x576));
        assert_eq!(receiver.borrow().average_frames, 7);
    }

    #[test]
    fn test_failed_reload_keeps_current_state() {
        let service = Service::new(Settings {
            registers: BTreeMap::from([("bsf".to_string(), 9)]),
            ..settings()
        })
        .unwrap();
        let (updates, receiver) = watch::channel(MonitorConfig::from_settings(&settings()));

        let path = std::env::temp_dir().join(format!("modpanel-bad-{}.toml", std::process::id()));
        std::fs::write(&path, "[registers]\nno_such_register = 1\n").unwrap();
        reload(Some(path.as_path()), service.registers(), &updates);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(service.registers().get("bsf"), Ok(9));
        assert!(!receiver.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_simulate_mode_fills_buffers_until_shutdown() {
        let service = Service::new(settings()).unwrap();

        service
            .run_until(
                RunMode::Simulate,
                tokio::time::sleep(Duration::from_millis(30)),
            )
            .await
            .unwrap();

        let cursor = service.left().cursor();
        assert!(cursor > 0);
        assert_eq!(service.right().cursor(), cursor);
        let inverted: Vec<i32> = service.left().read(4).iter().map(|s| -s).collect();
        assert_eq!(service.right().read(4), inverted);
    }

    #[tokio::test]
    async fn test_device_mode_reports_missing_interface() {
        let service = Service::new(Settings {
            interface: "modpanel-no-such-if".to_string(),
            ..settings()
        })
        .unwrap();

        let result = service.run_until(RunMode::Device, async {}).await;
        assert!(result.is_err());
    }
}
