//! Periodic spectrum readout
//!
//! Stands in for the plotting front end: on every tick it pulls an FFT from each
//! channel buffer, folds it into that channel's aggregator and reports the
//! strongest bin.

use crate::audio::{
    HoldMode, SampleRingBuffer, SpectrumAggregator, WindowKind, power_spectrum, to_dbfs,
};
use crate::config::Settings;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Display parameters, adjustable while running
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorConfig {
    pub n_fft: usize,
    pub window: WindowKind,
    pub mode: HoldMode,
    pub average_frames: usize,
}

impl MonitorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            n_fft: settings.fft_points,
            window: settings.window,
            mode: settings.spectrum_mode,
            average_frames: settings.average_frames,
        }
    }
}

/// Strongest bin of one reduced spectrum
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectrumPeak {
    pub frequency_hz: f64,
    pub level_dbfs: f64,
}

/// Reduced spectrum for one channel, in dBFS
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSpectrum {
    pub frequencies: Vec<f64>,
    pub levels_dbfs: Vec<f64>,
}

impl ChannelSpectrum {
    pub fn peak(&self) -> Option<SpectrumPeak> {
        self.levels_dbfs
            .iter()
            .zip(&self.frequencies)
            .max_by(|a, b| a.0.total_cmp(b.0))
            .map(|(&level_dbfs, &frequency_hz)| SpectrumPeak {
                frequency_hz,
                level_dbfs,
            })
    }
}

pub struct SpectrumMonitor {
    left: Arc<SampleRingBuffer>,
    right: Arc<SampleRingBuffer>,
    config: MonitorConfig,
    aggregators: [SpectrumAggregator; 2],
}

impl SpectrumMonitor {
    pub fn new(
        left: Arc<SampleRingBuffer>,
        right: Arc<SampleRingBuffer>,
        config: MonitorConfig,
    ) -> Self {
        let aggregators = [
            SpectrumAggregator::new(config.average_frames),
            SpectrumAggregator::new(config.average_frames),
        ];
        Self {
            left,
            right,
            config,
            aggregators,
        }
    }

    /// Apply new display parameters
    ///
    /// Changing the FFT size or window invalidates the held spectra, since their
    /// bins no longer line up with the new ones.
    pub fn reconfigure(&mut self, config: MonitorConfig) {
        let reshaped = config.n_fft != self.config.n_fft || config.window != self.config.window;
        for aggregator in &mut self.aggregators {
            if reshaped {
                *aggregator = SpectrumAggregator::new(config.average_frames);
            } else {
                aggregator.configure(config.average_frames);
            }
        }
        self.config = config;
    }

    /// Compute one refresh for both channels
    pub fn refresh(&mut self) -> [ChannelSpectrum; 2] {
        let [left_agg, right_agg] = &mut self.aggregators;
        [
            reduce(&self.left, left_agg, &self.config),
            reduce(&self.right, right_agg, &self.config),
        ]
    }

    /// Refresh every `interval` until cancelled, logging peaks about once a second
    ///
    /// FFTs run on the blocking pool. New parameters arriving on `updates` take
    /// effect from the next refresh.
    pub async fn run(
        self,
        interval: Duration,
        mut updates: watch::Receiver<MonitorConfig>,
        token: CancellationToken,
    ) {
        let mut monitor = self;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_report = Instant::now();

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                Ok(()) = updates.changed() => {
                    let config = *updates.borrow_and_update();
                    log::info!(
                        "Spectrum monitor reconfigured: {} points, {} window, {} over {} frames",
                        config.n_fft,
                        config.window,
                        config.mode.as_str(),
                        config.average_frames
                    );
                    monitor.reconfigure(config);
                }
                _ = ticker.tick() => {
                    let refreshed = tokio::task::spawn_blocking(move || {
                        let mut monitor = monitor;
                        let spectra = monitor.refresh();
                        (monitor, spectra)
                    })
                    .await;

                    let [left, right] = match refreshed {
                        Ok((returned, spectra)) => {
                            monitor = returned;
                            spectra
                        }
                        Err(e) => {
                            log::error!("Spectrum refresh failed: {}", e);
                            break;
                        }
                    };
                    if last_report.elapsed() >= Duration::from_secs(1) {
                        log_peaks(&left, &right);
                        last_report = Instant::now();
                    }
                }
            }
        }
    }
}

fn reduce(
    buffer: &SampleRingBuffer,
    aggregator: &mut SpectrumAggregator,
    config: &MonitorConfig,
) -> ChannelSpectrum {
    let spectrum = buffer.get_fft(config.n_fft, config.window);
    aggregator.push(&power_spectrum(&spectrum, config.n_fft));
    ChannelSpectrum {
        frequencies: buffer.get_freq_axis(config.n_fft),
        levels_dbfs: to_dbfs(&aggregator.get(config.mode)),
    }
}

fn log_peaks(left: &ChannelSpectrum, right: &ChannelSpectrum) {
    if let (Some(l), Some(r)) = (left.peak(), right.peak()) {
        log::debug!(
            "Peak L {:.1} Hz @ {:.1} dBFS, R {:.1} Hz @ {:.1} dBFS",
            l.frequency_hz,
            l.level_dbfs,
            r.frequency_hz,
            r.level_dbfs
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::FULL_SCALE;

    fn config() -> MonitorConfig {
        MonitorConfig {
            n_fft: 1024,
            window: WindowKind::Hann,
            mode: HoldMode::Average,
            average_frames: 2,
        }
    }

    fn tone(bin: usize, len: usize) -> Vec<i32> {
        (0..len)
            .map(|n| {
                let phase = 2.0 * std::f64::consts::PI * bin as f64 * n as f64 / 1024.0;
                ((FULL_SCALE - 1.0) * phase.sin()) as i32
            })
            .collect()
    }

    fn buffers() -> (Arc<SampleRingBuffer>, Arc<SampleRingBuffer>) {
        (
            Arc::new(SampleRingBuffer::new(4096)),
            Arc::new(SampleRingBuffer::new(4096)),
        )
    }

    #[test]
    fn test_refresh_finds_tone_per_channel() {
        let (left, right) = buffers();
        left.write(&tone(64, 1024)).unwrap();
        right.write(&tone(128, 1024)).unwrap();

        let mut monitor = SpectrumMonitor::new(left, right, config());
        let [l, r] = monitor.refresh();

        assert_eq!(l.levels_dbfs.len(), 513);
        assert_eq!(l.frequencies.len(), 513);
        assert_eq!(l.peak().unwrap().frequency_hz, 3_000.0);
        assert_eq!(r.peak().unwrap().frequency_hz, 6_000.0);
    }

    #[test]
    fn test_full_scale_tone_is_near_zero_dbfs() {
        let (left, right) = buffers();
        left.write(&tone(64, 1024)).unwrap();

        let mut monitor = SpectrumMonitor::new(left, right, config());
        let [l, _] = monitor.refresh();
        let level = l.peak().unwrap().level_dbfs;

        // Hann coherent gain is 0.5, and one-sided magnitude is half the amplitude
        assert!((level - 20.0 * 0.25f64.log10()).abs() < 0.5, "level {level}");
    }

    #[test]
    fn test_silence_sits_at_floor() {
        let (left, right) = buffers();
        let mut monitor = SpectrumMonitor::new(left, right, config());
        let [l, r] = monitor.refresh();

        assert!(l.levels_dbfs.iter().all(|&db| (db + 300.0).abs() < 1e-6));
        assert!(r.levels_dbfs.iter().all(|&db| (db + 300.0).abs() < 1e-6));
    }

    #[test]
    fn test_reconfigure_fft_size_resets_history() {
        let (left, right) = buffers();
        left.write(&tone(64, 2048)).unwrap();

        let mut monitor = SpectrumMonitor::new(left, right, config());
        monitor.refresh();
        monitor.reconfigure(MonitorConfig {
            n_fft: 2048,
            ..config()
        });
        let [l, _] = monitor.refresh();

        assert_eq!(l.levels_dbfs.len(), 1025);
        assert_eq!(monitor.aggregators[0].count(), 1);
    }

    #[test]
    fn test_config_from_settings() {
        let settings = Settings {
            fft_points: 4096,
            window: WindowKind::Blackman,
            spectrum_mode: HoldMode::MaxHold,
            average_frames: 6,
            ..Settings::default()
        };

        assert_eq!(
            MonitorConfig::from_settings(&settings),
            MonitorConfig {
                n_fft: 4096,
                window: WindowKind::Blackman,
                mode: HoldMode::MaxHold,
                average_frames: 6,
            }
        );
    }

    #[test]
    fn test_reconfigure_depth_keeps_bins() {
        let (left, right) = buffers();
        left.write(&tone(64, 1024)).unwrap();

        let mut monitor = SpectrumMonitor::new(left, right, config());
        monitor.refresh();
        monitor.reconfigure(MonitorConfig {
            average_frames: 8,
            ..config()
        });

        assert_eq!(monitor.aggregators[0].depth(), 8);
        assert_eq!(monitor.aggregators[0].count(), 0);
        let [l, _] = monitor.refresh();
        assert_eq!(l.levels_dbfs.len(), 513);
    }

    #[tokio::test]
    async fn test_run_applies_updates_and_stops_on_cancel() {
        let (left, right) = buffers();
        left.write(&tone(64, 1024)).unwrap();
        let monitor = SpectrumMonitor::new(left, right, config());
        let (updates, receiver) = watch::channel(config());
        let token = CancellationToken::new();

        let task = tokio::spawn(monitor.run(Duration::from_millis(5), receiver, token.clone()));
        tokio::time::sleep(Duration::from_millis(15)).await;
        updates.send_replace(MonitorConfig {
            n_fft: 2048,
            mode: HoldMode::MaxHold,
            ..config()
        });
        tokio::time::sleep(Duration::from_millis(15)).await;
        token.cancel();
        task.await.unwrap();
    }
}
