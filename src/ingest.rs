//! Inbound sample frames
//!
//! The capture loop pulls frames off the link and hands each one to
//! [`FrameIngestor::handle_frame`], which filters, decodes and stores it:
//! `Listening -> Decoding(frame) -> Listening` until cancelled. Frames from the
//! wrong protocol or the wrong device are dropped without surfacing an error.

use crate::audio::SampleRingBuffer;
use crate::link::{
    EthernetFrame, LinkSocket, MAX_FRAME_LEN, MacAddr, StereoBatch, decode_audio_payload,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Shorter than an Ethernet header
    Truncated,
    WrongEthertype(u16),
    WrongSource(MacAddr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Accepted { pairs: usize },
    Dropped(DropReason),
}

/// Running totals reported when capture stops
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CaptureStats {
    pub accepted: u64,
    pub dropped: u64,
    pub pairs: u64,
}

/// Decodes sample frames from the peer device into the channel buffers
pub struct FrameIngestor {
    ethertype: u16,
    peer: MacAddr,
    left: Arc<SampleRingBuffer>,
    right: Arc<SampleRingBuffer>,
}

impl FrameIngestor {
    pub fn new(
        ethertype: u16,
        peer: MacAddr,
        left: Arc<SampleRingBuffer>,
        right: Arc<SampleRingBuffer>,
    ) -> Self {
        Self {
            ethertype,
            peer,
            left,
            right,
        }
    }

    /// Admit, decode and store one raw frame
    pub fn handle_frame(&self, raw: &[u8]) -> FrameOutcome {
        let Some(frame) = EthernetFrame::parse(raw) else {
            return FrameOutcome::Dropped(DropReason::Truncated);
        };
        if frame.ethertype != self.ethertype {
            return FrameOutcome::Dropped(DropReason::WrongEthertype(frame.ethertype));
        }
        if frame.source != self.peer {
            log::trace!("Dropping frame from unexpected source {}", frame.source);
            return FrameOutcome::Dropped(DropReason::WrongSource(frame.source));
        }

        let batch = decode_audio_payload(frame.payload);
        self.store(&batch);
        FrameOutcome::Accepted { pairs: batch.len() }
    }

    fn store(&self, batch: &StereoBatch) {
        if let Err(e) = self.left.write(&batch.left) {
            log::warn!("Left channel write rejected: {}", e);
        }
        if let Err(e) = self.right.write(&batch.right) {
            log::warn!("Right channel write rejected: {}", e);
        }
    }
}

/// Receive frames until `token` is cancelled or the link fails
///
/// Cancellation is noticed between receives, so shutdown latency is bounded by
/// the socket's receive timeout.
pub fn capture_loop(
    socket: &dyn LinkSocket,
    ingestor: &FrameIngestor,
    token: &CancellationToken,
) -> CaptureStats {
    let mut stats = CaptureStats::default();
    let mut buf = vec![0u8; MAX_FRAME_LEN];

    while !token.is_cancelled() {
        match socket.recv_frame(&mut buf) {
            Ok(Some(len)) => match ingestor.handle_frame(&buf[..len]) {
                FrameOutcome::Accepted { pairs } => {
                    stats.accepted += 1;
                    stats.pairs += pairs as u64;
                }
                FrameOutcome::Dropped(_) => stats.dropped += 1,
            },
            Ok(None) => {}
            Err(e) => {
                log::error!("Capture stopped: {}", e);
                break;
            }
        }
    }

    stats
}

/// Background capture activity
pub struct CaptureHandle {
    token: CancellationToken,
    task: JoinHandle<CaptureStats>,
}

impl CaptureHandle {
    /// Start capturing on a blocking worker thread
    pub fn spawn(
        socket: Arc<dyn LinkSocket>,
        ingestor: FrameIngestor,
        token: CancellationToken,
    ) -> Self {
        let loop_token = token.clone();
        let task = tokio::task::spawn_blocking(move || {
            capture_loop(socket.as_ref(), &ingestor, &loop_token)
        });
        Self { token, task }
    }

    /// Ask the capture loop to stop after its current receive
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Stop and wait up to `grace` for the loop to exit
    ///
    /// Returns `None` if the loop had not exited in time; it is left to finish
    /// on its own.
    pub async fn shutdown(self, grace: Duration) -> Option<CaptureStats> {
        self.stop();
        match tokio::time::timeout(grace, self.task).await {
            Ok(Ok(stats)) => Some(stats),
            Ok(Err(e)) => {
                log::error!("Capture task failed: {}", e);
                None
            }
            Err(_) => {
                log::warn!("Capture did not stop within {:?}", grace);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::testing::MemoryLink;
    use crate::link::{AUDIO_HEADER_LEN, ETHERTYPE};

    const PEER: MacAddr = MacAddr::new([0x80, 0x1F, 0x12, 0xCA, 0x83, 0x63]);
    const STRANGER: MacAddr = MacAddr::new([0x02, 0, 0, 0, 0, 0x01]);

    fn sample_frame(source: MacAddr, ethertype: u16, groups: &[[u8; 6]], stray: &[u8]) -> Vec<u8> {
        let mut payload = vec![0xA5; AUDIO_HEADER_LEN];
        for group in groups {
            payload.extend_from_slice(group);
        }
        payload.extend_from_slice(stray);

        EthernetFrame {
            destination: MacAddr::BROADCAST,
            source,
            ethertype,
            payload: &payload,
        }
        .encode()
    }

    fn ingestor() -> (FrameIngestor, Arc<SampleRingBuffer>, Arc<SampleRingBuffer>) {
        let left = Arc::new(SampleRingBuffer::new(64));
        let right = Arc::new(SampleRingBuffer::new(64));
        let ingestor = FrameIngestor::new(ETHERTYPE, PEER, Arc::clone(&left), Arc::clone(&right));
        (ingestor, left, right)
    }

    #[test]
    fn test_accepts_peer_frames() {
        let (ingestor, left, right) = ingestor();
        let frame = sample_frame(
            PEER,
            ETHERTYPE,
            &[[0, 0, 1, 0xFF, 0xFF, 0xFF], [0x80, 0, 0, 0, 0, 2]],
            &[],
        );

        assert_eq!(ingestor.handle_frame(&frame), FrameOutcome::Accepted { pairs: 2 });
        assert_eq!(left.read(2), vec![1, -8_388_608]);
        assert_eq!(right.read(2), vec![-1, 2]);
    }

    #[test]
    fn test_wrong_source_writes_nothing() {
        let (ingestor, left, right) = ingestor();
        let frame = sample_frame(STRANGER, ETHERTYPE, &[[0, 0, 1, 0, 0, 1]], &[]);

        assert_eq!(
            ingestor.handle_frame(&frame),
            FrameOutcome::Dropped(DropReason::WrongSource(STRANGER))
        );
        assert_eq!(left.cursor(), 0);
        assert_eq!(right.cursor(), 0);
    }

    #[test]
    fn test_wrong_ethertype_writes_nothing() {
        let (ingestor, left, _) = ingestor();
        let frame = sample_frame(PEER, 0x0800, &[[0, 0, 1, 0, 0, 1]], &[]);

        assert_eq!(
            ingestor.handle_frame(&frame),
            FrameOutcome::Dropped(DropReason::WrongEthertype(0x0800))
        );
        assert_eq!(left.cursor(), 0);
    }

    #[test]
    fn test_truncated_frame_is_dropped() {
        let (ingestor, _, _) = ingestor();
        assert_eq!(
            ingestor.handle_frame(&[0u8; 10]),
            FrameOutcome::Dropped(DropReason::Truncated)
        );
    }

    #[test]
    fn test_stray_byte_is_discarded() {
        let (ingestor, left, right) = ingestor();
        let frame = sample_frame(PEER, ETHERTYPE, &[[0, 0, 5, 0, 0, 6]], &[0x42]);

        assert_eq!(ingestor.handle_frame(&frame), FrameOutcome::Accepted { pairs: 1 });
        assert_eq!(left.cursor(), 1);
        assert_eq!(left.read(1), vec![5]);
        assert_eq!(right.read(1), vec![6]);
    }

    #[test]
    fn test_frames_append_in_arrival_order() {
        let (ingestor, left, _) = ingestor();
        for value in 1..=3u8 {
            let frame = sample_frame(PEER, ETHERTYPE, &[[0, 0, value, 0, 0, 0]], &[]);
            ingestor.handle_frame(&frame);
        }
        assert_eq!(left.read(3), vec![1, 2, 3]);
    }

    #[test]
    fn test_capture_loop_counts_and_stops() {
        let (ingestor, left, _) = ingestor();
        let link = MemoryLink::with_inbound(vec![
            sample_frame(PEER, ETHERTYPE, &[[0, 0, 7, 0, 0, 7]; 3], &[]),
            sample_frame(STRANGER, ETHERTYPE, &[[0, 0, 9, 0, 0, 9]], &[]),
            sample_frame(PEER, ETHERTYPE, &[[0, 0, 8, 0, 0, 8]], &[]),
        ]);
        let token = CancellationToken::new();

        let stats = std::thread::scope(|scope| {
            let worker = scope.spawn(|| capture_loop(&link, &ingestor, &token));
            while !link.inbound.lock().unwrap().is_empty() {
                std::thread::sleep(Duration::from_millis(1));
            }
            std::thread::sleep(Duration::from_millis(5));
            token.cancel();
            worker.join().unwrap()
        });

        assert_eq!(
            stats,
            CaptureStats {
                accepted: 2,
                dropped: 1,
                pairs: 4
            }
        );
        assert_eq!(left.read(4), vec![7, 7, 7, 8]);
    }

    #[tokio::test]
    async fn test_capture_handle_shutdown() {
        let (ingestor, _, _) = ingestor();
        let link: Arc<dyn LinkSocket> = Arc::new(MemoryLink::default());

        let handle = CaptureHandle::spawn(link, ingestor, CancellationToken::new());
        let stats = handle.shutdown(Duration::from_secs(1)).await;
        assert_eq!(stats, Some(CaptureStats::default()));
    }
}
