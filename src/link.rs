//! Link layer for device communication
//!
//! Samples arrive and register state leaves as raw Ethernet frames. The layer
//! is organized into:
//! - `frame`: MAC addresses and Ethernet header parsing/encoding
//! - `codec`: payload formats (packed 24-bit stereo in, register words out)
//! - `raw_socket`: AF_PACKET socket bound to one interface

use thiserror::Error;

mod codec;
mod frame;
mod raw_socket;

pub use codec::{
    AUDIO_HEADER_LEN, STEREO_GROUP_LEN, StereoBatch, decode_audio_payload,
    encode_register_payload, sign_extend_24,
};
pub use frame::{ETHERNET_HEADER_LEN, EthernetFrame, MacAddr, MacParseError};
pub use raw_socket::RawSocket;

/// Ethertype shared by sample frames and register frames
pub const ETHERTYPE: u16 = 0x88B5;

/// Largest frame the capture loop will accept
pub const MAX_FRAME_LEN: usize = 65_536;

/// Most sample pairs a single frame of `MAX_FRAME_LEN` bytes can carry
pub const MAX_FRAME_PAIRS: usize =
    (MAX_FRAME_LEN - ETHERNET_HEADER_LEN - AUDIO_HEADER_LEN) / STEREO_GROUP_LEN;

/// Link error types
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Network interface not found: {0}")]
    InterfaceNotFound(String),
    #[error("Link socket error: {0}")]
    Os(#[from] nix::Error),
    #[error("Short send: {sent} of {len} bytes")]
    ShortSend { sent: usize, len: usize },
    #[error("Link closed")]
    Closed,
}

/// Raw frame send/receive primitive
///
/// Implementations deliver whole link-layer frames, header included, and never
/// acknowledge or retry.
pub trait LinkSocket: Send + Sync {
    /// Wait for the next frame, up to the implementation's receive timeout
    ///
    /// Returns `Ok(None)` if nothing arrived in time.
    fn recv_frame(&self, buf: &mut [u8]) -> Result<Option<usize>, LinkError>;

    /// Transmit one frame
    fn send_frame(&self, frame: &[u8]) -> Result<(), LinkError>;
}
