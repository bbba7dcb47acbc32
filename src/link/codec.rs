//! Payload formats carried over the link
//!
//! Inbound sample payloads start with a 6-byte header the device fills but we do
//! not interpret, followed by 6-byte stereo groups: a big-endian 24-bit
//! two's-complement left sample, then the right sample. Outbound register
//! payloads are the twelve register words, big-endian, in index order.

use crate::registers::REGISTER_COUNT;

pub const AUDIO_HEADER_LEN: usize = 6;
pub const STEREO_GROUP_LEN: usize = 6;

/// Left/right samples decoded from one frame
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StereoBatch {
    pub left: Vec<i32>,
    pub right: Vec<i32>,
}

impl StereoBatch {
    pub fn with_capacity(pairs: usize) -> Self {
        Self {
            left: Vec::with_capacity(pairs),
            right: Vec::with_capacity(pairs),
        }
    }

    /// Number of stereo pairs
    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }
}

/// Widen a big-endian 24-bit two's-complement value to `i32`
pub fn sign_extend_24(bytes: [u8; 3]) -> i32 {
    let raw = i32::from(bytes[0]) << 16 | i32::from(bytes[1]) << 8 | i32::from(bytes[2]);
    (raw ^ 0x80_0000) - 0x80_0000
}

/// Decode a sample payload; a trailing partial group is ignored
pub fn decode_audio_payload(payload: &[u8]) -> StereoBatch {
    let body = payload.get(AUDIO_HEADER_LEN..).unwrap_or_default();
    let groups = body.chunks_exact(STEREO_GROUP_LEN);

    let mut batch = StereoBatch::with_capacity(groups.len());
    for group in groups {
        batch.left.push(sign_extend_24([group[0], group[1], group[2]]));
        batch.right.push(sign_extend_24([group[3], group[4], group[5]]));
    }
    batch
}

/// Serialize the register bank as big-endian words
pub fn encode_register_payload(values: &[u32; REGISTER_COUNT]) -> Vec<u8> {
    values.iter().flat_map(|value| value.to_be_bytes()).collect()
}
