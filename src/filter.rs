//! Per-session filters.
//!
//! [`PidFilter`] remembers which pids already had their name recorded.
//! [`PacketFilter`] selects network packets by hashing masked header bytes.

use core::sync::atomic::{AtomicU64, Ordering};

const PID_FILTER_WORDS: usize = 1024;

/// One bit per low-16 pid value.
pub struct PidFilter {
    bits: [AtomicU64; PID_FILTER_WORDS],
}

impl PidFilter {
    pub const fn new() -> Self {
        Self {
            bits: [const { AtomicU64::new(0) }; PID_FILTER_WORDS],
        }
    }

    #[inline]
    fn slot(pid: u32) -> (usize, u64) {
        let low = (pid & 0xffff) as usize;
        (low >> 6, 1u64 << (low & 63))
    }

    /// Set the bit for `pid`; true if it was clear.
    pub fn test_and_set(&self, pid: u32) -> bool {
        let (word, bit) = Self::slot(pid);
        self.bits[word].fetch_or(bit, Ordering::Relaxed) & bit == 0
    }

    pub fn contains(&self, pid: u32) -> bool {
        let (word, bit) = Self::slot(pid);
        self.bits[word].load(Ordering::Relaxed) & bit != 0
    }

    pub fn clear(&self) {
        for w in self.bits.iter() {
            w.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for PidFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Packet header bytes covered by the filter.
pub const PACKET_FILTER_BYTES: usize = 24;

pub const DEFAULT_PKT_MASK: i64 = 0x0000_000f;
pub const DEFAULT_PKT_MATCH: i64 = 0xd1c5_17e5;

/// Mask/match hash over the first 24 bytes of a packet payload.
///
/// Bit `i` of `pktmask` selects byte `i`. The selected bytes, as three
/// little-endian words, are XORed into `init`; the packet matches when the
/// folded 32-bit hash is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketFilter {
    pub masks: [u64; 3],
    pub init: u64,
}

impl PacketFilter {
    /// Build from the `pktmask`/`pktmatch` parameters.
    ///
    /// Mask 0 matches nothing and mask -1 matches everything.
    pub fn from_params(mask: i64, matching: i64) -> Self {
        match mask {
            0 => Self {
                masks: [0; 3],
                init: 1,
            },
            -1 => Self {
                masks: [0; 3],
                init: 0,
            },
            _ => {
                let mut masks = [0u64; 3];
                for i in 0..PACKET_FILTER_BYTES {
                    if mask & (1 << i) != 0 {
                        masks[i / 8] |= 0xff << ((i % 8) * 8);
                    }
                }
                Self {
                    masks,
                    init: matching as u32 as u64,
                }
            }
        }
    }

    /// True if the packet should be traced. Short payloads are zero padded.
    pub fn matches(&self, payload: &[u8]) -> bool {
        let mut hash = self.init;
        for (i, mask) in self.masks.iter().enumerate() {
            let mut word = [0u8; 8];
            if let Some(bytes) = payload.get(i * 8..) {
                let n = bytes.len().min(8);
                word[..n].copy_from_slice(&bytes[..n]);
            }
            hash ^= u64::from_le_bytes(word) & mask;
        }
        hash ^= hash >> 32;
        hash & 0xffff_ffff == 0
    }
}

impl Default for PacketFilter {
    fn default() -> Self {
        Self::from_params(DEFAULT_PKT_MASK, DEFAULT_PKT_MATCH)
    }
}
