//! Block initialization.
//!
//! A new block gets, in order:
//!
//! ```text
//!  [0]     cpu | extended timestamp
//!  [1]     flags | wall clock (0)
//!  [2..8]  six zero words, very first block only
//!  [..]    pid, 0, name[0..8], name[8..16]
//!  ...     records
//!  [-8..]  eight zero words
//! ```

use core::sync::atomic::Ordering;

use crate::Tracer;
use crate::arena::{BLOCK_WORDS, BlockOpen};
use crate::claim::CpuCursor;
use crate::codec::BlockHeader;
use crate::platform::Platform;

/// Words reserved for the start/stop wall-clock pairs in the first block.
const FIRST_BLOCK_EXTRA_WORDS: usize = 6;

/// Zero words at the end of every block.
pub const SENTINEL_WORDS: usize = 8;

/// Carries the high bits of the block timestamp across counter wraps.
///
/// Guarded by the frontier lock.
#[derive(Debug, Default)]
pub struct BlockClock {
    prior: u64,
}

impl BlockClock {
    pub const fn new() -> Self {
        Self { prior: 0 }
    }

    pub fn reset(&mut self) {
        self.prior = 0;
    }

    /// Extend a `bits`-wide counter reading so block timestamps never go
    /// backwards.
    pub fn stamp(&mut self, raw: u64, bits: u32) -> u64 {
        let (wrap_mask, wrap_increase) = if bits >= 64 {
            (0, 0)
        } else {
            (!((1u64 << bits) - 1), 1u64 << bits)
        };
        let mut counter = raw | (self.prior & wrap_mask);
        if counter < self.prior {
            counter = counter.wrapping_add(wrap_increase);
        }
        self.prior = counter;
        counter
    }
}

impl<P: Platform> Tracer<P> {
    /// Fill in the header of a block just taken off the frontier and mark it
    /// open. Returns the first record slot.
    ///
    /// Called with the frontier lock held and before the cursor points at
    /// the block.
    pub(crate) fn init_block(
        &self,
        clock: &mut BlockClock,
        cpu: usize,
        cursor: &CpuCursor,
        open: BlockOpen,
    ) -> usize {
        let arena = self.arena();
        let platform = self.platform();
        let start = open.start;

        let timestamp = clock.stamp(platform.timecount(), platform.counter_bits());
        let [w0, w1] = BlockHeader {
            cpu: cpu as u8,
            timestamp,
            flags: self.session_flags(),
            wall_clock: 0,
        }
        .encode();
        arena.set_word(start, w0);
        arena.set_word(start + 1, w1);

        let mut slot = start + 2;
        if open.very_first {
            arena.zero(slot..slot + FIRST_BLOCK_EXTRA_WORDS);
            slot += FIRST_BLOCK_EXTRA_WORDS;
        }

        let task = platform.current_task();
        let (lo, hi) = task.name.split_at(8);
        arena.set_word(slot, task.pid as u64);
        arena.set_word(slot + 1, 0);
        arena.set_word(slot + 2, u64::from_le_bytes(lo.try_into().unwrap_or([0; 8])));
        arena.set_word(slot + 3, u64::from_le_bytes(hi.try_into().unwrap_or([0; 8])));
        slot += 4;

        arena.zero(start + BLOCK_WORDS - SENTINEL_WORDS..start + BLOCK_WORDS);

        if !cursor.counters_ready.swap(true, Ordering::Relaxed) {
            platform.setup_counters(cpu);
        }

        arena.open_fill(arena.block_of(start));
        trace!(
            "block {} opened by cpu {} at ts {:#x}",
            arena.block_of(start),
            cpu,
            timestamp
        );
        slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wide_counter_passes_through() {
        let mut c = BlockClock::new();
        assert_eq!(c.stamp(100, 64), 100);
        assert_eq!(c.stamp(50, 64), 50);
    }

    #[test]
    fn test_narrow_counter_carries_high_bits() {
        let mut c = BlockClock::new();
        assert_eq!(c.stamp(0xffff_fff0, 32), 0xffff_fff0);
        // counter wrapped to a small value
        assert_eq!(c.stamp(0x10, 32), 0x1_0000_0010);
        assert_eq!(c.stamp(0x20, 32), 0x1_0000_0020);
        assert_eq!(c.stamp(0x8, 32), 0x2_0000_0008);
    }

    #[test]
    fn test_reset_clears_carry() {
        let mut c = BlockClock::new();
        c.stamp(0xffff_fff0, 32);
        c.stamp(0x10, 32);
        c.reset();
        assert_eq!(c.stamp(0x10, 32), 0x10);
    }
}
