//! Trace arena: one flat region of 64 KiB blocks.
//!
//! Blocks are handed out from the top down. With IPC tracing the bottom
//! eighth (rounded up to whole blocks) is reserved for IPC bytes.
//!
//! ```text
//!  0        limit                 next                         high
//!  |          |                     |                            |
//!  v          v                     v                            v
//!  +----------+------+------+-------+------+------+------+------+
//!  | IPC bytes| free   free   free  |  3      2      1      0   |
//!  +----------+------+------+-------+------+------+------+------+
//!                                   <==== blocks are opened downward
//! ```
//!
//! Block `k` covers words `[high - (k + 1) * BLOCK_WORDS, high - k * BLOCK_WORDS)`.
//! When a wrapping session runs out of blocks it restarts at block 1;
//! block 0 keeps the session's first header.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::ops::Range;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Size of one trace block.
pub const BLOCK_BYTES: usize = 64 * 1024;
/// `u64` words per trace block.
pub const BLOCK_WORDS: usize = BLOCK_BYTES / 8;
/// Words of IPC bytes covering one trace block.
pub const IPC_BLOCK_WORDS: usize = BLOCK_WORDS / 8;
pub const BLOCKS_PER_MIB: usize = (1 << 20) / BLOCK_BYTES;
/// Smallest arena: the first block plus one block to wrap onto.
pub const MIN_BLOCKS: usize = 2;

/// Fill mark of a block some CPU is still claiming from.
pub const OPEN_FILL: usize = usize::MAX;

/// Header words of the session's very first block.
pub const FIRST_HEADER_WORDS: usize = 12;
/// Header words of every other block.
pub const HEADER_WORDS: usize = 6;

/// Header length of block `k`.
#[inline]
pub const fn header_words(k: usize) -> usize {
    if k == 0 { FIRST_HEADER_WORDS } else { HEADER_WORDS }
}

/// Result of taking a block off the frontier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockOpen {
    /// First word of the block.
    pub start: usize,
    /// First block of the session.
    pub very_first: bool,
    /// This opening wrapped around to block 1.
    pub wrapped: bool,
}

/// No block is left and the session does not wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exhausted;

/// The trace log: `blocks * BLOCK_WORDS` atomic words plus the block
/// frontier and per-block fill marks.
///
/// Fill marks are written only when a block is opened or closed, never on
/// the claim fast path.
pub struct Arena {
    words: Box<[AtomicU64]>,
    /// Per block: word offset one past the last record, or [`OPEN_FILL`].
    fill: Box<[AtomicUsize]>,
    high: usize,
    limit: AtomicUsize,
    next: AtomicUsize,
    wrapped: AtomicBool,
    exhausted: AtomicBool,
}

impl Arena {
    pub fn new(blocks: usize) -> Self {
        let words: Vec<AtomicU64> = (0..blocks * BLOCK_WORDS).map(|_| AtomicU64::new(0)).collect();
        let fill: Vec<AtomicUsize> = (0..blocks).map(|_| AtomicUsize::new(0)).collect();
        let high = blocks * BLOCK_WORDS;
        Self {
            words: words.into_boxed_slice(),
            fill: fill.into_boxed_slice(),
            high,
            limit: AtomicUsize::new(0),
            next: AtomicUsize::new(high),
            wrapped: AtomicBool::new(false),
            exhausted: AtomicBool::new(false),
        }
    }

    /// Rewind the frontier to `high`. Tracing must be off.
    pub fn reset(&self, ipc: bool) {
        let limit = if ipc {
            self.blocks().div_ceil(8) * BLOCK_WORDS
        } else {
            0
        };
        self.limit.store(limit, Ordering::Relaxed);
        self.next.store(self.high, Ordering::Relaxed);
        self.wrapped.store(false, Ordering::Relaxed);
        self.exhausted.store(false, Ordering::Relaxed);
        for f in self.fill.iter() {
            f.store(0, Ordering::Relaxed);
        }
    }

    /// Take the next block off the frontier. Caller holds the frontier lock.
    pub fn open_block(&self, wrap: bool) -> Result<BlockOpen, Exhausted> {
        let next = self.next.load(Ordering::Relaxed);
        let limit = self.limit.load(Ordering::Relaxed);
        let very_first = next == self.high;

        if next >= limit + BLOCK_WORDS {
            let start = next - BLOCK_WORDS;
            self.next.store(start, Ordering::Relaxed);
            return Ok(BlockOpen {
                start,
                very_first,
                wrapped: false,
            });
        }

        // block 0 is never reused; with fewer than two usable blocks there
        // is nothing to wrap onto
        if wrap && self.high >= limit + 2 * BLOCK_WORDS {
            let start = self.high - 2 * BLOCK_WORDS;
            self.next.store(start, Ordering::Relaxed);
            self.wrapped.store(true, Ordering::Relaxed);
            return Ok(BlockOpen {
                start,
                very_first: false,
                wrapped: true,
            });
        }

        self.exhausted.store(true, Ordering::Relaxed);
        Err(Exhausted)
    }

    /// Total blocks, including any reserved for IPC bytes.
    pub fn blocks(&self) -> usize {
        self.fill.len()
    }

    /// One past the top word; block 0 ends here.
    pub fn high(&self) -> usize {
        self.high
    }

    /// Lowest word usable for trace blocks. Words below hold IPC bytes.
    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::Relaxed)
    }

    /// First word of the most recently opened block, or `high` after reset.
    pub fn next(&self) -> usize {
        self.next.load(Ordering::Relaxed)
    }

    pub fn is_wrapped(&self) -> bool {
        self.wrapped.load(Ordering::Relaxed)
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::Relaxed)
    }

    // =========================================================================
    // Words
    // =========================================================================

    /// Load word `index` of the arena.
    #[inline]
    pub fn word(&self, index: usize) -> u64 {
        self.words[index].load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_word(&self, index: usize, value: u64) {
        self.words[index].store(value, Ordering::Relaxed);
    }

    #[inline]
    pub fn or_word(&self, index: usize, bits: u64) {
        self.words[index].fetch_or(bits, Ordering::Relaxed);
    }

    pub fn zero(&self, range: Range<usize>) {
        for w in &self.words[range] {
            w.store(0, Ordering::Relaxed);
        }
    }

    // =========================================================================
    // Block Geometry and Fill Marks
    // =========================================================================

    /// Index of the block holding word `index`.
    #[inline]
    pub fn block_of(&self, index: usize) -> usize {
        (self.high - 1 - index) / BLOCK_WORDS
    }

    /// First word of block `k`.
    #[inline]
    pub fn block_start(&self, k: usize) -> usize {
        self.high - (k + 1) * BLOCK_WORDS
    }

    /// Mark block `k` as owned by a CPU that is still writing it.
    pub fn open_fill(&self, k: usize) {
        self.fill[k].store(OPEN_FILL, Ordering::Relaxed);
    }

    /// Close block `k` at word `end`. Only ever lowers the mark, so a late
    /// abandoned claim can trim a block that was already closed.
    pub fn close_fill(&self, k: usize, end: usize) {
        self.fill[k].fetch_min(end.saturating_sub(self.block_start(k)), Ordering::Relaxed);
    }

    /// Offset one past the last record of block `k`, or [`OPEN_FILL`].
    pub fn fill_of(&self, k: usize) -> usize {
        self.fill[k].load(Ordering::Relaxed)
    }

    pub fn is_open(&self, k: usize) -> bool {
        self.fill_of(k) == OPEN_FILL
    }

    /// Words of block `k` that hold records, in storage order, ending at
    /// word `end`. `end` is ignored once the block is closed.
    pub fn record_region(&self, k: usize, end: usize) -> Range<usize> {
        let start = self.block_start(k);
        let hdr = header_words(k);
        let fill = match self.fill_of(k) {
            OPEN_FILL => end.saturating_sub(start).min(BLOCK_WORDS),
            fill => fill,
        };
        start + hdr..start + fill.max(hdr)
    }

    /// Number of blocks opened since reset, capped at the usable count.
    pub fn claimed_blocks(&self) -> usize {
        if self.is_wrapped() || self.is_exhausted() {
            (self.high - self.limit()) / BLOCK_WORDS
        } else {
            (self.high - self.next()) / BLOCK_WORDS
        }
    }

    /// Claimed block indices, most recently opened first.
    pub fn blocks_newest_first(&self) -> impl Iterator<Item = usize> {
        let usable = (self.high - self.limit()) / BLOCK_WORDS;
        let (newer, older) = if self.is_wrapped() {
            // most recent opening sits at `next`; blocks after it are older
            let recent = (self.high - self.next()) / BLOCK_WORDS - 1;
            (1..recent + 1, recent + 1..usable)
        } else {
            (0..self.claimed_blocks(), 0..0)
        };
        let first = self.is_wrapped().then_some(0);
        newer.rev().chain(older.rev()).chain(first)
    }

    // =========================================================================
    // IPC Side Channel
    // =========================================================================

    /// Store the IPC byte of the record starting at word `index`.
    #[inline]
    pub fn set_ipc_byte(&self, index: usize, value: u8) {
        let (word, shift) = (index / 8, (index % 8) * 8);
        let cell = &self.words[word];
        cell.fetch_and(!(0xff << shift), Ordering::Relaxed);
        cell.fetch_or((value as u64) << shift, Ordering::Relaxed);
    }

    #[inline]
    pub fn or_ipc_byte(&self, index: usize, bits: u8) {
        self.words[index / 8].fetch_or((bits as u64) << ((index % 8) * 8), Ordering::Relaxed);
    }

    pub fn ipc_byte(&self, index: usize) -> u8 {
        (self.word(index / 8) >> ((index % 8) * 8)) as u8
    }

    // =========================================================================
    // Raw View (physical block order, down from high)
    // =========================================================================

    /// Physical words of all claimed blocks.
    pub fn raw_count(&self) -> usize {
        self.claimed_blocks() * BLOCK_WORDS
    }

    /// `i`-th physical word, blocks counted down from `high`. 0 past the end.
    pub fn raw_word(&self, i: usize) -> u64 {
        if i >= self.raw_count() {
            return 0;
        }
        self.word(self.block_start(i / BLOCK_WORDS) + i % BLOCK_WORDS)
    }

    /// `i`-th word of IPC bytes, in the same block order as [`raw_word`](Self::raw_word).
    pub fn raw_ipc_word(&self, i: usize) -> u64 {
        if i >= self.raw_count() / 8 {
            return 0;
        }
        let block = i / IPC_BLOCK_WORDS;
        self.word(self.high / 8 - (block + 1) * IPC_BLOCK_WORDS + i % IPC_BLOCK_WORDS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn opens_downward_then_exhausts() {
        let a = Arena::new(3);
        a.reset(false);
        let b0 = a.open_block(false).unwrap();
        assert!(b0.very_first);
        assert_eq!(b0.start, 2 * BLOCK_WORDS);
        let b1 = a.open_block(false).unwrap();
        assert!(!b1.very_first);
        assert_eq!(b1.start, BLOCK_WORDS);
        assert_eq!(a.open_block(false).unwrap().start, 0);
        assert_eq!(a.open_block(false), Err(Exhausted));
        assert!(a.is_exhausted());
        assert_eq!(a.claimed_blocks(), 3);
    }

    #[test]
    fn wrap_restarts_at_block_one() {
        let a = Arena::new(3);
        a.reset(false);
        for _ in 0..3 {
            a.open_block(true).unwrap();
        }
        let w = a.open_block(true).unwrap();
        assert!(w.wrapped);
        assert_eq!(w.start, a.block_start(1));
        assert_eq!(a.blocks_newest_first().collect::<Vec<_>>(), vec![1, 2, 0]);
        a.open_block(true).unwrap();
        assert_eq!(a.blocks_newest_first().collect::<Vec<_>>(), vec![2, 1, 0]);
    }

    #[test]
    fn ipc_reserves_bottom_eighth() {
        let a = Arena::new(32);
        a.reset(true);
        assert_eq!(a.limit(), 4 * BLOCK_WORDS);
        let a = Arena::new(9);
        a.reset(true);
        assert_eq!(a.limit(), 2 * BLOCK_WORDS);
    }

    #[test]
    fn ipc_bytes_share_words() {
        let a = Arena::new(2);
        a.set_ipc_byte(9, 0x05);
        a.set_ipc_byte(10, 0x07);
        a.or_ipc_byte(9, 0x30);
        assert_eq!(a.ipc_byte(9), 0x35);
        assert_eq!(a.ipc_byte(10), 0x07);
        assert_eq!(a.word(1), 0x0007_3500);
        a.set_ipc_byte(9, 0x01);
        assert_eq!(a.ipc_byte(9), 0x01);
    }

    #[test]
    fn open_block_region_follows_end() {
        let a = Arena::new(2);
        let s = a.block_start(1);
        a.open_fill(1);
        assert!(a.is_open(1));
        assert_eq!(a.record_region(1, s + 9), s + HEADER_WORDS..s + 9);
        assert_eq!(a.record_region(1, 0), s + HEADER_WORDS..s + HEADER_WORDS);
    }

    #[test]
    fn close_fill_only_lowers() {
        let a = Arena::new(2);
        let s = a.block_start(1);
        a.open_fill(1);
        a.close_fill(1, s + 12);
        a.close_fill(1, s + 20);
        assert_eq!(a.fill_of(1), 12);
        a.close_fill(1, s + 8);
        assert_eq!(a.record_region(1, s + 30), s + HEADER_WORDS..s + 8);
    }
}
