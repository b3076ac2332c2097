//! Per-CPU claim allocator.
//!
//! Each CPU owns a cursor into its current block. Claims are normally a
//! single `fetch_add` on the cursor. An interrupt on the same CPU may claim
//! between our `fetch_add` and the re-read of `limit`, and may even open a
//! new block; the re-read detects that case. Running off the end of a
//! block takes the slow path, which opens a new block under the global
//! frontier lock.

use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crate::Tracer;
use crate::arena::{BLOCK_WORDS, Exhausted, header_words};
use crate::codec::is_valid_length;
use crate::platform::Platform;

/// Cursor value before the CPU has a block.
pub const UNSET: usize = 0;

/// Per-CPU allocation state. Aligned to a cache line so that CPUs only
/// ever share the frontier lock.
#[derive(Debug, Default)]
#[repr(align(64))]
pub struct CpuCursor {
    /// Next free word in the current block.
    pub(crate) next: AtomicUsize,
    /// One past the last word of the current block.
    pub(crate) limit: AtomicUsize,
    pub(crate) prior_cycles: AtomicU64,
    pub(crate) prior_inst_retired: AtomicU64,
    pub(crate) counters_ready: AtomicBool,
}

impl CpuCursor {
    pub const fn new() -> Self {
        Self {
            next: AtomicUsize::new(UNSET),
            limit: AtomicUsize::new(UNSET),
            prior_cycles: AtomicU64::new(0),
            prior_inst_retired: AtomicU64::new(0),
            counters_ready: AtomicBool::new(false),
        }
    }

    pub(crate) fn reset(&self) {
        self.next.store(UNSET, Ordering::Relaxed);
        self.limit.store(UNSET, Ordering::Relaxed);
        self.prior_cycles.store(0, Ordering::Relaxed);
        self.prior_inst_retired.store(0, Ordering::Relaxed);
        self.counters_ready.store(false, Ordering::Relaxed);
    }

    pub fn next(&self) -> usize {
        self.next.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::Acquire)
    }
}

/// Words reserved for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    pub start: usize,
    pub len: usize,
}

impl Claim {
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

/// Outcome of one fast-path attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastCheck {
    /// The claim fits in the block it landed in.
    Accept,
    /// An interrupt moved the cursor to a block the claim is not in.
    Retry,
    /// The claim runs into the end of its block.
    Overflow,
}

/// Judge a fast-path claim from the limits read before and after the
/// `fetch_add` that returned `myclaim`.
///
/// A claim that ends exactly at the limit overflows: the last word of a
/// block is never handed out.
#[inline]
pub fn check_fast_claim(limit: usize, limit_again: usize, myclaim: usize, len: usize) -> FastCheck {
    if limit_again == UNSET {
        return FastCheck::Retry;
    }
    if limit != limit_again {
        let in_new_block = limit_again - BLOCK_WORDS <= myclaim && myclaim < limit_again;
        if !in_new_block {
            return FastCheck::Retry;
        }
    }
    if myclaim + len >= limit_again {
        FastCheck::Overflow
    } else {
        FastCheck::Accept
    }
}

impl<P: Platform> Tracer<P> {
    /// Reserve `len` (1..=8) contiguous words for `cpu`.
    ///
    /// Works with tracing off. Returns `None` when the arena is full in
    /// stop mode, `cpu` is out of range, or `len` is invalid, which also
    /// turns tracing off.
    pub fn claim(&self, cpu: usize, len: usize) -> Option<Claim> {
        self.platform().critical(|| self.claim_in(cpu, len))
    }

    /// [`claim`](Self::claim) without entering the critical section.
    pub(crate) fn claim_in(&self, cpu: usize, len: usize) -> Option<Claim> {
        if !is_valid_length(len) {
            self.degrade_bad_length(len);
            return None;
        }
        let cursor = self.cursors().get(cpu)?;

        loop {
            let limit = cursor.limit.load(Ordering::Acquire);
            if limit == UNSET {
                return self.slow_claim(cpu, cursor, len, None);
            }
            let myclaim = cursor.next.fetch_add(len, Ordering::AcqRel);
            let limit_again = cursor.limit.load(Ordering::Acquire);

            match check_fast_claim(limit, limit_again, myclaim, len) {
                FastCheck::Accept => return Some(Claim { start: myclaim, len }),
                FastCheck::Retry => {
                    self.abandon(limit, limit_again, myclaim);
                    continue;
                }
                FastCheck::Overflow => {
                    return self.slow_claim(cpu, cursor, len, Some((limit_again, myclaim)));
                }
            }
        }
    }

    /// Trim the block an interrupted claim landed in. The interrupt has
    /// already closed it, so the words from `myclaim` on hold no record.
    #[cold]
    fn abandon(&self, limit: usize, limit_again: usize, myclaim: usize) {
        if limit_again == UNSET || !(limit - BLOCK_WORDS..limit).contains(&myclaim) {
            return;
        }
        let arena = self.arena();
        let k = arena.block_of(limit - 1);
        if myclaim >= arena.block_start(k) + header_words(k) {
            arena.close_fill(k, myclaim);
        }
    }

    /// Open a new block for `cpu` under the frontier lock. `overflow` is the
    /// limit and start of a fast-path claim that ran off its block.
    fn slow_claim(
        &self,
        cpu: usize,
        cursor: &CpuCursor,
        len: usize,
        overflow: Option<(usize, usize)>,
    ) -> Option<Claim> {
        let mut clock = self.frontier().lock();
        let arena = self.arena();

        if let Some((old_limit, start)) = overflow {
            arena.close_fill(arena.block_of(old_limit - 1), start.min(old_limit));
        }

        // an interrupt may have opened a fresh block while we waited
        let limit = cursor.limit.load(Ordering::Acquire);
        let myclaim = cursor.next.fetch_add(len, Ordering::AcqRel);
        if limit != UNSET {
            if myclaim + len < limit {
                return Some(Claim { start: myclaim, len });
            }
            arena.close_fill(arena.block_of(limit - 1), myclaim.min(limit));
        }

        let open = match arena.open_block(self.wrap_enabled()) {
            Ok(open) => open,
            Err(Exhausted) => {
                if self.set_tracing(false) {
                    info!("trace arena full, tracing stopped");
                }
                return None;
            }
        };
        if open.wrapped {
            self.pid_filter().clear();
            info!("trace arena wrapped, pid filter cleared");
        }

        let slot = self.init_block(&mut clock, cpu, cursor, open);
        cursor.next.store(slot + len, Ordering::Release);
        cursor.limit.store(open.start + BLOCK_WORDS, Ordering::Release);
        Some(Claim { start: slot, len })
    }

    pub(crate) fn degrade_bad_length(&self, len: usize) {
        self.set_tracing(false);
        warn!("bad record length {}, tracing stopped", len);
    }
}
