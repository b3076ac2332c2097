//! Tracer state and the per-event insert paths.
//!
//! # Insert paths
//!
//! - [`Tracer::insert_1`]: one word
//! - [`Tracer::insert_1_retopt`]: a return word, folded into the matching
//!   call when possible
//! - [`Tracer::insert_2`]: two words
//! - [`Tracer::insert_n`] / [`Tracer::insert_n_user`]: 1-8 words, length
//!   taken from the first word
//!
//! Inserts work with tracing off; the `trace_*` hooks check the tracing
//! flag first. All of them return the number of words written and never
//! fail loudly: a full arena or a bad pointer just writes nothing.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};
use spin::Mutex;

use crate::Error;
use crate::arena::Arena;
use crate::block::BlockClock;
use crate::claim::{CpuCursor, UNSET};
use crate::codec::{
    self, FLAG_IPC, FLAG_WRAP, MAX_RECORD_WORDS, encode_call, encode_return, entry_length,
    is_optimizable_return, is_valid_length, retval_fits, try_merge, with_length, with_timestamp,
};
use crate::config::TraceConfig;
use crate::events::PIDNAME_RECORD;
use crate::filter::{PacketFilter, PidFilter};
use crate::ipc;
use crate::platform::{Platform, TASK_NAME_LEN};

/// One tracing engine instance: arena, per-CPU cursors and session flags.
pub struct Tracer<P: Platform> {
    platform: P,
    config: TraceConfig,
    arena: Arena,
    cursors: Box<[CpuCursor]>,
    /// Frontier lock; also guards the block timestamp carry.
    frontier: Mutex<BlockClock>,
    tracing: AtomicBool,
    ipc: AtomicBool,
    wrap: AtomicBool,
    pid_filter: PidFilter,
    packet_filter: PacketFilter,
}

impl<P: Platform> Tracer<P> {
    /// Allocate the arena and reset to a stopped, non-wrapping session.
    pub fn new(platform: P, config: TraceConfig) -> Result<Self, Error> {
        config.validate()?;
        let cursors: Vec<CpuCursor> = (0..config.cpus).map(|_| CpuCursor::new()).collect();
        let tracer = Self {
            platform,
            config,
            arena: Arena::new(config.arena_blocks),
            cursors: cursors.into_boxed_slice(),
            frontier: Mutex::new(BlockClock::new()),
            tracing: AtomicBool::new(false),
            ipc: AtomicBool::new(false),
            wrap: AtomicBool::new(false),
            pid_filter: PidFilter::new(),
            packet_filter: PacketFilter::from_params(config.pkt_mask, config.pkt_match),
        };
        tracer.reset(0)?;
        info!(
            "tracer ready: {} blocks, {} cpus",
            config.arena_blocks, config.cpus
        );
        Ok(tracer)
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn cursors(&self) -> &[CpuCursor] {
        &self.cursors
    }

    pub(crate) fn frontier(&self) -> &Mutex<BlockClock> {
        &self.frontier
    }

    pub fn pid_filter(&self) -> &PidFilter {
        &self.pid_filter
    }

    pub fn packet_filter(&self) -> &PacketFilter {
        &self.packet_filter
    }

    pub fn is_tracing(&self) -> bool {
        self.tracing.load(Ordering::Relaxed)
    }

    /// Returns the previous value.
    pub(crate) fn set_tracing(&self, on: bool) -> bool {
        self.tracing.swap(on, Ordering::Relaxed)
    }

    pub fn ipc_enabled(&self) -> bool {
        self.ipc.load(Ordering::Relaxed)
    }

    pub fn wrap_enabled(&self) -> bool {
        self.wrap.load(Ordering::Relaxed)
    }

    pub(crate) fn set_session_mode(&self, ipc: bool, wrap: bool) {
        self.ipc.store(ipc, Ordering::Relaxed);
        self.wrap.store(wrap, Ordering::Relaxed);
    }

    /// Flags byte stamped into every block header.
    pub fn session_flags(&self) -> u8 {
        let mut flags = 0;
        if self.ipc_enabled() {
            flags |= FLAG_IPC;
        }
        if self.wrap_enabled() {
            flags |= FLAG_WRAP;
        }
        flags
    }

    // =========================================================================
    // Insert Paths
    // =========================================================================

    /// Insert a one-word record. `word` arrives with a zero timestamp.
    pub fn insert_1(&self, word: u64) -> u64 {
        let now = self.platform.timecount();
        self.platform.critical(|| self.insert_1_in(self.platform.cpu_id(), word, now))
    }

    fn insert_1_in(&self, cpu: usize, word: u64, now: u64) -> u64 {
        let Some(claim) = self.claim_in(cpu, 1) else {
            return 0;
        };
        self.arena.set_word(claim.start, with_timestamp(word, now));
        self.annotate(cpu, claim.start, now);
        1
    }

    /// Insert a return word, or fold it into the call word just before it.
    ///
    /// Returns the words written: 1 for a standalone return, 0 when merged
    /// or when nothing could be claimed.
    pub fn insert_1_retopt(&self, word: u64) -> u64 {
        let now = self.platform.timecount();
        self.platform.critical(|| {
            let cpu = self.platform.cpu_id();
            let prior = self.cursors.get(cpu).and_then(|c| prior_word(c).map(|p| (c, p)));
            if let Some((cursor, prior)) = prior {
                let candidate = with_timestamp(word, now);
                if let Some(merged) = try_merge(self.arena.word(prior), candidate) {
                    self.arena.set_word(prior, merged);
                    if self.ipc_enabled() {
                        let bucket = self.ipc_delta(cursor, now);
                        self.arena.or_ipc_byte(prior, bucket << 4);
                    }
                    return 0;
                }
            }
            self.insert_1_in(cpu, word, now)
        })
    }

    /// Insert a two-word record.
    pub fn insert_2(&self, word0: u64, word1: u64) -> u64 {
        let now = self.platform.timecount();
        self.platform.critical(|| {
            let cpu = self.platform.cpu_id();
            let Some(claim) = self.claim_in(cpu, 2) else {
                return 0;
            };
            self.arena.set_word(claim.start, with_timestamp(word0, now));
            self.arena.set_word(claim.start + 1, word1);
            self.annotate(cpu, claim.start, now);
            2
        })
    }

    /// Insert a record of 1-8 words. The length comes from `words[0]`;
    /// missing payload words are written as zero.
    pub fn insert_n(&self, words: &[u64]) -> u64 {
        let Some(&first) = words.first() else {
            self.degrade_bad_length(0);
            return 0;
        };
        let len = entry_length(first);
        if !is_valid_length(len) {
            self.degrade_bad_length(len);
            return 0;
        }

        let now = self.platform.timecount();
        self.platform.critical(|| {
            let cpu = self.platform.cpu_id();
            let Some(claim) = self.claim_in(cpu, len) else {
                return 0;
            };
            self.arena.set_word(claim.start, with_timestamp(first, now));
            for i in 1..len {
                self.arena.set_word(claim.start + i, words.get(i).copied().unwrap_or(0));
            }
            self.annotate(cpu, claim.start, now);
            len as u64
        })
    }

    /// Insert a record read from eight words of user memory at `addr`.
    ///
    /// The copy happens before any lock is taken. A faulting copy inserts
    /// nothing and leaves tracing on.
    pub fn insert_n_user(&self, addr: u64) -> u64 {
        let mut temp = [0u64; MAX_RECORD_WORDS];
        if self.platform.copy_from_user(addr, &mut temp).is_err() {
            return 0;
        }
        self.insert_n(&temp)
    }

    /// Store the IPC bucket of the record at `index` when IPC is on.
    fn annotate(&self, cpu: usize, index: usize, now: u64) {
        if !self.ipc_enabled() {
            return;
        }
        if let Some(cursor) = self.cursors.get(cpu) {
            let bucket = self.ipc_delta(cursor, now);
            self.arena.set_ipc_byte(index, bucket);
        }
    }

    /// IPC bucket since this CPU's previous annotated event.
    fn ipc_delta(&self, cursor: &CpuCursor, now: u64) -> u8 {
        // the first delta after reset is large; it is not worth special-casing
        let delta_cycles = now.wrapping_sub(cursor.prior_cycles.swap(now, Ordering::Relaxed));
        let inst = self.platform.inst_retired();
        let delta_inst = inst.wrapping_sub(cursor.prior_inst_retired.swap(inst, Ordering::Relaxed));
        ipc::granular(delta_inst, delta_cycles)
    }

    // =========================================================================
    // Event Hooks
    // =========================================================================

    /// Record a one-word event. Callers keep syscall args to 16 bits and
    /// other args to 32 bits.
    pub fn trace_1(&self, event: u64, arg: u64) {
        if !self.is_tracing() {
            return;
        }
        if is_optimizable_return(event) && retval_fits(arg as i64) {
            self.insert_1_retopt(encode_return(event, arg as i64));
        } else {
            self.insert_1(encode_call(event, arg));
        }
    }

    /// Record a program-counter sample with the current CPU frequency.
    pub fn trace_2(&self, event: u64, pc: u64) {
        if !self.is_tracing() {
            return;
        }
        let freq = self.platform.cpu_freq_mhz();
        self.insert_2(encode_call(event, freq), pc);
    }

    /// Record a multi-word event. The length of `words` is ORed into the
    /// event code; `words[0]` supplies the argument bits.
    pub fn trace_many(&self, event: u64, words: &[u64]) {
        if !self.is_tracing() {
            return;
        }
        let len = words.len();
        if !is_valid_length(len) {
            self.degrade_bad_length(len);
            return;
        }
        let mut temp = [0u64; MAX_RECORD_WORDS];
        temp[..len].copy_from_slice(words);
        temp[0] |= with_length(event, len) << codec::EVENT_SHIFT;
        self.insert_n(&temp[..len]);
    }

    /// Record the name of `pid` unless it was already recorded this
    /// session (or since the last wraparound). Returns true if a record
    /// was written.
    pub fn trace_pid_name(&self, pid: u32, name: &[u8; TASK_NAME_LEN]) -> bool {
        if !self.is_tracing() {
            return false;
        }
        if !self.pid_filter.test_and_set(pid) {
            return false;
        }
        let (lo, hi) = name.split_at(8);
        let record = [
            encode_call(PIDNAME_RECORD, pid as u64 & codec::ARG_MASK),
            u64::from_le_bytes(lo.try_into().unwrap_or([0; 8])),
            u64::from_le_bytes(hi.try_into().unwrap_or([0; 8])),
        ];
        self.insert_n(&record) != 0
    }
}

/// Index of the word written just before the cursor, if it is in the
/// current block.
fn prior_word(cursor: &CpuCursor) -> Option<usize> {
    let next = cursor.next.load(Ordering::Acquire);
    let limit = cursor.limit.load(Ordering::Acquire);
    if limit != UNSET && next < limit {
        Some(next - 1)
    } else {
        None
    }
}
