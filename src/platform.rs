//! Platform abstraction layer for the tracer's hardware collaborators.
//!
//! The trace engine never reads registers itself. The time counter, the
//! instructions-retired counter, the CPU frequency, the current task and
//! the interrupt-disable primitive all come through [`Platform`], so the
//! claim allocator does not depend on which backend is active. Host builds
//! and tests use [`MockPlatform`].

use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use spin::Mutex;

use crate::Error;

/// Length of the process-name snapshot stored in every block.
pub const TASK_NAME_LEN: usize = 16;

/// Identity of the task running on a CPU when a block is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskIdentity {
    pub pid: u32,
    /// Name bytes, NUL padded.
    pub name: [u8; TASK_NAME_LEN],
}

impl TaskIdentity {
    /// Idle/unknown context: pid 0, empty name.
    pub const fn idle() -> Self {
        Self {
            pid: 0,
            name: [0; TASK_NAME_LEN],
        }
    }

    /// Build an identity, truncating `name` to 16 bytes.
    pub fn new(pid: u32, name: &str) -> Self {
        let mut buf = [0u8; TASK_NAME_LEN];
        let len = name.len().min(TASK_NAME_LEN);
        buf[..len].copy_from_slice(&name.as_bytes()[..len]);
        Self { pid, name: buf }
    }

    /// Name without NUL padding. Non-UTF-8 names read as empty.
    pub fn name_str(&self) -> &str {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(TASK_NAME_LEN);
        core::str::from_utf8(&self.name[..end]).unwrap_or("")
    }
}

/// Platform operations trait.
///
/// Abstracts over architecture-specific counters and kernel primitives.
pub trait Platform: Sync {
    /// Free-running time counter, ideally 16-32 ns per count.
    fn timecount(&self) -> u64;

    /// Width of the time counter in bits. Narrow counters wrap, and block
    /// timestamps are extended past the wrap.
    fn counter_bits(&self) -> u32 {
        64
    }

    /// Instructions-retired counter, 0 when unavailable.
    fn inst_retired(&self) -> u64 {
        0
    }

    /// Current CPU frequency in MHz, 0 when unavailable.
    fn cpu_freq_mhz(&self) -> u64 {
        0
    }

    /// Logical id of the CPU running the caller.
    fn cpu_id(&self) -> usize;

    /// Task running on the current CPU.
    fn current_task(&self) -> TaskIdentity {
        TaskIdentity::idle()
    }

    /// One-time per-CPU counter setup, called from the first block a CPU
    /// opens after a reset.
    fn setup_counters(&self, _cpu: usize) {}

    /// Run `f` with preemption and local interrupts disabled.
    fn critical<R>(&self, f: impl FnOnce() -> R) -> R;

    /// Copy eight words from user memory at `addr`.
    fn copy_from_user(&self, addr: u64, _dst: &mut [u64; 8]) -> Result<(), Error> {
        Err(Error::BadAddress(addr))
    }
}

// =============================================================================
// Mock Implementation (host builds and tests)
// =============================================================================

/// Mock platform backed by atomic counters.
///
/// Time and instruction counters advance by a configurable step on every
/// read (0 by default, so values only change when a test says so).
pub struct MockPlatform {
    time: AtomicU64,
    time_step: AtomicU64,
    inst: AtomicU64,
    inst_step: AtomicU64,
    freq_mhz: AtomicU64,
    counter_bits: AtomicU32,
    cpu: AtomicUsize,
    task: Mutex<TaskIdentity>,
    setup_calls: Mutex<alloc::vec::Vec<usize>>,
    user_memory: Mutex<BTreeMap<u64, [u64; 8]>>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            time: AtomicU64::new(0),
            time_step: AtomicU64::new(0),
            inst: AtomicU64::new(0),
            inst_step: AtomicU64::new(0),
            freq_mhz: AtomicU64::new(0),
            counter_bits: AtomicU32::new(64),
            cpu: AtomicUsize::new(0),
            task: Mutex::new(TaskIdentity::idle()),
            setup_calls: Mutex::new(alloc::vec::Vec::new()),
            user_memory: Mutex::new(BTreeMap::new()),
        }
    }

    /// Set mock time counter.
    pub fn set_time(&self, count: u64) {
        self.time.store(count, Ordering::Relaxed);
    }

    /// Advance mock time counter.
    pub fn advance_time(&self, counts: u64) {
        self.time.fetch_add(counts, Ordering::Relaxed);
    }

    /// Advance the time counter by `step` after every read.
    pub fn set_time_step(&self, step: u64) {
        self.time_step.store(step, Ordering::Relaxed);
    }

    /// Set mock instructions-retired counter.
    pub fn set_inst_retired(&self, count: u64) {
        self.inst.store(count, Ordering::Relaxed);
    }

    /// Advance the instructions-retired counter by `step` after every read.
    pub fn set_inst_step(&self, step: u64) {
        self.inst_step.store(step, Ordering::Relaxed);
    }

    pub fn set_cpu_freq_mhz(&self, mhz: u64) {
        self.freq_mhz.store(mhz, Ordering::Relaxed);
    }

    /// Emulate a narrow time counter. Reads are masked to `bits`.
    pub fn set_counter_bits(&self, bits: u32) {
        self.counter_bits.store(bits.clamp(1, 64), Ordering::Relaxed);
    }

    /// Set mock CPU ID.
    pub fn set_cpu_id(&self, cpu: usize) {
        self.cpu.store(cpu, Ordering::Relaxed);
    }

    pub fn set_task(&self, task: TaskIdentity) {
        *self.task.lock() = task;
    }

    /// CPUs that ran counter setup, in call order.
    pub fn setup_calls(&self) -> alloc::vec::Vec<usize> {
        self.setup_calls.lock().clone()
    }

    /// Make eight words readable at user address `addr`.
    pub fn map_user(&self, addr: u64, words: [u64; 8]) {
        self.user_memory.lock().insert(addr, words);
    }
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for MockPlatform {
    fn timecount(&self) -> u64 {
        let step = self.time_step.load(Ordering::Relaxed);
        let raw = self.time.fetch_add(step, Ordering::Relaxed);
        match self.counter_bits.load(Ordering::Relaxed) {
            64 => raw,
            bits => raw & ((1u64 << bits) - 1),
        }
    }

    fn counter_bits(&self) -> u32 {
        self.counter_bits.load(Ordering::Relaxed)
    }

    fn inst_retired(&self) -> u64 {
        let step = self.inst_step.load(Ordering::Relaxed);
        self.inst.fetch_add(step, Ordering::Relaxed)
    }

    fn cpu_freq_mhz(&self) -> u64 {
        self.freq_mhz.load(Ordering::Relaxed)
    }

    fn cpu_id(&self) -> usize {
        self.cpu.load(Ordering::Relaxed)
    }

    fn current_task(&self) -> TaskIdentity {
        *self.task.lock()
    }

    fn setup_counters(&self, cpu: usize) {
        self.setup_calls.lock().push(cpu);
    }

    fn critical<R>(&self, f: impl FnOnce() -> R) -> R {
        f()
    }

    fn copy_from_user(&self, addr: u64, dst: &mut [u64; 8]) -> Result<(), Error> {
        match self.user_memory.lock().get(&addr) {
            Some(words) => {
                *dst = *words;
                Ok(())
            }
            None => Err(Error::BadAddress(addr)),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
