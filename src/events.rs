//! Event-code numbering.
//!
//! Event codes are 12 bits. The ranges group events by kind:
//!
//! - `0x000..=0x00F`: one-word control events
//! - `0x010..=0x1FF`: variable-length records, length in bits 7..4
//! - `0x200..=0x3FF`: one-word point events (context switch, marks)
//! - `0x400..=0x7FF`: traps and interrupts, with `0x200` marking the return
//! - `0x800..=0xFFF`: syscalls, low bits are the syscall number

use crate::codec::with_length;

pub const NOP: u64 = 0x000;
pub const RDTSC_PAIR: u64 = 0x001;

// Name records. The base is ORed with the record length.
pub const PIDNAME: u64 = 0x002;
pub const METHODNAME: u64 = 0x003;
pub const TRAPNAME: u64 = 0x004;
pub const INTERRUPTNAME: u64 = 0x005;
pub const TIMEPAIR: u64 = 0x006;
pub const LOCKNAME: u64 = 0x007;
pub const SYSCALLNAME: u64 = 0x008;

/// Two-word program-counter sample, CPU frequency in the arg field.
pub const PC_SAMPLE: u64 = 0x120;

// Point events
pub const USERPID: u64 = 0x200;
pub const RUNNABLE: u64 = 0x206;
pub const IPI: u64 = 0x207;
pub const MWAIT: u64 = 0x208;
pub const PSTATE: u64 = 0x209;
pub const MARK_A: u64 = 0x20a;
pub const MARK_B: u64 = 0x20b;
pub const MARK_C: u64 = 0x20c;
pub const MARK_D: u64 = 0x20d;

// Call/return pairs
pub const TRAP: u64 = 0x400;
pub const IRQ: u64 = 0x500;
pub const TRAP_RET: u64 = 0x600;
pub const IRQ_RET: u64 = 0x700;
pub const SYSCALL64: u64 = 0x800;
pub const SYSRET64: u64 = 0xa00;
pub const SYSCALL32: u64 = 0xc00;
pub const SYSRET32: u64 = 0xe00;

/// Number of syscall slots in each syscall class.
pub const MAX_SYSCALL_NUMBER: u64 = 0x1ff;

/// Event code of a name record of `len` words.
#[inline]
pub const fn name_event(base: u64, len: usize) -> u64 {
    with_length(base, len)
}

/// Pid-name record: event, pid, 16-byte name.
pub const PIDNAME_RECORD: u64 = name_event(PIDNAME, 3);

/// Short name of an event code for diagnostics.
pub fn event_name(event: u64) -> &'static str {
    match event {
        NOP => "nop",
        RDTSC_PAIR => "rdtsc_pair",
        0x010..=0x1ff => match event & !0xf0 {
            PIDNAME => "pidname",
            METHODNAME => "methodname",
            TRAPNAME => "trapname",
            INTERRUPTNAME => "irqname",
            TIMEPAIR => "timepair",
            LOCKNAME => "lockname",
            SYSCALLNAME => "syscallname",
            0x100 => "pc_sample",
            _ => "record",
        },
        USERPID => "userpid",
        RUNNABLE => "runnable",
        IPI => "ipi",
        MWAIT => "mwait",
        PSTATE => "pstate",
        MARK_A => "mark_a",
        MARK_B => "mark_b",
        MARK_C => "mark_c",
        MARK_D => "mark_d",
        0x400..=0x4ff => "trap",
        0x500..=0x5ff => "irq",
        0x600..=0x6ff => "trap_ret",
        0x700..=0x7ff => "irq_ret",
        0x800..=0x9ff => "syscall64",
        0xa00..=0xbff => "sysret64",
        0xc00..=0xdff => "syscall32",
        0xe00..=0xfff => "sysret32",
        _ => "unknown",
    }
}
