//! Trace record and block header bit layouts.
//!
//! Every record starts with one 64-bit word:
//!
//! ```text
//!  +-------------------+-----------+-------+-------+---------------+
//!  | timestamp         | event     | delta | retval|      arg      |
//!  +-------------------+-----------+-------+-------+---------------+
//!           20              12         8       8           16
//! ```
//!
//! `delta` and `retval` are zero except in a call record that absorbed its
//! matching return. Events `0x010..=0x1FF` carry the record length (1-8
//! words) in bits 7..4 of the event code; all other events are one word.
//!
//! The first two words of every block:
//!
//! ```text
//!  +-------+-------------------------------------------------------+
//!  |  cpu  |  full timestamp                                       |
//!  +-------+-------------------------------------------------------+
//!  | flags |  wall-clock value, filled in at export                |
//!  +-------+-------------------------------------------------------+
//!        56                                                       0
//! ```

pub const ARG_MASK: u64 = 0x0000_0000_0000_ffff;
pub const RETVAL_MASK: u64 = 0x0000_0000_00ff_0000;
pub const DELTA_MASK: u64 = 0x0000_0000_ff00_0000;
pub const EVENT_MASK: u64 = 0x0000_0fff_0000_0000;
pub const TIMESTAMP_MASK: u64 = 0xffff_f000_0000_0000;
pub const EVENT_DELTA_RETVAL_MASK: u64 = EVENT_MASK | DELTA_MASK | RETVAL_MASK;
/// Return bit, in word position.
pub const EVENT_RETURN_BIT: u64 = 0x0000_0200_0000_0000;

pub const RETVAL_SHIFT: u32 = 16;
pub const DELTA_SHIFT: u32 = 24;
pub const EVENT_SHIFT: u32 = 32;
pub const TIMESTAMP_SHIFT: u32 = 44;

pub const UNSHIFTED_EVENT_MASK: u64 = 0xfff;
pub const UNSHIFTED_TIMESTAMP_MASK: u64 = 0xf_ffff;
/// Return bit, in event-code position.
pub const UNSHIFTED_EVENT_RETURN_BIT: u64 = 0x200;
/// Event classes (trap, irq, syscall) whose returns can merge into calls.
pub const UNSHIFTED_EVENT_HAS_RETURN_MASK: u64 = 0xc00;

pub const MIN_EVENT_WITH_LENGTH: u64 = 0x010;
pub const MAX_EVENT_WITH_LENGTH: u64 = 0x1ff;
pub const EVENT_LENGTH_FIELD_SHIFT: u32 = 4;
pub const EVENT_LENGTH_FIELD_MASK: u64 = 0xf;

pub const MAX_DELTA_VALUE: u64 = 255;
pub const MAX_RECORD_WORDS: usize = 8;

pub const FULL_TIMESTAMP_MASK: u64 = 0x00ff_ffff_ffff_ffff;
pub const WALL_CLOCK_MASK: u64 = 0x00ff_ffff_ffff_ffff;
pub const CPU_NUMBER_SHIFT: u32 = 56;
pub const FLAGS_SHIFT: u32 = 56;

/// Block flag: IPC side channel is being written.
pub const FLAG_IPC: u8 = 0x80;
/// Block flag: the session overwrites old blocks when full.
pub const FLAG_WRAP: u8 = 0x40;

/// True for lengths a single record can have.
#[inline]
pub const fn is_valid_length(len: usize) -> bool {
    len >= 1 && len <= MAX_RECORD_WORDS
}

/// Word 0 of a call-style record, timestamp still zero.
///
/// `arg` keeps 32 bits: events that never merge use the delta/retval
/// bytes as a wider argument. Syscall callers keep it to 16 bits.
#[inline]
pub const fn encode_call(event: u64, arg: u64) -> u64 {
    ((event & UNSHIFTED_EVENT_MASK) << EVENT_SHIFT) | (arg & 0xffff_ffff)
}

/// Word 0 of a return record carrying the truncated return value.
#[inline]
pub const fn encode_return(event: u64, retval: i64) -> u64 {
    ((event & UNSHIFTED_EVENT_MASK) << EVENT_SHIFT) | (retval as u64 & ARG_MASK)
}

/// Stamp the low 20 bits of `now` into a record's first word.
#[inline]
pub const fn with_timestamp(word: u64, now: u64) -> u64 {
    (word & !TIMESTAMP_MASK) | (now << TIMESTAMP_SHIFT)
}

#[inline]
pub const fn event_of(word: u64) -> u64 {
    (word >> EVENT_SHIFT) & UNSHIFTED_EVENT_MASK
}

/// Full 32-bit argument of a word 0 whose event does not merge.
#[inline]
pub const fn arg32_of(word: u64) -> u32 {
    word as u32
}

#[inline]
pub const fn timestamp_of(word: u64) -> u64 {
    word >> TIMESTAMP_SHIFT
}

/// Record length in words, derived from the event code of word 0.
///
/// Events outside `0x010..=0x1FF` are one word. Inside the range the
/// length nibble is returned as is, so a zero or oversized nibble comes
/// back unchanged and the insert paths reject it.
#[inline]
pub const fn entry_length(word0: u64) -> usize {
    let n = event_of(word0);
    if n < MIN_EVENT_WITH_LENGTH || n > MAX_EVENT_WITH_LENGTH {
        return 1;
    }
    ((n >> EVENT_LENGTH_FIELD_SHIFT) & EVENT_LENGTH_FIELD_MASK) as usize
}

/// Event code of a multi-word record: `base` with `len` in the length nibble.
#[inline]
pub const fn with_length(base: u64, len: usize) -> u64 {
    (base | ((len as u64) << EVENT_LENGTH_FIELD_SHIFT)) & UNSHIFTED_EVENT_MASK
}

/// Signed value is representable in one byte, [-128, 127].
#[inline]
pub const fn retval_fits(value: i64) -> bool {
    (value.wrapping_add(128) as u64) & !0xff == 0
}

/// Return events of trap, interrupt and syscall classes.
#[inline]
pub const fn is_optimizable_return(event: u64) -> bool {
    event & UNSHIFTED_EVENT_RETURN_BIT != 0 && event & UNSHIFTED_EVENT_HAS_RETURN_MASK != 0
}

/// Fold a timestamped return word into the call word just before it.
///
/// Succeeds when the events differ only in the return bit, neither word
/// carries delta/retval bits, the return value fits a signed byte and the
/// elapsed time (mod 2^20, zero bumped to one) fits eight bits.
pub fn try_merge(prior_word0: u64, candidate: u64) -> Option<u64> {
    let diff = (prior_word0 ^ candidate) & EVENT_DELTA_RETVAL_MASK;
    if diff != EVENT_RETURN_BIT {
        return None;
    }

    let retval = (candidate & ARG_MASK) as u16 as i16 as i64;
    if !retval_fits(retval) {
        return None;
    }

    let mut delta =
        timestamp_of(candidate).wrapping_sub(timestamp_of(prior_word0)) & UNSHIFTED_TIMESTAMP_MASK;
    // nonzero marks the word as merged
    if delta == 0 {
        delta = 1;
    }
    if delta > MAX_DELTA_VALUE {
        return None;
    }

    Some(prior_word0 | (delta << DELTA_SHIFT) | ((retval as u64 & 0xff) << RETVAL_SHIFT))
}

// =============================================================================
// Decoded Views
// =============================================================================

/// Fields of a record's first word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Word0 {
    pub timestamp: u32,
    pub event: u16,
    pub delta: u8,
    pub retval: u8,
    pub arg: u16,
}

impl Word0 {
    pub const fn decode(word: u64) -> Self {
        Self {
            timestamp: timestamp_of(word) as u32,
            event: event_of(word) as u16,
            delta: ((word & DELTA_MASK) >> DELTA_SHIFT) as u8,
            retval: ((word & RETVAL_MASK) >> RETVAL_SHIFT) as u8,
            arg: (word & ARG_MASK) as u16,
        }
    }

    pub const fn encode(&self) -> u64 {
        ((self.timestamp as u64 & UNSHIFTED_TIMESTAMP_MASK) << TIMESTAMP_SHIFT)
            | ((self.event as u64 & UNSHIFTED_EVENT_MASK) << EVENT_SHIFT)
            | ((self.delta as u64) << DELTA_SHIFT)
            | ((self.retval as u64) << RETVAL_SHIFT)
            | self.arg as u64
    }

    /// Call record that absorbed its return.
    pub const fn is_merged(&self) -> bool {
        self.delta != 0
    }

    pub const fn retval_signed(&self) -> i8 {
        self.retval as i8
    }
}

/// First two words of a trace block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub cpu: u8,
    /// 56-bit block-creation timestamp, extended past counter wraps.
    pub timestamp: u64,
    pub flags: u8,
    /// Wall-clock correlation value; zero until an exporter fills it in.
    pub wall_clock: u64,
}

impl BlockHeader {
    pub const fn encode(&self) -> [u64; 2] {
        [
            (self.timestamp & FULL_TIMESTAMP_MASK) | ((self.cpu as u64) << CPU_NUMBER_SHIFT),
            (self.wall_clock & WALL_CLOCK_MASK) | ((self.flags as u64) << FLAGS_SHIFT),
        ]
    }

    pub const fn decode(word0: u64, word1: u64) -> Self {
        Self {
            cpu: (word0 >> CPU_NUMBER_SHIFT) as u8,
            timestamp: word0 & FULL_TIMESTAMP_MASK,
            flags: (word1 >> FLAGS_SHIFT) as u8,
            wall_clock: word1 & WALL_CLOCK_MASK,
        }
    }

    pub const fn ipc_enabled(&self) -> bool {
        self.flags & FLAG_IPC != 0
    }

    pub const fn wrap_enabled(&self) -> bool {
        self.flags & FLAG_WRAP != 0
    }
}
