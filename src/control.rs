//! Session control.
//!
//! ```text
//!   Uninitialized --load--> Stopped <--on/off--> Running
//!                              ^                    |
//!                              +---- arena full ----+   (stop mode)
//! ```
//!
//! [`Tracer::control`] is the numeric surface: a command code and one
//! argument in, one `u64` out. Typed callers use [`Command`] and
//! [`Tracer::execute`].

use core::sync::atomic::Ordering;

use crate::Error;
use crate::Tracer;
use crate::export;
use crate::platform::Platform;

/// Result of any command that fails.
pub const CONTROL_FAILURE: u64 = u64::MAX;

/// Value returned by [`Command::Version`].
pub const MODULE_VERSION: u64 = 3;

/// Reset flag: record IPC bytes.
pub const DO_IPC: u64 = 1;
/// Reset flag: overwrite old blocks when full.
pub const DO_WRAP: u64 = 2;

pub const CMD_OFF: u64 = 0;
pub const CMD_ON: u64 = 1;
pub const CMD_FLUSH: u64 = 2;
pub const CMD_RESET: u64 = 3;
pub const CMD_STAT: u64 = 4;
pub const CMD_GETCOUNT: u64 = 5;
pub const CMD_GETWORD: u64 = 6;
pub const CMD_INSERT1: u64 = 7;
pub const CMD_INSERTN: u64 = 8;
pub const CMD_GETIPCWORD: u64 = 9;
pub const CMD_TEST: u64 = 10;
pub const CMD_VERSION: u64 = 11;
pub const CMD_GETRAWCOUNT: u64 = 12;
pub const CMD_GETRAWWORD: u64 = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No tracer loaded.
    Uninitialized,
    Stopped,
    Running,
}

/// A decoded control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Off,
    On,
    Flush,
    Reset { flags: u64 },
    Stat,
    GetCount,
    GetWord(u64),
    /// `forced` inserts even with tracing off.
    Insert1 { word: u64, forced: bool },
    /// `addr` points at eight words of user memory.
    InsertN { addr: u64, forced: bool },
    GetIpcWord(u64),
    Test,
    Version,
    GetRawCount,
    GetRawWord(u64),
}

impl Command {
    pub fn decode(cmd: u64, arg: u64) -> Option<Self> {
        let command = match cmd {
            CMD_OFF => Self::Off,
            CMD_ON => Self::On,
            CMD_FLUSH => Self::Flush,
            CMD_RESET => Self::Reset { flags: arg },
            CMD_STAT => Self::Stat,
            CMD_GETCOUNT => Self::GetCount,
            CMD_GETWORD => Self::GetWord(arg),
            CMD_INSERT1 => Self::Insert1 {
                word: arg,
                forced: false,
            },
            CMD_INSERTN => Self::InsertN {
                addr: arg,
                forced: false,
            },
            CMD_GETIPCWORD => Self::GetIpcWord(arg),
            CMD_TEST => Self::Test,
            CMD_VERSION => Self::Version,
            CMD_GETRAWCOUNT => Self::GetRawCount,
            CMD_GETRAWWORD => Self::GetRawWord(arg),
            c if c == !CMD_INSERT1 => Self::Insert1 {
                word: arg,
                forced: true,
            },
            c if c == !CMD_INSERTN => Self::InsertN {
                addr: arg,
                forced: true,
            },
            _ => return None,
        };
        Some(command)
    }
}

impl<P: Platform> Tracer<P> {
    pub fn state(&self) -> SessionState {
        if self.is_tracing() {
            SessionState::Running
        } else {
            SessionState::Stopped
        }
    }

    /// The session overwrote old blocks.
    pub fn is_wrapped(&self) -> bool {
        self.arena().is_wrapped()
    }

    pub fn on(&self) -> u64 {
        if !self.set_tracing(true) {
            info!("tracing on");
        }
        1
    }

    pub fn off(&self) -> u64 {
        if self.set_tracing(false) {
            info!("tracing off");
        }
        0
    }

    /// Stop tracing and zero the unused tail of every CPU's current block.
    ///
    /// Returns the number of words zeroed. A second flush zeroes nothing.
    pub fn flush(&self) -> u64 {
        self.off();
        let mut zeroed = 0;
        for cursor in self.cursors() {
            let next = cursor.next();
            let limit = cursor.limit();
            if limit == crate::claim::UNSET || next >= limit {
                continue;
            }
            let arena = self.arena();
            arena.close_fill(arena.block_of(limit - 1), next);
            arena.zero(next..limit);
            zeroed += limit - next;
            cursor.next.store(limit, Ordering::Release);
        }
        debug!("flushed {} words", zeroed);
        zeroed as u64
    }

    /// Start a fresh session. `flags` combines [`DO_IPC`] and [`DO_WRAP`].
    pub fn reset(&self, flags: u64) -> Result<(), Error> {
        if self.is_tracing() {
            return Err(Error::TracingActive);
        }
        let ipc = flags & DO_IPC != 0;
        let wrap = flags & DO_WRAP != 0;

        let mut clock = self.frontier().lock();
        self.set_session_mode(ipc, wrap);
        self.pid_filter().clear();
        self.arena().reset(ipc);
        for cursor in self.cursors() {
            cursor.reset();
        }
        clock.reset();
        drop(clock);

        info!("trace reset: ipc={} wrap={}", ipc, wrap);
        Ok(())
    }

    /// Blocks claimed so far. Safe to call while tracing.
    pub fn stat(&self) -> u64 {
        self.arena().claimed_blocks() as u64
    }

    /// Record words in the log, bit-inverted if the session wrapped.
    pub fn get_count(&self) -> u64 {
        self.off();
        let count = export::record_count(&self.log_view()) as u64;
        if self.is_wrapped() { !count } else { count }
    }

    /// `i`-th record word counting back from the newest.
    pub fn get_word(&self, i: u64) -> u64 {
        self.off();
        export::record_word(&self.log_view(), i as usize)
    }

    pub fn get_ipc_word(&self, i: u64) -> u64 {
        self.off();
        self.arena().raw_ipc_word(i as usize)
    }

    /// Physical words of all claimed blocks.
    pub fn get_raw_count(&self) -> u64 {
        self.off();
        self.arena().raw_count() as u64
    }

    pub fn get_raw_word(&self, i: u64) -> u64 {
        self.off();
        self.arena().raw_word(i as usize)
    }

    /// Decoded copy of the log, oldest block first.
    pub fn snapshot(&self) -> export::TraceSnapshot {
        self.off();
        export::TraceSnapshot::capture(&self.log_view())
    }

    fn log_view(&self) -> export::LogView<'_> {
        export::LogView::new(self.arena(), self.cursors())
    }

    pub fn execute(&self, command: Command) -> u64 {
        match command {
            Command::Off => self.off(),
            Command::On => self.on(),
            Command::Flush => self.flush(),
            Command::Reset { flags } => match self.reset(flags) {
                Ok(()) => 0,
                Err(e) => {
                    warn!("reset refused: {}", e);
                    CONTROL_FAILURE
                }
            },
            Command::Stat => self.stat(),
            Command::GetCount => self.get_count(),
            Command::GetWord(i) => self.get_word(i),
            Command::Insert1 { word, forced } => {
                if !forced && !self.is_tracing() {
                    return 0;
                }
                self.insert_1(word)
            }
            Command::InsertN { addr, forced } => {
                if !forced && !self.is_tracing() {
                    return 0;
                }
                self.insert_n_user(addr)
            }
            Command::GetIpcWord(i) => self.get_ipc_word(i),
            Command::Test => self.is_tracing() as u64,
            Command::Version => MODULE_VERSION,
            Command::GetRawCount => self.get_raw_count(),
            Command::GetRawWord(i) => self.get_raw_word(i),
        }
    }

    /// Numeric control entry point. Unknown commands return
    /// [`CONTROL_FAILURE`] and change nothing.
    pub fn control(&self, cmd: u64, arg: u64) -> u64 {
        match Command::decode(cmd, arg) {
            Some(command) => self.execute(command),
            None => CONTROL_FAILURE,
        }
    }
}
