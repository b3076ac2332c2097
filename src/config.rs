//! Tracer configuration.

use crate::Error;
use crate::arena::{BLOCKS_PER_MIB, MIN_BLOCKS};
use crate::filter::{DEFAULT_PKT_MASK, DEFAULT_PKT_MATCH};

/// Default arena size in MiB.
pub const DEFAULT_ARENA_MIB: usize = 2;

/// Largest CPU id representable in a block header.
pub const MAX_CPUS: usize = 256;

/// Settings fixed for the lifetime of a [`Tracer`](crate::Tracer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceConfig {
    /// Arena size in 64 KiB blocks.
    pub arena_blocks: usize,
    /// Number of CPUs that will record events. CPU ids are `0..cpus`.
    pub cpus: usize,
    /// Packet filter byte mask, one bit per payload byte.
    pub pkt_mask: i64,
    /// Packet filter match value.
    pub pkt_match: i64,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            arena_blocks: DEFAULT_ARENA_MIB * BLOCKS_PER_MIB,
            cpus: 1,
            pkt_mask: DEFAULT_PKT_MASK,
            pkt_match: DEFAULT_PKT_MATCH,
        }
    }
}

impl TraceConfig {
    pub fn with_arena_mib(mut self, mib: usize) -> Self {
        self.arena_blocks = mib.saturating_mul(BLOCKS_PER_MIB);
        self
    }

    pub fn with_arena_blocks(mut self, blocks: usize) -> Self {
        self.arena_blocks = blocks;
        self
    }

    pub fn with_cpus(mut self, cpus: usize) -> Self {
        self.cpus = cpus;
        self
    }

    pub fn with_packet_filter(mut self, mask: i64, matching: i64) -> Self {
        self.pkt_mask = mask;
        self.pkt_match = matching;
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.arena_blocks < MIN_BLOCKS {
            return Err(Error::InvalidArenaSize(self.arena_blocks));
        }
        if self.cpus == 0 || self.cpus > MAX_CPUS {
            return Err(Error::InvalidCpuCount(self.cpus));
        }
        Ok(())
    }
}
