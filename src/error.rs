//! Error types for the configuration and lifecycle API.
//!
//! The per-event paths never return these: a failed insert is dropped and
//! reported as zero words written, and the numeric control surface folds
//! every failure into [`CONTROL_FAILURE`](crate::control::CONTROL_FAILURE).

/// Errors reported by the tracer's setup and control operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Arena size (in 64 KiB blocks) is below the two-block minimum.
    InvalidArenaSize(usize),
    /// CPU count is zero or does not fit the 8-bit CPU field of a block header.
    InvalidCpuCount(usize),
    /// Operation requires tracing to be off.
    TracingActive,
    /// A tracer is already loaded into the module slot.
    AlreadyLoaded,
    /// No tracer is loaded into the module slot.
    NotLoaded,
    /// User memory at this address could not be read.
    BadAddress(u64),
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidArenaSize(blocks) => {
                write!(f, "Invalid arena size: {} blocks (minimum 2)", blocks)
            }
            Self::InvalidCpuCount(cpus) => write!(f, "Invalid CPU count: {}", cpus),
            Self::TracingActive => write!(f, "Tracing must be off"),
            Self::AlreadyLoaded => write!(f, "Tracer already loaded"),
            Self::NotLoaded => write!(f, "No tracer loaded"),
            Self::BadAddress(addr) => write!(f, "Bad user address: {:#x}", addr),
        }
    }
}

impl core::error::Error for Error {}
