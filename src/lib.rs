//! Low-overhead per-CPU event tracer.
//!
//! Kernel and user execution events (syscalls, interrupts, context
//! switches, PC samples) are packed into 64 KiB per-CPU blocks of a single
//! arena, at a cost of a few nanoseconds per event. The log is read back
//! after tracing stops.
//!
//! # Quick Start
//!
//! ```
//! use evtrace::{MockPlatform, TraceConfig, Tracer};
//! use evtrace::control::{CMD_GETCOUNT, CMD_GETWORD, CMD_INSERT1, CMD_ON};
//!
//! let tracer = Tracer::new(MockPlatform::new(), TraceConfig::default()).unwrap();
//! tracer.control(CMD_ON, 0);
//! tracer.control(CMD_INSERT1, 0x0000_020a_0000_0001);
//! tracer.flush();
//!
//! assert_eq!(tracer.control(CMD_GETCOUNT, 0), 1);
//! assert_eq!(tracer.control(CMD_GETWORD, 0) & 0xffff, 1);
//! ```

#![no_std]

extern crate alloc;

#[macro_use]
extern crate log;

// =============================================================================
// Platform Abstraction
// =============================================================================

pub mod platform;

// =============================================================================
// Record Format
// =============================================================================

pub mod codec;
pub mod events;

// =============================================================================
// Trace Buffer Engine
// =============================================================================

pub mod arena;
pub mod block;
pub mod claim;
pub mod filter;
pub mod ipc;
pub mod tracer;

// =============================================================================
// Session Control and Export
// =============================================================================

pub mod config;
pub mod control;
pub mod export;
pub mod module;

mod error;

pub use config::TraceConfig;
pub use control::{CONTROL_FAILURE, Command, SessionState};
pub use error::Error;
pub use export::{BlockSnapshot, TraceSnapshot};
pub use module::TraceModule;
pub use platform::{MockPlatform, Platform, TaskIdentity};
pub use tracer::Tracer;
