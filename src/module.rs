//! Load/unload holder for a tracer.
//!
//! Event hooks and the control surface go through a [`TraceModule`], which
//! may be empty. Hooks hold the read lock while they run; unloading stops
//! tracing, then takes the write lock so in-flight hooks finish before the
//! arena is dropped.

use alloc::sync::Arc;
use spin::RwLock;

use crate::Error;
use crate::config::TraceConfig;
use crate::control::{CONTROL_FAILURE, SessionState};
use crate::platform::{Platform, TASK_NAME_LEN};
use crate::tracer::Tracer;

pub struct TraceModule<P: Platform> {
    slot: RwLock<Option<Arc<Tracer<P>>>>,
}

impl<P: Platform> TraceModule<P> {
    pub const fn new() -> Self {
        Self {
            slot: RwLock::new(None),
        }
    }

    /// Allocate a tracer and make it the active one.
    pub fn load(&self, platform: P, config: TraceConfig) -> Result<Arc<Tracer<P>>, Error> {
        let mut slot = self.slot.write();
        if slot.is_some() {
            return Err(Error::AlreadyLoaded);
        }
        let tracer = Arc::new(Tracer::new(platform, config)?);
        *slot = Some(tracer.clone());
        info!("trace module loaded");
        Ok(tracer)
    }

    /// Stop tracing, wait for running hooks, and release the tracer.
    pub fn unload(&self) -> Result<(), Error> {
        if let Some(tracer) = self.slot.read().as_ref() {
            tracer.off();
        }
        let tracer = self.slot.write().take().ok_or(Error::NotLoaded)?;
        info!("trace module unloaded, {} blocks used", tracer.stat());
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.slot.read().is_some()
    }

    pub fn tracer(&self) -> Option<Arc<Tracer<P>>> {
        self.slot.read().clone()
    }

    pub fn state(&self) -> SessionState {
        match self.slot.read().as_ref() {
            Some(tracer) => tracer.state(),
            None => SessionState::Uninitialized,
        }
    }

    pub fn control(&self, cmd: u64, arg: u64) -> u64 {
        match self.slot.read().as_ref() {
            Some(tracer) => tracer.control(cmd, arg),
            None => {
                warn!("control command {} with no tracer loaded", cmd);
                CONTROL_FAILURE
            }
        }
    }

    // Hooks skip the event rather than wait while an unload holds the lock.

    pub fn trace_1(&self, event: u64, arg: u64) {
        if let Some(guard) = self.slot.try_read() {
            if let Some(tracer) = guard.as_ref() {
                tracer.trace_1(event, arg);
            }
        }
    }

    pub fn trace_2(&self, event: u64, pc: u64) {
        if let Some(guard) = self.slot.try_read() {
            if let Some(tracer) = guard.as_ref() {
                tracer.trace_2(event, pc);
            }
        }
    }

    pub fn trace_many(&self, event: u64, words: &[u64]) {
        if let Some(guard) = self.slot.try_read() {
            if let Some(tracer) = guard.as_ref() {
                tracer.trace_many(event, words);
            }
        }
    }

    pub fn trace_pid_name(&self, pid: u32, name: &[u8; TASK_NAME_LEN]) -> bool {
        match self.slot.try_read() {
            Some(guard) => guard
                .as_ref()
                .is_some_and(|tracer| tracer.trace_pid_name(pid, name)),
            None => false,
        }
    }
}

impl<P: Platform> Default for TraceModule<P> {
    fn default() -> Self {
        Self::new()
    }
}
