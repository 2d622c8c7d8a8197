//! Shared coordination state between callers and the evaluation worker.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex, MutexGuard};
use sdrblock_core::{CachedCall, CallKind, CallingMode};

use super::error::{DeferredFailure, DispatchError};
use crate::config::DispatchConfig;

/// Everything guarded by the state mutex.
///
/// The queue is appended only by the dispatcher and popped only by the
/// worker, both while holding the lock.
#[derive(Debug)]
pub(crate) struct DispatchState {
    pub(crate) mode: CallingMode,
    pub(crate) squash: bool,
    /// Mirrors the host block's activation state.
    pub(crate) active: bool,
    pub(crate) queue: VecDeque<CachedCall>,
    /// Set while the worker executes a popped entry outside the lock.
    pub(crate) in_flight: bool,
    pub(crate) error: Option<DeferredFailure>,
    pub(crate) stopped: bool,
    /// Set when the worker loop has returned for good.
    pub(crate) worker_exited: bool,
}

impl DispatchState {
    pub(crate) fn new(config: &DispatchConfig) -> Self {
        Self {
            mode: config.calling_mode,
            squash: config.event_squash,
            active: false,
            queue: VecDeque::new(),
            in_flight: false,
            error: None,
            stopped: false,
            worker_exited: false,
        }
    }

    /// No queued entries and nothing executing on the worker.
    pub(crate) fn is_drained(&self) -> bool {
        self.queue.is_empty() && !self.in_flight
    }

    pub(crate) fn squash_enabled(&self) -> bool {
        self.squash && self.active
    }

    /// Whether a call of `kind` goes to the evaluation worker.
    pub(crate) fn defers(&self, kind: CallKind) -> bool {
        kind == CallKind::Setter && (self.mode.defers_setters() || self.squash_enabled())
    }

    /// Clears the error slot, returning its failure to the caller.
    pub(crate) fn take_error(&mut self) -> Result<(), DispatchError> {
        match self.error.take() {
            Some(failure) => Err(failure.into()),
            None => Ok(()),
        }
    }

    /// Stores a failure unless one is already pending. Returns whether it was stored.
    pub(crate) fn record_failure(&mut self, call: &str, source: anyhow::Error) -> bool {
        if self.error.is_some() {
            return false;
        }
        self.error = Some(DeferredFailure {
            call: call.to_string(),
            source,
        });
        true
    }
}

/// State mutex, its condition variable, and the execution lock around the
/// call handler.
///
/// Lock order: the state lock is never held while acquiring `exec`.
pub(crate) struct Shared<H> {
    pub(crate) state: Mutex<DispatchState>,
    pub(crate) cond: Condvar,
    pub(crate) exec: Mutex<H>,
}

impl<H> Shared<H> {
    pub(crate) fn new(handler: H, config: &DispatchConfig) -> Self {
        Self {
            state: Mutex::new(DispatchState::new(config)),
            cond: Condvar::new(),
            exec: Mutex::new(handler),
        }
    }

    /// Blocks on the condition variable until the queue drains.
    ///
    /// A failure parked while waiting is taken and returned to this waiter.
    /// Fails with [`DispatchError::WorkerStopped`] when the worker is gone and
    /// entries remain, since nothing will ever remove them.
    pub(crate) fn wait_drained(
        &self,
        state: &mut MutexGuard<'_, DispatchState>,
    ) -> Result<(), DispatchError> {
        loop {
            state.take_error()?;
            if state.is_drained() {
                return Ok(());
            }
            if state.worker_exited {
                return Err(DispatchError::WorkerStopped);
            }
            self.cond.wait(state);
        }
    }
}
