//! Readiness gate consulted by block activation.

use sdrblock_core::CallHandler;

use super::dispatcher::CallDispatcher;
use super::error::DispatchError;

impl<H: CallHandler> CallDispatcher<H> {
    /// Reports whether every queued call has been applied.
    ///
    /// In `ACTIVATE_THROWS` mode this never blocks and returns the current
    /// drain state. In the other modes it waits for the queue to drain and
    /// then returns `true`.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::Deferred`] if a deferred call failed (before or
    ///   during the wait). The error slot is cleared.
    /// - [`DispatchError::WorkerStopped`] if the queue can never drain.
    pub fn is_ready(&self) -> Result<bool, DispatchError> {
        let mut state = self.shared.state.lock();
        state.take_error()?;

        if !state.mode.activate_waits() {
            return Ok(state.is_drained());
        }

        self.shared.wait_drained(&mut state)?;
        Ok(true)
    }
}
