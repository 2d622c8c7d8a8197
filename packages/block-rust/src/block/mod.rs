//! SDR block hosting a device behind the deferred call dispatcher.
//!
//! The host drives the block through [`SdrBlock::activate`] and
//! [`SdrBlock::deactivate`]; every configuration call goes through
//! [`SdrBlock::call`], which is the dispatcher's intercept point.

pub mod calls;
pub mod table;

use std::sync::Arc;

use sdrblock_core::call::triggered_signal;
use sdrblock_core::{CallingMode, DeviceFactory, Direction, Kwargs, SignalSink, Value, SETUP_DEVICE_CALL};
use tracing::{debug, info};

pub use calls::{DeviceCalls, DeviceSlot};
pub use table::CallTable;

use crate::config::BlockConfig;
use crate::dispatch::{CallDispatcher, DispatchError};

/// Errors from block construction and lifecycle transitions.
#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    /// The readiness gate reported queued calls still pending
    /// (`ACTIVATE_THROWS` mode only).
    #[error("device not ready")]
    NotReady,
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("block construction failed: {0:#}")]
    Construction(#[source] anyhow::Error),
}

/// A source or sink block whose device calls run through a [`CallDispatcher`].
pub struct SdrBlock {
    direction: Direction,
    config: BlockConfig,
    probes: Vec<String>,
    signals: Arc<dyn SignalSink>,
    dispatcher: CallDispatcher<DeviceCalls>,
}

impl SdrBlock {
    /// Creates the block and starts its evaluation worker. The device itself
    /// is created later by the `setupDevice` call.
    ///
    /// # Errors
    ///
    /// Returns [`BlockError::Construction`] if the call table is inconsistent
    /// or the worker thread cannot be spawned.
    pub fn new(
        direction: Direction,
        factory: Arc<dyn DeviceFactory>,
        config: BlockConfig,
        signals: Arc<dyn SignalSink>,
    ) -> Result<Self, BlockError> {
        let handler = DeviceCalls::new(direction, config.effective_channels(), factory)
            .map_err(BlockError::Construction)?;
        let probes = handler.probes();
        let dispatcher = CallDispatcher::with_signals(handler, &config.dispatch, Arc::clone(&signals))
            .map_err(|err| BlockError::Construction(err.into()))?;
        Ok(Self {
            direction,
            config,
            probes,
            signals,
            dispatcher,
        })
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Dispatches a named call (see [`CallDispatcher::dispatch`]).
    ///
    /// # Errors
    ///
    /// Propagates [`DispatchError`], including failures of earlier deferred calls.
    pub fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, DispatchError> {
        self.dispatcher.dispatch(name, args)
    }

    /// Convenience wrapper for the `setupDevice` call.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call). In the deferred modes a factory failure is
    /// reported to a later caller and leaves the block unusable.
    pub fn setup_device(&self, args: Kwargs) -> Result<(), DispatchError> {
        self.call(SETUP_DEVICE_CALL, vec![Value::from(args)]).map(drop)
    }

    /// # Errors
    ///
    /// See [`CallDispatcher::set_calling_mode`].
    pub fn set_calling_mode(&self, mode: &str) -> Result<(), DispatchError> {
        self.dispatcher.set_calling_mode(mode)
    }

    #[must_use]
    pub fn calling_mode(&self) -> CallingMode {
        self.dispatcher.calling_mode()
    }

    pub fn set_event_squash(&self, enable: bool) {
        self.dispatcher.set_event_squash(enable);
    }

    /// Getters snapshotted on activation.
    #[must_use]
    pub fn probes(&self) -> &[String] {
        &self.probes
    }

    #[must_use]
    pub fn dispatcher(&self) -> &CallDispatcher<DeviceCalls> {
        &self.dispatcher
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.dispatcher.is_active()
    }

    /// Activates the block.
    ///
    /// Consults the readiness gate first (waiting for queued setters in the
    /// waiting modes), then emits the current value of every probed getter
    /// as `<getter>Triggered`, then marks the block active.
    ///
    /// # Errors
    ///
    /// - [`BlockError::NotReady`] if calls are still queued in `ACTIVATE_THROWS` mode
    /// - [`BlockError::Dispatch`] for pending deferred failures or failing getters
    pub fn activate(&self) -> Result<(), BlockError> {
        if !self.dispatcher.is_ready()? {
            return Err(BlockError::NotReady);
        }
        if self.config.emit_activation_signals {
            for getter in &self.probes {
                let value = self.dispatcher.dispatch(getter, Vec::new())?;
                self.signals.emit(&triggered_signal(getter), value);
            }
        }
        self.dispatcher.set_active(true);
        info!(direction = %self.direction, mode = %self.calling_mode(), "block activated");
        Ok(())
    }

    pub fn deactivate(&self) {
        self.dispatcher.set_active(false);
        debug!(direction = %self.direction, "block deactivated");
    }
}
