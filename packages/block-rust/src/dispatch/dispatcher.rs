//! The call dispatcher: routes every named call to synchronous execution or
//! to the evaluation worker.

use std::sync::Arc;
use std::thread::JoinHandle;

use sdrblock_core::call::{probe_target, triggered_signal};
use sdrblock_core::{
    CachedCall, CallHandler, CallKind, CallingMode, NullSignalSink, SignalSink, Value,
};
use tracing::{debug, error};

use super::error::DispatchError;
use super::state::Shared;
use super::worker;
use crate::config::DispatchConfig;
use crate::telemetry;

/// Intercepts named calls on a hosted object and decides how to run them.
///
/// - Probe and `overlay` calls bypass the queue.
/// - Setters are queued for the evaluation worker when the calling mode
///   defers setters, or when squash is enabled while the block is active.
/// - Everything else runs on the caller's thread once the queue has drained,
///   so a getter always observes every setter issued before it.
///
/// A failure of a deferred call is handed to the next `dispatch` or
/// [`is_ready`](Self::is_ready) call, exactly once.
///
/// Dropping the dispatcher stops and joins the worker. Queued calls that have
/// not started are discarded.
pub struct CallDispatcher<H: CallHandler> {
    pub(super) shared: Arc<Shared<H>>,
    signals: Arc<dyn SignalSink>,
    worker: Option<JoinHandle<()>>,
}

impl<H: CallHandler> CallDispatcher<H> {
    /// Creates a dispatcher that discards probe signals.
    ///
    /// # Errors
    ///
    /// Returns an error if the evaluation worker thread cannot be spawned.
    pub fn new(handler: H, config: &DispatchConfig) -> std::io::Result<Self> {
        Self::with_signals(handler, config, Arc::new(NullSignalSink))
    }

    /// Creates a dispatcher that emits probe results on `signals`.
    ///
    /// # Errors
    ///
    /// Returns an error if the evaluation worker thread cannot be spawned.
    pub fn with_signals(
        handler: H,
        config: &DispatchConfig,
        signals: Arc<dyn SignalSink>,
    ) -> std::io::Result<Self> {
        let shared = Arc::new(Shared::new(handler, config));
        let worker = worker::spawn(Arc::clone(&shared), &config.worker_thread_name)?;
        Ok(Self {
            shared,
            signals,
            worker: Some(worker),
        })
    }

    /// Dispatches the call `name` with positional `args`.
    ///
    /// Deferred setters return `Value::Null` immediately.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::Deferred`] if an earlier deferred call failed; the
    ///   current call is not executed.
    /// - [`DispatchError::Call`] if the call itself fails synchronously.
    /// - [`DispatchError::WorkerStopped`] if the queue can never drain.
    pub fn dispatch(&self, name: &str, args: Vec<Value>) -> Result<Value, DispatchError> {
        let kind = CallKind::of(name);
        if kind.bypasses_queue() {
            return match kind {
                CallKind::Probe => self.probe(name, args),
                _ => self.execute(name, &args),
            };
        }

        let mut state = self.shared.state.lock();
        state.take_error()?;

        if state.defers(kind) {
            state.queue.push_back(CachedCall::new(name, args));
            let depth = state.queue.len();
            drop(state);
            self.shared.cond.notify_all();
            debug!(call = %name, depth, "deferred call queued");
            metrics::counter!(telemetry::CALLS_DEFERRED).increment(1);
            return Ok(Value::Null);
        }

        // A deferred failure that lands during the wait belongs to this caller.
        self.shared.wait_drained(&mut state)?;
        drop(state);

        self.execute(name, &args)
    }

    /// Runs the probed getter through the synchronous path and emits its
    /// result as `<getter>Triggered`.
    fn probe(&self, name: &str, args: Vec<Value>) -> Result<Value, DispatchError> {
        let getter = probe_target(name)
            .ok_or_else(|| DispatchError::InvalidArgument(format!("not a probe call: {name}")))?;
        let value = self.dispatch(&getter, args)?;
        self.signals.emit(&triggered_signal(&getter), value);
        Ok(Value::Null)
    }

    fn execute(&self, name: &str, args: &[Value]) -> Result<Value, DispatchError> {
        self.shared
            .exec
            .lock()
            .call(name, args)
            .map_err(|source| DispatchError::Call {
                call: name.to_string(),
                source,
            })
    }

    /// Sets the calling mode from its string form.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidArgument`] for an unknown mode and
    /// [`DispatchError::ModeLocked`] while the block is active.
    pub fn set_calling_mode(&self, mode: &str) -> Result<(), DispatchError> {
        let mode: CallingMode = mode
            .parse()
            .map_err(|err: sdrblock_core::UnknownModeError| {
                DispatchError::InvalidArgument(err.to_string())
            })?;
        self.set_mode(mode)
    }

    /// # Errors
    ///
    /// Returns [`DispatchError::ModeLocked`] while the block is active.
    pub fn set_mode(&self, mode: CallingMode) -> Result<(), DispatchError> {
        let mut state = self.shared.state.lock();
        if state.active {
            return Err(DispatchError::ModeLocked);
        }
        state.mode = mode;
        Ok(())
    }

    #[must_use]
    pub fn calling_mode(&self) -> CallingMode {
        self.shared.state.lock().mode
    }

    /// Enables or disables squashing of superseded queued setters.
    pub fn set_event_squash(&self, enable: bool) {
        self.shared.state.lock().squash = enable;
    }

    #[must_use]
    pub fn event_squash(&self) -> bool {
        self.shared.state.lock().squash
    }

    /// Tracks the host block's activation state.
    pub fn set_active(&self, active: bool) {
        self.shared.state.lock().active = active;
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.shared.state.lock().active
    }

    /// Number of queued calls not yet picked up by the worker.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// `false` once the worker has exited after a setup failure.
    #[must_use]
    pub fn worker_running(&self) -> bool {
        !self.shared.state.lock().worker_exited
    }
}

impl<H: CallHandler> Drop for CallDispatcher<H> {
    fn drop(&mut self) {
        self.shared.state.lock().stopped = true;
        self.shared.cond.notify_all();
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("evaluation worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;

    /// Handler storing named values; `get<X>` reads what `set<X>` wrote.
    struct Registers {
        values: Arc<Mutex<Vec<(String, Value)>>>,
        delay: Duration,
    }

    impl CallHandler for Registers {
        fn call(&mut self, name: &str, args: &[Value]) -> anyhow::Result<Value> {
            if let Some(reg) = name.strip_prefix("set") {
                std::thread::sleep(self.delay);
                if reg == "Broken" {
                    anyhow::bail!("broken register");
                }
                let value = args.first().cloned().unwrap_or_default();
                self.values.lock().push((reg.to_string(), value));
                return Ok(Value::Null);
            }
            if let Some(reg) = name.strip_prefix("get") {
                let values = self.values.lock();
                return Ok(values
                    .iter()
                    .rev()
                    .find(|(r, _)| r == reg)
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default());
            }
            if name == "overlay" {
                return Ok(Value::from("{}"));
            }
            anyhow::bail!("unknown call {name}")
        }
    }

    fn dispatcher(
        mode: CallingMode,
        delay: Duration,
    ) -> (CallDispatcher<Registers>, Arc<Mutex<Vec<(String, Value)>>>) {
        let values = Arc::new(Mutex::new(Vec::new()));
        let handler = Registers {
            values: values.clone(),
            delay,
        };
        let config = DispatchConfig {
            calling_mode: mode,
            ..DispatchConfig::default()
        };
        (CallDispatcher::new(handler, &config).unwrap(), values)
    }

    #[derive(Default)]
    struct Captured(Mutex<Vec<(String, Value)>>);

    impl SignalSink for Captured {
        fn emit(&self, signal: &str, value: Value) {
            self.0.lock().push((signal.to_string(), value));
        }
    }

    #[test]
    fn getter_waits_for_deferred_setter() {
        let (d, _) = dispatcher(CallingMode::ActivateWaits, Duration::from_millis(20));
        assert_eq!(d.dispatch("setGain", vec![Value::Float(3.0)]).unwrap(), Value::Null);
        assert_eq!(d.dispatch("getGain", vec![]).unwrap(), Value::Float(3.0));
        assert_eq!(d.pending(), 0);
    }

    #[test]
    fn synchronous_mode_applies_before_return() {
        let (d, values) = dispatcher(CallingMode::Synchronous, Duration::ZERO);
        d.dispatch("setGain", vec![Value::Float(1.0)]).unwrap();
        assert_eq!(values.lock().len(), 1);
    }

    #[test]
    fn synchronous_failure_is_direct() {
        let (d, _) = dispatcher(CallingMode::Synchronous, Duration::ZERO);
        let err = d.dispatch("setBroken", vec![]).unwrap_err();
        assert!(matches!(err, DispatchError::Call { ref call, .. } if call == "setBroken"));
        // Nothing parked for the next caller.
        assert!(d.dispatch("getGain", vec![]).is_ok());
    }

    #[test]
    fn deferred_failure_is_delivered_once() {
        let (d, _) = dispatcher(CallingMode::ActivateWaits, Duration::ZERO);
        d.dispatch("setBroken", vec![]).unwrap();

        let err = d.dispatch("getGain", vec![]).unwrap_err();
        assert!(err.is_deferred());
        assert_eq!(err.call_name(), Some("setBroken"));

        assert!(d.dispatch("getGain", vec![]).is_ok());
    }

    #[test]
    fn probe_emits_triggered_signal() {
        let values = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::new(Captured::default());
        let d = CallDispatcher::with_signals(
            Registers {
                values,
                delay: Duration::ZERO,
            },
            &DispatchConfig::default(),
            sink.clone(),
        )
        .unwrap();

        d.dispatch("setGain", vec![Value::Float(7.0)]).unwrap();
        assert_eq!(d.dispatch("probeGetGain", vec![]).unwrap(), Value::Null);
        assert_eq!(
            *sink.0.lock(),
            vec![("getGainTriggered".to_string(), Value::Float(7.0))]
        );
    }

    #[test]
    fn overlay_bypasses_pending_error() {
        let (d, _) = dispatcher(CallingMode::ActivateWaits, Duration::ZERO);
        d.dispatch("setBroken", vec![]).unwrap();
        while d.pending() > 0 {
            std::thread::yield_now();
        }
        assert_eq!(d.dispatch("overlay", vec![]).unwrap(), Value::from("{}"));
        // The error is still waiting for a non-bypass caller.
        assert!(d.dispatch("getGain", vec![]).unwrap_err().is_deferred());
    }

    #[test]
    fn mode_strings() {
        let (d, _) = dispatcher(CallingMode::Synchronous, Duration::ZERO);
        d.set_calling_mode("ACTIVATE_THROWS").unwrap();
        assert_eq!(d.calling_mode(), CallingMode::ActivateThrows);
        let err = d.set_calling_mode("BACKGROUND").unwrap_err();
        assert!(matches!(err, DispatchError::InvalidArgument(_)));
        assert_eq!(d.calling_mode(), CallingMode::ActivateThrows);
    }

    #[test]
    fn mode_locked_while_active() {
        let (d, _) = dispatcher(CallingMode::Synchronous, Duration::ZERO);
        d.set_active(true);
        assert!(matches!(
            d.set_mode(CallingMode::ActivateWaits),
            Err(DispatchError::ModeLocked)
        ));
        d.set_active(false);
        d.set_mode(CallingMode::ActivateWaits).unwrap();
    }

    #[test]
    fn squash_while_active_defers_in_synchronous_mode() {
        let (d, values) = dispatcher(CallingMode::Synchronous, Duration::from_millis(5));
        d.set_event_squash(true);
        d.set_active(true);
        d.dispatch("setGain", vec![Value::Float(1.0)]).unwrap();
        // Drain through a getter, then the register holds the value.
        assert_eq!(d.dispatch("getGain", vec![]).unwrap(), Value::Float(1.0));
        assert!(!values.lock().is_empty());
    }

    #[test]
    fn drop_joins_worker_with_pending_calls() {
        let (d, _) = dispatcher(CallingMode::ActivateWaits, Duration::from_millis(20));
        for i in 0..10 {
            d.dispatch("setGain", vec![Value::from(i)]).unwrap();
        }
        drop(d);
    }
}
