//! Evaluation worker for deferred calls.
//!
//! A single OS thread per dispatcher drains the call queue in FIFO order and
//! executes each entry under the execution lock. Failures never unwind out of
//! the worker: they are logged and parked in the error slot for the next
//! caller to collect.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use sdrblock_core::{CachedCall, CallHandler, SETUP_DEVICE_CALL};
use tracing::{debug, error, info};

use super::state::Shared;
use crate::telemetry;

// ---------------------------------------------------------------------------
// Loop steps
// ---------------------------------------------------------------------------

/// What the worker does after waking with the state lock held.
#[derive(Debug)]
enum Step {
    /// Stop flag observed. Carries the number of abandoned entries.
    Stop(usize),
    /// A newer entry with the same name is queued behind this one.
    Skip(CachedCall),
    Execute(CachedCall),
}

fn next_step<H>(shared: &Shared<H>) -> Step {
    let mut state = shared.state.lock();
    loop {
        if state.stopped {
            state.worker_exited = true;
            return Step::Stop(state.queue.len());
        }
        if let Some(current) = state.queue.pop_front() {
            let superseded = state.squash_enabled()
                && state.queue.iter().any(|queued| queued.same_call(&current));
            if superseded {
                return Step::Skip(current);
            }
            state.in_flight = true;
            return Step::Execute(current);
        }
        // Empty queue: spurious wake-ups and stop signals both land here.
        shared.cond.wait(&mut state);
    }
}

// ---------------------------------------------------------------------------
// Worker loop
// ---------------------------------------------------------------------------

/// Spawns the evaluation worker thread.
///
/// # Errors
///
/// Returns an error if the OS refuses to create the thread.
pub(crate) fn spawn<H: CallHandler>(
    shared: Arc<Shared<H>>,
    thread_name: &str,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(thread_name.to_string())
        .spawn(move || run(&shared))
}

/// Runs until the stop flag is set or a `setupDevice` call fails.
pub(crate) fn run<H: CallHandler>(shared: &Shared<H>) {
    info!("evaluation worker started");
    loop {
        let current = match next_step(shared) {
            Step::Stop(abandoned) => {
                info!(abandoned, "evaluation worker stopped");
                return;
            }
            Step::Skip(current) => {
                // Let drain waiters recheck: the queue just shrank.
                shared.cond.notify_all();
                debug!(call = %current.name, "squashed superseded call");
                metrics::counter!(telemetry::CALLS_SQUASHED).increment(1);
                continue;
            }
            Step::Execute(current) => current,
        };
        shared.cond.notify_all();

        let result = shared.exec.lock().call(&current.name, &current.args);

        let fatal = {
            let mut state = shared.state.lock();
            state.in_flight = false;
            match result {
                Ok(_) => {
                    metrics::counter!(telemetry::CALLS_EXECUTED).increment(1);
                    false
                }
                Err(err) => {
                    metrics::counter!(telemetry::CALLS_FAILED).increment(1);
                    error!(call = %current.name, error = %format!("{err:#}"), "deferred call failed");
                    if !state.record_failure(&current.name, err) {
                        debug!(call = %current.name, "error slot occupied; keeping earlier failure");
                    }
                    let fatal = current.name == SETUP_DEVICE_CALL;
                    if fatal {
                        state.worker_exited = true;
                    }
                    fatal
                }
            }
        };
        shared.cond.notify_all();

        if fatal {
            error!("device setup failed; evaluation worker exiting, block is unusable");
            return;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parking_lot::Mutex;
    use sdrblock_core::{CallingMode, Value};

    use super::*;
    use crate::config::DispatchConfig;

    #[derive(Default)]
    struct Recorder {
        seen: Arc<Mutex<Vec<String>>>,
        fail: Vec<&'static str>,
    }

    impl CallHandler for Recorder {
        fn call(&mut self, name: &str, _args: &[Value]) -> anyhow::Result<Value> {
            self.seen.lock().push(name.to_string());
            if self.fail.contains(&name) {
                anyhow::bail!("{name} rejected");
            }
            Ok(Value::Null)
        }
    }

    fn config() -> DispatchConfig {
        DispatchConfig {
            calling_mode: CallingMode::ActivateWaits,
            ..DispatchConfig::default()
        }
    }

    fn wait_drained<H>(shared: &Shared<H>) {
        let mut state = shared.state.lock();
        while !state.is_drained() && !state.worker_exited {
            shared
                .cond
                .wait_for(&mut state, Duration::from_millis(50));
        }
    }

    fn stop<H>(shared: &Shared<H>, handle: JoinHandle<()>) {
        shared.state.lock().stopped = true;
        shared.cond.notify_all();
        handle.join().unwrap();
    }

    #[test]
    fn executes_queued_calls_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Recorder {
            seen: seen.clone(),
            ..Recorder::default()
        };
        let shared = Arc::new(Shared::new(recorder, &config()));
        let handle = spawn(shared.clone(), "eval-test").unwrap();

        {
            let mut state = shared.state.lock();
            for name in ["setA", "setB", "setC"] {
                state.queue.push_back(CachedCall::new(name, vec![]));
            }
        }
        shared.cond.notify_all();
        wait_drained(&shared);

        assert_eq!(*seen.lock(), vec!["setA", "setB", "setC"]);
        stop(&shared, handle);
    }

    #[test]
    fn ordinary_failure_keeps_worker_running() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Recorder {
            seen: seen.clone(),
            fail: vec!["setA"],
        };
        let shared = Arc::new(Shared::new(recorder, &config()));
        let handle = spawn(shared.clone(), "eval-test").unwrap();

        {
            let mut state = shared.state.lock();
            state.queue.push_back(CachedCall::new("setA", vec![]));
            state.queue.push_back(CachedCall::new("setB", vec![]));
        }
        shared.cond.notify_all();
        wait_drained(&shared);

        assert_eq!(*seen.lock(), vec!["setA", "setB"]);
        let mut state = shared.state.lock();
        assert!(!state.worker_exited);
        assert_eq!(state.take_error().unwrap_err().call_name(), Some("setA"));
        drop(state);
        stop(&shared, handle);
    }

    #[test]
    fn setup_failure_ends_the_loop() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Recorder {
            seen: seen.clone(),
            fail: vec![SETUP_DEVICE_CALL],
        };
        let shared = Arc::new(Shared::new(recorder, &config()));

        {
            let mut state = shared.state.lock();
            state.queue.push_back(CachedCall::new(SETUP_DEVICE_CALL, vec![]));
            state.queue.push_back(CachedCall::new("setB", vec![]));
        }
        // Run inline: returns once setup fails.
        run(&shared);

        assert_eq!(*seen.lock(), vec![SETUP_DEVICE_CALL]);
        let state = shared.state.lock();
        assert!(state.worker_exited);
        assert_eq!(state.queue.len(), 1);
    }

    #[test]
    fn stop_abandons_pending_entries() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Recorder {
            seen: seen.clone(),
            ..Recorder::default()
        };
        let shared = Shared::new(recorder, &config());
        {
            let mut state = shared.state.lock();
            state.queue.push_back(CachedCall::new("setA", vec![]));
            state.stopped = true;
        }
        run(&shared);
        assert!(seen.lock().is_empty());
        assert!(shared.state.lock().worker_exited);
    }

    #[test]
    fn squash_skips_superseded_entry_when_active() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Recorder {
            seen: seen.clone(),
            ..Recorder::default()
        };
        let shared = Shared::new(recorder, &config());
        {
            let mut state = shared.state.lock();
            state.squash = true;
            state.active = true;
            state.queue.push_back(CachedCall::new("setGain", vec![Value::Float(1.0)]));
            state.queue.push_back(CachedCall::new("setFrequency", vec![]));
            state.queue.push_back(CachedCall::new("setGain", vec![Value::Float(2.0)]));
        }

        assert!(matches!(next_step(&shared), Step::Skip(c) if c.name == "setGain"));
        assert!(matches!(next_step(&shared), Step::Execute(c) if c.name == "setFrequency"));
        shared.state.lock().in_flight = false;
        match next_step(&shared) {
            Step::Execute(c) => assert_eq!(c.args, vec![Value::Float(2.0)]),
            other => panic!("unexpected step {other:?}"),
        }
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn squash_inactive_executes_duplicates() {
        let shared = Shared::new(Recorder::default(), &config());
        {
            let mut state = shared.state.lock();
            state.squash = true;
            state.queue.push_back(CachedCall::new("setGain", vec![]));
            state.queue.push_back(CachedCall::new("setGain", vec![]));
        }
        assert!(matches!(next_step(&shared), Step::Execute(_)));
    }
}
