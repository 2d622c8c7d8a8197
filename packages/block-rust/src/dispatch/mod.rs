//! Deferred call dispatch.
//!
//! 1. **Dispatcher** (`dispatcher`): classifies each named call and either
//!    executes it on the caller's thread or queues it
//! 2. **Readiness gate** (`readiness`): lets block activation wait for, or
//!    check, queue drain
//! 3. **Evaluation worker** (`worker`): one background thread executing
//!    queued calls in FIFO order, squashing superseded setters
//! 4. **State** (`state`): the mutex/condvar-protected queue and error slot
//!    shared by all of the above

pub mod dispatcher;
pub mod error;
pub mod readiness;
pub(crate) mod state;
pub(crate) mod worker;

pub use dispatcher::CallDispatcher;
pub use error::DispatchError;
