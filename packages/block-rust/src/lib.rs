//! SDR device blocks with deferred call dispatch.
//!
//! Configuration calls on a block are intercepted by a [`CallDispatcher`]
//! that can hand slow setters to a dedicated evaluation worker, so the
//! thread driving the block never waits on hardware configuration.

pub mod block;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod telemetry;

pub use block::{BlockError, SdrBlock};
pub use config::{BlockConfig, DispatchConfig};
pub use dispatch::{CallDispatcher, DispatchError};
pub use sdrblock_core::{CallingMode, Direction, Kwargs, SignalSink, Value};
