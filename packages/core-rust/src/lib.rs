//! Call values, cached calls, calling modes, and device traits shared by `sdrblock`.

pub mod call;
pub mod mode;
pub mod traits;
pub mod types;

pub use call::{CachedCall, CallKind, OVERLAY_CALL, SETUP_DEVICE_CALL};
pub use mode::{CallingMode, UnknownModeError};
pub use traits::{CallHandler, Device, DeviceFactory, NullSignalSink, SignalSink};
pub use types::{Direction, Kwargs, Value};
