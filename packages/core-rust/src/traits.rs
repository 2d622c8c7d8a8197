use crate::types::{Direction, Kwargs, Value};

/// Executes named calls against the hosted object.
///
/// The dispatcher owns exactly one handler behind its execution lock, so
/// `call` is never entered concurrently. Implementations may block for as
/// long as the hardware needs.
pub trait CallHandler: Send + 'static {
    /// Execute `name` with positional `args`.
    ///
    /// # Errors
    ///
    /// Returns an error when the call is unknown, its arguments do not match
    /// any registered signature, or the underlying device fails.
    fn call(&mut self, name: &str, args: &[Value]) -> anyhow::Result<Value>;
}

/// Receives values emitted on named signals (probe results, activation
/// snapshots of every probed getter).
///
/// Used as `Arc<dyn SignalSink>`.
pub trait SignalSink: Send + Sync {
    fn emit(&self, signal: &str, value: Value);
}

/// Signal sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSignalSink;

impl SignalSink for NullSignalSink {
    fn emit(&self, _signal: &str, _value: Value) {}
}

/// Synchronous SDR device controls.
///
/// Every method may block on hardware I/O and may fail. Channel indexes are
/// device channels, not block port indexes.
pub trait Device: Send {
    /// Driver key reported for diagnostics.
    fn driver(&self) -> &str;

    fn set_sample_rate(&mut self, dir: Direction, chan: usize, rate: f64) -> anyhow::Result<()>;
    fn sample_rate(&self, dir: Direction, chan: usize) -> anyhow::Result<f64>;

    fn set_frequency(&mut self, dir: Direction, chan: usize, freq: f64) -> anyhow::Result<()>;
    fn frequency(&self, dir: Direction, chan: usize) -> anyhow::Result<f64>;

    fn set_gain(&mut self, dir: Direction, chan: usize, gain: f64) -> anyhow::Result<()>;
    fn gain(&self, dir: Direction, chan: usize) -> anyhow::Result<f64>;

    fn set_gain_mode(&mut self, dir: Direction, chan: usize, automatic: bool)
        -> anyhow::Result<()>;
    fn gain_mode(&self, dir: Direction, chan: usize) -> anyhow::Result<bool>;

    fn set_antenna(&mut self, dir: Direction, chan: usize, name: &str) -> anyhow::Result<()>;
    fn antenna(&self, dir: Direction, chan: usize) -> anyhow::Result<String>;
    fn list_antennas(&self, dir: Direction, chan: usize) -> anyhow::Result<Vec<String>>;

    fn set_bandwidth(&mut self, dir: Direction, chan: usize, bw: f64) -> anyhow::Result<()>;
    fn bandwidth(&self, dir: Direction, chan: usize) -> anyhow::Result<f64>;

    fn set_clock_source(&mut self, source: &str) -> anyhow::Result<()>;
    fn clock_source(&self) -> anyhow::Result<String>;
    fn list_clock_sources(&self) -> anyhow::Result<Vec<String>>;

    /// Write a driver-specific global setting.
    fn write_setting(&mut self, key: &str, value: &str) -> anyhow::Result<()>;
}

/// Creates devices from keyword arguments (the `setupDevice` call).
///
/// Used as `Arc<dyn DeviceFactory>`.
pub trait DeviceFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns an error when no device matches `args` or it cannot be opened.
    fn make(&self, args: &Kwargs) -> anyhow::Result<Box<dyn Device>>;
}
