//! In-memory simulated device.
//!
//! Applies every mutation to plain fields and records it in a shared
//! [`DeviceLog`], so tests and the demo binary can observe exactly which
//! calls reached the device and in what order.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use anyhow::{bail, ensure};
use parking_lot::{Condvar, Mutex};
use sdrblock_core::{Device, DeviceFactory, Direction, Kwargs, Value};

/// Gain range accepted by the simulated frontend, in dB.
pub const GAIN_RANGE: (f64, f64) = (0.0, 70.0);

// ---------------------------------------------------------------------------
// HoldGate
// ---------------------------------------------------------------------------

/// A latch that parks device calls while closed.
///
/// Tests close the gate to keep the evaluation worker inside a device call
/// while they queue more work, then open it to let everything through.
#[derive(Debug, Clone, Default)]
pub struct HoldGate {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl HoldGate {
    /// Creates an open gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn close(&self) {
        *self.inner.0.lock() = true;
    }

    pub fn open(&self) {
        *self.inner.0.lock() = false;
        self.inner.1.notify_all();
    }

    /// Returns once the gate is open.
    pub fn pass(&self) {
        let (closed, cond) = &*self.inner;
        let mut closed = closed.lock();
        while *closed {
            cond.wait(&mut closed);
        }
    }
}

// ---------------------------------------------------------------------------
// DeviceLog
// ---------------------------------------------------------------------------

/// One mutation applied to the simulated device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceEvent {
    pub op: &'static str,
    pub chan: Option<usize>,
    pub value: Value,
}

impl fmt::Display for DeviceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.chan {
            Some(chan) => write!(f, "{}({chan}, {})", self.op, self.value),
            None => write!(f, "{}({})", self.op, self.value),
        }
    }
}

/// Shared, append-only record of applied mutations.
#[derive(Debug, Clone, Default)]
pub struct DeviceLog {
    events: Arc<Mutex<Vec<DeviceEvent>>>,
}

impl DeviceLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, op: &'static str, chan: Option<usize>, value: Value) {
        self.events.lock().push(DeviceEvent { op, chan, value });
    }

    #[must_use]
    pub fn events(&self) -> Vec<DeviceEvent> {
        self.events.lock().clone()
    }

    /// Events rendered as `op(chan, value)` strings.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.events.lock().iter().map(ToString::to_string).collect()
    }

    /// Values applied by `op`, in order.
    #[must_use]
    pub fn values_of(&self, op: &str) -> Vec<Value> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.op == op)
            .map(|e| e.value.clone())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// SimDevice
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct ChannelState {
    sample_rate: f64,
    frequency: f64,
    gain: f64,
    gain_mode: bool,
    antenna: String,
    bandwidth: f64,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            sample_rate: 1e6,
            frequency: 100e6,
            gain: 0.0,
            gain_mode: false,
            antenna: "RX".to_string(),
            bandwidth: 1e6,
        }
    }
}

/// Simulated device with a fixed number of channels per direction.
pub struct SimDevice {
    driver: String,
    channels: BTreeMap<(Direction, usize), ChannelState>,
    antennas: Vec<String>,
    clock_sources: Vec<String>,
    clock_source: String,
    settings: BTreeMap<String, String>,
    failing_ops: HashSet<String>,
    gate: HoldGate,
    log: DeviceLog,
}

impl SimDevice {
    fn new(driver: String, num_channels: usize, factory: &SimFactory) -> Self {
        let channels = [Direction::Rx, Direction::Tx]
            .into_iter()
            .flat_map(|dir| (0..num_channels).map(move |chan| ((dir, chan), ChannelState::default())))
            .collect();
        Self {
            driver,
            channels,
            antennas: vec!["RX".to_string(), "TX/RX".to_string()],
            clock_sources: vec!["internal".to_string(), "external".to_string()],
            clock_source: "internal".to_string(),
            settings: BTreeMap::new(),
            failing_ops: factory.failing_ops.clone(),
            gate: factory.gate.clone(),
            log: factory.log.clone(),
        }
    }

    fn channel(&self, dir: Direction, chan: usize) -> anyhow::Result<&ChannelState> {
        match self.channels.get(&(dir, chan)) {
            Some(state) => Ok(state),
            None => bail!("no {dir} channel {chan}"),
        }
    }

    /// Passes the gate, applies injected failures, then records and applies
    /// the mutation.
    fn mutate(
        &mut self,
        op: &'static str,
        dir: Direction,
        chan: usize,
        value: Value,
        apply: impl FnOnce(&mut ChannelState),
    ) -> anyhow::Result<()> {
        self.gate.pass();
        ensure!(!self.failing_ops.contains(op), "{op} failed on {}", self.driver);
        let Some(state) = self.channels.get_mut(&(dir, chan)) else {
            bail!("no {dir} channel {chan}");
        };
        apply(state);
        self.log.push(op, Some(chan), value);
        Ok(())
    }

    fn mutate_global(&mut self, op: &'static str, value: Value) -> anyhow::Result<()> {
        self.gate.pass();
        ensure!(!self.failing_ops.contains(op), "{op} failed on {}", self.driver);
        self.log.push(op, None, value);
        Ok(())
    }
}

impl Device for SimDevice {
    fn driver(&self) -> &str {
        &self.driver
    }

    fn set_sample_rate(&mut self, dir: Direction, chan: usize, rate: f64) -> anyhow::Result<()> {
        ensure!(rate > 0.0, "sample rate must be positive, got {rate}");
        self.mutate("set_sample_rate", dir, chan, rate.into(), |s| s.sample_rate = rate)
    }

    fn sample_rate(&self, dir: Direction, chan: usize) -> anyhow::Result<f64> {
        Ok(self.channel(dir, chan)?.sample_rate)
    }

    fn set_frequency(&mut self, dir: Direction, chan: usize, freq: f64) -> anyhow::Result<()> {
        ensure!(freq > 0.0, "frequency must be positive, got {freq}");
        self.mutate("set_frequency", dir, chan, freq.into(), |s| s.frequency = freq)
    }

    fn frequency(&self, dir: Direction, chan: usize) -> anyhow::Result<f64> {
        Ok(self.channel(dir, chan)?.frequency)
    }

    fn set_gain(&mut self, dir: Direction, chan: usize, gain: f64) -> anyhow::Result<()> {
        let (lo, hi) = GAIN_RANGE;
        ensure!((lo..=hi).contains(&gain), "gain {gain} outside [{lo}, {hi}]");
        self.mutate("set_gain", dir, chan, gain.into(), |s| s.gain = gain)
    }

    fn gain(&self, dir: Direction, chan: usize) -> anyhow::Result<f64> {
        Ok(self.channel(dir, chan)?.gain)
    }

    fn set_gain_mode(&mut self, dir: Direction, chan: usize, automatic: bool) -> anyhow::Result<()> {
        self.mutate("set_gain_mode", dir, chan, automatic.into(), |s| {
            s.gain_mode = automatic;
        })
    }

    fn gain_mode(&self, dir: Direction, chan: usize) -> anyhow::Result<bool> {
        Ok(self.channel(dir, chan)?.gain_mode)
    }

    fn set_antenna(&mut self, dir: Direction, chan: usize, name: &str) -> anyhow::Result<()> {
        ensure!(
            self.antennas.iter().any(|a| a == name),
            "unknown antenna {name:?}"
        );
        let owned = name.to_string();
        self.mutate("set_antenna", dir, chan, name.into(), |s| s.antenna = owned)
    }

    fn antenna(&self, dir: Direction, chan: usize) -> anyhow::Result<String> {
        Ok(self.channel(dir, chan)?.antenna.clone())
    }

    fn list_antennas(&self, dir: Direction, chan: usize) -> anyhow::Result<Vec<String>> {
        self.channel(dir, chan)?;
        Ok(self.antennas.clone())
    }

    fn set_bandwidth(&mut self, dir: Direction, chan: usize, bw: f64) -> anyhow::Result<()> {
        self.mutate("set_bandwidth", dir, chan, bw.into(), |s| s.bandwidth = bw)
    }

    fn bandwidth(&self, dir: Direction, chan: usize) -> anyhow::Result<f64> {
        Ok(self.channel(dir, chan)?.bandwidth)
    }

    fn set_clock_source(&mut self, source: &str) -> anyhow::Result<()> {
        ensure!(
            self.clock_sources.iter().any(|c| c == source),
            "unknown clock source {source:?}"
        );
        self.mutate_global("set_clock_source", source.into())?;
        self.clock_source = source.to_string();
        Ok(())
    }

    fn clock_source(&self) -> anyhow::Result<String> {
        Ok(self.clock_source.clone())
    }

    fn list_clock_sources(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.clock_sources.clone())
    }

    fn write_setting(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        self.mutate_global("write_setting", Value::from(format!("{key}={value}")))?;
        self.settings.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SimFactory
// ---------------------------------------------------------------------------

/// Creates [`SimDevice`]s for the `"sim"` driver.
///
/// All devices made by one factory share its log and hold gate.
#[derive(Debug, Clone)]
pub struct SimFactory {
    num_channels: usize,
    failing_ops: HashSet<String>,
    setup_error: Option<String>,
    gate: HoldGate,
    log: DeviceLog,
}

impl Default for SimFactory {
    fn default() -> Self {
        Self {
            num_channels: 2,
            failing_ops: HashSet::new(),
            setup_error: None,
            gate: HoldGate::new(),
            log: DeviceLog::new(),
        }
    }
}

impl SimFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_channels(mut self, num_channels: usize) -> Self {
        self.num_channels = num_channels;
        self
    }

    /// Makes every call to `op` (e.g. `"set_gain"`) fail.
    #[must_use]
    pub fn failing(mut self, op: &str) -> Self {
        self.failing_ops.insert(op.to_string());
        self
    }

    /// Makes `make` fail with `message`.
    #[must_use]
    pub fn failing_setup(mut self, message: &str) -> Self {
        self.setup_error = Some(message.to_string());
        self
    }

    #[must_use]
    pub fn with_gate(mut self, gate: HoldGate) -> Self {
        self.gate = gate;
        self
    }

    #[must_use]
    pub fn log(&self) -> DeviceLog {
        self.log.clone()
    }
}

impl DeviceFactory for SimFactory {
    fn make(&self, args: &Kwargs) -> anyhow::Result<Box<dyn Device>> {
        self.gate.pass();
        if let Some(message) = &self.setup_error {
            bail!("{message}");
        }
        let driver = args.get("driver").map_or("sim", String::as_str);
        ensure!(driver == "sim", "no match for driver {driver:?}");
        self.log.push("make", None, Value::from(args.clone()));
        Ok(Box::new(SimDevice::new(driver.to_string(), self.num_channels, self)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kwargs(pairs: &[(&str, &str)]) -> Kwargs {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn make_records_and_applies() {
        let factory = SimFactory::new();
        let mut device = factory.make(&kwargs(&[("driver", "sim")])).unwrap();
        device.set_frequency(Direction::Rx, 1, 433e6).unwrap();
        device.set_gain(Direction::Rx, 1, 20.0).unwrap();

        assert_eq!(device.frequency(Direction::Rx, 1).unwrap(), 433e6);
        assert_eq!(device.gain(Direction::Rx, 1).unwrap(), 20.0);
        assert_eq!(
            factory.log().lines(),
            vec![
                r#"make({"driver":"sim"})"#,
                "set_frequency(1, 433000000.0)",
                "set_gain(1, 20.0)",
            ]
        );
    }

    #[test]
    fn rejects_other_drivers_and_bad_values() {
        let factory = SimFactory::new();
        assert!(factory.make(&kwargs(&[("driver", "uhd")])).is_err());

        let mut device = factory.make(&Kwargs::new()).unwrap();
        assert!(device.set_gain(Direction::Rx, 0, 99.0).is_err());
        assert!(device.set_antenna(Direction::Rx, 0, "LNAW").is_err());
        assert!(device.set_frequency(Direction::Tx, 5, 1e6).is_err());
        assert_eq!(factory.log().len(), 1);
    }

    #[test]
    fn injected_failures() {
        let factory = SimFactory::new().failing("set_bandwidth");
        let mut device = factory.make(&Kwargs::new()).unwrap();
        let err = device.set_bandwidth(Direction::Rx, 0, 2e6).unwrap_err();
        assert_eq!(err.to_string(), "set_bandwidth failed on sim");

        let broken = SimFactory::new().failing_setup("usb timeout");
        assert_eq!(broken.make(&Kwargs::new()).err().unwrap().to_string(), "usb timeout");
        assert!(broken.log().is_empty());
    }

    #[test]
    fn gate_holds_calls_until_opened() {
        let gate = HoldGate::new();
        let factory = SimFactory::new().with_gate(gate.clone());
        let mut device = factory.make(&Kwargs::new()).unwrap();
        gate.close();

        let log = factory.log();
        let worker = std::thread::spawn(move || {
            device.set_gain(Direction::Rx, 0, 5.0).unwrap();
        });
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(log.values_of("set_gain"), Vec::<Value>::new());

        gate.open();
        worker.join().unwrap();
        assert_eq!(log.values_of("set_gain"), vec![Value::Float(5.0)]);
    }
}
