//! The SDR block's registered calls and the handler that executes them.

use std::sync::Arc;

use anyhow::{anyhow, bail};
use sdrblock_core::{CallHandler, Device, DeviceFactory, Direction, Value, SETUP_DEVICE_CALL};
use serde_json::json;
use tracing::info;

use super::table::{bool_arg, f64_arg, str_arg, text_arg, CallTable};

// ---------------------------------------------------------------------------
// DeviceSlot
// ---------------------------------------------------------------------------

/// The block's view of its (possibly not yet created) device.
pub struct DeviceSlot {
    direction: Direction,
    /// Device channel for each block port.
    channels: Vec<usize>,
    factory: Arc<dyn DeviceFactory>,
    device: Option<Box<dyn Device>>,
}

impl DeviceSlot {
    fn new(direction: Direction, channels: Vec<usize>, factory: Arc<dyn DeviceFactory>) -> Self {
        Self {
            direction,
            channels,
            factory,
            device: None,
        }
    }

    fn device(&self) -> anyhow::Result<&dyn Device> {
        match &self.device {
            Some(device) => {
                let device: &dyn Device = &**device;
                Ok(device)
            }
            None => bail!("device not setup!"),
        }
    }

    fn device_mut(&mut self) -> anyhow::Result<&mut dyn Device> {
        match &mut self.device {
            Some(device) => {
                let device: &mut dyn Device = &mut **device;
                Ok(device)
            }
            None => bail!("device not setup!"),
        }
    }

    /// Device channel behind block port `port`.
    fn channel(&self, port: usize) -> anyhow::Result<usize> {
        self.channels
            .get(port)
            .copied()
            .ok_or_else(|| anyhow!("block has no port {port}"))
    }

    fn setup(&mut self, args: &Value) -> anyhow::Result<()> {
        let kwargs = args
            .to_kwargs()
            .ok_or_else(|| anyhow!("{SETUP_DEVICE_CALL}: device args must be a map, got {args}"))?;
        let device = self.factory.make(&kwargs)?;
        info!(driver = %device.driver(), direction = %self.direction, "device setup complete");
        self.device = Some(device);
        Ok(())
    }

    /// Applies a scalar to every port, or a list element-wise by port.
    fn apply_all<T, E, A>(&mut self, call: &str, arg: &Value, extract: E, apply: A) -> anyhow::Result<Value>
    where
        T: Clone,
        E: Fn(&Value) -> Option<T>,
        A: Fn(&mut dyn Device, Direction, usize, T) -> anyhow::Result<()>,
    {
        let values: Vec<T> = match arg.as_array() {
            Some(items) => items
                .iter()
                .map(|item| extract(item).ok_or_else(|| anyhow!("{call}: bad list element {item}")))
                .collect::<anyhow::Result<_>>()?,
            None => {
                let value = extract(arg).ok_or_else(|| anyhow!("{call}: bad argument {arg}"))?;
                vec![value; self.channels.len()]
            }
        };
        let dir = self.direction;
        for (port, value) in values.into_iter().enumerate() {
            let chan = self.channel(port)?;
            apply(self.device_mut()?, dir, chan, value)?;
        }
        Ok(Value::Null)
    }

    fn overlay(&self) -> anyhow::Result<Value> {
        let (antennas, clocks) = match &self.device {
            Some(device) => {
                let chan = self.channel(0)?;
                (
                    device.list_antennas(self.direction, chan)?,
                    device.list_clock_sources()?,
                )
            }
            None => (Vec::new(), Vec::new()),
        };
        let descriptor = json!({
            "params": [combo_box("antenna", &antennas), combo_box("clockSource", &clocks)],
        });
        Ok(Value::String(descriptor.to_string()))
    }
}

/// Editable drop-down descriptor with a leading "Default" option.
fn combo_box(key: &str, options: &[String]) -> serde_json::Value {
    let mut entries = vec![json!({ "name": "Default", "value": "\"\"" })];
    entries.extend(
        options
            .iter()
            .map(|name| json!({ "name": name, "value": format!("\"{name}\"") })),
    );
    json!({
        "key": key,
        "widgetType": "ComboBox",
        "widgetKwargs": { "editable": true },
        "options": entries,
    })
}

// ---------------------------------------------------------------------------
// Call registration
// ---------------------------------------------------------------------------

fn nullary<T: Into<Value>>(
    f: impl Fn(&dyn Device, Direction, usize) -> anyhow::Result<T> + Send + Sync + 'static,
    port: usize,
) -> impl Fn(&mut DeviceSlot, &[Value]) -> anyhow::Result<Value> + Send + Sync + 'static {
    move |slot: &mut DeviceSlot, _: &[Value]| {
        let chan = slot.channel(port)?;
        Ok(f(slot.device()?, slot.direction, chan)?.into())
    }
}

#[allow(clippy::too_many_lines)]
fn build_table(num_ports: usize) -> anyhow::Result<CallTable<DeviceSlot>> {
    let mut table = CallTable::new();

    table.register(SETUP_DEVICE_CALL, 1, |slot: &mut DeviceSlot, args: &[Value]| {
        slot.setup(&args[0])?;
        Ok(Value::Null)
    });

    // Whole-block setters: a scalar applies to every port, a list per port.
    table.register("setSampleRate", 1, |slot: &mut DeviceSlot, args: &[Value]| {
        slot.apply_all("setSampleRate", &args[0], Value::as_f64, |d, dir, c, v| {
            d.set_sample_rate(dir, c, v)
        })
    });
    table.register("getSampleRate", 0, nullary(|d, dir, c| d.sample_rate(dir, c), 0));
    table.register("setFrequency", 1, |slot: &mut DeviceSlot, args: &[Value]| {
        slot.apply_all("setFrequency", &args[0], Value::as_f64, |d, dir, c, v| {
            d.set_frequency(dir, c, v)
        })
    });
    table.register("setGain", 1, |slot: &mut DeviceSlot, args: &[Value]| {
        slot.apply_all("setGain", &args[0], Value::as_f64, |d, dir, c, v| d.set_gain(dir, c, v))
    });
    table.register("setGainMode", 1, |slot: &mut DeviceSlot, args: &[Value]| {
        slot.apply_all("setGainMode", &args[0], Value::as_bool, |d, dir, c, v| {
            d.set_gain_mode(dir, c, v)
        })
    });
    table.register("setAntenna", 1, |slot: &mut DeviceSlot, args: &[Value]| {
        slot.apply_all(
            "setAntenna",
            &args[0],
            |v| v.as_str().map(str::to_string),
            |d, dir, c, v: String| d.set_antenna(dir, c, &v),
        )
    });
    table.register("setBandwidth", 1, |slot: &mut DeviceSlot, args: &[Value]| {
        slot.apply_all("setBandwidth", &args[0], Value::as_f64, |d, dir, c, v| {
            d.set_bandwidth(dir, c, v)
        })
    });

    // Per-port calls, suffixed with the port index.
    for port in 0..num_ports {
        let name = format!("setFrequency{port}");
        table.register(name.clone(), 1, move |slot: &mut DeviceSlot, args: &[Value]| {
            let freq = f64_arg(&name, args, 0)?;
            let (dir, chan) = (slot.direction, slot.channel(port)?);
            slot.device_mut()?.set_frequency(dir, chan, freq)?;
            Ok(Value::Null)
        });
        table.register(format!("getFrequency{port}"), 0, nullary(|d, dir, c| d.frequency(dir, c), port));

        let name = format!("setGain{port}");
        table.register(name.clone(), 1, move |slot: &mut DeviceSlot, args: &[Value]| {
            let gain = f64_arg(&name, args, 0)?;
            let (dir, chan) = (slot.direction, slot.channel(port)?);
            slot.device_mut()?.set_gain(dir, chan, gain)?;
            Ok(Value::Null)
        });
        table.register(format!("getGain{port}"), 0, nullary(|d, dir, c| d.gain(dir, c), port));

        let name = format!("setGainMode{port}");
        table.register(name.clone(), 1, move |slot: &mut DeviceSlot, args: &[Value]| {
            let automatic = bool_arg(&name, args, 0)?;
            let (dir, chan) = (slot.direction, slot.channel(port)?);
            slot.device_mut()?.set_gain_mode(dir, chan, automatic)?;
            Ok(Value::Null)
        });
        table.register(format!("getGainMode{port}"), 0, nullary(|d, dir, c| d.gain_mode(dir, c), port));

        let name = format!("setAntenna{port}");
        table.register(name.clone(), 1, move |slot: &mut DeviceSlot, args: &[Value]| {
            let antenna = str_arg(&name, args, 0)?;
            let (dir, chan) = (slot.direction, slot.channel(port)?);
            slot.device_mut()?.set_antenna(dir, chan, antenna)?;
            Ok(Value::Null)
        });
        table.register(format!("getAntenna{port}"), 0, nullary(|d, dir, c| d.antenna(dir, c), port));
        table.register(
            format!("getAntennas{port}"),
            0,
            nullary(|d, dir, c| d.list_antennas(dir, c), port),
        );

        let name = format!("setBandwidth{port}");
        table.register(name.clone(), 1, move |slot: &mut DeviceSlot, args: &[Value]| {
            let bw = f64_arg(&name, args, 0)?;
            let (dir, chan) = (slot.direction, slot.channel(port)?);
            slot.device_mut()?.set_bandwidth(dir, chan, bw)?;
            Ok(Value::Null)
        });
        table.register(format!("getBandwidth{port}"), 0, nullary(|d, dir, c| d.bandwidth(dir, c), port));
    }

    // Clocking and settings.
    table.register("setClockSource", 1, |slot: &mut DeviceSlot, args: &[Value]| {
        let source = str_arg("setClockSource", args, 0)?;
        slot.device_mut()?.set_clock_source(source)?;
        Ok(Value::Null)
    });
    table.register("getClockSource", 0, |slot: &mut DeviceSlot, _: &[Value]| {
        Ok(slot.device()?.clock_source()?.into())
    });
    table.register("getClockSources", 0, |slot: &mut DeviceSlot, _: &[Value]| {
        Ok(slot.device()?.list_clock_sources()?.into())
    });
    table.register("setGlobalSetting", 2, |slot: &mut DeviceSlot, args: &[Value]| {
        let key = str_arg("setGlobalSetting", args, 0)?;
        slot.device_mut()?.write_setting(key, &text_arg(args, 1))?;
        Ok(Value::Null)
    });

    table.register("overlay", 0, |slot: &mut DeviceSlot, _: &[Value]| slot.overlay());

    // Probes: global getters first, then per-port getters.
    for getter in ["getSampleRate", "getClockSource", "getClockSources"] {
        table.register_probe(getter)?;
    }
    for port in 0..num_ports {
        for base in [
            "getFrequency",
            "getGain",
            "getGainMode",
            "getAntenna",
            "getAntennas",
            "getBandwidth",
        ] {
            table.register_probe(&format!("{base}{port}"))?;
        }
    }

    Ok(table)
}

// ---------------------------------------------------------------------------
// DeviceCalls
// ---------------------------------------------------------------------------

/// [`CallHandler`] executing the block's registered calls against its device.
pub struct DeviceCalls {
    table: CallTable<DeviceSlot>,
    slot: DeviceSlot,
}

impl DeviceCalls {
    /// Builds the call table for `channels.len()` ports.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is inconsistent (a probe without a getter).
    pub fn new(
        direction: Direction,
        channels: Vec<usize>,
        factory: Arc<dyn DeviceFactory>,
    ) -> anyhow::Result<Self> {
        let table = build_table(channels.len())?;
        Ok(Self {
            table,
            slot: DeviceSlot::new(direction, channels, factory),
        })
    }

    /// Getters with registered probes, in registration order.
    #[must_use]
    pub fn probes(&self) -> Vec<String> {
        self.table.probes().to_vec()
    }

    #[must_use]
    pub fn table(&self) -> &CallTable<DeviceSlot> {
        &self.table
    }

    #[must_use]
    pub fn has_device(&self) -> bool {
        self.slot.device.is_some()
    }
}

impl CallHandler for DeviceCalls {
    fn call(&mut self, name: &str, args: &[Value]) -> anyhow::Result<Value> {
        self.table.invoke(&mut self.slot, name, args)
    }
}

#[cfg(test)]
mod tests {
    use sdrblock_core::Kwargs;

    use super::*;
    use crate::device::SimFactory;

    fn calls(factory: SimFactory, ports: usize) -> DeviceCalls {
        DeviceCalls::new(Direction::Rx, (0..ports).collect(), Arc::new(factory)).unwrap()
    }

    fn setup(calls: &mut DeviceCalls) {
        calls
            .call(SETUP_DEVICE_CALL, &[Value::from(Kwargs::new())])
            .unwrap();
    }

    #[test]
    fn calls_before_setup_fail() {
        let mut calls = calls(SimFactory::new(), 1);
        let err = calls.call("getGain0", &[]).unwrap_err();
        assert_eq!(err.to_string(), "device not setup!");
        assert!(!calls.has_device());
    }

    #[test]
    fn scalar_setter_applies_to_every_port() {
        let factory = SimFactory::new();
        let log = factory.log();
        let mut calls = calls(factory, 2);
        setup(&mut calls);

        calls.call("setGain", &[Value::Float(10.0)]).unwrap();
        assert_eq!(log.values_of("set_gain"), vec![Value::Float(10.0); 2]);
        assert_eq!(calls.call("getGain1", &[]).unwrap(), Value::Float(10.0));
    }

    #[test]
    fn list_setter_applies_per_port() {
        let factory = SimFactory::new();
        let log = factory.log();
        let mut calls = calls(factory, 2);
        setup(&mut calls);

        calls
            .call("setFrequency", &[Value::from(vec![100e6, 200e6])])
            .unwrap();
        assert_eq!(calls.call("getFrequency0", &[]).unwrap(), Value::Float(100e6));
        assert_eq!(calls.call("getFrequency1", &[]).unwrap(), Value::Float(200e6));
        assert_eq!(log.values_of("set_frequency").len(), 2);

        let err = calls
            .call("setFrequency", &[Value::from(vec![1e6, 2e6, 3e6])])
            .unwrap_err();
        assert_eq!(err.to_string(), "block has no port 2");
    }

    #[test]
    fn ports_map_to_configured_channels() {
        let factory = SimFactory::new();
        let log = factory.log();
        let mut calls =
            DeviceCalls::new(Direction::Rx, vec![1], Arc::new(factory)).unwrap();
        setup(&mut calls);
        calls.call("setAntenna0", &[Value::from("TX/RX")]).unwrap();
        assert_eq!(log.lines().last().unwrap(), r#"set_antenna(1, "TX/RX")"#);
    }

    #[test]
    fn setup_requires_map_args() {
        let mut calls = calls(SimFactory::new(), 1);
        let err = calls.call(SETUP_DEVICE_CALL, &[Value::Int(1)]).unwrap_err();
        assert!(err.to_string().contains("device args must be a map"));
    }

    #[test]
    fn overlay_lists_antennas_and_clocks() {
        let mut calls = calls(SimFactory::new(), 1);
        let before = calls.call("overlay", &[]).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(before.as_str().unwrap()).unwrap();
        assert_eq!(parsed["params"][0]["options"].as_array().unwrap().len(), 1);

        setup(&mut calls);
        let after = calls.call("overlay", &[]).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(after.as_str().unwrap()).unwrap();
        assert_eq!(parsed["params"][0]["key"], "antenna");
        assert_eq!(parsed["params"][0]["options"][2]["name"], "TX/RX");
        assert_eq!(parsed["params"][1]["options"][1]["value"], "\"internal\"");
    }

    #[test]
    fn probes_cover_per_port_getters() {
        let calls = calls(SimFactory::new(), 2);
        let probes = calls.probes();
        assert_eq!(probes.len(), 3 + 2 * 6);
        assert!(probes.contains(&"getBandwidth1".to_string()));
        assert!(calls.table().contains("setGainMode1"));
    }

    #[test]
    fn global_setting_stringifies_value() {
        let factory = SimFactory::new();
        let log = factory.log();
        let mut calls = calls(factory, 1);
        setup(&mut calls);
        calls
            .call("setGlobalSetting", &[Value::from("biastee"), Value::Bool(true)])
            .unwrap();
        assert_eq!(log.lines().last().unwrap(), r#"write_setting("biastee=true")"#);
    }
}
