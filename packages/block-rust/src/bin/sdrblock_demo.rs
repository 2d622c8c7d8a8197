//! sdrblock-demo - drives a simulated SDR block through the deferred dispatcher
//!
//! Usage:
//!   sdrblock-demo --mode ACTIVATE_WAITS --squash
//!   sdrblock-demo --config block.json --json-logs

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sdrblock::device::SimFactory;
use sdrblock::telemetry;
use sdrblock::{BlockConfig, CallingMode, Direction, Kwargs, SdrBlock, SignalSink, Value};

#[derive(Parser, Debug)]
#[command(name = "sdrblock-demo")]
#[command(about = "Runs a simulated SDR block through a burst of configuration calls", long_about = None)]
struct Args {
    /// Block configuration file (JSON)
    #[arg(short, long, env = "SDRBLOCK_CONFIG")]
    config: Option<PathBuf>,

    /// Calling mode: SYNCHRONOUS, ACTIVATE_WAITS or ACTIVATE_THROWS
    #[arg(short, long, env = "SDRBLOCK_MODE")]
    mode: Option<CallingMode>,

    /// Squash queued setters while the block is active
    #[arg(long, env = "SDRBLOCK_SQUASH")]
    squash: bool,

    /// Number of frequency updates sent while the block is active
    #[arg(long, default_value_t = 8)]
    burst: usize,

    /// Log level for the sdrblock targets (overrides RUST_LOG)
    #[arg(long)]
    log: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

struct PrintSignals;

impl SignalSink for PrintSignals {
    fn emit(&self, signal: &str, value: Value) {
        println!("signal {signal} = {value}");
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    telemetry::init_tracing(args.log.as_deref(), args.json_logs)?;

    let mut config = match &args.config {
        Some(path) => BlockConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => BlockConfig::default(),
    };
    if let Some(mode) = args.mode {
        config.dispatch.calling_mode = mode;
    }
    config.dispatch.event_squash |= args.squash;

    let factory = SimFactory::new();
    let log = factory.log();
    let block = SdrBlock::new(Direction::Rx, Arc::new(factory), config, Arc::new(PrintSignals))?;

    block.setup_device(Kwargs::new())?;
    block.call("setSampleRate", vec![Value::from(1e6)])?;
    block.call("setFrequency", vec![Value::from(100e6)])?;
    block.call("setGain", vec![Value::from(20.0)])?;
    block.activate()?;

    for step in 0..args.burst {
        #[allow(clippy::cast_precision_loss)]
        let freq = 100e6 + step as f64 * 1e5;
        block.call("setFrequency", vec![Value::from(freq)])?;
    }
    let freq = block.call("getFrequency0", Vec::new())?;
    println!("final frequency {freq}");
    block.deactivate();

    for line in log.lines() {
        println!("{line}");
    }
    Ok(())
}
