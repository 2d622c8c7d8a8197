//! Logging setup and metric names.
//!
//! The library only emits `tracing` events and `metrics` counters; installing
//! a subscriber or a recorder is left to the binary embedding it.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Setters routed to the evaluation worker.
pub const CALLS_DEFERRED: &str = "sdrblock_calls_deferred_total";
/// Queued setters skipped because a newer call with the same name was queued.
pub const CALLS_SQUASHED: &str = "sdrblock_calls_squashed_total";
/// Deferred calls that completed successfully.
pub const CALLS_EXECUTED: &str = "sdrblock_calls_executed_total";
/// Deferred calls that failed and were parked in the error slot.
pub const CALLS_FAILED: &str = "sdrblock_calls_failed_total";

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "sdrblock=info";

/// Builds the env filter from `RUST_LOG`, an explicit level, or the default.
#[must_use]
pub fn env_filter(level: Option<&str>) -> EnvFilter {
    match level {
        Some(level) => EnvFilter::new(format!("sdrblock={level}")),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
    }
}

/// Installs a global `tracing` subscriber writing to stderr.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(level: Option<&str>, json: bool) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry().with(env_filter(level));
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_level_scopes_to_crate() {
        let filter = env_filter(Some("debug"));
        assert_eq!(filter.to_string(), "sdrblock=debug");
    }

    #[test]
    fn metric_names_are_distinct() {
        let names = [CALLS_DEFERRED, CALLS_SQUASHED, CALLS_EXECUTED, CALLS_FAILED];
        for (i, a) in names.iter().enumerate() {
            for b in &names[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
