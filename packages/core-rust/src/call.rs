//! Call naming conventions and the cached call entry.
//!
//! The dispatcher knows nothing about what a call does. Everything it needs
//! to decide between synchronous and deferred execution comes from the call
//! name:
//!
//! - `probe*` names are diagnostic reads that bypass the queue entirely
//! - `overlay` is the UI-descriptor call, also bypassing the queue
//! - `set*` names mutate device state and may be deferred
//! - everything else is a getter and always runs synchronously

use serde::{Deserialize, Serialize};

use crate::types::Value;

/// Name prefix identifying a mutating call.
pub const SETTER_PREFIX: &str = "set";

/// Name prefix identifying a probe call.
pub const PROBE_PREFIX: &str = "probe";

/// Name of the UI-descriptor call.
pub const OVERLAY_CALL: &str = "overlay";

/// Name of the call that creates the underlying device. A deferred failure of
/// this call terminates the evaluation worker.
pub const SETUP_DEVICE_CALL: &str = "setupDevice";

/// How the dispatcher routes a call, derived purely from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// Diagnostic read that re-enters the dispatcher for its getter.
    Probe,
    /// UI-descriptor generation.
    Descriptor,
    /// Mutating call, eligible for deferral.
    Setter,
    /// Read-only call.
    Getter,
}

impl CallKind {
    /// Classifies a call by name.
    ///
    /// A bare `"set"` or `"probe"` is not a setter or probe: the prefix must be
    /// followed by at least one character.
    #[must_use]
    pub fn of(name: &str) -> Self {
        if name.len() > PROBE_PREFIX.len() && name.starts_with(PROBE_PREFIX) {
            Self::Probe
        } else if name == OVERLAY_CALL {
            Self::Descriptor
        } else if name.len() > SETTER_PREFIX.len() && name.starts_with(SETTER_PREFIX) {
            Self::Setter
        } else {
            Self::Getter
        }
    }

    /// Probe and descriptor calls never touch the queue.
    #[must_use]
    pub fn bypasses_queue(self) -> bool {
        matches!(self, Self::Probe | Self::Descriptor)
    }
}

/// Name of the probe call for a getter: `getGain0` -> `probeGetGain0`.
#[must_use]
pub fn probe_name(getter: &str) -> String {
    let mut chars = getter.chars();
    match chars.next() {
        Some(first) => format!("{PROBE_PREFIX}{}{}", first.to_uppercase(), chars.as_str()),
        None => PROBE_PREFIX.to_string(),
    }
}

/// Getter targeted by a probe call: `probeGetGain0` -> `getGain0`.
///
/// Returns `None` when `name` is not a probe.
#[must_use]
pub fn probe_target(name: &str) -> Option<String> {
    if CallKind::of(name) != CallKind::Probe {
        return None;
    }
    let rest = &name[PROBE_PREFIX.len()..];
    let mut chars = rest.chars();
    let first = chars.next()?;
    Some(format!("{}{}", first.to_lowercase(), chars.as_str()))
}

/// Signal name emitted with a getter's result: `getGain0` -> `getGain0Triggered`.
#[must_use]
pub fn triggered_signal(getter: &str) -> String {
    format!("{getter}Triggered")
}

/// A pending invocation waiting in the dispatch queue.
///
/// Identity for squash purposes is the name alone; arguments are never compared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedCall {
    pub name: String,
    pub args: Vec<Value>,
}

impl CachedCall {
    #[must_use]
    pub fn new(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Whether `other` supersedes this entry under squash.
    #[must_use]
    pub fn same_call(&self, other: &CachedCall) -> bool {
        self.name == other.name
    }
}
