//! Calling modes for the deferred dispatch layer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Controls when setters are deferred to the evaluation worker and whether
/// block activation waits for the queue to drain.
///
/// | Mode | Setters deferred | Activation |
/// |------|------------------|------------|
/// | `Synchronous` | no | waits for drain |
/// | `ActivateWaits` | yes | waits for drain |
/// | `ActivateThrows` | yes | fails if not drained |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallingMode {
    #[default]
    Synchronous,
    ActivateWaits,
    ActivateThrows,
}

impl CallingMode {
    /// Whether setters go to the evaluation worker regardless of squash.
    #[must_use]
    pub fn defers_setters(self) -> bool {
        !matches!(self, Self::Synchronous)
    }

    /// Whether the readiness gate blocks until the queue drains.
    #[must_use]
    pub fn activate_waits(self) -> bool {
        !matches!(self, Self::ActivateThrows)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Synchronous => "SYNCHRONOUS",
            Self::ActivateWaits => "ACTIVATE_WAITS",
            Self::ActivateThrows => "ACTIVATE_THROWS",
        }
    }
}

impl fmt::Display for CallingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a mode string names none of the known modes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown calling mode: {0}")]
pub struct UnknownModeError(pub String);

impl FromStr for CallingMode {
    type Err = UnknownModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SYNCHRONOUS" => Ok(Self::Synchronous),
            "ACTIVATE_WAITS" => Ok(Self::ActivateWaits),
            "ACTIVATE_THROWS" => Ok(Self::ActivateThrows),
            other => Err(UnknownModeError(other.to_string())),
        }
    }
}
