//! Configuration types for the dispatcher and the SDR block.

use std::path::Path;

use sdrblock_core::CallingMode;
use serde::Deserialize;

/// Configuration of a [`CallDispatcher`](crate::dispatch::CallDispatcher).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Initial calling mode.
    pub calling_mode: CallingMode,
    /// Initial squash flag. Only takes effect while the block is active.
    pub event_squash: bool,
    /// Name given to the evaluation worker thread.
    pub worker_thread_name: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            calling_mode: CallingMode::Synchronous,
            event_squash: false,
            worker_thread_name: "sdrblock-eval".to_string(),
        }
    }
}

/// Configuration of an [`SdrBlock`](crate::block::SdrBlock).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BlockConfig {
    pub dispatch: DispatchConfig,
    /// Device channels served by the block. Empty means channel 0 only.
    pub channels: Vec<usize>,
    /// Emit activation signals for every probed getter on `activate()`.
    pub emit_activation_signals: bool,
}

impl Default for BlockConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchConfig::default(),
            channels: vec![0],
            emit_activation_signals: true,
        }
    }
}

impl BlockConfig {
    /// Loads a block configuration from a JSON file. Missing fields take
    /// their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Channels with the empty list normalized to `[0]`.
    #[must_use]
    pub fn effective_channels(&self) -> Vec<usize> {
        if self.channels.is_empty() {
            vec![0]
        } else {
            self.channels.clone()
        }
    }
}
