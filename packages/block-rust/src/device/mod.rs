//! Device backends.
//!
//! The [`Device`] and [`DeviceFactory`] traits live in `sdrblock-core`;
//! this module provides the in-memory [`sim`] backend used by tests and the
//! demo binary.

pub mod sim;

pub use sdrblock_core::{Device, DeviceFactory};
pub use sim::{DeviceLog, HoldGate, SimDevice, SimFactory};
