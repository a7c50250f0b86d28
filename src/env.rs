//! The host side of the VM: clock, bus and device list.

use crate::error::Result;
use crate::packet::{DeviceId, Packet};

/// A device as reported by [`Environment::devices`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: DeviceId,
    /// Service class of every service index; index 0 is the control service.
    pub services: Vec<u32>,
}

impl DeviceInfo {
    pub fn new(id: DeviceId, services: Vec<u32>) -> Self {
        DeviceInfo { id, services }
    }

    pub fn service_class_at(&self, index: usize) -> Option<u32> {
        self.services.get(index).copied()
    }
}

/// Everything the VM needs from its host.
///
/// The VM never blocks or spawns: the host delivers bus traffic through
/// [`crate::Vm::process_packet`] and friends, and calls [`crate::Vm::tick`]
/// once [`crate::Vm::next_deadline`] has passed.
pub trait Environment {
    /// Monotonic time in milliseconds.
    fn now(&self) -> u64;

    fn send(&mut self, packet: &Packet) -> Result<()>;

    /// Devices currently on the bus.
    fn devices(&self) -> Vec<DeviceInfo>;

    /// Output of the script's `print()`.
    fn log(&mut self, message: &str) {
        tracing::info!(target: "jacscript::script", "{message}");
    }

    /// Values passed to the script's `upload()`.
    fn cloud_upload(&mut self, label: &str, values: &[f64]) {
        tracing::info!(target: "jacscript::cloud", label, ?values, "upload");
    }
}
