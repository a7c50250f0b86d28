//! Bus packets as seen by the VM.

use std::fmt;

use jacscript_core::format::{
    CMD_EVENT_CODE_MASK, CMD_EVENT_MASK, CMD_GET_REG, CMD_REG_MASK, CMD_SET_REG, CMD_TYPE_MASK,
};
use jacscript_core::OpFmt;

/// Identifier of a device on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DeviceId(pub u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A packet to or from one service of one device.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Packet {
    pub device: DeviceId,
    pub service_index: u8,
    pub service_command: u16,
    /// Sent to the device, as opposed to reported by it.
    pub is_command: bool,
    pub data: Vec<u8>,
}

impl Packet {
    /// A report from `device`.
    pub fn report(device: DeviceId, service_index: u8, service_command: u16, data: Vec<u8>) -> Self {
        Packet {
            device,
            service_index,
            service_command,
            is_command: false,
            data,
        }
    }

    /// A command addressed to `device`.
    pub fn command(device: DeviceId, service_index: u8, service_command: u16, data: Vec<u8>) -> Self {
        Packet {
            is_command: true,
            ..Packet::report(device, service_index, service_command, data)
        }
    }

    /// An event report.
    pub fn event(device: DeviceId, service_index: u8, code: u8, data: Vec<u8>) -> Self {
        Packet::report(device, service_index, CMD_EVENT_MASK | code as u16, data)
    }

    #[inline]
    pub fn is_report(&self) -> bool {
        !self.is_command
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Event code of an event report.
    pub fn event_code(&self) -> Option<u8> {
        if self.is_report() && self.service_command & CMD_EVENT_MASK != 0 {
            Some((self.service_command & CMD_EVENT_CODE_MASK) as u8)
        } else {
            None
        }
    }

    /// A register read: the request, or the report answering it.
    #[inline]
    pub fn is_reg_get(&self) -> bool {
        self.service_command & CMD_TYPE_MASK == CMD_GET_REG
    }

    #[inline]
    pub fn is_reg_set(&self) -> bool {
        self.service_command & CMD_TYPE_MASK == CMD_SET_REG
    }

    /// Register code of a get or set packet.
    pub fn register_identifier(&self) -> Option<u16> {
        (self.is_reg_get() || self.is_reg_set()).then_some(self.service_command & CMD_REG_MASK)
    }

    /// Read a payload field; `None` if it does not fit.
    pub fn get_number(&self, fmt: OpFmt, offset: usize) -> Option<f64> {
        fmt.read(&self.data, offset)
    }

    /// Write a payload field, growing the payload to fit.
    pub fn set_number(&mut self, fmt: OpFmt, offset: usize, value: f64) {
        let end = offset + fmt.byte_size();
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        fmt.write(&mut self.data, offset, fmt.clamp(value));
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = if self.is_command { "to" } else { "from" };
        write!(f, "{dir} {}/{} ", self.device, self.service_index)?;
        if let Some(code) = self.event_code() {
            write!(f, "event {code:#04x}")?;
        } else if let Some(reg) = self.register_identifier() {
            let kind = if self.is_reg_get() { "get" } else { "set" };
            write!(f, "{kind} reg {reg:#05x}")?;
        } else {
            write!(f, "cmd {:#06x}", self.service_command)?;
        }
        if !self.data.is_empty() {
            write!(f, " ")?;
            for b in &self.data {
                write!(f, "{b:02x}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEV: DeviceId = DeviceId(0xabcd);

    #[test]
    fn events_are_reports_with_the_event_bit() {
        let ev = Packet::event(DEV, 1, 0x81, vec![]);
        assert_eq!(ev.event_code(), Some(0x81));
        let mut cmd = ev.clone();
        cmd.is_command = true;
        assert_eq!(cmd.event_code(), None);
    }

    #[test]
    fn register_classification() {
        let get = Packet::report(DEV, 1, 0x1101, vec![]);
        assert!(get.is_reg_get());
        assert!(!get.is_reg_set());
        assert_eq!(get.register_identifier(), Some(0x101));

        let set = Packet::command(DEV, 1, 0x2002, vec![]);
        assert!(set.is_reg_set());
        assert!(!set.is_reg_get());
        assert_eq!(set.register_identifier(), Some(0x002));

        assert_eq!(Packet::command(DEV, 1, 0x80, vec![]).register_identifier(), None);
    }

    #[test]
    fn numbers_grow_the_payload() {
        let mut p = Packet::command(DEV, 2, 0x2002, vec![]);
        p.set_number(OpFmt::I32, 0, 5.0);
        assert_eq!(p.data, vec![5, 0, 0, 0]);
        p.set_number(OpFmt::U8, 4, 300.0);
        assert_eq!(p.data, vec![5, 0, 0, 0, 255]);
        assert_eq!(p.get_number(OpFmt::I32, 0), Some(5.0));
        assert_eq!(p.get_number(OpFmt::I32, 2), None);
    }

    #[test]
    fn display() {
        let p = Packet::command(DeviceId(1), 3, 0x2002, vec![5, 0]);
        assert_eq!(p.to_string(), "to 0000000000000001/3 set reg 0x002 0500");
        let ev = Packet::event(DeviceId(1), 3, 1, vec![]);
        assert_eq!(ev.to_string(), "from 0000000000000001/3 event 0x01");
    }
}
