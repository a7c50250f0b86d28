//! Service, packet and field descriptions.

use jacscript_core::OpFmt;
use jacscript_core::format::{CMD_GET_REG, CMD_SET_REG, system_reg};

/// What a packet is on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    /// A register whose value never changes.
    Const,
    /// A read-only register.
    Ro,
    /// A read-write register.
    Rw,
    Event,
    Command,
    /// The response to a command.
    Report,
}

impl PacketKind {
    #[inline]
    pub fn is_register(self) -> bool {
        matches!(self, PacketKind::Const | PacketKind::Ro | PacketKind::Rw)
    }

    #[inline]
    pub fn is_event(self) -> bool {
        self == PacketKind::Event
    }

    #[inline]
    pub fn is_command(self) -> bool {
        self == PacketKind::Command
    }
}

/// One fixed-width field of a packet payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    /// Size in bytes; negative for signed integers.
    pub storage: i8,
    /// Binary point position for fixed-point fields.
    pub shift: u8,
    pub is_float: bool,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, storage: i8) -> Self {
        Self {
            name: name.into(),
            storage,
            shift: 0,
            is_float: false,
        }
    }

    /// An IEEE float field of `bytes` bytes.
    pub fn float(name: impl Into<String>, bytes: i8) -> Self {
        Self {
            is_float: true,
            ..Self::new(name, bytes)
        }
    }

    /// Fixed point with `shift` fractional bits.
    pub fn with_shift(mut self, shift: u8) -> Self {
        self.shift = shift;
        self
    }

    #[inline]
    pub fn byte_size(&self) -> usize {
        self.storage.unsigned_abs() as usize
    }

    #[inline]
    pub fn is_signed(&self) -> bool {
        self.storage < 0
    }

    /// Buffer format for loads and stores, `None` for unsupported widths.
    pub fn fmt(&self) -> Option<OpFmt> {
        if self.is_float {
            OpFmt::float(self.byte_size())
        } else {
            OpFmt::int(self.byte_size(), self.is_signed())
        }
    }
}

/// A register, event, command or report of a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketSpec {
    pub name: String,
    pub kind: PacketKind,
    /// Register address, event code or command code.
    pub identifier: u16,
    pub fields: Vec<FieldSpec>,
}

impl PacketSpec {
    pub fn new(name: impl Into<String>, kind: PacketKind, identifier: u16) -> Self {
        Self {
            name: name.into(),
            kind,
            identifier,
            fields: Vec::new(),
        }
    }

    pub fn register(name: impl Into<String>, kind: PacketKind, identifier: u16) -> Self {
        debug_assert!(kind.is_register());
        Self::new(name, kind, identifier)
    }

    pub fn event(name: impl Into<String>, identifier: u16) -> Self {
        Self::new(name, PacketKind::Event, identifier)
    }

    pub fn command(name: impl Into<String>, identifier: u16) -> Self {
        Self::new(name, PacketKind::Command, identifier)
    }

    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    /// Total payload size of all fields.
    pub fn payload_size(&self) -> usize {
        self.fields.iter().map(FieldSpec::byte_size).sum()
    }

    /// Command code that reads this register.
    #[inline]
    pub fn get_code(&self) -> u16 {
        self.identifier | CMD_GET_REG
    }

    /// Command code that writes this register.
    #[inline]
    pub fn set_code(&self) -> u16 {
        self.identifier | CMD_SET_REG
    }

    /// Whether `id` names this packet, either verbatim or in camel case.
    pub fn matches_name(&self, id: &str) -> bool {
        self.name == id || camel_case(&self.name) == id
    }
}

/// A service class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    /// Name used in `roles.<name>()`.
    pub name: String,
    pub class_identifier: u32,
    pub packets: Vec<PacketSpec>,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>, class_identifier: u32) -> Self {
        Self {
            name: name.into(),
            class_identifier,
            packets: Vec::new(),
        }
    }

    pub fn with_packet(mut self, packet: PacketSpec) -> Self {
        self.packets.push(packet);
        self
    }

    /// Sensors stream their reading register once armed.
    pub fn is_sensor(&self) -> bool {
        self.packets
            .iter()
            .any(|p| p.kind.is_register() && p.identifier == system_reg::STREAMING_SAMPLES)
    }
}

/// `snake_case` to `camelCase`.
pub fn camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for ch in name.chars() {
        if ch == '_' {
            upper = !out.is_empty();
        } else if upper {
            out.extend(ch.to_uppercase());
            upper = false;
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camel_case_names() {
        assert_eq!(camel_case("streaming_samples"), "streamingSamples");
        assert_eq!(camel_case("reading"), "reading");
        assert_eq!(camel_case("_private"), "private");
    }

    #[test]
    fn field_formats() {
        assert_eq!(FieldSpec::new("x", -4).fmt(), Some(OpFmt::I32));
        assert_eq!(FieldSpec::new("x", 2).with_shift(16).fmt(), Some(OpFmt::U16));
        assert_eq!(FieldSpec::float("x", 8).fmt(), Some(OpFmt::F64));
        assert_eq!(FieldSpec::new("x", 3).fmt(), None);
    }

    #[test]
    fn register_codes() {
        let p = PacketSpec::register("reading", PacketKind::Ro, 0x101)
            .with_field(FieldSpec::new("v", 2))
            .with_field(FieldSpec::new("w", -1));
        assert_eq!(p.get_code(), 0x1101);
        assert_eq!(p.set_code(), 0x2101);
        assert_eq!(p.payload_size(), 3);
        assert!(p.matches_name("reading"));
    }

    #[test]
    fn camel_case_member_lookup() {
        let p = PacketSpec::register("max_power", PacketKind::Rw, 0x07);
        assert!(p.matches_name("maxPower"));
        assert!(p.matches_name("max_power"));
        assert!(!p.matches_name("maxpower"));
    }
}
