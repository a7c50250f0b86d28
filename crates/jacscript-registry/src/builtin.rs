//! Services every catalog starts with.
//!
//! Register, event and command identifiers follow the bus conventions:
//! `0x01` intensity, `0x02` value, `0x101` reading and so on, with
//! service-specific packets from `0x80`/`0x180` up.

use crate::spec::{FieldSpec, PacketKind, PacketSpec, ServiceSpec};

pub const BUTTON: u32 = 0x1473_a263;
pub const SWITCH: u32 = 0x1ad2_9402;
pub const POTENTIOMETER: u32 = 0x1f27_4746;
pub const THERMOMETER: u32 = 0x1421_bac7;
pub const SERVO: u32 = 0x12fc_9103;
pub const LED: u32 = 0x1e30_48f8;
pub const RELAY: u32 = 0x183f_e656;
/// Script-local signalling role created by `condition()`.
pub const CONDITION: u32 = 0x1196_796d;
/// Command that signals a [`CONDITION`] role.
pub const CONDITION_SIGNAL: u16 = 0x80;
/// Event raised on a [`CONDITION`] role when it is signalled.
pub const CONDITION_SIGNALLED: u16 = 0x01;

fn reg(name: &str, kind: PacketKind, id: u16) -> PacketSpec {
    PacketSpec::register(name, kind, id)
}

/// The `_system` packets.
pub fn system() -> ServiceSpec {
    use PacketKind::*;
    ServiceSpec::new("_system", 0)
        .with_packet(reg("intensity", Rw, 0x01))
        .with_packet(reg("value", Rw, 0x02))
        .with_packet(reg("streaming_samples", Rw, 0x03))
        .with_packet(reg("streaming_interval", Rw, 0x04))
        .with_packet(reg("low_threshold", Rw, 0x05))
        .with_packet(reg("high_threshold", Rw, 0x06))
        .with_packet(reg("max_power", Rw, 0x07))
        .with_packet(reg("reading_range", Rw, 0x08))
        .with_packet(reg("reading", Ro, 0x101))
        .with_packet(reg("streaming_preferred_interval", Const, 0x102))
        .with_packet(reg("status_code", Ro, 0x103))
        .with_packet(reg("min_reading", Const, 0x104))
        .with_packet(reg("max_reading", Const, 0x105))
        .with_packet(reg("reading_error", Ro, 0x106))
        .with_packet(reg("variant", Const, 0x107))
        .with_packet(reg("reading_resolution", Const, 0x108))
        .with_packet(reg("min_value", Const, 0x110))
        .with_packet(reg("max_value", Const, 0x111))
        .with_packet(PacketSpec::event("active", 0x01))
        .with_packet(PacketSpec::event("inactive", 0x02))
        .with_packet(PacketSpec::event("change", 0x03))
        .with_packet(PacketSpec::event("status_code_changed", 0x04))
        .with_packet(PacketSpec::command("announce", 0x00))
        .with_packet(PacketSpec::command("calibrate", 0x02))
}

fn sensor(spec: ServiceSpec) -> ServiceSpec {
    spec.with_packet(
        reg("streaming_samples", PacketKind::Rw, 0x03).with_field(FieldSpec::new("samples", 1)),
    )
    .with_packet(
        reg("streaming_interval", PacketKind::Rw, 0x04).with_field(FieldSpec::new("interval", 4)),
    )
}

pub fn services() -> Vec<ServiceSpec> {
    use PacketKind::*;
    vec![
        sensor(
            ServiceSpec::new("button", BUTTON)
                .with_packet(
                    reg("pressure", Ro, 0x101).with_field(FieldSpec::new("pressure", 2).with_shift(16)),
                )
                .with_packet(reg("analog", Const, 0x180).with_field(FieldSpec::new("analog", 1)))
                .with_packet(PacketSpec::event("pressed", 0x01))
                .with_packet(PacketSpec::event("released", 0x02).with_field(FieldSpec::new("time", 4)))
                .with_packet(PacketSpec::event("hold", 0x81).with_field(FieldSpec::new("time", 4))),
        ),
        sensor(
            ServiceSpec::new("switch", SWITCH)
                .with_packet(reg("active", Ro, 0x101).with_field(FieldSpec::new("active", 1)))
                .with_packet(PacketSpec::event("on", 0x01))
                .with_packet(PacketSpec::event("off", 0x02)),
        ),
        sensor(
            ServiceSpec::new("potentiometer", POTENTIOMETER).with_packet(
                reg("position", Ro, 0x101).with_field(FieldSpec::new("position", 2).with_shift(16)),
            ),
        ),
        sensor(
            ServiceSpec::new("thermometer", THERMOMETER)
                .with_packet(
                    reg("temperature", Ro, 0x101)
                        .with_field(FieldSpec::new("temperature", -4).with_shift(10)),
                )
                .with_packet(
                    reg("min_temperature", Const, 0x104)
                        .with_field(FieldSpec::new("min_temperature", -4).with_shift(10)),
                )
                .with_packet(
                    reg("max_temperature", Const, 0x105)
                        .with_field(FieldSpec::new("max_temperature", -4).with_shift(10)),
                )
                .with_packet(
                    reg("temperature_error", Ro, 0x106)
                        .with_field(FieldSpec::new("temperature_error", 4).with_shift(10)),
                ),
        ),
        ServiceSpec::new("servo", SERVO)
            .with_packet(reg("angle", Rw, 0x02).with_field(FieldSpec::new("angle", -4).with_shift(16)))
            .with_packet(reg("enabled", Rw, 0x01).with_field(FieldSpec::new("enabled", 1)))
            .with_packet(reg("offset", Rw, 0x81).with_field(FieldSpec::new("offset", -4).with_shift(16)))
            .with_packet(
                reg("min_angle", Const, 0x110).with_field(FieldSpec::new("min_angle", -4).with_shift(16)),
            )
            .with_packet(
                reg("max_angle", Const, 0x111).with_field(FieldSpec::new("max_angle", -4).with_shift(16)),
            ),
        ServiceSpec::new("led", LED)
            .with_packet(
                reg("brightness", Rw, 0x01).with_field(FieldSpec::new("brightness", 2).with_shift(16)),
            )
            .with_packet(
                reg("color", Rw, 0x180)
                    .with_field(FieldSpec::new("red", 1))
                    .with_field(FieldSpec::new("green", 1))
                    .with_field(FieldSpec::new("blue", 1)),
            )
            .with_packet(PacketSpec::command("on", 0x80))
            .with_packet(PacketSpec::command("off", 0x81))
            .with_packet(
                PacketSpec::command("set_color", 0x82)
                    .with_field(FieldSpec::new("red", 1))
                    .with_field(FieldSpec::new("green", 1))
                    .with_field(FieldSpec::new("blue", 1)),
            ),
        ServiceSpec::new("relay", RELAY)
            .with_packet(reg("active", Rw, 0x01).with_field(FieldSpec::new("active", 1)))
            .with_packet(reg("variant", Const, 0x107).with_field(FieldSpec::new("variant", 1)))
            .with_packet(PacketSpec::event("active", 0x01))
            .with_packet(PacketSpec::event("inactive", 0x02)),
        ServiceSpec::new("condition", CONDITION)
            .with_packet(PacketSpec::command("signal", CONDITION_SIGNAL))
            .with_packet(PacketSpec::event("signalled", CONDITION_SIGNALLED)),
    ]
}
