//! Little-endian codecs for packet buffer fields.
//!
//! Script values are always `f64`; fields on the wire are fixed-width
//! integers or floats. Loads divide by `2^shift`, stores multiply by it and
//! then round and clamp integers into range.

use super::OpFmt;

/// `2^n` as a float, for binary-point shifts.
#[inline]
pub fn shift_scale(n: u32) -> f64 {
    (n as f64).exp2()
}

/// Round half towards positive infinity, the way script `Math.round` does.
#[inline]
pub fn js_round(v: f64) -> f64 {
    let f = v.floor();
    if v - f >= 0.5 { f + 1.0 } else { f }
}

impl OpFmt {
    /// Read a field at `off`, or `None` if it does not fit in `buf`.
    pub fn read(self, buf: &[u8], off: usize) -> Option<f64> {
        let bytes = buf.get(off..off.checked_add(self.byte_size())?)?;
        let mut raw = [0u8; 8];
        raw[..bytes.len()].copy_from_slice(bytes);
        let v = match self {
            OpFmt::U8 => raw[0] as f64,
            OpFmt::U16 => u16::from_le_bytes([raw[0], raw[1]]) as f64,
            OpFmt::U32 => u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64,
            OpFmt::U64 => u64::from_le_bytes(raw) as f64,
            OpFmt::I8 => raw[0] as i8 as f64,
            OpFmt::I16 => i16::from_le_bytes([raw[0], raw[1]]) as f64,
            OpFmt::I32 => i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64,
            OpFmt::I64 => i64::from_le_bytes(raw) as f64,
            OpFmt::F32 => f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64,
            OpFmt::F64 => f64::from_le_bytes(raw),
        };
        Some(v)
    }

    /// Write a field at `off`. Writes that do not fit in `buf` are dropped.
    ///
    /// `v` is expected to be clamped already; NaN encodes as zero for
    /// integer formats.
    pub fn write(self, buf: &mut [u8], off: usize, v: f64) {
        let Some(end) = off.checked_add(self.byte_size()) else {
            return;
        };
        let Some(dst) = buf.get_mut(off..end) else {
            return;
        };
        match self {
            OpFmt::U8 => dst.copy_from_slice(&(v as u8).to_le_bytes()),
            OpFmt::U16 => dst.copy_from_slice(&(v as u16).to_le_bytes()),
            OpFmt::U32 => dst.copy_from_slice(&(v as u32).to_le_bytes()),
            OpFmt::U64 => dst.copy_from_slice(&(v as u64).to_le_bytes()),
            OpFmt::I8 => dst.copy_from_slice(&(v as i8).to_le_bytes()),
            OpFmt::I16 => dst.copy_from_slice(&(v as i16).to_le_bytes()),
            OpFmt::I32 => dst.copy_from_slice(&(v as i32).to_le_bytes()),
            OpFmt::I64 => dst.copy_from_slice(&(v as i64).to_le_bytes()),
            OpFmt::F32 => dst.copy_from_slice(&(v as f32).to_le_bytes()),
            OpFmt::F64 => dst.copy_from_slice(&v.to_le_bytes()),
        }
    }

    /// Round and clamp `v` into this format's range. Floats pass through.
    pub fn clamp(self, v: f64) -> f64 {
        if self.is_float() {
            return v;
        }
        let bits = self.bit_size();
        let v = js_round(v);
        if self.is_signed() {
            let min = -shift_scale(bits - 1);
            let max = -min - 1.0;
            if v < min {
                min
            } else if v > max {
                max
            } else {
                v
            }
        } else {
            let max = shift_scale(bits) - 1.0;
            if v < 0.0 {
                0.0
            } else if v > max {
                max
            } else {
                v
            }
        }
    }

    /// Load a field the way `LOAD_CELL` does: NaN when out of range.
    pub fn load_scaled(self, buf: &[u8], off: usize, shift: u32) -> f64 {
        match self.read(buf, off) {
            Some(v) => v / shift_scale(shift),
            None => f64::NAN,
        }
    }

    /// Store a field the way `STORE_CELL` does.
    pub fn store_scaled(self, buf: &mut [u8], off: usize, shift: u32, v: f64) {
        self.write(buf, off, self.clamp(v * shift_scale(shift)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_half_up() {
        assert_eq!(js_round(2.5), 3.0);
        assert_eq!(js_round(-2.5), -2.0);
        assert_eq!(js_round(-2.6), -3.0);
        assert_eq!(js_round(0.49999999999999994), 0.0);
    }

    #[test]
    fn signed_store_is_little_endian() {
        let mut buf = [0u8; 4];
        OpFmt::I32.store_scaled(&mut buf, 0, 0, 5.0);
        assert_eq!(buf, [5, 0, 0, 0]);
        OpFmt::I32.store_scaled(&mut buf, 0, 0, -2.0);
        assert_eq!(buf, [0xfe, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn clamp_saturates() {
        assert_eq!(OpFmt::U8.clamp(300.0), 255.0);
        assert_eq!(OpFmt::U8.clamp(-4.0), 0.0);
        assert_eq!(OpFmt::I8.clamp(-300.0), -128.0);
        assert_eq!(OpFmt::I16.clamp(40000.0), 32767.0);
        assert_eq!(OpFmt::F32.clamp(1e10), 1e10);
    }

    #[test]
    fn shifted_fixed_point() {
        let mut buf = [0u8; 2];
        // u0.16 storing 0.5
        OpFmt::U16.store_scaled(&mut buf, 0, 16, 0.5);
        assert_eq!(buf, [0x00, 0x80]);
        assert_eq!(OpFmt::U16.load_scaled(&buf, 0, 16), 0.5);
    }

    #[test]
    fn out_of_range_load_is_nan() {
        let buf = [1u8, 2];
        assert!(OpFmt::U32.load_scaled(&buf, 0, 0).is_nan());
        assert!(OpFmt::U8.load_scaled(&buf, 2, 0).is_nan());
        assert_eq!(OpFmt::U8.load_scaled(&buf, 1, 0), 2.0);
    }

    #[test]
    fn out_of_range_store_is_dropped() {
        let mut buf = [0u8; 2];
        OpFmt::U32.store_scaled(&mut buf, 0, 0, 7.0);
        assert_eq!(buf, [0, 0]);
    }

    #[test]
    fn floats_round_trip() {
        let mut buf = [0u8; 8];
        OpFmt::F64.store_scaled(&mut buf, 0, 0, -1.25);
        assert_eq!(OpFmt::F64.read(&buf, 0), Some(-1.25));
        OpFmt::F32.store_scaled(&mut buf, 4, 0, 0.5);
        assert_eq!(OpFmt::F32.read(&buf, 4), Some(0.5));
    }
}
