//! Field extraction for raw instruction words.

use super::OpTop;

/// One 16-bit instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instr(pub u16);

impl Instr {
    /// Assemble a word from a class and its 12-bit payload.
    #[inline]
    pub fn new(op: OpTop, arg12: u16) -> Self {
        assert!(arg12 <= 0xfff, "instruction operand {arg12:#x} out of range");
        Instr(((op as u16) << 12) | arg12)
    }

    /// The instruction class, or `None` for the unused values 13..=15.
    #[inline]
    pub fn op(self) -> Option<OpTop> {
        OpTop::try_from((self.0 >> 12) as u8).ok()
    }

    #[inline]
    pub fn is_prefix(self) -> bool {
        (self.0 >> 12) <= OpTop::SetHigh as u16
    }

    #[inline]
    pub fn arg12(self) -> u16 {
        self.0 & 0xfff
    }

    #[inline]
    pub fn arg10(self) -> u16 {
        self.0 & 0x3ff
    }

    #[inline]
    pub fn arg8(self) -> u16 {
        self.0 & 0xff
    }

    #[inline]
    pub fn arg6(self) -> u16 {
        self.0 & 0x3f
    }

    #[inline]
    pub fn arg4(self) -> u16 {
        self.0 & 0xf
    }

    /// Bits 8..12: the sub-operation of UNARY/BINARY, the first register of
    /// cell and jump instructions, the argument count of CALL.
    #[inline]
    pub fn subop(self) -> u16 {
        self.arg12() >> 8
    }

    /// Bits 4..8: the second register of UNARY/BINARY.
    #[inline]
    pub fn reg1(self) -> usize {
        (self.arg8() >> 4) as usize
    }

    /// Bits 0..4: the source register of UNARY/BINARY.
    #[inline]
    pub fn reg2(self) -> usize {
        self.arg4() as usize
    }

    /// `BACK` bit of a JUMP.
    #[inline]
    pub fn jump_back(self) -> bool {
        self.0 & (1 << 7) != 0
    }

    /// `IF_ZERO` bit of a JUMP.
    #[inline]
    pub fn jump_if_zero(self) -> bool {
        self.0 & (1 << 6) != 0
    }
}

/// Prefix operands accumulated ahead of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Params {
    pub a: u32,
    pub b: u32,
    pub c: u32,
    pub d: u32,
}

impl Params {
    /// Fold one prefix word in. Returns `false` for non-prefix words.
    pub fn absorb(&mut self, instr: Instr) -> bool {
        match instr.op() {
            Some(OpTop::SetA) => self.a = instr.arg12() as u32,
            Some(OpTop::SetB) => self.b = instr.arg12() as u32,
            Some(OpTop::SetC) => self.c = instr.arg12() as u32,
            Some(OpTop::SetD) => self.d = instr.arg12() as u32,
            Some(OpTop::SetHigh) => {
                let high = (instr.arg10() as u32) << 12;
                match instr.arg12() >> 10 {
                    0 => self.a |= high,
                    1 => self.b |= high,
                    2 => self.c |= high,
                    _ => self.d |= high,
                }
            }
            _ => return false,
        }
        true
    }

    /// Operands as seen by a non-prefix instruction: A, B and D combined
    /// with the inline fields of `instr` the way the interpreter does.
    pub fn resolve(self, instr: Instr) -> Params {
        let mut p = self;
        match instr.op() {
            Some(OpTop::LoadCell) | Some(OpTop::StoreCell) => {
                p.a = (p.a << 2) | (instr.arg8() >> 6) as u32;
                p.b = (p.b << 6) | instr.arg6() as u32;
            }
            Some(OpTop::Jump) | Some(OpTop::Call) => {
                p.b = (p.b << 6) | instr.arg6() as u32;
            }
            Some(OpTop::Sync) => {
                p.a = (p.a << 4) | instr.subop() as u32;
            }
            Some(OpTop::Async) => {
                p.d = (p.d << 4) | instr.subop() as u32;
            }
            _ => {}
        }
        p
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_fields() {
        let i = Instr::new(OpTop::Binary, 0x1f3);
        assert_eq!(i.op(), Some(OpTop::Binary));
        assert_eq!(i.subop(), 1);
        assert_eq!(i.reg1(), 15);
        assert_eq!(i.reg2(), 3);
    }

    #[test]
    fn set_high_targets_selected_param() {
        let mut p = Params::default();
        assert!(p.absorb(Instr::new(OpTop::SetB, 0x123)));
        assert!(p.absorb(Instr::new(OpTop::SetHigh, (1 << 10) | 0x5)));
        assert_eq!(p.b, 0x5123);
        assert!(!p.absorb(Instr::new(OpTop::Sync, 0)));
    }

    #[test]
    fn resolve_cell_operands() {
        let p = Params {
            a: 1,
            b: 2,
            ..Default::default()
        };
        // reg 3, kind low bits 0b01, idx low bits 5
        let i = Instr::new(OpTop::LoadCell, (3 << 8) | (1 << 6) | 5);
        let r = p.resolve(i);
        assert_eq!(r.a, 0b101);
        assert_eq!(r.b, (2 << 6) | 5);
    }

    #[test]
    fn jump_bits() {
        let i = Instr::new(OpTop::Jump, (2 << 8) | (1 << 7) | (1 << 6) | 9);
        assert!(i.jump_back());
        assert!(i.jump_if_zero());
        assert_eq!(i.arg6(), 9);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn operand_overflow_is_a_defect() {
        Instr::new(OpTop::SetA, 0x1000);
    }
}
