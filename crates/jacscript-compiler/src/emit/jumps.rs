//! Labels and jump patching.
//!
//! A jump is always emitted as a `SET_B 0` + `JUMP` pair so that its offset
//! can be filled in once the target is known. The offset is relative to the
//! instruction after the `JUMP`; the direction travels in the `BACK` bit.

use jacscript_core::OpTop;

use super::OpWriter;

/// Largest offset a `SET_B` prefix plus the inline field can express.
const MAX_JUMP: i64 = 0x3ffff;

/// A jump target within one procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Label(usize);

#[derive(Debug)]
pub(super) struct LabelInfo {
    name: &'static str,
    offset: Option<usize>,
    /// Offsets of the `SET_B` word of every jump to this label.
    uses: Vec<usize>,
}

impl OpWriter {
    pub fn mk_label(&mut self, name: &'static str) -> Label {
        self.labels.push(LabelInfo {
            name,
            offset: None,
            uses: Vec::new(),
        });
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the current location.
    pub fn emit_label(&mut self, label: Label) {
        let at = self.code.len();
        let info = &mut self.labels[label.0];
        assert!(info.offset.is_none(), "label '{}' bound twice", info.name);
        info.offset = Some(at);
    }

    /// Jump to `label`; with `unless` set, only when that register is zero.
    pub fn emit_jump(&mut self, label: Label, unless: Option<u8>) {
        self.labels[label.0].uses.push(self.code.len());
        self.emit_raw(OpTop::SetB, 0);
        let arg = match unless {
            Some(r) => ((r as u16) << 8) | (1 << 6),
            None => 0,
        };
        self.emit_raw(OpTop::Jump, arg);
    }

    /// Offsets of every bound label.
    pub fn label_offsets(&self) -> Vec<usize> {
        self.labels.iter().filter_map(|l| l.offset).collect()
    }

    pub(super) fn patch_labels(&mut self, strict: bool) {
        for info in &self.labels {
            let Some(target) = info.offset else {
                assert!(
                    !strict || info.uses.is_empty(),
                    "label '{}' used but never bound",
                    info.name
                );
                continue;
            };
            for &at in &info.uses {
                let mut off = target as i64 - at as i64 - 2;
                assert!(off != -2, "jump to itself at {at}");
                let back = off < 0;
                if back {
                    off = -off;
                }
                assert!(off <= MAX_JUMP, "jump offset {off} out of range");
                self.code[at] |= (off >> 6) as u16;
                self.code[at + 1] |= (off & 0x3f) as u16 | if back { 1 << 7 } else { 0 };
            }
        }
    }
}
