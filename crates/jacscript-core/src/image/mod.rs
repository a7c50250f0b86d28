//! Loading binary images back into typed tables.
//!
//! [`ImageInfo::load`] performs every bounds check needed to index the
//! tables safely. [`verify`] goes further and checks that the code itself
//! only references things that exist, which is what a correctly compiled
//! image always satisfies.
//!
//! ## Modules
//!
//! - `verify` - structural and per-instruction verification
//! - `disasm` - human-readable listings

mod disasm;
mod verify;

pub use disasm::{InstrResolver, disassemble, stringify_instr};
pub use verify::verify;

use crate::ImageError;
use crate::format::{
    FUNCTION_HEADER_SIZE, Instr, MAGIC0, MAGIC1, ROLE_HEADER_SIZE, SECTIONS_START,
    STRING_HEADER_SIZE, Section,
};

type Result<T> = std::result::Result<T, ImageError>;

// ============================================================================
// Little-endian readers
// ============================================================================

#[inline]
pub(crate) fn read_u16(buf: &[u8], off: usize) -> Option<u16> {
    Some(u16::from_le_bytes(buf.get(off..off + 2)?.try_into().ok()?))
}

#[inline]
pub(crate) fn read_u32(buf: &[u8], off: usize) -> Option<u32> {
    Some(u32::from_le_bytes(buf.get(off..off + 4)?.try_into().ok()?))
}

// ============================================================================
// Tables
// ============================================================================

/// An `(offset, length)` pair from the section table or a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SectionRange {
    pub start: u32,
    pub len: u32,
}

impl SectionRange {
    #[inline]
    pub fn end(&self) -> u32 {
        self.start + self.len
    }

    #[inline]
    pub fn contains(&self, other: SectionRange) -> bool {
        self.start <= other.start && other.end() <= self.end()
    }
}

/// Descriptor of one compiled function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionInfo {
    /// Byte range of the body within the image.
    pub code: SectionRange,
    pub num_locals: u16,
    /// Scratch slots reserved after the locals for saved registers.
    pub num_regs: u8,
    pub num_params: u8,
    pub flags: u8,
}

impl FunctionInfo {
    /// First instruction, as a halfword index into the whole image.
    #[inline]
    pub fn start_pc(&self) -> usize {
        (self.code.start >> 1) as usize
    }

    /// One past the last instruction.
    #[inline]
    pub fn end_pc(&self) -> usize {
        (self.code.end() >> 1) as usize
    }

    /// Size of an activation's locals array.
    #[inline]
    pub fn frame_size(&self) -> usize {
        self.num_locals as usize + self.num_regs as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleInfo {
    pub class_id: u32,
}

/// A parsed, read-only view of an image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageInfo {
    pub num_globals: u16,
    pub sections: [SectionRange; 6],
    pub functions: Vec<FunctionInfo>,
    pub roles: Vec<RoleInfo>,
    pub floats: Vec<f64>,
    pub strings: Vec<Vec<u8>>,
    /// The whole image as halfwords; program counters index into this.
    code: Vec<u16>,
}

impl ImageInfo {
    /// Parse `bytes`, checking that every table lies inside the image.
    pub fn load(bytes: &[u8]) -> Result<ImageInfo> {
        if bytes.len() < SECTIONS_START {
            return Err(ImageError::TooShort { len: bytes.len() });
        }
        let magic0 = read_u32(bytes, 0).unwrap_or_default();
        let magic1 = read_u32(bytes, 4).unwrap_or_default();
        if magic0 != MAGIC0 || magic1 != MAGIC1 {
            return Err(ImageError::BadMagic { magic0, magic1 });
        }
        let num_globals = read_u16(bytes, 8).unwrap_or_default();

        let mut sections = [SectionRange::default(); 6];
        for (slot, section) in sections.iter_mut().zip(Section::ALL) {
            *slot = read_range(bytes, section.header_offset(), section.name())?;
            if slot.start & 3 != 0 {
                return Err(ImageError::Misaligned {
                    section: section.name(),
                    offset: slot.start,
                });
            }
            if let Some(record) = section.record_size() {
                if slot.len as usize % record != 0 {
                    return Err(ImageError::RecordSize {
                        section: section.name(),
                        len: slot.len,
                        record: record as u32,
                    });
                }
            }
        }
        let [fun_desc, fun_code, float_data, role_data, str_desc, str_data] = sections;

        let mut functions = Vec::new();
        for (index, ptr) in records(fun_desc, FUNCTION_HEADER_SIZE).enumerate() {
            let code = read_range(bytes, ptr, "function")?;
            if !fun_code.contains(code) || code.start & 1 != 0 {
                return Err(ImageError::BadFunction {
                    index,
                    message: format!(
                        "body {:#x}+{} outside code section",
                        code.start, code.len
                    ),
                });
            }
            let packed = bytes[ptr + 10];
            functions.push(FunctionInfo {
                code,
                num_locals: read_u16(bytes, ptr + 8).unwrap_or_default(),
                num_regs: packed & 0xf,
                num_params: packed >> 4,
                flags: bytes[ptr + 11],
            });
        }

        let floats = records(float_data, 8)
            .map(|ptr| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&bytes[ptr..ptr + 8]);
                f64::from_le_bytes(raw)
            })
            .collect();

        let roles = records(role_data, ROLE_HEADER_SIZE)
            .map(|ptr| RoleInfo {
                class_id: read_u32(bytes, ptr).unwrap_or_default(),
            })
            .collect();

        let mut strings = Vec::new();
        for (index, ptr) in records(str_desc, STRING_HEADER_SIZE).enumerate() {
            let range = read_range(bytes, ptr, "string")?;
            let with_nul = SectionRange {
                start: range.start,
                len: range.len + 1,
            };
            if !str_data.contains(with_nul) {
                return Err(ImageError::BadString {
                    index,
                    message: "outside string data".into(),
                });
            }
            if bytes[range.end() as usize] != 0 {
                return Err(ImageError::BadString {
                    index,
                    message: "missing NUL terminator".into(),
                });
            }
            strings.push(bytes[range.start as usize..range.end() as usize].to_vec());
        }

        let code = bytes
            .chunks_exact(2)
            .map(|w| u16::from_le_bytes([w[0], w[1]]))
            .collect();

        Ok(ImageInfo {
            num_globals,
            sections,
            functions,
            roles,
            floats,
            strings,
            code,
        })
    }

    /// Instruction at an absolute program counter.
    #[inline]
    pub fn instr(&self, pc: usize) -> Option<Instr> {
        self.code.get(pc).copied().map(Instr)
    }

    /// Body of function `index` as raw halfwords.
    pub fn function_code(&self, index: usize) -> &[u16] {
        match self.functions.get(index) {
            Some(f) => &self.code[f.start_pc()..f.end_pc()],
            None => &[],
        }
    }
}

fn read_range(bytes: &[u8], ptr: usize, what: &'static str) -> Result<SectionRange> {
    let (Some(start), Some(len)) = (read_u32(bytes, ptr), read_u32(bytes, ptr + 4)) else {
        return Err(ImageError::SectionOutOfBounds {
            section: what,
            offset: ptr as u32,
            len: 8,
        });
    };
    let range = SectionRange { start, len };
    if start.checked_add(len).is_none_or(|end| end as usize > bytes.len()) {
        return Err(ImageError::SectionOutOfBounds {
            section: what,
            offset: start,
            len,
        });
    }
    Ok(range)
}

fn records(section: SectionRange, size: usize) -> impl Iterator<Item = usize> {
    (section.start as usize..section.end() as usize).step_by(size)
}
