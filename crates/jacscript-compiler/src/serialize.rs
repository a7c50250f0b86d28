//! Finishing a compile: patching, image layout and debug info.
//!
//! The image is a fixed 64-byte header, six section descriptors and the
//! sections themselves, laid out back to back from [`SECTIONS_START`]:
//!
//! ```text
//! function descriptors | code | float literals | roles | string descriptors | string data
//! ```
//!
//! All multi-byte values are little-endian and every section starts on a
//! four-byte boundary.

use jacscript_core::format::{
    FIX_HEADER_SIZE, FUNCTION_HEADER_SIZE, MAGIC0, MAGIC1, SECTION_HEADER_SIZE, SECTIONS_START,
    STRING_HEADER_SIZE, Section,
};
use jacscript_core::{
    CellDebugInfo, CompilationError, DebugInfo, FunctionDebugInfo, ImageInfo, Span, verify,
};

use crate::program::Program;
use crate::{CompilationResult, CompiledFunction, CompiledRole};

/// Saved registers are packed into four bits of the function descriptor.
const MAX_SAVED_REGS: u8 = 15;

const _: () = assert!(cfg!(target_endian = "little"), "images are emitted little-endian");

fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn pad4(buf: &mut Vec<u8>) {
    while buf.len() % 4 != 0 {
        buf.push(0);
    }
}

impl<'c> Program<'c> {
    /// Patch every procedure, serialize and package the result.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub(crate) fn finish(mut self) -> CompilationResult {
        for i in 0..self.procs.len() {
            if self.procs[i].writer.max_regs() > MAX_SAVED_REGS {
                let name = self.procs[i].name.clone();
                tracing::debug!(%name, "too many live registers");
                self.report(CompilationError::ExpressionTooComplex {
                    span: Span::default(),
                });
            }
        }

        let strict = self.num_errors == 0;
        for proc in &mut self.procs {
            proc.writer.finalize(strict);
        }

        // Jumps left unpatched by a failed compile fall through to the
        // next instruction, so the image still loads.
        let image = self.serialize();
        if strict && self.options.verify {
            let checked = ImageInfo::load(&image).and_then(|info| verify(&info));
            if let Err(err) = checked {
                panic!("compiled image failed verification: {err}");
            }
        }
        let debug = self.options.debug_info.then(|| self.debug_info());
        tracing::debug!(
            functions = self.procs.len(),
            roles = self.roles.len(),
            bytes = image.len(),
            errors = self.num_errors,
            "compiled"
        );

        CompilationResult {
            image,
            debug,
            functions: self
                .procs
                .iter()
                .map(|p| CompiledFunction {
                    name: p.name.clone(),
                    code: p.writer.code().to_vec(),
                    num_locals: p.locals.len(),
                    num_regs: p.writer.max_regs(),
                    num_params: p.num_params,
                    labels: p.writer.label_offsets(),
                })
                .collect(),
            roles: self
                .roles
                .iter()
                .map(|r| CompiledRole {
                    name: r.name.clone(),
                    class_identifier: r.spec.class_identifier,
                })
                .collect(),
            floats: self.floats,
            strings: self.strings,
            num_globals: self.globals.len(),
            errors: self.errors,
            num_errors: self.num_errors,
        }
    }

    fn serialize(&self) -> Vec<u8> {
        let mut sections: [Vec<u8>; 6] = Default::default();
        let [fun_desc, code, floats, roles, str_desc, str_data] = &mut sections;

        let code_start = SECTIONS_START + self.procs.len() * FUNCTION_HEADER_SIZE;
        for proc in &self.procs {
            let body = proc.writer.code();
            put_u32(fun_desc, (code_start + code.len()) as u32);
            put_u32(fun_desc, (body.len() * 2) as u32);
            put_u16(fun_desc, proc.locals.len() as u16);
            let regs = proc.writer.max_regs().min(MAX_SAVED_REGS);
            fun_desc.push(regs | ((proc.num_params.min(15) as u8) << 4));
            fun_desc.push(0);
            put_u32(fun_desc, 0);
            for &w in body {
                put_u16(code, w);
            }
        }

        for v in &self.floats {
            floats.extend_from_slice(&v.to_le_bytes());
        }

        for role in &self.roles {
            put_u32(roles, role.spec.class_identifier);
            put_u32(roles, 0);
        }

        // descriptors hold absolute offsets into the string data section
        let str_data_start = code_start
            + code.len()
            + floats.len()
            + roles.len()
            + self.strings.len() * STRING_HEADER_SIZE;
        for s in &self.strings {
            put_u32(str_desc, (str_data_start + str_data.len()) as u32);
            put_u32(str_desc, s.len() as u32);
            str_data.extend_from_slice(s.as_bytes());
            str_data.push(0);
        }
        pad4(str_data);

        let mut image = Vec::with_capacity(
            SECTIONS_START + sections.iter().map(Vec::len).sum::<usize>(),
        );
        put_u32(&mut image, MAGIC0);
        put_u32(&mut image, MAGIC1);
        put_u16(&mut image, self.globals.len() as u16);
        image.resize(FIX_HEADER_SIZE, 0);

        let mut offset = SECTIONS_START;
        for section in &sections {
            debug_assert_eq!(offset % 4, 0);
            put_u32(&mut image, offset as u32);
            put_u32(&mut image, section.len() as u32);
            offset += section.len();
        }
        debug_assert_eq!(image.len(), FIX_HEADER_SIZE + SECTION_HEADER_SIZE * Section::ALL.len());
        for section in &sections {
            image.extend_from_slice(section);
        }
        image
    }

    fn debug_info(&self) -> DebugInfo {
        let cells = |names: &[String]| {
            names
                .iter()
                .map(|n| CellDebugInfo { name: n.clone() })
                .collect::<Vec<_>>()
        };
        DebugInfo {
            functions: self
                .procs
                .iter()
                .map(|p| FunctionDebugInfo {
                    name: p.name.clone(),
                    srcmap: p.writer.srcmap().to_vec(),
                    locals: cells(p.locals.names()),
                })
                .collect(),
            roles: self
                .roles
                .iter()
                .map(|r| CellDebugInfo {
                    name: r.name.clone(),
                })
                .collect(),
            globals: cells(self.globals.names()),
        }
    }
}

#[cfg(test)]
mod tests {
    use bumpalo::Bump;
    use jacscript_ast::AstBuilder;
    use jacscript_core::format::Section;
    use jacscript_core::{ImageInfo, verify};
    use jacscript_registry::{ServiceCatalog, builtin};

    use crate::{CompileOptions, compile};

    #[test]
    fn image_round_trips_through_the_loader() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let script = b.script(&[
            b.var("led", Some(b.call(b.path("roles.led"), &[]))),
            b.var("x", Some(b.num(2.5))),
            b.expr_stmt(b.call(b.ident("print"), &[b.str("x={0}"), b.ident("x")])),
        ]);
        let res = compile(&script, &ServiceCatalog::with_builtins(), CompileOptions::new());
        assert!(res.is_success(), "{:?}", res.errors);

        let info = ImageInfo::load(&res.image).unwrap();
        verify(&info).unwrap();
        assert_eq!(info.num_globals, 1);
        assert_eq!(info.floats, vec![2.5]);
        assert_eq!(info.roles.len(), 1);
        assert_eq!(info.roles[0].class_id, builtin::LED);
        assert_eq!(info.strings, vec![b"x={0}".to_vec()]);
        assert_eq!(info.functions.len(), res.functions.len());
        assert_eq!(info.function_code(0), &res.functions[0].code[..]);
        for s in Section::ALL {
            assert_eq!(info.sections[s as usize].start % 4, 0, "{}", s.name());
        }
    }

    #[test]
    fn bodies_have_an_even_number_of_instructions() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let script = b.script(&[b.var("x", Some(b.num(1.0)))]);
        let res = compile(&script, &ServiceCatalog::with_builtins(), CompileOptions::new());
        for f in &res.functions {
            assert_eq!(f.code.len() % 2, 0, "{}", f.name);
        }
    }

    #[test]
    fn failed_compile_still_produces_a_loadable_image() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let script = b.script(&[
            b.var("x", Some(b.num(1.0))),
            b.expr_stmt(b.ident("nope")),
            b.if_(
                b.ident("x"),
                b.expr_stmt(b.call(b.ident("print"), &[b.str("x")])),
                None,
            ),
        ]);
        let res = compile(&script, &ServiceCatalog::with_builtins(), CompileOptions::new());
        assert!(res.num_errors > 0);
        assert!(!res.image.is_empty());
        let info = ImageInfo::load(&res.image).unwrap();
        assert_eq!(info.num_globals, 1);
        assert_eq!(info.functions.len(), res.functions.len());
    }

    #[test]
    fn debug_info_can_be_disabled() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let script = b.script(&[b.var("x", Some(b.num(1.0)))]);
        let res = compile(
            &script,
            &ServiceCatalog::with_builtins(),
            CompileOptions::new().with_debug_info(false),
        );
        assert!(res.debug.is_none());
        assert!(!res.image.is_empty());
    }

    #[test]
    fn debug_info_names_cells() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let script = b.script(&[
            b.var("btn", Some(b.call(b.path("roles.button"), &[]))),
            b.var("count", Some(b.num(0.0))),
        ]);
        let res = compile(&script, &ServiceCatalog::with_builtins(), CompileOptions::new());
        let debug = res.debug.unwrap();
        assert_eq!(debug.role_name(0), Some("btn"));
        assert_eq!(debug.global_name(0), Some("count"));
        assert_eq!(debug.function_name(0), Some("main"));
    }
}
