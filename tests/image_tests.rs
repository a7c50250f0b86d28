//! Properties every compiled image must have, checked over a set of
//! representative programs.


use jacscript::CompilationResult;
use jacscript_ast::BinaryOp;
use jacscript_core::format::Params;
use jacscript_core::{ImageInfo, Instr, OpTop, disassemble, verify};
use test_harness::compile_script;

fn programs() -> Vec<CompilationResult> {
    vec![
        compile_script(|b| {
            vec![
                b.var("btn", Some(b.call(b.path("roles.button"), &[]))),
                b.var("led", Some(b.call(b.path("roles.led"), &[]))),
                b.expr_stmt(b.call(
                    b.path("btn.pressed.sub"),
                    &[b.arrow(&[], &[b.expr_stmt(b.call(b.path("led.on"), &[]))])],
                )),
                b.expr_stmt(b.call(
                    b.path("btn.onConnected"),
                    &[b.arrow(&[], &[b.expr_stmt(b.call(b.path("led.off"), &[]))])],
                )),
            ]
        }),
        compile_script(|b| {
            vec![
                b.var("p", Some(b.call(b.path("roles.potentiometer"), &[]))),
                b.var("s", Some(b.call(b.path("roles.servo"), &[]))),
                b.expr_stmt(b.call(
                    b.path("p.position.onChange"),
                    &[
                        b.num(0.05),
                        b.arrow(
                            &[],
                            &[b.expr_stmt(b.call(
                                b.path("s.angle.write"),
                                &[b.binary(
                                    b.call(b.path("p.position.read"), &[]),
                                    BinaryOp::Mul,
                                    b.num(180.0),
                                )],
                            ))],
                        ),
                    ],
                )),
            ]
        }),
        compile_script(|b| {
            vec![
                b.function(
                    "clamp",
                    &["x"],
                    &[
                        b.if_(
                            b.binary(b.ident("x"), BinaryOp::Greater, b.num(10.0)),
                            b.ret(Some(b.num(10.0))),
                            Some(b.ret(Some(b.ident("x")))),
                        ),
                    ],
                ),
                b.var("n", Some(b.num(0.0))),
                b.expr_stmt(b.call(
                    b.ident("every"),
                    &[
                        b.num(0.5),
                        b.arrow(
                            &[],
                            &[
                                b.expr_stmt(b.assign(
                                    b.ident("n"),
                                    b.call(
                                        b.ident("clamp"),
                                        &[b.binary(b.ident("n"), BinaryOp::Add, b.num(1.0))],
                                    ),
                                )),
                                b.expr_stmt(b.call(b.ident("print"), &[b.str("n={0}"), b.ident("n")])),
                                b.expr_stmt(b.call(b.ident("upload"), &[b.str("n"), b.ident("n")])),
                            ],
                        ),
                    ],
                )),
            ]
        }),
    ]
}

#[test]
fn images_load_back_to_what_was_compiled() {
    for res in programs() {
        let image = ImageInfo::load(&res.image).expect("image loads");
        verify(&image).expect("image verifies");

        assert_eq!(image.functions.len(), res.functions.len());
        for (i, f) in res.functions.iter().enumerate() {
            assert_eq!(image.function_code(i), &f.code[..], "{}", f.name);
            assert_eq!(image.functions[i].num_locals as usize, f.num_locals, "{}", f.name);
        }
        let classes: Vec<u32> = image.roles.iter().map(|r| r.class_id).collect();
        let expected: Vec<u32> = res.roles.iter().map(|r| r.class_identifier).collect();
        assert_eq!(classes, expected);
        assert_eq!(image.floats, res.floats);
        assert_eq!(image.num_globals as usize, res.num_globals);

        let listing = disassemble(&image, res.debug.as_ref());
        for f in &res.functions {
            assert!(listing.contains(&f.name), "{} missing from listing", f.name);
        }
    }
}

#[test]
fn jumps_land_on_instruction_boundaries() {
    for res in programs() {
        for f in &res.functions {
            let mut starts = Vec::new();
            let mut jumps = Vec::new();
            let mut p = Params::default();
            let mut fresh = true;
            for (pc, &w) in f.code.iter().enumerate() {
                if fresh {
                    starts.push(pc);
                }
                let i = Instr(w);
                if p.absorb(i) {
                    fresh = false;
                    continue;
                }
                let params = std::mem::take(&mut p).resolve(i);
                fresh = true;
                if i.op() == Some(OpTop::Jump) {
                    let after = pc + 1;
                    let target = if i.jump_back() {
                        after.checked_sub(params.b as usize)
                    } else {
                        Some(after + params.b as usize)
                    };
                    jumps.push(target);
                }
            }
            for target in jumps {
                let target = target.expect("jump before the function");
                assert!(
                    starts.contains(&target) || target == f.code.len(),
                    "{}: jump to {target} is not an instruction start",
                    f.name
                );
            }
        }
    }
}
