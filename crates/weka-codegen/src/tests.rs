use std::collections::BTreeMap;

use weka_core::{CaseKind, CoreExpr, CoreHandler, CoreProgram, CoreRec, CoreWord};
use weka_types::IntSize;

use crate::{generate, Block, Codegen, CodegenConfig, CtorLoc, HandlerLoc, Instr};

fn bare_codegen() -> Codegen {
    Codegen::new(BTreeMap::new(), BTreeMap::new(), BTreeMap::new())
}

fn exn_codegen() -> Codegen {
    let mut handlers = BTreeMap::new();
    handlers.insert(
        "raise".to_string(),
        HandlerLoc {
            handle_id: 0,
            index: 0,
        },
    );
    let mut effects = BTreeMap::new();
    effects.insert("exn!".to_string(), 0);
    Codegen::new(handlers, effects, BTreeMap::new())
}

fn i32_word(value: i64) -> CoreWord {
    CoreWord::Integer {
        value,
        size: IntSize::I32,
    }
}

#[test]
fn integers_select_typed_immediates() {
    let mut cg = bare_codegen();
    let code = cg
        .gen_expr(&CoreExpr::new(vec![
            i32_word(2),
            CoreWord::Integer {
                value: 3,
                size: IntSize::U8,
            },
            CoreWord::PrimCall("add-i32".into()),
        ]))
        .unwrap();
    assert_eq!(
        code,
        vec![Instr::II32(2), Instr::IU8(3), Instr::IIntAdd(IntSize::I32)]
    );
}

#[test]
fn unknown_primitive_is_rejected() {
    let mut cg = bare_codegen();
    let err = cg
        .gen_expr(&CoreExpr::new(vec![CoreWord::PrimCall("frob-i32".into())]))
        .unwrap_err();
    assert!(err.to_string().contains("frob-i32"));
}

#[test]
fn if_without_else_jumps_over_then() {
    let mut cg = bare_codegen();
    let code = cg
        .gen_expr(&CoreExpr::new(vec![CoreWord::If {
            then_branch: CoreExpr::new(vec![i32_word(1), i32_word(2)]),
            else_branch: CoreExpr::default(),
        }]))
        .unwrap();
    assert_eq!(
        code,
        vec![Instr::IOffsetIfNot(3), Instr::II32(1), Instr::II32(2)]
    );
}

#[test]
fn if_with_else_brackets_both_branches() {
    let mut cg = bare_codegen();
    let code = cg
        .gen_expr(&CoreExpr::new(vec![CoreWord::If {
            then_branch: CoreExpr::new(vec![i32_word(1)]),
            else_branch: CoreExpr::new(vec![i32_word(2), i32_word(3)]),
        }]))
        .unwrap();
    assert_eq!(
        code,
        vec![
            Instr::IOffsetIfNot(3),
            Instr::II32(1),
            Instr::IOffset(3),
            Instr::II32(2),
            Instr::II32(3),
        ]
    );
}

#[test]
fn while_loops_back_over_body_and_cond() {
    let mut cg = bare_codegen();
    let code = cg
        .gen_expr(&CoreExpr::new(vec![CoreWord::While {
            cond: CoreExpr::new(vec![CoreWord::BoolLit(true)]),
            body: CoreExpr::new(vec![i32_word(1), i32_word(2)]),
        }]))
        .unwrap();
    // offset 3 | body(2) | cond(1) | offset-if -3
    assert_eq!(
        code,
        vec![
            Instr::IOffset(3),
            Instr::II32(1),
            Instr::II32(2),
            Instr::ITrue,
            Instr::IOffsetIf(-3),
        ]
    );
}

#[test]
fn vars_store_and_forget_around_body() {
    let mut cg = bare_codegen();
    let code = cg
        .gen_expr(&CoreExpr::new(vec![CoreWord::Vars {
            names: vec!["x".into()],
            body: CoreExpr::new(vec![CoreWord::ValueVar("x".into())]),
        }]))
        .unwrap();
    assert_eq!(
        code,
        vec![
            Instr::IStore(1),
            Instr::IFind { frame: 0, index: 0 },
            Instr::IForget,
        ]
    );
}

#[test]
fn nested_frames_count_outward_from_innermost() {
    let mut cg = bare_codegen();
    let code = cg
        .gen_expr(&CoreExpr::new(vec![CoreWord::Vars {
            names: vec!["x".into()],
            body: CoreExpr::new(vec![CoreWord::Vars {
                names: vec!["y".into()],
                body: CoreExpr::new(vec![
                    CoreWord::ValueVar("y".into()),
                    CoreWord::ValueVar("x".into()),
                ]),
            }]),
        }]))
        .unwrap();
    assert_eq!(
        code,
        vec![
            Instr::IStore(1),
            Instr::IStore(1),
            Instr::IFind { frame: 0, index: 0 },
            Instr::IFind { frame: 1, index: 0 },
            Instr::IForget,
            Instr::IForget,
        ]
    );
}

#[test]
fn closures_capture_frame_refs() {
    let mut cg = bare_codegen();
    let code = cg
        .gen_expr(&CoreExpr::new(vec![CoreWord::Vars {
            names: vec!["x".into()],
            body: CoreExpr::new(vec![CoreWord::Closure {
                free: vec!["x".into()],
                body: CoreExpr::new(vec![CoreWord::ValueVar("x".into())]),
            }]),
        }]))
        .unwrap();
    let Instr::IClosure {
        label,
        args,
        closed,
    } = &code[1]
    else {
        panic!("expected closure site, got {:?}", code[1]);
    };
    assert_eq!(label, "fn1");
    assert_eq!(*args, 0);
    assert_eq!(closed, &vec![crate::FrameRef { frame: 0, index: 0 }]);
    // The closure body loads the captured variable from its own frame.
    let block = cg
        .blocks
        .iter()
        .find(|b| b.label() == Some("fn1"))
        .expect("closure block registered");
    assert_eq!(
        block.instrs(),
        &[Instr::IFind { frame: 0, index: 0 }, Instr::IReturn]
    );
}

#[test]
fn letrecs_tie_the_knot_with_mutual() {
    let mut cg = bare_codegen();
    let code = cg
        .gen_expr(&CoreExpr::new(vec![CoreWord::LetRecs {
            recs: vec![
                CoreRec {
                    name: "even".into(),
                    free: vec!["odd".into()],
                    body: CoreExpr::new(vec![CoreWord::CallVar("odd".into())]),
                },
                CoreRec {
                    name: "odd".into(),
                    free: vec!["even".into()],
                    body: CoreExpr::new(vec![CoreWord::CallVar("even".into())]),
                },
            ],
            body: CoreExpr::new(vec![CoreWord::CallVar("even".into())]),
        }]))
        .unwrap();
    assert!(matches!(code[0], Instr::IClosure { .. }));
    assert!(matches!(code[1], Instr::IClosure { .. }));
    assert_eq!(code[2], Instr::IMutual(2));
    assert_eq!(code[3], Instr::IStore(2));
    assert_eq!(code[4], Instr::IFind { frame: 0, index: 0 });
    assert_eq!(code[5], Instr::ICallClosure);
    assert_eq!(code[6], Instr::IForget);
}

#[test]
fn handle_offset_covers_body_plus_one() {
    let mut cg = exn_codegen();
    let code = cg
        .gen_expr(&CoreExpr::new(vec![CoreWord::Handle {
            params: vec![],
            effect: "exn!".into(),
            body: CoreExpr::new(vec![
                i32_word(2),
                CoreWord::OperatorVar("raise".into()),
                i32_word(2),
                CoreWord::PrimCall("add-i32".into()),
            ]),
            handlers: vec![CoreHandler {
                name: "raise".into(),
                params: vec![],
                body: CoreExpr::new(vec![CoreWord::CallVar("resume".into())]),
            }],
            ret: CoreExpr::default(),
        }]))
        .unwrap();
    // Return closure, handler closure, IHandle, body..., IComplete.
    assert!(matches!(code[0], Instr::IClosure { .. }));
    assert!(matches!(code[1], Instr::IClosure { .. }));
    let Instr::IHandle {
        handle_id,
        after_offset,
        params,
        handlers,
    } = code[2]
    else {
        panic!("expected IHandle, got {:?}", code[2]);
    };
    assert_eq!(handle_id, 0);
    assert_eq!(params, 0);
    assert_eq!(handlers, 1);
    let body = &code[3..];
    assert_eq!(
        body,
        &[
            Instr::II32(2),
            Instr::IEscape {
                handle_id: 0,
                handler_index: 0
            },
            Instr::II32(2),
            Instr::IIntAdd(IntSize::I32),
            Instr::IComplete,
        ]
    );
    // The post-handle offset is the handled body length plus one.
    assert_eq!(after_offset, body.len() as i32 + 1);
    assert_eq!(after_offset, 6);
}

#[test]
fn handler_body_calls_the_continuation() {
    let mut cg = exn_codegen();
    cg.gen_expr(&CoreExpr::new(vec![CoreWord::Handle {
        params: vec![],
        effect: "exn!".into(),
        body: CoreExpr::default(),
        handlers: vec![CoreHandler {
            name: "raise".into(),
            params: vec![],
            body: CoreExpr::new(vec![CoreWord::CallVar("resume".into())]),
        }],
        ret: CoreExpr::default(),
    }]))
    .unwrap();
    // handler1 is the return closure, handler2 the `raise` arm.
    let arm = cg
        .blocks
        .iter()
        .find(|b| b.label() == Some("handler2"))
        .expect("handler arm registered");
    assert_eq!(
        arm.instrs(),
        &[
            Instr::IFind { frame: 0, index: 0 },
            Instr::ICallContinuation,
            Instr::IReturn,
        ]
    );
}

#[test]
fn struct_case_tests_unpacks_and_branches() {
    let mut ctors = BTreeMap::new();
    ctors.insert("pair".to_string(), CtorLoc { id: 7, args: 2 });
    let mut cg = Codegen::new(BTreeMap::new(), BTreeMap::new(), ctors);
    let code = cg
        .gen_expr(&CoreExpr::new(vec![CoreWord::Case {
            tag: "pair".into(),
            kind: CaseKind::Struct,
            then_branch: CoreExpr::new(vec![i32_word(1)]),
            else_branch: CoreExpr::new(vec![i32_word(2)]),
        }]))
        .unwrap();
    assert_eq!(
        code,
        vec![
            Instr::IIsStruct(7),
            Instr::IOffsetIfNot(4),
            Instr::IUnstruct(7),
            Instr::II32(1),
            Instr::IOffset(2),
            Instr::II32(2),
        ]
    );
}

#[test]
fn variant_case_branches_on_tag() {
    let mut cg = bare_codegen();
    let code = cg
        .gen_expr(&CoreExpr::new(vec![CoreWord::Case {
            tag: "some".into(),
            kind: CaseKind::Variant,
            then_branch: CoreExpr::new(vec![i32_word(1)]),
            else_branch: CoreExpr::new(vec![i32_word(2)]),
        }]))
        .unwrap();
    assert_eq!(
        code,
        vec![
            Instr::ICaseVariant {
                label: "some".into(),
                else_offset: 3
            },
            Instr::II32(1),
            Instr::IOffset(2),
            Instr::II32(2),
        ]
    );
}

#[test]
fn program_assembly_brackets_user_blocks() {
    let program = CoreProgram {
        defs: vec![(
            "double".to_string(),
            CoreExpr::new(vec![
                CoreWord::PrimCall("dup".into()),
                CoreWord::PrimCall("add-i32".into()),
            ]),
        )],
        main: CoreExpr::new(vec![i32_word(21), CoreWord::CallVar("double".into())]),
    };
    let blocks = generate(
        &program,
        BTreeMap::new(),
        BTreeMap::new(),
        BTreeMap::new(),
        &CodegenConfig::default(),
    )
    .unwrap();

    let Block::Anonymous(entry) = &blocks[0] else {
        panic!("first block must be anonymous");
    };
    assert_eq!(
        entry,
        &vec![Instr::ICall("main".into()), Instr::ITailCall("end".into())]
    );
    assert_eq!(blocks[1].label(), Some("main"));
    assert_eq!(
        blocks[1].instrs(),
        &[
            Instr::II32(21),
            Instr::ICall("double".into()),
            Instr::IReturn
        ]
    );
    assert_eq!(blocks[2].label(), Some("double"));
    let last = blocks.last().unwrap();
    assert_eq!(last.label(), Some("end"));
    assert_eq!(last.instrs(), &[Instr::INop]);
}

#[test]
fn duplicate_definition_labels_are_rejected() {
    let program = CoreProgram {
        defs: vec![
            ("f".to_string(), CoreExpr::default()),
            ("f".to_string(), CoreExpr::default()),
        ],
        main: CoreExpr::default(),
    };
    let err = generate(
        &program,
        BTreeMap::new(),
        BTreeMap::new(),
        BTreeMap::new(),
        &CodegenConfig::default(),
    )
    .unwrap_err();
    assert!(err.to_string().contains("duplicate block label"));
}

#[test]
fn generation_is_deterministic() {
    let program = CoreProgram {
        defs: vec![(
            "f".to_string(),
            CoreExpr::new(vec![CoreWord::Closure {
                free: vec![],
                body: CoreExpr::new(vec![i32_word(1)]),
            }]),
        )],
        main: CoreExpr::new(vec![CoreWord::CallVar("f".into())]),
    };
    let run = || {
        generate(
            &program,
            BTreeMap::new(),
            BTreeMap::new(),
            BTreeMap::new(),
            &CodegenConfig::default(),
        )
        .unwrap()
    };
    assert_eq!(run(), run());
    assert_eq!(crate::disassemble(&run()), crate::disassemble(&run()));
}

#[test]
fn disassembly_renders_labels_and_instrs() {
    let blocks = vec![
        Block::Anonymous(vec![Instr::ICall("main".into())]),
        Block::Labeled("main".into(), vec![Instr::II32(2), Instr::IReturn]),
    ];
    let listing = crate::disassemble(&blocks);
    assert!(listing.contains("main:"));
    assert!(listing.contains("  i32 2"));
    assert!(listing.contains("  return"));
}

#[test]
fn instruction_rendering_is_stable() {
    insta::assert_snapshot!(
        Instr::IHandle {
            handle_id: 0,
            after_offset: 6,
            params: 0,
            handlers: 1
        }
        .to_string(),
        @"handle 0 after 6 params 0 handlers 1"
    );
    insta::assert_snapshot!(
        Instr::IClosure {
            label: "fn1".into(),
            args: 0,
            closed: vec![crate::FrameRef { frame: 1, index: 0 }]
        }
        .to_string(),
        @"closure fn1 args 0 closed [1.0]"
    );
    insta::assert_snapshot!(Instr::IConvBool(IntSize::U16).to_string(), @"conv-bool-u16");
}
