//! End-to-end scenarios: surface programs in, bytecode blocks out.

use weka::{compile, Block, Category, Instr};
use weka_ast::{
    Decl, EffectDecl, Expr, FileId, FuncDecl, Handler, OperatorDecl, Pattern, Program, Span,
    Spanned, Statement, Word,
};
use weka_types::{build, IntSize, Kind, Pred, PrimType, QualType, Scheme, SeqItem, Type};

fn sp(word: Word) -> Spanned<Word> {
    Spanned::new(word, Span::new(FileId(0), 0, 1))
}

fn expr(words: Vec<Word>) -> Expr {
    Expr::new(words.into_iter().map(sp).collect())
}

fn i32_lit(value: i64) -> Word {
    Word::Int {
        value,
        size: IntSize::I32,
    }
}

fn ident(name: &str) -> Word {
    Word::Ident(name.to_string())
}

fn span() -> Span {
    Span::new(FileId(0), 0, 1)
}

fn program(decls: Vec<Decl>, main: Expr) -> Program {
    Program { decls, main }
}

fn block_named<'a>(blocks: &'a [Block], name: &str) -> &'a Block {
    blocks
        .iter()
        .find(|b| b.label() == Some(name))
        .unwrap_or_else(|| panic!("no block named `{name}`"))
}

fn render(instrs: &[Instr]) -> String {
    instrs
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// The base scheme of a binary overloaded word `(a a -> Bool)` dispatching
/// on predicate `pred`.
fn binary_overload_scheme(pred: &str) -> Scheme {
    let class_var = Type::var("a", Kind::Data);
    let arg = build::val(class_var.clone(), Type::var("s", Kind::Sharing));
    let tail = Type::var("z", Kind::seq(Kind::Value));
    let head = build::fn_type(
        Type::var("e", Kind::row(Kind::Effect)),
        Type::var("p", Kind::row(Kind::Permission)),
        Type::True(Kind::Totality),
        Type::seq(
            Kind::Value,
            vec![
                SeqItem::indexed(arg.clone()),
                SeqItem::indexed(arg),
                SeqItem::dotted(tail.clone()),
            ],
        ),
        Type::seq(
            Kind::Value,
            vec![
                SeqItem::indexed(build::val(
                    Type::Prim(PrimType::Bool),
                    Type::var("sr", Kind::Sharing),
                )),
                SeqItem::dotted(tail),
            ],
        ),
    );
    Scheme::close_over(QualType {
        context: vec![Pred::new(pred, class_var)],
        head,
    })
}

fn eq_overload_decls(instances: &[(&str, Type, Vec<Word>)]) -> Vec<Decl> {
    let mut decls = vec![Decl::Overload {
        name: "eq".into(),
        pred_name: "eq".into(),
        ty: binary_overload_scheme("eq"),
        instances: instances.iter().map(|(n, _, _)| n.to_string()).collect(),
        span: span(),
    }];
    for (_, head, body) in instances {
        decls.push(Decl::Instance {
            overload: "eq".into(),
            scheme: Scheme::close_over(QualType::unqualified(head.clone())),
            body: expr(body.clone()),
            span: span(),
        });
    }
    decls
}

// ---------------------------------------------------------------------------
// S1: literals and a primitive
// ---------------------------------------------------------------------------

#[test]
fn s1_literals_and_primitive_selection() {
    let prog = program(vec![], expr(vec![i32_lit(2), i32_lit(3), ident("add-i32")]));
    let blocks = compile(&prog).unwrap();

    // The entry block calls main then tail-calls the terminal block.
    let Block::Anonymous(entry) = &blocks[0] else {
        panic!("first block must be anonymous");
    };
    assert_eq!(
        entry,
        &vec![Instr::ICall("main".into()), Instr::ITailCall("end".into())]
    );

    let main = block_named(&blocks, "main");
    insta::assert_snapshot!(render(main.instrs()), @"i32 2; i32 3; add-i32; return");

    let end = blocks.last().unwrap();
    assert_eq!(end.label(), Some("end"));
    assert_eq!(end.instrs(), &[Instr::INop]);
}

// ---------------------------------------------------------------------------
// S2: recursion
// ---------------------------------------------------------------------------

/// `ack n m` with the switch already desugared into nested ifs:
/// `m 0 eq-i32` selects between the base case `n 1 add-i32` and the
/// recursive case `n 1 sub-i32 m ack m 1 sub-i32 ack`.
fn ack_body() -> Expr {
    expr(vec![Word::Block(vec![
        Statement::Let {
            pattern: Spanned::new(Pattern::Var("m".into()), span()),
            value: expr(vec![]),
        },
        Statement::Let {
            pattern: Spanned::new(Pattern::Var("n".into()), span()),
            value: expr(vec![]),
        },
        Statement::Expr(expr(vec![
            ident("m"),
            i32_lit(0),
            ident("eq-i32"),
            Word::If {
                then_branch: expr(vec![ident("n"), i32_lit(1), ident("add-i32")]),
                else_branch: expr(vec![
                    ident("n"),
                    i32_lit(1),
                    ident("sub-i32"),
                    ident("m"),
                    ident("ack"),
                    ident("m"),
                    i32_lit(1),
                    ident("sub-i32"),
                    ident("ack"),
                ]),
            },
        ])),
    ])])
}

#[test]
fn s2_recursive_function_calls_itself_by_label() {
    let prog = program(
        vec![Decl::RecFuncs(vec![FuncDecl {
            name: "ack".into(),
            body: ack_body(),
            span: span(),
        }])],
        expr(vec![i32_lit(2), i32_lit(3), ident("ack")]),
    );
    let blocks = compile(&prog).unwrap();

    let main = block_named(&blocks, "main");
    assert_eq!(
        main.instrs(),
        &[
            Instr::II32(2),
            Instr::II32(3),
            Instr::ICall("ack".into()),
            Instr::IReturn,
        ]
    );

    let ack = block_named(&blocks, "ack");
    let has_self_call = ack
        .instrs()
        .iter()
        .filter(|i| matches!(i, Instr::ICall(name) if name == "ack"))
        .count();
    assert_eq!(has_self_call, 2, "both recursive call sites are direct");
    assert!(
        ack.instrs()
            .iter()
            .any(|i| matches!(i, Instr::IOffsetIfNot(_))),
        "ack contains a conditional"
    );
}

// ---------------------------------------------------------------------------
// S3: effect handlers
// ---------------------------------------------------------------------------

#[test]
fn s3_handle_emits_closures_then_handle_then_body() {
    let exn = Decl::Effect(EffectDecl {
        name: "exn!".into(),
        params: vec![],
        ops: vec![OperatorDecl {
            name: "raise!".into(),
            ins: vec![],
            outs: vec![],
            span: span(),
        }],
        span: span(),
    });
    let prog = program(
        vec![exn],
        expr(vec![Word::Handle {
            params: vec![],
            body: expr(vec![i32_lit(2), ident("raise!"), i32_lit(2), ident("add-i32")]),
            handlers: vec![Handler {
                name: "raise!".into(),
                params: vec![],
                body: expr(vec![ident("resume")]),
                span: span(),
            }],
            ret: expr(vec![i32_lit(2), ident("mul-i32")]),
        }]),
    );
    let blocks = compile(&prog).unwrap();
    let main = block_named(&blocks, "main");
    let instrs = main.instrs();

    // Return closure first, then the handler closure, then IHandle.
    assert!(matches!(instrs[0], Instr::IClosure { .. }));
    assert!(matches!(instrs[1], Instr::IClosure { .. }));
    let Instr::IHandle {
        after_offset,
        params,
        handlers,
        ..
    } = instrs[2]
    else {
        panic!("expected IHandle, got {:?}", instrs[2]);
    };
    assert_eq!((params, handlers), (0, 1));

    let body = &instrs[3..8];
    insta::assert_snapshot!(
        render(body),
        @"i32 2; escape 0 0; i32 2; add-i32; complete"
    );
    // The post-handle offset is the handled body length plus one.
    assert_eq!(after_offset, 6);

    // The handler arm resumes through the continuation.
    let arm = block_named(&blocks, "handler2");
    assert_eq!(
        arm.instrs(),
        &[
            Instr::IFind { frame: 0, index: 0 },
            Instr::ICallContinuation,
            Instr::IReturn,
        ]
    );
    // The return clause multiplies the body result.
    let ret = block_named(&blocks, "handler1");
    assert_eq!(
        ret.instrs(),
        &[
            Instr::II32(2),
            Instr::IIntMul(IntSize::I32),
            Instr::IReturn,
        ]
    );
}

// ---------------------------------------------------------------------------
// S4: overload resolution
// ---------------------------------------------------------------------------

fn list_of(elem: Type) -> Type {
    build::list(elem)
}

#[test]
fn s4_overload_selects_the_i32_instance() {
    let instances = [
        (
            "bool",
            Type::Prim(PrimType::Bool),
            vec![ident("xor-bool"), ident("not-bool")],
        ),
        (
            "i32",
            Type::Prim(PrimType::Int(IntSize::I32)),
            vec![ident("eq-i32")],
        ),
        (
            "list",
            list_of(build::val(
                Type::var("t", Kind::Data),
                Type::var("s", Kind::Sharing),
            )),
            vec![ident("list-append"), ident("is-nil")],
        ),
    ];
    let mut decls = eq_overload_decls(&instances);
    decls.push(Decl::Check {
        name: "eq".into(),
        scheme: binary_overload_scheme("eq"),
        span: span(),
    });
    let prog = program(decls, expr(vec![i32_lit(1), i32_lit(2), ident("eq")]));
    let blocks = compile(&prog).unwrap();

    // The I32 instance function was synthesized...
    let instance = block_named(&blocks, "eq1");
    assert_eq!(
        instance.instrs(),
        &[Instr::IIntEq(IntSize::I32), Instr::IReturn]
    );
    // ...and main calls it through the selected dictionary.
    let main = block_named(&blocks, "main");
    let Some(Instr::IClosure { label, .. }) = main
        .instrs()
        .iter()
        .find(|i| matches!(i, Instr::IClosure { .. }))
    else {
        panic!("main pushes the instance dictionary");
    };
    let dict = block_named(&blocks, label);
    assert!(
        dict.instrs()
            .iter()
            .any(|i| matches!(i, Instr::ICall(name) if name == "eq1")),
        "the dictionary calls the I32 instance, got {:?}",
        dict.instrs()
    );
    assert!(
        main.instrs().iter().any(|i| matches!(i, Instr::ICallClosure)),
        "the method invocation calls the dictionary"
    );
}

// ---------------------------------------------------------------------------
// S5: state discharge
// ---------------------------------------------------------------------------

#[test]
fn s5_with_state_discharges_the_state_effect() {
    let prog = program(
        vec![],
        expr(vec![
            i32_lit(1),
            Word::WithState(expr(vec![ident("new-ref"), ident("get-ref")])),
        ]),
    );
    // Compilation succeeds: main's effect row is required to be empty, so
    // the state effect must have been stripped.
    let blocks = compile(&prog).unwrap();
    let main = block_named(&blocks, "main");
    assert_eq!(
        main.instrs(),
        &[
            Instr::II32(1),
            Instr::INewRef,
            Instr::IGetRef,
            Instr::IReturn,
        ]
    );
}

#[test]
fn s5_undischarged_state_fails_main_check() {
    let prog = program(
        vec![],
        expr(vec![i32_lit(1), ident("new-ref"), ident("get-ref")]),
    );
    let err = compile(&prog).unwrap_err();
    assert_eq!(err.diagnostics()[0].category, Category::MainSignature);
}

// ---------------------------------------------------------------------------
// S6: missing instance
// ---------------------------------------------------------------------------

#[test]
fn s6_missing_instance_fails_elaboration() {
    let instances = [(
        "bool",
        Type::Prim(PrimType::Bool),
        vec![ident("xor-bool"), ident("not-bool")],
    )];
    let decls = eq_overload_decls(&instances);
    let prog = program(decls, expr(vec![i32_lit(1), i32_lit(2), ident("eq")]));
    let err = compile(&prog).unwrap_err();
    assert_eq!(err.diagnostics()[0].category, Category::InstanceNotFound);
}

// ---------------------------------------------------------------------------
// Determinism
// ---------------------------------------------------------------------------

#[test]
fn bytecode_is_deterministic() {
    let prog = program(
        vec![Decl::Func(FuncDecl {
            name: "twice".into(),
            body: expr(vec![ident("dup"), ident("add-i32")]),
            span: span(),
        })],
        expr(vec![i32_lit(21), ident("twice")]),
    );
    let a = compile(&prog).unwrap();
    let b = compile(&prog).unwrap();
    assert_eq!(a, b);
    assert_eq!(weka::disassemble(&a), weka::disassemble(&b));
}

// ---------------------------------------------------------------------------
// Error paths
// ---------------------------------------------------------------------------

#[test]
fn unknown_word_reports_undefined_name() {
    let prog = program(vec![], expr(vec![ident("frobnicate")]));
    let err = compile(&prog).unwrap_err();
    assert_eq!(err.diagnostics()[0].category, Category::UndefinedName);
}

#[test]
fn main_must_leave_an_i32() {
    let prog = program(vec![], expr(vec![Word::Bool(true)]));
    let err = compile(&prog).unwrap_err();
    assert_eq!(err.diagnostics()[0].category, Category::MainSignature);
}
