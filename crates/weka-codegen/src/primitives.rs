//! The primitive table.
//!
//! Every built-in word the core recognizes, with its scheme (seeded into
//! the environment for inference) and the instruction sequence it selects.
//! Names follow the `<op>-<size>` suffix convention (`add-i32`,
//! `conv-bool-u16`); callers may not invent primitive names.

use std::collections::BTreeMap;

use weka_types::{
    build, FloatSize, IntSize, Kind, PrimType, QualType, Scheme, SeqItem, Type,
};

use crate::Instr;

/// One primitive: its word scheme and selected instructions.
#[derive(Debug, Clone, PartialEq)]
pub struct Primitive {
    pub scheme: Scheme,
    pub instrs: Vec<Instr>,
}

/// A stack value of the given data type with its own sharing variable.
fn value(data: Type, sharing_var: &str) -> Type {
    build::val(data, Type::var(sharing_var, Kind::Sharing))
}

fn int_data(size: IntSize) -> Type {
    Type::Prim(PrimType::Int(size))
}

fn float_data(size: FloatSize) -> Type {
    Type::Prim(PrimType::Float(size))
}

fn bool_data() -> Type {
    Type::Prim(PrimType::Bool)
}

/// Build a primitive word scheme: consumes `consumed` (top first),
/// produces `produced`, over a polymorphic stack tail with a fresh effect
/// and permission row. Quantifies every free variable.
fn word_scheme(consumed: Vec<Type>, produced: Vec<Type>) -> Scheme {
    word_scheme_with_effects(consumed, produced, Type::var("e", Kind::row(Kind::Effect)))
}

fn word_scheme_with_effects(consumed: Vec<Type>, produced: Vec<Type>, effects: Type) -> Scheme {
    let tail = Type::var("z", Kind::seq(Kind::Value));
    let mut ins: Vec<SeqItem> = consumed.into_iter().map(SeqItem::indexed).collect();
    ins.push(SeqItem::dotted(tail.clone()));
    let mut outs: Vec<SeqItem> = produced.into_iter().map(SeqItem::indexed).collect();
    outs.push(SeqItem::dotted(tail));
    let head = build::fn_type(
        effects,
        Type::var("p", Kind::row(Kind::Permission)),
        Type::True(Kind::Totality),
        Type::seq(Kind::Value, ins),
        Type::seq(Kind::Value, outs),
    );
    Scheme::close_over(QualType::unqualified(head))
}

/// The full registry, keyed by primitive name.
pub fn registry() -> BTreeMap<String, Primitive> {
    let mut table = BTreeMap::new();
    let mut add = |name: String, scheme: Scheme, instrs: Vec<Instr>| {
        table.insert(name, Primitive { scheme, instrs });
    };

    // -- Integer arithmetic, comparisons, conversions -----------------------
    for size in IntSize::ALL {
        let suffix = size.suffix();
        let binops: [(&str, fn(IntSize) -> Instr); 10] = [
            ("add", Instr::IIntAdd),
            ("sub", Instr::IIntSub),
            ("mul", Instr::IIntMul),
            ("div", Instr::IIntDiv),
            ("rem", Instr::IIntRem),
            ("and", Instr::IIntAnd),
            ("or", Instr::IIntOr),
            ("xor", Instr::IIntXor),
            ("shl", Instr::IIntShl),
            ("shr", Instr::IIntShr),
        ];
        for (op, instr) in binops {
            add(
                format!("{op}-{suffix}"),
                word_scheme(
                    vec![value(int_data(size), "sa"), value(int_data(size), "sb")],
                    vec![value(int_data(size), "sc")],
                ),
                vec![instr(size)],
            );
        }
        let cmps: [(&str, fn(IntSize) -> Instr); 6] = [
            ("eq", Instr::IIntEq),
            ("neq", Instr::IIntNeq),
            ("lt", Instr::IIntLt),
            ("gt", Instr::IIntGt),
            ("lte", Instr::IIntLte),
            ("gte", Instr::IIntGte),
        ];
        for (op, instr) in cmps {
            add(
                format!("{op}-{suffix}"),
                word_scheme(
                    vec![value(int_data(size), "sa"), value(int_data(size), "sb")],
                    vec![value(bool_data(), "sc")],
                ),
                vec![instr(size)],
            );
        }
        if size.is_signed() {
            add(
                format!("neg-{suffix}"),
                word_scheme(
                    vec![value(int_data(size), "sa")],
                    vec![value(int_data(size), "sb")],
                ),
                vec![Instr::IIntNeg(size)],
            );
        }
        add(
            format!("conv-bool-{suffix}"),
            word_scheme(
                vec![value(int_data(size), "sa")],
                vec![value(bool_data(), "sb")],
            ),
            vec![Instr::IConvBool(size)],
        );
        for target in IntSize::ALL {
            if target != size {
                add(
                    format!("conv-{}-{}", suffix, target.suffix()),
                    word_scheme(
                        vec![value(int_data(size), "sa")],
                        vec![value(int_data(target), "sb")],
                    ),
                    vec![Instr::IConvInt(size, target)],
                );
            }
        }
    }

    // -- Float arithmetic ----------------------------------------------------
    for size in FloatSize::ALL {
        let suffix = size.suffix();
        let binops: [(&str, fn(FloatSize) -> Instr); 4] = [
            ("add", Instr::IFloatAdd),
            ("sub", Instr::IFloatSub),
            ("mul", Instr::IFloatMul),
            ("div", Instr::IFloatDiv),
        ];
        for (op, instr) in binops {
            add(
                format!("{op}-{suffix}"),
                word_scheme(
                    vec![value(float_data(size), "sa"), value(float_data(size), "sb")],
                    vec![value(float_data(size), "sc")],
                ),
                vec![instr(size)],
            );
        }
        let cmps: [(&str, fn(FloatSize) -> Instr); 6] = [
            ("eq", Instr::IFloatEq),
            ("neq", Instr::IFloatNeq),
            ("lt", Instr::IFloatLt),
            ("gt", Instr::IFloatGt),
            ("lte", Instr::IFloatLte),
            ("gte", Instr::IFloatGte),
        ];
        for (op, instr) in cmps {
            add(
                format!("{op}-{suffix}"),
                word_scheme(
                    vec![value(float_data(size), "sa"), value(float_data(size), "sb")],
                    vec![value(bool_data(), "sc")],
                ),
                vec![instr(size)],
            );
        }
        add(
            format!("neg-{suffix}"),
            word_scheme(
                vec![value(float_data(size), "sa")],
                vec![value(float_data(size), "sb")],
            ),
            vec![Instr::IFloatNeg(size)],
        );
    }

    // -- Booleans ------------------------------------------------------------
    let bool_binops: [(&str, Instr); 3] = [
        ("and-bool", Instr::IBoolAnd),
        ("or-bool", Instr::IBoolOr),
        ("xor-bool", Instr::IBoolXor),
    ];
    for (name, instr) in bool_binops {
        add(
            name.to_string(),
            word_scheme(
                vec![value(bool_data(), "sa"), value(bool_data(), "sb")],
                vec![value(bool_data(), "sc")],
            ),
            vec![instr],
        );
    }
    add(
        "not-bool".to_string(),
        word_scheme(vec![value(bool_data(), "sa")], vec![value(bool_data(), "sb")]),
        vec![Instr::IBoolNot],
    );

    // -- Stack shuffling -----------------------------------------------------
    // Duplication forces the copied value shared.
    let shared = build::val(Type::var("d", Kind::Data), Type::True(Kind::Sharing));
    add(
        "dup".to_string(),
        word_scheme(vec![shared.clone()], vec![shared.clone(), shared]),
        vec![Instr::IDup],
    );
    add(
        "zap".to_string(),
        word_scheme(vec![Type::var("t", Kind::Value)], vec![]),
        vec![Instr::IZap],
    );
    add(
        "swap".to_string(),
        word_scheme(
            vec![Type::var("ta", Kind::Value), Type::var("tb", Kind::Value)],
            vec![Type::var("tb", Kind::Value), Type::var("ta", Kind::Value)],
        ),
        vec![Instr::ISwap],
    );
    add(
        "nip".to_string(),
        word_scheme(
            vec![Type::var("ta", Kind::Value), Type::var("tb", Kind::Value)],
            vec![Type::var("ta", Kind::Value)],
        ),
        vec![Instr::INip],
    );

    // -- Lists ---------------------------------------------------------------
    let elem = Type::var("t", Kind::Value);
    let list_val = |s: &str| value(build::list(Type::var("t", Kind::Value)), s);
    add(
        "nil".to_string(),
        word_scheme(vec![], vec![list_val("sa")]),
        vec![Instr::IListNil],
    );
    add(
        "cons".to_string(),
        word_scheme(vec![list_val("sa"), elem.clone()], vec![list_val("sa")]),
        vec![Instr::IListCons],
    );
    add(
        "head".to_string(),
        word_scheme(vec![list_val("sa")], vec![elem.clone()]),
        vec![Instr::IListHead],
    );
    add(
        "tail".to_string(),
        word_scheme(vec![list_val("sa")], vec![list_val("sa")]),
        vec![Instr::IListTail],
    );
    add(
        "is-nil".to_string(),
        word_scheme(vec![list_val("sa")], vec![value(bool_data(), "sb")]),
        vec![Instr::IListIsEmpty],
    );
    add(
        "list-append".to_string(),
        word_scheme(vec![list_val("sa"), list_val("sb")], vec![list_val("sc")]),
        vec![Instr::IListAppend],
    );

    // -- Reference cells -----------------------------------------------------
    let heap = Type::var("h", Kind::Heap);
    let state_effects = Type::RowExtend {
        label: build::STATE.to_string(),
        elem: Box::new(build::state_effect(heap.clone())),
        rest: Box::new(Type::var("e", Kind::row(Kind::Effect))),
    };
    let ref_val = |s: &str| {
        value(
            build::reference(Type::var("h", Kind::Heap), Type::var("t", Kind::Value)),
            s,
        )
    };
    add(
        "new-ref".to_string(),
        word_scheme_with_effects(
            vec![Type::var("t", Kind::Value)],
            vec![ref_val("sa")],
            state_effects.clone(),
        ),
        vec![Instr::INewRef],
    );
    add(
        "get-ref".to_string(),
        word_scheme_with_effects(
            vec![ref_val("sa")],
            vec![Type::var("t", Kind::Value)],
            state_effects.clone(),
        ),
        vec![Instr::IGetRef],
    );
    add(
        "put-ref".to_string(),
        word_scheme_with_effects(
            vec![ref_val("sa"), Type::var("t", Kind::Value)],
            vec![ref_val("sa")],
            state_effects,
        ),
        vec![Instr::IPutRef],
    );

    // -- Records -------------------------------------------------------------
    add(
        "record-empty".to_string(),
        word_scheme(
            vec![],
            vec![value(build::record(Type::RowEmpty(Kind::Value)), "sa")],
        ),
        vec![Instr::IRecordEmpty],
    );

    table
}

/// Instruction sequences only, for the code generator.
pub fn instruction_table() -> BTreeMap<String, Vec<Instr>> {
    registry()
        .into_iter()
        .map(|(name, prim)| (name, prim.instrs))
        .collect()
}
