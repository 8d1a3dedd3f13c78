//! Word-by-word inference for the concatenative calculus.
//!
//! Every word receives a function type `(e, p, t, ins → outs)` with a
//! sharing attribute; adjacent words compose by unifying the left word's
//! outputs with the right word's inputs while accumulating totality,
//! sharing, and the effect and permission rows. Inference emits
//! constraints and placeholder words; [`infer_top`] solves the constraints,
//! reduces the qualifier context through the CHR solver, checks ambiguity,
//! and generalizes.

use std::collections::BTreeSet;

use weka_ast::{Expr, Handler, Pattern, Span, Statement, Word};
use weka_diag::{Category, Diagnostic};
use weka_types::{
    build, Equation, FloatSize, IntSize, Kind, Pred, PrimType, QualType, Scheme, SeqItem, Subst,
    Type,
};

use crate::chr;
use crate::env::{Env, EnvEntry};
use crate::{Constraint, Fresh, Provenance, Reason, Unifier};

// ---------------------------------------------------------------------------
// Typed words
// ---------------------------------------------------------------------------

/// The expanded expression tree produced by inference.
///
/// It mirrors the surface tree, with identifiers still unclassified and
/// with overload, method, and recursion placeholders embedded as extra
/// constructors for elaboration to rewrite.
#[derive(Debug, Clone, PartialEq)]
pub struct TExpr {
    pub words: Vec<TWord>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TWord {
    Block(Vec<TStatement>),
    If {
        then_branch: TExpr,
        else_branch: TExpr,
    },
    While {
        cond: TExpr,
        body: TExpr,
    },
    FnLit(TExpr),
    Do,
    Handle {
        params: Vec<String>,
        body: TExpr,
        handlers: Vec<THandler>,
        ret: TExpr,
        effect: String,
    },
    NewRef,
    GetRef,
    PutRef,
    WithState(TExpr),
    WithPermission {
        perms: Vec<String>,
        body: TExpr,
    },
    Untag,
    By(String),
    Per(String),
    RecordExtend(String),
    RecordSelect(String),
    RecordRestrict(String),
    Variant(String),
    Case {
        tag: String,
        then_branch: TExpr,
        else_branch: TExpr,
    },
    Ident(String),
    /// Elaboration-introduced binder popping values into named slots.
    Vars {
        names: Vec<String>,
        body: TExpr,
    },
    Int {
        value: i64,
        size: IntSize,
    },
    Float {
        bits: u64,
        size: FloatSize,
    },
    Bool(bool),
    Str(String),
    OverloadPlaceholder(Pred),
    MethodPlaceholder {
        name: String,
        pred: Pred,
    },
    RecursivePlaceholder {
        name: String,
        ty: Type,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct THandler {
    pub name: String,
    pub params: Vec<String>,
    pub body: TExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TStatement {
    Let { pattern: TPattern, value: TExpr },
    Expr(TExpr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TPattern {
    Wild,
    Var(String),
    Ctor { name: String, args: Vec<TPattern> },
    Int { value: i64, size: IntSize },
    Bool(bool),
}

// ---------------------------------------------------------------------------
// Word types
// ---------------------------------------------------------------------------

/// Decomposed word type: `(effects, perms, totality, ins → outs)` with a
/// sharing attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct WordType {
    pub effects: Type,
    pub perms: Type,
    pub totality: Type,
    pub ins: Type,
    pub outs: Type,
    pub sharing: Type,
}

impl WordType {
    /// The word type as a function data type (dropping sharing).
    pub fn fn_data(&self) -> Type {
        build::fn_type(
            self.effects.clone(),
            self.perms.clone(),
            self.totality.clone(),
            self.ins.clone(),
            self.outs.clone(),
        )
    }

    pub fn apply(&self, subst: &Subst) -> WordType {
        WordType {
            effects: subst.apply(&self.effects),
            perms: subst.apply(&self.perms),
            totality: subst.apply(&self.totality),
            ins: subst.apply(&self.ins),
            outs: subst.apply(&self.outs),
            sharing: subst.apply(&self.sharing),
        }
    }

    /// Rebuild from a function data type view plus a sharing attribute.
    pub fn from_fn(view: build::FnView, sharing: Type) -> WordType {
        WordType {
            effects: view.effects,
            perms: view.perms,
            totality: view.totality,
            ins: view.ins,
            outs: view.outs,
            sharing,
        }
    }
}

// ---------------------------------------------------------------------------
// Inference engine
// ---------------------------------------------------------------------------

/// Result of [`infer_top`].
#[derive(Debug, Clone)]
pub struct InferredTop {
    pub expr: TExpr,
    pub scheme: Scheme,
    pub word_type: WordType,
    pub subst: Subst,
}

pub struct Inference<'f> {
    fresh: &'f mut Fresh,
    constraints: Vec<Constraint>,
    preds: Vec<Pred>,
}

impl<'f> Inference<'f> {
    pub fn new(fresh: &'f mut Fresh) -> Self {
        Self {
            fresh,
            constraints: Vec::new(),
            preds: Vec::new(),
        }
    }

    fn constrain(&mut self, left: Type, right: Type, span: Span, reason: Reason) {
        self.constraints.push(Constraint {
            left,
            right,
            provenance: Provenance { span, reason },
        });
    }

    fn instantiate(&mut self, scheme: &Scheme) -> QualType {
        let mut subst = Subst::new();
        for (name, kind) in &scheme.quantified {
            let fresh = self.fresh.var(kind.clone());
            subst
                .bind(name, kind, fresh)
                .expect("fresh variable has the quantified kind");
        }
        subst.apply_qual(&scheme.qual)
    }

    /// An identity word: passes the stack through unchanged.
    fn identity_word(&mut self) -> WordType {
        let tail = self.fresh.stack_tail();
        let stack = Type::seq(Kind::Value, vec![SeqItem::dotted(tail)]);
        WordType {
            effects: self.fresh.var(Kind::row(Kind::Effect)),
            perms: self.fresh.var(Kind::row(Kind::Permission)),
            totality: Type::True(Kind::Totality),
            ins: stack.clone(),
            outs: stack,
            sharing: Type::False(Kind::Sharing),
        }
    }

    /// A word consuming `consumed` (top first) and producing `produced`
    /// (top first) over a fresh stack tail.
    fn stack_word(&mut self, consumed: Vec<Type>, produced: Vec<Type>) -> WordType {
        let tail = self.fresh.stack_tail();
        let mut ins: Vec<SeqItem> = consumed.into_iter().map(SeqItem::indexed).collect();
        ins.push(SeqItem::dotted(tail.clone()));
        let mut outs: Vec<SeqItem> = produced.into_iter().map(SeqItem::indexed).collect();
        outs.push(SeqItem::dotted(tail));
        WordType {
            effects: self.fresh.var(Kind::row(Kind::Effect)),
            perms: self.fresh.var(Kind::row(Kind::Permission)),
            totality: Type::True(Kind::Totality),
            ins: Type::seq(Kind::Value, ins),
            outs: Type::seq(Kind::Value, outs),
            sharing: Type::False(Kind::Sharing),
        }
    }

    /// Prepend values (top first) onto a stack sequence type.
    fn push_front(&mut self, values: Vec<Type>, stack: &Type) -> Type {
        let mut items: Vec<SeqItem> = values.into_iter().map(SeqItem::indexed).collect();
        match stack {
            Type::Seq { items: rest, .. } => items.extend(rest.iter().cloned()),
            other => items.push(SeqItem::dotted(other.clone())),
        }
        Type::seq(Kind::Value, items)
    }

    fn fresh_value(&mut self) -> Type {
        self.fresh.var(Kind::Value)
    }

    /// A fresh value with visible `val(data, sharing)` structure, for
    /// positions the sharing analysis must reach into.
    fn fresh_val_structure(&mut self) -> Type {
        let data = self.fresh.var(Kind::Data);
        let sharing = self.fresh_sharing();
        build::val(data, sharing)
    }

    fn fresh_sharing(&mut self) -> Type {
        self.fresh.var(Kind::Sharing)
    }

    /// A fresh primitive value on the stack.
    fn prim_value(&mut self, prim: PrimType) -> Type {
        let sharing = self.fresh_sharing();
        build::val(Type::Prim(prim), sharing)
    }

    // -- Attribute composition ----------------------------------------------

    /// Conjunction of totality attributes. Concrete operands fold; two
    /// symbolic operands are unified, which is the two-point-lattice meet
    /// once either resolves.
    fn attr_and(&mut self, a: Type, b: Type, span: Span) -> Type {
        match (&a, &b) {
            (Type::False(_), _) | (_, Type::False(_)) => Type::False(a.kind()),
            (Type::True(_), _) => b,
            (_, Type::True(_)) => a,
            _ if a == b => a,
            _ => {
                self.constrain(a.clone(), b, span, Reason::Sharing);
                a
            }
        }
    }

    /// Disjunction of sharing attributes, dual to [`Self::attr_and`].
    fn attr_or(&mut self, a: Type, b: Type, span: Span) -> Type {
        match (&a, &b) {
            (Type::True(_), _) | (_, Type::True(_)) => Type::True(a.kind()),
            (Type::False(_), _) => b,
            (_, Type::False(_)) => a,
            _ if a == b => a,
            _ => {
                self.constrain(a.clone(), b, span, Reason::Sharing);
                a
            }
        }
    }

    // -- Expressions ---------------------------------------------------------

    pub fn infer_expr(&mut self, env: &Env, expr: &Expr) -> Result<(TExpr, WordType), Diagnostic> {
        let mut acc = self.identity_word();
        let mut words = Vec::new();
        for word in &expr.words {
            let (mut emitted, wt) = self.infer_word(env, &word.node, word.span)?;
            words.append(&mut emitted);
            acc = self.compose(acc, wt, word.span);
        }
        Ok((TExpr { words }, acc))
    }

    fn compose(&mut self, left: WordType, right: WordType, span: Span) -> WordType {
        self.constrain(left.outs.clone(), right.ins.clone(), span, Reason::Composition);
        self.constrain(
            left.effects.clone(),
            right.effects.clone(),
            span,
            Reason::Composition,
        );
        self.constrain(left.perms.clone(), right.perms.clone(), span, Reason::Composition);
        let totality = self.attr_and(left.totality, right.totality, span);
        let sharing = self.attr_or(left.sharing, right.sharing, span);
        WordType {
            effects: left.effects,
            perms: left.perms,
            totality,
            ins: left.ins,
            outs: right.outs,
            sharing,
        }
    }

    /// Unify two branch word types, accumulating totality with `and` and
    /// sharing with `or`.
    fn unify_branches(&mut self, a: WordType, b: WordType, span: Span) -> WordType {
        self.constrain(a.effects.clone(), b.effects.clone(), span, Reason::Branch);
        self.constrain(a.perms.clone(), b.perms.clone(), span, Reason::Branch);
        self.constrain(a.ins.clone(), b.ins.clone(), span, Reason::Branch);
        self.constrain(a.outs.clone(), b.outs.clone(), span, Reason::Branch);
        let totality = self.attr_and(a.totality, b.totality, span);
        let sharing = self.attr_or(a.sharing, b.sharing, span);
        WordType {
            effects: a.effects,
            perms: a.perms,
            totality,
            ins: a.ins,
            outs: a.outs,
            sharing,
        }
    }

    fn infer_word(
        &mut self,
        env: &Env,
        word: &Word,
        span: Span,
    ) -> Result<(Vec<TWord>, WordType), Diagnostic> {
        match word {
            Word::Int { value, size } => {
                let pushed = self.prim_value(PrimType::Int(*size));
                let wt = self.stack_word(vec![], vec![pushed]);
                Ok((
                    vec![TWord::Int {
                        value: *value,
                        size: *size,
                    }],
                    wt,
                ))
            }
            Word::Float { bits, size } => {
                let pushed = self.prim_value(PrimType::Float(*size));
                let wt = self.stack_word(vec![], vec![pushed]);
                Ok((
                    vec![TWord::Float {
                        bits: *bits,
                        size: *size,
                    }],
                    wt,
                ))
            }
            Word::Bool(b) => {
                let pushed = self.prim_value(PrimType::Bool);
                let wt = self.stack_word(vec![], vec![pushed]);
                Ok((vec![TWord::Bool(*b)], wt))
            }
            Word::Str(s) => {
                let pushed = self.prim_value(PrimType::String);
                let wt = self.stack_word(vec![], vec![pushed]);
                Ok((vec![TWord::Str(s.clone())], wt))
            }
            Word::Ident(name) => self.infer_ident(env, name, span),
            Word::Do => {
                let effects = self.fresh.var(Kind::row(Kind::Effect));
                let perms = self.fresh.var(Kind::row(Kind::Permission));
                let totality = self.fresh.var(Kind::Totality);
                let ins = self.fresh.stack_tail();
                let ins = Type::seq(Kind::Value, vec![SeqItem::dotted(ins)]);
                let outs = self.fresh.stack_tail();
                let outs = Type::seq(Kind::Value, vec![SeqItem::dotted(outs)]);
                let sharing = self.fresh_sharing();
                let fn_data = build::fn_type(
                    effects.clone(),
                    perms.clone(),
                    totality.clone(),
                    ins.clone(),
                    outs.clone(),
                );
                let fn_val = build::val(fn_data, sharing);
                let word_ins = self.push_front(vec![fn_val], &ins);
                Ok((
                    vec![TWord::Do],
                    WordType {
                        effects,
                        perms,
                        totality,
                        ins: word_ins,
                        outs,
                        sharing: Type::False(Kind::Sharing),
                    },
                ))
            }
            Word::Block(stmts) => {
                let (tstmts, wt) = self.infer_statements(env, stmts, span)?;
                Ok((vec![TWord::Block(tstmts)], wt))
            }
            Word::If {
                then_branch,
                else_branch,
            } => {
                let (tthen, then_wt) = self.infer_expr(env, then_branch)?;
                let (telse, else_wt) = self.infer_expr(env, else_branch)?;
                let branch = self.unify_branches(then_wt, else_wt, span);
                let cond = self.prim_value(PrimType::Bool);
                let ins = self.push_front(vec![cond], &branch.ins);
                Ok((
                    vec![TWord::If {
                        then_branch: tthen,
                        else_branch: telse,
                    }],
                    WordType {
                        ins,
                        ..branch
                    },
                ))
            }
            Word::While { cond, body } => {
                let (tcond, cond_wt) = self.infer_expr(env, cond)?;
                let (tbody, body_wt) = self.infer_expr(env, body)?;
                // The loop body must preserve the stack shape.
                self.constrain(
                    body_wt.ins.clone(),
                    body_wt.outs.clone(),
                    span,
                    Reason::Branch,
                );
                self.constrain(cond_wt.ins.clone(), body_wt.ins.clone(), span, Reason::Condition);
                let bool_top = self.prim_value(PrimType::Bool);
                let expected_cond_out = self.push_front(vec![bool_top], &body_wt.ins);
                self.constrain(cond_wt.outs.clone(), expected_cond_out, span, Reason::Condition);
                self.constrain(
                    cond_wt.effects.clone(),
                    body_wt.effects.clone(),
                    span,
                    Reason::Condition,
                );
                self.constrain(cond_wt.perms.clone(), body_wt.perms.clone(), span, Reason::Condition);
                let sharing = self.attr_or(cond_wt.sharing, body_wt.sharing, span);
                Ok((
                    vec![TWord::While {
                        cond: tcond,
                        body: tbody,
                    }],
                    WordType {
                        effects: body_wt.effects,
                        perms: body_wt.perms,
                        // A loop may diverge.
                        totality: Type::False(Kind::Totality),
                        ins: body_wt.ins.clone(),
                        outs: body_wt.ins,
                        sharing,
                    },
                ))
            }
            Word::FnLit(body) => {
                let (tbody, body_wt) = self.infer_expr(env, body)?;
                // The literal's sharing is the disjunction of the sharing
                // attributes of the free variables it captures.
                let mut sharing = Type::False(Kind::Sharing);
                for captured in free_value_vars(env, body) {
                    if let Some(EnvEntry::Variable(scheme)) = env.lookup_word(&captured) {
                        if let Some(view) = build::as_val(&scheme.qual.head) {
                            sharing = self.attr_or(sharing, view.sharing, span);
                        }
                    }
                }
                let fn_val = build::val(body_wt.fn_data(), sharing);
                let wt = self.stack_word(vec![], vec![fn_val]);
                Ok((vec![TWord::FnLit(tbody)], wt))
            }
            Word::Handle {
                params,
                body,
                handlers,
                ret,
            } => self.infer_handle(env, params, body, handlers, ret, span),
            Word::NewRef => {
                let value = self.fresh_value();
                let heap = self.fresh.var(Kind::Heap);
                let sharing = self.fresh_sharing();
                let ref_val = build::val(build::reference(heap.clone(), value.clone()), sharing);
                let mut wt = self.stack_word(vec![value], vec![ref_val]);
                wt.effects = self.state_row(heap);
                Ok((vec![TWord::NewRef], wt))
            }
            Word::GetRef => {
                let value = self.fresh_value();
                let heap = self.fresh.var(Kind::Heap);
                let sharing = self.fresh_sharing();
                let ref_val = build::val(build::reference(heap.clone(), value.clone()), sharing);
                let mut wt = self.stack_word(vec![ref_val], vec![value]);
                wt.effects = self.state_row(heap);
                Ok((vec![TWord::GetRef], wt))
            }
            Word::PutRef => {
                let value = self.fresh_value();
                let heap = self.fresh.var(Kind::Heap);
                let sharing = self.fresh_sharing();
                let ref_val = build::val(build::reference(heap.clone(), value.clone()), sharing);
                let mut wt = self.stack_word(vec![ref_val.clone(), value], vec![ref_val]);
                wt.effects = self.state_row(heap);
                Ok((vec![TWord::PutRef], wt))
            }
            Word::WithState(body) => self.infer_with_state(env, body, span),
            Word::WithPermission { perms, body } => {
                let (tbody, body_wt) = self.infer_expr(env, body)?;
                let mut expected = self.fresh.var(Kind::row(Kind::Permission));
                let outer = expected.clone();
                for perm in perms.iter().rev() {
                    expected = Type::RowExtend {
                        label: perm.clone(),
                        elem: Box::new(Type::ctor(perm.clone(), Kind::Permission)),
                        rest: Box::new(expected),
                    };
                }
                self.constrain(body_wt.perms.clone(), expected, span, Reason::Composition);
                Ok((
                    vec![TWord::WithPermission {
                        perms: perms.clone(),
                        body: tbody,
                    }],
                    WordType {
                        perms: outer,
                        ..body_wt
                    },
                ))
            }
            Word::Untag => {
                let data = self.fresh.var(Kind::Data);
                let unit = self.fresh.var(Kind::Unit);
                let sharing = self.fresh_sharing();
                let tagged = build::val(build::tagged(data.clone(), unit), sharing.clone());
                let bare = build::val(data, sharing);
                let wt = self.stack_word(vec![tagged], vec![bare]);
                Ok((vec![TWord::Untag], wt))
            }
            Word::By(unit_name) => {
                let wt = self.unit_word(env, unit_name, 1, span)?;
                Ok((vec![TWord::By(unit_name.clone())], wt))
            }
            Word::Per(unit_name) => {
                let wt = self.unit_word(env, unit_name, -1, span)?;
                Ok((vec![TWord::Per(unit_name.clone())], wt))
            }
            Word::RecordExtend(label) => {
                let row = self.fresh.var(Kind::row(Kind::Value));
                let field = self.fresh_value();
                let sharing = self.fresh_sharing();
                let before = build::val(build::record(row.clone()), sharing.clone());
                let extended = Type::RowExtend {
                    label: label.clone(),
                    elem: Box::new(field.clone()),
                    rest: Box::new(row),
                };
                let after = build::val(build::record(extended), sharing);
                let wt = self.stack_word(vec![field, before], vec![after]);
                Ok((vec![TWord::RecordExtend(label.clone())], wt))
            }
            Word::RecordSelect(label) => {
                let row = self.fresh.var(Kind::row(Kind::Value));
                let field = self.fresh_value();
                let sharing = self.fresh_sharing();
                let record_row = Type::RowExtend {
                    label: label.clone(),
                    elem: Box::new(field.clone()),
                    rest: Box::new(row),
                };
                let record = build::val(build::record(record_row), sharing);
                let wt = self.stack_word(vec![record], vec![field]);
                Ok((vec![TWord::RecordSelect(label.clone())], wt))
            }
            Word::RecordRestrict(label) => {
                let row = self.fresh.var(Kind::row(Kind::Value));
                let field = self.fresh_value();
                let sharing = self.fresh_sharing();
                let record_row = Type::RowExtend {
                    label: label.clone(),
                    elem: Box::new(field),
                    rest: Box::new(row.clone()),
                };
                let before = build::val(build::record(record_row), sharing.clone());
                let after = build::val(build::record(row), sharing);
                let wt = self.stack_word(vec![before], vec![after]);
                Ok((vec![TWord::RecordRestrict(label.clone())], wt))
            }
            Word::Variant(label) => {
                let payload = self.fresh_value();
                let row = self.fresh.var(Kind::row(Kind::Value));
                let sharing = self.fresh_sharing();
                let variant_row = Type::RowExtend {
                    label: label.clone(),
                    elem: Box::new(payload.clone()),
                    rest: Box::new(row),
                };
                let variant = build::val(build::variant(variant_row), sharing);
                let wt = self.stack_word(vec![payload], vec![variant]);
                Ok((vec![TWord::Variant(label.clone())], wt))
            }
            Word::Case {
                tag,
                then_branch,
                else_branch,
            } => {
                let payload = self.fresh_value();
                let row = self.fresh.var(Kind::row(Kind::Value));
                let sharing = self.fresh_sharing();
                let (tthen, then_wt) = self.infer_expr(env, then_branch)?;
                let (telse, else_wt) = self.infer_expr(env, else_branch)?;
                // The matched branch sees the payload, the other branch the
                // narrowed variant.
                let narrowed = build::val(build::variant(row.clone()), sharing.clone());
                let base = self.fresh.stack_tail();
                let base = Type::seq(Kind::Value, vec![SeqItem::dotted(base)]);
                let then_ins = self.push_front(vec![payload.clone()], &base);
                let else_ins = self.push_front(vec![narrowed], &base);
                self.constrain(then_wt.ins.clone(), then_ins, span, Reason::Branch);
                self.constrain(else_wt.ins.clone(), else_ins, span, Reason::Branch);
                self.constrain(then_wt.outs.clone(), else_wt.outs.clone(), span, Reason::Branch);
                self.constrain(
                    then_wt.effects.clone(),
                    else_wt.effects.clone(),
                    span,
                    Reason::Branch,
                );
                self.constrain(then_wt.perms.clone(), else_wt.perms.clone(), span, Reason::Branch);
                let totality = self.attr_and(then_wt.totality, else_wt.totality, span);
                let combined_sharing = self.attr_or(then_wt.sharing, else_wt.sharing, span);
                let scrutinee_row = Type::RowExtend {
                    label: tag.clone(),
                    elem: Box::new(payload),
                    rest: Box::new(row),
                };
                let scrutinee = build::val(build::variant(scrutinee_row), sharing);
                let ins = self.push_front(vec![scrutinee], &base);
                Ok((
                    vec![TWord::Case {
                        tag: tag.clone(),
                        then_branch: tthen,
                        else_branch: telse,
                    }],
                    WordType {
                        effects: then_wt.effects,
                        perms: then_wt.perms,
                        totality,
                        ins,
                        outs: then_wt.outs,
                        sharing: combined_sharing,
                    },
                ))
            }
        }
    }

    /// Effect row containing a single state effect over `heap`, with an
    /// open tail.
    fn state_row(&mut self, heap: Type) -> Type {
        let tail = self.fresh.var(Kind::row(Kind::Effect));
        Type::RowExtend {
            label: build::STATE.to_string(),
            elem: Box::new(build::state_effect(heap)),
            rest: Box::new(tail),
        }
    }

    fn unit_word(
        &mut self,
        env: &Env,
        unit_name: &str,
        exponent: i32,
        span: Span,
    ) -> Result<WordType, Diagnostic> {
        if !env.is_unit(unit_name) {
            return Err(Diagnostic::error(
                Category::UndefinedName,
                format!("unknown unit constant `{unit_name}`"),
            )
            .at(crate::span_to_location(span)));
        }
        let data = self.fresh.var(Kind::Data);
        let unit = self.fresh.var(Kind::Unit);
        let sharing = self.fresh_sharing();
        let before = build::val(build::tagged(data.clone(), unit.clone()), sharing.clone());
        let unit_eq = unit
            .to_equation()
            .expect("unit variable converts to an equation")
            .add(&Equation::constant(unit_name).scale(exponent));
        let after_unit = Type::from_equation(&Kind::Unit, unit_eq);
        let after = build::val(build::tagged(data, after_unit), sharing);
        Ok(self.stack_word(vec![before], vec![after]))
    }

    // -- Identifiers ---------------------------------------------------------

    fn infer_ident(
        &mut self,
        env: &Env,
        name: &str,
        span: Span,
    ) -> Result<(Vec<TWord>, WordType), Diagnostic> {
        let entry = env.lookup_word(name).ok_or_else(|| {
            Diagnostic::error(Category::UndefinedName, format!("unknown word `{name}`"))
                .at(crate::span_to_location(span))
        })?;
        match entry {
            EnvEntry::Variable(scheme) => {
                let qual = self.instantiate(scheme);
                self.preds.extend(qual.context.iter().cloned());
                let mut words: Vec<TWord> = qual
                    .context
                    .iter()
                    .map(|p| TWord::OverloadPlaceholder(p.clone()))
                    .collect();
                words.push(TWord::Ident(name.to_string()));
                let wt = self.stack_word(vec![], vec![qual.head]);
                Ok((words, wt))
            }
            EnvEntry::Function(scheme) | EnvEntry::Primitive(scheme) => {
                let qual = self.instantiate(scheme);
                self.preds.extend(qual.context.iter().cloned());
                let view = build::as_fn(&qual.head).ok_or_else(|| {
                    Diagnostic::error(
                        Category::KindMismatch,
                        format!("`{name}` does not have a function type"),
                    )
                })?;
                let mut words: Vec<TWord> = qual
                    .context
                    .iter()
                    .map(|p| TWord::OverloadPlaceholder(p.clone()))
                    .collect();
                words.push(TWord::Ident(name.to_string()));
                Ok((words, WordType::from_fn(view, Type::False(Kind::Sharing))))
            }
            EnvEntry::Overload { base, .. } => {
                let qual = self.instantiate(base);
                self.preds.extend(qual.context.iter().cloned());
                let mut context = qual.context.iter();
                let first = context.next().cloned().ok_or_else(|| {
                    Diagnostic::error(
                        Category::InstanceNotFound,
                        format!("overloaded word `{name}` has no dispatch constraint"),
                    )
                })?;
                let view = build::as_fn(&qual.head).ok_or_else(|| {
                    Diagnostic::error(
                        Category::KindMismatch,
                        format!("`{name}` does not have a function type"),
                    )
                })?;
                let mut words: Vec<TWord> = context
                    .map(|p| TWord::OverloadPlaceholder(p.clone()))
                    .collect();
                words.push(TWord::MethodPlaceholder {
                    name: name.to_string(),
                    pred: first,
                });
                Ok((words, WordType::from_fn(view, Type::False(Kind::Sharing))))
            }
            EnvEntry::Recursive(scheme) => {
                let qual = self.instantiate(scheme);
                let view = build::as_fn(&qual.head).ok_or_else(|| {
                    Diagnostic::error(
                        Category::KindMismatch,
                        format!("`{name}` does not have a function type"),
                    )
                })?;
                Ok((
                    vec![TWord::RecursivePlaceholder {
                        name: name.to_string(),
                        ty: qual.head.clone(),
                    }],
                    WordType::from_fn(view, Type::False(Kind::Sharing)),
                ))
            }
            EnvEntry::Constructor(info) => {
                let qual = self.instantiate(&info.value);
                let view = build::as_fn(&qual.head).ok_or_else(|| {
                    Diagnostic::error(
                        Category::KindMismatch,
                        format!("constructor `{name}` has a malformed scheme"),
                    )
                })?;
                Ok((
                    vec![TWord::Ident(name.to_string())],
                    WordType::from_fn(view, Type::False(Kind::Sharing)),
                ))
            }
            EnvEntry::Operator(info) => {
                let qual = self.instantiate(&info.scheme);
                let view = build::as_fn(&qual.head).ok_or_else(|| {
                    Diagnostic::error(
                        Category::KindMismatch,
                        format!("operator `{name}` has a malformed scheme"),
                    )
                })?;
                Ok((
                    vec![TWord::Ident(name.to_string())],
                    WordType::from_fn(view, Type::False(Kind::Sharing)),
                ))
            }
        }
    }

    // -- Statements and sharing analysis -------------------------------------

    fn infer_statements(
        &mut self,
        env: &Env,
        stmts: &[Statement],
        span: Span,
    ) -> Result<(Vec<TStatement>, WordType), Diagnostic> {
        let Some((stmt, rest)) = stmts.split_first() else {
            let wt = self.identity_word();
            return Ok((Vec::new(), wt));
        };
        match stmt {
            Statement::Expr(expr) => {
                let (texpr, wt) = self.infer_expr(env, expr)?;
                let (mut tail, rest_wt) = self.infer_statements(env, rest, span)?;
                let combined = self.compose(wt, rest_wt, span);
                let mut out = vec![TStatement::Expr(texpr)];
                out.append(&mut tail);
                Ok((out, combined))
            }
            Statement::Let { pattern, value } => {
                let (tvalue, value_wt) = self.infer_expr(env, value)?;
                let (bindings, tpattern, consumed) =
                    self.infer_pattern(env, &pattern.node, pattern.span)?;
                // The pattern consumes the top of the value's output stack.
                let below = self.fresh.stack_tail();
                let below = Type::seq(Kind::Value, vec![SeqItem::dotted(below)]);
                let expected = self.push_front(vec![consumed], &below);
                self.constrain(value_wt.outs.clone(), expected, pattern.span, Reason::Pattern);

                let mut inner = env.clone();
                for (bname, bty) in &bindings {
                    // Any variable used more than once must be shared.
                    // Branches of a conditional count as disjoint contexts.
                    if count_occurrences_stmts(bname, rest) > 1 {
                        if let Some(view) = build::as_val(bty) {
                            self.constrain(
                                view.sharing,
                                Type::True(Kind::Sharing),
                                pattern.span,
                                Reason::Sharing,
                            );
                        }
                    }
                    inner.bind_word(bname.clone(), EnvEntry::Variable(Scheme::mono(bty.clone())));
                }

                let (mut tail, rest_wt) = self.infer_statements(&inner, rest, span)?;
                // The binding removes the consumed value before the rest runs.
                self.constrain(rest_wt.ins.clone(), below, pattern.span, Reason::Pattern);
                let wt = WordType {
                    effects: value_wt.effects.clone(),
                    perms: value_wt.perms.clone(),
                    totality: value_wt.totality.clone(),
                    ins: value_wt.ins.clone(),
                    outs: rest_wt.outs.clone(),
                    sharing: value_wt.sharing.clone(),
                };
                self.constrain(
                    value_wt.effects,
                    rest_wt.effects,
                    span,
                    Reason::Composition,
                );
                self.constrain(value_wt.perms, rest_wt.perms, span, Reason::Composition);
                let mut out = vec![TStatement::Let {
                    pattern: tpattern,
                    value: tvalue,
                }];
                out.append(&mut tail);
                Ok((out, wt))
            }
        }
    }

    // -- Patterns ------------------------------------------------------------

    /// Infer a pattern: returns bindings, the typed pattern, and the value
    /// type it consumes.
    fn infer_pattern(
        &mut self,
        env: &Env,
        pattern: &Pattern,
        span: Span,
    ) -> Result<(Vec<(String, Type)>, TPattern, Type), Diagnostic> {
        match pattern {
            Pattern::Wild => {
                let ty = self.fresh_val_structure();
                Ok((Vec::new(), TPattern::Wild, ty))
            }
            Pattern::Var(name) => {
                let ty = self.fresh_val_structure();
                Ok((vec![(name.clone(), ty.clone())], TPattern::Var(name.clone()), ty))
            }
            Pattern::Int { value, size } => {
                let ty = self.prim_value(PrimType::Int(*size));
                Ok((
                    Vec::new(),
                    TPattern::Int {
                        value: *value,
                        size: *size,
                    },
                    ty,
                ))
            }
            Pattern::Bool(b) => {
                let ty = self.prim_value(PrimType::Bool);
                Ok((Vec::new(), TPattern::Bool(*b), ty))
            }
            Pattern::Ctor { name, args } => {
                let scheme = env
                    .lookup_pattern(name)
                    .cloned()
                    .or_else(|| match env.lookup_word(name) {
                        Some(EnvEntry::Constructor(info)) => Some(info.pattern.clone()),
                        _ => None,
                    })
                    .ok_or_else(|| {
                        Diagnostic::error(
                            Category::UndefinedName,
                            format!("unknown pattern `{name}`"),
                        )
                        .at(crate::span_to_location(span))
                    })?;
                let qual = self.instantiate(&scheme);
                self.preds.extend(qual.context.iter().cloned());
                let view = build::as_fn(&qual.head).ok_or_else(|| {
                    Diagnostic::error(
                        Category::KindMismatch,
                        format!("pattern `{name}` has a malformed scheme"),
                    )
                })?;
                let arg_tys = indexed_items(&view.outs);
                if arg_tys.len() != args.len() {
                    return Err(Diagnostic::error(
                        Category::TypeMismatch,
                        format!(
                            "pattern `{name}` expects {} arguments, found {}",
                            arg_tys.len(),
                            args.len()
                        ),
                    )
                    .at(crate::span_to_location(span)));
                }
                let mut bindings = Vec::new();
                let mut targs = Vec::new();
                let mut arg_sharing = Type::False(Kind::Sharing);
                for (sub, expected) in args.iter().zip(arg_tys) {
                    let (mut sub_bindings, tsub, consumed) =
                        self.infer_pattern(env, &sub.node, sub.span)?;
                    self.constrain(consumed.clone(), expected, sub.span, Reason::Pattern);
                    if let Some(view) = build::as_val(&consumed) {
                        arg_sharing = self.attr_or(arg_sharing, view.sharing, sub.span);
                    }
                    bindings.append(&mut sub_bindings);
                    targs.push(tsub);
                }
                let consumed = indexed_items(&view.ins).into_iter().next().ok_or_else(|| {
                    Diagnostic::error(
                        Category::KindMismatch,
                        format!("pattern `{name}` consumes nothing"),
                    )
                })?;
                // The constructed value's sharing joins its arguments'.
                if let Some(view) = build::as_val(&consumed) {
                    self.constrain(view.sharing, arg_sharing, span, Reason::Sharing);
                }
                Ok((
                    bindings,
                    TPattern::Ctor {
                        name: name.clone(),
                        args: targs,
                    },
                    consumed,
                ))
            }
        }
    }

    // -- Handlers ------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn infer_handle(
        &mut self,
        env: &Env,
        params: &[String],
        body: &Expr,
        handlers: &[Handler],
        ret: &Expr,
        span: Span,
    ) -> Result<(Vec<TWord>, WordType), Diagnostic> {
        if handlers.is_empty() {
            return Err(Diagnostic::error(
                Category::TypeMismatch,
                "handle requires at least one handler",
            )
            .at(crate::span_to_location(span)));
        }
        // All handlers must belong to the same effect.
        let mut effect_label: Option<String> = None;
        let mut op_infos = Vec::new();
        for handler in handlers {
            let info = match env.lookup_word(&handler.name) {
                Some(EnvEntry::Operator(info)) => info.clone(),
                Some(_) => {
                    return Err(Diagnostic::error(
                        Category::TypeMismatch,
                        format!("`{}` is not an effect operation", handler.name),
                    )
                    .at(crate::span_to_location(handler.span)));
                }
                None => {
                    return Err(Diagnostic::error(
                        Category::UndefinedName,
                        format!("unknown effect operation `{}`", handler.name),
                    )
                    .at(crate::span_to_location(handler.span)));
                }
            };
            match &effect_label {
                None => effect_label = Some(info.effect.clone()),
                Some(existing) if *existing == info.effect => {}
                Some(existing) => {
                    return Err(Diagnostic::error(
                        Category::TypeMismatch,
                        format!(
                            "handler `{}` belongs to effect `{}`, expected `{existing}`",
                            handler.name, info.effect
                        ),
                    )
                    .at(crate::span_to_location(handler.span)));
                }
            }
            op_infos.push(info);
        }
        let effect = effect_label.expect("at least one handler checked above");

        // Handle parameters become values consumed before the block.
        let param_tys: Vec<Type> = params.iter().map(|_| self.fresh_value()).collect();
        let mut body_env = env.clone();
        for (param, ty) in params.iter().zip(&param_tys) {
            body_env.bind_word(param.clone(), EnvEntry::Variable(Scheme::mono(ty.clone())));
        }

        let (tbody, body_wt) = self.infer_expr(&body_env, body)?;

        // The handled effect is removed from the body's effect row.
        let rest_effects = self.fresh.var(Kind::row(Kind::Effect));
        let effect_elem = self.effect_elem(env, &effect, span)?;
        let handled_row = Type::RowExtend {
            label: effect.clone(),
            elem: Box::new(effect_elem),
            rest: Box::new(rest_effects.clone()),
        };
        self.constrain(body_wt.effects.clone(), handled_row, span, Reason::Handler);

        // The return clause consumes the body's results.
        let (tret, ret_wt) = self.infer_expr(&body_env, ret)?;
        self.constrain(ret_wt.ins.clone(), body_wt.outs.clone(), span, Reason::Handler);
        self.constrain(ret_wt.effects.clone(), rest_effects.clone(), span, Reason::Handler);
        self.constrain(ret_wt.perms.clone(), body_wt.perms.clone(), span, Reason::Handler);

        // Handler arms.
        let mut thandlers = Vec::new();
        let mut totality = self.attr_and(body_wt.totality.clone(), ret_wt.totality.clone(), span);
        let mut sharing = self.attr_or(body_wt.sharing.clone(), ret_wt.sharing.clone(), span);
        for (handler, info) in handlers.iter().zip(&op_infos) {
            let qual = self.instantiate(&info.scheme);
            let view = build::as_fn(&qual.head).ok_or_else(|| {
                Diagnostic::error(
                    Category::KindMismatch,
                    format!("operator `{}` has a malformed scheme", handler.name),
                )
            })?;
            let op_ins = indexed_items(&view.ins);
            let op_outs = indexed_items(&view.outs);
            if op_ins.len() != handler.params.len() {
                return Err(Diagnostic::error(
                    Category::TypeMismatch,
                    format!(
                        "handler `{}` binds {} parameters, operation carries {}",
                        handler.name,
                        handler.params.len(),
                        op_ins.len()
                    ),
                )
                .at(crate::span_to_location(handler.span)));
            }
            let mut handler_env = body_env.clone();
            for (pname, pty) in handler.params.iter().zip(op_ins) {
                handler_env.bind_word(pname.clone(), EnvEntry::Variable(Scheme::mono(pty)));
            }
            // `resume` continues the handled body: it consumes the
            // operation's results plus fresh handle parameters and leaves
            // the handle's final results.
            let mut resume_consumed = op_outs;
            resume_consumed.extend(param_tys.iter().cloned());
            let resume_tail = self.fresh.stack_tail();
            let resume_tail = Type::seq(Kind::Value, vec![SeqItem::dotted(resume_tail)]);
            let resume_ins = self.push_front(resume_consumed, &resume_tail);
            let resume_totality = self.fresh.var(Kind::Totality);
            let resume_ty = build::fn_type(
                rest_effects.clone(),
                body_wt.perms.clone(),
                resume_totality,
                resume_ins,
                ret_wt.outs.clone(),
            );
            // `resume` is a callable word inside the handler arm; lowering
            // and code generation treat it as the implicit continuation.
            handler_env.bind_word("resume", EnvEntry::Function(Scheme::mono(resume_ty)));
            let (thandler_body, handler_wt) = self.infer_expr(&handler_env, &handler.body)?;
            self.constrain(
                handler_wt.outs.clone(),
                ret_wt.outs.clone(),
                handler.span,
                Reason::Handler,
            );
            self.constrain(
                handler_wt.effects.clone(),
                rest_effects.clone(),
                handler.span,
                Reason::Handler,
            );
            totality = self.attr_and(totality, handler_wt.totality, handler.span);
            sharing = self.attr_or(sharing, handler_wt.sharing, handler.span);
            thandlers.push(THandler {
                name: handler.name.clone(),
                params: handler.params.clone(),
                body: thandler_body,
            });
        }

        let ins = self.push_front(param_tys, &body_wt.ins);
        Ok((
            vec![TWord::Handle {
                params: params.to_vec(),
                body: tbody,
                handlers: thandlers,
                ret: tret,
                effect,
            }],
            WordType {
                effects: rest_effects,
                perms: body_wt.perms,
                totality,
                ins,
                outs: ret_wt.outs,
                sharing,
            },
        ))
    }

    /// The row element for an effect label, instantiating effect
    /// parameters with fresh variables.
    fn effect_elem(&mut self, env: &Env, effect: &str, span: Span) -> Result<Type, Diagnostic> {
        let kind = env.lookup_type_ctor(effect).ok_or_else(|| {
            Diagnostic::error(Category::UndefinedName, format!("unknown effect `{effect}`"))
                .at(crate::span_to_location(span))
        })?;
        let mut elem = Type::ctor(effect, kind.clone());
        let mut cursor = kind.clone();
        while let Kind::Arrow(from, to) = cursor {
            let arg = self.fresh.var(*from);
            elem = Type::app(elem, arg).map_err(|e| {
                Diagnostic::error(Category::KindMismatch, e.to_string())
            })?;
            cursor = *to;
        }
        if !matches!(cursor, Kind::Effect) {
            return Err(Diagnostic::error(
                Category::KindMismatch,
                format!("`{effect}` is not an effect constructor"),
            ));
        }
        Ok(elem)
    }

    // -- with-state ----------------------------------------------------------

    fn infer_with_state(
        &mut self,
        env: &Env,
        body: &Expr,
        span: Span,
    ) -> Result<(Vec<TWord>, WordType), Diagnostic> {
        // Infer the body and solve its constraints locally so the state
        // effect row is concrete enough to strip.
        let mark = self.constraints.len();
        let (tbody, body_wt) = self.infer_expr(env, body)?;
        let local: Vec<Constraint> = self.constraints.split_off(mark);
        let solved = Unifier::new(self.fresh).solve_all(&local)?;
        let body_wt = body_wt.apply(&solved);

        let (heap, stripped) = strip_state_effect(&body_wt.effects).ok_or_else(|| {
            Diagnostic::error(
                Category::TypeMismatch,
                "with-state body performs no state effect",
            )
            .at(crate::span_to_location(span))
        })?;

        // The heap must stay local: it may not be free in the outer
        // environment after solving.
        if let Type::Var { name: heap_name, .. } = &heap {
            let mut outer_free = BTreeSet::new();
            for (name, kind) in env.free_vars() {
                outer_free.extend(solved.apply(&Type::var(name, kind)).free_vars());
            }
            if outer_free.iter().any(|(n, _)| n == heap_name) {
                return Err(Diagnostic::error(
                    Category::HeapEscape,
                    format!("heap `{heap_name}` escapes its with-state scope"),
                )
                .at(crate::span_to_location(span)));
            }
        }

        // Re-emit the locally solved bindings so the final solution
        // includes them.
        for (name, ty) in solved.bindings() {
            self.constrain(
                Type::var(name.clone(), ty.kind()),
                ty.clone(),
                span,
                Reason::StateScope,
            );
        }

        Ok((
            vec![TWord::WithState(tbody)],
            WordType {
                effects: stripped,
                ..body_wt
            },
        ))
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn take_preds(&mut self) -> Vec<Pred> {
        std::mem::take(&mut self.preds)
    }
}

/// Indexed (non-dotted) items of a sequence type, top first.
fn indexed_items(seq: &Type) -> Vec<Type> {
    match seq {
        Type::Seq { items, .. } => items
            .iter()
            .filter(|item| !item.dotted)
            .map(|item| item.ty.clone())
            .collect(),
        _ => Vec::new(),
    }
}

/// Strip the innermost `st!` entry from an effect row, returning the heap
/// argument and the row without that entry.
fn strip_state_effect(row: &Type) -> Option<(Type, Type)> {
    match row {
        Type::RowExtend { label, elem, rest } => {
            if label == build::STATE {
                let (head, args) = elem.spine();
                if let Type::Ctor { name, .. } = head {
                    if name == build::STATE && args.len() == 1 {
                        return Some((args[0].clone(), rest.as_ref().clone()));
                    }
                }
                None
            } else {
                let (heap, stripped) = strip_state_effect(rest)?;
                Some((
                    heap,
                    Type::RowExtend {
                        label: label.clone(),
                        elem: elem.clone(),
                        rest: Box::new(stripped),
                    },
                ))
            }
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Occurrence counting (sharing analysis)
// ---------------------------------------------------------------------------

/// Occurrences of `name` in the remaining statements of a block.
///
/// Branches of a conditional are disjoint occurrence contexts: the count
/// is the maximum over branches, not the sum. A loop body counts double
/// since it may run repeatedly. A nested `let` of the same name shadows.
fn count_occurrences_stmts(name: &str, stmts: &[Statement]) -> usize {
    let mut count = 0;
    for stmt in stmts {
        match stmt {
            Statement::Expr(expr) => count += count_occurrences(name, expr),
            Statement::Let { pattern, value } => {
                count += count_occurrences(name, value);
                if pattern_binds(&pattern.node, name) {
                    break;
                }
            }
        }
    }
    count
}

fn pattern_binds(pattern: &Pattern, name: &str) -> bool {
    match pattern {
        Pattern::Var(n) => n == name,
        Pattern::Ctor { args, .. } => args.iter().any(|a| pattern_binds(&a.node, name)),
        _ => false,
    }
}

fn count_occurrences(name: &str, expr: &Expr) -> usize {
    expr.words
        .iter()
        .map(|word| count_occurrences_word(name, &word.node))
        .sum()
}

fn count_occurrences_word(name: &str, word: &Word) -> usize {
    match word {
        Word::Ident(n) => usize::from(n == name),
        Word::Block(stmts) => count_occurrences_stmts(name, stmts),
        Word::If {
            then_branch,
            else_branch,
        } => count_occurrences(name, then_branch).max(count_occurrences(name, else_branch)),
        Word::While { cond, body } => {
            2 * (count_occurrences(name, cond) + count_occurrences(name, body))
        }
        Word::FnLit(body) | Word::WithState(body) => count_occurrences(name, body),
        Word::WithPermission { body, .. } => count_occurrences(name, body),
        Word::Handle {
            params,
            body,
            handlers,
            ret,
        } => {
            if params.iter().any(|p| p == name) {
                return 0;
            }
            let mut count = count_occurrences(name, body) + count_occurrences(name, ret);
            for handler in handlers {
                if !handler.params.iter().any(|p| p == name) {
                    count += count_occurrences(name, &handler.body);
                }
            }
            count
        }
        Word::Case {
            then_branch,
            else_branch,
            ..
        } => count_occurrences(name, then_branch).max(count_occurrences(name, else_branch)),
        _ => 0,
    }
}

/// Names of environment variables referenced anywhere in an expression.
fn free_value_vars(env: &Env, expr: &Expr) -> Vec<String> {
    let mut out = Vec::new();
    for (name, entry) in env.words() {
        if matches!(entry, EnvEntry::Variable(_)) && count_occurrences(name, expr) > 0 {
            out.push(name.clone());
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Top-level inference
// ---------------------------------------------------------------------------

/// Infer, solve, reduce the context through the CHR rules, check
/// ambiguity, and generalize.
pub fn infer_top(env: &Env, fresh: &mut Fresh, expr: &Expr) -> Result<InferredTop, Diagnostic> {
    let mut inference = Inference::new(fresh);
    let (texpr, word_type) = inference.infer_expr(env, expr)?;
    let constraints = inference.constraints.clone();
    let preds = inference.take_preds();

    let subst = Unifier::new(fresh).solve_all(&constraints)?;

    let goal_preds: BTreeSet<Pred> = preds.iter().map(|p| subst.apply_pred(p)).collect();
    let (residual, chr_subst) = chr::solve(env.rules(), &goal_preds, fresh)?;
    let subst = chr_subst.compose(&subst);

    let word_type = word_type.apply(&subst);
    let head = word_type.fn_data();
    let residual: Vec<Pred> = residual.into_iter().map(|p| subst.apply_pred(&p)).collect();

    // Ambiguity: every variable in the context must be determined by the
    // head type.
    let head_vars = head.free_vars();
    for pred in &residual {
        for var in pred.arg.free_vars() {
            if !head_vars.contains(&var) {
                return Err(Diagnostic::error(
                    Category::AmbiguousOverload,
                    format!(
                        "constraint `{pred}` mentions `{}`, which the type `{head}` does not determine",
                        var.0
                    ),
                ));
            }
        }
    }

    // Ground residual predicates are discharged by instance search during
    // elaboration; only variable-mentioning predicates stay in the scheme.
    let context: Vec<Pred> = residual
        .into_iter()
        .filter(|p| !p.arg.free_vars().is_empty())
        .collect();
    let scheme = generalize(env, &subst, context, head);
    Ok(InferredTop {
        expr: texpr,
        scheme,
        word_type,
        subst,
    })
}

/// Quantify over the free variables not free in the environment.
pub fn generalize(env: &Env, subst: &Subst, context: Vec<Pred>, head: Type) -> Scheme {
    let mut env_free = BTreeSet::new();
    for (name, kind) in env.free_vars() {
        env_free.extend(subst.apply(&Type::var(name, kind)).free_vars());
    }
    let mut vars = head.free_vars();
    for pred in &context {
        vars.extend(pred.arg.free_vars());
    }
    let quantified: Vec<(String, Kind)> = vars
        .into_iter()
        .filter(|v| !env_free.contains(v))
        .collect();
    Scheme {
        quantified,
        qual: QualType { context, head },
    }
}

/// Two-pass inference for a mutually recursive group: provisional
/// monomorphic schemes first, then a joint solve and per-member
/// generalization.
pub fn infer_recursive(
    env: &Env,
    fresh: &mut Fresh,
    group: &[(String, &Expr)],
) -> Result<Vec<(String, InferredTop)>, Diagnostic> {
    let mut rec_env = env.clone();
    let mut provisional = Vec::new();
    for (name, _) in group {
        // A fresh, unconstrained word type stands in for the member.
        let data = build::fn_type(
            fresh.var(Kind::row(Kind::Effect)),
            fresh.var(Kind::row(Kind::Permission)),
            fresh.var(Kind::Totality),
            Type::seq(Kind::Value, vec![SeqItem::dotted(fresh.stack_tail())]),
            Type::seq(Kind::Value, vec![SeqItem::dotted(fresh.stack_tail())]),
        );
        provisional.push((name.clone(), data.clone()));
        rec_env.bind_word(name.clone(), EnvEntry::Recursive(Scheme::mono(data)));
    }

    let mut inference = Inference::new(fresh);
    let mut inferred = Vec::new();
    for ((name, expr), (_, declared)) in group.iter().zip(&provisional) {
        let (texpr, wt) = inference.infer_expr(&rec_env, expr)?;
        inference.constrain(
            declared.clone(),
            wt.fn_data(),
            Span::synthetic(),
            Reason::Declared,
        );
        inferred.push((name.clone(), texpr, wt));
    }
    let constraints = inference.constraints.clone();
    let preds = inference.take_preds();
    let subst = Unifier::new(fresh).solve_all(&constraints)?;
    let goal_preds: BTreeSet<Pred> = preds.iter().map(|p| subst.apply_pred(p)).collect();
    let (residual, chr_subst) = chr::solve(env.rules(), &goal_preds, fresh)?;
    let subst = chr_subst.compose(&subst);
    let context: Vec<Pred> = residual
        .into_iter()
        .map(|p| subst.apply_pred(&p))
        .filter(|p| !p.arg.free_vars().is_empty())
        .collect();

    let mut out = Vec::new();
    for (name, texpr, wt) in inferred {
        let wt = wt.apply(&subst);
        let head = wt.fn_data();
        let scheme = generalize(env, &subst, context.clone(), head);
        out.push((
            name,
            InferredTop {
                expr: texpr,
                scheme,
                word_type: wt,
                subst: subst.clone(),
            },
        ));
    }
    Ok(out)
}
