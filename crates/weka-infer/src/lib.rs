//! Type inference for the Weka concatenative calculus.
//!
//! This crate implements:
//! - Higher-kinded, row-polymorphic, Abelian-aware unification
//! - The fresh type-variable source, segregated by kind prefix
//! - The lexical environment shared by inference, elaboration, and lowering
//! - A confluent CHR solver for qualified-type contexts
//! - Word-by-word inference for the concatenative surface
//! - Elaboration of overload placeholders into dictionary-passing code
//!
//! Unification is the load-bearing piece: constraints are collected during
//! inference and solved left to right by [`Unifier::solve_all`], composing
//! substitutions. Row constraints unify modulo label permutation, Abelian
//! constraints (units of measure and Boolean attributes) are solved by
//! integer pivoting, and dotted sequence variables absorb stack tails.

pub mod chr;
pub mod elaborate;
pub mod env;
pub mod trace;
pub mod typeck;

use weka_ast::Span;
use weka_diag::{Category, Diagnostic, SourceLocation};
use weka_types::{generated_suffix, Equation, Kind, SeqItem, Subst, Type};

// Re-export for convenience.
pub use weka_diag::DiagnosticError;
pub use weka_types::Scheme;

// ---------------------------------------------------------------------------
// Fresh variables
// ---------------------------------------------------------------------------

/// Monotonic generator of inference variables.
///
/// A single counter serves every kind; the kind only selects the name
/// prefix. Generated names always end in digits, and renamed user names
/// never do, so the two can never collide. The numeric suffix doubles as
/// the variable's age for the binding-direction rule.
#[derive(Debug, Default, Clone)]
pub struct Fresh {
    counter: u64,
}

impl Fresh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next fresh name for the given kind.
    pub fn name(&mut self, kind: &Kind) -> String {
        let name = format!("{}{}", kind.prefix(), self.counter);
        self.counter += 1;
        name
    }

    /// Next fresh variable of the given kind.
    pub fn var(&mut self, kind: Kind) -> Type {
        let name = self.name(&kind);
        Type::var(name, kind)
    }

    /// Fresh stack-tail variable: a dotted sequence variable of value kind.
    pub fn stack_tail(&mut self) -> Type {
        self.var(Kind::seq(Kind::Value))
    }

    /// A one-element view of the counter, for deterministic snapshots.
    pub fn peek(&self) -> u64 {
        self.counter
    }
}

/// Convert an AST span into a diagnostic location.
pub fn span_to_location(span: Span) -> SourceLocation {
    SourceLocation {
        file_id: span.file.0,
        start: span.start,
        end: span.end,
    }
}

// ---------------------------------------------------------------------------
// Constraints
// ---------------------------------------------------------------------------

/// Why a constraint was generated, for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// Adjacent words: the left word's outputs feed the right word's inputs.
    Composition,
    /// Branches of a conditional must agree.
    Branch,
    /// A condition must push a Bool.
    Condition,
    /// Handler arms must agree with the return clause.
    Handler,
    /// A pattern must match the value it destructures.
    Pattern,
    /// Sharing analysis forced an attribute.
    Sharing,
    /// A unit word manipulated a tagged numeric.
    UnitOp,
    /// `with-state` discharged a state effect.
    StateScope,
    /// The declared scheme must admit the inferred type.
    Declared,
    /// `main` must leave an I32-convertible value.
    Main,
}

/// Provenance carried on every constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Provenance {
    pub span: Span,
    pub reason: Reason,
}

/// An equality constraint between two type terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    pub left: Type,
    pub right: Type,
    pub provenance: Provenance,
}

// ---------------------------------------------------------------------------
// Unifier
// ---------------------------------------------------------------------------

/// The unification engine.
///
/// `unify` yields the most general substitution equating two terms, or a
/// fatal diagnostic. `solve_all` folds a constraint list left to right,
/// applying the accumulated substitution before each step and composing
/// the results; the final substitution is idempotent.
pub struct Unifier<'f> {
    fresh: &'f mut Fresh,
    trace: Option<Vec<trace::UnifyStep>>,
}

impl<'f> Unifier<'f> {
    pub fn new(fresh: &'f mut Fresh) -> Self {
        Self { fresh, trace: None }
    }

    pub fn with_trace(fresh: &'f mut Fresh) -> Self {
        Self {
            fresh,
            trace: Some(Vec::new()),
        }
    }

    pub fn take_trace(&mut self) -> Vec<trace::UnifyStep> {
        self.trace.take().unwrap_or_default()
    }

    fn push_step(&mut self, action: trace::UnifyAction, left: &Type, right: &Type, note: String) {
        if let Some(steps) = &mut self.trace {
            steps.push(trace::UnifyStep {
                action,
                left: left.to_string(),
                right: right.to_string(),
                note,
            });
        }
    }

    /// Solve a constraint list left to right.
    pub fn solve_all(&mut self, constraints: &[Constraint]) -> Result<Subst, Diagnostic> {
        let mut subst = Subst::new();
        for constraint in constraints {
            let left = subst.apply(&constraint.left);
            let right = subst.apply(&constraint.right);
            let step = self.unify(&left, &right).map_err(|diag| {
                if diag.location.is_none() {
                    diag.at(span_to_location(constraint.provenance.span))
                } else {
                    diag
                }
            })?;
            subst = step.compose(&subst);
        }
        Ok(subst)
    }

    /// Unify two type terms.
    pub fn unify(&mut self, left: &Type, right: &Type) -> Result<Subst, Diagnostic> {
        if left == right {
            self.push_step(
                trace::UnifyAction::Identity,
                left,
                right,
                "terms already equal".into(),
            );
            return Ok(Subst::new());
        }

        let lk = left.kind();
        let rk = right.kind();
        if lk != rk {
            self.push_step(trace::UnifyAction::Error, left, right, "kind mismatch".into());
            return Err(Diagnostic::error(
                Category::KindMismatch,
                format!("cannot unify `{left}` of kind `{lk}` with `{right}` of kind `{rk}`"),
            ));
        }

        // Abelian kinds (units and Boolean attributes) are solved over the
        // exponent group, so their variables never reach the generic rules.
        if lk.is_abelian() {
            if let (Some(le), Some(re)) = (left.to_equation(), right.to_equation()) {
                return self.unify_abelian(&lk, left, right, le, re);
            }
        }

        match (left, right) {
            (Type::Var { name: a, kind }, Type::Var { name: b, .. }) => {
                // Bind the younger variable to the older.
                let (young, old) = if var_age(a) >= var_age(b) {
                    (a, b)
                } else {
                    (b, a)
                };
                self.push_step(
                    trace::UnifyAction::Bind,
                    left,
                    right,
                    format!("{young} := {old}"),
                );
                let mut subst = Subst::new();
                subst
                    .bind(young.clone(), kind, Type::var(old.clone(), kind.clone()))
                    .map_err(kind_diag)?;
                Ok(subst)
            }
            (Type::Var { name, kind }, other) | (other, Type::Var { name, kind }) => {
                self.bind_var(name, kind, other)
            }
            (Type::App(f1, x1), Type::App(f2, x2)) => {
                self.push_step(
                    trace::UnifyAction::Decompose,
                    left,
                    right,
                    "decompose application".into(),
                );
                let s1 = self.unify(f1, f2)?;
                let s2 = self.unify(&s1.apply(x1), &s1.apply(x2))?;
                Ok(s2.compose(&s1))
            }
            (Type::RowExtend { .. }, _) | (_, Type::RowExtend { .. })
                if matches!(lk, Kind::Row(_)) =>
            {
                self.unify_rows(left, right)
            }
            (
                Type::Seq { elem, items: li },
                Type::Seq { items: ri, .. },
            ) => self.unify_seqs(elem, li, ri),
            _ => {
                self.push_step(
                    trace::UnifyAction::Error,
                    left,
                    right,
                    "rigid-rigid mismatch".into(),
                );
                Err(Diagnostic::error(
                    Category::TypeMismatch,
                    format!("cannot unify `{left}` with `{right}`"),
                ))
            }
        }
    }

    fn bind_var(&mut self, name: &str, kind: &Kind, ty: &Type) -> Result<Subst, Diagnostic> {
        if ty.free_vars().iter().any(|(n, _)| n == name) {
            self.push_step(
                trace::UnifyAction::Error,
                &Type::var(name, kind.clone()),
                ty,
                "occurs check".into(),
            );
            return Err(Diagnostic::error(
                Category::OccursCheck,
                format!("cannot construct the infinite type `{name}` = `{ty}`"),
            ));
        }
        self.push_step(
            trace::UnifyAction::Bind,
            &Type::var(name, kind.clone()),
            ty,
            format!("{name} := {ty}"),
        );
        let mut subst = Subst::new();
        subst.bind(name, kind, ty.clone()).map_err(kind_diag)?;
        Ok(subst)
    }

    // -- Abelian equations ---------------------------------------------------

    /// Solve `left = right` in the free Abelian group of the kind.
    ///
    /// The difference equation is reduced by repeatedly eliminating the
    /// variable with the smallest absolute exponent. When that exponent
    /// divides every other exponent the variable pivots away completely;
    /// otherwise it is rewritten through a fresh variable, strictly
    /// decreasing the minimum exponent, so the loop terminates.
    fn unify_abelian(
        &mut self,
        kind: &Kind,
        left: &Type,
        right: &Type,
        le: Equation,
        re: Equation,
    ) -> Result<Subst, Diagnostic> {
        let mut eq = le.add(&re.invert());
        if kind.is_boolean() {
            eq = eq.modulo(2);
        }
        self.push_step(
            trace::UnifyAction::Pivot,
            left,
            right,
            format!("solve {eq} = 1"),
        );
        let mut subst = Subst::new();
        loop {
            if eq.is_identity() {
                return Ok(subst);
            }
            let Some((var, exp)) = eq.smallest_variable().map(|(v, e)| (v.to_string(), e)) else {
                return Err(Diagnostic::error(
                    Category::TypeMismatch,
                    format!("cannot unify `{left}` with `{right}`: residual `{eq}`"),
                ));
            };
            let rest = Equation::from_parts(
                eq.variables()
                    .iter()
                    .filter(|(n, _)| n.as_str() != var)
                    .map(|(n, e)| (n.clone(), *e)),
                eq.constants().iter().map(|(n, e)| (n.clone(), *e)),
            );
            if rest.divisible_by(exp) {
                // Full pivot: var is eliminated.
                let solution = eq.pivot(&var).expect("divisible pivot succeeds");
                let solution = if kind.is_boolean() {
                    solution.modulo(2)
                } else {
                    solution
                };
                let mut step = Subst::new();
                step.bind(&var, kind, Type::from_equation(kind, solution))
                    .map_err(kind_diag)?;
                return Ok(step.compose(&subst));
            }
            // Partial pivot through a fresh variable; exponents shrink
            // modulo `exp`.
            let fresh_name = self.fresh.name(kind);
            let mut replacement = Equation::variable(fresh_name);
            for (name, e) in rest.variables() {
                replacement = replacement.add(&Equation::variable(name.clone()).scale(-e.div_euclid(exp)));
            }
            for (name, e) in rest.constants() {
                replacement = replacement.add(&Equation::constant(name.clone()).scale(-e.div_euclid(exp)));
            }
            let mut step = Subst::new();
            step.bind(&var, kind, Type::from_equation(kind, replacement.clone()))
                .map_err(kind_diag)?;
            eq = eq.substitute(&var, &replacement);
            if kind.is_boolean() {
                eq = eq.modulo(2);
            }
            subst = step.compose(&subst);
        }
    }

    // -- Rows ----------------------------------------------------------------

    /// Unify two rows modulo permutation of labels.
    fn unify_rows(&mut self, left: &Type, right: &Type) -> Result<Subst, Diagnostic> {
        match (left, right) {
            (
                Type::RowExtend {
                    label,
                    elem: le,
                    rest: lr,
                },
                _,
            ) => {
                self.push_step(
                    trace::UnifyAction::RotateRow,
                    left,
                    right,
                    format!("expose label `{label}`"),
                );
                let (s0, relem, rrest) = self.expose_label(right, label)?;
                let s1 = self.unify(&s0.apply(le), &s0.apply(&relem))?;
                let acc = s1.compose(&s0);
                let s2 = self.unify(&acc.apply(lr), &acc.apply(&rrest))?;
                Ok(s2.compose(&acc))
            }
            (Type::RowEmpty(_), Type::RowExtend { label, .. }) => Err(Diagnostic::error(
                Category::TypeMismatch,
                format!("row is missing label `{label}`"),
            )),
            _ => Err(Diagnostic::error(
                Category::TypeMismatch,
                format!("cannot unify row `{left}` with `{right}`"),
            )),
        }
    }

    /// Rotate `row` to expose `label` at the head, producing a fresh tail
    /// when the label has to come from an open tail variable.
    fn expose_label(&mut self, row: &Type, label: &str) -> Result<(Subst, Type, Type), Diagnostic> {
        let mut prefix: Vec<(String, Type)> = Vec::new();
        let mut cursor = row.clone();
        loop {
            match cursor {
                Type::RowExtend { label: l, elem, rest } => {
                    if l == label {
                        // Rebuild the row without this entry.
                        let mut rebuilt = *rest;
                        for (pl, pe) in prefix.into_iter().rev() {
                            rebuilt = Type::RowExtend {
                                label: pl,
                                elem: Box::new(pe),
                                rest: Box::new(rebuilt),
                            };
                        }
                        return Ok((Subst::new(), *elem, rebuilt));
                    }
                    prefix.push((l, *elem));
                    cursor = *rest;
                }
                Type::Var { name, kind } => {
                    // Open tail: bind it to a fresh extension carrying the
                    // missing label.
                    let Kind::Row(elem_kind) = kind.clone() else {
                        return Err(Diagnostic::error(
                            Category::KindMismatch,
                            format!("row tail `{name}` has non-row kind `{kind}`"),
                        ));
                    };
                    let fresh_elem = self.fresh.var(*elem_kind);
                    let fresh_tail = self.fresh.var(kind.clone());
                    let extension = Type::RowExtend {
                        label: label.to_string(),
                        elem: Box::new(fresh_elem.clone()),
                        rest: Box::new(fresh_tail.clone()),
                    };
                    let mut subst = Subst::new();
                    subst.bind(&name, &kind, extension).map_err(kind_diag)?;
                    let mut rebuilt = fresh_tail;
                    for (pl, pe) in prefix.into_iter().rev() {
                        rebuilt = Type::RowExtend {
                            label: pl,
                            elem: Box::new(subst.apply(&pe)),
                            rest: Box::new(rebuilt),
                        };
                    }
                    return Ok((subst, fresh_elem, rebuilt));
                }
                Type::RowEmpty(_) => {
                    return Err(Diagnostic::error(
                        Category::TypeMismatch,
                        format!("row is missing label `{label}`"),
                    ));
                }
                other => {
                    return Err(Diagnostic::error(
                        Category::TypeMismatch,
                        format!("malformed row tail `{other}`"),
                    ));
                }
            }
        }
    }

    // -- Sequences -----------------------------------------------------------

    /// Unify two dotted sequences element by element.
    ///
    /// Dotted variables consume zero or more elements from the opposite
    /// side; in normalized form they only occur terminally.
    fn unify_seqs(
        &mut self,
        elem: &Kind,
        left: &[SeqItem],
        right: &[SeqItem],
    ) -> Result<Subst, Diagnostic> {
        match (left.split_first(), right.split_first()) {
            (None, None) => Ok(Subst::new()),
            (Some((l0, lrest)), Some((r0, rrest))) if !l0.dotted && !r0.dotted => {
                let s1 = self.unify(&l0.ty, &r0.ty)?;
                let lrest: Vec<SeqItem> = lrest
                    .iter()
                    .map(|item| SeqItem {
                        ty: s1.apply(&item.ty),
                        dotted: item.dotted,
                    })
                    .collect();
                let rrest: Vec<SeqItem> = rrest
                    .iter()
                    .map(|item| SeqItem {
                        ty: s1.apply(&item.ty),
                        dotted: item.dotted,
                    })
                    .collect();
                let s2 = self.unify_seqs(elem, &lrest, &rrest)?;
                Ok(s2.compose(&s1))
            }
            // A terminal dotted variable absorbs the rest of the other side.
            (Some((l0, lrest)), _) if l0.dotted && lrest.is_empty() => {
                self.bind_dotted(elem, l0, right)
            }
            (_, Some((r0, rrest))) if r0.dotted && rrest.is_empty() => {
                self.bind_dotted(elem, r0, left)
            }
            _ => Err(Diagnostic::error(
                Category::TypeMismatch,
                format!(
                    "sequences do not match: `{}` vs `{}`",
                    Type::seq(elem.clone(), left.to_vec()),
                    Type::seq(elem.clone(), right.to_vec()),
                ),
            )),
        }
    }

    fn bind_dotted(
        &mut self,
        elem: &Kind,
        dotted: &SeqItem,
        remainder: &[SeqItem],
    ) -> Result<Subst, Diagnostic> {
        let target = Type::seq(elem.clone(), remainder.to_vec());
        match &dotted.ty {
            Type::Var { name, kind } => {
                // A dotted variable matching itself terminally is covered by
                // the equality fast path; anything else must pass the occurs
                // check.
                self.bind_var(name, kind, &target)
            }
            other => self.unify(other, &target),
        }
    }
}

/// Age of a variable: user names (no digit suffix) are oldest.
fn var_age(name: &str) -> i128 {
    match generated_suffix(name) {
        Some(n) => n as i128,
        None => -1,
    }
}

fn kind_diag(err: weka_types::KindMismatch) -> Diagnostic {
    Diagnostic::error(Category::KindMismatch, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use weka_types::build;
    use weka_types::PrimType;

    fn prov() -> Provenance {
        Provenance {
            span: Span::synthetic(),
            reason: Reason::Composition,
        }
    }

    fn value_var(fresh: &mut Fresh) -> Type {
        fresh.var(Kind::Value)
    }

    #[test]
    fn fresh_names_use_kind_prefixes() {
        let mut fresh = Fresh::new();
        assert_eq!(fresh.name(&Kind::Value), "t0");
        assert_eq!(fresh.name(&Kind::Heap), "h1");
        assert_eq!(fresh.name(&Kind::seq(Kind::Value)), "z2");
        assert_eq!(fresh.name(&Kind::Unit), "u3");
    }

    #[test]
    fn var_var_binds_younger_to_older() {
        let mut fresh = Fresh::new();
        let old = value_var(&mut fresh);
        let young = value_var(&mut fresh);
        let mut unifier = Unifier::new(&mut fresh);
        let subst = unifier.unify(&young, &old).unwrap();
        assert_eq!(subst.lookup("t1"), Some(&Type::var("t0", Kind::Value)));
        assert_eq!(subst.lookup("t0"), None);
    }

    #[test]
    fn occurs_check_rejects_infinite_types() {
        let mut fresh = Fresh::new();
        let v = value_var(&mut fresh);
        let Type::Var { name, .. } = &v else { unreachable!() };
        let wrapped = build::val(
            build::list(v.clone()),
            Type::False(Kind::Sharing),
        );
        let mut unifier = Unifier::new(&mut fresh);
        let err = unifier.unify(&Type::var(name.clone(), Kind::Value), &wrapped).unwrap_err();
        assert_eq!(err.category, Category::OccursCheck);
    }

    #[test]
    fn rigid_rigid_mismatch() {
        let mut fresh = Fresh::new();
        let mut unifier = Unifier::new(&mut fresh);
        let err = unifier
            .unify(
                &Type::Prim(PrimType::Bool),
                &Type::Prim(PrimType::Int(weka_types::IntSize::I32)),
            )
            .unwrap_err();
        assert_eq!(err.category, Category::TypeMismatch);
    }

    #[test]
    fn kind_mismatch_is_fatal() {
        let mut fresh = Fresh::new();
        let mut unifier = Unifier::new(&mut fresh);
        let err = unifier
            .unify(&Type::Prim(PrimType::Bool), &Type::True(Kind::Sharing))
            .unwrap_err();
        assert_eq!(err.category, Category::KindMismatch);
    }

    #[test]
    fn rows_unify_modulo_permutation() {
        let mut fresh = Fresh::new();
        let tail = fresh.var(Kind::row(Kind::Value));
        let a = value_var(&mut fresh);
        let b = value_var(&mut fresh);
        let left = Type::RowExtend {
            label: "x".into(),
            elem: Box::new(a.clone()),
            rest: Box::new(Type::RowExtend {
                label: "y".into(),
                elem: Box::new(b.clone()),
                rest: Box::new(tail.clone()),
            }),
        };
        let right = Type::RowExtend {
            label: "y".into(),
            elem: Box::new(b),
            rest: Box::new(Type::RowExtend {
                label: "x".into(),
                elem: Box::new(a),
                rest: Box::new(tail),
            }),
        };
        let mut unifier = Unifier::new(&mut fresh);
        let subst = unifier.unify(&left, &right).unwrap();
        assert!(subst.is_empty(), "permuted rows unify without bindings");
    }

    #[test]
    fn row_rotation_extends_open_tails() {
        let mut fresh = Fresh::new();
        let tail = fresh.var(Kind::row(Kind::Value));
        let a = value_var(&mut fresh);
        let left = Type::RowExtend {
            label: "x".into(),
            elem: Box::new(a),
            rest: Box::new(Type::RowEmpty(Kind::Value)),
        };
        let mut unifier = Unifier::new(&mut fresh);
        let subst = unifier.unify(&left, &tail).unwrap();
        let Type::Var { name, .. } = tail else { unreachable!() };
        let bound = subst.lookup(&name).expect("tail is bound");
        assert!(matches!(bound, Type::RowExtend { label, .. } if label == "x"));
    }

    #[test]
    fn closed_row_missing_label_fails() {
        let mut fresh = Fresh::new();
        let a = value_var(&mut fresh);
        let left = Type::RowExtend {
            label: "x".into(),
            elem: Box::new(a),
            rest: Box::new(Type::RowEmpty(Kind::Value)),
        };
        let mut unifier = Unifier::new(&mut fresh);
        let err = unifier.unify(&left, &Type::RowEmpty(Kind::Value)).unwrap_err();
        assert_eq!(err.category, Category::TypeMismatch);
    }

    #[test]
    fn abelian_unit_pivot_eliminates_variable() {
        // u0 · m^2 ~ m^4  =>  u0 := m^2
        let mut fresh = Fresh::new();
        let u = fresh.var(Kind::Unit);
        let Type::Var { name, .. } = &u else { unreachable!() };
        let left = Type::Abelian {
            kind: Kind::Unit,
            eq: Equation::variable(name.clone()).add(&Equation::constant("m").scale(2)),
        };
        let right = Type::Abelian {
            kind: Kind::Unit,
            eq: Equation::constant("m").scale(4),
        };
        let mut unifier = Unifier::new(&mut fresh);
        let subst = unifier.unify(&left, &right).unwrap();
        let bound = subst.lookup(name).expect("unit variable bound");
        let Type::Abelian { eq, .. } = bound else {
            panic!("expected abelian solution, got {bound}");
        };
        assert_eq!(*eq, Equation::constant("m").scale(2));
    }

    #[test]
    fn abelian_partial_pivot_terminates() {
        // u0^2 · u1^3 ~ 1 needs the fresh-variable rewrite before it solves.
        let mut fresh = Fresh::new();
        let a = fresh.name(&Kind::Unit);
        let b = fresh.name(&Kind::Unit);
        let left = Type::Abelian {
            kind: Kind::Unit,
            eq: Equation::variable(a.clone())
                .scale(2)
                .add(&Equation::variable(b.clone()).scale(3)),
        };
        let right = Type::Abelian {
            kind: Kind::Unit,
            eq: Equation::identity(),
        };
        let mut unifier = Unifier::new(&mut fresh);
        let subst = unifier.unify(&left, &right).unwrap();
        // The solution must satisfy the original equation.
        let applied = subst.apply(&left);
        let Type::Abelian { eq, .. } = applied else {
            panic!("expected abelian term");
        };
        assert!(eq.is_identity(), "residual {eq} after substitution");
    }

    #[test]
    fn boolean_attributes_solve_mod_two() {
        let mut fresh = Fresh::new();
        let s = fresh.var(Kind::Sharing);
        let Type::Var { name, .. } = &s else { unreachable!() };
        let mut unifier = Unifier::new(&mut fresh);
        let subst = unifier.unify(&s, &Type::True(Kind::Sharing)).unwrap();
        assert_eq!(subst.lookup(name), Some(&Type::True(Kind::Sharing)));
    }

    #[test]
    fn boolean_mismatch_fails() {
        let mut fresh = Fresh::new();
        let mut unifier = Unifier::new(&mut fresh);
        let err = unifier
            .unify(&Type::True(Kind::Sharing), &Type::False(Kind::Sharing))
            .unwrap_err();
        assert_eq!(err.category, Category::TypeMismatch);
    }

    #[test]
    fn dotted_variable_absorbs_remainder() {
        let mut fresh = Fresh::new();
        let tail = fresh.stack_tail();
        let a = value_var(&mut fresh);
        let left = Type::seq(Kind::Value, vec![SeqItem::dotted(tail.clone())]);
        let right = Type::seq(
            Kind::Value,
            vec![SeqItem::indexed(a), SeqItem::dotted(fresh.stack_tail())],
        );
        let mut unifier = Unifier::new(&mut fresh);
        let subst = unifier.unify(&left, &right).unwrap();
        let Type::Var { name, .. } = tail else { unreachable!() };
        let bound = subst.lookup(&name).expect("tail bound");
        let Type::Seq { items, .. } = bound else {
            panic!("expected sequence binding");
        };
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn sequences_unify_elementwise() {
        let mut fresh = Fresh::new();
        let a = value_var(&mut fresh);
        let b = value_var(&mut fresh);
        let z = fresh.stack_tail();
        let left = Type::seq(
            Kind::Value,
            vec![SeqItem::indexed(a.clone()), SeqItem::dotted(z.clone())],
        );
        let right = Type::seq(
            Kind::Value,
            vec![SeqItem::indexed(b.clone()), SeqItem::dotted(z)],
        );
        let mut unifier = Unifier::new(&mut fresh);
        let subst = unifier.unify(&left, &right).unwrap();
        assert_eq!(subst.apply(&a), subst.apply(&b));
    }

    #[test]
    fn solve_all_composes_left_to_right() {
        let mut fresh = Fresh::new();
        let a = value_var(&mut fresh);
        let b = value_var(&mut fresh);
        let bool_val = build::val(Type::Prim(PrimType::Bool), Type::False(Kind::Sharing));
        let constraints = vec![
            Constraint {
                left: a.clone(),
                right: b.clone(),
                provenance: prov(),
            },
            Constraint {
                left: b.clone(),
                right: bool_val.clone(),
                provenance: prov(),
            },
        ];
        let mut unifier = Unifier::new(&mut fresh);
        let subst = unifier.solve_all(&constraints).unwrap();
        assert_eq!(subst.apply(&a), bool_val);
        // Idempotence after solving.
        assert_eq!(subst.apply(&subst.apply(&a)), subst.apply(&a));
    }
}
