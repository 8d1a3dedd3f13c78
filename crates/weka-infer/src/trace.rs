//! Opt-in unification trace.
//!
//! When enabled through [`crate::Unifier::with_trace`], every unification
//! step is recorded in a serializable form for external tooling. Types are
//! rendered eagerly so the trace stays valid after further substitution.

use serde::Serialize;

/// What a single unification step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnifyAction {
    /// Terms were already equal.
    Identity,
    /// A variable was bound.
    Bind,
    /// A compound term was decomposed into sub-unifications.
    Decompose,
    /// A row was rotated to expose a label.
    RotateRow,
    /// An Abelian equation was pivoted.
    Pivot,
    /// The step failed.
    Error,
}

/// One recorded unification step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnifyStep {
    pub action: UnifyAction,
    pub left: String,
    pub right: String,
    pub note: String,
}

#[cfg(test)]
mod tests {
    use crate::{Fresh, Unifier};
    use weka_types::Kind;

    #[test]
    fn trace_records_bindings() {
        let mut fresh = Fresh::new();
        let a = fresh.var(Kind::Value);
        let b = fresh.var(Kind::Value);
        let mut unifier = Unifier::with_trace(&mut fresh);
        unifier.unify(&a, &b).unwrap();
        let steps = unifier.take_trace();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].action, super::UnifyAction::Bind);
        assert!(steps[0].note.contains(":="));
    }
}
