//! Constraint handling rules.
//!
//! Qualified-type contexts are reduced by user-declared CHRs: a
//! simplification rule replaces its matched heads with its body, a
//! propagation rule adds its body while memoizing the firing to prevent a
//! loop. The solver explores every applicable firing order and accepts the
//! rule set only when all orders converge on one residual (up to variable
//! renaming); anything else is a non-confluent context.

use std::collections::BTreeSet;

use weka_diag::{Category, Diagnostic};
use weka_types::{Kind, Pred, Subst, Type};

use crate::Fresh;

/// A constraint handling rule.
#[derive(Debug, Clone, PartialEq)]
pub enum Chr {
    /// `heads <=> body`: heads are replaced by the body.
    Simplification { heads: Vec<Pred>, body: Vec<Pred> },
    /// `heads ==> body`: the body is added, heads are kept.
    Propagation { heads: Vec<Pred>, body: Vec<Pred> },
}

impl Chr {
    fn heads(&self) -> &[Pred] {
        match self {
            Chr::Simplification { heads, .. } | Chr::Propagation { heads, .. } => heads,
        }
    }

    fn body(&self) -> &[Pred] {
        match self {
            Chr::Simplification { body, .. } | Chr::Propagation { body, .. } => body,
        }
    }
}

// ---------------------------------------------------------------------------
// One-way matching
// ---------------------------------------------------------------------------

/// Match `pattern` against `target`, binding only pattern variables.
///
/// Used by rule-head matching and by elaboration's instance search. Rows
/// match modulo label permutation; a terminal dotted pattern variable
/// absorbs the target remainder; everything else is structural.
pub fn match_type(pattern: &Type, target: &Type) -> Option<Subst> {
    let mut subst = Subst::new();
    if match_into(pattern, target, &mut subst) {
        Some(subst)
    } else {
        None
    }
}

fn match_into(pattern: &Type, target: &Type, subst: &mut Subst) -> bool {
    let pattern = subst.apply(pattern);
    if pattern == *target {
        return true;
    }
    match (&pattern, target) {
        (Type::Var { name, kind }, _) => {
            if target.kind() != *kind {
                return false;
            }
            subst.bind(name, kind, target.clone()).is_ok()
        }
        (Type::App(pf, px), Type::App(tf, tx)) => {
            match_into(pf, tf, subst) && match_into(px, tx, subst)
        }
        (Type::RowExtend { label, elem, rest }, _) => {
            let Some((telem, trest)) = strip_row_label(target, label) else {
                return false;
            };
            match_into(elem, &telem, subst) && match_into(rest, &trest, subst)
        }
        (Type::Seq { items: pi, .. }, Type::Seq { elem, items: ti }) => {
            match_seq(pi, ti, elem, subst)
        }
        _ => false,
    }
}

fn match_seq(pattern: &[weka_types::SeqItem], target: &[weka_types::SeqItem], elem: &Kind, subst: &mut Subst) -> bool {
    match pattern.split_first() {
        None => target.is_empty(),
        Some((p0, rest)) if p0.dotted && rest.is_empty() => {
            let remainder = Type::seq(elem.clone(), target.to_vec());
            match_into(&p0.ty, &remainder, subst)
        }
        Some((p0, prest)) if !p0.dotted => match target.split_first() {
            Some((t0, trest)) if !t0.dotted => {
                match_into(&p0.ty, &t0.ty, subst) && match_seq(prest, trest, elem, subst)
            }
            _ => false,
        },
        _ => false,
    }
}

/// Find `label` anywhere in a row spine and return its element plus the
/// row with that entry removed. Purely structural: matching never extends
/// open tails.
fn strip_row_label(row: &Type, label: &str) -> Option<(Type, Type)> {
    match row {
        Type::RowExtend { label: l, elem, rest } => {
            if l == label {
                Some((elem.as_ref().clone(), rest.as_ref().clone()))
            } else {
                let (found, stripped) = strip_row_label(rest, label)?;
                Some((
                    found,
                    Type::RowExtend {
                        label: l.clone(),
                        elem: elem.clone(),
                        rest: Box::new(stripped),
                    },
                ))
            }
        }
        _ => None,
    }
}

/// Match a rule head against a goal predicate.
fn match_pred(head: &Pred, goal: &Pred, subst: &mut Subst) -> bool {
    head.name == goal.name && match_into(&head.arg, &goal.arg, subst)
}

// ---------------------------------------------------------------------------
// Solver
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct State {
    preds: BTreeSet<Pred>,
    subst: Subst,
    fired: BTreeSet<(usize, Vec<Pred>)>,
}

/// Reduce a predicate set to its CHR normal form.
///
/// Returns the unique residual and the accumulated substitution, or a
/// `NonConfluentContext` diagnostic when different firing orders reach
/// different residuals.
pub fn solve(
    rules: &[Chr],
    goals: &BTreeSet<Pred>,
    fresh: &mut Fresh,
) -> Result<(BTreeSet<Pred>, Subst), Diagnostic> {
    let initial = State {
        preds: goals.clone(),
        subst: Subst::new(),
        fired: BTreeSet::new(),
    };

    let mut stack = vec![initial];
    let mut seen: BTreeSet<Vec<String>> = BTreeSet::new();
    let mut terminals: Vec<State> = Vec::new();
    let mut terminal_forms: BTreeSet<Vec<String>> = BTreeSet::new();

    while let Some(state) = stack.pop() {
        // The visited key covers the fired memo too: two states with equal
        // predicates but different propagation histories are distinct.
        let mut key = canonical_form(&state.preds);
        for (idx, matched) in &state.fired {
            let rendered: Vec<String> = matched.iter().map(|p| p.to_string()).collect();
            key.push(format!("fired:{idx}:{}", rendered.join(",")));
        }
        if !seen.insert(key) {
            continue;
        }
        let successors = fire_once(rules, &state, fresh);
        if successors.is_empty() {
            let form = canonical_form(&state.preds);
            if terminal_forms.insert(form) {
                terminals.push(state);
            }
            continue;
        }
        stack.extend(successors);
    }

    if terminals.len() > 1 {
        let rendered: Vec<String> = terminals
            .iter()
            .map(|t| {
                let preds: Vec<String> = t.preds.iter().map(|p| p.to_string()).collect();
                format!("{{{}}}", preds.join(", "))
            })
            .collect();
        return Err(Diagnostic::error(
            Category::NonConfluentContext,
            format!(
                "constraint rules are not confluent: residuals {}",
                rendered.join(" vs ")
            ),
        ));
    }
    let terminal = terminals.into_iter().next().ok_or_else(|| {
        Diagnostic::error(
            Category::NonConfluentContext,
            "constraint rules cycle without reaching a normal form",
        )
    })?;
    Ok((terminal.preds, terminal.subst))
}

/// All states reachable by firing one rule on `state`.
fn fire_once(rules: &[Chr], state: &State, fresh: &mut Fresh) -> Vec<State> {
    let mut out = Vec::new();
    for (rule_idx, rule) in rules.iter().enumerate() {
        for (phi, matched) in head_matches(rule.heads(), &state.preds) {
            match rule {
                Chr::Simplification { .. } => {
                    let mut preds = state.preds.clone();
                    for p in &matched {
                        preds.remove(p);
                    }
                    for body_pred in instantiate_body(rule.body(), &phi, fresh) {
                        preds.insert(body_pred);
                    }
                    out.push(State {
                        preds,
                        subst: phi.compose(&state.subst),
                        fired: state.fired.clone(),
                    });
                }
                Chr::Propagation { .. } => {
                    let memo_key = (rule_idx, matched.clone());
                    if state.fired.contains(&memo_key) {
                        continue;
                    }
                    let mut preds = state.preds.clone();
                    for body_pred in instantiate_body(rule.body(), &phi, fresh) {
                        preds.insert(body_pred);
                    }
                    let mut fired = state.fired.clone();
                    fired.insert(memo_key);
                    out.push(State {
                        preds,
                        subst: phi.compose(&state.subst),
                        fired,
                    });
                }
            }
        }
    }
    out
}

/// Every way of matching `heads` (in normalized order) against distinct
/// goal predicates, with the matching substitution.
fn head_matches(heads: &[Pred], preds: &BTreeSet<Pred>) -> Vec<(Subst, Vec<Pred>)> {
    let mut results = Vec::new();
    let goals: Vec<&Pred> = preds.iter().collect();
    let mut chosen: Vec<Pred> = Vec::new();
    match_heads_rec(heads, &goals, &mut chosen, Subst::new(), &mut results);
    results
}

fn match_heads_rec(
    heads: &[Pred],
    goals: &[&Pred],
    chosen: &mut Vec<Pred>,
    subst: Subst,
    results: &mut Vec<(Subst, Vec<Pred>)>,
) {
    let Some((head, rest)) = heads.split_first() else {
        results.push((subst, chosen.clone()));
        return;
    };
    for goal in goals {
        if chosen.iter().any(|c| c == *goal) {
            continue;
        }
        let mut attempt = subst.clone();
        if match_pred(head, goal, &mut attempt) {
            chosen.push((*goal).clone());
            match_heads_rec(rest, goals, chosen, attempt, results);
            chosen.pop();
        }
    }
}

/// Instantiate a rule body under the head match, freshening body-only
/// variables.
fn instantiate_body(body: &[Pred], phi: &Subst, fresh: &mut Fresh) -> Vec<Pred> {
    let mut freshened = phi.clone();
    for pred in body {
        for (name, kind) in pred.arg.free_vars() {
            if freshened.lookup(&name).is_none() {
                let replacement = fresh.var(kind.clone());
                freshened
                    .bind(&name, &kind, replacement)
                    .expect("fresh variable has matching kind");
            }
        }
    }
    body.iter().map(|p| freshened.apply_pred(p)).collect()
}

/// Render a predicate set with variables renamed in order of appearance,
/// so alpha-equivalent residuals compare equal.
fn canonical_form(preds: &BTreeSet<Pred>) -> Vec<String> {
    let mut order: Vec<(String, Kind)> = Vec::new();
    for pred in preds {
        collect_vars_in_order(&pred.arg, &mut order);
    }
    let mut rename = Subst::new();
    for (i, (name, kind)) in order.iter().enumerate() {
        rename
            .bind(name, kind, Type::var(format!("%{i}"), kind.clone()))
            .expect("canonical renaming preserves kinds");
    }
    preds.iter().map(|p| rename.apply_pred(p).to_string()).collect()
}

fn collect_vars_in_order(ty: &Type, order: &mut Vec<(String, Kind)>) {
    match ty {
        Type::Var { name, kind } => {
            if !order.iter().any(|(n, _)| n == name) {
                order.push((name.clone(), kind.clone()));
            }
        }
        Type::Abelian { kind, eq } => {
            for name in eq.variables().keys() {
                if !order.iter().any(|(n, _)| n == name) {
                    order.push((name.clone(), kind.clone()));
                }
            }
        }
        Type::RowExtend { elem, rest, .. } => {
            collect_vars_in_order(elem, order);
            collect_vars_in_order(rest, order);
        }
        Type::Seq { items, .. } => {
            for item in items {
                collect_vars_in_order(&item.ty, order);
            }
        }
        Type::App(f, x) => {
            collect_vars_in_order(f, order);
            collect_vars_in_order(x, order);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weka_types::{PrimType, Type};

    fn pred(name: &str, arg: Type) -> Pred {
        Pred::new(name, arg)
    }

    fn ivar(n: &str) -> Type {
        Type::var(n, Kind::Value)
    }

    fn bool_ty() -> Type {
        Type::Prim(PrimType::Bool)
    }

    #[test]
    fn matching_binds_pattern_variables_only() {
        let subst = match_type(&ivar("a"), &bool_ty()).unwrap();
        assert_eq!(subst.lookup("a"), Some(&bool_ty()));
        assert!(match_type(&bool_ty(), &ivar("a")).is_none());
    }

    #[test]
    fn matching_checks_repeated_variables() {
        let pattern = Type::seq(
            Kind::Value,
            vec![
                weka_types::SeqItem::indexed(ivar("a")),
                weka_types::SeqItem::indexed(ivar("a")),
            ],
        );
        let same = Type::seq(
            Kind::Value,
            vec![
                weka_types::SeqItem::indexed(bool_ty()),
                weka_types::SeqItem::indexed(bool_ty()),
            ],
        );
        assert!(match_type(&pattern, &same).is_some());
        let different = Type::seq(
            Kind::Value,
            vec![
                weka_types::SeqItem::indexed(bool_ty()),
                weka_types::SeqItem::indexed(Type::Prim(PrimType::String)),
            ],
        );
        assert!(match_type(&pattern, &different).is_none());
    }

    #[test]
    fn simplification_discharges_heads() {
        // eq (list a) <=> eq a
        let list_a = weka_types::build::list(ivar("a"));
        let rules = vec![Chr::Simplification {
            heads: vec![pred("eq", list_a)],
            body: vec![pred("eq", ivar("a"))],
        }];
        let bool_val = weka_types::build::val(bool_ty(), Type::False(Kind::Sharing));
        let goals: BTreeSet<Pred> =
            [pred("eq", weka_types::build::list(bool_val.clone()))].into();
        let mut fresh = Fresh::new();
        let (residual, _) = solve(&rules, &goals, &mut fresh).unwrap();
        assert_eq!(residual.len(), 1);
        let got = residual.into_iter().next().unwrap();
        assert_eq!(got, pred("eq", bool_val));
    }

    #[test]
    fn propagation_fires_once() {
        // ord a ==> eq a
        let rules = vec![Chr::Propagation {
            heads: vec![pred("ord", ivar("a"))],
            body: vec![pred("eq", ivar("a"))],
        }];
        let goals: BTreeSet<Pred> = [pred("ord", bool_ty())].into();
        let mut fresh = Fresh::new();
        let (residual, _) = solve(&rules, &goals, &mut fresh).unwrap();
        assert_eq!(residual.len(), 2);
        assert!(residual.contains(&pred("ord", bool_ty())));
        assert!(residual.contains(&pred("eq", bool_ty())));
    }

    #[test]
    fn confluence_is_order_independent() {
        let rules = vec![
            Chr::Simplification {
                heads: vec![pred("eq", bool_ty())],
                body: vec![],
            },
            Chr::Propagation {
                heads: vec![pred("ord", ivar("a"))],
                body: vec![pred("eq", ivar("a"))],
            },
        ];
        // Same goals presented in both orders give the same residual.
        let forward: BTreeSet<Pred> = [pred("ord", bool_ty()), pred("eq", bool_ty())].into();
        let mut fresh = Fresh::new();
        let (res_a, _) = solve(&rules, &forward, &mut fresh).unwrap();
        let backward: BTreeSet<Pred> = [pred("eq", bool_ty()), pred("ord", bool_ty())].into();
        let (res_b, _) = solve(&rules, &backward, &mut fresh).unwrap();
        assert_eq!(res_a, res_b);
    }

    #[test]
    fn diverging_rules_are_rejected() {
        // Two simplifications racing for the same head reach different
        // residuals.
        let rules = vec![
            Chr::Simplification {
                heads: vec![pred("conv", ivar("a"))],
                body: vec![pred("small", ivar("a"))],
            },
            Chr::Simplification {
                heads: vec![pred("conv", ivar("a"))],
                body: vec![pred("big", ivar("a"))],
            },
        ];
        let goals: BTreeSet<Pred> = [pred("conv", bool_ty())].into();
        let mut fresh = Fresh::new();
        let err = solve(&rules, &goals, &mut fresh).unwrap_err();
        assert_eq!(err.category, Category::NonConfluentContext);
    }

    #[test]
    fn empty_rule_set_returns_goals() {
        let goals: BTreeSet<Pred> = [pred("eq", ivar("a"))].into();
        let mut fresh = Fresh::new();
        let (residual, subst) = solve(&[], &goals, &mut fresh).unwrap();
        assert_eq!(residual, goals);
        assert!(subst.is_empty());
    }
}
