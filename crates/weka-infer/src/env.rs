//! The lexical environment.
//!
//! A persistent (clone-to-extend) map shared by inference, elaboration,
//! lowering, and code generation. Four namespaces share the name domain
//! with separate lookups: words, patterns, type constructors, and
//! predicates (CHR rules). Insertion order is irrelevant; names shadow.

use std::collections::{BTreeMap, BTreeSet};

use weka_types::{Kind, Scheme};

use crate::chr::Chr;

/// One instance of an overloaded word.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    /// Scheme whose head is the class argument type (e.g. `list(t)`), with
    /// the instance's own context as its qualifier.
    pub scheme: Scheme,
    /// Name of the synthesized instance function.
    pub func_name: String,
}

/// Constructor bookkeeping shared with lowering and code generation.
#[derive(Debug, Clone, PartialEq)]
pub struct CtorInfo {
    /// Destructuring view: consumes the constructed value, produces the
    /// argument values.
    pub pattern: Scheme,
    /// Constructing view: consumes the argument values, produces the
    /// constructed value.
    pub value: Scheme,
    pub id: u32,
    pub arity: usize,
}

/// Effect-operation bookkeeping shared with lowering and code generation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorInfo {
    pub scheme: Scheme,
    pub effect: String,
    pub handle_id: u32,
    pub index: usize,
}

/// A word-namespace entry.
#[derive(Debug, Clone, PartialEq)]
pub enum EnvEntry {
    /// A let- or parameter-bound value.
    Variable(Scheme),
    /// A named function, called by label.
    Function(Scheme),
    /// An overloaded word dispatching on `pred_name`.
    Overload {
        pred_name: String,
        base: Scheme,
        instances: Vec<Instance>,
    },
    /// A data constructor.
    Constructor(CtorInfo),
    /// A member of a recursive group whose scheme is still provisional.
    Recursive(Scheme),
    /// An effect operation.
    Operator(OperatorInfo),
    /// A built-in word from the primitive table.
    Primitive(Scheme),
}

/// The environment proper.
#[derive(Debug, Clone, Default)]
pub struct Env {
    words: BTreeMap<String, EnvEntry>,
    patterns: BTreeMap<String, Scheme>,
    type_ctors: BTreeMap<String, Kind>,
    rules: Vec<Chr>,
    /// Unit constants registered by `tag` declarations.
    units: BTreeSet<String>,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Words --------------------------------------------------------------

    pub fn lookup_word(&self, name: &str) -> Option<&EnvEntry> {
        self.words.get(name)
    }

    pub fn bind_word(&mut self, name: impl Into<String>, entry: EnvEntry) {
        self.words.insert(name.into(), entry);
    }

    /// Shadowing extension, leaving `self` untouched.
    pub fn with_word(&self, name: impl Into<String>, entry: EnvEntry) -> Env {
        let mut out = self.clone();
        out.bind_word(name, entry);
        out
    }

    pub fn words(&self) -> impl Iterator<Item = (&String, &EnvEntry)> {
        self.words.iter()
    }

    /// Find the overload entry dispatching on a predicate name.
    pub fn lookup_overload_by_pred(&self, pred_name: &str) -> Option<(&String, &[Instance])> {
        self.words.iter().find_map(|(name, entry)| match entry {
            EnvEntry::Overload {
                pred_name: p,
                instances,
                ..
            } if p == pred_name => Some((name, instances.as_slice())),
            _ => None,
        })
    }

    // -- Patterns -----------------------------------------------------------

    pub fn lookup_pattern(&self, name: &str) -> Option<&Scheme> {
        self.patterns.get(name)
    }

    pub fn bind_pattern(&mut self, name: impl Into<String>, scheme: Scheme) {
        self.patterns.insert(name.into(), scheme);
    }

    // -- Type constructors ---------------------------------------------------

    pub fn lookup_type_ctor(&self, name: &str) -> Option<&Kind> {
        self.type_ctors.get(name)
    }

    pub fn bind_type_ctor(&mut self, name: impl Into<String>, kind: Kind) {
        self.type_ctors.insert(name.into(), kind);
    }

    // -- CHR rules ----------------------------------------------------------

    pub fn rules(&self) -> &[Chr] {
        &self.rules
    }

    pub fn add_rule(&mut self, rule: Chr) {
        self.rules.push(rule);
    }

    // -- Units --------------------------------------------------------------

    pub fn register_unit(&mut self, name: impl Into<String>) {
        self.units.insert(name.into());
    }

    pub fn is_unit(&self, name: &str) -> bool {
        self.units.contains(name)
    }

    // -- Free variables ------------------------------------------------------

    /// Free variables of every scheme in scope.
    ///
    /// Every entry's scheme keeps its free variables inside this set, which
    /// generalization subtracts from a candidate quantifier prefix.
    pub fn free_vars(&self) -> BTreeSet<(String, Kind)> {
        let mut vars = BTreeSet::new();
        for entry in self.words.values() {
            let scheme = match entry {
                EnvEntry::Variable(s)
                | EnvEntry::Function(s)
                | EnvEntry::Recursive(s)
                | EnvEntry::Primitive(s) => s,
                EnvEntry::Overload { base, .. } => base,
                EnvEntry::Constructor(info) => &info.value,
                EnvEntry::Operator(info) => &info.scheme,
            };
            vars.extend(scheme.free_vars());
        }
        for scheme in self.patterns.values() {
            vars.extend(scheme.free_vars());
        }
        vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weka_types::{QualType, Type};

    fn mono(name: &str) -> Scheme {
        Scheme::mono(Type::var(name, Kind::Value))
    }

    #[test]
    fn words_shadow() {
        let mut env = Env::new();
        env.bind_word("x", EnvEntry::Variable(mono("a")));
        let inner = env.with_word("x", EnvEntry::Variable(mono("b")));
        let EnvEntry::Variable(scheme) = inner.lookup_word("x").unwrap() else {
            panic!("expected variable entry");
        };
        assert_eq!(scheme.qual.head, Type::var("b", Kind::Value));
        // The original environment is untouched.
        let EnvEntry::Variable(original) = env.lookup_word("x").unwrap() else {
            panic!("expected variable entry");
        };
        assert_eq!(original.qual.head, Type::var("a", Kind::Value));
    }

    #[test]
    fn namespaces_are_independent() {
        let mut env = Env::new();
        env.bind_word("pair", EnvEntry::Function(mono("a")));
        env.bind_pattern("pair", mono("b"));
        env.bind_type_ctor("pair", Kind::arrow(Kind::Value, Kind::Data));
        assert!(env.lookup_word("pair").is_some());
        assert!(env.lookup_pattern("pair").is_some());
        assert!(env.lookup_type_ctor("pair").is_some());
        assert!(env.lookup_word("nope").is_none());
    }

    #[test]
    fn env_free_vars_cover_monomorphic_bindings() {
        let mut env = Env::new();
        env.bind_word("x", EnvEntry::Variable(mono("t9")));
        let free = env.free_vars();
        assert!(free.contains(&("t9".to_string(), Kind::Value)));
        // A closed scheme contributes nothing.
        env.bind_word(
            "id",
            EnvEntry::Function(Scheme {
                quantified: vec![("t0".into(), Kind::Value)],
                qual: QualType::unqualified(Type::var("t0", Kind::Value)),
            }),
        );
        let free = env.free_vars();
        assert!(!free.contains(&("t0".to_string(), Kind::Value)));
    }
}
