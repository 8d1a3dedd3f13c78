//! Core IR for Weka: the closure-annotated boundary between the typed
//! middle end and the bytecode generator.
//!
//! Lowering erases every scheme: identifiers are classified by their
//! environment entry, closures carry explicit free-variable lists, unit
//! words and `with-state` scopes vanish, and destructuring `let` patterns
//! become case words. No placeholder survives to this stage.

use std::collections::BTreeSet;

use weka_diag::{Category, Diagnostic};
use weka_infer::env::{Env, EnvEntry};
use weka_infer::typeck::{TExpr, TPattern, TStatement, TWord};
use weka_types::{FloatSize, IntSize};

// ---------------------------------------------------------------------------
// IR
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CoreExpr {
    pub words: Vec<CoreWord>,
}

impl CoreExpr {
    pub fn new(words: Vec<CoreWord>) -> Self {
        Self { words }
    }
}

/// How a case word tests its scrutinee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseKind {
    /// Row-polymorphic variant tag.
    Variant,
    /// Nominal constructor tag.
    Struct,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoreHandler {
    pub name: String,
    pub params: Vec<String>,
    pub body: CoreExpr,
}

/// A member of a mutually recursive binding group.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreRec {
    pub name: String,
    pub free: Vec<String>,
    pub body: CoreExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CoreWord {
    Handle {
        params: Vec<String>,
        effect: String,
        body: CoreExpr,
        handlers: Vec<CoreHandler>,
        ret: CoreExpr,
    },
    If {
        then_branch: CoreExpr,
        else_branch: CoreExpr,
    },
    While {
        cond: CoreExpr,
        body: CoreExpr,
    },
    Vars {
        names: Vec<String>,
        body: CoreExpr,
    },
    LetRecs {
        recs: Vec<CoreRec>,
        body: CoreExpr,
    },
    /// First-class function with its captured free variables.
    Closure {
        free: Vec<String>,
        body: CoreExpr,
    },
    RecordExtend(String),
    RecordRestrict(String),
    RecordSelect(String),
    Variant(String),
    Case {
        tag: String,
        kind: CaseKind,
        then_branch: CoreExpr,
        else_branch: CoreExpr,
    },
    WithPermission {
        perms: Vec<String>,
        body: CoreExpr,
    },
    Integer {
        value: i64,
        size: IntSize,
    },
    Float {
        bits: u64,
        size: FloatSize,
    },
    BoolLit(bool),
    StrLit(String),
    /// Built-in word resolved through the primitive table.
    PrimCall(String),
    Do,
    NewRef,
    GetRef,
    PutRef,
    CallVar(String),
    ValueVar(String),
    OperatorVar(String),
    ConstructorVar(String),
    TestConstructorVar(String),
}

/// A lowered program: named definitions plus the main expression.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CoreProgram {
    pub defs: Vec<(String, CoreExpr)>,
    pub main: CoreExpr,
}

// ---------------------------------------------------------------------------
// Lowering
// ---------------------------------------------------------------------------

/// How a locally-bound name behaves at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LocalKind {
    Value,
    /// The implicit handler continuation; calls, not pushes.
    Resume,
}

#[derive(Debug, Clone, Default)]
struct Locals {
    entries: Vec<(String, LocalKind)>,
}

impl Locals {
    fn lookup(&self, name: &str) -> Option<LocalKind> {
        self.entries
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, k)| *k)
    }

    fn extended(&self, names: impl IntoIterator<Item = (String, LocalKind)>) -> Locals {
        let mut out = self.clone();
        out.entries.extend(names);
        out
    }
}

/// Lower an elaborated expression to core IR.
pub fn lower(env: &Env, expr: &TExpr) -> Result<CoreExpr, Diagnostic> {
    lower_expr(env, &Locals::default(), expr)
}

fn lower_expr(env: &Env, locals: &Locals, expr: &TExpr) -> Result<CoreExpr, Diagnostic> {
    let mut words = Vec::with_capacity(expr.words.len());
    for word in &expr.words {
        lower_word(env, locals, word, &mut words)?;
    }
    Ok(CoreExpr::new(words))
}

fn lower_word(
    env: &Env,
    locals: &Locals,
    word: &TWord,
    out: &mut Vec<CoreWord>,
) -> Result<(), Diagnostic> {
    match word {
        TWord::Int { value, size } => out.push(CoreWord::Integer {
            value: *value,
            size: *size,
        }),
        TWord::Float { bits, size } => out.push(CoreWord::Float {
            bits: *bits,
            size: *size,
        }),
        TWord::Bool(b) => out.push(CoreWord::BoolLit(*b)),
        TWord::Str(s) => out.push(CoreWord::StrLit(s.clone())),
        TWord::Do => out.push(CoreWord::Do),
        TWord::NewRef => out.push(CoreWord::NewRef),
        TWord::GetRef => out.push(CoreWord::GetRef),
        TWord::PutRef => out.push(CoreWord::PutRef),
        // Unit-of-measure words are type-level only.
        TWord::Untag | TWord::By(_) | TWord::Per(_) => {}
        // A with-state scope has no runtime representation.
        TWord::WithState(body) => {
            let lowered = lower_expr(env, locals, body)?;
            out.extend(lowered.words);
        }
        TWord::Ident(name) => out.push(lower_ident(env, locals, name)?),
        TWord::Block(stmts) => {
            let lowered = lower_statements(env, locals, stmts)?;
            out.extend(lowered.words);
        }
        TWord::If {
            then_branch,
            else_branch,
        } => out.push(CoreWord::If {
            then_branch: lower_expr(env, locals, then_branch)?,
            else_branch: lower_expr(env, locals, else_branch)?,
        }),
        TWord::While { cond, body } => out.push(CoreWord::While {
            cond: lower_expr(env, locals, cond)?,
            body: lower_expr(env, locals, body)?,
        }),
        TWord::FnLit(body) => {
            let lowered = lower_expr(env, locals, body)?;
            let free = free_locals(&lowered, locals);
            out.push(CoreWord::Closure {
                free,
                body: lowered,
            });
        }
        TWord::Vars { names, body } => {
            let inner = locals.extended(
                names
                    .iter()
                    .map(|n| (n.clone(), LocalKind::Value)),
            );
            out.push(CoreWord::Vars {
                names: names.clone(),
                body: lower_expr(env, &inner, body)?,
            });
        }
        TWord::Handle {
            params,
            body,
            handlers,
            ret,
            effect,
        } => {
            let body_locals = locals.extended(
                params
                    .iter()
                    .map(|p| (p.clone(), LocalKind::Value)),
            );
            let mut lowered_handlers = Vec::with_capacity(handlers.len());
            for handler in handlers {
                let handler_locals = body_locals.extended(
                    handler
                        .params
                        .iter()
                        .map(|p| (p.clone(), LocalKind::Value))
                        .chain(std::iter::once(("resume".to_string(), LocalKind::Resume))),
                );
                lowered_handlers.push(CoreHandler {
                    name: handler.name.clone(),
                    params: handler.params.clone(),
                    body: lower_expr(env, &handler_locals, &handler.body)?,
                });
            }
            out.push(CoreWord::Handle {
                params: params.clone(),
                effect: effect.clone(),
                body: lower_expr(env, &body_locals, body)?,
                handlers: lowered_handlers,
                ret: lower_expr(env, &body_locals, ret)?,
            });
        }
        TWord::WithPermission { perms, body } => out.push(CoreWord::WithPermission {
            perms: perms.clone(),
            body: lower_expr(env, locals, body)?,
        }),
        TWord::RecordExtend(label) => out.push(CoreWord::RecordExtend(label.clone())),
        TWord::RecordRestrict(label) => out.push(CoreWord::RecordRestrict(label.clone())),
        TWord::RecordSelect(label) => out.push(CoreWord::RecordSelect(label.clone())),
        TWord::Variant(label) => out.push(CoreWord::Variant(label.clone())),
        TWord::Case {
            tag,
            then_branch,
            else_branch,
        } => {
            let kind = match env.lookup_word(tag) {
                Some(EnvEntry::Constructor(_)) => CaseKind::Struct,
                _ => CaseKind::Variant,
            };
            out.push(CoreWord::Case {
                tag: tag.clone(),
                kind,
                then_branch: lower_expr(env, locals, then_branch)?,
                else_branch: lower_expr(env, locals, else_branch)?,
            });
        }
        TWord::OverloadPlaceholder(pred) => {
            return Err(Diagnostic::error(
                Category::InstanceNotFound,
                format!("unresolved overload placeholder `{pred}` reached lowering"),
            ));
        }
        TWord::MethodPlaceholder { name, .. } | TWord::RecursivePlaceholder { name, .. } => {
            return Err(Diagnostic::error(
                Category::InstanceNotFound,
                format!("unresolved placeholder for `{name}` reached lowering"),
            ));
        }
    }
    Ok(())
}

fn lower_ident(env: &Env, locals: &Locals, name: &str) -> Result<CoreWord, Diagnostic> {
    if let Some(kind) = locals.lookup(name) {
        return Ok(match kind {
            LocalKind::Value => CoreWord::ValueVar(name.to_string()),
            LocalKind::Resume => CoreWord::CallVar(name.to_string()),
        });
    }
    // Constructor test words are written `name?`.
    if let Some(base) = name.strip_suffix('?') {
        if matches!(env.lookup_word(base), Some(EnvEntry::Constructor(_))) {
            return Ok(CoreWord::TestConstructorVar(base.to_string()));
        }
    }
    match env.lookup_word(name) {
        Some(EnvEntry::Function(_) | EnvEntry::Recursive(_)) => {
            Ok(CoreWord::CallVar(name.to_string()))
        }
        Some(EnvEntry::Variable(_)) => Ok(CoreWord::ValueVar(name.to_string())),
        Some(EnvEntry::Operator(_)) => Ok(CoreWord::OperatorVar(name.to_string())),
        Some(EnvEntry::Constructor(_)) => Ok(CoreWord::ConstructorVar(name.to_string())),
        Some(EnvEntry::Primitive(_)) => Ok(CoreWord::PrimCall(name.to_string())),
        Some(EnvEntry::Overload { .. }) => Err(Diagnostic::error(
            Category::InstanceNotFound,
            format!("overloaded word `{name}` was not elaborated"),
        )),
        None => Err(Diagnostic::error(
            Category::UndefinedName,
            format!("unknown word `{name}` during lowering"),
        )),
    }
}

fn lower_statements(
    env: &Env,
    locals: &Locals,
    stmts: &[TStatement],
) -> Result<CoreExpr, Diagnostic> {
    let Some((stmt, rest)) = stmts.split_first() else {
        return Ok(CoreExpr::default());
    };
    match stmt {
        TStatement::Expr(expr) => {
            let mut lowered = lower_expr(env, locals, expr)?;
            let tail = lower_statements(env, locals, rest)?;
            lowered.words.extend(tail.words);
            Ok(lowered)
        }
        TStatement::Let { pattern, value } => {
            let mut lowered = lower_expr(env, locals, value)?;
            let bound = pattern_names(pattern);
            let inner = locals.extended(bound.into_iter().map(|n| (n, LocalKind::Value)));
            let tail = lower_statements(env, &inner, rest)?;
            let binding = lower_let_pattern(pattern, tail);
            lowered.words.extend(binding.words);
            Ok(lowered)
        }
    }
}

fn pattern_names(pattern: &TPattern) -> Vec<String> {
    match pattern {
        TPattern::Var(name) => vec![name.clone()],
        TPattern::Ctor { args, .. } => args.iter().flat_map(pattern_names).collect(),
        _ => Vec::new(),
    }
}

/// Lower a `let` pattern around its continuation. The bound value sits on
/// top of the stack.
fn lower_let_pattern(pattern: &TPattern, rest: CoreExpr) -> CoreExpr {
    match pattern {
        TPattern::Var(name) => CoreExpr::new(vec![CoreWord::Vars {
            names: vec![name.clone()],
            body: rest,
        }]),
        // Literal and wildcard patterns are irrefutable here (checked by
        // inference); the value is dropped.
        TPattern::Wild | TPattern::Int { .. } | TPattern::Bool(_) => {
            CoreExpr::new(vec![CoreWord::Vars {
                names: vec!["_".to_string()],
                body: rest,
            }])
        }
        TPattern::Ctor { name, args } => {
            // Unpacking pushes fields in declaration order, so the last
            // field ends on top; bind arguments right to left.
            let mut body = rest;
            for arg in args {
                body = lower_let_pattern(arg, body);
            }
            CoreExpr::new(vec![CoreWord::Case {
                tag: name.clone(),
                kind: CaseKind::Struct,
                then_branch: body,
                else_branch: CoreExpr::default(),
            }])
        }
    }
}

// ---------------------------------------------------------------------------
// Free variables
// ---------------------------------------------------------------------------

/// Locally-bound names a lowered body references: the closure's free list.
fn free_locals(expr: &CoreExpr, locals: &Locals) -> Vec<String> {
    let mut found = BTreeSet::new();
    let bound = BTreeSet::new();
    collect_free(expr, &bound, &mut found);
    locals
        .entries
        .iter()
        .filter(|(name, _)| found.contains(name))
        .map(|(name, _)| name.clone())
        .collect()
}

/// Free variable names of a core expression, for closure conversion.
pub fn free_vars(expr: &CoreExpr) -> BTreeSet<String> {
    let mut found = BTreeSet::new();
    collect_free(expr, &BTreeSet::new(), &mut found);
    found
}

fn collect_free(expr: &CoreExpr, bound: &BTreeSet<String>, found: &mut BTreeSet<String>) {
    for word in &expr.words {
        match word {
            CoreWord::ValueVar(name) | CoreWord::CallVar(name) => {
                if !bound.contains(name) {
                    found.insert(name.clone());
                }
            }
            CoreWord::Vars { names, body } => {
                let mut inner = bound.clone();
                inner.extend(names.iter().cloned());
                collect_free(body, &inner, found);
            }
            CoreWord::LetRecs { recs, body } => {
                let mut inner = bound.clone();
                inner.extend(recs.iter().map(|r| r.name.clone()));
                for rec in recs {
                    collect_free(&rec.body, &inner, found);
                }
                collect_free(body, &inner, found);
            }
            CoreWord::Closure { free, .. } => {
                for name in free {
                    if !bound.contains(name) {
                        found.insert(name.clone());
                    }
                }
            }
            CoreWord::Handle {
                params,
                body,
                handlers,
                ret,
                ..
            } => {
                let mut inner = bound.clone();
                inner.extend(params.iter().cloned());
                collect_free(body, &inner, found);
                collect_free(ret, &inner, found);
                for handler in handlers {
                    let mut handler_bound = inner.clone();
                    handler_bound.extend(handler.params.iter().cloned());
                    handler_bound.insert("resume".to_string());
                    collect_free(&handler.body, &handler_bound, found);
                }
            }
            CoreWord::If {
                then_branch,
                else_branch,
            }
            | CoreWord::Case {
                then_branch,
                else_branch,
                ..
            } => {
                collect_free(then_branch, bound, found);
                collect_free(else_branch, bound, found);
            }
            CoreWord::While { cond, body } => {
                collect_free(cond, bound, found);
                collect_free(body, bound, found);
            }
            CoreWord::WithPermission { body, .. } => collect_free(body, bound, found),
            _ => {}
        }
    }
}
