//! Pipeline assembly.
//!
//! Declarations are registered first (types, constructors, effects,
//! overloads, rules, units, primitives), then each definition is inferred,
//! elaborated, and lowered in order, and finally the bytecode generator
//! assembles the block list. Compilation is fail-fast and deterministic:
//! block names derive from monotonic counters, every map is ordered.

use std::collections::BTreeMap;

use weka_ast::{Decl, Expr, Program};
use weka_codegen::{generate, Block, CodegenConfig, CtorLoc, HandlerLoc};
use weka_core::{lower, CoreExpr, CoreProgram};
use weka_diag::{Category, Diagnostic, DiagnosticError};
use weka_infer::chr::{match_type, Chr};
use weka_infer::elaborate::elaborate;
use weka_infer::env::{CtorInfo, Env, EnvEntry, Instance, OperatorInfo};
use weka_infer::typeck::{infer_recursive, infer_top, InferredTop};
use weka_infer::{Constraint, Fresh, Provenance, Reason, Unifier};
use weka_types::{build, IntSize, Kind, PrimType, QualType, Scheme, SeqItem, Subst, Type};

/// Compile a program to its bytecode block list.
pub fn compile(program: &Program) -> Result<Vec<Block>, DiagnosticError> {
    compile_with_config(program, &CodegenConfig::default())
}

pub fn compile_with_config(
    program: &Program,
    config: &CodegenConfig,
) -> Result<Vec<Block>, DiagnosticError> {
    let mut compilation = Compilation::new();
    compilation.register_declarations(program)?;
    compilation.process_declarations(program)?;
    let main = compilation.process_main(&program.main)?;

    let (handlers, effects, constructors) = compilation.codegen_maps();
    let core = CoreProgram {
        defs: compilation.defs,
        main,
    };
    let blocks = generate(&core, handlers, effects, constructors, config)
        .map_err(|err| DiagnosticError::single(err.into()))?;
    Ok(blocks)
}

struct Compilation {
    env: Env,
    fresh: Fresh,
    ctor_counter: u32,
    effect_counter: u32,
    defs: Vec<(String, CoreExpr)>,
}

impl Compilation {
    fn new() -> Self {
        let mut env = Env::new();
        for (name, prim) in weka_codegen::primitives::registry() {
            env.bind_word(name, EnvEntry::Primitive(prim.scheme));
        }
        Self {
            env,
            fresh: Fresh::new(),
            ctor_counter: 0,
            effect_counter: 0,
            defs: Vec::new(),
        }
    }

    // -- Pass 1: registration ------------------------------------------------

    fn register_declarations(&mut self, program: &Program) -> Result<(), DiagnosticError> {
        // Overload instances are numbered in declaration order.
        let mut instance_counts: BTreeMap<String, usize> = BTreeMap::new();

        for decl in &program.decls {
            match decl {
                Decl::Type(ty) => self.register_type(ty),
                Decl::RecTypes(tys) => {
                    for ty in tys {
                        self.register_type(ty);
                    }
                }
                Decl::Pattern { name, scheme, .. } => {
                    debug_assert!(
                        !name.ends_with(|c: char| c.is_ascii_digit()),
                        "renamed user names never end in digits"
                    );
                    self.env.bind_pattern(name.clone(), scheme.clone());
                }
                Decl::Effect(effect) => self.register_effect(effect),
                Decl::Overload {
                    name,
                    pred_name,
                    ty,
                    ..
                } => {
                    self.env.bind_word(
                        name.clone(),
                        EnvEntry::Overload {
                            pred_name: pred_name.clone(),
                            base: ty.clone(),
                            instances: Vec::new(),
                        },
                    );
                }
                Decl::Instance {
                    overload, scheme, ..
                } => {
                    let index = instance_counts.entry(overload.clone()).or_insert(0);
                    let func_name = format!("{overload}{index}");
                    *index += 1;
                    let Some(EnvEntry::Overload {
                        pred_name,
                        base,
                        mut instances,
                    }) = self.env.lookup_word(overload).cloned()
                    else {
                        return Err(DiagnosticError::single(Diagnostic::error(
                            Category::UndefinedName,
                            format!("instance for unknown overload `{overload}`"),
                        )));
                    };
                    instances.push(Instance {
                        scheme: scheme.clone(),
                        func_name,
                    });
                    self.env.bind_word(
                        overload.clone(),
                        EnvEntry::Overload {
                            pred_name,
                            base,
                            instances,
                        },
                    );
                }
                Decl::PropagationRule { heads, body, .. } => {
                    self.env.add_rule(Chr::Propagation {
                        heads: heads.clone(),
                        body: body.clone(),
                    });
                }
                Decl::Tag { unit_name, .. } => {
                    self.env.register_unit(unit_name.clone());
                    self.env.bind_type_ctor(unit_name.clone(), Kind::Unit);
                }
                Decl::Func(_)
                | Decl::RecFuncs(_)
                | Decl::Test { .. }
                | Decl::Law { .. }
                | Decl::Check { .. } => {}
            }
        }
        Ok(())
    }

    fn register_type(&mut self, decl: &weka_ast::TypeDecl) {
        self.env.bind_type_ctor(decl.name.clone(), decl.kind.clone());
        for ctor in &decl.ctors {
            let id = self.ctor_counter;
            self.ctor_counter += 1;
            let sharing = Type::var("s", Kind::Sharing);
            let constructed = build::val(ctor.result.clone(), sharing);
            // Constructing: consumes the arguments (last argument on top),
            // produces the value.
            let mut consumed: Vec<Type> = ctor.args.clone();
            consumed.reverse();
            let value = word_scheme(consumed, vec![constructed.clone()]);
            // Destructuring: consumes the value, produces the arguments in
            // declaration order.
            let pattern = word_scheme(vec![constructed], ctor.args.clone());
            self.env.bind_pattern(ctor.name.clone(), pattern.clone());
            self.env.bind_word(
                ctor.name.clone(),
                EnvEntry::Constructor(CtorInfo {
                    pattern,
                    value,
                    id,
                    arity: ctor.args.len(),
                }),
            );
        }
    }

    fn register_effect(&mut self, decl: &weka_ast::EffectDecl) {
        let handle_id = self.effect_counter;
        self.effect_counter += 1;
        // The effect constructor's kind: parameters curried into Effect.
        let mut kind = Kind::Effect;
        for (_, param_kind) in decl.params.iter().rev() {
            kind = Kind::arrow(param_kind.clone(), kind);
        }
        self.env.bind_type_ctor(decl.name.clone(), kind.clone());

        // The row element applies the effect constructor to its parameter
        // variables.
        let mut elem = Type::ctor(decl.name.clone(), kind);
        for (param, param_kind) in &decl.params {
            elem = Type::App(
                Box::new(elem),
                Box::new(Type::var(param.clone(), param_kind.clone())),
            );
        }

        for (index, op) in decl.ops.iter().enumerate() {
            let effects = Type::RowExtend {
                label: decl.name.clone(),
                elem: Box::new(elem.clone()),
                rest: Box::new(Type::var("e", Kind::row(Kind::Effect))),
            };
            let mut consumed = op.ins.clone();
            consumed.reverse();
            let scheme = word_scheme_with(consumed, op.outs.clone(), effects);
            self.env.bind_word(
                op.name.clone(),
                EnvEntry::Operator(OperatorInfo {
                    scheme,
                    effect: decl.name.clone(),
                    handle_id,
                    index,
                }),
            );
        }
    }

    // -- Pass 2: definitions -------------------------------------------------

    fn process_declarations(&mut self, program: &Program) -> Result<(), DiagnosticError> {
        for decl in &program.decls {
            match decl {
                Decl::Func(func) => {
                    let top = infer_top(&self.env, &mut self.fresh, &func.body)
                        .map_err(DiagnosticError::single)?;
                    let elaborated = elaborate(&self.env, &top.scheme, &top.subst, top.expr)
                        .map_err(DiagnosticError::single)?;
                    self.env
                        .bind_word(func.name.clone(), EnvEntry::Function(top.scheme));
                    let core =
                        lower(&self.env, &elaborated).map_err(DiagnosticError::single)?;
                    self.defs.push((func.name.clone(), core));
                }
                Decl::RecFuncs(funcs) => {
                    let group: Vec<(String, &Expr)> = funcs
                        .iter()
                        .map(|f| (f.name.clone(), &f.body))
                        .collect();
                    let inferred = infer_recursive(&self.env, &mut self.fresh, &group)
                        .map_err(DiagnosticError::single)?;
                    // Bind every member before lowering so mutual calls
                    // classify as direct calls.
                    for (name, top) in &inferred {
                        self.env
                            .bind_word(name.clone(), EnvEntry::Function(top.scheme.clone()));
                    }
                    for (name, top) in inferred {
                        let elaborated =
                            elaborate(&self.env, &top.scheme, &top.subst, top.expr)
                                .map_err(DiagnosticError::single)?;
                        let core = lower(&self.env, &elaborated)
                            .map_err(DiagnosticError::single)?;
                        self.defs.push((name, core));
                    }
                }
                Decl::Instance {
                    overload,
                    scheme,
                    body,
                    ..
                } => {
                    self.process_instance(overload, scheme, body)?;
                }
                Decl::Test { body, .. } | Decl::Law { body, .. } => {
                    // Type-checked, never lowered.
                    infer_top(&self.env, &mut self.fresh, body)
                        .map_err(DiagnosticError::single)?;
                }
                Decl::Check { name, scheme, .. } => {
                    self.process_check(name, scheme)?;
                }
                Decl::Type(_)
                | Decl::RecTypes(_)
                | Decl::Pattern { .. }
                | Decl::Effect(_)
                | Decl::Overload { .. }
                | Decl::PropagationRule { .. }
                | Decl::Tag { .. } => {}
            }
        }
        Ok(())
    }

    /// Infer an instance body, verify it against the overload's base
    /// scheme at the instance head, and register the synthesized function.
    fn process_instance(
        &mut self,
        overload: &str,
        inst_scheme: &Scheme,
        body: &Expr,
    ) -> Result<(), DiagnosticError> {
        let Some(EnvEntry::Overload {
            base, instances, ..
        }) = self.env.lookup_word(overload).cloned()
        else {
            return Err(DiagnosticError::single(Diagnostic::error(
                Category::UndefinedName,
                format!("instance for unknown overload `{overload}`"),
            )));
        };
        let func_name = instances
            .iter()
            .find(|inst| inst.scheme == *inst_scheme)
            .map(|inst| inst.func_name.clone())
            .ok_or_else(|| {
                DiagnosticError::single(Diagnostic::error(
                    Category::UndefinedName,
                    format!("unregistered instance of `{overload}`"),
                ))
            })?;

        let top = infer_top(&self.env, &mut self.fresh, body)
            .map_err(DiagnosticError::single)?;

        // The instance must admit the base scheme specialized to its head.
        let base_q = instantiate(&mut self.fresh, &base);
        let inst_q = instantiate(&mut self.fresh, inst_scheme);
        let inferred_q = instantiate(&mut self.fresh, &top.scheme);
        let mut constraints = vec![Constraint {
            left: base_q.head.clone(),
            right: inferred_q.head.clone(),
            provenance: Provenance {
                span: weka_ast::Span::synthetic(),
                reason: Reason::Declared,
            },
        }];
        if let Some(class_pred) = base_q.context.first() {
            constraints.push(Constraint {
                left: class_pred.arg.clone(),
                right: inst_q.head.clone(),
                provenance: Provenance {
                    span: weka_ast::Span::synthetic(),
                    reason: Reason::Declared,
                },
            });
        }
        Unifier::new(&mut self.fresh)
            .solve_all(&constraints)
            .map_err(DiagnosticError::single)?;

        // Elaborate against the instance's own context so its constraints
        // become dictionary parameters.
        let inst_context_scheme = Scheme {
            quantified: top.scheme.quantified.clone(),
            qual: QualType {
                context: inst_scheme.qual.context.clone(),
                head: top.scheme.qual.head.clone(),
            },
        };
        let elaborated = elaborate(&self.env, &inst_context_scheme, &top.subst, top.expr)
            .map_err(DiagnosticError::single)?;
        self.env
            .bind_word(func_name.clone(), EnvEntry::Function(top.scheme));
        let core = lower(&self.env, &elaborated).map_err(DiagnosticError::single)?;
        self.defs.push((func_name, core));
        Ok(())
    }

    /// `check name : scheme`: the registered scheme must admit the
    /// declared one by one-way matching.
    fn process_check(&mut self, name: &str, declared: &Scheme) -> Result<(), DiagnosticError> {
        let registered = match self.env.lookup_word(name) {
            Some(
                EnvEntry::Function(s)
                | EnvEntry::Variable(s)
                | EnvEntry::Recursive(s)
                | EnvEntry::Primitive(s),
            ) => s.clone(),
            Some(EnvEntry::Overload { base, .. }) => base.clone(),
            Some(EnvEntry::Constructor(info)) => info.value.clone(),
            Some(EnvEntry::Operator(info)) => info.scheme.clone(),
            None => {
                return Err(DiagnosticError::single(Diagnostic::error(
                    Category::UndefinedName,
                    format!("check references unknown word `{name}`"),
                )));
            }
        };
        let inferred = instantiate(&mut self.fresh, &registered);
        if match_type(&inferred.head, &declared.qual.head).is_none() {
            return Err(DiagnosticError::single(Diagnostic::error(
                Category::TypeMismatch,
                format!(
                    "`{name}` does not admit the declared scheme: inferred `{}`, declared `{}`",
                    registered, declared
                ),
            )));
        }
        Ok(())
    }

    // -- Main ----------------------------------------------------------------

    fn process_main(&mut self, main: &Expr) -> Result<CoreExpr, DiagnosticError> {
        let top = infer_top(&self.env, &mut self.fresh, main)
            .map_err(DiagnosticError::single)?;
        self.check_main_signature(&top)?;
        let elaborated = elaborate(&self.env, &top.scheme, &top.subst, top.expr)
            .map_err(DiagnosticError::single)?;
        lower(&self.env, &elaborated).map_err(DiagnosticError::single)
    }

    /// `main` must leave an I32-convertible value on an otherwise
    /// unconstrained stack, with no residual effects or permissions.
    fn check_main_signature(&mut self, top: &InferredTop) -> Result<(), DiagnosticError> {
        let sharing = self.fresh.var(Kind::Sharing);
        let tail = self.fresh.stack_tail();
        let expected_outs = Type::seq(
            Kind::Value,
            vec![
                SeqItem::indexed(build::val(Type::Prim(PrimType::Int(IntSize::I32)), sharing)),
                SeqItem::dotted(tail),
            ],
        );
        let prov = Provenance {
            span: weka_ast::Span::synthetic(),
            reason: Reason::Main,
        };
        let constraints = vec![
            Constraint {
                left: top.word_type.outs.clone(),
                right: expected_outs,
                provenance: prov,
            },
            Constraint {
                left: top.word_type.effects.clone(),
                right: Type::RowEmpty(Kind::Effect),
                provenance: prov,
            },
            Constraint {
                left: top.word_type.perms.clone(),
                right: Type::RowEmpty(Kind::Permission),
                provenance: prov,
            },
        ];
        Unifier::new(&mut self.fresh)
            .solve_all(&constraints)
            .map(|_| ())
            .map_err(|cause| {
                DiagnosticError::single(
                    Diagnostic::error(
                        Category::MainSignature,
                        format!(
                            "main must yield an I32 with no residual effects; inferred `{}`",
                            top.scheme
                        ),
                    )
                    .with_help(cause.message),
                )
            })
    }

    // -- Codegen maps --------------------------------------------------------

    #[allow(clippy::type_complexity)]
    fn codegen_maps(
        &self,
    ) -> (
        BTreeMap<String, HandlerLoc>,
        BTreeMap<String, u32>,
        BTreeMap<String, CtorLoc>,
    ) {
        let mut handlers = BTreeMap::new();
        let mut effects = BTreeMap::new();
        let mut constructors = BTreeMap::new();
        for (name, entry) in self.env.words() {
            match entry {
                EnvEntry::Operator(info) => {
                    handlers.insert(
                        name.clone(),
                        HandlerLoc {
                            handle_id: info.handle_id,
                            index: info.index,
                        },
                    );
                    effects.insert(info.effect.clone(), info.handle_id);
                }
                EnvEntry::Constructor(info) => {
                    constructors.insert(
                        name.clone(),
                        CtorLoc {
                            id: info.id,
                            args: info.arity,
                        },
                    );
                }
                _ => {}
            }
        }
        (handlers, effects, constructors)
    }
}

// ---------------------------------------------------------------------------
// Scheme construction helpers
// ---------------------------------------------------------------------------

fn instantiate(fresh: &mut Fresh, scheme: &Scheme) -> QualType {
    let mut subst = Subst::new();
    for (name, kind) in &scheme.quantified {
        let var = fresh.var(kind.clone());
        subst
            .bind(name, kind, var)
            .expect("fresh variable has the quantified kind");
    }
    subst.apply_qual(&scheme.qual)
}

fn word_scheme(consumed: Vec<Type>, produced: Vec<Type>) -> Scheme {
    word_scheme_with(
        consumed,
        produced,
        Type::var("e", Kind::row(Kind::Effect)),
    )
}

fn word_scheme_with(consumed: Vec<Type>, produced: Vec<Type>, effects: Type) -> Scheme {
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
