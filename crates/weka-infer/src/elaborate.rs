//! Elaboration: placeholder resolution into dictionary-passing code.
//!
//! After generalization, the expanded tree still contains overload,
//! method, and recursion placeholders. Elaboration is purely syntactic:
//! it consults the final substitution, adds a prelude binding one
//! dictionary parameter per context predicate of the generalized scheme,
//! and rewrites every placeholder:
//!
//! - an overload placeholder becomes a function literal pushing the
//!   matched instance function (with that instance's own dictionaries
//!   resolved recursively), or a dictionary parameter when no instance
//!   matches;
//! - a method placeholder is the same followed by `do`;
//! - a recursion placeholder becomes a direct call.

use weka_diag::{Category, Diagnostic};
use weka_types::{Pred, Scheme, Subst};

use crate::chr::match_type;
use crate::env::Env;
use crate::typeck::{TExpr, THandler, TStatement, TWord};

/// Name of the dictionary parameter for context predicate `index`.
///
/// The digit suffix keeps these out of the renamed user namespace.
fn dict_param(index: usize) -> String {
    format!("dict{index}")
}

struct Elaborator<'a> {
    env: &'a Env,
    subst: &'a Subst,
    context: &'a [Pred],
}

/// Elaborate a generalized top-level expression.
pub fn elaborate(
    env: &Env,
    scheme: &Scheme,
    subst: &Subst,
    expr: TExpr,
) -> Result<TExpr, Diagnostic> {
    let elaborator = Elaborator {
        env,
        subst,
        context: &scheme.qual.context,
    };
    let body = elaborator.rewrite_expr(expr)?;
    if scheme.qual.context.is_empty() {
        return Ok(body);
    }
    // Dictionary prelude: the caller pushes one dictionary per context
    // predicate; bind them by name for the body.
    let names = (0..scheme.qual.context.len()).map(dict_param).collect();
    Ok(TExpr {
        words: vec![TWord::Vars { names, body }],
    })
}

impl Elaborator<'_> {
    fn rewrite_expr(&self, expr: TExpr) -> Result<TExpr, Diagnostic> {
        let mut words = Vec::with_capacity(expr.words.len());
        for word in expr.words {
            self.rewrite_word(word, &mut words)?;
        }
        Ok(TExpr { words })
    }

    fn rewrite_word(&self, word: TWord, out: &mut Vec<TWord>) -> Result<(), Diagnostic> {
        match word {
            TWord::OverloadPlaceholder(pred) => {
                out.extend(self.resolve_dictionary(&pred)?);
                Ok(())
            }
            TWord::MethodPlaceholder { name: _, pred } => {
                out.extend(self.resolve_dictionary(&pred)?);
                out.push(TWord::Do);
                Ok(())
            }
            TWord::RecursivePlaceholder { name, .. } => {
                out.push(TWord::Ident(name));
                Ok(())
            }
            TWord::Block(stmts) => {
                let mut rewritten = Vec::with_capacity(stmts.len());
                for stmt in stmts {
                    rewritten.push(match stmt {
                        TStatement::Let { pattern, value } => TStatement::Let {
                            pattern,
                            value: self.rewrite_expr(value)?,
                        },
                        TStatement::Expr(e) => TStatement::Expr(self.rewrite_expr(e)?),
                    });
                }
                out.push(TWord::Block(rewritten));
                Ok(())
            }
            TWord::If {
                then_branch,
                else_branch,
            } => {
                out.push(TWord::If {
                    then_branch: self.rewrite_expr(then_branch)?,
                    else_branch: self.rewrite_expr(else_branch)?,
                });
                Ok(())
            }
            TWord::While { cond, body } => {
                out.push(TWord::While {
                    cond: self.rewrite_expr(cond)?,
                    body: self.rewrite_expr(body)?,
                });
                Ok(())
            }
            TWord::FnLit(body) => {
                out.push(TWord::FnLit(self.rewrite_expr(body)?));
                Ok(())
            }
            TWord::Handle {
                params,
                body,
                handlers,
                ret,
                effect,
            } => {
                let mut rewritten = Vec::with_capacity(handlers.len());
                for handler in handlers {
                    rewritten.push(THandler {
                        name: handler.name,
                        params: handler.params,
                        body: self.rewrite_expr(handler.body)?,
                    });
                }
                out.push(TWord::Handle {
                    params,
                    body: self.rewrite_expr(body)?,
                    handlers: rewritten,
                    ret: self.rewrite_expr(ret)?,
                    effect,
                });
                Ok(())
            }
            TWord::WithState(body) => {
                out.push(TWord::WithState(self.rewrite_expr(body)?));
                Ok(())
            }
            TWord::WithPermission { perms, body } => {
                out.push(TWord::WithPermission {
                    perms,
                    body: self.rewrite_expr(body)?,
                });
                Ok(())
            }
            TWord::Case {
                tag,
                then_branch,
                else_branch,
            } => {
                out.push(TWord::Case {
                    tag,
                    then_branch: self.rewrite_expr(then_branch)?,
                    else_branch: self.rewrite_expr(else_branch)?,
                });
                Ok(())
            }
            TWord::Vars { names, body } => {
                out.push(TWord::Vars {
                    names,
                    body: self.rewrite_expr(body)?,
                });
                Ok(())
            }
            other => {
                out.push(other);
                Ok(())
            }
        }
    }

    /// Produce words pushing one dictionary value for `pred`.
    fn resolve_dictionary(&self, pred: &Pred) -> Result<Vec<TWord>, Diagnostic> {
        let pred = self.subst.apply_pred(pred);

        // Instance search: one-way match of each instance head against the
        // predicate argument.
        if let Some((_, instances)) = self.env.lookup_overload_by_pred(&pred.name) {
            for instance in instances {
                let Some(phi) = match_type(&instance.scheme.qual.head, &pred.arg) else {
                    continue;
                };
                // Recursively elaborate the instance's own context.
                let mut words = Vec::new();
                for ctx_pred in &instance.scheme.qual.context {
                    words.extend(self.resolve_dictionary(&phi.apply_pred(ctx_pred))?);
                }
                words.push(TWord::Ident(instance.func_name.clone()));
                return Ok(vec![TWord::FnLit(TExpr { words })]);
            }
        }

        // Dictionary parameter fallback: a context predicate of the
        // enclosing scheme whose declared constraint matches.
        for (index, ctx_pred) in self.context.iter().enumerate() {
            if ctx_pred.name == pred.name && match_type(&ctx_pred.arg, &pred.arg).is_some() {
                return Ok(vec![TWord::Ident(dict_param(index))]);
            }
        }

        Err(Diagnostic::error(
            Category::InstanceNotFound,
            format!("no instance satisfies the constraint `{pred}`"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{EnvEntry, Instance};
    use weka_types::{Kind, PrimType, QualType, Type};

    fn eq_pred(arg: Type) -> Pred {
        Pred::new("eq", arg)
    }

    fn overload_env(instances: Vec<Instance>) -> Env {
        let mut env = Env::new();
        let base = Scheme {
            quantified: vec![("t".into(), Kind::Data)],
            qual: QualType {
                context: vec![eq_pred(Type::var("t", Kind::Data))],
                head: Type::var("t", Kind::Data),
            },
        };
        env.bind_word(
            "eq",
            EnvEntry::Overload {
                pred_name: "eq".into(),
                base,
                instances,
            },
        );
        env
    }

    fn int_instance() -> Instance {
        Instance {
            scheme: Scheme::mono(Type::Prim(PrimType::Int(weka_types::IntSize::I32))),
            func_name: "eq0".into(),
        }
    }

    #[test]
    fn method_placeholder_selects_matching_instance() {
        let env = overload_env(vec![int_instance()]);
        let scheme = Scheme::mono(Type::Prim(PrimType::Bool));
        let subst = Subst::new();
        let expr = TExpr {
            words: vec![TWord::MethodPlaceholder {
                name: "eq".into(),
                pred: eq_pred(Type::Prim(PrimType::Int(weka_types::IntSize::I32))),
            }],
        };
        let out = elaborate(&env, &scheme, &subst, expr).unwrap();
        assert_eq!(out.words.len(), 2);
        let TWord::FnLit(dict) = &out.words[0] else {
            panic!("expected dictionary literal, got {:?}", out.words[0]);
        };
        assert_eq!(dict.words, vec![TWord::Ident("eq0".into())]);
        assert_eq!(out.words[1], TWord::Do);
    }

    #[test]
    fn unmatched_placeholder_falls_back_to_dictionary_parameter() {
        let env = overload_env(vec![int_instance()]);
        let ctx = eq_pred(Type::var("t", Kind::Data));
        let scheme = Scheme {
            quantified: vec![("t".into(), Kind::Data)],
            qual: QualType {
                context: vec![ctx.clone()],
                head: Type::var("t", Kind::Data),
            },
        };
        let subst = Subst::new();
        let expr = TExpr {
            words: vec![TWord::OverloadPlaceholder(ctx)],
        };
        let out = elaborate(&env, &scheme, &subst, expr).unwrap();
        // Prelude binds the dictionary parameter, body references it.
        let TWord::Vars { names, body } = &out.words[0] else {
            panic!("expected dictionary prelude, got {:?}", out.words[0]);
        };
        assert_eq!(names, &vec!["dict0".to_string()]);
        assert_eq!(body.words, vec![TWord::Ident("dict0".into())]);
    }

    #[test]
    fn missing_instance_is_fatal() {
        let env = overload_env(vec![int_instance()]);
        let scheme = Scheme::mono(Type::Prim(PrimType::Bool));
        let subst = Subst::new();
        let expr = TExpr {
            words: vec![TWord::MethodPlaceholder {
                name: "eq".into(),
                pred: eq_pred(Type::Prim(PrimType::Bool)),
            }],
        };
        let err = elaborate(&env, &scheme, &subst, expr).unwrap_err();
        assert_eq!(err.category, Category::InstanceNotFound);
    }

    #[test]
    fn recursive_placeholder_becomes_direct_call() {
        let env = Env::new();
        let scheme = Scheme::mono(Type::Prim(PrimType::Bool));
        let subst = Subst::new();
        let expr = TExpr {
            words: vec![TWord::RecursivePlaceholder {
                name: "ack".into(),
                ty: Type::Prim(PrimType::Bool),
            }],
        };
        let out = elaborate(&env, &scheme, &subst, expr).unwrap();
        assert_eq!(out.words, vec![TWord::Ident("ack".into())]);
    }

    #[test]
    fn instance_context_is_resolved_recursively() {
        // eq(list t) requires eq t; resolving at list(I32) chains both
        // instances.
        let list_instance = Instance {
            scheme: Scheme {
                quantified: vec![("t".into(), Kind::Value)],
                qual: QualType {
                    context: vec![eq_pred(Type::var("t", Kind::Value))],
                    head: weka_types::build::list(Type::var("t", Kind::Value)),
                },
            },
            func_name: "eq1".into(),
        };
        let int_val = weka_types::build::val(
            Type::Prim(PrimType::Int(weka_types::IntSize::I32)),
            Type::False(Kind::Sharing),
        );
        let int_instance = Instance {
            scheme: Scheme::mono(int_val.clone()),
            func_name: "eq0".into(),
        };
        let env = overload_env(vec![list_instance, int_instance]);
        let scheme = Scheme::mono(Type::Prim(PrimType::Bool));
        let subst = Subst::new();
        let expr = TExpr {
            words: vec![TWord::OverloadPlaceholder(eq_pred(weka_types::build::list(
                int_val,
            )))],
        };
        let out = elaborate(&env, &scheme, &subst, expr).unwrap();
        let TWord::FnLit(outer) = &out.words[0] else {
            panic!("expected dictionary literal");
        };
        // The outer dictionary pushes the inner one before calling eq1.
        let TWord::FnLit(inner) = &outer.words[0] else {
            panic!("expected nested dictionary literal");
        };
        assert_eq!(inner.words, vec![TWord::Ident("eq0".into())]);
        assert_eq!(outer.words[1], TWord::Ident("eq1".into()));
    }
}
