//! The type-inference and module-elaboration core.
//!
//! Given the parsed root module and the primitives environment, the
//! driver produces the updated environment, the abstracted signature
//! record of the module, its output space name, and the elaborated IR
//! bindings. The first typed error aborts; warnings accumulate.

pub mod types;
pub mod error;
pub mod context;
pub mod synonym;
pub mod unify;
pub mod poly;
pub mod env;
pub mod convert;
pub mod infer;
pub mod check;
pub mod subtype;

use std::collections::BTreeSet;

use crate::ast::{Expr, SourceUnit};
use crate::interner::Symbol;
use crate::ir::IBind;
use crate::primitives::Primitives;
use self::check::ModuleChecker;
use self::context::Context;
use self::env::{Env, ModuleEntry, SigRecord, Signature};
use self::error::{TypeError, Warning};
use self::infer::{Checker, Pre};
use self::types::{OpaqueId, Type};

/// Everything the elaboration of one root module produces.
#[derive(Debug)]
pub struct Elaboration {
    pub env: Env,
    pub opaques: BTreeSet<OpaqueId>,
    pub record: SigRecord,
    pub space: Symbol,
    pub binds: Vec<IBind>,
    pub warnings: Vec<Warning>,
}

/// Elaborates the root module of a compilation unit.
pub fn elaborate_root(
    ctx: &mut Context,
    prims: &Primitives,
    env: &Env,
    unit: &SourceUnit,
) -> Result<Elaboration, TypeError> {
    log::debug!("elaborating root module");
    let addr = [unit.name.value];
    let (abs, binds) = {
        let mut checker = ModuleChecker::new(ctx, prims);
        checker.typecheck_module(&addr, env, &unit.body)?
    };
    let Signature::Structure(record) = abs.sig else {
        return Err(TypeError::RootModuleMustBeStructure { span: unit.span });
    };
    let space = check::space_of(&addr);
    let mut out_env = env.clone();
    out_env.add_module(
        unit.name.value,
        ModuleEntry {
            sig: Signature::Structure(record.clone()),
            space,
        },
    );
    Ok(Elaboration {
        env: out_env,
        opaques: abs.opaques,
        record,
        space,
        binds,
        warnings: ctx.take_warnings(),
    })
}

/// Infers the type of a single expression against an environment. Meant
/// for tests and tooling; the result is fully resolved.
pub fn infer_expr(
    ctx: &mut Context,
    prims: &Primitives,
    env: &Env,
    expr: &Expr,
) -> Result<Type, TypeError> {
    let pre = Pre::default();
    let mut checker = Checker::new(ctx, prims);
    let (_, ty) = checker.infer(&pre, env, expr)?;
    Ok(ctx.canonical(&ty))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{self, Args, Body, Ident, Params, Span};
    use crate::interner::intern;
    use crate::primitives;
    use crate::typechecker::types::{TypeF, TypeVar};

    fn sp() -> Span {
        Span::synthetic()
    }

    fn ident(name: &str) -> Ident {
        Ident::new(intern(name), sp())
    }

    fn var(name: &str) -> Expr {
        Expr::Var {
            span: sp(),
            path: vec![],
            name: intern(name),
        }
    }

    fn int(n: i64) -> Expr {
        Expr::Literal {
            span: sp(),
            lit: ast::Literal::Int(n),
        }
    }

    fn boolean(b: bool) -> Expr {
        Expr::Literal {
            span: sp(),
            lit: ast::Literal::Bool(b),
        }
    }

    fn lambda1(param: &str, body: Expr) -> Expr {
        Expr::Lambda {
            span: sp(),
            params: Params {
                ordered: vec![ast::Param {
                    name: ident(param),
                    annot: None,
                }],
                labeled: vec![],
                optional: vec![],
            },
            body: Box::new(Body::Pure(body)),
        }
    }

    fn apply1(callee: Expr, arg: Expr) -> Expr {
        Expr::Apply {
            span: sp(),
            callee: Box::new(callee),
            args: Args {
                ordered: vec![arg],
                labeled: vec![],
                optional: vec![],
            },
        }
    }

    fn let_in(name: &str, bound: Expr, body: Expr) -> Expr {
        Expr::Let {
            span: sp(),
            name: ident(name),
            bound: Box::new(bound),
            body: Box::new(body),
        }
    }

    fn setup() -> (Context, Primitives, Env) {
        let mut ctx = Context::new();
        let (env, prims) = primitives::install(&mut ctx);
        (ctx, prims, env)
    }

    #[test]
    fn identity_lambda_has_matching_ends() {
        let (mut ctx, prims, env) = setup();
        let ty = infer_expr(&mut ctx, &prims, &env, &lambda1("x", var("x"))).unwrap();
        match ty {
            TypeF::Fun(domain, codomain) => {
                assert_eq!(domain.ordered.len(), 1);
                assert_eq!(&domain.ordered[0], codomain.as_ref());
                assert!(matches!(*codomain, TypeF::Var(TypeVar::Free(_))));
            }
            other => panic!("expected function type, got {other}"),
        }
    }

    #[test]
    fn let_polymorphism_instantiates_per_use() {
        let (mut ctx, prims, env) = setup();
        // let id = fun x -> x in (id(3), id(true))
        let expr = let_in(
            "id",
            lambda1("x", var("x")),
            Expr::Tuple {
                span: sp(),
                items: vec![apply1(var("id"), int(3)), apply1(var("id"), boolean(true))],
            },
        );
        let ty = infer_expr(&mut ctx, &prims, &env, &expr).unwrap();
        assert_eq!(ty, TypeF::Product(vec![Type::int(), Type::bool()]));
    }

    #[test]
    fn unbound_variable_is_reported() {
        let (mut ctx, prims, env) = setup();
        let err = infer_expr(&mut ctx, &prims, &env, &var("nope")).unwrap_err();
        assert!(matches!(err, TypeError::UnboundVariable { name, .. } if name == intern("nope")));
    }

    #[test]
    fn if_arms_must_agree() {
        let (mut ctx, prims, env) = setup();
        let expr = Expr::If {
            span: sp(),
            cond: Box::new(boolean(true)),
            then_branch: Box::new(int(1)),
            else_branch: Box::new(boolean(false)),
        };
        let err = infer_expr(&mut ctx, &prims, &env, &expr).unwrap_err();
        assert!(matches!(err, TypeError::ContradictionError { .. }));
    }

    #[test]
    fn if_condition_must_be_bool() {
        let (mut ctx, prims, env) = setup();
        let expr = Expr::If {
            span: sp(),
            cond: Box::new(int(1)),
            then_branch: Box::new(int(1)),
            else_branch: Box::new(int(2)),
        };
        assert!(infer_expr(&mut ctx, &prims, &env, &expr).is_err());
    }

    #[test]
    fn self_application_fails_occurs_check() {
        let (mut ctx, prims, env) = setup();
        let expr = lambda1("x", apply1(var("x"), var("x")));
        let err = infer_expr(&mut ctx, &prims, &env, &expr).unwrap_err();
        assert!(matches!(err, TypeError::InclusionError { .. }));
    }

    #[test]
    fn unused_let_binding_warns() {
        let (mut ctx, prims, env) = setup();
        let expr = let_in("ignored", int(1), int(2));
        infer_expr(&mut ctx, &prims, &env, &expr).unwrap();
        let warnings = ctx.take_warnings();
        assert_eq!(warnings.len(), 1);
        assert!(matches!(
            &warnings[0],
            Warning::UnusedVariable { name, .. } if *name == intern("ignored")
        ));
    }

    #[test]
    fn option_constructor_applies() {
        let (mut ctx, prims, env) = setup();
        let expr = Expr::Ctor {
            span: sp(),
            path: vec![],
            name: intern("Some"),
            args: vec![int(5)],
        };
        let ty = infer_expr(&mut ctx, &prims, &env, &expr).unwrap();
        match ty {
            TypeF::Data(id, args) => {
                assert_eq!(id, crate::typechecker::types::TypeId::Variant(prims.option));
                assert_eq!(args, vec![Type::int()]);
            }
            other => panic!("expected option type, got {other}"),
        }
    }

    #[test]
    fn constructor_arity_is_checked() {
        let (mut ctx, prims, env) = setup();
        let expr = Expr::Ctor {
            span: sp(),
            path: vec![],
            name: intern("Some"),
            args: vec![],
        };
        let err = infer_expr(&mut ctx, &prims, &env, &expr).unwrap_err();
        assert!(matches!(
            err,
            TypeError::InvalidNumberOfConstructorArguments {
                expected: 1,
                found: 0,
                ..
            }
        ));
    }

    #[test]
    fn binary_literal_bytes_are_validated() {
        let (mut ctx, prims, env) = setup();
        let expr = Expr::Literal {
            span: sp(),
            lit: ast::Literal::Binary(vec![0, 255, 300]),
        };
        let err = infer_expr(&mut ctx, &prims, &env, &expr).unwrap_err();
        assert!(matches!(err, TypeError::InvalidByte { value: 300, .. }));
    }
}
