//! The built-ins table: the initial environment handed to elaboration.
//!
//! Registers the `list`, `option`, and `format` type formers, the
//! `option` constructors used by optional-argument elaboration, and the
//! typed process primitives (`spawn`, `self`, `send`) the target runtime
//! implements.

use indexmap::IndexMap;

use crate::interner::{intern, Symbol};
use crate::typechecker::context::{Context, CtorDef, VariantDef};
use crate::typechecker::env::{CtorEntry, Env, TypeEntry, ValEntry, ValName};
use crate::typechecker::types::{
    BaseKindF, BaseType, CtorId, DomainF, EffectF, PolyDomain, PolyType, RowF, TypeF, TypeId,
    VariantId,
};

/// Handles to the built-in type formers, needed throughout inference.
#[derive(Debug, Clone, Copy)]
pub struct Primitives {
    pub list: VariantId,
    pub option: VariantId,
    pub format: VariantId,
    pub some_ctor: CtorId,
    pub none_ctor: CtorId,
}

/// The output space the runtime primitives live in.
pub fn primitive_space() -> Symbol {
    intern("sest_primitives")
}

/// Installs the primitives into a fresh environment.
pub fn install(ctx: &mut Context) -> (Env, Primitives) {
    let mut env = Env::new();

    // list<'a>: built-in data type with native syntax, no source
    // constructors.
    let list = ctx.fresh_variant_id(intern("list"));
    let list_param = ctx.fresh_bound_id(BaseKindF::Universal);
    ctx.register_variant(
        list,
        VariantDef {
            params: vec![list_param],
            ctors: IndexMap::new(),
        },
    );
    env.add_type(
        intern("list"),
        TypeEntry {
            id: TypeId::Variant(list),
            arity: 1,
        },
    );

    // option<'a> with None and Some.
    let option = ctx.fresh_variant_id(intern("option"));
    let option_param = ctx.fresh_bound_id(BaseKindF::Universal);
    let none_ctor = ctx.fresh_ctor_id(intern("None"));
    let some_ctor = ctx.fresh_ctor_id(intern("Some"));
    let mut option_ctors = IndexMap::new();
    option_ctors.insert(
        intern("None"),
        CtorDef {
            id: none_ctor,
            params: vec![],
        },
    );
    option_ctors.insert(
        intern("Some"),
        CtorDef {
            id: some_ctor,
            params: vec![PolyType::bound(option_param)],
        },
    );
    ctx.register_variant(
        option,
        VariantDef {
            params: vec![option_param],
            ctors: option_ctors,
        },
    );
    env.add_type(
        intern("option"),
        TypeEntry {
            id: TypeId::Variant(option),
            arity: 1,
        },
    );
    env.add_ctor(
        intern("None"),
        CtorEntry {
            variant: option,
            ctor: none_ctor,
            params: vec![option_param],
            arg_types: vec![],
        },
    );
    env.add_ctor(
        intern("Some"),
        CtorEntry {
            variant: option,
            ctor: some_ctor,
            params: vec![option_param],
            arg_types: vec![PolyType::bound(option_param)],
        },
    );

    // format<'a>: the type of format-string literals; the parameter is
    // the product of the hole types.
    let format = ctx.fresh_variant_id(intern("format"));
    let format_param = ctx.fresh_bound_id(BaseKindF::Universal);
    ctx.register_variant(
        format,
        VariantDef {
            params: vec![format_param],
            ctors: IndexMap::new(),
        },
    );
    env.add_type(
        intern("format"),
        TypeEntry {
            id: TypeId::Variant(format),
            arity: 1,
        },
    );

    let prims = Primitives {
        list,
        option,
        format,
        some_ctor,
        none_ctor,
    };

    install_process_primitives(ctx, &mut env);

    (env, prims)
}

/// `spawn`, `self`, and `send`, typed against the process model:
///
/// ```text
/// val spawn<$p, $q> : fun(fun() -[$q]-> unit) -[$p]-> pid<$q>
/// val self<$p>      : fun() -[$p]-> pid<$p>
/// val send<$p, $q>  : fun(pid<$q>, $q) -[$p]-> unit
/// ```
fn install_process_primitives(ctx: &mut Context, env: &mut Env) {
    let space = primitive_space();

    let empty_domain = || PolyDomain {
        ordered: vec![],
        mandatory: Default::default(),
        optional: RowF::Fixed(Default::default()),
    };

    // spawn
    {
        let p = ctx.fresh_bound_id(BaseKindF::Universal);
        let q = ctx.fresh_bound_id(BaseKindF::Universal);
        let thunk: PolyType = TypeF::Eff(
            Box::new(empty_domain()),
            Box::new(EffectF(PolyType::bound(q))),
            Box::new(TypeF::Base(BaseType::Unit)),
        );
        let pty: PolyType = TypeF::Eff(
            Box::new(PolyDomain {
                ordered: vec![thunk],
                mandatory: Default::default(),
                optional: RowF::Fixed(Default::default()),
            }),
            Box::new(EffectF(PolyType::bound(p))),
            Box::new(TypeF::Pid(Box::new(PolyType::bound(q)))),
        );
        let name = intern("spawn");
        let gname = ctx.fresh_global_name(space, name, 1);
        env.add_val(
            name,
            ValEntry {
                pty,
                name: ValName::Global(gname),
            },
        );
    }

    // self
    {
        let p = ctx.fresh_bound_id(BaseKindF::Universal);
        let pty: PolyType = TypeF::Eff(
            Box::new(empty_domain()),
            Box::new(EffectF(PolyType::bound(p))),
            Box::new(TypeF::Pid(Box::new(PolyType::bound(p)))),
        );
        let name = intern("self");
        let gname = ctx.fresh_global_name(space, name, 0);
        env.add_val(
            name,
            ValEntry {
                pty,
                name: ValName::Global(gname),
            },
        );
    }

    // send
    {
        let p = ctx.fresh_bound_id(BaseKindF::Universal);
        let q = ctx.fresh_bound_id(BaseKindF::Universal);
        let pty: PolyType = TypeF::Eff(
            Box::new(DomainF {
                ordered: vec![
                    TypeF::Pid(Box::new(PolyType::bound(q))),
                    PolyType::bound(q),
                ],
                mandatory: Default::default(),
                optional: RowF::Fixed(Default::default()),
            }),
            Box::new(EffectF(PolyType::bound(p))),
            Box::new(TypeF::Base(BaseType::Unit)),
        );
        let name = intern("send");
        let gname = ctx.fresh_global_name(space, name, 2);
        env.add_val(
            name,
            ValEntry {
                pty,
                name: ValName::Global(gname),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_type_formers_are_registered() {
        let mut ctx = Context::new();
        let (env, prims) = install(&mut ctx);
        assert_eq!(env.find_type(intern("list")).unwrap().arity, 1);
        assert_eq!(env.find_type(intern("option")).unwrap().arity, 1);
        assert_eq!(env.find_type(intern("format")).unwrap().arity, 1);
        assert_eq!(ctx.variant_def(prims.option).ctors.len(), 2);
        assert!(ctx.variant_def(prims.list).ctors.is_empty());
    }

    #[test]
    fn option_constructors_resolve() {
        let mut ctx = Context::new();
        let (env, prims) = install(&mut ctx);
        let some = env.find_ctor(intern("Some")).unwrap();
        assert_eq!(some.variant, prims.option);
        assert_eq!(some.arg_types.len(), 1);
        let none = env.find_ctor(intern("None")).unwrap();
        assert!(none.arg_types.is_empty());
    }
}
