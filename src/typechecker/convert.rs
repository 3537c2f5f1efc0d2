//! Manual-type decoder: translates source-level type expressions, kinds,
//! and rows into internal form.

use std::collections::HashMap;

use crate::ast::{
    self, BaseKindExpr, DomainExpr, Ident, KindExpr, OptRowExpr, TypeExpr, TypeSchemeExpr,
};
use crate::interner::{self, Symbol};
use crate::typechecker::context::Context;
use crate::typechecker::env::{Env, ModuleEntry};
use crate::typechecker::error::TypeError;
use crate::typechecker::poly;
use crate::typechecker::types::{
    BaseKindF, BaseType, BoundId, BoundRowId, Domain, EffectF, Kind, LabelMap, MustBeBoundId,
    MustBeBoundRowId, PolyBaseKind, PolyType, Row, RowF, RowVar, SynonymId, Type, TypeF, TypeId,
    TypeVar,
};

/// Scope for decoding: the environment plus the rigid parameters bound
/// by the enclosing binder.
pub struct DecodeCtx<'e> {
    pub env: &'e Env,
    pub type_params: &'e HashMap<Symbol, MustBeBoundId>,
    pub row_params: &'e HashMap<Symbol, MustBeBoundRowId>,
}

/// Resolves a (possibly empty) module path against the environment.
/// Returns `None` for the empty path.
pub fn resolve_path<'e>(
    env: &'e Env,
    path: &[Ident],
) -> Result<Option<&'e ModuleEntry>, TypeError> {
    let Some(first) = path.first() else {
        return Ok(None);
    };
    let mut entry = env
        .find_module(first.value)
        .ok_or(TypeError::UnboundModuleName {
            span: first.span,
            name: first.value,
        })?;
    for segment in &path[1..] {
        let record = entry
            .sig
            .as_structure()
            .ok_or(TypeError::NotOfStructureType {
                span: segment.span,
                name: segment.value,
            })?;
        entry = record
            .find_module(segment.value)
            .ok_or(TypeError::UnboundModuleName {
                span: segment.span,
                name: segment.value,
            })?;
    }
    Ok(Some(entry))
}

/// Decodes a manual type, appending every synonym ID it references to
/// `deps` for the synonym-dependency graph.
pub fn decode_type_collecting(
    ctx: &mut Context,
    d: &DecodeCtx<'_>,
    te: &TypeExpr,
    deps: &mut Vec<SynonymId>,
) -> Result<Type, TypeError> {
    match te {
        TypeExpr::Name {
            span,
            path,
            name,
            args,
        } => decode_name(ctx, d, *span, path, name, args, deps),
        TypeExpr::TypeVar { span, name } => match d.type_params.get(name) {
            Some(mbbid) => Ok(TypeF::Var(TypeVar::MustBeBound(*mbbid))),
            None => Err(TypeError::UnboundTypeParameter {
                span: *span,
                name: *name,
            }),
        },
        TypeExpr::Fun { domain, codomain, .. } => {
            let domain = decode_domain(ctx, d, domain, deps)?;
            let codomain = decode_type_collecting(ctx, d, codomain, deps)?;
            Ok(Type::fun(domain, codomain))
        }
        TypeExpr::EffFun {
            domain,
            recv,
            codomain,
            ..
        } => {
            let domain = decode_domain(ctx, d, domain, deps)?;
            let recv = decode_type_collecting(ctx, d, recv, deps)?;
            let codomain = decode_type_collecting(ctx, d, codomain, deps)?;
            Ok(Type::eff(domain, EffectF(recv), codomain))
        }
        TypeExpr::Product { items, .. } => {
            let items = items
                .iter()
                .map(|item| decode_type_collecting(ctx, d, item, deps))
                .collect::<Result<_, _>>()?;
            Ok(TypeF::Product(items))
        }
        TypeExpr::Record { fields, .. } => {
            let fields = decode_label_map(ctx, d, fields, deps)?;
            Ok(TypeF::Record(fields))
        }
    }
}

/// Decodes a manual type without collecting dependencies.
pub fn decode_type(
    ctx: &mut Context,
    d: &DecodeCtx<'_>,
    te: &TypeExpr,
) -> Result<Type, TypeError> {
    let mut deps = Vec::new();
    decode_type_collecting(ctx, d, te, &mut deps)
}

fn decode_name(
    ctx: &mut Context,
    d: &DecodeCtx<'_>,
    span: crate::ast::Span,
    path: &[Ident],
    name: &Ident,
    args: &[TypeExpr],
    deps: &mut Vec<SynonymId>,
) -> Result<Type, TypeError> {
    let args: Vec<Type> = args
        .iter()
        .map(|arg| decode_type_collecting(ctx, d, arg, deps))
        .collect::<Result<_, _>>()?;

    // The scalar names and `pid` are built in; everything else resolves
    // against the environment.
    if path.is_empty() {
        if let Some(base) = base_type_of(name.value) {
            if !args.is_empty() {
                return Err(TypeError::InvalidNumberOfTypeArguments {
                    span,
                    name: name.value,
                    expected: 0,
                    found: args.len(),
                });
            }
            return Ok(TypeF::Base(base));
        }
        if interner::name_of(name.value) == "pid" {
            if args.len() != 1 {
                return Err(TypeError::InvalidNumberOfTypeArguments {
                    span,
                    name: name.value,
                    expected: 1,
                    found: args.len(),
                });
            }
            return Ok(Type::pid(args.into_iter().next().unwrap()));
        }
    }

    let entry = match resolve_path(d.env, path)? {
        None => d.env.find_type(name.value),
        Some(module) => {
            let record = module
                .sig
                .as_structure()
                .ok_or(TypeError::NotOfStructureType {
                    span: name.span,
                    name: name.value,
                })?;
            record.find_type(name.value)
        }
    };
    let entry = entry.ok_or(TypeError::UndefinedTypeName {
        span,
        name: name.value,
    })?;
    if entry.arity != args.len() {
        return Err(TypeError::InvalidNumberOfTypeArguments {
            span,
            name: name.value,
            expected: entry.arity,
            found: args.len(),
        });
    }
    if let TypeId::Synonym(sid) = entry.id {
        deps.push(sid);
    }
    Ok(TypeF::Data(entry.id, args))
}

fn base_type_of(name: Symbol) -> Option<BaseType> {
    match interner::name_of(name).as_str() {
        "unit" => Some(BaseType::Unit),
        "bool" => Some(BaseType::Bool),
        "int" => Some(BaseType::Int),
        "float" => Some(BaseType::Float),
        "char" => Some(BaseType::Char),
        "binary" => Some(BaseType::Binary),
        _ => None,
    }
}

fn decode_label_map(
    ctx: &mut Context,
    d: &DecodeCtx<'_>,
    fields: &[(Ident, TypeExpr)],
    deps: &mut Vec<SynonymId>,
) -> Result<LabelMap<Type>, TypeError> {
    let mut map = LabelMap::new();
    for (label, te) in fields {
        let ty = decode_type_collecting(ctx, d, te, deps)?;
        if map.insert(label.value, ty).is_some() {
            return Err(TypeError::DuplicatedLabel {
                span: label.span,
                label: label.value,
            });
        }
    }
    Ok(map)
}

fn decode_domain(
    ctx: &mut Context,
    d: &DecodeCtx<'_>,
    domain: &DomainExpr,
    deps: &mut Vec<SynonymId>,
) -> Result<Domain, TypeError> {
    let ordered = domain
        .ordered
        .iter()
        .map(|te| decode_type_collecting(ctx, d, te, deps))
        .collect::<Result<_, _>>()?;
    let mandatory = decode_label_map(ctx, d, &domain.labeled, deps)?;
    let optional = decode_opt_row(ctx, d, &domain.optional, deps)?;
    Ok(Domain {
        ordered,
        mandatory,
        optional,
    })
}

fn decode_opt_row(
    ctx: &mut Context,
    d: &DecodeCtx<'_>,
    row: &OptRowExpr,
    deps: &mut Vec<SynonymId>,
) -> Result<Row, TypeError> {
    match row {
        OptRowExpr::Fixed(fields) => Ok(RowF::Fixed(decode_label_map(ctx, d, fields, deps)?)),
        OptRowExpr::RowVar { span, name } => match d.row_params.get(name) {
            Some(mbbrid) => Ok(RowF::Var(RowVar::MustBeBound(*mbbrid))),
            None => Err(TypeError::UnboundRowParameter {
                span: *span,
                name: *name,
            }),
        },
    }
}

// ===== Kinds =====

fn decode_base_kind(
    ctx: &mut Context,
    d: &DecodeCtx<'_>,
    bke: &BaseKindExpr,
) -> Result<PolyBaseKind, TypeError> {
    match bke {
        BaseKindExpr::Name { span, name } => {
            if interner::name_of(*name) == "o" {
                Ok(BaseKindF::Universal)
            } else {
                Err(TypeError::UndefinedKindName {
                    span: *span,
                    name: *name,
                })
            }
        }
        BaseKindExpr::Record { fields, .. } => {
            let mut deps = Vec::new();
            let mono = decode_label_map(ctx, d, fields, &mut deps)?;
            Ok(BaseKindF::Record(
                mono.iter().map(|(l, t)| (*l, poly::lift(t))).collect(),
            ))
        }
    }
}

/// Decodes the declared kind of an opaque type.
pub fn decode_kind(
    ctx: &mut Context,
    d: &DecodeCtx<'_>,
    ke: &KindExpr,
) -> Result<Kind, TypeError> {
    let params = ke
        .params
        .iter()
        .map(|p| decode_base_kind(ctx, d, p))
        .collect::<Result<_, _>>()?;
    let ret = decode_base_kind(ctx, d, &ke.ret)?;
    Ok(Kind { params, ret })
}

// ===== Parameter maps =====

/// Introduces one rigid variable per type parameter of a binder.
pub fn make_type_param_map(
    ctx: &mut Context,
    params: &[Ident],
) -> Result<(HashMap<Symbol, MustBeBoundId>, Vec<BoundId>), TypeError> {
    let mut map = HashMap::new();
    let mut bids = Vec::new();
    for param in params {
        let bid = ctx.fresh_bound_id(BaseKindF::Universal);
        if map.insert(param.value, MustBeBoundId(bid)).is_some() {
            return Err(TypeError::TypeParameterBoundMoreThanOnce {
                span: param.span,
                name: param.value,
            });
        }
        bids.push(bid);
    }
    Ok((map, bids))
}

/// Introduces one rigid row variable per row parameter, registering the
/// handwritten label kind of each.
pub fn make_row_param_map(
    ctx: &mut Context,
    env: &Env,
    params: &[(Ident, Vec<(Ident, TypeExpr)>)],
    type_params: &HashMap<Symbol, MustBeBoundId>,
) -> Result<(HashMap<Symbol, MustBeBoundRowId>, Vec<BoundRowId>), TypeError> {
    let mut map = HashMap::new();
    let mut brids = Vec::new();
    let empty_rows = HashMap::new();
    for (param, kind_fields) in params {
        let d = DecodeCtx {
            env,
            type_params,
            row_params: &empty_rows,
        };
        let mut deps = Vec::new();
        let mono = decode_label_map(ctx, &d, kind_fields, &mut deps)?;
        let kind: LabelMap<PolyType> = mono.iter().map(|(l, t)| (*l, poly::lift(t))).collect();
        let brid = ctx.fresh_bound_row_id(kind);
        if map.insert(param.value, MustBeBoundRowId(brid)).is_some() {
            return Err(TypeError::RowParameterBoundMoreThanOnce {
                span: param.span,
                name: param.value,
            });
        }
        brids.push(brid);
    }
    Ok((map, brids))
}

/// Decodes a quantified manual type (as written in `val` declarations)
/// into a poly type: each declared parameter becomes a bound variable.
pub fn decode_scheme(
    ctx: &mut Context,
    env: &Env,
    scheme: &TypeSchemeExpr,
) -> Result<PolyType, TypeError> {
    let (type_params, _) = make_type_param_map(ctx, &scheme.type_params)?;
    let (row_params, _) = make_row_param_map(ctx, env, &scheme.row_params, &type_params)?;
    let d = DecodeCtx {
        env,
        type_params: &type_params,
        row_params: &row_params,
    };
    let ty = decode_type(ctx, &d, &scheme.body)?;
    // Rigid parameters become bound; no free variable can exceed the
    // ceiling level, so nothing else is quantified.
    poly::generalize(ctx, scheme.span, u32::MAX, &ty)
}

/// Decodes a type under an already-built parameter scope and converts
/// the rigid parameters to their bound form.
pub fn decode_poly_body(
    ctx: &mut Context,
    d: &DecodeCtx<'_>,
    te: &TypeExpr,
    deps: &mut Vec<SynonymId>,
) -> Result<PolyType, TypeError> {
    let ty = decode_type_collecting(ctx, d, te, deps)?;
    poly::generalize(ctx, te.span(), u32::MAX, &ty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Span;
    use crate::interner::intern;

    fn sp() -> Span {
        Span::synthetic()
    }

    fn ident(name: &str) -> Ident {
        Ident::new(intern(name), sp())
    }

    fn name_te(name: &str, args: Vec<TypeExpr>) -> TypeExpr {
        TypeExpr::Name {
            span: sp(),
            path: vec![],
            name: ident(name),
            args,
        }
    }

    #[test]
    fn scalar_names_are_builtin() {
        let mut ctx = Context::new();
        let env = Env::new();
        let d = DecodeCtx {
            env: &env,
            type_params: &HashMap::new(),
            row_params: &HashMap::new(),
        };
        assert_eq!(
            decode_type(&mut ctx, &d, &name_te("int", vec![])).unwrap(),
            Type::int()
        );
        assert_eq!(
            decode_type(&mut ctx, &d, &name_te("pid", vec![name_te("bool", vec![])])).unwrap(),
            Type::pid(Type::bool())
        );
    }

    #[test]
    fn unknown_name_is_undefined() {
        let mut ctx = Context::new();
        let env = Env::new();
        let d = DecodeCtx {
            env: &env,
            type_params: &HashMap::new(),
            row_params: &HashMap::new(),
        };
        let err = decode_type(&mut ctx, &d, &name_te("mystery", vec![])).unwrap_err();
        assert!(matches!(err, TypeError::UndefinedTypeName { .. }));
    }

    #[test]
    fn unbound_type_parameter_is_rejected() {
        let mut ctx = Context::new();
        let env = Env::new();
        let d = DecodeCtx {
            env: &env,
            type_params: &HashMap::new(),
            row_params: &HashMap::new(),
        };
        let te = TypeExpr::TypeVar {
            span: sp(),
            name: intern("a"),
        };
        let err = decode_type(&mut ctx, &d, &te).unwrap_err();
        assert!(matches!(err, TypeError::UnboundTypeParameter { .. }));
    }

    #[test]
    fn arity_is_checked_against_declaration() {
        use crate::typechecker::env::TypeEntry;
        let mut ctx = Context::new();
        let mut env = Env::new();
        let vid = ctx.fresh_variant_id(intern("pair"));
        env.add_type(
            intern("pair"),
            TypeEntry {
                id: TypeId::Variant(vid),
                arity: 2,
            },
        );
        let d = DecodeCtx {
            env: &env,
            type_params: &HashMap::new(),
            row_params: &HashMap::new(),
        };
        let err = decode_type(&mut ctx, &d, &name_te("pair", vec![name_te("int", vec![])]))
            .unwrap_err();
        assert!(matches!(
            err,
            TypeError::InvalidNumberOfTypeArguments {
                expected: 2,
                found: 1,
                ..
            }
        ));
    }

    #[test]
    fn scheme_quantifies_declared_parameters() {
        let mut ctx = Context::new();
        let env = Env::new();
        let scheme = TypeSchemeExpr {
            span: sp(),
            type_params: vec![ident("a")],
            row_params: vec![],
            body: TypeExpr::Fun {
                span: sp(),
                domain: DomainExpr {
                    ordered: vec![TypeExpr::TypeVar {
                        span: sp(),
                        name: intern("a"),
                    }],
                    labeled: vec![],
                    optional: OptRowExpr::Fixed(vec![]),
                },
                codomain: Box::new(TypeExpr::TypeVar {
                    span: sp(),
                    name: intern("a"),
                }),
            },
        };
        let pty = decode_scheme(&mut ctx, &env, &scheme).unwrap();
        match &pty {
            TypeF::Fun(domain, codomain) => {
                assert_eq!(&domain.ordered[0], codomain.as_ref());
                assert!(matches!(
                    codomain.as_ref(),
                    TypeF::Var(crate::typechecker::types::PolyTypeVar::Bound(_))
                ));
            }
            other => panic!("expected poly function type, got {other}"),
        }
    }

    #[test]
    fn duplicate_type_parameter_is_rejected() {
        let mut ctx = Context::new();
        let err = make_type_param_map(&mut ctx, &[ident("a"), ident("a")]).unwrap_err();
        assert!(matches!(err, TypeError::TypeParameterBoundMoreThanOnce { .. }));
    }

    #[test]
    fn kind_names_other_than_o_are_undefined() {
        let mut ctx = Context::new();
        let env = Env::new();
        let d = DecodeCtx {
            env: &env,
            type_params: &HashMap::new(),
            row_params: &HashMap::new(),
        };
        let ke = KindExpr {
            span: sp(),
            params: vec![],
            ret: BaseKindExpr::Name {
                span: sp(),
                name: intern("q"),
            },
        };
        let err = decode_kind(&mut ctx, &d, &ke).unwrap_err();
        assert!(matches!(err, TypeError::UndefinedKindName { .. }));
    }
}
