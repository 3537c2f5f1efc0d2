//! Level-based generalization and instantiation, plus the poly/mono
//! conversions the rest of the elaborator leans on.

use std::collections::{HashMap, HashSet};

use crate::ast::span::Span;
use crate::typechecker::context::Context;
use crate::typechecker::error::TypeError;
use crate::typechecker::types::{
    BaseKindF, BoundId, BoundRowId, DomainF, EffectF, FreeId, FreeRowId, FrozenF, PolyDomain,
    PolyRow, PolyRowVar, PolyType, PolyTypeVar, Row, RowF, RowVar, Type, TypeF, TypeVar,
};

/// Wraps a mono type as a poly type without quantifying anything.
pub fn lift(ty: &Type) -> PolyType {
    map_type(ty, &mut |tv| PolyTypeVar::Mono(tv), &mut |rv| PolyRowVar::Mono(rv))
}

/// Converts a poly type back to mono form if it quantifies nothing.
pub fn poly_to_mono(pty: &PolyType) -> Option<Type> {
    try_map_type(
        pty,
        &mut |ptv| match ptv {
            PolyTypeVar::Mono(tv) => Some(tv),
            PolyTypeVar::Bound(_) => None,
        },
        &mut |prv| match prv {
            PolyRowVar::Mono(rv) => Some(rv),
            PolyRowVar::Bound(_) => None,
        },
    )
}

/// Substitutes mono types for the bound variables of a poly type. Every
/// bound leaf must be covered by the maps; an uncovered leaf is a
/// programmer error since all bound IDs are registered at creation.
pub fn substitute(
    map: &HashMap<BoundId, Type>,
    row_map: &HashMap<BoundRowId, Row>,
    pty: &PolyType,
) -> Type {
    map_type_full(
        pty,
        &mut |ptv| match ptv {
            PolyTypeVar::Mono(tv) => TypeF::Var(tv),
            PolyTypeVar::Bound(bid) => map
                .get(&bid)
                .unwrap_or_else(|| panic!("unmapped bound id #{}", bid.0))
                .clone(),
        },
        &mut |prv| match prv {
            PolyRowVar::Mono(rv) => RowF::Var(rv),
            PolyRowVar::Bound(brid) => row_map
                .get(&brid)
                .unwrap_or_else(|| panic!("unmapped bound row id ?#{}", brid.0))
                .clone(),
        },
    )
}

/// Expands a type scheme (as stored for synonyms) at the given argument
/// list. The caller has already checked the arity.
pub fn apply_scheme(params: &[BoundId], body: &PolyType, args: &[Type]) -> Type {
    assert_eq!(params.len(), args.len(), "scheme arity mismatch");
    let map: HashMap<BoundId, Type> = params.iter().copied().zip(args.iter().cloned()).collect();
    substitute(&map, &HashMap::new(), body)
}

/// Expands a type scheme at poly-type arguments, staying in poly form.
/// Bound leaves other than the parameters survive untouched.
pub fn apply_scheme_poly(params: &[BoundId], body: &PolyType, args: &[PolyType]) -> PolyType {
    assert_eq!(params.len(), args.len(), "scheme arity mismatch");
    let map: HashMap<BoundId, PolyType> =
        params.iter().copied().zip(args.iter().cloned()).collect();
    map_type_full(
        body,
        &mut |ptv| match ptv {
            PolyTypeVar::Bound(bid) => match map.get(&bid) {
                Some(arg) => arg.clone(),
                None => TypeF::Var(PolyTypeVar::Bound(bid)),
            },
            mono => TypeF::Var(mono),
        },
        &mut |prv| RowF::Var(prv),
    )
}

// ===== Generalization =====

/// Generalizes `ty` at level `lev`: every free type or row variable
/// with a level strictly greater than `lev` becomes a fresh bound
/// variable whose kind is lifted to poly form and registered. Mono
/// leaves that remain have level <= `lev`. Rigid parameters generalize
/// to their carried bound ID.
///
/// Fails with `CyclicTypeParameter` if the record kinds of the
/// generalized variables depend on each other cyclically.
pub fn generalize(
    ctx: &mut Context,
    span: Span,
    lev: u32,
    ty: &Type,
) -> Result<PolyType, TypeError> {
    let mut gen = Generalizer {
        ctx,
        span,
        lev,
        map: HashMap::new(),
        row_map: HashMap::new(),
        in_progress: HashSet::new(),
        rows_in_progress: HashSet::new(),
    };
    gen.ty(ty)
}

struct Generalizer<'a> {
    ctx: &'a mut Context,
    span: Span,
    lev: u32,
    map: HashMap<FreeId, BoundId>,
    row_map: HashMap<FreeRowId, BoundRowId>,
    in_progress: HashSet<FreeId>,
    rows_in_progress: HashSet<FreeRowId>,
}

impl Generalizer<'_> {
    fn ty(&mut self, ty: &Type) -> Result<PolyType, TypeError> {
        match self.ctx.head(ty) {
            TypeF::Base(bt) => Ok(TypeF::Base(bt)),
            TypeF::Product(items) => Ok(TypeF::Product(
                items.iter().map(|t| self.ty(t)).collect::<Result<_, _>>()?,
            )),
            TypeF::Record(fields) => Ok(TypeF::Record(
                fields
                    .iter()
                    .map(|(l, t)| Ok((*l, self.ty(t)?)))
                    .collect::<Result<_, TypeError>>()?,
            )),
            TypeF::Data(id, args) => Ok(TypeF::Data(
                id,
                args.iter().map(|t| self.ty(t)).collect::<Result<_, _>>()?,
            )),
            TypeF::Fun(domain, codomain) => Ok(TypeF::Fun(
                Box::new(self.domain(&domain)?),
                Box::new(self.ty(&codomain)?),
            )),
            TypeF::Eff(domain, recv, codomain) => Ok(TypeF::Eff(
                Box::new(self.domain(&domain)?),
                Box::new(EffectF(self.ty(&recv.0)?)),
                Box::new(self.ty(&codomain)?),
            )),
            TypeF::Pid(inner) => Ok(TypeF::Pid(Box::new(self.ty(&inner)?))),
            TypeF::Frozen(frozen) => Ok(TypeF::Frozen(Box::new(FrozenF {
                rest: self.domain(&frozen.rest)?,
                recv: self.ty(&frozen.recv)?,
                ret: self.ty(&frozen.ret)?,
            }))),
            TypeF::Var(TypeVar::MustBeBound(mbbid)) => Ok(PolyType::bound(mbbid.0)),
            TypeF::Var(TypeVar::Free(fid)) => self.free_var(fid),
        }
    }

    fn free_var(&mut self, fid: FreeId) -> Result<PolyType, TypeError> {
        if self.ctx.tv_level(fid) <= self.lev {
            return Ok(TypeF::Var(PolyTypeVar::Mono(TypeVar::Free(fid))));
        }
        if let Some(bid) = self.map.get(&fid) {
            return Ok(PolyType::bound(*bid));
        }
        if !self.in_progress.insert(fid) {
            return Err(TypeError::CyclicTypeParameter { span: self.span });
        }
        let kind = match self.ctx.tv_kind(fid) {
            BaseKindF::Universal => BaseKindF::Universal,
            BaseKindF::Record(fields) => BaseKindF::Record(
                fields
                    .iter()
                    .map(|(l, t)| Ok((*l, self.ty(t)?)))
                    .collect::<Result<_, TypeError>>()?,
            ),
        };
        self.in_progress.remove(&fid);
        let bid = self.ctx.fresh_bound_id(kind);
        self.map.insert(fid, bid);
        Ok(PolyType::bound(bid))
    }

    fn domain(&mut self, domain: &DomainF<TypeVar, RowVar>) -> Result<PolyDomain, TypeError> {
        Ok(DomainF {
            ordered: domain
                .ordered
                .iter()
                .map(|t| self.ty(t))
                .collect::<Result<_, _>>()?,
            mandatory: domain
                .mandatory
                .iter()
                .map(|(l, t)| Ok((*l, self.ty(t)?)))
                .collect::<Result<_, TypeError>>()?,
            optional: self.row(&domain.optional)?,
        })
    }

    fn row(&mut self, row: &Row) -> Result<PolyRow, TypeError> {
        match self.ctx.row_head(row) {
            RowF::Fixed(fields) => Ok(RowF::Fixed(
                fields
                    .iter()
                    .map(|(l, t)| Ok((*l, self.ty(t)?)))
                    .collect::<Result<_, TypeError>>()?,
            )),
            RowF::Var(RowVar::MustBeBound(mbbrid)) => Ok(RowF::Var(PolyRowVar::Bound(mbbrid.0))),
            RowF::Var(RowVar::Free(frid)) => self.free_row_var(frid),
        }
    }

    fn free_row_var(&mut self, frid: FreeRowId) -> Result<PolyRow, TypeError> {
        if self.ctx.rv_level(frid) <= self.lev {
            return Ok(RowF::Var(PolyRowVar::Mono(RowVar::Free(frid))));
        }
        if let Some(brid) = self.row_map.get(&frid) {
            return Ok(RowF::Var(PolyRowVar::Bound(*brid)));
        }
        if !self.rows_in_progress.insert(frid) {
            return Err(TypeError::CyclicTypeParameter { span: self.span });
        }
        let kind = self
            .ctx
            .rv_kind(frid)
            .iter()
            .map(|(l, t)| Ok((*l, self.ty(t)?)))
            .collect::<Result<_, TypeError>>()?;
        self.rows_in_progress.remove(&frid);
        let brid = self.ctx.fresh_bound_row_id(kind);
        self.row_map.insert(frid, brid);
        Ok(RowF::Var(PolyRowVar::Bound(brid)))
    }
}

// ===== Instantiation =====

/// Instantiates a poly type at level `lev`: each bound variable becomes
/// a fresh free variable carrying the instantiated form of its
/// registered kind; bound rows become fresh free row variables likewise.
pub fn instantiate(ctx: &mut Context, lev: u32, pty: &PolyType) -> Type {
    let mut inst = Instantiator {
        ctx,
        lev,
        map: HashMap::new(),
        row_map: HashMap::new(),
    };
    inst.ty(pty)
}

/// Instantiates the parameters of a constructor or similar scheme:
/// returns one fresh variable per bound parameter together with the
/// parameter types instantiated at them.
pub fn instantiate_scheme(
    ctx: &mut Context,
    lev: u32,
    params: &[BoundId],
    ptys: &[PolyType],
) -> (Vec<Type>, Vec<Type>) {
    let mut inst = Instantiator {
        ctx,
        lev,
        map: HashMap::new(),
        row_map: HashMap::new(),
    };
    let args: Vec<Type> = params
        .iter()
        .map(|bid| Type::free(inst.visit_bound(*bid)))
        .collect();
    let tys = ptys.iter().map(|pty| inst.ty(pty)).collect();
    (args, tys)
}

struct Instantiator<'a> {
    ctx: &'a mut Context,
    lev: u32,
    map: HashMap<BoundId, FreeId>,
    row_map: HashMap<BoundRowId, FreeRowId>,
}

impl Instantiator<'_> {
    fn ty(&mut self, pty: &PolyType) -> Type {
        match pty {
            TypeF::Base(bt) => TypeF::Base(*bt),
            TypeF::Product(items) => TypeF::Product(items.iter().map(|t| self.ty(t)).collect()),
            TypeF::Record(fields) => {
                TypeF::Record(fields.iter().map(|(l, t)| (*l, self.ty(t))).collect())
            }
            TypeF::Data(id, args) => {
                TypeF::Data(*id, args.iter().map(|t| self.ty(t)).collect())
            }
            TypeF::Fun(domain, codomain) => {
                Type::fun(self.domain(domain), self.ty(codomain))
            }
            TypeF::Eff(domain, recv, codomain) => Type::eff(
                self.domain(domain),
                EffectF(self.ty(&recv.0)),
                self.ty(codomain),
            ),
            TypeF::Pid(inner) => Type::pid(self.ty(inner)),
            TypeF::Frozen(frozen) => TypeF::Frozen(Box::new(FrozenF {
                rest: self.domain(&frozen.rest),
                recv: self.ty(&frozen.recv),
                ret: self.ty(&frozen.ret),
            })),
            TypeF::Var(PolyTypeVar::Mono(tv)) => TypeF::Var(*tv),
            TypeF::Var(PolyTypeVar::Bound(bid)) => Type::free(self.visit_bound(*bid)),
        }
    }

    fn visit_bound(&mut self, bid: BoundId) -> FreeId {
        if let Some(fid) = self.map.get(&bid) {
            return *fid;
        }
        // Allocate first so a kind that mentions this bound id again
        // resolves to the same fresh variable.
        let fid = self.ctx.fresh_free_id(self.lev, BaseKindF::Universal);
        self.map.insert(bid, fid);
        let kind = self.ctx.bound_kind(bid).clone();
        if let BaseKindF::Record(fields) = kind {
            let mono = fields.iter().map(|(l, t)| (*l, self.ty(t))).collect();
            self.ctx.set_tv_kind(fid, BaseKindF::Record(mono));
        }
        fid
    }

    fn visit_bound_row(&mut self, brid: BoundRowId) -> FreeRowId {
        if let Some(frid) = self.row_map.get(&brid) {
            return *frid;
        }
        let frid = self.ctx.fresh_free_row_id(self.lev, Default::default());
        self.row_map.insert(brid, frid);
        let kind = self.ctx.bound_row_kind(brid).clone();
        let mono = kind.iter().map(|(l, t)| (*l, self.ty(t))).collect();
        self.ctx.set_rv_kind(frid, mono);
        frid
    }

    fn domain(&mut self, domain: &PolyDomain) -> DomainF<TypeVar, RowVar> {
        DomainF {
            ordered: domain.ordered.iter().map(|t| self.ty(t)).collect(),
            mandatory: domain.mandatory.iter().map(|(l, t)| (*l, self.ty(t))).collect(),
            optional: self.row(&domain.optional),
        }
    }

    fn row(&mut self, row: &PolyRow) -> Row {
        match row {
            RowF::Fixed(fields) => {
                RowF::Fixed(fields.iter().map(|(l, t)| (*l, self.ty(t))).collect())
            }
            RowF::Var(PolyRowVar::Mono(rv)) => RowF::Var(*rv),
            RowF::Var(PolyRowVar::Bound(brid)) => {
                RowF::Var(RowVar::Free(self.visit_bound_row(*brid)))
            }
        }
    }
}

// ===== Canonical form and equality =====

/// Deeply resolves the mono leaves of a poly type against the context.
pub fn poly_canonical(ctx: &mut Context, pty: &PolyType) -> PolyType {
    match pty {
        TypeF::Base(bt) => TypeF::Base(*bt),
        TypeF::Product(items) => {
            TypeF::Product(items.iter().map(|t| poly_canonical(ctx, t)).collect())
        }
        TypeF::Record(fields) => TypeF::Record(
            fields
                .iter()
                .map(|(l, t)| (*l, poly_canonical(ctx, t)))
                .collect(),
        ),
        TypeF::Data(id, args) => {
            TypeF::Data(*id, args.iter().map(|t| poly_canonical(ctx, t)).collect())
        }
        TypeF::Fun(domain, codomain) => TypeF::Fun(
            Box::new(poly_canonical_domain(ctx, domain)),
            Box::new(poly_canonical(ctx, codomain)),
        ),
        TypeF::Eff(domain, recv, codomain) => TypeF::Eff(
            Box::new(poly_canonical_domain(ctx, domain)),
            Box::new(EffectF(poly_canonical(ctx, &recv.0))),
            Box::new(poly_canonical(ctx, codomain)),
        ),
        TypeF::Pid(inner) => TypeF::Pid(Box::new(poly_canonical(ctx, inner))),
        TypeF::Frozen(frozen) => TypeF::Frozen(Box::new(FrozenF {
            rest: poly_canonical_domain(ctx, &frozen.rest),
            recv: poly_canonical(ctx, &frozen.recv),
            ret: poly_canonical(ctx, &frozen.ret),
        })),
        TypeF::Var(PolyTypeVar::Mono(tv)) => match tv {
            TypeVar::Free(_) => {
                let resolved = ctx.canonical(&TypeF::Var(*tv));
                lift(&resolved)
            }
            TypeVar::MustBeBound(_) => TypeF::Var(PolyTypeVar::Mono(*tv)),
        },
        TypeF::Var(PolyTypeVar::Bound(bid)) => TypeF::Var(PolyTypeVar::Bound(*bid)),
    }
}

fn poly_canonical_domain(ctx: &mut Context, domain: &PolyDomain) -> PolyDomain {
    DomainF {
        ordered: domain.ordered.iter().map(|t| poly_canonical(ctx, t)).collect(),
        mandatory: domain
            .mandatory
            .iter()
            .map(|(l, t)| (*l, poly_canonical(ctx, t)))
            .collect(),
        optional: match &domain.optional {
            RowF::Fixed(fields) => RowF::Fixed(
                fields
                    .iter()
                    .map(|(l, t)| (*l, poly_canonical(ctx, t)))
                    .collect(),
            ),
            RowF::Var(rv) => RowF::Var(*rv),
        },
    }
}

/// Structural equality of poly types up to a consistent renaming of
/// bound IDs and bound row IDs.
pub fn alpha_equal(p1: &PolyType, p2: &PolyType) -> bool {
    let mut map = HashMap::new();
    let mut row_map = HashMap::new();
    alpha_equal_aux(p1, p2, &mut map, &mut row_map)
}

fn alpha_equal_aux(
    p1: &PolyType,
    p2: &PolyType,
    map: &mut HashMap<BoundId, BoundId>,
    row_map: &mut HashMap<BoundRowId, BoundRowId>,
) -> bool {
    match (p1, p2) {
        (TypeF::Base(b1), TypeF::Base(b2)) => b1 == b2,
        (TypeF::Product(xs), TypeF::Product(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .zip(ys)
                    .all(|(x, y)| alpha_equal_aux(x, y, map, row_map))
        }
        (TypeF::Record(f1), TypeF::Record(f2)) => {
            f1.len() == f2.len()
                && f1.iter().zip(f2).all(|((l1, t1), (l2, t2))| {
                    l1 == l2 && alpha_equal_aux(t1, t2, map, row_map)
                })
        }
        (TypeF::Data(id1, a1), TypeF::Data(id2, a2)) => {
            id1 == id2
                && a1.len() == a2.len()
                && a1
                    .iter()
                    .zip(a2)
                    .all(|(x, y)| alpha_equal_aux(x, y, map, row_map))
        }
        (TypeF::Fun(d1, c1), TypeF::Fun(d2, c2)) => {
            alpha_equal_domain(d1, d2, map, row_map) && alpha_equal_aux(c1, c2, map, row_map)
        }
        (TypeF::Eff(d1, e1, c1), TypeF::Eff(d2, e2, c2)) => {
            alpha_equal_domain(d1, d2, map, row_map)
                && alpha_equal_aux(&e1.0, &e2.0, map, row_map)
                && alpha_equal_aux(c1, c2, map, row_map)
        }
        (TypeF::Pid(t1), TypeF::Pid(t2)) => alpha_equal_aux(t1, t2, map, row_map),
        (TypeF::Frozen(z1), TypeF::Frozen(z2)) => {
            alpha_equal_domain(&z1.rest, &z2.rest, map, row_map)
                && alpha_equal_aux(&z1.recv, &z2.recv, map, row_map)
                && alpha_equal_aux(&z1.ret, &z2.ret, map, row_map)
        }
        (TypeF::Var(PolyTypeVar::Mono(v1)), TypeF::Var(PolyTypeVar::Mono(v2))) => v1 == v2,
        (TypeF::Var(PolyTypeVar::Bound(b1)), TypeF::Var(PolyTypeVar::Bound(b2))) => {
            match map.get(b1) {
                Some(mapped) => mapped == b2,
                None => {
                    if map.values().any(|v| v == b2) {
                        return false;
                    }
                    map.insert(*b1, *b2);
                    true
                }
            }
        }
        _ => false,
    }
}

fn alpha_equal_domain(
    d1: &PolyDomain,
    d2: &PolyDomain,
    map: &mut HashMap<BoundId, BoundId>,
    row_map: &mut HashMap<BoundRowId, BoundRowId>,
) -> bool {
    if d1.ordered.len() != d2.ordered.len() || d1.mandatory.len() != d2.mandatory.len() {
        return false;
    }
    let ordered_ok = d1
        .ordered
        .iter()
        .zip(&d2.ordered)
        .all(|(x, y)| alpha_equal_aux(x, y, map, row_map));
    let mandatory_ok = d1.mandatory.iter().zip(&d2.mandatory).all(|((l1, t1), (l2, t2))| {
        l1 == l2 && alpha_equal_aux(t1, t2, map, row_map)
    });
    let optional_ok = match (&d1.optional, &d2.optional) {
        (RowF::Fixed(f1), RowF::Fixed(f2)) => {
            f1.len() == f2.len()
                && f1.iter().zip(f2).all(|((l1, t1), (l2, t2))| {
                    l1 == l2 && alpha_equal_aux(t1, t2, map, row_map)
                })
        }
        (RowF::Var(PolyRowVar::Mono(r1)), RowF::Var(PolyRowVar::Mono(r2))) => r1 == r2,
        (RowF::Var(PolyRowVar::Bound(b1)), RowF::Var(PolyRowVar::Bound(b2))) => {
            match row_map.get(b1) {
                Some(mapped) => mapped == b2,
                None => {
                    if row_map.values().any(|v| v == b2) {
                        return false;
                    }
                    row_map.insert(*b1, *b2);
                    true
                }
            }
        }
        _ => false,
    };
    ordered_ok && mandatory_ok && optional_ok
}

// ===== Structure-preserving maps =====

fn map_type<V: Copy, R: Copy, V2, R2>(
    ty: &TypeF<V, R>,
    fv: &mut impl FnMut(V) -> V2,
    fr: &mut impl FnMut(R) -> R2,
) -> TypeF<V2, R2> {
    map_type_full(ty, &mut |v| TypeF::Var(fv(v)), &mut |r| RowF::Var(fr(r)))
}

fn map_type_full<V: Copy, R: Copy, V2, R2>(
    ty: &TypeF<V, R>,
    fv: &mut impl FnMut(V) -> TypeF<V2, R2>,
    fr: &mut impl FnMut(R) -> RowF<V2, R2>,
) -> TypeF<V2, R2> {
    match ty {
        TypeF::Base(bt) => TypeF::Base(*bt),
        TypeF::Product(items) => {
            TypeF::Product(items.iter().map(|t| map_type_full(t, fv, fr)).collect())
        }
        TypeF::Record(fields) => TypeF::Record(
            fields
                .iter()
                .map(|(l, t)| (*l, map_type_full(t, fv, fr)))
                .collect(),
        ),
        TypeF::Data(id, args) => TypeF::Data(
            *id,
            args.iter().map(|t| map_type_full(t, fv, fr)).collect(),
        ),
        TypeF::Fun(domain, codomain) => TypeF::Fun(
            Box::new(map_domain_full(domain, fv, fr)),
            Box::new(map_type_full(codomain, fv, fr)),
        ),
        TypeF::Eff(domain, recv, codomain) => TypeF::Eff(
            Box::new(map_domain_full(domain, fv, fr)),
            Box::new(EffectF(map_type_full(&recv.0, fv, fr))),
            Box::new(map_type_full(codomain, fv, fr)),
        ),
        TypeF::Pid(inner) => TypeF::Pid(Box::new(map_type_full(inner, fv, fr))),
        TypeF::Frozen(frozen) => TypeF::Frozen(Box::new(FrozenF {
            rest: map_domain_full(&frozen.rest, fv, fr),
            recv: map_type_full(&frozen.recv, fv, fr),
            ret: map_type_full(&frozen.ret, fv, fr),
        })),
        TypeF::Var(v) => fv(*v),
    }
}

fn map_domain_full<V: Copy, R: Copy, V2, R2>(
    domain: &DomainF<V, R>,
    fv: &mut impl FnMut(V) -> TypeF<V2, R2>,
    fr: &mut impl FnMut(R) -> RowF<V2, R2>,
) -> DomainF<V2, R2> {
    DomainF {
        ordered: domain
            .ordered
            .iter()
            .map(|t| map_type_full(t, fv, fr))
            .collect(),
        mandatory: domain
            .mandatory
            .iter()
            .map(|(l, t)| (*l, map_type_full(t, fv, fr)))
            .collect(),
        optional: match &domain.optional {
            RowF::Fixed(fields) => RowF::Fixed(
                fields
                    .iter()
                    .map(|(l, t)| (*l, map_type_full(t, fv, fr)))
                    .collect(),
            ),
            RowF::Var(r) => fr(*r),
        },
    }
}

fn try_map_type<V: Copy, R: Copy, V2, R2>(
    ty: &TypeF<V, R>,
    fv: &mut impl FnMut(V) -> Option<V2>,
    fr: &mut impl FnMut(R) -> Option<R2>,
) -> Option<TypeF<V2, R2>> {
    match ty {
        TypeF::Base(bt) => Some(TypeF::Base(*bt)),
        TypeF::Product(items) => Some(TypeF::Product(
            items
                .iter()
                .map(|t| try_map_type(t, fv, fr))
                .collect::<Option<_>>()?,
        )),
        TypeF::Record(fields) => Some(TypeF::Record(
            fields
                .iter()
                .map(|(l, t)| Some((*l, try_map_type(t, fv, fr)?)))
                .collect::<Option<_>>()?,
        )),
        TypeF::Data(id, args) => Some(TypeF::Data(
            *id,
            args.iter()
                .map(|t| try_map_type(t, fv, fr))
                .collect::<Option<_>>()?,
        )),
        TypeF::Fun(domain, codomain) => Some(TypeF::Fun(
            Box::new(try_map_domain(domain, fv, fr)?),
            Box::new(try_map_type(codomain, fv, fr)?),
        )),
        TypeF::Eff(domain, recv, codomain) => Some(TypeF::Eff(
            Box::new(try_map_domain(domain, fv, fr)?),
            Box::new(EffectF(try_map_type(&recv.0, fv, fr)?)),
            Box::new(try_map_type(codomain, fv, fr)?),
        )),
        TypeF::Pid(inner) => Some(TypeF::Pid(Box::new(try_map_type(inner, fv, fr)?))),
        TypeF::Frozen(frozen) => Some(TypeF::Frozen(Box::new(FrozenF {
            rest: try_map_domain(&frozen.rest, fv, fr)?,
            recv: try_map_type(&frozen.recv, fv, fr)?,
            ret: try_map_type(&frozen.ret, fv, fr)?,
        }))),
        TypeF::Var(v) => Some(TypeF::Var(fv(*v)?)),
    }
}

fn try_map_domain<V: Copy, R: Copy, V2, R2>(
    domain: &DomainF<V, R>,
    fv: &mut impl FnMut(V) -> Option<V2>,
    fr: &mut impl FnMut(R) -> Option<R2>,
) -> Option<DomainF<V2, R2>> {
    Some(DomainF {
        ordered: domain
            .ordered
            .iter()
            .map(|t| try_map_type(t, fv, fr))
            .collect::<Option<_>>()?,
        mandatory: domain
            .mandatory
            .iter()
            .map(|(l, t)| Some((*l, try_map_type(t, fv, fr)?)))
            .collect::<Option<_>>()?,
        optional: match &domain.optional {
            RowF::Fixed(fields) => RowF::Fixed(
                fields
                    .iter()
                    .map(|(l, t)| Some((*l, try_map_type(t, fv, fr)?)))
                    .collect::<Option<_>>()?,
            ),
            RowF::Var(r) => RowF::Var(fr(*r)?),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::span::Span;
    use crate::typechecker::types::Domain;

    #[test]
    fn generalize_then_instantiate_keeps_shape() {
        let mut ctx = Context::new();
        let a = ctx.fresh_type_var(1);
        let ty = Type::fun(Domain::ordered(vec![a.clone()]), a);
        let pty = generalize(&mut ctx, Span::synthetic(), 0, &ty).unwrap();
        match &pty {
            TypeF::Fun(domain, codomain) => {
                assert_eq!(domain.ordered.len(), 1);
                assert_eq!(&domain.ordered[0], codomain.as_ref());
                assert!(matches!(
                    codomain.as_ref(),
                    TypeF::Var(PolyTypeVar::Bound(_))
                ));
            }
            other => panic!("expected function poly type, got {other}"),
        }
        let inst = instantiate(&mut ctx, 0, &pty);
        match inst {
            TypeF::Fun(domain, codomain) => {
                assert_eq!(&domain.ordered[0], codomain.as_ref());
                assert!(matches!(*codomain, TypeF::Var(TypeVar::Free(_))));
            }
            other => panic!("expected function type, got {other}"),
        }
    }

    #[test]
    fn low_level_variables_stay_mono() {
        let mut ctx = Context::new();
        let a = ctx.fresh_type_var(0);
        let pty = generalize(&mut ctx, Span::synthetic(), 0, &a).unwrap();
        assert!(matches!(pty, TypeF::Var(PolyTypeVar::Mono(_))));
    }

    #[test]
    fn repeated_variable_shares_one_bound_id() {
        let mut ctx = Context::new();
        let a = ctx.fresh_type_var(1);
        let ty = TypeF::Product(vec![a.clone(), a.clone(), Type::int()]);
        let pty = generalize(&mut ctx, Span::synthetic(), 0, &ty).unwrap();
        match pty {
            TypeF::Product(items) => {
                assert_eq!(items[0], items[1]);
                assert_eq!(items[2], TypeF::Base(crate::typechecker::types::BaseType::Int));
            }
            other => panic!("expected product, got {other}"),
        }
    }

    #[test]
    fn alpha_equality_renames_consistently() {
        let mut ctx = Context::new();
        let mk = |ctx: &mut Context| {
            let a = ctx.fresh_type_var(1);
            let ty = Type::fun(Domain::ordered(vec![a.clone()]), a);
            generalize(ctx, Span::synthetic(), 0, &ty).unwrap()
        };
        let p1 = mk(&mut ctx);
        let p2 = mk(&mut ctx);
        assert_ne!(p1, p2);
        assert!(alpha_equal(&p1, &p2));
    }

    #[test]
    fn self_referential_record_kind_is_cyclic() {
        let mut ctx = Context::new();
        let fid = ctx.fresh_free_id(1, BaseKindF::Universal);
        let mut kind = crate::typechecker::types::LabelMap::new();
        kind.insert(crate::interner::intern("me"), Type::free(fid));
        ctx.set_tv_kind(fid, BaseKindF::Record(kind));
        let err = generalize(&mut ctx, Span::synthetic(), 0, &Type::free(fid)).unwrap_err();
        assert!(matches!(err, TypeError::CyclicTypeParameter { .. }));
    }
}
