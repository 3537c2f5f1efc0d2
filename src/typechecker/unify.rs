//! Equational solver across types, effects, domains, rows, and record
//! kinds.
//!
//! The internal result mirrors the solver's three failure modes; it is
//! combined with a short-circuit at every level and only reified into a
//! `TypeError` by the outermost drivers at the bottom of this file.
//! Failure may leave variables linked along the successful prefix; the
//! caller aborts elaboration of the binding, so no rollback is needed.

use std::collections::HashSet;

use crate::ast::span::Span;
use crate::typechecker::context::Context;
use crate::typechecker::error::TypeError;
use crate::typechecker::poly;
use crate::typechecker::types::{
    BaseKindF, Domain, Effect, FreeId, FreeRowId, LabelMap, Row, RowF, RowVar, Type, TypeF,
    TypeId, TypeVar,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnifyRes {
    Consistent,
    Contradiction,
    /// Occurs-check failure on a type variable.
    Inclusion(FreeId),
    /// Occurs-check failure on a row variable.
    InclusionRow(FreeRowId),
}

use UnifyRes::*;

impl UnifyRes {
    fn ok(&self) -> bool {
        matches!(self, Consistent)
    }
}

pub(crate) struct Unifier<'a> {
    pub ctx: &'a mut Context,
}

impl Unifier<'_> {
    pub(crate) fn types(&mut self, lhs: &Type, rhs: &Type) -> UnifyRes {
        let t1 = self.ctx.head(lhs);
        let t2 = self.ctx.head(rhs);

        // Synonyms are expanded eagerly to their bodies.
        if let TypeF::Data(TypeId::Synonym(sid), args) = &t1 {
            let body = self.expand_synonym(*sid, args);
            return self.types(&body, &t2);
        }
        if let TypeF::Data(TypeId::Synonym(sid), args) = &t2 {
            let body = self.expand_synonym(*sid, args);
            return self.types(&t1, &body);
        }

        match (&t1, &t2) {
            (TypeF::Var(TypeVar::Free(f1)), TypeF::Var(TypeVar::Free(f2))) => {
                if f1 == f2 {
                    Consistent
                } else {
                    self.merge_free_vars(*f1, *f2)
                }
            }
            (TypeF::Var(TypeVar::Free(fid)), _) => self.link_free_var(*fid, &t2),
            (_, TypeF::Var(TypeVar::Free(fid))) => self.link_free_var(*fid, &t1),
            (TypeF::Var(TypeVar::MustBeBound(m1)), TypeF::Var(TypeVar::MustBeBound(m2))) => {
                if m1 == m2 {
                    Consistent
                } else {
                    Contradiction
                }
            }
            (TypeF::Var(TypeVar::MustBeBound(_)), _)
            | (_, TypeF::Var(TypeVar::MustBeBound(_))) => Contradiction,
            (TypeF::Base(b1), TypeF::Base(b2)) => {
                if b1 == b2 {
                    Consistent
                } else {
                    Contradiction
                }
            }
            (TypeF::Product(xs), TypeF::Product(ys)) => self.type_lists(xs, ys),
            (TypeF::Record(f1), TypeF::Record(f2)) => self.label_maps_exact(f1, f2),
            (TypeF::Data(id1, a1), TypeF::Data(id2, a2)) => {
                // Only variants and opaques remain here; both are nominal.
                if id1 != id2 {
                    return Contradiction;
                }
                self.type_lists(a1, a2)
            }
            (TypeF::Fun(d1, c1), TypeF::Fun(d2, c2)) => {
                let res = self.domains(d1, d2);
                if !res.ok() {
                    return res;
                }
                self.types(c1, c2)
            }
            (TypeF::Eff(d1, e1, c1), TypeF::Eff(d2, e2, c2)) => {
                let res = self.domains(d1, d2);
                if !res.ok() {
                    return res;
                }
                let res = self.types(&e1.0, &e2.0);
                if !res.ok() {
                    return res;
                }
                self.types(c1, c2)
            }
            (TypeF::Pid(p1), TypeF::Pid(p2)) => self.types(p1, p2),
            (TypeF::Frozen(z1), TypeF::Frozen(z2)) => {
                let res = self.domains(&z1.rest, &z2.rest);
                if !res.ok() {
                    return res;
                }
                let res = self.types(&z1.recv, &z2.recv);
                if !res.ok() {
                    return res;
                }
                self.types(&z1.ret, &z2.ret)
            }
            _ => Contradiction,
        }
    }

    fn type_lists(&mut self, xs: &[Type], ys: &[Type]) -> UnifyRes {
        if xs.len() != ys.len() {
            return Contradiction;
        }
        for (x, y) in xs.iter().zip(ys) {
            let res = self.types(x, y);
            if !res.ok() {
                return res;
            }
        }
        Consistent
    }

    /// Unifies two label maps that must have exactly the same key set.
    fn label_maps_exact(&mut self, f1: &LabelMap<Type>, f2: &LabelMap<Type>) -> UnifyRes {
        if f1.len() != f2.len() || f1.keys().any(|l| !f2.contains_key(l)) {
            return Contradiction;
        }
        for (label, t1) in f1 {
            let res = self.types(t1, &f2[label]);
            if !res.ok() {
                return res;
            }
        }
        Consistent
    }

    pub(crate) fn domains(&mut self, d1: &Domain, d2: &Domain) -> UnifyRes {
        if d1.ordered.len() != d2.ordered.len() {
            return Contradiction;
        }
        let res = self.type_lists(&d1.ordered, &d2.ordered);
        if !res.ok() {
            return res;
        }
        let res = self.label_maps_exact(&d1.mandatory, &d2.mandatory);
        if !res.ok() {
            return res;
        }
        self.rows(&d1.optional, &d2.optional)
    }

    pub(crate) fn effects(&mut self, e1: &Effect, e2: &Effect) -> UnifyRes {
        self.types(&e1.0, &e2.0)
    }

    // ----- variables -----

    /// Merges two distinct free variables: the left is linked to the
    /// right, which receives the merged record kind and the lower level.
    fn merge_free_vars(&mut self, f1: FreeId, f2: FreeId) -> UnifyRes {
        let lev = self.ctx.tv_level(f1).min(self.ctx.tv_level(f2));
        let k1 = self.ctx.tv_kind(f1);
        let k2 = self.ctx.tv_kind(f2);
        let merged = match (k1, k2) {
            (BaseKindF::Universal, k) | (k, BaseKindF::Universal) => k,
            (BaseKindF::Record(m1), BaseKindF::Record(m2)) => {
                let mut union = m2.clone();
                for (label, t1) in &m1 {
                    match m2.get(label) {
                        Some(t2) => {
                            let res = self.types(t1, t2);
                            if !res.ok() {
                                return res;
                            }
                        }
                        None => {
                            union.insert(*label, t1.clone());
                        }
                    }
                }
                BaseKindF::Record(union)
            }
        };
        self.ctx.link_tv(f1, Type::free(f2));
        self.ctx.set_tv_kind(f2, merged);
        self.ctx.lower_tv_level(f2, lev);
        Consistent
    }

    /// Links a free variable to a non-variable type, after the occurs
    /// check (which also lowers levels) and the record-kind check.
    fn link_free_var(&mut self, fid: FreeId, ty: &Type) -> UnifyRes {
        let lev = self.ctx.tv_level(fid);
        let mut occurs = Occurs::new(self.ctx, lev);
        if occurs.in_type(Needle::Ty(fid), ty) {
            return Inclusion(fid);
        }
        match self.ctx.tv_kind(fid) {
            BaseKindF::Universal => {}
            BaseKindF::Record(kind_fields) => {
                let TypeF::Record(record_fields) = ty else {
                    return Contradiction;
                };
                for (label, required) in &kind_fields {
                    let Some(actual) = record_fields.get(label) else {
                        return Contradiction;
                    };
                    let res = self.types(required, actual);
                    if !res.ok() {
                        return res;
                    }
                }
            }
        }
        self.ctx.link_tv(fid, ty.clone());
        Consistent
    }

    // ----- rows -----

    pub(crate) fn rows(&mut self, lhs: &Row, rhs: &Row) -> UnifyRes {
        let r1 = self.ctx.row_head(lhs);
        let r2 = self.ctx.row_head(rhs);
        match (&r1, &r2) {
            (RowF::Var(RowVar::Free(a)), RowF::Var(RowVar::Free(b))) => {
                if a == b {
                    Consistent
                } else {
                    self.merge_free_rows(*a, *b)
                }
            }
            (RowF::Var(RowVar::Free(frid)), RowF::Fixed(fields))
            | (RowF::Fixed(fields), RowF::Var(RowVar::Free(frid))) => {
                self.link_free_row(*frid, fields)
            }
            (RowF::Var(RowVar::MustBeBound(m1)), RowF::Var(RowVar::MustBeBound(m2))) => {
                if m1 == m2 {
                    Consistent
                } else {
                    Contradiction
                }
            }
            (RowF::Var(RowVar::MustBeBound(_)), _)
            | (_, RowF::Var(RowVar::MustBeBound(_))) => Contradiction,
            (RowF::Fixed(f1), RowF::Fixed(f2)) => self.label_maps_exact(f1, f2),
        }
    }

    /// Merges two free row variables: union of the label kinds with the
    /// intersection unified entry-wise; the left links to the right.
    fn merge_free_rows(&mut self, a: FreeRowId, b: FreeRowId) -> UnifyRes {
        let lev = self.ctx.rv_level(a).min(self.ctx.rv_level(b));
        let ka = self.ctx.rv_kind(a);
        let kb = self.ctx.rv_kind(b);
        let mut union = kb.clone();
        for (label, t1) in &ka {
            match kb.get(label) {
                Some(t2) => {
                    let res = self.types(t1, t2);
                    if !res.ok() {
                        return res;
                    }
                }
                None => {
                    union.insert(*label, t1.clone());
                }
            }
        }
        self.ctx.link_rv(a, RowF::Var(RowVar::Free(b)));
        self.ctx.set_rv_kind(b, union);
        self.ctx.lower_rv_level(b, lev);
        Consistent
    }

    /// Links a free row variable to a fixed row: occurs on the row, then
    /// superset-and-unify against the stored label kind.
    fn link_free_row(&mut self, frid: FreeRowId, fields: &LabelMap<Type>) -> UnifyRes {
        let lev = self.ctx.rv_level(frid);
        {
            let mut occurs = Occurs::new(self.ctx, lev);
            let mut found = false;
            for ty in fields.values() {
                found |= occurs.in_type(Needle::Row(frid), ty);
            }
            if found {
                return InclusionRow(frid);
            }
        }
        let kind = self.ctx.rv_kind(frid);
        for (label, required) in &kind {
            let Some(actual) = fields.get(label) else {
                return Contradiction;
            };
            let res = self.types(required, actual);
            if !res.ok() {
                return res;
            }
        }
        self.ctx.link_rv(frid, RowF::Fixed(fields.clone()));
        Consistent
    }

    // ----- synonym expansion -----

    fn expand_synonym(&mut self, sid: crate::typechecker::types::SynonymId, args: &[Type]) -> Type {
        let def = self.ctx.synonym_def(sid).clone();
        poly::apply_scheme(&def.params, &def.body, args)
    }
}

// ===== Occurs check =====

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Needle {
    Ty(FreeId),
    Row(FreeRowId),
}

/// Walks a term looking for a variable while lowering the level of every
/// free type and row variable it passes. The walk never short-circuits:
/// level lowering must reach the whole term even after the needle is
/// found.
struct Occurs<'a> {
    ctx: &'a mut Context,
    lev: u32,
    seen_tys: HashSet<FreeId>,
    seen_rows: HashSet<FreeRowId>,
}

impl<'a> Occurs<'a> {
    fn new(ctx: &'a mut Context, lev: u32) -> Self {
        Occurs {
            ctx,
            lev,
            seen_tys: HashSet::new(),
            seen_rows: HashSet::new(),
        }
    }

    fn in_type(&mut self, needle: Needle, ty: &Type) -> bool {
        match self.ctx.head(ty) {
            TypeF::Base(_) => false,
            TypeF::Product(items) => {
                let mut found = false;
                for item in &items {
                    found |= self.in_type(needle, item);
                }
                found
            }
            TypeF::Record(fields) => {
                let mut found = false;
                for t in fields.values() {
                    found |= self.in_type(needle, t);
                }
                found
            }
            TypeF::Data(_, args) => {
                let mut found = false;
                for arg in &args {
                    found |= self.in_type(needle, arg);
                }
                found
            }
            TypeF::Fun(domain, codomain) => {
                let mut found = self.in_domain(needle, &domain);
                found |= self.in_type(needle, &codomain);
                found
            }
            TypeF::Eff(domain, recv, codomain) => {
                let mut found = self.in_domain(needle, &domain);
                found |= self.in_type(needle, &recv.0);
                found |= self.in_type(needle, &codomain);
                found
            }
            TypeF::Pid(inner) => self.in_type(needle, &inner),
            TypeF::Frozen(frozen) => {
                let mut found = self.in_domain(needle, &frozen.rest);
                found |= self.in_type(needle, &frozen.recv);
                found |= self.in_type(needle, &frozen.ret);
                found
            }
            TypeF::Var(TypeVar::MustBeBound(_)) => false,
            TypeF::Var(TypeVar::Free(fid)) => {
                self.ctx.lower_tv_level(fid, self.lev);
                let mut found = needle == Needle::Ty(fid);
                if self.seen_tys.insert(fid) {
                    if let BaseKindF::Record(kind_fields) = self.ctx.tv_kind(fid) {
                        for t in kind_fields.values() {
                            found |= self.in_type(needle, t);
                        }
                    }
                }
                found
            }
        }
    }

    fn in_domain(&mut self, needle: Needle, domain: &Domain) -> bool {
        let mut found = false;
        for t in &domain.ordered {
            found |= self.in_type(needle, t);
        }
        for t in domain.mandatory.values() {
            found |= self.in_type(needle, t);
        }
        found |= self.in_row(needle, &domain.optional);
        found
    }

    fn in_row(&mut self, needle: Needle, row: &Row) -> bool {
        match self.ctx.row_head(row) {
            RowF::Fixed(fields) => {
                let mut found = false;
                for t in fields.values() {
                    found |= self.in_type(needle, t);
                }
                found
            }
            RowF::Var(RowVar::MustBeBound(_)) => false,
            RowF::Var(RowVar::Free(frid)) => {
                self.ctx.lower_rv_level(frid, self.lev);
                let mut found = needle == Needle::Row(frid);
                if self.seen_rows.insert(frid) {
                    for t in self.ctx.rv_kind(frid).values() {
                        found |= self.in_type(needle, t);
                    }
                }
                found
            }
        }
    }
}

// ===== Drivers =====

/// Unifies two types, reifying a failure into a typed error carrying
/// the resolved root types.
pub fn unify(ctx: &mut Context, span: Span, actual: &Type, expected: &Type) -> Result<(), TypeError> {
    let actual0 = ctx.canonical(actual);
    let expected0 = ctx.canonical(expected);
    log::trace!("unify {actual0} ~ {expected0}");
    let res = Unifier { ctx }.types(actual, expected);
    finish(span, res, actual0, expected0)
}

/// Unifies two effects.
pub fn unify_effect(
    ctx: &mut Context,
    span: Span,
    actual: &Effect,
    expected: &Effect,
) -> Result<(), TypeError> {
    let actual0 = ctx.canonical(&actual.0);
    let expected0 = ctx.canonical(&expected.0);
    let res = Unifier { ctx }.effects(actual, expected);
    finish(span, res, actual0, expected0)
}

fn finish(span: Span, res: UnifyRes, actual: Type, expected: Type) -> Result<(), TypeError> {
    match res {
        Consistent => Ok(()),
        Contradiction => Err(TypeError::ContradictionError {
            span,
            actual,
            expected,
        }),
        Inclusion(fid) => Err(TypeError::InclusionError {
            span,
            fid,
            actual,
            expected,
        }),
        InclusionRow(frid) => Err(TypeError::InclusionRowError {
            span,
            frid,
            actual,
            expected,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interner::intern;
    use crate::typechecker::types::Domain;

    fn sp() -> Span {
        Span::synthetic()
    }

    #[test]
    fn base_types_unify_by_value() {
        let mut ctx = Context::new();
        assert!(unify(&mut ctx, sp(), &Type::int(), &Type::int()).is_ok());
        let err = unify(&mut ctx, sp(), &Type::int(), &Type::bool()).unwrap_err();
        assert!(matches!(err, TypeError::ContradictionError { .. }));
    }

    #[test]
    fn free_variable_links_to_type() {
        let mut ctx = Context::new();
        let a = ctx.fresh_type_var(0);
        assert!(unify(&mut ctx, sp(), &a, &Type::int()).is_ok());
        assert_eq!(ctx.canonical(&a), Type::int());
    }

    #[test]
    fn occurs_check_reports_inclusion() {
        let mut ctx = Context::new();
        let a = ctx.fresh_type_var(0);
        let fun = Type::fun(Domain::ordered(vec![a.clone()]), a.clone());
        let err = unify(&mut ctx, sp(), &a, &fun).unwrap_err();
        assert!(matches!(err, TypeError::InclusionError { .. }));
    }

    #[test]
    fn occurs_check_lowers_levels_everywhere() {
        let mut ctx = Context::new();
        let receiver = ctx.fresh_type_var(1);
        let b = ctx.fresh_free_id(7, BaseKindF::Universal);
        let c = ctx.fresh_free_id(9, BaseKindF::Universal);
        let fun = Type::fun(
            Domain::ordered(vec![Type::free(b)]),
            Type::free(c),
        );
        assert!(unify(&mut ctx, sp(), &receiver, &fun).is_ok());
        assert_eq!(ctx.tv_level(b), 1);
        assert_eq!(ctx.tv_level(c), 1);
    }

    #[test]
    fn record_kinded_variable_accepts_superset_record() {
        let mut ctx = Context::new();
        let field = ctx.fresh_type_var(0);
        let mut kind = LabelMap::new();
        kind.insert(intern("name"), field.clone());
        let fid = ctx.fresh_free_id(0, BaseKindF::Record(kind));
        let var = Type::free(fid);

        let mut fields = LabelMap::new();
        fields.insert(intern("name"), Type::int());
        fields.insert(intern("age"), Type::int());
        let record = TypeF::Record(fields);

        assert!(unify(&mut ctx, sp(), &var, &record).is_ok());
        assert_eq!(ctx.canonical(&field), Type::int());
        assert_eq!(ctx.canonical(&var), ctx.canonical(&record));
    }

    #[test]
    fn record_kinded_variable_rejects_missing_label() {
        let mut ctx = Context::new();
        let mut kind = LabelMap::new();
        kind.insert(intern("name"), Type::int());
        let fid = ctx.fresh_free_id(0, BaseKindF::Record(kind));
        let var = Type::free(fid);

        let mut fields = LabelMap::new();
        fields.insert(intern("age"), Type::int());
        let record = TypeF::Record(fields);

        let err = unify(&mut ctx, sp(), &var, &record).unwrap_err();
        assert!(matches!(err, TypeError::ContradictionError { .. }));
    }

    #[test]
    fn merging_record_kinds_takes_union_and_unifies_overlap() {
        let mut ctx = Context::new();
        let shared1 = ctx.fresh_type_var(0);
        let shared2 = ctx.fresh_type_var(0);

        let mut k1 = LabelMap::new();
        k1.insert(intern("x"), shared1.clone());
        k1.insert(intern("left"), Type::bool());
        let f1 = ctx.fresh_free_id(0, BaseKindF::Record(k1));

        let mut k2 = LabelMap::new();
        k2.insert(intern("x"), shared2.clone());
        k2.insert(intern("right"), Type::char());
        let f2 = ctx.fresh_free_id(0, BaseKindF::Record(k2));

        assert!(unify(&mut ctx, sp(), &Type::free(f1), &Type::free(f2)).is_ok());
        // The overlap was unified.
        assert!(unify(&mut ctx, sp(), &shared1, &Type::int()).is_ok());
        assert_eq!(ctx.canonical(&shared2), Type::int());
        // The union of label constraints survives on the representative.
        match ctx.tv_kind(f2) {
            BaseKindF::Record(fields) => {
                assert!(fields.contains_key(&intern("left")));
                assert!(fields.contains_key(&intern("right")));
                assert!(fields.contains_key(&intern("x")));
            }
            BaseKindF::Universal => panic!("expected record kind on survivor"),
        }
    }

    #[test]
    fn fixed_rows_need_identical_label_sets() {
        let mut ctx = Context::new();
        let mut o1 = LabelMap::new();
        o1.insert(intern("timeout"), Type::int());
        let mut o2 = LabelMap::new();
        o2.insert(intern("timeout"), Type::int());
        let lhs = Type::fun(
            Domain {
                ordered: vec![],
                mandatory: LabelMap::new(),
                optional: RowF::Fixed(o1),
            },
            Type::unit(),
        );
        let rhs_same = Type::fun(
            Domain {
                ordered: vec![],
                mandatory: LabelMap::new(),
                optional: RowF::Fixed(o2),
            },
            Type::unit(),
        );
        assert!(unify(&mut ctx, sp(), &lhs, &rhs_same).is_ok());

        let mut o3 = LabelMap::new();
        o3.insert(intern("retries"), Type::int());
        let rhs_diff = Type::fun(
            Domain {
                ordered: vec![],
                mandatory: LabelMap::new(),
                optional: RowF::Fixed(o3),
            },
            Type::unit(),
        );
        assert!(unify(&mut ctx, sp(), &lhs, &rhs_diff).is_err());
    }

    #[test]
    fn free_row_takes_fixed_row_respecting_kind() {
        let mut ctx = Context::new();
        let mut kind = LabelMap::new();
        kind.insert(intern("timeout"), Type::int());
        let frid = ctx.fresh_free_row_id(0, kind);
        let row = RowF::Var(RowVar::Free(frid));

        let mut fields = LabelMap::new();
        fields.insert(intern("timeout"), Type::int());
        fields.insert(intern("retries"), Type::int());
        let fixed: Row = RowF::Fixed(fields);

        let res = Unifier { ctx: &mut ctx }.rows(&row, &fixed);
        assert_eq!(res, Consistent);
        assert_eq!(ctx.row_head(&row), fixed);
    }

    #[test]
    fn rigid_variables_unify_only_with_themselves() {
        use crate::typechecker::types::MustBeBoundId;
        let mut ctx = Context::new();
        let b1 = ctx.fresh_bound_id(BaseKindF::Universal);
        let b2 = ctx.fresh_bound_id(BaseKindF::Universal);
        let r1: Type = TypeF::Var(TypeVar::MustBeBound(MustBeBoundId(b1)));
        let r2: Type = TypeF::Var(TypeVar::MustBeBound(MustBeBoundId(b2)));
        assert!(unify(&mut ctx, sp(), &r1, &r1.clone()).is_ok());
        assert!(unify(&mut ctx, sp(), &r1, &r2).is_err());
        assert!(unify(&mut ctx, sp(), &r1, &Type::int()).is_err());
    }

    #[test]
    fn rigid_row_variables_unify_only_with_themselves() {
        use crate::typechecker::types::MustBeBoundRowId;
        let mut ctx = Context::new();
        let br1 = ctx.fresh_bound_row_id(Default::default());
        let br2 = ctx.fresh_bound_row_id(Default::default());
        let r1: Row = RowF::Var(RowVar::MustBeBound(MustBeBoundRowId(br1)));
        let r2: Row = RowF::Var(RowVar::MustBeBound(MustBeBoundRowId(br2)));
        assert_eq!(Unifier { ctx: &mut ctx }.rows(&r1, &r1.clone()), Consistent);
        assert_eq!(Unifier { ctx: &mut ctx }.rows(&r1, &r2), Contradiction);
        let fixed: Row = RowF::Fixed(LabelMap::new());
        assert_eq!(Unifier { ctx: &mut ctx }.rows(&r1, &fixed), Contradiction);
    }

    #[test]
    fn free_row_variable_does_not_take_a_rigid_row() {
        use crate::typechecker::types::MustBeBoundRowId;
        let mut ctx = Context::new();
        let brid = ctx.fresh_bound_row_id(Default::default());
        let rigid: Row = RowF::Var(RowVar::MustBeBound(MustBeBoundRowId(brid)));
        let free = ctx.fresh_row_var(0, LabelMap::new());
        assert_eq!(Unifier { ctx: &mut ctx }.rows(&free, &rigid), Contradiction);
        assert_eq!(Unifier { ctx: &mut ctx }.rows(&rigid, &free), Contradiction);
        // The free variable survives the failed attempts unlinked and
        // can still take an ordinary fixed row.
        let fixed: Row = RowF::Fixed(LabelMap::new());
        assert_eq!(Unifier { ctx: &mut ctx }.rows(&free, &fixed), Consistent);
    }

    #[test]
    fn synonyms_expand_during_unification() {
        use crate::typechecker::context::SynonymDef;
        let mut ctx = Context::new();
        let sid = ctx.fresh_synonym_id(intern("age"));
        ctx.register_synonym(
            sid,
            SynonymDef {
                params: vec![],
                body: poly::lift(&Type::int()),
            },
        );
        let syn = TypeF::Data(TypeId::Synonym(sid), vec![]);
        assert!(unify(&mut ctx, sp(), &syn, &Type::int()).is_ok());
    }
}
