//! Signature subtyping: `lookup_record` builds a witness map, its
//! well-formedness is checked against the type-definition store, and the
//! per-member subtype pass runs on the instantiated target.

use std::collections::{BTreeSet, HashMap};

use crate::ast::span::Span;
use crate::interner::Symbol;
use crate::typechecker::context::Context;
use crate::typechecker::env::{
    AbstractedSig, CtorEntry, FunctorSig, ModuleEntry, Namespace, SigEntry, SigRecord, Signature,
    TypeEntry, ValEntry,
};
use crate::typechecker::error::TypeError;
use crate::typechecker::poly;
use crate::typechecker::types::{
    BoundId, BoundRowId, DomainF, EffectF, FrozenF, OpaqueId, PolyDomain, PolyRow, PolyRowVar,
    PolyType, PolyTypeVar, RowF, SynonymId, TypeF, TypeId, VariantId,
};

/// Partial map from the nominal IDs of a target signature to the IDs
/// provided by a source signature.
#[derive(Debug, Clone, Default)]
pub struct WitnessMap {
    pub opaques: HashMap<OpaqueId, TypeId>,
    pub variants: HashMap<VariantId, VariantId>,
    pub synonyms: HashMap<SynonymId, SynonymId>,
}

impl WitnessMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn map_type_id(&self, id: TypeId) -> TypeId {
        match id {
            TypeId::Opaque(oid) => self.opaques.get(&oid).copied().unwrap_or(id),
            TypeId::Variant(vid) => self
                .variants
                .get(&vid)
                .copied()
                .map(TypeId::Variant)
                .unwrap_or(id),
            TypeId::Synonym(sid) => self
                .synonyms
                .get(&sid)
                .copied()
                .map(TypeId::Synonym)
                .unwrap_or(id),
        }
    }

    pub fn apply_poly(&self, pty: &PolyType) -> PolyType {
        match pty {
            TypeF::Base(bt) => TypeF::Base(*bt),
            TypeF::Product(items) => {
                TypeF::Product(items.iter().map(|t| self.apply_poly(t)).collect())
            }
            TypeF::Record(fields) => TypeF::Record(
                fields
                    .iter()
                    .map(|(l, t)| (*l, self.apply_poly(t)))
                    .collect(),
            ),
            TypeF::Data(id, args) => TypeF::Data(
                self.map_type_id(*id),
                args.iter().map(|t| self.apply_poly(t)).collect(),
            ),
            TypeF::Fun(domain, codomain) => TypeF::Fun(
                Box::new(self.apply_domain(domain)),
                Box::new(self.apply_poly(codomain)),
            ),
            TypeF::Eff(domain, recv, codomain) => TypeF::Eff(
                Box::new(self.apply_domain(domain)),
                Box::new(EffectF(self.apply_poly(&recv.0))),
                Box::new(self.apply_poly(codomain)),
            ),
            TypeF::Pid(inner) => TypeF::Pid(Box::new(self.apply_poly(inner))),
            TypeF::Frozen(frozen) => TypeF::Frozen(Box::new(FrozenF {
                rest: self.apply_domain(&frozen.rest),
                recv: self.apply_poly(&frozen.recv),
                ret: self.apply_poly(&frozen.ret),
            })),
            TypeF::Var(v) => TypeF::Var(*v),
        }
    }

    fn apply_domain(&self, domain: &PolyDomain) -> PolyDomain {
        DomainF {
            ordered: domain.ordered.iter().map(|t| self.apply_poly(t)).collect(),
            mandatory: domain
                .mandatory
                .iter()
                .map(|(l, t)| (*l, self.apply_poly(t)))
                .collect(),
            optional: match &domain.optional {
                RowF::Fixed(fields) => RowF::Fixed(
                    fields
                        .iter()
                        .map(|(l, t)| (*l, self.apply_poly(t)))
                        .collect(),
                ),
                RowF::Var(rv) => RowF::Var(*rv),
            },
        }
    }

    pub fn apply_record(&self, record: &SigRecord) -> SigRecord {
        let mut out = SigRecord::new();
        for (ns, name, entry) in record.iter() {
            let entry = match entry {
                SigEntry::Val(e) => SigEntry::Val(ValEntry {
                    pty: self.apply_poly(&e.pty),
                    name: e.name,
                }),
                SigEntry::Type(e) => SigEntry::Type(TypeEntry {
                    id: self.map_type_id(e.id),
                    arity: e.arity,
                }),
                SigEntry::Module(e) => SigEntry::Module(ModuleEntry {
                    sig: self.apply_sig(&e.sig),
                    space: e.space,
                }),
                SigEntry::Sig(e) => SigEntry::Sig(AbstractedSig {
                    opaques: e.opaques.clone(),
                    sig: self.apply_sig(&e.sig),
                }),
                SigEntry::Ctor(e) => SigEntry::Ctor(CtorEntry {
                    variant: self.variants.get(&e.variant).copied().unwrap_or(e.variant),
                    ctor: e.ctor,
                    params: e.params.clone(),
                    arg_types: e.arg_types.iter().map(|t| self.apply_poly(t)).collect(),
                }),
            };
            out.insert(ns, name, entry)
                .expect("substitution preserves distinctness of names");
        }
        out
    }

    pub fn apply_sig(&self, sig: &Signature) -> Signature {
        match sig {
            Signature::Structure(record) => Signature::Structure(self.apply_record(record)),
            Signature::Functor(f) => Signature::Functor(Box::new(FunctorSig {
                opaques: f.opaques.clone(),
                domain: self.apply_record(&f.domain),
                codomain: (f.codomain.0.clone(), self.apply_sig(&f.codomain.1)),
                closure: f.closure.clone(),
            })),
        }
    }
}

// ===== Opaque bookkeeping =====

pub fn collect_opaques_poly(pty: &PolyType, out: &mut BTreeSet<OpaqueId>) {
    match pty {
        TypeF::Base(_) | TypeF::Var(_) => {}
        TypeF::Product(items) => items.iter().for_each(|t| collect_opaques_poly(t, out)),
        TypeF::Record(fields) => fields.values().for_each(|t| collect_opaques_poly(t, out)),
        TypeF::Data(id, args) => {
            if let TypeId::Opaque(oid) = id {
                out.insert(*oid);
            }
            args.iter().for_each(|t| collect_opaques_poly(t, out));
        }
        TypeF::Fun(domain, codomain) => {
            collect_opaques_domain(domain, out);
            collect_opaques_poly(codomain, out);
        }
        TypeF::Eff(domain, recv, codomain) => {
            collect_opaques_domain(domain, out);
            collect_opaques_poly(&recv.0, out);
            collect_opaques_poly(codomain, out);
        }
        TypeF::Pid(inner) => collect_opaques_poly(inner, out),
        TypeF::Frozen(frozen) => {
            collect_opaques_domain(&frozen.rest, out);
            collect_opaques_poly(&frozen.recv, out);
            collect_opaques_poly(&frozen.ret, out);
        }
    }
}

fn collect_opaques_domain(domain: &PolyDomain, out: &mut BTreeSet<OpaqueId>) {
    domain.ordered.iter().for_each(|t| collect_opaques_poly(t, out));
    domain
        .mandatory
        .values()
        .for_each(|t| collect_opaques_poly(t, out));
    if let RowF::Fixed(fields) = &domain.optional {
        fields.values().for_each(|t| collect_opaques_poly(t, out));
    }
}

pub fn collect_opaques_sig(sig: &Signature, out: &mut BTreeSet<OpaqueId>) {
    match sig {
        Signature::Structure(record) => collect_opaques_record(record, out),
        Signature::Functor(f) => {
            collect_opaques_record(&f.domain, out);
            collect_opaques_sig(&f.codomain.1, out);
        }
    }
}

pub fn collect_opaques_record(record: &SigRecord, out: &mut BTreeSet<OpaqueId>) {
    for (_, _, entry) in record.iter() {
        match entry {
            SigEntry::Val(e) => collect_opaques_poly(&e.pty, out),
            SigEntry::Type(e) => {
                if let TypeId::Opaque(oid) = e.id {
                    out.insert(oid);
                }
            }
            SigEntry::Module(e) => collect_opaques_sig(&e.sig, out),
            SigEntry::Sig(e) => collect_opaques_sig(&e.sig, out),
            SigEntry::Ctor(e) => e
                .arg_types
                .iter()
                .for_each(|t| collect_opaques_poly(t, out)),
        }
    }
}

/// Copies a signature with all its opaque IDs freshly renamed, so every
/// use of a named signature (and every functor instantiation) gets its
/// own nominal identities.
pub fn rename_abstracted(ctx: &mut Context, abs: &AbstractedSig) -> AbstractedSig {
    let mut wt = WitnessMap::new();
    let mut fresh = BTreeSet::new();
    for old in &abs.opaques {
        let kind = ctx.opaque_kind(*old).clone();
        let new = ctx.fresh_opaque_id(old.name(), kind);
        wt.opaques.insert(*old, TypeId::Opaque(new));
        fresh.insert(new);
    }
    AbstractedSig {
        opaques: fresh,
        sig: wt.apply_sig(&abs.sig),
    }
}

// ===== Poly-type comparison =====

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolyCmp {
    Ok,
    Mismatch,
    /// The required type quantifies where the provided one is concrete.
    NeedsPoly,
}

/// `pty1 <= pty2`: the provided type is at least as general as the
/// required one. The witness tables record, per bound ID of the
/// provided type, the required subtree it instantiates to; repeated
/// encounters must produce an equal subtree.
pub fn subtype_poly_type(ctx: &mut Context, pty1: &PolyType, pty2: &PolyType) -> PolyCmp {
    let p1 = poly::poly_canonical(ctx, pty1);
    let p2 = poly::poly_canonical(ctx, pty2);
    let mut wit: HashMap<BoundId, PolyType> = HashMap::new();
    let mut row_wit: HashMap<BoundRowId, PolyRow> = HashMap::new();
    cmp_poly(ctx, &p1, &p2, &mut wit, &mut row_wit)
}

/// Expands a synonym head, if any; synonyms form a DAG so this
/// terminates.
fn expand_synonym_head(ctx: &Context, pty: &PolyType) -> Option<PolyType> {
    if let TypeF::Data(TypeId::Synonym(sid), args) = pty {
        let def = ctx.synonym_def(*sid);
        let expanded = poly::apply_scheme_poly(&def.params, &def.body, args);
        return Some(match expand_synonym_head(ctx, &expanded) {
            Some(deeper) => deeper,
            None => expanded,
        });
    }
    None
}

fn cmp_poly(
    ctx: &Context,
    p1: &PolyType,
    p2: &PolyType,
    wit: &mut HashMap<BoundId, PolyType>,
    row_wit: &mut HashMap<BoundRowId, PolyRow>,
) -> PolyCmp {
    if let Some(expanded) = expand_synonym_head(ctx, p1) {
        return cmp_poly(ctx, &expanded, p2, wit, row_wit);
    }
    if let Some(expanded) = expand_synonym_head(ctx, p2) {
        return cmp_poly(ctx, p1, &expanded, wit, row_wit);
    }
    match (p1, p2) {
        (TypeF::Var(PolyTypeVar::Bound(b1)), _) => match wit.get(b1) {
            Some(stored) => {
                if stored == p2 {
                    PolyCmp::Ok
                } else {
                    PolyCmp::Mismatch
                }
            }
            None => {
                wit.insert(*b1, p2.clone());
                PolyCmp::Ok
            }
        },
        (_, TypeF::Var(PolyTypeVar::Bound(_))) => PolyCmp::NeedsPoly,
        (TypeF::Var(PolyTypeVar::Mono(v1)), TypeF::Var(PolyTypeVar::Mono(v2))) => {
            if v1 == v2 {
                PolyCmp::Ok
            } else {
                PolyCmp::Mismatch
            }
        }
        (TypeF::Base(b1), TypeF::Base(b2)) => {
            if b1 == b2 {
                PolyCmp::Ok
            } else {
                PolyCmp::Mismatch
            }
        }
        (TypeF::Product(xs), TypeF::Product(ys)) => cmp_poly_list(ctx, xs, ys, wit, row_wit),
        (TypeF::Record(f1), TypeF::Record(f2)) => cmp_poly_fields(ctx, f1, f2, wit, row_wit),
        (TypeF::Data(id1, a1), TypeF::Data(id2, a2)) => {
            if id1 != id2 {
                return PolyCmp::Mismatch;
            }
            cmp_poly_list(ctx, a1, a2, wit, row_wit)
        }
        (TypeF::Fun(d1, c1), TypeF::Fun(d2, c2)) => {
            seq(cmp_poly_domain(ctx, d1, d2, wit, row_wit), || {
                cmp_poly(ctx, c1, c2, wit, row_wit)
            })
        }
        (TypeF::Eff(d1, e1, c1), TypeF::Eff(d2, e2, c2)) => {
            seq(cmp_poly_domain(ctx, d1, d2, wit, row_wit), || {
                seq(cmp_poly(ctx, &e1.0, &e2.0, wit, row_wit), || {
                    cmp_poly(ctx, c1, c2, wit, row_wit)
                })
            })
        }
        (TypeF::Pid(t1), TypeF::Pid(t2)) => cmp_poly(ctx, t1, t2, wit, row_wit),
        (TypeF::Frozen(z1), TypeF::Frozen(z2)) => {
            seq(cmp_poly_domain(ctx, &z1.rest, &z2.rest, wit, row_wit), || {
                seq(cmp_poly(ctx, &z1.recv, &z2.recv, wit, row_wit), || {
                    cmp_poly(ctx, &z1.ret, &z2.ret, wit, row_wit)
                })
            })
        }
        _ => PolyCmp::Mismatch,
    }
}

fn seq(first: PolyCmp, rest: impl FnOnce() -> PolyCmp) -> PolyCmp {
    match first {
        PolyCmp::Ok => rest(),
        other => other,
    }
}

fn cmp_poly_list(
    ctx: &Context,
    xs: &[PolyType],
    ys: &[PolyType],
    wit: &mut HashMap<BoundId, PolyType>,
    row_wit: &mut HashMap<BoundRowId, PolyRow>,
) -> PolyCmp {
    if xs.len() != ys.len() {
        return PolyCmp::Mismatch;
    }
    for (x, y) in xs.iter().zip(ys) {
        match cmp_poly(ctx, x, y, wit, row_wit) {
            PolyCmp::Ok => {}
            other => return other,
        }
    }
    PolyCmp::Ok
}

fn cmp_poly_fields(
    ctx: &Context,
    f1: &crate::typechecker::types::LabelMap<PolyType>,
    f2: &crate::typechecker::types::LabelMap<PolyType>,
    wit: &mut HashMap<BoundId, PolyType>,
    row_wit: &mut HashMap<BoundRowId, PolyRow>,
) -> PolyCmp {
    if f1.len() != f2.len() {
        return PolyCmp::Mismatch;
    }
    for ((l1, t1), (l2, t2)) in f1.iter().zip(f2) {
        if l1 != l2 {
            return PolyCmp::Mismatch;
        }
        match cmp_poly(ctx, t1, t2, wit, row_wit) {
            PolyCmp::Ok => {}
            other => return other,
        }
    }
    PolyCmp::Ok
}

fn cmp_poly_domain(
    ctx: &Context,
    d1: &PolyDomain,
    d2: &PolyDomain,
    wit: &mut HashMap<BoundId, PolyType>,
    row_wit: &mut HashMap<BoundRowId, PolyRow>,
) -> PolyCmp {
    if d1.ordered.len() != d2.ordered.len() || d1.mandatory.len() != d2.mandatory.len() {
        return PolyCmp::Mismatch;
    }
    match cmp_poly_list(ctx, &d1.ordered, &d2.ordered, wit, row_wit) {
        PolyCmp::Ok => {}
        other => return other,
    }
    for ((l1, t1), (l2, t2)) in d1.mandatory.iter().zip(&d2.mandatory) {
        if l1 != l2 {
            return PolyCmp::Mismatch;
        }
        match cmp_poly(ctx, t1, t2, wit, row_wit) {
            PolyCmp::Ok => {}
            other => return other,
        }
    }
    match (&d1.optional, &d2.optional) {
        (RowF::Fixed(f1), RowF::Fixed(f2)) => cmp_poly_fields(ctx, f1, f2, wit, row_wit),
        (RowF::Var(PolyRowVar::Bound(br1)), r2) => match row_wit.get(br1) {
            Some(stored) => {
                if stored == r2 {
                    PolyCmp::Ok
                } else {
                    PolyCmp::Mismatch
                }
            }
            None => {
                row_wit.insert(*br1, r2.clone());
                PolyCmp::Ok
            }
        },
        (_, RowF::Var(PolyRowVar::Bound(_))) => PolyCmp::NeedsPoly,
        (RowF::Var(PolyRowVar::Mono(r1)), RowF::Var(PolyRowVar::Mono(r2))) => {
            if r1 == r2 {
                PolyCmp::Ok
            } else {
                PolyCmp::Mismatch
            }
        }
        _ => PolyCmp::Mismatch,
    }
}

/// Equality of poly types under a fixed positional mapping of bound IDs
/// (used when comparing type definitions parameter-for-parameter).
pub fn poly_equal_under(
    ctx: &Context,
    map: &HashMap<BoundId, BoundId>,
    p1: &PolyType,
    p2: &PolyType,
) -> bool {
    if let Some(expanded) = expand_synonym_head(ctx, p1) {
        return poly_equal_under(ctx, map, &expanded, p2);
    }
    if let Some(expanded) = expand_synonym_head(ctx, p2) {
        return poly_equal_under(ctx, map, p1, &expanded);
    }
    match (p1, p2) {
        (TypeF::Var(PolyTypeVar::Bound(b1)), TypeF::Var(PolyTypeVar::Bound(b2))) => {
            match map.get(b1) {
                Some(mapped) => mapped == b2,
                None => b1 == b2,
            }
        }
        (TypeF::Var(PolyTypeVar::Mono(v1)), TypeF::Var(PolyTypeVar::Mono(v2))) => v1 == v2,
        (TypeF::Base(b1), TypeF::Base(b2)) => b1 == b2,
        (TypeF::Product(xs), TypeF::Product(ys)) => {
            xs.len() == ys.len()
                && xs.iter().zip(ys).all(|(x, y)| poly_equal_under(ctx, map, x, y))
        }
        (TypeF::Record(f1), TypeF::Record(f2)) => {
            f1.len() == f2.len()
                && f1
                    .iter()
                    .zip(f2)
                    .all(|((l1, t1), (l2, t2))| l1 == l2 && poly_equal_under(ctx, map, t1, t2))
        }
        (TypeF::Data(id1, a1), TypeF::Data(id2, a2)) => {
            id1 == id2
                && a1.len() == a2.len()
                && a1.iter().zip(a2).all(|(x, y)| poly_equal_under(ctx, map, x, y))
        }
        (TypeF::Fun(d1, c1), TypeF::Fun(d2, c2)) => {
            poly_domain_equal_under(ctx, map, d1, d2) && poly_equal_under(ctx, map, c1, c2)
        }
        (TypeF::Eff(d1, e1, c1), TypeF::Eff(d2, e2, c2)) => {
            poly_domain_equal_under(ctx, map, d1, d2)
                && poly_equal_under(ctx, map, &e1.0, &e2.0)
                && poly_equal_under(ctx, map, c1, c2)
        }
        (TypeF::Pid(t1), TypeF::Pid(t2)) => poly_equal_under(ctx, map, t1, t2),
        (TypeF::Frozen(z1), TypeF::Frozen(z2)) => {
            poly_domain_equal_under(ctx, map, &z1.rest, &z2.rest)
                && poly_equal_under(ctx, map, &z1.recv, &z2.recv)
                && poly_equal_under(ctx, map, &z1.ret, &z2.ret)
        }
        _ => false,
    }
}

fn poly_domain_equal_under(
    ctx: &Context,
    map: &HashMap<BoundId, BoundId>,
    d1: &PolyDomain,
    d2: &PolyDomain,
) -> bool {
    d1.ordered.len() == d2.ordered.len()
        && d1
            .ordered
            .iter()
            .zip(&d2.ordered)
            .all(|(x, y)| poly_equal_under(ctx, map, x, y))
        && d1.mandatory.len() == d2.mandatory.len()
        && d1
            .mandatory
            .iter()
            .zip(&d2.mandatory)
            .all(|((l1, t1), (l2, t2))| l1 == l2 && poly_equal_under(ctx, map, t1, t2))
        && match (&d1.optional, &d2.optional) {
            (RowF::Fixed(f1), RowF::Fixed(f2)) => {
                f1.len() == f2.len()
                    && f1
                        .iter()
                        .zip(f2)
                        .all(|((l1, t1), (l2, t2))| l1 == l2 && poly_equal_under(ctx, map, t1, t2))
            }
            (RowF::Var(r1), RowF::Var(r2)) => r1 == r2,
            _ => false,
        }
}

// ===== The subtyping pipeline =====

/// Checks `record1 <= (opaques2, record2)`, returning the witness map
/// produced by signature matching.
pub fn subtype_concrete_with_abstract(
    ctx: &mut Context,
    span: Span,
    record1: &SigRecord,
    opaques2: &BTreeSet<OpaqueId>,
    record2: &SigRecord,
) -> Result<WitnessMap, TypeError> {
    let mut wt = WitnessMap::new();
    lookup_record(span, record1, opaques2, record2, &mut wt)?;
    check_well_formedness(ctx, span, &wt)?;
    subtype_concrete_with_concrete(ctx, span, record1, &wt.apply_record(record2), &wt)?;
    Ok(wt)
}

/// Step 1: locate a correspondent for every required member and record
/// the type-ID witnesses, recursing into nested modules.
fn lookup_record(
    span: Span,
    record1: &SigRecord,
    opaques2: &BTreeSet<OpaqueId>,
    record2: &SigRecord,
    wt: &mut WitnessMap,
) -> Result<(), TypeError> {
    for (ns, name, entry) in record2.iter() {
        match (ns, entry) {
            (Namespace::Val, SigEntry::Val(_)) => {
                if record1.find_val(name).is_none() {
                    return Err(TypeError::MissingRequiredValName { span, name });
                }
            }
            (Namespace::Type, SigEntry::Type(required)) => {
                let Some(found) = record1.find_type(name) else {
                    return Err(TypeError::MissingRequiredTypeName { span, name });
                };
                match required.id {
                    TypeId::Opaque(oid) if opaques2.contains(&oid) => {
                        if found.arity != required.arity {
                            return Err(TypeError::NotASubtypeTypeOpacity { span, name });
                        }
                        wt.opaques.insert(oid, found.id);
                    }
                    TypeId::Opaque(_) => {
                        if found.id != required.id {
                            return Err(TypeError::NotASubtypeTypeOpacity { span, name });
                        }
                    }
                    TypeId::Variant(required_vid) => match found.id {
                        TypeId::Variant(found_vid) => {
                            wt.variants.insert(required_vid, found_vid);
                        }
                        _ => return Err(TypeError::NotASubtype { span, name }),
                    },
                    TypeId::Synonym(required_sid) => match found.id {
                        TypeId::Synonym(found_sid) => {
                            wt.synonyms.insert(required_sid, found_sid);
                        }
                        _ => return Err(TypeError::NotASubtype { span, name }),
                    },
                }
            }
            (Namespace::Module, SigEntry::Module(required)) => {
                let Some(found) = record1.find_module(name) else {
                    return Err(TypeError::MissingRequiredModuleName { span, name });
                };
                if let (Signature::Structure(found_rec), Signature::Structure(required_rec)) =
                    (&found.sig, &required.sig)
                {
                    lookup_record(span, found_rec, opaques2, required_rec, wt)?;
                }
            }
            (Namespace::Sig, SigEntry::Sig(_)) => {
                if record1.find_sig(name).is_none() {
                    return Err(TypeError::MissingRequiredSignatureName { span, name });
                }
            }
            // Constructor requirements ride with their variant.
            (Namespace::Ctor, _) => {}
            _ => unreachable!("namespace and entry kind always agree"),
        }
    }
    Ok(())
}

/// Step 2: confirm every witnessed variant and synonym pair actually
/// defines the same type.
fn check_well_formedness(
    ctx: &mut Context,
    span: Span,
    wt: &WitnessMap,
) -> Result<(), TypeError> {
    for (required_vid, found_vid) in &wt.variants {
        let required = ctx.variant_def(*required_vid).clone();
        let found = ctx.variant_def(*found_vid).clone();
        let mismatch = || TypeError::NotASubtypeVariant {
            span,
            found: *found_vid,
            required: *required_vid,
        };
        if required.params.len() != found.params.len()
            || required.ctors.len() != found.ctors.len()
        {
            return Err(mismatch());
        }
        let map: HashMap<BoundId, BoundId> = required
            .params
            .iter()
            .copied()
            .zip(found.params.iter().copied())
            .collect();
        for (ctor_name, required_ctor) in &required.ctors {
            let Some(found_ctor) = found.ctors.get(ctor_name) else {
                return Err(mismatch());
            };
            if required_ctor.params.len() != found_ctor.params.len() {
                return Err(mismatch());
            }
            for (required_ty, found_ty) in required_ctor.params.iter().zip(&found_ctor.params) {
                let required_ty = wt.apply_poly(required_ty);
                if !poly_equal_under(ctx, &map, &required_ty, found_ty) {
                    return Err(mismatch());
                }
            }
        }
    }

    for (required_sid, found_sid) in &wt.synonyms {
        let required = ctx.synonym_def(*required_sid).clone();
        let found = ctx.synonym_def(*found_sid).clone();
        let mismatch = || TypeError::NotASubtypeSynonym {
            span,
            found: *found_sid,
            required: *required_sid,
        };
        if required.params.len() != found.params.len() {
            return Err(mismatch());
        }
        let map: HashMap<BoundId, BoundId> = required
            .params
            .iter()
            .copied()
            .zip(found.params.iter().copied())
            .collect();
        let required_body = wt.apply_poly(&required.body);
        if !poly_equal_under(ctx, &map, &required_body, &found.body) {
            return Err(mismatch());
        }
    }

    Ok(())
}

/// Step 3: per-member subtyping on the instantiated target.
fn subtype_concrete_with_concrete(
    ctx: &mut Context,
    span: Span,
    record1: &SigRecord,
    record2: &SigRecord,
    wt: &WitnessMap,
) -> Result<(), TypeError> {
    for (ns, name, entry) in record2.iter() {
        match (ns, entry) {
            (Namespace::Val, SigEntry::Val(required)) => {
                let found = record1
                    .find_val(name)
                    .expect("looked up in step 1");
                match subtype_poly_type(ctx, &found.pty, &required.pty) {
                    PolyCmp::Ok => {}
                    PolyCmp::NeedsPoly => {
                        return Err(TypeError::PolymorphicContradiction {
                            span,
                            found: found.pty.clone(),
                            required: required.pty.clone(),
                        });
                    }
                    PolyCmp::Mismatch => {
                        return Err(TypeError::NotASubtype { span, name });
                    }
                }
            }
            (Namespace::Type, SigEntry::Type(required)) => {
                let found = record1.find_type(name).expect("looked up in step 1");
                if found.id != required.id {
                    return Err(TypeError::NotASubtype { span, name });
                }
            }
            (Namespace::Module, SigEntry::Module(required)) => {
                let found = record1
                    .find_module(name)
                    .expect("looked up in step 1");
                subtype_signature(ctx, span, name, &found.sig, &required.sig, wt)?;
            }
            (Namespace::Sig, SigEntry::Sig(required)) => {
                let found = record1.find_sig(name).expect("looked up in step 1");
                // Signature members must match in both directions.
                subtype_abstracted(ctx, span, &found.sig, required)?;
                subtype_abstracted(ctx, span, &required.sig, found)?;
            }
            (Namespace::Ctor, _) => {}
            _ => unreachable!("namespace and entry kind always agree"),
        }
    }
    Ok(())
}

fn subtype_signature(
    ctx: &mut Context,
    span: Span,
    name: Symbol,
    found: &Signature,
    required: &Signature,
    wt: &WitnessMap,
) -> Result<(), TypeError> {
    match (found, required) {
        (Signature::Structure(found_rec), Signature::Structure(required_rec)) => {
            subtype_concrete_with_concrete(ctx, span, found_rec, required_rec, wt)
        }
        (Signature::Functor(f1), Signature::Functor(f2)) => subtype_functor(ctx, span, f1, f2),
        _ => Err(TypeError::NotASubtype { span, name }),
    }
}

/// `sig1 <= abs2` where both sides may be structures or functors.
pub fn subtype_abstracted(
    ctx: &mut Context,
    span: Span,
    sig1: &Signature,
    abs2: &AbstractedSig,
) -> Result<WitnessMap, TypeError> {
    match (sig1, &abs2.sig) {
        (Signature::Structure(record1), Signature::Structure(record2)) => {
            subtype_concrete_with_abstract(ctx, span, record1, &abs2.opaques, record2)
        }
        (Signature::Functor(f1), Signature::Functor(f2)) => {
            subtype_functor(ctx, span, f1, f2)?;
            Ok(WitnessMap::new())
        }
        _ => Err(TypeError::NotAStructureSignature { span }),
    }
}

/// Standard ML-style functor subtyping: contravariant on the domain,
/// covariant on the codomain, with the codomain comparison instantiated
/// by the witness map the domain comparison produced.
fn subtype_functor(
    ctx: &mut Context,
    span: Span,
    f1: &FunctorSig,
    f2: &FunctorSig,
) -> Result<(), TypeError> {
    let wt = subtype_concrete_with_abstract(ctx, span, &f2.domain, &f1.opaques, &f1.domain)?;
    let cod1 = wt.apply_sig(&f1.codomain.1);
    let cod2 = AbstractedSig {
        opaques: f2.codomain.0.clone(),
        sig: f2.codomain.1.clone(),
    };
    subtype_abstracted(ctx, span, &cod1, &cod2)?;
    Ok(())
}

/// Rewrites a checked signature so that every value and module keeps the
/// runtime name of its implementation. Sealing must not change the names
/// the code generator emits calls against.
pub fn copy_closure(from: &Signature, to: &Signature) -> Signature {
    match (from, to) {
        (Signature::Structure(from_rec), Signature::Structure(to_rec)) => {
            let mut out = SigRecord::new();
            for (ns, name, entry) in to_rec.iter() {
                let entry = match entry {
                    SigEntry::Val(e) => {
                        let name_from_impl = from_rec
                            .find_val(name)
                            .map(|impl_entry| impl_entry.name)
                            .unwrap_or(e.name);
                        SigEntry::Val(ValEntry {
                            pty: e.pty.clone(),
                            name: name_from_impl,
                        })
                    }
                    SigEntry::Module(e) => match from_rec.find_module(name) {
                        Some(impl_entry) => SigEntry::Module(ModuleEntry {
                            sig: copy_closure(&impl_entry.sig, &e.sig),
                            space: impl_entry.space,
                        }),
                        None => SigEntry::Module(e.clone()),
                    },
                    other => other.clone(),
                };
                out.insert(ns, name, entry)
                    .expect("closure copying preserves distinctness of names");
            }
            Signature::Structure(out)
        }
        (Signature::Functor(from_f), Signature::Functor(to_f)) => {
            Signature::Functor(Box::new(FunctorSig {
                opaques: to_f.opaques.clone(),
                domain: to_f.domain.clone(),
                codomain: to_f.codomain.clone(),
                closure: from_f.closure.clone().or_else(|| to_f.closure.clone()),
            }))
        }
        _ => to.clone(),
    }
}
