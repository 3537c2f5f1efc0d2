use std::collections::HashMap;

use indexmap::IndexMap;

use crate::interner::Symbol;
use crate::ir::{GlobalName, LocalName};
use crate::typechecker::error::Warning;
use crate::typechecker::synonym::SynonymDependencyGraph;
use crate::typechecker::types::{
    BaseKind, BaseKindF, BoundId, BoundRowId, CtorId, FreeId, FreeRowId, Kind, LabelMap, OpaqueId,
    PolyBaseKind, PolyType, Row, RowF, RowVar, SynonymId, Type, TypeF, TypeVar, VariantId,
};

/// State of a free type variable in the union-find arena.
#[derive(Debug, Clone)]
pub enum TvEntry {
    Free { level: u32, kind: BaseKind },
    /// Once set, never reset.
    Link(Type),
}

/// State of a free row variable. The kind is the union of all label
/// constraints seen so far.
#[derive(Debug, Clone)]
pub enum RvEntry {
    Free { level: u32, kind: LabelMap<Type> },
    Link(Row),
}

/// A registered synonym definition: type parameters and body.
#[derive(Debug, Clone)]
pub struct SynonymDef {
    pub params: Vec<BoundId>,
    pub body: PolyType,
}

/// A registered constructor of a variant.
#[derive(Debug, Clone)]
pub struct CtorDef {
    pub id: CtorId,
    pub params: Vec<PolyType>,
}

/// A registered variant definition: type parameters and the ordered
/// constructor map.
#[derive(Debug, Clone)]
pub struct VariantDef {
    pub params: Vec<BoundId>,
    pub ctors: IndexMap<Symbol, CtorDef>,
}

/// All mutable elaboration state: the fresh-ID counters, the union-find
/// arenas for type and row variables, the kind stores, and the
/// type-definition store. One `Context` is threaded explicitly through
/// an entire elaboration; tests instantiate a fresh one per case.
///
/// The stores are write-once per key: registering an existing key or
/// reading a missing one is a programmer error and panics.
#[derive(Debug, Default)]
pub struct Context {
    tyvars: Vec<TvEntry>,
    rowvars: Vec<RvEntry>,
    bound_kinds: Vec<PolyBaseKind>,
    bound_row_kinds: Vec<LabelMap<PolyType>>,
    synonyms: HashMap<SynonymId, SynonymDef>,
    variants: HashMap<VariantId, VariantDef>,
    opaque_kinds: HashMap<OpaqueId, Kind>,
    pub(crate) synonym_graph: SynonymDependencyGraph,
    next_synonym: u32,
    next_variant: u32,
    next_opaque: u32,
    next_ctor: u32,
    next_local: u32,
    next_global: u32,
    warnings: Vec<Warning>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    // ----- type variables -----

    pub fn fresh_free_id(&mut self, level: u32, kind: BaseKind) -> FreeId {
        let fid = FreeId(self.tyvars.len() as u32);
        self.tyvars.push(TvEntry::Free { level, kind });
        fid
    }

    pub fn fresh_type_var(&mut self, level: u32) -> Type {
        let fid = self.fresh_free_id(level, BaseKindF::Universal);
        Type::free(fid)
    }

    fn tv_entry(&self, fid: FreeId) -> &TvEntry {
        &self.tyvars[fid.0 as usize]
    }

    /// Level of a still-free variable.
    pub fn tv_level(&self, fid: FreeId) -> u32 {
        match self.tv_entry(fid) {
            TvEntry::Free { level, .. } => *level,
            TvEntry::Link(_) => panic!("tv_level on linked variable '{}", fid.0),
        }
    }

    pub fn tv_kind(&self, fid: FreeId) -> BaseKind {
        match self.tv_entry(fid) {
            TvEntry::Free { kind, .. } => kind.clone(),
            TvEntry::Link(_) => panic!("tv_kind on linked variable '{}", fid.0),
        }
    }

    pub fn set_tv_kind(&mut self, fid: FreeId, new_kind: BaseKind) {
        match &mut self.tyvars[fid.0 as usize] {
            TvEntry::Free { kind, .. } => *kind = new_kind,
            TvEntry::Link(_) => panic!("set_tv_kind on linked variable '{}", fid.0),
        }
    }

    pub fn lower_tv_level(&mut self, fid: FreeId, to: u32) {
        match &mut self.tyvars[fid.0 as usize] {
            TvEntry::Free { level, .. } => *level = (*level).min(to),
            TvEntry::Link(_) => panic!("lower_tv_level on linked variable '{}", fid.0),
        }
    }

    pub fn link_tv(&mut self, fid: FreeId, ty: Type) {
        match &self.tyvars[fid.0 as usize] {
            TvEntry::Free { .. } => self.tyvars[fid.0 as usize] = TvEntry::Link(ty),
            TvEntry::Link(_) => panic!("relink of type variable '{}", fid.0),
        }
    }

    pub fn tv_is_free(&self, fid: FreeId) -> bool {
        matches!(self.tv_entry(fid), TvEntry::Free { .. })
    }

    // ----- row variables -----

    pub fn fresh_free_row_id(&mut self, level: u32, kind: LabelMap<Type>) -> FreeRowId {
        let frid = FreeRowId(self.rowvars.len() as u32);
        self.rowvars.push(RvEntry::Free { level, kind });
        frid
    }

    pub fn fresh_row_var(&mut self, level: u32, kind: LabelMap<Type>) -> Row {
        let frid = self.fresh_free_row_id(level, kind);
        RowF::Var(RowVar::Free(frid))
    }

    fn rv_entry(&self, frid: FreeRowId) -> &RvEntry {
        &self.rowvars[frid.0 as usize]
    }

    pub fn rv_level(&self, frid: FreeRowId) -> u32 {
        match self.rv_entry(frid) {
            RvEntry::Free { level, .. } => *level,
            RvEntry::Link(_) => panic!("rv_level on linked row variable ?'{}", frid.0),
        }
    }

    pub fn rv_kind(&self, frid: FreeRowId) -> LabelMap<Type> {
        match self.rv_entry(frid) {
            RvEntry::Free { kind, .. } => kind.clone(),
            RvEntry::Link(_) => panic!("rv_kind on linked row variable ?'{}", frid.0),
        }
    }

    pub fn set_rv_kind(&mut self, frid: FreeRowId, new_kind: LabelMap<Type>) {
        match &mut self.rowvars[frid.0 as usize] {
            RvEntry::Free { kind, .. } => *kind = new_kind,
            RvEntry::Link(_) => panic!("set_rv_kind on linked row variable ?'{}", frid.0),
        }
    }

    pub fn lower_rv_level(&mut self, frid: FreeRowId, to: u32) {
        match &mut self.rowvars[frid.0 as usize] {
            RvEntry::Free { level, .. } => *level = (*level).min(to),
            RvEntry::Link(_) => panic!("lower_rv_level on linked row variable ?'{}", frid.0),
        }
    }

    pub fn link_rv(&mut self, frid: FreeRowId, row: Row) {
        match &self.rowvars[frid.0 as usize] {
            RvEntry::Free { .. } => self.rowvars[frid.0 as usize] = RvEntry::Link(row),
            RvEntry::Link(_) => panic!("relink of row variable ?'{}", frid.0),
        }
    }

    pub fn rv_is_free(&self, frid: FreeRowId) -> bool {
        matches!(self.rv_entry(frid), RvEntry::Free { .. })
    }

    // ----- bound identifiers -----

    pub fn fresh_bound_id(&mut self, kind: PolyBaseKind) -> BoundId {
        let bid = BoundId(self.bound_kinds.len() as u32);
        self.bound_kinds.push(kind);
        bid
    }

    pub fn bound_kind(&self, bid: BoundId) -> &PolyBaseKind {
        &self.bound_kinds[bid.0 as usize]
    }

    /// Overwrites the kind registered at allocation. Only generalization
    /// uses this, to close the loop when a kind mentions the bound ID it
    /// belongs to having been allocated first.
    pub(crate) fn set_bound_kind(&mut self, bid: BoundId, kind: PolyBaseKind) {
        self.bound_kinds[bid.0 as usize] = kind;
    }

    pub fn fresh_bound_row_id(&mut self, kind: LabelMap<PolyType>) -> BoundRowId {
        let brid = BoundRowId(self.bound_row_kinds.len() as u32);
        self.bound_row_kinds.push(kind);
        brid
    }

    pub fn bound_row_kind(&self, brid: BoundRowId) -> &LabelMap<PolyType> {
        &self.bound_row_kinds[brid.0 as usize]
    }

    pub(crate) fn set_bound_row_kind(&mut self, brid: BoundRowId, kind: LabelMap<PolyType>) {
        self.bound_row_kinds[brid.0 as usize] = kind;
    }

    // ----- type IDs -----

    pub fn fresh_synonym_id(&mut self, name: Symbol) -> SynonymId {
        let sid = SynonymId::new(self.next_synonym, name);
        self.next_synonym += 1;
        self.synonym_graph.add_vertex(sid);
        sid
    }

    pub fn fresh_variant_id(&mut self, name: Symbol) -> VariantId {
        let vid = VariantId::new(self.next_variant, name);
        self.next_variant += 1;
        vid
    }

    pub fn fresh_opaque_id(&mut self, name: Symbol, kind: Kind) -> OpaqueId {
        let oid = OpaqueId::new(self.next_opaque, name);
        self.next_opaque += 1;
        self.opaque_kinds.insert(oid, kind);
        oid
    }

    pub fn opaque_kind(&self, oid: OpaqueId) -> &Kind {
        self.opaque_kinds
            .get(&oid)
            .unwrap_or_else(|| panic!("opaque {oid} not registered"))
    }

    pub fn fresh_ctor_id(&mut self, name: Symbol) -> CtorId {
        let cid = CtorId::new(self.next_ctor, name);
        self.next_ctor += 1;
        cid
    }

    // ----- type-definition store -----

    pub fn register_synonym(&mut self, sid: SynonymId, def: SynonymDef) {
        let prev = self.synonyms.insert(sid, def);
        assert!(prev.is_none(), "synonym {sid} registered twice");
    }

    pub fn synonym_def(&self, sid: SynonymId) -> &SynonymDef {
        self.synonyms
            .get(&sid)
            .unwrap_or_else(|| panic!("synonym {sid} not registered"))
    }

    pub fn register_variant(&mut self, vid: VariantId, def: VariantDef) {
        let prev = self.variants.insert(vid, def);
        assert!(prev.is_none(), "variant {vid} registered twice");
    }

    pub fn variant_def(&self, vid: VariantId) -> &VariantDef {
        self.variants
            .get(&vid)
            .unwrap_or_else(|| panic!("variant {vid} not registered"))
    }

    // ----- output names -----

    pub fn fresh_local_name(&mut self, ident: Symbol) -> LocalName {
        let name = LocalName {
            serial: self.next_local,
            ident,
        };
        self.next_local += 1;
        name
    }

    pub fn fresh_global_name(&mut self, space: Symbol, ident: Symbol, arity: u32) -> GlobalName {
        let name = GlobalName {
            serial: self.next_global,
            space,
            ident,
            arity,
        };
        self.next_global += 1;
        name
    }

    // ----- canonicalization -----

    /// Follows `Link` chains at the root of a type, compressing
    /// variable-to-variable paths. Does not descend into subterms.
    pub fn head(&mut self, ty: &Type) -> Type {
        if let TypeF::Var(TypeVar::Free(fid)) = ty {
            if let TvEntry::Link(target) = self.tv_entry(*fid).clone() {
                let resolved = self.head(&target);
                if resolved != target {
                    self.tyvars[fid.0 as usize] = TvEntry::Link(resolved.clone());
                }
                return resolved;
            }
        }
        ty.clone()
    }

    /// Follows `Link` chains at the root of a row.
    pub fn row_head(&mut self, row: &Row) -> Row {
        if let RowF::Var(RowVar::Free(frid)) = row {
            if let RvEntry::Link(target) = self.rv_entry(*frid).clone() {
                let resolved = self.row_head(&target);
                if resolved != target {
                    self.rowvars[frid.0 as usize] = RvEntry::Link(resolved.clone());
                }
                return resolved;
            }
        }
        row.clone()
    }

    /// Deeply resolves every linked variable in a type. Used for display
    /// and for the final elaboration outputs.
    pub fn canonical(&mut self, ty: &Type) -> Type {
        match self.head(ty) {
            TypeF::Base(bt) => TypeF::Base(bt),
            TypeF::Product(items) => {
                TypeF::Product(items.iter().map(|t| self.canonical(t)).collect())
            }
            TypeF::Record(fields) => TypeF::Record(
                fields
                    .iter()
                    .map(|(l, t)| (*l, self.canonical(t)))
                    .collect(),
            ),
            TypeF::Data(id, args) => {
                TypeF::Data(id, args.iter().map(|t| self.canonical(t)).collect())
            }
            TypeF::Fun(domain, codomain) => Type::fun(
                self.canonical_domain(&domain),
                self.canonical(&codomain),
            ),
            TypeF::Eff(domain, recv, codomain) => {
                let recv = crate::typechecker::types::EffectF(self.canonical(&recv.0));
                Type::eff(
                    self.canonical_domain(&domain),
                    recv,
                    self.canonical(&codomain),
                )
            }
            TypeF::Pid(inner) => Type::pid(self.canonical(&inner)),
            TypeF::Frozen(frozen) => TypeF::Frozen(Box::new(crate::typechecker::types::FrozenF {
                rest: self.canonical_domain(&frozen.rest),
                recv: self.canonical(&frozen.recv),
                ret: self.canonical(&frozen.ret),
            })),
            TypeF::Var(v) => TypeF::Var(v),
        }
    }

    pub fn canonical_domain(
        &mut self,
        domain: &crate::typechecker::types::Domain,
    ) -> crate::typechecker::types::Domain {
        crate::typechecker::types::DomainF {
            ordered: domain.ordered.iter().map(|t| self.canonical(t)).collect(),
            mandatory: domain
                .mandatory
                .iter()
                .map(|(l, t)| (*l, self.canonical(t)))
                .collect(),
            optional: self.canonical_row(&domain.optional),
        }
    }

    pub fn canonical_row(&mut self, row: &Row) -> Row {
        match self.row_head(row) {
            RowF::Fixed(fields) => RowF::Fixed(
                fields
                    .iter()
                    .map(|(l, t)| (*l, self.canonical(t)))
                    .collect(),
            ),
            RowF::Var(rv) => RowF::Var(rv),
        }
    }

    // ----- warnings -----

    pub fn push_warning(&mut self, warning: Warning) {
        log::warn!("{warning}");
        self.warnings.push(warning);
    }

    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }
}
