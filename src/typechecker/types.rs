use std::collections::BTreeMap;
use std::fmt;

use crate::interner::{self, Symbol};

/// Label-indexed map. `BTreeMap` keeps iteration, display, and equality
/// deterministic.
pub type LabelMap<T> = BTreeMap<Symbol, T>;

// ===== Identifiers =====
//
// All identifier families are monotonic serials handed out by the
// `Context`. Type IDs additionally carry the interned module-path name
// under which they were introduced; equality and ordering are nominal,
// by serial only.

/// Serial of a free type variable (index into the context's arena).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FreeId(pub u32);

/// Serial of a free row variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FreeRowId(pub u32);

/// Identifier of a universally quantified variable inside a poly type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BoundId(pub u32);

/// Identifier of a universally quantified row inside a poly type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BoundRowId(pub u32);

/// A rigid type variable introduced for a handwritten type parameter.
/// It unifies only with itself and generalizes to its carried bound ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MustBeBoundId(pub BoundId);

/// A rigid row variable introduced for a handwritten row parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MustBeBoundRowId(pub BoundRowId);

macro_rules! type_id_kind {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy)]
        pub struct $name {
            serial: u32,
            name: Symbol,
        }

        impl $name {
            pub(crate) fn new(serial: u32, name: Symbol) -> Self {
                Self { serial, name }
            }

            pub fn serial(&self) -> u32 {
                self.serial
            }

            /// Full module-path name, used only for pretty-printing.
            pub fn name(&self) -> Symbol {
                self.name
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.serial == other.serial
            }
        }

        impl Eq for $name {}

        impl PartialOrd for $name {
            fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Ord for $name {
            fn cmp(&self, other: &Self) -> std::cmp::Ordering {
                self.serial.cmp(&other.serial)
            }
        }

        impl std::hash::Hash for $name {
            fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
                self.serial.hash(state);
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", interner::name_of(self.name))
            }
        }
    };
}

type_id_kind! {
    /// Identifier of a transparent type abbreviation.
    SynonymId
}
type_id_kind! {
    /// Identifier of a nominal sum type.
    VariantId
}
type_id_kind! {
    /// Nominal placeholder introduced by signature sealing.
    OpaqueId
}
type_id_kind! {
    /// Identifier of a single data constructor.
    CtorId
}

/// Nominal head of a data type. The three namespaces are disjoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TypeId {
    Synonym(SynonymId),
    Variant(VariantId),
    Opaque(OpaqueId),
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeId::Synonym(sid) => write!(f, "{sid}"),
            TypeId::Variant(vid) => write!(f, "{vid}"),
            TypeId::Opaque(oid) => write!(f, "{oid}"),
        }
    }
}

// ===== Type structure =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BaseType {
    Unit,
    Bool,
    Int,
    Float,
    Char,
    Binary,
}

impl fmt::Display for BaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BaseType::Unit => "unit",
            BaseType::Bool => "bool",
            BaseType::Int => "int",
            BaseType::Float => "float",
            BaseType::Char => "char",
            BaseType::Binary => "binary",
        };
        f.write_str(s)
    }
}

/// Type structure, generic over the variable leaves. Mono types carry
/// `TypeVar`/`RowVar` leaves whose state lives in the context's arenas;
/// poly types additionally allow `Bound` leaves.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeF<V, R> {
    Base(BaseType),
    /// Product of two or more types.
    Product(Vec<TypeF<V, R>>),
    Record(LabelMap<TypeF<V, R>>),
    Data(TypeId, Vec<TypeF<V, R>>),
    Fun(Box<DomainF<V, R>>, Box<TypeF<V, R>>),
    /// Effectful function: `fun(D) -[recv]-> T`.
    Eff(Box<DomainF<V, R>>, Box<EffectF<V, R>>, Box<TypeF<V, R>>),
    Pid(Box<TypeF<V, R>>),
    /// Frozen closure: remaining arguments, receive type, return type.
    Frozen(Box<FrozenF<V, R>>),
    Var(V),
}

/// The argument shape of a function or effect type.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainF<V, R> {
    pub ordered: Vec<TypeF<V, R>>,
    pub mandatory: LabelMap<TypeF<V, R>>,
    pub optional: RowF<V, R>,
}

/// The marker annotating the receive type of an effectful computation.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectF<V, R>(pub TypeF<V, R>);

#[derive(Debug, Clone, PartialEq)]
pub struct FrozenF<V, R> {
    pub rest: DomainF<V, R>,
    pub recv: TypeF<V, R>,
    pub ret: TypeF<V, R>,
}

/// Optional-argument row: either a closed label map or a row variable.
#[derive(Debug, Clone, PartialEq)]
pub enum RowF<V, R> {
    Fixed(LabelMap<TypeF<V, R>>),
    Var(R),
}

impl<V, R> RowF<V, R> {
    pub fn empty() -> Self {
        RowF::Fixed(LabelMap::new())
    }
}

impl<V, R> DomainF<V, R> {
    pub fn ordered(tys: Vec<TypeF<V, R>>) -> Self {
        DomainF {
            ordered: tys,
            mandatory: LabelMap::new(),
            optional: RowF::empty(),
        }
    }
}

// ===== Variable leaves =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeVar {
    Free(FreeId),
    MustBeBound(MustBeBoundId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowVar {
    Free(FreeRowId),
    MustBeBound(MustBeBoundRowId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolyTypeVar {
    Mono(TypeVar),
    Bound(BoundId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolyRowVar {
    Mono(RowVar),
    Bound(BoundRowId),
}

pub type Type = TypeF<TypeVar, RowVar>;
pub type Row = RowF<TypeVar, RowVar>;
pub type Domain = DomainF<TypeVar, RowVar>;
pub type Effect = EffectF<TypeVar, RowVar>;
pub type Frozen = FrozenF<TypeVar, RowVar>;

pub type PolyType = TypeF<PolyTypeVar, PolyRowVar>;
pub type PolyRow = RowF<PolyTypeVar, PolyRowVar>;
pub type PolyDomain = DomainF<PolyTypeVar, PolyRowVar>;
pub type PolyEffect = EffectF<PolyTypeVar, PolyRowVar>;

impl Type {
    pub fn unit() -> Type {
        TypeF::Base(BaseType::Unit)
    }

    pub fn bool() -> Type {
        TypeF::Base(BaseType::Bool)
    }

    pub fn int() -> Type {
        TypeF::Base(BaseType::Int)
    }

    pub fn float() -> Type {
        TypeF::Base(BaseType::Float)
    }

    pub fn char() -> Type {
        TypeF::Base(BaseType::Char)
    }

    pub fn binary() -> Type {
        TypeF::Base(BaseType::Binary)
    }

    pub fn fun(domain: Domain, codomain: Type) -> Type {
        TypeF::Fun(Box::new(domain), Box::new(codomain))
    }

    pub fn eff(domain: Domain, recv: Effect, codomain: Type) -> Type {
        TypeF::Eff(Box::new(domain), Box::new(recv), Box::new(codomain))
    }

    pub fn pid(ty: Type) -> Type {
        TypeF::Pid(Box::new(ty))
    }

    pub fn free(fid: FreeId) -> Type {
        TypeF::Var(TypeVar::Free(fid))
    }
}

impl PolyType {
    pub fn bound(bid: BoundId) -> PolyType {
        TypeF::Var(PolyTypeVar::Bound(bid))
    }
}

// ===== Kinds =====

/// Base kind of a type variable: unconstrained, or constrained to be a
/// record containing at least the given labels.
#[derive(Debug, Clone, PartialEq)]
pub enum BaseKindF<V, R> {
    Universal,
    Record(LabelMap<TypeF<V, R>>),
}

pub type BaseKind = BaseKindF<TypeVar, RowVar>;
pub type PolyBaseKind = BaseKindF<PolyTypeVar, PolyRowVar>;

/// Kind of a type former: one base kind per parameter, then the base
/// kind of the fully applied type.
#[derive(Debug, Clone, PartialEq)]
pub struct Kind {
    pub params: Vec<PolyBaseKind>,
    pub ret: PolyBaseKind,
}

impl Kind {
    /// Kind of an ordinary `n`-ary type former.
    pub fn uniform(arity: usize) -> Kind {
        Kind {
            params: vec![BaseKindF::Universal; arity],
            ret: BaseKindF::Universal,
        }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

// ===== Display =====
//
// The diagnostic layer renders errors from these. Free variables print
// by serial, rigid parameters by their bound serial, bound variables as
// `#n`; all are stable within one context.

impl fmt::Display for TypeVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeVar::Free(fid) => write!(f, "'{}", fid.0),
            TypeVar::MustBeBound(mbbid) => write!(f, "'!{}", mbbid.0 .0),
        }
    }
}

impl fmt::Display for RowVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowVar::Free(frid) => write!(f, "?'{}", frid.0),
            RowVar::MustBeBound(mbbrid) => write!(f, "?'!{}", mbbrid.0 .0),
        }
    }
}

impl fmt::Display for PolyTypeVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolyTypeVar::Mono(tv) => write!(f, "{tv}"),
            PolyTypeVar::Bound(bid) => write!(f, "#{}", bid.0),
        }
    }
}

impl fmt::Display for PolyRowVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolyRowVar::Mono(rv) => write!(f, "{rv}"),
            PolyRowVar::Bound(brid) => write!(f, "?#{}", brid.0),
        }
    }
}

impl<V: fmt::Display, R: fmt::Display> fmt::Display for TypeF<V, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeF::Base(bt) => write!(f, "{bt}"),
            TypeF::Product(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
            TypeF::Record(fields) => {
                write!(f, "{{")?;
                for (i, (label, ty)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} : {}", interner::name_of(*label), ty)?;
                }
                write!(f, "}}")
            }
            TypeF::Data(id, args) => {
                write!(f, "{id}")?;
                if !args.is_empty() {
                    write!(f, "<")?;
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{arg}")?;
                    }
                    write!(f, ">")?;
                }
                Ok(())
            }
            TypeF::Fun(domain, codomain) => write!(f, "fun({domain}) -> {codomain}"),
            TypeF::Eff(domain, recv, codomain) => {
                write!(f, "fun({}) -[{}]-> {}", domain, recv.0, codomain)
            }
            TypeF::Pid(ty) => write!(f, "pid<{ty}>"),
            TypeF::Frozen(frozen) => write!(
                f,
                "frozen{{({}) -[{}]-> {}}}",
                frozen.rest, frozen.recv, frozen.ret
            ),
            TypeF::Var(v) => write!(f, "{v}"),
        }
    }
}

impl<V: fmt::Display, R: fmt::Display> fmt::Display for DomainF<V, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for ty in &self.ordered {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{ty}")?;
        }
        for (label, ty) in &self.mandatory {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "-{} {}", interner::name_of(*label), ty)?;
        }
        match &self.optional {
            RowF::Fixed(fields) if fields.is_empty() => {}
            row => {
                if !first {
                    write!(f, ", ")?;
                }
                write!(f, "{row}")?;
            }
        }
        Ok(())
    }
}

impl<V: fmt::Display, R: fmt::Display> fmt::Display for RowF<V, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowF::Fixed(fields) => {
                write!(f, "?(")?;
                for (i, (label, ty)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} {}", interner::name_of(*label), ty)?;
                }
                write!(f, ")")
            }
            RowF::Var(rv) => write!(f, "{rv}"),
        }
    }
}

impl<V: fmt::Display, R: fmt::Display> fmt::Display for BaseKindF<V, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaseKindF::Universal => f.write_str("o"),
            BaseKindF::Record(fields) => {
                write!(f, "{{")?;
                for (i, (label, ty)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} : {}", interner::name_of(*label), ty)?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_id_equality_is_nominal() {
        let a = SynonymId::new(0, interner::intern("A.t"));
        let b = SynonymId::new(0, interner::intern("B.u"));
        let c = SynonymId::new(1, interner::intern("A.t"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn display_function_type() {
        let ty = Type::fun(
            Domain::ordered(vec![Type::int(), Type::bool()]),
            Type::unit(),
        );
        assert_eq!(ty.to_string(), "fun(int, bool) -> unit");
    }

    #[test]
    fn display_pid_and_record() {
        let mut fields = LabelMap::new();
        fields.insert(interner::intern("name"), Type::binary());
        let ty = Type::pid(TypeF::Record(fields));
        assert_eq!(ty.to_string(), "pid<{name : binary}>");
    }
}
