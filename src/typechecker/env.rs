use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast;
use crate::interner::Symbol;
use crate::ir::{GlobalName, LocalName};
use crate::typechecker::types::{BoundId, CtorId, OpaqueId, PolyType, TypeId, VariantId};

/// The resolved output name a value is known by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValName {
    Global(GlobalName),
    Local(LocalName),
}

#[derive(Debug, Clone)]
pub struct ValEntry {
    pub pty: PolyType,
    pub name: ValName,
}

/// A type former visible under a name: its nominal ID and arity.
#[derive(Debug, Clone, Copy)]
pub struct TypeEntry {
    pub id: TypeId,
    pub arity: usize,
}

/// A constructor visible under a name: the owning variant, the
/// constructor's own ID, the variant's bound parameters, and the
/// parameter types.
#[derive(Debug, Clone)]
pub struct CtorEntry {
    pub variant: VariantId,
    pub ctor: CtorId,
    pub params: Vec<BoundId>,
    pub arg_types: Vec<PolyType>,
}

#[derive(Debug, Clone)]
pub struct ModuleEntry {
    pub sig: Signature,
    /// Output space the module's globals are emitted into.
    pub space: Symbol,
}

/// A signature paired with the opaque IDs existentially quantified at
/// its boundary.
#[derive(Debug, Clone)]
pub struct AbstractedSig {
    pub opaques: BTreeSet<OpaqueId>,
    pub sig: Signature,
}

impl AbstractedSig {
    pub fn concrete(sig: Signature) -> Self {
        AbstractedSig {
            opaques: BTreeSet::new(),
            sig,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Signature {
    Structure(SigRecord),
    Functor(Box<FunctorSig>),
}

impl Signature {
    pub fn as_structure(&self) -> Option<&SigRecord> {
        match self {
            Signature::Structure(record) => Some(record),
            Signature::Functor(_) => None,
        }
    }
}

/// A first-order functor signature. The closure carries what is needed
/// to re-elaborate the body at each application site.
#[derive(Debug, Clone)]
pub struct FunctorSig {
    /// Opaques quantified over the domain.
    pub opaques: BTreeSet<OpaqueId>,
    pub domain: SigRecord,
    pub codomain: (BTreeSet<OpaqueId>, Signature),
    pub closure: Option<FunctorClosure>,
}

#[derive(Debug, Clone)]
pub struct FunctorClosure {
    pub param: ast::Ident,
    pub body: Rc<ast::ModExpr>,
    pub env: Env,
}

// ===== Signature record =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Namespace {
    Val,
    Type,
    Module,
    Sig,
    Ctor,
}

#[derive(Debug, Clone)]
pub enum SigEntry {
    Val(ValEntry),
    Type(TypeEntry),
    Module(ModuleEntry),
    Sig(AbstractedSig),
    Ctor(CtorEntry),
}

/// An ordered sequence of named signature entries. Iteration order is
/// insertion order; it is observable in diagnostics and in the emitted
/// IR, and disjoint union preserves left-then-right ordering.
#[derive(Debug, Clone, Default)]
pub struct SigRecord {
    entries: IndexMap<(Namespace, Symbol), SigEntry>,
}

impl SigRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an entry; fails if the name is already taken in its
    /// namespace.
    pub fn insert(&mut self, ns: Namespace, name: Symbol, entry: SigEntry) -> Result<(), Symbol> {
        if self.entries.contains_key(&(ns, name)) {
            return Err(name);
        }
        self.entries.insert((ns, name), entry);
        Ok(())
    }

    pub fn find_val(&self, name: Symbol) -> Option<&ValEntry> {
        match self.entries.get(&(Namespace::Val, name)) {
            Some(SigEntry::Val(entry)) => Some(entry),
            _ => None,
        }
    }

    pub fn find_type(&self, name: Symbol) -> Option<&TypeEntry> {
        match self.entries.get(&(Namespace::Type, name)) {
            Some(SigEntry::Type(entry)) => Some(entry),
            _ => None,
        }
    }

    pub fn find_module(&self, name: Symbol) -> Option<&ModuleEntry> {
        match self.entries.get(&(Namespace::Module, name)) {
            Some(SigEntry::Module(entry)) => Some(entry),
            _ => None,
        }
    }

    pub fn find_sig(&self, name: Symbol) -> Option<&AbstractedSig> {
        match self.entries.get(&(Namespace::Sig, name)) {
            Some(SigEntry::Sig(entry)) => Some(entry),
            _ => None,
        }
    }

    pub fn find_ctor(&self, name: Symbol) -> Option<&CtorEntry> {
        match self.entries.get(&(Namespace::Ctor, name)) {
            Some(SigEntry::Ctor(entry)) => Some(entry),
            _ => None,
        }
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (Namespace, Symbol, &SigEntry)> {
        self.entries.iter().map(|((ns, name), entry)| (*ns, *name, entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Left-then-right union; a duplicate name within a namespace is the
    /// conflicting symbol.
    pub fn disjoint_union(mut self, other: SigRecord) -> Result<SigRecord, Symbol> {
        for ((ns, name), entry) in other.entries {
            if self.entries.contains_key(&(ns, name)) {
                return Err(name);
            }
            self.entries.insert((ns, name), entry);
        }
        Ok(self)
    }
}

// ===== Environment =====

/// Name-resolution environment for values, types, constructors, modules,
/// and signatures. Scoping is by-clone: entering a binder clones the
/// environment, so inner bindings shadow without mutation leaking out.
#[derive(Debug, Clone, Default)]
pub struct Env {
    vals: HashMap<Symbol, ValEntry>,
    types: HashMap<Symbol, TypeEntry>,
    ctors: HashMap<Symbol, CtorEntry>,
    modules: HashMap<Symbol, ModuleEntry>,
    sigs: HashMap<Symbol, AbstractedSig>,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_val(&self, name: Symbol) -> Option<&ValEntry> {
        self.vals.get(&name)
    }

    pub fn add_val(&mut self, name: Symbol, entry: ValEntry) {
        self.vals.insert(name, entry);
    }

    pub fn find_type(&self, name: Symbol) -> Option<&TypeEntry> {
        self.types.get(&name)
    }

    pub fn add_type(&mut self, name: Symbol, entry: TypeEntry) {
        self.types.insert(name, entry);
    }

    pub fn find_ctor(&self, name: Symbol) -> Option<&CtorEntry> {
        self.ctors.get(&name)
    }

    pub fn add_ctor(&mut self, name: Symbol, entry: CtorEntry) {
        self.ctors.insert(name, entry);
    }

    pub fn find_module(&self, name: Symbol) -> Option<&ModuleEntry> {
        self.modules.get(&name)
    }

    pub fn add_module(&mut self, name: Symbol, entry: ModuleEntry) {
        self.modules.insert(name, entry);
    }

    pub fn find_sig(&self, name: Symbol) -> Option<&AbstractedSig> {
        self.sigs.get(&name)
    }

    pub fn add_sig(&mut self, name: Symbol, entry: AbstractedSig) {
        self.sigs.insert(name, entry);
    }

    /// Opens every entry of a structure into this environment (used for
    /// `include`). Later entries shadow earlier ones, in record order.
    pub fn open_structure(&mut self, record: &SigRecord) {
        for (ns, name, entry) in record.iter() {
            match (ns, entry) {
                (Namespace::Val, SigEntry::Val(e)) => self.add_val(name, e.clone()),
                (Namespace::Type, SigEntry::Type(e)) => self.add_type(name, *e),
                (Namespace::Module, SigEntry::Module(e)) => self.add_module(name, e.clone()),
                (Namespace::Sig, SigEntry::Sig(e)) => self.add_sig(name, e.clone()),
                (Namespace::Ctor, SigEntry::Ctor(e)) => self.add_ctor(name, e.clone()),
                _ => unreachable!("namespace and entry kind always agree"),
            }
        }
    }
}
