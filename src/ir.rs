//! Elaborated intermediate representation.
//!
//! Every name is resolved: expression-level binders become `LocalName`s,
//! module-level values become `GlobalName`s stamped with their runtime
//! arity. The code generator above the core consumes this as-is.

use std::collections::BTreeMap;

use crate::ast::FormatSegment;
use crate::interner::Symbol;
use crate::typechecker::types::CtorId;

/// A fresh expression-level output name. The serial disambiguates
/// shadowed source identifiers; `ident` is kept for readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalName {
    pub serial: u32,
    pub ident: Symbol,
}

/// A module-level output name: the space (target module) it lives in,
/// the identifier, and the runtime arity it is exported at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalName {
    pub serial: u32,
    pub space: Symbol,
    pub ident: Symbol,
    pub arity: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Name {
    Local(LocalName),
    Global(GlobalName),
}

/// The optional-argument row of a call site, as resolved at elaboration
/// time: either the exact labels the callee accepts, or still open
/// (polymorphic in its optional row).
#[derive(Debug, Clone, PartialEq)]
pub enum OptRow {
    Fixed(Vec<Symbol>),
    Open,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BaseConst {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(char),
    Binary(Vec<u8>),
    Format(Vec<FormatSegment>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum IExpr {
    Var(Name),
    BaseConst(BaseConst),
    Lambda {
        /// Present for recursive bindings: the closure's own name.
        recursive: Option<LocalName>,
        ordered: Vec<LocalName>,
        mandatory: BTreeMap<Symbol, LocalName>,
        /// Optional parameters with their compiled default expressions.
        optional: BTreeMap<Symbol, (LocalName, Option<IExpr>)>,
        body: Box<IExpr>,
    },
    Apply {
        callee: Name,
        opt_row: OptRow,
        ordered: Vec<IExpr>,
        mandatory: BTreeMap<Symbol, IExpr>,
        optional: BTreeMap<Symbol, IExpr>,
    },
    LetIn {
        name: LocalName,
        bound: Box<IExpr>,
        body: Box<IExpr>,
    },
    Case {
        scrutinee: Box<IExpr>,
        branches: Vec<IBranch>,
    },
    Receive {
        branches: Vec<IBranch>,
    },
    Constructor {
        id: CtorId,
        args: Vec<IExpr>,
    },
    Tuple(Vec<IExpr>),
    Record(BTreeMap<Symbol, IExpr>),
    RecordAccess {
        expr: Box<IExpr>,
        label: Symbol,
    },
    RecordUpdate {
        expr: Box<IExpr>,
        label: Symbol,
        value: Box<IExpr>,
    },
    ListNil,
    ListCons {
        head: Box<IExpr>,
        tail: Box<IExpr>,
    },
    Freeze {
        name: GlobalName,
        args: Vec<IFrozenArg>,
    },
    FreezeUpdate {
        expr: Box<IExpr>,
        args: Vec<IFrozenArg>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum IFrozenArg {
    Given(IExpr),
    Hole,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IBranch {
    pub pattern: IPattern,
    pub body: IExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IPattern {
    Wildcard,
    Var(LocalName),
    BaseConst(BaseConst),
    Tuple(Vec<IPattern>),
    ListNil,
    ListCons(Box<IPattern>, Box<IPattern>),
    Constructor(CtorId, Vec<IPattern>),
}

/// One emitted module-level binding.
#[derive(Debug, Clone, PartialEq)]
pub enum IBind {
    Val(GlobalName, IExpr),
    /// A nested module: its space name and the bindings emitted into it.
    Module(Symbol, Vec<IBind>),
}

impl IExpr {
    /// Whether the given local is referenced anywhere in this
    /// expression. Drives the unused-binding warning.
    pub fn uses_local(&self, name: LocalName) -> bool {
        match self {
            IExpr::Var(Name::Local(l)) => *l == name,
            IExpr::Var(Name::Global(_)) | IExpr::BaseConst(_) | IExpr::ListNil => false,
            IExpr::Lambda { optional, body, .. } => {
                optional
                    .values()
                    .any(|(_, default)| default.as_ref().is_some_and(|d| d.uses_local(name)))
                    || body.uses_local(name)
            }
            IExpr::Apply {
                callee,
                ordered,
                mandatory,
                optional,
                ..
            } => {
                *callee == Name::Local(name)
                    || ordered.iter().any(|e| e.uses_local(name))
                    || mandatory.values().any(|e| e.uses_local(name))
                    || optional.values().any(|e| e.uses_local(name))
            }
            IExpr::LetIn { bound, body, .. } => bound.uses_local(name) || body.uses_local(name),
            IExpr::Case { scrutinee, branches } => {
                scrutinee.uses_local(name) || branches.iter().any(|b| b.body.uses_local(name))
            }
            IExpr::Receive { branches } => branches.iter().any(|b| b.body.uses_local(name)),
            IExpr::Constructor { args, .. } => args.iter().any(|e| e.uses_local(name)),
            IExpr::Tuple(items) => items.iter().any(|e| e.uses_local(name)),
            IExpr::Record(fields) => fields.values().any(|e| e.uses_local(name)),
            IExpr::RecordAccess { expr, .. } => expr.uses_local(name),
            IExpr::RecordUpdate { expr, value, .. } => {
                expr.uses_local(name) || value.uses_local(name)
            }
            IExpr::ListCons { head, tail } => head.uses_local(name) || tail.uses_local(name),
            IExpr::Freeze { args, .. } => args.iter().any(|a| match a {
                IFrozenArg::Given(e) => e.uses_local(name),
                IFrozenArg::Hole => false,
            }),
            IExpr::FreezeUpdate { expr, args } => {
                expr.uses_local(name)
                    || args.iter().any(|a| match a {
                        IFrozenArg::Given(e) => e.uses_local(name),
                        IFrozenArg::Hole => false,
                    })
            }
        }
    }
}
