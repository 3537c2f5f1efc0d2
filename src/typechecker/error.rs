use std::fmt;

use thiserror::Error;

use crate::ast::span::Span;
use crate::interner::{self, Symbol};
use crate::typechecker::types::{
    FreeId, FreeRowId, OpaqueId, PolyType, SynonymId, Type, VariantId,
};

/// Typed elaboration errors. Every variant carries the offending source
/// range and enough reified data for the diagnostic layer to render.
/// The first error aborts elaboration; nothing is recovered inside the
/// core.
#[derive(Debug, Clone)]
pub enum TypeError {
    // ----- lookup -----
    UnboundVariable { span: Span, name: Symbol },
    UnboundModuleName { span: Span, name: Symbol },
    UnboundSignatureName { span: Span, name: Symbol },
    UnboundTypeParameter { span: Span, name: Symbol },
    UnboundRowParameter { span: Span, name: Symbol },
    UndefinedConstructor { span: Span, name: Symbol },
    UndefinedTypeName { span: Span, name: Symbol },
    UndefinedKindName { span: Span, name: Symbol },

    // ----- shape -----
    NotOfStructureType { span: Span, name: Symbol },
    NotOfFunctorType { span: Span },
    NotAStructureSignature { span: Span },
    RootModuleMustBeStructure { span: Span },
    SupportOnlyFirstOrderFunctor { span: Span },
    CannotRestrictTransparentType { span: Span, name: Symbol },
    InvalidIdentifier { span: Span, name: Symbol },

    // ----- arity and labels -----
    InvalidNumberOfTypeArguments {
        span: Span,
        name: Symbol,
        expected: usize,
        found: usize,
    },
    InvalidNumberOfConstructorArguments {
        span: Span,
        name: Symbol,
        expected: usize,
        found: usize,
    },
    BadArityOfOrderedArguments {
        span: Span,
        expected: usize,
        found: usize,
    },
    UnexpectedMandatoryLabel { span: Span, label: Symbol },
    MissingMandatoryLabel { span: Span, label: Symbol },
    UnexpectedOptionalLabel { span: Span, label: Symbol },
    DuplicatedLabel { span: Span, label: Symbol },
    TypeParameterBoundMoreThanOnce { span: Span, name: Symbol },
    RowParameterBoundMoreThanOnce { span: Span, name: Symbol },
    BoundMoreThanOnceInPattern { span: Span, name: Symbol },
    InvalidByte { span: Span, value: i64 },

    // ----- type checking -----
    ContradictionError {
        span: Span,
        actual: Type,
        expected: Type,
    },
    /// The occurs check found the free variable inside the other side.
    InclusionError {
        span: Span,
        fid: FreeId,
        actual: Type,
        expected: Type,
    },
    InclusionRowError {
        span: Span,
        frid: FreeRowId,
        actual: Type,
        expected: Type,
    },
    CyclicTypeParameter { span: Span },
    CyclicSynonymTypeDefinition {
        span: Span,
        cycle: Vec<SynonymId>,
    },
    KindContradiction { span: Span },

    // ----- signature matching -----
    MissingRequiredValName { span: Span, name: Symbol },
    MissingRequiredTypeName { span: Span, name: Symbol },
    MissingRequiredModuleName { span: Span, name: Symbol },
    MissingRequiredSignatureName { span: Span, name: Symbol },
    NotASubtype { span: Span, name: Symbol },
    NotASubtypeVariant {
        span: Span,
        found: VariantId,
        required: VariantId,
    },
    NotASubtypeSynonym {
        span: Span,
        found: SynonymId,
        required: SynonymId,
    },
    NotASubtypeTypeOpacity { span: Span, name: Symbol },
    PolymorphicContradiction {
        span: Span,
        found: PolyType,
        required: PolyType,
    },
    ConflictInSignature { span: Span, name: Symbol },
    OpaqueIdExtrudesScopeViaType { span: Span, id: OpaqueId },
    OpaqueIdExtrudesScopeViaSignature { span: Span, id: OpaqueId },
    CannotFreezeNonGlobalName { span: Span, name: Symbol },
}

impl TypeError {
    pub fn span(&self) -> Span {
        match self {
            TypeError::UnboundVariable { span, .. }
            | TypeError::UnboundModuleName { span, .. }
            | TypeError::UnboundSignatureName { span, .. }
            | TypeError::UnboundTypeParameter { span, .. }
            | TypeError::UnboundRowParameter { span, .. }
            | TypeError::UndefinedConstructor { span, .. }
            | TypeError::UndefinedTypeName { span, .. }
            | TypeError::UndefinedKindName { span, .. }
            | TypeError::NotOfStructureType { span, .. }
            | TypeError::NotOfFunctorType { span }
            | TypeError::NotAStructureSignature { span }
            | TypeError::RootModuleMustBeStructure { span }
            | TypeError::SupportOnlyFirstOrderFunctor { span }
            | TypeError::CannotRestrictTransparentType { span, .. }
            | TypeError::InvalidIdentifier { span, .. }
            | TypeError::InvalidNumberOfTypeArguments { span, .. }
            | TypeError::InvalidNumberOfConstructorArguments { span, .. }
            | TypeError::BadArityOfOrderedArguments { span, .. }
            | TypeError::UnexpectedMandatoryLabel { span, .. }
            | TypeError::MissingMandatoryLabel { span, .. }
            | TypeError::UnexpectedOptionalLabel { span, .. }
            | TypeError::DuplicatedLabel { span, .. }
            | TypeError::TypeParameterBoundMoreThanOnce { span, .. }
            | TypeError::RowParameterBoundMoreThanOnce { span, .. }
            | TypeError::BoundMoreThanOnceInPattern { span, .. }
            | TypeError::InvalidByte { span, .. }
            | TypeError::ContradictionError { span, .. }
            | TypeError::InclusionError { span, .. }
            | TypeError::InclusionRowError { span, .. }
            | TypeError::CyclicTypeParameter { span }
            | TypeError::CyclicSynonymTypeDefinition { span, .. }
            | TypeError::KindContradiction { span }
            | TypeError::MissingRequiredValName { span, .. }
            | TypeError::MissingRequiredTypeName { span, .. }
            | TypeError::MissingRequiredModuleName { span, .. }
            | TypeError::MissingRequiredSignatureName { span, .. }
            | TypeError::NotASubtype { span, .. }
            | TypeError::NotASubtypeVariant { span, .. }
            | TypeError::NotASubtypeSynonym { span, .. }
            | TypeError::NotASubtypeTypeOpacity { span, .. }
            | TypeError::PolymorphicContradiction { span, .. }
            | TypeError::ConflictInSignature { span, .. }
            | TypeError::OpaqueIdExtrudesScopeViaType { span, .. }
            | TypeError::OpaqueIdExtrudesScopeViaSignature { span, .. }
            | TypeError::CannotFreezeNonGlobalName { span, .. } => *span,
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeError::UnboundVariable { name, .. } => {
                write!(f, "unbound variable: {}", interner::name_of(*name))
            }
            TypeError::UnboundModuleName { name, .. } => {
                write!(f, "unbound module name: {}", interner::name_of(*name))
            }
            TypeError::UnboundSignatureName { name, .. } => {
                write!(f, "unbound signature name: {}", interner::name_of(*name))
            }
            TypeError::UnboundTypeParameter { name, .. } => {
                write!(f, "unbound type parameter: '{}", interner::name_of(*name))
            }
            TypeError::UnboundRowParameter { name, .. } => {
                write!(f, "unbound row parameter: ?'{}", interner::name_of(*name))
            }
            TypeError::UndefinedConstructor { name, .. } => {
                write!(f, "undefined constructor: {}", interner::name_of(*name))
            }
            TypeError::UndefinedTypeName { name, .. } => {
                write!(f, "undefined type name: {}", interner::name_of(*name))
            }
            TypeError::UndefinedKindName { name, .. } => {
                write!(f, "undefined kind name: {}", interner::name_of(*name))
            }
            TypeError::NotOfStructureType { name, .. } => {
                write!(f, "module {} is not a structure", interner::name_of(*name))
            }
            TypeError::NotOfFunctorType { .. } => {
                write!(f, "this module is not a functor")
            }
            TypeError::NotAStructureSignature { .. } => {
                write!(f, "this signature is not a structure signature")
            }
            TypeError::RootModuleMustBeStructure { .. } => {
                write!(f, "the root module must be a structure")
            }
            TypeError::SupportOnlyFirstOrderFunctor { .. } => {
                write!(f, "only first-order functors are supported")
            }
            TypeError::CannotRestrictTransparentType { name, .. } => {
                write!(
                    f,
                    "cannot restrict transparent type {} by 'with type'",
                    interner::name_of(*name)
                )
            }
            TypeError::InvalidIdentifier { name, .. } => {
                write!(
                    f,
                    "invalid identifier for the target runtime: {}",
                    interner::name_of(*name)
                )
            }
            TypeError::InvalidNumberOfTypeArguments {
                name,
                expected,
                found,
                ..
            } => write!(
                f,
                "type {} expects {} argument(s) but is given {}",
                interner::name_of(*name),
                expected,
                found
            ),
            TypeError::InvalidNumberOfConstructorArguments {
                name,
                expected,
                found,
                ..
            } => write!(
                f,
                "constructor {} expects {} argument(s) but is given {}",
                interner::name_of(*name),
                expected,
                found
            ),
            TypeError::BadArityOfOrderedArguments { expected, found, .. } => write!(
                f,
                "wrong number of ordered arguments: expected {expected}, found {found}"
            ),
            TypeError::UnexpectedMandatoryLabel { label, .. } => {
                write!(f, "unexpected mandatory label -{}", interner::name_of(*label))
            }
            TypeError::MissingMandatoryLabel { label, .. } => {
                write!(f, "missing mandatory label -{}", interner::name_of(*label))
            }
            TypeError::UnexpectedOptionalLabel { label, .. } => {
                write!(f, "unexpected optional label ?{}", interner::name_of(*label))
            }
            TypeError::DuplicatedLabel { label, .. } => {
                write!(f, "duplicated label {}", interner::name_of(*label))
            }
            TypeError::TypeParameterBoundMoreThanOnce { name, .. } => {
                write!(
                    f,
                    "type parameter '{} is bound more than once",
                    interner::name_of(*name)
                )
            }
            TypeError::RowParameterBoundMoreThanOnce { name, .. } => {
                write!(
                    f,
                    "row parameter ?'{} is bound more than once",
                    interner::name_of(*name)
                )
            }
            TypeError::BoundMoreThanOnceInPattern { name, .. } => {
                write!(
                    f,
                    "{} is bound more than once in a pattern",
                    interner::name_of(*name)
                )
            }
            TypeError::InvalidByte { value, .. } => {
                write!(f, "invalid byte value {value} in binary literal")
            }
            TypeError::ContradictionError {
                actual, expected, ..
            } => write!(f, "could not match type {actual} with {expected}"),
            TypeError::InclusionError {
                fid,
                actual,
                expected,
                ..
            } => write!(
                f,
                "variable '{} occurs in both {} and {}",
                fid.0, actual, expected
            ),
            TypeError::InclusionRowError {
                frid,
                actual,
                expected,
                ..
            } => write!(
                f,
                "row variable ?'{} occurs in both {} and {}",
                frid.0, actual, expected
            ),
            TypeError::CyclicTypeParameter { .. } => {
                write!(f, "cyclic dependency among generalized type parameters")
            }
            TypeError::CyclicSynonymTypeDefinition { cycle, .. } => {
                write!(f, "cyclic synonym type definition: ")?;
                for (i, sid) in cycle.iter().enumerate() {
                    if i > 0 {
                        write!(f, " -> ")?;
                    }
                    write!(f, "{sid}")?;
                }
                Ok(())
            }
            TypeError::KindContradiction { .. } => write!(f, "kind contradiction"),
            TypeError::MissingRequiredValName { name, .. } => {
                write!(f, "missing required value: {}", interner::name_of(*name))
            }
            TypeError::MissingRequiredTypeName { name, .. } => {
                write!(f, "missing required type: {}", interner::name_of(*name))
            }
            TypeError::MissingRequiredModuleName { name, .. } => {
                write!(f, "missing required module: {}", interner::name_of(*name))
            }
            TypeError::MissingRequiredSignatureName { name, .. } => {
                write!(f, "missing required signature: {}", interner::name_of(*name))
            }
            TypeError::NotASubtype { name, .. } => {
                write!(
                    f,
                    "value {} does not match the required signature",
                    interner::name_of(*name)
                )
            }
            TypeError::NotASubtypeVariant { found, required, .. } => {
                write!(f, "variant {found} does not match required variant {required}")
            }
            TypeError::NotASubtypeSynonym { found, required, .. } => {
                write!(f, "synonym {found} does not match required synonym {required}")
            }
            TypeError::NotASubtypeTypeOpacity { name, .. } => {
                write!(
                    f,
                    "type {} does not match the required opacity",
                    interner::name_of(*name)
                )
            }
            TypeError::PolymorphicContradiction { found, required, .. } => {
                write!(f, "could not match {found} against required {required}")
            }
            TypeError::ConflictInSignature { name, .. } => {
                write!(f, "name {} conflicts in signature", interner::name_of(*name))
            }
            TypeError::OpaqueIdExtrudesScopeViaType { id, .. } => {
                write!(f, "opaque type {id} escapes its scope via a type")
            }
            TypeError::OpaqueIdExtrudesScopeViaSignature { id, .. } => {
                write!(f, "opaque type {id} escapes its scope via a signature")
            }
            TypeError::CannotFreezeNonGlobalName { name, .. } => {
                write!(f, "cannot freeze non-global name {}", interner::name_of(*name))
            }
        }
    }
}

impl std::error::Error for TypeError {}

/// Non-fatal findings, reported alongside the elaboration output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    UnusedVariable { span: Span, name: Symbol },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::UnusedVariable { name, .. } => {
                write!(f, "unused variable: {}", interner::name_of(*name))
            }
        }
    }
}

/// Boundary error for the build layer sitting above the core.
#[derive(Debug, Error)]
pub enum ElabError {
    #[error("type error in module '{module}' at {span}: {error}", span = .error.span())]
    Type { module: String, error: TypeError },
}
