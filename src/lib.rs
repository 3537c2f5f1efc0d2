//! Type-inference and module-elaboration core for the sest language.
//!
//! The sest language is a statically typed functional language compiled
//! to a dynamically typed runtime with lightweight processes and message
//! passing. This crate is the middle of that compiler:
//! 1. The parser above it hands over an AST (`ast`) with source spans
//! 2. The core infers principal polymorphic types for every binding and
//!    elaborates the ML-style module language (structures, first-order
//!    functors, opaque sealing, `with type` refinement)
//! 3. The code generator below consumes the resolved IR (`ir`), in
//!    which every name is an output name and every call site carries
//!    its optional-argument row

pub mod ast;
pub mod interner;
pub mod ir;
pub mod primitives;
pub mod typechecker;

pub use typechecker::error::{ElabError, TypeError, Warning};
pub use typechecker::{elaborate_root, infer_expr, Elaboration};
