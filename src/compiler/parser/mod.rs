//! Syntax and Semantics
//!
//! Compiler passes responsible for validating a function body and building
//! its abstract representation.

pub mod ast;
pub mod postfix;
pub mod sema;
pub mod symbols;
pub mod types;
