//! Compiler Optimization
//!
//! Passes over the intermediate representation (_IR_) of one function that
//! reduce redundancy without changing observable behavior.

#[cfg(test)]
pub(crate) mod interp;
pub mod passes;

pub use passes::optimize_ir;
