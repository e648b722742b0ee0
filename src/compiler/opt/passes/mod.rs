//! Machine-independent Optimization
//!
//! Optimization passes that transform an intermediate representation (_IR_) in
//! a target-agnostic way.

pub mod dse;
pub mod fold;
pub mod optimize;

pub use dse::dead_store;
pub use fold::fold_ir_const;
pub use optimize::optimize_ir;
