//! Multi-stage pipeline for compiling _Quill_ source code into textual
//! assembly.

pub mod codegen;
pub mod driver;
pub mod emit;
pub mod ir;
pub mod lexer;
pub mod opt;
pub mod parser;
pub mod pipeline;
pub mod preprocess;
pub mod split;
pub mod toolchain;
