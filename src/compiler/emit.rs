//! Code Emission.
//!
//! Compiler pass that merges the assembly blocks of every function with the
//! data segment into a single NASM module.

use std::fmt;

use crate::compiler::codegen::{AsmBlock, DataEntry};
use crate::compiler::lexer::Include;
use crate::compiler::parser::types::Signature;

/// Complete NASM module (`build.asm`).
#[derive(Debug, Clone)]
pub struct Module {
    /// Modules named by include directives, in source order.
    pub includes: Vec<String>,
    /// Symbols of `extern` declarations.
    pub externs: Vec<String>,
    /// Symbols of defined functions.
    pub globals: Vec<String>,
    pub data: Vec<DataEntry>,
    /// Function blocks in definition order.
    pub blocks: Vec<AsmBlock>,
}

/// Assembles the final module from the function blocks (in definition order)
/// and the top-level declarations of the source file.
#[must_use]
pub fn assemble_module(includes: &[Include], externs: &[Signature], blocks: Vec<AsmBlock>) -> Module {
    let mut seen = Vec::new();

    for include in includes {
        if !seen.contains(&include.module) {
            seen.push(include.module.clone());
        }
    }

    Module {
        includes: seen,
        externs: externs.iter().map(Signature::symbol).collect(),
        globals: blocks.iter().map(|b| format!("_{}", b.name)).collect(),
        data: blocks.iter().flat_map(|b| b.data.iter().cloned()).collect(),
        blocks,
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for module in &self.includes {
            writeln!(f, "%include \"{module}.asm\"")?;
        }

        if !self.includes.is_empty() {
            writeln!(f)?;
        }

        for symbol in &self.externs {
            writeln!(f, "extern {symbol}")?;
        }

        for symbol in &self.globals {
            writeln!(f, "global {symbol}")?;
        }

        if !self.data.is_empty() {
            writeln!(f, "\nsection .data")?;

            for entry in &self.data {
                writeln!(f, "    {entry}")?;
            }
        }

        writeln!(f, "\nsection .text")?;

        for block in &self.blocks {
            write!(f, "{block}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::lexer::Location;
    use crate::compiler::parser::types::ValueType;

    fn block(name: &str, data: Vec<DataEntry>) -> AsmBlock {
        AsmBlock {
            name: name.into(),
            lines: vec![format!("_{name}:"), "    ret".into()],
            data,
        }
    }

    fn include(module: &str) -> Include {
        Include {
            module: module.into(),
            loc: Location {
                line: 1,
                col: 1,
                line_span: 0..0,
            },
        }
    }

    #[test]
    fn module_lists_declarations() {
        let printf = Signature {
            name: "printf".into(),
            params: Vec::new(),
            ret: ValueType::Int,
            variadic: true,
            external: true,
        };

        let module = assemble_module(
            &[include("io"), include("io")],
            &[printf],
            vec![
                block(
                    "square",
                    vec![DataEntry::Float {
                        label: "__float0".into(),
                        value: 1.0,
                    }],
                ),
                block("main", Vec::new()),
            ],
        );

        assert_eq!(
            module.to_string(),
            "%include \"io.asm\"\n\n\
             extern _printf\n\
             global _square\n\
             global _main\n\
             \n\
             section .data\n    \
             __float0 dd 0x3F800000\n\
             \n\
             section .text\n\
             _square:\n    ret\n\
             _main:\n    ret\n"
        );
    }

    #[test]
    fn module_without_data_has_no_data_section() {
        let module = assemble_module(&[], &[], vec![block("main", Vec::new())]);
        let text = module.to_string();

        assert!(!text.contains("section .data"));
        assert!(text.starts_with("global _main\n\nsection .text\n_main:"));
    }
}
