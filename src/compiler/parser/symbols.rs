//! Symbol tables used during syntax analysis and lowering.

use std::collections::HashMap;

use super::types::{Param, Signature, ValueType};

/// Variables declared so far in one function (parameters included).
///
/// Variables are visible from their declaration to the end of the function,
/// regardless of the block they were declared in.
#[derive(Debug, Default, Clone)]
pub struct VariableList {
    vars: HashMap<String, ValueType>,
}

impl VariableList {
    /// Returns a list seeded with the function's parameters.
    #[must_use]
    pub fn from_params(params: &[Param]) -> Self {
        Self {
            vars: params.iter().map(|p| (p.name.clone(), p.ty)).collect(),
        }
    }

    /// Declares `name`. Returns `false` (leaving the list unchanged) if it was
    /// already declared.
    pub fn declare(&mut self, name: &str, ty: ValueType) -> bool {
        if self.vars.contains_key(name) {
            return false;
        }

        self.vars.insert(name.to_string(), ty);
        true
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<ValueType> {
        self.vars.get(name).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Functions known so far in the compilation run.
///
/// Grows monotonically: entries are never removed or replaced.
#[derive(Debug, Default, Clone)]
pub struct DefinedFunctionTable {
    functions: HashMap<String, Signature>,
}

impl DefinedFunctionTable {
    /// Records `sig`. Returns `false` (keeping the first signature) if a
    /// function with the same name is already known.
    pub fn add(&mut self, sig: Signature) -> bool {
        if self.functions.contains_key(&sig.name) {
            return false;
        }

        self.functions.insert(sig.name.clone(), sig);
        true
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Signature> {
        self.functions.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variables_reject_redeclaration() {
        let mut vars = VariableList::from_params(&[Param {
            name: "n".into(),
            ty: ValueType::Int,
        }]);

        assert!(!vars.declare("n", ValueType::Float));
        assert_eq!(vars.get("n"), Some(ValueType::Int));
        assert!(vars.declare("x", ValueType::Float));
        assert_eq!(vars.len(), 2);
    }

    #[test]
    fn function_table_keeps_first_entry() {
        let sig = |ret| Signature {
            name: "f".into(),
            params: Vec::new(),
            ret,
            variadic: false,
            external: false,
        };

        let mut table = DefinedFunctionTable::default();
        assert!(table.add(sig(ValueType::Int)));
        assert!(!table.add(sig(ValueType::Float)));
        assert_eq!(table.get("f").map(|s| s.ret), Some(ValueType::Int));
        assert_eq!(table.len(), 1);
    }
}
