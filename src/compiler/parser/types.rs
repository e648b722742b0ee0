//! _Quill_ Types
//!
//! Value types and function signatures shared by every pipeline stage after
//! lexing.

use std::fmt;

/// Type specifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// 32-bit signed integer.
    Int,
    /// 32-bit IEEE-754 float.
    Float,
    Void,
    /// String literal (only as an `extern` parameter type).
    Str,
}

impl ValueType {
    /// Size in bytes of a value of this type in a stack slot.
    #[must_use]
    pub const fn size(self) -> i32 {
        match self {
            ValueType::Void => 0,
            ValueType::Int | ValueType::Float | ValueType::Str => 4,
        }
    }

    /// Returns `true` for types usable in arithmetic.
    #[must_use]
    pub const fn is_scalar(self) -> bool {
        matches!(self, ValueType::Int | ValueType::Float)
    }

    /// Result type of an arithmetic operation between `self` and `other`:
    /// mixed `int`/`float` operands promote to `float`.
    #[must_use]
    pub const fn common(self, other: Self) -> Self {
        match (self, other) {
            (ValueType::Float, _) | (_, ValueType::Float) => ValueType::Float,
            _ => ValueType::Int,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Int => write!(f, "int"),
            ValueType::Float => write!(f, "float"),
            ValueType::Void => write!(f, "void"),
            ValueType::Str => write!(f, "string"),
        }
    }
}

/// Named, typed function parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub ty: ValueType,
}

/// Function signature, for both definitions and `extern` declarations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: ValueType,
    /// Accepts extra arguments after `params` (`...`).
    pub variadic: bool,
    /// Declared with `extern`, defined outside the module.
    pub external: bool,
}

impl Signature {
    /// Assembly symbol of the function (_cdecl_ leading underscore).
    #[must_use]
    pub fn symbol(&self) -> String {
        format!("_{}", self.name)
    }

    /// Returns `true` if a call with `count` arguments is valid.
    #[must_use]
    pub fn accepts_arity(&self, count: usize) -> bool {
        if self.variadic {
            count >= self.params.len()
        } else {
            count == self.params.len()
        }
    }

    /// Type expected for argument `index`, or `None` if it falls in the
    /// variadic part.
    #[must_use]
    pub fn param_type(&self, index: usize) -> Option<ValueType> {
        self.params.get(index).map(|p| p.ty)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}(", self.ret, self.name)?;

        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} {}", param.ty, param.name)?;
        }

        if self.variadic {
            if self.params.is_empty() {
                write!(f, "...")?;
            } else {
                write!(f, ", ...")?;
            }
        }

        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn printf() -> Signature {
        Signature {
            name: "printf".into(),
            params: vec![Param {
                name: "fmt".into(),
                ty: ValueType::Str,
            }],
            ret: ValueType::Int,
            variadic: true,
            external: true,
        }
    }

    #[test]
    fn variadic_arity_is_a_lower_bound() {
        let sig = printf();

        assert!(!sig.accepts_arity(0));
        assert!(sig.accepts_arity(1));
        assert!(sig.accepts_arity(4));
        assert_eq!(sig.param_type(0), Some(ValueType::Str));
        assert_eq!(sig.param_type(1), None);
    }

    #[test]
    fn signature_display() {
        assert_eq!(printf().to_string(), "int printf(string fmt, ...)");
        assert_eq!(printf().symbol(), "_printf");
    }

    #[test]
    fn mixed_arithmetic_promotes() {
        assert_eq!(ValueType::Int.common(ValueType::Float), ValueType::Float);
        assert_eq!(ValueType::Int.common(ValueType::Int), ValueType::Int);
    }
}
