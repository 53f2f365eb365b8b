//! Symbolic operation types.
//!
//! This module defines [`SymbolicOp`], the set of operations supported in
//! symbolic expressions. Every operation works on fixed-width bit-vectors; the
//! signed and unsigned variants of division, remainder, shift and comparison
//! differ only in how the operand bits are interpreted.
//!
//! Operations are categorized as:
//! - **Arithmetic**: Add, Sub, Mul, Div, Rem, Neg
//! - **Bitwise**: And, Or, Xor, Not, Shl, Shr
//! - **Comparison**: Eq, Ne, Lt, Gt, Le, Ge (with signed/unsigned variants)

use std::fmt;

use strum::EnumIter;

/// A symbolic operation in an expression tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter)]
pub enum SymbolicOp {
    // Arithmetic operations
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Signed division.
    DivS,
    /// Unsigned division.
    DivU,
    /// Signed remainder (modulo).
    RemS,
    /// Unsigned remainder (modulo).
    RemU,
    /// Negation.
    Neg,

    // Bitwise operations
    /// Bitwise AND.
    And,
    /// Bitwise OR.
    Or,
    /// Bitwise XOR.
    Xor,
    /// Bitwise NOT.
    Not,
    /// Shift left.
    Shl,
    /// Arithmetic shift right (preserves sign).
    ShrS,
    /// Logical shift right (zero-fill).
    ShrU,

    // Comparison operations (produce a 1-bit result)
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Signed less than.
    LtS,
    /// Unsigned less than.
    LtU,
    /// Signed greater than.
    GtS,
    /// Unsigned greater than.
    GtU,
    /// Signed less than or equal.
    LeS,
    /// Unsigned less than or equal.
    LeU,
    /// Signed greater than or equal.
    GeS,
    /// Unsigned greater than or equal.
    GeU,
}

impl SymbolicOp {
    /// Checks if this operation is commutative.
    ///
    /// Commutative operations produce the same result regardless of operand order:
    /// `a op b == b op a`. Expression construction uses this to move constants to
    /// the right-hand side.
    ///
    /// # Returns
    ///
    /// `true` if the operation is commutative (Add, Mul, And, Or, Xor, Eq, Ne).
    #[must_use]
    pub const fn is_commutative(self) -> bool {
        matches!(
            self,
            Self::Add | Self::Mul | Self::And | Self::Or | Self::Xor | Self::Eq | Self::Ne
        )
    }

    /// Checks if this operation is a comparison.
    ///
    /// Comparison operations produce a 1-bit result regardless of operand width.
    ///
    /// # Returns
    ///
    /// `true` if this is a comparison operation (Eq, Ne, Lt*, Gt*, Le*, Ge*).
    #[must_use]
    pub const fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq
                | Self::Ne
                | Self::LtS
                | Self::LtU
                | Self::GtS
                | Self::GtU
                | Self::LeS
                | Self::LeU
                | Self::GeS
                | Self::GeU
        )
    }

    /// Checks if this is a unary operation.
    ///
    /// # Returns
    ///
    /// `true` if this is a unary operation (Neg, Not).
    #[must_use]
    pub const fn is_unary(self) -> bool {
        matches!(self, Self::Neg | Self::Not)
    }

    /// Returns `true` for division and remainder, whose divisor may be zero.
    #[must_use]
    pub const fn is_division(self) -> bool {
        matches!(self, Self::DivS | Self::DivU | Self::RemS | Self::RemU)
    }

    /// Returns the comparison that holds exactly when `self` does not.
    ///
    /// Non-comparison operations return `None`.
    #[must_use]
    pub const fn negated(self) -> Option<Self> {
        Some(match self {
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::LtS => Self::GeS,
            Self::LtU => Self::GeU,
            Self::GtS => Self::LeS,
            Self::GtU => Self::LeU,
            Self::LeS => Self::GtS,
            Self::LeU => Self::GtU,
            Self::GeS => Self::LtS,
            Self::GeU => Self::LtU,
            _ => return None,
        })
    }
}

impl fmt::Display for SymbolicOp {
    #[allow(clippy::match_same_arms)] // Sub and Neg are semantically different (binary vs unary)
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => write!(f, "+"),
            Self::Sub => write!(f, "-"),
            Self::Mul => write!(f, "*"),
            Self::DivS => write!(f, "/s"),
            Self::DivU => write!(f, "/u"),
            Self::RemS => write!(f, "%s"),
            Self::RemU => write!(f, "%u"),
            Self::Neg => write!(f, "-"),
            Self::And => write!(f, "&"),
            Self::Or => write!(f, "|"),
            Self::Xor => write!(f, "^"),
            Self::Not => write!(f, "~"),
            Self::Shl => write!(f, "<<"),
            Self::ShrS => write!(f, ">>s"),
            Self::ShrU => write!(f, ">>u"),
            Self::Eq => write!(f, "=="),
            Self::Ne => write!(f, "!="),
            Self::LtS => write!(f, "<s"),
            Self::LtU => write!(f, "<u"),
            Self::GtS => write!(f, ">s"),
            Self::GtU => write!(f, ">u"),
            Self::LeS => write!(f, "<=s"),
            Self::LeU => write!(f, "<=u"),
            Self::GeS => write!(f, ">=s"),
            Self::GeU => write!(f, ">=u"),
        }
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_negation_is_involution() {
        for op in SymbolicOp::iter().filter(|op| op.is_comparison()) {
            let negated = op.negated().unwrap();
            assert!(negated.is_comparison());
            assert_eq!(negated.negated(), Some(op));
        }
        assert_eq!(SymbolicOp::Add.negated(), None);
    }

    #[test]
    fn test_categories_are_disjoint() {
        for op in SymbolicOp::iter() {
            assert!(!(op.is_unary() && op.is_comparison()), "{op:?}");
            assert!(!(op.is_unary() && op.is_division()), "{op:?}");
        }
    }
}
