//! Fresh symbol names.

use crate::symbolic::SymbolicExpr;

/// Hands out symbols that are unique within one execution state and its descendants.
///
/// Names have the form `{hint}#{n}`. Forked states continue from the same counter, so two
/// siblings may reuse a name for different inputs; that is harmless because siblings never
/// share a path condition.
#[derive(Debug, Clone, Default)]
pub struct SymbolGenerator {
    next: u64,
}

impl SymbolGenerator {
    /// Creates a generator starting at zero.
    #[must_use]
    pub const fn new() -> Self {
        SymbolGenerator { next: 0 }
    }

    /// Returns a new symbol of `width` bits.
    pub fn fresh(&mut self, hint: &str, width: u32) -> SymbolicExpr {
        let name = format!("{hint}#{}", self.next);
        self.next += 1;
        SymbolicExpr::symbol(name, width)
    }

    /// Number of symbols generated so far.
    #[must_use]
    pub const fn count(&self) -> u64 {
        self.next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_symbols_are_distinct() {
        let mut symbols = SymbolGenerator::new();
        let a = symbols.fresh("uninit", 8);
        let b = symbols.fresh("uninit", 8);
        assert_ne!(a, b);
        assert_eq!(a.as_symbol(), Some("uninit#0"));
        assert_eq!(symbols.count(), 2);
    }
}
