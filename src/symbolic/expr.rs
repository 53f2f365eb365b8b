//! Symbolic bit-vector expressions.
//!
//! This module defines [`SymbolicExpr`], the value representation shared by the memory
//! model, the interpreter and the solver seam. An expression is an immutable, reference
//! counted node carrying its bit width and a precomputed hash, so cloning is a pointer copy
//! and structurally shared sub-trees (the norm after a few memory round trips) cost nothing.
//!
//! All construction goes through smart constructors that fold constants and apply the usual
//! algebraic identities. Folding matters beyond tidiness: a 32-bit value stored to memory is
//! split into four byte slices and reading it back concatenates them again, and the
//! [`SymbolicExpr::concat`] / [`SymbolicExpr::extract`] rules collapse that round trip to the
//! original expression.
//!
//! Concrete evaluation follows SMT-LIB bit-vector semantics, so a model produced by any
//! backend evaluates identically here.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use rustc_hash::{FxHashMap, FxHashSet, FxHasher};

use crate::symbolic::ops::SymbolicOp;

/// A concrete value for every symbol of interest, keyed by symbol name.
pub type Assignment = FxHashMap<Arc<str>, u64>;

/// Returns a mask with the low `width` bits set.
#[must_use]
pub const fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Interprets the low `width` bits of `value` as a two's complement integer.
#[must_use]
pub const fn sign_extend(value: u64, width: u32) -> i64 {
    if width >= 64 {
        value as i64
    } else {
        let shift = 64 - width;
        ((value << shift) as i64) >> shift
    }
}

/// A symbolic bit-vector expression of a fixed width in `1..=64`.
///
/// Width-1 expressions double as booleans: comparisons produce them and the
/// `logical_*` helpers combine them.
#[derive(Clone)]
pub struct SymbolicExpr(Arc<ExprNode>);

#[derive(Debug)]
struct ExprNode {
    kind: ExprKind,
    width: u32,
    hash: u64,
}

/// The shape of an expression node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExprKind {
    /// A literal, stored masked to the node width.
    Constant(u64),
    /// A free input symbol.
    Symbol(Arc<str>),
    /// A unary operation (`Neg` or `Not`).
    Unary {
        /// The operation to perform.
        op: SymbolicOp,
        /// The operand.
        operand: SymbolicExpr,
    },
    /// A binary operation. Both operands share one width.
    Binary {
        /// The operation to perform.
        op: SymbolicOp,
        /// The left operand.
        left: SymbolicExpr,
        /// The right operand.
        right: SymbolicExpr,
    },
    /// If-then-else on a 1-bit condition.
    Ite {
        /// The condition.
        cond: SymbolicExpr,
        /// Value when the condition is 1.
        then: SymbolicExpr,
        /// Value when the condition is 0.
        otherwise: SymbolicExpr,
    },
    /// Bits `high..=low` of the operand.
    Extract {
        /// Highest bit, inclusive.
        high: u32,
        /// Lowest bit, inclusive.
        low: u32,
        /// The sliced expression.
        operand: SymbolicExpr,
    },
    /// Bit concatenation; `high` occupies the most significant bits.
    Concat {
        /// Most significant part.
        high: SymbolicExpr,
        /// Least significant part.
        low: SymbolicExpr,
    },
    /// Zero extension to the node width.
    ZeroExtend {
        /// The narrower operand.
        operand: SymbolicExpr,
    },
    /// Sign extension to the node width.
    SignExtend {
        /// The narrower operand.
        operand: SymbolicExpr,
    },
}

impl SymbolicExpr {
    fn make(kind: ExprKind, width: u32) -> Self {
        let mut hasher = FxHasher::default();
        kind.hash(&mut hasher);
        width.hash(&mut hasher);
        SymbolicExpr(Arc::new(ExprNode {
            kind,
            width,
            hash: hasher.finish(),
        }))
    }

    /// Creates a constant of the given width. Bits above `width` are discarded.
    #[must_use]
    pub fn constant(value: u64, width: u32) -> Self {
        debug_assert!((1..=64).contains(&width), "invalid width {width}");
        Self::make(ExprKind::Constant(value & mask(width)), width)
    }

    /// Creates a constant from a signed value, truncated to `width` bits.
    #[must_use]
    pub fn from_i64(value: i64, width: u32) -> Self {
        Self::constant(value as u64, width)
    }

    /// Creates the 1-bit constant for `value`.
    #[must_use]
    pub fn truth(value: bool) -> Self {
        Self::constant(u64::from(value), 1)
    }

    /// Creates a free symbol.
    ///
    /// Two symbols with the same name denote the same input.
    #[must_use]
    pub fn symbol(name: impl Into<Arc<str>>, width: u32) -> Self {
        debug_assert!((1..=64).contains(&width), "invalid width {width}");
        Self::make(ExprKind::Symbol(name.into()), width)
    }

    /// Bit width of the expression.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.0.width
    }

    /// Node shape, for pattern matching.
    #[must_use]
    pub fn kind(&self) -> &ExprKind {
        &self.0.kind
    }

    /// Returns the value if this is a constant.
    #[must_use]
    pub fn as_constant(&self) -> Option<u64> {
        match self.0.kind {
            ExprKind::Constant(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the two's complement value if this is a constant.
    #[must_use]
    pub fn as_signed(&self) -> Option<i64> {
        self.as_constant().map(|v| sign_extend(v, self.width()))
    }

    /// Returns the symbol name if this is a bare symbol.
    #[must_use]
    pub fn as_symbol(&self) -> Option<&str> {
        match &self.0.kind {
            ExprKind::Symbol(name) => Some(name),
            _ => None,
        }
    }

    /// Checks if this expression is a constant.
    #[must_use]
    pub fn is_constant(&self) -> bool {
        matches!(self.0.kind, ExprKind::Constant(_))
    }

    /// `true` only for the 1-bit constant 1.
    #[must_use]
    pub fn is_true(&self) -> bool {
        self.width() == 1 && self.as_constant() == Some(1)
    }

    /// `true` only for the 1-bit constant 0.
    #[must_use]
    pub fn is_false(&self) -> bool {
        self.width() == 1 && self.as_constant() == Some(0)
    }

    /// Returns `true` if both handles point at the same node.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Creates a unary operation expression.
    ///
    /// # Arguments
    ///
    /// * `op` - The unary operation (Neg or Not).
    /// * `operand` - The operand expression.
    ///
    /// # Returns
    ///
    /// The folded expression. Constants are evaluated, double negation cancels and the
    /// negation of a comparison becomes the inverse comparison.
    #[must_use]
    pub fn unary(op: SymbolicOp, operand: Self) -> Self {
        debug_assert!(op.is_unary(), "{op:?} is not unary");
        let width = operand.width();
        if let Some(v) = operand.as_constant() {
            return Self::constant(evaluate_unary(op, v, width), width);
        }
        if let ExprKind::Unary {
            op: inner,
            operand: x,
        } = operand.kind()
        {
            if *inner == op {
                return x.clone();
            }
        }
        if op == SymbolicOp::Not && width == 1 {
            if let ExprKind::Binary { op: cmp, left, right } = operand.kind() {
                if let Some(inverse) = cmp.negated() {
                    return Self::binary(inverse, left.clone(), right.clone());
                }
            }
        }
        Self::make(ExprKind::Unary { op, operand }, width)
    }

    /// Creates a binary operation expression.
    ///
    /// Both operands must have the same width. Comparisons produce a 1-bit result; every
    /// other operation keeps the operand width.
    ///
    /// # Arguments
    ///
    /// * `op` - The binary operation (Add, Sub, Mul, etc.).
    /// * `left` - The left operand expression.
    /// * `right` - The right operand expression.
    ///
    /// # Returns
    ///
    /// The folded expression.
    #[must_use]
    pub fn binary(op: SymbolicOp, left: Self, right: Self) -> Self {
        debug_assert!(!op.is_unary(), "{op:?} is unary");
        debug_assert_eq!(left.width(), right.width(), "width mismatch for {op:?}");
        let width = left.width();
        let result_width = if op.is_comparison() { 1 } else { width };

        if let (Some(a), Some(b)) = (left.as_constant(), right.as_constant()) {
            return Self::constant(evaluate_binary(op, a, b, width), result_width);
        }

        let (left, right) = if op.is_commutative() && left.is_constant() {
            (right, left)
        } else {
            (left, right)
        };

        if let Some(folded) = Self::fold_identity(op, &left, &right, width) {
            return folded;
        }
        Self::make(ExprKind::Binary { op, left, right }, result_width)
    }

    #[allow(clippy::match_same_arms)] // Documents distinct algebraic identities: x*0=0 vs x&0=0
    fn fold_identity(op: SymbolicOp, left: &Self, right: &Self, width: u32) -> Option<Self> {
        use SymbolicOp::{
            Add, And, DivS, DivU, Eq, GeS, GeU, GtS, GtU, LeS, LeU, LtS, LtU, Mul, Ne, Or, Shl,
            ShrS, ShrU, Sub, Xor,
        };

        let ones = mask(width);
        let same = left == right;
        match (op, right.as_constant()) {
            (Add | Sub | Or | Xor | Shl | ShrS | ShrU, Some(0)) => Some(left.clone()),
            (Mul | And, Some(0)) => Some(Self::constant(0, width)),
            (Mul | DivS | DivU, Some(1)) => Some(left.clone()),
            (And, Some(c)) if c == ones => Some(left.clone()),
            (Or, Some(c)) if c == ones => Some(Self::constant(ones, width)),
            (LtU, Some(0)) => Some(Self::truth(false)),
            (GeU, Some(0)) => Some(Self::truth(true)),
            (Sub | Xor, _) if same => Some(Self::constant(0, width)),
            (And | Or, _) if same => Some(left.clone()),
            (Eq | LeS | LeU | GeS | GeU, _) if same => Some(Self::truth(true)),
            (Ne | LtS | LtU | GtS | GtU, _) if same => Some(Self::truth(false)),
            (Eq, Some(c)) => Self::fold_equality(left, c, width),
            (Ne, Some(c)) => Self::fold_equality(left, c, width).map(|e| e.logical_not()),
            _ => None,
        }
    }

    /// Rewrites `left == c` into a simpler equivalent when one exists.
    fn fold_equality(left: &Self, c: u64, width: u32) -> Option<Self> {
        if width == 1 {
            return Some(if c == 1 {
                left.clone()
            } else {
                left.logical_not()
            });
        }
        match left.kind() {
            ExprKind::Ite {
                cond,
                then,
                otherwise,
            } => {
                let (t, e) = (then.as_constant()?, otherwise.as_constant()?);
                Some(match (t == c, e == c) {
                    (true, true) => Self::truth(true),
                    (true, false) => cond.clone(),
                    (false, true) => cond.logical_not(),
                    (false, false) => Self::truth(false),
                })
            }
            ExprKind::ZeroExtend { operand } => {
                let inner = operand.width();
                if c > mask(inner) {
                    Some(Self::truth(false))
                } else {
                    Some(operand.equals(&Self::constant(c, inner)))
                }
            }
            ExprKind::Binary {
                op: SymbolicOp::Add,
                left: x,
                right: k,
            } => {
                let k = k.as_constant()?;
                Some(x.equals(&Self::constant(c.wrapping_sub(k), width)))
            }
            ExprKind::Binary {
                op: SymbolicOp::Sub,
                left: x,
                right: k,
            } => {
                let k = k.as_constant()?;
                Some(x.equals(&Self::constant(c.wrapping_add(k), width)))
            }
            _ => None,
        }
    }

    /// Creates an if-then-else expression.
    ///
    /// # Arguments
    ///
    /// * `cond` - A 1-bit condition.
    /// * `then` - Value when `cond` holds.
    /// * `otherwise` - Value when it does not; same width as `then`.
    #[must_use]
    pub fn ite(cond: Self, then: Self, otherwise: Self) -> Self {
        debug_assert_eq!(cond.width(), 1);
        debug_assert_eq!(then.width(), otherwise.width());
        if let Some(c) = cond.as_constant() {
            return if c != 0 { then } else { otherwise };
        }
        if then == otherwise {
            return then;
        }
        let width = then.width();
        if width == 1 {
            match (then.as_constant(), otherwise.as_constant()) {
                (Some(1), Some(0)) => return cond,
                (Some(0), Some(1)) => return cond.logical_not(),
                _ => {}
            }
        }
        if let ExprKind::Unary {
            op: SymbolicOp::Not,
            operand,
        } = cond.kind()
        {
            return Self::ite(operand.clone(), otherwise, then);
        }
        Self::make(
            ExprKind::Ite {
                cond,
                then,
                otherwise,
            },
            width,
        )
    }

    /// Extracts bits `high..=low`.
    #[must_use]
    pub fn extract(high: u32, low: u32, operand: Self) -> Self {
        debug_assert!(high >= low && high < operand.width(), "bad slice");
        let width = high - low + 1;
        if low == 0 && width == operand.width() {
            return operand;
        }
        if let Some(v) = operand.as_constant() {
            return Self::constant(v >> low, width);
        }
        match operand.kind() {
            ExprKind::Extract {
                low: inner_low,
                operand: inner,
                ..
            } => return Self::extract(high + inner_low, low + inner_low, inner.clone()),
            ExprKind::Concat { high: hi, low: lo } => {
                let split = lo.width();
                if high < split {
                    return Self::extract(high, low, lo.clone());
                }
                if low >= split {
                    return Self::extract(high - split, low - split, hi.clone());
                }
            }
            ExprKind::ZeroExtend { operand: inner } => {
                let inner_width = inner.width();
                if high < inner_width {
                    return Self::extract(high, low, inner.clone());
                }
                if low >= inner_width {
                    return Self::constant(0, width);
                }
            }
            ExprKind::SignExtend { operand: inner } if high < inner.width() => {
                return Self::extract(high, low, inner.clone());
            }
            _ => {}
        }
        Self::make(
            ExprKind::Extract {
                high,
                low,
                operand,
            },
            width,
        )
    }

    /// Concatenates two expressions; the result is at most 64 bits wide.
    #[must_use]
    pub fn concat(high: Self, low: Self) -> Self {
        let width = high.width() + low.width();
        debug_assert!(width <= 64, "concat wider than 64 bits");
        if let (Some(h), Some(l)) = (high.as_constant(), low.as_constant()) {
            return Self::constant((h << low.width()) | l, width);
        }
        if high.as_constant() == Some(0) {
            return Self::zero_extend(low, width);
        }
        if let (
            ExprKind::Extract {
                high: hh,
                low: hl,
                operand: ho,
            },
            ExprKind::Extract {
                high: lh,
                low: ll,
                operand: lo,
            },
        ) = (high.kind(), low.kind())
        {
            if ho == lo && *hl == lh + 1 {
                return Self::extract(*hh, *ll, ho.clone());
            }
        }
        // A slice resting directly on the low bits of its own operand: x[h:k] ++ x[k-1:0]
        if let ExprKind::Extract {
            high: hh,
            low: hl,
            operand: ho,
        } = high.kind()
        {
            if *ho == low && *hl == low.width() {
                return Self::extract(*hh, 0, low);
            }
        }
        Self::make(ExprKind::Concat { high, low }, width)
    }

    /// Zero-extends to `width` bits.
    #[must_use]
    pub fn zero_extend(operand: Self, width: u32) -> Self {
        let from = operand.width();
        debug_assert!(width >= from);
        if width == from {
            return operand;
        }
        if let Some(v) = operand.as_constant() {
            return Self::constant(v, width);
        }
        if let ExprKind::ZeroExtend { operand: inner } = operand.kind() {
            return Self::zero_extend(inner.clone(), width);
        }
        Self::make(ExprKind::ZeroExtend { operand }, width)
    }

    /// Sign-extends to `width` bits.
    #[must_use]
    pub fn sign_extend(operand: Self, width: u32) -> Self {
        let from = operand.width();
        debug_assert!(width >= from);
        if width == from {
            return operand;
        }
        if let Some(v) = operand.as_constant() {
            return Self::from_i64(sign_extend(v, from), width);
        }
        if let ExprKind::SignExtend { operand: inner } = operand.kind() {
            return Self::sign_extend(inner.clone(), width);
        }
        Self::make(ExprKind::SignExtend { operand }, width)
    }

    /// Truncates, zero-extends or sign-extends to `width` bits.
    #[must_use]
    pub fn resize(operand: Self, width: u32, signed: bool) -> Self {
        let from = operand.width();
        if width < from {
            Self::extract(width - 1, 0, operand)
        } else if signed {
            Self::sign_extend(operand, width)
        } else {
            Self::zero_extend(operand, width)
        }
    }

    /// `self == other` as a 1-bit expression.
    #[must_use]
    pub fn equals(&self, other: &Self) -> Self {
        Self::binary(SymbolicOp::Eq, self.clone(), other.clone())
    }

    /// `self != other` as a 1-bit expression.
    #[must_use]
    pub fn not_equals(&self, other: &Self) -> Self {
        Self::binary(SymbolicOp::Ne, self.clone(), other.clone())
    }

    /// Boolean negation of a 1-bit expression.
    #[must_use]
    pub fn logical_not(&self) -> Self {
        Self::unary(SymbolicOp::Not, self.clone())
    }

    /// Boolean conjunction of two 1-bit expressions.
    #[must_use]
    pub fn logical_and(&self, other: &Self) -> Self {
        Self::binary(SymbolicOp::And, self.clone(), other.clone())
    }

    /// Boolean disjunction of two 1-bit expressions.
    #[must_use]
    pub fn logical_or(&self, other: &Self) -> Self {
        Self::binary(SymbolicOp::Or, self.clone(), other.clone())
    }

    /// Conjunction of any number of 1-bit expressions; `true` when empty.
    #[must_use]
    pub fn conjunction<'a>(exprs: impl IntoIterator<Item = &'a Self>) -> Self {
        exprs
            .into_iter()
            .fold(Self::truth(true), |acc, e| acc.logical_and(e))
    }

    /// Evaluates the expression under a complete assignment.
    ///
    /// # Returns
    ///
    /// `None` if a symbol in the expression has no value in `assignment`.
    #[must_use]
    pub fn evaluate(&self, assignment: &Assignment) -> Option<u64> {
        let mut cache = FxHashMap::default();
        self.evaluate_cached(assignment, &mut cache)
    }

    /// Evaluates with a caller-provided memo table.
    ///
    /// The table is keyed by node identity and is only valid for a single assignment;
    /// sharing it across the constraints of one query avoids re-evaluating common
    /// sub-expressions.
    pub fn evaluate_cached(
        &self,
        assignment: &Assignment,
        cache: &mut FxHashMap<usize, u64>,
    ) -> Option<u64> {
        let key = Arc::as_ptr(&self.0) as usize;
        if let Some(v) = cache.get(&key) {
            return Some(*v);
        }

        let value = match &self.0.kind {
            ExprKind::Constant(v) => return Some(*v),
            ExprKind::Symbol(name) => assignment.get(name)? & mask(self.width()),
            ExprKind::Unary { op, operand } => {
                evaluate_unary(*op, operand.evaluate_cached(assignment, cache)?, self.width())
            }
            ExprKind::Binary { op, left, right } => {
                let l = left.evaluate_cached(assignment, cache)?;
                let r = right.evaluate_cached(assignment, cache)?;
                evaluate_binary(*op, l, r, left.width())
            }
            ExprKind::Ite {
                cond,
                then,
                otherwise,
            } => {
                if cond.evaluate_cached(assignment, cache)? != 0 {
                    then.evaluate_cached(assignment, cache)?
                } else {
                    otherwise.evaluate_cached(assignment, cache)?
                }
            }
            ExprKind::Extract { high, low, operand } => {
                (operand.evaluate_cached(assignment, cache)? >> low) & mask(high - low + 1)
            }
            ExprKind::Concat { high, low } => {
                let h = high.evaluate_cached(assignment, cache)?;
                let l = low.evaluate_cached(assignment, cache)?;
                (h << low.width()) | l
            }
            ExprKind::ZeroExtend { operand } => operand.evaluate_cached(assignment, cache)?,
            ExprKind::SignExtend { operand } => {
                let v = operand.evaluate_cached(assignment, cache)?;
                (sign_extend(v, operand.width()) as u64) & mask(self.width())
            }
        };
        cache.insert(key, value);
        Some(value)
    }

    /// Collects the free symbols of the expression with their widths.
    #[must_use]
    pub fn symbols(&self) -> BTreeMap<Arc<str>, u32> {
        let mut out = BTreeMap::new();
        let mut visited = FxHashSet::default();
        self.collect_symbols(&mut out, &mut visited);
        out
    }

    /// Adds the free symbols of the expression to `out`.
    ///
    /// `visited` holds node identities already traversed and may be shared across calls.
    pub fn collect_symbols(
        &self,
        out: &mut BTreeMap<Arc<str>, u32>,
        visited: &mut FxHashSet<usize>,
    ) {
        if !visited.insert(Arc::as_ptr(&self.0) as usize) {
            return;
        }
        match &self.0.kind {
            ExprKind::Constant(_) => {}
            ExprKind::Symbol(name) => {
                out.insert(name.clone(), self.width());
            }
            ExprKind::Unary { operand, .. }
            | ExprKind::Extract { operand, .. }
            | ExprKind::ZeroExtend { operand }
            | ExprKind::SignExtend { operand } => operand.collect_symbols(out, visited),
            ExprKind::Binary { left, right, .. } => {
                left.collect_symbols(out, visited);
                right.collect_symbols(out, visited);
            }
            ExprKind::Concat { high, low } => {
                high.collect_symbols(out, visited);
                low.collect_symbols(out, visited);
            }
            ExprKind::Ite {
                cond,
                then,
                otherwise,
            } => {
                cond.collect_symbols(out, visited);
                then.collect_symbols(out, visited);
                otherwise.collect_symbols(out, visited);
            }
        }
    }

    /// Collects the signed values of all constants wider than one bit.
    pub fn collect_constants(&self, out: &mut BTreeSet<i64>, visited: &mut FxHashSet<usize>) {
        if !visited.insert(Arc::as_ptr(&self.0) as usize) {
            return;
        }
        match &self.0.kind {
            ExprKind::Constant(v) => {
                if self.width() > 1 {
                    out.insert(sign_extend(*v, self.width()));
                }
            }
            ExprKind::Symbol(_) => {}
            ExprKind::Unary { operand, .. }
            | ExprKind::Extract { operand, .. }
            | ExprKind::ZeroExtend { operand }
            | ExprKind::SignExtend { operand } => operand.collect_constants(out, visited),
            ExprKind::Binary { left, right, .. } => {
                left.collect_constants(out, visited);
                right.collect_constants(out, visited);
            }
            ExprKind::Concat { high, low } => {
                high.collect_constants(out, visited);
                low.collect_constants(out, visited);
            }
            ExprKind::Ite {
                cond,
                then,
                otherwise,
            } => {
                cond.collect_constants(out, visited);
                then.collect_constants(out, visited);
                otherwise.collect_constants(out, visited);
            }
        }
    }

    /// Replaces symbols by expressions and re-folds the result.
    ///
    /// # Arguments
    ///
    /// * `bindings` - Replacement per symbol name; each replacement must have the
    ///   symbol's width. Unbound symbols are kept.
    #[must_use]
    pub fn substitute(&self, bindings: &FxHashMap<Arc<str>, SymbolicExpr>) -> Self {
        let mut memo = FxHashMap::default();
        self.substitute_cached(bindings, &mut memo)
    }

    fn substitute_cached(
        &self,
        bindings: &FxHashMap<Arc<str>, SymbolicExpr>,
        memo: &mut FxHashMap<usize, SymbolicExpr>,
    ) -> Self {
        let key = Arc::as_ptr(&self.0) as usize;
        if let Some(done) = memo.get(&key) {
            return done.clone();
        }
        let result = match &self.0.kind {
            ExprKind::Constant(_) => return self.clone(),
            ExprKind::Symbol(name) => bindings.get(name).cloned().unwrap_or_else(|| self.clone()),
            ExprKind::Unary { op, operand } => {
                Self::unary(*op, operand.substitute_cached(bindings, memo))
            }
            ExprKind::Binary { op, left, right } => Self::binary(
                *op,
                left.substitute_cached(bindings, memo),
                right.substitute_cached(bindings, memo),
            ),
            ExprKind::Ite {
                cond,
                then,
                otherwise,
            } => Self::ite(
                cond.substitute_cached(bindings, memo),
                then.substitute_cached(bindings, memo),
                otherwise.substitute_cached(bindings, memo),
            ),
            ExprKind::Extract { high, low, operand } => {
                Self::extract(*high, *low, operand.substitute_cached(bindings, memo))
            }
            ExprKind::Concat { high, low } => Self::concat(
                high.substitute_cached(bindings, memo),
                low.substitute_cached(bindings, memo),
            ),
            ExprKind::ZeroExtend { operand } => {
                Self::zero_extend(operand.substitute_cached(bindings, memo), self.width())
            }
            ExprKind::SignExtend { operand } => {
                Self::sign_extend(operand.substitute_cached(bindings, memo), self.width())
            }
        };
        memo.insert(key, result.clone());
        result
    }

    /// Returns the depth of the expression tree.
    #[must_use]
    pub fn depth(&self) -> usize {
        match &self.0.kind {
            ExprKind::Constant(_) | ExprKind::Symbol(_) => 1,
            ExprKind::Unary { operand, .. }
            | ExprKind::Extract { operand, .. }
            | ExprKind::ZeroExtend { operand }
            | ExprKind::SignExtend { operand } => 1 + operand.depth(),
            ExprKind::Binary { left, right, .. } => 1 + left.depth().max(right.depth()),
            ExprKind::Concat { high, low } => 1 + high.depth().max(low.depth()),
            ExprKind::Ite {
                cond,
                then,
                otherwise,
            } => 1 + cond.depth().max(then.depth()).max(otherwise.depth()),
        }
    }
}

impl PartialEq for SymbolicExpr {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
            || (self.0.hash == other.0.hash
                && self.0.width == other.0.width
                && self.0.kind == other.0.kind)
    }
}

impl Eq for SymbolicExpr {}

impl Hash for SymbolicExpr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash);
    }
}

impl fmt::Debug for SymbolicExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for SymbolicExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.kind {
            ExprKind::Constant(v) => {
                if self.width() == 1 {
                    write!(f, "{}", *v == 1)
                } else {
                    let signed = sign_extend(*v, self.width());
                    if signed.unsigned_abs() < (1 << 16) {
                        write!(f, "{signed}")
                    } else {
                        write!(f, "{v:#x}")
                    }
                }
            }
            ExprKind::Symbol(name) => write!(f, "{name}"),
            ExprKind::Unary { op, operand } => write!(f, "{op}{operand}"),
            ExprKind::Binary { op, left, right } => write!(f, "({left} {op} {right})"),
            ExprKind::Ite {
                cond,
                then,
                otherwise,
            } => write!(f, "(ite {cond} {then} {otherwise})"),
            ExprKind::Extract { high, low, operand } => write!(f, "{operand}[{high}:{low}]"),
            ExprKind::Concat { high, low } => write!(f, "({high} ++ {low})"),
            ExprKind::ZeroExtend { operand } => write!(f, "zext{}({operand})", self.width()),
            ExprKind::SignExtend { operand } => write!(f, "sext{}({operand})", self.width()),
        }
    }
}

/// Evaluates a unary operation on a concrete value.
///
/// # Arguments
///
/// * `op` - The unary operation.
/// * `value` - The operand, masked to `width`.
/// * `width` - Operand width in bits.
#[must_use]
pub fn evaluate_unary(op: SymbolicOp, value: u64, width: u32) -> u64 {
    match op {
        SymbolicOp::Neg => value.wrapping_neg() & mask(width),
        SymbolicOp::Not => !value & mask(width),
        _ => value,
    }
}

/// Evaluates a binary operation on concrete values using SMT-LIB semantics.
///
/// Division by zero is total: unsigned division yields all ones, remainders yield the
/// dividend and signed division yields `-1` or `1` depending on the dividend's sign.
/// Shift amounts at or beyond the width shift every bit out.
///
/// # Arguments
///
/// * `op` - The binary operation.
/// * `a` / `b` - Operands, masked to `width`.
/// * `width` - Operand width in bits.
///
/// # Returns
///
/// The result masked to the result width (1 bit for comparisons).
#[must_use]
pub fn evaluate_binary(op: SymbolicOp, a: u64, b: u64, width: u32) -> u64 {
    let m = mask(width);
    let sa = sign_extend(a, width);
    let sb = sign_extend(b, width);
    let result = match op {
        SymbolicOp::Add => a.wrapping_add(b),
        SymbolicOp::Sub => a.wrapping_sub(b),
        SymbolicOp::Mul => a.wrapping_mul(b),
        SymbolicOp::DivU => {
            if b == 0 {
                m
            } else {
                a / b
            }
        }
        SymbolicOp::RemU => {
            if b == 0 {
                a
            } else {
                a % b
            }
        }
        SymbolicOp::DivS => {
            if b == 0 {
                if sa < 0 {
                    1
                } else {
                    m
                }
            } else {
                // i64 arithmetic on sign-extended operands; wrapping covers MIN / -1
                sa.wrapping_div(sb) as u64
            }
        }
        SymbolicOp::RemS => {
            if b == 0 {
                a
            } else {
                sa.wrapping_rem(sb) as u64
            }
        }
        SymbolicOp::And => a & b,
        SymbolicOp::Or => a | b,
        SymbolicOp::Xor => a ^ b,
        SymbolicOp::Shl => {
            if b >= u64::from(width) {
                0
            } else {
                a << b
            }
        }
        SymbolicOp::ShrU => {
            if b >= u64::from(width) {
                0
            } else {
                a >> b
            }
        }
        SymbolicOp::ShrS => {
            if b >= u64::from(width) {
                if sa < 0 {
                    m
                } else {
                    0
                }
            } else {
                (sa >> b) as u64
            }
        }
        SymbolicOp::Eq => return u64::from(a == b),
        SymbolicOp::Ne => return u64::from(a != b),
        SymbolicOp::LtS => return u64::from(sa < sb),
        SymbolicOp::LtU => return u64::from(a < b),
        SymbolicOp::GtS => return u64::from(sa > sb),
        SymbolicOp::GtU => return u64::from(a > b),
        SymbolicOp::LeS => return u64::from(sa <= sb),
        SymbolicOp::LeU => return u64::from(a <= b),
        SymbolicOp::GeS => return u64::from(sa >= sb),
        SymbolicOp::GeU => return u64::from(a >= b),
        SymbolicOp::Neg | SymbolicOp::Not => evaluate_unary(op, a, width),
    };
    result & m
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(name: &str, width: u32) -> SymbolicExpr {
        SymbolicExpr::symbol(name, width)
    }

    fn c(value: i64, width: u32) -> SymbolicExpr {
        SymbolicExpr::from_i64(value, width)
    }

    fn assign(pairs: &[(&str, u64)]) -> Assignment {
        pairs.iter().map(|(n, v)| (Arc::from(*n), *v)).collect()
    }

    #[test]
    fn test_constant_fold_wraps_per_width() {
        let sum = SymbolicExpr::binary(SymbolicOp::Add, c(200, 8), c(100, 8));
        assert_eq!(sum.as_constant(), Some(44));

        let product = SymbolicExpr::binary(SymbolicOp::Mul, c(0x10000, 32), c(0x10000, 32));
        assert_eq!(product.as_constant(), Some(0));

        let neg = SymbolicExpr::unary(SymbolicOp::Neg, c(1, 16));
        assert_eq!(neg.as_constant(), Some(0xffff));
        assert_eq!(neg.as_signed(), Some(-1));
    }

    #[test]
    fn test_identities() {
        let a = sym("a", 32);
        assert_eq!(SymbolicExpr::binary(SymbolicOp::Add, a.clone(), c(0, 32)), a);
        assert_eq!(SymbolicExpr::binary(SymbolicOp::Add, c(0, 32), a.clone()), a);
        assert_eq!(SymbolicExpr::binary(SymbolicOp::Mul, a.clone(), c(1, 32)), a);
        assert!(SymbolicExpr::binary(SymbolicOp::Mul, c(0, 32), a.clone()).as_constant() == Some(0));
        assert_eq!(
            SymbolicExpr::binary(SymbolicOp::Xor, a.clone(), a.clone()).as_constant(),
            Some(0)
        );
        assert!(a.equals(&a).is_true());
        assert!(a.not_equals(&a).is_false());
    }

    #[test]
    fn test_not_of_comparison_inverts() {
        let a = sym("a", 32);
        let b = sym("b", 32);
        let lt = SymbolicExpr::binary(SymbolicOp::LtS, a.clone(), b.clone());
        assert_eq!(
            lt.logical_not(),
            SymbolicExpr::binary(SymbolicOp::GeS, a, b)
        );
    }

    #[test]
    fn test_store_load_round_trip_folds() {
        let x = sym("x", 32);
        let bytes: Vec<_> = (0..4)
            .map(|i| SymbolicExpr::extract(i * 8 + 7, i * 8, x.clone()))
            .collect();
        let mut acc = bytes[3].clone();
        for byte in bytes[..3].iter().rev() {
            acc = SymbolicExpr::concat(acc, byte.clone());
        }
        assert_eq!(acc, x);
    }

    #[test]
    fn test_extract_through_extensions() {
        let b = sym("b", 8);
        let wide = SymbolicExpr::zero_extend(b.clone(), 32);
        assert_eq!(SymbolicExpr::extract(7, 0, wide.clone()), b);
        assert_eq!(SymbolicExpr::extract(31, 8, wide).as_constant(), Some(0));

        let signed = SymbolicExpr::sign_extend(c(-2, 8), 32);
        assert_eq!(signed.as_signed(), Some(-2));
    }

    #[test]
    fn test_equality_folds_through_ite_and_zext() {
        let cond = SymbolicExpr::binary(SymbolicOp::GtS, sym("a", 32), sym("b", 32));
        let widened = SymbolicExpr::ite(cond.clone(), c(1, 32), c(0, 32));
        assert_eq!(widened.equals(&c(1, 32)), cond);
        assert_eq!(widened.equals(&c(0, 32)), cond.logical_not());
        assert!(widened.equals(&c(7, 32)).is_false());

        let x = sym("x", 8);
        let z = SymbolicExpr::zero_extend(x.clone(), 32);
        assert!(z.equals(&c(300, 32)).is_false());
        assert_eq!(z.equals(&c(3, 32)), x.equals(&c(3, 8)));
    }

    #[test]
    fn test_smtlib_division_semantics() {
        assert_eq!(evaluate_binary(SymbolicOp::DivU, 7, 0, 8), 0xff);
        assert_eq!(evaluate_binary(SymbolicOp::RemU, 7, 0, 8), 7);
        assert_eq!(evaluate_binary(SymbolicOp::DivS, 7, 0, 8), 0xff);
        assert_eq!(evaluate_binary(SymbolicOp::DivS, 0xf9, 0, 8), 1);
        assert_eq!(evaluate_binary(SymbolicOp::DivS, 0xf9, 2, 8), 0xfd); // -7 / 2 = -3
        assert_eq!(evaluate_binary(SymbolicOp::RemS, 0xf9, 2, 8), 0xff); // -7 % 2 = -1
        assert_eq!(evaluate_binary(SymbolicOp::DivS, 0x80, 0xff, 8), 0x80);
    }

    #[test]
    fn test_shift_semantics() {
        assert_eq!(evaluate_binary(SymbolicOp::Shl, 1, 7, 8), 0x80);
        assert_eq!(evaluate_binary(SymbolicOp::Shl, 1, 8, 8), 0);
        assert_eq!(evaluate_binary(SymbolicOp::ShrS, 0x80, 7, 8), 0xff);
        assert_eq!(evaluate_binary(SymbolicOp::ShrS, 0x80, 9, 8), 0xff);
        assert_eq!(evaluate_binary(SymbolicOp::ShrU, 0x80, 7, 8), 1);
    }

    #[test]
    fn test_signed_comparisons() {
        assert_eq!(evaluate_binary(SymbolicOp::LtS, 0xff, 1, 8), 1);
        assert_eq!(evaluate_binary(SymbolicOp::LtU, 0xff, 1, 8), 0);
        assert_eq!(evaluate_binary(SymbolicOp::GeS, 0x7f, 0x80, 8), 1);
    }

    #[test]
    fn test_evaluate_with_assignment() {
        // (a - 3)
        let expr = SymbolicExpr::binary(SymbolicOp::Sub, sym("a", 32), c(3, 32));
        assert_eq!(expr.evaluate(&assign(&[("a", 3)])), Some(0));
        assert_eq!(expr.evaluate(&assign(&[("a", 1)])), Some(0xffff_fffe));
        assert_eq!(expr.evaluate(&assign(&[])), None);
    }

    #[test]
    fn test_substitute_refolds() {
        let a = sym("a", 32);
        let expr = SymbolicExpr::binary(SymbolicOp::Add, a, c(4, 32));
        let mut bindings = FxHashMap::default();
        bindings.insert(Arc::from("a"), c(6, 32));
        assert_eq!(expr.substitute(&bindings).as_constant(), Some(10));
    }

    #[test]
    fn test_symbols_collected_once() {
        let a = sym("a", 32);
        let b = sym("b", 8);
        let expr = SymbolicExpr::binary(
            SymbolicOp::Add,
            a.clone(),
            SymbolicExpr::zero_extend(b, 32),
        );
        let expr = SymbolicExpr::binary(SymbolicOp::Mul, expr, a);
        let symbols = expr.symbols();
        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols.get("b"), Some(&8));
    }

    #[test]
    fn test_display() {
        let expr = SymbolicExpr::binary(SymbolicOp::Sub, sym("a", 32), c(3, 32));
        assert_eq!(expr.to_string(), "(a - 3)");
        assert_eq!(SymbolicExpr::truth(true).to_string(), "true");
        assert_eq!(c(-1, 32).to_string(), "-1");
    }
}
