//! Instructions, terminators and operands.
//!
//! The instruction set is a register-based SSA form in the style of LLVM IR: every value
//! producing instruction writes a fresh [`LocalId`], control flow is expressed through block
//! [`Terminator`]s, and memory is only reachable through pointers produced by
//! [`Instruction::Alloca`], globals, or allocation hooks.
//!
//! Integer operators are signless; the signedness recorded on the operand values decides
//! between signed and unsigned division, remainder, right shift and ordering comparisons.
//!
//! Exception handling is structured. [`Instruction::TryBegin`] opens a protected region with
//! its catch clauses, [`Instruction::TryEnd`] closes it, [`Terminator::Throw`] raises and
//! [`Instruction::CatchEnd`] marks the end of a handler body.

use std::fmt;

use strum::{Display, EnumIter};

use crate::{
    ir::{constant::Constant, types::Type},
    symbolic::{SymbolicExpr, SymbolicOp},
};

/// SSA register within one function. Parameters occupy the first ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(pub u32);

/// Basic block index within one function. Block 0 is the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// Integer arithmetic and bitwise operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum BinaryOp {
    /// Wrapping addition
    Add,
    /// Wrapping subtraction
    Sub,
    /// Wrapping multiplication
    Mul,
    /// Division, signed or unsigned per operand type
    Div,
    /// Remainder, signed or unsigned per operand type
    Rem,
    /// Bitwise and
    And,
    /// Bitwise or
    Or,
    /// Bitwise xor
    Xor,
    /// Left shift
    Shl,
    /// Right shift, arithmetic for signed operands
    Shr,
}

impl BinaryOp {
    /// Maps the operator to its symbolic counterpart for the given operand signedness.
    #[must_use]
    pub const fn to_symbolic(self, signed: bool) -> SymbolicOp {
        match (self, signed) {
            (BinaryOp::Add, _) => SymbolicOp::Add,
            (BinaryOp::Sub, _) => SymbolicOp::Sub,
            (BinaryOp::Mul, _) => SymbolicOp::Mul,
            (BinaryOp::Div, true) => SymbolicOp::DivS,
            (BinaryOp::Div, false) => SymbolicOp::DivU,
            (BinaryOp::Rem, true) => SymbolicOp::RemS,
            (BinaryOp::Rem, false) => SymbolicOp::RemU,
            (BinaryOp::And, _) => SymbolicOp::And,
            (BinaryOp::Or, _) => SymbolicOp::Or,
            (BinaryOp::Xor, _) => SymbolicOp::Xor,
            (BinaryOp::Shl, _) => SymbolicOp::Shl,
            (BinaryOp::Shr, true) => SymbolicOp::ShrS,
            (BinaryOp::Shr, false) => SymbolicOp::ShrU,
        }
    }

    /// Division and remainder trap on a zero divisor.
    #[must_use]
    pub const fn is_division(self) -> bool {
        matches!(self, BinaryOp::Div | BinaryOp::Rem)
    }
}

/// Comparison predicates. Ordering predicates follow operand signedness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum CompareOp {
    /// Equal
    Eq,
    /// Not equal
    Ne,
    /// Less than
    Lt,
    /// Less than or equal
    Le,
    /// Greater than
    Gt,
    /// Greater than or equal
    Ge,
}

impl CompareOp {
    /// Maps the predicate to its symbolic counterpart for the given operand signedness.
    #[must_use]
    pub const fn to_symbolic(self, signed: bool) -> SymbolicOp {
        match (self, signed) {
            (CompareOp::Eq, _) => SymbolicOp::Eq,
            (CompareOp::Ne, _) => SymbolicOp::Ne,
            (CompareOp::Lt, true) => SymbolicOp::LtS,
            (CompareOp::Lt, false) => SymbolicOp::LtU,
            (CompareOp::Le, true) => SymbolicOp::LeS,
            (CompareOp::Le, false) => SymbolicOp::LeU,
            (CompareOp::Gt, true) => SymbolicOp::GtS,
            (CompareOp::Gt, false) => SymbolicOp::GtU,
            (CompareOp::Ge, true) => SymbolicOp::GeS,
            (CompareOp::Ge, false) => SymbolicOp::GeU,
        }
    }
}

/// Read-modify-write operations of [`Instruction::AtomicRmw`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum RmwOp {
    /// Replace with the operand
    Xchg,
    /// Wrapping addition
    Add,
    /// Wrapping subtraction
    Sub,
    /// Bitwise and
    And,
    /// Bitwise not of the and
    Nand,
    /// Bitwise or
    Or,
    /// Bitwise xor
    Xor,
    /// Signed maximum
    Max,
    /// Signed minimum
    Min,
    /// Unsigned maximum
    UMax,
    /// Unsigned minimum
    UMin,
}

impl RmwOp {
    /// The value stored back, given the value in memory and the operand.
    #[must_use]
    pub fn apply(self, current: SymbolicExpr, operand: SymbolicExpr) -> SymbolicExpr {
        let keep_if = |op: SymbolicOp, current: SymbolicExpr, operand: SymbolicExpr| {
            let cond = SymbolicExpr::binary(op, current.clone(), operand.clone());
            SymbolicExpr::ite(cond, current, operand)
        };
        match self {
            RmwOp::Xchg => operand,
            RmwOp::Add => SymbolicExpr::binary(SymbolicOp::Add, current, operand),
            RmwOp::Sub => SymbolicExpr::binary(SymbolicOp::Sub, current, operand),
            RmwOp::And => SymbolicExpr::binary(SymbolicOp::And, current, operand),
            RmwOp::Nand => SymbolicExpr::unary(
                SymbolicOp::Not,
                SymbolicExpr::binary(SymbolicOp::And, current, operand),
            ),
            RmwOp::Or => SymbolicExpr::binary(SymbolicOp::Or, current, operand),
            RmwOp::Xor => SymbolicExpr::binary(SymbolicOp::Xor, current, operand),
            RmwOp::Max => keep_if(SymbolicOp::GtS, current, operand),
            RmwOp::Min => keep_if(SymbolicOp::LtS, current, operand),
            RmwOp::UMax => keep_if(SymbolicOp::GtU, current, operand),
            RmwOp::UMin => keep_if(SymbolicOp::LtU, current, operand),
        }
    }
}

/// Value conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum CastOp {
    /// Drop high bits
    Trunc,
    /// Widen with zeros
    ZExt,
    /// Widen with copies of the sign bit
    SExt,
    /// C integer conversion: truncate, or extend according to the source signedness
    IntCast,
    /// Reinterpret without changing bits (integer signedness change, pointer to pointer)
    Bitcast,
}

/// An instruction input.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    /// A value defined earlier in the function
    Local(LocalId),
    /// A constant
    Const(Constant),
}

impl Operand {
    /// Integer literal operand.
    #[must_use]
    pub fn int(value: i64, ty: Type) -> Self {
        Operand::Const(Constant::int(value, ty))
    }

    /// `int32_t` literal operand.
    #[must_use]
    pub fn i32(value: i32) -> Self {
        Operand::Const(Constant::i32(value))
    }

    /// `int64_t` literal operand.
    #[must_use]
    pub fn i64(value: i64) -> Self {
        Operand::Const(Constant::i64(value))
    }

    /// Address of global `name`.
    #[must_use]
    pub fn global(name: impl Into<String>) -> Self {
        Operand::Const(Constant::global(name))
    }

    /// Address of function `name`, also used as a direct call target.
    #[must_use]
    pub fn function(name: impl Into<String>) -> Self {
        Operand::Const(Constant::function(name))
    }

    /// Null pointer.
    #[must_use]
    pub fn null() -> Self {
        Operand::Const(Constant::Null)
    }

    /// Returns the local if this operand is one.
    #[must_use]
    pub const fn as_local(&self) -> Option<LocalId> {
        match self {
            Operand::Local(id) => Some(*id),
            Operand::Const(_) => None,
        }
    }
}

impl From<LocalId> for Operand {
    fn from(id: LocalId) -> Self {
        Operand::Local(id)
    }
}

impl From<Constant> for Operand {
    fn from(c: Constant) -> Self {
        Operand::Const(c)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Local(id) => write!(f, "{id}"),
            Operand::Const(c) => write!(f, "{c}"),
        }
    }
}

/// Which exceptions a catch clause accepts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CatchFilter {
    /// Exceptions whose declared type equals this type exactly
    Type(Type),
    /// Every exception (`catch (...)`)
    Any,
}

impl CatchFilter {
    /// Returns `true` if an exception of type `ty` is caught by this filter.
    #[must_use]
    pub fn matches(&self, ty: &Type) -> bool {
        match self {
            CatchFilter::Type(expected) => expected == ty,
            CatchFilter::Any => true,
        }
    }
}

/// One handler of a try region.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CatchClause {
    /// Accepted exceptions
    pub filter: CatchFilter,
    /// First block of the handler
    pub handler: BlockId,
    /// Local receiving the exception payload
    pub binding: Option<LocalId>,
}

/// A non-terminating instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Instruction {
    /// Integer arithmetic, element-wise on vectors.
    Binary {
        /// Result
        dest: LocalId,
        /// Operator
        op: BinaryOp,
        /// Left operand
        lhs: Operand,
        /// Right operand
        rhs: Operand,
    },
    /// Comparison producing a boolean (or a vector of booleans).
    Compare {
        /// Result
        dest: LocalId,
        /// Predicate
        op: CompareOp,
        /// Left operand
        lhs: Operand,
        /// Right operand
        rhs: Operand,
    },
    /// Conversion.
    Cast {
        /// Result
        dest: LocalId,
        /// Conversion kind
        op: CastOp,
        /// Input
        value: Operand,
        /// Target type
        to: Type,
    },
    /// `cond ? then : otherwise`.
    Select {
        /// Result
        dest: LocalId,
        /// Boolean condition
        cond: Operand,
        /// Value when true
        then: Operand,
        /// Value when false
        otherwise: Operand,
    },
    /// SSA merge; only valid at the start of a block.
    Phi {
        /// Result
        dest: LocalId,
        /// Value per predecessor block
        incoming: Vec<(BlockId, Operand)>,
    },
    /// Stack allocation released when the frame returns.
    Alloca {
        /// Resulting pointer
        dest: LocalId,
        /// Allocated type
        ty: Type,
    },
    /// Typed read through a pointer.
    Load {
        /// Result
        dest: LocalId,
        /// Type to read
        ty: Type,
        /// Address
        ptr: Operand,
    },
    /// Write through a pointer.
    Store {
        /// Address
        ptr: Operand,
        /// Value to write; aggregate constants are written field by field
        value: Operand,
    },
    /// Atomic read-modify-write of an integer in memory; the result is the old value.
    AtomicRmw {
        /// Old value
        dest: LocalId,
        /// Update applied to the old value
        op: RmwOp,
        /// Integer type in memory
        ty: Type,
        /// Address
        ptr: Operand,
        /// Operand of the update
        value: Operand,
    },
    /// Address computation: `base + indices[0] * sizeof(ty)`, then one step into `ty`
    /// per further index.
    ElementPtr {
        /// Resulting pointer
        dest: LocalId,
        /// Base pointer
        base: Operand,
        /// Type the first index steps over
        ty: Type,
        /// Index path; struct steps must be constant
        indices: Vec<Operand>,
    },
    /// Reads one vector lane.
    ExtractElement {
        /// Result
        dest: LocalId,
        /// Vector
        vector: Operand,
        /// Lane index
        index: Operand,
    },
    /// Replaces one vector lane.
    InsertElement {
        /// Resulting vector
        dest: LocalId,
        /// Input vector
        vector: Operand,
        /// New lane value
        value: Operand,
        /// Lane index
        index: Operand,
    },
    /// Direct or indirect call.
    Call {
        /// Result, absent for void calls
        dest: Option<LocalId>,
        /// Function address or function pointer value
        callee: Operand,
        /// Arguments
        args: Vec<Operand>,
    },
    /// Enters a protected region.
    TryBegin {
        /// Handlers, tried in order
        handlers: Vec<CatchClause>,
    },
    /// Leaves the innermost protected region normally.
    TryEnd,
    /// Ends the innermost active handler.
    CatchEnd,
}

impl Instruction {
    /// Local written by the instruction.
    #[must_use]
    pub fn dest(&self) -> Option<LocalId> {
        match self {
            Instruction::Binary { dest, .. }
            | Instruction::Compare { dest, .. }
            | Instruction::Cast { dest, .. }
            | Instruction::Select { dest, .. }
            | Instruction::Phi { dest, .. }
            | Instruction::Alloca { dest, .. }
            | Instruction::Load { dest, .. }
            | Instruction::AtomicRmw { dest, .. }
            | Instruction::ElementPtr { dest, .. }
            | Instruction::ExtractElement { dest, .. }
            | Instruction::InsertElement { dest, .. } => Some(*dest),
            Instruction::Call { dest, .. } => *dest,
            Instruction::Store { .. }
            | Instruction::TryBegin { .. }
            | Instruction::TryEnd
            | Instruction::CatchEnd => None,
        }
    }

    /// All operands read by the instruction.
    #[must_use]
    pub fn operands(&self) -> Vec<&Operand> {
        match self {
            Instruction::Binary { lhs, rhs, .. } | Instruction::Compare { lhs, rhs, .. } => {
                vec![lhs, rhs]
            }
            Instruction::Cast { value, .. } => vec![value],
            Instruction::Select {
                cond,
                then,
                otherwise,
                ..
            } => vec![cond, then, otherwise],
            Instruction::Phi { incoming, .. } => incoming.iter().map(|(_, op)| op).collect(),
            Instruction::Alloca { .. }
            | Instruction::TryBegin { .. }
            | Instruction::TryEnd
            | Instruction::CatchEnd => Vec::new(),
            Instruction::Load { ptr, .. } => vec![ptr],
            Instruction::Store { ptr, value } | Instruction::AtomicRmw { ptr, value, .. } => {
                vec![ptr, value]
            }
            Instruction::ElementPtr { base, indices, .. } => {
                std::iter::once(base).chain(indices.iter()).collect()
            }
            Instruction::ExtractElement { vector, index, .. } => vec![vector, index],
            Instruction::InsertElement {
                vector,
                value,
                index,
                ..
            } => vec![vector, value, index],
            Instruction::Call { callee, args, .. } => {
                std::iter::once(callee).chain(args.iter()).collect()
            }
        }
    }

    /// Blocks named by the instruction (catch handlers and phi predecessors).
    #[must_use]
    pub fn blocks(&self) -> Vec<BlockId> {
        match self {
            Instruction::TryBegin { handlers } => handlers.iter().map(|h| h.handler).collect(),
            Instruction::Phi { incoming, .. } => incoming.iter().map(|(b, _)| *b).collect(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Binary { dest, op, lhs, rhs } => write!(f, "{dest} = {op} {lhs}, {rhs}"),
            Instruction::Compare { dest, op, lhs, rhs } => {
                write!(f, "{dest} = cmp {op} {lhs}, {rhs}")
            }
            Instruction::Cast {
                dest,
                op,
                value,
                to,
            } => write!(f, "{dest} = {op} {value} to {to}"),
            Instruction::Select {
                dest,
                cond,
                then,
                otherwise,
            } => write!(f, "{dest} = select {cond}, {then}, {otherwise}"),
            Instruction::Phi { dest, incoming } => {
                write!(f, "{dest} = phi")?;
                for (i, (block, op)) in incoming.iter().enumerate() {
                    write!(f, "{} [{op}, {block}]", if i == 0 { "" } else { "," })?;
                }
                Ok(())
            }
            Instruction::Alloca { dest, ty } => write!(f, "{dest} = alloca {ty}"),
            Instruction::Load { dest, ty, ptr } => write!(f, "{dest} = load {ty}, {ptr}"),
            Instruction::Store { ptr, value } => write!(f, "store {value}, {ptr}"),
            Instruction::AtomicRmw {
                dest,
                op,
                ty,
                ptr,
                value,
            } => write!(f, "{dest} = atomicrmw {op} {ty}, {ptr}, {value}"),
            Instruction::ElementPtr {
                dest,
                base,
                ty,
                indices,
            } => {
                write!(f, "{dest} = elementptr {ty}, {base}")?;
                for index in indices {
                    write!(f, ", {index}")?;
                }
                Ok(())
            }
            Instruction::ExtractElement {
                dest,
                vector,
                index,
            } => write!(f, "{dest} = extractelement {vector}, {index}"),
            Instruction::InsertElement {
                dest,
                vector,
                value,
                index,
            } => write!(f, "{dest} = insertelement {vector}, {value}, {index}"),
            Instruction::Call { dest, callee, args } => {
                if let Some(dest) = dest {
                    write!(f, "{dest} = ")?;
                }
                write!(f, "call {callee}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Instruction::TryBegin { handlers } => write!(f, "try ({} handlers)", handlers.len()),
            Instruction::TryEnd => write!(f, "endtry"),
            Instruction::CatchEnd => write!(f, "endcatch"),
        }
    }
}

/// The instruction that ends a basic block.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Terminator {
    /// Return from the function.
    Ret(Option<Operand>),
    /// Unconditional jump.
    Br(BlockId),
    /// Two-way branch on a boolean.
    CondBr {
        /// Boolean condition
        cond: Operand,
        /// Target when true
        then: BlockId,
        /// Target when false
        otherwise: BlockId,
    },
    /// Multi-way branch on an integer.
    Switch {
        /// Scrutinee
        value: Operand,
        /// Case values, truncated to the scrutinee width
        cases: Vec<(i64, BlockId)>,
        /// Target when no case matches
        default: BlockId,
    },
    /// Raises an exception of declared type `ty`.
    Throw {
        /// Payload
        value: Operand,
        /// Declared exception type used for catch matching
        ty: Type,
    },
    /// Re-raises the exception of the innermost active handler.
    Rethrow,
    /// Marks code that must never execute.
    Unreachable,
}

impl Terminator {
    /// Intra-procedural successor blocks.
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Br(target) => vec![*target],
            Terminator::CondBr {
                then, otherwise, ..
            } => vec![*then, *otherwise],
            Terminator::Switch { cases, default, .. } => cases
                .iter()
                .map(|(_, b)| *b)
                .chain(std::iter::once(*default))
                .collect(),
            Terminator::Ret(_)
            | Terminator::Throw { .. }
            | Terminator::Rethrow
            | Terminator::Unreachable => Vec::new(),
        }
    }

    /// All operands read by the terminator.
    #[must_use]
    pub fn operands(&self) -> Vec<&Operand> {
        match self {
            Terminator::Ret(Some(op))
            | Terminator::CondBr { cond: op, .. }
            | Terminator::Switch { value: op, .. }
            | Terminator::Throw { value: op, .. } => vec![op],
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Ret(Some(op)) => write!(f, "ret {op}"),
            Terminator::Ret(None) => write!(f, "ret void"),
            Terminator::Br(target) => write!(f, "br {target}"),
            Terminator::CondBr {
                cond,
                then,
                otherwise,
            } => write!(f, "br {cond}, {then}, {otherwise}"),
            Terminator::Switch {
                value,
                cases,
                default,
            } => {
                write!(f, "switch {value}, default {default}")?;
                for (case, target) in cases {
                    write!(f, ", {case} => {target}")?;
                }
                Ok(())
            }
            Terminator::Throw { value, ty } => write!(f, "throw {ty} {value}"),
            Terminator::Rethrow => write!(f, "rethrow"),
            Terminator::Unreachable => write!(f, "unreachable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_signedness_selects_symbolic_op() {
        assert_eq!(BinaryOp::Div.to_symbolic(true), SymbolicOp::DivS);
        assert_eq!(BinaryOp::Div.to_symbolic(false), SymbolicOp::DivU);
        assert_eq!(BinaryOp::Shr.to_symbolic(true), SymbolicOp::ShrS);
        assert_eq!(CompareOp::Lt.to_symbolic(false), SymbolicOp::LtU);
        for op in CompareOp::iter() {
            assert!(op.to_symbolic(true).is_comparison());
        }
        for op in BinaryOp::iter() {
            assert!(!op.to_symbolic(true).is_comparison());
        }
    }

    #[test]
    fn test_rmw_ops() {
        let five = SymbolicExpr::constant(5, 8);
        let nine = SymbolicExpr::constant(9, 8);
        let minus_one = SymbolicExpr::constant(0xff, 8);
        let fold = |op: RmwOp, a: &SymbolicExpr, b: &SymbolicExpr| {
            op.apply(a.clone(), b.clone()).as_constant()
        };
        assert_eq!(fold(RmwOp::Xchg, &five, &nine), Some(9));
        assert_eq!(fold(RmwOp::Sub, &five, &nine), Some(0xfc));
        assert_eq!(fold(RmwOp::Nand, &five, &nine), Some(0xfe));
        assert_eq!(fold(RmwOp::Max, &five, &minus_one), Some(5));
        assert_eq!(fold(RmwOp::UMax, &five, &minus_one), Some(0xff));
        assert_eq!(fold(RmwOp::Min, &five, &minus_one), Some(0xff));
        assert_eq!(fold(RmwOp::UMin, &five, &nine), Some(5));
    }

    #[test]
    fn test_catch_filter() {
        assert!(CatchFilter::Any.matches(&Type::i32()));
        assert!(CatchFilter::Type(Type::i32()).matches(&Type::i32()));
        assert!(!CatchFilter::Type(Type::u8()).matches(&Type::i32()));
    }

    #[test]
    fn test_display() {
        let add = Instruction::Binary {
            dest: LocalId(2),
            op: BinaryOp::Add,
            lhs: Operand::Local(LocalId(0)),
            rhs: Operand::i32(3),
        };
        assert_eq!(add.to_string(), "%2 = add %0, i32 3");
        let br = Terminator::CondBr {
            cond: Operand::Local(LocalId(1)),
            then: BlockId(1),
            otherwise: BlockId(2),
        };
        assert_eq!(br.to_string(), "br %1, bb1, bb2");
        assert_eq!(br.successors(), vec![BlockId(1), BlockId(2)]);
    }
}
