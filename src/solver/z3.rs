//! Z3 backend.
//!
//! [`Z3Solver`] translates [`SymbolicExpr`] trees into Z3 bit-vector terms of the same
//! width and asks Z3 for a model. Width-1 expressions are 1-bit vectors on both sides, so a
//! constraint `c` is asserted as `c == #b1`.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use rustc_hash::FxHashMap;
use z3::ast::{Ast, Bool, BV};

use crate::{
    solver::{Model, Solver, Verdict},
    symbolic::{ExprKind, SymbolicExpr, SymbolicOp},
    Result,
};

/// SMT backend built on Z3.
///
/// The solver is stateless; every query builds a fresh `z3::Solver`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Z3Solver {
    timeout: Option<Duration>,
}

impl Z3Solver {
    /// Creates a solver without a timeout.
    #[must_use]
    pub const fn new() -> Self {
        Z3Solver { timeout: None }
    }

    /// Sets the per-query timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn translate(expr: &SymbolicExpr, memo: &mut FxHashMap<SymbolicExpr, BV>) -> BV {
        if let Some(done) = memo.get(expr) {
            return done.clone();
        }
        let width = expr.width();
        let result = match expr.kind() {
            ExprKind::Constant(v) => BV::from_u64(*v, width),
            ExprKind::Symbol(name) => BV::new_const(name.as_ref(), width),
            ExprKind::Unary { op, operand } => {
                let x = Self::translate(operand, memo);
                match op {
                    SymbolicOp::Neg => x.bvneg(),
                    _ => x.bvnot(),
                }
            }
            ExprKind::Binary { op, left, right } => {
                let l = Self::translate(left, memo);
                let r = Self::translate(right, memo);
                match op {
                    SymbolicOp::Add => l.bvadd(&r),
                    SymbolicOp::Sub => l.bvsub(&r),
                    SymbolicOp::Mul => l.bvmul(&r),
                    SymbolicOp::DivS => l.bvsdiv(&r),
                    SymbolicOp::DivU => l.bvudiv(&r),
                    SymbolicOp::RemS => l.bvsrem(&r),
                    SymbolicOp::RemU => l.bvurem(&r),
                    SymbolicOp::And => l.bvand(&r),
                    SymbolicOp::Or => l.bvor(&r),
                    SymbolicOp::Xor => l.bvxor(&r),
                    SymbolicOp::Shl => l.bvshl(&r),
                    SymbolicOp::ShrS => l.bvashr(&r),
                    SymbolicOp::ShrU => l.bvlshr(&r),
                    SymbolicOp::Eq => bit(&l.eq(&r)),
                    SymbolicOp::Ne => bit(&l.eq(&r).not()),
                    SymbolicOp::LtS => bit(&l.bvslt(&r)),
                    SymbolicOp::LtU => bit(&l.bvult(&r)),
                    SymbolicOp::GtS => bit(&l.bvsgt(&r)),
                    SymbolicOp::GtU => bit(&l.bvugt(&r)),
                    SymbolicOp::LeS => bit(&l.bvsle(&r)),
                    SymbolicOp::LeU => bit(&l.bvule(&r)),
                    SymbolicOp::GeS => bit(&l.bvsge(&r)),
                    SymbolicOp::GeU => bit(&l.bvuge(&r)),
                    SymbolicOp::Neg | SymbolicOp::Not => l,
                }
            }
            ExprKind::Ite {
                cond,
                then,
                otherwise,
            } => {
                let c = Self::translate(cond, memo);
                let t = Self::translate(then, memo);
                let e = Self::translate(otherwise, memo);
                c.eq(&BV::from_u64(1, 1)).ite(&t, &e)
            }
            ExprKind::Extract { high, low, operand } => {
                Self::translate(operand, memo).extract(*high, *low)
            }
            ExprKind::Concat { high, low } => {
                let h = Self::translate(high, memo);
                let l = Self::translate(low, memo);
                h.concat(&l)
            }
            ExprKind::ZeroExtend { operand } => {
                Self::translate(operand, memo).zero_ext(width - operand.width())
            }
            ExprKind::SignExtend { operand } => {
                Self::translate(operand, memo).sign_ext(width - operand.width())
            }
        };
        memo.insert(expr.clone(), result.clone());
        result
    }
}

fn bit(b: &Bool) -> BV {
    b.ite(&BV::from_u64(1, 1), &BV::from_u64(0, 1))
}

impl Solver for Z3Solver {
    fn name(&self) -> &'static str {
        "z3"
    }

    fn solve(&self, constraints: &[SymbolicExpr]) -> Result<Verdict> {
        let solver = z3::Solver::new();
        if let Some(timeout) = self.timeout {
            let mut params = z3::Params::new();
            params.set_u32(
                "timeout",
                u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX),
            );
            solver.set_params(&params);
        }

        let mut memo = FxHashMap::default();
        let mut symbols: BTreeMap<Arc<str>, u32> = BTreeMap::new();
        let one = BV::from_u64(1, 1);
        for constraint in constraints {
            for (name, width) in constraint.symbols() {
                symbols.insert(name, width);
            }
            let term = Self::translate(constraint, &mut memo);
            solver.assert(term.eq(&one));
        }

        match solver.check() {
            z3::SatResult::Unsat => Ok(Verdict::Unsat),
            z3::SatResult::Unknown => Ok(Verdict::Unknown),
            z3::SatResult::Sat => {
                let Some(model) = solver.get_model() else {
                    return Ok(Verdict::Unknown);
                };
                let mut out = Model::default();
                for (name, width) in symbols {
                    let var = BV::new_const(name.as_ref(), width);
                    let value = model
                        .eval(&var, true)
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0);
                    out.insert(name, value);
                }
                Ok(Verdict::Sat(out))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::SatResult;

    #[test]
    fn test_z3_finds_inverse() {
        let a = SymbolicExpr::symbol("a", 64);
        let product = SymbolicExpr::binary(
            SymbolicOp::Mul,
            a,
            SymbolicExpr::constant(0x9e37_79b9_7f4a_7c15, 64),
        );
        let constraint = product.equals(&SymbolicExpr::constant(0x1234_5679, 64));
        let model = Z3Solver::new().model(&[constraint.clone()]).unwrap().unwrap();
        assert!(model.satisfies(&[constraint]));
    }

    #[test]
    fn test_z3_unsat() {
        let x = SymbolicExpr::symbol("x", 8);
        let square = SymbolicExpr::binary(SymbolicOp::Mul, x.clone(), x);
        let constraint = square.equals(&SymbolicExpr::constant(3, 8));
        assert_eq!(Z3Solver::new().check(&[constraint]).unwrap(), SatResult::Unsat);
    }
}
