//! Integration tests for straight-line arithmetic and branching.
//!
//! Each test builds a small function, links it, and asks for the arguments that make it
//! return zero or for the full set of values it can return.

use pathscope::prelude::*;

fn link(function: Function) -> Result<Project> {
    Project::link(vec![ModuleBuilder::new("basic").function(function).build()])
}

fn int_params(names: &[&str]) -> Vec<Param> {
    names.iter().map(|n| Param::new(*n, Type::i32())).collect()
}

/// `int sum(a, b, ...) { return a + b + ... - 3; }`
fn sum_minus_three(name: &str, params: &[&str]) -> Result<Function> {
    let mut f = FunctionBuilder::new(name, int_params(params), Type::i32());
    let mut acc = f.param(0);
    for i in 1..params.len() {
        acc = f.binary(BinaryOp::Add, acc, f.param(i));
    }
    let r = f.binary(BinaryOp::Sub, acc, Operand::i32(3));
    f.ret(r);
    f.finish()
}

#[test]
fn test_no_args() -> Result<()> {
    let mut f = FunctionBuilder::new("no_args", vec![], Type::i32());
    f.ret(Operand::i32(0));
    let project = link(f.finish()?)?;
    let explorer = Explorer::with_config(&project, ExplorationConfig::default());
    assert_eq!(find_zero(&explorer, "no_args")?, Some(vec![]));
    Ok(())
}

#[test]
fn test_one_arg() -> Result<()> {
    let project = link(sum_minus_three("one_arg", &["a"])?)?;
    let explorer = Explorer::with_config(&project, ExplorationConfig::default());
    assert_eq!(
        find_zero(&explorer, "one_arg")?,
        Some(vec![SolutionValue::I32(3)])
    );
    Ok(())
}

#[test]
fn test_many_args_sum_to_three() -> Result<()> {
    let names = ["a", "b", "c", "d", "e"];
    for count in 2..=names.len() {
        let project = link(sum_minus_three("sum", &names[..count])?)?;
        let explorer = Explorer::with_config(&project, ExplorationConfig::default());
        let args = find_zero(&explorer, "sum")?.expect("a zero exists");
        assert_eq!(args.len(), count);
        let total = args
            .iter()
            .map(|v| v.as_i64().unwrap() as i32)
            .fold(0i32, i32::wrapping_add);
        assert_eq!(total, 3, "{args:?}");
    }
    Ok(())
}

#[test]
fn test_conditional_branches() -> Result<()> {
    // int conditional(int a, int b) { return a > b ? a - b : (a - 1) * (b - 1); }
    let mut f = FunctionBuilder::new("conditional", int_params(&["a", "b"]), Type::i32());
    let greater = f.block("greater");
    let other = f.block("other");
    let cond = f.compare(CompareOp::Gt, f.param(0), f.param(1));
    f.cond_br(cond, greater, other);
    f.position_at(greater);
    let d = f.binary(BinaryOp::Sub, f.param(0), f.param(1));
    f.ret(d);
    f.position_at(other);
    let a1 = f.binary(BinaryOp::Sub, f.param(0), Operand::i32(1));
    let b1 = f.binary(BinaryOp::Sub, f.param(1), Operand::i32(1));
    let p = f.binary(BinaryOp::Mul, a1, b1);
    f.ret(p);
    let project = link(f.finish()?)?;

    let explorer = Explorer::with_config(&project, ExplorationConfig::default());
    let report = explorer.explore(&Query::new("conditional"))?;
    assert!(report.is_complete());
    assert_eq!(report.returned().count(), 2);

    let args = find_zero(&explorer, "conditional")?.expect("a zero exists");
    let (a, b) = (args[0].as_i64().unwrap() as i32, args[1].as_i64().unwrap() as i32);
    assert!(a <= b);
    assert_eq!(a.wrapping_sub(1).wrapping_mul(b.wrapping_sub(1)), 0);
    Ok(())
}

#[test]
fn test_division_by_symbolic_divisor_faults_on_one_path() -> Result<()> {
    // int ratio(int a, int b) { return a / b; }
    let mut f = FunctionBuilder::new("ratio", int_params(&["a", "b"]), Type::i32());
    let q = f.binary(BinaryOp::Div, f.param(0), f.param(1));
    f.ret(q);
    let project = link(f.finish()?)?;
    let report = Explorer::with_config(&project, ExplorationConfig::default())
        .explore(&Query::new("ratio"))?;
    assert_eq!(report.faults().count(), 1);
    assert_eq!(report.returned().count(), 1);
    Ok(())
}

#[test]
fn test_possible_return_values_of_select() -> Result<()> {
    // int pick(int a) { return a < 0 ? -1 : (a == 0 ? 0 : 1); }
    let mut f = FunctionBuilder::new("pick", int_params(&["a"]), Type::i32());
    let negative = f.compare(CompareOp::Lt, f.param(0), Operand::i32(0));
    let zero = f.compare(CompareOp::Eq, f.param(0), Operand::i32(0));
    let inner = f.select(zero, Operand::i32(0), Operand::i32(1));
    let r = f.select(negative, Operand::i32(-1), inner);
    f.ret(r);
    let project = link(f.finish()?)?;
    let explorer = Explorer::with_config(&project, ExplorationConfig::default());

    let values = possible_return_values(&explorer, "pick", &[None], 10)?;
    assert!(values.is_exact());
    let expected: Vec<ReturnValue> = [0u64, 1, 0xffff_ffff]
        .into_iter()
        .map(ReturnValue::Return)
        .collect();
    assert_eq!(values.values().iter().copied().collect::<Vec<_>>(), expected);
    Ok(())
}

#[test]
fn test_unknown_function_is_an_error() -> Result<()> {
    let project = link(sum_minus_three("one_arg", &["a"])?)?;
    let explorer = Explorer::with_config(&project, ExplorationConfig::default());
    assert!(matches!(
        find_zero(&explorer, "missing"),
        Err(Error::UnknownFunction(name)) if name == "missing"
    ));
    Ok(())
}
