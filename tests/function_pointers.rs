//! Integration tests for indirect calls.

use pathscope::prelude::*;

fn x_param() -> Vec<Param> {
    vec![Param::new("x", Type::i32())]
}

/// `int <name>(int x) { return x + delta; }`
fn adder(name: &str, delta: i32) -> Result<Function> {
    let mut f = FunctionBuilder::new(name, x_param(), Type::i32());
    let r = f.binary(BinaryOp::Add, f.param(0), Operand::i32(delta));
    f.ret(r);
    f.finish()
}

fn module(functions: Vec<Function>) -> ModuleBuilder {
    functions
        .into_iter()
        .fold(ModuleBuilder::new("fptr"), ModuleBuilder::function)
}

#[test]
fn test_call_through_local_pointer() -> Result<()> {
    // int through(int x) { int (*f)(int) = minus_three; return f(x); }
    let mut f = FunctionBuilder::new("through", x_param(), Type::i32());
    let slot = f.alloca(Type::ptr());
    f.store(slot.clone(), Operand::function("minus_three"));
    let target = f.load(Type::ptr(), slot);
    let r = f.call(target, vec![f.param(0)]);
    f.ret(r);
    let project = Project::link(vec![module(vec![adder("minus_three", -3)?, f.finish()?]).build()])?;
    let explorer = Explorer::with_config(&project, ExplorationConfig::default());
    assert_eq!(
        find_zero(&explorer, "through")?,
        Some(vec![SolutionValue::I32(3)])
    );
    Ok(())
}

#[test]
fn test_call_through_global_table() -> Result<()> {
    // int (*ops[2])(int) = { plus_one, minus_five };
    // int table(int x) { return ops[1](x); }
    let table_ty = Type::array(Type::ptr(), 2);
    let ops = Constant::Array {
        ty: table_ty.clone(),
        elements: vec![Constant::function("plus_one"), Constant::function("minus_five")],
    };
    let mut f = FunctionBuilder::new("table", x_param(), Type::i32());
    let entry = f.index_ptr(Operand::global("ops"), Type::ptr(), Operand::i32(1));
    let target = f.load(Type::ptr(), entry);
    let r = f.call(target, vec![f.param(0)]);
    f.ret(r);
    let project = Project::link(vec![module(vec![
        adder("plus_one", 1)?,
        adder("minus_five", -5)?,
        f.finish()?,
    ])
    .global("ops", table_ty, Some(ops))
    .build()])?;
    let explorer = Explorer::with_config(&project, ExplorationConfig::default());
    assert_eq!(
        find_zero(&explorer, "table")?,
        Some(vec![SolutionValue::I32(5)])
    );
    Ok(())
}

#[test]
fn test_symbolic_choice_of_callee_forks() -> Result<()> {
    // int choose(int x, int which) { return (which ? plus_one : minus_five)(x); }
    let mut f = FunctionBuilder::new(
        "choose",
        vec![Param::new("x", Type::i32()), Param::new("which", Type::i32())],
        Type::i32(),
    );
    let nonzero = f.compare(CompareOp::Ne, f.param(1), Operand::i32(0));
    let target = f.select(
        nonzero,
        Operand::function("plus_one"),
        Operand::function("minus_five"),
    );
    let r = f.call(target, vec![f.param(0)]);
    f.ret(r);
    let project = Project::link(vec![module(vec![
        adder("plus_one", 1)?,
        adder("minus_five", -5)?,
        f.finish()?,
    ])
    .build()])?;
    let explorer = Explorer::with_config(&project, ExplorationConfig::default());

    let report = explorer.explore(&Query::new("choose").arg(0, ArgSpec::Concrete(5)))?;
    let mut returned: Vec<u64> = report
        .returned()
        .filter_map(|r| r.return_value().and_then(Value::as_u64))
        .collect();
    returned.sort_unstable();
    assert_eq!(returned, vec![0, 6]);
    Ok(())
}

#[test]
fn test_call_through_data_pointer_faults() -> Result<()> {
    // int bad(int *p) { return ((int (*)(void))p)(); }
    let mut f = FunctionBuilder::new("bad", vec![Param::new("p", Type::ptr())], Type::i32());
    let r = f.call(f.param(0), vec![]);
    f.ret(r);
    let project = Project::link(vec![module(vec![f.finish()?]).build()])?;
    let report = Explorer::with_config(&project, ExplorationConfig::default())
        .explore(&Query::new("bad"))?;
    assert_eq!(report.records.len(), 1);
    assert_eq!(
        report.records[0].outcome,
        Outcome::Fault(Fault::InvalidCallTarget)
    );
    Ok(())
}
