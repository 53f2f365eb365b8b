//! Programmatic construction of IR.
//!
//! [`FunctionBuilder`] assembles a function block by block. Blocks are addressed by label:
//! [`FunctionBuilder::block`] returns the id for a label whether or not the block has been
//! positioned yet, so forward branches can be emitted before their target exists. The label
//! must be defined (positioned at) before [`FunctionBuilder::finish`], which also checks that
//! every block is terminated, phis lead their blocks and no local is assigned twice.
//!
//! Emission helpers return the produced value as an [`Operand`] and never fail on their own;
//! the first problem is recorded and reported by `finish`.
//!
//! # Examples
//!
//! ```rust
//! use pathscope::ir::{builder::FunctionBuilder, BinaryOp, CompareOp, Operand, Param, Type};
//!
//! // int32_t conditional_nozero(int32_t a, int32_t b) { if (a > b) return a; return b + 1; }
//! let mut f = FunctionBuilder::new(
//!     "conditional_nozero",
//!     vec![Param::new("a", Type::i32()), Param::new("b", Type::i32())],
//!     Type::i32(),
//! );
//! let (a, b) = (f.param(0), f.param(1));
//! let then_bb = f.block("then");
//! let else_bb = f.block("else");
//! let cond = f.compare(CompareOp::Gt, a.clone(), b.clone());
//! f.cond_br(cond, then_bb, else_bb);
//!
//! f.position_at(then_bb);
//! f.ret(a);
//!
//! f.position_at(else_bb);
//! let inc = f.binary(BinaryOp::Add, b, Operand::i32(1));
//! f.ret(inc);
//!
//! let function = f.finish()?;
//! assert_eq!(function.blocks.len(), 3);
//! # Ok::<(), pathscope::Error>(())
//! ```

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    ir::{
        constant::Constant,
        function::{BasicBlock, Function, FunctionFlags, Param},
        instruction::{
            BinaryOp, BlockId, CastOp, CatchClause, CatchFilter, CompareOp, Instruction, LocalId,
            Operand, RmwOp, Terminator,
        },
        module::{GlobalVariable, Module},
        types::Type,
    },
    Error, Result,
};

struct PendingBlock {
    name: String,
    instructions: Vec<Instruction>,
    terminator: Option<Terminator>,
    defined: bool,
}

/// Incremental builder for a [`Function`].
pub struct FunctionBuilder {
    name: String,
    params: Vec<Param>,
    ret: Type,
    flags: FunctionFlags,
    blocks: Vec<PendingBlock>,
    labels: FxHashMap<String, BlockId>,
    current: BlockId,
    next_local: u32,
    error: Option<Error>,
}

impl FunctionBuilder {
    /// Starts a function positioned at its entry block.
    ///
    /// # Arguments
    ///
    /// * `name` - Linkage name
    /// * `params` - Parameters; parameter `i` becomes local `i`
    /// * `ret` - Return type
    #[must_use]
    pub fn new(name: impl Into<String>, params: Vec<Param>, ret: Type) -> Self {
        let next_local = params.len() as u32;
        let mut builder = FunctionBuilder {
            name: name.into(),
            params,
            ret,
            flags: FunctionFlags::empty(),
            blocks: Vec::new(),
            labels: FxHashMap::default(),
            current: BlockId(0),
            next_local,
            error: None,
        };
        let entry = builder.block("entry");
        builder.position_at(entry);
        builder
    }

    /// Sets the function attributes.
    pub fn set_flags(&mut self, flags: FunctionFlags) {
        self.flags = flags;
    }

    /// Operand for parameter `index`.
    #[must_use]
    pub fn param(&self, index: usize) -> Operand {
        Operand::Local(Function::param_local(index))
    }

    /// Returns the block for `label`, creating it on first use.
    pub fn block(&mut self, label: &str) -> BlockId {
        if let Some(id) = self.labels.get(label) {
            return *id;
        }
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(PendingBlock {
            name: label.to_string(),
            instructions: Vec::new(),
            terminator: None,
            defined: false,
        });
        self.labels.insert(label.to_string(), id);
        id
    }

    /// Moves the insertion point to the end of `block` and marks its label defined.
    pub fn position_at(&mut self, block: BlockId) {
        match self.blocks.get_mut(block.0 as usize) {
            Some(pending) => {
                pending.defined = true;
                self.current = block;
            }
            None => self.fail(malformed_error!("block {} does not exist", block)),
        }
    }

    /// The block instructions are currently appended to.
    #[must_use]
    pub const fn current_block(&self) -> BlockId {
        self.current
    }

    /// Allocates a fresh local without emitting anything.
    pub fn fresh_local(&mut self) -> LocalId {
        let id = LocalId(self.next_local);
        self.next_local += 1;
        id
    }

    fn fail(&mut self, error: Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// Appends a raw instruction to the current block.
    pub fn emit(&mut self, instruction: Instruction) {
        let current = self.current;
        let block = &mut self.blocks[current.0 as usize];
        if block.terminator.is_some() {
            let name = block.name.clone();
            self.fail(malformed_error!(
                "instruction `{}` emitted after terminator of block '{}'",
                instruction,
                name
            ));
            return;
        }
        block.instructions.push(instruction);
    }

    fn emit_value(&mut self, make: impl FnOnce(LocalId) -> Instruction) -> Operand {
        let dest = self.fresh_local();
        self.emit(make(dest));
        Operand::Local(dest)
    }

    fn terminate(&mut self, terminator: Terminator) {
        let current = self.current;
        let block = &mut self.blocks[current.0 as usize];
        if block.terminator.is_some() {
            let name = block.name.clone();
            self.fail(malformed_error!("block '{}' terminated twice", name));
            return;
        }
        block.terminator = Some(terminator);
    }

    /// Emits an arithmetic or bitwise operation.
    pub fn binary(
        &mut self,
        op: BinaryOp,
        lhs: impl Into<Operand>,
        rhs: impl Into<Operand>,
    ) -> Operand {
        let (lhs, rhs) = (lhs.into(), rhs.into());
        self.emit_value(|dest| Instruction::Binary { dest, op, lhs, rhs })
    }

    /// Emits a comparison.
    pub fn compare(
        &mut self,
        op: CompareOp,
        lhs: impl Into<Operand>,
        rhs: impl Into<Operand>,
    ) -> Operand {
        let (lhs, rhs) = (lhs.into(), rhs.into());
        self.emit_value(|dest| Instruction::Compare { dest, op, lhs, rhs })
    }

    /// Emits a conversion to `to`.
    pub fn cast(&mut self, op: CastOp, value: impl Into<Operand>, to: Type) -> Operand {
        let value = value.into();
        self.emit_value(|dest| Instruction::Cast {
            dest,
            op,
            value,
            to,
        })
    }

    /// Emits `cond ? then : otherwise`.
    pub fn select(
        &mut self,
        cond: impl Into<Operand>,
        then: impl Into<Operand>,
        otherwise: impl Into<Operand>,
    ) -> Operand {
        let (cond, then, otherwise) = (cond.into(), then.into(), otherwise.into());
        self.emit_value(|dest| Instruction::Select {
            dest,
            cond,
            then,
            otherwise,
        })
    }

    /// Emits a phi. More incoming edges can be added with [`FunctionBuilder::add_incoming`].
    pub fn phi(&mut self, incoming: Vec<(BlockId, Operand)>) -> Operand {
        self.emit_value(|dest| Instruction::Phi { dest, incoming })
    }

    /// Adds an incoming edge to a previously emitted phi.
    pub fn add_incoming(&mut self, phi: &Operand, from: BlockId, value: impl Into<Operand>) {
        let Some(target) = phi.as_local() else {
            self.fail(malformed_error!("{} is not a phi result", phi));
            return;
        };
        let value = value.into();
        for block in &mut self.blocks {
            for inst in &mut block.instructions {
                if let Instruction::Phi { dest, incoming } = inst {
                    if *dest == target {
                        incoming.push((from, value));
                        return;
                    }
                }
            }
        }
        self.fail(malformed_error!("no phi defines {}", target));
    }

    /// Emits a stack allocation of `ty`.
    pub fn alloca(&mut self, ty: Type) -> Operand {
        self.emit_value(|dest| Instruction::Alloca { dest, ty })
    }

    /// Emits a typed load.
    pub fn load(&mut self, ty: Type, ptr: impl Into<Operand>) -> Operand {
        let ptr = ptr.into();
        self.emit_value(|dest| Instruction::Load { dest, ty, ptr })
    }

    /// Emits a store.
    pub fn store(&mut self, ptr: impl Into<Operand>, value: impl Into<Operand>) {
        let (ptr, value) = (ptr.into(), value.into());
        self.emit(Instruction::Store { ptr, value });
    }

    /// Emits an atomic read-modify-write; the result is the old value.
    pub fn atomic_rmw(
        &mut self,
        op: RmwOp,
        ty: Type,
        ptr: impl Into<Operand>,
        value: impl Into<Operand>,
    ) -> Operand {
        let (ptr, value) = (ptr.into(), value.into());
        self.emit_value(|dest| Instruction::AtomicRmw {
            dest,
            op,
            ty,
            ptr,
            value,
        })
    }

    /// Emits an element-pointer computation.
    pub fn element_ptr(&mut self, base: impl Into<Operand>, ty: Type, indices: Vec<Operand>) -> Operand {
        let base = base.into();
        self.emit_value(|dest| Instruction::ElementPtr {
            dest,
            base,
            ty,
            indices,
        })
    }

    /// Address of field `field` of the struct of type `ty` at `base`.
    pub fn field_ptr(&mut self, base: impl Into<Operand>, ty: Type, field: u32) -> Operand {
        self.element_ptr(
            base,
            ty,
            vec![Operand::i32(0), Operand::i32(field as i32)],
        )
    }

    /// Address of element `index` of an array of `element` starting at `base`.
    pub fn index_ptr(
        &mut self,
        base: impl Into<Operand>,
        element: Type,
        index: impl Into<Operand>,
    ) -> Operand {
        self.element_ptr(base, element, vec![index.into()])
    }

    /// Reads one lane of a vector.
    pub fn extract_element(&mut self, vector: impl Into<Operand>, index: impl Into<Operand>) -> Operand {
        let (vector, index) = (vector.into(), index.into());
        self.emit_value(|dest| Instruction::ExtractElement {
            dest,
            vector,
            index,
        })
    }

    /// Replaces one lane of a vector.
    pub fn insert_element(
        &mut self,
        vector: impl Into<Operand>,
        value: impl Into<Operand>,
        index: impl Into<Operand>,
    ) -> Operand {
        let (vector, value, index) = (vector.into(), value.into(), index.into());
        self.emit_value(|dest| Instruction::InsertElement {
            dest,
            vector,
            value,
            index,
        })
    }

    /// Emits a call whose result is used.
    pub fn call(&mut self, callee: impl Into<Operand>, args: Vec<Operand>) -> Operand {
        let callee = callee.into();
        self.emit_value(|dest| Instruction::Call {
            dest: Some(dest),
            callee,
            args,
        })
    }

    /// Emits a call whose result, if any, is discarded.
    pub fn call_void(&mut self, callee: impl Into<Operand>, args: Vec<Operand>) {
        let callee = callee.into();
        self.emit(Instruction::Call {
            dest: None,
            callee,
            args,
        });
    }

    /// Creates a catch clause for `handler` with a fresh payload binding.
    ///
    /// # Returns
    ///
    /// The clause and the operand the handler reads the payload from.
    pub fn catch_clause(&mut self, filter: CatchFilter, handler: BlockId) -> (CatchClause, Operand) {
        let binding = self.fresh_local();
        (
            CatchClause {
                filter,
                handler,
                binding: Some(binding),
            },
            Operand::Local(binding),
        )
    }

    /// Opens a protected region.
    pub fn try_begin(&mut self, handlers: Vec<CatchClause>) {
        self.emit(Instruction::TryBegin { handlers });
    }

    /// Closes the innermost protected region.
    pub fn try_end(&mut self) {
        self.emit(Instruction::TryEnd);
    }

    /// Ends the innermost handler.
    pub fn catch_end(&mut self) {
        self.emit(Instruction::CatchEnd);
    }

    /// Returns a value.
    pub fn ret(&mut self, value: impl Into<Operand>) {
        self.terminate(Terminator::Ret(Some(value.into())));
    }

    /// Returns from a void function.
    pub fn ret_void(&mut self) {
        self.terminate(Terminator::Ret(None));
    }

    /// Jumps to `target`.
    pub fn br(&mut self, target: BlockId) {
        self.terminate(Terminator::Br(target));
    }

    /// Branches on a boolean.
    pub fn cond_br(&mut self, cond: impl Into<Operand>, then: BlockId, otherwise: BlockId) {
        self.terminate(Terminator::CondBr {
            cond: cond.into(),
            then,
            otherwise,
        });
    }

    /// Multi-way branch.
    pub fn switch(&mut self, value: impl Into<Operand>, cases: Vec<(i64, BlockId)>, default: BlockId) {
        self.terminate(Terminator::Switch {
            value: value.into(),
            cases,
            default,
        });
    }

    /// Throws `value` as an exception of type `ty`.
    pub fn throw(&mut self, value: impl Into<Operand>, ty: Type) {
        self.terminate(Terminator::Throw {
            value: value.into(),
            ty,
        });
    }

    /// Re-raises the exception being handled.
    pub fn rethrow(&mut self) {
        self.terminate(Terminator::Rethrow);
    }

    /// Marks the current block unreachable.
    pub fn unreachable(&mut self) {
        self.terminate(Terminator::Unreachable);
    }

    /// Validates and produces the function.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] for the first recorded emission error, undefined labels,
    /// unterminated blocks, misplaced phis, locals assigned twice and references to blocks
    /// that do not exist.
    pub fn finish(self) -> Result<Function> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let block_count = self.blocks.len() as u32;
        let mut assigned: FxHashSet<LocalId> = (0..self.params.len() as u32).map(LocalId).collect();
        let mut blocks = Vec::with_capacity(self.blocks.len());

        for (index, pending) in self.blocks.into_iter().enumerate() {
            if !pending.defined {
                return Err(malformed_error!(
                    "label '{}' in '{}' is referenced but never defined",
                    pending.name,
                    self.name
                ));
            }
            let Some(terminator) = pending.terminator else {
                return Err(malformed_error!(
                    "block '{}' in '{}' has no terminator",
                    pending.name,
                    self.name
                ));
            };

            let mut seen_non_phi = false;
            for inst in &pending.instructions {
                match inst {
                    Instruction::Phi { .. } if seen_non_phi => {
                        return Err(malformed_error!(
                            "phi after non-phi instruction in block '{}'",
                            pending.name
                        ));
                    }
                    Instruction::Phi { .. } => {}
                    _ => seen_non_phi = true,
                }
                if let Some(dest) = inst.dest() {
                    if !assigned.insert(dest) {
                        return Err(malformed_error!(
                            "local {} assigned twice in '{}'",
                            dest,
                            self.name
                        ));
                    }
                }
                if let Instruction::TryBegin { handlers } = inst {
                    for binding in handlers.iter().filter_map(|h| h.binding) {
                        assigned.insert(binding);
                    }
                }
                if inst.blocks().iter().any(|b| b.0 >= block_count) {
                    return Err(malformed_error!("`{}` names a missing block", inst));
                }
            }
            if terminator.successors().iter().any(|b| b.0 >= block_count) {
                return Err(malformed_error!("`{}` names a missing block", terminator));
            }

            blocks.push(BasicBlock {
                id: BlockId(index as u32),
                name: pending.name,
                instructions: pending.instructions,
                terminator,
            });
        }

        Ok(Function {
            name: self.name,
            params: self.params,
            ret: self.ret,
            blocks,
            flags: self.flags,
            local_count: self.next_local,
        })
    }
}

/// Fluent builder for a [`Module`].
#[derive(Debug, Default)]
pub struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    /// Starts an empty module.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        ModuleBuilder {
            module: Module::new(name),
        }
    }

    /// Adds a global variable.
    #[must_use]
    pub fn global(mut self, name: impl Into<String>, ty: Type, initializer: Option<Constant>) -> Self {
        self.module
            .add_global(GlobalVariable::new(name, ty, initializer));
        self
    }

    /// Adds a function definition.
    #[must_use]
    pub fn function(mut self, function: Function) -> Self {
        self.module.add_function(function);
        self
    }

    /// Declares an external function.
    #[must_use]
    pub fn declare(mut self, name: impl Into<String>) -> Self {
        self.module.declare_function(name);
        self
    }

    /// Declares an external global.
    #[must_use]
    pub fn extern_global(mut self, name: impl Into<String>) -> Self {
        self.module.declare_global(name);
        self
    }

    /// Produces the module.
    #[must_use]
    pub fn build(self) -> Module {
        self.module
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_labels_resolve() {
        let mut f = FunctionBuilder::new("f", vec![Param::new("a", Type::i32())], Type::i32());
        let exit = f.block("exit");
        f.br(exit);
        f.position_at(exit);
        f.ret(Operand::i32(0));
        let function = f.finish().unwrap();
        assert_eq!(function.blocks[0].terminator, Terminator::Br(BlockId(1)));
        assert_eq!(function.block(BlockId(1)).unwrap().name, "exit");
    }

    #[test]
    fn test_undefined_label_is_rejected() {
        let mut f = FunctionBuilder::new("f", vec![], Type::Void);
        let missing = f.block("missing");
        f.br(missing);
        assert!(matches!(f.finish(), Err(Error::Malformed { .. })));
    }

    #[test]
    fn test_unterminated_block_is_rejected() {
        let mut f = FunctionBuilder::new("f", vec![], Type::i32());
        let _ = f.alloca(Type::i32());
        assert!(matches!(f.finish(), Err(Error::Malformed { .. })));
    }

    #[test]
    fn test_emit_after_terminator_is_rejected() {
        let mut f = FunctionBuilder::new("f", vec![], Type::Void);
        f.ret_void();
        let _ = f.alloca(Type::i32());
        assert!(f.finish().is_err());
    }

    #[test]
    fn test_phi_incoming_added_later() {
        let mut f = FunctionBuilder::new("f", vec![], Type::i32());
        let entry = f.current_block();
        let header = f.block("header");
        f.br(header);
        f.position_at(header);
        let counter = f.phi(vec![(entry, Operand::i32(0))]);
        let next = f.binary(BinaryOp::Add, counter.clone(), Operand::i32(1));
        f.add_incoming(&counter, header, next.clone());
        f.ret(next);
        let function = f.finish().unwrap();
        match &function.blocks[1].instructions[0] {
            Instruction::Phi { incoming, .. } => assert_eq!(incoming.len(), 2),
            other => panic!("unexpected {other}"),
        }
        assert_eq!(function.local_count, 2);
    }

    #[test]
    fn test_module_builder() {
        let module = ModuleBuilder::new("m")
            .global("g", Type::i32(), Some(Constant::i32(2)))
            .declare("malloc")
            .build();
        assert_eq!(module.globals.len(), 1);
        assert_eq!(module.declarations, vec!["malloc".to_string()]);
    }
}
