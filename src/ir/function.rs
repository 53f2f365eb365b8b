//! Functions and basic blocks.

use std::fmt;

use bitflags::bitflags;

use crate::ir::{
    instruction::{BlockId, Instruction, LocalId, Terminator},
    types::Type,
};

bitflags! {
    /// Function attributes carried over from the front end.
    ///
    /// None of these change the engine's semantics: every call materializes a frame
    /// regardless of inlining hints. They are kept so that reports can explain why a
    /// call graph looks the way it does.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FunctionFlags: u32 {
        /// The front end considered the function a good inlining candidate
        const INLINE_HINT = 0x0001;
        /// The function must not be inlined
        const NO_INLINE = 0x0002;
        /// The function never returns normally
        const NO_RETURN = 0x0004;
    }
}

/// A formal parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Param {
    /// Source-level name; symbolic inputs are named after it
    pub name: String,
    /// Parameter type
    pub ty: Type,
}

impl Param {
    /// Creates a parameter.
    #[must_use]
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Param {
            name: name.into(),
            ty,
        }
    }
}

/// A straight-line sequence of instructions ending in a terminator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BasicBlock {
    /// Index of the block in its function
    pub id: BlockId,
    /// Label, for diagnostics
    pub name: String,
    /// Body
    pub instructions: Vec<Instruction>,
    /// Exit
    pub terminator: Terminator,
}

impl BasicBlock {
    /// Number of leading phi instructions.
    #[must_use]
    pub fn phi_count(&self) -> usize {
        self.instructions
            .iter()
            .take_while(|i| matches!(i, Instruction::Phi { .. }))
            .count()
    }
}

/// A function definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Function {
    /// Linkage name
    pub name: String,
    /// Parameters; parameter `i` is bound to `LocalId(i)`
    pub params: Vec<Param>,
    /// Return type
    pub ret: Type,
    /// Blocks, indexed by [`BlockId`]; block 0 is the entry
    pub blocks: Vec<BasicBlock>,
    /// Attributes
    pub flags: FunctionFlags,
    /// Number of locals, parameters included
    pub local_count: u32,
}

impl Function {
    /// The entry block id.
    #[must_use]
    pub const fn entry(&self) -> BlockId {
        BlockId(0)
    }

    /// Looks up a block.
    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id.0 as usize)
    }

    /// Local bound to parameter `index`.
    #[must_use]
    pub const fn param_local(index: usize) -> LocalId {
        LocalId(index as u32)
    }

    /// The function's signature as a [`Type::Function`].
    #[must_use]
    pub fn signature(&self) -> Type {
        Type::function(
            self.params.iter().map(|p| p.ty.clone()).collect(),
            self.ret.clone(),
        )
    }

    /// Total instruction count, terminators included.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(|b| b.instructions.len() + 1).sum()
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "define {} @{}(", self.ret, self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} %{}", param.ty, param.name)?;
        }
        writeln!(f, ") {{")?;
        for block in &self.blocks {
            writeln!(f, "{}: ; {}", block.id, block.name)?;
            for inst in &block.instructions {
                writeln!(f, "  {inst}")?;
            }
            writeln!(f, "  {}", block.terminator)?;
        }
        write!(f, "}}")
    }
}
