//! Memory objects and their byte contents.

use std::{fmt, sync::Arc};

use imbl::OrdMap;
use strum::Display;

use crate::{memory::Pointer, symbolic::SymbolicExpr};

/// Identity of a memory object within one state's memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u32);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj{}", self.0)
    }
}

/// Where an object came from; decides its lifetime rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ObjectKind {
    /// `alloca` storage, released when its frame returns
    Stack,
    /// Allocated by a hook such as `malloc`; released by `free`
    Heap,
    /// Global variable storage, alive for the whole session
    Global,
    /// Backing storage for a pointer argument of the entry function
    Argument,
}

/// Contents of bytes that were never written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Fill {
    /// Reads as zero (static storage, `calloc`)
    Zero,
    /// Reads as a fresh symbol, remembered after the first read
    Uninit,
}

/// One stored byte.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Byte {
    /// Eight bits of integer data
    Data(SymbolicExpr),
    /// Byte `index` (little endian) of a stored pointer
    Pointer {
        /// The whole pointer
        pointer: Pointer,
        /// Which of its bytes this is
        index: u8,
    },
}

impl Byte {
    /// A concrete data byte.
    #[must_use]
    pub fn concrete(value: u8) -> Self {
        Byte::Data(SymbolicExpr::constant(u64::from(value), 8))
    }

    /// Returns `true` for a data byte that is concretely zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        matches!(self, Byte::Data(e) if e.as_constant() == Some(0))
    }
}

/// A contiguous, independently allocated byte region.
///
/// Contents are sparse: only written (or materialized) bytes are stored, in a persistent
/// ordered map so that cloning an object for a forked state shares its bytes.
#[derive(Debug, Clone)]
pub struct MemoryObject {
    /// Identity
    pub id: ObjectId,
    /// Origin
    pub kind: ObjectKind,
    /// Diagnostic name (global name, `alloca` site, hook name)
    pub name: Arc<str>,
    /// Size in bytes
    pub size: u64,
    /// Contents of unwritten bytes
    pub fill: Fill,
    /// Cleared by `free` or frame release
    pub live: bool,
    bytes: OrdMap<u64, Byte>,
}

impl MemoryObject {
    /// Creates an empty object.
    #[must_use]
    pub fn new(id: ObjectId, kind: ObjectKind, name: Arc<str>, size: u64, fill: Fill) -> Self {
        MemoryObject {
            id,
            kind,
            name,
            size,
            fill,
            live: true,
            bytes: OrdMap::new(),
        }
    }

    /// The stored byte at `offset`, if it was ever written.
    #[must_use]
    pub fn byte(&self, offset: u64) -> Option<&Byte> {
        self.bytes.get(&offset)
    }

    /// Writes one byte.
    pub fn set_byte(&mut self, offset: u64, byte: Byte) {
        self.bytes.insert(offset, byte);
    }

    /// Forgets every stored byte.
    pub fn clear(&mut self) {
        self.bytes = OrdMap::new();
    }

    /// Number of stored bytes.
    #[must_use]
    pub fn stored(&self) -> usize {
        self.bytes.len()
    }

    /// Stored bytes in `[from, to)`, in address order.
    pub fn range(&self, from: u64, to: u64) -> impl Iterator<Item = (&u64, &Byte)> {
        self.bytes.range(from..to)
    }
}

impl fmt::Display for MemoryObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}' ({} bytes)", self.kind, self.name, self.size)
    }
}
