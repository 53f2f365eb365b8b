//! Symbolic memory model.
//!
//! Memory is a set of independent objects, each a byte array of fixed size. Pointers are never
//! integers: a [`Pointer`] names its target object (or function) and carries a symbolic byte
//! offset. This keeps objects from aliasing, makes every out-of-bounds access detectable, and
//! lets a forked state share all bytes it has not written since the fork.
//!
//! # Architecture
//!
//! ```text
//! Memory ──► imbl::HashMap<ObjectId, MemoryObject>
//!                                   │
//!                                   └─► imbl::OrdMap<offset, Byte>   (sparse, little endian)
//! ```
//!
//! Integers are stored as their little-endian bytes, each byte an 8-bit slice of the stored
//! expression. Pointers are stored as eight tagged pointer bytes and can only be read back
//! whole; reading part of a pointer, or reading data bytes as a pointer, is a fault.
//!
//! # Key Components
//!
//! - [`Memory`] - The per-state store: allocation, typed loads and stores, bulk copies
//! - [`MemoryObject`] / [`ObjectKind`] / [`Fill`] - Objects and their lifetime rules
//! - [`Value`] / [`Pointer`] - Register values
//! - [`globals`] - Evaluation of global initializers into the initial memory image
//! - [`Watchpoints`] - Watched byte ranges and the accesses that hit them
//! - [`MemoryFault`] - Per-path memory errors

pub mod globals;
mod object;
mod store;
mod value;
mod watch;

use thiserror::Error;

pub use globals::ConstantResolver;
pub use object::{Byte, Fill, MemoryObject, ObjectId, ObjectKind};
pub use store::{Memory, DEFAULT_SYMBOLIC_SPAN};
pub use value::{bytes_for_bits, element_offset, Pointer, PointerTarget, Value, OFFSET_BITS};
pub use watch::{AccessKind, WatchHit, Watchpoint, Watchpoints};

/// Size of a stored pointer in bytes.
pub const POINTER_BYTES: u64 = 8;

/// A memory error on one execution path.
///
/// Faults are not fatal to exploration. The interpreter turns them into a terminal fault
/// outcome for the path that raised them.
#[derive(Error, Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemoryFault {
    /// An access reaches outside its object.
    #[error("out-of-bounds access to '{object}': {size} bytes at offset {offset} of {object_size}")]
    OutOfBounds {
        /// Object name
        object: String,
        /// Offset of the access; `-1` if it was only known to be symbolic
        offset: i64,
        /// Access size in bytes
        size: u64,
        /// Object size in bytes
        object_size: u64,
    },

    /// Load or store through the null pointer.
    #[error("null pointer dereference")]
    NullDereference,

    /// Access to an object that was freed or whose frame returned.
    #[error("use after free of '{0}'")]
    UseAfterFree(String),

    /// `free` of something that is not the start of a live heap object.
    #[error("invalid free of '{0}'")]
    InvalidFree(String),

    /// `free` of an already freed heap object.
    #[error("double free of '{0}'")]
    DoubleFree(String),

    /// Load or store through a function pointer.
    #[error("dereference of a function pointer")]
    FunctionDereference,

    /// Pointer read from bytes that never held a pointer.
    #[error("pointer read from uninitialized or integer bytes of '{0}'")]
    UninitializedPointer(String),

    /// Read of part of a stored pointer, or of a pointer assembled from mixed bytes.
    #[error("partial pointer read from '{0}'")]
    PointerFragment(String),

    /// Pointer written through a symbolic offset.
    #[error("pointer stored through a symbolic offset into '{0}'")]
    SymbolicPointerStore(String),

    /// Subtraction or ordering of pointers into different objects.
    #[error("pointers into unrelated objects {0} and {1}")]
    UnrelatedPointers(String, String),
}
