//! IR type system and C ABI memory layout.
//!
//! Every value the engine manipulates carries a [`Type`]. Integer types record both their bit
//! width and their signedness so that extension, division, comparison and shift semantics can
//! be chosen without consulting the instruction that produced the value. Aggregate layouts follow
//! the System V C ABI: fields are placed at their natural alignment, structs are padded to a
//! multiple of their strictest member, and packed structs drop all padding.
//!
//! # Key Components
//!
//! - [`Type`] - The type lattice: integers, opaque pointers, arrays, SIMD vectors, structs
//! - [`StructType`] - Ordered struct fields with an optional name and packing flag
//! - [`FunctionType`] - Parameter and return types of a function
//! - [`Layout`] - Size and alignment of a sized type
//!
//! # Examples
//!
//! ```rust
//! use pathscope::ir::Type;
//!
//! // struct Mismatched { uint8_t a; uint32_t b; uint8_t c; }
//! let ty = Type::structure(vec![Type::u8(), Type::u32(), Type::u8()]);
//! assert_eq!(ty.field_offset(1)?, 4);
//! assert_eq!(ty.field_offset(2)?, 8);
//! assert_eq!(ty.size()?, 12);
//! # Ok::<(), pathscope::Error>(())
//! ```

use std::{fmt, sync::Arc};

use crate::{Error, Result};

/// Size in bytes of a pointer in the modeled ABI.
pub const POINTER_SIZE: u64 = 8;

/// An IR type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// No value; only valid as a function return type.
    Void,
    /// Fixed-width integer. `bits` is in `1..=64`; width 1 is the boolean type.
    Int {
        /// Bit width
        bits: u32,
        /// Whether arithmetic on this type is signed
        signed: bool,
    },
    /// Opaque pointer. Pointee types are given by the instructions that use the pointer.
    Ptr,
    /// Fixed-length array.
    Array {
        /// Element type
        element: Arc<Type>,
        /// Number of elements
        len: u64,
    },
    /// Fixed-length SIMD vector of integers.
    Vector {
        /// Element type, always an integer
        element: Arc<Type>,
        /// Number of lanes
        len: u32,
    },
    /// Struct with C layout.
    Struct(Arc<StructType>),
    /// Function signature; not storable in memory.
    Function(Arc<FunctionType>),
}

/// Field list of a struct type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructType {
    /// Source-level name, for display only
    pub name: Option<String>,
    /// Field types in declaration order
    pub fields: Vec<Type>,
    /// Packed structs have no padding and alignment 1
    pub packed: bool,
}

/// Parameter and return types of a function.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionType {
    /// Parameter types
    pub params: Vec<Type>,
    /// Return type
    pub ret: Type,
}

/// Size and alignment of a sized type, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// Total size including tail padding
    pub size: u64,
    /// Required alignment
    pub align: u64,
}

impl Type {
    /// Creates an integer type.
    #[must_use]
    pub const fn int(bits: u32, signed: bool) -> Self {
        Type::Int { bits, signed }
    }

    /// The 1-bit boolean type produced by comparisons.
    #[must_use]
    pub const fn bool() -> Self {
        Type::int(1, false)
    }

    /// `int8_t`
    #[must_use]
    pub const fn i8() -> Self {
        Type::int(8, true)
    }

    /// `uint8_t`
    #[must_use]
    pub const fn u8() -> Self {
        Type::int(8, false)
    }

    /// `int16_t`
    #[must_use]
    pub const fn i16() -> Self {
        Type::int(16, true)
    }

    /// `uint16_t`
    #[must_use]
    pub const fn u16() -> Self {
        Type::int(16, false)
    }

    /// `int32_t`
    #[must_use]
    pub const fn i32() -> Self {
        Type::int(32, true)
    }

    /// `uint32_t`
    #[must_use]
    pub const fn u32() -> Self {
        Type::int(32, false)
    }

    /// `int64_t`
    #[must_use]
    pub const fn i64() -> Self {
        Type::int(64, true)
    }

    /// `uint64_t`
    #[must_use]
    pub const fn u64() -> Self {
        Type::int(64, false)
    }

    /// Opaque pointer type.
    #[must_use]
    pub const fn ptr() -> Self {
        Type::Ptr
    }

    /// Creates an array type `[len x element]`.
    #[must_use]
    pub fn array(element: Type, len: u64) -> Self {
        Type::Array {
            element: Arc::new(element),
            len,
        }
    }

    /// Creates a vector type `<len x element>`.
    #[must_use]
    pub fn vector(element: Type, len: u32) -> Self {
        Type::Vector {
            element: Arc::new(element),
            len,
        }
    }

    /// Creates an anonymous, naturally aligned struct type.
    #[must_use]
    pub fn structure(fields: Vec<Type>) -> Self {
        Type::Struct(Arc::new(StructType {
            name: None,
            fields,
            packed: false,
        }))
    }

    /// Creates a named, naturally aligned struct type.
    #[must_use]
    pub fn named_structure(name: impl Into<String>, fields: Vec<Type>) -> Self {
        Type::Struct(Arc::new(StructType {
            name: Some(name.into()),
            fields,
            packed: false,
        }))
    }

    /// Creates a packed struct type.
    #[must_use]
    pub fn packed_structure(fields: Vec<Type>) -> Self {
        Type::Struct(Arc::new(StructType {
            name: None,
            fields,
            packed: true,
        }))
    }

    /// Creates a function type.
    #[must_use]
    pub fn function(params: Vec<Type>, ret: Type) -> Self {
        Type::Function(Arc::new(FunctionType { params, ret }))
    }

    /// Returns `true` for integer types of any width.
    #[must_use]
    pub const fn is_int(&self) -> bool {
        matches!(self, Type::Int { .. })
    }

    /// Returns `true` for the pointer type.
    #[must_use]
    pub const fn is_pointer(&self) -> bool {
        matches!(self, Type::Ptr)
    }

    /// Returns `true` for [`Type::Void`].
    #[must_use]
    pub const fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    /// Returns `true` for arrays and structs.
    #[must_use]
    pub const fn is_aggregate(&self) -> bool {
        matches!(self, Type::Array { .. } | Type::Struct(_))
    }

    /// Bit width of an integer type.
    #[must_use]
    pub const fn bits(&self) -> Option<u32> {
        match self {
            Type::Int { bits, .. } => Some(*bits),
            _ => None,
        }
    }

    /// Signedness of an integer type; `false` for everything else.
    #[must_use]
    pub const fn is_signed(&self) -> bool {
        matches!(self, Type::Int { signed: true, .. })
    }

    /// Computes size and alignment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedType`] for void and function types, integer widths outside
    /// `1..=64`, non-integer vector elements and aggregates whose size overflows.
    pub fn layout(&self) -> Result<Layout> {
        match self {
            Type::Void => Err(Error::MalformedType("void has no layout".into())),
            Type::Function(_) => Err(Error::MalformedType(
                "function types have no layout".into(),
            )),
            Type::Int { bits, .. } => {
                let size = match bits {
                    1..=8 => 1,
                    9..=16 => 2,
                    17..=32 => 4,
                    33..=64 => 8,
                    _ => {
                        return Err(Error::MalformedType(format!(
                            "integer width {bits} outside 1..=64"
                        )))
                    }
                };
                Ok(Layout { size, align: size })
            }
            Type::Ptr => Ok(Layout {
                size: POINTER_SIZE,
                align: POINTER_SIZE,
            }),
            Type::Array { element, len } => {
                let inner = element.layout()?;
                let size = inner.size.checked_mul(*len).ok_or_else(|| {
                    Error::MalformedType(format!("array of {len} elements overflows"))
                })?;
                Ok(Layout {
                    size,
                    align: inner.align,
                })
            }
            Type::Vector { element, len } => {
                if !element.is_int() {
                    return Err(Error::MalformedType(format!(
                        "vector element {element} is not an integer"
                    )));
                }
                if *len == 0 {
                    return Err(Error::MalformedType("zero-length vector".into()));
                }
                let size = element.layout()?.size * u64::from(*len);
                Ok(Layout {
                    size,
                    align: size.next_power_of_two().min(16),
                })
            }
            Type::Struct(st) => {
                let mut offset = 0u64;
                let mut align = 1u64;
                for field in &st.fields {
                    let inner = field.layout()?;
                    if !st.packed {
                        offset = align_to(offset, inner.align);
                        align = align.max(inner.align);
                    }
                    offset += inner.size;
                }
                Ok(Layout {
                    size: align_to(offset, align),
                    align,
                })
            }
        }
    }

    /// Size of the type in bytes.
    ///
    /// # Errors
    ///
    /// See [`Type::layout`].
    pub fn size(&self) -> Result<u64> {
        Ok(self.layout()?.size)
    }

    /// Byte offset of field `index` within a struct type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedType`] if `self` is not a struct or the index is out of range.
    pub fn field_offset(&self, index: usize) -> Result<u64> {
        let Type::Struct(st) = self else {
            return Err(Error::MalformedType(format!("{self} is not a struct")));
        };
        if index >= st.fields.len() {
            return Err(Error::MalformedType(format!(
                "field {index} out of range for {self}"
            )));
        }

        let mut offset = 0u64;
        for (i, field) in st.fields.iter().enumerate() {
            let inner = field.layout()?;
            if !st.packed {
                offset = align_to(offset, inner.align);
            }
            if i == index {
                return Ok(offset);
            }
            offset += inner.size;
        }
        Err(Error::MalformedType(format!(
            "field {index} out of range for {self}"
        )))
    }

    /// Type of field `index` within a struct type.
    #[must_use]
    pub fn field_type(&self, index: usize) -> Option<&Type> {
        match self {
            Type::Struct(st) => st.fields.get(index),
            _ => None,
        }
    }

    /// Element type of an array or vector.
    #[must_use]
    pub fn element_type(&self) -> Option<&Type> {
        match self {
            Type::Array { element, .. } | Type::Vector { element, .. } => Some(element),
            _ => None,
        }
    }

    /// Checks that the type can be placed in memory.
    ///
    /// # Errors
    ///
    /// See [`Type::layout`].
    pub fn validate(&self) -> Result<()> {
        self.layout().map(|_| ())
    }
}

/// Rounds `offset` up to the next multiple of `align`.
#[must_use]
pub const fn align_to(offset: u64, align: u64) -> u64 {
    if align <= 1 {
        offset
    } else {
        offset.div_ceil(align) * align
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Int { bits: 1, .. } => write!(f, "bool"),
            Type::Int { bits, signed: true } => write!(f, "i{bits}"),
            Type::Int {
                bits,
                signed: false,
            } => write!(f, "u{bits}"),
            Type::Ptr => write!(f, "ptr"),
            Type::Array { element, len } => write!(f, "[{len} x {element}]"),
            Type::Vector { element, len } => write!(f, "<{len} x {element}>"),
            Type::Struct(st) => {
                if let Some(name) = &st.name {
                    return write!(f, "%{name}");
                }
                write!(f, "{}{{ ", if st.packed { "<" } else { "" })?;
                for (i, field) in st.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{field}")?;
                }
                write!(f, " }}{}", if st.packed { ">" } else { "" })
            }
            Type::Function(ft) => {
                write!(f, "{} (", ft.ret)?;
                for (i, param) in ft.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{param}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_layouts() {
        assert_eq!(Type::bool().size().unwrap(), 1);
        assert_eq!(Type::i8().size().unwrap(), 1);
        assert_eq!(Type::u16().size().unwrap(), 2);
        assert_eq!(Type::i32().layout().unwrap().align, 4);
        assert_eq!(Type::int(24, false).size().unwrap(), 4);
        assert_eq!(Type::u64().size().unwrap(), 8);
        assert!(Type::int(65, true).layout().is_err());
        assert!(Type::int(0, true).layout().is_err());
    }

    #[test]
    fn test_struct_padding() {
        // struct { u8; u32; u8 } -> offsets 0, 4, 8 and size 12
        let ty = Type::structure(vec![Type::u8(), Type::u32(), Type::u8()]);
        assert_eq!(ty.field_offset(0).unwrap(), 0);
        assert_eq!(ty.field_offset(1).unwrap(), 4);
        assert_eq!(ty.field_offset(2).unwrap(), 8);
        assert_eq!(ty.size().unwrap(), 12);
        assert_eq!(ty.layout().unwrap().align, 4);
    }

    #[test]
    fn test_packed_struct() {
        let ty = Type::packed_structure(vec![Type::u8(), Type::u32(), Type::u8()]);
        assert_eq!(ty.field_offset(1).unwrap(), 1);
        assert_eq!(ty.field_offset(2).unwrap(), 5);
        assert_eq!(ty.size().unwrap(), 6);
    }

    #[test]
    fn test_nested_struct_and_array() {
        // struct Nested { struct TwoInts ti; struct ThreeInts tri; int32_t z; }
        let two = Type::structure(vec![Type::i32(), Type::i32()]);
        let three = Type::structure(vec![Type::i32(), Type::i32(), Type::i32()]);
        let nested = Type::structure(vec![two, three, Type::i32()]);
        assert_eq!(nested.field_offset(1).unwrap(), 8);
        assert_eq!(nested.field_offset(2).unwrap(), 20);
        assert_eq!(nested.size().unwrap(), 24);

        // struct WithArray { int32_t a; char arr[10]; int64_t b; }
        let with_array = Type::structure(vec![
            Type::i32(),
            Type::array(Type::i8(), 10),
            Type::i64(),
        ]);
        assert_eq!(with_array.field_offset(1).unwrap(), 4);
        assert_eq!(with_array.field_offset(2).unwrap(), 16);
        assert_eq!(with_array.size().unwrap(), 24);
    }

    #[test]
    fn test_pointer_struct_alignment() {
        let ty = Type::structure(vec![Type::i32(), Type::ptr()]);
        assert_eq!(ty.field_offset(1).unwrap(), 8);
        assert_eq!(ty.size().unwrap(), 16);
    }

    #[test]
    fn test_vector_layout() {
        let v = Type::vector(Type::i32(), 4);
        assert_eq!(v.layout().unwrap(), Layout { size: 16, align: 16 });
        assert!(Type::vector(Type::ptr(), 2).layout().is_err());
    }

    #[test]
    fn test_unsized_types_rejected() {
        assert!(Type::Void.layout().is_err());
        assert!(Type::function(vec![], Type::Void).layout().is_err());
        assert!(Type::i32().field_offset(0).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Type::i32().to_string(), "i32");
        assert_eq!(Type::u8().to_string(), "u8");
        assert_eq!(Type::array(Type::i64(), 3).to_string(), "[3 x i64]");
        assert_eq!(
            Type::structure(vec![Type::u8(), Type::ptr()]).to_string(),
            "{ u8, ptr }"
        );
        assert_eq!(
            Type::named_structure("OneInt", vec![Type::i32()]).to_string(),
            "%OneInt"
        );
    }
}
