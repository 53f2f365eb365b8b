//! Runtime values.
//!
//! A [`Value`] is what a local holds and what a typed load produces. Integers are symbolic
//! bit-vectors tagged with their signedness. Pointers are `(target, offset)` pairs and never
//! raw integers, which is what lets the memory model tell an out-of-bounds access or an
//! object confusion apart from an ordinary read.

use std::{fmt, sync::Arc};

use crate::{
    ir::Type,
    project::FunctionId,
    symbolic::{SymbolicExpr, SymbolicOp},
    Result,
};

use super::object::ObjectId;

/// Width of pointer offsets in bits.
pub const OFFSET_BITS: u32 = 64;

/// What a pointer points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PointerTarget {
    /// The null pointer
    Null,
    /// A memory object
    Object(ObjectId),
    /// A function; only callable, never dereferenceable
    Function(FunctionId),
}

impl fmt::Display for PointerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointerTarget::Null => write!(f, "null"),
            PointerTarget::Object(id) => write!(f, "{id}"),
            PointerTarget::Function(id) => write!(f, "{id}"),
        }
    }
}

/// A pointer: a target plus a 64-bit byte offset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pointer {
    /// Pointee
    pub target: PointerTarget,
    /// Byte offset from the start of the target
    pub offset: SymbolicExpr,
}

impl Pointer {
    /// The null pointer.
    #[must_use]
    pub fn null() -> Self {
        Pointer {
            target: PointerTarget::Null,
            offset: SymbolicExpr::constant(0, OFFSET_BITS),
        }
    }

    /// Pointer to the start of an object.
    #[must_use]
    pub fn to_object(id: ObjectId) -> Self {
        Pointer {
            target: PointerTarget::Object(id),
            offset: SymbolicExpr::constant(0, OFFSET_BITS),
        }
    }

    /// Pointer to a function.
    #[must_use]
    pub fn to_function(id: FunctionId) -> Self {
        Pointer {
            target: PointerTarget::Function(id),
            offset: SymbolicExpr::constant(0, OFFSET_BITS),
        }
    }

    /// Same target, offset moved by `delta` bytes.
    #[must_use]
    pub fn offset_by(&self, delta: &SymbolicExpr) -> Self {
        Pointer {
            target: self.target,
            offset: SymbolicExpr::binary(SymbolicOp::Add, self.offset.clone(), delta.clone()),
        }
    }

    /// Returns `true` for the null pointer.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.target == PointerTarget::Null
    }

    /// The offset, if it is concrete.
    #[must_use]
    pub fn concrete_offset(&self) -> Option<i64> {
        self.offset.as_signed()
    }

    /// The object pointed into, if any.
    #[must_use]
    pub const fn object(&self) -> Option<ObjectId> {
        match self.target {
            PointerTarget::Object(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offset.as_constant() {
            Some(0) => write!(f, "&{}", self.target),
            _ => write!(f, "&{}+{}", self.target, self.offset),
        }
    }
}

/// A value held by a local or read from memory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    /// An integer of `expr.width()` bits
    Int {
        /// The bits
        expr: SymbolicExpr,
        /// Signedness, selecting signed division, comparison and extension
        signed: bool,
    },
    /// A pointer
    Pointer(Pointer),
    /// A SIMD vector of integers of one width
    Vector {
        /// Lanes
        elements: Vec<SymbolicExpr>,
        /// Lane signedness
        signed: bool,
    },
    /// Guarded alternatives, exactly one of which holds on any concrete execution.
    ///
    /// Produced when a pointer is selected by a symbolic condition or loaded through a
    /// symbolic offset. The interpreter forks on a choice before using it.
    Choice(Arc<[(SymbolicExpr, Value)]>),
}

impl Value {
    /// Integer from an expression.
    #[must_use]
    pub const fn int(expr: SymbolicExpr, signed: bool) -> Self {
        Value::Int { expr, signed }
    }

    /// Integer constant of `bits` bits.
    #[must_use]
    pub fn from_u64(value: u64, bits: u32, signed: bool) -> Self {
        Value::Int {
            expr: SymbolicExpr::constant(value, bits),
            signed,
        }
    }

    /// Boolean from a 1-bit expression.
    #[must_use]
    pub fn bool(expr: SymbolicExpr) -> Self {
        Value::Int {
            expr,
            signed: false,
        }
    }

    /// The null pointer.
    #[must_use]
    pub fn null() -> Self {
        Value::Pointer(Pointer::null())
    }

    /// The all-zero value of a scalar or vector type.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Unsupported`] for aggregates, which have no register form.
    pub fn zero(ty: &Type) -> Result<Self> {
        match ty {
            Type::Int { bits, signed } => Ok(Value::from_u64(0, *bits, *signed)),
            Type::Ptr => Ok(Value::null()),
            Type::Vector { element, len } => {
                let bits = element.bits().unwrap_or(8);
                Ok(Value::Vector {
                    elements: vec![SymbolicExpr::constant(0, bits); *len as usize],
                    signed: element.is_signed(),
                })
            }
            other => Err(crate::Error::Unsupported(format!(
                "no register value for type {other}"
            ))),
        }
    }

    /// Builds a choice, dropping impossible alternatives and collapsing trivial ones.
    #[must_use]
    pub fn choice(alternatives: Vec<(SymbolicExpr, Value)>) -> Self {
        let mut flat: Vec<(SymbolicExpr, Value)> = Vec::with_capacity(alternatives.len());
        for (guard, value) in alternatives {
            if guard.is_false() {
                continue;
            }
            match value {
                Value::Choice(inner) => {
                    for (g, v) in inner.iter() {
                        let combined = guard.logical_and(g);
                        if !combined.is_false() {
                            flat.push((combined, v.clone()));
                        }
                    }
                }
                other => flat.push((guard, other)),
            }
        }
        if flat.len() == 1 && flat[0].0.is_true() {
            if let Some((_, value)) = flat.pop() {
                return value;
            }
        }
        Value::Choice(flat.into())
    }

    /// `cond ? then : otherwise` without forking where the shapes allow it.
    #[must_use]
    pub fn select(cond: &SymbolicExpr, then: Value, otherwise: Value) -> Self {
        if let Some(c) = cond.as_constant() {
            return if c != 0 { then } else { otherwise };
        }
        match (then, otherwise) {
            (Value::Int { expr: a, signed }, Value::Int { expr: b, .. })
                if a.width() == b.width() =>
            {
                Value::int(SymbolicExpr::ite(cond.clone(), a, b), signed)
            }
            (
                Value::Vector {
                    elements: a,
                    signed,
                },
                Value::Vector { elements: b, .. },
            ) if a.len() == b.len() => Value::Vector {
                elements: a
                    .into_iter()
                    .zip(b)
                    .map(|(x, y)| SymbolicExpr::ite(cond.clone(), x, y))
                    .collect(),
                signed,
            },
            (Value::Pointer(a), Value::Pointer(b)) if a.target == b.target => {
                Value::Pointer(Pointer {
                    target: a.target,
                    offset: SymbolicExpr::ite(cond.clone(), a.offset, b.offset),
                })
            }
            (a, b) => Value::choice(vec![(cond.clone(), a), (cond.logical_not(), b)]),
        }
    }

    /// The integer expression, if this is an integer.
    #[must_use]
    pub fn as_int(&self) -> Option<&SymbolicExpr> {
        match self {
            Value::Int { expr, .. } => Some(expr),
            _ => None,
        }
    }

    /// The pointer, if this is a pointer.
    #[must_use]
    pub fn as_pointer(&self) -> Option<&Pointer> {
        match self {
            Value::Pointer(p) => Some(p),
            _ => None,
        }
    }

    /// Signedness of an integer or vector; `false` otherwise.
    #[must_use]
    pub fn is_signed(&self) -> bool {
        match self {
            Value::Int { signed, .. } | Value::Vector { signed, .. } => *signed,
            _ => false,
        }
    }

    /// Returns `true` for a choice.
    #[must_use]
    pub const fn is_choice(&self) -> bool {
        matches!(self, Value::Choice(_))
    }

    /// The concrete integer, if any.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        self.as_int().and_then(SymbolicExpr::as_constant)
    }

    /// Number of bytes this value occupies when stored.
    #[must_use]
    pub fn byte_size(&self) -> u64 {
        match self {
            Value::Int { expr, .. } => bytes_for_bits(expr.width()),
            Value::Pointer(_) => super::POINTER_BYTES,
            Value::Vector { elements, .. } => elements
                .first()
                .map_or(0, |e| bytes_for_bits(e.width()) * elements.len() as u64),
            Value::Choice(alternatives) => alternatives.first().map_or(0, |(_, v)| v.byte_size()),
        }
    }
}

/// Storage size of an integer of `bits` bits.
#[must_use]
pub const fn bytes_for_bits(bits: u32) -> u64 {
    match bits {
        0..=8 => 1,
        9..=16 => 2,
        17..=32 => 4,
        _ => 8,
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int { expr, .. } => write!(f, "{expr}"),
            Value::Pointer(p) => write!(f, "{p}"),
            Value::Vector { elements, .. } => {
                write!(f, "<")?;
                for (i, e) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, ">")
            }
            Value::Choice(alternatives) => {
                write!(f, "choice[")?;
                for (i, (guard, value)) in alternatives.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{guard} => {value}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Byte offset of an element-pointer index path.
///
/// The first index steps over whole `ty` values; each further index steps into the current
/// type: a field of a struct (the index must be constant) or an element of an array or
/// vector. Indices must be 64-bit.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] for a symbolic struct index or an index into a
/// scalar, and [`crate::Error::MalformedType`] for unsized types.
pub fn element_offset(ty: &Type, indices: &[SymbolicExpr]) -> Result<SymbolicExpr> {
    let scaled = |index: &SymbolicExpr, size: u64| {
        SymbolicExpr::binary(
            SymbolicOp::Mul,
            index.clone(),
            SymbolicExpr::constant(size, OFFSET_BITS),
        )
    };

    let Some((first, rest)) = indices.split_first() else {
        return Ok(SymbolicExpr::constant(0, OFFSET_BITS));
    };
    let mut offset = scaled(first, ty.size()?);
    let mut current = ty.clone();
    for index in rest {
        let (step, next) = match &current {
            Type::Struct(_) => {
                let Some(field) = index.as_constant() else {
                    return Err(malformed_error!("symbolic struct index into {}", current));
                };
                let field = field as usize;
                let next = current
                    .field_type(field)
                    .cloned()
                    .ok_or_else(|| malformed_error!("field {} out of range for {}", field, current))?;
                let at = current.field_offset(field)?;
                (SymbolicExpr::constant(at, OFFSET_BITS), next)
            }
            Type::Array { element, .. } | Type::Vector { element, .. } => {
                let element = element.as_ref().clone();
                (scaled(index, element.size()?), element)
            }
            other => return Err(malformed_error!("cannot index into {}", other)),
        };
        offset = SymbolicExpr::binary(SymbolicOp::Add, offset, step);
        current = next;
    }
    Ok(offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c64(v: u64) -> SymbolicExpr {
        SymbolicExpr::constant(v, OFFSET_BITS)
    }

    #[test]
    fn test_element_offset_through_nested_struct() {
        // struct Inner { u8 a; u32 b; }  struct Outer { u64 x; Inner arr[3]; }
        let inner = Type::structure(vec![Type::u8(), Type::u32()]);
        let outer = Type::structure(vec![Type::u64(), Type::array(inner, 3)]);
        // &outer[0].arr[2].b = 8 + 2 * 8 + 4
        let offset = element_offset(&outer, &[c64(0), c64(1), c64(2), c64(1)]).unwrap();
        assert_eq!(offset.as_constant(), Some(28));
    }

    #[test]
    fn test_element_offset_symbolic_index_scales() {
        let i = SymbolicExpr::symbol("i", 64);
        let offset = element_offset(&Type::i32(), &[i]).unwrap();
        let mut values = crate::symbolic::Assignment::default();
        values.insert("i".into(), 5);
        assert_eq!(offset.evaluate(&values), Some(20));
    }

    #[test]
    fn test_select_keeps_shapes() {
        let cond = SymbolicExpr::symbol("c", 1);
        let v = Value::select(&cond, Value::from_u64(1, 32, true), Value::from_u64(2, 32, true));
        assert!(matches!(v, Value::Int { .. }));

        let p = Value::select(
            &cond,
            Value::Pointer(Pointer::to_function(FunctionId(0))),
            Value::Pointer(Pointer::to_function(FunctionId(1))),
        );
        let Value::Choice(alternatives) = p else {
            panic!("expected a choice");
        };
        assert_eq!(alternatives.len(), 2);
        assert_eq!(alternatives[1].0, cond.logical_not());
    }

    #[test]
    fn test_choice_collapses_single_certain_alternative() {
        let v = Value::choice(vec![
            (SymbolicExpr::truth(false), Value::null()),
            (SymbolicExpr::truth(true), Value::from_u64(4, 8, false)),
        ]);
        assert_eq!(v.as_u64(), Some(4));
    }
}
