//! Constant expressions.
//!
//! Constants appear in two places: as instruction operands (integer literals, function and
//! global addresses) and as global initializers, where they may form arbitrary trees of
//! aggregates, constant pointer arithmetic and reads of other globals.
//!
//! The distinction between *address* references ([`Constant::GlobalAddress`],
//! [`Constant::ElementAddress`]) and *value* references ([`Constant::GlobalValue`]) is what
//! makes cyclic initializer graphs tractable: an address only needs the target's storage to
//! exist, while a value needs the target's initializer to have run.

use std::{collections::BTreeSet, fmt};

use crate::ir::{instruction::BinaryOp, types::Type};

/// A constant expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
    /// Integer literal. `value` holds the raw bits, truncated to the type's width on use.
    Int {
        /// Raw bits
        value: u64,
        /// Integer type
        ty: Type,
    },
    /// The null pointer.
    Null,
    /// All-zero value of any sized type.
    Zero(Type),
    /// Unspecified contents; memory stays uninitialized.
    Undef(Type),
    /// Struct literal; one constant per field.
    Struct {
        /// Struct type
        ty: Type,
        /// Field values in order
        fields: Vec<Constant>,
    },
    /// Array literal.
    Array {
        /// Array type
        ty: Type,
        /// Element values in order
        elements: Vec<Constant>,
    },
    /// Vector literal.
    Vector {
        /// Vector type
        ty: Type,
        /// Lane values in order
        elements: Vec<Constant>,
    },
    /// Address of a global variable.
    GlobalAddress(String),
    /// Address of a function.
    FunctionAddress(String),
    /// Constant pointer arithmetic over a base address, with element-pointer semantics.
    ElementAddress {
        /// Base pointer constant
        base: Box<Constant>,
        /// Type the first index steps over
        base_ty: Type,
        /// Index path; struct indices select fields
        indices: Vec<i64>,
    },
    /// The initial content of another global, read as `ty`.
    GlobalValue {
        /// Global whose content is read
        name: String,
        /// Type to read it as
        ty: Type,
    },
    /// Integer arithmetic over two constants.
    Binary {
        /// Operation
        op: BinaryOp,
        /// Left operand
        lhs: Box<Constant>,
        /// Right operand
        rhs: Box<Constant>,
    },
}

impl Constant {
    /// Creates an integer constant of type `ty` from a signed value.
    #[must_use]
    pub fn int(value: i64, ty: Type) -> Self {
        Constant::Int {
            value: value as u64,
            ty,
        }
    }

    /// `int8_t` literal.
    #[must_use]
    pub fn i8(value: i8) -> Self {
        Self::int(i64::from(value), Type::i8())
    }

    /// `uint8_t` literal.
    #[must_use]
    pub fn u8(value: u8) -> Self {
        Self::int(i64::from(value), Type::u8())
    }

    /// `int16_t` literal.
    #[must_use]
    pub fn i16(value: i16) -> Self {
        Self::int(i64::from(value), Type::i16())
    }

    /// `int32_t` literal.
    #[must_use]
    pub fn i32(value: i32) -> Self {
        Self::int(i64::from(value), Type::i32())
    }

    /// `uint32_t` literal.
    #[must_use]
    pub fn u32(value: u32) -> Self {
        Self::int(i64::from(value), Type::u32())
    }

    /// `int64_t` literal.
    #[must_use]
    pub fn i64(value: i64) -> Self {
        Self::int(value, Type::i64())
    }

    /// Boolean literal.
    #[must_use]
    pub fn bool(value: bool) -> Self {
        Self::int(i64::from(value), Type::bool())
    }

    /// Address of global `name`.
    #[must_use]
    pub fn global(name: impl Into<String>) -> Self {
        Constant::GlobalAddress(name.into())
    }

    /// Address of function `name`.
    #[must_use]
    pub fn function(name: impl Into<String>) -> Self {
        Constant::FunctionAddress(name.into())
    }

    /// Address of field `index` of struct global `name` of type `ty`.
    #[must_use]
    pub fn field_address(name: impl Into<String>, ty: Type, index: i64) -> Self {
        Constant::ElementAddress {
            base: Box::new(Constant::global(name)),
            base_ty: ty,
            indices: vec![0, index],
        }
    }

    /// Content of global `name`, read as `ty`.
    #[must_use]
    pub fn value_of(name: impl Into<String>, ty: Type) -> Self {
        Constant::GlobalValue {
            name: name.into(),
            ty,
        }
    }

    /// Arithmetic over two constants.
    #[must_use]
    pub fn binary(op: BinaryOp, lhs: Constant, rhs: Constant) -> Self {
        Constant::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Type of the constant.
    #[must_use]
    pub fn ty(&self) -> Type {
        match self {
            Constant::Int { ty, .. }
            | Constant::Zero(ty)
            | Constant::Undef(ty)
            | Constant::Struct { ty, .. }
            | Constant::Array { ty, .. }
            | Constant::Vector { ty, .. }
            | Constant::GlobalValue { ty, .. } => ty.clone(),
            Constant::Null
            | Constant::GlobalAddress(_)
            | Constant::FunctionAddress(_)
            | Constant::ElementAddress { .. } => Type::Ptr,
            Constant::Binary { lhs, .. } => lhs.ty(),
        }
    }

    /// Visits this constant and every nested constant, outermost first.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Constant)) {
        visit(self);
        match self {
            Constant::Struct { fields: items, .. }
            | Constant::Array {
                elements: items, ..
            }
            | Constant::Vector {
                elements: items, ..
            } => {
                for item in items {
                    item.walk(visit);
                }
            }
            Constant::ElementAddress { base, .. } => base.walk(visit),
            Constant::Binary { lhs, rhs, .. } => {
                lhs.walk(visit);
                rhs.walk(visit);
            }
            _ => {}
        }
    }

    /// Globals whose *content* this constant reads.
    #[must_use]
    pub fn value_dependencies(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.walk(&mut |c| {
            if let Constant::GlobalValue { name, .. } = c {
                out.insert(name.as_str());
            }
        });
        out
    }

    /// Globals whose *address* this constant takes.
    #[must_use]
    pub fn address_dependencies(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.walk(&mut |c| {
            if let Constant::GlobalAddress(name) = c {
                out.insert(name.as_str());
            }
        });
        out
    }

    /// Functions whose address this constant takes.
    #[must_use]
    pub fn function_references(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.walk(&mut |c| {
            if let Constant::FunctionAddress(name) = c {
                out.insert(name.as_str());
            }
        });
        out
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int { value, ty } => match ty.bits() {
                Some(bits) if ty.is_signed() => write!(
                    f,
                    "{ty} {}",
                    crate::symbolic::sign_extend(*value, bits)
                ),
                Some(bits) => write!(f, "{ty} {}", value & crate::symbolic::mask(bits)),
                None => write!(f, "{ty} {value}"),
            },
            Constant::Null => write!(f, "null"),
            Constant::Zero(ty) => write!(f, "{ty} zeroinitializer"),
            Constant::Undef(ty) => write!(f, "{ty} undef"),
            Constant::Struct { fields: items, .. }
            | Constant::Array {
                elements: items, ..
            }
            | Constant::Vector {
                elements: items, ..
            } => {
                write!(f, "{{ ")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, " }}")
            }
            Constant::GlobalAddress(name) => write!(f, "@{name}"),
            Constant::FunctionAddress(name) => write!(f, "@{name}()"),
            Constant::ElementAddress {
                base,
                base_ty,
                indices,
            } => write!(f, "elementptr({base_ty}, {base}, {indices:?})"),
            Constant::GlobalValue { name, ty } => write!(f, "load({ty}, @{name})"),
            Constant::Binary { op, lhs, rhs } => write!(f, "{op}({lhs}, {rhs})"),
        }
    }
}
