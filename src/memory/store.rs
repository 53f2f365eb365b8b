//! The persistent, byte-addressed symbolic store.

use std::sync::Arc;

use tracing::debug;

use crate::{
    ir::{Constant, Type},
    memory::{
        element_offset, globals::ConstantResolver, value::bytes_for_bits, Byte, Fill,
        AccessKind, MemoryFault, MemoryObject, ObjectId, ObjectKind, Pointer, PointerTarget,
        Value, Watchpoints, OFFSET_BITS, POINTER_BYTES,
    },
    symbolic::{ExprKind, SymbolGenerator, SymbolicExpr, SymbolicOp},
    Error, Result,
};

/// Default cap on the number of concrete offsets a symbolic offset is expanded into.
pub const DEFAULT_SYMBOLIC_SPAN: u64 = 256;

/// All memory objects of one execution state.
///
/// Objects live in a persistent hash map: cloning a `Memory` is O(1), and a forked state only
/// copies the map nodes and objects it actually writes.
///
/// # Addressing
///
/// Every access goes through a [`Pointer`]. Concrete offsets are bounds checked against the
/// object; symbolic offsets are expanded into a guarded selection over the in-bounds offsets
/// compatible with the offset's known alignment. Deciding whether a symbolic offset *can*
/// leave the object is the caller's job (see [`Memory::in_bounds`]), because doing so needs
/// the path condition.
#[derive(Debug, Clone)]
pub struct Memory {
    objects: imbl::HashMap<ObjectId, MemoryObject>,
    next_id: u32,
    max_symbolic_span: u64,
    watchpoints: Watchpoints,
}

impl Default for Memory {
    fn default() -> Self {
        Memory {
            objects: imbl::HashMap::new(),
            next_id: 0,
            max_symbolic_span: DEFAULT_SYMBOLIC_SPAN,
            watchpoints: Watchpoints::new(),
        }
    }
}

impl Memory {
    /// Creates an empty memory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how many candidate offsets a symbolic access may expand into.
    pub fn set_max_symbolic_span(&mut self, span: u64) {
        self.max_symbolic_span = span.max(1);
    }

    /// Watchpoints of this memory and the hits recorded so far.
    #[must_use]
    pub fn watchpoints(&self) -> &Watchpoints {
        &self.watchpoints
    }

    /// Mutable access to the watchpoints, to add, remove or toggle them.
    pub fn watchpoints_mut(&mut self) -> &mut Watchpoints {
        &mut self.watchpoints
    }

    fn watch(&mut self, pointer: &Pointer, len: u64, kind: AccessKind) {
        if self.watchpoints.is_empty() {
            return;
        }
        if let PointerTarget::Object(id) = pointer.target {
            let offset = pointer
                .concrete_offset()
                .and_then(|offset| u64::try_from(offset).ok());
            self.watchpoints.observe(id, offset, len, kind);
        }
    }

    /// Allocates a new object.
    pub fn allocate(
        &mut self,
        kind: ObjectKind,
        name: impl Into<Arc<str>>,
        size: u64,
        fill: Fill,
    ) -> ObjectId {
        let id = ObjectId(self.next_id);
        self.next_id += 1;
        self.objects
            .insert(id, MemoryObject::new(id, kind, name.into(), size, fill));
        id
    }

    /// Looks up an object, live or not.
    #[must_use]
    pub fn object(&self, id: ObjectId) -> Option<&MemoryObject> {
        self.objects.get(&id)
    }

    /// Iterates over every object.
    pub fn objects(&self) -> impl Iterator<Item = &MemoryObject> {
        self.objects.values()
    }

    /// Number of objects ever allocated and not forgotten.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns `true` if no object exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Releases a heap object.
    ///
    /// Freeing null is a no-op.
    ///
    /// # Errors
    ///
    /// [`MemoryFault::InvalidFree`] for pointers that are not the start of a heap object,
    /// [`MemoryFault::DoubleFree`] for objects already freed.
    pub fn free(&mut self, pointer: &Pointer) -> Result<()> {
        let id = match pointer.target {
            PointerTarget::Null => return Ok(()),
            PointerTarget::Function(_) => {
                return Err(MemoryFault::InvalidFree("function".into()).into())
            }
            PointerTarget::Object(id) => id,
        };
        let object = self
            .objects
            .get_mut(&id)
            .ok_or_else(|| MemoryFault::InvalidFree(id.to_string()))?;
        if object.kind != ObjectKind::Heap || pointer.offset.as_constant() != Some(0) {
            return Err(MemoryFault::InvalidFree(object.name.to_string()).into());
        }
        if !object.live {
            return Err(MemoryFault::DoubleFree(object.name.to_string()).into());
        }
        object.live = false;
        object.clear();
        Ok(())
    }

    /// Ends the lifetime of a stack object.
    pub fn release(&mut self, id: ObjectId) {
        if let Some(object) = self.objects.get_mut(&id) {
            object.live = false;
            object.clear();
        }
    }

    /// Pointer to `offset` bytes into `object`.
    #[must_use]
    pub fn address_of(&self, object: ObjectId, offset: u64) -> Pointer {
        Pointer {
            target: PointerTarget::Object(object),
            offset: SymbolicExpr::constant(offset, OFFSET_BITS),
        }
    }

    /// `pointer + count * sizeof(element_ty)`.
    ///
    /// Never faults: pointers may point anywhere, including one past the end. Only accesses
    /// are checked.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedType`] if `element_ty` has no size.
    pub fn pointer_add(pointer: &Pointer, count: &SymbolicExpr, element_ty: &Type) -> Result<Pointer> {
        let count = SymbolicExpr::resize(count.clone(), OFFSET_BITS, true);
        Ok(pointer.offset_by(&element_offset(element_ty, &[count])?))
    }

    fn live(&self, pointer: &Pointer) -> Result<&MemoryObject> {
        match pointer.target {
            PointerTarget::Null => Err(MemoryFault::NullDereference.into()),
            PointerTarget::Function(_) => Err(MemoryFault::FunctionDereference.into()),
            PointerTarget::Object(id) => {
                let object = self
                    .objects
                    .get(&id)
                    .ok_or_else(|| MemoryFault::UseAfterFree(id.to_string()))?;
                if object.live {
                    Ok(object)
                } else {
                    Err(MemoryFault::UseAfterFree(object.name.to_string()).into())
                }
            }
        }
    }

    /// The condition under which an access of `access` bytes through `pointer` stays inside
    /// its object, as a 1-bit expression.
    ///
    /// # Errors
    ///
    /// Null, function and dangling pointers fault immediately.
    pub fn in_bounds(&self, pointer: &Pointer, access: u64) -> Result<SymbolicExpr> {
        let object = self.live(pointer)?;
        if access > object.size {
            return Ok(SymbolicExpr::truth(false));
        }
        Ok(SymbolicExpr::binary(
            SymbolicOp::LeU,
            pointer.offset.clone(),
            SymbolicExpr::constant(object.size - access, OFFSET_BITS),
        ))
    }

    /// Resolves the concrete offset of an access, checking bounds.
    fn concrete_offset(object: &MemoryObject, offset: i64, access: u64) -> Result<u64> {
        match u64::try_from(offset) {
            Ok(start) if start.checked_add(access).is_some_and(|end| end <= object.size) => {
                Ok(start)
            }
            _ => Err(MemoryFault::OutOfBounds {
                object: object.name.to_string(),
                offset,
                size: access,
                object_size: object.size,
            }
            .into()),
        }
    }

    /// Offsets a symbolic access may start at: in bounds, and multiples of the offset's
    /// provable power-of-two alignment.
    fn candidate_offsets(&self, object: &MemoryObject, offset: &SymbolicExpr, access: u64) -> Option<Vec<u64>> {
        if access > object.size {
            return Some(Vec::new());
        }
        let stride = 1u64 << known_trailing_zeros(offset).min(12);
        let last = object.size - access;
        let count = last / stride + 1;
        if count > self.max_symbolic_span {
            return None;
        }
        Some((0..count).map(|i| i * stride).collect())
    }

    /// Reads `len` raw bytes, materializing unwritten bytes of uninitialized objects so that
    /// later reads observe the same symbols.
    fn read_bytes(
        &mut self,
        id: ObjectId,
        start: u64,
        len: u64,
        symbols: &mut SymbolGenerator,
    ) -> Result<Vec<Byte>> {
        let object = self
            .objects
            .get(&id)
            .ok_or_else(|| MemoryFault::UseAfterFree(id.to_string()))?;
        let mut out = Vec::with_capacity(len as usize);
        let mut materialized = Vec::new();
        for offset in start..start + len {
            match object.byte(offset) {
                Some(byte) => out.push(byte.clone()),
                None => match object.fill {
                    Fill::Zero => out.push(Byte::concrete(0)),
                    Fill::Uninit => {
                        let hint = format!("{}[{offset}]", object.name);
                        let byte = Byte::Data(symbols.fresh(&hint, 8));
                        materialized.push((offset, byte.clone()));
                        out.push(byte);
                    }
                },
            }
        }
        if !materialized.is_empty() {
            if let Some(object) = self.objects.get_mut(&id) {
                for (offset, byte) in materialized {
                    object.set_byte(offset, byte);
                }
            }
        }
        Ok(out)
    }

    fn write_bytes(&mut self, id: ObjectId, start: u64, bytes: Vec<Byte>) {
        if let Some(object) = self.objects.get_mut(&id) {
            for (i, byte) in bytes.into_iter().enumerate() {
                object.set_byte(start + i as u64, byte);
            }
        }
    }

    /// Typed read.
    ///
    /// # Arguments
    ///
    /// * `pointer` - Address to read from.
    /// * `ty` - Integer, pointer or vector type to read.
    /// * `symbols` - Source of fresh symbols for uninitialized bytes.
    ///
    /// # Errors
    ///
    /// Memory faults for invalid pointers and out-of-bounds concrete offsets;
    /// [`MemoryFault::UninitializedPointer`] / [`MemoryFault::PointerFragment`] when pointer
    /// bytes and data bytes are confused; [`Error::Unsupported`] for aggregate loads.
    pub fn load(&mut self, pointer: &Pointer, ty: &Type, symbols: &mut SymbolGenerator) -> Result<Value> {
        let access = ty.size()?;
        self.watch(pointer, access, AccessKind::Read);
        let object = self.live(pointer)?;
        let id = object.id;

        if let Some(offset) = pointer.concrete_offset() {
            let start = Self::concrete_offset(object, offset, access)?;
            let bytes = self.read_bytes(id, start, access, symbols)?;
            return decode(&bytes, ty, &self.name_of(id));
        }

        let Some(candidates) = self.candidate_offsets(object, &pointer.offset, access) else {
            if ty.is_int() {
                debug!(object = %object.name, "symbolic offset spans too many candidates, reading a fresh value");
                let bits = ty.bits().unwrap_or(8);
                return Ok(Value::int(symbols.fresh("wide_read", bits), ty.is_signed()));
            }
            return Err(Error::Unsupported(format!(
                "symbolic access to {} spans more than {} offsets",
                object.name, self.max_symbolic_span
            )));
        };

        let name = self.name_of(id);
        let mut alternatives = Vec::with_capacity(candidates.len());
        let mut first_fault = None;
        for start in candidates {
            let guard = pointer
                .offset
                .equals(&SymbolicExpr::constant(start, OFFSET_BITS));
            let bytes = self.read_bytes(id, start, access, symbols)?;
            match decode(&bytes, ty, &name) {
                Ok(value) => alternatives.push((guard, value)),
                Err(Error::Memory(fault)) => {
                    // Undecodable candidates are treated as unreachable offsets
                    first_fault.get_or_insert(fault);
                }
                Err(other) => return Err(other),
            }
        }
        if alternatives.is_empty() {
            return Err(first_fault.map_or_else(
                || {
                    MemoryFault::OutOfBounds {
                        object: name.to_string(),
                        offset: -1,
                        size: access,
                        object_size: 0,
                    }
                    .into()
                },
                Error::Memory,
            ));
        }
        Ok(merge(alternatives))
    }

    fn name_of(&self, id: ObjectId) -> Arc<str> {
        self.objects
            .get(&id)
            .map_or_else(|| Arc::from("?"), |o| o.name.clone())
    }

    /// Writes a value.
    ///
    /// # Errors
    ///
    /// Memory faults as for [`Memory::load`]; [`MemoryFault::SymbolicPointerStore`] for a
    /// pointer stored through a symbolic offset.
    pub fn store(&mut self, pointer: &Pointer, value: &Value, symbols: &mut SymbolGenerator) -> Result<()> {
        let bytes = encode(value)?;
        let access = bytes.len() as u64;
        self.watch(pointer, access, AccessKind::Write);
        let object = self.live(pointer)?;
        let id = object.id;

        if let Some(offset) = pointer.concrete_offset() {
            let start = Self::concrete_offset(object, offset, access)?;
            self.write_bytes(id, start, bytes);
            return Ok(());
        }

        if matches!(value, Value::Pointer(_)) {
            return Err(MemoryFault::SymbolicPointerStore(object.name.to_string()).into());
        }
        let Some(candidates) = self.candidate_offsets(object, &pointer.offset, access) else {
            return Err(Error::Unsupported(format!(
                "symbolic store to {} spans more than {} offsets",
                object.name, self.max_symbolic_span
            )));
        };
        let name = object.name.to_string();
        for start in candidates {
            let guard = pointer
                .offset
                .equals(&SymbolicExpr::constant(start, OFFSET_BITS));
            let old = self.read_bytes(id, start, access, symbols)?;
            let mut merged = Vec::with_capacity(old.len());
            for (new, old) in bytes.iter().zip(old) {
                let (Byte::Data(new), Byte::Data(old)) = (new, old) else {
                    return Err(MemoryFault::SymbolicPointerStore(name).into());
                };
                merged.push(Byte::Data(SymbolicExpr::ite(guard.clone(), new.clone(), old)));
            }
            self.write_bytes(id, start, merged);
        }
        Ok(())
    }

    /// Writes `byte` to `len` consecutive bytes.
    ///
    /// # Errors
    ///
    /// Memory faults; [`Error::Unsupported`] for a symbolic destination offset.
    pub fn fill(&mut self, pointer: &Pointer, byte: &SymbolicExpr, len: u64) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        self.watch(pointer, len, AccessKind::Write);
        let (id, start) = self.concrete_access(pointer, len)?;
        let byte = SymbolicExpr::resize(byte.clone(), 8, false);
        self.write_bytes(id, start, vec![Byte::Data(byte); len as usize]);
        Ok(())
    }

    /// Copies `len` raw bytes, pointers included. Overlapping ranges behave like `memmove`.
    ///
    /// # Errors
    ///
    /// Memory faults; [`Error::Unsupported`] for symbolic offsets.
    pub fn copy(&mut self, dst: &Pointer, src: &Pointer, len: u64, symbols: &mut SymbolGenerator) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        self.watch(src, len, AccessKind::Read);
        self.watch(dst, len, AccessKind::Write);
        let (src_id, src_start) = self.concrete_access(src, len)?;
        let (dst_id, dst_start) = self.concrete_access(dst, len)?;
        let bytes = self.read_bytes(src_id, src_start, len, symbols)?;
        self.write_bytes(dst_id, dst_start, bytes);
        Ok(())
    }

    fn concrete_access(&self, pointer: &Pointer, len: u64) -> Result<(ObjectId, u64)> {
        let object = self.live(pointer)?;
        let Some(offset) = pointer.concrete_offset() else {
            return Err(Error::Unsupported(format!(
                "bulk access to {} at a symbolic offset",
                object.name
            )));
        };
        Ok((object.id, Self::concrete_offset(object, offset, len)?))
    }

    /// Writes a constant of any type, aggregates included, at `pointer`.
    ///
    /// # Errors
    ///
    /// Resolution errors from `resolver`, layout errors, and memory faults.
    pub fn write_constant(
        &mut self,
        pointer: &Pointer,
        constant: &Constant,
        resolver: &dyn ConstantResolver,
        symbols: &mut SymbolGenerator,
    ) -> Result<()> {
        match constant {
            Constant::Zero(ty) => {
                let size = ty.size()?;
                self.fill(pointer, &SymbolicExpr::constant(0, 8), size)
            }
            Constant::Undef(_) => Ok(()),
            Constant::Struct { ty, fields } => {
                for (i, field) in fields.iter().enumerate() {
                    let at = SymbolicExpr::constant(ty.field_offset(i)?, OFFSET_BITS);
                    self.write_constant(&pointer.offset_by(&at), field, resolver, symbols)?;
                }
                Ok(())
            }
            Constant::Array { ty, elements } => {
                let stride = ty
                    .element_type()
                    .ok_or_else(|| Error::MalformedType(format!("{ty} is not an array")))?
                    .size()?;
                for (i, element) in elements.iter().enumerate() {
                    let at = SymbolicExpr::constant(i as u64 * stride, OFFSET_BITS);
                    self.write_constant(&pointer.offset_by(&at), element, resolver, symbols)?;
                }
                Ok(())
            }
            scalar => {
                let value = self.constant_value(scalar, resolver, symbols)?;
                self.store(pointer, &value, symbols)
            }
        }
    }

    /// Evaluates a scalar or vector constant.
    ///
    /// `GlobalValue` constants read the named global's current contents.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownGlobal`] / [`Error::UnknownFunction`] from `resolver`;
    /// [`Error::Unsupported`] for aggregate constants and non-integer arithmetic.
    pub fn constant_value(
        &mut self,
        constant: &Constant,
        resolver: &dyn ConstantResolver,
        symbols: &mut SymbolGenerator,
    ) -> Result<Value> {
        match constant {
            Constant::Int { value, ty } => {
                let bits = ty
                    .bits()
                    .ok_or_else(|| malformed_error!("integer constant of type {}", ty))?;
                Ok(Value::from_u64(*value, bits, ty.is_signed()))
            }
            Constant::Null => Ok(Value::null()),
            Constant::Zero(ty) => Value::zero(ty),
            Constant::Undef(ty) => match ty {
                Type::Int { bits, signed } => Ok(Value::int(symbols.fresh("undef", *bits), *signed)),
                other => Value::zero(other),
            },
            Constant::Vector { ty, elements } => {
                let mut lanes = Vec::with_capacity(elements.len());
                for element in elements {
                    match self.constant_value(element, resolver, symbols)? {
                        Value::Int { expr, .. } => lanes.push(expr),
                        other => {
                            return Err(malformed_error!("vector lane {} is not an integer", other))
                        }
                    }
                }
                let signed = ty.element_type().is_some_and(Type::is_signed);
                Ok(Value::Vector {
                    elements: lanes,
                    signed,
                })
            }
            Constant::GlobalAddress(name) => Ok(Value::Pointer(Pointer::to_object(
                resolver.global_object(name)?,
            ))),
            Constant::FunctionAddress(name) => Ok(Value::Pointer(Pointer::to_function(
                resolver.function_id(name)?,
            ))),
            Constant::ElementAddress {
                base,
                base_ty,
                indices,
            } => {
                let Value::Pointer(base) = self.constant_value(base, resolver, symbols)? else {
                    return Err(malformed_error!("element address over a non-pointer base"));
                };
                let indices: Vec<SymbolicExpr> = indices
                    .iter()
                    .map(|i| SymbolicExpr::from_i64(*i, OFFSET_BITS))
                    .collect();
                Ok(Value::Pointer(
                    base.offset_by(&element_offset(base_ty, &indices)?),
                ))
            }
            Constant::GlobalValue { name, ty } => {
                let object = resolver.global_object(name)?;
                self.load(&Pointer::to_object(object), ty, symbols)
            }
            Constant::Binary { op, lhs, rhs } => {
                let l = self.constant_value(lhs, resolver, symbols)?;
                let r = self.constant_value(rhs, resolver, symbols)?;
                match (l, r) {
                    (Value::Int { expr: a, signed }, Value::Int { expr: b, .. }) => {
                        let b = SymbolicExpr::resize(b, a.width(), signed);
                        Ok(Value::int(
                            SymbolicExpr::binary(op.to_symbolic(signed), a, b),
                            signed,
                        ))
                    }
                    (Value::Pointer(p), Value::Int { expr, signed })
                        if matches!(op, crate::ir::BinaryOp::Add | crate::ir::BinaryOp::Sub) =>
                    {
                        let mut delta = SymbolicExpr::resize(expr, OFFSET_BITS, signed);
                        if *op == crate::ir::BinaryOp::Sub {
                            delta = SymbolicExpr::unary(SymbolicOp::Neg, delta);
                        }
                        Ok(Value::Pointer(p.offset_by(&delta)))
                    }
                    (l, r) => Err(Error::Unsupported(format!(
                        "constant arithmetic {op} on {l} and {r}"
                    ))),
                }
            }
            Constant::Struct { .. } | Constant::Array { .. } => Err(Error::Unsupported(
                "aggregate constant used as a register value".into(),
            )),
        }
    }
}

/// Proven number of low zero bits of an offset expression.
fn known_trailing_zeros(expr: &SymbolicExpr) -> u32 {
    match expr.kind() {
        ExprKind::Constant(0) => 64,
        ExprKind::Constant(c) => c.trailing_zeros(),
        ExprKind::Binary { op, left, right } => match op {
            SymbolicOp::Mul => (known_trailing_zeros(left) + known_trailing_zeros(right)).min(64),
            SymbolicOp::Shl => match right.as_constant() {
                Some(s) => (known_trailing_zeros(left) + s.min(64) as u32).min(64),
                None => 0,
            },
            SymbolicOp::Add | SymbolicOp::Sub => {
                known_trailing_zeros(left).min(known_trailing_zeros(right))
            }
            SymbolicOp::And => known_trailing_zeros(left).max(known_trailing_zeros(right)),
            _ => 0,
        },
        ExprKind::ZeroExtend { operand } | ExprKind::SignExtend { operand } => {
            known_trailing_zeros(operand).min(operand.width())
        }
        ExprKind::Ite {
            then, otherwise, ..
        } => known_trailing_zeros(then).min(known_trailing_zeros(otherwise)),
        _ => 0,
    }
}

/// Folds guarded alternatives into one value: integers become nested `ite`s, anything else a
/// [`Value::Choice`].
fn merge(mut alternatives: Vec<(SymbolicExpr, Value)>) -> Value {
    let all_ints = alternatives
        .iter()
        .all(|(_, v)| matches!(v, Value::Int { .. }));
    if !all_ints {
        return Value::choice(alternatives);
    }
    let Some((_, last)) = alternatives.pop() else {
        return Value::choice(Vec::new());
    };
    alternatives
        .into_iter()
        .rev()
        .fold(last, |acc, (guard, value)| Value::select(&guard, value, acc))
}

/// Splits a value into its stored bytes, little endian.
fn encode(value: &Value) -> Result<Vec<Byte>> {
    match value {
        Value::Int { expr, .. } => Ok(int_bytes(expr)),
        Value::Pointer(pointer) => Ok((0..POINTER_BYTES as u8)
            .map(|index| Byte::Pointer {
                pointer: pointer.clone(),
                index,
            })
            .collect()),
        Value::Vector { elements, .. } => Ok(elements.iter().flat_map(int_bytes).collect()),
        Value::Choice(_) => Err(Error::Unsupported(
            "storing an unresolved choice value".into(),
        )),
    }
}

fn int_bytes(expr: &SymbolicExpr) -> Vec<Byte> {
    let size = bytes_for_bits(expr.width());
    let wide = SymbolicExpr::zero_extend(expr.clone(), (size * 8) as u32);
    (0..size as u32)
        .map(|i| Byte::Data(SymbolicExpr::extract(i * 8 + 7, i * 8, wide.clone())))
        .collect()
}

/// Reassembles a typed value from raw bytes.
fn decode(bytes: &[Byte], ty: &Type, object: &str) -> Result<Value> {
    match ty {
        Type::Int { bits, signed } => Ok(Value::int(decode_int(bytes, *bits, object)?, *signed)),
        Type::Ptr => decode_pointer(bytes, object).map(Value::Pointer),
        Type::Vector { element, len } => {
            let bits = element
                .bits()
                .ok_or_else(|| Error::MalformedType(format!("vector of {element}")))?;
            let lane = bytes_for_bits(bits) as usize;
            let mut elements = Vec::with_capacity(*len as usize);
            for chunk in bytes.chunks(lane).take(*len as usize) {
                elements.push(decode_int(chunk, bits, object)?);
            }
            Ok(Value::Vector {
                elements,
                signed: element.is_signed(),
            })
        }
        other => Err(Error::Unsupported(format!("load of aggregate type {other}"))),
    }
}

fn decode_int(bytes: &[Byte], bits: u32, object: &str) -> Result<SymbolicExpr> {
    let mut acc: Option<SymbolicExpr> = None;
    for byte in bytes.iter().rev() {
        let Byte::Data(expr) = byte else {
            return Err(MemoryFault::PointerFragment(object.to_string()).into());
        };
        acc = Some(match acc {
            None => expr.clone(),
            Some(high) => SymbolicExpr::concat(high, expr.clone()),
        });
    }
    let value = acc.ok_or_else(|| malformed_error!("zero-sized integer read"))?;
    Ok(SymbolicExpr::resize(value, bits, false))
}

fn decode_pointer(bytes: &[Byte], object: &str) -> Result<Pointer> {
    if bytes.iter().all(Byte::is_zero) {
        return Ok(Pointer::null());
    }
    let Some(Byte::Pointer { pointer, .. }) = bytes.first() else {
        return Err(if bytes.iter().any(|b| matches!(b, Byte::Pointer { .. })) {
            MemoryFault::PointerFragment(object.to_string()).into()
        } else {
            MemoryFault::UninitializedPointer(object.to_string()).into()
        });
    };
    let intact = bytes.iter().enumerate().all(|(i, byte)| {
        matches!(byte, Byte::Pointer { pointer: p, index } if p == pointer && usize::from(*index) == i)
    });
    if intact {
        Ok(pointer.clone())
    } else {
        Err(MemoryFault::PointerFragment(object.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ir::Type, project::FunctionId};

    struct NoSymbols;

    impl ConstantResolver for NoSymbols {
        fn global_object(&self, name: &str) -> Result<ObjectId> {
            Err(Error::UnknownGlobal(name.to_string()))
        }

        fn function_id(&self, name: &str) -> Result<FunctionId> {
            Err(Error::UnknownFunction(name.to_string()))
        }
    }

    fn at(memory: &Memory, id: ObjectId, offset: u64) -> Pointer {
        memory.address_of(id, offset)
    }

    #[test]
    fn test_store_then_load_round_trips_symbol() {
        let mut memory = Memory::new();
        let mut symbols = SymbolGenerator::new();
        let id = memory.allocate(ObjectKind::Stack, "x", 4, Fill::Uninit);
        let x = SymbolicExpr::symbol("x", 32);
        memory
            .store(&at(&memory, id, 0), &Value::int(x.clone(), true), &mut symbols)
            .unwrap();
        let loaded = memory.load(&at(&memory, id, 0), &Type::i32(), &mut symbols).unwrap();
        assert_eq!(loaded.as_int(), Some(&x));
    }

    #[test]
    fn test_adjacent_fields_do_not_alias() {
        // struct { u8 a; u32 b; u8 c; }
        let ty = Type::structure(vec![Type::u8(), Type::u32(), Type::u8()]);
        let mut memory = Memory::new();
        let mut symbols = SymbolGenerator::new();
        let id = memory.allocate(ObjectKind::Stack, "s", ty.size().unwrap(), Fill::Uninit);
        let b = at(&memory, id, ty.field_offset(1).unwrap());
        let c = at(&memory, id, ty.field_offset(2).unwrap());

        memory.store(&c, &Value::from_u64(0x5a, 8, false), &mut symbols).unwrap();
        memory
            .store(&b, &Value::from_u64(0xffff_ffff, 32, false), &mut symbols)
            .unwrap();
        let c_value = memory.load(&c, &Type::u8(), &mut symbols).unwrap();
        assert_eq!(c_value.as_u64(), Some(0x5a));
    }

    #[test]
    fn test_watchpoint_sees_overlapping_accesses() {
        let mut memory = Memory::new();
        let mut symbols = SymbolGenerator::new();
        let id = memory.allocate(ObjectKind::Global, "g", 16, Fill::Zero);
        let watch = crate::memory::Watchpoint::new(id, 8, 4).unwrap();
        memory.watchpoints_mut().add("field", watch);

        let word = Value::from_u64(7, 32, false);
        memory.store(&at(&memory, id, 0), &word, &mut symbols).unwrap();
        memory.store(&at(&memory, id, 8), &word, &mut symbols).unwrap();
        memory.load(&at(&memory, id, 6), &Type::i32(), &mut symbols).unwrap();
        memory.fill(&at(&memory, id, 12), &SymbolicExpr::constant(0, 8), 4).unwrap();

        let hits: Vec<_> = memory
            .watchpoints()
            .hits()
            .map(|hit| (hit.kind, hit.offset))
            .collect();
        assert_eq!(
            hits,
            vec![(AccessKind::Write, Some(8)), (AccessKind::Read, Some(6))]
        );

        let fork = memory.clone();
        memory.load(&at(&memory, id, 8), &Type::u8(), &mut symbols).unwrap();
        assert_eq!(memory.watchpoints().hits().count(), 3);
        assert_eq!(fork.watchpoints().hits().count(), 2);
    }

    #[test]
    fn test_uninitialized_reads_are_stable() {
        let mut memory = Memory::new();
        let mut symbols = SymbolGenerator::new();
        let id = memory.allocate(ObjectKind::Heap, "buf", 8, Fill::Uninit);
        let p = at(&memory, id, 0);
        let first = memory.load(&p, &Type::i64(), &mut symbols).unwrap();
        let second = memory.load(&p, &Type::i64(), &mut symbols).unwrap();
        assert_eq!(first, second);
        assert!(first.as_u64().is_none());
    }

    #[test]
    fn test_zero_fill_reads_zero_and_null() {
        let mut memory = Memory::new();
        let mut symbols = SymbolGenerator::new();
        let id = memory.allocate(ObjectKind::Global, "g", 16, Fill::Zero);
        let p = at(&memory, id, 8);
        assert_eq!(memory.load(&p, &Type::u32(), &mut symbols).unwrap().as_u64(), Some(0));
        assert_eq!(memory.load(&p, &Type::ptr(), &mut symbols).unwrap(), Value::null());
    }

    #[test]
    fn test_out_of_bounds_concrete_access_faults() {
        let mut memory = Memory::new();
        let mut symbols = SymbolGenerator::new();
        let id = memory.allocate(ObjectKind::Stack, "arr", 8, Fill::Uninit);
        let err = memory
            .load(&at(&memory, id, 6), &Type::i32(), &mut symbols)
            .unwrap_err();
        assert!(matches!(err, Error::Memory(MemoryFault::OutOfBounds { offset: 6, .. })));
    }

    #[test]
    fn test_pointer_round_trip_and_fragment() {
        let mut memory = Memory::new();
        let mut symbols = SymbolGenerator::new();
        let target = memory.allocate(ObjectKind::Global, "t", 4, Fill::Zero);
        let slot = memory.allocate(ObjectKind::Stack, "slot", 16, Fill::Uninit);
        let p = Value::Pointer(memory.address_of(target, 0));

        memory.store(&at(&memory, slot, 0), &p, &mut symbols).unwrap();
        assert_eq!(
            memory.load(&at(&memory, slot, 0), &Type::ptr(), &mut symbols).unwrap(),
            p
        );
        let err = memory
            .load(&at(&memory, slot, 4), &Type::ptr(), &mut symbols)
            .unwrap_err();
        assert!(matches!(err, Error::Memory(MemoryFault::PointerFragment(_))));
        let err = memory
            .load(&at(&memory, slot, 0), &Type::u32(), &mut symbols)
            .unwrap_err();
        assert!(matches!(err, Error::Memory(MemoryFault::PointerFragment(_))));
    }

    #[test]
    fn test_uninitialized_pointer_read_faults() {
        let mut memory = Memory::new();
        let mut symbols = SymbolGenerator::new();
        let id = memory.allocate(ObjectKind::Stack, "p", 8, Fill::Uninit);
        let err = memory
            .load(&at(&memory, id, 0), &Type::ptr(), &mut symbols)
            .unwrap_err();
        assert!(matches!(err, Error::Memory(MemoryFault::UninitializedPointer(_))));
    }

    #[test]
    fn test_symbolic_index_reads_ite() {
        // int arr[4] = {10, 20, 30, 40}; arr[i]
        let mut memory = Memory::new();
        let mut symbols = SymbolGenerator::new();
        let id = memory.allocate(ObjectKind::Stack, "arr", 16, Fill::Uninit);
        for (i, v) in [10u64, 20, 30, 40].iter().enumerate() {
            memory
                .store(&at(&memory, id, i as u64 * 4), &Value::from_u64(*v, 32, true), &mut symbols)
                .unwrap();
        }
        let i = SymbolicExpr::symbol("i", 64);
        let p = Memory::pointer_add(&at(&memory, id, 0), &i, &Type::i32()).unwrap();
        let value = memory.load(&p, &Type::i32(), &mut symbols).unwrap();
        let expr = value.as_int().unwrap().clone();

        let mut assignment = crate::symbolic::Assignment::default();
        assignment.insert("i".into(), 2);
        assert_eq!(expr.evaluate(&assignment), Some(30));
    }

    #[test]
    fn test_symbolic_store_merges() {
        let mut memory = Memory::new();
        let mut symbols = SymbolGenerator::new();
        let id = memory.allocate(ObjectKind::Stack, "arr", 8, Fill::Zero);
        let i = SymbolicExpr::symbol("i", 64);
        let p = Memory::pointer_add(&at(&memory, id, 0), &i, &Type::i32()).unwrap();
        memory.store(&p, &Value::from_u64(7, 32, true), &mut symbols).unwrap();

        let second = memory.load(&at(&memory, id, 4), &Type::i32(), &mut symbols).unwrap();
        let expr = second.as_int().unwrap().clone();
        let mut assignment = crate::symbolic::Assignment::default();
        assignment.insert("i".into(), 1);
        assert_eq!(expr.evaluate(&assignment), Some(7));
        assignment.insert("i".into(), 0);
        assert_eq!(expr.evaluate(&assignment), Some(0));
    }

    #[test]
    fn test_free_rules() {
        let mut memory = Memory::new();
        let heap = memory.allocate(ObjectKind::Heap, "malloc", 4, Fill::Uninit);
        let stack = memory.allocate(ObjectKind::Stack, "local", 4, Fill::Uninit);
        memory.free(&Pointer::null()).unwrap();
        assert!(matches!(
            memory.free(&memory.address_of(stack, 0)).unwrap_err(),
            Error::Memory(MemoryFault::InvalidFree(_))
        ));
        memory.free(&memory.address_of(heap, 0)).unwrap();
        assert!(matches!(
            memory.free(&memory.address_of(heap, 0)).unwrap_err(),
            Error::Memory(MemoryFault::DoubleFree(_))
        ));
        let mut symbols = SymbolGenerator::new();
        assert!(matches!(
            memory
                .load(&memory.address_of(heap, 0), &Type::i32(), &mut symbols)
                .unwrap_err(),
            Error::Memory(MemoryFault::UseAfterFree(_))
        ));
    }

    #[test]
    fn test_forked_memory_is_independent() {
        let mut memory = Memory::new();
        let mut symbols = SymbolGenerator::new();
        let id = memory.allocate(ObjectKind::Global, "g", 4, Fill::Zero);
        let mut fork = memory.clone();
        fork.store(&fork.address_of(id, 0), &Value::from_u64(9, 32, true), &mut symbols)
            .unwrap();
        assert_eq!(
            memory
                .load(&memory.address_of(id, 0), &Type::i32(), &mut symbols)
                .unwrap()
                .as_u64(),
            Some(0)
        );
    }

    #[test]
    fn test_write_constant_struct() {
        let ty = Type::structure(vec![Type::i8(), Type::i64()]);
        let constant = Constant::Struct {
            ty: ty.clone(),
            fields: vec![Constant::i8(-1), Constant::i64(1 << 40)],
        };
        let mut memory = Memory::new();
        let mut symbols = SymbolGenerator::new();
        let id = memory.allocate(ObjectKind::Global, "g", ty.size().unwrap(), Fill::Zero);
        memory
            .write_constant(&memory.address_of(id, 0), &constant, &NoSymbols, &mut symbols)
            .unwrap();
        let second = memory
            .load(&memory.address_of(id, 8), &Type::i64(), &mut symbols)
            .unwrap();
        assert_eq!(second.as_u64(), Some(1 << 40));
        let first = memory
            .load(&memory.address_of(id, 0), &Type::i8(), &mut symbols)
            .unwrap();
        assert_eq!(first.as_u64(), Some(0xff));
    }

    #[test]
    fn test_copy_moves_pointer_bytes() {
        let mut memory = Memory::new();
        let mut symbols = SymbolGenerator::new();
        let target = memory.allocate(ObjectKind::Global, "t", 4, Fill::Zero);
        let a = memory.allocate(ObjectKind::Stack, "a", 16, Fill::Uninit);
        let b = memory.allocate(ObjectKind::Stack, "b", 16, Fill::Uninit);
        let p = Value::Pointer(memory.address_of(target, 0));
        memory.store(&memory.address_of(a, 8), &p, &mut symbols).unwrap();
        memory
            .copy(&memory.address_of(b, 0), &memory.address_of(a, 0), 16, &mut symbols)
            .unwrap();
        assert_eq!(
            memory.load(&memory.address_of(b, 8), &Type::ptr(), &mut symbols).unwrap(),
            p
        );
    }
}
