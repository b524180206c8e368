//! Concrete runtime values.
//!
//! A [`Value`] is what callers hand to an executor and what `compute`
//! returns: dense tensors, structs, sequences, placed collections and
//! function payloads (building blocks).
//!
//! # Federated values
//!
//! A federated value stores one member per participant. An all-equal value
//! stores a single member regardless of how many participants share it;
//! executors expand it when a per-client view is needed.
//!
//! # Arithmetic
//!
//! Binary operations work elementwise. Structs recurse pairwise; a scalar
//! (or single-element tensor) on the right broadcasts over a tensor or a
//! whole struct on the left. Integer operands stay integer, anything else
//! is computed in floating point. Modulo is Euclidean, so results are never
//! negative for a positive modulus.

use std::fmt;

use federate_ir::{Comp, DType, Literal, Placement, Type};

use crate::error::{Error, Result};

// ============================================================================
// Tensors
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    Bool(Vec<bool>),
    Int(Vec<i64>),
    Float(Vec<f64>),
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            TensorData::Bool(v) => v.len(),
            TensorData::Int(v) => v.len(),
            TensorData::Float(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn to_f64(&self) -> Option<Vec<f64>> {
        match self {
            TensorData::Bool(_) => None,
            TensorData::Int(v) => Some(v.iter().map(|&x| x as f64).collect()),
            TensorData::Float(v) => Some(v.clone()),
        }
    }
}

/// A dense, row-major tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub dtype: DType,
    pub shape: Vec<usize>,
    pub data: TensorData,
}

impl Tensor {
    pub fn scalar_int(dtype: DType, value: i64) -> Self {
        Self {
            dtype,
            shape: Vec::new(),
            data: TensorData::Int(vec![value]),
        }
    }

    pub fn scalar_float(dtype: DType, value: f64) -> Self {
        Self {
            dtype,
            shape: Vec::new(),
            data: TensorData::Float(vec![value]),
        }
    }

    pub fn ints(dtype: DType, values: Vec<i64>) -> Self {
        Self {
            dtype,
            shape: vec![values.len()],
            data: TensorData::Int(values),
        }
    }

    pub fn floats(dtype: DType, values: Vec<f64>) -> Self {
        Self {
            dtype,
            shape: vec![values.len()],
            data: TensorData::Float(values),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn type_signature(&self) -> Type {
        Type::tensor(self.dtype, self.shape.iter().map(|&d| Some(d)).collect())
    }

    fn zeros(dtype: DType, shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        let data = match dtype {
            DType::Bool => TensorData::Bool(vec![false; len]),
            DType::Int32 | DType::Int64 => TensorData::Int(vec![0; len]),
            DType::Float32 | DType::Float64 => TensorData::Float(vec![0.0; len]),
        };
        Self { dtype, shape, data }
    }

    fn binary(&self, op: ArithOp, other: &Tensor) -> Result<Tensor> {
        let shape = if self.shape == other.shape || other.len() == 1 {
            self.shape.clone()
        } else if self.len() == 1 {
            other.shape.clone()
        } else {
            return Err(Error::kernel(
                op.name(),
                format!("incompatible shapes {:?} and {:?}", self.shape, other.shape),
            ));
        };
        let len = self.len().max(other.len());
        let at = |n: usize, i: usize| if n == 1 { 0 } else { i };

        match (&self.data, &other.data) {
            (TensorData::Int(a), TensorData::Int(b)) => {
                let data = (0..len)
                    .map(|i| op.ints(a[at(a.len(), i)], b[at(b.len(), i)]))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Tensor {
                    dtype: self.dtype,
                    shape,
                    data: TensorData::Int(data),
                })
            }
            (left, right) => {
                let (Some(a), Some(b)) = (left.to_f64(), right.to_f64()) else {
                    return Err(Error::kernel(op.name(), "boolean operands"));
                };
                let data = (0..len)
                    .map(|i| op.floats(a[at(a.len(), i)], b[at(b.len(), i)]))
                    .collect();
                let dtype = if self.dtype.is_floating() {
                    self.dtype
                } else {
                    other.dtype
                };
                Ok(Tensor {
                    dtype,
                    shape,
                    data: TensorData::Float(data),
                })
            }
        }
    }

    fn exceeds(&self, bound: &Tensor) -> Result<bool> {
        let (Some(values), Some(limits)) = (self.data.to_f64(), bound.data.to_f64()) else {
            return Err(Error::Unsupported("bounds on boolean tensors".to_string()));
        };
        if limits.len() != 1 && limits.len() != values.len() {
            return Err(Error::kernel(
                "bound",
                format!("incompatible shapes {:?} and {:?}", self.shape, bound.shape),
            ));
        }
        Ok(values
            .iter()
            .enumerate()
            .any(|(i, v)| *v > limits[if limits.len() == 1 { 0 } else { i }]))
    }
}

// ============================================================================
// Arithmetic
// ============================================================================

/// Elementwise operation shared by kernels and intrinsics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Multiply,
    Divide,
    Modulo,
}

impl ArithOp {
    pub fn name(self) -> &'static str {
        match self {
            ArithOp::Add => "add",
            ArithOp::Multiply => "multiply",
            ArithOp::Divide => "divide",
            ArithOp::Modulo => "modulo",
        }
    }

    fn ints(self, a: i64, b: i64) -> Result<i64> {
        match self {
            ArithOp::Add => Ok(a.wrapping_add(b)),
            ArithOp::Multiply => Ok(a.wrapping_mul(b)),
            ArithOp::Divide => a
                .checked_div(b)
                .ok_or_else(|| Error::kernel(self.name(), "division by zero")),
            ArithOp::Modulo => a
                .checked_rem_euclid(b)
                .ok_or_else(|| Error::kernel(self.name(), "modulus is zero")),
        }
    }

    fn floats(self, a: f64, b: f64) -> f64 {
        match self {
            ArithOp::Add => a + b,
            ArithOp::Multiply => a * b,
            ArithOp::Divide => a / b,
            ArithOp::Modulo => a.rem_euclid(b),
        }
    }
}

// ============================================================================
// Values
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Tensor(Tensor),
    Struct(Vec<(Option<String>, Value)>),
    Sequence(Vec<Value>),
    Federated {
        placement: Placement,
        all_equal: bool,
        members: Vec<Value>,
    },
    /// A computation; executors decide which forms they can run.
    Function(Comp),
}

impl Value {
    // === Constructors ===

    pub fn int32(value: i64) -> Self {
        Value::Tensor(Tensor::scalar_int(DType::Int32, value))
    }

    pub fn int64(value: i64) -> Self {
        Value::Tensor(Tensor::scalar_int(DType::Int64, value))
    }

    pub fn float32(value: f64) -> Self {
        Value::Tensor(Tensor::scalar_float(DType::Float32, value))
    }

    pub fn bool(value: bool) -> Self {
        Value::Tensor(Tensor {
            dtype: DType::Bool,
            shape: Vec::new(),
            data: TensorData::Bool(vec![value]),
        })
    }

    pub fn int32_vector(values: Vec<i64>) -> Self {
        Value::Tensor(Tensor::ints(DType::Int32, values))
    }

    pub fn float32_vector(values: Vec<f64>) -> Self {
        Value::Tensor(Tensor::floats(DType::Float32, values))
    }

    pub fn tuple(values: Vec<Value>) -> Self {
        Value::Struct(values.into_iter().map(|v| (None, v)).collect())
    }

    pub fn named<S: Into<String>>(values: Vec<(S, Value)>) -> Self {
        Value::Struct(
            values
                .into_iter()
                .map(|(name, v)| (Some(name.into()), v))
                .collect(),
        )
    }

    pub fn sequence(values: Vec<Value>) -> Self {
        Value::Sequence(values)
    }

    /// One member per client.
    pub fn clients(members: Vec<Value>) -> Self {
        Value::Federated {
            placement: Placement::Clients,
            all_equal: false,
            members,
        }
    }

    /// A single member shared by every client.
    pub fn clients_all_equal(member: Value) -> Self {
        Value::Federated {
            placement: Placement::Clients,
            all_equal: true,
            members: vec![member],
        }
    }

    pub fn server(member: Value) -> Self {
        Value::Federated {
            placement: Placement::Server,
            all_equal: true,
            members: vec![member],
        }
    }

    pub fn function(comp: Comp) -> Self {
        Value::Function(comp)
    }

    /// Materialize `literal` at type `ty`. Scalar literals fill whole
    /// tensors and every leaf of a struct.
    pub fn from_literal(literal: &Literal, ty: &Type) -> Result<Value> {
        match ty {
            Type::Tensor(tensor) => {
                let known = tensor.num_elements();
                let (data, len) = match (literal, tensor.dtype) {
                    (Literal::Bool(b), DType::Bool) => {
                        let len = known.ok_or_else(|| unknown_shape(ty))?;
                        (TensorData::Bool(vec![*b; len]), len)
                    }
                    (Literal::Int(i), dtype) if dtype.is_integer() => {
                        let len = known.ok_or_else(|| unknown_shape(ty))?;
                        (TensorData::Int(vec![*i; len]), len)
                    }
                    (Literal::Int(i), dtype) if dtype.is_floating() => {
                        let len = known.ok_or_else(|| unknown_shape(ty))?;
                        (TensorData::Float(vec![*i as f64; len]), len)
                    }
                    (Literal::Float(f), dtype) if dtype.is_floating() => {
                        let len = known.ok_or_else(|| unknown_shape(ty))?;
                        (TensorData::Float(vec![*f; len]), len)
                    }
                    (Literal::Ints(v), dtype) if dtype.is_integer() => {
                        (TensorData::Int(v.clone()), v.len())
                    }
                    (Literal::Floats(v), dtype) if dtype.is_floating() => {
                        (TensorData::Float(v.clone()), v.len())
                    }
                    _ => {
                        return Err(Error::Unsupported(format!(
                            "literal {literal:?} at type {ty}"
                        )))
                    }
                };
                let shape = resolve_shape(&tensor.shape, len).ok_or_else(|| {
                    Error::Unsupported(format!("{len} elements do not fit type {ty}"))
                })?;
                Ok(Value::Tensor(Tensor {
                    dtype: tensor.dtype,
                    shape,
                    data,
                }))
            }
            Type::Struct(st) => st
                .elements
                .iter()
                .map(|(name, element)| Ok((name.clone(), Value::from_literal(literal, element)?)))
                .collect::<Result<Vec<_>>>()
                .map(Value::Struct),
            _ => Err(Error::Unsupported(format!("constant of type {ty}"))),
        }
    }

    /// The additive identity of `ty`.
    pub fn zero_of(ty: &Type) -> Result<Value> {
        match ty {
            Type::Tensor(tensor) => {
                let shape = tensor
                    .shape
                    .iter()
                    .copied()
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| unknown_shape(ty))?;
                Ok(Value::Tensor(Tensor::zeros(tensor.dtype, shape)))
            }
            Type::Struct(st) => st
                .elements
                .iter()
                .map(|(name, element)| Ok((name.clone(), Value::zero_of(element)?)))
                .collect::<Result<Vec<_>>>()
                .map(Value::Struct),
            _ => Err(Error::Unsupported(format!("zero of type {ty}"))),
        }
    }

    // === Accessors ===

    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            Value::Tensor(t) => Some(t),
            _ => None,
        }
    }

    /// Scalar integer payload.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Tensor(Tensor {
                data: TensorData::Int(v),
                ..
            }) if v.len() == 1 => Some(v[0]),
            _ => None,
        }
    }

    /// Scalar numeric payload, widened to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Tensor(Tensor {
                data: TensorData::Float(v),
                ..
            }) if v.len() == 1 => Some(v[0]),
            _ => self.as_i64().map(|i| i as f64),
        }
    }

    /// Elements of a struct, in order.
    pub fn fields(&self) -> Option<&[(Option<String>, Value)]> {
        match self {
            Value::Struct(elements) => Some(elements),
            _ => None,
        }
    }

    pub fn members(&self) -> Option<&[Value]> {
        match self {
            Value::Federated { members, .. } => Some(members),
            _ => None,
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Value::Tensor(_) => "tensor",
            Value::Struct(_) => "struct",
            Value::Sequence(_) => "sequence",
            Value::Federated { .. } => "federated value",
            Value::Function(_) => "function",
        }
    }

    // === Types ===

    /// The most specific type describing this value.
    pub fn infer_type(&self) -> Result<Type> {
        match self {
            Value::Tensor(tensor) => Ok(tensor.type_signature()),
            Value::Struct(elements) => elements
                .iter()
                .map(|(name, v)| Ok((name.clone(), v.infer_type()?)))
                .collect::<Result<Vec<_>>>()
                .map(Type::structure),
            Value::Sequence(elements) => {
                let first = elements.first().ok_or_else(|| {
                    Error::Unsupported("cannot infer the type of an empty sequence".to_string())
                })?;
                Ok(Type::sequence(first.infer_type()?))
            }
            Value::Federated {
                placement,
                all_equal,
                members,
            } => {
                let first = members.first().ok_or_else(|| {
                    Error::Unsupported(format!(
                        "cannot infer the type of an empty value at {placement}"
                    ))
                })?;
                Ok(Type::federated(first.infer_type()?, *placement, *all_equal))
            }
            Value::Function(comp) => Ok(comp.type_signature().clone()),
        }
    }

    /// Whether this value may be used where `ty` is expected.
    pub fn conforms_to(&self, ty: &Type) -> bool {
        match (self, ty) {
            (_, Type::Abstract(_)) => true,
            (Value::Tensor(tensor), Type::Tensor(expected)) => {
                tensor.dtype == expected.dtype
                    && tensor.shape.len() == expected.shape.len()
                    && tensor
                        .shape
                        .iter()
                        .zip(&expected.shape)
                        .all(|(actual, dim)| dim.map_or(true, |d| d == *actual))
            }
            (Value::Struct(elements), Type::Struct(st)) => {
                elements.len() == st.len()
                    && elements.iter().zip(&st.elements).all(|((name, v), (expected, t))| {
                        (expected.is_none() || name.is_none() || name == expected)
                            && v.conforms_to(t)
                    })
            }
            (Value::Sequence(elements), Type::Sequence(element)) => {
                elements.iter().all(|v| v.conforms_to(element))
            }
            (
                Value::Federated {
                    placement,
                    all_equal,
                    members,
                },
                Type::Federated(ft),
            ) => {
                *placement == ft.placement
                    && (!ft.all_equal || *all_equal || members.len() == 1)
                    && (ft.placement != Placement::Server || members.len() == 1)
                    && members.iter().all(|m| m.conforms_to(&ft.member))
            }
            (Value::Function(comp), Type::Function(_)) => {
                ty.is_assignable_from(comp.type_signature())
            }
            _ => false,
        }
    }

    // === Arithmetic ===

    pub fn binary(&self, op: ArithOp, other: &Value) -> Result<Value> {
        match (self, other) {
            (Value::Tensor(a), Value::Tensor(b)) => Ok(Value::Tensor(a.binary(op, b)?)),
            (Value::Struct(a), Value::Struct(b)) if a.len() == b.len() => a
                .iter()
                .zip(b)
                .map(|((name, x), (_, y))| Ok((name.clone(), x.binary(op, y)?)))
                .collect::<Result<Vec<_>>>()
                .map(Value::Struct),
            (Value::Struct(a), Value::Tensor(_)) => a
                .iter()
                .map(|(name, x)| Ok((name.clone(), x.binary(op, other)?)))
                .collect::<Result<Vec<_>>>()
                .map(Value::Struct),
            _ => Err(Error::kernel(
                op.name(),
                format!("cannot combine {} and {}", self.kind_name(), other.kind_name()),
            )),
        }
    }

    pub fn add(&self, other: &Value) -> Result<Value> {
        self.binary(ArithOp::Add, other)
    }

    pub fn multiply(&self, other: &Value) -> Result<Value> {
        self.binary(ArithOp::Multiply, other)
    }

    pub fn divide(&self, other: &Value) -> Result<Value> {
        self.binary(ArithOp::Divide, other)
    }

    pub fn modulo(&self, other: &Value) -> Result<Value> {
        self.binary(ArithOp::Modulo, other)
    }

    /// True if any leaf exceeds the matching leaf of `bound`. A scalar
    /// bound applies to every leaf.
    pub fn any_greater_than(&self, bound: &Value) -> Result<bool> {
        match (self, bound) {
            (Value::Tensor(a), Value::Tensor(b)) => a.exceeds(b),
            (Value::Struct(a), Value::Struct(b)) if a.len() == b.len() => {
                for ((_, x), (_, y)) in a.iter().zip(b) {
                    if x.any_greater_than(y)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            (Value::Struct(a), Value::Tensor(_)) => {
                for (_, x) in a {
                    if x.any_greater_than(bound)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            _ => Err(Error::Unsupported(format!(
                "cannot bound {} by {}",
                self.kind_name(),
                bound.kind_name()
            ))),
        }
    }

    /// True if any leaf is negative.
    pub fn any_negative(&self) -> Result<bool> {
        match self {
            Value::Tensor(t) => {
                let Some(values) = t.data.to_f64() else {
                    return Err(Error::Unsupported("bounds on boolean tensors".to_string()));
                };
                Ok(values.iter().any(|v| *v < 0.0))
            }
            Value::Struct(elements) => {
                for (_, v) in elements {
                    if v.any_negative()? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            _ => Err(Error::Unsupported(format!(
                "cannot bound {}",
                self.kind_name()
            ))),
        }
    }
}

fn unknown_shape(ty: &Type) -> Error {
    Error::Unsupported(format!("type {ty} has dimensions of unknown size"))
}

/// Concrete shape for `len` elements, filling a single unknown dimension.
fn resolve_shape(shape: &[Option<usize>], len: usize) -> Option<Vec<usize>> {
    let known: usize = shape.iter().flatten().product();
    let unknown = shape.iter().filter(|d| d.is_none()).count();
    match unknown {
        0 if known == len => Some(shape.iter().flatten().copied().collect()),
        1 if known != 0 && len % known == 0 => Some(
            shape
                .iter()
                .map(|d| d.unwrap_or(len / known))
                .collect(),
        ),
        _ => None,
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{item}")?;
            }
            Ok(())
        }

        match self {
            Value::Tensor(t) => {
                let scalar = t.shape.is_empty();
                if !scalar {
                    f.write_str("[")?;
                }
                match &t.data {
                    TensorData::Bool(v) => list(f, v)?,
                    TensorData::Int(v) => list(f, v)?,
                    TensorData::Float(v) => list(f, v)?,
                }
                if !scalar {
                    f.write_str("]")?;
                }
                Ok(())
            }
            Value::Struct(elements) => {
                f.write_str("<")?;
                for (i, (name, v)) in elements.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    if let Some(name) = name {
                        write!(f, "{name}=")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str(">")
            }
            Value::Sequence(elements) => {
                f.write_str("[")?;
                list(f, elements)?;
                f.write_str("]*")
            }
            Value::Federated {
                placement,
                all_equal,
                members,
            } => {
                if *all_equal {
                    if let [member] = members.as_slice() {
                        return write!(f, "{member}@{placement}");
                    }
                }
                f.write_str("{")?;
                list(f, members)?;
                write!(f, "}}@{placement}")
            }
            Value::Function(comp) => f.write_str(&comp.compact_representation()),
        }
    }
}
