//! Compiled kernel payloads.
//!
//! A [`KernelProto`] is the serialized form a local compute engine executes.
//! The compiler treats it as opaque: it is embedded in `CompiledKernel`
//! blocks and never rewritten.

use serde::{Deserialize, Serialize};

/// A constant baked into a kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
}

impl From<i64> for Literal {
    fn from(v: i64) -> Self {
        Literal::Int(v)
    }
}

impl From<f64> for Literal {
    fn from(v: f64) -> Self {
        Literal::Float(v)
    }
}

impl From<bool> for Literal {
    fn from(v: bool) -> Self {
        Literal::Bool(v)
    }
}

impl From<Vec<i64>> for Literal {
    fn from(v: Vec<i64>) -> Self {
        Literal::Ints(v)
    }
}

/// Operation performed by a kernel.
///
/// Binary operations take a two-element struct argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelOp {
    Identity,
    Constant(Literal),
    Zero,
    Add,
    Multiply,
    Divide,
    Modulo,
    AddScalar(Literal),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelProto {
    pub name: String,
    pub op: KernelOp,
}

impl KernelProto {
    pub fn new(name: impl Into<String>, op: KernelOp) -> Self {
        Self {
            name: name.into(),
            op,
        }
    }
}
