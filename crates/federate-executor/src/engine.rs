//! Compute engines run compiled kernels.
//!
//! A [`ComputeEngine`] is the local leaf of execution: it receives a
//! [`KernelProto`] together with the kernel's result type and an optional
//! argument, and produces a concrete value. The compiler never looks inside
//! kernels, so an engine is free to implement them however it likes.

use federate_ir::{KernelOp, KernelProto, Literal, Type};
use tracing::trace;

use crate::error::{Error, Result};
use crate::value::{ArithOp, Value};

pub trait ComputeEngine: Send + Sync + 'static {
    fn invoke(&self, proto: &KernelProto, result_type: &Type, argument: Option<Value>)
        -> Result<Value>;
}

/// Direct interpreter for the standard kernel operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceEngine;

impl ComputeEngine for ReferenceEngine {
    fn invoke(
        &self,
        proto: &KernelProto,
        result_type: &Type,
        argument: Option<Value>,
    ) -> Result<Value> {
        trace!(kernel = %proto.name, "invoke");
        match &proto.op {
            KernelOp::Identity => required(proto, argument),
            KernelOp::Constant(literal) => Value::from_literal(literal, result_type),
            KernelOp::Zero => Value::zero_of(result_type),
            KernelOp::Add => pairwise(proto, ArithOp::Add, argument),
            KernelOp::Multiply => pairwise(proto, ArithOp::Multiply, argument),
            KernelOp::Divide => pairwise(proto, ArithOp::Divide, argument),
            KernelOp::Modulo => pairwise(proto, ArithOp::Modulo, argument),
            KernelOp::AddScalar(literal) => {
                let value = required(proto, argument)?;
                let scalar = scalar_like(literal, &value)?;
                value.add(&scalar)
            }
        }
    }
}

fn required(proto: &KernelProto, argument: Option<Value>) -> Result<Value> {
    argument.ok_or_else(|| Error::kernel(&proto.name, "missing argument"))
}

fn pairwise(proto: &KernelProto, op: ArithOp, argument: Option<Value>) -> Result<Value> {
    match required(proto, argument)? {
        Value::Struct(elements) if elements.len() == 2 => elements[0].1.binary(op, &elements[1].1),
        other => Err(Error::kernel(
            &proto.name,
            format!("expected a pair, got {other}"),
        )),
    }
}

/// A scalar holding `literal` with the dtype of `value`'s first leaf.
fn scalar_like(literal: &Literal, value: &Value) -> Result<Value> {
    let mut leaf = value;
    while let Value::Struct(elements) = leaf {
        leaf = &elements
            .first()
            .ok_or_else(|| Error::Unsupported("scalar of an empty struct".to_string()))?
            .1;
    }
    let dtype = leaf
        .as_tensor()
        .map(|t| t.dtype)
        .ok_or_else(|| Error::Unsupported(format!("scalar matching {leaf}")))?;
    Value::from_literal(literal, &Type::scalar(dtype))
}
