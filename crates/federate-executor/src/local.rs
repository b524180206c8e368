//! Executor for unplaced compiled kernels.

use std::sync::Arc;

use async_trait::async_trait;
use federate_ir::{BlockKind, Selector, Type};
use tracing::debug;

use crate::engine::{ComputeEngine, ReferenceEngine};
use crate::error::{Error, Result};
use crate::executor::{check_call_types, check_selection_type, struct_type, value_type};
use crate::executor::{Executor, ExecutorValue};
use crate::value::Value;

/// Runs `CompiledKernel` functions on a [`ComputeEngine`], eagerly.
///
/// Function values must be compiled kernels; anything placed or
/// higher-order belongs on the reference executor.
#[derive(Debug, Clone)]
pub struct LocalExecutor<E: ComputeEngine = ReferenceEngine> {
    engine: Arc<E>,
}

#[derive(Debug, Clone)]
pub struct LocalValue {
    ty: Type,
    value: Arc<Value>,
}

impl LocalValue {
    pub fn value(&self) -> &Value {
        &self.value
    }
}

#[async_trait]
impl ExecutorValue for LocalValue {
    fn type_signature(&self) -> &Type {
        &self.ty
    }

    async fn compute(&self) -> Result<Value> {
        Ok(self.value.as_ref().clone())
    }
}

impl<E: ComputeEngine> LocalExecutor<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }
}

impl Default for LocalExecutor<ReferenceEngine> {
    fn default() -> Self {
        Self::new(ReferenceEngine)
    }
}

#[async_trait]
impl<E: ComputeEngine> Executor for LocalExecutor<E> {
    type Handle = LocalValue;

    async fn create_value(&self, value: Value, type_hint: Option<Type>) -> Result<LocalValue> {
        if let Value::Function(comp) = &value {
            if !matches!(comp.kind(), BlockKind::CompiledKernel { .. }) {
                return Err(Error::Unsupported(format!(
                    "local executor only runs compiled kernels, got {}",
                    comp.compact_representation()
                )));
            }
        }
        let ty = value_type(&value, type_hint)?;
        Ok(LocalValue {
            ty,
            value: Arc::new(value),
        })
    }

    async fn create_call(
        &self,
        function: &LocalValue,
        argument: Option<&LocalValue>,
    ) -> Result<LocalValue> {
        let result_type = check_call_types(
            function.type_signature(),
            argument.map(|a| a.type_signature()),
        )?;
        let Value::Function(comp) = function.value() else {
            return Err(Error::Unsupported(format!("{} is not callable", function.value())));
        };
        let BlockKind::CompiledKernel { proto } = comp.kind() else {
            return Err(Error::Unsupported(comp.compact_representation()));
        };
        let value = self.engine.invoke(
            proto,
            &result_type,
            argument.map(|a| a.value().clone()),
        )?;
        Ok(LocalValue {
            ty: result_type,
            value: Arc::new(value),
        })
    }

    async fn create_struct(
        &self,
        elements: Vec<(Option<String>, LocalValue)>,
    ) -> Result<LocalValue> {
        let ty = struct_type(&elements);
        let value = Value::Struct(
            elements
                .into_iter()
                .map(|(name, handle)| (name, handle.value().clone()))
                .collect(),
        );
        Ok(LocalValue {
            ty,
            value: Arc::new(value),
        })
    }

    async fn create_selection(&self, source: &LocalValue, selector: Selector) -> Result<LocalValue> {
        let (index, ty) = check_selection_type(source.type_signature(), &selector)?;
        let element = source
            .value()
            .fields()
            .and_then(|fields| fields.get(index))
            .map(|(_, v)| v.clone())
            .ok_or_else(|| Error::Unsupported(format!("select {selector} of {}", source.value())))?;
        Ok(LocalValue {
            ty,
            value: Arc::new(element),
        })
    }

    async fn close(&self) {
        debug!("local executor closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use federate_ir::{factory, BuildingBlock, KernelOp, Literal};

    fn add_one() -> Value {
        Value::function(factory::create_compiled_kernel(
            "add_one",
            KernelOp::AddScalar(Literal::Int(1)),
            Type::function(Some(Type::int32()), Type::int32()),
        ))
    }

    #[tokio::test]
    async fn calls_compiled_kernels() {
        let executor = LocalExecutor::new(ReferenceEngine);
        let f = executor.create_value(add_one(), None).await.unwrap();
        let x = executor.create_value(Value::int32(10), None).await.unwrap();
        let result = executor.create_call(&f, Some(&x)).await.unwrap();
        assert_eq!(result.type_signature(), &Type::int32());
        assert_eq!(result.compute().await.unwrap(), Value::int32(11));
    }

    #[tokio::test]
    async fn rejects_mistyped_arguments() {
        let executor = LocalExecutor::new(ReferenceEngine);
        let f = executor.create_value(add_one(), None).await.unwrap();
        let x = executor.create_value(Value::float32(1.0), None).await.unwrap();
        let err = executor.create_call(&f, Some(&x)).await.unwrap_err();
        assert!(err.is_type_error());
        assert!(executor.create_call(&f, None).await.unwrap_err().is_type_error());
    }

    #[tokio::test]
    async fn rejects_uncompiled_functions() {
        let executor = LocalExecutor::new(ReferenceEngine);
        let lambda = factory::create_identity_function("x", Type::int32());
        let err = executor.create_value(Value::function(lambda), None).await;
        assert!(matches!(err, Err(Error::Unsupported(_))));
    }

    #[tokio::test]
    async fn structs_and_selections() {
        let executor = LocalExecutor::new(ReferenceEngine);
        let a = executor.create_value(Value::int32(1), None).await.unwrap();
        let b = executor.create_value(Value::float32(2.0), None).await.unwrap();
        let pair = executor
            .create_struct(vec![(Some("a".to_string()), a), (None, b)])
            .await
            .unwrap();
        assert_eq!(
            pair.type_signature(),
            &Type::structure(vec![(Some("a".to_string()), Type::int32()), (None, Type::float32())])
        );
        let second = executor.create_selection(&pair, Selector::Index(1)).await.unwrap();
        assert_eq!(second.compute().await.unwrap(), Value::float32(2.0));
        let named = executor.create_selection(&pair, Selector::from("a")).await.unwrap();
        assert_eq!(named.compute().await.unwrap(), Value::int32(1));
        assert!(executor.create_selection(&pair, Selector::Index(5)).await.is_err());
    }

    #[tokio::test]
    async fn hints_override_inferred_types() {
        let executor = LocalExecutor::new(ReferenceEngine);
        let ty = Type::tensor(federate_ir::DType::Int32, vec![None]);
        let v = executor
            .create_value(Value::int32_vector(vec![1, 2]), Some(ty.clone()))
            .await
            .unwrap();
        assert_eq!(v.type_signature(), &ty);
        let constant = BuildingBlock::compiled(
            federate_ir::KernelProto::new("c", KernelOp::Constant(Literal::Int(3))),
            Type::function(None, Type::int32()),
        );
        let f = executor.create_value(Value::function(constant), None).await.unwrap();
        let three = executor.create_call(&f, None).await.unwrap();
        assert_eq!(three.compute().await.unwrap(), Value::int32(3));
    }
}
