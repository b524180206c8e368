//! The executor abstraction.
//!
//! An [`Executor`] turns concrete [`Value`]s and computations into opaque
//! handles, applies handles to each other and assembles or projects
//! structs of handles. Every operation is asynchronous; an implementation
//! may compute eagerly or defer work until [`ExecutorValue::compute`].
//!
//! Handles are only meaningful to the executor that created them.

use async_trait::async_trait;
use federate_ir::{Selector, StructType, Type};

use crate::error::Result;
use crate::value::Value;

/// An opaque executor-owned value.
#[async_trait]
pub trait ExecutorValue: Send + Sync {
    fn type_signature(&self) -> &Type;

    /// Materialize the value.
    async fn compute(&self) -> Result<Value>;
}

#[async_trait]
pub trait Executor: Send + Sync + 'static {
    type Handle: ExecutorValue + Clone + Send + Sync + 'static;

    /// Embed `value`. When `type_hint` is given the value must conform to
    /// it and the handle carries the hinted type.
    async fn create_value(&self, value: Value, type_hint: Option<Type>) -> Result<Self::Handle>;

    /// Apply `function` to `argument`. The argument must be present exactly
    /// when the function takes a parameter.
    async fn create_call(
        &self,
        function: &Self::Handle,
        argument: Option<&Self::Handle>,
    ) -> Result<Self::Handle>;

    async fn create_struct(
        &self,
        elements: Vec<(Option<String>, Self::Handle)>,
    ) -> Result<Self::Handle>;

    async fn create_selection(
        &self,
        source: &Self::Handle,
        selector: Selector,
    ) -> Result<Self::Handle>;

    /// Release resources. The executor stays usable afterwards.
    async fn close(&self);
}

// ============================================================================
// Type checks shared by executors
// ============================================================================

/// Result type of applying a function of type `function` to an argument
/// of type `argument`.
pub fn check_call_types(function: &Type, argument: Option<&Type>) -> Result<Type> {
    let ft = function
        .as_function()
        .ok_or_else(|| federate_ir::Error::NotAFunction(function.clone()))?;
    match (ft.parameter(), argument) {
        (None, Some(_)) => Err(federate_ir::Error::UnexpectedArgument {
            function: function.clone(),
        }
        .into()),
        (Some(_), None) => Err(federate_ir::Error::MissingArgument {
            function: function.clone(),
        }
        .into()),
        (Some(parameter), Some(arg)) if !parameter.is_assignable_from(arg) => {
            Err(federate_ir::Error::TypeMismatch {
                expected: parameter.clone(),
                found: arg.clone(),
            }
            .into())
        }
        _ => Ok(ft.result().clone()),
    }
}

/// Position and type of `selector` within `source`.
pub fn check_selection_type(source: &Type, selector: &Selector) -> Result<(usize, Type)> {
    let invalid = || federate_ir::Error::InvalidSelection {
        selector: selector.to_string(),
        source_type: source.clone(),
    };
    let st: &StructType = source.as_struct().ok_or_else(invalid)?;
    let index = match selector {
        Selector::Index(index) if *index < st.len() => *index,
        Selector::Index(_) => return Err(invalid().into()),
        Selector::Name(name) => st.index_of(name).ok_or_else(invalid)?,
    };
    Ok((index, st.elements[index].1.clone()))
}

/// Type of a struct assembled from handles.
pub fn struct_type<H: ExecutorValue>(elements: &[(Option<String>, H)]) -> Type {
    Type::structure(
        elements
            .iter()
            .map(|(name, handle)| (name.clone(), handle.type_signature().clone()))
            .collect(),
    )
}

/// Type a handle created from `value` carries.
pub(crate) fn value_type(value: &Value, type_hint: Option<Type>) -> Result<Type> {
    match type_hint {
        Some(ty) if value.conforms_to(&ty) => Ok(ty),
        Some(ty) => Err(crate::error::Error::TypeMismatch {
            expected: ty,
            found: value.infer_type()?,
        }),
        None => value.infer_type(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use federate_ir::DType;

    #[test]
    fn call_types_follow_the_function_signature() {
        let f = Type::function(Some(Type::int32()), Type::float32());
        assert_eq!(check_call_types(&f, Some(&Type::int32())).unwrap(), Type::float32());
        assert!(check_call_types(&f, None).unwrap_err().is_type_error());
        assert!(check_call_types(&f, Some(&Type::float32()))
            .unwrap_err()
            .is_type_error());

        let nullary = Type::function(None, Type::int32());
        assert!(check_call_types(&nullary, Some(&Type::int32())).is_err());
        assert!(check_call_types(&Type::int32(), None).is_err());
    }

    #[test]
    fn selection_by_index_and_name() {
        let ty = Type::named(vec![("a", Type::int32()), ("b", Type::vector(DType::Float32, 2))]);
        assert_eq!(
            check_selection_type(&ty, &Selector::from("b")).unwrap(),
            (1, Type::vector(DType::Float32, 2))
        );
        assert_eq!(check_selection_type(&ty, &Selector::Index(0)).unwrap().0, 0);
        assert!(check_selection_type(&ty, &Selector::Index(2)).is_err());
        assert!(check_selection_type(&Type::int32(), &Selector::Index(0)).is_err());
    }

    #[test]
    fn hinted_values_must_conform() {
        let v = Value::int32(3);
        assert_eq!(value_type(&v, None).unwrap(), Type::int32());
        assert!(value_type(&v, Some(Type::float32()))
            .unwrap_err()
            .is_type_error());
    }
}
