//! Reference executor: a direct interpreter for building-block trees.
//!
//! Every intrinsic, including the secure ones, runs natively here so that
//! lowered and unlowered forms of a computation can be compared value for
//! value. Federated values are simulated: clients are just the members of
//! a `Value::Federated`.
//!
//! # Design
//!
//! ```text
//! Value ──embed──► Evaluated ──apply/evaluate──► Evaluated ──into_value──► Value
//!                    │
//!                    ├── Value       concrete data
//!                    ├── Struct      may hold functions (aggregate operands)
//!                    ├── Closure     lambda + captured environment
//!                    ├── Kernel      CompiledKernel node, run on the engine
//!                    └── Intrinsic   dispatched by URI
//! ```
//!
//! All-equal client values are expanded to the client count of the other
//! operands, or to the configured number of clients when nothing else
//! fixes it.

use std::sync::Arc;

use async_trait::async_trait;
use federate_compiler::analysis::free_variables;
use federate_ir::{uri, BlockKind, Comp, Placement, Selector, Type};
use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::engine::{ComputeEngine, ReferenceEngine};
use crate::error::{Error, Result};
use crate::executor::{check_call_types, check_selection_type, struct_type, value_type};
use crate::executor::{Executor, ExecutorValue};
use crate::value::{ArithOp, Tensor, TensorData, Value};

const SECURE_SUM_BOUND_MESSAGE: &str = "client value larger than maximum specified for secure sum";

// ============================================================================
// Evaluated values and environments
// ============================================================================

#[derive(Debug, Clone)]
enum Evaluated {
    Value(Value),
    Struct(Vec<(Option<String>, Evaluated)>),
    Closure { lambda: Comp, env: Env },
    Kernel(Comp),
    Intrinsic(Comp),
}

impl Evaluated {
    fn into_value(self) -> Result<Value> {
        match self {
            Evaluated::Value(value) => Ok(value),
            Evaluated::Struct(elements) => elements
                .into_iter()
                .map(|(name, e)| Ok((name, e.into_value()?)))
                .collect::<Result<Vec<_>>>()
                .map(Value::Struct),
            Evaluated::Closure { lambda, .. } if free_variables(&lambda).is_empty() => {
                Ok(Value::Function(lambda))
            }
            Evaluated::Closure { lambda, .. } => Err(Error::Unsupported(format!(
                "cannot materialize {} outside its scope",
                lambda.compact_representation()
            ))),
            Evaluated::Kernel(comp) | Evaluated::Intrinsic(comp) => Ok(Value::Function(comp)),
        }
    }

    fn into_elements(self) -> Result<Vec<(Option<String>, Evaluated)>> {
        match self {
            Evaluated::Struct(elements) => Ok(elements),
            Evaluated::Value(Value::Struct(elements)) => Ok(elements
                .into_iter()
                .map(|(name, v)| (name, Evaluated::Value(v)))
                .collect()),
            other => Err(Error::Unsupported(format!("expected a struct, got {}", other.describe()))),
        }
    }

    fn select(self, index: usize) -> Result<Evaluated> {
        let description = self.describe();
        self.into_elements()?
            .into_iter()
            .nth(index)
            .map(|(_, e)| e)
            .ok_or_else(|| Error::Unsupported(format!("cannot select [{index}] from {description}")))
    }

    fn describe(&self) -> String {
        match self {
            Evaluated::Value(value) => value.to_string(),
            Evaluated::Struct(elements) => format!("struct of {} elements", elements.len()),
            Evaluated::Closure { lambda, .. } => lambda.compact_representation(),
            Evaluated::Kernel(comp) | Evaluated::Intrinsic(comp) => comp.compact_representation(),
        }
    }
}

/// Persistent chain of bindings; inner frames shadow outer ones.
#[derive(Debug, Clone, Default)]
struct Env(Option<Arc<Frame>>);

#[derive(Debug)]
struct Frame {
    name: String,
    value: Evaluated,
    parent: Env,
}

impl Env {
    fn bind(&self, name: &str, value: Evaluated) -> Env {
        Env(Some(Arc::new(Frame {
            name: name.to_string(),
            value,
            parent: self.clone(),
        })))
    }

    fn lookup(&self, name: &str) -> Option<&Evaluated> {
        let mut frame = self.0.as_deref();
        while let Some(current) = frame {
            if current.name == name {
                return Some(&current.value);
            }
            frame = current.parent.0.as_deref();
        }
        None
    }
}

// ============================================================================
// Executor
// ============================================================================

/// Interprets computations over simulated clients.
#[derive(Debug, Clone)]
pub struct ReferenceExecutor<E: ComputeEngine = ReferenceEngine> {
    engine: Arc<E>,
    num_clients: usize,
    data: Arc<IndexMap<String, Value>>,
}

#[derive(Debug, Clone)]
pub struct ReferenceValue {
    ty: Type,
    value: Arc<Evaluated>,
}

#[async_trait]
impl ExecutorValue for ReferenceValue {
    fn type_signature(&self) -> &Type {
        &self.ty
    }

    async fn compute(&self) -> Result<Value> {
        self.value.as_ref().clone().into_value()
    }
}

impl ReferenceExecutor<ReferenceEngine> {
    pub fn new(num_clients: usize) -> Self {
        Self::with_engine(ReferenceEngine, num_clients)
    }
}

impl<E: ComputeEngine> ReferenceExecutor<E> {
    pub fn with_engine(engine: E, num_clients: usize) -> Self {
        debug!(num_clients, "reference executor created");
        Self {
            engine: Arc::new(engine),
            num_clients,
            data: Arc::new(IndexMap::new()),
        }
    }

    /// Builder method: bind the value `Data` blocks with `uri` resolve to.
    pub fn with_data(mut self, uri: impl Into<String>, value: Value) -> Self {
        Arc::make_mut(&mut self.data).insert(uri.into(), value);
        self
    }

    pub fn num_clients(&self) -> usize {
        self.num_clients
    }

    // === Interpretation ===

    fn embed(&self, value: Value) -> Result<Evaluated> {
        match value {
            Value::Function(comp) => self.evaluate(&comp, &Env::default()),
            Value::Struct(elements) => elements
                .into_iter()
                .map(|(name, v)| Ok((name, self.embed(v)?)))
                .collect::<Result<Vec<_>>>()
                .map(Evaluated::Struct),
            other => Ok(Evaluated::Value(other)),
        }
    }

    fn evaluate(&self, comp: &Comp, env: &Env) -> Result<Evaluated> {
        match comp.kind() {
            BlockKind::Reference { name } => env
                .lookup(name)
                .cloned()
                .ok_or_else(|| Error::UnboundReference(name.clone())),
            BlockKind::Data { uri: name } => {
                let value = self
                    .data
                    .get(name)
                    .cloned()
                    .ok_or_else(|| Error::UnboundData(name.clone()))?;
                self.embed(value)
            }
            BlockKind::Intrinsic { uri: name } if name == uri::GENERIC_ZERO => {
                Ok(Evaluated::Value(Value::zero_of(comp.type_signature())?))
            }
            BlockKind::Intrinsic { .. } => Ok(Evaluated::Intrinsic(comp.clone())),
            BlockKind::CompiledKernel { .. } => Ok(Evaluated::Kernel(comp.clone())),
            BlockKind::Lambda { .. } => Ok(Evaluated::Closure {
                lambda: comp.clone(),
                env: env.clone(),
            }),
            BlockKind::Call { function, argument } => {
                let function = self.evaluate(function, env)?;
                let argument = argument
                    .as_ref()
                    .map(|arg| self.evaluate(arg, env))
                    .transpose()?;
                self.apply(&function, argument)
            }
            BlockKind::Struct { elements } => elements
                .iter()
                .map(|(name, element)| Ok((name.clone(), self.evaluate(element, env)?)))
                .collect::<Result<Vec<_>>>()
                .map(Evaluated::Struct),
            BlockKind::Selection { source, index, .. } => self.evaluate(source, env)?.select(*index),
            BlockKind::Block { locals, result } => {
                let mut scope = env.clone();
                for (name, value) in locals {
                    let value = self.evaluate(value, &scope)?;
                    scope = scope.bind(name, value);
                }
                self.evaluate(result, &scope)
            }
        }
    }

    fn apply(&self, function: &Evaluated, argument: Option<Evaluated>) -> Result<Evaluated> {
        match function {
            Evaluated::Closure { lambda, env } => {
                let BlockKind::Lambda { parameter, body } = lambda.kind() else {
                    return Err(Error::Unsupported(lambda.compact_representation()));
                };
                let scope = match (parameter, argument) {
                    (Some(name), Some(argument)) => env.bind(name, argument),
                    (None, None) => env.clone(),
                    (Some(_), None) => {
                        return Err(federate_ir::Error::MissingArgument {
                            function: lambda.type_signature().clone(),
                        }
                        .into())
                    }
                    (None, Some(_)) => {
                        return Err(federate_ir::Error::UnexpectedArgument {
                            function: lambda.type_signature().clone(),
                        }
                        .into())
                    }
                };
                self.evaluate(body, &scope)
            }
            Evaluated::Kernel(comp) => {
                let BlockKind::CompiledKernel { proto } = comp.kind() else {
                    return Err(Error::Unsupported(comp.compact_representation()));
                };
                let result_type = result_type(comp)?;
                let argument = argument.map(Evaluated::into_value).transpose()?;
                let value = self.engine.invoke(proto, result_type, argument)?;
                Ok(Evaluated::Value(value))
            }
            Evaluated::Intrinsic(comp) => {
                let argument = argument.ok_or_else(|| federate_ir::Error::MissingArgument {
                    function: comp.type_signature().clone(),
                })?;
                self.intrinsic(comp, argument)
            }
            other => Err(Error::Unsupported(format!("{} is not callable", other.describe()))),
        }
    }

    fn call_on(&self, function: &Evaluated, value: Value) -> Result<Value> {
        self.apply(function, Some(Evaluated::Value(value)))?
            .into_value()
    }

    // === Intrinsics ===

    fn intrinsic(&self, comp: &Comp, argument: Evaluated) -> Result<Evaluated> {
        let name = comp.intrinsic_uri().unwrap_or_default();
        let result = result_type(comp)?;
        trace!(uri = name, "intrinsic");

        let value = match name {
            uri::FEDERATED_MAP => {
                let [function, value] = operands(argument)?;
                let members = self.client_members(value, None)?;
                let mapped = members
                    .into_iter()
                    .map(|m| self.call_on(&function, m))
                    .collect::<Result<Vec<_>>>()?;
                Value::clients(mapped)
            }
            uri::FEDERATED_MAP_ALL_EQUAL => {
                let [function, value] = operands(argument)?;
                let (_, all_equal, members) = placed(value, Placement::Clients)?;
                let mapped = members
                    .into_iter()
                    .map(|m| self.call_on(&function, m))
                    .collect::<Result<Vec<_>>>()?;
                Value::Federated {
                    placement: Placement::Clients,
                    all_equal,
                    members: mapped,
                }
            }
            uri::FEDERATED_APPLY => {
                let [function, value] = operands(argument)?;
                Value::server(self.call_on(&function, server_member(value)?)?)
            }
            uri::FEDERATED_BROADCAST => Value::clients_all_equal(server_member(argument)?),
            uri::FEDERATED_EVAL_AT_CLIENTS => {
                let members = (0..self.num_clients)
                    .map(|_| self.apply(&argument, None)?.into_value())
                    .collect::<Result<Vec<_>>>()?;
                Value::clients(members)
            }
            uri::FEDERATED_EVAL_AT_SERVER => Value::server(self.apply(&argument, None)?.into_value()?),
            uri::FEDERATED_VALUE_AT_CLIENTS => Value::clients_all_equal(argument.into_value()?),
            uri::FEDERATED_VALUE_AT_SERVER => Value::server(argument.into_value()?),
            uri::FEDERATED_ZIP_AT_CLIENTS => self.zip_at_clients(argument)?,
            uri::FEDERATED_ZIP_AT_SERVER => {
                let elements = argument
                    .into_elements()?
                    .into_iter()
                    .map(|(name, e)| Ok((name, server_member(e)?)))
                    .collect::<Result<Vec<_>>>()?;
                Value::server(Value::Struct(elements))
            }
            uri::FEDERATED_SUM => {
                let members = self.client_members(argument, None)?;
                Value::server(sum(members, placed_member(result)?)?)
            }
            uri::FEDERATED_MEAN => {
                let members = self.client_members(argument, None)?;
                let count = members.len();
                if count == 0 {
                    return Err(Error::Unsupported("mean over no clients".to_string()));
                }
                let total = sum(members, placed_member(result)?)?;
                Value::server(total.divide(&Value::float32(count as f64))?)
            }
            uri::FEDERATED_WEIGHTED_MEAN => {
                let [value, weight] = operands(argument)?;
                let values = self.client_members(value, None)?;
                let weights = self.client_members(weight, Some(values.len()))?;
                let weighted = values
                    .iter()
                    .zip(&weights)
                    .map(|(v, w)| v.multiply(w))
                    .collect::<Result<Vec<_>>>()?;
                let Some(first_weight) = weights.first() else {
                    return Err(Error::Unsupported("mean over no clients".to_string()));
                };
                let total_weight = weights[1..]
                    .iter()
                    .try_fold(first_weight.clone(), |acc, w| acc.add(w))?;
                let total = sum(weighted, placed_member(result)?)?;
                Value::server(total.divide(&total_weight)?)
            }
            uri::FEDERATED_AGGREGATE => self.aggregate(argument)?,
            uri::FEDERATED_SECURE_SUM => {
                let [value, bound] = operands(argument)?;
                let bound = unplaced(bound)?;
                let members = self.client_members(value, None)?;
                for member in &members {
                    if member.any_negative()? || member.any_greater_than(&bound)? {
                        return Err(Error::BoundExceeded(SECURE_SUM_BOUND_MESSAGE.to_string()));
                    }
                }
                Value::server(sum(members, placed_member(result)?)?)
            }
            uri::FEDERATED_SECURE_SUM_BITWIDTH => {
                let [value, bitwidth] = operands(argument)?;
                let bits = unplaced(bitwidth)?
                    .as_i64()
                    .filter(|b| (0..63).contains(b))
                    .ok_or_else(|| Error::Unsupported("bitwidth must be a scalar in 0..63".to_string()))?;
                let max = Value::int64((1i64 << bits) - 1);
                let members = self.client_members(value, None)?;
                for member in &members {
                    if member.any_negative()? || member.any_greater_than(&max)? {
                        return Err(Error::BoundExceeded(format!(
                            "client value does not fit in {bits} bits for secure sum"
                        )));
                    }
                }
                Value::server(sum(members, placed_member(result)?)?)
            }
            uri::FEDERATED_SECURE_MODULAR_SUM => {
                let [value, modulus] = operands(argument)?;
                let modulus = unplaced(modulus)?;
                let reduced = self
                    .client_members(value, None)?
                    .iter()
                    .map(|m| m.modulo(&modulus))
                    .collect::<Result<Vec<_>>>()?;
                Value::server(sum(reduced, placed_member(result)?)?.modulo(&modulus)?)
            }
            uri::FEDERATED_SELECT | uri::FEDERATED_SECURE_SELECT => self.select(argument)?,
            uri::SEQUENCE_MAP => {
                let [function, sequence] = operands(argument)?;
                let mapped = sequence_items(sequence)?
                    .into_iter()
                    .map(|item| self.call_on(&function, item))
                    .collect::<Result<Vec<_>>>()?;
                Value::Sequence(mapped)
            }
            uri::SEQUENCE_REDUCE => {
                let [sequence, zero, op] = operands(argument)?;
                let mut accumulator = zero;
                for item in sequence_items(sequence)? {
                    accumulator = self.apply(&op, Some(pair(accumulator, Evaluated::Value(item))))?;
                }
                return Ok(accumulator);
            }
            uri::SEQUENCE_SUM => sum(sequence_items(argument)?, result)?,
            uri::GENERIC_PLUS => generic(ArithOp::Add, argument)?,
            uri::GENERIC_MULTIPLY => generic(ArithOp::Multiply, argument)?,
            uri::GENERIC_DIVIDE => generic(ArithOp::Divide, argument)?,
            other => return Err(Error::Unsupported(format!("intrinsic '{other}'"))),
        };
        Ok(Evaluated::Value(value))
    }

    /// Members of a client-placed value; all-equal values are expanded to
    /// `count` (or the configured client count).
    fn client_members(&self, value: Evaluated, count: Option<usize>) -> Result<Vec<Value>> {
        let (_, all_equal, members) = placed(value, Placement::Clients)?;
        match (all_equal, members.as_slice()) {
            (true, [member]) => Ok(vec![member.clone(); count.unwrap_or(self.num_clients)]),
            _ => match count {
                Some(count) if count != members.len() => Err(Error::Unsupported(format!(
                    "expected {count} client values, found {}",
                    members.len()
                ))),
                _ => Ok(members),
            },
        }
    }

    fn zip_at_clients(&self, argument: Evaluated) -> Result<Value> {
        let elements = argument.into_elements()?;
        let mut count = None;
        for (_, element) in &elements {
            if let Evaluated::Value(Value::Federated {
                all_equal: false,
                members,
                ..
            }) = element
            {
                count.get_or_insert(members.len());
            }
        }
        let count = count.unwrap_or(self.num_clients);
        let mut columns = Vec::with_capacity(elements.len());
        for (name, element) in elements {
            columns.push((name, self.client_members(element, Some(count))?));
        }
        let members = (0..count)
            .map(|i| {
                Value::Struct(
                    columns
                        .iter()
                        .map(|(name, column)| (name.clone(), column[i].clone()))
                        .collect(),
                )
            })
            .collect();
        Ok(Value::clients(members))
    }

    /// Accumulate each half of the clients from `zero`, merge the two
    /// partials, then report.
    fn aggregate(&self, argument: Evaluated) -> Result<Value> {
        let [value, zero, accumulate, merge, report] = operands(argument)?;
        let members = self.client_members(value, None)?;
        let (left, right) = members.split_at(members.len() / 2);
        let mut partials = Vec::with_capacity(2);
        for half in [left, right] {
            let mut accumulator = zero.clone();
            for member in half {
                accumulator =
                    self.apply(&accumulate, Some(pair(accumulator, Evaluated::Value(member.clone()))))?;
            }
            partials.push(accumulator);
        }
        let [left, right]: [Evaluated; 2] = partials
            .try_into()
            .map_err(|_| Error::Unsupported("aggregate partials".to_string()))?;
        let merged = self.apply(&merge, Some(pair(left, right)))?;
        Ok(Value::server(self.apply(&report, Some(merged))?.into_value()?))
    }

    /// Each client receives `select_fn(state, key)` for each of its keys.
    fn select(&self, argument: Evaluated) -> Result<Value> {
        let [keys, max_key, state, select_fn] = operands(argument)?;
        let max_key = server_member(max_key)?
            .as_i64()
            .ok_or_else(|| Error::Unsupported("max key must be an integer scalar".to_string()))?;
        let state = server_member(state)?;
        let mut members = Vec::new();
        for client_keys in self.client_members(keys, None)? {
            let Value::Tensor(Tensor {
                dtype,
                data: TensorData::Int(keys),
                ..
            }) = client_keys
            else {
                return Err(Error::Unsupported(format!("select keys {client_keys}")));
            };
            let mut selected = Vec::with_capacity(keys.len());
            for key in keys {
                if !(0..=max_key).contains(&key) {
                    return Err(Error::BoundExceeded(format!(
                        "select key {key} outside [0, {max_key}]"
                    )));
                }
                let argument = pair(
                    Evaluated::Value(state.clone()),
                    Evaluated::Value(Value::Tensor(Tensor::scalar_int(dtype, key))),
                );
                selected.push(self.apply(&select_fn, Some(argument))?.into_value()?);
            }
            members.push(Value::Sequence(selected));
        }
        Ok(Value::clients(members))
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn result_type(comp: &Comp) -> Result<&Type> {
    comp.type_signature()
        .as_function()
        .map(|ft| ft.result())
        .ok_or_else(|| federate_ir::Error::NotAFunction(comp.type_signature().clone()).into())
}

fn placed_member(ty: &Type) -> Result<&Type> {
    ty.as_federated()
        .map(|ft| ft.member.as_ref())
        .ok_or_else(|| Error::Unsupported(format!("expected a federated type, got {ty}")))
}

fn operands<const N: usize>(argument: Evaluated) -> Result<[Evaluated; N]> {
    let elements: Vec<Evaluated> = argument.into_elements()?.into_iter().map(|(_, e)| e).collect();
    let found = elements.len();
    elements
        .try_into()
        .map_err(|_| Error::Unsupported(format!("expected {N} operands, found {found}")))
}

fn pair(first: Evaluated, second: Evaluated) -> Evaluated {
    Evaluated::Struct(vec![(None, first), (None, second)])
}

fn placed(value: Evaluated, expected: Placement) -> Result<(Placement, bool, Vec<Value>)> {
    match value {
        Evaluated::Value(Value::Federated {
            placement,
            all_equal,
            members,
        }) if placement == expected => Ok((placement, all_equal, members)),
        other => Err(Error::Unsupported(format!(
            "expected a value at {expected}, got {}",
            other.describe()
        ))),
    }
}

fn server_member(value: Evaluated) -> Result<Value> {
    let (_, _, members) = placed(value, Placement::Server)?;
    let found = members.len();
    let [member]: [Value; 1] = members
        .try_into()
        .map_err(|_| Error::Unsupported(format!("server value with {found} members")))?;
    Ok(member)
}

/// A bound or modulus, given either unplaced or at the server.
fn unplaced(value: Evaluated) -> Result<Value> {
    match value {
        server @ Evaluated::Value(Value::Federated { .. }) => server_member(server),
        other => other.into_value(),
    }
}

fn sequence_items(value: Evaluated) -> Result<Vec<Value>> {
    match value.into_value()? {
        Value::Sequence(items) => Ok(items),
        other => Err(Error::Unsupported(format!("expected a sequence, got {other}"))),
    }
}

fn sum(values: Vec<Value>, member_type: &Type) -> Result<Value> {
    let mut values = values.into_iter();
    let Some(first) = values.next() else {
        return Value::zero_of(member_type);
    };
    values.try_fold(first, |acc, v| acc.add(&v))
}

fn generic(op: ArithOp, argument: Evaluated) -> Result<Value> {
    let [left, right] = operands(argument)?;
    match (left.into_value()?, right.into_value()?) {
        (
            Value::Federated {
                placement,
                all_equal,
                members: left,
            },
            Value::Federated {
                placement: other,
                members: right,
                ..
            },
        ) if placement == other && left.len() == right.len() => {
            let members = left
                .iter()
                .zip(&right)
                .map(|(a, b)| a.binary(op, b))
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::Federated {
                placement,
                all_equal,
                members,
            })
        }
        (left, right) => left.binary(op, &right),
    }
}

#[async_trait]
impl<E: ComputeEngine> Executor for ReferenceExecutor<E> {
    type Handle = ReferenceValue;

    async fn create_value(&self, value: Value, type_hint: Option<Type>) -> Result<ReferenceValue> {
        let ty = value_type(&value, type_hint)?;
        let value = self.embed(value)?;
        Ok(ReferenceValue {
            ty,
            value: Arc::new(value),
        })
    }

    async fn create_call(
        &self,
        function: &ReferenceValue,
        argument: Option<&ReferenceValue>,
    ) -> Result<ReferenceValue> {
        let ty = check_call_types(&function.ty, argument.map(|a| &a.ty))?;
        let value = self.apply(
            &function.value,
            argument.map(|a| a.value.as_ref().clone()),
        )?;
        Ok(ReferenceValue {
            ty,
            value: Arc::new(value),
        })
    }

    async fn create_struct(
        &self,
        elements: Vec<(Option<String>, ReferenceValue)>,
    ) -> Result<ReferenceValue> {
        let ty = struct_type(&elements);
        let value = Evaluated::Struct(
            elements
                .into_iter()
                .map(|(name, handle)| (name, handle.value.as_ref().clone()))
                .collect(),
        );
        Ok(ReferenceValue {
            ty,
            value: Arc::new(value),
        })
    }

    async fn create_selection(
        &self,
        source: &ReferenceValue,
        selector: Selector,
    ) -> Result<ReferenceValue> {
        let (index, ty) = check_selection_type(&source.ty, &selector)?;
        let value = source.value.as_ref().clone().select(index)?;
        Ok(ReferenceValue {
            ty,
            value: Arc::new(value),
        })
    }

    async fn close(&self) {
        debug!("reference executor closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use federate_ir::{factory, BuildingBlock, DType, KernelOp, Literal};

    fn clients_int32() -> Type {
        Type::at_clients(Type::int32())
    }

    /// `(x -> build(x))` over a parameter of type `ty`.
    fn lambda(ty: Type, build: impl FnOnce(Comp) -> federate_ir::Result<Comp>) -> Value {
        let body = build(BuildingBlock::reference("x", ty.clone())).unwrap();
        Value::function(BuildingBlock::lambda("x", ty, body))
    }

    fn add_one() -> Comp {
        factory::create_compiled_kernel(
            "add_one",
            KernelOp::AddScalar(Literal::Int(1)),
            Type::function(Some(Type::int32()), Type::int32()),
        )
    }

    async fn invoke(executor: &ReferenceExecutor, function: Value, argument: Value) -> Result<Value> {
        let f = executor.create_value(function, None).await?;
        let parameter = f.type_signature().as_function().and_then(|ft| ft.parameter()).cloned();
        let x = executor.create_value(argument, parameter).await?;
        executor.create_call(&f, Some(&x)).await?.compute().await
    }

    fn ints(values: &[i64]) -> Value {
        Value::clients(values.iter().map(|&v| Value::int32(v)).collect())
    }

    #[tokio::test]
    async fn sums_client_values() {
        let executor = ReferenceExecutor::new(3);
        let sum = lambda(clients_int32(), factory::create_federated_sum);
        let result = invoke(&executor, sum, ints(&[1, 2, 3])).await.unwrap();
        assert_eq!(result, Value::server(Value::int32(6)));
    }

    #[tokio::test]
    async fn maps_kernels_over_clients() {
        let executor = ReferenceExecutor::new(2);
        let map = lambda(clients_int32(), |x| factory::create_federated_map(add_one(), x));
        let result = invoke(&executor, map, ints(&[1, 5])).await.unwrap();
        assert_eq!(result, ints(&[2, 6]));
    }

    #[tokio::test]
    async fn broadcast_values_expand_to_all_clients() {
        let executor = ReferenceExecutor::new(4);
        let ty = Type::at_server(Type::int32());
        let comp = lambda(ty, |x| {
            let clients = factory::create_federated_broadcast(x)?;
            let mapped = factory::create_federated_map(add_one(), clients)?;
            factory::create_federated_sum(mapped)
        });
        let result = invoke(&executor, comp, Value::server(Value::int32(2))).await.unwrap();
        assert_eq!(result, Value::server(Value::int32(12)));
    }

    #[tokio::test]
    async fn secure_sum_enforces_the_bound() {
        let executor = ReferenceExecutor::new(2);
        let comp = lambda(clients_int32(), |x| {
            let bound = factory::create_constant(Literal::Int(3), Type::int32())?;
            factory::create_federated_secure_sum(x, bound)
        });
        let ok = invoke(&executor, comp.clone(), ints(&[1, 3])).await.unwrap();
        assert_eq!(ok, Value::server(Value::int32(4)));

        let err = invoke(&executor, comp, ints(&[2, 4])).await.unwrap_err();
        assert!(matches!(err, Error::BoundExceeded(_)));
        assert_eq!(err.to_string(), SECURE_SUM_BOUND_MESSAGE);
    }

    #[tokio::test]
    async fn bitwidth_sum_checks_the_range() {
        let executor = ReferenceExecutor::new(2);
        let comp = lambda(clients_int32(), |x| {
            let bits = factory::create_constant(Literal::Int(2), Type::int32())?;
            factory::create_federated_secure_sum_bitwidth(x, bits)
        });
        assert_eq!(
            invoke(&executor, comp.clone(), ints(&[3, 3])).await.unwrap(),
            Value::server(Value::int32(6))
        );
        assert!(matches!(
            invoke(&executor, comp, ints(&[4, 0])).await,
            Err(Error::BoundExceeded(_))
        ));
    }

    #[tokio::test]
    async fn modular_sum_reduces_per_client_and_in_total() {
        let executor = ReferenceExecutor::new(3);
        let comp = lambda(clients_int32(), |x| {
            let modulus = factory::create_constant(Literal::Int(5), Type::int32())?;
            factory::create_federated_secure_modular_sum(x, modulus)
        });
        let result = invoke(&executor, comp, ints(&[1, 2, 10])).await.unwrap();
        assert_eq!(result, Value::server(Value::int32(3)));
    }

    #[tokio::test]
    async fn mean_and_weighted_mean() {
        let executor = ReferenceExecutor::new(3);
        let floats = Type::at_clients(Type::float32());
        let mean = lambda(floats.clone(), |x| factory::create_federated_mean(x, None));
        let values = Value::clients(vec![Value::float32(1.0), Value::float32(2.0), Value::float32(6.0)]);
        assert_eq!(
            invoke(&executor, mean, values.clone()).await.unwrap(),
            Value::server(Value::float32(3.0))
        );

        let pair_type = Type::unnamed(vec![floats.clone(), floats]);
        let weighted = lambda(pair_type, |x| {
            let value = BuildingBlock::select_index(x.clone(), 0)?;
            let weight = BuildingBlock::select_index(x, 1)?;
            factory::create_federated_mean(value, Some(weight))
        });
        let weights = Value::clients(vec![Value::float32(1.0), Value::float32(1.0), Value::float32(2.0)]);
        let result = invoke(&executor, weighted, Value::tuple(vec![values, weights])).await.unwrap();
        assert_eq!(result, Value::server(Value::float32(3.75)));
    }

    #[tokio::test]
    async fn aggregate_runs_accumulate_merge_and_report() {
        let executor = ReferenceExecutor::new(3);
        let pair_type = Type::unnamed(vec![Type::int32(), Type::int32()]);
        let plus = factory::create_compiled_kernel(
            "add",
            KernelOp::Add,
            Type::function(Some(pair_type), Type::int32()),
        );
        let comp = lambda(clients_int32(), |x| {
            let zero = factory::create_constant(Literal::Int(0), Type::int32())?;
            let report = factory::create_identity_function("r", Type::int32());
            factory::create_federated_aggregate(x, zero, plus.clone(), plus.clone(), report)
        });
        let result = invoke(&executor, comp, ints(&[4, 5, 6, 7])).await.unwrap();
        assert_eq!(result, Value::server(Value::int32(22)));
    }

    #[tokio::test]
    async fn blocks_bind_sequentially_and_data_resolves() {
        let executor = ReferenceExecutor::new(1).with_data("input", Value::int32(41));
        let a = BuildingBlock::reference("a", Type::int32());
        let call = BuildingBlock::call(add_one(), Some(a.clone())).unwrap();
        let block = BuildingBlock::block(
            vec![
                ("a".to_string(), BuildingBlock::data("input", Type::int32())),
                ("a".to_string(), call),
            ],
            a,
        );
        let value = executor.create_value(Value::function(block), None).await.unwrap();
        assert_eq!(value.compute().await.unwrap(), Value::int32(42));

        let missing = BuildingBlock::data("missing", Type::int32());
        let err = executor.create_value(Value::function(missing), None).await.unwrap_err();
        assert!(matches!(err, Error::UnboundData(name) if name == "missing"));
    }

    #[tokio::test]
    async fn select_applies_the_function_per_key() {
        let executor = ReferenceExecutor::new(2);
        let keys_type = Type::at_clients(Type::tensor(DType::Int32, vec![None]));
        let state_type = Type::vector(DType::Int32, 3);
        let pick = factory::create_compiled_kernel(
            "pick",
            KernelOp::Add,
            Type::function(
                Some(Type::unnamed(vec![state_type.clone(), Type::int32()])),
                state_type.clone(),
            ),
        );
        let comp = lambda(keys_type, |keys| {
            let max = factory::create_federated_value(
                factory::create_constant(Literal::Int(2), Type::int32())?,
                Placement::Server,
            )?;
            let state = factory::create_federated_value(
                factory::create_constant(Literal::Ints(vec![10, 20, 30]), state_type.clone())?,
                Placement::Server,
            )?;
            factory::create_federated_select(keys, max, state, pick.clone(), false)
        });
        let keys = Value::clients(vec![Value::int32_vector(vec![0, 2]), Value::int32_vector(vec![1])]);
        let result = invoke(&executor, comp.clone(), keys).await.unwrap();
        assert_eq!(
            result,
            Value::clients(vec![
                Value::sequence(vec![
                    Value::int32_vector(vec![10, 20, 30]),
                    Value::int32_vector(vec![12, 22, 32]),
                ]),
                Value::sequence(vec![Value::int32_vector(vec![11, 21, 31])]),
            ])
        );

        let out_of_range = Value::clients(vec![Value::int32_vector(vec![3])]);
        assert!(matches!(
            invoke(&executor, comp, out_of_range).await,
            Err(Error::BoundExceeded(_))
        ));
    }

    #[tokio::test]
    async fn structs_and_selections_of_handles() {
        let executor = ReferenceExecutor::new(1);
        let f = executor.create_value(Value::function(add_one()), None).await.unwrap();
        let x = executor.create_value(Value::int32(1), None).await.unwrap();
        let both = executor
            .create_struct(vec![(Some("f".to_string()), f), (Some("x".to_string()), x)])
            .await
            .unwrap();
        let f = executor.create_selection(&both, Selector::from("f")).await.unwrap();
        let x = executor.create_selection(&both, Selector::Index(1)).await.unwrap();
        let result = executor.create_call(&f, Some(&x)).await.unwrap();
        assert_eq!(result.compute().await.unwrap(), Value::int32(2));
    }

    #[tokio::test]
    async fn closures_over_free_variables_cannot_be_materialized() {
        let executor = ReferenceExecutor::new(1);
        let inner = BuildingBlock::lambda(
            "y",
            Type::int32(),
            BuildingBlock::reference("x", Type::int32()),
        );
        let outer = Value::function(BuildingBlock::lambda("x", Type::int32(), inner));
        let f = executor.create_value(outer, None).await.unwrap();
        let x = executor.create_value(Value::int32(1), None).await.unwrap();
        let closure = executor.create_call(&f, Some(&x)).await.unwrap();
        assert!(matches!(closure.compute().await, Err(Error::Unsupported(_))));
        let applied = executor.create_call(&closure, Some(&x)).await.unwrap();
        assert_eq!(applied.compute().await.unwrap(), Value::int32(1));
    }
}
