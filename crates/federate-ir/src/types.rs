//! Computation type algebra.
//!
//! Types are plain immutable values. Every building block carries a fully
//! resolved [`Type`], computed bottom-up when the block is constructed.
//!
//! # Relations
//!
//! Three relations are used across the compiler:
//!
//! - [`Type::is_identical_to`] - exact equality, struct containers included
//! - [`Type::is_equivalent_to`] - structural equality, containers ignored
//! - [`Type::is_assignable_from`] - a value of the source type may be used
//!   where the target type is expected
//!
//! # Rendering
//!
//! `Display` renders the canonical compact form used in diagnostics and
//! golden files: `int32`, `float32[2]`, `<a=int32,float32>`, `int32*`,
//! `(int32 -> int32)`, `int32@SERVER`, `{int32}@CLIENTS`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Bool,
    Int32,
    Int64,
    Float32,
    Float64,
}

impl DType {
    pub fn name(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(self, DType::Int32 | DType::Int64)
    }

    pub fn is_floating(self) -> bool {
        matches!(self, DType::Float32 | DType::Float64)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A tensor type. `None` dimensions have unknown size.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorType {
    pub dtype: DType,
    pub shape: Vec<Option<usize>>,
}

impl TensorType {
    pub fn scalar(dtype: DType) -> Self {
        Self {
            dtype,
            shape: Vec::new(),
        }
    }

    /// Number of elements, if every dimension is known.
    pub fn num_elements(&self) -> Option<usize> {
        self.shape
            .iter()
            .try_fold(1usize, |acc, dim| dim.map(|d| acc * d))
    }

    fn is_assignable_from(&self, source: &TensorType) -> bool {
        self.dtype == source.dtype
            && self.shape.len() == source.shape.len()
            && self
                .shape
                .iter()
                .zip(&source.shape)
                .all(|(target, source)| target.is_none() || target == source)
    }
}

/// Where a federated value lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Placement {
    Clients,
    Server,
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placement::Clients => f.write_str("CLIENTS"),
            Placement::Server => f.write_str("SERVER"),
        }
    }
}

/// Host-language container a struct was built from.
///
/// Containers only affect identity; equivalence and assignability ignore
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Container {
    Tuple,
    List,
    Dict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructType {
    pub elements: Vec<(Option<String>, Type)>,
    pub container: Option<Container>,
}

impl StructType {
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Type> {
        self.elements.get(index).map(|(_, ty)| ty)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.elements
            .iter()
            .position(|(element, _)| element.as_deref() == Some(name))
    }

    pub fn types(&self) -> impl Iterator<Item = &Type> {
        self.elements.iter().map(|(_, ty)| ty)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionType {
    pub parameter: Option<Box<Type>>,
    pub result: Box<Type>,
}

impl FunctionType {
    pub fn parameter(&self) -> Option<&Type> {
        self.parameter.as_deref()
    }

    pub fn result(&self) -> &Type {
        &self.result
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedType {
    pub member: Box<Type>,
    pub placement: Placement,
    pub all_equal: bool,
}

/// A computation type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Tensor(TensorType),
    Struct(StructType),
    Sequence(Box<Type>),
    Function(FunctionType),
    Federated(FederatedType),
    /// Type variable, only valid inside intrinsic signature templates.
    Abstract(String),
}

impl Type {
    // === Constructors ===

    pub fn scalar(dtype: DType) -> Self {
        Type::Tensor(TensorType::scalar(dtype))
    }

    pub fn tensor(dtype: DType, shape: Vec<Option<usize>>) -> Self {
        Type::Tensor(TensorType { dtype, shape })
    }

    pub fn vector(dtype: DType, len: usize) -> Self {
        Type::tensor(dtype, vec![Some(len)])
    }

    pub fn bool() -> Self {
        Type::scalar(DType::Bool)
    }

    pub fn int32() -> Self {
        Type::scalar(DType::Int32)
    }

    pub fn int64() -> Self {
        Type::scalar(DType::Int64)
    }

    pub fn float32() -> Self {
        Type::scalar(DType::Float32)
    }

    pub fn float64() -> Self {
        Type::scalar(DType::Float64)
    }

    pub fn structure(elements: Vec<(Option<String>, Type)>) -> Self {
        Type::Struct(StructType {
            elements,
            container: None,
        })
    }

    /// Struct with unnamed elements.
    pub fn unnamed(types: Vec<Type>) -> Self {
        Type::structure(types.into_iter().map(|ty| (None, ty)).collect())
    }

    /// Struct with every element named.
    pub fn named<S: Into<String>>(elements: Vec<(S, Type)>) -> Self {
        Type::structure(
            elements
                .into_iter()
                .map(|(name, ty)| (Some(name.into()), ty))
                .collect(),
        )
    }

    /// Attach a container to a struct type; other types are returned as-is.
    pub fn with_container(self, container: Container) -> Self {
        match self {
            Type::Struct(mut st) => {
                st.container = Some(container);
                Type::Struct(st)
            }
            other => other,
        }
    }

    pub fn sequence(element: Type) -> Self {
        Type::Sequence(Box::new(element))
    }

    pub fn function(parameter: Option<Type>, result: Type) -> Self {
        Type::Function(FunctionType {
            parameter: parameter.map(Box::new),
            result: Box::new(result),
        })
    }

    pub fn federated(member: Type, placement: Placement, all_equal: bool) -> Self {
        Type::Federated(FederatedType {
            member: Box::new(member),
            placement,
            all_equal,
        })
    }

    /// One value per client.
    pub fn at_clients(member: Type) -> Self {
        Type::federated(member, Placement::Clients, false)
    }

    /// A single value at the server.
    pub fn at_server(member: Type) -> Self {
        Type::federated(member, Placement::Server, true)
    }

    pub fn abstract_type(label: impl Into<String>) -> Self {
        Type::Abstract(label.into())
    }

    // === Accessors ===

    pub fn as_tensor(&self) -> Option<&TensorType> {
        match self {
            Type::Tensor(tt) => Some(tt),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructType> {
        match self {
            Type::Struct(st) => Some(st),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionType> {
        match self {
            Type::Function(ft) => Some(ft),
            _ => None,
        }
    }

    pub fn as_federated(&self) -> Option<&FederatedType> {
        match self {
            Type::Federated(ft) => Some(ft),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&Type> {
        match self {
            Type::Sequence(element) => Some(element),
            _ => None,
        }
    }

    pub fn is_federated(&self) -> bool {
        matches!(self, Type::Federated(_))
    }

    /// True if a federated type occurs anywhere inside this type.
    pub fn contains_federated(&self) -> bool {
        let mut placements = Vec::new();
        self.collect_placements(&mut placements);
        !placements.is_empty()
    }

    /// Push the placement of every federated type nested in this type.
    pub fn collect_placements(&self, out: &mut Vec<Placement>) {
        match self {
            Type::Tensor(_) | Type::Abstract(_) => {}
            Type::Struct(st) => st.types().for_each(|ty| ty.collect_placements(out)),
            Type::Sequence(element) => element.collect_placements(out),
            Type::Function(ft) => {
                if let Some(parameter) = ft.parameter() {
                    parameter.collect_placements(out);
                }
                ft.result.collect_placements(out);
            }
            Type::Federated(ft) => {
                out.push(ft.placement);
                ft.member.collect_placements(out);
            }
        }
    }

    // === Relations ===

    pub fn is_identical_to(&self, other: &Type) -> bool {
        self == other
    }

    pub fn is_equivalent_to(&self, other: &Type) -> bool {
        self.without_containers() == other.without_containers()
    }

    pub fn is_assignable_from(&self, source: &Type) -> bool {
        match (self, source) {
            (Type::Tensor(target), Type::Tensor(source)) => target.is_assignable_from(source),
            (Type::Struct(target), Type::Struct(source)) => {
                target.len() == source.len()
                    && target.elements.iter().zip(&source.elements).all(
                        |((target_name, target_ty), (source_name, source_ty))| {
                            (target_name.is_none() || target_name == source_name)
                                && target_ty.is_assignable_from(source_ty)
                        },
                    )
            }
            (Type::Sequence(target), Type::Sequence(source)) => target.is_assignable_from(source),
            (Type::Function(target), Type::Function(source)) => {
                let parameters = match (target.parameter(), source.parameter()) {
                    (None, None) => true,
                    (Some(target), Some(source)) => source.is_assignable_from(target),
                    _ => false,
                };
                parameters && target.result.is_assignable_from(&source.result)
            }
            (Type::Federated(target), Type::Federated(source)) => {
                target.placement == source.placement
                    && (!target.all_equal || source.all_equal)
                    && target.member.is_assignable_from(&source.member)
            }
            (Type::Abstract(target), Type::Abstract(source)) => target == source,
            _ => false,
        }
    }

    // === Rewrites ===

    /// Same type with every struct container dropped.
    pub fn without_containers(&self) -> Type {
        match self {
            Type::Tensor(_) | Type::Abstract(_) => self.clone(),
            Type::Struct(st) => Type::structure(
                st.elements
                    .iter()
                    .map(|(name, ty)| (name.clone(), ty.without_containers()))
                    .collect(),
            ),
            Type::Sequence(element) => Type::sequence(element.without_containers()),
            Type::Function(ft) => Type::function(
                ft.parameter().map(Type::without_containers),
                ft.result.without_containers(),
            ),
            Type::Federated(ft) => {
                Type::federated(ft.member.without_containers(), ft.placement, ft.all_equal)
            }
        }
    }

    /// Same type with every federated wrapper replaced by its member.
    pub fn without_placement(&self) -> Type {
        match self {
            Type::Tensor(_) | Type::Abstract(_) => self.clone(),
            Type::Struct(st) => Type::Struct(StructType {
                elements: st
                    .elements
                    .iter()
                    .map(|(name, ty)| (name.clone(), ty.without_placement()))
                    .collect(),
                container: st.container,
            }),
            Type::Sequence(element) => Type::sequence(element.without_placement()),
            Type::Function(ft) => Type::function(
                ft.parameter().map(Type::without_placement),
                ft.result.without_placement(),
            ),
            Type::Federated(ft) => ft.member.without_placement(),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Tensor(tt) => {
                write!(f, "{}", tt.dtype)?;
                if !tt.shape.is_empty() {
                    let dims: Vec<String> = tt
                        .shape
                        .iter()
                        .map(|dim| dim.map_or_else(|| "?".to_string(), |d| d.to_string()))
                        .collect();
                    write!(f, "[{}]", dims.join(","))?;
                }
                Ok(())
            }
            Type::Struct(st) => {
                f.write_str("<")?;
                for (i, (name, ty)) in st.elements.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    if let Some(name) = name {
                        write!(f, "{name}=")?;
                    }
                    write!(f, "{ty}")?;
                }
                f.write_str(">")
            }
            Type::Sequence(element) => write!(f, "{element}*"),
            Type::Function(ft) => match ft.parameter() {
                Some(parameter) => write!(f, "({parameter} -> {})", ft.result),
                None => write!(f, "( -> {})", ft.result),
            },
            Type::Federated(ft) => {
                if ft.all_equal {
                    write!(f, "{}@{}", ft.member, ft.placement)
                } else {
                    write!(f, "{{{}}}@{}", ft.member, ft.placement)
                }
            }
            Type::Abstract(label) => f.write_str(label),
        }
    }
}
