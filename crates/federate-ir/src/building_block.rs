//! Building blocks: the nodes of the computation IR.
//!
//! A computation is a tree of immutable [`BuildingBlock`]s shared through
//! [`Comp`] (`Arc<BuildingBlock>`). Every node carries its type, computed
//! bottom-up by the constructors below; a rewrite never mutates a node, it
//! builds a new one and rebuilds the ancestors.
//!
//! # Scoping
//!
//! A `Reference` resolves to the nearest enclosing `Lambda` parameter or
//! `Block` local with the same name. Block locals are sequential: each value
//! sees the locals before it, the result sees all of them. Shadowing is legal
//! in raw trees.
//!
//! # Representations
//!
//! - [`BuildingBlock::compact_representation`] renders one line:
//!   `(let a=data in federated_map(<(x -> x),a>))`
//! - [`BuildingBlock::formatted_representation`] renders blocks and nested
//!   structs across lines, indented by two spaces. Golden files use it.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::kernel::KernelProto;
use crate::types::{Container, StructType, Type};

/// Shared handle to an immutable building block.
pub type Comp = Arc<BuildingBlock>;

/// Field projection used by `Selection`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    Index(usize),
    Name(String),
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Index(index) => write!(f, "[{index}]"),
            Selector::Name(name) => write!(f, ".{name}"),
        }
    }
}

impl From<usize> for Selector {
    fn from(index: usize) -> Self {
        Selector::Index(index)
    }
}

impl From<&str> for Selector {
    fn from(name: &str) -> Self {
        Selector::Name(name.to_string())
    }
}

/// Node variants.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockKind {
    Reference {
        name: String,
    },
    /// Opaque external value.
    Data {
        uri: String,
    },
    Intrinsic {
        uri: String,
    },
    CompiledKernel {
        proto: KernelProto,
    },
    /// The parameter type lives in the node's function type.
    Lambda {
        parameter: Option<String>,
        body: Comp,
    },
    Call {
        function: Comp,
        argument: Option<Comp>,
    },
    Struct {
        elements: Vec<(Option<String>, Comp)>,
    },
    /// `index` is the resolved position of `selector` in the source struct.
    Selection {
        source: Comp,
        selector: Selector,
        index: usize,
    },
    Block {
        locals: Vec<(String, Comp)>,
        result: Comp,
    },
}

/// A typed IR node.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildingBlock {
    kind: BlockKind,
    ty: Type,
}

impl BuildingBlock {
    // === Constructors ===

    pub fn reference(name: impl Into<String>, ty: Type) -> Comp {
        Arc::new(Self {
            kind: BlockKind::Reference { name: name.into() },
            ty,
        })
    }

    pub fn data(uri: impl Into<String>, ty: Type) -> Comp {
        Arc::new(Self {
            kind: BlockKind::Data { uri: uri.into() },
            ty,
        })
    }

    /// Intrinsics are not checked against a registry here; see
    /// [`crate::IntrinsicRegistry::check_signature`].
    pub fn intrinsic(uri: impl Into<String>, ty: Type) -> Comp {
        Arc::new(Self {
            kind: BlockKind::Intrinsic { uri: uri.into() },
            ty,
        })
    }

    pub fn compiled(proto: KernelProto, ty: Type) -> Comp {
        Arc::new(Self {
            kind: BlockKind::CompiledKernel { proto },
            ty,
        })
    }

    pub fn lambda(parameter: impl Into<String>, parameter_type: Type, body: Comp) -> Comp {
        let ty = Type::function(Some(parameter_type), body.ty.clone());
        Arc::new(Self {
            kind: BlockKind::Lambda {
                parameter: Some(parameter.into()),
                body,
            },
            ty,
        })
    }

    pub fn lambda_no_arg(body: Comp) -> Comp {
        let ty = Type::function(None, body.ty.clone());
        Arc::new(Self {
            kind: BlockKind::Lambda {
                parameter: None,
                body,
            },
            ty,
        })
    }

    /// Apply `function` to `argument`.
    ///
    /// Fails unless the argument is present exactly when the function takes
    /// a parameter, and its type is assignable to that parameter.
    pub fn call(function: Comp, argument: Option<Comp>) -> Result<Comp> {
        let ty = {
            let ft = function
                .ty
                .as_function()
                .ok_or_else(|| Error::NotAFunction(function.ty.clone()))?;
            match (ft.parameter(), &argument) {
                (None, Some(_)) => {
                    return Err(Error::UnexpectedArgument {
                        function: function.ty.clone(),
                    })
                }
                (Some(_), None) => {
                    return Err(Error::MissingArgument {
                        function: function.ty.clone(),
                    })
                }
                (Some(parameter), Some(arg)) if !parameter.is_assignable_from(&arg.ty) => {
                    return Err(Error::TypeMismatch {
                        expected: parameter.clone(),
                        found: arg.ty.clone(),
                    })
                }
                _ => ft.result().clone(),
            }
        };
        Ok(Arc::new(Self {
            kind: BlockKind::Call { function, argument },
            ty,
        }))
    }

    /// Struct without a container. Named elements must have distinct names.
    pub fn structure(elements: Vec<(Option<String>, Comp)>) -> Result<Comp> {
        Self::build_struct(elements, None)
    }

    pub fn structure_with_container(
        elements: Vec<(Option<String>, Comp)>,
        container: Container,
    ) -> Result<Comp> {
        Self::build_struct(elements, Some(container))
    }

    /// Struct of unnamed elements.
    pub fn struct_of(values: Vec<Comp>) -> Comp {
        let elements: Vec<(Option<String>, Comp)> =
            values.into_iter().map(|value| (None, value)).collect();
        let ty = Type::Struct(StructType {
            elements: elements
                .iter()
                .map(|(_, value)| (None, value.ty.clone()))
                .collect(),
            container: None,
        });
        Arc::new(Self {
            kind: BlockKind::Struct { elements },
            ty,
        })
    }

    fn build_struct(
        elements: Vec<(Option<String>, Comp)>,
        container: Option<Container>,
    ) -> Result<Comp> {
        let mut seen = HashSet::new();
        for name in elements.iter().filter_map(|(name, _)| name.as_deref()) {
            if !seen.insert(name) {
                return Err(Error::DuplicateBinding {
                    name: name.to_string(),
                });
            }
        }
        let ty = Type::Struct(StructType {
            elements: elements
                .iter()
                .map(|(name, value)| (name.clone(), value.ty.clone()))
                .collect(),
            container,
        });
        Ok(Arc::new(Self {
            kind: BlockKind::Struct { elements },
            ty,
        }))
    }

    pub fn selection(source: Comp, selector: Selector) -> Result<Comp> {
        let invalid = || Error::InvalidSelection {
            selector: selector.to_string(),
            source_type: source.ty.clone(),
        };
        let st = source.ty.as_struct().ok_or_else(invalid)?;
        let index = match &selector {
            Selector::Index(index) if *index < st.len() => *index,
            Selector::Index(_) => return Err(invalid()),
            Selector::Name(name) => st.index_of(name).ok_or_else(invalid)?,
        };
        let ty = st.elements[index].1.clone();
        Ok(Arc::new(Self {
            kind: BlockKind::Selection {
                source,
                selector,
                index,
            },
            ty,
        }))
    }

    pub fn select_index(source: Comp, index: usize) -> Result<Comp> {
        Self::selection(source, Selector::Index(index))
    }

    pub fn select_name(source: Comp, name: &str) -> Result<Comp> {
        Self::selection(source, Selector::from(name))
    }

    pub fn block(locals: Vec<(String, Comp)>, result: Comp) -> Comp {
        let ty = result.ty.clone();
        Arc::new(Self {
            kind: BlockKind::Block { locals, result },
            ty,
        })
    }

    // === Accessors ===

    pub fn kind(&self) -> &BlockKind {
        &self.kind
    }

    pub fn type_signature(&self) -> &Type {
        &self.ty
    }

    /// Parameter type of a lambda or any other function-typed block.
    pub fn parameter_type(&self) -> Option<&Type> {
        self.ty.as_function().and_then(|ft| ft.parameter())
    }

    pub fn reference_name(&self) -> Option<&str> {
        match &self.kind {
            BlockKind::Reference { name } => Some(name),
            _ => None,
        }
    }

    pub fn intrinsic_uri(&self) -> Option<&str> {
        match &self.kind {
            BlockKind::Intrinsic { uri } => Some(uri),
            _ => None,
        }
    }

    /// Direct children in evaluation order.
    pub fn children(&self) -> Vec<&Comp> {
        match &self.kind {
            BlockKind::Reference { .. }
            | BlockKind::Data { .. }
            | BlockKind::Intrinsic { .. }
            | BlockKind::CompiledKernel { .. } => Vec::new(),
            BlockKind::Lambda { body, .. } => vec![body],
            BlockKind::Call { function, argument } => {
                let mut children = vec![function];
                children.extend(argument.iter());
                children
            }
            BlockKind::Struct { elements } => elements.iter().map(|(_, value)| value).collect(),
            BlockKind::Selection { source, .. } => vec![source],
            BlockKind::Block { locals, result } => {
                let mut children: Vec<&Comp> = locals.iter().map(|(_, value)| value).collect();
                children.push(result);
                children
            }
        }
    }

    // === Representations ===

    pub fn compact_representation(&self) -> String {
        match &self.kind {
            BlockKind::Reference { name } => name.clone(),
            BlockKind::Data { uri } | BlockKind::Intrinsic { uri } => uri.clone(),
            BlockKind::CompiledKernel { proto } => format!("comp#{}", proto.name),
            BlockKind::Lambda { parameter, body } => format!(
                "({} -> {})",
                parameter.as_deref().unwrap_or(""),
                body.compact_representation()
            ),
            BlockKind::Call { function, argument } => format!(
                "{}({})",
                function.compact_representation(),
                argument
                    .as_ref()
                    .map(|arg| arg.compact_representation())
                    .unwrap_or_default()
            ),
            BlockKind::Struct { elements } => {
                let rendered: Vec<String> = elements
                    .iter()
                    .map(|(name, value)| with_name(name.as_deref(), value.compact_representation()))
                    .collect();
                format!("<{}>", rendered.join(","))
            }
            BlockKind::Selection {
                source, selector, ..
            } => format!("{}{}", source.compact_representation(), selector),
            BlockKind::Block { locals, result } => {
                let rendered: Vec<String> = locals
                    .iter()
                    .map(|(name, value)| format!("{name}={}", value.compact_representation()))
                    .collect();
                format!(
                    "(let {} in {})",
                    rendered.join(","),
                    result.compact_representation()
                )
            }
        }
    }

    pub fn formatted_representation(&self) -> String {
        self.formatted_lines().join("\n")
    }

    fn formatted_lines(&self) -> Vec<String> {
        match &self.kind {
            BlockKind::Reference { .. }
            | BlockKind::Data { .. }
            | BlockKind::Intrinsic { .. }
            | BlockKind::CompiledKernel { .. } => vec![self.compact_representation()],
            BlockKind::Lambda { parameter, body } => {
                let parameter = parameter.as_deref().unwrap_or("");
                let body_lines = body.formatted_lines();
                if body_lines.len() == 1 {
                    return vec![format!("({parameter} -> {})", body_lines[0])];
                }
                let mut lines = vec![format!("({parameter} ->")];
                lines.extend(indent(body_lines, 2));
                lines.push(")".to_string());
                lines
            }
            BlockKind::Call { function, argument } => {
                let mut lines = function.formatted_lines();
                let arg_lines = argument
                    .as_ref()
                    .map(|arg| arg.formatted_lines())
                    .unwrap_or_default();
                if lines.len() == 1 && arg_lines.len() <= 1 {
                    let arg = arg_lines.first().map(String::as_str).unwrap_or("");
                    return vec![format!("{}({arg})", lines[0])];
                }
                if let Some(last) = lines.last_mut() {
                    last.push('(');
                }
                lines.extend(indent(arg_lines, 2));
                lines.push(")".to_string());
                lines
            }
            BlockKind::Struct { elements } => {
                let rendered: Vec<Vec<String>> = elements
                    .iter()
                    .map(|(name, value)| {
                        let mut lines = value.formatted_lines();
                        if let Some(first) = lines.first_mut() {
                            *first = with_name(name.as_deref(), std::mem::take(first));
                        }
                        lines
                    })
                    .collect();
                if rendered.iter().all(|lines| lines.len() == 1) {
                    let flat: Vec<&str> = rendered.iter().map(|lines| lines[0].as_str()).collect();
                    return vec![format!("<{}>", flat.join(","))];
                }
                let mut lines = vec!["<".to_string()];
                let count = rendered.len();
                for (i, mut element) in rendered.into_iter().enumerate() {
                    if i + 1 < count {
                        if let Some(last) = element.last_mut() {
                            last.push(',');
                        }
                    }
                    lines.extend(indent(element, 2));
                }
                lines.push(">".to_string());
                lines
            }
            BlockKind::Selection {
                source, selector, ..
            } => {
                let mut lines = source.formatted_lines();
                if let Some(last) = lines.last_mut() {
                    last.push_str(&selector.to_string());
                }
                lines
            }
            BlockKind::Block { locals, result } => {
                let mut lines = vec!["(let".to_string()];
                for (i, (name, value)) in locals.iter().enumerate() {
                    let mut local = value.formatted_lines();
                    if let Some(first) = local.first_mut() {
                        *first = format!("{name}={first}");
                    }
                    if i + 1 < locals.len() {
                        if let Some(last) = local.last_mut() {
                            last.push(',');
                        }
                    }
                    lines.extend(indent(local, 2));
                }
                let mut result_lines = result.formatted_lines().into_iter();
                if let Some(first) = result_lines.next() {
                    lines.push(format!(" in {first}"));
                }
                lines.extend(result_lines.map(|line| format!("    {line}")));
                if let Some(last) = lines.last_mut() {
                    last.push(')');
                }
                lines
            }
        }
    }
}

impl fmt::Display for BuildingBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.compact_representation())
    }
}

fn with_name(name: Option<&str>, rendered: String) -> String {
    match name {
        Some(name) => format!("{name}={rendered}"),
        None => rendered,
    }
}

fn indent(lines: Vec<String>, width: usize) -> impl Iterator<Item = String> {
    let pad = " ".repeat(width);
    lines.into_iter().map(move |line| format!("{pad}{line}"))
}
