//! Generic rewriting machinery shared by every pass.
//!
//! # Design
//!
//! Trees are immutable. A rewrite returns `(new_tree, modified)`; when any
//! child changes, every ancestor is rebuilt through the checked
//! constructors so types stay consistent bottom-up. Unchanged subtrees are
//! shared, not copied.

use std::collections::HashMap;

use federate_ir::{BlockKind, BuildingBlock, Comp, Result};

/// A node rewrite with an applicability filter.
pub trait Transformation {
    fn should_transform(&self, comp: &BuildingBlock) -> bool;

    fn transform(&mut self, comp: Comp) -> Result<(Comp, bool)>;
}

/// Apply `transformation` bottom-up to every node it accepts.
pub fn apply_transformation<T: Transformation>(
    comp: &Comp,
    transformation: &mut T,
) -> Result<(Comp, bool)> {
    transform_postorder(comp, &mut |node| {
        if transformation.should_transform(&node) {
            transformation.transform(node)
        } else {
            Ok((node, false))
        }
    })
}

/// Rewrite children before their parent.
///
/// `transform` sees each node after its children were rewritten. The result
/// reports `true` iff any node anywhere changed.
pub fn transform_postorder<F>(comp: &Comp, transform: &mut F) -> Result<(Comp, bool)>
where
    F: FnMut(Comp) -> Result<(Comp, bool)>,
{
    let mut children_changed = false;
    let mut children = Vec::new();
    for child in comp.children() {
        let (child, changed) = transform_postorder(child, transform)?;
        children_changed |= changed;
        children.push(child);
    }
    let node = if children_changed {
        replace_children(comp, children)?
    } else {
        comp.clone()
    };
    let (node, changed) = transform(node)?;
    Ok((node, changed || children_changed))
}

/// Rewrite parents before their children.
///
/// When `transform` reports a change for a node, its (new) subtree is not
/// visited.
pub fn transform_preorder<F>(comp: &Comp, transform: &mut F) -> Result<(Comp, bool)>
where
    F: FnMut(Comp) -> Result<(Comp, bool)>,
{
    let (node, changed) = transform(comp.clone())?;
    if changed {
        return Ok((node, true));
    }
    let mut children_changed = false;
    let mut children = Vec::new();
    for child in node.children() {
        let (child, changed) = transform_preorder(child, transform)?;
        children_changed |= changed;
        children.push(child);
    }
    if children_changed {
        Ok((replace_children(&node, children)?, true))
    } else {
        Ok((node, false))
    }
}

/// Rebuild `comp` with `children` in [`BuildingBlock::children`] order.
///
/// Lambda parameter types, struct names and containers, selectors and block
/// local names are kept from `comp`.
pub fn replace_children(comp: &Comp, children: Vec<Comp>) -> Result<Comp> {
    let mut children = children.into_iter();
    let mut next = || {
        children.next().ok_or_else(|| {
            federate_ir::Error::InvalidComputation(format!(
                "too few children to rebuild {}",
                comp.compact_representation()
            ))
        })
    };
    let rebuilt = match comp.kind() {
        BlockKind::Reference { .. }
        | BlockKind::Data { .. }
        | BlockKind::Intrinsic { .. }
        | BlockKind::CompiledKernel { .. } => comp.clone(),
        BlockKind::Lambda { parameter, .. } => {
            let body = next()?;
            match (parameter, comp.parameter_type()) {
                (Some(name), Some(ty)) => BuildingBlock::lambda(name.clone(), ty.clone(), body),
                _ => BuildingBlock::lambda_no_arg(body),
            }
        }
        BlockKind::Call { argument, .. } => {
            let function = next()?;
            let argument = match argument {
                Some(_) => Some(next()?),
                None => None,
            };
            BuildingBlock::call(function, argument)?
        }
        BlockKind::Struct { elements } => {
            let mut rebuilt = Vec::with_capacity(elements.len());
            for (name, _) in elements {
                rebuilt.push((name.clone(), next()?));
            }
            rebuild_struct(comp, rebuilt)?
        }
        BlockKind::Selection { selector, .. } => {
            BuildingBlock::selection(next()?, selector.clone())?
        }
        BlockKind::Block { locals, .. } => {
            let mut rebuilt = Vec::with_capacity(locals.len());
            for (name, _) in locals {
                rebuilt.push((name.clone(), next()?));
            }
            BuildingBlock::block(rebuilt, next()?)
        }
    };
    Ok(rebuilt)
}

/// Struct with the container recorded in `original`'s type.
pub(crate) fn rebuild_struct(
    original: &BuildingBlock,
    elements: Vec<(Option<String>, Comp)>,
) -> Result<Comp> {
    match original.type_signature().as_struct().and_then(|st| st.container) {
        Some(container) => BuildingBlock::structure_with_container(elements, container),
        None => BuildingBlock::structure(elements),
    }
}

/// Nested symbol tables, innermost scope last.
#[derive(Debug, Clone)]
pub struct ScopeStack<T> {
    scopes: Vec<HashMap<String, T>>,
}

impl<T> Default for ScopeStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ScopeStack<T> {
    /// A stack holding one (outermost) scope.
    pub fn new() -> Self {
        Self {
            scopes: vec![HashMap::new()],
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    /// Pop the innermost scope. The outermost scope is never popped.
    pub fn pop_scope(&mut self) -> Option<HashMap<String, T>> {
        if self.scopes.len() > 1 {
            self.scopes.pop()
        } else {
            None
        }
    }

    /// Bind `name` in the innermost scope.
    pub fn insert(&mut self, name: impl Into<String>, value: T) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.into(), value);
        }
    }

    /// Innermost binding of `name`.
    pub fn lookup(&self, name: &str) -> Option<&T> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    /// Current depth; 0 is the outermost scope.
    pub fn depth(&self) -> usize {
        self.scopes.len() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use federate_ir::{Container, Type};

    fn int_data(uri: &str) -> Comp {
        BuildingBlock::data(uri, Type::int32())
    }

    /// Renames data `a` to `b`.
    fn rename_a(node: Comp) -> Result<(Comp, bool)> {
        match node.kind() {
            BlockKind::Data { uri } if uri == "a" => Ok((int_data("b"), true)),
            _ => Ok((node, false)),
        }
    }

    #[test]
    fn postorder_rebuilds_ancestors() {
        let lam = BuildingBlock::lambda("x", Type::int32(), int_data("a"));
        let tree = BuildingBlock::struct_of(vec![lam, int_data("c")]);
        let (result, modified) = transform_postorder(&tree, &mut rename_a).unwrap();
        assert!(modified);
        assert_eq!(result.compact_representation(), "<(x -> b),c>");
        assert_eq!(tree.compact_representation(), "<(x -> a),c>");
    }

    #[test]
    fn postorder_visits_children_first() {
        let tree = BuildingBlock::block(vec![("x".to_string(), int_data("a"))], int_data("c"));
        let mut order = Vec::new();
        transform_postorder(&tree, &mut |node| {
            order.push(node.compact_representation());
            Ok((node, false))
        })
        .unwrap();
        assert_eq!(order, vec!["a", "c", "(let x=a in c)"]);
    }

    #[test]
    fn unchanged_tree_is_shared() {
        let tree = BuildingBlock::struct_of(vec![int_data("c"), int_data("d")]);
        let (result, modified) = transform_postorder(&tree, &mut rename_a).unwrap();
        assert!(!modified);
        assert!(std::sync::Arc::ptr_eq(&tree, &result));
    }

    #[test]
    fn preorder_stops_at_changed_node() {
        let inner = BuildingBlock::struct_of(vec![int_data("a")]);
        let tree = BuildingBlock::struct_of(vec![inner, int_data("a")]);
        let mut visited = 0;
        let (result, modified) = transform_preorder(&tree, &mut |node| {
            visited += 1;
            if node.type_signature().as_struct().map(|st| st.len()) == Some(1) {
                return Ok((int_data("z"), true));
            }
            rename_a(node)
        })
        .unwrap();
        assert!(modified);
        assert_eq!(result.compact_representation(), "<z,b>");
        // root, inner struct, trailing data
        assert_eq!(visited, 3);
    }

    #[test]
    fn rebuild_keeps_container() {
        let tuple = BuildingBlock::structure_with_container(
            vec![(Some("x".to_string()), int_data("a"))],
            Container::Tuple,
        )
        .unwrap();
        let (result, _) = transform_postorder(&tuple, &mut rename_a).unwrap();
        assert_eq!(
            result.type_signature().as_struct().and_then(|st| st.container),
            Some(Container::Tuple)
        );
        assert_eq!(result.compact_representation(), "<x=b>");
    }

    struct DropData;

    impl Transformation for DropData {
        fn should_transform(&self, comp: &BuildingBlock) -> bool {
            matches!(comp.kind(), BlockKind::Data { .. })
        }

        fn transform(&mut self, comp: Comp) -> Result<(Comp, bool)> {
            rename_a(comp)
        }
    }

    #[test]
    fn apply_transformation_filters_nodes() {
        let tree = BuildingBlock::struct_of(vec![int_data("a"), int_data("q")]);
        let (result, modified) = apply_transformation(&tree, &mut DropData).unwrap();
        assert!(modified);
        assert_eq!(result.compact_representation(), "<b,q>");
    }

    #[test]
    fn scope_stack_resolves_innermost() {
        let mut scopes = ScopeStack::new();
        scopes.insert("a", 1);
        scopes.push_scope();
        scopes.insert("a", 2);
        assert_eq!(scopes.lookup("a"), Some(&2));
        assert_eq!(scopes.depth(), 1);
        scopes.pop_scope();
        assert_eq!(scopes.lookup("a"), Some(&1));
        assert!(scopes.pop_scope().is_none());
        assert_eq!(scopes.lookup("b"), None);
    }
}
