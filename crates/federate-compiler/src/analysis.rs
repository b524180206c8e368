//! Read-only tree analysis.
//!
//! Traversals never mutate; they feed validation between passes and the
//! bookkeeping (free variables, names, placements) that rewrites rely on.
//!
//! # Design
//!
//! - **Closure visitors** - callers pass `FnMut(&Comp) -> Result<()>`; the
//!   first error stops the walk
//! - **Two orders** - pre-order visits a node before its children,
//!   post-order after
//! - **Scoping** - free-variable analysis follows block semantics: a local is
//!   visible to later locals and to the result, not to its own value

use std::collections::BTreeSet;
use std::collections::HashSet;

use federate_ir::{BlockKind, BuildingBlock, Comp, Error, IntrinsicRegistry, Placement, Result};

use crate::intrinsic_bodies::BodyTable;

/// Visit every node, parents first.
pub fn visit_preorder<F>(comp: &Comp, visitor: &mut F) -> Result<()>
where
    F: FnMut(&Comp) -> Result<()>,
{
    visitor(comp)?;
    for child in comp.children() {
        visit_preorder(child, visitor)?;
    }
    Ok(())
}

/// Visit every node, children first.
pub fn visit_postorder<F>(comp: &Comp, visitor: &mut F) -> Result<()>
where
    F: FnMut(&Comp) -> Result<()>,
{
    for child in comp.children() {
        visit_postorder(child, visitor)?;
    }
    visitor(comp)
}

/// Number of nodes satisfying `predicate`.
pub fn count<P>(comp: &Comp, predicate: P) -> usize
where
    P: Fn(&BuildingBlock) -> bool,
{
    fn walk<P: Fn(&BuildingBlock) -> bool>(comp: &BuildingBlock, predicate: &P) -> usize {
        let own = usize::from(predicate(comp));
        own + comp
            .children()
            .into_iter()
            .map(|child| walk(child, predicate))
            .sum::<usize>()
    }
    walk(comp, &predicate)
}

pub fn count_intrinsics(comp: &Comp, uri: &str) -> usize {
    count(comp, |node| node.intrinsic_uri() == Some(uri))
}

pub fn contains_federated_types(comp: &Comp) -> bool {
    count(comp, |node| node.type_signature().contains_federated()) > 0
}

/// Names referenced in `comp` and not bound inside it.
pub fn free_variables(comp: &BuildingBlock) -> BTreeSet<String> {
    match comp.kind() {
        BlockKind::Reference { name } => BTreeSet::from([name.clone()]),
        BlockKind::Data { .. } | BlockKind::Intrinsic { .. } | BlockKind::CompiledKernel { .. } => {
            BTreeSet::new()
        }
        BlockKind::Lambda { parameter, body } => {
            let mut free = free_variables(body);
            if let Some(parameter) = parameter {
                free.remove(parameter);
            }
            free
        }
        BlockKind::Block { locals, result } => {
            let mut free = free_variables(result);
            for (name, value) in locals.iter().rev() {
                free.remove(name);
                free.extend(free_variables(value));
            }
            free
        }
        BlockKind::Call { .. } | BlockKind::Struct { .. } | BlockKind::Selection { .. } => comp
            .children()
            .into_iter()
            .flat_map(|child| free_variables(child))
            .collect(),
    }
}

/// Every binder name (lambda parameters and block locals) in tree order.
pub fn bound_names(comp: &Comp) -> Vec<String> {
    fn walk(comp: &BuildingBlock, names: &mut Vec<String>) {
        match comp.kind() {
            BlockKind::Lambda {
                parameter: Some(name),
                ..
            } => names.push(name.clone()),
            BlockKind::Block { locals, .. } => {
                names.extend(locals.iter().map(|(name, _)| name.clone()))
            }
            _ => {}
        }
        for child in comp.children() {
            walk(child, names);
        }
    }
    let mut names = Vec::new();
    walk(comp, &mut names);
    names
}

/// Fail if any name is bound more than once anywhere in the tree.
pub fn check_has_unique_names(comp: &Comp) -> Result<()> {
    let mut seen = HashSet::new();
    for name in bound_names(comp) {
        if !seen.insert(name.clone()) {
            return Err(Error::DuplicateBinding { name });
        }
    }
    Ok(())
}

/// The single placement used by `comp`, if any.
///
/// Collects the placement of every federated type reachable from every
/// node's type signature and fails on the first second placement found.
pub fn check_has_single_placement(comp: &Comp) -> Result<Option<Placement>> {
    let mut found = None;
    visit_preorder(comp, &mut |node| record_placements(node, &mut found))?;
    Ok(found)
}

pub(crate) fn record_placements(node: &BuildingBlock, found: &mut Option<Placement>) -> Result<()> {
    let mut placements = Vec::new();
    node.type_signature().collect_placements(&mut placements);
    for placement in placements {
        match *found {
            None => *found = Some(placement),
            Some(first) if first != placement => {
                return Err(Error::MultiplePlacements {
                    first,
                    second: placement,
                })
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Fail if any intrinsic still has a non-secure body in `bodies`.
pub fn check_contains_no_reducible_intrinsics(comp: &Comp, bodies: &BodyTable) -> Result<()> {
    visit_preorder(comp, &mut |node| match node.intrinsic_uri() {
        Some(uri) if bodies.is_reducible(uri) => Err(Error::DisallowedIntrinsic {
            uri: uri.to_string(),
        }),
        _ => Ok(()),
    })
}

/// Check every intrinsic against its registered signature.
pub fn check_intrinsic_signatures(comp: &Comp, registry: &IntrinsicRegistry) -> Result<()> {
    visit_preorder(comp, &mut |node| {
        if let Some(uri) = node.intrinsic_uri() {
            registry.check_signature(uri, node.type_signature())?;
        }
        Ok(())
    })
}

/// Fail on the first reference not bound by an enclosing binder.
pub fn check_is_closed(comp: &Comp) -> Result<()> {
    match free_variables(comp).into_iter().next() {
        Some(name) => Err(Error::UnboundReference { name }),
        None => Ok(()),
    }
}
