//! Tree transformations - local rewrites over building-block trees
//!
//! Every pass takes a tree and returns `(tree, modified)`. Passes never
//! mutate their input and never return a partially rewritten tree: the
//! first violation aborts the pass with an error.
//!
//! - [`remove_mapped_or_applied_identity`] drops maps of identity lambdas
//! - [`remove_unused_block_locals`] drops block locals nothing references
//! - [`uniquify_reference_names`] makes every bound name globally unique
//! - [`strip_placement`] lowers a single-placement tree to unplaced code
//!
//! # Pipeline Position
//!
//! ```text
//! Build → Replace intrinsic bodies → Tree transformations → Execute
//!                                    ^^^^^^^^^^^^^^^^^^^^
//! ```

mod strip;
mod uniquify;


pub use strip::strip_placement;
pub use uniquify::{
    uniquify_reference_names, uniquify_reference_names_with, uniquify_reference_names_with_prefix,
};

use federate_ir::{uri, BlockKind, BuildingBlock, Comp, Result};
use tracing::{debug, instrument};

use crate::analysis::free_variables;
use crate::transformation_utils::{apply_transformation, transform_postorder, Transformation};

/// Intrinsics whose first argument is applied pointwise to the second.
const MAP_LIKE: [&str; 4] = [
    uri::FEDERATED_MAP,
    uri::FEDERATED_MAP_ALL_EQUAL,
    uri::FEDERATED_APPLY,
    uri::SEQUENCE_MAP,
];

/// Rewrite `federated_map(<(x -> x), v>)` and its apply/sequence forms to `v`.
#[instrument(skip_all)]
pub fn remove_mapped_or_applied_identity(comp: &Comp) -> Result<(Comp, bool)> {
    let (result, modified) = transform_postorder(comp, &mut |node| {
        match mapped_identity_argument(&node) {
            Some(value) => Ok((value, true)),
            None => Ok((node, false)),
        }
    })?;
    debug!(modified, "remove_mapped_or_applied_identity");
    Ok((result, modified))
}

fn mapped_identity_argument(node: &BuildingBlock) -> Option<Comp> {
    let BlockKind::Call {
        function,
        argument: Some(argument),
    } = node.kind()
    else {
        return None;
    };
    if !function
        .intrinsic_uri()
        .is_some_and(|uri| MAP_LIKE.contains(&uri))
    {
        return None;
    }
    let BlockKind::Struct { elements } = argument.kind() else {
        return None;
    };
    let [(_, mapped), (_, value)] = elements.as_slice() else {
        return None;
    };
    let is_identity = match mapped.kind() {
        BlockKind::Lambda {
            parameter: Some(parameter),
            body,
        } => body.reference_name() == Some(parameter.as_str()),
        _ => false,
    };
    (is_identity && value.type_signature().is_identical_to(node.type_signature()))
        .then(|| value.clone())
}

/// Drops block locals that neither the result nor a surviving later local
/// references. A block left without locals collapses to its result.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveUnusedBlockLocals;

impl Transformation for RemoveUnusedBlockLocals {
    fn should_transform(&self, comp: &BuildingBlock) -> bool {
        matches!(comp.kind(), BlockKind::Block { .. })
    }

    fn transform(&mut self, comp: Comp) -> Result<(Comp, bool)> {
        let BlockKind::Block { locals, result } = comp.kind() else {
            return Ok((comp, false));
        };
        let mut needed = free_variables(result);
        let mut kept = Vec::with_capacity(locals.len());
        for (name, value) in locals.iter().rev() {
            if needed.remove(name) {
                needed.extend(free_variables(value));
                kept.push((name.clone(), value.clone()));
            } else {
                debug!(name = %name, "dropping unused local");
            }
        }
        // Also covers blocks that had no locals to begin with.
        if kept.is_empty() {
            return Ok((result.clone(), true));
        }
        if kept.len() == locals.len() {
            return Ok((comp, false));
        }
        kept.reverse();
        Ok((BuildingBlock::block(kept, result.clone()), true))
    }
}

#[instrument(skip_all)]
pub fn remove_unused_block_locals(comp: &Comp) -> Result<(Comp, bool)> {
    let (result, modified) = apply_transformation(comp, &mut RemoveUnusedBlockLocals)?;
    debug!(modified, "remove_unused_block_locals");
    Ok((result, modified))
}
