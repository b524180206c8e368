//! Configured pass sequences.

use federate_ir::{Comp, IntrinsicRegistry, Result};
use tracing::{debug, info, instrument};

use crate::analysis::{check_contains_no_reducible_intrinsics, check_has_unique_names};
use crate::config::{PassKind, PipelineConfig};
use crate::intrinsic_bodies::{
    replace_intrinsics_with_bodies, replace_secure_intrinsics_with_insecure_bodies, BodyTable,
};
use crate::tree_transformations::{
    remove_mapped_or_applied_identity, remove_unused_block_locals, strip_placement,
    uniquify_reference_names_with_prefix,
};

/// Runs the passes named in a [`PipelineConfig`] in order.
///
/// Postconditions are checked between passes: no reducible intrinsic after
/// body replacement, unique names after uniquification.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    registry: IntrinsicRegistry,
    bodies: BodyTable,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self::with_tables(config, IntrinsicRegistry::standard(), BodyTable::standard())
    }

    pub fn with_tables(config: PipelineConfig, registry: IntrinsicRegistry, bodies: BodyTable) -> Self {
        Self {
            config,
            registry,
            bodies,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &IntrinsicRegistry {
        &self.registry
    }

    pub fn bodies(&self) -> &BodyTable {
        &self.bodies
    }

    /// Apply every configured pass; `modified` is true if any pass changed
    /// the tree.
    #[instrument(skip_all, fields(passes = self.config.passes.len()))]
    pub fn run(&self, comp: &Comp) -> Result<(Comp, bool)> {
        let mut current = comp.clone();
        let mut modified = false;
        for &pass in &self.config.passes {
            let (next, changed) = self.run_pass(pass, &current)?;
            debug!(pass = %pass, changed, "pass complete");
            modified |= changed;
            current = next;
        }
        info!(modified, "pipeline complete");
        Ok((current, modified))
    }

    pub fn run_pass(&self, pass: PassKind, comp: &Comp) -> Result<(Comp, bool)> {
        match pass {
            PassKind::RemoveMappedOrAppliedIdentity => remove_mapped_or_applied_identity(comp),
            PassKind::RemoveUnusedBlockLocals => remove_unused_block_locals(comp),
            PassKind::UniquifyReferenceNames => {
                let result = uniquify_reference_names_with_prefix(comp, &self.config.name_prefix)?;
                check_has_unique_names(&result.0)?;
                Ok(result)
            }
            PassKind::StripPlacement => strip_placement(comp, &self.registry),
            PassKind::ReplaceIntrinsicsWithBodies => {
                let result = replace_intrinsics_with_bodies(comp, &self.bodies)?;
                check_contains_no_reducible_intrinsics(&result.0, &self.bodies)?;
                Ok(result)
            }
            PassKind::ReplaceSecureIntrinsicsWithInsecureBodies => {
                replace_secure_intrinsics_with_insecure_bodies(comp, &self.bodies)
            }
        }
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}
