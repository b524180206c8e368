//! Placement stripping.
//!
//! Lowers a tree whose federated values all live at one placement to an
//! equivalent unplaced tree. Federated types lose their wrapper, single
//! placement intrinsics become direct code:
//!
//! | intrinsic                         | stripped form        |
//! |-----------------------------------|----------------------|
//! | `federated_map(<f,v>)`, `apply`   | `f(v)`               |
//! | `federated_value_at_*(v)`         | `v`                  |
//! | `federated_zip_at_*(<a,b>)`       | `<a,b>`              |
//! | `federated_eval_at_*(f)`          | `f()`                |
//!
//! Every other intrinsic is rejected before any rewriting starts.

use federate_ir::{
    uri, BlockKind, BuildingBlock, Comp, Error, IntrinsicRegistry, NameGenerator,
    PlacementBehavior, Result, Type,
};
use tracing::{debug, instrument};

use crate::analysis::{record_placements, visit_preorder};
use crate::transformation_utils::rebuild_struct;

/// Strip placements from `comp`.
///
/// Fails with [`Error::DisallowedIntrinsic`] for intrinsics that move values
/// between placements (or have no placement at all), and with
/// [`Error::MultiplePlacements`] when the tree mentions both placements.
#[instrument(skip_all)]
pub fn strip_placement(comp: &Comp, registry: &IntrinsicRegistry) -> Result<(Comp, bool)> {
    check_strippable(comp, registry)?;
    let mut stripper = Stripper {
        names: NameGenerator::for_tree(comp, federate_ir::names::DEFAULT_PREFIX),
    };
    let (result, modified) = stripper.strip(comp)?;
    debug!(modified, "strip_placement");
    Ok((result, modified))
}

fn check_strippable(comp: &Comp, registry: &IntrinsicRegistry) -> Result<()> {
    let mut placement = None;
    visit_preorder(comp, &mut |node| {
        if let Some(uri) = node.intrinsic_uri() {
            let strippable = registry
                .get(uri)
                .is_some_and(|def| def.placement == PlacementBehavior::SinglePlacement);
            if !strippable {
                return Err(Error::DisallowedIntrinsic {
                    uri: uri.to_string(),
                });
            }
        }
        record_placements(node, &mut placement)
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stripped {
    Apply,
    Identity,
    Eval,
}

fn classify(intrinsic: &str) -> Option<Stripped> {
    match intrinsic {
        uri::FEDERATED_MAP | uri::FEDERATED_MAP_ALL_EQUAL | uri::FEDERATED_APPLY => {
            Some(Stripped::Apply)
        }
        uri::FEDERATED_VALUE_AT_CLIENTS
        | uri::FEDERATED_VALUE_AT_SERVER
        | uri::FEDERATED_ZIP_AT_CLIENTS
        | uri::FEDERATED_ZIP_AT_SERVER => Some(Stripped::Identity),
        uri::FEDERATED_EVAL_AT_CLIENTS | uri::FEDERATED_EVAL_AT_SERVER => Some(Stripped::Eval),
        _ => None,
    }
}

struct Stripper {
    names: NameGenerator,
}

impl Stripper {
    fn strip(&mut self, comp: &Comp) -> Result<(Comp, bool)> {
        let ty = comp.type_signature();
        match comp.kind() {
            BlockKind::Reference { name } => {
                let stripped = ty.without_placement();
                if &stripped == ty {
                    return Ok((comp.clone(), false));
                }
                Ok((BuildingBlock::reference(name.clone(), stripped), true))
            }
            BlockKind::Data { uri } => {
                let stripped = ty.without_placement();
                if &stripped == ty {
                    return Ok((comp.clone(), false));
                }
                Ok((BuildingBlock::data(uri.clone(), stripped), true))
            }
            BlockKind::CompiledKernel { proto } => {
                let stripped = ty.without_placement();
                if &stripped == ty {
                    return Ok((comp.clone(), false));
                }
                Ok((BuildingBlock::compiled(proto.clone(), stripped), true))
            }
            BlockKind::Intrinsic { uri } => Ok((self.helper_lambda(uri, ty)?, true)),
            BlockKind::Lambda { parameter, body } => {
                let (body, body_changed) = self.strip(body)?;
                match (parameter, comp.parameter_type()) {
                    (Some(name), Some(parameter_type)) => {
                        let stripped = parameter_type.without_placement();
                        if !body_changed && &stripped == parameter_type {
                            return Ok((comp.clone(), false));
                        }
                        Ok((BuildingBlock::lambda(name.clone(), stripped, body), true))
                    }
                    _ if body_changed => Ok((BuildingBlock::lambda_no_arg(body), true)),
                    _ => Ok((comp.clone(), false)),
                }
            }
            BlockKind::Call { function, argument } => {
                if let (Some(intrinsic), Some(argument)) = (function.intrinsic_uri(), argument) {
                    if let Some(kind) = classify(intrinsic) {
                        let (argument, _) = self.strip(argument)?;
                        return Ok((self.strip_intrinsic_call(kind, argument)?, true));
                    }
                }
                let (function, function_changed) = self.strip(function)?;
                let (argument, argument_changed) = match argument {
                    Some(argument) => {
                        let (argument, changed) = self.strip(argument)?;
                        (Some(argument), changed)
                    }
                    None => (None, false),
                };
                if !function_changed && !argument_changed {
                    return Ok((comp.clone(), false));
                }
                Ok((BuildingBlock::call(function, argument)?, true))
            }
            BlockKind::Struct { elements } => {
                let mut changed = false;
                let mut stripped = Vec::with_capacity(elements.len());
                for (name, value) in elements {
                    let (value, value_changed) = self.strip(value)?;
                    changed |= value_changed;
                    stripped.push((name.clone(), value));
                }
                if !changed {
                    return Ok((comp.clone(), false));
                }
                Ok((rebuild_struct(comp, stripped)?, true))
            }
            BlockKind::Selection {
                source, selector, ..
            } => {
                let (source, changed) = self.strip(source)?;
                if !changed {
                    return Ok((comp.clone(), false));
                }
                Ok((BuildingBlock::selection(source, selector.clone())?, true))
            }
            BlockKind::Block { locals, result } => {
                let mut changed = false;
                let mut stripped = Vec::with_capacity(locals.len());
                for (name, value) in locals {
                    let (value, value_changed) = self.strip(value)?;
                    changed |= value_changed;
                    stripped.push((name.clone(), value));
                }
                let (result, result_changed) = self.strip(result)?;
                if !changed && !result_changed {
                    return Ok((comp.clone(), false));
                }
                Ok((BuildingBlock::block(stripped, result), true))
            }
        }
    }

    /// `argument` is already stripped.
    fn strip_intrinsic_call(&mut self, kind: Stripped, argument: Comp) -> Result<Comp> {
        match kind {
            Stripped::Apply => {
                let (function, value) = match argument.kind() {
                    BlockKind::Struct { elements } if elements.len() == 2 => {
                        (elements[0].1.clone(), elements[1].1.clone())
                    }
                    _ => (
                        BuildingBlock::select_index(argument.clone(), 0)?,
                        BuildingBlock::select_index(argument, 1)?,
                    ),
                };
                BuildingBlock::call(function, Some(value))
            }
            Stripped::Identity => Ok(argument),
            Stripped::Eval => BuildingBlock::call(argument, None),
        }
    }

    /// A lambda computing what a call of the bare intrinsic `uri` would.
    fn helper_lambda(&mut self, uri: &str, ty: &Type) -> Result<Comp> {
        let kind = classify(uri).ok_or_else(|| Error::DisallowedIntrinsic {
            uri: uri.to_string(),
        })?;
        let parameter_type = ty
            .as_function()
            .and_then(|ft| ft.parameter())
            .map(Type::without_placement)
            .ok_or_else(|| Error::NotAFunction(ty.clone()))?;
        let name = self.names.next_name();
        let parameter = BuildingBlock::reference(name.clone(), parameter_type.clone());
        let body = self.strip_intrinsic_call(kind, parameter)?;
        Ok(BuildingBlock::lambda(name, parameter_type, body))
    }
}
