//! Reference-name uniquification.

use std::collections::HashSet;

use federate_ir::names::DEFAULT_PREFIX;
use federate_ir::{BlockKind, BuildingBlock, Comp, Error, NameGenerator, Result};
use tracing::{debug, instrument};

use crate::analysis::free_variables;
use crate::transformation_utils::{replace_children, ScopeStack};

/// Make every bound name in `comp` globally unique.
///
/// The first binding of a name is kept unless it collides with a free
/// reference; later bindings of the same name get fresh `_var<n>` names.
/// References follow their binder; free references are never renamed.
pub fn uniquify_reference_names(comp: &Comp) -> Result<(Comp, bool)> {
    uniquify_reference_names_with_prefix(comp, DEFAULT_PREFIX)
}

/// [`uniquify_reference_names`] with fresh names `<prefix><n>`.
#[instrument(skip(comp))]
pub fn uniquify_reference_names_with_prefix(comp: &Comp, prefix: &str) -> Result<(Comp, bool)> {
    let mut names = NameGenerator::for_tree(comp, prefix);
    let mut renamer = Renamer::new(comp, &mut names, true);
    let result = renamer.rename(comp)?;
    let modified = renamer.modified;
    debug!(modified, "uniquify_reference_names");
    Ok((result, modified))
}

/// Rename every binder in `comp` with names drawn from `names`.
///
/// Names occurring free in `comp` are reserved in `names` first.
pub fn uniquify_reference_names_with(
    comp: &Comp,
    names: &mut NameGenerator,
) -> Result<(Comp, bool)> {
    let mut renamer = Renamer::new(comp, names, false);
    let result = renamer.rename(comp)?;
    Ok((result, renamer.modified))
}

struct Renamer<'a> {
    names: &'a mut NameGenerator,
    scopes: ScopeStack<String>,
    /// Binder names already handed out, plus the tree's free names.
    used: HashSet<String>,
    keep_first: bool,
    modified: bool,
}

impl<'a> Renamer<'a> {
    fn new(comp: &Comp, names: &'a mut NameGenerator, keep_first: bool) -> Self {
        let used: HashSet<String> = free_variables(comp).into_iter().collect();
        for name in &used {
            names.reserve(name.clone());
        }
        Self {
            names,
            scopes: ScopeStack::new(),
            used,
            keep_first,
            modified: false,
        }
    }

    fn bind(&mut self, name: &str) -> String {
        let fresh = if self.keep_first && !self.used.contains(name) {
            name.to_string()
        } else {
            self.names.next_name()
        };
        if fresh != name {
            self.modified = true;
        }
        self.used.insert(fresh.clone());
        self.scopes.insert(name, fresh.clone());
        fresh
    }

    fn rename(&mut self, comp: &Comp) -> Result<Comp> {
        match comp.kind() {
            BlockKind::Reference { name } => match self.scopes.lookup(name) {
                Some(renamed) if renamed != name => Ok(BuildingBlock::reference(
                    renamed.clone(),
                    comp.type_signature().clone(),
                )),
                _ => Ok(comp.clone()),
            },
            BlockKind::Data { .. } | BlockKind::Intrinsic { .. } | BlockKind::CompiledKernel { .. } => {
                Ok(comp.clone())
            }
            BlockKind::Lambda {
                parameter: Some(parameter),
                body,
            } => {
                self.scopes.push_scope();
                let fresh = self.bind(parameter);
                let body = self.rename(body);
                self.scopes.pop_scope();
                let parameter_type = comp
                    .parameter_type()
                    .cloned()
                    .ok_or_else(|| Error::NotAFunction(comp.type_signature().clone()))?;
                Ok(BuildingBlock::lambda(fresh, parameter_type, body?))
            }
            BlockKind::Lambda {
                parameter: None,
                body,
            } => {
                self.scopes.push_scope();
                let body = self.rename(body);
                self.scopes.pop_scope();
                Ok(BuildingBlock::lambda_no_arg(body?))
            }
            BlockKind::Block { locals, result } => {
                self.scopes.push_scope();
                let renamed = self.rename_block(locals, result);
                self.scopes.pop_scope();
                let (locals, result) = renamed?;
                Ok(BuildingBlock::block(locals, result))
            }
            BlockKind::Call { .. } | BlockKind::Struct { .. } | BlockKind::Selection { .. } => {
                let mut children = Vec::new();
                for child in comp.children() {
                    children.push(self.rename(child)?);
                }
                replace_children(comp, children)
            }
        }
    }

    /// Each value is renamed before its own binder comes into scope.
    fn rename_block(
        &mut self,
        locals: &[(String, Comp)],
        result: &Comp,
    ) -> Result<(Vec<(String, Comp)>, Comp)> {
        let mut renamed = Vec::with_capacity(locals.len());
        for (name, value) in locals {
            let value = self.rename(value)?;
            renamed.push((self.bind(name), value));
        }
        Ok((renamed, self.rename(result)?))
    }
}
