//! Fresh-name generation.

use std::collections::HashSet;

use crate::building_block::{BlockKind, BuildingBlock};

/// Default prefix for generated names.
pub const DEFAULT_PREFIX: &str = "_var";

/// Emits `<prefix>1`, `<prefix>2`, ... skipping every reserved name.
///
/// A generator built with [`NameGenerator::for_tree`] never emits a name that
/// already occurs in the tree, bound or free, nor one it emitted before.
#[derive(Debug, Clone)]
pub struct NameGenerator {
    prefix: String,
    counter: usize,
    taken: HashSet<String>,
}

impl NameGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: 0,
            taken: HashSet::new(),
        }
    }

    pub fn for_tree(comp: &BuildingBlock, prefix: impl Into<String>) -> Self {
        let mut generator = Self::new(prefix);
        collect_names(comp, &mut generator.taken);
        generator
    }

    /// Mark `name` as unavailable.
    pub fn reserve(&mut self, name: impl Into<String>) {
        self.taken.insert(name.into());
    }

    pub fn is_taken(&self, name: &str) -> bool {
        self.taken.contains(name)
    }

    pub fn next_name(&mut self) -> String {
        loop {
            self.counter += 1;
            let candidate = format!("{}{}", self.prefix, self.counter);
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
        }
    }
}

impl Default for NameGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

fn collect_names(comp: &BuildingBlock, out: &mut HashSet<String>) {
    match comp.kind() {
        BlockKind::Reference { name } => {
            out.insert(name.clone());
        }
        BlockKind::Lambda {
            parameter: Some(name),
            ..
        } => {
            out.insert(name.clone());
        }
        BlockKind::Block { locals, .. } => {
            out.extend(locals.iter().map(|(name, _)| name.clone()));
        }
        _ => {}
    }
    for child in comp.children() {
        collect_names(child, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Type;

    #[test]
    fn skips_names_present_in_tree() {
        let body = BuildingBlock::reference("_var1", Type::int32());
        let lam = BuildingBlock::lambda("_var2", Type::int32(), body);
        let mut names = NameGenerator::for_tree(&lam, DEFAULT_PREFIX);
        assert_eq!(names.next_name(), "_var3");
        assert_eq!(names.next_name(), "_var4");
    }

    #[test]
    fn reserved_names_are_skipped() {
        let mut names = NameGenerator::new("t");
        names.reserve("t1");
        assert_eq!(names.next_name(), "t2");
        assert!(names.is_taken("t2"));
    }
}
