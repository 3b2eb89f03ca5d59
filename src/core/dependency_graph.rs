//! Per-mod relationship sets: incompatibilities, dependencies, missing
//! required dependencies and cycle membership.

use crate::core::mod_entity::ModId;
use crate::core::registry::ModRegistry;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Marks every frame from `reentry` to the top of `stack`. A mod found again
/// at `stack[reentry]` closes a cycle through all of them, not only itself.
pub fn mark_cycle_span<F: FnMut(ModId)>(stack: &[ModId], reentry: usize, mut mark: F) {
    for id in stack.iter().skip(reentry) {
        mark(*id);
    }
}

#[derive(Default)]
struct Traversal {
    stack: Vec<ModId>,
    processed: HashSet<ModId>,
}

impl ModRegistry {
    /// Recomputes every mod's relationship sets from scratch.
    pub fn refresh_incompatibilities_and_dependencies(&mut self) {
        let ids: Vec<ModId> = self.ids().collect();
        for id in &ids {
            if let Some(m) = self.get_mut(*id) {
                m.incompatibilities.clear();
                m.missing_dependencies.clear();
                m.required_dependencies.clear();
                m.dependencies.clear();
                m.is_circular_dependency = false;
            }
        }

        let mut traversal = Traversal::default();
        for id in ids {
            self.visit(id, &mut traversal);
        }

        for (id, m) in self.iter() {
            if m.is_circular_dependency {
                warn!(guid = m.guid(), %id, "mod is part of a circular dependency");
            }
        }
    }

    fn visit(&mut self, id: ModId, traversal: &mut Traversal) {
        if let Some(reentry) = traversal.stack.iter().position(|s| *s == id) {
            mark_cycle_span(&traversal.stack, reentry, |member| {
                if let Some(m) = self.get_mut(member) {
                    m.is_circular_dependency = true;
                }
            });
            return;
        }
        if traversal.processed.contains(&id) {
            return;
        }
        let Some(m) = self.get(id) else {
            return;
        };

        let incompatibilities: Vec<ModId> = m
            .manifest
            .incompatibilities
            .iter()
            .filter_map(|info| self.resolve(info))
            .filter(|other| *other != id)
            .collect();
        let declared = m.manifest.dependencies.clone();

        traversal.stack.push(id);

        let mut dependencies = Vec::new();
        let mut required = Vec::new();
        let mut missing = Vec::new();
        for dependency in declared {
            match self.resolve(&dependency) {
                Some(target) => {
                    self.visit(target, traversal);
                    dependencies.push(target);
                    if dependency.required {
                        required.push(target);
                    }
                }
                None if dependency.required => missing.push(dependency),
                None => {}
            }
        }

        traversal.stack.pop();
        traversal.processed.insert(id);

        if let Some(m) = self.get_mut(id) {
            if !missing.is_empty() {
                debug!(guid = m.guid(), count = missing.len(), "missing required dependencies");
            }
            m.incompatibilities = incompatibilities;
            m.dependencies = dependencies;
            m.required_dependencies = required;
            m.missing_dependencies = missing;
        }
    }
}
