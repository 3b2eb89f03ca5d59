//! Resumable depth-first scheduler over one batch of candidate mods.
//! Loadability is re-evaluated on every check, so a mod blocked earlier in
//! the batch may still be emitted once its blocker is resolved.

use crate::core::mod_entity::ModId;
use crate::core::registry::ModRegistry;
use std::collections::HashSet;
use std::fmt;
use tracing::{trace, warn};

struct Frame {
    id: ModId,
    next_dependency: usize,
}

impl Frame {
    fn new(id: ModId) -> Self {
        Self {
            id,
            next_dependency: 0,
        }
    }
}

pub struct ModLoadBatch {
    candidates: Vec<ModId>,
    cursor: usize,
    stack: Vec<Frame>,
    emitted: HashSet<ModId>,
}

impl ModLoadBatch {
    pub fn new(candidates: Vec<ModId>) -> Self {
        Self {
            candidates,
            cursor: 0,
            stack: Vec::new(),
            emitted: HashSet::new(),
        }
    }

    pub fn candidates(&self) -> &[ModId] {
        &self.candidates
    }

    pub fn is_exhausted(&self) -> bool {
        self.stack.is_empty() && self.cursor >= self.candidates.len()
    }

    /// Next mod to load, dependencies first. `None` once the batch is exhausted.
    ///
    /// Emitted mods are not marked loaded here; the caller loads them before
    /// asking again, and anything emitted counts as handled either way.
    pub fn try_dequeue(&mut self, registry: &ModRegistry) -> Option<ModId> {
        loop {
            if self.stack.is_empty() {
                let next = self.next_candidate(registry)?;
                self.stack.push(Frame::new(next));
            }

            while let Some(top) = self.stack.last_mut() {
                let Some(m) = registry.get(top.id) else {
                    self.stack.pop();
                    continue;
                };

                if let Some(dependency) = m.dependencies.get(top.next_dependency).copied() {
                    top.next_dependency += 1;
                    if self.should_visit(dependency, registry) {
                        self.stack.push(Frame::new(dependency));
                    }
                    continue;
                }

                let id = top.id;
                self.stack.pop();
                if self.emitted.contains(&id) || m.is_loaded() {
                    continue;
                }
                if !self.can_load(id, registry) {
                    self.report_skip(id, registry);
                    continue;
                }
                self.emitted.insert(id);
                return Some(id);
            }
        }
    }

    fn next_candidate(&mut self, registry: &ModRegistry) -> Option<ModId> {
        while let Some(id) = self.candidates.get(self.cursor).copied() {
            self.cursor += 1;
            let Some(m) = registry.get(id) else {
                continue;
            };
            if m.is_loaded() || self.emitted.contains(&id) {
                continue;
            }
            if !self.can_load(id, registry) {
                self.report_skip(id, registry);
                continue;
            }
            return Some(id);
        }
        None
    }

    fn should_visit(&self, dependency: ModId, registry: &ModRegistry) -> bool {
        let loaded = registry.get(dependency).map_or(true, |d| d.is_loaded());
        !loaded
            && !self.emitted.contains(&dependency)
            && !self.stack.iter().any(|f| f.id == dependency)
            && self.can_load(dependency, registry)
    }

    /// Not circular, no missing required dependency, no incompatible mod
    /// loaded or queued in this batch, and every required dependency loaded
    /// or itself loadable. A dependency this batch already emitted had its
    /// one chance; if it is not loaded now, its dependents are blocked.
    pub fn can_load(&self, id: ModId, registry: &ModRegistry) -> bool {
        self.can_load_guarded(id, registry, &mut Vec::new())
    }

    fn can_load_guarded(&self, id: ModId, registry: &ModRegistry, visiting: &mut Vec<ModId>) -> bool {
        let Some(m) = registry.get(id) else {
            return false;
        };
        if m.has_errors() {
            return false;
        }
        if m.incompatibilities.iter().any(|other| self.is_present(*other, registry)) {
            return false;
        }
        if visiting.contains(&id) {
            return true;
        }

        visiting.push(id);
        let ready = m.required_dependencies.iter().all(|dependency| {
            if registry.get(*dependency).is_some_and(|d| d.is_loaded()) {
                return true;
            }
            !self.emitted.contains(dependency) && self.can_load_guarded(*dependency, registry, visiting)
        });
        visiting.pop();
        ready
    }

    fn is_present(&self, id: ModId, registry: &ModRegistry) -> bool {
        registry.get(id).is_some_and(|m| m.is_loaded()) || self.candidates.contains(&id)
    }

    fn report_skip(&self, id: ModId, registry: &ModRegistry) {
        let Some(m) = registry.get(id) else {
            return;
        };
        warn!(
            guid = m.guid(),
            "skipping mod: {}",
            LoadDiagnostic {
                id,
                registry,
                batch: self
            }
        );
        trace!(guid = m.guid(), remaining = self.candidates.len() - self.cursor, "batch continues");
    }

    /// Structured report of why `id` is or is not loadable right now.
    pub fn diagnose<'a>(&'a self, id: ModId, registry: &'a ModRegistry) -> LoadDiagnostic<'a> {
        LoadDiagnostic {
            id,
            registry,
            batch: self,
        }
    }
}

/// Formatted only when displayed, since it walks every relationship of the mod.
pub struct LoadDiagnostic<'a> {
    id: ModId,
    registry: &'a ModRegistry,
    batch: &'a ModLoadBatch,
}

impl fmt::Display for LoadDiagnostic<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(m) = self.registry.get(self.id) else {
            return write!(f, "{} is not registered", self.id);
        };
        write!(f, "'{}'", m.guid())?;
        if m.is_circular_dependency {
            write!(f, "; circular dependency")?;
        }

        for dependency in &m.manifest.dependencies {
            let status = match self.registry.resolve(dependency) {
                None => "missing",
                Some(target) => match self.registry.get(target) {
                    Some(t) if t.is_loaded() => "loaded",
                    Some(t) if t.has_errors() => "has-error",
                    Some(_) if self.batch.emitted.contains(&target) => "load-failed",
                    _ => "not-loaded",
                },
            };
            let kind = if dependency.required { "required" } else { "optional" };
            write!(f, "; {kind} dependency '{}': {status}", dependency.guid)?;
        }

        for other in &m.incompatibilities {
            let Some(o) = self.registry.get(*other) else {
                continue;
            };
            let status = if o.is_loaded() {
                "loaded"
            } else if self.batch.candidates.contains(other) {
                "load-queued"
            } else {
                "not-loaded"
            };
            write!(f, "; incompatible '{}': {status}", o.guid())?;
        }
        Ok(())
    }
}
