use crate::core::mod_entity::{Mod, ModId};
use crate::models::error::SError;
use crate::models::manifest::ModReferenceInfo;
use std::collections::HashMap;

/// Every imported mod, addressed by `ModId` or by guid. Mods are never removed.
#[derive(Default)]
pub struct ModRegistry {
    mods: Vec<Mod>,
    by_guid: HashMap<String, ModId>,
}

impl ModRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, m: Mod) -> Result<ModId, SError> {
        if self.by_guid.contains_key(m.guid()) {
            return Err(SError::DuplicateMod(m.guid().to_string()));
        }
        let id = ModId(self.mods.len());
        self.by_guid.insert(m.guid().to_string(), id);
        self.mods.push(m);
        Ok(id)
    }

    pub fn contains_guid(&self, guid: &str) -> bool {
        self.by_guid.contains_key(guid)
    }

    pub fn id_of(&self, guid: &str) -> Option<ModId> {
        self.by_guid.get(guid).copied()
    }

    pub fn get(&self, id: ModId) -> Option<&Mod> {
        self.mods.get(id.0)
    }

    pub fn get_mut(&mut self, id: ModId) -> Option<&mut Mod> {
        self.mods.get_mut(id.0)
    }

    pub fn require(&self, id: ModId) -> Result<&Mod, SError> {
        self.get(id).ok_or_else(|| SError::ModNotFound(id.to_string()))
    }

    pub fn require_mut(&mut self, id: ModId) -> Result<&mut Mod, SError> {
        self.mods
            .get_mut(id.0)
            .ok_or_else(|| SError::ModNotFound(id.to_string()))
    }

    pub fn by_guid(&self, guid: &str) -> Option<&Mod> {
        self.id_of(guid).and_then(|id| self.get(id))
    }

    /// The registered mod a reference points at, if its version is accepted.
    pub fn resolve<R: ModReferenceInfo>(&self, reference: &R) -> Option<ModId> {
        let id = self.id_of(reference.guid())?;
        let target = self.get(id)?;
        reference
            .includes_version(&target.manifest.version)
            .then_some(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = ModId> {
        (0..self.mods.len()).map(ModId)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ModId, &Mod)> {
        self.mods.iter().enumerate().map(|(i, m)| (ModId(i), m))
    }

    pub fn len(&self) -> usize {
        self.mods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mods.is_empty()
    }
}
