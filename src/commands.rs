use crate::config::LoaderSettings;
use crate::core::loader::{scan_directory, ModLoader};
use crate::core::mod_entity::{Mod, ModId};
use crate::models::error::SError;
use camino::Utf8Path;
use serde::Serialize;
use tracing::instrument;

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ModSummary {
    pub id: usize,
    pub guid: String,
    pub name: String,
    pub version: String,
    pub state: String,
    pub is_circular_dependency: bool,
    pub dependencies: Vec<String>,
    pub missing_dependencies: Vec<String>,
    pub incompatibilities: Vec<String>,
    pub plugins: Vec<String>,
    pub assets: usize,
}

impl ModSummary {
    fn new(loader: &ModLoader, id: ModId, m: &Mod) -> Self {
        let guid_of = |other: &ModId| {
            loader
                .registry()
                .get(*other)
                .map_or_else(|| other.to_string(), |o| o.guid().to_string())
        };
        Self {
            id: id.0,
            guid: m.guid().to_string(),
            name: m.manifest.name.clone(),
            version: m.manifest.version.to_string(),
            state: m.state().to_string(),
            is_circular_dependency: m.is_circular_dependency,
            dependencies: m.dependencies.iter().map(guid_of).collect(),
            missing_dependencies: m.missing_dependencies.iter().map(|d| d.guid.clone()).collect(),
            incompatibilities: m.incompatibilities.iter().map(guid_of).collect(),
            plugins: m.plugin_assemblies().map(|p| p.root.to_string()).collect(),
            assets: m.assets.len(),
        }
    }
}

pub fn summarize(loader: &ModLoader) -> Vec<ModSummary> {
    loader
        .registry()
        .iter()
        .map(|(id, m)| ModSummary::new(loader, id, m))
        .collect()
}

#[instrument(skip(settings))]
pub fn scan(settings: LoaderSettings, dir: &Utf8Path) -> Result<Vec<ModSummary>, SError> {
    let loader = scan_directory(settings, dir)?;
    Ok(summarize(&loader))
}

/// Guids in the order an auto-load batch loads them.
#[instrument(skip(settings))]
pub fn order(settings: LoaderSettings, dir: &Utf8Path) -> Result<Vec<String>, SError> {
    let mut loader = scan_directory(settings, dir)?;
    let loaded = loader.load_all();
    Ok(loaded
        .into_iter()
        .filter_map(|id| loader.registry().get(id).map(|m| m.guid().to_string()))
        .collect())
}

#[instrument(skip(settings))]
pub fn pack(settings: LoaderSettings, dir: &Utf8Path, out: &Utf8Path) -> Result<usize, SError> {
    let loader = scan_directory(settings, dir)?;
    loader.export_pack(&[], out)
}
