use crate::core::asset_importer::{AssemblyImporter, AssetBundleImporter, AssetImporter};
use crate::core::operation::Operation;
use crate::core::package::PackageContents;
use crate::core::type_catalog::TypeToken;
use crate::models::manifest::{AssetType, ModAssetInfo, ModDependencyInfo, ModManifest};
use crate::models::plugin_reference::PluginReference;
use crate::utils::icon::icon_data_uri;
use derive_more::Display;
use std::sync::Arc;

/// Index of a mod inside its registry.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("#{_0}")]
pub struct ModId(pub usize);

/// An assembly with at least a root plugin, as discovered at import time.
#[derive(Clone)]
pub struct PluginAssembly {
    pub importer: Arc<AssemblyImporter>,
    pub root: PluginReference,
    pub internal: Vec<PluginReference>,
}

#[derive(Clone)]
pub enum AssetKind {
    Bundle(Arc<AssetBundleImporter>),
    Assembly {
        importer: Arc<AssemblyImporter>,
        plugins: Option<PluginAssembly>,
    },
}

#[derive(Clone)]
pub struct ModAsset {
    pub path: String,
    pub info: ModAssetInfo,
    pub kind: AssetKind,
}

impl ModAsset {
    pub fn asset_type(&self) -> AssetType {
        match self.kind {
            AssetKind::Bundle(_) => AssetType::AssetBundle,
            AssetKind::Assembly { .. } => AssetType::Assembly,
        }
    }
}

/// A plugin assembly after it was loaded, with its plugin types located in
/// the loaded catalog.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModAssembly {
    pub asset: String,
    pub assembly_name: String,
    pub root: (PluginReference, TypeToken),
    pub internal: Vec<(PluginReference, TypeToken)>,
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum LoadState {
    Unloaded,
    Loading,
    Loaded,
    Unloading,
}

/// Resolves to the plugin assemblies located in the loaded catalogs.
pub type LoadOperation = Operation<Vec<ModAssembly>>;

pub(crate) enum PendingOperation {
    Load(LoadOperation),
    Unload(Operation<()>),
}

pub struct Mod {
    pub manifest: ModManifest,
    pub readme: Option<String>,
    pub changelog: Option<String>,
    pub icon: Option<Vec<u8>>,
    /// Sorted by descending load priority, bundles before assemblies on ties.
    pub assets: Vec<ModAsset>,
    pub incompatibilities: Vec<ModId>,
    pub missing_dependencies: Vec<ModDependencyInfo>,
    pub required_dependencies: Vec<ModId>,
    pub dependencies: Vec<ModId>,
    pub is_circular_dependency: bool,
    pub(crate) state: LoadState,
    pub(crate) pending: Option<PendingOperation>,
    pub(crate) loaded_assemblies: Vec<ModAssembly>,
}

impl Mod {
    pub fn new(
        manifest: ModManifest,
        readme: Option<String>,
        changelog: Option<String>,
        icon: Option<Vec<u8>>,
        mut assets: Vec<ModAsset>,
    ) -> Self {
        assets.sort_by(|a, b| {
            b.info
                .load_priority
                .cmp(&a.info.load_priority)
                .then_with(|| a.asset_type().cmp(&b.asset_type()))
        });

        Self {
            manifest,
            readme,
            changelog,
            icon,
            assets,
            incompatibilities: Vec::new(),
            missing_dependencies: Vec::new(),
            required_dependencies: Vec::new(),
            dependencies: Vec::new(),
            is_circular_dependency: false,
            state: LoadState::Unloaded,
            pending: None,
            loaded_assemblies: Vec::new(),
        }
    }

    pub fn guid(&self) -> &str {
        &self.manifest.guid
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn is_loaded(&self) -> bool {
        self.state == LoadState::Loaded
    }

    /// Has something that blocks loading regardless of what else is loaded.
    pub fn has_errors(&self) -> bool {
        self.is_circular_dependency || !self.missing_dependencies.is_empty()
    }

    pub fn plugin_assemblies(&self) -> impl Iterator<Item = &PluginAssembly> {
        self.assets.iter().filter_map(|a| match &a.kind {
            AssetKind::Assembly {
                plugins: Some(p), ..
            } => Some(p),
            _ => None,
        })
    }

    pub fn loaded_assemblies(&self) -> &[ModAssembly] {
        &self.loaded_assemblies
    }

    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    pub(crate) fn unload_bundles(&self) {
        for asset in &self.assets {
            if let AssetKind::Bundle(importer) = &asset.kind {
                importer.unload();
            }
        }
    }

    pub fn icon_data_uri(&self) -> Option<String> {
        self.icon.as_deref().and_then(icon_data_uri)
    }

    /// Assets the loader materializes on its own; `load_manually` ones are left to the mod.
    pub fn auto_assets(&self) -> impl Iterator<Item = &ModAsset> {
        self.assets.iter().filter(|a| !a.info.load_manually)
    }

    pub fn contents(&self) -> PackageContents<'_> {
        let mut assemblies = Vec::new();
        let mut asset_bundles = Vec::new();
        for asset in &self.assets {
            match &asset.kind {
                AssetKind::Bundle(importer) => asset_bundles.push(importer.entry()),
                AssetKind::Assembly { importer, .. } => assemblies.push(importer.entry()),
            }
        }
        PackageContents {
            manifest: &self.manifest,
            readme: self.readme.as_deref(),
            changelog: self.changelog.as_deref(),
            icon: self.icon.as_deref(),
            assemblies,
            asset_bundles,
        }
    }
}
