use crate::core::asset_importer::{AssemblyImporter, AssetBundleImporter, AssetEntry, AssetImporter};
use crate::core::assembly_cache::{AssemblyCache, CachedAssembly};
use crate::core::host::HostRuntime;
use crate::core::metadata::MetadataCatalog;
use crate::core::mod_entity::{AssetKind, Mod, ModAsset, PluginAssembly};
use crate::core::package::PackageReader;
use crate::core::registry::ModRegistry;
use crate::core::type_catalog::{scan_plugins, AssemblyResolver, MarkerRecognizer, TypeCatalog};
use crate::models::error::SError;
use crate::models::manifest::{AssetType, ModAssetInfo, ModManifest};
use crate::models::paths::ASSEMBLY_EXTENSION;
use camino::{Utf8Path, Utf8PathBuf};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

type CatalogMemo = RefCell<HashMap<String, Option<Arc<dyn TypeCatalog>>>>;

/// Turns packages into `Mod`s for one import pass. Inspection results go
/// through the shared assembly cache when one is given.
pub struct ModImporter<'a> {
    host: Arc<dyn HostRuntime>,
    cache: Option<&'a mut AssemblyCache>,
    markers: &'a dyn MarkerRecognizer,
    reference_dir: Option<Utf8PathBuf>,
    /// Host reference assemblies, shared by every package of the pass.
    reference_catalogs: CatalogMemo,
    imported: HashSet<String>,
}

enum Inspection {
    Cached(CachedAssembly),
    Fresh {
        hash: String,
        catalog: Arc<MetadataCatalog>,
    },
}

struct InspectedAssembly {
    entry: AssetEntry,
    inspection: Inspection,
}

struct ClassifiedAssembly {
    entry: AssetEntry,
    record: CachedAssembly,
    importer: Arc<AssemblyImporter>,
    is_plugin: bool,
}

impl<'a> ModImporter<'a> {
    pub fn new(
        host: Arc<dyn HostRuntime>,
        cache: Option<&'a mut AssemblyCache>,
        markers: &'a dyn MarkerRecognizer,
        reference_dir: Option<Utf8PathBuf>,
    ) -> Self {
        Self {
            host,
            cache,
            markers,
            reference_dir,
            reference_catalogs: RefCell::default(),
            imported: HashSet::new(),
        }
    }

    /// Imports one package. Errors are package-fatal: unreadable or missing
    /// manifest, or a guid that is already registered or imported in this pass.
    pub fn import(
        &mut self,
        package: &mut dyn PackageReader,
        registry: &ModRegistry,
    ) -> Result<Mod, SError> {
        // 1. Manifest, then identity checks before any asset work
        let manifest = package.manifest()?;
        let guid = manifest.guid.clone();
        if registry.contains_guid(&guid) || self.imported.contains(&guid) {
            return Err(SError::DuplicateMod(guid));
        }

        // 2. Optional documents
        let origin = package.origin().to_string();
        let readme = optional(&guid, "README", package.readme());
        let changelog = optional(&guid, "CHANGELOG", package.changelog());
        let icon = optional(&guid, "icon", package.icon());

        // 3. Asset bundles need no inspection
        let mut assets = Vec::new();
        match package.asset_bundles() {
            Ok(bundles) => {
                for entry in bundles {
                    let info = asset_info(&manifest, &entry.path, AssetType::AssetBundle);
                    let importer = AssetBundleImporter::new(entry, info.clone(), Arc::clone(&self.host));
                    assets.push(ModAsset {
                        path: importer.entry().path.clone(),
                        info,
                        kind: AssetKind::Bundle(Arc::new(importer)),
                    });
                }
            }
            Err(e) => warn!(%guid, %origin, "cannot list asset bundles: {e}"),
        }

        // 4. Assemblies: classify, then materialize in local dependency order
        let entries = package.assemblies().unwrap_or_else(|e| {
            warn!(%guid, %origin, "cannot list assemblies: {e}");
            Vec::new()
        });
        let classified = self.classify_assemblies(&manifest, entries);
        let loaded = self.materialize(&guid, &classified);

        for (index, assembly) in classified.into_iter().enumerate() {
            if !loaded.contains(&index) {
                continue;
            }
            let plugins = match (assembly.is_plugin, &assembly.record.main_plugin) {
                (true, Some(root)) => Some(PluginAssembly {
                    importer: Arc::clone(&assembly.importer),
                    root: root.clone(),
                    internal: assembly.record.internal_plugins.clone(),
                }),
                _ => None,
            };
            assets.push(ModAsset {
                info: asset_info(&manifest, &assembly.entry.path, AssetType::Assembly),
                path: assembly.entry.path,
                kind: AssetKind::Assembly {
                    importer: assembly.importer,
                    plugins,
                },
            });
        }

        let imported = Mod::new(manifest, readme, changelog, icon, assets);
        info!(
            %guid,
            %origin,
            version = %imported.manifest.version,
            assets = imported.assets.len(),
            plugins = imported.plugin_assemblies().count(),
            "mod imported"
        );
        self.imported.insert(guid);
        Ok(imported)
    }

    fn classify_assemblies(
        &mut self,
        manifest: &ModManifest,
        entries: Vec<AssetEntry>,
    ) -> Vec<ClassifiedAssembly> {
        let guid = manifest.guid.as_str();

        let inspected: Vec<InspectedAssembly> = entries
            .into_iter()
            .filter_map(|entry| match self.inspect(manifest, &entry) {
                Ok(inspection) => Some(InspectedAssembly { entry, inspection }),
                Err(SError::BadImageFormat(reason)) => {
                    debug!(%guid, asset = %entry.path, "not a managed assembly: {reason}");
                    None
                }
                Err(e) => {
                    error!(%guid, asset = %entry.path, "failed to inspect assembly: {e}");
                    None
                }
            })
            .collect();

        let resolver = PackageResolver::new(&inspected, self.reference_dir.as_deref(), &self.reference_catalogs);
        let mut records = Vec::with_capacity(inspected.len());
        for assembly in &inspected {
            let record = match &assembly.inspection {
                Inspection::Cached(record) => record.clone(),
                Inspection::Fresh { hash, catalog } => {
                    let scan = scan_plugins(catalog.as_ref(), &resolver, self.markers, manifest);
                    CachedAssembly {
                        identifier: CachedAssembly::identifier(guid, &assembly.entry.path),
                        hash: hash.clone(),
                        name: catalog.assembly_name().to_string(),
                        main_plugin: scan.root,
                        internal_plugins: scan.internal,
                        assembly_references: catalog.referenced_assemblies().to_vec(),
                    }
                }
            };
            records.push(record);
        }
        drop(resolver);

        inspected
            .into_iter()
            .zip(records)
            .map(|(assembly, record)| {
                if let (Inspection::Fresh { .. }, Some(cache)) = (&assembly.inspection, self.cache.as_deref_mut()) {
                    cache.insert(record.clone());
                }
                let is_plugin = match (&record.main_plugin, record.internal_plugins.is_empty()) {
                    (Some(_), _) => true,
                    (None, false) => {
                        error!(
                            %guid,
                            asset = %assembly.entry.path,
                            "assembly has internal plugins but no root plugin; not treated as a plugin assembly"
                        );
                        false
                    }
                    (None, true) => false,
                };
                ClassifiedAssembly {
                    importer: Arc::new(AssemblyImporter::new(assembly.entry.clone(), Arc::clone(&self.host))),
                    entry: assembly.entry,
                    record,
                    is_plugin,
                }
            })
            .collect()
    }

    /// Hash lookup first; the binary is only parsed on a miss.
    fn inspect(&self, manifest: &ModManifest, entry: &AssetEntry) -> Result<Inspection, SError> {
        let guid = manifest.guid.as_str();
        let hash = CachedAssembly::hash_of(entry.source.open()?, manifest)?;
        let identifier = CachedAssembly::identifier(guid, &entry.path);

        if let Some(record) = self.cache.as_deref().and_then(|c| c.get(&identifier, &hash)) {
            debug!(%guid, asset = %entry.path, "assembly cache hit");
            return Ok(Inspection::Cached(record.clone()));
        }

        let catalog = MetadataCatalog::parse(&entry.source.read_all()?)?;
        Ok(Inspection::Fresh {
            hash,
            catalog: Arc::new(catalog),
        })
    }

    /// Loads every assembly, each after the non-plugin assemblies of the same
    /// package it references. Returns the indices that loaded.
    fn materialize(&self, guid: &str, assemblies: &[ClassifiedAssembly]) -> HashSet<usize> {
        let by_name: HashMap<String, usize> = assemblies
            .iter()
            .enumerate()
            .map(|(i, a)| (a.record.name.to_ascii_lowercase(), i))
            .collect();

        let mut walk = MaterializeWalk {
            guid,
            assemblies,
            by_name,
            visited: HashSet::new(),
            loaded: HashSet::new(),
        };
        let plugins_first = (0..assemblies.len())
            .filter(|i| assemblies[*i].is_plugin)
            .chain((0..assemblies.len()).filter(|i| !assemblies[*i].is_plugin));
        for index in plugins_first {
            walk.visit(index);
        }
        walk.loaded
    }
}

struct MaterializeWalk<'w> {
    guid: &'w str,
    assemblies: &'w [ClassifiedAssembly],
    by_name: HashMap<String, usize>,
    visited: HashSet<usize>,
    loaded: HashSet<usize>,
}

impl MaterializeWalk<'_> {
    fn visit(&mut self, index: usize) {
        if !self.visited.insert(index) {
            return;
        }
        let assembly = &self.assemblies[index];
        for reference in &assembly.record.assembly_references {
            let Some(&dependency) = self.by_name.get(&reference.to_ascii_lowercase()) else {
                continue;
            };
            // plugin assemblies are loaded on their own
            if dependency != index && !self.assemblies[dependency].is_plugin {
                self.visit(dependency);
            }
        }

        match assembly.importer.import() {
            Ok(_) => {
                self.loaded.insert(index);
            }
            Err(e) => error!(guid = self.guid, asset = %assembly.entry.path, "failed to load assembly: {e}"),
        }
    }
}

/// Sibling assemblies of the package first, then the host reference directory.
struct PackageResolver<'r> {
    siblings: HashMap<String, &'r InspectedAssembly>,
    sibling_catalogs: CatalogMemo,
    reference_dir: Option<&'r Utf8Path>,
    reference_catalogs: &'r CatalogMemo,
}

impl<'r> PackageResolver<'r> {
    fn new(
        inspected: &'r [InspectedAssembly],
        reference_dir: Option<&'r Utf8Path>,
        reference_catalogs: &'r CatalogMemo,
    ) -> Self {
        let siblings = inspected
            .iter()
            .map(|a| {
                let name = match &a.inspection {
                    Inspection::Cached(record) => record.name.clone(),
                    Inspection::Fresh { catalog, .. } => catalog.assembly_name().to_string(),
                };
                (name.to_ascii_lowercase(), a)
            })
            .collect();
        Self {
            siblings,
            sibling_catalogs: RefCell::default(),
            reference_dir,
            reference_catalogs,
        }
    }

    fn sibling(&self, key: &str) -> Option<Arc<dyn TypeCatalog>> {
        let assembly = self.siblings.get(key)?;
        match &assembly.inspection {
            Inspection::Fresh { catalog, .. } => Some(Arc::clone(catalog) as Arc<dyn TypeCatalog>),
            Inspection::Cached(_) => memoized(&self.sibling_catalogs, key, || {
                let bytes = assembly.entry.source.read_all().ok()?;
                parse_catalog(&bytes, &assembly.entry.path)
            }),
        }
    }

    fn reference(&self, assembly_name: &str, key: &str) -> Option<Arc<dyn TypeCatalog>> {
        let dir = self.reference_dir?;
        memoized(self.reference_catalogs, key, || {
            let path = dir.join(format!("{assembly_name}.{ASSEMBLY_EXTENSION}"));
            let bytes = fs::read(&path).ok()?;
            parse_catalog(&bytes, path.as_str())
        })
    }
}

impl AssemblyResolver for PackageResolver<'_> {
    fn resolve(&self, assembly_name: &str) -> Option<Arc<dyn TypeCatalog>> {
        let key = assembly_name.to_ascii_lowercase();
        self.sibling(&key).or_else(|| self.reference(assembly_name, &key))
    }
}

fn memoized<F>(memo: &CatalogMemo, key: &str, load: F) -> Option<Arc<dyn TypeCatalog>>
where
    F: FnOnce() -> Option<Arc<dyn TypeCatalog>>,
{
    if let Some(known) = memo.borrow().get(key) {
        return known.clone();
    }
    let loaded = load();
    memo.borrow_mut().insert(key.to_string(), loaded.clone());
    loaded
}

fn parse_catalog(bytes: &[u8], origin: &str) -> Option<Arc<dyn TypeCatalog>> {
    match MetadataCatalog::parse(bytes) {
        Ok(catalog) => Some(Arc::new(catalog)),
        Err(e) => {
            debug!(%origin, "cannot inspect referenced assembly: {e}");
            None
        }
    }
}

fn asset_info(manifest: &ModManifest, path: &str, asset_type: AssetType) -> ModAssetInfo {
    match manifest.asset_info(path) {
        Some(info) if info.asset_type == asset_type => info.clone(),
        Some(info) => {
            warn!(
                guid = %manifest.guid,
                asset = path,
                "declared as {:?}, found as {:?}; using defaults",
                info.asset_type,
                asset_type
            );
            ModAssetInfo::default_for(asset_type)
        }
        None => ModAssetInfo::default_for(asset_type),
    }
}

fn optional<T>(guid: &str, what: &str, result: Result<Option<T>, SError>) -> Option<T> {
    match result {
        Ok(Some(value)) => Some(value),
        Ok(None) => {
            debug!(%guid, "no {what}");
            None
        }
        Err(e) => {
            warn!(%guid, "cannot read {what}: {e}");
            None
        }
    }
}
