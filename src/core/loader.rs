use crate::config::LoaderSettings;
use crate::core::asset_importer::{AssetBundleImporter, AssemblyImporter, AssetImporter};
use crate::core::assembly_cache::AssemblyCache;
use crate::core::host::{HostRuntime, LoadedAssembly, LoadedBundle};
use crate::core::load_batch::ModLoadBatch;
use crate::core::mod_entity::{
    AssetKind, LoadOperation, LoadState, ModAssembly, ModId, PendingOperation, PluginAssembly,
};
use crate::core::mod_importer::ModImporter;
use crate::core::operation::{Operation, OperationResult};
use crate::core::package::{read_pack, write_pack, BinaryPackage, DirectoryPackage, PackageReader, ZipPackage};
use crate::core::registry::ModRegistry;
use crate::core::type_catalog::{MarkerRecognizer, PluginMarkers};
use crate::models::error::SError;
use crate::models::paths::{PackagePaths, PACK_EXTENSION, ZIP_EXTENSION};
use crate::models::plugin_reference::PluginReference;
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::sync::Arc;
use std::task::Poll;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// How `export_mod` lays a mod out on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Directory,
    Zip,
    Binary,
}

/// Owns the registry and the assembly cache, and drives import passes and
/// per-mod load/unload operations.
pub struct ModLoader {
    settings: LoaderSettings,
    host: Arc<dyn HostRuntime>,
    markers: Box<dyn MarkerRecognizer + Send + Sync>,
    cache: AssemblyCache,
    registry: ModRegistry,
}

enum Settled {
    Load(OperationResult<Vec<ModAssembly>>),
    Unload(OperationResult<()>),
}

impl ModLoader {
    pub fn new(settings: LoaderSettings, host: Arc<dyn HostRuntime>) -> Self {
        let cache = if settings.cache.enabled {
            AssemblyCache::load(&settings.cache.path)
        } else {
            AssemblyCache::in_memory()
        };
        Self {
            markers: Box::new(PluginMarkers::from_settings(&settings.markers)),
            settings,
            host,
            cache,
            registry: ModRegistry::new(),
        }
    }

    /// Replaces the marker types configured in the settings.
    pub fn with_markers<M>(mut self, markers: M) -> Self
    where
        M: MarkerRecognizer + Send + Sync + 'static,
    {
        self.markers = Box::new(markers);
        self
    }

    pub fn settings(&self) -> &LoaderSettings {
        &self.settings
    }

    pub fn registry(&self) -> &ModRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &AssemblyCache {
        &self.cache
    }

    /// Imports every package directly under `root`: directories holding a
    /// manifest, `.zip` archives and `.modpack` files. Returns the new mods.
    pub fn import_directory(&mut self, root: &Utf8Path) -> Result<Vec<ModId>, SError> {
        if !root.is_dir() {
            return Err(SError::InvalidPath(root.to_string()));
        }
        let packages = discover_packages(root);
        info!(%root, packages = packages.len(), "importing mods");
        Ok(self.import_packages(packages))
    }

    /// One import pass over `packages`, followed by a cache save and a
    /// relationship refresh. Failed packages are logged and skipped.
    pub fn import_packages<I>(&mut self, packages: I) -> Vec<ModId>
    where
        I: IntoIterator<Item = Box<dyn PackageReader>>,
    {
        let mut added = Vec::new();
        {
            let cache = self.settings.cache.enabled.then_some(&mut self.cache);
            let mut importer = ModImporter::new(
                Arc::clone(&self.host),
                cache,
                self.markers.as_ref(),
                self.settings.reference_assemblies.clone(),
            );
            for mut package in packages {
                if let Some(id) = import_one(&mut importer, &mut self.registry, package.as_mut()) {
                    added.push(id);
                }
            }
        }
        self.finish_import_pass();
        added
    }

    /// Imports a single package. `false` means nothing was added.
    pub fn try_import(&mut self, package: &mut dyn PackageReader) -> bool {
        let added = {
            let cache = self.settings.cache.enabled.then_some(&mut self.cache);
            let mut importer = ModImporter::new(
                Arc::clone(&self.host),
                cache,
                self.markers.as_ref(),
                self.settings.reference_assemblies.clone(),
            );
            import_one(&mut importer, &mut self.registry, package).is_some()
        };
        self.finish_import_pass();
        added
    }

    fn finish_import_pass(&mut self) {
        if self.settings.cache.enabled {
            if let Err(e) = self.cache.save() {
                warn!("failed to save assembly cache: {e}");
            }
        }
        self.registry.refresh_incompatibilities_and_dependencies();
    }

    /// Every mod that is neither loaded nor busy, in import order.
    pub fn auto_load_batch(&self) -> ModLoadBatch {
        let candidates = self
            .registry
            .iter()
            .filter(|(_, m)| m.state() == LoadState::Unloaded && !m.is_busy())
            .map(|(id, _)| id)
            .collect();
        ModLoadBatch::new(candidates)
    }

    pub fn try_dequeue(&self, batch: &mut ModLoadBatch) -> Option<ModId> {
        batch.try_dequeue(&self.registry)
    }

    /// Starts loading a mod. A load already in flight is returned as is; a
    /// loaded mod yields a completed handle.
    pub fn load_mod(&mut self, id: ModId) -> Result<LoadOperation, SError> {
        let m = self.registry.require_mut(id)?;
        match (&m.pending, m.state) {
            (Some(PendingOperation::Load(op)), _) => return Ok(op.clone()),
            (Some(PendingOperation::Unload(_)), _) => {
                return Err(SError::InvalidState(format!("mod '{}' is unloading", m.guid())));
            }
            (None, LoadState::Loaded) => return Ok(Operation::completed(m.loaded_assemblies.clone())),
            _ => {}
        }

        let steps = m
            .auto_assets()
            .map(|asset| match &asset.kind {
                AssetKind::Bundle(importer) => LoadStep::Bundle(Arc::clone(importer)),
                AssetKind::Assembly { importer, plugins } => LoadStep::Assembly {
                    importer: Arc::clone(importer),
                    plugins: plugins.clone(),
                },
            })
            .collect();
        let mut job = LoadJob {
            steps,
            current: None,
            resolved: Vec::new(),
        };
        let op = Operation::from_poll(move || job.step());

        debug!(guid = m.guid(), "loading mod");
        m.state = LoadState::Loading;
        m.pending = Some(PendingOperation::Load(op.clone()));
        self.settle(id);
        Ok(op)
    }

    /// Starts unloading a mod. Fails while a load is in flight.
    pub fn unload_mod(&mut self, id: ModId) -> Result<Operation<()>, SError> {
        let m = self.registry.require_mut(id)?;
        match (&m.pending, m.state) {
            (Some(PendingOperation::Unload(op)), _) => return Ok(op.clone()),
            (Some(PendingOperation::Load(_)), _) => {
                return Err(SError::InvalidState(format!("mod '{}' is loading", m.guid())));
            }
            (None, LoadState::Unloaded) => return Ok(Operation::completed(())),
            _ => {}
        }

        let bundles: Vec<Arc<AssetBundleImporter>> = m
            .assets
            .iter()
            .filter_map(|a| match &a.kind {
                AssetKind::Bundle(importer) => Some(Arc::clone(importer)),
                AssetKind::Assembly { .. } => None,
            })
            .collect();
        let op = Operation::from_poll(move || {
            for bundle in &bundles {
                bundle.unload();
            }
            Poll::Ready(Ok(()))
        });

        debug!(guid = m.guid(), "unloading mod");
        m.state = LoadState::Unloading;
        m.pending = Some(PendingOperation::Unload(op.clone()));
        self.settle(id);
        Ok(op)
    }

    /// Polls every pending operation once. Returns how many are still pending.
    pub fn update(&mut self) -> usize {
        let busy: Vec<ModId> = self
            .registry
            .iter()
            .filter(|(_, m)| m.is_busy())
            .map(|(id, _)| id)
            .collect();
        busy.into_iter().filter(|id| !self.settle(*id)).count()
    }

    /// Polls the pending operation of `id` and applies its outcome. `true`
    /// once nothing is pending.
    fn settle(&mut self, id: ModId) -> bool {
        let Some(m) = self.registry.get_mut(id) else {
            return true;
        };
        let settled = match &m.pending {
            None => return true,
            Some(PendingOperation::Load(op)) => match op.poll() {
                Poll::Pending => return false,
                Poll::Ready(result) => Settled::Load(result),
            },
            Some(PendingOperation::Unload(op)) => match op.poll() {
                Poll::Pending => return false,
                Poll::Ready(result) => Settled::Unload(result),
            },
        };
        m.pending = None;

        match settled {
            Settled::Load(Ok(assemblies)) => {
                info!(guid = m.guid(), plugins = assemblies.len(), "mod loaded");
                m.loaded_assemblies = assemblies;
                m.state = LoadState::Loaded;
            }
            Settled::Load(Err(e)) => {
                error!(guid = m.guid(), "failed to load mod: {e}");
                m.unload_bundles();
                m.state = LoadState::Unloaded;
            }
            Settled::Unload(result) => {
                if let Err(e) = result {
                    warn!(guid = m.guid(), "mod unloaded with errors: {e}");
                } else {
                    info!(guid = m.guid(), "mod unloaded");
                }
                m.loaded_assemblies.clear();
                m.state = LoadState::Unloaded;
            }
        }
        true
    }

    /// Loads an auto-load batch to the end, polling each mod until it settles
    /// or the load timeout passes before asking for the next. Returns the mods
    /// that ended up loaded. A mod still loading at the timeout stays pending
    /// for `update`, and its dependents are skipped.
    pub fn load_all(&mut self) -> Vec<ModId> {
        let mut batch = self.auto_load_batch();
        let timeout = self.settings.load_timeout();
        let mut loaded = Vec::new();
        while let Some(id) = batch.try_dequeue(&self.registry) {
            if let Err(e) = self.load_mod(id) {
                error!(%id, "cannot start loading mod: {e}");
                continue;
            }
            let started = Instant::now();
            while !self.settle(id) {
                if started.elapsed() >= timeout {
                    error!(%id, ?timeout, "mod did not finish loading in time");
                    break;
                }
                std::thread::yield_now();
            }
            if self.registry.get(id).is_some_and(|m| m.is_loaded()) {
                loaded.push(id);
            }
        }
        loaded
    }

    pub fn export_mod(&self, id: ModId, target: &Utf8Path, format: ExportFormat) -> Result<(), SError> {
        let contents = self.registry.require(id)?.contents();
        match format {
            ExportFormat::Directory => contents.write_to_directory(target)?,
            ExportFormat::Zip => {
                ensure_parent(target)?;
                let mut out = contents.write_zip(File::create(target)?)?;
                out.flush()?;
            }
            ExportFormat::Binary => {
                ensure_parent(target)?;
                let mut out = BufWriter::new(File::create(target)?);
                contents.write_binary(&mut out)?;
                out.flush()?;
            }
        }
        info!(%id, %target, ?format, "mod exported");
        Ok(())
    }

    /// Writes `ids` (every mod when empty) into one `.modpack` file.
    pub fn export_pack(&self, ids: &[ModId], target: &Utf8Path) -> Result<usize, SError> {
        let ids: Vec<ModId> = if ids.is_empty() {
            self.registry.ids().collect()
        } else {
            ids.to_vec()
        };
        let contents = ids
            .iter()
            .map(|id| self.registry.require(*id).map(|m| m.contents()))
            .collect::<Result<Vec<_>, _>>()?;

        ensure_parent(target)?;
        let mut out = BufWriter::new(File::create(target)?);
        write_pack(&mut out, &contents)?;
        out.flush()?;
        info!(%target, mods = contents.len(), "pack written");
        Ok(contents.len())
    }
}

fn import_one(
    importer: &mut ModImporter<'_>,
    registry: &mut ModRegistry,
    package: &mut dyn PackageReader,
) -> Option<ModId> {
    let imported = match importer.import(package, registry) {
        Ok(imported) => imported,
        Err(e) => {
            error!(origin = package.origin(), "failed to import mod package: {e}");
            return None;
        }
    };
    match registry.add(imported) {
        Ok(id) => Some(id),
        Err(e) => {
            error!(origin = package.origin(), "failed to register mod: {e}");
            None
        }
    }
}

fn discover_packages(root: &Utf8Path) -> Vec<Box<dyn PackageReader>> {
    let mut packages: Vec<Box<dyn PackageReader>> = Vec::new();

    let entries = WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("cannot read mods directory entry: {e}");
                None
            }
        });

    for entry in entries {
        let Ok(path) = Utf8PathBuf::from_path_buf(entry.into_path()) else {
            warn!(%root, "skipping non UTF-8 path");
            continue;
        };

        if path.is_dir() {
            if PackagePaths::new(&path).manifest.is_file() {
                packages.push(Box::new(DirectoryPackage::open(&path)));
            } else {
                debug!(%path, "directory has no manifest; skipped");
            }
            continue;
        }

        match path.extension() {
            Some(ext) if ext.eq_ignore_ascii_case(ZIP_EXTENSION) => match ZipPackage::open(&path) {
                Ok(package) => packages.push(Box::new(package)),
                Err(e) => error!(%path, "cannot open zip package: {e}"),
            },
            Some(ext) if ext.eq_ignore_ascii_case(PACK_EXTENSION) => match open_pack(&path) {
                Ok(pack) => packages.extend(pack.into_iter().map(|p| Box::new(p) as Box<dyn PackageReader>)),
                Err(e) => error!(%path, "cannot read mod pack: {e}"),
            },
            _ => debug!(%path, "not a mod package; skipped"),
        }
    }
    packages
}

fn open_pack(path: &Utf8Path) -> Result<Vec<BinaryPackage>, SError> {
    let mut reader = BufReader::new(File::open(path)?);
    read_pack(&mut reader, path.as_str())
}

enum LoadStep {
    Bundle(Arc<AssetBundleImporter>),
    Assembly {
        importer: Arc<AssemblyImporter>,
        plugins: Option<PluginAssembly>,
    },
}

/// Materializes assets in order; one bundle request in flight at a time.
struct LoadJob {
    steps: VecDeque<LoadStep>,
    current: Option<Operation<LoadedBundle>>,
    resolved: Vec<ModAssembly>,
}

impl LoadJob {
    fn step(&mut self) -> Poll<OperationResult<Vec<ModAssembly>>> {
        loop {
            if let Some(request) = &self.current {
                match request.poll() {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Ready(Ok(_)) => self.current = None,
                }
            }

            let Some(step) = self.steps.pop_front() else {
                return Poll::Ready(Ok(std::mem::take(&mut self.resolved)));
            };
            match step {
                LoadStep::Bundle(importer) => self.current = Some(importer.import_async()),
                LoadStep::Assembly { importer, plugins } => {
                    let located = importer.import().and_then(|loaded| match plugins {
                        Some(plugins) => locate_plugins(importer.entry().path.as_str(), &loaded, &plugins).map(Some),
                        None => Ok(None),
                    });
                    match located {
                        Ok(Some(assembly)) => self.resolved.push(assembly),
                        Ok(None) => {}
                        Err(e) => return Poll::Ready(Err(Arc::new(e))),
                    }
                }
            }
        }
    }
}

fn locate_plugins(asset: &str, loaded: &LoadedAssembly, plugins: &PluginAssembly) -> Result<ModAssembly, SError> {
    let locate = |plugin: &PluginReference| {
        loaded
            .find_type(&plugin.type_ref)
            .map(|token| (plugin.clone(), token))
            .ok_or_else(|| SError::TypeNotFound(format!("{} in {}", plugin.type_ref, loaded.assembly_name())))
    };
    Ok(ModAssembly {
        asset: asset.to_string(),
        assembly_name: loaded.assembly_name().to_string(),
        root: locate(&plugins.root)?,
        internal: plugins.internal.iter().map(locate).collect::<Result<_, _>>()?,
    })
}

/// Imports `dir` into a fresh loader backed by the inspection-only host.
pub fn scan_directory(settings: LoaderSettings, dir: &Utf8Path) -> Result<ModLoader, SError> {
    let mut loader = ModLoader::new(settings, Arc::new(crate::core::host::DetachedHost::new()));
    loader.import_directory(dir)?;
    Ok(loader)
}

fn ensure_parent(path: &Utf8Path) -> Result<(), SError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}
