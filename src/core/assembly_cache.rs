use crate::models::error::SError;
use crate::models::manifest::ModManifest;
use crate::models::plugin_reference::PluginReference;
use crate::utils::binary::{BinaryRead, BinaryWrite};
use crate::utils::hash::keyed_content_hash;
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use tracing::{debug, info, warn};

/// Inspection result of one assembly asset, keyed by `guid/asset-path`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedAssembly {
    pub identifier: String,
    pub hash: String,
    pub name: String,
    pub main_plugin: Option<PluginReference>,
    pub internal_plugins: Vec<PluginReference>,
    pub assembly_references: Vec<String>,
}

impl CachedAssembly {
    pub fn identifier(guid: &str, asset_path: &str) -> String {
        format!("{guid}/{asset_path}")
    }

    /// Hash a record for `content` is stored under. A root plugin with an
    /// empty attribute takes the manifest's guid, name and version, so those
    /// are hashed along with the assembly bytes.
    pub fn hash_of<R: Read>(content: R, manifest: &ModManifest) -> std::io::Result<String> {
        let version = manifest.version.to_string();
        keyed_content_hash(content, &[&manifest.guid, &manifest.name, &version])
    }

    pub fn write_to<W: Write + ?Sized>(&self, w: &mut W) -> Result<(), SError> {
        w.write_string(&self.identifier)?;
        w.write_string(&self.hash)?;
        w.write_string(&self.name)?;
        w.write_bool(self.main_plugin.is_some())?;
        if let Some(plugin) = &self.main_plugin {
            plugin.write_to(w)?;
        }
        w.write_len(self.internal_plugins.len())?;
        for plugin in &self.internal_plugins {
            plugin.write_to(w)?;
        }
        w.write_len(self.assembly_references.len())?;
        for reference in &self.assembly_references {
            w.write_string(reference)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read + ?Sized>(r: &mut R) -> Result<Self, SError> {
        let identifier = r.read_string()?;
        let hash = r.read_string()?;
        let name = r.read_string()?;
        let main_plugin = match r.read_bool()? {
            true => Some(PluginReference::read_from(r)?),
            false => None,
        };
        let internal_plugins = (0..r.read_len()?)
            .map(|_| PluginReference::read_from(r))
            .collect::<Result<Vec<_>, _>>()?;
        let assembly_references = (0..r.read_len()?)
            .map(|_| r.read_string())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            identifier,
            hash,
            name,
            main_plugin,
            internal_plugins,
            assembly_references,
        })
    }
}

/// Persistent map of inspection results shared by every mod. Loading and
/// saving never fail the caller; a bad file just means a cold cache.
#[derive(Debug, Default)]
pub struct AssemblyCache {
    entries: BTreeMap<String, CachedAssembly>,
    path: Option<Utf8PathBuf>,
}

impl AssemblyCache {
    /// A cache that never touches disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn load(path: &Utf8Path) -> Self {
        let mut cache = Self {
            entries: BTreeMap::new(),
            path: Some(path.to_path_buf()),
        };

        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(%path, "no assembly cache yet");
                return cache;
            }
            Err(e) => {
                warn!(%path, "cannot open assembly cache: {e}");
                return cache;
            }
        };

        match Self::read_entries(&mut BufReader::new(file)) {
            Ok(entries) => {
                debug!(%path, count = entries.len(), "loaded assembly cache");
                cache.entries = entries;
            }
            Err(e) => warn!(%path, "discarding unreadable assembly cache: {e}"),
        }
        cache
    }

    pub fn read_entries<R: Read + ?Sized>(
        r: &mut R,
    ) -> Result<BTreeMap<String, CachedAssembly>, SError> {
        let count = r.read_len()?;
        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let entry = CachedAssembly::read_from(r)?;
            entries.insert(entry.identifier.clone(), entry);
        }
        Ok(entries)
    }

    pub fn write_entries<W: Write + ?Sized>(&self, w: &mut W) -> Result<(), SError> {
        w.write_len(self.entries.len())?;
        for entry in self.entries.values() {
            entry.write_to(w)?;
        }
        Ok(())
    }

    /// Rewrites the whole cache file. In-memory caches have nothing to do.
    pub fn save(&self) -> Result<(), SError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let staging = path.with_extension("tmp");
        {
            let mut writer = BufWriter::new(File::create(&staging)?);
            self.write_entries(&mut writer)?;
            writer.flush()?;
        }
        fs::rename(&staging, path)?;

        info!(%path, count = self.entries.len(), "saved assembly cache");
        Ok(())
    }

    /// Cached result for `identifier`, only when it was computed from the same bytes.
    pub fn get(&self, identifier: &str, hash: &str) -> Option<&CachedAssembly> {
        self.entries.get(identifier).filter(|e| e.hash == hash)
    }

    pub fn insert(&mut self, entry: CachedAssembly) {
        self.entries.insert(entry.identifier.clone(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> Option<&Utf8Path> {
        self.path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::type_reference::TypeReference;
    use std::io::Cursor;

    fn sample() -> CachedAssembly {
        let plugin = |name: &str, guid: &str| {
            PluginReference::from_attribute(
                TypeReference::nested(TypeReference::new(Some("Mods"), "Outer", 1), name, 0),
                guid,
                name,
                "1.0.0.3",
            )
            .unwrap()
        };
        CachedAssembly {
            identifier: CachedAssembly::identifier("com.a.b", "Assemblies/A.dll"),
            hash: "abc".to_string(),
            name: "A".to_string(),
            main_plugin: Some(plugin("Main", "com.a.b")),
            internal_plugins: vec![plugin("Side", "com.a.side")],
            assembly_references: vec!["mscorlib".to_string(), "Shared".to_string()],
        }
    }

    #[test]
    fn entry_round_trip() {
        let entry = sample();
        let mut buf = Vec::new();
        entry.write_to(&mut buf).unwrap();
        assert_eq!(CachedAssembly::read_from(&mut Cursor::new(buf)).unwrap(), entry);
    }

    #[test]
    fn hash_mismatch_is_a_miss() {
        let mut cache = AssemblyCache::in_memory();
        cache.insert(sample());
        assert!(cache.get("com.a.b/Assemblies/A.dll", "abc").is_some());
        assert!(cache.get("com.a.b/Assemblies/A.dll", "def").is_none());
        assert!(cache.save().is_ok());
    }

    #[test]
    fn truncated_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("cache.bin")).unwrap();
        fs::write(&path, [5, 0, 0, 0, 1]).unwrap();
        assert!(AssemblyCache::load(&path).is_empty());
        assert!(AssemblyCache::load(&path.with_file_name("missing.bin")).is_empty());
    }
}
