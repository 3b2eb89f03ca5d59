use crate::core::host::{HostRuntime, LoadedAssembly, LoadedBundle};
use crate::core::operation::Operation;
use crate::models::error::SError;
use crate::models::manifest::ModAssetInfo;
use crate::utils::asset_path::AssetPathUtility;
use crate::utils::binary::{BinaryRead, BinaryWrite};
use camino::{Utf8Path, Utf8PathBuf};
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{self, BufReader, Cursor, Read, Seek, Write};
use std::sync::{Arc, OnceLock};
use std::task::Poll;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Where an asset's bytes live.
#[derive(Clone, Debug)]
pub enum AssetSource {
    /// Loose file inside a directory package.
    File(Utf8PathBuf),
    /// Buffer read out of a zip entry or a binary package.
    Memory(Arc<[u8]>),
}

impl AssetSource {
    pub fn open(&self) -> Result<Box<dyn Read + Send>, SError> {
        Ok(match self {
            AssetSource::File(path) => Box::new(BufReader::new(File::open(path)?)),
            AssetSource::Memory(bytes) => Box::new(Cursor::new(Arc::clone(bytes))),
        })
    }

    pub fn read_all(&self) -> Result<Vec<u8>, SError> {
        Ok(match self {
            AssetSource::File(path) => fs::read(path)?,
            AssetSource::Memory(bytes) => bytes.to_vec(),
        })
    }

    pub fn shared_bytes(&self) -> Result<Arc<[u8]>, SError> {
        Ok(match self {
            AssetSource::File(path) => Arc::from(fs::read(path)?),
            AssetSource::Memory(bytes) => Arc::clone(bytes),
        })
    }
}

/// An asset path inside its package (e.g. `Assemblies/Core/A.dll`) and its bytes.
#[derive(Clone, Debug)]
pub struct AssetEntry {
    pub path: String,
    pub source: AssetSource,
}

impl AssetEntry {
    pub fn new(path: &str, source: AssetSource) -> Result<Self, SError> {
        Ok(Self {
            path: AssetPathUtility::validate(path)?,
            source,
        })
    }

    /// `string path, int32 length, byte[length]`.
    pub fn write_binary<W: Write + ?Sized>(&self, w: &mut W) -> Result<(), SError> {
        let bytes = self.source.read_all()?;
        w.write_string(&self.path)?;
        w.write_blob(&bytes)?;
        Ok(())
    }

    pub fn read_binary<R: Read + ?Sized>(r: &mut R) -> Result<Self, SError> {
        let path = r.read_string()?;
        let bytes = r.read_blob()?;
        Self::new(&path, AssetSource::Memory(Arc::from(bytes)))
    }

    pub fn write_zip<W: Write + Seek>(&self, zip: &mut ZipWriter<W>, prefix: &str) -> Result<(), SError> {
        zip.start_file(format!("{prefix}{}", self.path), SimpleFileOptions::default())?;
        io::copy(&mut self.source.open()?, zip)?;
        Ok(())
    }

    /// Writes the asset under `root`, creating parent directories.
    pub fn write_to_directory(&self, root: &Utf8Path) -> Result<Utf8PathBuf, SError> {
        let target = root.join(&self.path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut self.source.open()?, &mut out)?;
        Ok(target)
    }

    pub fn display_name(&self) -> &str {
        AssetPathUtility::display_name(&self.path)
    }
}

/// Uniform contract over assembly and asset-bundle assets. The materialized
/// result is kept after the first successful import.
pub trait AssetImporter {
    type Output: Clone + Send + 'static;

    fn entry(&self) -> &AssetEntry;

    fn import(&self) -> Result<Self::Output, SError>;

    fn import_async(&self) -> Operation<Self::Output>;

    fn open(&self) -> Result<Box<dyn Read + Send>, SError> {
        self.entry().source.open()
    }

    fn export_binary(&self, w: &mut dyn Write) -> Result<(), SError> {
        self.entry().write_binary(w)
    }

    fn export_zip<W: Write + Seek>(&self, zip: &mut ZipWriter<W>, prefix: &str) -> Result<(), SError>
    where
        Self: Sized,
    {
        self.entry().write_zip(zip, prefix)
    }

    fn export_to_directory(&self, root: &Utf8Path) -> Result<Utf8PathBuf, SError> {
        self.entry().write_to_directory(root)
    }
}

pub struct AssemblyImporter {
    entry: AssetEntry,
    host: Arc<dyn HostRuntime>,
    loaded: OnceLock<LoadedAssembly>,
}

impl AssemblyImporter {
    pub fn new(entry: AssetEntry, host: Arc<dyn HostRuntime>) -> Self {
        Self {
            entry,
            host,
            loaded: OnceLock::new(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.get().is_some()
    }
}

impl AssetImporter for AssemblyImporter {
    type Output = LoadedAssembly;

    fn entry(&self) -> &AssetEntry {
        &self.entry
    }

    fn import(&self) -> Result<LoadedAssembly, SError> {
        if let Some(loaded) = self.loaded.get() {
            return Ok(Arc::clone(loaded));
        }
        let bytes = self.entry.source.read_all()?;
        let assembly = self.host.load_assembly(self.entry.display_name(), bytes)?;
        debug!(asset = %self.entry.path, "assembly materialized");
        Ok(Arc::clone(self.loaded.get_or_init(|| assembly)))
    }

    fn import_async(&self) -> Operation<LoadedAssembly> {
        match self.import() {
            Ok(assembly) => Operation::completed(assembly),
            Err(e) => Operation::faulted(e),
        }
    }
}

#[derive(Default)]
struct BundleSlot {
    loaded: Option<LoadedBundle>,
    in_flight: Option<Operation<LoadedBundle>>,
}

pub struct AssetBundleImporter {
    entry: AssetEntry,
    info: ModAssetInfo,
    host: Arc<dyn HostRuntime>,
    slot: Arc<Mutex<BundleSlot>>,
}

impl AssetBundleImporter {
    pub fn new(entry: AssetEntry, info: ModAssetInfo, host: Arc<dyn HostRuntime>) -> Self {
        Self {
            entry,
            info,
            host,
            slot: Arc::default(),
        }
    }

    pub fn info(&self) -> &ModAssetInfo {
        &self.info
    }

    pub fn is_loaded(&self) -> bool {
        self.slot.lock().loaded.is_some()
    }

    /// Unloads the bundle if it is loaded. A request still in flight is dropped.
    pub fn unload(&self) {
        let mut slot = self.slot.lock();
        slot.in_flight = None;
        if let Some(bundle) = slot.loaded.take() {
            bundle.unload();
            debug!(asset = %self.entry.path, "asset bundle unloaded");
        }
    }
}

impl AssetImporter for AssetBundleImporter {
    type Output = LoadedBundle;

    fn entry(&self) -> &AssetEntry {
        &self.entry
    }

    fn import(&self) -> Result<LoadedBundle, SError> {
        self.import_async().wait().map_err(|e| SError::HostError(e.to_string()))
    }

    fn import_async(&self) -> Operation<LoadedBundle> {
        let mut slot = self.slot.lock();
        if let Some(bundle) = &slot.loaded {
            return Operation::completed(Arc::clone(bundle));
        }
        if let Some(op) = &slot.in_flight {
            return op.clone();
        }

        let bytes = match self.entry.source.shared_bytes() {
            Ok(bytes) => bytes,
            Err(e) => return Operation::faulted(e),
        };
        let request = self.host.load_asset_bundle(&self.entry.path, bytes);
        let shared = Arc::clone(&self.slot);
        let op = Operation::from_poll(move || {
            let result = match request.poll() {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(result) => result,
            };
            let mut slot = shared.lock();
            slot.in_flight = None;
            if let Ok(bundle) = &result {
                slot.loaded = Some(Arc::clone(bundle));
            }
            Poll::Ready(result)
        });
        slot.in_flight = Some(op.clone());
        op
    }
}
