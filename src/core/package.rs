use crate::core::asset_importer::{AssetEntry, AssetSource};
use crate::models::error::SError;
use crate::models::manifest::ModManifest;
use crate::models::paths::{PackagePaths, ASSEMBLY_EXTENSION, ASSET_BUNDLE_EXTENSION};
use crate::utils::asset_path::AssetPathUtility;
use crate::utils::binary::{BinaryRead, BinaryWrite};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, Write};
use std::sync::Arc;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

/// Read access to one mod package, whatever its transport. Optional files
/// read as `Ok(None)` when absent; `Err` means present but unreadable.
pub trait PackageReader {
    /// Human readable origin for logs, usually a path.
    fn origin(&self) -> &str;
    fn manifest(&mut self) -> Result<ModManifest, SError>;
    fn readme(&mut self) -> Result<Option<String>, SError>;
    fn changelog(&mut self) -> Result<Option<String>, SError>;
    fn icon(&mut self) -> Result<Option<Vec<u8>>, SError>;
    fn assemblies(&mut self) -> Result<Vec<AssetEntry>, SError>;
    fn asset_bundles(&mut self) -> Result<Vec<AssetEntry>, SError>;
}

fn optional_text(bytes: Option<Vec<u8>>) -> Result<Option<String>, SError> {
    bytes
        .map(|b| String::from_utf8(b).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e).into()))
        .transpose()
}

pub struct DirectoryPackage {
    origin: String,
    paths: PackagePaths,
}

impl DirectoryPackage {
    pub fn open(root: &Utf8Path) -> Self {
        Self {
            origin: root.to_string(),
            paths: PackagePaths::new(root),
        }
    }

    fn read_optional(path: &Utf8Path) -> Result<Option<Vec<u8>>, SError> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn collect(&self, dir: &Utf8Path, extension: &str) -> Result<Vec<AssetEntry>, SError> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let root = dir.parent().unwrap_or(dir);

        let mut entries = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = Utf8PathBuf::from_path_buf(entry.into_path())
                .map_err(|p| SError::InvalidPath(p.to_string_lossy().to_string()))?;
            let relative = path
                .strip_prefix(root)
                .map_err(|_| SError::InvalidPath(path.to_string()))?;
            if AssetPathUtility::has_extension(relative.as_str(), extension) {
                entries.push(AssetEntry::new(relative.as_str(), AssetSource::File(path.clone()))?);
            }
        }
        Ok(entries)
    }
}

impl PackageReader for DirectoryPackage {
    fn origin(&self) -> &str {
        &self.origin
    }

    fn manifest(&mut self) -> Result<ModManifest, SError> {
        let bytes = Self::read_optional(&self.paths.manifest)?
            .ok_or_else(|| SError::MissingManifest(self.origin.clone()))?;
        ModManifest::from_json(&bytes)
    }

    fn readme(&mut self) -> Result<Option<String>, SError> {
        optional_text(Self::read_optional(&self.paths.readme)?)
    }

    fn changelog(&mut self) -> Result<Option<String>, SError> {
        optional_text(Self::read_optional(&self.paths.changelog)?)
    }

    fn icon(&mut self) -> Result<Option<Vec<u8>>, SError> {
        Self::read_optional(&self.paths.icon)
    }

    fn assemblies(&mut self) -> Result<Vec<AssetEntry>, SError> {
        self.collect(&self.paths.assemblies, ASSEMBLY_EXTENSION)
    }

    fn asset_bundles(&mut self) -> Result<Vec<AssetEntry>, SError> {
        self.collect(&self.paths.asset_bundles, ASSET_BUNDLE_EXTENSION)
    }
}

/// A zip archive laid out like a directory package, possibly nested one
/// folder deep. The folder holding the shallowest `manifest.json` is the root.
pub struct ZipPackage<R: Read + Seek> {
    origin: String,
    archive: ZipArchive<R>,
    /// Package-relative path → archive index.
    files: HashMap<String, usize>,
}

impl ZipPackage<BufReader<File>> {
    pub fn open(path: &Utf8Path) -> Result<Self, SError> {
        Self::from_reader(path.as_str(), BufReader::new(File::open(path)?))
    }
}

impl<R: Read + Seek> ZipPackage<R> {
    pub fn from_reader(origin: &str, reader: R) -> Result<Self, SError> {
        let mut archive = ZipArchive::new(reader)?;
        let manifest_name = PackagePaths::default().manifest;

        let mut names = Vec::new();
        for index in 0..archive.len() {
            let file = archive.by_index(index)?;
            if !file.is_dir() {
                names.push((AssetPathUtility::normalize(file.name()), index));
            }
        }

        let prefix = names
            .iter()
            .filter(|(name, _)| {
                AssetPathUtility::file_name(name).eq_ignore_ascii_case(manifest_name.as_str())
            })
            .map(|(name, _)| &name[..name.len() - manifest_name.as_str().len()])
            .min_by_key(|dir| dir.matches('/').count())
            .unwrap_or("")
            .to_string();

        let files = names
            .into_iter()
            .filter_map(|(name, index)| {
                let relative = name.get(prefix.len()..)?;
                name.get(..prefix.len())?
                    .eq_ignore_ascii_case(&prefix)
                    .then(|| (relative.to_string(), index))
            })
            .collect();

        Ok(Self {
            origin: origin.to_string(),
            archive,
            files,
        })
    }

    fn read_optional(&mut self, relative: &Utf8Path) -> Result<Option<Vec<u8>>, SError> {
        let wanted = relative.as_str();
        let Some(index) = self
            .files
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(wanted))
            .map(|(_, index)| *index)
        else {
            return Ok(None);
        };
        self.read_index(index).map(Some)
    }

    fn read_index(&mut self, index: usize) -> Result<Vec<u8>, SError> {
        let mut file = self.archive.by_index(index)?;
        let mut bytes = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    fn collect(&mut self, dir: &Utf8Path, extension: &str) -> Result<Vec<AssetEntry>, SError> {
        let mut matching: Vec<(String, usize)> = self
            .files
            .iter()
            .filter(|(name, _)| {
                AssetPathUtility::strip_dir(name, dir.as_str()).is_some()
                    && AssetPathUtility::has_extension(name, extension)
            })
            .map(|(name, index)| (name.clone(), *index))
            .collect();
        matching.sort();

        matching
            .into_iter()
            .map(|(name, index)| {
                let bytes = self.read_index(index)?;
                AssetEntry::new(&name, AssetSource::Memory(Arc::from(bytes)))
            })
            .collect()
    }
}

impl<R: Read + Seek> PackageReader for ZipPackage<R> {
    fn origin(&self) -> &str {
        &self.origin
    }

    fn manifest(&mut self) -> Result<ModManifest, SError> {
        let bytes = self
            .read_optional(&PackagePaths::default().manifest)?
            .ok_or_else(|| SError::MissingManifest(self.origin.clone()))?;
        ModManifest::from_json(&bytes)
    }

    fn readme(&mut self) -> Result<Option<String>, SError> {
        let bytes = self.read_optional(&PackagePaths::default().readme)?;
        optional_text(bytes)
    }

    fn changelog(&mut self) -> Result<Option<String>, SError> {
        let bytes = self.read_optional(&PackagePaths::default().changelog)?;
        optional_text(bytes)
    }

    fn icon(&mut self) -> Result<Option<Vec<u8>>, SError> {
        self.read_optional(&PackagePaths::default().icon)
    }

    fn assemblies(&mut self) -> Result<Vec<AssetEntry>, SError> {
        self.collect(&PackagePaths::default().assemblies, ASSEMBLY_EXTENSION)
    }

    fn asset_bundles(&mut self) -> Result<Vec<AssetEntry>, SError> {
        self.collect(&PackagePaths::default().asset_bundles, ASSET_BUNDLE_EXTENSION)
    }
}

/// One package read from a binary stream. Every section is consumed when
/// the package is read, so a bad manifest still leaves the stream positioned
/// at the next package; the manifest error surfaces from `manifest()`.
pub struct BinaryPackage {
    origin: String,
    manifest_json: String,
    readme: Option<String>,
    icon: Option<Vec<u8>>,
    changelog: Option<String>,
    assemblies: Vec<AssetEntry>,
    asset_bundles: Vec<AssetEntry>,
}

impl BinaryPackage {
    pub fn read_from<R: Read + ?Sized>(r: &mut R, origin: &str) -> Result<Self, SError> {
        let manifest_json = r.read_string()?;
        let readme = match r.read_bool()? {
            true => Some(r.read_string()?),
            false => None,
        };
        let icon = match r.read_bool()? {
            true => Some(r.read_blob()?),
            false => None,
        };
        let changelog = match r.read_bool()? {
            true => Some(r.read_string()?),
            false => None,
        };
        let assemblies = (0..r.read_len()?)
            .map(|_| AssetEntry::read_binary(r))
            .collect::<Result<Vec<_>, _>>()?;
        let asset_bundles = (0..r.read_len()?)
            .map(|_| AssetEntry::read_binary(r))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            origin: origin.to_string(),
            manifest_json,
            readme,
            icon,
            changelog,
            assemblies,
            asset_bundles,
        })
    }
}

impl PackageReader for BinaryPackage {
    fn origin(&self) -> &str {
        &self.origin
    }

    fn manifest(&mut self) -> Result<ModManifest, SError> {
        ModManifest::from_json(self.manifest_json.as_bytes())
    }

    fn readme(&mut self) -> Result<Option<String>, SError> {
        Ok(self.readme.clone())
    }

    fn changelog(&mut self) -> Result<Option<String>, SError> {
        Ok(self.changelog.clone())
    }

    fn icon(&mut self) -> Result<Option<Vec<u8>>, SError> {
        Ok(self.icon.clone())
    }

    fn assemblies(&mut self) -> Result<Vec<AssetEntry>, SError> {
        Ok(self.assemblies.clone())
    }

    fn asset_bundles(&mut self) -> Result<Vec<AssetEntry>, SError> {
        Ok(self.asset_bundles.clone())
    }
}

/// What an exported package is made of.
pub struct PackageContents<'a> {
    pub manifest: &'a ModManifest,
    pub readme: Option<&'a str>,
    pub changelog: Option<&'a str>,
    pub icon: Option<&'a [u8]>,
    pub assemblies: Vec<&'a AssetEntry>,
    pub asset_bundles: Vec<&'a AssetEntry>,
}

impl PackageContents<'_> {
    pub fn write_binary<W: Write + ?Sized>(&self, w: &mut W) -> Result<(), SError> {
        w.write_string(&self.manifest.to_json()?)?;
        w.write_bool(self.readme.is_some())?;
        if let Some(readme) = self.readme {
            w.write_string(readme)?;
        }
        w.write_bool(self.icon.is_some())?;
        if let Some(icon) = self.icon {
            w.write_blob(icon)?;
        }
        w.write_bool(self.changelog.is_some())?;
        if let Some(changelog) = self.changelog {
            w.write_string(changelog)?;
        }
        w.write_len(self.assemblies.len())?;
        for asset in &self.assemblies {
            asset.write_binary(w)?;
        }
        w.write_len(self.asset_bundles.len())?;
        for asset in &self.asset_bundles {
            asset.write_binary(w)?;
        }
        Ok(())
    }

    pub fn write_zip<W: Write + Seek>(&self, writer: W) -> Result<W, SError> {
        let paths = PackagePaths::default();
        let options = SimpleFileOptions::default();
        let mut zip = ZipWriter::new(writer);

        zip.start_file(paths.manifest.as_str(), options)?;
        zip.write_all(self.manifest.to_json()?.as_bytes())?;
        let optional = [
            (&paths.readme, self.readme.map(str::as_bytes)),
            (&paths.changelog, self.changelog.map(str::as_bytes)),
            (&paths.icon, self.icon),
        ];
        for (path, bytes) in optional {
            if let Some(bytes) = bytes {
                zip.start_file(path.as_str(), options)?;
                zip.write_all(bytes)?;
            }
        }
        for asset in self.assemblies.iter().chain(&self.asset_bundles) {
            asset.write_zip(&mut zip, "")?;
        }
        Ok(zip.finish()?)
    }

    pub fn write_to_directory(&self, root: &Utf8Path) -> Result<(), SError> {
        let paths = PackagePaths::new(root);
        fs::create_dir_all(root)?;
        fs::write(&paths.manifest, self.manifest.to_json()?)?;
        if let Some(readme) = self.readme {
            fs::write(&paths.readme, readme)?;
        }
        if let Some(changelog) = self.changelog {
            fs::write(&paths.changelog, changelog)?;
        }
        if let Some(icon) = self.icon {
            fs::write(&paths.icon, icon)?;
        }
        for asset in self.assemblies.iter().chain(&self.asset_bundles) {
            asset.write_to_directory(root)?;
        }
        Ok(())
    }
}

/// `int32 packageCount` followed by the packages.
pub fn write_pack<W: Write + ?Sized>(w: &mut W, packages: &[PackageContents<'_>]) -> Result<(), SError> {
    w.write_len(packages.len())?;
    for package in packages {
        package.write_binary(w)?;
    }
    Ok(())
}

/// Reads every package of a pack. Stops at the first structurally broken
/// package, since nothing after it can be located.
pub fn read_pack<R: Read + ?Sized>(r: &mut R, origin: &str) -> Result<Vec<BinaryPackage>, SError> {
    let count = r.read_len()?;
    (0..count)
        .map(|index| BinaryPackage::read_from(r, &format!("{origin}#{index}")))
        .collect()
}
