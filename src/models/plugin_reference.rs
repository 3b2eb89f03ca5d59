use crate::models::error::SError;
use crate::models::manifest::{is_valid_guid, ModManifest};
use crate::models::type_reference::TypeReference;
use crate::models::version::parse_version;
use crate::utils::binary::{BinaryRead, BinaryWrite};
use semver::Version;
use std::fmt;
use std::io::{Read, Write};

/// One discovered plugin class: where it lives and what it declares itself as.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PluginReference {
    pub type_ref: TypeReference,
    pub name: String,
    pub guid: String,
    pub version: Version,
}

impl PluginReference {
    /// Validates the `(guid, name, version)` triple read off a plugin attribute.
    pub fn from_attribute(
        type_ref: TypeReference,
        guid: &str,
        name: &str,
        version: &str,
    ) -> Result<Self, SError> {
        if !is_valid_guid(guid) {
            return Err(SError::InvalidManifest(format!("invalid plugin guid '{guid}'")));
        }
        if name.trim().is_empty() {
            return Err(SError::InvalidManifest(format!("plugin '{guid}' has an empty name")));
        }
        Ok(Self {
            type_ref,
            name: name.to_string(),
            guid: guid.to_string(),
            version: parse_version(version)?,
        })
    }

    /// Root plugin whose attribute carries no arguments: identity comes from the mod.
    pub fn from_manifest(type_ref: TypeReference, manifest: &ModManifest) -> Self {
        Self {
            type_ref,
            name: manifest.name.clone(),
            guid: manifest.guid.clone(),
            version: manifest.version.clone(),
        }
    }

    pub fn write_to<W: Write + ?Sized>(&self, w: &mut W) -> std::io::Result<()> {
        self.type_ref.write_to(w)?;
        w.write_string(&self.name)?;
        w.write_string(&self.guid)?;
        w.write_string(&self.version.to_string())
    }

    pub fn read_from<R: Read + ?Sized>(r: &mut R) -> Result<Self, SError> {
        let type_ref = TypeReference::read_from(r)?;
        let name = r.read_string()?;
        let guid = r.read_string()?;
        let version = parse_version(&r.read_string()?)
            .map_err(|e| SError::CacheFormat(format!("plugin '{guid}': {e}")))?;
        Ok(Self {
            type_ref,
            name,
            guid,
            version,
        })
    }
}

impl fmt::Display for PluginReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} {}) [{}]", self.name, self.guid, self.version, self.type_ref)
    }
}
