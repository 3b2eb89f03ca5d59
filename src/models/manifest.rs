use crate::models::error::SError;
use crate::models::version::{deserialize_version, serialize_version, VersionRequirement};
use crate::utils::asset_path::AssetPathUtility;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Declared identity and relationships of a mod, parsed from `manifest.json`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModManifest {
    pub guid: String,
    pub name: String,
    #[serde(serialize_with = "serialize_version", deserialize_with = "deserialize_version")]
    pub version: Version,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: String,
    /// Per-asset settings keyed by asset path, e.g. `Asset Bundles/ui.bundle`.
    #[serde(default)]
    pub assets: BTreeMap<String, ModAssetInfo>,
    #[serde(default)]
    pub dependencies: Vec<ModDependencyInfo>,
    #[serde(default)]
    pub incompatibilities: Vec<ModIncompatibilityInfo>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AssetType {
    AssetBundle,
    Assembly,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModAssetInfo {
    #[serde(default)]
    pub load_priority: i32,
    #[serde(default)]
    pub load_manually: bool,
    #[serde(rename = "type")]
    pub asset_type: AssetType,
}

impl ModAssetInfo {
    /// Record used for assets the manifest does not mention.
    pub fn default_for(asset_type: AssetType) -> Self {
        Self {
            load_priority: 0,
            load_manually: false,
            asset_type,
        }
    }
}

/// A guid plus version predicates. Zero predicates accept any version.
pub trait ModReferenceInfo {
    fn guid(&self) -> &str;
    fn versions(&self) -> &[VersionRequirement];

    fn includes_version(&self, version: &Version) -> bool {
        let versions = self.versions();
        versions.is_empty() || versions.iter().any(|r| r.matches(version))
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ModDependencyInfo {
    pub guid: String,
    #[serde(default)]
    pub versions: Vec<VersionRequirement>,
    /// A missing required dependency blocks loading; optional ones only order it.
    #[serde(default = "default_required")]
    pub required: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ModIncompatibilityInfo {
    pub guid: String,
    #[serde(default)]
    pub versions: Vec<VersionRequirement>,
}

fn default_required() -> bool {
    true
}

impl ModReferenceInfo for ModDependencyInfo {
    fn guid(&self) -> &str {
        &self.guid
    }

    fn versions(&self) -> &[VersionRequirement] {
        &self.versions
    }
}

impl ModReferenceInfo for ModIncompatibilityInfo {
    fn guid(&self) -> &str {
        &self.guid
    }

    fn versions(&self) -> &[VersionRequirement] {
        &self.versions
    }
}

/// Guids are reverse-domain style identifiers: ASCII letters, digits, `.`, `_` and `-`.
pub fn is_valid_guid(guid: &str) -> bool {
    !guid.is_empty()
        && guid
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

impl ModManifest {
    pub fn from_json(bytes: &[u8]) -> Result<Self, SError> {
        let manifest: ModManifest = serde_json::from_slice(bytes)
            .map_err(|e| SError::InvalidManifest(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn to_json(&self) -> Result<String, SError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), SError> {
        if !is_valid_guid(&self.guid) {
            return Err(SError::InvalidManifest(format!("invalid guid '{}'", self.guid)));
        }
        if self.name.trim().is_empty() {
            return Err(SError::InvalidManifest(format!("mod '{}' has an empty name", self.guid)));
        }
        if let Some(path) = self.assets.keys().find(|p| !AssetPathUtility::is_valid(p)) {
            return Err(SError::InvalidManifest(format!("invalid asset path '{path}'")));
        }
        Ok(())
    }

    /// Declared settings for `asset_path`, matched after normalization.
    pub fn asset_info(&self, asset_path: &str) -> Option<&ModAssetInfo> {
        let wanted = AssetPathUtility::normalize(asset_path);
        self.assets
            .iter()
            .find(|(path, _)| AssetPathUtility::normalize(path).eq_ignore_ascii_case(&wanted))
            .map(|(_, info)| info)
    }
}
