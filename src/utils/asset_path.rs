use crate::models::error::SError;
use crate::models::paths::{PackagePaths, ASSEMBLY_EXTENSION, ASSET_BUNDLE_EXTENSION};

/// Helpers for the slash-delimited asset paths used inside mod packages,
/// e.g. `Assemblies/Core/MyMod.dll`.
pub struct AssetPathUtility;

impl AssetPathUtility {
    /// Converts backslashes, drops empty and `.` segments.
    pub fn normalize(path: &str) -> String {
        path.split(['/', '\\'])
            .filter(|s| !s.is_empty() && *s != ".")
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Normalizes and rejects paths that are empty, absolute or escape the package root.
    pub fn validate(path: &str) -> Result<String, SError> {
        let normalized = Self::normalize(path);
        let escapes = normalized.split('/').any(|s| s == "..");
        let rooted = path.starts_with(['/', '\\']) || normalized.contains(':');

        if normalized.is_empty() || escapes || rooted {
            return Err(SError::InvalidPath(path.to_string()));
        }

        Ok(normalized)
    }

    pub fn is_valid(path: &str) -> bool {
        Self::validate(path).is_ok()
    }

    /// Returns the remainder of `path` below `dir`, compared segment-wise
    /// and case-insensitively.
    pub fn strip_dir<'a>(path: &'a str, dir: &str) -> Option<&'a str> {
        let dir = dir.trim_end_matches('/');
        if path.len() <= dir.len() + 1 {
            return None;
        }
        let head = path.get(..dir.len())?;
        let rest = &path[dir.len()..];
        if head.eq_ignore_ascii_case(dir) && rest.starts_with('/') {
            Some(&rest[1..])
        } else {
            None
        }
    }

    /// Strips the well-known `Assemblies/` or `Asset Bundles/` prefix if present.
    pub fn strip_known_prefix(path: &str) -> &str {
        let paths = PackagePaths::default();
        [paths.assemblies, paths.asset_bundles]
            .iter()
            .find_map(|dir| Self::strip_dir(path, dir.as_str()))
            .unwrap_or(path)
    }

    pub fn has_extension(path: &str, extension: &str) -> bool {
        Self::file_name(path)
            .rsplit_once('.')
            .is_some_and(|(stem, ext)| !stem.is_empty() && ext.eq_ignore_ascii_case(extension))
    }

    /// Strips `.dll` or `.bundle` if present.
    pub fn strip_known_extension(path: &str) -> &str {
        [ASSEMBLY_EXTENSION, ASSET_BUNDLE_EXTENSION]
            .iter()
            .find(|ext| Self::has_extension(path, ext))
            .map(|ext| &path[..path.len() - ext.len() - 1])
            .unwrap_or(path)
    }

    pub fn file_name(path: &str) -> &str {
        path.rsplit('/').next().unwrap_or(path)
    }

    /// Short display name: no known prefix, no known extension.
    pub fn display_name(path: &str) -> &str {
        Self::strip_known_extension(Self::strip_known_prefix(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_separators() {
        assert_eq!(
            AssetPathUtility::normalize(".\\Assemblies//Core/./Mod.dll"),
            "Assemblies/Core/Mod.dll"
        );
    }

    #[test]
    fn validate_rejects_escaping_and_rooted_paths() {
        assert!(AssetPathUtility::validate("../evil.dll").is_err());
        assert!(AssetPathUtility::validate("Assemblies/../../x").is_err());
        assert!(AssetPathUtility::validate("/abs/path.dll").is_err());
        assert!(AssetPathUtility::validate("C:/abs.dll").is_err());
        assert!(AssetPathUtility::validate("").is_err());
        assert_eq!(
            AssetPathUtility::validate("Asset Bundles\\ui.bundle").unwrap(),
            "Asset Bundles/ui.bundle"
        );
    }

    #[test]
    fn strip_prefix_and_extension() {
        assert_eq!(AssetPathUtility::strip_known_prefix("Assemblies/Core/Mod.dll"), "Core/Mod.dll");
        assert_eq!(AssetPathUtility::strip_known_prefix("asset bundles/ui.bundle"), "ui.bundle");
        assert_eq!(AssetPathUtility::strip_known_prefix("Other/ui.bundle"), "Other/ui.bundle");
        assert_eq!(AssetPathUtility::display_name("Assemblies/Core/Mod.DLL"), "Core/Mod");
        assert_eq!(AssetPathUtility::strip_known_extension("notes.txt"), "notes.txt");
    }

    #[test]
    fn extension_needs_a_stem() {
        assert!(AssetPathUtility::has_extension("Assemblies/A.dll", "dll"));
        assert!(!AssetPathUtility::has_extension("Assemblies/.dll", "dll"));
        assert!(!AssetPathUtility::has_extension("Assemblies", "dll"));
    }
}
