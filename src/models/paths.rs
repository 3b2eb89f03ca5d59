use camino::{Utf8Path, Utf8PathBuf};

macro_rules! define_paths {
    ($name:ident { $($field:ident : $default:expr),* $(,)? }) => {
        #[derive(Clone, Debug)]
        pub struct $name {
            $(pub $field: Utf8PathBuf,)*
        }

        impl $name {
            pub fn to_absolute(mut self, base: &Utf8Path) -> Self {
                $(self.$field = base.join(self.$field);)*
                self
            }

            pub fn new(base: &Utf8Path) -> Self {
                Self::default().to_absolute(base)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    $($field: $default.into(),)*
                }
            }
        }
    };
}

// Layout shared by directory and zip packages.
define_paths!(PackagePaths {
    manifest: "manifest.json",
    readme: "README.md",
    changelog: "CHANGELOG.md",
    icon: "icon.png",
    assemblies: "Assemblies",
    asset_bundles: "Asset Bundles",
});

pub const ASSEMBLY_EXTENSION: &str = "dll";
pub const ASSET_BUNDLE_EXTENSION: &str = "bundle";
pub const ZIP_EXTENSION: &str = "zip";
pub const PACK_EXTENSION: &str = "modpack";
