use crate::models::error::SError;
use camino::Utf8PathBuf;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const APP_NAME: &str = "mod_loader";
const CONFIG_NAME: &str = "settings";

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct LoaderSettings {
    pub version: u8,
    /// Root directory scanned for mod packages.
    pub mods_directory: Utf8PathBuf,
    pub cache: CacheSettings,
    /// Directory holding the host game's managed assemblies; used to resolve
    /// base types that live outside a mod package during inspection.
    pub reference_assemblies: Option<Utf8PathBuf>,
    pub markers: MarkerSettings,
    /// How long `load_all` waits on one mod before moving on.
    pub load_timeout_ms: u64,
    pub log: LogSettings,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub path: Utf8PathBuf,
}

/// Full names (`Namespace.Name`) of the types that mark plugin classes.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct MarkerSettings {
    pub root_plugin: String,
    pub internal_plugin: String,
    pub plugin_attribute: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct LogSettings {
    /// `tracing` filter directive, e.g. `info` or `mod_loader_lib=debug`.
    pub level: String,
    /// When set, logs are also written to a daily rolling file here.
    pub directory: Option<Utf8PathBuf>,
}

fn base_dir() -> Utf8PathBuf {
    ProjectDirs::from("com", "martes", APP_NAME)
        .map(|dirs| dirs.data_dir().to_path_buf())
        .or_else(|| {
            std::env::current_exe()
                .ok()
                .and_then(|exe_path| exe_path.parent().map(|p| p.to_path_buf()))
        })
        .and_then(|p| Utf8PathBuf::from_path_buf(p).ok())
        .unwrap_or_else(|| Utf8PathBuf::from("."))
}

impl Default for LoaderSettings {
    fn default() -> Self {
        let base = base_dir();
        Self {
            version: 0,
            mods_directory: base.join("mods"),
            cache: CacheSettings {
                enabled: true,
                path: base.join("assembly-cache.bin"),
            },
            reference_assemblies: None,
            markers: MarkerSettings::default(),
            load_timeout_ms: 30_000,
            log: LogSettings::default(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        LoaderSettings::default().cache
    }
}

impl Default for MarkerSettings {
    fn default() -> Self {
        Self {
            root_plugin: "ModLoader.RootPlugin".to_string(),
            internal_plugin: "ModLoader.InternalPlugin".to_string(),
            plugin_attribute: "ModLoader.PluginAttribute".to_string(),
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
        }
    }
}

impl LoaderSettings {
    pub fn load() -> Result<LoaderSettings, SError> {
        Ok(confy::load(APP_NAME, CONFIG_NAME)?)
    }

    pub fn save(&self) -> Result<(), SError> {
        Ok(confy::store(APP_NAME, CONFIG_NAME, self)?)
    }

    pub fn load_path(path: &Utf8PathBuf) -> Result<LoaderSettings, SError> {
        Ok(confy::load_path(path)?)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    pub fn config_path() -> Result<Utf8PathBuf, SError> {
        let path = confy::get_configuration_file_path(APP_NAME, CONFIG_NAME)?;
        Utf8PathBuf::from_path_buf(path)
            .map_err(|p| SError::ConfigError(format!("non UTF-8 config path {}", p.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_settings_fall_back_to_defaults() {
        let parsed: LoaderSettings =
            serde_json::from_str(r#"{"cache": {"enabled": false}}"#).unwrap();
        assert!(!parsed.cache.enabled);
        assert_eq!(parsed.markers, MarkerSettings::default());
        assert_eq!(parsed.log.level, "info");
    }
}
