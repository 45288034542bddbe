//! Host context and persisted module settings
//!
//! The [`HostContext`] is constructed once by the embedding application and
//! passed by reference to every component that needs host services: the
//! data directory, the modules directory, and the host platform's own
//! module manifest (so host-version dependencies are checked exactly like
//! module-to-module dependencies).
//!
//! Module enablement is persisted in TOML at `{data_dir}/modules.toml`:
//!
//! ```toml
//! [modules.game-tetris]
//! enabled = true
//! ```

use crate::{Error, ModuleManifest, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the settings file under the host data directory.
pub const SETTINGS_FILE: &str = "modules.toml";

/// Explicit host context handed to the registry, installer, and lifecycle
/// manager at construction time.
#[derive(Debug, Clone)]
pub struct HostContext {
    data_dir: PathBuf,
    modules_dir: PathBuf,
    host_module: ModuleManifest,
}

impl HostContext {
    /// Create a context rooted at `data_dir`, with the host platform
    /// described by `host_module`. Creates the data and modules
    /// directories when missing.
    pub fn new<P: AsRef<Path>>(data_dir: P, mut host_module: ModuleManifest) -> Result<Self> {
        host_module.validate()?;
        host_module.fill_defaults();

        let data_dir = data_dir.as_ref().to_path_buf();
        let modules_dir = data_dir.join("modules");
        if !modules_dir.is_dir() {
            fs::create_dir_all(&modules_dir)?;
            info!("created modules directory at {}", modules_dir.display());
        }

        Ok(Self {
            data_dir,
            modules_dir,
            host_module,
        })
    }

    /// The platform-default data directory for the host application id.
    pub fn default_data_dir(host_id: &str) -> Result<PathBuf> {
        let base = dirs::data_dir()
            .ok_or_else(|| Error::Other("could not determine a data directory".to_string()))?;
        Ok(base.join(host_id))
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Directory holding installed module artifacts.
    pub fn modules_dir(&self) -> &Path {
        &self.modules_dir
    }

    /// The host platform's own manifest, registered in every registry
    /// snapshot.
    pub fn host_module(&self) -> &ModuleManifest {
        &self.host_module
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join(SETTINGS_FILE)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleEntrySettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Default for ModuleEntrySettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
        }
    }
}

/// Persisted per-module settings: `module id -> { enabled }`.
///
/// Created with defaults when the file is absent; updated on install and
/// uninstall. Modules without an entry count as enabled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleSettings {
    #[serde(default)]
    pub modules: BTreeMap<String, ModuleEntrySettings>,
}

impl ModuleSettings {
    /// Load the settings file, writing a default one first if it does not
    /// exist yet.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            let settings = Self::default();
            settings.save(path)?;
            return Ok(settings);
        }
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        self.modules.get(id).map(|m| m.enabled).unwrap_or(true)
    }

    /// Add a default (enabled) entry for a freshly installed module.
    /// Returns true when the map changed.
    pub fn ensure_entry(&mut self, id: &str) -> bool {
        if self.modules.contains_key(id) {
            return false;
        }
        self.modules
            .insert(id.to_string(), ModuleEntrySettings::default());
        true
    }

    pub fn set_enabled(&mut self, id: &str, enabled: bool) {
        self.modules
            .entry(id.to_string())
            .or_default()
            .enabled = enabled;
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.modules.remove(id).is_some()
    }
}
