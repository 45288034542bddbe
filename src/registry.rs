//! In-memory module registry
//!
//! The registry maps module id to [`RegistryEntry`], built by scanning the
//! modules directory and by merging freshly installed modules. It always
//! carries one synthetic entry for the host platform itself so that
//! host-version dependencies resolve like any other dependency.
//!
//! A scan never aborts because one unit is bad: invalid artifacts are
//! logged and skipped, the rest of the directory is still processed.

use crate::manifest::ModuleManifest;
use crate::version::SemanticVersion;
use crate::{HostContext, Result};
use log::warn;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A registered module: its manifest, the parsed version, and the on-disk
/// artifact location once resolved to a concrete package. The host entry
/// has no artifact.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub manifest: ModuleManifest,
    pub version: SemanticVersion,
    pub artifact: Option<PathBuf>,
    /// Position in discovery order; load-order ties are broken by this.
    pub discovery_index: usize,
}

impl RegistryEntry {
    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    pub fn same_id_and_version(&self, other: &RegistryEntry) -> bool {
        self.id() == other.id() && self.version == other.version
    }
}

/// Registry snapshot: one entry per module id, host platform included.
#[derive(Debug)]
pub struct ModuleRegistry {
    entries: HashMap<String, RegistryEntry>,
    host_id: String,
    next_index: usize,
}

impl ModuleRegistry {
    /// Create a registry seeded with the host platform entry from the
    /// context.
    pub fn new(context: &HostContext) -> Result<Self> {
        let mut registry = Self {
            entries: HashMap::new(),
            host_id: context.host_module().id.clone(),
            next_index: 0,
        };
        registry.insert(context.host_module().clone(), None)?;
        Ok(registry)
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    /// Insert or replace a module. An existing entry for the same id is
    /// replaced, not merged.
    pub fn insert(&mut self, manifest: ModuleManifest, artifact: Option<PathBuf>) -> Result<()> {
        manifest.validate()?;
        let version = manifest.parsed_version()?;
        let discovery_index = match self.entries.get(&manifest.id) {
            Some(existing) => existing.discovery_index,
            None => {
                let index = self.next_index;
                self.next_index += 1;
                index
            }
        };
        self.entries.insert(
            manifest.id.clone(),
            RegistryEntry {
                manifest,
                version,
                artifact,
                discovery_index,
            },
        );
        Ok(())
    }

    /// Scan the modules directory and register every discovered module.
    ///
    /// Each immediate child of `modules_dir` is one unit of packaging: a
    /// loose `.tar.gz` artifact, or a subdirectory expected to hold exactly
    /// one artifact. Units with zero candidates are skipped with a warning;
    /// units with several get the first by path, with a warning. Invalid
    /// manifests and duplicate ids are logged and skipped.
    ///
    /// Returns the number of modules registered by this scan.
    pub fn scan(&mut self, modules_dir: &Path) -> usize {
        let mut registered = 0;
        for unit in list_units(modules_dir) {
            let candidates = artifact_candidates(&unit);
            let artifact = match candidates.as_slice() {
                [] => {
                    warn!("no module artifact found in {}; skipping", unit.display());
                    continue;
                }
                [single] => single.clone(),
                [first, ..] => {
                    warn!(
                        "{} artifacts found in {}; picking {}",
                        candidates.len(),
                        unit.display(),
                        first.display()
                    );
                    first.clone()
                }
            };

            let manifest = match ModuleManifest::read_from_artifact(&artifact) {
                Ok(manifest) => manifest,
                Err(e) => {
                    warn!("skipping invalid module {}: {}", artifact.display(), e);
                    continue;
                }
            };
            if self.entries.contains_key(&manifest.id) {
                warn!(
                    "duplicate module id '{}' at {}; keeping the earlier entry",
                    manifest.id,
                    artifact.display()
                );
                continue;
            }
            if let Err(e) = self.insert(manifest, Some(artifact)) {
                warn!("skipping module in {}: {}", unit.display(), e);
                continue;
            }
            registered += 1;
        }
        registered
    }

    pub fn get(&self, id: &str) -> Option<&RegistryEntry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Remove a module from the registry. The host entry cannot be
    /// removed.
    pub fn remove(&mut self, id: &str) -> Option<RegistryEntry> {
        if id == self.host_id {
            return None;
        }
        self.entries.remove(id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.values()
    }

    /// All ids sorted by discovery order.
    pub fn ids_in_discovery_order(&self) -> Vec<String> {
        let mut entries: Vec<&RegistryEntry> = self.entries.values().collect();
        entries.sort_by_key(|entry| entry.discovery_index);
        entries.iter().map(|entry| entry.id().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Immediate children of the modules directory, sorted by file name for a
/// deterministic scan order.
fn list_units(modules_dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(modules_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.into_path())
        .collect()
}

fn is_artifact(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.ends_with(".tar.gz"))
        .unwrap_or(false)
}

/// Installable artifacts within one unit, sorted by path.
fn artifact_candidates(unit: &Path) -> Vec<PathBuf> {
    if unit.is_file() {
        return if is_artifact(unit) {
            vec![unit.to_path_buf()]
        } else {
            Vec::new()
        };
    }
    WalkDir::new(unit)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.into_path())
        .filter(|path| path.is_file() && is_artifact(path))
        .collect()
}
