//! Remote catalog client
//!
//! The catalog is the single remote source of truth listing installable
//! modules and their version histories. This client fetches and caches the
//! entry list, answers lookups, and compares local module versions against
//! the catalog's latest.
//!
//! A refresh builds the replacement map completely before swapping it in:
//! a failed fetch or parse leaves the previously cached content intact.
//!
//! Endpoints, relative to the base location:
//!
//! - `GET modules`: the full list of catalog entries
//! - `GET modules/{id}`: a single entry
//! - `GET assets/modules/{id}@{version}.tar.gz`: a module artifact

use crate::manifest::{DependencySpec, ModuleManifest};
use crate::registry::RegistryEntry;
use crate::version::SemanticVersion;
use crate::{Error, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on one whole request; keeps a stalled catalog fetch or
/// artifact transfer from hanging forever.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One released version of a catalog module.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogVersion {
    pub version: String,

    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,

    #[serde(default)]
    pub release_notes: Vec<String>,
}

/// One module known to the catalog, with its full version history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub id: String,

    #[serde(default)]
    pub author: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub source_url: String,

    pub latest_version: String,

    /// Epoch millis of the last catalog update for this module.
    #[serde(default)]
    pub last_update_at: Option<i64>,

    #[serde(default)]
    pub versions: Vec<CatalogVersion>,
}

impl CatalogEntry {
    /// Build a module manifest for the requested version, or for
    /// `latest_version` when none is requested. Fails with
    /// [`Error::VersionNotFound`] when the version is not in this entry's
    /// history.
    pub fn manifest(&self, version: Option<&str>) -> Result<ModuleManifest> {
        let wanted = version.unwrap_or(&self.latest_version);
        let matching = self
            .versions
            .iter()
            .find(|candidate| candidate.version == wanted)
            .ok_or_else(|| Error::VersionNotFound {
                id: self.id.clone(),
                version: wanted.to_string(),
            })?;

        let mut manifest = ModuleManifest {
            id: self.id.clone(),
            name: self.name.clone(),
            authors: if self.author.trim().is_empty() {
                Vec::new()
            } else {
                vec![self.author.clone()]
            },
            description: self.description.clone(),
            source_url: self.source_url.clone(),
            version: matching.version.clone(),
            dependencies: matching.dependencies.clone(),
        };
        manifest.validate()?;
        manifest.fill_defaults();
        Ok(manifest)
    }
}

/// Blocking HTTP client over the remote catalog, with an in-memory entry
/// cache.
#[derive(Debug)]
pub struct CatalogClient {
    base_url: Url,
    client: reqwest::blocking::Client,
    cache: HashMap<String, CatalogEntry>,
}

impl CatalogClient {
    pub fn new(base_url: &str) -> Result<Self> {
        // a trailing slash keeps Url::join from dropping the last segment
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&normalized)
            .map_err(|e| Error::Cloud(format!("invalid catalog base url '{}': {}", base_url, e)))?;
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url,
            client,
            cache: HashMap::new(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Cloud(format!("invalid catalog endpoint '{}': {}", path, e)))
    }

    fn fetch_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.endpoint(path)?;
        let response = self.client.get(url.clone()).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Cloud(format!(
                "catalog request to {} failed: HTTP {}",
                url,
                status.as_u16()
            )));
        }
        response
            .json()
            .map_err(|e| Error::Cloud(format!("failed to parse catalog response from {}: {}", url, e)))
    }

    /// Fetch the full module list and replace the cache with it.
    ///
    /// The new list is captured completely before the swap, so a failure
    /// leaves the existing cache untouched.
    pub fn refresh(&mut self) -> Result<usize> {
        let entries: Vec<CatalogEntry> = self.fetch_json("modules")?;
        let mut fresh = HashMap::with_capacity(entries.len());
        for entry in entries {
            debug!("got catalog entry for id '{}'", entry.id);
            fresh.insert(entry.id.clone(), entry);
        }
        self.cache = fresh;
        Ok(self.cache.len())
    }

    /// Fetch a single entry and merge it into the cache.
    pub fn refresh_module(&mut self, id: &str) -> Result<()> {
        let entry: CatalogEntry = self.fetch_json(&format!("modules/{}", id))?;
        self.cache.insert(entry.id.clone(), entry);
        Ok(())
    }

    /// The cached entry for `id`, or [`Error::ModuleNotFound`].
    pub fn lookup(&self, id: &str) -> Result<&CatalogEntry> {
        self.cache
            .get(id)
            .ok_or_else(|| Error::ModuleNotFound(id.to_string()))
    }

    pub fn get(&self, id: &str) -> Option<&CatalogEntry> {
        self.cache.get(id)
    }

    /// True iff the catalog's latest version for this module orders
    /// strictly above the locally installed one. A module unknown to the
    /// catalog is treated as purely local, not as an error.
    pub fn has_update(&self, local: &RegistryEntry) -> Result<bool> {
        let entry = match self.cache.get(local.id()) {
            Some(entry) => entry,
            // might be a local-only module
            None => return Ok(false),
        };
        let latest = SemanticVersion::parse(&entry.latest_version)?;
        Ok(latest.is_update_for(&local.version))
    }

    /// Download location for one module artifact.
    pub fn artifact_url(&self, id: &str, version: &str) -> Result<Url> {
        self.endpoint(&format!("assets/modules/{}@{}.tar.gz", id, version))
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
