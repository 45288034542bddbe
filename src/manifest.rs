//! Module manifests
//!
//! Every module artifact is a `.tar.gz` archive carrying a `module.json`
//! manifest next to its code: id, display name, authors, version, and the
//! dependency constraints the resolver later checks. This module owns the
//! serde model for that file, its validation rules, and the extraction of
//! the embedded manifest from an artifact on disk.

use crate::version::{SemanticVersion, VersionConstraint};
use crate::{Error, Result};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tar::Archive;

/// Name of the manifest file embedded in every module artifact.
pub const MANIFEST_FILE: &str = "module.json";

/// A single declared dependency: the target module id, a textual version
/// constraint, and whether the dependency is soft (tolerated when unmet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySpec {
    pub id: String,

    #[serde(rename = "versionConstraint", default)]
    pub version_constraint: String,

    #[serde(default)]
    pub soft: bool,
}

impl DependencySpec {
    pub fn new(id: &str, version_constraint: &str) -> Self {
        Self {
            id: id.to_string(),
            version_constraint: version_constraint.to_string(),
            soft: false,
        }
    }

    pub fn soft(mut self) -> Self {
        self.soft = true;
        self
    }

    /// An absent constraint is satisfied by any version of the target.
    pub fn is_unconstrained(&self) -> bool {
        self.version_constraint.trim().is_empty()
    }
}

/// The descriptor persisted inside each module's artifact.
///
/// The id is the unique key; the dependency list is immutable after
/// creation. A manifest whose id is blank or whose version does not parse
/// is invalid and the containing artifact is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleManifest {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub authors: Vec<String>,

    #[serde(default)]
    pub description: String,

    #[serde(rename = "sourceUrl", default)]
    pub source_url: String,

    pub version: String,

    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
}

impl ModuleManifest {
    pub fn new(id: &str, version: &str) -> Self {
        Self {
            id: id.to_string(),
            name: String::new(),
            authors: Vec::new(),
            description: String::new(),
            source_url: String::new(),
            version: version.to_string(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_dependency(mut self, dependency: DependencySpec) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Check the manifest invariants: non-blank id, parsable version, and
    /// parsable constraints on every constrained dependency.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Validation("no valid module id found".to_string()));
        }
        SemanticVersion::parse(&self.version).map_err(|e| {
            Error::Validation(format!("module '{}' has an invalid version: {}", self.id, e))
        })?;
        for dependency in &self.dependencies {
            if dependency.is_unconstrained() {
                continue;
            }
            VersionConstraint::parse(&dependency.version_constraint).map_err(|e| {
                Error::Validation(format!(
                    "module '{}' has an invalid constraint on '{}': {}",
                    self.id, dependency.id, e
                ))
            })?;
        }
        Ok(())
    }

    /// Default a blank display name to the module id.
    pub fn fill_defaults(&mut self) {
        if self.name.trim().is_empty() {
            self.name = self.id.clone();
        }
    }

    /// The parsed form of the version string. Only meaningful after
    /// [`validate`](Self::validate) has passed.
    pub fn parsed_version(&self) -> Result<SemanticVersion> {
        SemanticVersion::parse(&self.version)
    }

    /// Read, validate, and default-fill the manifest embedded in a module
    /// artifact.
    pub fn read_from_artifact<P: AsRef<Path>>(artifact: P) -> Result<Self> {
        let artifact = artifact.as_ref();
        let file = File::open(artifact)?;
        let mut archive = Archive::new(GzDecoder::new(file));

        for entry in archive.entries()? {
            let mut entry = entry?;
            let is_manifest = entry
                .path()?
                .file_name()
                .map(|name| name == MANIFEST_FILE)
                .unwrap_or(false);
            if !is_manifest {
                continue;
            }
            let mut content = String::new();
            entry.read_to_string(&mut content)?;
            let mut manifest: ModuleManifest = serde_json::from_str(&content)?;
            manifest.validate()?;
            manifest.fill_defaults();
            return Ok(manifest);
        }

        Err(Error::Validation(format!(
            "no '{}' found in {}",
            MANIFEST_FILE,
            artifact.display()
        )))
    }
}

/// Test-only helper: write a `.tar.gz` artifact containing the given
/// manifest JSON plus a dummy payload file.
#[cfg(test)]
pub(crate) fn write_test_artifact(
    dir: &Path,
    file_name: &str,
    manifest_json: &str,
) -> std::path::PathBuf {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let artifact_path = dir.join(file_name);
    let tar_gz = File::create(&artifact_path).unwrap();
    let enc = GzEncoder::new(tar_gz, Compression::default());
    let mut builder = tar::Builder::new(enc);

    let mut header = tar::Header::new_gnu();
    header.set_path(MANIFEST_FILE).unwrap();
    header.set_size(manifest_json.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, MANIFEST_FILE, manifest_json.as_bytes())
        .unwrap();

    let payload = b"fn main() {}\n";
    let mut header = tar::Header::new_gnu();
    header.set_path("src/entry.rs").unwrap();
    header.set_size(payload.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "src/entry.rs", &payload[..])
        .unwrap();

    builder.finish().unwrap();
    artifact_path
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::TempDir;

    fn write_artifact(dir: &Path, file_name: &str, manifest_json: &str) -> std::path::PathBuf {
        write_test_artifact(dir, file_name, manifest_json)
    }

    #[test]
    fn test_manifest_json_round_trip() {
        let json = r#"{
            "id": "game-tetris",
            "name": "Tetris",
            "authors": ["alice"],
            "description": "Falling blocks",
            "sourceUrl": "https://example.org/tetris",
            "version": "1.2.0",
            "dependencies": [
                { "id": "lib-boards", "versionConstraint": "~> 1.0", "soft": false },
                { "id": "lib-stats", "versionConstraint": ">= 0.3.0", "soft": true }
            ]
        }"#;

        let manifest: ModuleManifest = serde_json::from_str(json).unwrap();
        assert_eq!(manifest.id, "game-tetris");
        assert_eq!(manifest.dependencies.len(), 2);
        assert!(manifest.dependencies[1].soft);

        let out = serde_json::to_string(&manifest).unwrap();
        let back: ModuleManifest = serde_json::from_str(&out).unwrap();
        assert_eq!(back, manifest);
    }

    #[test]
    fn test_manifest_defaults_for_missing_fields() {
        let manifest: ModuleManifest =
            serde_json::from_str(r#"{ "id": "bare", "version": "0.1.0" }"#).unwrap();
        assert!(manifest.name.is_empty());
        assert!(manifest.authors.is_empty());
        assert!(manifest.dependencies.is_empty());
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_blank_id() {
        let manifest = ModuleManifest::new("   ", "1.0.0");
        let err = manifest.validate().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_validate_rejects_bad_version() {
        let manifest = ModuleManifest::new("mod", "not-a-version");
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("invalid version"));
    }

    #[test]
    fn test_validate_rejects_bad_constraint() {
        let manifest =
            ModuleManifest::new("mod", "1.0.0").with_dependency(DependencySpec::new("dep", ">>"));
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("invalid constraint"));
    }

    #[test]
    fn test_validate_accepts_unconstrained_dependency() {
        let manifest =
            ModuleManifest::new("mod", "1.0.0").with_dependency(DependencySpec::new("dep", " "));
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_fill_defaults_uses_id_as_name() {
        let mut manifest = ModuleManifest::new("my-module", "1.0.0");
        manifest.fill_defaults();
        assert_eq!(manifest.name, "my-module");

        let mut named = ModuleManifest::new("my-module", "1.0.0");
        named.name = "My Module".to_string();
        named.fill_defaults();
        assert_eq!(named.name, "My Module");
    }

    #[test]
    fn test_read_from_artifact() {
        let dir = TempDir::new().unwrap();
        let artifact = write_artifact(
            dir.path(),
            "demo@1.0.0.tar.gz",
            r#"{ "id": "demo", "version": "1.0.0" }"#,
        );

        let manifest = ModuleManifest::read_from_artifact(&artifact).unwrap();
        assert_eq!(manifest.id, "demo");
        // fill_defaults ran
        assert_eq!(manifest.name, "demo");
    }

    #[test]
    fn test_read_from_artifact_without_manifest() {
        let dir = TempDir::new().unwrap();
        let artifact_path = dir.path().join("empty.tar.gz");
        let tar_gz = File::create(&artifact_path).unwrap();
        let enc = GzEncoder::new(tar_gz, Compression::default());
        let mut builder = tar::Builder::new(enc);
        let payload = b"nothing";
        let mut header = tar::Header::new_gnu();
        header.set_path("readme.txt").unwrap();
        header.set_size(payload.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "readme.txt", &payload[..])
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let err = ModuleManifest::read_from_artifact(&artifact_path).unwrap_err();
        assert!(err.to_string().contains(MANIFEST_FILE));
    }

    #[test]
    fn test_read_from_artifact_invalid_manifest() {
        let dir = TempDir::new().unwrap();
        let artifact = write_artifact(
            dir.path(),
            "bad@0.0.1.tar.gz",
            r#"{ "id": " ", "version": "0.0.1" }"#,
        );

        assert!(ModuleManifest::read_from_artifact(&artifact).is_err());
    }

    #[test]
    fn test_write_artifact_helper_is_reusable() {
        // Other test modules reuse write_artifact; keep its layout stable.
        let dir = TempDir::new().unwrap();
        let artifact = write_artifact(
            dir.path(),
            "helper@1.0.0.tar.gz",
            r#"{ "id": "helper", "version": "1.0.0" }"#,
        );
        assert!(artifact.exists());
    }
}
