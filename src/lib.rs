//! modkit - Module management for a pluggable host application
//!
//! modkit discovers packaged modules on disk, resolves their dependency
//! constraints against what is actually installed, and loads the survivors
//! in an order where every module comes after its dependencies. A remote
//! catalog supplies new modules and updates:
//!
//! - Semantic versions with `=`, `>=`, `<=`, and `~>` (pessimistic)
//!   constraints, conjoined with commas
//! - Iterative dependency checking that removes modules with unmet hard
//!   dependencies until the installed set is self-consistent
//! - Deterministic topological load order with discovery-order tie-breaks
//! - A cached catalog client over the remote module index
//! - Deduplicated, cancellable artifact downloads with atomic installs
//! - Per-module lifecycle isolation: one misbehaving module never takes
//!   the rest down
//!
//! # Examples
//!
//! ```no_run
//! use modkit::{CatalogClient, HostContext, HostState, ModuleManifest};
//! use std::sync::{Arc, Mutex};
//!
//! # struct NoLookup;
//! # impl modkit::InstanceLookup for NoLookup {
//! #     fn entry_points(
//! #         &self,
//! #         _entry: &modkit::RegistryEntry,
//! #     ) -> modkit::Result<Vec<modkit::InstanceConstructor>> {
//! #         Ok(Vec::new())
//! #     }
//! # }
//! # fn main() -> modkit::Result<()> {
//! let host = ModuleManifest::new("my-host", "2.1.0");
//! let data_dir = HostContext::default_data_dir(&host.id)?;
//! let context = Arc::new(HostContext::new(data_dir, host)?);
//!
//! // Scan the modules directory, resolve dependencies, load modules
//! let mut state = HostState::new(&context, Box::new(NoLookup))?;
//! let report = state.startup(&context)?;
//! println!("removed {} module(s) with unmet dependencies", report.removed.len());
//!
//! // Connect to the remote catalog
//! let mut catalog = CatalogClient::new("https://modules.example.org/api/")?;
//! println!("catalog lists {} module(s)", catalog.refresh()?);
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`version`] - Semantic versions and version constraints
//! - [`manifest`] - Module manifests and their packaged artifacts
//! - [`registry`] - The installed-module registry and disk scan
//! - [`resolver`] - Dependency checking and load-order computation
//! - [`catalog`] - Client for the remote module catalog
//! - [`installer`] - Artifact downloads and install orchestration
//! - [`lifecycle`] - Module instantiation, enable, and disable
//! - [`config`] - Host context and per-module settings
//! - [`error`] - Error types and result handling

pub mod catalog;
pub mod config;
pub mod error;
pub mod installer;
pub mod lifecycle;
pub mod manifest;
pub mod registry;
pub mod resolver;
pub mod version;

pub use catalog::{CatalogClient, CatalogEntry, CatalogVersion};
pub use config::{HostContext, ModuleEntrySettings, ModuleSettings, SETTINGS_FILE};
pub use error::{Error, Result};
pub use installer::{artifact_key, HostState, InstallCallback, InstalledModule, Installer};
pub use lifecycle::{
    InstanceConstructor, InstanceLookup, LifecycleManager, LoadedModule, ModuleContext,
    ModuleInstance, ModuleState,
};
pub use manifest::{DependencySpec, ModuleManifest, MANIFEST_FILE};
pub use registry::{ModuleRegistry, RegistryEntry};
pub use resolver::{check_dependencies, resolve, sort_by_dependencies, DependencyReport};
pub use version::{SemanticVersion, VersionConstraint};
