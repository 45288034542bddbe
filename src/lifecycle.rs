//! Module lifecycle management
//!
//! A module moves through `Discovered -> Resolved -> Loaded -> Enabled`,
//! with `Disabled`/`Unloaded` terminal. Loading locates the module's single
//! entry point through the [`InstanceLookup`] seam, constructs it with the
//! host context and manifest injected, and runs its startup hook. A failure
//! in any of those steps is isolated to that module: it is logged, the
//! module is unloaded, and loading of the remaining modules continues.
//!
//! Unloading runs in reverse load order so dependents shut down before the
//! modules they depend on.

use crate::config::{HostContext, ModuleSettings};
use crate::manifest::ModuleManifest;
use crate::registry::{ModuleRegistry, RegistryEntry};
use crate::{Error, Result};
use log::{error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;

/// Lifecycle states of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Discovered,
    Resolved,
    Loaded,
    Enabled,
    Disabled,
    Unloaded,
}

/// Host services and identity injected into a module instance at
/// construction time.
#[derive(Debug, Clone)]
pub struct ModuleContext {
    pub host: Arc<HostContext>,
    pub manifest: ModuleManifest,
}

/// The capability contract every module entry point satisfies.
pub trait ModuleInstance: Send {
    /// Startup hook, invoked once after construction.
    fn on_enable(&mut self) -> Result<()>;

    /// Shutdown hook, invoked when the module is unloaded or disabled.
    fn on_disable(&mut self) -> Result<()>;
}

/// Constructor for one exported entry point.
pub type InstanceConstructor =
    Box<dyn FnOnce(ModuleContext) -> Result<Box<dyn ModuleInstance>> + Send>;

/// Capability lookup over a module artifact: return a constructor for
/// every exported type satisfying the module contract. The lifecycle
/// manager requires exactly one.
pub trait InstanceLookup: Send + Sync {
    fn entry_points(&self, entry: &RegistryEntry) -> Result<Vec<InstanceConstructor>>;
}

/// A running module bound to its registry entry.
pub struct LoadedModule {
    pub manifest: ModuleManifest,
    pub state: ModuleState,
    instance: Box<dyn ModuleInstance>,
}

impl LoadedModule {
    pub fn instance(&self) -> &dyn ModuleInstance {
        self.instance.as_ref()
    }

    pub fn instance_mut(&mut self) -> &mut dyn ModuleInstance {
        self.instance.as_mut()
    }
}

impl std::fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModule")
            .field("id", &self.manifest.id)
            .field("state", &self.state)
            .finish()
    }
}

/// Instantiates, enables, and disables modules in resolved order.
pub struct LifecycleManager {
    context: Arc<HostContext>,
    lookup: Box<dyn InstanceLookup>,
    loaded: HashMap<String, LoadedModule>,
    load_order: Vec<String>,
}

impl LifecycleManager {
    pub fn new(context: Arc<HostContext>, lookup: Box<dyn InstanceLookup>) -> Self {
        Self {
            context,
            lookup,
            loaded: HashMap::new(),
            load_order: Vec::new(),
        }
    }

    /// Load one module: find its single entry point, construct it, and run
    /// its startup hook. Zero or multiple entry points, or a failing
    /// constructor or hook, fail this module only.
    pub fn load_module(&mut self, entry: &RegistryEntry) -> Result<()> {
        let id = entry.id().to_string();
        if self.loaded.contains_key(&id) {
            return Ok(());
        }

        let mut constructors = self.lookup.entry_points(entry)?;
        if constructors.len() > 1 {
            return Err(Error::Instantiation(format!(
                "more than one entry point satisfying the module contract was found in '{}'",
                entry.manifest.name
            )));
        }
        let constructor = match constructors.pop() {
            Some(constructor) => constructor,
            None => {
                return Err(Error::Instantiation(format!(
                    "no entry point satisfying the module contract was found in '{}'",
                    entry.manifest.name
                )))
            }
        };

        let module_context = ModuleContext {
            host: self.context.clone(),
            manifest: entry.manifest.clone(),
        };
        let mut instance = constructor(module_context)
            .map_err(|e| Error::Instantiation(format!("constructing '{}' failed: {}", id, e)))?;

        if let Err(e) = instance.on_enable() {
            if let Err(shutdown) = instance.on_disable() {
                warn!("shutdown hook of '{}' failed after aborted startup: {}", id, shutdown);
            }
            return Err(Error::Instantiation(format!(
                "startup hook of '{}' failed: {}",
                id, e
            )));
        }

        info!("enabled module '{}' @{}", id, entry.version);
        self.loaded.insert(
            id.clone(),
            LoadedModule {
                manifest: entry.manifest.clone(),
                state: ModuleState::Enabled,
                instance,
            },
        );
        self.load_order.push(id);
        Ok(())
    }

    /// Load every module of `order` that is enabled in the settings,
    /// skipping the host entry. Failures are logged per module and never
    /// abort the rest of the sequence. Returns the number of modules
    /// loaded.
    pub fn load_all(
        &mut self,
        registry: &ModuleRegistry,
        order: &[String],
        settings: &ModuleSettings,
    ) -> usize {
        let mut count = 0;
        for id in order {
            if id == registry.host_id() {
                continue;
            }
            if !settings.is_enabled(id) {
                info!("module '{}' is disabled; not loading", id);
                continue;
            }
            let entry = match registry.get(id) {
                Some(entry) => entry,
                None => continue,
            };
            match self.load_module(entry) {
                Ok(()) => count += 1,
                Err(e) => {
                    error!("failed to load module '{}': {}", id, e);
                    self.unload_module(id);
                }
            }
        }
        count
    }

    /// Unload one module, invoking its shutdown hook. A failing hook is
    /// logged, never propagated. Returns false when the module was not
    /// loaded.
    pub fn unload_module(&mut self, id: &str) -> bool {
        let mut module = match self.loaded.remove(id) {
            Some(module) => module,
            None => return false,
        };
        module.state = ModuleState::Unloaded;
        if let Err(e) = module.instance.on_disable() {
            warn!("shutdown hook of '{}' failed: {}", id, e);
        }
        self.load_order.retain(|loaded| loaded != id);
        info!("unloaded module '{}'", id);
        true
    }

    /// Unload everything in reverse load order, so dependents go down
    /// before the modules they depend on.
    pub fn unload_all(&mut self) {
        let order: Vec<String> = self.load_order.iter().rev().cloned().collect();
        for id in order {
            self.unload_module(&id);
        }
    }

    /// O(1) lookup of a running module; absent when not currently loaded.
    pub fn get_instance(&self, id: &str) -> Option<&LoadedModule> {
        self.loaded.get(id)
    }

    pub fn get_instance_mut(&mut self, id: &str) -> Option<&mut LoadedModule> {
        self.loaded.get_mut(id)
    }

    pub fn is_loaded(&self, id: &str) -> bool {
        self.loaded.contains_key(id)
    }

    /// Currently loaded ids, in load order.
    pub fn loaded_ids(&self) -> &[String] {
        &self.load_order
    }
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("loaded", &self.load_order)
            .finish()
    }
}
