//! Download and install orchestration
//!
//! Artifacts are fetched from the catalog's asset endpoint onto a `.part`
//! temp file and moved into the modules directory with an atomic rename,
//! so a crashed or cancelled transfer never leaves a half-written artifact
//! behind. Requests for an artifact already on disk short-circuit without
//! touching the network, and concurrent requests for the same id/version
//! pair are deduplicated onto a single in-flight transfer whose waiters
//! all receive the one outcome.
//!
//! All mutable host state sits behind one coarse [`Mutex`], so registry,
//! settings, and lifecycle mutations are serialized.

use crate::catalog::{CatalogClient, CONNECT_TIMEOUT, REQUEST_TIMEOUT};
use crate::config::{HostContext, ModuleSettings};
use crate::lifecycle::{InstanceLookup, LifecycleManager};
use crate::manifest::ModuleManifest;
use crate::registry::ModuleRegistry;
use crate::resolver::{self, DependencyReport};
use crate::{Error, Result};
use log::{error, info, warn};
use reqwest::blocking::Client;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

const TRANSFER_CHUNK: usize = 8 * 1024;

/// Artifact key for an id/version pair; also the artifact file stem.
pub fn artifact_key(id: &str, version: &str) -> String {
    format!("{}@{}", id, version)
}

/// Descriptor of a successfully installed module.
#[derive(Debug, Clone)]
pub struct InstalledModule {
    pub manifest: ModuleManifest,
    pub artifact: PathBuf,
}

/// Completion callback for a download. Every waiter deduplicated onto the
/// same transfer receives the same outcome by reference.
pub type InstallCallback =
    Arc<dyn Fn(std::result::Result<&InstalledModule, &Error>) + Send + Sync>;

/// One in-flight artifact transfer.
struct Transfer {
    cancel: Arc<AtomicBool>,
    waiters: Vec<InstallCallback>,
}

/// Mutable host state: everything a running host mutates lives here,
/// behind a single lock owned by the [`Installer`].
pub struct HostState {
    pub registry: ModuleRegistry,
    pub settings: ModuleSettings,
    pub lifecycle: LifecycleManager,
    in_flight: HashMap<String, Transfer>,
}

impl HostState {
    pub fn new(context: &Arc<HostContext>, lookup: Box<dyn InstanceLookup>) -> Result<Self> {
        let registry = ModuleRegistry::new(context)?;
        let settings = ModuleSettings::load(context.settings_path())?;
        let lifecycle = LifecycleManager::new(context.clone(), lookup);
        Ok(Self {
            registry,
            settings,
            lifecycle,
            in_flight: HashMap::new(),
        })
    }

    /// Startup sequence: scan the modules directory, drop entries with
    /// unmet hard dependencies, and load the survivors in dependency
    /// order. The report lists what was removed and why.
    pub fn startup(&mut self, context: &HostContext) -> Result<DependencyReport> {
        let found = self.registry.scan(context.modules_dir());
        info!("discovered {} module(s) in {}", found, context.modules_dir().display());

        // seed a settings entry for every module seen for the first time
        for entry in self.registry.entries() {
            if entry.id() != self.registry.host_id() {
                self.settings.ensure_entry(entry.id());
            }
        }
        self.settings.save(context.settings_path())?;

        let (report, order) = resolver::resolve(&self.registry)?;
        for line in &report.log {
            warn!("{}", line);
        }
        for id in &report.removed {
            self.registry.remove(id);
        }
        self.lifecycle.load_all(&self.registry, &order, &self.settings);
        Ok(report)
    }
}

impl std::fmt::Debug for HostState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostState")
            .field("registry", &self.registry)
            .field("in_flight", &self.in_flight.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Orchestrates catalog lookups, artifact downloads, and installation
/// into the registry and lifecycle. Cloning is cheap and shares the
/// underlying state, so a clone can be moved onto a worker thread.
#[derive(Clone)]
pub struct Installer {
    context: Arc<HostContext>,
    state: Arc<Mutex<HostState>>,
    catalog: Arc<Mutex<CatalogClient>>,
    client: Client,
}

impl Installer {
    pub fn new(
        context: Arc<HostContext>,
        state: Arc<Mutex<HostState>>,
        catalog: Arc<Mutex<CatalogClient>>,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            context,
            state,
            catalog,
            client,
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, HostState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_catalog(&self) -> MutexGuard<'_, CatalogClient> {
        self.catalog
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Install a module from the catalog: the requested version, or the
    /// catalog's latest when `version` is `None`. The callback fires once
    /// the artifact is on disk and registered, or with the failure.
    ///
    /// Returns immediately after the transfer is started; an artifact
    /// already on disk completes synchronously without any network
    /// traffic, and a version already in flight attaches the callback to
    /// the running transfer instead of starting a second one.
    pub fn install(&self, id: &str, version: Option<&str>, callback: InstallCallback) -> Result<()> {
        let (manifest, url) = {
            let catalog = self.lock_catalog();
            let entry = catalog.lookup(id)?;
            let manifest = entry.manifest(version)?;
            let url = catalog.artifact_url(&manifest.id, &manifest.version)?;
            (manifest, url)
        };
        self.download(&manifest.id, &manifest.version, url, callback)
    }

    /// Download one artifact and register it. Exposed for callers that
    /// already resolved the asset URL; [`install`](Self::install) is the
    /// usual entry point.
    pub fn download(
        &self,
        id: &str,
        version: &str,
        url: url::Url,
        callback: InstallCallback,
    ) -> Result<()> {
        let key = artifact_key(id, version);
        let artifact = self
            .context
            .modules_dir()
            .join(format!("{}.tar.gz", key));

        if artifact.is_file() {
            info!("artifact '{}' already present; skipping download", key);
            match self.register_install(&artifact) {
                Ok(installed) => callback(Ok(&installed)),
                Err(e) => callback(Err(&e)),
            }
            return Ok(());
        }

        let cancel = Arc::new(AtomicBool::new(false));
        {
            let mut state = self.lock_state();
            if let Some(transfer) = state.in_flight.get_mut(&key) {
                transfer.waiters.push(callback);
                return Ok(());
            }
            state.in_flight.insert(
                key.clone(),
                Transfer {
                    cancel: cancel.clone(),
                    waiters: vec![callback],
                },
            );
        }

        let worker = self.clone();
        thread::spawn(move || worker.run_transfer(key, url, artifact, cancel));
        Ok(())
    }

    /// Request cancellation of an in-flight transfer. Returns false when
    /// nothing with that id/version is currently transferring.
    pub fn cancel(&self, id: &str, version: &str) -> bool {
        let state = self.lock_state();
        match state.in_flight.get(&artifact_key(id, version)) {
            Some(transfer) => {
                transfer.cancel.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Keys of the transfers currently in flight.
    pub fn in_flight(&self) -> Vec<String> {
        self.lock_state().in_flight.keys().cloned().collect()
    }

    pub fn is_downloading(&self, id: &str, version: &str) -> bool {
        self.lock_state()
            .in_flight
            .contains_key(&artifact_key(id, version))
    }

    /// Unload a module and drop it from the registry and settings. The
    /// artifact stays on disk; delete it separately to stop the next scan
    /// from rediscovering the module.
    pub fn uninstall(&self, id: &str) -> Result<()> {
        let mut guard = self.lock_state();
        let HostState {
            registry,
            settings,
            lifecycle,
            ..
        } = &mut *guard;

        lifecycle.unload_module(id);
        registry
            .remove(id)
            .ok_or_else(|| Error::ModuleNotFound(id.to_string()))?;
        if settings.remove(id) {
            settings.save(self.context.settings_path())?;
        }
        info!("uninstalled module '{}'", id);
        Ok(())
    }

    /// Worker-thread body: transfer, register, then hand the single
    /// outcome to every waiter collected while the transfer ran.
    fn run_transfer(self, key: String, url: url::Url, artifact: PathBuf, cancel: Arc<AtomicBool>) {
        let result = self
            .transfer(&key, &url, &artifact, &cancel)
            .and_then(|()| self.register_install(&artifact));

        let waiters = {
            let mut state = self.lock_state();
            state
                .in_flight
                .remove(&key)
                .map(|transfer| transfer.waiters)
                .unwrap_or_default()
        };

        match &result {
            Ok(installed) => {
                info!("installed module '{}' @{}", installed.manifest.id, installed.manifest.version);
                for waiter in &waiters {
                    waiter(Ok(installed));
                }
            }
            Err(e) => {
                error!("download of '{}' failed: {}", key, e);
                for waiter in &waiters {
                    waiter(Err(e));
                }
            }
        }
    }

    /// Stream the asset onto `<artifact>.part`, checking the cancel flag
    /// between chunks, then atomically rename into place. Any failure or
    /// cancellation removes the temp file.
    fn transfer(&self, key: &str, url: &url::Url, artifact: &Path, cancel: &AtomicBool) -> Result<()> {
        let mut part_name = artifact.as_os_str().to_os_string();
        part_name.push(".part");
        let part = PathBuf::from(part_name);

        let mut response = self.client.get(url.clone()).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Cloud(format!(
                "artifact download from {} failed with HTTP {}",
                url,
                status.as_u16()
            )));
        }

        let mut out = File::create(&part)?;
        let mut buffer = [0u8; TRANSFER_CHUNK];
        let outcome = loop {
            if cancel.load(Ordering::Relaxed) {
                break Err(Error::Cancelled(key.to_string()));
            }
            match response.read(&mut buffer) {
                Ok(0) => break Ok(()),
                Ok(read) => {
                    if let Err(e) = out.write_all(&buffer[..read]) {
                        break Err(e.into());
                    }
                }
                Err(e) => break Err(e.into()),
            }
        };
        drop(out);

        match outcome {
            Ok(()) => {
                if let Err(e) = fs::rename(&part, artifact) {
                    let _ = fs::remove_file(&part);
                    return Err(e.into());
                }
                Ok(())
            }
            Err(e) => {
                let _ = fs::remove_file(&part);
                Err(e)
            }
        }
    }

    /// Register an on-disk artifact: read and validate its embedded
    /// manifest, upsert the registry entry, seed the settings entry, and
    /// load the module unless the user disabled it. Reinstalling the same
    /// id/version is a no-op beyond re-validation.
    fn register_install(&self, artifact: &Path) -> Result<InstalledModule> {
        let manifest = ModuleManifest::read_from_artifact(artifact)?;

        let mut guard = self.lock_state();
        let HostState {
            registry,
            settings,
            lifecycle,
            ..
        } = &mut *guard;

        registry.insert(manifest.clone(), Some(artifact.to_path_buf()))?;
        if settings.ensure_entry(&manifest.id) {
            settings.save(self.context.settings_path())?;
        }
        if settings.is_enabled(&manifest.id) {
            if let Some(entry) = registry.get(&manifest.id) {
                if let Err(e) = lifecycle.load_module(entry) {
                    warn!("loading freshly installed module '{}' failed: {}", manifest.id, e);
                }
            }
        } else {
            info!("module '{}' installed but disabled; not loading", manifest.id);
        }

        Ok(InstalledModule {
            manifest,
            artifact: artifact.to_path_buf(),
        })
    }
}

impl std::fmt::Debug for Installer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Installer")
            .field("data_dir", &self.context.data_dir())
            .finish()
    }
}
