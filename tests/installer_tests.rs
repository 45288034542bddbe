//! End-to-end install tests: a mock catalog server serves real tar.gz
//! artifacts, and the installer downloads, registers, and loads them.


use modkit::{
    CatalogClient, Error, HostState, InstallCallback, InstanceConstructor, InstanceLookup,
    Installer, ModuleInstance, RegistryEntry, Result,
};
use std::io::Write;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use test_utils::{catalog_listing, MockModule, TestHost};

const WAIT: Duration = Duration::from_secs(10);

struct NullInstance;

impl ModuleInstance for NullInstance {
    fn on_enable(&mut self) -> Result<()> {
        Ok(())
    }

    fn on_disable(&mut self) -> Result<()> {
        Ok(())
    }
}

struct NullLookup;

impl InstanceLookup for NullLookup {
    fn entry_points(&self, _entry: &RegistryEntry) -> Result<Vec<InstanceConstructor>> {
        Ok(vec![Box::new(|_context| {
            Ok(Box::new(NullInstance) as Box<dyn ModuleInstance>)
        })])
    }
}

struct Fixture {
    host: TestHost,
    installer: Installer,
    state: Arc<Mutex<HostState>>,
}

fn fixture(catalog_url: &str) -> Fixture {
    let host = TestHost::new();
    let state = Arc::new(Mutex::new(
        HostState::new(&host.context, Box::new(NullLookup)).unwrap(),
    ));
    let catalog = Arc::new(Mutex::new(CatalogClient::new(catalog_url).unwrap()));
    let installer = Installer::new(host.context.clone(), state.clone(), catalog.clone()).unwrap();
    catalog.lock().unwrap().refresh().unwrap();
    Fixture {
        host,
        installer,
        state,
    }
}

fn channel_callback() -> (InstallCallback, mpsc::Receiver<std::result::Result<String, String>>) {
    let (tx, rx) = mpsc::channel();
    let callback: InstallCallback = Arc::new(move |outcome| {
        let message = match outcome {
            Ok(installed) => Ok(installed.manifest.id.clone()),
            Err(e) => Err(e.to_string()),
        };
        let _ = tx.send(message);
    });
    (callback, rx)
}

#[test]
fn test_install_latest_from_catalog() {
    let module = MockModule::new("chat", "1.2.0").with_dependency("host", ">= 1.0.0");
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/modules")
        .with_status(200)
        .with_body(catalog_listing(&[&module]))
        .create();
    let asset = server
        .mock("GET", "/assets/modules/chat@1.2.0.tar.gz")
        .with_status(200)
        .with_header("content-type", "application/gzip")
        .with_body(module.artifact_bytes())
        .create();

    let fixture = fixture(&server.url());
    let (callback, rx) = channel_callback();
    fixture.installer.install("chat", None, callback).unwrap();

    assert_eq!(rx.recv_timeout(WAIT).unwrap(), Ok("chat".to_string()));
    asset.assert();
    assert!(fixture.host.has_artifact("chat", "1.2.0"));

    let state = fixture.state.lock().unwrap();
    assert!(state.registry.contains("chat"));
    assert!(state.lifecycle.is_loaded("chat"));
}

#[test]
fn test_second_install_skips_network() {
    let module = MockModule::new("chat", "1.2.0");
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/modules")
        .with_status(200)
        .with_body(catalog_listing(&[&module]))
        .create();
    let asset = server
        .mock("GET", "/assets/modules/chat@1.2.0.tar.gz")
        .with_status(200)
        .with_body(module.artifact_bytes())
        .expect(1)
        .create();

    let fixture = fixture(&server.url());

    let (callback, rx) = channel_callback();
    fixture
        .installer
        .install("chat", Some("1.2.0"), callback)
        .unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), Ok("chat".to_string()));

    // the artifact is on disk now; this must not touch the server
    let (callback, rx) = channel_callback();
    fixture
        .installer
        .install("chat", Some("1.2.0"), callback)
        .unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), Ok("chat".to_string()));

    asset.assert();
}

#[test]
fn test_concurrent_installs_share_one_transfer() {
    let module = MockModule::new("chat", "1.2.0");
    let bytes = module.artifact_bytes();
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/modules")
        .with_status(200)
        .with_body(catalog_listing(&[&module]))
        .create();
    // serve the artifact slowly so the second request arrives while the
    // transfer is still in flight
    let asset = server
        .mock("GET", "/assets/modules/chat@1.2.0.tar.gz")
        .with_status(200)
        .with_chunked_body(move |writer| {
            let half = bytes.len() / 2;
            writer.write_all(&bytes[..half])?;
            std::thread::sleep(Duration::from_millis(500));
            writer.write_all(&bytes[half..])
        })
        .expect(1)
        .create();

    let fixture = fixture(&server.url());
    let (first, first_rx) = channel_callback();
    let (second, second_rx) = channel_callback();
    fixture.installer.install("chat", None, first).unwrap();
    fixture.installer.install("chat", None, second).unwrap();
    assert!(fixture.installer.is_downloading("chat", "1.2.0"));

    assert_eq!(first_rx.recv_timeout(WAIT).unwrap(), Ok("chat".to_string()));
    assert_eq!(second_rx.recv_timeout(WAIT).unwrap(), Ok("chat".to_string()));
    asset.assert();

    let state = fixture.state.lock().unwrap();
    assert!(state.registry.contains("chat"));
}

#[test]
fn test_cancel_discards_in_flight_transfer() {
    let module = MockModule::new("chat", "1.2.0");
    let bytes = module.artifact_bytes();
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/modules")
        .with_status(200)
        .with_body(catalog_listing(&[&module]))
        .create();
    // stall mid-body so the cancel lands while the transfer is running
    server
        .mock("GET", "/assets/modules/chat@1.2.0.tar.gz")
        .with_status(200)
        .with_chunked_body(move |writer| {
            let half = bytes.len() / 2;
            writer.write_all(&bytes[..half])?;
            std::thread::sleep(Duration::from_millis(500));
            writer.write_all(&bytes[half..])
        })
        .create();

    let fixture = fixture(&server.url());
    let (callback, rx) = channel_callback();
    fixture.installer.install("chat", None, callback).unwrap();
    assert!(fixture.installer.is_downloading("chat", "1.2.0"));
    assert!(fixture.installer.cancel("chat", "1.2.0"));

    let outcome = rx.recv_timeout(WAIT).unwrap();
    assert!(outcome.unwrap_err().contains("cancelled"));
    assert!(!fixture.host.has_artifact("chat", "1.2.0"));
    assert!(!fixture
        .host
        .modules_dir()
        .join("chat@1.2.0.tar.gz.part")
        .exists());
    assert!(fixture.installer.in_flight().is_empty());

    let state = fixture.state.lock().unwrap();
    assert!(!state.registry.contains("chat"));
}

#[test]
fn test_failed_download_leaves_no_artifact() {
    let module = MockModule::new("chat", "1.2.0");
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/modules")
        .with_status(200)
        .with_body(catalog_listing(&[&module]))
        .create();
    server
        .mock("GET", "/assets/modules/chat@1.2.0.tar.gz")
        .with_status(404)
        .create();

    let fixture = fixture(&server.url());
    let (callback, rx) = channel_callback();
    fixture.installer.install("chat", None, callback).unwrap();

    let outcome = rx.recv_timeout(WAIT).unwrap();
    assert!(outcome.is_err());
    assert!(!fixture.host.has_artifact("chat", "1.2.0"));
    // no half-written temp file either
    assert!(!fixture
        .host
        .modules_dir()
        .join("chat@1.2.0.tar.gz.part")
        .exists());
    assert!(fixture.installer.in_flight().is_empty());
}

#[test]
fn test_corrupt_artifact_is_not_registered() {
    let module = MockModule::new("chat", "1.2.0");
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/modules")
        .with_status(200)
        .with_body(catalog_listing(&[&module]))
        .create();
    server
        .mock("GET", "/assets/modules/chat@1.2.0.tar.gz")
        .with_status(200)
        .with_body("definitely not a gzip stream")
        .create();

    let fixture = fixture(&server.url());
    let (callback, rx) = channel_callback();
    fixture.installer.install("chat", None, callback).unwrap();

    assert!(rx.recv_timeout(WAIT).unwrap().is_err());
    let state = fixture.state.lock().unwrap();
    assert!(!state.registry.contains("chat"));
}

#[test]
fn test_unknown_module_fails_before_any_transfer() {
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/modules")
        .with_status(200)
        .with_body("[]")
        .create();

    let fixture = fixture(&server.url());
    let (callback, _rx) = channel_callback();
    assert!(matches!(
        fixture.installer.install("ghost", None, callback),
        Err(Error::ModuleNotFound(_))
    ));
}

#[test]
fn test_unknown_version_fails_before_any_transfer() {
    let module = MockModule::new("chat", "1.2.0");
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/modules")
        .with_status(200)
        .with_body(catalog_listing(&[&module]))
        .create();

    let fixture = fixture(&server.url());
    let (callback, _rx) = channel_callback();
    assert!(matches!(
        fixture.installer.install("chat", Some("9.9.9"), callback),
        Err(Error::VersionNotFound { .. })
    ));
}

#[test]
fn test_install_then_uninstall_round_trip() {
    let module = MockModule::new("chat", "1.2.0");
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/modules")
        .with_status(200)
        .with_body(catalog_listing(&[&module]))
        .create();
    server
        .mock("GET", "/assets/modules/chat@1.2.0.tar.gz")
        .with_status(200)
        .with_body(module.artifact_bytes())
        .create();

    let fixture = fixture(&server.url());
    let (callback, rx) = channel_callback();
    fixture.installer.install("chat", None, callback).unwrap();
    rx.recv_timeout(WAIT).unwrap().unwrap();

    fixture.installer.uninstall("chat").unwrap();

    let state = fixture.state.lock().unwrap();
    assert!(!state.registry.contains("chat"));
    assert!(!state.lifecycle.is_loaded("chat"));
    drop(state);
    // the artifact stays behind for the next scan to rediscover
    assert!(fixture.host.has_artifact("chat", "1.2.0"));
}
