//! Test doubles for hosts, external plugin sources and download clients.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tempfile::TempDir;

use crate::config::PluginSettings;
use crate::error::{ErrorKind, PluginError};

use super::clause::Attrs;
use super::entry::PluginEntry;
use super::fetch::{Fetch, Resource};
use super::registry::PluginRegistry;
use super::traits::{Closeable, ExternalPlugins, Host, TypeKey};

/// Marker registered as the host's own plugin.
pub struct HostPlugin;

struct HostState {
    properties: HashMap<String, String>,
    base_dir: TempDir,
    settings: PluginSettings,
    reports: Mutex<Vec<PluginError>>,
    own: Option<PluginEntry>,
    parents: Vec<PluginEntry>,
    externals: Option<Arc<dyn ExternalPlugins>>,
    fetcher: Option<Arc<FakeFetcher>>,
}

impl Host for HostState {
    fn property(&self, key: &str) -> Option<String> {
        self.properties.get(key).cloned()
    }

    fn base_dir(&self) -> &Path {
        self.base_dir.path()
    }

    fn settings(&self) -> PluginSettings {
        self.settings.clone()
    }

    fn report(&self, error: PluginError) {
        self.reports.lock().push(error);
    }

    fn as_plugin(&self) -> Option<PluginEntry> {
        self.own.clone()
    }

    fn parent_plugins(&self) -> Vec<PluginEntry> {
        self.parents.clone()
    }

    fn external_plugins(&self) -> Option<Arc<dyn ExternalPlugins>> {
        self.externals.clone()
    }

    fn download_client(&self, _registry: &PluginRegistry) -> anyhow::Result<Box<dyn Fetch>> {
        match &self.fetcher {
            Some(fetcher) => Ok(Arc::clone(fetcher).client()),
            None => anyhow::bail!("no network in tests"),
        }
    }
}

/// Host with in-memory properties and a temporary base directory.
pub struct TestHost(Arc<HostState>);

impl TestHost {
    pub fn builder() -> TestHostBuilder {
        TestHostBuilder::default()
    }

    pub fn as_host(&self) -> Arc<dyn Host> {
        Arc::clone(&self.0) as Arc<dyn Host>
    }

    pub fn base_dir(&self) -> &Path {
        self.0.base_dir.path()
    }

    /// Every reported error, rendered.
    pub fn reports(&self) -> Vec<String> {
        self.0.reports.lock().iter().map(ToString::to_string).collect()
    }

    pub fn reports_of(&self, kind: ErrorKind) -> Vec<String> {
        self.0
            .reports
            .lock()
            .iter()
            .filter(|e| e.kind() == kind)
            .map(ToString::to_string)
            .collect()
    }
}

#[derive(Default)]
pub struct TestHostBuilder {
    properties: HashMap<String, String>,
    settings: PluginSettings,
    own: Option<PluginEntry>,
    parents: Vec<PluginEntry>,
    externals: Option<Arc<dyn ExternalPlugins>>,
    fetcher: Option<Arc<FakeFetcher>>,
}

impl TestHostBuilder {
    pub fn property(mut self, key: &str, value: &str) -> Self {
        self.properties.insert(key.to_string(), value.to_string());
        self
    }

    pub fn settings(mut self, settings: PluginSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_self_plugin(mut self) -> Self {
        self.own = Some(PluginEntry::new(HostPlugin));
        self
    }

    pub fn parent_plugin(mut self, plugin: PluginEntry) -> Self {
        self.parents.push(plugin);
        self
    }

    pub fn external_plugins(mut self, externals: Arc<dyn ExternalPlugins>) -> Self {
        self.externals = Some(externals);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<FakeFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn build(self) -> TestHost {
        TestHost(Arc::new(HostState {
            properties: self.properties,
            base_dir: TempDir::new().unwrap(),
            settings: self.settings,
            reports: Mutex::new(Vec::new()),
            own: self.own,
            parents: self.parents,
            externals: self.externals,
            fetcher: self.fetcher,
        }))
    }
}

/// External plugin source returning a fixed list, counting lookups.
pub struct StaticExternals {
    plugins: Vec<PluginEntry>,
    failure: Option<String>,
    calls: AtomicUsize,
}

impl StaticExternals {
    pub fn new(plugins: Vec<PluginEntry>) -> Arc<Self> {
        Arc::new(Self {
            plugins,
            failure: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            plugins: Vec::new(),
            failure: Some(message.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ExternalPlugins for StaticExternals {
    fn implementations(&self, _service: TypeKey, _attrs: &Attrs) -> anyhow::Result<Vec<PluginEntry>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(message) => anyhow::bail!("{message}"),
            None => Ok(self.plugins.clone()),
        }
    }
}

/// In-memory download source counting client builds, fetches and closes.
#[derive(Default)]
pub struct FakeFetcher {
    files: Mutex<HashMap<String, (Vec<u8>, Option<SystemTime>)>>,
    builds: AtomicUsize,
    fetches: AtomicUsize,
    closes: AtomicUsize,
}

impl FakeFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, url: &str, body: &[u8], last_modified: Option<SystemTime>) {
        self.files
            .lock()
            .insert(url.to_string(), (body.to_vec(), last_modified));
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn client(self: Arc<Self>) -> Box<dyn Fetch> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Box::new(FakeClient(self))
    }
}

struct FakeClient(Arc<FakeFetcher>);

impl Fetch for FakeClient {
    fn fetch(&self, url: &reqwest::Url) -> anyhow::Result<Resource> {
        self.0.fetches.fetch_add(1, Ordering::SeqCst);
        let files = self.0.files.lock();
        let Some((body, last_modified)) = files.get(url.as_str()) else {
            anyhow::bail!("404 Not Found: {url}");
        };
        Ok(Resource::new(Box::new(Cursor::new(body.clone())))
            .with_length(Some(body.len() as u64))
            .with_last_modified(*last_modified))
    }
}

impl Closeable for FakeClient {
    fn close(&self) -> anyhow::Result<()> {
        self.0.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
