//! Plugin registry.
//!
//! Owns the member set of one build context and answers typed lookups.
//! Members that are [`TypeProvider`]s are expanded on demand: a provider
//! is only asked for plugins when a lookup for its exact type reaches it.
//!
//! The member set is an immutable snapshot published through `ArcSwap`.
//! Readers never lock; writers publish a modified copy.

use arc_swap::ArcSwap;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{FatalError, PluginError};

use super::catalog::{ClassPath, FactoryTable};
use super::clause::{NONE, PLUGIN, PLUGINPATH};
use super::entry::PluginEntry;
use super::loader::PluginLoader;
use super::traits::{Host, RegistryDone, TypeKey};

/// Registry of plugins for one build context.
///
/// Thread-safe for concurrent add/remove/lookup. [`close`](Self::close)
/// must not race with readers.
pub struct PluginRegistry {
    /// Registered members, in registration order
    plugins: ArcSwap<Vec<PluginEntry>>,
    /// Members released on close
    closeables: ArcSwap<Vec<PluginEntry>>,
    /// Commands whose plugin failed to load
    missing_commands: RwLock<HashSet<String>>,
    /// Roots added while loading
    class_path: ClassPath,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginRegistry {
    /// Create an empty registry with an empty class path.
    ///
    /// Nothing is loaded; see [`load`](Self::load) for the full protocol.
    pub fn new() -> Self {
        Self {
            plugins: ArcSwap::from_pointee(Vec::new()),
            closeables: ArcSwap::from_pointee(Vec::new()),
            missing_commands: RwLock::new(HashSet::new()),
            class_path: ClassPath::new(),
        }
    }

    /// Create a registry for `host` and run the full load protocol.
    pub fn load(host: &Arc<dyn Host>, table: &FactoryTable) -> Result<Self, FatalError> {
        let registry = Self::new();
        registry.init(host, table)?;
        registry.post_init(host.as_ref());
        Ok(registry)
    }

    /// Populate the registry from the host's declarations.
    ///
    /// A `-plugin` value of exactly `none` disables loading. Otherwise the
    /// host itself, then the parent's plugins, then the local declarations
    /// are added.
    pub fn init(&self, host: &Arc<dyn Host>, table: &FactoryTable) -> Result<(), FatalError> {
        if host.property(PLUGIN).as_deref().map(str::trim) == Some(NONE) {
            tracing::debug!("Plugin loading disabled");
            return Ok(());
        }

        if let Some(own) = host.as_plugin() {
            self.add(own);
        }
        self.add_all(host.parent_plugins());

        let declarations = host.merged_local_property(PLUGIN).unwrap_or_default();
        let plugin_path = host.merged_property(PLUGINPATH).unwrap_or_default();
        PluginLoader::new(host, self, table).load_plugins(&declarations, &plugin_path)
    }

    /// Run extensions and notify [`RegistryDone`] plugins.
    ///
    /// Runs outside of [`init`](Self::init) so extensions see the loaded
    /// registry.
    pub fn post_init(&self, host: &dyn Host) {
        host.add_extensions(self);

        for plugin in self.get_plugins::<dyn RegistryDone>() {
            if let Err(e) = plugin.done() {
                host.report(PluginError::Unexpected {
                    context: "calling done on a registry-done plugin".into(),
                    source: e,
                });
            }
        }
    }

    /// Add a member; returns `false` if it is already present.
    pub fn add(&self, plugin: PluginEntry) -> bool {
        add_unique(&self.plugins, plugin)
    }

    /// Add several members; returns `true` if any was new.
    pub fn add_all(&self, plugins: impl IntoIterator<Item = PluginEntry>) -> bool {
        plugins
            .into_iter()
            .fold(false, |changed, plugin| self.add(plugin) || changed)
    }

    /// Add a member, tracking it for teardown if it is closeable.
    pub fn add_closeable(&self, plugin: PluginEntry) -> bool {
        if plugin.closeable().is_some() {
            add_unique(&self.closeables, plugin.clone());
        }
        self.add(plugin)
    }

    /// Remove a member by identity; returns `false` if it was not present.
    ///
    /// # Arguments
    ///
    /// * `plugin` - The entry to remove, compared by identity
    pub fn remove(&self, plugin: &PluginEntry) -> bool {
        let mut removed = false;
        self.plugins.rcu(|current| {
            removed = current.contains(plugin);
            current
                .iter()
                .filter(|p| *p != plugin)
                .cloned()
                .collect::<Vec<_>>()
        });
        removed
    }

    /// Whether `plugin` (by identity) is currently a member.
    pub fn contains(&self, plugin: &PluginEntry) -> bool {
        self.plugins.load().contains(plugin)
    }

    /// Snapshot of the members. Provided plugins are not members.
    pub fn plugins(&self) -> Arc<Vec<PluginEntry>> {
        self.plugins.load_full()
    }

    pub fn len(&self) -> usize {
        self.plugins.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.load().is_empty()
    }

    /// First plugin assignable to `T`, expanding providers of `T` as
    /// they are reached.
    pub fn get_plugin<T: ?Sized + 'static>(&self) -> Option<Arc<T>> {
        let key = TypeKey::of::<T>();
        let snapshot = self.plugins.load_full();
        snapshot
            .iter()
            .flat_map(|member| self.expand(member, key))
            .find_map(|plugin| plugin.view::<T>())
    }

    /// Every plugin assignable to `T`, provider output included, in
    /// registration order.
    pub fn get_plugins<T: ?Sized + 'static>(&self) -> Vec<Arc<T>> {
        let key = TypeKey::of::<T>();
        let snapshot = self.plugins.load_full();
        snapshot
            .iter()
            .flat_map(|member| self.expand(member, key))
            .filter_map(|plugin| plugin.view::<T>())
            .collect()
    }

    // Providers match on exact type; assignability is checked by the caller.
    fn expand(&self, member: &PluginEntry, key: TypeKey) -> Vec<PluginEntry> {
        match member.provider() {
            Some(provider) => provider.provide(key, self),
            None => vec![member.clone()],
        }
    }

    pub(crate) fn record_missing_command(&self, command: &str) {
        tracing::debug!(command = %command, "Deferring failure of plugin providing command");
        self.missing_commands.write().insert(command.to_string());
    }

    /// Whether `command` belongs to a plugin that failed to load.
    pub fn is_missing_plugin(&self, command: &str) -> bool {
        self.missing_commands.read().contains(command)
    }

    pub fn missing_commands(&self) -> Vec<String> {
        let mut commands: Vec<String> = self.missing_commands.read().iter().cloned().collect();
        commands.sort();
        commands
    }

    /// Roots added to the plugin class path while loading.
    pub fn class_path(&self) -> &ClassPath {
        &self.class_path
    }

    /// Close every tracked closeable and clear all state. Idempotent.
    pub fn close(&self) {
        let closeables = self.closeables.swap(Arc::new(Vec::new()));
        for plugin in closeables.iter() {
            if let Some(closeable) = plugin.closeable() {
                if let Err(e) = closeable.close() {
                    tracing::warn!(plugin = %plugin.name(), error = %e, "Failed to close plugin");
                }
            }
        }
        self.plugins.store(Arc::new(Vec::new()));
        self.missing_commands.write().clear();
    }
}

fn add_unique(set: &ArcSwap<Vec<PluginEntry>>, plugin: PluginEntry) -> bool {
    let mut added = false;
    set.rcu(|current| {
        added = !current.contains(&plugin);
        let mut next = Vec::clone(current);
        if added {
            next.push(plugin.clone());
        }
        next
    });
    added
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugin_count", &self.plugins.load().len())
            .field("closeable_count", &self.closeables.load().len())
            .field("missing_commands", &self.missing_commands.read().len())
            .finish_non_exhaustive()
    }
}
