//! Capability traits shared by the registry, the loader and the host.

use std::any::TypeId;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::PluginSettings;
use crate::error::PluginError;

use super::clause::Attrs;
use super::entry::PluginEntry;
use super::fetch::{DownloadClient, Fetch};
use super::registry::PluginRegistry;
use super::{path, ConnectionHandler};

/// Identity of a requested plugin type, usually a trait object such as
/// `dyn ConnectionHandler`.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl std::hash::Hash for TypeKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

impl std::fmt::Display for TypeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

/// A plugin holding resources that must be released when the registry
/// closes.
pub trait Closeable: Send + Sync {
    fn close(&self) -> anyhow::Result<()>;
}

impl<C: Closeable + ?Sized> Closeable for Box<C> {
    fn close(&self) -> anyhow::Result<()> {
        (**self).close()
    }
}

/// A registry member that lazily produces further plugins for one exact
/// type.
///
/// Provided plugins are not members of the registry; they only appear in
/// typed lookups.
pub trait TypeProvider: Send + Sync {
    /// The single type this provider answers for.
    fn provided_type(&self) -> TypeKey;

    /// Plugins for `requested`, or nothing unless `requested` equals
    /// [`provided_type`](Self::provided_type) exactly.
    fn provide(&self, requested: TypeKey, registry: &PluginRegistry) -> Vec<PluginEntry>;
}

/// Notified once the registry has finished loading.
pub trait RegistryDone: Send + Sync {
    fn done(&self) -> anyhow::Result<()>;
}

/// A plugin accepting its declaration attributes.
pub trait Configurable: Send + Sync {
    fn set_properties(&self, attrs: &Attrs) -> anyhow::Result<()>;
}

/// Source of implementations for service (interface) declarations.
pub trait ExternalPlugins: Send + Sync {
    fn implementations(
        &self,
        service: TypeKey,
        attrs: &Attrs,
    ) -> anyhow::Result<Vec<PluginEntry>>;
}

/// The build context a registry is loaded for.
///
/// Hosts supply properties, the diagnostic channel and path resolution;
/// the remaining methods have working defaults.
pub trait Host: Send + Sync {
    /// Raw property lookup.
    fn property(&self, key: &str) -> Option<String>;

    /// Property merged across this context only (not its parents).
    fn merged_local_property(&self, key: &str) -> Option<String> {
        self.property(key)
    }

    /// Property merged across this context and its parents.
    fn merged_property(&self, key: &str) -> Option<String> {
        self.property(key)
    }

    /// Directory relative declared paths are resolved against.
    fn base_dir(&self) -> &Path;

    fn settings(&self) -> PluginSettings {
        PluginSettings::default()
    }

    /// Diagnostic channel. Loading never stops for a reported error.
    fn report(&self, error: PluginError);

    /// Resolve a declared path to an absolute file.
    ///
    /// Expands `~`, `${VAR}` and `${PLUGIN_CACHE}`, then anchors relative
    /// paths at [`base_dir`](Self::base_dir).
    fn resolve_path(&self, declared: &str) -> anyhow::Result<PathBuf> {
        path::expand_declared_path(
            declared,
            self.base_dir(),
            self.settings().resolved_cache_dir().as_deref(),
        )
    }

    /// Apply declaration attributes to a freshly built plugin.
    fn customize(
        &self,
        plugin: &PluginEntry,
        attrs: &Attrs,
        _registry: &PluginRegistry,
    ) -> anyhow::Result<()> {
        match plugin.view::<dyn Configurable>() {
            Some(configurable) => configurable.set_properties(attrs),
            None => Ok(()),
        }
    }

    /// The host itself as a registry member.
    fn as_plugin(&self) -> Option<PluginEntry> {
        None
    }

    /// Plugins inherited from the parent context.
    fn parent_plugins(&self) -> Vec<PluginEntry> {
        Vec::new()
    }

    fn external_plugins(&self) -> Option<Arc<dyn ExternalPlugins>> {
        None
    }

    /// Hook run after loading, before [`RegistryDone`] notifications.
    fn add_extensions(&self, _registry: &PluginRegistry) {}

    /// Build the client used to download plugin path entries.
    ///
    /// Every [`ConnectionHandler`] currently in the registry decorates its
    /// requests.
    fn download_client(&self, registry: &PluginRegistry) -> anyhow::Result<Box<dyn Fetch>> {
        let handlers = registry.get_plugins::<dyn ConnectionHandler>();
        let client = DownloadClient::new(&self.settings().download, handlers)?;
        Ok(Box::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Marker {}

    #[test]
    fn type_key_equality_is_by_type() {
        assert_eq!(TypeKey::of::<dyn Marker>(), TypeKey::of::<dyn Marker>());
        assert_ne!(TypeKey::of::<dyn Marker>(), TypeKey::of::<dyn Closeable>());
        assert!(TypeKey::of::<dyn Marker>().name().contains("Marker"));
    }
}
