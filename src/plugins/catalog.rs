//! Name-keyed plugin factories and the class path they are resolved over.
//!
//! Declared names resolve through a [`FactoryTable`] built at
//! configuration time. A definition is either a concrete factory or a
//! service type (answered later by a [`super::ServiceProvider`]). Builtin
//! definitions are always visible; archived definitions only once their
//! archive has been added to the [`ClassPath`].

use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::entry::PluginEntry;
use super::traits::TypeKey;

pub type Factory = Arc<dyn Fn() -> anyhow::Result<PluginEntry> + Send + Sync>;

/// Where a definition's code lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Shipped with the host; resolvable during the bootstrap pass.
    Builtin,
    /// Lives in the named archive (file name of a class path root).
    Archive(String),
}

#[derive(Clone)]
pub enum DefinitionKind {
    /// Zero-argument factory producing a new plugin.
    Concrete(Factory),
    /// A service type; declarations become lazy providers.
    Service(TypeKey),
}

#[derive(Clone)]
pub struct Definition {
    name: String,
    kind: DefinitionKind,
    origin: Origin,
}

impl Definition {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &DefinitionKind {
        &self.kind
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }
}

impl std::fmt::Debug for Definition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.kind {
            DefinitionKind::Concrete(_) => "concrete".to_string(),
            DefinitionKind::Service(key) => format!("service {key}"),
        };
        f.debug_struct("Definition")
            .field("name", &self.name)
            .field("kind", &kind)
            .field("origin", &self.origin)
            .finish()
    }
}

/// Why a declared name did not resolve.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("no plugin named {0}")]
    NotFound(String),

    #[error("{name} lives in archive {archive} which is not on the plugin class path")]
    ArchiveMissing { name: String, archive: String },
}

/// Name-keyed definitions.
#[derive(Default, Clone)]
pub struct FactoryTable {
    definitions: HashMap<String, Definition>,
}

impl FactoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a concrete plugin factory under `name`.
    pub fn register<F>(&mut self, name: &str, origin: Origin, factory: F) -> &mut Self
    where
        F: Fn() -> anyhow::Result<PluginEntry> + Send + Sync + 'static,
    {
        self.insert(name, DefinitionKind::Concrete(Arc::new(factory)), origin)
    }

    /// Register `name` as the service type `T`.
    pub fn register_service<T: ?Sized + 'static>(&mut self, name: &str, origin: Origin) -> &mut Self {
        self.insert(name, DefinitionKind::Service(TypeKey::of::<T>()), origin)
    }

    pub fn lookup(&self, name: &str) -> Option<&Definition> {
        self.definitions.get(name)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    fn insert(&mut self, name: &str, kind: DefinitionKind, origin: Origin) -> &mut Self {
        self.definitions.insert(
            name.to_string(),
            Definition {
                name: name.to_string(),
                kind,
                origin,
            },
        );
        self
    }
}

impl std::fmt::Debug for FactoryTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryTable")
            .field("definitions", &self.definitions.len())
            .finish()
    }
}

/// Roots added to the plugin loader's search path.
#[derive(Debug, Default)]
pub struct ClassPath {
    roots: RwLock<Vec<PathBuf>>,
}

impl ClassPath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a root; returns `false` if it was already present.
    pub fn add(&self, root: impl Into<PathBuf>) -> bool {
        let root = root.into();
        let mut roots = self.roots.write();
        if roots.contains(&root) {
            return false;
        }
        tracing::debug!(root = %root.display(), "Adding root to plugin class path");
        roots.push(root);
        true
    }

    pub fn contains(&self, root: &Path) -> bool {
        self.roots.read().iter().any(|r| r == root)
    }

    pub fn roots(&self) -> Vec<PathBuf> {
        self.roots.read().clone()
    }

    /// Whether a root with this file name has been added.
    pub fn has_archive(&self, archive: &str) -> bool {
        self.roots
            .read()
            .iter()
            .any(|root| root.file_name().is_some_and(|name| name == archive))
    }

    pub fn clear(&self) {
        self.roots.write().clear();
    }
}

/// Resolves declared names to definitions.
pub trait ClassResolver {
    fn resolve(&self, name: &str) -> Result<&Definition, ResolveError>;
}

/// The host's own loader: builtin definitions only.
#[derive(Debug, Clone, Copy)]
pub struct HostLoader<'a> {
    table: &'a FactoryTable,
}

impl<'a> HostLoader<'a> {
    pub fn new(table: &'a FactoryTable) -> Self {
        Self { table }
    }
}

impl ClassResolver for HostLoader<'_> {
    fn resolve(&self, name: &str) -> Result<&Definition, ResolveError> {
        match self.table.lookup(name) {
            Some(def) if def.origin == Origin::Builtin => Ok(def),
            _ => Err(ResolveError::NotFound(name.to_string())),
        }
    }
}

/// Layered loader: builtins first, then archives on the class path.
#[derive(Debug, Clone, Copy)]
pub struct PluginClassLoader<'a> {
    table: &'a FactoryTable,
    class_path: &'a ClassPath,
}

impl<'a> PluginClassLoader<'a> {
    pub fn new(table: &'a FactoryTable, class_path: &'a ClassPath) -> Self {
        Self { table, class_path }
    }

    pub fn add(&self, root: impl Into<PathBuf>) -> bool {
        self.class_path.add(root)
    }

    pub fn class_path(&self) -> &'a ClassPath {
        self.class_path
    }
}

impl ClassResolver for PluginClassLoader<'_> {
    fn resolve(&self, name: &str) -> Result<&Definition, ResolveError> {
        let def = self
            .table
            .lookup(name)
            .ok_or_else(|| ResolveError::NotFound(name.to_string()))?;
        match &def.origin {
            Origin::Builtin => Ok(def),
            Origin::Archive(archive) if self.class_path.has_archive(archive) => Ok(def),
            Origin::Archive(archive) => Err(ResolveError::ArchiveMissing {
                name: name.to_string(),
                archive: archive.clone(),
            }),
        }
    }
}
