//! Plugin registry for build contexts.
//!
//! A [`Host`] declares plugins in its `-plugin` property and extra archives
//! in `-pluginpath`. [`PluginRegistry::load`] resolves the declarations
//! against a [`FactoryTable`], downloading and verifying plugin path entries
//! as needed, and then answers typed lookups.
//!
//! # Example
//!
//! ```text
//! -plugin = builtin.HttpConnector, acme.Repo;name=main;command:=deploy
//! -pluginpath = ${PLUGIN_CACHE}/acme.jar;url=https://repo.example/acme.jar;sha256=...
//! ```
//!
//! Every failure except a [`FatalError`](crate::FatalError) is reported
//! through [`Host::report`] and loading continues.

pub mod catalog;
pub mod clause;
pub mod digest;
pub mod entry;
pub mod fetch;
pub mod loader;
pub mod path;
pub mod provider;
pub mod registry;
pub mod traits;

#[cfg(test)]
pub(crate) mod test_support;

pub use catalog::{ClassPath, FactoryTable, Origin, PluginClassLoader};
pub use clause::{parse_declarations, Attrs, DeclarationRecord};
pub use entry::{EntryBuilder, PluginEntry};
pub use fetch::{ConnectionHandler, DownloadClient, Fetch, Resource};
pub use loader::PluginLoader;
pub use path::PluginPathResolver;
pub use provider::ServiceProvider;
pub use registry::PluginRegistry;
pub use traits::{
    Closeable, Configurable, ExternalPlugins, Host, RegistryDone, TypeKey, TypeProvider,
};
