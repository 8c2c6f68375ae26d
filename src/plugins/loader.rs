//! Declaration loader.
//!
//! Loading runs in three passes so that connectors needed for downloads are
//! available before anything is downloaded:
//!
//! 1. Bootstrap: declarations under the trusted prefix are tried with the
//!    host's own loader. Failures are ignored; whatever loads is done.
//! 2. Plugin path: `-pluginpath` entries are located, downloaded and
//!    verified as needed, then added to the class path.
//! 3. Main: the remaining declarations are loaded through the plugin class
//!    loader, which now also sees the plugin path.

use std::sync::Arc;

use crate::error::{FatalError, LinkageError, PluginError};

use super::catalog::{ClassResolver, DefinitionKind, FactoryTable, HostLoader, PluginClassLoader};
use super::clause::{parse_declarations, split_list, DeclarationRecord, COMMAND_ATTR, PATH_ATTR};
use super::entry::PluginEntry;
use super::path::PluginPathResolver;
use super::provider::ServiceProvider;
use super::registry::PluginRegistry;
use super::traits::Host;

/// Loads one host's declarations into a registry.
pub struct PluginLoader<'a> {
    host: &'a Arc<dyn Host>,
    registry: &'a PluginRegistry,
    table: &'a FactoryTable,
}

impl<'a> PluginLoader<'a> {
    pub fn new(host: &'a Arc<dyn Host>, registry: &'a PluginRegistry, table: &'a FactoryTable) -> Self {
        Self {
            host,
            registry,
            table,
        }
    }

    /// Load `declarations` (the `-plugin` syntax) after making
    /// `plugin_path` (the `-pluginpath` syntax) available.
    ///
    /// Only a [`FatalError`] stops loading; everything else is reported to
    /// the host.
    pub fn load_plugins(&self, declarations: &str, plugin_path: &str) -> Result<(), FatalError> {
        let mut records = parse_declarations(declarations);
        let class_loader = PluginClassLoader::new(self.table, self.registry.class_path());

        for record in &records {
            self.add_declared_paths(record, &class_loader);
        }

        let trusted_prefix = self.host.settings().trusted_prefix;
        let host_loader = HostLoader::new(self.table);
        let mut loaded = Vec::new();
        for record in records
            .iter()
            .filter(|r| r.class_name().starts_with(trusted_prefix.as_str()))
        {
            tracing::debug!(class_name = %record.class_name(), "Trying pre-plugin");
            if self.load_plugin(&host_loader, record, true)?.is_some() {
                // raw key, marker included
                loaded.push(record.raw_key().to_string());
            }
        }
        records.retain(|r| !loaded.iter().any(|key| key == r.raw_key()));

        PluginPathResolver::new(&**self.host, self.registry)
            .load_plugin_path(plugin_path, class_loader.class_path());

        for record in &records {
            tracing::debug!(class_name = %record.class_name(), "Loading secondary plugin");

            let commands = record.attrs().get(COMMAND_ATTR);
            if self
                .load_plugin(&class_loader, record, commands.is_some())?
                .is_none()
            {
                for command in split_list(commands) {
                    self.registry.record_missing_command(&command);
                }
            }
        }
        Ok(())
    }

    fn add_declared_paths(&self, record: &DeclarationRecord, class_loader: &PluginClassLoader<'_>) {
        for declared in split_list(record.attrs().get(PATH_ATTR)) {
            let resolved = self
                .host
                .resolve_path(&declared)
                .and_then(|p| Ok(std::path::absolute(p)?));
            match resolved {
                Ok(root) => {
                    class_loader.add(root);
                }
                Err(e) => self.host.report(PluginError::configuration(format!(
                    "Problem adding path {declared} to loader for plugin {}: {e:#}",
                    record.class_name()
                ))),
            }
        }
    }

    /// Resolve, build and register one declaration.
    ///
    /// Returns `Ok(None)` when the declaration did not produce a plugin.
    /// Resolution failures are only reported when `ignore_error` is false.
    pub fn load_plugin(
        &self,
        resolver: &dyn ClassResolver,
        record: &DeclarationRecord,
        ignore_error: bool,
    ) -> Result<Option<PluginEntry>, FatalError> {
        let class_name = record.class_name();
        let attrs = record.attrs();

        let definition = match resolver.resolve(class_name) {
            Ok(definition) => definition,
            Err(e) => {
                if !ignore_error {
                    self.report_resolution(record, e.to_string());
                }
                return Ok(None);
            }
        };

        match definition.kind() {
            DefinitionKind::Service(service) => {
                let provider = ServiceProvider::new(*service, attrs.clone(), self.host).into_entry();
                self.registry.add_closeable(provider.clone());
                Ok(Some(provider))
            }
            DefinitionKind::Concrete(factory) => {
                let built = factory().and_then(|plugin| {
                    self.host.customize(&plugin, attrs, self.registry)?;
                    Ok(plugin)
                });
                match built {
                    Ok(plugin) => {
                        self.registry.add_closeable(plugin.clone());
                        Ok(Some(plugin))
                    }
                    Err(e) => self.fail(record, e, ignore_error).map(|()| None),
                }
            }
        }
    }

    fn fail(&self, record: &DeclarationRecord, error: anyhow::Error, ignore_error: bool) -> Result<(), FatalError> {
        let error = match error.downcast::<FatalError>() {
            Ok(fatal) => {
                tracing::debug!(class_name = %record.class_name(), error = %fatal, "Aborting plugin load");
                return Err(fatal);
            }
            Err(other) => other,
        };

        if error.is::<LinkageError>() {
            if !ignore_error {
                self.report_resolution(record, format!("{error:#}"));
            }
            return Ok(());
        }

        self.host.report(PluginError::Unexpected {
            context: format!(
                "Unexpected error loading plugin {}-{}",
                record.class_name(),
                record.attrs()
            ),
            source: error,
        });
        Ok(())
    }

    fn report_resolution(&self, record: &DeclarationRecord, reason: String) {
        self.host.report(PluginError::ClassResolution {
            class_name: record.class_name().to_string(),
            attrs: record.attrs().to_string(),
            reason,
        });
    }
}

impl std::fmt::Debug for PluginLoader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginLoader")
            .field("registry", self.registry)
            .field("table", self.table)
            .finish_non_exhaustive()
    }
}
