//! Lazy providers for service declarations.
//!
//! A declaration naming a service type does not build anything while
//! loading. It registers a [`ServiceProvider`] that asks the host's
//! [`ExternalPlugins`](super::traits::ExternalPlugins) for implementations
//! the first time a lookup for exactly that service reaches it.

use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::sync::{Arc, Weak};

use crate::error::PluginError;

use super::clause::Attrs;
use super::entry::PluginEntry;
use super::registry::PluginRegistry;
use super::traits::{Closeable, Host, TypeKey, TypeProvider};

#[derive(Default)]
struct State {
    initialized: bool,
    externals: Vec<PluginEntry>,
}

/// Provider of external implementations of one service type.
///
/// Expansion runs at most once. The lock is reentrant: a plugin being
/// customized may look the service up again and sees the externals
/// gathered so far.
pub struct ServiceProvider {
    service: TypeKey,
    attrs: Attrs,
    host: Weak<dyn Host>,
    state: ReentrantMutex<RefCell<State>>,
}

impl ServiceProvider {
    pub fn new(service: TypeKey, attrs: Attrs, host: &Arc<dyn Host>) -> Self {
        Self {
            service,
            attrs,
            host: Arc::downgrade(host),
            state: ReentrantMutex::new(RefCell::new(State::default())),
        }
    }

    /// Wrap into a registry member that is both a provider and closeable.
    pub fn into_entry(self) -> PluginEntry {
        let name = format!("ServiceProvider[{}]", self.service);
        let provider = Arc::new(self);
        PluginEntry::builder(Arc::clone(&provider))
            .named(name)
            .provider(Arc::clone(&provider) as Arc<dyn TypeProvider>)
            .closeable(provider as Arc<dyn Closeable>)
            .build()
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().borrow().initialized
    }

    fn init(&self, registry: &PluginRegistry) {
        let guard = self.state.lock();
        if guard.borrow().initialized {
            return;
        }
        guard.borrow_mut().initialized = true;

        let Some(host) = self.host.upgrade() else {
            return;
        };
        let Some(external) = host.external_plugins() else {
            return;
        };

        tracing::debug!(service = %self.service, attrs = %self.attrs, "Expanding service provider");
        match external.implementations(self.service, &self.attrs) {
            Ok(implementations) => {
                for plugin in implementations {
                    if let Err(e) = host.customize(&plugin, &self.attrs, registry) {
                        host.report(PluginError::Unexpected {
                            context: format!("customizing {} for {}", plugin.name(), self.service),
                            source: e,
                        });
                    }
                    guard.borrow_mut().externals.push(plugin);
                }
            }
            Err(e) => host.report(PluginError::Unexpected {
                context: format!(
                    "failed to load external plugins for {}, attrs = {}",
                    self.service, self.attrs
                ),
                source: e,
            }),
        }
    }
}

impl TypeProvider for ServiceProvider {
    fn provided_type(&self) -> TypeKey {
        self.service
    }

    fn provide(&self, requested: TypeKey, registry: &PluginRegistry) -> Vec<PluginEntry> {
        if requested != self.service {
            return Vec::new();
        }
        self.init(registry);
        let guard = self.state.lock();
        let externals = guard.borrow().externals.clone();
        externals
    }
}

impl Closeable for ServiceProvider {
    fn close(&self) -> anyhow::Result<()> {
        let guard = self.state.lock();
        let externals = std::mem::take(&mut guard.borrow_mut().externals);
        for plugin in externals {
            if let Some(closeable) = plugin.closeable() {
                if let Err(e) = closeable.close() {
                    tracing::warn!(plugin = %plugin.name(), error = %e, "Failed to close external plugin");
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceProvider")
            .field("service", &self.service)
            .field("attrs", &self.attrs)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}
