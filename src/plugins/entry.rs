//! Registry members.
//!
//! A [`PluginEntry`] is an untyped object plus the typed views it can be
//! looked up through. The concrete type is always a view; trait-object
//! views are declared when the entry is built. Being "assignable to `T`"
//! means having a view of `Arc<T>`.

use std::any::{Any, TypeId};
use std::sync::Arc;

use super::traits::{Closeable, TypeProvider};

/// An object registered in a [`super::PluginRegistry`].
///
/// Cheap to clone. Equality and hashing follow the identity of the
/// underlying object, so clones of one entry compare equal.
#[derive(Clone)]
pub struct PluginEntry {
    inner: Arc<EntryInner>,
}

struct EntryInner {
    name: String,
    object: Arc<dyn Any + Send + Sync>,
    views: Vec<(TypeId, Box<dyn Any + Send + Sync>)>,
    provider: Option<Arc<dyn TypeProvider>>,
    closeable: Option<Arc<dyn Closeable>>,
}

impl PluginEntry {
    /// Wrap a plain plugin with only its concrete-type view.
    pub fn new<P: Any + Send + Sync>(plugin: P) -> Self {
        Self::builder(Arc::new(plugin)).build()
    }

    pub fn builder<P: Any + Send + Sync>(plugin: Arc<P>) -> EntryBuilder {
        let concrete: Box<dyn Any + Send + Sync> = Box::new(Arc::clone(&plugin));
        EntryBuilder {
            name: std::any::type_name::<P>().to_string(),
            object: plugin,
            views: vec![(TypeId::of::<P>(), concrete)],
            provider: None,
            closeable: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// This entry viewed as `T`, if it is assignable to `T`.
    pub fn view<T: ?Sized + 'static>(&self) -> Option<Arc<T>> {
        let wanted = TypeId::of::<T>();
        self.inner
            .views
            .iter()
            .find(|(id, _)| *id == wanted)
            .and_then(|(_, view)| view.downcast_ref::<Arc<T>>())
            .cloned()
    }

    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        let wanted = TypeId::of::<T>();
        self.inner.views.iter().any(|(id, _)| *id == wanted)
    }

    pub fn provider(&self) -> Option<&Arc<dyn TypeProvider>> {
        self.inner.provider.as_ref()
    }

    pub fn closeable(&self) -> Option<&Arc<dyn Closeable>> {
        self.inner.closeable.as_ref()
    }

    fn identity(&self) -> *const () {
        Arc::as_ptr(&self.inner.object).cast::<()>()
    }
}

impl PartialEq for PluginEntry {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.identity(), other.identity())
    }
}

impl Eq for PluginEntry {}

impl std::hash::Hash for PluginEntry {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl std::fmt::Debug for PluginEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginEntry")
            .field("name", &self.inner.name)
            .field("views", &self.inner.views.len())
            .field("provider", &self.inner.provider.is_some())
            .field("closeable", &self.inner.closeable.is_some())
            .finish()
    }
}

/// Builder declaring the views and capabilities of a [`PluginEntry`].
pub struct EntryBuilder {
    name: String,
    object: Arc<dyn Any + Send + Sync>,
    views: Vec<(TypeId, Box<dyn Any + Send + Sync>)>,
    provider: Option<Arc<dyn TypeProvider>>,
    closeable: Option<Arc<dyn Closeable>>,
}

impl EntryBuilder {
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Make the entry assignable to `T`.
    ///
    /// `view` should be the plugin itself coerced to `T`, e.g.
    /// `plugin.clone() as Arc<dyn ConnectionHandler>`.
    pub fn view<T: ?Sized + Send + Sync + 'static>(mut self, view: Arc<T>) -> Self {
        let id = TypeId::of::<T>();
        self.views.retain(|(existing, _)| *existing != id);
        self.views.push((id, Box::new(view)));
        self
    }

    /// Mark the entry as a [`TypeProvider`].
    pub fn provider(mut self, provider: Arc<dyn TypeProvider>) -> Self {
        self.provider = Some(Arc::clone(&provider));
        self.view(provider)
    }

    /// Mark the entry as [`Closeable`]; the registry closes it on teardown.
    pub fn closeable(mut self, closeable: Arc<dyn Closeable>) -> Self {
        self.closeable = Some(Arc::clone(&closeable));
        self.view(closeable)
    }

    pub fn build(self) -> PluginEntry {
        PluginEntry {
            inner: Arc::new(EntryInner {
                name: self.name,
                object: self.object,
                views: self.views,
                provider: self.provider,
                closeable: self.closeable,
            }),
        }
    }
}
