//! Memoizing suppliers.
//!
//! A memoizing supplier wraps a source function and caches the value it
//! produces. Every reader inside one validity window receives the same
//! `Arc`. Three invalidation policies are provided:
//!
//! | Supplier | Valid | Recomputed when |
//! |---|---|---|
//! | [`MemoizingSupplier`] | forever | never, once published |
//! | [`RefreshingSupplier`] | for a time-to-live | the value is older than the TTL |
//! | [`ReferenceSupplier`] | while its [`Reference`] holds | the reference is cleared |
//!
//! # Concurrency
//!
//! Values are published with a compare-and-swap on an `ArcSwapOption`, never
//! under a lock, so readers are not blocked by a slow source. Callers racing
//! on an empty (or expired) slot may each run the source; exactly one result
//! is published and every racer returns the published value. A losing
//! racer's result is dropped.
//!
//! [`CloseableMemoize`] is the variant used for resources that must be
//! released explicitly.

mod closeable;
mod reference;
mod refreshing;
mod supplier;

use std::sync::Arc;

pub use closeable::{CloseableMemoize, MemoizeError};
pub use reference::{ReclaimableSlot, Reference, ReferenceSupplier};
pub use refreshing::RefreshingSupplier;
pub use supplier::MemoizingSupplier;

/// A lazily computed, shared value.
pub trait Memoize<T>: Send + Sync {
    /// Return the value, computing it on first need.
    fn get(&self) -> Arc<T>;

    /// Return the currently valid value without ever running the source.
    fn peek(&self) -> Option<Arc<T>>;
}

/// Operators deriving new memoizing suppliers from an existing one.
///
/// Derived suppliers are plain [`MemoizingSupplier`]s and are lazy: nothing
/// runs until their own `get`.
pub trait MemoizeExt<T: Send + Sync + 'static>: Memoize<T> + Clone + Sized + 'static {
    /// Memoize `mapper` applied to this supplier's value.
    fn map<R, F>(&self, mapper: F) -> MemoizingSupplier<R>
    where
        R: Send + Sync + 'static,
        F: Fn(&T) -> R + Send + Sync + 'static,
    {
        let this = self.clone();
        MemoizingSupplier::new(move || mapper(&this.get()))
    }

    /// Memoize the value of the supplier `mapper` returns for this value.
    fn flat_map<R, M, F>(&self, mapper: F) -> MemoizingSupplier<R>
    where
        R: Send + Sync + 'static,
        M: Memoize<R>,
        F: Fn(&T) -> M + Send + Sync + 'static,
    {
        let this = self.clone();
        MemoizingSupplier::from_shared(move || mapper(&this.get()).get())
    }

    /// Memoize this value if `predicate` accepts it, `None` otherwise.
    fn filter<P>(&self, predicate: P) -> MemoizingSupplier<Option<Arc<T>>>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let this = self.clone();
        MemoizingSupplier::new(move || {
            let value = this.get();
            predicate(&value).then_some(value)
        })
    }

    /// Force the value now and hand it to `consumer`.
    fn accept<C: FnOnce(&T)>(&self, consumer: C) -> &Self {
        consumer(&self.get());
        self
    }
}

impl<T, M> MemoizeExt<T> for M
where
    T: Send + Sync + 'static,
    M: Memoize<T> + Clone + 'static,
{
}

/// Whether two slot contents are the same publication.
fn same_publication<T>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}
