use arc_swap::ArcSwapOption;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};

use super::{same_publication, Memoize};

/// A handle to a memoized value that something outside the supplier may
/// clear.
pub trait Reference<T>: Send + Sync {
    /// The referenced value, or `None` once cleared.
    fn get(&self) -> Option<Arc<T>>;
}

/// Cleared as soon as every strong handle to the value is dropped.
impl<T: Send + Sync> Reference<T> for Weak<T> {
    fn get(&self) -> Option<Arc<T>> {
        self.upgrade()
    }
}

/// A strong slot cleared on an external signal such as memory pressure or
/// a sized eviction policy.
pub struct ReclaimableSlot<T> {
    value: Arc<RwLock<Option<Arc<T>>>>,
}

impl<T> Clone for ReclaimableSlot<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
        }
    }
}

impl<T> ReclaimableSlot<T> {
    /// Hold `value` until [`clear`](Self::clear) is called on any clone.
    pub fn new(value: Arc<T>) -> Self {
        Self {
            value: Arc::new(RwLock::new(Some(value))),
        }
    }

    /// Drop the held value. Idempotent.
    pub fn clear(&self) {
        self.value.write().take();
    }

    pub fn is_cleared(&self) -> bool {
        self.value.read().is_none()
    }
}

impl<T: Send + Sync> Reference<T> for ReclaimableSlot<T> {
    fn get(&self) -> Option<Arc<T>> {
        self.value.read().clone()
    }
}

/// Memoizes a value for as long as the reference wrapping it holds.
///
/// The caller decides the reference type: `reference` is called with every
/// freshly computed value and returns the handle the supplier keeps.
pub struct ReferenceSupplier<T> {
    inner: Arc<Inner<T>>,
}

type WrapFn<T> = dyn Fn(&Arc<T>) -> Box<dyn Reference<T>> + Send + Sync;

struct Inner<T> {
    source: Box<dyn Fn() -> T + Send + Sync>,
    reference: Box<WrapFn<T>>,
    slot: ArcSwapOption<Held<T>>,
}

struct Held<T>(Box<dyn Reference<T>>);

impl<T> Clone for ReferenceSupplier<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> ReferenceSupplier<T> {
    /// Create an empty supplier.
    ///
    /// # Arguments
    ///
    /// * `source` - Computes the value when nothing is held
    /// * `reference` - Wraps each computed value in the handle the supplier keeps
    pub fn new<F, R, W>(source: F, reference: W) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        R: Reference<T> + 'static,
        W: Fn(&Arc<T>) -> R + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                source: Box::new(source),
                reference: Box::new(move |value: &Arc<T>| -> Box<dyn Reference<T>> {
                    Box::new(reference(value))
                }),
                slot: ArcSwapOption::empty(),
            }),
        }
    }

    /// Hold values through [`Weak`] handles.
    pub fn weak<F>(source: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::new(source, Arc::downgrade)
    }
}

impl<T: Send + Sync> Memoize<T> for ReferenceSupplier<T> {
    fn get(&self) -> Arc<T> {
        let inner = &*self.inner;
        let current = inner.slot.load_full();
        if let Some(value) = current.as_deref().and_then(|held| held.0.get()) {
            return value;
        }

        let value = Arc::new((inner.source)());
        let held = Arc::new(Held((inner.reference)(&value)));
        let previous = inner.slot.compare_and_swap(&current, Some(held));
        if same_publication(&previous, &current) {
            return value;
        }
        previous
            .as_deref()
            .and_then(|winner| winner.0.get())
            .unwrap_or(value)
    }

    fn peek(&self) -> Option<Arc<T>> {
        self.inner.slot.load_full()?.0.get()
    }
}

impl<T> std::fmt::Debug for ReferenceSupplier<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceSupplier")
            .field("published", &self.inner.slot.load().is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    #[test]
    fn cleared_slot_triggers_recompute() {
        let slots: Arc<Mutex<Vec<ReclaimableSlot<usize>>>> = Arc::default();
        let issued = Arc::clone(&slots);
        let calls = AtomicUsize::new(0);
        let memo = ReferenceSupplier::new(
            move || calls.fetch_add(1, Ordering::SeqCst),
            move |value: &Arc<usize>| {
                let slot = ReclaimableSlot::new(Arc::clone(value));
                issued.lock().push(slot.clone());
                slot
            },
        );

        let first = memo.get();
        assert!(Arc::ptr_eq(&first, &memo.get()));
        assert_eq!(slots.lock().len(), 1);

        slots.lock()[0].clear();
        assert!(slots.lock()[0].is_cleared());
        assert!(memo.peek().is_none());

        let second = memo.get();
        assert_eq!(*first, 0);
        assert_eq!(*second, 1);
        assert_eq!(slots.lock().len(), 2);
    }

    #[test]
    fn weak_reference_reclaims_when_unused() {
        let calls = AtomicUsize::new(0);
        let memo = ReferenceSupplier::weak(move || calls.fetch_add(1, Ordering::SeqCst));

        let held = memo.get();
        assert!(Arc::ptr_eq(&held, &memo.get()));
        assert_eq!(*held, 0);
        drop(held);

        assert!(memo.peek().is_none());
        assert_eq!(*memo.get(), 1);
    }

    #[test]
    fn concurrent_callers_share_held_value() {
        const THREADS: usize = 8;
        let slots: Arc<Mutex<Vec<ReclaimableSlot<usize>>>> = Arc::default();
        let issued = Arc::clone(&slots);
        let calls = AtomicUsize::new(0);
        let memo = ReferenceSupplier::new(
            move || {
                std::thread::sleep(std::time::Duration::from_millis(5));
                calls.fetch_add(1, Ordering::SeqCst)
            },
            move |value: &Arc<usize>| {
                let slot = ReclaimableSlot::new(Arc::clone(value));
                issued.lock().push(slot.clone());
                slot
            },
        );
        let barrier = Barrier::new(THREADS);

        let results: Vec<Arc<usize>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        memo.get()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let published = memo.peek().unwrap();
        assert!(results.iter().all(|r| Arc::ptr_eq(r, &published)));
        assert!(!slots.lock().is_empty());
    }
}
