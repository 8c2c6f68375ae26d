use arc_swap::ArcSwapOption;
use std::sync::Arc;

use super::Memoize;

/// Memoizes the first published value forever.
pub struct MemoizingSupplier<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    source: Box<dyn Fn() -> Arc<T> + Send + Sync>,
    value: ArcSwapOption<T>,
}

impl<T> Clone for MemoizingSupplier<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> MemoizingSupplier<T> {
    /// Memoize the value returned by `source`.
    pub fn new<F>(source: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::from_shared(move || Arc::new(source()))
    }

    /// Memoize an already shared value returned by `source`.
    ///
    /// The published `Arc` is exactly the one `source` returned.
    pub fn from_shared<F>(source: F) -> Self
    where
        F: Fn() -> Arc<T> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                source: Box::new(source),
                value: ArcSwapOption::empty(),
            }),
        }
    }

    /// Memoize `function` applied to `argument`.
    pub fn apply<A, F>(function: F, argument: A) -> Self
    where
        A: Send + Sync + 'static,
        F: Fn(&A) -> T + Send + Sync + 'static,
    {
        Self::new(move || function(&argument))
    }
}

impl<T: Send + Sync> Memoize<T> for MemoizingSupplier<T> {
    fn get(&self) -> Arc<T> {
        if let Some(value) = self.inner.value.load_full() {
            return value;
        }

        let fresh = (self.inner.source)();
        let previous = self
            .inner
            .value
            .compare_and_swap(&None::<Arc<T>>, Some(Arc::clone(&fresh)));
        match &*previous {
            None => fresh,
            // Lost the race; converge on the winner.
            Some(winner) => Arc::clone(winner),
        }
    }

    fn peek(&self) -> Option<Arc<T>> {
        self.inner.value.load_full()
    }
}

impl<T> std::fmt::Debug for MemoizingSupplier<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoizingSupplier")
            .field("published", &self.inner.value.load().is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    #[test]
    fn source_runs_once_sequentially() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let memo = MemoizingSupplier::new(move || counter.fetch_add(1, Ordering::SeqCst));

        assert!(memo.peek().is_none());
        let first = memo.get();
        let second = memo.get();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&memo.peek().unwrap(), &first));
    }

    #[test]
    fn concurrent_callers_observe_one_instance() {
        const THREADS: usize = 16;
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let memo = MemoizingSupplier::new(move || {
            std::thread::sleep(std::time::Duration::from_millis(5));
            counter.fetch_add(1, Ordering::SeqCst)
        });
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
        assert!(calls.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn apply_binds_argument() {
        let memo = MemoizingSupplier::apply(|name: &String| name.len(), String::from("plugin"));
        assert_eq!(*memo.get(), 6);
    }

    #[test]
    fn clones_share_publication() {
        let memo = MemoizingSupplier::new(|| vec![1, 2, 3]);
        let clone = memo.clone();
        assert!(Arc::ptr_eq(&memo.get(), &clone.peek().unwrap()));
    }
}
