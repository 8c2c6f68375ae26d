use arc_swap::ArcSwapOption;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{same_publication, Memoize};

/// Memoizes a value for a fixed time-to-live.
///
/// A zero TTL means every value is already stale, so every `get` runs the
/// source.
pub struct RefreshingSupplier<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    source: Box<dyn Fn() -> T + Send + Sync>,
    ttl: Duration,
    slot: ArcSwapOption<Stamped<T>>,
}

struct Stamped<T> {
    value: Arc<T>,
    published_at: Instant,
}

impl<T> Clone for RefreshingSupplier<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> RefreshingSupplier<T> {
    /// Create an empty supplier.
    ///
    /// # Arguments
    ///
    /// * `source` - Computes a new value whenever the current one is stale
    /// * `ttl` - How long a published value stays fresh
    pub fn new<F>(source: F, ttl: Duration) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                source: Box::new(source),
                ttl,
                slot: ArcSwapOption::empty(),
            }),
        }
    }

    /// The time-to-live given at construction.
    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }
}

impl<T> Inner<T> {
    fn is_fresh(&self, stamped: &Stamped<T>) -> bool {
        !self.ttl.is_zero() && stamped.published_at.elapsed() <= self.ttl
    }
}

impl<T: Send + Sync> Memoize<T> for RefreshingSupplier<T> {
    fn get(&self) -> Arc<T> {
        let inner = &*self.inner;
        let current = inner.slot.load_full();
        if let Some(stamped) = current.as_deref() {
            if inner.is_fresh(stamped) {
                return Arc::clone(&stamped.value);
            }
        }

        let value = Arc::new((inner.source)());
        let fresh = Arc::new(Stamped {
            value: Arc::clone(&value),
            published_at: Instant::now(),
        });
        let previous = inner.slot.compare_and_swap(&current, Some(fresh));
        if same_publication(&previous, &current) {
            return value;
        }
        // Someone else refreshed first; take theirs while it is valid.
        match previous.as_deref() {
            Some(winner) if inner.is_fresh(winner) => Arc::clone(&winner.value),
            _ => value,
        }
    }

    /// The current value while it is within its TTL.
    fn peek(&self) -> Option<Arc<T>> {
        let current = self.inner.slot.load_full()?;
        self.inner
            .is_fresh(&current)
            .then(|| Arc::clone(&current.value))
    }
}

impl<T> std::fmt::Debug for RefreshingSupplier<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshingSupplier")
            .field("ttl", &self.inner.ttl)
            .field("published", &self.inner.slot.load().is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread::sleep;

    fn counter_supplier(ttl: Duration) -> RefreshingSupplier<usize> {
        let calls = AtomicUsize::new(0);
        RefreshingSupplier::new(move || calls.fetch_add(1, Ordering::SeqCst), ttl)
    }

    #[test]
    fn zero_ttl_always_recomputes() {
        let memo = counter_supplier(Duration::ZERO);
        assert_eq!(*memo.get(), 0);
        assert_eq!(*memo.get(), 1);
        assert_eq!(*memo.get(), 2);
        assert!(memo.peek().is_none());
    }

    #[test]
    fn calls_within_ttl_reuse_value() {
        let memo = counter_supplier(Duration::from_millis(100));
        let first = memo.get();
        sleep(Duration::from_millis(10));
        let second = memo.get();
        assert_eq!(first, second);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn calls_beyond_ttl_recompute() {
        let memo = counter_supplier(Duration::from_millis(100));
        let first = memo.get();
        sleep(Duration::from_millis(150));
        assert!(memo.peek().is_none());
        let second = memo.get();
        assert_ne!(first, second);
    }

    #[test]
    fn peek_never_runs_source() {
        let memo = counter_supplier(Duration::from_secs(60));
        assert!(memo.peek().is_none());
        assert!(memo.peek().is_none());
        assert_eq!(*memo.get(), 0);
        assert_eq!(memo.peek().as_deref().copied(), Some(0));
    }

    #[test]
    fn concurrent_callers_share_value_within_ttl() {
        const THREADS: usize = 8;
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let memo = RefreshingSupplier::new(
            move || {
                sleep(Duration::from_millis(5));
                counter.fetch_add(1, Ordering::SeqCst)
            },
            Duration::from_secs(60),
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
        assert!(calls.load(Ordering::SeqCst) >= 1);
    }
}
