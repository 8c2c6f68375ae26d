use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::plugins::Closeable;

/// Errors from [`CloseableMemoize::get`].
#[derive(Debug, thiserror::Error)]
pub enum MemoizeError {
    #[error("memoized supplier is closed")]
    Closed,

    #[error(transparent)]
    Source(#[from] anyhow::Error),
}

/// Memoizes a closeable resource until [`close`](Self::close) is called.
///
/// Source failures are not cached; the next `get` tries again. The source
/// may borrow from its environment, so the supplier can be scoped to a
/// single operation.
pub struct CloseableMemoize<'a, T> {
    source: Box<dyn Fn() -> anyhow::Result<T> + Send + Sync + 'a>,
    value: ArcSwapOption<T>,
    closed: AtomicBool,
}

impl<'a, T: Closeable> CloseableMemoize<'a, T> {
    /// Create an open, empty supplier.
    ///
    /// # Arguments
    ///
    /// * `source` - Builds the resource on the first successful `get`
    pub fn new<F>(source: F) -> Self
    where
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'a,
    {
        Self {
            source: Box::new(source),
            value: ArcSwapOption::empty(),
            closed: AtomicBool::new(false),
        }
    }

    /// Return the published resource, building it if none is published yet.
    ///
    /// Racing callers may each build one; the losers close theirs and
    /// return the winner. Fails with [`MemoizeError::Closed`] once closed.
    pub fn get(&self) -> Result<Arc<T>, MemoizeError> {
        if self.is_closed() {
            return Err(MemoizeError::Closed);
        }
        if let Some(value) = self.value.load_full() {
            return Ok(value);
        }

        let fresh = Arc::new((self.source)()?);
        let previous = self
            .value
            .compare_and_swap(&None::<Arc<T>>, Some(Arc::clone(&fresh)));
        let published = match &*previous {
            None => fresh,
            Some(winner) => {
                release(&*fresh);
                Arc::clone(winner)
            }
        };

        // close() ran while we were computing: retract what we published.
        if self.is_closed() {
            if let Some(late) = self.value.swap(None) {
                release(&*late);
            }
            return Err(MemoizeError::Closed);
        }
        Ok(published)
    }

    /// The published resource, without building. `None` once closed.
    pub fn peek(&self) -> Option<Arc<T>> {
        if self.is_closed() {
            return None;
        }
        self.value.load_full()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl<T: Closeable> Closeable for CloseableMemoize<'_, T> {
    /// Close the published value, if any. Later calls are no-ops.
    fn close(&self) -> anyhow::Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        match self.value.swap(None) {
            Some(value) => value.close(),
            None => Ok(()),
        }
    }
}

fn release<T: Closeable + ?Sized>(value: &T) {
    if let Err(e) = value.close() {
        tracing::warn!(error = %e, "Failed to close memoized value");
    }
}

impl<T> std::fmt::Debug for CloseableMemoize<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloseableMemoize")
            .field("published", &self.value.load().is_some())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
