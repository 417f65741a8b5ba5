//! Worker pool fanning per-chunk work items across threads.

use crate::error::{Error, Result};

/// Shared worker pool behind parallel query execution.
///
/// Each work item is processed to completion by one worker. Dispatch returns
/// only after every item has completed; a panicking item resurfaces at the
/// call site once the scope unwinds.
pub(crate) struct WorkerPool {
    pool: rayon::ThreadPool,
}

impl WorkerPool {
    /// Build a pool with `threads` workers; `0` means one per logical core.
    pub fn new(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("strata-worker-{}", index))
            .build()
            .map_err(|_| Error::ResourceExhausted("worker pool"))?;
        Ok(WorkerPool { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `work` once per item, no ordering between items.
    pub fn dispatch<T, F>(&self, items: &[T], work: F)
    where
        T: Sync,
        F: Fn(&T) + Send + Sync,
    {
        let work = &work;
        self.pool.scope(|scope| {
            for item in items {
                scope.spawn(move |_| work(item));
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        std::sync::atomic::{AtomicUsize, Ordering},
    };

    #[test]
    fn every_item_runs_exactly_once() {
        let pool = WorkerPool::new(4).unwrap();
        let items: Vec<usize> = (0..100).collect();
        let total = AtomicUsize::new(0);

        pool.dispatch(&items, |item| {
            total.fetch_add(*item, Ordering::Relaxed);
        });

        assert_eq!(total.into_inner(), items.iter().sum::<usize>());
    }

    #[test]
    fn zero_requests_default_parallelism() {
        let pool = WorkerPool::new(0).unwrap();
        assert!(pool.threads() >= 1);
    }
}
