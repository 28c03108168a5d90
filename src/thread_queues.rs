//! Splits local batch computations across a pool of worker threads.
//!
//! Jobs handed to [`ThreadQueues::distribute`] are pure functions of an index range plus shared
//! read-only state. The caller blocks until every range is done and receives the results in
//! index order. Network rounds never run on the workers.

use std::ops::Range;

use rayon::{ThreadPool, ThreadPoolBuilder, prelude::*};
use tracing::trace;

use crate::Error;

/// A fixed pool of worker threads for one party-thread.
pub struct ThreadQueues {
    pool: Option<ThreadPool>,
    workers: usize,
}

impl std::fmt::Debug for ThreadQueues {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadQueues")
            .field("workers", &self.workers)
            .finish()
    }
}

impl ThreadQueues {
    /// Creates a pool with `workers` helper threads. With zero workers, jobs run inline.
    pub fn new(workers: usize) -> Result<Self, Error> {
        let pool = if workers == 0 {
            None
        } else {
            Some(
                ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .thread_name(|i| format!("polyprep-worker-{i}"))
                    .build()
                    .map_err(|e| Error::Misuse(format!("could not start worker threads: {e}")))?,
            )
        };
        Ok(ThreadQueues { pool, workers })
    }

    /// The number of helper threads.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Splits `0..n_items` into contiguous ranges, one per worker plus a tail for the caller.
    ///
    /// Worker ranges are multiples of `granularity` long. If the items do not fill at least one
    /// worker range, everything stays with the caller.
    pub fn ranges(&self, n_items: usize, granularity: usize) -> Vec<Range<usize>> {
        let granularity = granularity.max(1);
        let n_per_thread = n_items.div_ceil(self.workers + 1) / granularity * granularity;
        if n_per_thread == 0 || n_per_thread > n_items {
            return vec![0..n_items];
        }
        let mut ranges = vec![];
        let mut base = 0;
        for _ in 0..self.workers {
            if base + n_per_thread > n_items {
                break;
            }
            ranges.push(base..base + n_per_thread);
            base += n_per_thread;
        }
        if base < n_items {
            ranges.push(base..n_items);
        }
        ranges
    }

    /// Runs `job` on every range of [`ThreadQueues::ranges`] and concatenates the results.
    pub fn distribute<T, J>(&self, n_items: usize, granularity: usize, job: J) -> Vec<T>
    where
        T: Send,
        J: Fn(Range<usize>) -> Vec<T> + Send + Sync,
    {
        let ranges = self.ranges(n_items, granularity);
        match &self.pool {
            Some(pool) if ranges.len() > 1 => {
                trace!(n_items, jobs = ranges.len(), "distributing");
                let parts: Vec<Vec<T>> =
                    pool.install(|| ranges.into_par_iter().map(&job).collect());
                parts.into_iter().flatten().collect()
            }
            _ => ranges.into_iter().flat_map(job).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_follow_granularity() -> Result<(), Error> {
        let q = ThreadQueues::new(3)?;
        assert_eq!(q.ranges(100, 1), vec![0..25, 25..50, 50..75, 75..100]);
        assert_eq!(q.ranges(100, 8), vec![0..24, 24..48, 48..72, 72..100]);
        assert_eq!(q.ranges(5, 8), vec![0..5]);
        assert_eq!(q.ranges(0, 1), vec![0..0]);
        let inline = ThreadQueues::new(0)?;
        assert_eq!(inline.ranges(10, 1), vec![0..10]);
        Ok(())
    }

    #[test]
    fn distribute_keeps_order() -> Result<(), Error> {
        let q = ThreadQueues::new(2)?;
        let squares = q.distribute(1000, 16, |range| range.map(|i| i * i).collect());
        assert_eq!(squares, (0..1000).map(|i| i * i).collect::<Vec<_>>());
        Ok(())
    }
}
