//! Thread budget for a pipeline run.
//!
//! A run is parallel at two levels: `workers` k-points are diagonalized at
//! once on an outer pool, and each worker owns an inner pool of
//! `internal_threads` threads for its Bloch contractions. Pools are built once
//! when the pipeline is constructed and reused by every batch.

use log::{debug, warn};
use rayon::ThreadPool;

use tbbands_core::Parallelism;

use crate::pipeline::DiagonalizeError;

pub struct ThreadBudget {
    workers: usize,
    internal_threads: usize,
    outer: Option<ThreadPool>,
    inner: Vec<ThreadPool>,
}

impl ThreadBudget {
    /// Build the pools for `workers × internal_threads`.
    ///
    /// No pool is created for a level of width 1.
    pub fn resolve(workers: usize, internal_threads: usize) -> Result<Self, DiagonalizeError> {
        let workers = workers.max(1);
        let internal_threads = internal_threads.max(1);

        let available = num_cpus::get();
        let demand = workers.saturating_mul(internal_threads);
        if demand > available {
            warn!(
                "thread budget {}×{} = {} exceeds the {} available CPUs",
                workers, internal_threads, demand, available
            );
        }

        let outer = if workers > 1 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .thread_name(|i| format!("tbbands-worker-{i}"))
                    .build()
                    .map_err(|e| DiagonalizeError::ThreadPool(e.to_string()))?,
            )
        } else {
            None
        };

        let inner = if internal_threads > 1 {
            (0..workers)
                .map(|w| {
                    rayon::ThreadPoolBuilder::new()
                        .num_threads(internal_threads)
                        .thread_name(move |i| format!("tbbands-inner-{w}-{i}"))
                        .build()
                        .map_err(|e| DiagonalizeError::ThreadPool(e.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?
        } else {
            Vec::new()
        };

        debug!(
            "thread budget: {} workers, {} internal threads each ({} CPUs available)",
            workers, internal_threads, available
        );

        Ok(Self {
            workers,
            internal_threads,
            outer,
            inner,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn internal_threads(&self) -> usize {
        self.internal_threads
    }

    /// Pool the per-point units fan out on; `None` for a sequential run.
    pub fn outer(&self) -> Option<&ThreadPool> {
        self.outer.as_ref()
    }

    /// Contraction parallelism for the calling worker.
    ///
    /// Inside the outer pool the worker's thread index selects its own inner
    /// pool, so concurrent units never share one.
    pub fn parallelism(&self) -> Parallelism<'_> {
        if self.inner.is_empty() {
            return Parallelism::Serial;
        }
        let slot = match &self.outer {
            Some(outer) => outer.current_thread_index().unwrap_or(0),
            None => 0,
        };
        Parallelism::Pool(&self.inner[slot % self.inner.len()])
    }
}

impl std::fmt::Debug for ThreadBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadBudget")
            .field("workers", &self.workers)
            .field("internal_threads", &self.internal_threads)
            .finish()
    }
}
