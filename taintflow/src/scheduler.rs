//! The parallel work scheduler.
//!
//! A thread-pool map-reduce with crash isolation and cooperative
//! cancellation. Workers fold chunks of inputs into private accumulators;
//! the caller's reduce runs sequentially over worker results and must be
//! associative and commutative (chunk completion order is unspecified).
//! A panicking chunk is retried once on a fresh worker; a second panic
//! fails the whole operation.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::unbounded;

use crate::errors::SchedulerError;

/// How inputs are split into work units.
#[derive(Debug, Clone)]
pub enum SchedulingPolicy {
    /// Chunks of exactly `size` inputs (the last one may be smaller).
    FixedChunkSize {
        /// Inputs per chunk.
        size: usize,
    },
    /// Roughly `count` chunks, bounded below by `min_chunk_size` and
    /// aiming for `preferred_chunks_per_worker` chunks per worker.
    FixedChunkCount {
        /// Desired number of chunks.
        count: usize,
        /// Lower bound on the chunk size.
        min_chunk_size: usize,
        /// Oversubscription factor for work stealing.
        preferred_chunks_per_worker: usize,
    },
}

impl SchedulingPolicy {
    /// The chunk size to use for `input_len` inputs on `workers` workers.
    #[must_use]
    pub fn chunk_size(&self, input_len: usize, workers: usize) -> usize {
        match self {
            SchedulingPolicy::FixedChunkSize { size } => (*size).max(1),
            SchedulingPolicy::FixedChunkCount {
                count,
                min_chunk_size,
                preferred_chunks_per_worker,
            } => {
                let chunks = (*count)
                    .max(workers * preferred_chunks_per_worker)
                    .max(1);
                (input_len.div_ceil(chunks)).max(*min_chunk_size).max(1)
            }
        }
    }
}

/// Cancellation flag shared with in-flight work. Pending chunks observe
/// it between units; chunks already running are assumed lost.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A fixed-size pool of long-lived workers.
pub struct Scheduler {
    pool: rayon::ThreadPool,
    workers: usize,
    token: CancellationToken,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Creates a pool with `jobs` workers (defaulting to the CPU count).
    pub fn new(jobs: Option<usize>) -> Result<Self, SchedulerError> {
        let workers = jobs.unwrap_or_else(num_cpus::get).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("taintflow-worker-{index}"))
            .build()
            .map_err(|error| SchedulerError::WorkerCrash {
                payload: error.to_string(),
            })?;
        tracing::debug!(workers, "scheduler pool started");
        Ok(Self {
            pool,
            workers,
            token: CancellationToken::default(),
        })
    }

    /// The cancellation token observed by pending work.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Number of workers in the pool.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Maps chunks of `inputs` in parallel and reduces the results.
    ///
    /// `map` folds one chunk into an accumulator seeded from `initial`;
    /// `reduce` combines two accumulators and must be associative and
    /// commutative. A chunk that panics is retried once; a second panic
    /// aborts with a typed failure.
    pub fn map_reduce<I, Acc, M, R>(
        &self,
        policy: &SchedulingPolicy,
        initial: Acc,
        inputs: &[I],
        map: M,
        reduce: R,
    ) -> Result<Acc, SchedulerError>
    where
        I: Sync,
        Acc: Clone + Send + Sync,
        M: Fn(Acc, &[I]) -> Acc + Sync,
        R: Fn(Acc, Acc) -> Acc,
    {
        if inputs.is_empty() {
            return Ok(initial);
        }
        let chunk_size = policy.chunk_size(inputs.len(), self.workers);
        let token = &self.token;
        let map = &map;
        let seed = &initial;

        let (sender, receiver) = unbounded();

        self.pool.in_place_scope(|scope| {
            for chunk in inputs.chunks(chunk_size) {
                let sender = sender.clone();
                scope.spawn(move |_| {
                    if token.is_cancelled() {
                        let _ = sender.send(Err(SchedulerError::Cancelled));
                        return;
                    }
                    let mut attempt =
                        catch_unwind(AssertUnwindSafe(|| map(seed.clone(), chunk)));
                    if let Err(payload) = &attempt {
                        tracing::warn!(
                            "analysis worker crashed ({}); retrying chunk once",
                            panic_message(payload.as_ref())
                        );
                        attempt = catch_unwind(AssertUnwindSafe(|| map(seed.clone(), chunk)));
                    }
                    let result = attempt.map_err(|payload| SchedulerError::WorkerCrash {
                        payload: panic_message(payload.as_ref()),
                    });
                    let _ = sender.send(result);
                });
            }
        });
        drop(sender);

        let mut accumulator = initial;
        let mut failure = None;
        for result in receiver {
            match result {
                Ok(partial) => accumulator = reduce(accumulator, partial),
                Err(error) => failure = Some(error),
            }
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(accumulator),
        }
    }
}

/// Renders a panic payload for diagnostics.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else {
        payload
            .downcast_ref::<String>()
            .cloned()
            .unwrap_or_else(|| "worker panicked".to_owned())
    }
}
