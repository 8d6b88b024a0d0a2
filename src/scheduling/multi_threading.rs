//! Multi-threaded back-end of chunk processing

use crate::{
    aggregate::Merge,
    error::{Error, Result},
};

use tracing::debug;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex,
};

/// Process chunks in multi-threaded mode
///
/// One task is spawned per chunk, on the global thread pool or on a dedicated
/// pool if the number of workers was limited.
///
pub fn run_chunks_impl<T, R>(
    chunks: &[T],
    max_workers: Option<usize>,
    process_chunk: impl Send + Sync + Fn(&T) -> Result<R>,
) -> Result<R>
where
    T: Sync,
    R: Merge + Default + Send,
{
    // Some double-checking cannot hurt...
    assert!(!chunks.is_empty(), "Must process at least one chunk");

    // The results of parallel tasks will be aggregated...
    let accumulator = {
        // ...in a way that is optimized for numerical reproduciblity
        #[cfg(not(feature = "faster-threading"))]
        {
            ReproducibleAccumulator::new(chunks.len())
        }

        // ...in a way that is optimized for computational performance
        #[cfg(feature = "faster-threading")]
        {
            FastAccumulator::new(chunks.len())
        }
    };

    // Once a task has failed, the others should not bother starting
    let aborted = AtomicBool::new(false);

    // This closure is a synchronization scope: it will only return once all
    // inner tasks have been executed
    let run = || {
        rayon::scope(|scope| {
            for (task_id, chunk) in chunks.iter().enumerate() {
                let accumulator_ref = &accumulator;
                let aborted_ref = &aborted;
                let process_chunk_ref = &process_chunk;
                scope.spawn(move |_| {
                    if aborted_ref.load(Ordering::Relaxed) {
                        return;
                    }
                    let result = process_chunk_ref(chunk);
                    if result.is_err() {
                        aborted_ref.store(true, Ordering::Relaxed);
                    }
                    accumulator_ref.set_task_result(task_id, result);
                });
            }
        })
    };
    match max_workers {
        None => run(),
        Some(num_threads) => {
            debug!("Processing {} chunk(s) on {num_threads} worker(s)", chunks.len());
            rayon::ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .build()
                .map_err(|err| Error::Config(format!("failed to set up worker threads: {err}")))?
                .install(run)
        }
    }

    // Extract the results from the accumulator
    accumulator.get_merged_result()
}

/// Reproducibility-optimized results accumulation mechanism
#[cfg(not(feature = "faster-threading"))]
struct ReproducibleAccumulator<R> {
    /// Storage for the partial results of parallel tasks. Tasks which were
    /// skipped after a failure leave their slot empty.
    results: Box<[Mutex<Option<Result<R>>>]>,
}
//
#[cfg(not(feature = "faster-threading"))]
impl<R: Merge + Default> ReproducibleAccumulator<R> {
    /// Set up results storage for N parallel tasks
    fn new(num_tasks: usize) -> Self {
        assert!(num_tasks > 0, "There should be at least one task");
        Self {
            results: (0..num_tasks)
                .map(|_| Mutex::new(None))
                .collect::<Vec<_>>()
                .into_boxed_slice(),
        }
    }

    /// Record the result of the n-th task
    fn set_task_result(&self, task_id: usize, result: Result<R>) {
        let mut lock = self.results[task_id]
            .lock()
            .expect("Mutex data should be valid");
        assert!(lock.is_none(), "Tasks should not report results twice");
        *lock = Some(result);
    }

    /// Aggregate the results in a reproducible fashion
    fn get_merged_result(self) -> Result<R> {
        let mut merged = R::default();
        let mut skipped_tasks = false;
        for entry in self.results.into_vec() {
            match entry.into_inner().expect("Mutex data should be valid") {
                Some(result) => merged.merge(result?)?,
                None => skipped_tasks = true,
            }
        }
        assert!(!skipped_tasks, "Tasks should only be skipped after a failure");
        Ok(merged)
    }
}

/// Speed-optimized results accumulation mechanism
#[cfg(feature = "faster-threading")]
struct FastAccumulator<R> {
    /// Storage location in which results will be merged out of order, or the
    /// first error that was encountered
    merged_result: Mutex<Result<R>>,

    /// Truth that each task has reported its results
    task_finished: Box<[AtomicBool]>,
}
//
#[cfg(feature = "faster-threading")]
impl<R: Merge + Default> FastAccumulator<R> {
    /// Set up results storage for N parallel tasks
    fn new(num_tasks: usize) -> Self {
        assert!(num_tasks > 0, "There should be at least one task");
        Self {
            merged_result: Mutex::new(Ok(R::default())),
            task_finished: (0..num_tasks)
                .map(|_| AtomicBool::new(false))
                .collect::<Vec<_>>()
                .into_boxed_slice(),
        }
    }

    /// Merge the result of the n-th task into the accumulator
    fn set_task_result(&self, task_id: usize, result: Result<R>) {
        {
            let mut lock = self
                .merged_result
                .lock()
                .expect("Mutex data should be valid");
            if let Ok(accumulator) = &mut *lock {
                if let Err(err) = result.and_then(|result| accumulator.merge(result)) {
                    *lock = Err(err);
                }
            }
        }

        // Remember that this task has completed its work
        let was_finished = self.task_finished[task_id].swap(true, Ordering::Relaxed);
        assert!(!was_finished, "Tasks should not set their result twice");
    }

    /// Collect the merged result
    fn get_merged_result(self) -> Result<R> {
        let merged = self
            .merged_result
            .into_inner()
            .expect("Mutex data should be valid");
        if merged.is_ok() {
            for ready in self.task_finished.into_vec() {
                assert!(
                    ready.load(Ordering::Relaxed),
                    "All tasks should have completed their work"
                );
            }
        }
        merged
    }
}
