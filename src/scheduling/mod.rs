//! This module takes care of scheduling the chunk processing work, encapsulating
//! use of multiple threads and anything else that will come in the future

#[cfg(feature = "multi-threading")] mod multi_threading;
mod sequential;

use crate::{aggregate::Merge, config::Runner, error::Result};

use tracing::debug;


/// Process a list of chunks in the manner that was configured, and merge the
/// partial results into one
///
/// The merge order is the order of the chunk list, unless the
/// `faster-threading` feature is enabled, in which case partial results are
/// merged as soon as they come in. The first fatal error aborts the run: no new
/// chunk gets started, and the error is returned once in-flight chunks are done.
///
pub fn run_chunks<T, R>(
    chunks: &[T],
    runner: &Runner,
    process_chunk: impl Send + Sync + Fn(&T) -> Result<R>,
) -> Result<R>
where
    T: Sync,
    R: Merge + Default + Send,
{
    // Nothing to do, merging nothing yields the identity
    if chunks.is_empty() {
        return Ok(R::default());
    }

    // ...in multi-threaded mode
    #[cfg(feature = "multi-threading")]
    if !runner.sequential {
        return multi_threading::run_chunks_impl(chunks, runner.max_workers, process_chunk);
    }

    // ...in sequential mode
    #[cfg(not(feature = "multi-threading"))]
    if !runner.sequential {
        debug!("Multi-threading was disabled at build time, processing chunks sequentially");
    }
    debug!("Processing {} chunk(s) sequentially", chunks.len());
    sequential::run_chunks_impl(chunks, process_chunk)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Partial result which remembers in what order it was merged
    #[derive(Debug, Default, PartialEq)]
    struct Trace(Vec<usize>);
    //
    impl Merge for Trace {
        fn merge(&mut self, other: Self) -> Result<()> {
            self.0.extend(other.0);
            Ok(())
        }
    }

    fn runners() -> [Runner; 3] {
        [
            Runner { sequential: true, max_workers: None },
            Runner { sequential: false, max_workers: None },
            Runner { sequential: false, max_workers: Some(2) },
        ]
    }

    #[test]
    fn every_chunk_is_merged() {
        let chunks = (0..50).collect::<Vec<usize>>();
        for runner in runners() {
            let mut merged = run_chunks(&chunks, &runner, |&chunk| Ok(Trace(vec![chunk]))).unwrap();
            #[cfg(not(feature = "faster-threading"))]
            assert_eq!(merged.0, chunks);
            merged.0.sort_unstable();
            assert_eq!(merged.0, chunks);
        }
        let empty: &[usize] = &[];
        let merged = run_chunks(empty, &Runner::default(), |_| -> Result<Trace> {
            unreachable!()
        });
        assert_eq!(merged.unwrap(), Trace::default());
    }

    #[test]
    fn fatal_errors_abort_the_run() {
        let chunks = (0..20).collect::<Vec<usize>>();
        for runner in runners() {
            let started = AtomicUsize::new(0);
            let result = run_chunks(&chunks, &runner, |&chunk| {
                started.fetch_add(1, Ordering::Relaxed);
                if chunk == 3 {
                    Err(Error::NoEvents("S".into()))
                } else {
                    Ok(Trace(vec![chunk]))
                }
            });
            assert!(matches!(result, Err(Error::NoEvents(_))));
            if runner.sequential {
                assert_eq!(started.load(Ordering::Relaxed), 4);
            }
        }
    }
}
