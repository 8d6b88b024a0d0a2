//! Sequential back-end of chunk processing

use crate::{aggregate::Merge, error::Result};

/// Process chunks in sequential mode
///
/// Partial results are merged as they come, in chunk order, which is also the
/// order used by the reproducible multi-threaded back-end. This makes both
/// back-ends produce bitwise identical histograms.
///
pub fn run_chunks_impl<T, R: Merge + Default>(
    chunks: &[T],
    process_chunk: impl Fn(&T) -> Result<R>,
) -> Result<R> {
    chunks.iter().try_fold(R::default(), |mut accumulator, chunk| {
        accumulator.merge(process_chunk(chunk)?)?;
        Ok(accumulator)
    })
}
