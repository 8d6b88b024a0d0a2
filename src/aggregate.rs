//! Order-independent merging of partial results
//!
//! Chunks of events are processed independently, possibly in parallel, and
//! their partial results must then be combined into one. Every merge operation
//! defined here is associative and commutative (up to floating-point summation
//! order), so that neither the chunking nor the merge order affect the final
//! histograms. The only exception is `Mergeable::Array`, whose concatenation
//! keeps the merge order and is meant for raw per-event data.

use crate::{
    error::{Error, Result},
    histset::HistogramSet,
    numeric::Float,
};

use std::collections::BTreeMap;

/// Things which can absorb another instance of themselves
pub trait Merge: Sized {
    /// Integrate the contents of `other` into `self`
    fn merge(&mut self, other: Self) -> Result<()>;
}

/// Merge two results into one
pub fn merge<T: Merge>(mut a: T, b: T) -> Result<T> {
    a.merge(b)?;
    Ok(a)
}

/// Merge any number of results, starting from the identity element (which is
/// also what an empty list of results merges into)
pub fn merge_all<T: Merge + Default>(results: impl IntoIterator<Item = T>) -> Result<T> {
    results.into_iter().try_fold(T::default(), merge)
}

/// Tree of heterogeneous results, merged recursively by variant
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Mergeable {
    /// No result at all, the identity of merging
    #[default]
    Empty,

    /// Named sub-results, merged key by key
    Map(BTreeMap<String, Mergeable>),

    /// Event counter
    Count(u64),

    /// Floating-point accumulator
    Sum(Float),

    /// Raw per-event values, concatenated
    Array(Vec<Float>),

    /// Family of histograms, summed cell by cell
    Histograms(HistogramSet),
}
//
impl Mergeable {
    /// Name of this variant, for error reporting
    pub fn kind(&self) -> &'static str {
        match self {
            Mergeable::Empty => "empty result",
            Mergeable::Map(_) => "mapping",
            Mergeable::Count(_) => "counter",
            Mergeable::Sum(_) => "sum",
            Mergeable::Array(_) => "array",
            Mergeable::Histograms(_) => "histogram set",
        }
    }

    /// Nest this result under a key
    pub fn keyed(self, key: impl Into<String>) -> Self {
        Mergeable::Map(BTreeMap::from([(key.into(), self)]))
    }

    /// Extract the result stored under a key of a mapping. Missing keys, like
    /// the empty result, yield the empty result.
    pub fn take(&mut self, key: &str) -> Result<Mergeable> {
        match self {
            Mergeable::Empty => Ok(Mergeable::Empty),
            Mergeable::Map(entries) => Ok(entries.remove(key).unwrap_or_default()),
            other => Err(Error::MergeKindMismatch {
                left: "mapping",
                right: other.kind(),
            }),
        }
    }
}
//
impl Merge for Mergeable {
    fn merge(&mut self, other: Self) -> Result<()> {
        match (self, other) {
            (_, Mergeable::Empty) => {}
            (this @ Mergeable::Empty, other) => *this = other,
            (Mergeable::Map(mine), Mergeable::Map(theirs)) => {
                for (key, value) in theirs {
                    match mine.get_mut(&key) {
                        Some(existing) => existing.merge(value)?,
                        None => {
                            mine.insert(key, value);
                        }
                    }
                }
            }
            (Mergeable::Count(mine), Mergeable::Count(theirs)) => *mine += theirs,
            (Mergeable::Sum(mine), Mergeable::Sum(theirs)) => *mine += theirs,
            (Mergeable::Array(mine), Mergeable::Array(theirs)) => mine.extend(theirs),
            (Mergeable::Histograms(mine), Mergeable::Histograms(theirs)) => mine.merge(theirs)?,
            (this, other) => {
                return Err(Error::MergeKindMismatch {
                    left: this.kind(),
                    right: other.kind(),
                })
            }
        }
        Ok(())
    }
}
