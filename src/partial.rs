//! Results of processing some events of one sample

use crate::{
    aggregate::{Merge, Mergeable},
    error::{Error, Result},
    histset::HistogramSet,
    numeric::Float,
};

use std::collections::BTreeMap;

/// Result keys, as found in the `Mergeable` form of a partial result
const NEVENTS: &str = "nevents";
const SUMW: &str = "sumw";
const HISTOS: &str = "histos";

/// What a chunk of events contributes to the final results of its sample
///
/// The default value, with no events and no histograms, is the identity of
/// merging. It is what a skipped chunk contributes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PartialResult {
    /// Number of events read, before any selection
    pub event_count: u64,

    /// Sum of nominal generator weights, before any selection
    pub weight_sum: Float,

    /// Histograms of each variable
    pub histograms: BTreeMap<String, HistogramSet>,
}
//
impl PartialResult {
    /// Truth that this result does not contain anything
    pub fn is_empty(&self) -> bool {
        self.event_count == 0 && self.weight_sum == 0. && self.histograms.is_empty()
    }
}
//
impl Merge for PartialResult {
    fn merge(&mut self, other: Self) -> Result<()> {
        self.event_count += other.event_count;
        self.weight_sum += other.weight_sum;
        for (variable, hists) in other.histograms {
            match self.histograms.get_mut(&variable) {
                Some(mine) => mine.merge(hists)?,
                None => {
                    self.histograms.insert(variable, hists);
                }
            }
        }
        Ok(())
    }
}
//
impl From<PartialResult> for Mergeable {
    fn from(result: PartialResult) -> Self {
        if result.is_empty() {
            return Mergeable::Empty;
        }
        let histos = result
            .histograms
            .into_iter()
            .map(|(variable, hists)| (variable, Mergeable::Histograms(hists)))
            .collect();
        Mergeable::Map(BTreeMap::from([
            (NEVENTS.to_owned(), Mergeable::Count(result.event_count)),
            (SUMW.to_owned(), Mergeable::Sum(result.weight_sum)),
            (HISTOS.to_owned(), Mergeable::Map(histos)),
        ]))
    }
}
//
impl TryFrom<Mergeable> for PartialResult {
    type Error = Error;

    fn try_from(mut tree: Mergeable) -> Result<Self> {
        let unexpected = |left: &'static str, found: &Mergeable| Error::MergeKindMismatch {
            left,
            right: found.kind(),
        };
        let event_count = match tree.take(NEVENTS)? {
            Mergeable::Empty => 0,
            Mergeable::Count(count) => count,
            other => return Err(unexpected("counter", &other)),
        };
        let weight_sum = match tree.take(SUMW)? {
            Mergeable::Empty => 0.,
            Mergeable::Sum(sum) => sum,
            other => return Err(unexpected("sum", &other)),
        };
        let histograms = match tree.take(HISTOS)? {
            Mergeable::Empty => BTreeMap::new(),
            Mergeable::Map(entries) => entries
                .into_iter()
                .map(|(variable, entry)| match entry {
                    Mergeable::Histograms(hists) => Ok((variable, hists)),
                    other => Err(unexpected("histogram set", &other)),
                })
                .collect::<Result<_>>()?,
            other => return Err(unexpected("mapping", &other)),
        };
        Ok(Self {
            event_count,
            weight_sum,
            histograms,
        })
    }
}
