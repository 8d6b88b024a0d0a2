//! Persistent histogram store
//!
//! Final histograms are stored under hierarchical keys of the form
//! `region/variable/histo_<sample>_<component>[_<variation>]`, which is the
//! layout that statistical fitting tools expect. The store is written once all
//! samples have been aggregated, and may later be updated in place to replace
//! families of variations by systematic uncertainty bands.

use crate::{
    error::{Error, Result},
    histogram::Histogram,
    numeric::Float,
};

use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use std::{collections::BTreeMap, fs, path::Path};

/// Name of the variation that every other variation is compared to
pub const NOMINAL: &str = "nominal";

/// Key under which a histogram is stored
pub fn histogram_key(
    region: &str,
    variable: &str,
    sample: &str,
    component: &str,
    variation: &str,
) -> String {
    let mut key = format!("{}{}", directory(region, variable), leaf_name(sample, component));
    if variation != NOMINAL {
        key.push('_');
        key.push_str(variation);
    }
    key
}

/// Directory which holds the histograms of one variable in one region
pub fn directory(region: &str, variable: &str) -> String {
    format!("{region}/{}/", variable.replace(':', "_"))
}

/// Name of the nominal histogram of a sample component within a directory
pub fn leaf_name(sample: &str, component: &str) -> String {
    format!("histo_{sample}_{component}")
}

/// Bookkeeping information about one processed sample
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SampleSummary {
    /// Number of events read
    pub event_count: u64,

    /// Sum of nominal generator weights
    pub weight_sum: Float,

    /// Factor applied to the histograms to normalize them
    pub scale: Float,

    /// Components which were histogrammed
    pub components: Vec<String>,
}

/// Hierarchical key-value store of histograms
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramStore {
    /// When the store was created (RFC 3339)
    created: String,

    /// Per-sample bookkeeping
    samples: BTreeMap<String, SampleSummary>,

    /// Histograms, by key
    histograms: BTreeMap<String, Histogram>,
}
//
impl HistogramStore {
    /// Create an empty store, stamped with the current time
    pub fn new() -> Result<Self> {
        Ok(Self {
            created: OffsetDateTime::now_utc().format(&Rfc3339)?,
            ..Self::default()
        })
    }

    /// Load a store from disk
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    /// Write the store to disk
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }

    /// Creation timestamp
    pub fn created(&self) -> &str {
        &self.created
    }

    /// Record the bookkeeping information of a sample
    pub fn record_sample(&mut self, sample: impl Into<String>, summary: SampleSummary) {
        self.samples.insert(sample.into(), summary);
    }

    /// Bookkeeping information of a sample
    pub fn sample(&self, sample: &str) -> Option<&SampleSummary> {
        self.samples.get(sample)
    }

    /// Store a histogram, replacing any previous histogram with the same key
    pub fn insert(&mut self, key: impl Into<String>, hist: Histogram) {
        self.histograms.insert(key.into(), hist);
    }

    /// Access a histogram
    pub fn get(&self, key: &str) -> Result<&Histogram> {
        self.histograms
            .get(key)
            .ok_or_else(|| Error::MissingHistogram(key.to_owned()))
    }

    /// Truth that a histogram is stored under this key
    pub fn contains(&self, key: &str) -> bool {
        self.histograms.contains_key(key)
    }

    /// Delete a histogram, returning it
    pub fn remove(&mut self, key: &str) -> Result<Histogram> {
        self.histograms
            .remove(key)
            .ok_or_else(|| Error::MissingHistogram(key.to_owned()))
    }

    /// Number of stored histograms
    pub fn len(&self) -> usize {
        self.histograms.len()
    }

    /// Truth that no histogram is stored
    pub fn is_empty(&self) -> bool {
        self.histograms.is_empty()
    }

    /// All keys, in lexicographic order
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.histograms.keys().map(String::as_str)
    }

    /// Keys which start with some prefix (e.g. a `region/variable/` directory)
    pub fn keys_with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.histograms
            .range(prefix.to_owned()..)
            .map(|(key, _)| key.as_str())
            .take_while(move |key| key.starts_with(prefix))
    }
}
