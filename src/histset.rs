//! Families of histograms indexed by categorical labels
//!
//! For each variable, one chunk fills one histogram per (component, region,
//! variation) combination. These share their binning, so they are grouped in
//! a `HistogramSet` whose categorical axes are ordered label registries. The
//! registries are declared up-front from the analysis configuration, which
//! keeps merge-time compatibility checking a plain equality test.

use crate::{
    aggregate::Merge,
    error::{Error, Result},
    histogram::{BinAxis, Histogram},
};

use std::collections::BTreeMap;

/// Name of the categorical axis listing EFT components
pub const COMPONENT_AXIS: &str = "component";

/// Name of the categorical axis listing selection regions
pub const REGION_AXIS: &str = "region";

/// Name of the categorical axis listing event weight variations
pub const VARIATION_AXIS: &str = "variation";

/// Ordered registry of the labels of a categorical axis
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CategoryAxis {
    name: String,
    labels: Vec<String>,
}
//
impl CategoryAxis {
    /// Declare a categorical axis with its known labels
    pub fn new(
        name: impl Into<String>,
        labels: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut axis = Self {
            name: name.into(),
            labels: Vec::new(),
        };
        for label in labels {
            let label: String = label.into();
            axis.index_or_insert(&label);
        }
        axis
    }

    /// Name of the axis
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Labels, in registration order
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Position of a label, if registered
    pub fn index(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|known| known == label)
    }

    /// Position of a label, registering it at the end if it is new
    pub fn index_or_insert(&mut self, label: &str) -> usize {
        self.index(label).unwrap_or_else(|| {
            self.labels.push(label.to_owned());
            self.labels.len() - 1
        })
    }
}

/// Histograms sharing a binning, one per combination of categorical labels
#[derive(Clone, Debug, PartialEq)]
pub struct HistogramSet {
    /// Binned axes shared by all histograms
    axes: Vec<BinAxis>,

    /// Categorical axes
    categories: Vec<CategoryAxis>,

    /// Histograms that received at least one fill, keyed by label indices
    cells: BTreeMap<Vec<usize>, Histogram>,
}
//
impl HistogramSet {
    /// Set up an empty family of histograms
    pub fn new(axes: Vec<BinAxis>, categories: Vec<CategoryAxis>) -> Result<Self> {
        // Validate the binning once, so that cells can be created at will later
        Histogram::new(axes.clone())?;
        Ok(Self {
            axes,
            categories,
            cells: BTreeMap::new(),
        })
    }

    /// Binned axes
    pub fn axes(&self) -> &[BinAxis] {
        &self.axes
    }

    /// Categorical axes
    pub fn categories(&self) -> &[CategoryAxis] {
        &self.categories
    }

    /// Categorical axis of a given name
    pub fn category(&self, name: &str) -> Option<&CategoryAxis> {
        self.categories.iter().find(|axis| axis.name == name)
    }

    fn category_indices(&self, labels: &[&str]) -> Option<Vec<usize>> {
        if labels.len() != self.categories.len() {
            return None;
        }
        self.categories
            .iter()
            .zip(labels)
            .map(|(axis, label)| axis.index(label))
            .collect()
    }

    /// Histogram for a combination of labels (one per categorical axis, in
    /// axis order), growing the categorical axes for unseen labels
    pub fn entry(&mut self, labels: &[&str]) -> Result<&mut Histogram> {
        if labels.len() != self.categories.len() {
            return Err(Error::AxisMismatch(format!(
                "expected {} category labels, got {labels:?}",
                self.categories.len()
            )));
        }
        let key = self
            .categories
            .iter_mut()
            .zip(labels)
            .map(|(axis, label)| axis.index_or_insert(label))
            .collect::<Vec<_>>();
        let axes = &self.axes;
        Ok(self.cells.entry(key).or_insert_with(|| {
            Histogram::new(axes.clone()).expect("binning was validated at construction")
        }))
    }

    /// Copy of the histogram for a combination of labels. Registered label
    /// combinations that were never filled yield an empty histogram.
    pub fn get(&self, labels: &[&str]) -> Result<Histogram> {
        let key = self.category_indices(labels).ok_or_else(|| {
            Error::MissingHistogram(format!("{labels:?} in {:?}", self.categories))
        })?;
        match self.cells.get(&key) {
            Some(hist) => Ok(hist.clone()),
            None => Histogram::new(self.axes.clone()),
        }
    }

    /// Number of histograms that received fills
    pub fn num_filled(&self) -> usize {
        self.cells.len()
    }
}
//
impl Merge for HistogramSet {
    fn merge(&mut self, other: Self) -> Result<()> {
        if self.axes != other.axes {
            return Err(Error::AxisMismatch(format!("{:?} vs {:?}", self.axes, other.axes)));
        }
        if self.categories != other.categories {
            return Err(Error::AxisMismatch(format!(
                "{:?} vs {:?}",
                self.categories, other.categories
            )));
        }
        for (key, hist) in other.cells {
            match self.cells.get_mut(&key) {
                Some(mine) => mine.merge(hist)?,
                None => {
                    self.cells.insert(key, hist);
                }
            }
        }
        Ok(())
    }
}
