//! Weighted histograms with any number of binned axes
//!
//! Every axis carries an underflow and an overflow cell in addition to its
//! in-range bins, so that no fill is ever lost. For each cell we track the sum
//! of weights and the sum of squared weights (the variance estimate).

use crate::{
    aggregate::Merge,
    error::{Error, Result},
    numeric::Float,
};

use serde::{Deserialize, Serialize};

/// Binning of one histogram axis
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinAxis {
    /// `bins` bins of equal width spanning `low..high`
    #[allow(missing_docs)]
    Regular { bins: usize, low: Float, high: Float },

    /// Bins delimited by a sorted list of edges
    #[allow(missing_docs)]
    Variable { edges: Vec<Float> },
}
//
impl BinAxis {
    /// Axis with bins of equal width
    pub fn regular(bins: usize, low: Float, high: Float) -> Result<Self> {
        if bins == 0 || !(low < high) {
            return Err(Error::InvalidAxis(format!(
                "regular axis needs bins > 0 and low < high, got {bins} bins in {low}..{high}"
            )));
        }
        Ok(BinAxis::Regular { bins, low, high })
    }

    /// Axis with arbitrary bin edges
    pub fn variable(edges: Vec<Float>) -> Result<Self> {
        if edges.len() < 2 || edges.windows(2).any(|pair| !(pair[0] < pair[1])) {
            return Err(Error::InvalidAxis(format!(
                "variable axis needs at least two strictly increasing edges, got {edges:?}"
            )));
        }
        Ok(BinAxis::Variable { edges })
    }

    /// Number of in-range bins
    pub fn num_bins(&self) -> usize {
        match self {
            BinAxis::Regular { bins, .. } => *bins,
            BinAxis::Variable { edges } => edges.len() - 1,
        }
    }

    /// Number of cells along this axis, including underflow and overflow
    pub fn extent(&self) -> usize {
        self.num_bins() + 2
    }

    /// Bin edges
    pub fn edges(&self) -> Vec<Float> {
        match self {
            BinAxis::Regular { bins, low, high } => {
                let width = (high - low) / (*bins as Float);
                (0..=*bins)
                    .map(|i| if i == *bins { *high } else { low + width * (i as Float) })
                    .collect()
            }
            BinAxis::Variable { edges } => edges.clone(),
        }
    }

    /// Cell of a value: 0 is the underflow, `num_bins() + 1` the overflow,
    /// in-range bins sit in between. NaN goes to the overflow.
    pub fn index(&self, x: Float) -> usize {
        let overflow = self.num_bins() + 1;
        if x.is_nan() {
            return overflow;
        }
        match self {
            BinAxis::Regular { bins, low, high } => {
                if x < *low {
                    0
                } else if x >= *high {
                    overflow
                } else {
                    let pos = (x - low) / (high - low) * (*bins as Float);
                    (pos as usize).min(bins - 1) + 1
                }
            }
            BinAxis::Variable { edges } => edges.partition_point(|&edge| edge <= x),
        }
    }
}

/// Histogram of weighted fills over one or more binned axes
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    /// Binned axes, the last one varying fastest in the cell arrays
    axes: Vec<BinAxis>,

    /// Sum of weights in each cell, including flow cells
    values: Vec<Float>,

    /// Sum of squared weights in each cell, including flow cells
    variances: Vec<Float>,
}
//
impl Histogram {
    /// Set up an empty histogram
    pub fn new(axes: Vec<BinAxis>) -> Result<Self> {
        if axes.is_empty() {
            return Err(Error::InvalidAxis("a histogram needs at least one axis".into()));
        }
        let num_cells = axes.iter().map(BinAxis::extent).product();
        Ok(Self {
            axes,
            values: vec![0.; num_cells],
            variances: vec![0.; num_cells],
        })
    }

    /// Build a histogram from precomputed cell contents (flow cells included)
    pub fn from_parts(
        axes: Vec<BinAxis>,
        values: Vec<Float>,
        variances: Vec<Float>,
    ) -> Result<Self> {
        let mut hist = Self::new(axes)?;
        if values.len() != hist.values.len() || variances.len() != hist.variances.len() {
            return Err(Error::InvalidAxis(format!(
                "expected {} cells, got {} values and {} variances",
                hist.values.len(),
                values.len(),
                variances.len()
            )));
        }
        hist.values = values;
        hist.variances = variances;
        Ok(hist)
    }

    /// Binned axes
    pub fn axes(&self) -> &[BinAxis] {
        &self.axes
    }

    /// Number of binned axes
    pub fn ndim(&self) -> usize {
        self.axes.len()
    }

    /// Sums of weights, flow cells included, in row-major order
    pub fn values(&self) -> &[Float] {
        &self.values
    }

    /// Sums of squared weights, flow cells included, in row-major order
    pub fn variances(&self) -> &[Float] {
        &self.variances
    }

    /// Mutable access to both cell arrays at once
    pub fn cells_mut(&mut self) -> (&mut [Float], &mut [Float]) {
        (&mut self.values, &mut self.variances)
    }

    /// Distance between consecutive cells along each axis
    pub fn strides(&self) -> Vec<usize> {
        let mut strides = vec![1; self.axes.len()];
        for dim in (0..self.axes.len().saturating_sub(1)).rev() {
            strides[dim] = strides[dim + 1] * self.axes[dim + 1].extent();
        }
        strides
    }

    /// Position of a cell in the cell arrays, given its index along each axis
    pub fn cell(&self, indices: &[usize]) -> usize {
        debug_assert_eq!(indices.len(), self.axes.len());
        indices
            .iter()
            .zip(self.strides())
            .map(|(idx, stride)| idx * stride)
            .sum()
    }

    /// Sum of weights and squared weights of a cell
    pub fn get(&self, indices: &[usize]) -> (Float, Float) {
        let cell = self.cell(indices);
        (self.values[cell], self.variances[cell])
    }

    /// Record one weighted entry at some coordinates
    pub fn fill(&mut self, coords: &[Float], weight: Float) {
        debug_assert_eq!(coords.len(), self.axes.len());
        let indices = self
            .axes
            .iter()
            .zip(coords)
            .map(|(axis, &x)| axis.index(x))
            .collect::<Vec<_>>();
        let cell = self.cell(&indices);
        self.values[cell] += weight;
        self.variances[cell] += weight * weight;
    }

    /// Multiply the contents by a constant (variances go with its square)
    pub fn scale(&mut self, factor: Float) {
        self.values.iter_mut().for_each(|v| *v *= factor);
        self.variances.iter_mut().for_each(|v| *v *= factor * factor);
    }

    /// Sum of weights over all cells, flow cells included
    pub fn total(&self) -> Float {
        self.values.iter().sum()
    }

    /// Sum of squared weights over all cells, flow cells included
    pub fn total_variance(&self) -> Float {
        self.variances.iter().sum()
    }

    /// Move the content of every cell sitting at index `from` along `axis` to
    /// the cell at index `to`, leaving the former cells empty
    pub fn move_content(&mut self, axis: usize, from: usize, to: usize) {
        let stride = self.strides()[axis];
        let extent = self.axes[axis].extent();
        for cell in 0..self.values.len() {
            if (cell / stride) % extent != from {
                continue;
            }
            let target = cell - from * stride + to * stride;
            self.values[target] += self.values[cell];
            self.values[cell] = 0.;
            self.variances[target] += self.variances[cell];
            self.variances[cell] = 0.;
        }
    }

    /// Check that another histogram has the same binning as this one
    pub fn check_compatible(&self, other: &Histogram) -> Result<()> {
        if self.axes != other.axes {
            return Err(Error::AxisMismatch(format!("{:?} vs {:?}", self.axes, other.axes)));
        }
        Ok(())
    }
}
//
impl Merge for Histogram {
    fn merge(&mut self, other: Self) -> Result<()> {
        self.check_compatible(&other)?;
        self.values
            .iter_mut()
            .zip(&other.values)
            .for_each(|(v, o)| *v += o);
        self.variances
            .iter_mut()
            .zip(&other.variances)
            .for_each(|(v, o)| *v += o);
        Ok(())
    }
}
