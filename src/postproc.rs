//! Histogram post-processing: normalization, flow folding and unrolling

use crate::{
    error::{Error, Result},
    histogram::{BinAxis, Histogram},
    numeric::Float,
};

use serde::{Deserialize, Serialize};

/// Conversion factor from pb (cross-sections) to fb (luminosities are in fb⁻¹)
const FB_PER_PB: Float = 1000.;

/// Which flow cells should be folded into the edge bins
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoldMode {
    /// Leave the flow cells alone
    None,
    /// Fold the underflow into the first bin
    Underflow,
    /// Fold the overflow into the last bin
    Overflow,
    /// Fold both the underflow and the overflow
    #[default]
    Both,
}
//
impl FoldMode {
    /// Decode the numerical fold codes of older analysis configurations
    /// (0: none, 1: underflow, 2: overflow, 3: both)
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(FoldMode::None),
            1 => Ok(FoldMode::Underflow),
            2 => Ok(FoldMode::Overflow),
            3 => Ok(FoldMode::Both),
            _ => Err(Error::Config(format!("unknown fold mode {code}"))),
        }
    }

    fn folds_underflow(self) -> bool {
        matches!(self, FoldMode::Underflow | FoldMode::Both)
    }

    fn folds_overflow(self) -> bool {
        matches!(self, FoldMode::Overflow | FoldMode::Both)
    }
}

/// Factor which normalizes a sample with cross-section `xs` (pb) and sum of
/// generator weights `sumw` to an integrated luminosity `lumi` (fb⁻¹)
pub fn normalization(xs: Float, lumi: Float, sumw: Float) -> Float {
    xs * FB_PER_PB * lumi / sumw
}

/// Fold the flow cells of every axis into the neighbouring in-range bins
pub fn fold(hist: &mut Histogram, mode: FoldMode) {
    let extents = hist.axes().iter().map(BinAxis::extent).collect::<Vec<_>>();
    if mode.folds_underflow() {
        for axis in 0..extents.len() {
            hist.move_content(axis, 0, 1);
        }
    }
    if mode.folds_overflow() {
        for (axis, extent) in extents.into_iter().enumerate() {
            hist.move_content(axis, extent - 1, extent - 2);
        }
    }
}

/// Flatten the in-range bins of a 2D histogram into a 1D histogram, bin
/// `(ix, iy)` going to bin `ix * ny + iy`. Flow cells are not carried over.
pub fn unroll(hist: &Histogram) -> Result<Histogram> {
    let [x_axis, y_axis] = hist.axes() else {
        return Err(Error::UnrollDimension(hist.ndim()));
    };
    let (nx, ny) = (x_axis.num_bins(), y_axis.num_bins());
    let axis = BinAxis::regular(nx * ny, 0., (nx * ny) as Float)?;

    let mut values = vec![0.; nx * ny + 2];
    let mut variances = vec![0.; nx * ny + 2];
    for ix in 0..nx {
        for iy in 0..ny {
            let (value, variance) = hist.get(&[ix + 1, iy + 1]);
            values[ix * ny + iy + 1] = value;
            variances[ix * ny + iy + 1] = variance;
        }
    }
    Histogram::from_parts(vec![axis], values, variances)
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;

    fn hist_1d(values: Vec<Float>) -> Histogram {
        let axis = BinAxis::regular(values.len() - 2, 0., 1.).unwrap();
        let variances = values.iter().map(|v| v / 2.).collect();
        Histogram::from_parts(vec![axis], values, variances).unwrap()
    }

    #[test]
    fn fold_modes_1d() {
        let mut hist = hist_1d(vec![1., 2., 3., 4.]);
        fold(&mut hist, FoldMode::Both);
        assert_eq!(hist.values(), [0., 3., 7., 0.]);
        assert_eq!(hist.variances(), [0., 1.5, 3.5, 0.]);

        let mut hist = hist_1d(vec![1., 2., 3., 4.]);
        fold(&mut hist, FoldMode::Underflow);
        assert_eq!(hist.values(), [0., 3., 3., 4.]);

        let mut hist = hist_1d(vec![1., 2., 3., 4.]);
        fold(&mut hist, FoldMode::Overflow);
        assert_eq!(hist.values(), [1., 2., 7., 0.]);

        let mut hist = hist_1d(vec![1., 2., 3., 4.]);
        fold(&mut hist, FoldMode::None);
        assert_eq!(hist.values(), [1., 2., 3., 4.]);
        assert_eq!(FoldMode::default(), FoldMode::Both);
    }

    #[test]
    fn fold_preserves_integral_in_every_dimension() {
        for ndim in 1..=3 {
            let axes = (0..ndim)
                .map(|dim| BinAxis::regular(dim + 2, 0., 1.).unwrap())
                .collect::<Vec<_>>();
            let mut hist = Histogram::new(axes).unwrap();
            let num_cells = hist.values().len();
            let (values, variances) = hist.cells_mut();
            for cell in 0..num_cells {
                values[cell] = (cell % 7) as Float - 2.;
                variances[cell] = (cell % 5) as Float;
            }
            let (total, total_var) = (hist.total(), hist.total_variance());

            fold(&mut hist, FoldMode::Both);
            assert_relative_eq!(hist.total(), total, max_relative = 1e-12);
            assert_relative_eq!(hist.total_variance(), total_var, max_relative = 1e-12);

            // Every flow cell, along every axis, is now empty
            let strides = hist.strides();
            for cell in 0..num_cells {
                let in_flow = hist.axes().iter().zip(&strides).any(|(axis, stride)| {
                    let idx = (cell / stride) % axis.extent();
                    idx == 0 || idx == axis.extent() - 1
                });
                if in_flow {
                    assert_eq!(hist.values()[cell], 0.);
                    assert_eq!(hist.variances()[cell], 0.);
                }
            }
        }
    }

    #[test]
    fn fold_2d_corners() {
        let axes = vec![BinAxis::regular(2, 0., 1.).unwrap(), BinAxis::regular(2, 0., 1.).unwrap()];
        let mut hist = Histogram::new(axes).unwrap();
        hist.fill(&[-1., -1.], 1.);
        hist.fill(&[2., 2.], 2.);
        hist.fill(&[-1., 2.], 4.);
        fold(&mut hist, FoldMode::Both);
        assert_eq!(hist.get(&[1, 1]), (1., 1.));
        assert_eq!(hist.get(&[2, 2]), (2., 4.));
        assert_eq!(hist.get(&[1, 2]), (4., 16.));
    }

    #[test]
    fn unroll_flattens_row_major() {
        let axes = vec![BinAxis::regular(2, 0., 2.).unwrap(), BinAxis::regular(3, 0., 3.).unwrap()];
        let mut hist = Histogram::new(axes).unwrap();
        for ix in 0..2 {
            for iy in 0..3 {
                let weight = (10 * ix + iy) as Float;
                hist.fill(&[ix as Float + 0.5, iy as Float + 0.5], weight);
            }
        }
        let flat = unroll(&hist).unwrap();
        assert_eq!(flat.ndim(), 1);
        assert_eq!(flat.axes()[0].num_bins(), 6);
        assert_eq!(flat.values(), [0., 0., 1., 2., 10., 11., 12., 0.]);
        assert_eq!(flat.total(), hist.total());
        assert_eq!(flat.total_variance(), hist.total_variance());
    }

    #[test]
    fn unroll_requires_two_axes() {
        let hist = hist_1d(vec![0., 1., 0.]);
        assert!(matches!(unroll(&hist), Err(Error::UnrollDimension(1))));
    }

    #[test]
    fn normalization_factor() {
        assert_relative_eq!(normalization(0.5, 300., 1500.), 100.);
        assert_eq!(FoldMode::from_code(3).unwrap(), FoldMode::Both);
        assert!(FoldMode::from_code(4).is_err());
    }
}
