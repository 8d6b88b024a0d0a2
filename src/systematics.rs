//! Combination of event weight variations into systematic uncertainty bands
//!
//! A systematic uncertainty is often estimated by a whole family of alternate
//! event weights (QCD scale choices, PDF replicas...). Each of them gives a
//! varied histogram, and the family is then summarized by a pair of up/down
//! histograms, following one of several conventions.

use crate::{
    error::{Error, Result},
    histogram::Histogram,
    numeric::Float,
    store::{self, HistogramStore},
};

use nalgebra::DMatrix;
use prefix_num_ops::real::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Convention for summarizing a family of variations
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombineRule {
    /// Bin-by-bin maximum and minimum of the variations
    Envelope,

    /// Nominal ± root mean square deviation of the variations
    Rms,

    /// Nominal ± quadratic sum of the upward deviations of the variations
    ///
    /// Only variations which lie above the nominal contribute, and the same
    /// width is used on both sides. This follows a common PDF uncertainty
    /// convention and is intentionally not a two-sided quadratic sum.
    Square,
}

/// Summarize a family of variations of a nominal histogram into an up and a
/// down histogram
///
/// The returned histograms describe fully correlated shifts, with no extra
/// statistical uncertainty: their variances are set equal to their values.
///
pub fn combine(
    nominal: &Histogram,
    variations: &[Histogram],
    rule: CombineRule,
) -> Result<(Histogram, Histogram)> {
    if variations.is_empty() {
        return Err(Error::Config("cannot combine an empty set of variations".into()));
    }
    for variation in variations {
        nominal.check_compatible(variation)?;
    }

    // One row per variation, one column per cell
    let nominal_values = nominal.values();
    let num_cells = nominal_values.len();
    let varied = DMatrix::from_fn(variations.len(), num_cells, |var, cell| {
        variations[var].values()[cell]
    });
    let deviations = DMatrix::from_fn(variations.len(), num_cells, |var, cell| {
        varied[(var, cell)] - nominal_values[cell]
    });
    let num_variations = variations.len() as Float;

    let (up, down): (Vec<Float>, Vec<Float>) = (0..num_cells)
        .map(|cell| match rule {
            CombineRule::Envelope => {
                let column = varied.column(cell);
                let up = column.iter().copied().fold(Float::NEG_INFINITY, Float::max);
                let down = column.iter().copied().fold(Float::INFINITY, Float::min);
                (up, down)
            }
            CombineRule::Rms => {
                let spread = sqrt(deviations.column(cell).norm_squared() / num_variations);
                (nominal_values[cell] + spread, nominal_values[cell] - spread)
            }
            CombineRule::Square => {
                let spread = sqrt(
                    deviations
                        .column(cell)
                        .iter()
                        .map(|&dev| powi(dev.max(0.), 2))
                        .sum::<Float>(),
                );
                (nominal_values[cell] + spread, nominal_values[cell] - spread)
            }
        })
        .unzip();

    let band = |values: Vec<Float>| {
        Histogram::from_parts(nominal.axes().to_vec(), values.clone(), values)
    };
    Ok((band(up)?, band(down)?))
}

/// Replace the variation histograms of a sample component by the up/down band
/// of a systematic, within one `region/variable/` directory of the store
///
/// The nominal histogram is `<directory>histo_<sample>_<component>`, the
/// variations are suffixed with their name, and the band is written with the
/// `_<systematic>Up` and `_<systematic>Down` suffixes. The variation histograms
/// are deleted once combined.
///
pub fn apply(
    store: &mut HistogramStore,
    directory: &str,
    sample: &str,
    component: &str,
    systematic: &str,
    variations: &[String],
    rule: CombineRule,
) -> Result<()> {
    let base = format!("{directory}{}", store::leaf_name(sample, component));
    let nominal = store.get(&base)?.clone();
    let varied = variations
        .iter()
        .map(|variation| Ok(store.get(&format!("{base}_{variation}"))?.clone()))
        .collect::<Result<Vec<_>>>()?;

    let (up, down) = combine(&nominal, &varied, rule)?;
    for variation in variations {
        store.remove(&format!("{base}_{variation}"))?;
    }
    store.insert(format!("{base}_{systematic}Up"), up);
    store.insert(format!("{base}_{systematic}Down"), down);
    debug!("Combined {} variations into {base}_{systematic}Up/Down", variations.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::BinAxis;

    use approx::assert_relative_eq;

    fn hist(values: &[Float]) -> Histogram {
        let axis = BinAxis::regular(values.len() - 2, 0., 1.).unwrap();
        Histogram::from_parts(vec![axis], values.to_vec(), vec![1.; values.len()]).unwrap()
    }

    #[test]
    fn envelope_brackets_the_nominal() {
        let nominal = hist(&[0., 10., 20., 0.]);
        let variations = [hist(&[0., 12., 18., 0.]), hist(&[0., 9., 23., 1.]), nominal.clone()];
        let (up, down) = combine(&nominal, &variations, CombineRule::Envelope).unwrap();
        assert_eq!(up.values(), [0., 12., 23., 1.]);
        assert_eq!(down.values(), [0., 9., 18., 0.]);
        assert_eq!(up.variances(), up.values());
        assert_eq!(down.variances(), down.values());
        for cell in 0..4 {
            assert!(down.values()[cell] <= nominal.values()[cell]);
            assert!(nominal.values()[cell] <= up.values()[cell]);
        }
    }

    #[test]
    fn rms_is_symmetric() {
        let nominal = hist(&[0., 10., 0.]);
        let variations = [hist(&[0., 13., 0.]), hist(&[0., 6., 0.])];
        let (up, down) = combine(&nominal, &variations, CombineRule::Rms).unwrap();
        let spread = (12.5 as Float).sqrt();
        assert_relative_eq!(up.values()[1], 10. + spread, max_relative = 1e-12);
        assert_relative_eq!(down.values()[1], 10. - spread, max_relative = 1e-12);
        assert_eq!(up.values()[0], 0.);
    }

    #[test]
    fn square_only_counts_upward_deviations() {
        let nominal = hist(&[0., 10., 10., 0.]);
        let variations = [
            hist(&[0., 13., 5., 0.]),
            hist(&[0., 14., 2., 0.]),
            hist(&[0., 4., 9., 0.]),
        ];
        let (up, down) = combine(&nominal, &variations, CombineRule::Square).unwrap();
        assert_relative_eq!(up.values()[1], 15., max_relative = 1e-12);
        assert_relative_eq!(down.values()[1], 5., max_relative = 1e-12);
        assert_eq!(up.values()[2], 10.);
        assert_eq!(down.values()[2], 10.);
    }

    #[test]
    fn incompatible_or_missing_variations_fail() {
        let nominal = hist(&[0., 1., 0.]);
        assert!(combine(&nominal, &[], CombineRule::Envelope).is_err());
        let err = combine(&nominal, &[hist(&[0., 1., 1., 0.])], CombineRule::Rms).unwrap_err();
        assert!(matches!(err, Error::AxisMismatch(_)));
    }

    #[test]
    fn store_variations_are_replaced_by_a_band() {
        let mut store = HistogramStore::default();
        store.insert("sr/x/histo_S_sm", hist(&[0., 10., 0.]));
        store.insert("sr/x/histo_S_sm_QCD_0", hist(&[0., 12., 0.]));
        store.insert("sr/x/histo_S_sm_QCD_1", hist(&[0., 7., 0.]));
        let variations = vec!["QCD_0".to_owned(), "QCD_1".to_owned()];
        apply(&mut store, "sr/x/", "S", "sm", "QCDScale", &variations, CombineRule::Envelope)
            .unwrap();
        let keys = store.keys().collect::<Vec<_>>();
        assert_eq!(
            keys,
            ["sr/x/histo_S_sm", "sr/x/histo_S_sm_QCDScaleDown", "sr/x/histo_S_sm_QCDScaleUp"]
        );
        assert_eq!(store.get("sr/x/histo_S_sm_QCDScaleUp").unwrap().values()[1], 12.);

        let err = apply(&mut store, "sr/x/", "S", "sm", "QCDScale", &variations, CombineRule::Rms);
        assert!(matches!(err, Err(Error::MissingHistogram(_))));
    }
}
