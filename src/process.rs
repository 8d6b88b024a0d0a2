//! Processing of one chunk of events
//!
//! This is the unit of work that gets distributed across workers. It only
//! reads its inputs and returns a `PartialResult`, so that chunks can be
//! processed concurrently and in any order.

use crate::{
    config::{Configuration, Sample, GEN_WEIGHT},
    decompose::{self, Component, WeightMatrix},
    error::{Error, Result},
    events::{ChunkDescriptor, Column, EventSource},
    histset::{CategoryAxis, HistogramSet, COMPONENT_AXIS, REGION_AXIS, VARIATION_AXIS},
    numeric::Float,
    partial::PartialResult,
};

use tracing::{debug, error};

use std::collections::BTreeMap;

/// Fill the histograms of one chunk of events from a sample
///
/// A chunk whose reweighting weights do not match the sample's reweight card
/// is reported and contributes an empty result. Any other failure is fatal.
///
pub fn process(
    chunk: &ChunkDescriptor,
    sample: &Sample,
    cfg: &Configuration,
    source: &dyn EventSource,
) -> Result<PartialResult> {
    match process_impl(chunk, sample, cfg, source) {
        Err(err) if err.is_recoverable() => {
            error!(sample = %sample.name, %chunk, "Skipping chunk: {err}");
            Ok(PartialResult::default())
        }
        other => other,
    }
}

fn process_impl(
    chunk: &ChunkDescriptor,
    sample: &Sample,
    cfg: &Configuration,
    source: &dyn EventSource,
) -> Result<PartialResult> {
    let events = source.read(chunk, &cfg.branches_for(sample))?;
    let num_events = events.len();

    // Check the reweighting weights before anything else
    let weights = sample
        .eft
        .as_ref()
        .map(|eft| {
            let rows = events.jagged(&eft.weights_branch)?;
            WeightMatrix::from_jagged(rows, eft.card.num_points())
        })
        .transpose()?;

    // Normalization needs the full chunk, before any selection
    let event_count = num_events as u64;
    let weight_sum = events.scalar(GEN_WEIGHT)?.iter().sum::<Float>();

    let components = match (&sample.eft, &weights) {
        (Some(eft), Some(weights)) => {
            decompose::decompose(weights, &eft.card, &eft.ops, eft.sm_lin_quad)?
        }
        _ => vec![Component::unit(num_events)],
    };

    // Physics objects, then variables, which selections may depend on
    let mut events = (cfg.object_definitions)(events)?;
    if events.len() != num_events {
        return Err(Error::EventCountChanged {
            before: num_events,
            after: events.len(),
        });
    }
    for variable in &cfg.variables {
        for dim in &variable.dimensions {
            let values = (dim.func)(&events)?;
            check_length(&format!("variable {:?}", dim.name), num_events, values.len())?;
            events.insert(dim.name.clone(), Column::Scalar(values))?;
        }
    }

    // Event weights of each variation
    let nominal_weights = events.scalar(GEN_WEIGHT)?.to_vec();
    let variation_weights = cfg
        .variations
        .iter()
        .map(|variation| match &variation.weight {
            Some(func) => {
                let weights = func(&events)?;
                let what = format!("variation {:?}", variation.name);
                check_length(&what, num_events, weights.len())?;
                Ok(weights)
            }
            None => Ok(nominal_weights.clone()),
        })
        .collect::<Result<Vec<_>>>()?;

    // Selection regions
    let region_masks = cfg
        .regions
        .iter()
        .map(|region| {
            let mask = (region.predicate)(&events)?;
            check_length(&format!("region {:?}", region.name), num_events, mask.len())?;
            Ok(mask)
        })
        .collect::<Result<Vec<_>>>()?;

    // Fill one histogram per variable, component, region and variation
    let component_names = sample.components();
    debug_assert!(components.iter().map(|c| &c.name).eq(component_names.iter()));
    let categories = vec![
        CategoryAxis::new(COMPONENT_AXIS, component_names),
        CategoryAxis::new(REGION_AXIS, cfg.regions.iter().map(|r| r.name.as_str())),
        CategoryAxis::new(VARIATION_AXIS, cfg.variations.iter().map(|v| v.name.as_str())),
    ];
    let mut histograms = BTreeMap::new();
    let mut coords = Vec::new();
    for variable in &cfg.variables {
        let mut hists = HistogramSet::new(variable.axes(), categories.clone())?;
        let columns = variable
            .dimensions
            .iter()
            .map(|dim| events.scalar(&dim.name))
            .collect::<Result<Vec<_>>>()?;

        for component in &components {
            for (region, mask) in cfg.regions.iter().zip(&region_masks) {
                let applicable = cfg
                    .variations
                    .iter()
                    .zip(&variation_weights)
                    .filter(|(variation, _)| variation.applies_to(&sample.name, &component.name));
                for (variation, weights) in applicable {
                    let labels = [&*component.name, &*region.name, &*variation.name];
                    let hist = hists.entry(&labels)?;
                    let selected = mask.iter().enumerate().filter(|(_, &keep)| keep);
                    for (event, _) in selected {
                        coords.clear();
                        coords.extend(columns.iter().map(|column| column[event]));
                        hist.fill(&coords, weights[event] * component.weights[event]);
                    }
                }
            }
        }
        histograms.insert(variable.name.clone(), hists);
    }

    debug!(
        sample = %sample.name,
        %chunk,
        "Processed {event_count} events into {} components",
        components.len()
    );
    Ok(PartialResult {
        event_count,
        weight_sum,
        histograms,
    })
}

/// Check that a derived per-event quantity has one entry per event
fn check_length(what: &str, expected: usize, found: usize) -> Result<()> {
    if expected != found {
        return Err(Error::ColumnLength {
            what: what.to_owned(),
            expected,
            found,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        card::ReweightCard,
        config::{tests::column_variable, EftConfig, Variation, REWEIGHT_BRANCH},
        events::{EventTable, MemorySource, DEFAULT_TREE},
        histogram::BinAxis,
        store::NOMINAL,
    };

    use std::sync::Arc;

    fn eft_events(rows: Vec<Vec<Float>>) -> EventTable {
        let n = rows.len();
        EventTable::new([
            (GEN_WEIGHT.to_owned(), Column::Scalar(vec![2.; n])),
            ("x".to_owned(), Column::Scalar((0..n).map(|i| i as Float + 0.5).collect())),
            (REWEIGHT_BRANCH.to_owned(), Column::Jagged(rows)),
        ])
        .unwrap()
    }

    fn setup(rows: Vec<Vec<Float>>) -> (Configuration, MemorySource, ChunkDescriptor) {
        let card = ReweightCard::parse("# sm a\n# op=1 b\n# op=-1 c\n").unwrap();
        let eft = EftConfig::new(card, vec!["op".into()]).unwrap();
        let sample = Sample::new("S", 1., vec!["f".into()]).with_eft(eft);
        let pdf = Arc::new(|events: &EventTable| -> Result<Vec<Float>> {
            Ok(events.scalar(GEN_WEIGHT)?.iter().map(|w| 1.5 * w).collect())
        });
        let cfg = Configuration::builder()
            .lumi(1.)
            .branches([GEN_WEIGHT, "x", REWEIGHT_BRANCH])
            .sample(sample)
            .variable(column_variable("x", BinAxis::regular(3, 0., 3.).unwrap()))
            .region("all", |events| Ok(vec![true; events.len()]))
            .region("low", |events| {
                Ok(events.scalar("x")?.iter().map(|&x| x < 1.).collect())
            })
            .variation(Variation::new("PDF_0", pdf, ["S_sm".to_owned()]))
            .build()
            .unwrap();
        let mut source = MemorySource::new();
        source.add_file("f", eft_events(rows));
        let chunk = ChunkDescriptor::Files {
            paths: vec!["f".into()],
            tree: DEFAULT_TREE.into(),
        };
        (cfg, source, chunk)
    }

    #[test]
    fn fills_every_component_region_and_variation() {
        let (cfg, source, chunk) =
            setup(vec![vec![10., 12., 8.], vec![5., 6., 4.], vec![0., 0., 0.]]);
        let result = process(&chunk, &cfg.samples[0], &cfg, &source).unwrap();
        assert_eq!(result.event_count, 3);
        assert_eq!(result.weight_sum, 6.);

        let hists = &result.histograms["x"];
        let sm = hists.get(&["sm", "all", NOMINAL]).unwrap();
        assert_eq!(sm.values(), [0., 20., 10., 0., 0.]);
        assert_eq!(sm.variances(), [0., 400., 100., 0., 0.]);
        let lin = hists.get(&["lin_op", "all", NOMINAL]).unwrap();
        assert_eq!(lin.values(), [0., 4., 2., 0., 0.]);
        let low = hists.get(&["sm", "low", NOMINAL]).unwrap();
        assert_eq!(low.values(), [0., 20., 0., 0., 0.]);
        let pdf = hists.get(&["sm", "all", "PDF_0"]).unwrap();
        assert_eq!(pdf.values(), [0., 30., 15., 0., 0.]);
        // The PDF variation only applies to the sm component
        assert_eq!(hists.num_filled(), 3 * 2 + 2);
    }

    #[test]
    fn mismatched_reweighting_weights_skip_the_chunk() {
        let (cfg, source, chunk) = setup(vec![vec![10., 12., 8.], vec![5., 6.]]);
        let result = process(&chunk, &cfg.samples[0], &cfg, &source).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn other_failures_are_fatal() {
        let (mut cfg, source, chunk) = setup(vec![vec![1., 1., 1.]]);
        cfg.branches.push("missing".into());
        let err = process(&chunk, &cfg.samples[0], &cfg, &source).unwrap_err();
        assert!(matches!(err, Error::MissingColumn(name) if name == "missing"));

        let (mut cfg, source, chunk) = setup(vec![vec![1., 1., 1.], vec![1., 1., 1.]]);
        cfg.object_definitions = Arc::new(|events: EventTable| -> Result<EventTable> {
            events.filter(&[true, false])
        });
        let err = process(&chunk, &cfg.samples[0], &cfg, &source).unwrap_err();
        assert!(matches!(err, Error::EventCountChanged { before: 2, after: 1 }));
    }

    #[test]
    fn object_definitions_feed_variables() {
        let (mut cfg, source, chunk) = setup(vec![vec![1., 1., 1.]]);
        cfg.object_definitions = Arc::new(|mut events: EventTable| -> Result<EventTable> {
            let doubled = events.scalar("x")?.iter().map(|x| 2. * x).collect();
            events.insert("x2", Column::Scalar(doubled))?;
            Ok(events)
        });
        cfg.variables = vec![column_variable("x2", BinAxis::regular(3, 0., 3.).unwrap())];
        let result = process(&chunk, &cfg.samples[0], &cfg, &source).unwrap();
        let sm = result.histograms["x2"].get(&["sm", "all", NOMINAL]).unwrap();
        assert_eq!(sm.values(), [0., 0., 2., 0., 0.]);
    }
}
