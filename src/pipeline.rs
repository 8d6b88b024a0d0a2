//! End-to-end histogram production
//!
//! Every sample is split into chunks, the chunks of all samples are processed
//! and merged together, and the merged histograms of each sample are then
//! normalized and post-processed into the histogram store. Systematic
//! uncertainty bands are computed last, from the stored histograms.

use crate::{
    aggregate::Mergeable,
    config::{sample_component_key, Configuration, Sample, SystematicKind},
    error::{Error, Result},
    events::{ChunkDescriptor, EventSource},
    histogram::Histogram,
    partial::PartialResult,
    postproc, process, scheduling,
    store::{self, HistogramStore, SampleSummary},
    systematics,
};

use tracing::{debug, info, warn};

/// Split the input files of a sample into chunks of roughly
/// `nevents_per_job` events
pub fn plan_chunks(sample: &Sample) -> Result<Vec<ChunkDescriptor>> {
    let num_files = sample
        .limit_files
        .map_or(sample.files.len(), |limit| limit.min(sample.files.len()));
    if num_files == 0 {
        return Err(Error::NoInputFiles(sample.name.clone()));
    }
    let files_per_job = sample
        .nevents_per_job
        .div_ceil(sample.nevents_per_file)
        .max(1);
    Ok(sample.files[..num_files]
        .chunks(files_per_job)
        .map(|paths| ChunkDescriptor::Files {
            paths: paths.to_vec(),
            tree: sample.tree.clone(),
        })
        .collect())
}

/// Produce the final histograms of an analysis
pub fn run(cfg: &Configuration, source: &dyn EventSource) -> Result<HistogramStore> {
    // Plan everything first, so that missing inputs are reported before any
    // time is spent processing events
    let mut tasks = Vec::new();
    for sample in &cfg.samples {
        let chunks = plan_chunks(sample)?;
        info!(
            "Sample {} will be processed in {} chunk(s) from {} file(s)",
            sample.name,
            chunks.len(),
            chunks.iter().map(|chunk| chunk.paths().len()).sum::<usize>()
        );
        tasks.extend(chunks.into_iter().map(|chunk| (sample, chunk)));
    }

    // Process all chunks, keeping the results of each sample apart
    let mut merged = scheduling::run_chunks(&tasks, &cfg.runner, |(sample, chunk)| {
        let result = process::process(chunk, sample, cfg, source)?;
        Ok(Mergeable::from(result).keyed(sample.name.as_str()))
    })?;

    // Normalize and store the histograms of each sample
    let mut store = HistogramStore::new()?;
    for sample in &cfg.samples {
        let result = PartialResult::try_from(merged.take(&sample.name)?)?;
        store_sample(&mut store, cfg, sample, result)?;
    }

    apply_systematics(&mut store, cfg)?;
    info!("Produced {} histograms", store.len());
    Ok(store)
}

/// Normalize the merged histograms of one sample and write them to the store
fn store_sample(
    store: &mut HistogramStore,
    cfg: &Configuration,
    sample: &Sample,
    result: PartialResult,
) -> Result<()> {
    if result.weight_sum == 0. {
        return Err(Error::NoEvents(sample.name.clone()));
    }
    let scale = postproc::normalization(sample.xs, cfg.lumi, result.weight_sum);
    let components = sample.components();
    info!(
        "Sample {}: {} events, sum of weights {}, scale factor {scale}",
        sample.name, result.event_count, result.weight_sum
    );

    for variable in &cfg.variables {
        // A sample whose chunks were all skipped has no histogram
        let hists = result.histograms.get(&variable.name);
        for region in &cfg.regions {
            for component in &components {
                let variations = cfg
                    .variations
                    .iter()
                    .filter(|variation| variation.applies_to(&sample.name, component));
                for variation in variations {
                    let mut hist = match hists {
                        Some(hists) => {
                            hists.get(&[component.as_str(), &region.name, &variation.name])?
                        }
                        None => Histogram::new(variable.axes())?,
                    };
                    hist.scale(scale);
                    postproc::fold(&mut hist, variable.fold);
                    if hist.ndim() == 2 {
                        hist = postproc::unroll(&hist)?;
                    }
                    let key = store::histogram_key(
                        &region.name,
                        &variable.name,
                        &sample.name,
                        component,
                        &variation.name,
                    );
                    store.insert(key, hist);
                }
            }
        }
    }

    store.record_sample(
        sample.name.as_str(),
        SampleSummary {
            event_count: result.event_count,
            weight_sum: result.weight_sum,
            scale,
            components,
        },
    );
    Ok(())
}

/// Replace the variation histograms of shape systematics by up/down bands
fn apply_systematics(store: &mut HistogramStore, cfg: &Configuration) -> Result<()> {
    for systematic in &cfg.systematics {
        let SystematicKind::Shape(rule) = systematic.kind else {
            debug!("Systematic {} only affects normalization", systematic.name);
            continue;
        };
        for (key, variations) in &systematic.samples {
            let target = cfg.samples.iter().find_map(|sample| {
                sample
                    .components()
                    .into_iter()
                    .find(|component| sample_component_key(&sample.name, component) == *key)
                    .map(|component| (sample, component))
            });
            let Some((sample, component)) = target else {
                warn!("Systematic {} targets unknown component {key}", systematic.name);
                continue;
            };
            for region in &cfg.regions {
                for variable in &cfg.variables {
                    systematics::apply(
                        store,
                        &store::directory(&region.name, &variable.name),
                        &sample.name,
                        &component,
                        &systematic.name,
                        variations,
                        rule,
                    )?;
                }
            }
        }
        info!("Computed the {} systematic", systematic.name);
    }
    Ok(())
}
