//! End-to-end histogram production from in-memory event files

use eft_histos::{
    config::{SystematicKind, GEN_WEIGHT, REWEIGHT_BRANCH},
    pipeline, BinAxis, Column, CombineRule, Configuration, EftConfig, Error, EventTable, Float,
    HistogramStore, MemorySource, Result, ReweightCard, Runner, Sample, Systematic, Variable,
    Variation,
};

use approx::assert_relative_eq;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use std::{collections::BTreeMap, sync::Arc};

const NEVENTS_PER_FILE: usize = 100;

fn card() -> ReweightCard {
    ReweightCard::parse("# sm rwgt_1\n# cW=1 rwgt_2\n# cW=-1 rwgt_3\n").unwrap()
}

fn eft_file(gen_weights: Vec<Float>, x: Vec<Float>, weights: Vec<Vec<Float>>) -> EventTable {
    EventTable::new([
        (GEN_WEIGHT.to_owned(), Column::Scalar(gen_weights)),
        ("y".to_owned(), Column::Scalar(x.iter().map(|x| x / 2.).collect())),
        ("x".to_owned(), Column::Scalar(x)),
        (REWEIGHT_BRANCH.to_owned(), Column::Jagged(weights)),
    ])
    .unwrap()
}

fn random_file(rng: &mut Xoshiro256PlusPlus) -> EventTable {
    let num_events = rng.gen_range(1..NEVENTS_PER_FILE);
    let gen_weights = (0..num_events).map(|_| rng.gen_range(0.5..1.5)).collect();
    let x = (0..num_events).map(|_| rng.gen_range(-0.5..3.5)).collect();
    let weights = (0..num_events)
        .map(|_| (0..3).map(|_| rng.gen_range(-1.0..2.0)).collect())
        .collect();
    eft_file(gen_weights, x, weights)
}

fn column(name: &'static str) -> Arc<dyn Fn(&EventTable) -> Result<Vec<Float>> + Send + Sync> {
    Arc::new(move |events: &EventTable| -> Result<Vec<Float>> {
        Ok(events.scalar(name)?.to_vec())
    })
}

fn scaled_weight(factor: Float) -> Arc<dyn Fn(&EventTable) -> Result<Vec<Float>> + Send + Sync> {
    Arc::new(move |events: &EventTable| -> Result<Vec<Float>> {
        Ok(events.scalar(GEN_WEIGHT)?.iter().map(|w| factor * w).collect())
    })
}

fn configuration(sample: Sample, runner: Runner) -> Configuration {
    Configuration::builder()
        .lumi(1.)
        .branches([GEN_WEIGHT, "x", "y", REWEIGHT_BRANCH])
        .sample(sample)
        .variable(Variable::new_1d("x", column("x"), BinAxis::regular(3, 0., 3.).unwrap()))
        .variable(Variable::new_2d(
            ("x", column("x"), BinAxis::regular(3, 0., 3.).unwrap()),
            ("y", column("y"), BinAxis::regular(2, 0., 2.).unwrap()),
        ))
        .region("sr", |events| Ok(vec![true; events.len()]))
        .region("high", |events| {
            Ok(events.scalar("x")?.iter().map(|&x| x >= 1.).collect())
        })
        .variation(Variation::new("scale_up", scaled_weight(1.1), ["S_sm".to_owned()]))
        .variation(Variation::new("scale_down", scaled_weight(0.8), ["S_sm".to_owned()]))
        .runner(runner)
        .build()
        .unwrap()
}

fn eft_sample(files: usize, nevents_per_job: usize) -> Sample {
    let eft = EftConfig::new(card(), vec!["cW".into()]).unwrap();
    Sample::new("S", 3., (0..files).map(|idx| format!("f{idx}").into()).collect())
        .with_chunking(NEVENTS_PER_FILE, nevents_per_job)
        .with_eft(eft)
}

fn simple_source() -> MemorySource {
    let mut source = MemorySource::new();
    source.add_file(
        "f0",
        eft_file(
            vec![1., 1., 1.],
            vec![0.5, 1.5, 2.5],
            vec![vec![10., 12., 8.], vec![5., 6., 4.], vec![0., 0., 0.]],
        ),
    );
    source
}

fn assert_same_histograms(left: &HistogramStore, right: &HistogramStore) {
    assert_eq!(left.keys().collect::<Vec<_>>(), right.keys().collect::<Vec<_>>());
    for key in left.keys() {
        let (left, right) = (left.get(key).unwrap(), right.get(key).unwrap());
        assert_eq!(left.axes(), right.axes());
        for (l, r) in left.values().iter().zip(right.values()) {
            assert_relative_eq!(*l, *r, epsilon = 1e-9, max_relative = 1e-9);
        }
        for (l, r) in left.variances().iter().zip(right.variances()) {
            assert_relative_eq!(*l, *r, epsilon = 1e-9, max_relative = 1e-9);
        }
    }
}

#[test]
fn single_operator_end_to_end() {
    let cfg = configuration(eft_sample(1, NEVENTS_PER_FILE), Runner::default());
    let store = pipeline::run(&cfg, &simple_source()).unwrap();

    // xs = 3 pb, lumi = 1 fb⁻¹, sumw = 3
    let summary = store.sample("S").unwrap();
    assert_eq!(summary.event_count, 3);
    assert_eq!(summary.weight_sum, 3.);
    assert_relative_eq!(summary.scale, 1000.);
    assert_eq!(summary.components, ["sm", "lin_cW", "quad_cW"]);

    let sm = store.get("sr/x/histo_S_sm").unwrap();
    assert_relative_eq!(sm.values()[1], 10_000.);
    assert_relative_eq!(sm.values()[2], 5_000.);
    assert_eq!(sm.values()[3], 0.);
    let lin = store.get("sr/x/histo_S_lin_cW").unwrap();
    assert_relative_eq!(lin.values()[1], 2_000.);
    assert_relative_eq!(lin.values()[2], 1_000.);
    let quad = store.get("high/x/histo_S_quad_cW").unwrap();
    assert!(quad.values().iter().all(|&value| value == 0.));
    let high = store.get("high/x/histo_S_sm").unwrap();
    assert_eq!(high.values()[1], 0.);

    // 2D variables are unrolled, bin (ix, iy) going to ix * ny + iy
    let unrolled = store.get("sr/x_y/histo_S_sm").unwrap();
    assert_eq!(unrolled.axes(), [BinAxis::regular(6, 0., 6.).unwrap()]);
    assert_relative_eq!(unrolled.values()[1], 10_000.);
    assert_relative_eq!(unrolled.values()[3], 5_000.);

    // Variations only exist for the components they apply to
    assert!(store.contains("sr/x/histo_S_sm_scale_up"));
    assert!(!store.contains("sr/x/histo_S_lin_cW_scale_up"));
    assert_eq!(store.len(), 2 * 2 * (3 + 2));
}

#[test]
fn chunking_and_scheduling_do_not_matter() {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(0x5eed);
    let num_files = 23;
    let mut source = MemorySource::new();
    for idx in 0..num_files {
        source.add_file(format!("f{idx}"), random_file(&mut rng));
    }

    let reference = pipeline::run(
        &configuration(eft_sample(num_files, NEVENTS_PER_FILE * num_files), Runner::default()),
        &source,
    )
    .unwrap();
    let runners = [
        Runner { sequential: true, max_workers: None },
        Runner { sequential: false, max_workers: None },
        Runner { sequential: false, max_workers: Some(3) },
    ];
    for _ in 0..5 {
        let files_per_job = rng.gen_range(1..num_files);
        for runner in runners {
            let cfg = configuration(
                eft_sample(num_files, files_per_job * NEVENTS_PER_FILE),
                runner,
            );
            let store = pipeline::run(&cfg, &source).unwrap();
            assert_same_histograms(&store, &reference);
            let (summary, expected) = (store.sample("S").unwrap(), reference.sample("S").unwrap());
            assert_eq!(summary.event_count, expected.event_count);
            assert_relative_eq!(summary.weight_sum, expected.weight_sum, max_relative = 1e-12);
        }
    }
}

#[test]
fn malformed_chunks_are_skipped() {
    let mut source = simple_source();
    source.add_file(
        "f1",
        eft_file(vec![1., 1.], vec![0.5, 0.5], vec![vec![1., 2.], vec![1., 2.]]),
    );
    let cfg = configuration(eft_sample(2, NEVENTS_PER_FILE), Runner::default());
    let store = pipeline::run(&cfg, &source).unwrap();

    let reference = pipeline::run(
        &configuration(eft_sample(1, NEVENTS_PER_FILE), Runner::default()),
        &simple_source(),
    )
    .unwrap();
    assert_same_histograms(&store, &reference);
    assert_eq!(store.sample("S").unwrap().event_count, 3);

    // With nothing left to normalize, the sample is an error
    let mut broken = MemorySource::new();
    broken.add_file("f0", eft_file(vec![1.], vec![0.5], vec![vec![1.]]));
    let cfg = configuration(eft_sample(1, NEVENTS_PER_FILE), Runner::default());
    assert!(matches!(pipeline::run(&cfg, &broken), Err(Error::NoEvents(name)) if name == "S"));
}

#[test]
fn fatal_errors_abort_the_run() {
    let cfg = configuration(eft_sample(0, NEVENTS_PER_FILE), Runner::default());
    let err = pipeline::run(&cfg, &simple_source()).unwrap_err();
    assert!(matches!(err, Error::NoInputFiles(name) if name == "S"));

    let cfg = configuration(eft_sample(2, NEVENTS_PER_FILE), Runner::default());
    let err = pipeline::run(&cfg, &simple_source()).unwrap_err();
    assert!(matches!(err, Error::MissingFile(_)));
}

#[test]
fn background_samples_have_a_single_component() {
    let mut source = simple_source();
    source.add_file(
        "b0",
        EventTable::new([
            (GEN_WEIGHT.to_owned(), Column::Scalar(vec![2., -1.])),
            ("x".to_owned(), Column::Scalar(vec![0.5, 5.])),
            ("y".to_owned(), Column::Scalar(vec![0., 0.])),
        ])
        .unwrap(),
    );
    let mut cfg = configuration(eft_sample(1, NEVENTS_PER_FILE), Runner::default());
    cfg.samples.push(Sample::new("B", 1., vec!["b0".into()]).with_chunking(10, 10));
    let store = pipeline::run(&cfg, &source).unwrap();

    assert_eq!(store.sample("B").unwrap().components, ["sm"]);
    // scale = 1 pb * 1000 * 1 fb⁻¹ / (2 - 1), overflow folded into the last bin
    let hist = store.get("sr/x/histo_B_sm").unwrap();
    assert_eq!(hist.values(), [0., 2000., 0., -1000., 0.]);
    assert!(!store.contains("sr/x/histo_B_sm_scale_up"));
}

#[test]
fn shape_systematics_replace_their_variations() {
    let mut cfg = configuration(eft_sample(1, NEVENTS_PER_FILE), Runner::default());
    let variations = vec!["scale_up".to_owned(), "scale_down".to_owned()];
    cfg.systematics = vec![
        Systematic {
            name: "scale".into(),
            kind: SystematicKind::Shape(CombineRule::Envelope),
            samples: BTreeMap::from([("S_sm".to_owned(), variations)]),
        },
        Systematic {
            name: "lumi".into(),
            kind: SystematicKind::LogNormal(1.02),
            samples: BTreeMap::new(),
        },
    ];
    let store = pipeline::run(&cfg, &simple_source()).unwrap();

    for directory in ["sr/x/", "high/x/", "sr/x_y/", "high/x_y/"] {
        let keys = store.keys_with_prefix(directory).collect::<Vec<_>>();
        let expected = ["lin_cW", "quad_cW", "sm", "sm_scaleDown", "sm_scaleUp"]
            .map(|leaf| format!("{directory}histo_S_{leaf}"));
        assert_eq!(keys, expected);
    }
    let nominal = store.get("sr/x/histo_S_sm").unwrap();
    let up = store.get("sr/x/histo_S_sm_scaleUp").unwrap();
    let down = store.get("sr/x/histo_S_sm_scaleDown").unwrap();
    assert_relative_eq!(up.values()[1], 1.1 * nominal.values()[1], max_relative = 1e-12);
    assert_relative_eq!(down.values()[1], 0.8 * nominal.values()[1], max_relative = 1e-12);
    assert_eq!(up.variances(), up.values());
}

#[test]
fn store_survives_a_round_trip() {
    let cfg = configuration(eft_sample(1, NEVENTS_PER_FILE), Runner::default());
    let store = pipeline::run(&cfg, &simple_source()).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("histos.json");
    store.save(&path).unwrap();
    assert_eq!(HistogramStore::open(&path).unwrap(), store);
}
