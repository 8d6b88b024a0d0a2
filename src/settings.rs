//! Declarative analysis settings
//!
//! The command-line tool cannot take closures, so it reads a TOML file which
//! describes the analysis in terms of event columns: variables histogram a
//! column as-is, regions are conjunctions of cuts on columns, and weight
//! variations multiply the generator weight by a (possibly jagged) column.
//!
//! ```toml
//! lumi = 100.0
//! branches = ["genWeight", "LHEReweightingWeight", "LHEScaleWeight", "mjj", "ptj1"]
//!
//! [runner]
//! max_workers = 6
//!
//! [samples.OSWW]
//! xs = 1.09e-2
//! files = ["osww_0.json", "osww_1.json"]
//! nevents_per_file = 10000
//! nevents_per_job = 100000
//! eft = { reweight_card = "osww_reweight_card.dat", ops = ["cW", "cHW"] }
//!
//! [variables.mjj]
//! axis = { regular = { bins = 15, low = 500.0, high = 3000.0 } }
//!
//! [variables."mjj:ptj1"]
//! axes = [
//!     { regular = { bins = 10, low = 200.0, high = 3000.0 } },
//!     { regular = { bins = 6, low = 30.0, high = 150.0 } },
//! ]
//!
//! [regions.sr]
//! cuts = [{ column = "mjj", min = 500.0 }]
//!
//! [variations.QCDScale_0]
//! column = "LHEScaleWeight"
//! index = 0
//! samples = ["OSWW_sm"]
//!
//! [systematics.QCDScale]
//! type = "shape"
//! combine = "envelope"
//! samples = { OSWW_sm = ["QCDScale_0"] }
//! ```

use crate::{
    card::ReweightCard,
    config::{
        Configuration, EftConfig, EventFunction, Runner, Sample, Systematic, SystematicKind,
        Variable, Variation, GEN_WEIGHT,
    },
    error::{Error, Result},
    events::{EventTable, DEFAULT_TREE},
    histogram::BinAxis,
    numeric::Float,
    postproc::FoldMode,
    systematics::CombineRule,
};

use serde::Deserialize;

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

/// Contents of an analysis settings file
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Integrated luminosity (fb⁻¹)
    pub lumi: Float,

    /// Branches to read
    pub branches: Vec<String>,

    /// Where the histogram store should be written
    #[serde(default)]
    pub output: Option<PathBuf>,

    /// Execution settings
    #[serde(default)]
    pub runner: Runner,

    /// Samples, by name
    pub samples: BTreeMap<String, SampleSettings>,

    /// Variables, by name (`"x:y"` for 2D variables)
    pub variables: BTreeMap<String, VariableSettings>,

    /// Selection regions, by name
    pub regions: BTreeMap<String, RegionSettings>,

    /// Event weight variations, by name
    #[serde(default)]
    pub variations: BTreeMap<String, VariationSettings>,

    /// Systematic uncertainties, by name
    #[serde(default)]
    pub systematics: BTreeMap<String, SystematicSettings>,

    /// Directory which relative paths are resolved against
    #[serde(skip)]
    base_dir: PathBuf,
}

/// Settings of one sample
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SampleSettings {
    /// Cross-section (pb)
    pub xs: Float,

    /// Input files
    pub files: Vec<PathBuf>,

    /// Name of the tree which holds the events
    #[serde(default = "default_tree")]
    pub tree: String,

    /// Maximal number of files to process
    #[serde(default)]
    pub limit_files: Option<usize>,

    /// Number of events in each file
    #[serde(default = "default_nevents")]
    pub nevents_per_file: usize,

    /// Number of events that each chunk should roughly contain
    #[serde(default = "default_nevents")]
    pub nevents_per_job: usize,

    /// EFT reweighting setup
    #[serde(default)]
    pub eft: Option<EftSettings>,
}

fn default_tree() -> String {
    DEFAULT_TREE.to_owned()
}

fn default_nevents() -> usize {
    1
}

/// EFT reweighting setup of a sample
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EftSettings {
    /// Reweight card
    pub reweight_card: PathBuf,

    /// Active operators
    pub ops: Vec<String>,

    /// Also histogram the `sm_lin_quad_<op>` components
    #[serde(default)]
    pub sm_lin_quad: bool,

    /// Branch holding the reweighting weights
    #[serde(default)]
    pub weights_branch: Option<String>,
}

/// A variable histogramming columns as they are
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariableSettings {
    /// Binning of a 1D variable
    #[serde(default)]
    pub axis: Option<BinAxis>,

    /// Binnings of a 2D variable, one per `:`-separated column of its name
    #[serde(default)]
    pub axes: Vec<BinAxis>,

    /// Flow folding
    #[serde(default)]
    pub fold: FoldMode,
}

/// A region, which selects the events that pass all of its cuts
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegionSettings {
    /// Cuts
    #[serde(default)]
    pub cuts: Vec<Cut>,
}

/// Cut on a scalar column: `min <= column < max`
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Cut {
    /// Column to cut on
    pub column: String,

    /// Inclusive lower bound
    #[serde(default)]
    pub min: Option<Float>,

    /// Exclusive upper bound
    #[serde(default)]
    pub max: Option<Float>,

    /// Cut on the absolute value of the column
    #[serde(default)]
    pub abs: bool,
}
//
impl Cut {
    fn passes(&self, value: Float) -> bool {
        let value = if self.abs { value.abs() } else { value };
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value < max)
    }
}

/// A variation which multiplies the generator weight by a column
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariationSettings {
    /// Weight column
    pub column: String,

    /// Entry of a jagged weight column to use
    #[serde(default)]
    pub index: Option<usize>,

    /// `<sample>_<component>` keys the variation applies to (default: all)
    #[serde(default)]
    pub samples: Option<Vec<String>>,
}

/// A systematic uncertainty
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystematicSettings {
    /// Modelling
    #[serde(rename = "type")]
    pub kind: SystematicType,

    /// How variations are combined (shape uncertainties only)
    #[serde(default)]
    pub combine: Option<CombineRule>,

    /// Size of the uncertainty, e.g. 1.02 for 2% (lnN uncertainties only)
    #[serde(default)]
    pub value: Option<Float>,

    /// Variations to combine for each `<sample>_<component>` key
    #[serde(default)]
    pub samples: BTreeMap<String, Vec<String>>,
}
//
impl SystematicSettings {
    fn kind(&self, name: &str) -> Result<SystematicKind> {
        match (self.kind, self.combine, self.value) {
            (SystematicType::Shape, Some(rule), None) => Ok(SystematicKind::Shape(rule)),
            (SystematicType::LogNormal, None, Some(value)) => {
                Ok(SystematicKind::LogNormal(value))
            }
            (SystematicType::Shape, _, _) => Err(Error::Config(format!(
                "shape systematic {name:?} needs a `combine` rule and no `value`"
            ))),
            (SystematicType::LogNormal, _, _) => Err(Error::Config(format!(
                "lnN systematic {name:?} needs a `value` and no `combine` rule"
            ))),
        }
    }
}

/// Modelling of a systematic uncertainty
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub enum SystematicType {
    /// Shape uncertainty from weight variations
    #[serde(rename = "shape")]
    Shape,

    /// Log-normal normalization uncertainty
    #[serde(rename = "lnN")]
    LogNormal,
}

impl Settings {
    /// Load analysis settings, resolving relative paths against the
    /// directory of the settings file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut settings = Self::parse(&fs::read_to_string(path)?)?;
        settings.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(settings)
    }

    /// Parse analysis settings, relative paths being resolved against the
    /// current directory
    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Turn the settings into an analysis configuration
    pub fn into_configuration(self) -> Result<Configuration> {
        let mut builder = Configuration::builder()
            .lumi(self.lumi)
            .branches(self.branches)
            .runner(self.runner);

        for (name, sample) in self.samples {
            let files = sample.files.iter().map(|file| self.base_dir.join(file)).collect();
            let mut built = Sample::new(name, sample.xs, files)
                .with_chunking(sample.nevents_per_file, sample.nevents_per_job);
            built.tree = sample.tree;
            if let Some(limit) = sample.limit_files {
                built = built.with_limit_files(limit);
            }
            if let Some(eft) = sample.eft {
                let card = ReweightCard::load(self.base_dir.join(&eft.reweight_card))?;
                let mut eft_config =
                    EftConfig::new(card, eft.ops)?.with_sm_lin_quad(eft.sm_lin_quad);
                if let Some(branch) = eft.weights_branch {
                    eft_config.weights_branch = branch;
                }
                built = built.with_eft(eft_config);
            }
            builder = builder.sample(built);
        }

        for (name, variable) in self.variables {
            builder = builder.variable(variable_from_settings(&name, variable)?);
        }

        for (name, region) in self.regions {
            let cuts = region.cuts;
            builder = builder.region(name, move |events: &EventTable| -> Result<Vec<bool>> {
                let mut mask = vec![true; events.len()];
                for cut in &cuts {
                    let values = events.scalar(&cut.column)?;
                    for (keep, &value) in mask.iter_mut().zip(values) {
                        *keep &= cut.passes(value);
                    }
                }
                Ok(mask)
            });
        }

        for (name, variation) in self.variations {
            builder = builder.variation(Variation {
                weight: Some(weight_column(&name, variation.column, variation.index)),
                samples: variation.samples.map(|keys| keys.into_iter().collect()),
                name,
            });
        }

        for (name, systematic) in self.systematics {
            let kind = systematic.kind(&name)?;
            builder = builder.systematic(Systematic {
                name,
                kind,
                samples: systematic.samples,
            });
        }

        builder.build()
    }
}

/// Variable which histograms one column, or two `:`-separated columns
fn variable_from_settings(name: &str, settings: VariableSettings) -> Result<Variable> {
    let columns = name.split(':').collect::<Vec<_>>();
    let variable = match (&columns[..], settings.axis, &settings.axes[..]) {
        ([column], Some(axis), []) => {
            Variable::new_1d(*column, read_column(column), check_axis(axis)?)
        }
        ([first, second], None, [axis1, axis2]) => Variable::new_2d(
            (*first, read_column(first), check_axis(axis1.clone())?),
            (*second, read_column(second), check_axis(axis2.clone())?),
        ),
        _ => {
            return Err(Error::Config(format!(
                "variable {name:?} needs one axis per `:`-separated column"
            )))
        }
    };
    Ok(variable.with_fold(settings.fold))
}

/// Axes read from a file have not been validated yet
fn check_axis(axis: BinAxis) -> Result<BinAxis> {
    match axis {
        BinAxis::Regular { bins, low, high } => BinAxis::regular(bins, low, high),
        BinAxis::Variable { edges } => BinAxis::variable(edges),
    }
}

fn read_column(column: &str) -> EventFunction {
    let column = column.to_owned();
    Arc::new(move |events: &EventTable| -> Result<Vec<Float>> {
        Ok(events.scalar(&column)?.to_vec())
    })
}

/// Generator weight multiplied by a scalar column, or by one entry of a
/// jagged column
fn weight_column(variation: &str, column: String, index: Option<usize>) -> EventFunction {
    let variation = variation.to_owned();
    Arc::new(move |events: &EventTable| -> Result<Vec<Float>> {
        let gen_weights = events.scalar(GEN_WEIGHT)?;
        let factors = match index {
            None => events.scalar(&column)?.to_vec(),
            Some(index) => events
                .jagged(&column)?
                .iter()
                .map(|weights| {
                    weights.get(index).copied().ok_or_else(|| {
                        Error::Config(format!(
                            "variation {variation:?} needs entry {index} of {column}, but an \
                             event only has {} entries",
                            weights.len()
                        ))
                    })
                })
                .collect::<Result<_>>()?,
        };
        Ok(gen_weights.iter().zip(factors).map(|(w, f)| w * f).collect())
    })
}
