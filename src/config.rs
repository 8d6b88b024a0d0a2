//! Analysis configuration
//!
//! Everything that an analysis needs to declare is gathered in one explicit
//! `Configuration` object, assembled through a builder and then shared
//! (read-only) by every worker. User-provided physics logic (object
//! definitions, variables, regions, weight variations) comes in as closures.

use crate::{
    card::ReweightCard,
    decompose,
    error::{Error, Result},
    events::{EventTable, DEFAULT_TREE},
    histogram::BinAxis,
    numeric::Float,
    postproc::FoldMode,
    store::NOMINAL,
    systematics::CombineRule,
};

use serde::Deserialize;

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    path::PathBuf,
    sync::Arc,
};

/// Branch holding the nominal generator weight of each event
pub const GEN_WEIGHT: &str = "genWeight";

/// Branch holding the reweighting weights of each event
pub const REWEIGHT_BRANCH: &str = "LHEReweightingWeight";

/// Transformation which derives physics objects from the raw event columns
pub type ObjectDefinition = Arc<dyn Fn(EventTable) -> Result<EventTable> + Send + Sync>;

/// Per-event quantity derived from an event table
pub type EventFunction = Arc<dyn Fn(&EventTable) -> Result<Vec<Float>> + Send + Sync>;

/// Per-event selection derived from an event table
pub type EventPredicate = Arc<dyn Fn(&EventTable) -> Result<Vec<bool>> + Send + Sync>;

/// Effective field theory reweighting setup of a sample
#[derive(Clone, Debug)]
pub struct EftConfig {
    /// Parsed reweight card
    pub card: ReweightCard,

    /// Operators whose components should be computed
    pub ops: Vec<String>,

    /// Whether the `sm_lin_quad_<op>` components should be histogrammed too
    pub sm_lin_quad: bool,

    /// Branch holding the reweighting weights
    pub weights_branch: String,
}
//
impl EftConfig {
    /// Set up EFT reweighting, checking that the requested operators are known
    pub fn new(card: ReweightCard, ops: Vec<String>) -> Result<Self> {
        if let Some(unknown) = ops.iter().find(|op| !card.has_op(op)) {
            return Err(Error::UnknownOperator(unknown.clone()));
        }
        Ok(Self {
            card,
            ops,
            sm_lin_quad: false,
            weights_branch: REWEIGHT_BRANCH.to_owned(),
        })
    }

    /// Also histogram the `sm_lin_quad_<op>` components
    pub fn with_sm_lin_quad(mut self, enabled: bool) -> Self {
        self.sm_lin_quad = enabled;
        self
    }
}

/// One simulated physics process
#[derive(Clone, Debug)]
pub struct Sample {
    /// Sample name, used in histogram keys
    pub name: String,

    /// Cross-section (pb)
    pub xs: Float,

    /// Input files
    pub files: Vec<PathBuf>,

    /// Name of the tree holding the events
    pub tree: String,

    /// Maximal number of files to process
    pub limit_files: Option<usize>,

    /// Number of events in each file
    pub nevents_per_file: usize,

    /// Number of events that each chunk should roughly contain
    pub nevents_per_job: usize,

    /// EFT reweighting setup, if any
    pub eft: Option<EftConfig>,
}
//
impl Sample {
    /// Declare a sample with default chunking settings
    pub fn new(name: impl Into<String>, xs: Float, files: Vec<PathBuf>) -> Self {
        Self {
            name: name.into(),
            xs,
            files,
            tree: DEFAULT_TREE.to_owned(),
            limit_files: None,
            nevents_per_file: 1,
            nevents_per_job: 1,
            eft: None,
        }
    }

    /// Configure how many events files and chunks hold
    pub fn with_chunking(mut self, nevents_per_file: usize, nevents_per_job: usize) -> Self {
        self.nevents_per_file = nevents_per_file;
        self.nevents_per_job = nevents_per_job;
        self
    }

    /// Only process the first few files
    pub fn with_limit_files(mut self, limit: usize) -> Self {
        self.limit_files = Some(limit);
        self
    }

    /// Enable EFT reweighting
    pub fn with_eft(mut self, eft: EftConfig) -> Self {
        self.eft = Some(eft);
        self
    }

    /// Names of the components which are histogrammed for this sample
    pub fn components(&self) -> Vec<String> {
        match &self.eft {
            Some(eft) => decompose::component_names(&eft.card, &eft.ops, eft.sm_lin_quad),
            None => vec![crate::card::SM_POINT.to_owned()],
        }
    }
}

/// Key identifying a component of a sample in variation and systematic setups
pub fn sample_component_key(sample: &str, component: &str) -> String {
    format!("{sample}_{component}")
}

/// One binned dimension of a variable
#[derive(Clone)]
pub struct Dimension {
    /// Name of the derived column
    pub name: String,

    /// How the quantity is computed
    pub func: EventFunction,

    /// Binning
    pub axis: BinAxis,
}

/// A quantity to be histogrammed, over one or more dimensions
#[derive(Clone)]
pub struct Variable {
    /// Variable name, dimension names joined by `:`
    pub name: String,

    /// Binned dimensions
    pub dimensions: Vec<Dimension>,

    /// How flow cells are folded after normalization
    pub fold: FoldMode,
}
//
impl Variable {
    /// One-dimensional variable
    pub fn new_1d(name: impl Into<String>, func: EventFunction, axis: BinAxis) -> Self {
        let name = name.into();
        Self {
            dimensions: vec![Dimension {
                name: name.clone(),
                func,
                axis,
            }],
            name,
            fold: FoldMode::default(),
        }
    }

    /// Two-dimensional variable, which will be unrolled before storage
    pub fn new_2d(
        (name1, func1, axis1): (&str, EventFunction, BinAxis),
        (name2, func2, axis2): (&str, EventFunction, BinAxis),
    ) -> Self {
        Self {
            name: format!("{name1}:{name2}"),
            dimensions: vec![
                Dimension {
                    name: name1.to_owned(),
                    func: func1,
                    axis: axis1,
                },
                Dimension {
                    name: name2.to_owned(),
                    func: func2,
                    axis: axis2,
                },
            ],
            fold: FoldMode::default(),
        }
    }

    /// Change the flow folding mode
    pub fn with_fold(mut self, fold: FoldMode) -> Self {
        self.fold = fold;
        self
    }

    /// Binning of every dimension
    pub fn axes(&self) -> Vec<BinAxis> {
        self.dimensions.iter().map(|dim| dim.axis.clone()).collect()
    }
}
//
impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Variable")
            .field("name", &self.name)
            .field("axes", &self.axes())
            .field("fold", &self.fold)
            .finish()
    }
}

/// A selection region
#[derive(Clone)]
pub struct Region {
    /// Region name
    pub name: String,

    /// Which events belong to the region
    pub predicate: EventPredicate,
}

/// Alternate event weighting
#[derive(Clone)]
pub struct Variation {
    /// Variation name
    pub name: String,

    /// Per-event weight replacing the nominal generator weight. The nominal
    /// variation does not have one.
    pub weight: Option<EventFunction>,

    /// `<sample>_<component>` keys which this variation applies to, or `None`
    /// if it applies to everything
    pub samples: Option<BTreeSet<String>>,
}
//
impl Variation {
    /// The nominal weighting, applying to every sample component
    pub fn nominal() -> Self {
        Self {
            name: NOMINAL.to_owned(),
            weight: None,
            samples: None,
        }
    }

    /// An alternate weighting applying to some sample components
    pub fn new(
        name: impl Into<String>,
        weight: EventFunction,
        samples: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            name: name.into(),
            weight: Some(weight),
            samples: Some(samples.into_iter().collect()),
        }
    }

    /// Truth that this variation applies to a sample component
    pub fn applies_to(&self, sample: &str, component: &str) -> bool {
        match &self.samples {
            None => true,
            Some(keys) => keys.contains(&sample_component_key(sample, component)),
        }
    }
}

/// How a systematic uncertainty is modelled
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SystematicKind {
    /// Shape uncertainty, built by combining weight variations
    Shape(CombineRule),

    /// Log-normal normalization uncertainty, only recorded for the fit
    LogNormal(Float),
}

/// A systematic uncertainty
#[derive(Clone, Debug, PartialEq)]
pub struct Systematic {
    /// Name, used as a suffix of the Up/Down histograms
    pub name: String,

    /// Modelling
    pub kind: SystematicKind,

    /// Variations to combine for each `<sample>_<component>` key
    pub samples: BTreeMap<String, Vec<String>>,
}

/// Execution settings
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Runner {
    /// Process chunks one after the other, even if multi-threading is available
    pub sequential: bool,

    /// Maximal number of worker threads (default: one per CPU)
    pub max_workers: Option<usize>,
}

/// Complete analysis configuration
#[derive(Clone)]
pub struct Configuration {
    /// Samples to process
    pub samples: Vec<Sample>,

    /// Integrated luminosity (fb⁻¹)
    pub lumi: Float,

    /// Branches to read from the input files
    pub branches: Vec<String>,

    /// Physics object definitions
    pub object_definitions: ObjectDefinition,

    /// Variables to histogram
    pub variables: Vec<Variable>,

    /// Selection regions
    pub regions: Vec<Region>,

    /// Event weight variations, the nominal one first
    pub variations: Vec<Variation>,

    /// Systematic uncertainties
    pub systematics: Vec<Systematic>,

    /// Execution settings
    pub runner: Runner,
}
//
impl Configuration {
    /// Start building a configuration
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::default()
    }

    /// Look up a sample by name
    pub fn sample(&self, name: &str) -> Option<&Sample> {
        self.samples.iter().find(|sample| sample.name == name)
    }

    /// Branches to read for a sample. Reweighting weight branches are only
    /// read for the samples which use them.
    pub fn branches_for(&self, sample: &Sample) -> Vec<String> {
        let weight_branches = self
            .samples
            .iter()
            .filter_map(|other| other.eft.as_ref())
            .map(|eft| eft.weights_branch.as_str())
            .collect::<BTreeSet<_>>();
        let own = sample.eft.as_ref().map(|eft| eft.weights_branch.as_str());
        self.branches
            .iter()
            .filter(|branch| {
                !weight_branches.contains(branch.as_str()) || own == Some(branch.as_str())
            })
            .cloned()
            .collect()
    }
}
//
impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |items: Vec<&str>| items.join(", ");
        f.debug_struct("Configuration")
            .field("samples", &self.samples)
            .field("lumi", &self.lumi)
            .field("branches", &self.branches)
            .field("variables", &self.variables)
            .field("regions", &names(self.regions.iter().map(|r| r.name.as_str()).collect()))
            .field(
                "variations",
                &names(self.variations.iter().map(|v| v.name.as_str()).collect()),
            )
            .field("systematics", &self.systematics)
            .field("runner", &self.runner)
            .finish()
    }
}

/// Builder of `Configuration`
#[derive(Default)]
pub struct ConfigurationBuilder {
    samples: Vec<Sample>,
    lumi: Option<Float>,
    branches: Vec<String>,
    object_definitions: Option<ObjectDefinition>,
    variables: Vec<Variable>,
    regions: Vec<Region>,
    variations: Vec<Variation>,
    systematics: Vec<Systematic>,
    runner: Runner,
}
//
impl ConfigurationBuilder {
    /// Add a sample
    pub fn sample(mut self, sample: Sample) -> Self {
        self.samples.push(sample);
        self
    }

    /// Set the integrated luminosity (fb⁻¹)
    pub fn lumi(mut self, lumi: Float) -> Self {
        self.lumi = Some(lumi);
        self
    }

    /// Set the branches to be read
    pub fn branches(mut self, branches: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.branches = branches.into_iter().map(Into::into).collect();
        self
    }

    /// Set the physics object definitions (default: keep events as they are)
    pub fn object_definitions(
        mut self,
        func: impl Fn(EventTable) -> Result<EventTable> + Send + Sync + 'static,
    ) -> Self {
        self.object_definitions = Some(Arc::new(func));
        self
    }

    /// Add a variable
    pub fn variable(mut self, variable: Variable) -> Self {
        self.variables.push(variable);
        self
    }

    /// Add a selection region
    pub fn region(
        mut self,
        name: impl Into<String>,
        predicate: impl Fn(&EventTable) -> Result<Vec<bool>> + Send + Sync + 'static,
    ) -> Self {
        self.regions.push(Region {
            name: name.into(),
            predicate: Arc::new(predicate),
        });
        self
    }

    /// Add an event weight variation
    pub fn variation(mut self, variation: Variation) -> Self {
        self.variations.push(variation);
        self
    }

    /// Add a systematic uncertainty
    pub fn systematic(mut self, systematic: Systematic) -> Self {
        self.systematics.push(systematic);
        self
    }

    /// Set the execution settings
    pub fn runner(mut self, runner: Runner) -> Self {
        self.runner = runner;
        self
    }

    /// Check the configuration and finish building it
    pub fn build(self) -> Result<Configuration> {
        let fail = |msg: String| Err(Error::Config(msg));

        let Some(lumi) = self.lumi else {
            return fail("the integrated luminosity was not set".into());
        };
        if !(lumi > 0.) {
            return fail(format!("the integrated luminosity must be positive, got {lumi}"));
        }
        if self.samples.is_empty() {
            return fail("no sample was declared".into());
        }
        if self.variables.is_empty() {
            return fail("no variable was declared".into());
        }
        if self.regions.is_empty() {
            return fail("no region was declared".into());
        }
        if !self.branches.iter().any(|branch| branch == GEN_WEIGHT) {
            return fail(format!("the {GEN_WEIGHT} branch must be read"));
        }

        let mut sample_names = BTreeSet::new();
        for sample in &self.samples {
            if !sample_names.insert(sample.name.as_str()) {
                return fail(format!("sample {:?} is declared twice", sample.name));
            }
            if sample.nevents_per_file == 0 || sample.nevents_per_job == 0 {
                return fail(format!("sample {:?} has empty files or chunks", sample.name));
            }
            if let Some(eft) = &sample.eft {
                if !self.branches.contains(&eft.weights_branch) {
                    return fail(format!(
                        "sample {:?} needs the {} branch to be read",
                        sample.name, eft.weights_branch
                    ));
                }
            }
        }

        let mut variable_names = BTreeSet::new();
        for variable in &self.variables {
            if !variable_names.insert(variable.name.as_str()) {
                return fail(format!("variable {:?} is declared twice", variable.name));
            }
        }
        let mut region_names = BTreeSet::new();
        for region in &self.regions {
            if !region_names.insert(region.name.as_str()) {
                return fail(format!("region {:?} is declared twice", region.name));
            }
        }

        // The nominal variation always exists and comes first
        let mut variations = self.variations;
        match variations.iter().position(|v| v.name == NOMINAL) {
            Some(idx) => {
                let nominal = variations.remove(idx);
                variations.insert(0, nominal);
            }
            None => variations.insert(0, Variation::nominal()),
        }
        let mut variation_names = BTreeSet::new();
        for variation in &variations {
            if !variation_names.insert(variation.name.as_str()) {
                return fail(format!("variation {:?} is declared twice", variation.name));
            }
        }

        for systematic in &self.systematics {
            if let SystematicKind::Shape(_) = systematic.kind {
                let unknown = systematic
                    .samples
                    .values()
                    .flatten()
                    .find(|name| !variation_names.contains(name.as_str()));
                if let Some(name) = unknown {
                    return fail(format!(
                        "systematic {:?} uses unknown variation {name:?}",
                        systematic.name
                    ));
                }
            }
        }

        Ok(Configuration {
            samples: self.samples,
            lumi,
            branches: self.branches,
            object_definitions: self.object_definitions.unwrap_or_else(|| {
                Arc::new(|events: EventTable| -> Result<EventTable> { Ok(events) })
            }),
            variables: self.variables,
            regions: self.regions,
            variations,
            systematics: self.systematics,
            runner: self.runner,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Variable reading a scalar column as-is
    pub(crate) fn column_variable(name: &str, axis: BinAxis) -> Variable {
        let column = name.to_owned();
        Variable::new_1d(
            name,
            Arc::new(move |events: &EventTable| -> Result<Vec<Float>> {
                Ok(events.scalar(&column)?.to_vec())
            }),
            axis,
        )
    }

    fn builder() -> ConfigurationBuilder {
        Configuration::builder()
            .lumi(300.)
            .branches([GEN_WEIGHT, "x"])
            .sample(Sample::new("S", 1., vec!["a".into()]))
            .variable(column_variable("x", BinAxis::regular(2, 0., 2.).unwrap()))
            .region("all", |events| Ok(vec![true; events.len()]))
    }

    #[test]
    fn nominal_variation_is_added_first() {
        let weight: EventFunction = Arc::new(|events: &EventTable| -> Result<Vec<Float>> {
            Ok(events.scalar(GEN_WEIGHT)?.to_vec())
        });
        let config = builder()
            .variation(Variation::new("alt", weight, ["S_sm".to_owned()]))
            .build()
            .unwrap();
        let names = config.variations.iter().map(|v| v.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, [NOMINAL, "alt"]);
        assert!(config.variations[0].applies_to("anything", "sm"));
        assert!(config.variations[1].applies_to("S", "sm"));
        assert!(!config.variations[1].applies_to("S", "lin_cW"));
    }

    #[test]
    fn inconsistent_settings_are_rejected() {
        assert!(Configuration::builder().build().is_err());
        assert!(builder().branches(["x"]).build().is_err());
        assert!(builder().lumi(0.).build().is_err());
        assert!(builder().sample(Sample::new("S", 2., vec![])).build().is_err());
        let systematic = Systematic {
            name: "PDF".into(),
            kind: SystematicKind::Shape(CombineRule::Square),
            samples: BTreeMap::from([("S_sm".to_owned(), vec!["PDF_0".to_owned()])]),
        };
        let err = builder().systematic(systematic).build().unwrap_err();
        assert!(err.to_string().contains("PDF_0"));

        let card = ReweightCard::parse("# sm a\n# cW=1 b\n# cW=-1 c\n").unwrap();
        let eft = EftConfig::new(card.clone(), vec!["cW".into()]).unwrap();
        let sample = Sample::new("E", 1., vec!["b".into()]).with_eft(eft);
        assert!(builder().sample(sample).build().is_err());
        assert!(EftConfig::new(card, vec!["cX".into()]).is_err());
    }

    #[test]
    fn reweighting_branches_are_only_read_when_needed() {
        let card = ReweightCard::parse("# sm a\n# cW=1 b\n# cW=-1 c\n").unwrap();
        let eft = EftConfig::new(card, vec!["cW".into()]).unwrap();
        let config = builder()
            .branches([GEN_WEIGHT, "x", REWEIGHT_BRANCH])
            .sample(Sample::new("E", 1., vec!["b".into()]).with_eft(eft))
            .build()
            .unwrap();
        assert_eq!(config.branches_for(&config.samples[0]), [GEN_WEIGHT, "x"]);
        assert_eq!(config.branches_for(&config.samples[1]), [GEN_WEIGHT, "x", REWEIGHT_BRANCH]);
    }

    #[test]
    fn sample_components() {
        let card = ReweightCard::parse("# sm a\n# cW=1 b\n# cW=-1 c\n").unwrap();
        let eft = EftConfig::new(card, vec!["cW".into()]).unwrap().with_sm_lin_quad(true);
        let sample = Sample::new("E", 1., vec![]).with_eft(eft);
        assert_eq!(sample.components(), ["sm", "sm_lin_quad_cW", "lin_cW", "quad_cW"]);
        assert_eq!(Sample::new("B", 1., vec![]).components(), ["sm"]);
    }
}
