//! Error taxonomy of the histogramming engine
//!
//! Only one kind of error is recoverable: a chunk whose reweighting weights
//! do not match the reweight card is skipped (see `process.rs`). Everything
//! else aborts the run, because a histogram produced under a wrong assumption
//! silently corrupts every physics result computed downstream of it.

use std::path::PathBuf;

use thiserror::Error;

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while producing histograms
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum Error {
    // ### CONFIGURATION ERRORS ###
    /// A reweight card comment line does not have the `# op=value name` shape
    #[error("malformed reweight card line {line_no}: {line:?}")]
    MalformedCard { line_no: usize, line: String },

    /// A component needs a reweighting point which the card does not define
    #[error("reweighting point {0:?} is not defined by the reweight card")]
    MissingReweightPoint(String),

    /// An active operator is not one of the reweight card's operators
    #[error("operator {0:?} is not known to the reweight card")]
    UnknownOperator(String),

    /// Unrolling only makes sense for histograms with two core axes
    #[error("can only unroll 2D histograms, got {0} dimension(s)")]
    UnrollDimension(usize),

    /// A binning definition does not describe at least one proper bin
    #[error("invalid axis definition: {0}")]
    InvalidAxis(String),

    /// Some analysis setting is inconsistent
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An object definition added or removed events
    #[error("object definitions must not change the number of events ({before} -> {after})")]
    EventCountChanged { before: usize, after: usize },

    /// A derived per-event quantity does not have one entry per event
    #[error("{what} has {found} entries, expected one per event ({expected})")]
    ColumnLength {
        what: String,
        expected: usize,
        found: usize,
    },

    /// Normalizing a sample requires a non-zero generator weight sum
    #[error("sample {0:?} accumulated a zero generator weight sum")]
    NoEvents(String),

    // ### DATA QUALITY ERRORS ###
    /// Some events carry a number of reweighting weights that does not match
    /// the number of points in the reweight card
    #[error("wrong number of reweighting weights, expected {expected}, got {found:?}")]
    WeightCountMismatch { expected: usize, found: Vec<usize> },

    // ### SCHEMA ERRORS ###
    /// Two histograms with different binnings or categories were merged
    #[error("cannot merge histograms with different axes: {0}")]
    AxisMismatch(String),

    /// Two results of different nature were merged
    #[error("cannot merge a {left} with a {right}")]
    MergeKindMismatch {
        left: &'static str,
        right: &'static str,
    },

    // ### INPUT/OUTPUT ERRORS ###
    /// A sample does not have any input file to process
    #[error("could not find any input file for sample {0:?}")]
    NoInputFiles(String),

    /// An input file was not found by the event source
    #[error("input file {0:?} not found")]
    MissingFile(PathBuf),

    /// A branch or derived column was requested but is not available
    #[error("column {0:?} is not available")]
    MissingColumn(String),

    /// A histogram was expected in the histogram store or histogram set
    #[error("histogram {0:?} not found in the store")]
    MissingHistogram(String),

    /// Underlying I/O failure
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Timestamp formatting failure
    #[error(transparent)]
    Timestamp(#[from] time::error::Format),

    /// TOML settings decoding failure
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}
//
impl Error {
    /// Truth that this error only invalidates one chunk of events, which may
    /// be skipped without aborting the run
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::WeightCountMismatch { .. })
    }
}
