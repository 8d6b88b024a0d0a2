//! EFT histograms: weighted histogram production for effective field theory
//! studies
//!
//!
//! # Introduction (for the physicist)
//!
//! Simulated samples of an effective field theory (EFT) process carry, for
//! each event, the weights that the event would have at a handful of
//! reweighting points of the operator coefficients. Since the event weight is
//! a quadratic polynomial of these coefficients, these few weights are enough
//! to isolate the Standard Model term, the linear (interference) and quadratic
//! term of each operator, and the mixed terms of each operator pair.
//!
//! This crate histograms each of these terms ("components") for a set of
//! variables, selection regions and alternate event weights ("variations"),
//! normalizes the result to a cross-section and luminosity, and stores it in a
//! layout that statistical fitting tools understand.
//!
//!
//! # Introduction (for the computer guy)
//!
//! * The reweight card is parsed into an index of reweighting points
//!   (`card`), which is used to decompose per-event weights (`decompose`).
//! * Samples are split into chunks of files, which are processed independently
//!   (`process`), possibly in parallel (`scheduling`).
//! * Partial results are merged by an associative and commutative operation
//!   (`aggregate`, `partial`), so that the chunking does not matter.
//! * Merged histograms are normalized, folded and unrolled (`postproc`) into a
//!   persistent store (`store`), where families of variations are finally
//!   summarized into systematic uncertainty bands (`systematics`).
//!
//! Everything is driven by an explicit `Configuration`, either built in code
//! or loaded from a TOML settings file (`settings`).

#![warn(missing_docs)]

pub mod aggregate;
pub mod card;
pub mod config;
pub mod decompose;
pub mod error;
pub mod events;
pub mod histogram;
pub mod histset;
pub mod numeric;
pub mod partial;
pub mod pipeline;
pub mod postproc;
pub mod process;
pub mod scheduling;
pub mod settings;
pub mod store;
pub mod systematics;

pub use crate::{
    aggregate::{merge, merge_all, Merge, Mergeable},
    card::ReweightCard,
    config::{Configuration, EftConfig, Region, Runner, Sample, Systematic, Variable, Variation},
    error::{Error, Result},
    events::{ChunkDescriptor, Column, EventSource, EventTable, JsonSource, MemorySource},
    histogram::{BinAxis, Histogram},
    histset::HistogramSet,
    numeric::Float,
    partial::PartialResult,
    postproc::FoldMode,
    settings::Settings,
    store::HistogramStore,
    systematics::CombineRule,
};
