//! Reweight card parsing
//!
//! A reweight card lists the reweighting points that the event generator
//! computed an alternate weight for. Only the comment lines matter to us, as
//! each of them describes one point, in the order in which the points appear
//! in every event's reweighting weight array:
//!
//! ```text
//! # sm rwgt_1
//! # cW=1 rwgt_2
//! # cW=-1 rwgt_3
//! # cHW=1, cW=1 rwgt_4
//! ```

use crate::error::{Error, Result};

use std::{collections::BTreeMap, fs, path::Path};

/// Label of the Standard Model reweighting point
pub const SM_POINT: &str = "sm";

/// Marker which introduces the lines that describe reweighting points
const COMMENT_MARKER: char = '#';

/// Reweighting points of a reweight card
#[derive(Clone, Debug, PartialEq)]
pub struct ReweightCard {
    /// Single operators of the card, deduplicated, in file order
    ops: Vec<String>,

    /// Index of each reweighting point in the per-event weight array
    points: BTreeMap<String, usize>,
}
//
impl ReweightCard {
    /// Load and parse a reweight card from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::parse(&fs::read_to_string(path)?)
    }

    /// Parse the text of a reweight card
    pub fn parse(text: &str) -> Result<Self> {
        let mut ops = Vec::new();
        let mut points = BTreeMap::new();

        let comments = text
            .lines()
            .enumerate()
            .filter(|(_, line)| line.starts_with(COMMENT_MARKER));
        for (index, (line_no, line)) in comments.enumerate() {
            let malformed = || Error::MalformedCard {
                line_no: line_no + 1,
                line: line.to_owned(),
            };

            // Skip the marker, keep the point description, drop the point name
            let tokens = line[COMMENT_MARKER.len_utf8()..]
                .split_whitespace()
                .collect::<Vec<_>>();
            let Some((_name, description)) = tokens.split_last() else {
                return Err(malformed());
            };

            let label = if line.to_lowercase().contains(SM_POINT) {
                if description.len() != 1 {
                    return Err(malformed());
                }
                SM_POINT.to_owned()
            } else if !line.contains(',') {
                let [op_val] = description else {
                    return Err(malformed());
                };
                let (op, value) = op_val.split_once('=').ok_or_else(malformed)?;
                if op.is_empty() || value.is_empty() {
                    return Err(malformed());
                }
                if !ops.iter().any(|known| known == op) {
                    ops.push(op.to_owned());
                }
                (*op_val).to_owned()
            } else {
                if description.len() < 2 {
                    return Err(malformed());
                }
                description.join(" ")
            };

            if points.insert(label, index).is_some() {
                return Err(malformed());
            }
        }

        if !points.contains_key(SM_POINT) {
            return Err(Error::MissingReweightPoint(SM_POINT.to_owned()));
        }
        Ok(Self { ops, points })
    }

    /// Single operators described by the card, in file order
    pub fn ops(&self) -> &[String] {
        &self.ops
    }

    /// Truth that an operator is described by the card
    pub fn has_op(&self, op: &str) -> bool {
        self.ops.iter().any(|known| known == op)
    }

    /// Number of reweighting points, i.e. expected length of the per-event
    /// reweighting weight array
    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    /// Index of a reweighting point in the per-event weight array
    pub fn index(&self, label: &str) -> Result<usize> {
        self.points
            .get(label)
            .copied()
            .ok_or_else(|| Error::MissingReweightPoint(label.to_owned()))
    }

    /// Truth that a reweighting point is defined
    pub fn has_point(&self, label: &str) -> bool {
        self.points.contains_key(label)
    }

    /// Iterate over the reweighting points, sorted by label
    pub fn points(&self) -> impl Iterator<Item = (&str, usize)> + '_ {
        self.points.iter().map(|(label, &idx)| (label.as_str(), idx))
    }
}
