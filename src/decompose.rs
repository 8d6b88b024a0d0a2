//! Decomposition of reweighting weights into effective field theory components
//!
//! The event weight of an EFT sample is a quadratic polynomial of the operator
//! coefficients. Given the weights computed at a handful of reweighting
//! points, we isolate each term of this polynomial:
//!
//! * `sm`: the Standard Model weight,
//! * `lin_<op>`: the linear (interference) term of one operator,
//! * `quad_<op>`: the quadratic term of one operator,
//! * `mixed_<op1>_<op2>`: the interference between two operators.
//!
//! Quadratic and mixed terms are routinely negative. That is physical and must
//! be preserved as-is by everything downstream.

use crate::{
    card::{ReweightCard, SM_POINT},
    error::{Error, Result},
    numeric::Float,
};

use nalgebra::{DMatrix, DVector};

/// Per-event reweighting weights: one row per event, one column per point
#[derive(Clone, Debug, PartialEq)]
pub struct WeightMatrix(DMatrix<Float>);
//
impl WeightMatrix {
    /// Build the matrix from a jagged per-event weight column, checking that
    /// every event has exactly one weight per reweighting point
    pub fn from_jagged(rows: &[Vec<Float>], num_points: usize) -> Result<Self> {
        let mut bad_lengths = rows
            .iter()
            .map(Vec::len)
            .filter(|&len| len != num_points)
            .collect::<Vec<_>>();
        if !bad_lengths.is_empty() {
            bad_lengths.sort_unstable();
            bad_lengths.dedup();
            return Err(Error::WeightCountMismatch {
                expected: num_points,
                found: bad_lengths,
            });
        }
        Ok(Self(DMatrix::from_fn(rows.len(), num_points, |ev, point| {
            rows[ev][point]
        })))
    }

    /// Number of events
    pub fn num_events(&self) -> usize {
        self.0.nrows()
    }

    /// Weights of all events at one reweighting point
    fn point(&self, index: usize) -> DVector<Float> {
        self.0.column(index).into_owned()
    }
}

/// A named per-event weight series
#[derive(Clone, Debug, PartialEq)]
pub struct Component {
    /// Component name (`sm`, `lin_cW`, ...)
    pub name: String,

    /// Weight of each event for this component
    pub weights: DVector<Float>,
}
//
impl Component {
    fn new(name: impl Into<String>, weights: DVector<Float>) -> Self {
        Self {
            name: name.into(),
            weights,
        }
    }

    /// The single component of samples without reweighting information: the
    /// events are taken as they are, with unit component weight
    pub fn unit(num_events: usize) -> Self {
        Self::new(SM_POINT, DVector::from_element(num_events, 1.0))
    }
}

/// Compute the EFT components of a set of events
///
/// Components are produced in a deterministic order: `sm`, then for each
/// active operator `sm_lin_quad_<op>` (if requested), `lin_<op>` and
/// `quad_<op>`, then the `mixed_<op1>_<op2>` terms of every operator pair.
///
pub fn decompose(
    weights: &WeightMatrix,
    card: &ReweightCard,
    active_ops: &[String],
    with_sm_lin_quad: bool,
) -> Result<Vec<Component>> {
    if let Some(unknown) = active_ops.iter().find(|op| !card.has_op(op)) {
        return Err(Error::UnknownOperator(unknown.clone()));
    }
    let point =
        |label: &str| -> Result<DVector<Float>> { Ok(weights.point(card.index(label)?)) };

    let sm = point(SM_POINT)?;
    let mut components = vec![Component::new(SM_POINT, sm.clone())];

    // Linear and quadratic terms are kept aside for the mixed terms
    let mut terms = Vec::with_capacity(active_ops.len());
    for op in active_ops {
        let plus = point(&format!("{op}=1"))?;
        let minus = point(&format!("{op}=-1"))?;
        let lin = (&plus - &minus) * 0.5;
        let quad = (&plus + &minus) * 0.5 - &sm;
        if with_sm_lin_quad {
            components.push(Component::new(format!("sm_lin_quad_{op}"), plus));
        }
        components.push(Component::new(format!("lin_{op}"), lin.clone()));
        components.push(Component::new(format!("quad_{op}"), quad.clone()));
        terms.push(lin + quad);
    }

    for (i, op1) in active_ops.iter().enumerate() {
        for (j, op2) in active_ops.iter().enumerate().skip(i + 1) {
            let (first, second) = pair_order(card, op1, op2);
            let both = point(&format!("{first}=1, {second}=1"))?;
            let mixed = both - &sm - &terms[i] - &terms[j];
            components.push(Component::new(format!("mixed_{first}_{second}"), mixed));
        }
    }

    Ok(components)
}

/// Names of the components that `decompose` produces, in the same order
pub fn component_names(
    card: &ReweightCard,
    active_ops: &[String],
    with_sm_lin_quad: bool,
) -> Vec<String> {
    let mut names = vec![SM_POINT.to_owned()];
    for op in active_ops {
        if with_sm_lin_quad {
            names.push(format!("sm_lin_quad_{op}"));
        }
        names.push(format!("lin_{op}"));
        names.push(format!("quad_{op}"));
    }
    for (i, op1) in active_ops.iter().enumerate() {
        for op2 in &active_ops[i + 1..] {
            let (first, second) = pair_order(card, op1, op2);
            names.push(format!("mixed_{first}_{second}"));
        }
    }
    names
}

/// The card may list an operator pair in either order, and the mixed component
/// is named after the order that it uses
fn pair_order<'a>(card: &ReweightCard, op1: &'a str, op2: &'a str) -> (&'a str, &'a str) {
    if card.has_point(&format!("{op1}=1, {op2}=1")) {
        (op1, op2)
    } else {
        (op2, op1)
    }
}
