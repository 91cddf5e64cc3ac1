//! Invariant Checker
//!
//! Runtime validation of the three dual invariants (Label, Dual-Bound, Active) plus the
//! Height invariant that must hold once the move driver reaches its fixed point. Any
//! violation is a programming bug in the bound kit, the flow adapter or the flow solver;
//! the driver turns a report into a panic, tests inspect the structured report directly.
//!

use super::dual_table::*;
use super::energy_model::*;
use super::node_clique_index::*;
use super::util::*;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum InvariantViolation {
    /// the active duals of a clique do not sum to its energy
    LabelSum { clique: CliqueIndex, expected: Energy, actual: Energy },
    /// a dual exceeds the clique bound
    DualBound { clique: CliqueIndex, position: usize, label: Label, value: Energy, bound: Energy },
    /// a dual at an active label is negative
    ActiveNegative { clique: CliqueIndex, position: usize, value: Energy },
    /// the current label of a node sits higher than another label
    Height { node: NodeIndex, label: Label, current_height: Energy, other_height: Energy },
}

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::LabelSum { clique, expected, actual } => {
                write!(f, "label invariant: clique {} has dual sum {} but energy {}", clique, actual, expected)
            }
            Self::DualBound { clique, position, label, value, bound } => {
                write!(
                    f,
                    "dual-bound invariant: clique {} position {} label {} has dual {} above bound {}",
                    clique, position, label, value, bound
                )
            }
            Self::ActiveNegative { clique, position, value } => {
                write!(f, "active invariant: clique {} position {} has negative active dual {}", clique, position, value)
            }
            Self::Height { node, label, current_height, other_height } => {
                write!(
                    f,
                    "height invariant: node {} sits at height {} but label {} offers {}",
                    node, current_height, label, other_height
                )
            }
        }
    }
}

/// for every clique with local labels y: `Σ_i dual[C][i][y_i] == f_C(y)`
#[allow(clippy::unnecessary_cast)]
pub fn check_label_invariant(
    energy: &MultilabelEnergy,
    dual: &DualTable,
    labels: &[Label],
) -> Result<(), InvariantViolation> {
    let mut label_buf: Vec<Label> = Vec::with_capacity(K_MAX);
    for (clique_index, clique) in energy.cliques().iter().enumerate() {
        label_buf.clear();
        for &v in clique.nodes() {
            label_buf.push(labels[v as usize]);
        }
        let expected = clique.energy(&label_buf);
        let mut actual = 0;
        for (position, &label) in label_buf.iter().enumerate() {
            actual += dual.value(clique_index as CliqueIndex, position, label);
        }
        if actual != expected {
            return Err(InvariantViolation::LabelSum { clique: clique_index as CliqueIndex, expected, actual });
        }
    }
    Ok(())
}

/// every dual entry stays below the clique bound: `dual[C][i][ℓ] ≤ f_max`
#[allow(clippy::unnecessary_cast)]
pub fn check_dual_bound_invariant(
    energy: &MultilabelEnergy,
    dual: &DualTable,
) -> Result<(), InvariantViolation> {
    for (clique_index, clique) in energy.cliques().iter().enumerate() {
        let bound = clique.f_max();
        for position in 0..clique.size() {
            for (label, &value) in dual.position_slice(clique_index as CliqueIndex, position).iter().enumerate() {
                if value > bound {
                    return Err(InvariantViolation::DualBound {
                        clique: clique_index as CliqueIndex,
                        position,
                        label: label as Label,
                        value,
                        bound,
                    });
                }
            }
        }
    }
    Ok(())
}

/// duals at the active labels are nonnegative: `dual[C][i][y_i] ≥ 0`
#[allow(clippy::unnecessary_cast)]
pub fn check_active_invariant(
    energy: &MultilabelEnergy,
    dual: &DualTable,
    labels: &[Label],
) -> Result<(), InvariantViolation> {
    for (clique_index, clique) in energy.cliques().iter().enumerate() {
        for (position, &v) in clique.nodes().iter().enumerate() {
            let value = dual.value(clique_index as CliqueIndex, position, labels[v as usize]);
            if value < 0 {
                return Err(InvariantViolation::ActiveNegative { clique: clique_index as CliqueIndex, position, value });
            }
        }
    }
    Ok(())
}

/// height of a label under the dual re-parameterization:
/// `U_v(ℓ) + Σ_{(C,i) ∋ v} dual[C][i][ℓ]`
#[allow(clippy::unnecessary_cast)]
pub fn compute_height(
    energy: &MultilabelEnergy,
    dual: &DualTable,
    index: &NodeCliqueIndex,
    v: NodeIndex,
    label: Label,
) -> Energy {
    let mut height = energy.unary(v, label);
    for &(clique, position) in index.incident(v).iter() {
        height += dual.value(clique, position, label);
    }
    height
}

/// at termination each node sits at a label of minimum height:
/// `height(v, labels[v]) ≤ height(v, α)` for every α
#[allow(clippy::unnecessary_cast)]
pub fn check_height_invariant(
    energy: &MultilabelEnergy,
    dual: &DualTable,
    index: &NodeCliqueIndex,
    labels: &[Label],
) -> Result<(), InvariantViolation> {
    for (v, &current) in labels.iter().enumerate() {
        let current_height = compute_height(energy, dual, index, v as NodeIndex, current);
        for label in 0..energy.num_labels {
            let label = label as Label;
            if label == current {
                continue;
            }
            let other_height = compute_height(energy, dual, index, v as NodeIndex, label);
            if current_height > other_height {
                return Err(InvariantViolation::Height {
                    node: v as NodeIndex,
                    label,
                    current_height,
                    other_height,
                });
            }
        }
    }
    Ok(())
}
