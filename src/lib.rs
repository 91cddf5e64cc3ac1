extern crate cfg_if;
extern crate derivative;
#[cfg(test)]
extern crate petgraph;
extern crate rand;
extern crate rand_xoshiro;
extern crate rayon;
extern crate serde;
#[macro_use]
extern crate serde_json;

pub mod dual_table;
pub mod energy_model;
pub mod example_models;
pub mod invariant;
pub mod node_clique_index;
pub mod solver;
pub mod submodular_bound;
pub mod submodular_flow;
pub mod util;

use crate::energy_model::*;
use crate::solver::*;
use crate::util::*;
use std::sync::Arc;

/// minimize a multilabel energy with the default options and the built-in flow solver
/// (to optimize speed, consider reusing a [`solver::SospdSolver`] object)
pub fn sospd_minimize(energy: Arc<MultilabelEnergy>) -> Vec<Label> {
    sospd_minimize_with_options(energy, SolverOptions::default())
}

pub fn sospd_minimize_with_options(energy: Arc<MultilabelEnergy>, options: SolverOptions) -> Vec<Label> {
    // sanity check
    assert!(energy.num_nodes > 0, "at least one node required");
    let max_safe_energy = Energy::MAX / 4;
    let worst_height = energy.worst_case_height();
    if worst_height > max_safe_energy {
        panic!(
            "energy magnitude {} > max safe magnitude {}, it may cause the duals to overflow",
            worst_height, max_safe_energy
        );
    }
    let mut solver = SospdSolver::new(energy, options);
    solver.solve();
    solver.labels
}
