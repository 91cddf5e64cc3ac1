//! Primal-Dual Move Driver
//!
//! The move-making core: it owns the primal labeling, the dual table and one long-lived
//! flow-solver instance, and interleaves expansion moves with submodular max-flow while
//! keeping an explicit dual certificate.
//!
//! Every move runs three phases against a per-node proposal labeling:
//!
//! 1. `pre_edit_dual` rewrites each clique's fusion energy into a reduced submodular
//!    table: upper-bound, zero the marginals of positions whose proposal equals their
//!    current label, subtract the duals (tight at the current labeling), normalize into
//!    the nonnegative orthant and charge the normalization to the proposal duals.
//! 2. `update_primal_dual` prices every node by its height difference, solves the
//!    boolean subproblem, adopts the winning proposals and folds the flow solver's
//!    per-clique dual corrections back into the dual table.
//! 3. `post_edit_dual` redistributes each clique's energy over the active duals,
//!    restoring exact tightness for the next move.
//!
//! [`SospdSolver::solve`] sweeps proposals α = 0, 1, … in increasing order until a full
//! sweep changes nothing; the sweep order is part of the contract, since it decides
//! which of several equally good optima is returned. Every successful move lowers the
//! primal energy, a nonnegative integer, so the loop terminates.
//!

use super::dual_table::*;
use super::energy_model::*;
use super::invariant;
use super::invariant::InvariantViolation;
use super::node_clique_index::*;
use super::submodular_bound::*;
use super::submodular_flow::*;
use super::util::*;
use crate::derivative::Derivative;
use crate::rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    /// validate the Label, Dual-Bound and Active invariants at every phase boundary and
    /// the Height invariant at termination; violations panic
    pub check_invariants: bool,
    /// reduce cliques in parallel during `pre_edit_dual`; bit-identical to the serial
    /// path since the dual write-backs stay sequential
    pub parallel_reduce: bool,
    /// print per-sweep energies
    pub verbose: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            check_invariants: false,
            parallel_reduce: false,
            verbose: false,
        }
    }
}

/// reduce one clique's fusion energy into `table`, writing the normalization vector
/// into `psi`; the caller still has to charge `psi` to its proposal duals
#[allow(clippy::unnecessary_cast)]
fn reduce_clique(
    energy: &MultilabelEnergy,
    dual: &DualTable,
    labels: &[Label],
    fusion_labels: &[Label],
    clique_index: usize,
    table: &mut [Energy],
    psi: &mut Vec<Energy>,
) {
    let clique = &energy.cliques()[clique_index];
    let k = clique.size();
    let nodes = clique.nodes();
    debug_assert_eq!(table.len(), 1 << k);

    let mut current: Vec<Label> = Vec::with_capacity(k);
    let mut proposed: Vec<Label> = Vec::with_capacity(k);
    let mut lambda_current: Vec<Energy> = Vec::with_capacity(k);
    let mut lambda_proposed: Vec<Energy> = Vec::with_capacity(k);
    let mut frozen: Assgn = 0;
    for (position, &v) in nodes.iter().enumerate() {
        let y = labels[v as usize];
        let proposal = fusion_labels[v as usize];
        current.push(y);
        proposed.push(proposal);
        lambda_current.push(dual.value(clique_index as CliqueIndex, position, y));
        lambda_proposed.push(dual.value(clique_index as CliqueIndex, position, proposal));
        if y == proposal {
            frozen |= 1 << position;
        }
    }

    // fusion energies of all binary assignments
    let max_assgn: Assgn = 1 << k;
    let mut label_buf = current.clone();
    for s in 0..max_assgn {
        for position in 0..k {
            label_buf[position] = if s & (1 << position) != 0 {
                proposed[position]
            } else {
                current[position]
            };
        }
        let fusion_energy = clique.energy(&label_buf);
        assert!(fusion_energy >= 0, "clique energies must be nonnegative, got {}", fusion_energy);
        table[s as usize] = fusion_energy;
    }

    // find submodular g ≥ f, flat in the positions where proposal == current
    submodular_upper_bound(k, table);
    zero_marginal_set(k, table, frozen);

    // residual function g(S) - λ_proposed(S) - λ_current(C \ S)
    subtract_linear(k, table, &lambda_proposed, &lambda_current);
    assert_eq!(table[0], 0, "dual must be tight at the current labeling");

    // shift g into the nonnegative orthant; ψ is owed to the proposal duals
    normalize(k, table, psi);
}

/// the submodular primal-dual solver; generic over the flow implementation so an
/// external max-flow solver can be plugged in
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct SospdSolver<F: SubmodularFlowImpl> {
    /// the frozen input energy
    #[derivative(Debug = "ignore")]
    energy: Arc<MultilabelEnergy>,
    pub config: SolverOptions,
    /// the primal labeling
    pub labels: Vec<Label>,
    /// the per-node proposal of the current move
    pub fusion_labels: Vec<Label>,
    dual: DualTable,
    node_clique_index: NodeCliqueIndex,
    #[derivative(Debug = "ignore")]
    flow: F,
    /// completed outer sweeps of the latest solve
    pub sweeps: usize,
}

impl SospdSolver<SubmodularFlowSerial> {
    pub fn new(energy: Arc<MultilabelEnergy>, config: SolverOptions) -> Self {
        Self::new_with_flow(energy, config, SubmodularFlowSerial::new())
    }
}

impl<F: SubmodularFlowImpl> SospdSolver<F> {
    #[allow(clippy::unnecessary_cast)]
    pub fn new_with_flow(energy: Arc<MultilabelEnergy>, config: SolverOptions, mut flow: F) -> Self {
        let n = energy.num_nodes;
        assert!(n > 0, "at least one node required");
        let worst_height = energy.worst_case_height();
        assert!(
            worst_height <= Energy::MAX / 4,
            "total energy magnitude {} may overflow, scale the input down",
            worst_height
        );
        // the flow topology is built once; tables and unaries are rewritten per move
        flow.add_node(n);
        for clique in energy.cliques().iter() {
            let k = clique.size();
            flow.add_clique(clique.nodes().to_vec(), vec![0; 1 << k], false);
        }
        flow.graph_init();
        let dual = DualTable::new(&energy);
        let node_clique_index = NodeCliqueIndex::new(&energy);
        Self {
            labels: vec![0; n],
            fusion_labels: vec![0; n],
            energy,
            config,
            dual,
            node_clique_index,
            flow,
            sweeps: 0,
        }
    }

    pub fn energy_model(&self) -> &MultilabelEnergy {
        &self.energy
    }

    pub fn dual_table(&self) -> &DualTable {
        &self.dual
    }

    #[allow(clippy::unnecessary_cast)]
    pub fn get_label(&self, v: NodeIndex) -> Label {
        self.labels[v as usize]
    }

    pub fn compute_energy(&self) -> Energy {
        self.energy.compute_energy(&self.labels)
    }

    pub fn compute_height(&self, v: NodeIndex, label: Label) -> Energy {
        invariant::compute_height(&self.energy, &self.dual, &self.node_clique_index, v, label)
    }

    pub fn compute_height_diff(&self, v: NodeIndex, label_1: Label, label_2: Label) -> Energy {
        let mut diff = self.energy.unary(v, label_1) - self.energy.unary(v, label_2);
        for &(clique, position) in self.node_clique_index.incident(v).iter() {
            diff += self.dual.value(clique, position, label_1) - self.dual.value(clique, position, label_2);
        }
        diff
    }

    /// every node starts at its cheapest unary label, lowest label on ties
    #[allow(clippy::unnecessary_cast)]
    pub fn initial_labeling(&mut self) {
        for v in 0..self.energy.num_nodes {
            let mut best_cost = Energy::MAX;
            for label in 0..self.energy.num_labels {
                let cost = self.energy.unary(v as NodeIndex, label as Label);
                if cost < best_cost {
                    best_cost = cost;
                    self.labels[v] = label as Label;
                }
            }
        }
    }

    pub fn initial_dual(&mut self) {
        self.dual.initialize(&self.energy, &self.labels);
    }

    /// Phase A: reduce every clique against the current proposals and charge the
    /// normalization to the proposal duals
    #[allow(clippy::unnecessary_cast)]
    pub fn pre_edit_dual(&mut self) {
        if self.config.parallel_reduce {
            return self.pre_edit_dual_parallel();
        }
        let Self { energy, dual, flow, labels, fusion_labels, .. } = self;
        let mut psi: Vec<Energy> = Vec::with_capacity(K_MAX);
        for clique_index in 0..energy.num_cliques() {
            // the reduced table is written straight into the flow solver's view
            let table = flow.cliques_mut()[clique_index].energy_table_mut();
            reduce_clique(energy, dual, labels, fusion_labels, clique_index, table, &mut psi);
            for (position, &v) in energy.cliques()[clique_index].nodes().iter().enumerate() {
                let proposal = fusion_labels[v as usize];
                *dual.value_mut(clique_index as CliqueIndex, position, proposal) -= psi[position];
            }
        }
    }

    /// cliques are reduced independently given read-only duals, so the reductions fan
    /// out; ψ write-backs and table installs stay sequential and ordered
    #[allow(clippy::unnecessary_cast)]
    fn pre_edit_dual_parallel(&mut self) {
        let Self { energy, dual, flow, labels, fusion_labels, .. } = self;
        let energy_ref: &MultilabelEnergy = energy;
        let dual_ref: &DualTable = dual;
        let labels_ref: &[Label] = labels;
        let fusion_ref: &[Label] = fusion_labels;
        let reductions: Vec<(Vec<Energy>, Vec<Energy>)> = (0..energy_ref.num_cliques())
            .into_par_iter()
            .map(|clique_index| {
                let k = energy_ref.cliques()[clique_index].size();
                let mut table = vec![0; 1 << k];
                let mut psi = Vec::with_capacity(k);
                reduce_clique(energy_ref, dual_ref, labels_ref, fusion_ref, clique_index, &mut table, &mut psi);
                (table, psi)
            })
            .collect();
        for (clique_index, (table, psi)) in reductions.into_iter().enumerate() {
            flow.cliques_mut()[clique_index].energy_table_mut().copy_from_slice(&table);
            for (position, &v) in energy.cliques()[clique_index].nodes().iter().enumerate() {
                let proposal = fusion_labels[v as usize];
                *dual.value_mut(clique_index as CliqueIndex, position, proposal) -= psi[position];
            }
        }
    }

    /// Phase B: price nodes by height difference, solve the boolean subproblem, adopt
    /// winning proposals and harvest the flow solver's dual corrections; returns
    /// whether any label changed
    #[allow(clippy::unnecessary_cast)]
    pub fn update_primal_dual(&mut self) -> bool {
        let n = self.energy.num_nodes;
        self.flow.clear_unaries();
        let constant = self.flow.get_constant_term();
        self.flow.add_constant_term(-constant);
        for v in 0..n {
            let height_diff =
                self.compute_height_diff(v as NodeIndex, self.labels[v], self.fusion_labels[v]);
            if height_diff > 0 {
                self.flow.add_unary_term(v as NodeIndex, height_diff, 0);
            } else {
                self.flow.add_unary_term(v as NodeIndex, 0, -height_diff);
            }
        }
        self.flow.solve();
        let mut changed = false;
        for v in 0..n {
            if self.flow.get_label(v as NodeIndex) == 1 {
                let proposal = self.fusion_labels[v];
                if self.labels[v] != proposal {
                    changed = true;
                }
                self.labels[v] = proposal;
            }
        }
        // complementary slackness corrections land on the proposal duals
        let Self { energy, dual, flow, fusion_labels, .. } = self;
        for (clique_index, clique) in energy.cliques().iter().enumerate() {
            let corrections = flow.cliques()[clique_index].alpha_ci();
            for (position, &v) in clique.nodes().iter().enumerate() {
                let proposal = fusion_labels[v as usize];
                *dual.value_mut(clique_index as CliqueIndex, position, proposal) += corrections[position];
            }
        }
        changed
    }

    /// rewrite the active duals of every clique from the fresh labeling
    #[allow(clippy::unnecessary_cast)]
    pub fn post_edit_dual(&mut self) {
        let Self { energy, dual, labels, .. } = self;
        let mut label_buf: Vec<Label> = Vec::with_capacity(K_MAX);
        for (clique_index, clique) in energy.cliques().iter().enumerate() {
            label_buf.clear();
            for &v in clique.nodes() {
                label_buf.push(labels[v as usize]);
            }
            let clique_energy = clique.energy(&label_buf);
            dual.rewrite_active(clique_index as CliqueIndex, &label_buf, clique_energy);
        }
    }

    /// height-guided proposals: each node proposes its lowest label under the current
    /// re-parameterization; returns whether any proposal differs from the labeling
    #[allow(clippy::unnecessary_cast)]
    pub fn initial_fusion_labeling(&mut self) -> bool {
        let mut different = false;
        for v in 0..self.energy.num_nodes {
            let mut pick = self.labels[v];
            let mut best_height = self.compute_height(v as NodeIndex, pick);
            for label in 0..self.energy.num_labels {
                let label = label as Label;
                let height = self.compute_height(v as NodeIndex, label);
                if height < best_height {
                    best_height = height;
                    pick = label;
                    different = true;
                }
            }
            self.fusion_labels[v] = pick;
        }
        different
    }

    /// rescaling the duals into the exact LP certificate needs rational arithmetic;
    /// with integer energies this stays disabled
    fn dual_fit(&mut self) {}

    fn assert_invariants(&self, stage: &str) {
        if !self.config.check_invariants {
            return;
        }
        if let Err(violation) = self.check_invariants() {
            panic!("{} ({})", violation, stage);
        }
    }

    /// the Label, Dual-Bound and Active invariants in one pass
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        invariant::check_label_invariant(&self.energy, &self.dual, &self.labels)?;
        invariant::check_dual_bound_invariant(&self.energy, &self.dual)?;
        invariant::check_active_invariant(&self.energy, &self.dual, &self.labels)?;
        Ok(())
    }

    /// expansion sweeps in increasing label order until a fixed point
    #[allow(clippy::unnecessary_cast)]
    pub fn solve(&mut self) {
        self.initial_labeling();
        self.initial_dual();
        self.sweeps = 0;
        if self.config.verbose {
            println!("sweep {}: energy {}", self.sweeps, self.compute_energy());
        }
        self.assert_invariants("initial dual");
        let num_labels = self.energy.num_labels;
        loop {
            let mut label_changed = false;
            for alpha in 0..num_labels {
                self.fusion_labels.fill(alpha as Label);
                self.pre_edit_dual();
                self.assert_invariants("pre-edit dual");
                if self.update_primal_dual() {
                    label_changed = true;
                }
                self.post_edit_dual();
                self.assert_invariants("post-edit dual");
            }
            self.sweeps += 1;
            if self.config.verbose {
                println!("sweep {}: energy {}", self.sweeps, self.compute_energy());
            }
            if !label_changed {
                break;
            }
        }
        if self.config.check_invariants {
            if let Err(violation) = invariant::check_height_invariant(
                &self.energy,
                &self.dual,
                &self.node_clique_index,
                &self.labels,
            ) {
                panic!("{} (termination)", violation);
            }
        }
        self.dual_fit();
    }

    /// alternative driver: fuse against height-guided proposals instead of sweeping
    /// constant labels; stops once no node sees a lower label
    pub fn solve_height_guided(&mut self) {
        self.initial_labeling();
        self.initial_dual();
        self.sweeps = 0;
        self.assert_invariants("initial dual");
        loop {
            if !self.initial_fusion_labeling() {
                break;
            }
            self.pre_edit_dual();
            self.assert_invariants("pre-edit dual");
            self.update_primal_dual();
            self.post_edit_dual();
            self.assert_invariants("post-edit dual");
            self.sweeps += 1;
            if self.config.verbose {
                println!("proposal {}: energy {}", self.sweeps, self.compute_energy());
            }
        }
        if self.config.check_invariants {
            if let Err(violation) = invariant::check_height_invariant(
                &self.energy,
                &self.dual,
                &self.node_clique_index,
                &self.labels,
            ) {
                panic!("{} (termination)", violation);
            }
        }
        self.dual_fit();
    }

    /// JSON view of the solver state; the full dual table is included only when
    /// `abbrev` is off
    pub fn snapshot(&self, abbrev: bool) -> serde_json::Value {
        let mut value = json!({
            "num_nodes": self.energy.num_nodes,
            "num_labels": self.energy.num_labels,
            "labels": self.labels,
            "energy": self.compute_energy(),
            "sweeps": self.sweeps,
        });
        if !abbrev {
            value["dual"] = json!(self.dual.raw_values());
        }
        value
    }
}
