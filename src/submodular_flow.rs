//! Submodular Flow Solver
//!
//! The boolean subproblem solved once per move: minimize a sum of per-node binary costs
//! plus per-clique submodular energy tables. The move driver only depends on the
//! [`SubmodularFlowImpl`] trait, so an external max-flow implementation can be swapped in;
//! [`SubmodularFlowSerial`] is the built-in serial reference implementation.
//!
//! The reference implementation runs augmenting paths over a residual graph whose arcs
//! are the source/sink residuals plus clique *exchange capacities*: pushing flow through
//! a clique from position u to position v raises `alpha_ci[u]` and lowers `alpha_ci[v]`,
//! and is feasible as long as every set containing u but not v keeps nonnegative slack
//! `table[S] - Σ_{i∈S} alpha_ci[i]`. Before any augmentation, `alpha_ci` is seeded with
//! the greedy base vector of the table (marginals along the local-position chain), which
//! zeroes the slack of the full set and moves the modular part of the table onto the
//! sink arcs; without that, a clique preferring the all-ones assignment could never be
//! saturated and the cut would be wrong.
//!
//! After [`SubmodularFlowImpl::solve`], label 1 means the node is residual-reachable
//! from the source, and `alpha_ci` holds the per-position dual corrections that the
//! move driver folds back into its dual table (complementary slackness).
//!

use super::submodular_bound::is_submodular;
use super::util::*;
use std::collections::VecDeque;

/// one clique of the flow instance; the energy table is a writable view so the caller
/// can re-parameterize the instance between solves without copies
#[derive(Debug, Clone)]
pub struct FlowClique {
    /// the member nodes, in the order the bitmask positions refer to
    pub nodes: Vec<NodeIndex>,
    /// submodular energy table of size `2^k`, `table[0] == 0` required at solve time
    energy_table: Vec<Energy>,
    /// per-position dual values; after a solve these are the corrections owed to the
    /// caller's duals
    alpha_ci: Vec<Energy>,
}

impl FlowClique {
    fn new(nodes: Vec<NodeIndex>, energy_table: Vec<Energy>) -> Self {
        let k = nodes.len();
        assert!(k >= 2 && k <= K_MAX, "flow clique size {} out of range", k);
        assert_eq!(energy_table.len(), 1 << k, "energy table must have size 2^k");
        let alpha_ci = vec![0; k];
        Self { nodes, energy_table, alpha_ci }
    }

    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    pub fn energy_table(&self) -> &[Energy] {
        &self.energy_table
    }

    pub fn energy_table_mut(&mut self) -> &mut [Energy] {
        &mut self.energy_table
    }

    pub fn alpha_ci(&self) -> &[Energy] {
        &self.alpha_ci
    }

    /// remaining room of an assignment: `table[S] - Σ_{i∈S} alpha_ci[i]`
    fn slack(&self, assgn: Assgn) -> Energy {
        let mut slack = self.energy_table[assgn as usize];
        for i in iter_members(assgn, self.size()) {
            slack -= self.alpha_ci[i];
        }
        slack
    }

    /// how much can be pushed from position u to position v before some set containing
    /// u but not v runs out of slack
    fn exchange_capacity(&self, u: usize, v: usize) -> Energy {
        debug_assert!(u != v);
        let max_assgn: Assgn = 1 << self.size();
        let bit_u: Assgn = 1 << u;
        let bit_v: Assgn = 1 << v;
        let mut capacity = Energy::MAX;
        for s in 0..max_assgn {
            if s & bit_u != 0 && s & bit_v == 0 {
                capacity = std::cmp::min(capacity, self.slack(s));
            }
        }
        capacity
    }

    fn push(&mut self, from: usize, to: usize, amount: Energy) {
        self.alpha_ci[from] += amount;
        self.alpha_ci[to] -= amount;
    }

    /// seed `alpha_ci` with the greedy base vector of the energy table: the marginals
    /// along the chain ∅ ⊂ {0} ⊂ {0,1} ⊂ …, whose sum telescopes to `table[full]`
    fn init_base(&mut self) {
        let k = self.size();
        debug_assert_eq!(self.energy_table[0], 0, "table must be zero at the empty assignment");
        debug_assert!(is_submodular(k, &self.energy_table), "flow clique table must be submodular");
        for i in 0..k {
            let prefix: Assgn = (1 << i) - 1;
            let prefix_next: Assgn = (1 << (i + 1)) - 1;
            self.alpha_ci[i] =
                self.energy_table[prefix_next as usize] - self.energy_table[prefix as usize];
        }
        debug_assert_eq!(self.slack((1 << k) - 1), 0);
        debug_assert!((0..(1u32 << k)).all(|s| self.slack(s) >= 0));
    }
}

/// how a node was reached during the residual search
#[derive(Debug, Clone, Copy)]
enum ParentArc {
    /// directly from the source
    Source,
    /// through a clique from another node
    Exchange { clique: usize, from_node: NodeIndex, from_pos: usize, to_pos: usize },
}

/// minimal interface the move driver requires of a flow solver
pub trait SubmodularFlowImpl {
    /// append `count` nodes, returning the index of the first
    fn add_node(&mut self, count: usize) -> NodeIndex;

    /// register a clique over `nodes` with the given `2^k` energy table; when
    /// `normalize` is set, the table minimum is moved into the constant term
    fn add_clique(&mut self, nodes: Vec<NodeIndex>, energy_table: Vec<Energy>, normalize: bool);

    /// finalize the topology; nodes and cliques are fixed afterwards, energy tables
    /// and unaries stay rewritable
    fn graph_init(&mut self);

    fn clear_unaries(&mut self);
    fn add_constant_term(&mut self, constant: Energy);
    fn get_constant_term(&self) -> Energy;

    /// node cost `e0` for value 0, `e1` for value 1; negative inputs are
    /// re-parameterized through the constant term
    fn add_unary_term(&mut self, v: NodeIndex, e0: Energy, e1: Energy);

    /// minimize over binary labelings; resets all flow state from the current unaries
    /// and energy tables
    fn solve(&mut self);

    /// the binary label of node `v` after [`SubmodularFlowImpl::solve`]
    fn get_label(&self, v: NodeIndex) -> usize;

    fn cliques(&self) -> &[FlowClique];
    fn cliques_mut(&mut self) -> &mut [FlowClique];
}

/// serial reference implementation: breadth-first augmenting paths with integer-exact
/// exchange capacities
#[derive(Debug, Clone, Default)]
pub struct SubmodularFlowSerial {
    num_nodes: usize,
    constant_term: Energy,
    /// accumulated node cost of value 0
    cost_zero: Vec<Energy>,
    /// accumulated node cost of value 1
    cost_one: Vec<Energy>,
    cliques: Vec<FlowClique>,
    /// node → (clique index, local position), in clique-registration order
    incident: Vec<Vec<(usize, usize)>>,
    /// binary labels of the latest solve
    labels: Vec<bool>,
    initialized: bool,
    // solve-time buffers, allocated once
    residual_source: Vec<Energy>,
    residual_sink: Vec<Energy>,
    parent: Vec<Option<ParentArc>>,
}

impl SubmodularFlowSerial {
    pub fn new() -> Self {
        Self::default()
    }

    /// breadth-first search over the residual graph; returns the first dequeued node
    /// with remaining sink capacity, or None once the search is exhausted (in which
    /// case `parent` holds the full reachable set)
    #[allow(clippy::unnecessary_cast)]
    fn residual_search(&mut self, stop_at_sink: bool) -> Option<NodeIndex> {
        self.parent.iter_mut().for_each(|p| *p = None);
        let mut queue: VecDeque<NodeIndex> = VecDeque::new();
        for v in 0..self.num_nodes {
            if self.residual_source[v] > 0 {
                self.parent[v] = Some(ParentArc::Source);
                queue.push_back(v as NodeIndex);
            }
        }
        while let Some(u) = queue.pop_front() {
            if stop_at_sink && self.residual_sink[u as usize] > 0 {
                return Some(u);
            }
            for &(clique_index, u_pos) in self.incident[u as usize].iter() {
                let clique = &self.cliques[clique_index];
                for (v_pos, &v) in clique.nodes.iter().enumerate() {
                    if v == u || self.parent[v as usize].is_some() {
                        continue;
                    }
                    if clique.exchange_capacity(u_pos, v_pos) > 0 {
                        self.parent[v as usize] = Some(ParentArc::Exchange {
                            clique: clique_index,
                            from_node: u,
                            from_pos: u_pos,
                            to_pos: v_pos,
                        });
                        queue.push_back(v);
                    }
                }
            }
        }
        None
    }

    /// trace the parent chain of `end` back to the source and push the bottleneck
    /// amount along it; returns the amount pushed
    #[allow(clippy::unnecessary_cast)]
    fn augment(&mut self, end: NodeIndex) -> Energy {
        // collect the path, sink end first
        let mut hops: Vec<(usize, usize, usize)> = vec![];  // (clique, from_pos, to_pos)
        let mut start = end;
        loop {
            match self.parent[start as usize].expect("path must reach the source") {
                ParentArc::Source => break,
                ParentArc::Exchange { clique, from_node, from_pos, to_pos } => {
                    hops.push((clique, from_pos, to_pos));
                    start = from_node;
                }
            }
        }
        let mut amount = std::cmp::min(
            self.residual_source[start as usize],
            self.residual_sink[end as usize],
        );
        // per-clique bottleneck; a clique crossed more than once constrains jointly,
        // so the slack of a set is divided by its net multiplicity along the path
        let mut visited_cliques: Vec<usize> = vec![];
        for &(clique_index, ..) in hops.iter() {
            if visited_cliques.contains(&clique_index) {
                continue;
            }
            visited_cliques.push(clique_index);
            let clique = &self.cliques[clique_index];
            let max_assgn: Assgn = 1 << clique.size();
            for s in 0..max_assgn {
                let mut multiplicity: Energy = 0;
                for &(c, from_pos, to_pos) in hops.iter() {
                    if c != clique_index {
                        continue;
                    }
                    let from_in = s & (1 << from_pos) != 0;
                    let to_in = s & (1 << to_pos) != 0;
                    if from_in && !to_in {
                        multiplicity += 1;
                    } else if to_in && !from_in {
                        multiplicity -= 1;
                    }
                }
                if multiplicity > 0 {
                    amount = std::cmp::min(amount, clique.slack(s) / multiplicity);
                }
            }
        }
        if amount <= 0 {
            return 0;
        }
        self.residual_source[start as usize] -= amount;
        self.residual_sink[end as usize] -= amount;
        for &(clique_index, from_pos, to_pos) in hops.iter() {
            self.cliques[clique_index].push(from_pos, to_pos, amount);
        }
        amount
    }
}

impl SubmodularFlowImpl for SubmodularFlowSerial {
    #[allow(clippy::unnecessary_cast)]
    fn add_node(&mut self, count: usize) -> NodeIndex {
        assert!(!self.initialized, "topology is frozen after graph_init");
        let first = self.num_nodes;
        self.num_nodes += count;
        self.cost_zero.resize(self.num_nodes, 0);
        self.cost_one.resize(self.num_nodes, 0);
        first as NodeIndex
    }

    #[allow(clippy::unnecessary_cast)]
    fn add_clique(&mut self, nodes: Vec<NodeIndex>, mut energy_table: Vec<Energy>, normalize: bool) {
        assert!(!self.initialized, "topology is frozen after graph_init");
        for &v in nodes.iter() {
            assert!((v as usize) < self.num_nodes, "clique node {} out of range", v);
        }
        if normalize {
            let minimum = *energy_table.iter().min().expect("nonempty table");
            self.constant_term += minimum;
            energy_table.iter_mut().for_each(|e| *e -= minimum);
        }
        self.cliques.push(FlowClique::new(nodes, energy_table));
    }

    #[allow(clippy::unnecessary_cast)]
    fn graph_init(&mut self) {
        assert!(!self.initialized, "graph_init called twice");
        self.incident = vec![vec![]; self.num_nodes];
        for (clique_index, clique) in self.cliques.iter().enumerate() {
            for (position, &v) in clique.nodes.iter().enumerate() {
                self.incident[v as usize].push((clique_index, position));
            }
        }
        self.labels = vec![false; self.num_nodes];
        self.residual_source = vec![0; self.num_nodes];
        self.residual_sink = vec![0; self.num_nodes];
        self.parent = vec![None; self.num_nodes];
        self.initialized = true;
    }

    fn clear_unaries(&mut self) {
        self.cost_zero.fill(0);
        self.cost_one.fill(0);
    }

    fn add_constant_term(&mut self, constant: Energy) {
        self.constant_term += constant;
    }

    fn get_constant_term(&self) -> Energy {
        self.constant_term
    }

    #[allow(clippy::unnecessary_cast)]
    fn add_unary_term(&mut self, v: NodeIndex, mut e0: Energy, mut e1: Energy) {
        // re-parameterize so both costs are nonnegative
        if e0 < 0 {
            self.add_constant_term(e0);
            e1 -= e0;
            e0 = 0;
        }
        if e1 < 0 {
            self.add_constant_term(e1);
            e0 -= e1;
            e1 = 0;
        }
        self.cost_zero[v as usize] += e0;
        self.cost_one[v as usize] += e1;
    }

    #[allow(clippy::unnecessary_cast)]
    fn solve(&mut self) {
        assert!(self.initialized, "graph_init must run before solve");
        for clique in self.cliques.iter_mut() {
            clique.init_base();
        }
        // sink capacity carries the modular part of the clique tables; the shared
        // shift only moves the optimum value, never the argmin
        for v in 0..self.num_nodes {
            let mut into = self.cost_zero[v];
            let mut out = self.cost_one[v];
            for &(clique_index, position) in self.incident[v].iter() {
                out += self.cliques[clique_index].alpha_ci[position];
            }
            let shift = std::cmp::min(into, out);
            into -= shift;
            out -= shift;
            self.residual_source[v] = into;
            self.residual_sink[v] = out;
        }
        while let Some(end) = self.residual_search(true) {
            if self.augment(end) == 0 {
                break;
            }
        }
        // the minimum cut: label 1 exactly on the residual-reachable side
        self.residual_search(false);
        for v in 0..self.num_nodes {
            self.labels[v] = self.parent[v].is_some();
        }
    }

    #[allow(clippy::unnecessary_cast)]
    fn get_label(&self, v: NodeIndex) -> usize {
        usize::from(self.labels[v as usize])
    }

    fn cliques(&self) -> &[FlowClique] {
        &self.cliques
    }

    fn cliques_mut(&mut self) -> &mut [FlowClique] {
        &mut self.cliques
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rand::Rng;
    use crate::rand_xoshiro::rand_core::SeedableRng;
    use crate::submodular_bound::submodular_upper_bound;

    /// evaluate the objective the solver is minimizing for an explicit labeling
    fn objective(flow: &SubmodularFlowSerial, labels: &[usize]) -> Energy {
        let mut total = 0;
        for v in 0..flow.num_nodes {
            total += if labels[v] == 0 { flow.cost_zero[v] } else { flow.cost_one[v] };
        }
        for clique in flow.cliques.iter() {
            let mut assgn: Assgn = 0;
            for (position, &v) in clique.nodes.iter().enumerate() {
                if labels[v as usize] == 1 {
                    assgn |= 1 << position;
                }
            }
            total += clique.energy_table[assgn as usize];
        }
        total
    }

    fn brute_force_minimum(flow: &SubmodularFlowSerial) -> Energy {
        let n = flow.num_nodes;
        assert!(n <= 16, "brute force only for small instances");
        let mut best = Energy::MAX;
        for bits in 0..(1usize << n) {
            let labels: Vec<usize> = (0..n).map(|v| (bits >> v) & 1).collect();
            best = std::cmp::min(best, objective(flow, &labels));
        }
        best
    }

    fn solved_objective(flow: &mut SubmodularFlowSerial) -> Energy {
        flow.solve();
        let labels: Vec<usize> = (0..flow.num_nodes).map(|v| flow.get_label(v as NodeIndex)).collect();
        objective(flow, &labels)
    }

    #[test]
    fn submodular_flow_unary_only() {  // cargo test submodular_flow_unary_only -- --nocapture
        let mut flow = SubmodularFlowSerial::new();
        flow.add_node(2);
        flow.add_clique(vec![0, 1], vec![0, 0, 0, 0], false);
        flow.graph_init();
        flow.add_unary_term(0, 5, 0);
        flow.add_unary_term(1, 0, 7);
        flow.solve();
        assert_eq!(flow.get_label(0), 1);
        assert_eq!(flow.get_label(1), 0);
    }

    #[test]
    fn submodular_flow_pairwise_cut() {  // cargo test submodular_flow_pairwise_cut -- --nocapture
        // cut-function clique pulls the two nodes together against opposing unaries
        let mut flow = SubmodularFlowSerial::new();
        flow.add_node(2);
        flow.add_clique(vec![0, 1], vec![0, 1, 1, 0], false);
        flow.graph_init();
        flow.add_unary_term(0, 2, 0);
        flow.add_unary_term(1, 0, 2);
        flow.solve();
        assert_eq!(flow.get_label(0), 1);
        assert_eq!(flow.get_label(1), 0);
        let labels: Vec<usize> = vec![flow.get_label(0), flow.get_label(1)];
        assert_eq!(objective(&flow, &labels), 1);
        assert_eq!(flow.cliques()[0].alpha_ci(), &[1, -1]);
    }

    #[test]
    fn submodular_flow_prefers_keeping_on_ties() {  // cargo test submodular_flow_prefers_keeping_on_ties -- --nocapture
        // switching all three nodes costs exactly as much as keeping them; the minimal
        // source side must win, so nothing switches
        let mut flow = SubmodularFlowSerial::new();
        flow.add_node(3);
        // the reduced table of a ternary range potential whose proposal sits at
        // distance 2 from every current label
        let alpha = 2;
        let table: Vec<Energy> = vec![0, 4, 4, 6, 4, 6, 6, 6];
        assert!(is_submodular(3, &table));
        flow.add_clique(vec![0, 1, 2], table, false);
        flow.graph_init();
        for v in 0..3 {
            flow.add_unary_term(v, alpha, 0);
        }
        flow.solve();
        for v in 0..3 {
            assert_eq!(flow.get_label(v), 0);
        }
    }

    #[test]
    fn submodular_flow_matches_brute_force() {  // cargo test submodular_flow_matches_brute_force -- --nocapture
        let mut rng = DeterministicRng::seed_from_u64(91);
        for _ in 0..60 {
            let n = rng.gen_range(4..=9);
            let mut flow = SubmodularFlowSerial::new();
            flow.add_node(n);
            let num_cliques = rng.gen_range(1..=4);
            for _ in 0..num_cliques {
                let k = rng.gen_range(2..=std::cmp::min(4, n));
                let mut nodes: Vec<NodeIndex> = vec![];
                while nodes.len() < k {
                    let v = rng.gen_range(0..n) as NodeIndex;
                    if !nodes.contains(&v) {
                        nodes.push(v);
                    }
                }
                let mut table: Vec<Energy> = (0..(1usize << k)).map(|_| rng.gen_range(0..30)).collect();
                submodular_upper_bound(k, &mut table);
                let base = table[0];
                table.iter_mut().for_each(|e| *e -= base);
                flow.add_clique(nodes, table, false);
            }
            flow.graph_init();
            for v in 0..n {
                flow.add_unary_term(v as NodeIndex, rng.gen_range(0..20), rng.gen_range(0..20));
            }
            let solved = solved_objective(&mut flow);
            assert_eq!(solved, brute_force_minimum(&flow));
        }
    }

    #[test]
    fn submodular_flow_reuse_across_solves() {  // cargo test submodular_flow_reuse_across_solves -- --nocapture
        let mut flow = SubmodularFlowSerial::new();
        flow.add_node(2);
        flow.add_clique(vec![0, 1], vec![0, 1, 1, 0], false);
        flow.graph_init();
        flow.add_unary_term(0, 3, 0);
        flow.add_unary_term(1, 3, 0);
        flow.solve();
        assert_eq!((flow.get_label(0), flow.get_label(1)), (1, 1));
        // rewrite unaries and the energy table, solve again from scratch
        flow.clear_unaries();
        flow.add_unary_term(0, 0, 3);
        flow.add_unary_term(1, 0, 3);
        flow.cliques_mut()[0].energy_table_mut().copy_from_slice(&[0, 2, 2, 4]);
        flow.solve();
        assert_eq!((flow.get_label(0), flow.get_label(1)), (0, 0));
    }
}
