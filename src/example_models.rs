//! Example Models
//!
//! Small abstract energy functions used for debugging and randomized testing. These do
//! not correspond to any real vision model; they exist to exercise the solver on
//! instances whose structure (and sometimes whose optimum) is known in closed form.
//!

use super::energy_model::*;
use super::util::*;
use crate::rand::Rng;
use crate::rand_xoshiro::rand_core::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// grid MRF with per-node preferred labels and Potts edges between 4-neighbors
#[allow(clippy::unnecessary_cast)]
pub fn potts_grid(
    rows: usize,
    columns: usize,
    num_labels: usize,
    preferred: &[Label],
    unary_weight: Energy,
    pairwise_weight: Energy,
) -> MultilabelEnergy {
    assert_eq!(preferred.len(), rows * columns);
    let mut energy = MultilabelEnergy::new(rows * columns, num_labels);
    let mut coefficients = vec![0; num_labels];
    for (v, &favorite) in preferred.iter().enumerate() {
        for (label, coefficient) in coefficients.iter_mut().enumerate() {
            *coefficient = if label as Label == favorite { 0 } else { unary_weight };
        }
        energy.add_unary_term(v as NodeIndex, &coefficients);
    }
    for row in 0..rows {
        for column in 0..columns {
            let v = (row * columns + column) as NodeIndex;
            if column + 1 < columns {
                energy.add_clique(Arc::new(PottsClique::new(vec![v, v + 1], pairwise_weight)));
            }
            if row + 1 < rows {
                energy.add_clique(Arc::new(PottsClique::new(
                    vec![v, v + columns as NodeIndex],
                    pairwise_weight,
                )));
            }
        }
    }
    energy
}

/// binary chain with preferred labels and Potts edges between neighbors
#[allow(clippy::unnecessary_cast)]
pub fn ising_chain(
    preferred: &[Label],
    unary_weight: Energy,
    pairwise_weight: Energy,
) -> MultilabelEnergy {
    let n = preferred.len();
    let mut energy = MultilabelEnergy::new(n, 2);
    for (v, &favorite) in preferred.iter().enumerate() {
        let coefficients: Vec<Energy> = (0..2)
            .map(|label| if label as Label == favorite { 0 } else { unary_weight })
            .collect();
        energy.add_unary_term(v as NodeIndex, &coefficients);
    }
    for v in 0..(n - 1) {
        energy.add_clique(Arc::new(PottsClique::new(
            vec![v as NodeIndex, (v + 1) as NodeIndex],
            pairwise_weight,
        )));
    }
    energy
}

/// a single higher-order range clique over all nodes, no unaries; the optimum is any
/// constant labeling at energy zero
#[allow(clippy::unnecessary_cast)]
pub fn single_range_clique(num_nodes: usize, num_labels: usize, weight: Energy) -> MultilabelEnergy {
    let mut energy = MultilabelEnergy::new(num_nodes, num_labels);
    let nodes: Vec<NodeIndex> = (0..num_nodes).map(|v| v as NodeIndex).collect();
    energy.add_clique(Arc::new(RangeClique::new(nodes, weight, num_labels)));
    energy
}

/// configuration of the seeded random instance generator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomModelConfig {
    pub num_nodes: usize,
    pub num_labels: usize,
    pub num_cliques: usize,
    /// clique sizes are drawn from `2..=max_clique_size`
    pub max_clique_size: usize,
    pub max_unary: Energy,
    pub max_weight: Energy,
    pub seed: u64,
}

impl Default for RandomModelConfig {
    fn default() -> Self {
        Self {
            num_nodes: 30,
            num_labels: 4,
            num_cliques: 30,
            max_clique_size: 4,
            max_unary: 20,
            max_weight: 10,
            seed: 0,
        }
    }
}

/// random MRF whose cliques all come from lattice-submodular families (Potts, range,
/// truncated linear), so every fusion restriction the solver builds is submodular
#[allow(clippy::unnecessary_cast)]
pub fn random_submodular_model(config: &RandomModelConfig) -> MultilabelEnergy {
    assert!(config.num_nodes >= config.max_clique_size);
    assert!(config.max_clique_size >= 2);
    let mut rng = DeterministicRng::seed_from_u64(config.seed);
    let mut energy = MultilabelEnergy::new(config.num_nodes, config.num_labels);
    for v in 0..config.num_nodes {
        let coefficients: Vec<Energy> =
            (0..config.num_labels).map(|_| rng.gen_range(0..=config.max_unary)).collect();
        energy.add_unary_term(v as NodeIndex, &coefficients);
    }
    for _ in 0..config.num_cliques {
        let k = rng.gen_range(2..=config.max_clique_size);
        let mut nodes: Vec<NodeIndex> = Vec::with_capacity(k);
        while nodes.len() < k {
            let v = rng.gen_range(0..config.num_nodes) as NodeIndex;
            if !nodes.contains(&v) {
                nodes.push(v);
            }
        }
        let weight = rng.gen_range(1..=config.max_weight);
        let clique: CliquePtr = match rng.gen_range(0..3) {
            0 => Arc::new(PottsClique::new(nodes, weight)),
            1 => Arc::new(RangeClique::new(nodes, weight, config.num_labels)),
            _ => {
                if k == 2 {
                    let threshold = rng.gen_range(1..=std::cmp::max(1, config.num_labels as Energy - 1));
                    Arc::new(TruncatedLinearClique::new(nodes, weight, threshold))
                } else {
                    Arc::new(PottsClique::new(nodes, weight))
                }
            }
        };
        energy.add_clique(clique);
    }
    energy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_models_potts_grid_edges() {  // cargo test example_models_potts_grid_edges -- --nocapture
        let preferred: Vec<Label> = vec![0, 1, 1, 2];
        let energy = potts_grid(2, 2, 3, &preferred, 2, 1);
        assert_eq!(energy.num_nodes, 4);
        assert_eq!(energy.num_cliques(), 4);
        assert_eq!(energy.compute_energy(&preferred), 4);
        assert_eq!(energy.compute_energy(&[1, 1, 1, 1]), 4);
    }

    #[test]
    fn example_models_random_is_deterministic() {  // cargo test example_models_random_is_deterministic -- --nocapture
        let config = RandomModelConfig { seed: 7, ..Default::default() };
        let first = random_submodular_model(&config);
        let second = random_submodular_model(&config);
        let labels: Vec<Label> = (0..config.num_nodes)
            .map(|v| (v % config.num_labels) as Label)
            .collect();
        assert_eq!(first.compute_energy(&labels), second.compute_energy(&labels));
        assert_eq!(first.num_cliques(), second.num_cliques());
    }
}
