//! Node–Clique Index
//!
//! Reverse map from a variable to the cliques containing it, with the local position of
//! the variable inside each clique. Built once after the cliques are fixed; entries keep
//! clique-registration order so height sums are evaluated in a deterministic order.
//!

use super::energy_model::*;
use super::util::*;

#[derive(Debug, Clone)]
pub struct NodeCliqueIndex {
    incident: Vec<Vec<(CliqueIndex, usize)>>,
}

impl NodeCliqueIndex {
    #[allow(clippy::unnecessary_cast)]
    pub fn new(energy: &MultilabelEnergy) -> Self {
        let mut incident: Vec<Vec<(CliqueIndex, usize)>> = vec![vec![]; energy.num_nodes];
        for (clique_index, clique) in energy.cliques().iter().enumerate() {
            for (position, &v) in clique.nodes().iter().enumerate() {
                incident[v as usize].push((clique_index as CliqueIndex, position));
            }
        }
        Self { incident }
    }

    /// the `(clique, local position)` pairs of node `v`, exactly one per containing clique
    #[inline(always)]
    #[allow(clippy::unnecessary_cast)]
    pub fn incident(&self, v: NodeIndex) -> &[(CliqueIndex, usize)] {
        &self.incident[v as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn node_clique_index_positions() {  // cargo test node_clique_index_positions -- --nocapture
        let mut energy = MultilabelEnergy::new(4, 2);
        energy.add_clique(Arc::new(PottsClique::new(vec![0, 1], 1)));
        energy.add_clique(Arc::new(PottsClique::new(vec![1, 2], 1)));
        energy.add_clique(Arc::new(RangeClique::new(vec![2, 1, 0], 1, 2)));
        let index = NodeCliqueIndex::new(&energy);
        assert_eq!(index.incident(0), &[(0, 0), (2, 2)]);
        assert_eq!(index.incident(1), &[(0, 1), (1, 0), (2, 1)]);
        assert_eq!(index.incident(2), &[(1, 1), (2, 0)]);
        assert!(index.incident(3).is_empty());
    }
}
