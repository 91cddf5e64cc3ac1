//! Dual Table
//!
//! The per-clique, per-position, per-label dual variables λ. Stored as one flat integer
//! arena with a per-clique offset table (prefix sums of `k_c · L`), so Phase-A scans walk
//! contiguous memory and no per-iteration allocation happens on the hot path.
//!
//! The active entries (those at the current labels of a clique) always sum to the clique
//! energy; both initialization and the post-move rewrite distribute the integer quotient
//! `e / k` and hand the remainder `e mod k` to the first `e mod k` positions. The
//! remainder handling is load-bearing: rounding instead would break the sum.
//!

use super::energy_model::*;
use super::util::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DualTable {
    /// the number of labels, the stride of one local position
    num_labels: usize,
    /// start of each clique's block in [`DualTable::values`], one extra entry at the end
    offsets: Vec<usize>,
    /// all dual values, clique-major then position-major then label
    values: Vec<Energy>,
}

impl DualTable {
    pub fn new(energy: &MultilabelEnergy) -> Self {
        let num_labels = energy.num_labels;
        let mut offsets = Vec::with_capacity(energy.num_cliques() + 1);
        let mut total = 0;
        for clique in energy.cliques().iter() {
            offsets.push(total);
            total += clique.size() * num_labels;
        }
        offsets.push(total);
        Self {
            num_labels,
            offsets,
            values: vec![0; total],
        }
    }

    #[inline(always)]
    #[allow(clippy::unnecessary_cast)]
    fn index(&self, clique: CliqueIndex, position: usize, label: Label) -> usize {
        debug_assert!((label as usize) < self.num_labels);
        let offset = self.offsets[clique as usize] + position * self.num_labels;
        debug_assert!(offset + (label as usize) < self.offsets[clique as usize + 1]);
        offset + label as usize
    }

    #[inline(always)]
    pub fn value(&self, clique: CliqueIndex, position: usize, label: Label) -> Energy {
        self.values[self.index(clique, position, label)]
    }

    #[inline(always)]
    pub fn value_mut(&mut self, clique: CliqueIndex, position: usize, label: Label) -> &mut Energy {
        let index = self.index(clique, position, label);
        &mut self.values[index]
    }

    /// the dual entries of one local position, indexed by label
    #[allow(clippy::unnecessary_cast)]
    pub fn position_slice(&self, clique: CliqueIndex, position: usize) -> &[Energy] {
        let offset = self.offsets[clique as usize] + position * self.num_labels;
        &self.values[offset..offset + self.num_labels]
    }

    /// overwrite the active entries of one clique so they sum exactly to `energy`:
    /// every position gets `energy / k`, the first `energy % k` positions one more
    #[allow(clippy::unnecessary_cast)]
    pub fn rewrite_active(&mut self, clique: CliqueIndex, local_labels: &[Label], energy: Energy) {
        assert!(energy >= 0, "clique energies must be nonnegative, got {}", energy);
        let k = local_labels.len();
        let average = energy / k as Energy;
        let remainder = energy % k as Energy;
        for (position, &label) in local_labels.iter().enumerate() {
            let mut value = average;
            if (position as Energy) < remainder {
                // have to distribute the remainder to maintain the exact sum
                value += 1;
            }
            *self.value_mut(clique, position, label) = value;
        }
    }

    /// fresh duals for a labeling: zero everywhere except the active entries
    #[allow(clippy::unnecessary_cast)]
    pub fn initialize(&mut self, energy: &MultilabelEnergy, labels: &[Label]) {
        self.values.fill(0);
        let mut label_buf: Vec<Label> = Vec::with_capacity(K_MAX);
        for (clique_index, clique) in energy.cliques().iter().enumerate() {
            label_buf.clear();
            for &v in clique.nodes() {
                label_buf.push(labels[v as usize]);
            }
            let clique_energy = clique.energy(&label_buf);
            self.rewrite_active(clique_index as CliqueIndex, &label_buf, clique_energy);
        }
    }

    /// raw view of the whole arena, mainly for snapshots
    pub fn raw_values(&self) -> &[Energy] {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn three_clique_model() -> MultilabelEnergy {
        let mut energy = MultilabelEnergy::new(4, 3);
        energy.add_clique(Arc::new(PottsClique::new(vec![0, 1], 7)));
        energy.add_clique(Arc::new(RangeClique::new(vec![1, 2, 3], 2, 3)));
        energy
    }

    #[test]
    fn dual_table_layout() {  // cargo test dual_table_layout -- --nocapture
        let energy = three_clique_model();
        let mut dual = DualTable::new(&energy);
        assert_eq!(dual.raw_values().len(), 2 * 3 + 3 * 3);
        *dual.value_mut(0, 1, 2) = 5;
        assert_eq!(dual.value(0, 1, 2), 5);
        assert_eq!(dual.position_slice(0, 1), &[0, 0, 5]);
        assert_eq!(dual.value(1, 0, 0), 0);
    }

    #[test]
    fn dual_table_initialize_distributes_remainder() {  // cargo test dual_table_initialize_distributes_remainder -- --nocapture
        let energy = three_clique_model();
        let mut dual = DualTable::new(&energy);
        // labels [0,1,0,2]: Potts(0,1) = 7, Range(1,0,2) = 2 * (2-0) = 4
        let labels: Vec<Label> = vec![0, 1, 0, 2];
        dual.initialize(&energy, &labels);
        // 7 = 3 + 4 over two positions
        assert_eq!(dual.value(0, 0, 0), 4);
        assert_eq!(dual.value(0, 1, 1), 3);
        // 4 = 1 + 1 + 2 over three positions, remainder 1 to the first
        assert_eq!(dual.value(1, 0, 1), 2);
        assert_eq!(dual.value(1, 1, 0), 1);
        assert_eq!(dual.value(1, 2, 2), 1);
        // inactive entries untouched
        assert_eq!(dual.value(0, 0, 1), 0);
        assert_eq!(dual.value(1, 0, 0), 0);
    }

    #[test]
    fn dual_table_rewrite_active_only() {  // cargo test dual_table_rewrite_active_only -- --nocapture
        let energy = three_clique_model();
        let mut dual = DualTable::new(&energy);
        *dual.value_mut(0, 0, 2) = -9;
        dual.rewrite_active(0, &[0, 0], 5);
        assert_eq!(dual.value(0, 0, 0), 3);
        assert_eq!(dual.value(0, 1, 0), 2);
        // the inactive entry keeps whatever the move left there
        assert_eq!(dual.value(0, 0, 2), -9);
    }
}
