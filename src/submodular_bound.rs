//! Submodular Bound Kit
//!
//! Integer-exact transforms of set functions represented as dense tables of size `2^k`,
//! indexed by [`Assgn`] bitmasks. These are the building blocks that turn the fusion
//! energy of a clique into the reduced submodular table handed to the flow solver:
//! upper-bound, zero-marginal projection, linear subtraction and normalization.
//!
//! Every operation here traverses subsets in a fixed order, so two runs on the same
//! input produce bit-identical output; the final labeling of the solver depends on it.
//!

use super::util::*;

/// check the submodularity inequality `g(S∪{i,j}) + g(S) ≤ g(S∪{i}) + g(S∪{j})`
/// for every base set and pair
pub fn is_submodular(size: usize, table: &[Energy]) -> bool {
    debug_assert_eq!(table.len(), 1 << size);
    let max_assgn: Assgn = 1 << size;
    for s in 0..max_assgn {
        for i in 0..size {
            let bit_i: Assgn = 1 << i;
            if s & bit_i != 0 {
                continue;
            }
            for j in (i + 1)..size {
                let bit_j: Assgn = 1 << j;
                if s & bit_j != 0 {
                    continue;
                }
                let s_i = (s | bit_i) as usize;
                let s_j = (s | bit_j) as usize;
                let s_ij = (s | bit_i | bit_j) as usize;
                if table[s_ij] + table[s as usize] > table[s_i] + table[s_j] {
                    return false;
                }
            }
        }
    }
    true
}

/// check `bound[S] ≥ table[S]` pointwise
pub fn is_upper_bound(size: usize, table: &[Energy], bound: &[Energy]) -> bool {
    debug_assert_eq!(table.len(), 1 << size);
    debug_assert_eq!(bound.len(), 1 << size);
    table.iter().zip(bound.iter()).all(|(f, g)| g >= f)
}

/// raise table entries until the function is submodular, never lowering any value.
///
/// Violated constraints are repaired by lifting the two middle sets `S∪{i}` and
/// `S∪{j}`, splitting the violation between them (odd remainder to the lower index).
/// A repair can re-violate constraints elsewhere, so passes repeat until a full scan
/// finds nothing to fix; subset order is ascending, pairs ordered by `(i, j)`.
/// The result is idempotent: an already submodular table is returned unchanged.
pub fn submodular_upper_bound(size: usize, table: &mut [Energy]) {
    debug_assert_eq!(table.len(), 1 << size);
    let max_assgn: Assgn = 1 << size;
    loop {
        let mut any_violated = false;
        for s in 0..max_assgn {
            for i in 0..size {
                let bit_i: Assgn = 1 << i;
                if s & bit_i != 0 {
                    continue;
                }
                for j in (i + 1)..size {
                    let bit_j: Assgn = 1 << j;
                    if s & bit_j != 0 {
                        continue;
                    }
                    let s_i = (s | bit_i) as usize;
                    let s_j = (s | bit_j) as usize;
                    let s_ij = (s | bit_i | bit_j) as usize;
                    let violation = table[s_ij] + table[s as usize] - table[s_i] - table[s_j];
                    if violation > 0 {
                        any_violated = true;
                        table[s_i] += (violation + 1) / 2;
                        table[s_j] += violation / 2;
                    }
                }
            }
        }
        if !any_violated {
            break;
        }
    }
    debug_assert!(is_submodular(size, table));
}

/// make every position in `frozen` marginally zero by propagating the value at
/// `S \ frozen` up to `S`: afterwards `g(S ∪ {i}) == g(S)` for every `i ∈ frozen`.
///
/// Positions are frozen when their proposed label equals their current label, so the
/// flow solver must see no incentive either way for them. Submodularity is preserved,
/// and so is the upper-bound property against the original fusion energy, because the
/// fusion labeling of `S` and `S \ frozen` is the same labeling.
pub fn zero_marginal_set(size: usize, table: &mut [Energy], frozen: Assgn) {
    debug_assert_eq!(table.len(), 1 << size);
    let max_assgn: Assgn = 1 << size;
    // ascending order: the source index S \ frozen has already been rewritten with itself
    for s in 0..max_assgn {
        table[s as usize] = table[(s & !frozen) as usize];
    }
}

/// in place `g(S) -= Σ_{i∈S} lambda_in[i] + Σ_{i∉S} lambda_out[i]`
pub fn subtract_linear(size: usize, table: &mut [Energy], lambda_in: &[Energy], lambda_out: &[Energy]) {
    debug_assert_eq!(table.len(), 1 << size);
    debug_assert_eq!(lambda_in.len(), size);
    debug_assert_eq!(lambda_out.len(), size);
    let max_assgn: Assgn = 1 << size;
    let sum_out: Energy = lambda_out.iter().sum();
    for s in 0..max_assgn {
        let mut subtracted = sum_out;
        for i in iter_members(s, size) {
            subtracted += lambda_in[i] - lambda_out[i];
        }
        table[s as usize] -= subtracted;
    }
}

/// shift a submodular table with `g(∅) = 0` into the nonnegative orthant by a modular
/// correction: `psi[i]` is the most negative marginal of position i (attained at the
/// full context by submodularity), and `g(S) += Σ_{i∈S} psi[i]` afterwards.
///
/// `g(∅)` stays 0, positions that are marginally zero get `psi[i] = 0`, and
/// `Σ psi[i]` is exactly what the caller must take out of its duals to keep the
/// reduced table consistent with them.
pub fn normalize(size: usize, table: &mut [Energy], psi: &mut Vec<Energy>) {
    debug_assert_eq!(table.len(), 1 << size);
    debug_assert!(is_submodular(size, table), "normalize requires a submodular table");
    let max_assgn: Assgn = 1 << size;
    let full = (max_assgn - 1) as usize;
    psi.clear();
    for i in 0..size {
        let bit: Assgn = 1 << i;
        let marginal = table[full] - table[full & !bit as usize];
        psi.push(std::cmp::max(0, -marginal));
    }
    for s in 0..max_assgn {
        let mut shift = 0;
        for i in iter_members(s, size) {
            shift += psi[i];
        }
        table[s as usize] += shift;
    }
    debug_assert_eq!(table[0], 0);
    debug_assert!(table.iter().all(|&g| g >= 0));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rand::Rng;
    use crate::rand_xoshiro::rand_core::SeedableRng;

    fn random_table(rng: &mut DeterministicRng, size: usize, max_value: Energy) -> Vec<Energy> {
        (0..(1usize << size)).map(|_| rng.gen_range(0..=max_value)).collect()
    }

    #[test]
    fn submodular_bound_upper_bound_properties() {  // cargo test submodular_bound_upper_bound_properties -- --nocapture
        let mut rng = DeterministicRng::seed_from_u64(12);
        for _ in 0..200 {
            let table = random_table(&mut rng, 4, 50);
            let mut bound = table.clone();
            submodular_upper_bound(4, &mut bound);
            assert!(is_submodular(4, &bound));
            assert!(is_upper_bound(4, &table, &bound));
            // idempotence
            let mut twice = bound.clone();
            submodular_upper_bound(4, &mut twice);
            assert_eq!(bound, twice);
        }
    }

    #[test]
    fn submodular_bound_upper_bound_keeps_submodular_input() {  // cargo test submodular_bound_upper_bound_keeps_submodular_input -- --nocapture
        // the pairwise cut function is already submodular and must come back unchanged
        let mut table: Vec<Energy> = vec![0, 1, 1, 0];
        let original = table.clone();
        submodular_upper_bound(2, &mut table);
        assert_eq!(table, original);
    }

    #[test]
    fn submodular_bound_zero_marginal_set() {  // cargo test submodular_bound_zero_marginal_set -- --nocapture
        let mut rng = DeterministicRng::seed_from_u64(34);
        for _ in 0..50 {
            let mut table = random_table(&mut rng, 4, 50);
            submodular_upper_bound(4, &mut table);
            let frozen: Assgn = rng.gen_range(0..16);
            let before = table.clone();
            zero_marginal_set(4, &mut table, frozen);
            assert!(is_submodular(4, &table));
            for s in 0..16u32 {
                for i in iter_members(frozen, 4) {
                    assert_eq!(table[(s | (1 << i)) as usize], table[(s & !(1u32 << i)) as usize]);
                }
                // unaffected on sets disjoint from the frozen positions
                if s & frozen == 0 {
                    assert_eq!(table[s as usize], before[s as usize]);
                }
            }
        }
    }

    #[test]
    fn submodular_bound_subtract_linear() {  // cargo test submodular_bound_subtract_linear -- --nocapture
        let mut table: Vec<Energy> = vec![10, 20, 30, 40];
        let lambda_in: Vec<Energy> = vec![1, 2];
        let lambda_out: Vec<Energy> = vec![3, 4];
        subtract_linear(2, &mut table, &lambda_in, &lambda_out);
        assert_eq!(table, vec![10 - 7, 20 - 5, 30 - 5, 40 - 3]);
    }

    #[test]
    fn submodular_bound_normalize_after_subtract() {  // cargo test submodular_bound_normalize_after_subtract -- --nocapture
        let mut rng = DeterministicRng::seed_from_u64(56);
        let mut psi: Vec<Energy> = vec![];
        for _ in 0..100 {
            let mut table = random_table(&mut rng, 4, 50);
            submodular_upper_bound(4, &mut table);
            // a linear subtraction that keeps the empty set at zero
            let lambda_out: Vec<Energy> = (0..4).map(|_| rng.gen_range(0..10)).collect();
            let lambda_in: Vec<Energy> = (0..4).map(|_| rng.gen_range(0..10)).collect();
            let base = table[0] - lambda_out.iter().sum::<Energy>();
            table.iter_mut().for_each(|g| *g -= base);
            subtract_linear(4, &mut table, &lambda_in, &lambda_out);
            assert_eq!(table[0], 0);
            normalize(4, &mut table, &mut psi);
            assert_eq!(table[0], 0);
            assert!(table.iter().all(|&g| g >= 0));
            assert!(psi.iter().all(|&p| p >= 0));
            assert!(is_submodular(4, &table));
        }
    }

    #[test]
    fn submodular_bound_normalize_zero_marginal_untouched() {  // cargo test submodular_bound_normalize_zero_marginal_untouched -- --nocapture
        let mut rng = DeterministicRng::seed_from_u64(78);
        let mut psi: Vec<Energy> = vec![];
        for _ in 0..50 {
            let mut table = random_table(&mut rng, 4, 30);
            submodular_upper_bound(4, &mut table);
            let frozen: Assgn = 0b0101;
            zero_marginal_set(4, &mut table, frozen);
            let shift = table[0];
            table.iter_mut().for_each(|g| *g -= shift);
            normalize(4, &mut table, &mut psi);
            // frozen positions must not leak into the caller's duals
            assert_eq!(psi[0], 0);
            assert_eq!(psi[2], 0);
        }
    }
}
