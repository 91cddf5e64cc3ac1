use super::rand_xoshiro;

cfg_if::cfg_if! {
    if #[cfg(feature="i32_energy")] {
        /// use i32 to store energies, for compatibility with flow solvers using c_int
        pub type Energy = i32;
    } else {
        pub type Energy = i64;
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature="u32_index")] {
        // use u32 to store indices, for less memory usage
        pub type NodeIndex = u32;  // a variable of the energy function
        pub type CliqueIndex = u32;
        pub type Label = u32;
    } else {
        pub type NodeIndex = usize;
        pub type CliqueIndex = usize;
        pub type Label = usize;
    }
}

/// an assignment to the binary variables of a clique, bit i set ⇔ local position i
/// takes its proposed label instead of its current label
pub type Assgn = u32;

/// maximum supported clique size; per-clique tables grow as `2^k`, so this is a hard
/// limit enforced at clique construction
pub const K_MAX: usize = 16;

/// fixed multiplier used when converting real-valued energies from upstream models
/// into the integer domain
pub const REAL_ENERGY_SCALE: Energy = 10_000;

/// scale a real-valued energy by a fixed multiplier and truncate toward zero;
/// the core only ever sees the resulting integers
pub fn energy_from_real(value: f64, scale: Energy) -> Energy {
    (value * scale as f64).trunc() as Energy
}

#[allow(dead_code)]
/// use Xoshiro256StarStar for deterministic random number generator
pub type DeterministicRng = rand_xoshiro::Xoshiro256StarStar;

/// iterate the bits set in an assignment, in increasing position order
pub fn iter_members(assgn: Assgn, size: usize) -> impl Iterator<Item = usize> {
    (0..size).filter(move |i| assgn & (1 << i) != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn util_energy_from_real() {  // cargo test util_energy_from_real -- --nocapture
        assert_eq!(energy_from_real(1.5, REAL_ENERGY_SCALE), 15_000);
        assert_eq!(energy_from_real(0.00001, REAL_ENERGY_SCALE), 0);
        assert_eq!(energy_from_real(-0.33, 100), -33);
    }

    #[test]
    fn util_iter_members() {  // cargo test util_iter_members -- --nocapture
        let members: Vec<usize> = iter_members(0b1011, 4).collect();
        assert_eq!(members, vec![0, 1, 3]);
        assert_eq!(iter_members(0, 4).count(), 0);
    }
}
