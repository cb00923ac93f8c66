//! Generation configuration shared by the skeleton generator and batch runs.

/// Configuration for a skeleton generation run.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationConfig {
    /// Random seed for every stochastic decision of the tree.
    pub seed: u64,
    /// Schedule leaf placements (stems are grown either way).
    pub generate_leaves: bool,
    /// Candidate draws allowed when spacing multiple trunks before giving up.
    pub max_floor_attempts: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            seed: 12345,
            generate_leaves: true,
            max_floor_attempts: 10_000,
        }
    }
}

impl GenerationConfig {
    /// Default configuration with the given seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            ..Default::default()
        }
    }

    /// Seed for the `index`-th tree of a batch started from `self.seed`.
    pub fn batch_seed(&self, index: u64) -> u64 {
        self.seed.wrapping_add(index).wrapping_mul(0x517cc1b727220a95)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GenerationConfig::default();
        assert_eq!(config.seed, 12345);
        assert!(config.generate_leaves);
        assert!(config.max_floor_attempts > 0);
    }

    #[test]
    fn test_batch_seeds_distinct() {
        let config = GenerationConfig::with_seed(42);
        let seeds: Vec<u64> = (0..16).map(|i| config.batch_seed(i)).collect();
        for (i, a) in seeds.iter().enumerate() {
            for b in &seeds[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
