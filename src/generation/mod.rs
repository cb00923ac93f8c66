//! Batch skeleton generation.
//!
//! Each tree is grown by a strictly sequential walk; independent trees of a
//! batch are spread across the rayon pool.

pub mod config;

pub use config::GenerationConfig;

use std::time::Instant;

use rayon::prelude::*;

use crate::core::types::Result;
use crate::tree::{TreeGenerator, TreeParams, TreeSkeleton};

/// Generate `count` skeletons of one species.
///
/// Tree `i` uses `config.batch_seed(i)`, so results do not depend on the
/// thread count. Results come back in index order.
pub fn generate_batch(
    params: &TreeParams,
    config: &GenerationConfig,
    count: u64,
) -> Vec<Result<TreeSkeleton>> {
    let start = Instant::now();
    let results: Vec<_> = (0..count)
        .into_par_iter()
        .map(|i| {
            let tree_config = GenerationConfig {
                seed: config.batch_seed(i),
                ..config.clone()
            };
            TreeGenerator::with_config(params.clone(), tree_config).generate()
        })
        .collect();

    let elapsed = start.elapsed();
    log::info!("Generated {} skeletons in {:.2}s ({:.1} trees/sec)",
        results.len(), elapsed.as_secs_f64(),
        results.len() as f64 / elapsed.as_secs_f64().max(1e-9));

    results
}
