//! Output aggregate handed to mesh builders

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::types::Result;
use crate::math::Aabb;
use super::params::TreeParams;
use super::stem::{LeafPlacement, Stem, StemId};

/// Counters collected while growing a skeleton
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationStats {
    /// Speculative walks run by the pruning fit loop
    pub prune_tests: u32,
    /// Times a stem was shortened by the fit loop
    pub prune_shrinks: u32,
    /// Stems dropped because they never fit the envelope
    pub abandoned: u32,
    /// Clone stems spawned by splits
    pub clones: u32,
    /// Random values drawn, speculative draws included
    pub rng_draws: u64,
}

/// Complete stem/leaf skeleton of one tree.
///
/// Stems are stored in creation order and `stems[i].index == StemId(i)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TreeSkeleton {
    pub stems: Vec<Stem>,
    pub leaves: Vec<LeafPlacement>,
    pub params: TreeParams,
    pub seed: u64,
    /// Overall tree scale after variance
    pub scale: f32,
    pub trunk_length: f32,
    /// Unbranched length at the bottom of the trunk
    pub base_length: f32,
    pub stats: GenerationStats,
}

impl TreeSkeleton {
    pub fn stem(&self, id: StemId) -> Option<&Stem> {
        self.stems.get(id.0)
    }

    /// Depth-0 stems that are not clones
    pub fn trunks(&self) -> impl Iterator<Item = &Stem> {
        self.stems.iter().filter(|s| s.is_trunk())
    }

    pub fn stems_at_depth(&self, depth: u32) -> impl Iterator<Item = &Stem> {
        self.stems.iter().filter(move |s| s.depth == depth)
    }

    pub fn children_of(&self, id: StemId) -> impl Iterator<Item = &Stem> {
        self.stem(id)
            .into_iter()
            .flat_map(|s| s.children.iter())
            .filter_map(|c| self.stem(*c))
    }

    pub fn parent_of(&self, id: StemId) -> Option<&Stem> {
        self.stem(id)?.parent.and_then(|p| self.stem(p))
    }

    /// Bounds of every curve point and leaf, padded by the widest radius
    pub fn bounds(&self) -> Aabb {
        let points = self
            .stems
            .iter()
            .flat_map(|s| s.curve_points.iter().map(|p| p.co))
            .chain(self.leaves.iter().map(|l| l.position));
        let widest = self.stems.iter().map(Stem::max_radius).fold(0.0, f32::max);
        Aabb::from_points(points).padded(widest)
    }

    pub fn curve_point_count(&self) -> usize {
        self.stems.iter().map(|s| s.curve_points.len()).sum()
    }

    /// Save to file as pretty JSON (sync)
    pub fn save_sync(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load from a JSON file (sync)
    pub fn load_sync(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            io::Error::new(e.kind(), format!("{}: {e}", path.display()))
        })?;
        Ok(serde_json::from_str(&json)?)
    }
}
