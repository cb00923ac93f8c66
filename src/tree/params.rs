//! Species parameters for the Weber & Penn parametric model
//!
//! Per-level arrays are indexed by branch order: 0 = trunk, 1..3 = successive
//! branch orders. Deeper stems read index 3 (see [`level`]). Angles are in
//! degrees; lengths are fractions of the overall tree scale or of the parent.

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::types::{Result, Vec3};
use crate::core::Error;

/// Number of per-level parameter slots
pub const LEVELS: usize = 4;

/// Clamp a stem depth to its parameter slot
pub fn level(depth: u32) -> usize {
    (depth as usize).min(LEVELS - 1)
}

/// Silhouette curves used for first-level branch length and pruning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeKind {
    #[default]
    Conical,
    Spherical,
    Hemispherical,
    Cylindrical,
    TaperedCylindrical,
    Flame,
    InverseConical,
    TendFlame,
    /// Custom pruning envelope defined by the `prune_*` parameters
    Envelope,
}

/// Species presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeSpecies {
    #[default]
    QuakingAspen,
    BlackTupelo,
    WeepingWillow,
}

impl TreeSpecies {
    pub const ALL: [TreeSpecies; 3] = [
        TreeSpecies::QuakingAspen,
        TreeSpecies::BlackTupelo,
        TreeSpecies::WeepingWillow,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TreeSpecies::QuakingAspen => "quaking_aspen",
            TreeSpecies::BlackTupelo => "black_tupelo",
            TreeSpecies::WeepingWillow => "weeping_willow",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "quaking_aspen" | "aspen" => Some(TreeSpecies::QuakingAspen),
            "black_tupelo" | "tupelo" => Some(TreeSpecies::BlackTupelo),
            "weeping_willow" | "willow" => Some(TreeSpecies::WeepingWillow),
            _ => None,
        }
    }
}

/// Parameters for skeleton generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeParams {
    /// Tree shape used for first-level branch lengths
    pub shape: ShapeKind,
    /// Overall tree scale in world units
    pub g_scale: f32,
    /// Variance of `g_scale`
    pub g_scale_v: f32,
    /// Number of branch orders including the trunk (1..=4)
    pub levels: u32,
    /// Trunk radius to length ratio
    pub ratio: f32,
    /// Exponent relating child radius to length ratio
    pub ratio_power: f32,
    /// Exponential trunk flare near the ground
    pub flare: f32,
    /// Trunk splits at the top of the bare base (negative = random up to |n|)
    pub base_splits: i32,
    /// Unbranched fraction at the base of each stem
    pub base_size: [f32; LEVELS],
    pub down_angle: [f32; LEVELS],
    /// Negative selects envelope-tracking down angles
    pub down_angle_v: [f32; LEVELS],
    /// Negative selects the alternating (reflective) rotation rule
    pub rotate: [f32; LEVELS],
    pub rotate_v: [f32; LEVELS],
    /// Child count per level; `branches[0]` is the trunk count. Negative = fan.
    pub branches: [f32; LEVELS],
    /// Branch distribution: > 1 whorled (branches per whorl), otherwise
    /// the alternating/opposite pair offset
    pub branch_dist: [f32; LEVELS],
    pub length: [f32; LEVELS],
    pub length_v: [f32; LEVELS],
    /// < 1 linear, 1..2 rounded tip, >= 2 periodic undulation
    pub taper: [f32; LEVELS],
    /// Expected clone splits per segment
    pub seg_splits: [f32; LEVELS],
    /// Negative selects direct spread mode
    pub split_angle: [f32; LEVELS],
    pub split_angle_v: [f32; LEVELS],
    /// Segments per stem
    pub curve_res: [u32; LEVELS],
    pub curve: [f32; LEVELS],
    pub curve_back: [f32; LEVELS],
    /// Negative selects helix mode with this pitch angle
    pub curve_v: [f32; LEVELS],
    /// Random left/right turn per stem
    pub bend_v: [f32; LEVELS],
    pub radius_mod: [f32; LEVELS],
    /// Leaves per deepest-level stem (negative = fan cluster of |n|)
    pub leaf_blos_num: f32,
    /// How many levels up from the deepest order also carry leaves
    pub leaf_distribution_levels: u32,
    /// Leaf share multiplier per level above the deepest
    pub leaf_level_falloff: f32,
    /// Directional growth bias
    pub tropism: Vec3,
    /// 0 disables pruning, 1 fits stems fully inside the envelope
    pub prune_ratio: f32,
    pub prune_width: f32,
    pub prune_width_peak: f32,
    pub prune_power_low: f32,
    pub prune_power_high: f32,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self::quaking_aspen()
    }
}

impl TreeParams {
    /// Quaking aspen: slender single trunk with a tend-flame crown
    pub fn quaking_aspen() -> Self {
        Self {
            shape: ShapeKind::TendFlame,
            g_scale: 13.0,
            g_scale_v: 3.0,
            levels: 3,
            ratio: 0.015,
            ratio_power: 1.2,
            flare: 0.6,
            base_splits: 0,
            base_size: [0.3, 0.02, 0.02, 0.02],
            down_angle: [0.0, 60.0, 45.0, 45.0],
            down_angle_v: [0.0, -50.0, 10.0, 10.0],
            rotate: [0.0, 140.0, 140.0, 77.0],
            rotate_v: [0.0, 0.0, 0.0, 0.0],
            branches: [1.0, 50.0, 30.0, 10.0],
            branch_dist: [0.0, 0.0, 0.0, 0.0],
            length: [1.0, 0.3, 0.6, 0.0],
            length_v: [0.0, 0.0, 0.0, 0.0],
            taper: [1.0, 1.0, 1.0, 1.0],
            seg_splits: [0.0, 0.0, 0.0, 0.0],
            split_angle: [40.0, 0.0, 0.0, 0.0],
            split_angle_v: [5.0, 0.0, 0.0, 0.0],
            curve_res: [5, 5, 3, 1],
            curve: [0.0, -40.0, -40.0, 0.0],
            curve_back: [0.0, 0.0, 0.0, 0.0],
            curve_v: [20.0, 50.0, 75.0, 0.0],
            bend_v: [0.0, 50.0, 0.0, 0.0],
            radius_mod: [1.0, 1.0, 1.0, 1.0],
            leaf_blos_num: 40.0,
            leaf_distribution_levels: 1,
            leaf_level_falloff: 0.3,
            tropism: Vec3::new(0.0, 0.0, 0.5),
            prune_ratio: 0.0,
            prune_width: 0.5,
            prune_width_peak: 0.5,
            prune_power_low: 0.5,
            prune_power_high: 0.5,
        }
    }

    /// Black tupelo: four branch orders with wandering twigs
    pub fn black_tupelo() -> Self {
        Self {
            shape: ShapeKind::TaperedCylindrical,
            g_scale: 23.0,
            g_scale_v: 5.0,
            levels: 4,
            ratio: 0.015,
            ratio_power: 1.3,
            flare: 1.0,
            base_splits: 0,
            base_size: [0.2, 0.0, 0.0, 0.0],
            down_angle: [0.0, 60.0, 30.0, 45.0],
            down_angle_v: [0.0, -40.0, 10.0, 10.0],
            rotate: [0.0, 140.0, 140.0, 140.0],
            rotate_v: [0.0, 0.0, 0.0, 0.0],
            branches: [1.0, 50.0, 25.0, 12.0],
            branch_dist: [0.0, 0.0, 0.0, 0.0],
            length: [1.0, 0.3, 0.6, 0.4],
            length_v: [0.0, 0.05, 0.1, 0.0],
            taper: [1.1, 1.0, 1.0, 1.0],
            seg_splits: [0.0, 0.0, 0.0, 0.0],
            split_angle: [0.0, 0.0, 0.0, 0.0],
            split_angle_v: [0.0, 0.0, 0.0, 0.0],
            curve_res: [10, 10, 10, 1],
            curve: [0.0, 0.0, -10.0, 0.0],
            curve_back: [0.0, 0.0, 0.0, 0.0],
            curve_v: [40.0, 90.0, 150.0, 0.0],
            bend_v: [0.0, 0.0, 0.0, 0.0],
            radius_mod: [1.0, 1.0, 1.0, 1.0],
            leaf_blos_num: 6.0,
            leaf_distribution_levels: 1,
            leaf_level_falloff: 0.3,
            tropism: Vec3::new(0.0, 0.0, 0.5),
            prune_ratio: 0.0,
            prune_width: 0.5,
            prune_width_peak: 0.5,
            prune_power_low: 0.5,
            prune_power_high: 0.5,
        }
    }

    /// Weeping willow: split trunk, drooping pruned crown
    pub fn weeping_willow() -> Self {
        Self {
            shape: ShapeKind::Cylindrical,
            g_scale: 15.0,
            g_scale_v: 5.0,
            levels: 4,
            ratio: 0.03,
            ratio_power: 2.0,
            flare: 0.75,
            base_splits: 2,
            base_size: [0.05, 0.3, 0.05, 0.05],
            down_angle: [0.0, 20.0, 30.0, 20.0],
            down_angle_v: [0.0, 10.0, 10.0, 10.0],
            rotate: [0.0, -120.0, -120.0, 140.0],
            rotate_v: [0.0, 30.0, 30.0, 0.0],
            branches: [1.0, 20.0, 10.0, 20.0],
            branch_dist: [0.0, 0.0, 0.0, 0.0],
            length: [0.8, 0.5, 1.5, 0.1],
            length_v: [0.0, 0.1, 0.0, 0.0],
            taper: [1.0, 1.0, 1.0, 1.0],
            seg_splits: [0.1, 0.2, 0.2, 0.0],
            split_angle: [3.0, 30.0, 45.0, 0.0],
            split_angle_v: [0.0, 10.0, 20.0, 0.0],
            curve_res: [8, 16, 12, 3],
            curve: [0.0, 40.0, 0.0, 0.0],
            curve_back: [20.0, 80.0, 0.0, 0.0],
            curve_v: [120.0, 90.0, 0.0, 0.0],
            bend_v: [0.0, 0.0, 0.0, 0.0],
            radius_mod: [1.0, 1.0, 1.0, 1.0],
            leaf_blos_num: 15.0,
            leaf_distribution_levels: 1,
            leaf_level_falloff: 0.3,
            tropism: Vec3::new(0.0, 0.0, -3.0),
            prune_ratio: 1.0,
            prune_width: 0.4,
            prune_width_peak: 0.6,
            prune_power_low: 0.001,
            prune_power_high: 0.5,
        }
    }

    /// Create params from a species preset
    pub fn from_species(species: TreeSpecies) -> Self {
        match species {
            TreeSpecies::QuakingAspen => Self::quaking_aspen(),
            TreeSpecies::BlackTupelo => Self::black_tupelo(),
            TreeSpecies::WeepingWillow => Self::weeping_willow(),
        }
    }

    /// Number of trunks (`branches[0]`, truncated)
    pub fn trunk_count(&self) -> u32 {
        self.branches[0].max(0.0) as u32
    }

    /// Deepest stem depth that is grown
    pub fn deepest_level(&self) -> u32 {
        self.levels.saturating_sub(1)
    }

    /// Reject parameter sets outside the algorithm's domain
    pub fn validate(&self) -> Result<()> {
        if self.levels == 0 || self.levels as usize > LEVELS {
            return Err(Error::config(format!(
                "levels must be within 1..={LEVELS}, got {}",
                self.levels
            )));
        }
        if !(self.g_scale > 0.0) {
            return Err(Error::config(format!("g_scale must be positive, got {}", self.g_scale)));
        }
        if let Some(b) = self.base_size.iter().find(|b| !(0.0..1.0).contains(*b)) {
            return Err(Error::config(format!("base_size entries must be within [0, 1), got {b}")));
        }
        if self.prune_ratio > 0.0 && !(self.prune_width_peak < 1.0) {
            return Err(Error::config(format!(
                "prune_width_peak must be below 1 when pruning, got {}",
                self.prune_width_peak
            )));
        }
        if !(0.0..=1.0).contains(&self.prune_ratio) {
            return Err(Error::config(format!(
                "prune_ratio must be within [0, 1], got {}",
                self.prune_ratio
            )));
        }
        Ok(())
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

    /// Load from a JSON file (sync). Missing fields fall back to the default species.
    pub fn load_sync(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            io::Error::new(e.kind(), format!("{}: {e}", path.display()))
        })?;
        Ok(serde_json::from_str(&json)?)
    }
}
