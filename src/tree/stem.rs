//! Stem and leaf records stored in the skeleton arena

use serde::{Deserialize, Serialize};

use crate::core::types::Vec3;
use crate::math::bezier::{point_on_segment, tangent_on_segment, BezierPoint};

/// Index of a stem in [`TreeSkeleton::stems`](super::skeleton::TreeSkeleton)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StemId(pub usize);

/// One stem: trunk, branch or clone
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stem {
    pub index: StemId,
    /// Branch order, 0 for trunks
    pub depth: u32,
    /// Stem this one grows out of (`None` for trunks)
    pub parent: Option<StemId>,
    /// Stem this one was split from, if it is a clone
    pub clone_of: Option<StemId>,
    /// Distance along the parent where this stem starts
    pub offset: f32,
    pub length: f32,
    /// Base radius before taper
    pub radius: f32,
    /// Ceiling inherited from the parent radius at the attachment point
    pub radius_limit: Option<f32>,
    /// Length multiplier applied to this stem's children
    pub length_child_max: f32,
    pub curve_points: Vec<BezierPoint>,
    /// Radius at each curve point
    pub radii: Vec<f32>,
    pub children: Vec<StemId>,
}

impl Stem {
    pub(crate) fn new(index: StemId, depth: u32, parent: Option<StemId>, offset: f32) -> Self {
        Self {
            index,
            depth,
            parent,
            clone_of: None,
            offset,
            length: 0.0,
            radius: 0.0,
            radius_limit: None,
            length_child_max: 0.0,
            curve_points: Vec::new(),
            radii: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn is_trunk(&self) -> bool {
        self.depth == 0 && self.clone_of.is_none()
    }

    pub fn is_clone(&self) -> bool {
        self.clone_of.is_some()
    }

    /// Base point of the first curve point
    pub fn base(&self) -> Option<Vec3> {
        self.curve_points.first().map(|p| p.co)
    }

    pub fn tip(&self) -> Option<Vec3> {
        self.curve_points.last().map(|p| p.co)
    }

    /// Widest recorded radius
    pub fn max_radius(&self) -> f32 {
        self.radii.iter().copied().fold(0.0, f32::max)
    }

    /// Sum of straight distances between consecutive curve points
    pub fn polyline_length(&self) -> f32 {
        self.curve_points
            .windows(2)
            .map(|w| w[0].co.distance(w[1].co))
            .sum()
    }

    /// Sample the curve at `t` in segment `seg` (0 = between points 0 and 1)
    pub fn sample(&self, seg: usize, t: f32) -> Option<(Vec3, Vec3)> {
        let start = self.curve_points.get(seg)?;
        let end = self.curve_points.get(seg + 1)?;
        Some((point_on_segment(t, start, end), tangent_on_segment(t, start, end)))
    }
}

/// Leaf anchor with its orientation frame
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeafPlacement {
    /// Stem carrying the leaf
    pub stem: StemId,
    pub position: Vec3,
    pub direction: Vec3,
    pub right: Vec3,
}
