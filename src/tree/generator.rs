//! Weber & Penn skeleton generator
//!
//! [`TreeGenerator`] places the trunks, then grows every stem with a
//! recursive turtle walk. Stems live in a flat arena and refer to each other
//! by [`StemId`].
//!
//! Every stem draws from its own random stream. Children and clones grow on
//! streams split off the parent's, so a stem's own draws never depend on
//! what its children consume. The pruning test walk is the only speculative
//! step; it runs against a snapshot that is restored afterwards.

use std::f32::consts::TAU;

use log::{debug, trace, warn};

use crate::core::types::{Result, Vec3};
use crate::core::Error;
use crate::generation::GenerationConfig;
use crate::math::bezier::{helix_points, point_on_segment, tangent_on_segment, BezierPoint, HelixPoints};
use crate::math::Turtle;
use super::formulas::{self, ParentDims};
use super::params::{level, TreeParams, TreeSpecies, LEVELS};
use super::rng::{RngSnapshot, TreeRng};
use super::shape::point_inside_envelope;
use super::skeleton::{GenerationStats, TreeSkeleton};
use super::stem::{LeafPlacement, Stem, StemId};

/// Stems whose radius limit is below this are not grown
const MIN_RADIUS_LIMIT: f32 = 1e-4;
/// Length multiplier after a failed envelope test
const PRUNE_SHRINK: f32 = 0.9;
/// Fraction of the starting length where the fit loop gives up
const PRUNE_FLOOR: f32 = 0.15;
/// Minimum separation between trunks, in estimated trunk radii
const TRUNK_SPACING: f32 = 2.5;

/// Emit the integer part of `value + carry`, keeping the remainder in `carry`
pub(super) fn floyd_steinberg(carry: &mut f32, value: f32) -> u32 {
    let count = (value + *carry).trunc().max(0.0);
    *carry -= count - value;
    count as u32
}

/// Curve points per segment of a subdivided stem
fn max_points(res: f32) -> usize {
    (100.0 / res).max(1.0).ceil() as usize
}

/// Advance the turtle to segment `seg` and build its curve point.
///
/// The first point of a clone takes its tangent from the pre-split turtle.
fn advance(
    turtle: &mut Turtle,
    helix: Option<&HelixPoints>,
    seg: u32,
    start: u32,
    cloned: Option<&Turtle>,
    seg_length: f32,
    handle_len: f32,
) -> BezierPoint {
    if let Some(helix) = helix {
        let point = helix.anchor(seg, turtle.pos);
        *turtle = Turtle::new(point.co, point.handle_right - point.co, turtle.right);
        return point;
    }
    if seg != start {
        turtle.forward(seg_length);
    }
    let tangent = match cloned {
        Some(pre_split) if seg == start => pre_split.dir,
        _ => turtle.dir,
    };
    BezierPoint::with_tangent(turtle.pos, tangent, handle_len)
}

/// Rounding carry per depth level
#[derive(Clone, Debug, Default, PartialEq)]
pub(super) struct ErrorAccumulators {
    pub split: [f32; LEVELS],
    pub branch: [f32; LEVELS],
    pub leaf: [f32; LEVELS],
    pub whorl: [f32; LEVELS],
}

/// Everything a speculative walk may disturb
struct GrowthSnapshot {
    rng: RngSnapshot,
    errors: ErrorAccumulators,
}

/// Per-call growth inputs carried into clones
#[derive(Clone, Copy, Debug, PartialEq)]
pub(super) struct GrowthState {
    /// First segment to grow (non-zero for clones)
    pub start: u32,
    /// Pitch correction carried over from the last split
    pub split_corr_angle: f32,
    /// Branch count dampening after splits
    pub branch_factor: f32,
    pub clone_prob: f32,
}

impl GrowthState {
    pub fn fresh() -> Self {
        Self {
            start: 0,
            split_corr_angle: 0.0,
            branch_factor: 1.0,
            clone_prob: 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct SplitDecision {
    count: u32,
    /// Trunk split at the top of the bare base
    base: bool,
}

impl SplitDecision {
    const NONE: Self = Self { count: 0, base: false };
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct SplitAngles {
    /// Horizontal spread between the forks
    spread: f32,
    /// Pitch shared by the forks
    pitch: f32,
    /// Pitch correction per remaining segment
    corr: f32,
    /// Configured spread instead of the declination-derived one
    direct: bool,
}

impl SplitAngles {
    /// Turn the continuing stem after its clones have been spawned
    fn apply_to_stem(&self, turtle: &mut Turtle, split: SplitDecision) {
        turtle.pitch_down(self.pitch / 2.0);
        if !split.base && split.count == 1 {
            if self.direct {
                turtle.turn_right(self.spread / 2.0);
            } else {
                turtle.rotate_frame(Vec3::Z, -self.spread / 2.0);
            }
        }
    }
}

/// Mutable state of one generation run
pub(super) struct Growth<'a> {
    pub params: &'a TreeParams,
    pub config: &'a GenerationConfig,
    pub rng: TreeRng,
    pub stems: Vec<Stem>,
    pub leaves: Vec<LeafPlacement>,
    pub errors: ErrorAccumulators,
    pub scale: f32,
    pub trunk_length: f32,
    pub base_length: f32,
    pub stats: GenerationStats,
}

impl<'a> Growth<'a> {
    fn new(params: &'a TreeParams, config: &'a GenerationConfig) -> Self {
        Self {
            params,
            config,
            rng: TreeRng::new(config.seed),
            stems: Vec::new(),
            leaves: Vec::new(),
            errors: ErrorAccumulators::default(),
            scale: 0.0,
            trunk_length: 0.0,
            base_length: 0.0,
            stats: GenerationStats::default(),
        }
    }

    fn snapshot(&self) -> GrowthSnapshot {
        GrowthSnapshot {
            rng: self.rng.snapshot(),
            errors: self.errors.clone(),
        }
    }

    fn restore(&mut self, snapshot: &GrowthSnapshot) {
        self.rng.restore(&snapshot.rng);
        self.errors = snapshot.errors.clone();
    }

    /// Run `f` with `stream` as the current random stream, then switch back
    pub fn on_stream<T>(&mut self, stream: TreeRng, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let outer = std::mem::replace(&mut self.rng, stream);
        let result = f(self);
        let inner = std::mem::replace(&mut self.rng, outer);
        self.stats.rng_draws += inner.draws();
        result
    }

    pub fn push_stem(&mut self, depth: u32, parent: Option<StemId>, offset: f32) -> StemId {
        let id = StemId(self.stems.len());
        self.stems.push(Stem::new(id, depth, parent, offset));
        id
    }

    /// Register a grown stem with its parent, or drop it if it has no geometry
    pub fn attach(&mut self, id: StemId) {
        let stem = &self.stems[id.0];
        if stem.curve_points.is_empty() && id.0 + 1 == self.stems.len() {
            self.stems.pop();
            return;
        }
        if let Some(parent) = stem.parent {
            self.stems[parent.0].children.push(id);
        }
    }

    pub fn parent_dims(&self, id: StemId) -> ParentDims {
        let stem = &self.stems[id.0];
        ParentDims {
            length: stem.length,
            radius: stem.radius,
            length_child_max: stem.length_child_max,
        }
    }

    /// Tropism for a stem; the lowest two orders only feel the horizontal part
    fn tropism_for(&self, depth: u32) -> Vec3 {
        let t = self.params.tropism;
        if depth > 1 { t } else { Vec3::new(t.x, t.y, 0.0) }
    }

    fn inside_envelope(&self, point: Vec3) -> bool {
        let p = self.params;
        point_inside_envelope(point, self.scale, p.base_size[0], p.prune_width, p)
    }

    /// Base turtles for every trunk, spaced by rejection sampling
    fn place_trunks(&mut self) -> Result<Vec<Turtle>> {
        let p = self.params;
        let count = p.trunk_count().max(1) as usize;
        if count == 1 {
            return Ok(vec![Turtle::default()]);
        }

        let trunk_radius = self.scale * p.length[0] * p.ratio * p.radius_mod[0];
        let min_distance = TRUNK_SPACING * trunk_radius;
        let spread = TRUNK_SPACING * (count as f32).sqrt() * self.scale * p.ratio;

        let mut accepted: Vec<Vec3> = Vec::with_capacity(count);
        let mut attempts = 0u32;
        while accepted.len() < count {
            if attempts >= self.config.max_floor_attempts {
                return Err(Error::config(format!(
                    "floor split placed {} of {count} trunks in {attempts} attempts",
                    accepted.len()
                )));
            }
            attempts += 1;
            let r = spread * self.rng.random().sqrt();
            let theta = self.rng.uniform(0.0, TAU);
            let candidate = Vec3::new(r * theta.cos(), r * theta.sin(), 0.0);
            if accepted.iter().all(|p| p.distance(candidate) > min_distance) {
                accepted.push(candidate);
            }
        }
        debug!("Placed {count} trunks in {attempts} attempts");

        Ok(accepted
            .into_iter()
            .map(|pos| {
                let mut turtle = Turtle::default();
                turtle.pos = pos;
                turtle.roll_right(pos.y.atan2(pos.x).to_degrees() - 90.0);
                turtle
            })
            .collect())
    }

    /// Grow stem `id` from `turtle`.
    ///
    /// `pos_corr` pulls the origin back inside the parent surface and
    /// `cloned` is the pre-split turtle whose direction shapes the first
    /// handle of a clone.
    pub fn make_stem(
        &mut self,
        mut turtle: Turtle,
        id: StemId,
        mut state: GrowthState,
        pos_corr: Option<Turtle>,
        cloned: Option<Turtle>,
    ) -> Result<()> {
        let p = self.params;
        let (depth, offset, radius_limit, parent) = {
            let stem = &self.stems[id.0];
            (stem.depth, stem.offset, stem.radius_limit, stem.parent)
        };
        if radius_limit.is_some_and(|limit| limit < MIN_RADIUS_LIMIT) {
            return Ok(());
        }
        let d = level(depth);
        let parent_dims = parent.map(|pid| self.parent_dims(pid));

        if state.start == 0 {
            let length_child_max = formulas::length_child_max(p, depth, &mut self.rng);
            let length = match parent_dims {
                None => formulas::trunk_length(p, self.scale, &mut self.rng),
                Some(dims) => formulas::child_length(p, depth, dims, offset, self.base_length),
            };
            let radius = formulas::stem_radius(p, depth, length, parent_dims, radius_limit);
            let stem = &mut self.stems[id.0];
            stem.length_child_max = length_child_max;
            stem.length = length;
            stem.radius = radius;
            if depth == 0 {
                self.trunk_length = length;
                self.base_length = length * p.base_size[0];
            }
        }

        if let Some(mut corr) = pos_corr {
            let radius = self.stems[id.0].radius;
            corr.forward(-radius_limit.map_or(radius, |limit| radius.min(limit)));
            turtle.pos = corr.pos;
        }

        let res = p.curve_res[d];
        if res == 0 {
            let stem = &mut self.stems[id.0];
            let radius = formulas::radius_at_offset(p, depth, stem.radius, stem.length, 0.0);
            stem.curve_points.push(BezierPoint::at(turtle.pos));
            stem.radii.push(radius);
            return Ok(());
        }

        // Drawn ahead of the fit loop so the test walk replays the main walk
        let (mut rotation, jitter) = self.opening_draws(depth, parent.is_none());

        if state.start == 0 && p.prune_ratio > 0.0 {
            match self.fit_to_envelope(&turtle, id, state)? {
                Some(length) => {
                    let radius = formulas::stem_radius(p, depth, length, parent_dims, radius_limit);
                    let stem = &mut self.stems[id.0];
                    stem.length = length;
                    stem.radius = radius;
                }
                None => {
                    self.stats.abandoned += 1;
                    warn!("Stem {} at depth {depth} never fit the pruning envelope", id.0);
                    return Ok(());
                }
            }
        }

        let (length, radius) = {
            let stem = &self.stems[id.0];
            (stem.length, stem.radius)
        };
        let res_f = res as f32;
        let seg_length = length / res_f;
        let handle_len = length / (res_f * 3.0);
        let base_seg_ind = (p.base_size[0] * p.curve_res[0] as f32).ceil() as u32;
        let max_points = max_points(res_f);
        let points_per_seg = self.points_per_seg(depth, res_f);

        let start_frac = 1.0 - state.start as f32 / res_f;
        let grows_children = length > 0.0;
        let mut branch_count = if grows_children && depth < p.deepest_level() {
            formulas::branch_count(p, depth, length, offset, parent_dims, jitter)
                * start_frac
                * state.branch_factor
        } else {
            0.0
        };
        let leaf_count = self.leaf_share(depth, length, parent_dims) * start_frac;

        let helix = if p.curve_v[d] < 0.0 {
            Some(self.helix_setup(&mut turtle, depth, length, res_f))
        } else {
            None
        };

        for seg in state.start..=res {
            let remaining = (res + 1 - seg) as f32;
            let point = advance(&mut turtle, helix.as_ref(), seg, state.start, cloned.as_ref(), seg_length, handle_len);
            let point_radius = formulas::radius_at_offset(p, depth, radius, length, seg as f32 / res_f);
            let stem = &mut self.stems[id.0];
            stem.curve_points.push(point);
            stem.radii.push(point_radius);

            if seg == state.start {
                continue;
            }

            let split = if helix.is_none() {
                self.split_count(depth, seg, res, base_seg_ind, state.clone_prob)
            } else {
                SplitDecision::NONE
            };
            if split.count > 0 {
                let divisor = (split.count + 1) as f32;
                state.clone_prob /= divisor;
                state.branch_factor = (state.branch_factor / divisor).max(0.8);
                branch_count *= state.branch_factor;
            }

            if grows_children {
                let stream = self.rng.derive(((id.0 as u64) << 32) | seg as u64);
                self.on_stream(stream, |g| {
                    g.schedule_segment(&turtle, id, seg, branch_count, leaf_count, &mut rotation)
                })?;
            }

            if helix.is_none() {
                if split.count > 0 {
                    let angles = self.split_angles(&turtle, depth, remaining);
                    state.split_corr_angle = angles.corr;
                    let pre_split = turtle;
                    let clones = self.spawn_clones(&pre_split, depth, split, angles)?;
                    self.make_clones(&pre_split, id, seg, clones, state)?;
                    angles.apply_to_stem(&mut turtle, split);
                } else {
                    self.bend(&mut turtle, depth, seg, res_f, state.split_corr_angle);
                }
                turtle.apply_tropism(self.tropism_for(depth));
            }

            if points_per_seg > 2 {
                self.subdivide_last_segment(id, seg, res_f, points_per_seg);
            }
        }

        if points_per_seg > 2 {
            let factor = 1.0 / max_points as f32;
            for point in &mut self.stems[id.0].curve_points {
                point.scale_handles(factor);
            }
        }
        Ok(())
    }

    /// Shrink a fresh stem until its test walk stays inside the envelope.
    ///
    /// Returns the blended length, or `None` when the stem is abandoned.
    /// The random stream and rounding carries are restored either way.
    fn fit_to_envelope(&mut self, turtle: &Turtle, id: StemId, state: GrowthState) -> Result<Option<f32>> {
        let (depth, start_length) = {
            let stem = &self.stems[id.0];
            (stem.depth, stem.length)
        };
        if start_length <= 0.0 {
            return Ok(Some(start_length));
        }

        let snapshot = self.snapshot();
        let mut length = start_length;
        loop {
            self.stats.prune_tests += 1;
            let inside = self.test_stem(*turtle, depth, length, state, None);
            self.restore(&snapshot);
            if inside? {
                break;
            }
            length *= PRUNE_SHRINK;
            self.stats.prune_shrinks += 1;
            trace!("Stem {} left the envelope, retrying at length {length:.3}", id.0);
            if length < PRUNE_FLOOR * start_length {
                if self.params.prune_ratio < 1.0 {
                    length = 0.0;
                    break;
                }
                return Ok(None);
            }
        }

        let ratio = self.params.prune_ratio;
        Ok(Some(start_length * (1.0 - ratio) + length * ratio))
    }

    /// Replay the turtle walk of a stem and its clones without recording
    /// anything.
    ///
    /// Consumes exactly the draws and split carries the main walk consumes,
    /// so a passing length reproduces the tested path. Points between
    /// segment ends are checked too when the stem is subdivided.
    fn test_stem(
        &mut self,
        mut turtle: Turtle,
        depth: u32,
        length: f32,
        mut state: GrowthState,
        cloned: Option<Turtle>,
    ) -> Result<bool> {
        let p = self.params;
        let d = level(depth);
        let res = p.curve_res[d];
        let res_f = res as f32;
        let seg_length = length / res_f;
        let handle_len = length / (res_f * 3.0);
        let base_seg_ind = (p.base_size[0] * p.curve_res[0] as f32).ceil() as u32;
        let points_per_seg = self.points_per_seg(depth, res_f);

        let helix = if p.curve_v[d] < 0.0 {
            Some(self.helix_setup(&mut turtle, depth, length, res_f))
        } else {
            None
        };

        let mut prev: Option<BezierPoint> = None;
        for seg in state.start..=res {
            let remaining = (res + 1 - seg) as f32;
            let point = advance(&mut turtle, helix.as_ref(), seg, state.start, cloned.as_ref(), seg_length, handle_len);
            let last = prev.replace(point);
            let Some(last) = last else {
                continue;
            };
            if !self.segment_inside(&last, &point, points_per_seg) {
                return Ok(false);
            }
            if helix.is_some() {
                continue;
            }

            let split = self.split_count(depth, seg, res, base_seg_ind, state.clone_prob);
            if split.count > 0 {
                state.clone_prob /= (split.count + 1) as f32;
                let angles = self.split_angles(&turtle, depth, remaining);
                state.split_corr_angle = angles.corr;
                let pre_split = turtle;
                let clone_state = GrowthState { start: seg, ..state };
                for (clone_turtle, stream) in self.spawn_clones(&pre_split, depth, split, angles)? {
                    let inside = self.on_stream(stream, |g| {
                        g.opening_draws(depth, depth == 0);
                        g.test_stem(clone_turtle, depth, length, clone_state, Some(pre_split))
                    })?;
                    if !inside {
                        return Ok(false);
                    }
                }
                angles.apply_to_stem(&mut turtle, split);
            } else {
                self.bend(&mut turtle, depth, seg, res_f, state.split_corr_angle);
            }
            turtle.apply_tropism(self.tropism_for(depth));
        }
        Ok(true)
    }

    /// Whether the end of a segment, and the points subdivision would add
    /// before it, lie inside the envelope
    fn segment_inside(&self, start: &BezierPoint, end: &BezierPoint, points_per_seg: usize) -> bool {
        let steps = (points_per_seg - 1) as f32;
        (1..points_per_seg.saturating_sub(1))
            .map(|k| point_on_segment(k as f32 / steps, start, end))
            .chain(std::iter::once(end.co))
            .all(|point| self.inside_envelope(point))
    }

    /// Starting roll for children, and the branch count jitter of trunks
    fn opening_draws(&mut self, depth: u32, root: bool) -> (f32, f32) {
        let rotation = if self.params.rotate[level(depth + 1)] >= 0.0 {
            self.rng.uniform(0.0, 360.0)
        } else {
            1.0
        };
        let jitter = if root { self.rng.uniform(0.9, 1.1) } else { 1.0 };
        (rotation, jitter)
    }

    /// Curve points per segment once subdivided, 2 when not subdivided
    fn points_per_seg(&self, depth: u32, res: f32) -> usize {
        if depth == 0 || self.params.taper[level(depth)] > 1.0 {
            max_points(res)
        } else {
            2
        }
    }

    /// Pick helix pitch and radius, then build its control vectors
    fn helix_setup(&mut self, turtle: &mut Turtle, depth: u32, length: f32, res: f32) -> HelixPoints {
        let p = self.params;
        let angle = (90.0 - p.curve_v[level(depth)].abs()).max(1.0);
        let tan_angle = angle.to_radians().tan();
        let pitch = 2.0 * length / res * self.rng.uniform(0.8, 1.2);
        let radius = 3.0 * pitch / (16.0 * tan_angle) * self.rng.uniform(0.8, 1.2);
        turtle.apply_tropism(self.tropism_for(depth));
        let spin = self.rng.uniform(0.0, TAU);
        helix_points(turtle, radius, pitch, spin)
    }

    fn split_count(
        &mut self,
        depth: u32,
        seg: u32,
        res: u32,
        base_seg_ind: u32,
        clone_prob: f32,
    ) -> SplitDecision {
        let p = self.params;
        let d = level(depth);
        if depth == 0 && p.base_splits != 0 && seg == base_seg_ind {
            let count = if p.base_splits < 0 {
                (self.rng.random() * (p.base_splits.unsigned_abs() as f32 + 0.5)) as u32
            } else {
                p.base_splits as u32
            };
            return SplitDecision { count, base: true };
        }

        let seg_splits = p.seg_splits[d];
        if seg_splits > 0.0
            && seg < res
            && (depth > 0 || seg > base_seg_ind)
            && self.rng.random() <= clone_prob
        {
            let count = floyd_steinberg(&mut self.errors.split[d], seg_splits);
            return SplitDecision { count, base: false };
        }
        SplitDecision::NONE
    }

    fn split_angles(&mut self, turtle: &Turtle, depth: u32, remaining: f32) -> SplitAngles {
        let d = level(depth);
        let angle = self.params.split_angle[d];
        let variance = self.params.split_angle_v[d];
        if angle < 0.0 {
            return SplitAngles {
                spread: angle.abs() + self.rng.signed() * variance,
                pitch: 0.0,
                corr: 0.0,
                direct: true,
            };
        }

        let declination = turtle.declination();
        let pitch = (angle + self.rng.signed() * variance - declination).max(0.0);
        let spread = -(20.0 + 0.75 * (30.0 + (declination - 90.0).abs() * self.rng.random().powi(2)));
        SplitAngles {
            spread,
            pitch,
            corr: pitch / remaining,
            direct: false,
        }
    }

    /// Random bend plus the per-segment curvature
    fn bend(&mut self, turtle: &mut Turtle, depth: u32, seg: u32, res: f32, split_corr_angle: f32) {
        let bend_v = self.params.bend_v[level(depth)];
        turtle.turn_left(self.rng.signed() * bend_v / res);
        let curve = formulas::curve_angle(self.params, depth, seg, &mut self.rng);
        turtle.pitch_down(curve - split_corr_angle);
    }

    /// Frames and random streams for the clones of a split
    fn spawn_clones(
        &mut self,
        turtle: &Turtle,
        depth: u32,
        split: SplitDecision,
        angles: SplitAngles,
    ) -> Result<Vec<(Turtle, TreeRng)>> {
        if angles.direct && !split.base && split.count > 2 {
            return Err(Error::config(format!(
                "direct split angles support at most 3 branches, got {}",
                split.count + 1
            )));
        }
        let split_v = self.params.split_angle_v[level(depth)];

        let mut clones = Vec::with_capacity(split.count as usize);
        for i in 0..split.count {
            let mut clone_turtle = *turtle;
            clone_turtle.pitch_down(angles.pitch / 2.0);
            if split.base && !angles.direct {
                let spread = (i + 1) as f32 * 360.0 / (split.count + 1) as f32 + self.rng.signed() * split_v;
                clone_turtle.rotate_frame(Vec3::Z, spread);
            } else {
                let side = if i % 2 == 0 { 1.0 } else { -1.0 };
                let spread = side * angles.spread * (1 + i / 2) as f32;
                if angles.direct {
                    clone_turtle.turn_left(spread / 2.0);
                } else {
                    clone_turtle.rotate_frame(Vec3::Z, spread / 2.0);
                }
            }
            clones.push((clone_turtle, self.rng.fork()));
        }
        Ok(clones)
    }

    /// Grow the clones of stem `origin` from segment `seg` onwards
    fn make_clones(
        &mut self,
        pre_split: &Turtle,
        origin: StemId,
        seg: u32,
        clones: Vec<(Turtle, TreeRng)>,
        state: GrowthState,
    ) -> Result<()> {
        let (depth, parent, offset, length, radius, radius_limit, length_child_max) = {
            let stem = &self.stems[origin.0];
            (stem.depth, stem.parent, stem.offset, stem.length, stem.radius, stem.radius_limit, stem.length_child_max)
        };

        for (clone_turtle, stream) in clones {
            let id = self.push_stem(depth, parent, offset);
            let clone = &mut self.stems[id.0];
            clone.clone_of = Some(origin);
            clone.length = length;
            clone.radius = radius;
            clone.radius_limit = radius_limit;
            clone.length_child_max = length_child_max;
            self.stats.clones += 1;

            let clone_state = GrowthState { start: seg, ..state };
            self.on_stream(stream, |g| {
                g.make_stem(clone_turtle, id, clone_state, None, Some(*pre_split))
            })?;
            self.attach(id);
        }
        Ok(())
    }

    /// Replace the last segment with `points_per_seg - 1` shorter ones
    fn subdivide_last_segment(&mut self, id: StemId, seg: u32, res: f32, points_per_seg: usize) {
        let p = self.params;
        let stem = &mut self.stems[id.0];
        let n = stem.curve_points.len();
        if n < 2 {
            return;
        }
        let start = stem.curve_points[n - 2];
        let (Some(end), Some(end_radius)) = (stem.curve_points.pop(), stem.radii.pop()) else {
            return;
        };

        let handle_len = (end.handle_left - end.co).length();
        let steps = (points_per_seg - 1) as f32;
        for k in 1..points_per_seg - 1 {
            let t = k as f32 / steps;
            let co = point_on_segment(t, &start, &end);
            let tangent = tangent_on_segment(t, &start, &end)
                .try_normalize()
                .unwrap_or(Vec3::Z);
            stem.curve_points.push(BezierPoint::with_tangent(co, tangent, handle_len));
            let z1 = (t + seg as f32 - 1.0) / res;
            stem.radii.push(formulas::radius_at_offset(p, stem.depth, stem.radius, stem.length, z1));
        }
        stem.curve_points.push(end);
        stem.radii.push(end_radius);
    }

    /// Expected leaves on a stem, zero when leaves are gated off
    fn leaf_share(&self, depth: u32, length: f32, parent: Option<ParentDims>) -> f32 {
        let p = self.params;
        if !self.config.generate_leaves || depth == 0 || p.leaf_blos_num == 0.0 || length <= 0.0 {
            return 0.0;
        }
        let Some(parent) = parent else {
            return 0.0;
        };
        let from_deepest = p.deepest_level().saturating_sub(depth);
        if from_deepest >= p.leaf_distribution_levels {
            return 0.0;
        }
        formulas::leaf_count(p, self.scale, length, parent) * p.leaf_level_falloff.powi(from_deepest as i32)
    }

    fn finish(self) -> TreeSkeleton {
        let mut stats = self.stats;
        stats.rng_draws += self.rng.draws();
        debug!(
            "Generated {} stems and {} leaves ({} prune tests, {} clones, {} draws)",
            self.stems.len(),
            self.leaves.len(),
            stats.prune_tests,
            stats.clones,
            stats.rng_draws
        );
        TreeSkeleton {
            stems: self.stems,
            leaves: self.leaves,
            params: self.params.clone(),
            seed: self.config.seed,
            scale: self.scale,
            trunk_length: self.trunk_length,
            base_length: self.base_length,
            stats,
        }
    }
}

/// Tree skeleton generator
#[derive(Clone, Debug)]
pub struct TreeGenerator {
    params: TreeParams,
    config: GenerationConfig,
}

impl TreeGenerator {
    /// Create generator with the default species
    pub fn new(seed: u64) -> Self {
        Self::with_params(seed, TreeParams::default())
    }

    pub fn with_params(seed: u64, params: TreeParams) -> Self {
        Self::with_config(params, GenerationConfig::with_seed(seed))
    }

    pub fn from_species(seed: u64, species: TreeSpecies) -> Self {
        Self::with_params(seed, TreeParams::from_species(species))
    }

    pub fn with_config(params: TreeParams, config: GenerationConfig) -> Self {
        Self { params, config }
    }

    pub fn params(&self) -> &TreeParams {
        &self.params
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Grow a complete skeleton.
    ///
    /// Fails on invalid parameters, on direct splits into more than three
    /// branches and when trunk spacing runs out of attempts.
    pub fn generate(&self) -> Result<TreeSkeleton> {
        self.params.validate()?;
        let p = &self.params;
        let mut growth = Growth::new(p, &self.config);
        growth.scale = (p.g_scale + growth.rng.signed() * p.g_scale_v).max(0.0);

        let turtles = growth.place_trunks()?;
        let trunks: Vec<StemId> = turtles.iter().map(|_| growth.push_stem(0, None, 0.0)).collect();
        for (i, (turtle, id)) in turtles.into_iter().zip(trunks).enumerate() {
            debug!("Growing trunk {i} from {:?}", turtle.pos);
            growth.make_stem(turtle, id, GrowthState::fresh(), None, None)?;
        }
        Ok(growth.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two branch orders keep runs fast
    fn light_params() -> TreeParams {
        TreeParams {
            levels: 2,
            ..TreeParams::quaking_aspen()
        }
    }

    fn generate(params: TreeParams, seed: u64) -> TreeSkeleton {
        TreeGenerator::with_params(seed, params).generate().unwrap()
    }

    #[test]
    fn test_floyd_steinberg_sums_to_total() {
        let mut carry = 0.0;
        let total: u32 = (0..10).map(|_| floyd_steinberg(&mut carry, 0.35)).sum();
        assert!((3..=4).contains(&total), "got {total}");
        assert!(carry.abs() < 1.0);
    }

    #[test]
    fn test_tree_generator_deterministic() {
        let a = generate(light_params(), 42);
        let b = generate(light_params(), 42);
        assert_eq!(a, b);
        let c = generate(light_params(), 43);
        assert_ne!(a.stems, c.stems);
    }

    #[test]
    fn test_three_levels_deterministic() {
        let a = TreeGenerator::new(5).generate().unwrap();
        let b = TreeGenerator::new(5).generate().unwrap();
        assert_eq!(a.stems.len(), b.stems.len());
        assert_eq!(a.leaves, b.leaves);
        assert!(a.stems_at_depth(2).count() > 0);
    }

    #[test]
    fn test_radius_ceiling_and_non_negative() {
        for species in TreeSpecies::ALL {
            let skel = TreeGenerator::from_species(3, species).generate().unwrap();
            for stem in &skel.stems {
                assert!(stem.length >= 0.0);
                assert!(stem.radius >= 0.0);
                if let Some(limit) = stem.radius_limit {
                    assert!(stem.radius <= limit, "stem {} radius {} > limit {limit}", stem.index.0, stem.radius);
                }
                assert_eq!(stem.radii.len(), stem.curve_points.len());
                assert!(stem.radii.iter().all(|r| *r >= 0.0));
            }
        }
    }

    #[test]
    fn test_arena_indices_and_links() {
        let skel = generate(light_params(), 9);
        for (i, stem) in skel.stems.iter().enumerate() {
            assert_eq!(stem.index, StemId(i));
            assert!(!stem.curve_points.is_empty() || stem.depth == 0);
            for child in &stem.children {
                assert_eq!(skel.stems[child.0].parent, Some(stem.index));
            }
            if let Some(parent) = stem.parent {
                assert!(skel.stems[parent.0].children.contains(&stem.index));
            }
        }
    }

    #[test]
    fn test_trunk_count_and_spacing() {
        let mut params = light_params();
        params.branches[0] = 4.0;
        let skel = generate(params.clone(), 21);
        let trunks: Vec<&Stem> = skel.trunks().collect();
        assert_eq!(trunks.len(), 4);
        assert_eq!(skel.stems_at_depth(0).count(), 4);

        let trunk_radius = skel.scale * params.length[0] * params.ratio * params.radius_mod[0];
        for (i, a) in trunks.iter().enumerate() {
            for b in &trunks[i + 1..] {
                let dist = a.base().unwrap().distance(b.base().unwrap());
                assert!(dist >= 2.5 * trunk_radius, "trunks {dist} apart");
            }
        }
    }

    #[test]
    fn test_floor_split_attempt_cap() {
        let mut params = light_params();
        params.branches[0] = 3.0;
        let config = GenerationConfig {
            max_floor_attempts: 1,
            ..GenerationConfig::with_seed(1)
        };
        let err = TreeGenerator::with_config(params.clone(), config).generate().unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        // trunks too fat to ever fit in the placement disk
        params.radius_mod[0] = 100.0;
        let err = TreeGenerator::with_params(1, params).generate().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_no_leaves_when_leaf_count_zero() {
        let mut params = light_params();
        params.leaf_blos_num = 0.0;
        for seed in 0..3 {
            assert!(generate(params.clone(), seed).leaves.is_empty());
        }
    }

    #[test]
    fn test_leaves_never_on_trunks() {
        let skel = generate(light_params(), 4);
        assert!(!skel.leaves.is_empty());
        for leaf in &skel.leaves {
            assert!(skel.stems[leaf.stem.0].depth > 0);
        }
    }

    #[test]
    fn test_leaves_spread_over_more_levels() {
        let mut params = TreeParams::quaking_aspen();
        params.leaf_distribution_levels = 2;
        let skel = generate(params, 4);
        let on_depth_one = skel.leaves.iter().filter(|l| skel.stems[l.stem.0].depth == 1).count();
        assert!(on_depth_one > 0);
    }

    #[test]
    fn test_disabling_leaves_keeps_stems() {
        let with_leaves = generate(light_params(), 8);
        let config = GenerationConfig {
            generate_leaves: false,
            ..GenerationConfig::with_seed(8)
        };
        let without = TreeGenerator::with_config(light_params(), config).generate().unwrap();
        assert!(without.leaves.is_empty());
        assert_eq!(without.stems, with_leaves.stems);
    }

    /// Every point after the first of every stem, clones and trunks included
    fn assert_inside_envelope(skel: &TreeSkeleton) {
        let p = &skel.params;
        for stem in &skel.stems {
            for point in stem.curve_points.iter().skip(1) {
                assert!(
                    point_inside_envelope(point.co, skel.scale, p.base_size[0], p.prune_width, p),
                    "stem {} (depth {}, clone {}) point {:?} outside envelope",
                    stem.index.0,
                    stem.depth,
                    stem.is_clone(),
                    point.co
                );
            }
        }
    }

    #[test]
    fn test_pruned_points_stay_inside_envelope() {
        let mut params = light_params();
        params.prune_ratio = 1.0;
        params.prune_width = 0.6;
        params.prune_width_peak = 0.5;
        params.prune_power_low = 0.0;
        params.prune_power_high = 1.0;
        let skel = generate(params, 77);
        assert!(skel.stats.prune_tests > 0);
        assert!(skel.stems_at_depth(1).count() > 0);
        assert_inside_envelope(&skel);
    }

    #[test]
    fn test_pruned_willow_clones_stay_inside_envelope() {
        for seed in [2, 3] {
            let skel = generate(TreeParams::weeping_willow(), seed);
            assert!(skel.stats.clones > 0, "seed {seed} grew no clones");
            assert!(skel.stats.prune_tests > 0);
            assert_inside_envelope(&skel);
        }
    }

    #[test]
    fn test_pruned_splitting_trunk_stays_inside_envelope() {
        let mut params = light_params();
        params.seg_splits[0] = 0.6;
        params.seg_splits[1] = 0.3;
        params.split_angle[1] = 30.0;
        params.prune_ratio = 1.0;
        params.prune_width = 0.4;
        params.prune_power_low = 0.0;
        params.prune_power_high = 0.0;
        let skel = generate(params, 19);
        assert!(skel.stats.clones > 0);
        assert_inside_envelope(&skel);
    }

    #[test]
    fn test_default_trunk_point_count() {
        let params = TreeParams::quaking_aspen();
        let skel = generate(params.clone(), 12345);
        assert!(!skel.stems.is_empty());
        let trunk = &skel.stems[0];
        assert_eq!(trunk.depth, 0);

        let res = params.curve_res[0] as usize;
        let points_per_seg = (100.0 / res as f32).ceil() as usize;
        assert_eq!(trunk.curve_points.len(), 1 + res * (points_per_seg - 1));

        // branches below taper 1 are not subdivided
        for stem in skel.stems_at_depth(1) {
            assert_eq!(stem.curve_points.len(), params.curve_res[1] as usize + 1);
        }
    }

    #[test]
    fn test_trunk_bases_follow_seed() {
        let mut params = light_params();
        params.branches[0] = 3.0;
        let bases = |seed| -> Vec<Vec3> {
            generate(params.clone(), seed).trunks().filter_map(Stem::base).collect()
        };
        let first = bases(7);
        assert_eq!(first.len(), 3);
        assert_eq!(first, bases(7));
        assert_ne!(first, bases(8));
    }

    #[test]
    fn test_pruning_disabled_never_tests() {
        let mut params = light_params();
        params.length[0] = 0.5;
        params.prune_ratio = 0.0;
        params.prune_width = 100.0;
        params.prune_power_low = 0.0;
        params.prune_power_high = 0.0;
        let disabled = generate(params.clone(), 31);
        assert_eq!(disabled.stats.prune_tests, 0);
        assert_eq!(disabled.stats.prune_shrinks, 0);
        assert_eq!(disabled.stats.abandoned, 0);

        // the same envelope with pruning on costs extra draws and nothing else
        params.prune_ratio = 1.0;
        let enabled = generate(params, 31);
        assert!(enabled.stats.prune_tests > 0);
        assert!(enabled.stats.rng_draws > disabled.stats.rng_draws);
        assert_eq!(enabled.stems, disabled.stems);
    }

    #[test]
    fn test_passing_envelope_changes_nothing() {
        let mut params = light_params();
        params.length[0] = 0.5;
        let plain = generate(params.clone(), 31);

        params.prune_ratio = 1.0;
        params.prune_width = 100.0;
        params.prune_power_low = 0.0;
        params.prune_power_high = 0.0;
        let pruned = generate(params, 31);

        assert!(pruned.stats.prune_tests > 0);
        assert_eq!(pruned.stats.prune_shrinks, 0);
        assert!(pruned.stats.rng_draws > plain.stats.rng_draws);
        assert_eq!(pruned.stems, plain.stems);
        assert_eq!(pruned.leaves, plain.leaves);
    }

    #[test]
    fn test_direct_split_into_four_is_rejected() {
        let mut params = light_params();
        params.levels = 1;
        params.split_angle[0] = -30.0;
        params.seg_splits[0] = 3.0;
        let err = TreeGenerator::with_params(2, params).generate().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_two_way_split_spawns_clones() {
        let mut params = light_params();
        params.levels = 1;
        params.split_angle[0] = -30.0;
        params.seg_splits[0] = 1.0;
        let skel = generate(params, 2);
        assert!(skel.stats.clones > 0);
        let clones: Vec<&Stem> = skel.stems.iter().filter(|s| s.is_clone()).collect();
        assert_eq!(clones.len() as u32, skel.stats.clones);
        for clone in clones {
            assert_eq!(clone.depth, 0);
            let origin = clone.clone_of.unwrap();
            assert!(origin < clone.index);
            assert_eq!(skel.stems[origin.0].depth, 0);
            assert!(clone.curve_points.len() >= 2);
        }
        assert_eq!(skel.trunks().count(), 1);
    }

    /// Single trunk with no branches and no curvature noise in the heading
    fn base_split_params(base_splits: i32) -> TreeParams {
        let mut params = TreeParams::quaking_aspen();
        params.levels = 1;
        params.base_splits = base_splits;
        params.seg_splits = [0.0; LEVELS];
        params.split_angle[0] = 40.0;
        params.split_angle_v[0] = 0.0;
        params.tropism = Vec3::ZERO;
        params
    }

    /// Horizontal heading of the segment starting at point `from`, in degrees
    fn heading(stem: &Stem, from: usize, per_seg: usize) -> f32 {
        let d = stem.curve_points[from + per_seg].co - stem.curve_points[from].co;
        d.y.atan2(d.x).to_degrees()
    }

    #[test]
    fn test_base_split_clones_at_base_segment() {
        let params = base_split_params(2);
        let skel = generate(params.clone(), 5);
        let res = params.curve_res[0];
        let base_seg = (params.base_size[0] * res as f32).ceil() as u32;
        let per_seg = max_points(res as f32) - 1;
        let trunk = &skel.stems[0];
        let split_at = base_seg as usize * per_seg;

        let clones: Vec<&Stem> = skel.stems.iter().filter(|s| s.is_clone()).collect();
        assert_eq!(clones.len(), 2);
        assert_eq!(skel.stats.clones, 2);
        assert_eq!(skel.trunks().count(), 1);
        for clone in &clones {
            assert_eq!(clone.depth, 0);
            assert_eq!(clone.clone_of, Some(trunk.index));
            assert!((clone.curve_points[0].co - trunk.curve_points[split_at].co).length() < 1e-5);
            assert_eq!(clone.curve_points.len(), 1 + (res - base_seg) as usize * per_seg);
        }

        // forks are spaced evenly around the vertical axis
        let trunk_heading = heading(trunk, split_at, per_seg);
        let mut turns: Vec<f32> = clones
            .iter()
            .map(|c| (heading(c, 0, per_seg) - trunk_heading).rem_euclid(360.0))
            .collect();
        turns.sort_by(f32::total_cmp);
        assert!((turns[0] - 120.0).abs() < 0.1 && (turns[1] - 240.0).abs() < 0.1, "{turns:?}");
    }

    #[test]
    fn test_random_base_split_count() {
        let params = base_split_params(-3);
        let mut counts = Vec::new();
        for seed in 0..12 {
            let skel = generate(params.clone(), seed);
            let clones: Vec<&Stem> = skel.stems.iter().filter(|s| s.is_clone()).collect();
            assert!(clones.len() <= 3);
            assert!(clones.iter().all(|c| c.clone_of == Some(StemId(0))));
            counts.push(clones.len());
        }
        counts.sort();
        counts.dedup();
        assert!(counts.len() > 1, "base split count never varied: {counts:?}");
    }

    #[test]
    fn test_no_base_split_without_count() {
        let skel = generate(base_split_params(0), 5);
        assert_eq!(skel.stats.clones, 0);
        assert_eq!(skel.stems.len(), 1);
    }

    #[test]
    fn test_declination_split_pitch_and_spread() {
        let mut params = base_split_params(0);
        params.base_size[0] = 0.0;
        params.seg_splits[0] = 1.0;
        params.split_angle[0] = 30.0;
        params.curve[0] = 0.0;
        params.curve_v[0] = 0.0;
        let skel = generate(params.clone(), 4);
        let per_seg = max_points(params.curve_res[0] as f32) - 1;
        let trunk = &skel.stems[0];
        let clone = &skel.stems[1];
        assert_eq!(clone.clone_of, Some(trunk.index));
        // the upright trunk splits at the end of its first segment
        assert!((clone.curve_points[0].co - trunk.curve_points[per_seg].co).length() < 1e-5);

        let step = |stem: &Stem, from: usize| stem.curve_points[from + per_seg].co - stem.curve_points[from].co;
        let continuing = step(trunk, per_seg);
        let fork = step(clone, 0);
        // each side takes half the split angle
        assert!((continuing.angle_between(Vec3::Z).to_degrees() - 15.0).abs() < 0.01);
        assert!((fork.angle_between(Vec3::Z).to_degrees() - 15.0).abs() < 0.01);

        let spread = (heading(clone, 0, per_seg) - heading(trunk, per_seg, per_seg)).rem_euclid(360.0);
        let spread = spread.min(360.0 - spread);
        assert!((42.4..=110.1).contains(&spread), "spread {spread}");
    }

    #[test]
    fn test_helix_branches() {
        let mut params = light_params();
        params.curve_v[1] = -40.0;
        let skel = generate(params.clone(), 6);
        let branches: Vec<&Stem> = skel.stems_at_depth(1).collect();
        assert!(!branches.is_empty());
        for stem in branches {
            assert_eq!(stem.curve_points.len(), params.curve_res[1] as usize + 1);
            assert!(stem.curve_points.iter().all(|p| p.co.is_finite() && p.handle_right.is_finite()));
        }
    }

    #[test]
    fn test_zero_curve_res_is_a_single_point() {
        let mut params = light_params();
        params.curve_res[0] = 0;
        let skel = generate(params, 3);
        assert_eq!(skel.stems.len(), 1);
        assert_eq!(skel.stems[0].curve_points.len(), 1);
        assert!(skel.leaves.is_empty());
    }

    #[test]
    fn test_all_species_generate() {
        for species in TreeSpecies::ALL {
            let skel = TreeGenerator::from_species(11, species).generate().unwrap();
            assert!(!skel.stems.is_empty(), "{:?}", species);
            assert!(skel.scale > 0.0);
            assert!(!skel.bounds().is_empty());
        }
    }

    #[test]
    fn test_invalid_params_rejected() {
        let mut params = light_params();
        params.levels = 9;
        let err = TreeGenerator::with_params(1, params).generate().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
