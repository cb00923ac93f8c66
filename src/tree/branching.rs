//! Child branch and leaf placement along a growing stem
//!
//! Runs once per finished segment on a stream derived from the parent's, and
//! every branch grows on a stream forked from that one. Counts are spread
//! over segments with per-depth Floyd-Steinberg carries so the integer
//! totals track the expected ones.

use crate::core::types::{Result, Vec3};
use crate::math::bezier::{point_on_segment, tangent_on_segment, BezierPoint};
use crate::math::Turtle;
use super::formulas;
use super::generator::{floyd_steinberg, Growth, GrowthState};
use super::params::{level, TreeParams};
use super::rng::TreeRng;
use super::stem::{LeafPlacement, StemId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChildKind {
    Branch,
    Leaf,
}

/// How a child is turned away from the parent tangent
#[derive(Clone, Copy, Debug, PartialEq)]
enum Placement {
    /// Roll about the tangent (whorled and alternating children)
    Roll(f32),
    /// Turn sideways (fan clusters at the stem tip)
    Fan(f32),
}

/// Where on the current segment a child attaches
#[derive(Clone, Copy, Debug)]
struct Attachment {
    /// Parameter on the last Bezier segment
    offset: f32,
    /// Distance along the parent stem
    stem_offset: f32,
    /// Radius ceiling for a branch, also its inward origin shift
    radius_limit: f32,
}

/// Direction frame from the curve tangent at `offset`
fn branch_dir_turtle(turtle: &Turtle, helix: bool, offset: f32, start: &BezierPoint, end: &BezierPoint) -> Turtle {
    let pos = point_on_segment(offset, start, end);
    let tangent = tangent_on_segment(offset, start, end)
        .try_normalize()
        .unwrap_or(turtle.dir);
    let right = if helix {
        let ahead = tangent_on_segment(offset + 1e-4, start, end)
            .try_normalize()
            .unwrap_or(tangent);
        tangent.cross(ahead)
    } else {
        turtle.up().cross(tangent)
    };
    Turtle::new(pos, tangent, right)
}

/// Roll for the next alternating child.
///
/// The additive rule accumulates into `rotation`. The reflective rule flips
/// the side first, so consecutive children land on opposite sides.
fn next_roll(params: &TreeParams, next: usize, rotation: &mut f32, rng: &mut TreeRng) -> f32 {
    if params.rotate[next] < 0.0 {
        *rotation = -*rotation;
        formulas::rotate_angle(params, next, *rotation, rng)
    } else {
        *rotation = formulas::rotate_angle(params, next, *rotation, rng);
        *rotation
    }
}

impl Growth<'_> {
    /// Schedule this segment's share of branches and leaves.
    ///
    /// Negative counts are fans, emitted all at once on the final segment.
    pub(super) fn schedule_segment(
        &mut self,
        turtle: &Turtle,
        id: StemId,
        seg: u32,
        branch_count: f32,
        leaf_count: f32,
        rotation: &mut f32,
    ) -> Result<()> {
        let d = level(self.stems[id.0].depth);
        let res = self.params.curve_res[d];
        let res_f = res as f32;

        if branch_count < 0.0 {
            if seg == res {
                self.make_fan(turtle, id, seg, branch_count.abs() as u32, ChildKind::Branch)?;
            }
        } else if branch_count > 0.0 {
            let count = floyd_steinberg(&mut self.errors.branch[d], branch_count / res_f);
            self.distribute(turtle, id, seg, count, ChildKind::Branch, rotation)?;
        }

        if leaf_count < 0.0 {
            if seg == res {
                self.make_fan(turtle, id, seg, leaf_count.abs() as u32, ChildKind::Leaf)?;
            }
        } else if leaf_count > 0.0 {
            let count = floyd_steinberg(&mut self.errors.leaf[d], leaf_count / res_f);
            self.distribute(turtle, id, seg, count, ChildKind::Leaf, rotation)?;
        }
        Ok(())
    }

    /// Last Bezier segment of a stem
    fn last_segment(&self, id: StemId) -> Option<(BezierPoint, BezierPoint)> {
        match self.stems[id.0].curve_points.as_slice() {
            [.., start, end] => Some((*start, *end)),
            _ => None,
        }
    }

    /// Whorled or alternating placement along the last segment
    fn distribute(
        &mut self,
        turtle: &Turtle,
        id: StemId,
        seg: u32,
        count: u32,
        kind: ChildKind,
        rotation: &mut f32,
    ) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let Some(segment) = self.last_segment(id) else {
            return Ok(());
        };
        let p = self.params;
        let (depth, length, radius) = {
            let stem = &self.stems[id.0];
            (stem.depth, stem.length, stem.radius)
        };
        let d = level(depth);
        let next = level(depth + 1);
        let res = p.curve_res[d] as f32;
        let base_length = length * p.base_size[d];
        let branch_dist = p.branch_dist[next];
        let attach_at = |offset: f32| {
            let stem_offset = ((seg - 1) as f32 + offset) / res * length;
            Attachment {
                offset,
                stem_offset,
                radius_limit: formulas::radius_at_offset(p, depth, radius, length, stem_offset / length),
            }
        };

        if branch_dist > 1.0 {
            let whorls = (count as f32 / branch_dist) as u32;
            for w in 0..whorls {
                let at = attach_at(w as f32 / whorls as f32);
                if at.stem_offset > base_length {
                    let in_whorl = floyd_steinberg(&mut self.errors.whorl[d], branch_dist);
                    for i in 0..in_whorl {
                        let roll = *rotation
                            + 360.0 * i as f32 / in_whorl as f32
                            + self.rng.signed() * p.rotate_v[next];
                        self.set_up_child(turtle, id, &segment, at, Placement::Roll(roll), kind)?;
                    }
                }
                *rotation += p.rotate[next];
            }
        } else {
            let n = count as f32;
            for i in 0..count {
                let offset = if i % 2 == 0 {
                    i as f32 / n
                } else {
                    (i as f32 - branch_dist) / n
                };
                let at = attach_at(offset.clamp(0.0, 1.0));
                if at.stem_offset > base_length {
                    let roll = next_roll(p, next, rotation, &mut self.rng);
                    self.set_up_child(turtle, id, &segment, at, Placement::Roll(roll), kind)?;
                }
            }
        }
        Ok(())
    }

    /// Spread `count` children across `rotate[d + 1]` degrees at the stem tip
    fn make_fan(&mut self, turtle: &Turtle, id: StemId, seg: u32, count: u32, kind: ChildKind) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let Some(segment) = self.last_segment(id) else {
            return Ok(());
        };
        let p = self.params;
        let (depth, length, radius) = {
            let stem = &self.stems[id.0];
            (stem.depth, stem.length, stem.radius)
        };
        let next = level(depth + 1);
        let res = p.curve_res[level(depth)] as f32;
        // the tip radius is usually zero, so fans inherit the segment start
        let at = Attachment {
            offset: 1.0,
            stem_offset: length,
            radius_limit: formulas::radius_at_offset(p, depth, radius, length, (seg - 1) as f32 / res),
        };

        for i in 0..count {
            let angle = if count == 1 {
                0.0
            } else {
                p.rotate[next] * (i as f32 / (count - 1) as f32 - 0.5) + self.rng.signed() * p.rotate_v[next]
            };
            self.set_up_child(turtle, id, &segment, at, Placement::Fan(angle), kind)?;
        }
        Ok(())
    }

    /// Orient one child and either record a leaf or grow a branch
    fn set_up_child(
        &mut self,
        turtle: &Turtle,
        id: StemId,
        segment: &(BezierPoint, BezierPoint),
        at: Attachment,
        placement: Placement,
        kind: ChildKind,
    ) -> Result<()> {
        let p = self.params;
        let (depth, length) = {
            let stem = &self.stems[id.0];
            (stem.depth, stem.length)
        };
        let helix = p.curve_v[level(depth)] < 0.0;

        let mut dir_turtle = branch_dir_turtle(turtle, helix, at.offset, &segment.0, &segment.1);
        match placement {
            Placement::Roll(angle) => dir_turtle.roll_right(angle),
            Placement::Fan(angle) => dir_turtle.turn_right(angle),
        }

        let mut pos_turtle = dir_turtle;
        pos_turtle.pitch_down(90.0);
        pos_turtle.forward(at.radius_limit);

        let down = formulas::down_angle(p, depth, length, at.stem_offset, &mut self.rng);
        dir_turtle.pitch_down(down);

        match kind {
            ChildKind::Leaf => {
                self.leaves.push(LeafPlacement {
                    stem: id,
                    position: pos_turtle.pos,
                    direction: dir_turtle.dir,
                    right: dir_turtle.right,
                });
            }
            ChildKind::Branch => {
                let child = self.push_stem(depth + 1, Some(id), at.stem_offset);
                self.stems[child.0].radius_limit = Some(at.radius_limit);
                let stream = self.rng.fork();
                self.on_stream(stream, |g| {
                    g.make_stem(dir_turtle, child, GrowthState::fresh(), Some(pos_turtle), None)
                })?;
                self.attach(child);
            }
        }
        Ok(())
    }
}
