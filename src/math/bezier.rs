//! Cubic Bezier helpers for stem curves

use std::f32::consts::PI;

use serde::{Deserialize, Serialize};

use crate::core::types::{Quat, Vec3};
use super::turtle::Turtle;

/// Anchor of a Bezier spline with its incoming and outgoing handles
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BezierPoint {
    pub co: Vec3,
    pub handle_left: Vec3,
    pub handle_right: Vec3,
}

impl BezierPoint {
    /// Anchor with both handles collapsed onto it
    pub fn at(co: Vec3) -> Self {
        Self {
            co,
            handle_left: co,
            handle_right: co,
        }
    }

    /// Anchor with handles `handle_len` either side along `tangent`
    pub fn with_tangent(co: Vec3, tangent: Vec3, handle_len: f32) -> Self {
        Self {
            co,
            handle_left: co - tangent * handle_len,
            handle_right: co + tangent * handle_len,
        }
    }

    /// Shrink both handles toward the anchor by `factor`
    pub fn scale_handles(&mut self, factor: f32) {
        self.handle_left = self.co + (self.handle_left - self.co) * factor;
        self.handle_right = self.co + (self.handle_right - self.co) * factor;
    }
}

/// Point at parameter `t` on the cubic segment between two anchors
pub fn point_on_segment(t: f32, start: &BezierPoint, end: &BezierPoint) -> Vec3 {
    let u = 1.0 - t;
    start.co * (u * u * u)
        + start.handle_right * (3.0 * u * u * t)
        + end.handle_left * (3.0 * u * t * t)
        + end.co * (t * t * t)
}

/// Unnormalized tangent at parameter `t` on the cubic segment
pub fn tangent_on_segment(t: f32, start: &BezierPoint, end: &BezierPoint) -> Vec3 {
    let u = 1.0 - t;
    (start.handle_right - start.co) * (3.0 * u * u)
        + (end.handle_left - start.handle_right) * (6.0 * u * t)
        + (end.co - end.handle_left) * (3.0 * t * t)
}

/// Relative control vectors describing one half turn of a helix
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HelixPoints {
    /// Outgoing handle of the first anchor
    pub first_handle: Vec3,
    /// Incoming handle of the second anchor
    pub second_handle: Vec3,
    /// Offset from one anchor to the next
    pub step: Vec3,
    /// Helix axis (turtle direction at entry)
    pub axis: Vec3,
}

impl HelixPoints {
    /// Anchor `seg` of the helix given the previous anchor position.
    ///
    /// Anchor 0 sits at `pos` with its outgoing handle along the first
    /// control vector. Every later anchor advances half a turn, so the
    /// control vectors are rotated by `(seg - 1) * PI` about the axis.
    pub fn anchor(&self, seg: u32, pos: Vec3) -> BezierPoint {
        if seg == 0 {
            return BezierPoint {
                co: pos,
                handle_left: pos - self.first_handle,
                handle_right: pos + self.first_handle,
            };
        }
        let turn = Quat::from_axis_angle(self.axis, (seg - 1) as f32 * PI);
        let co = pos + turn * self.step;
        let handle_left = co - turn * (self.step - self.second_handle);
        BezierPoint {
            co,
            handle_left,
            handle_right: co * 2.0 - handle_left,
        }
    }
}

/// Control points for a Bezier helix of the given radius and pitch, aligned
/// with the turtle direction and spun `spin` radians about it.
///
/// Uses the closed form for a 90 degree arc per anchor.
pub fn helix_points(turtle: &Turtle, radius: f32, pitch: f32, spin: f32) -> HelixPoints {
    let points = [
        Vec3::new(0.0, -radius, -pitch / 4.0),
        Vec3::new(4.0 * radius / 3.0, -radius, 0.0),
        Vec3::new(4.0 * radius / 3.0, radius, 0.0),
        Vec3::new(0.0, radius, pitch / 4.0),
    ];

    let track = Quat::from_rotation_arc(Vec3::Z, turtle.dir);
    let rotation = track * Quat::from_rotation_z(spin);
    let [p0, p1, p2, p3] = points.map(|p| rotation * p);

    HelixPoints {
        first_handle: p1 - p0,
        second_handle: p2 - p0,
        step: p3 - p0,
        axis: turtle.dir,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn straight_segment() -> (BezierPoint, BezierPoint) {
        let a = BezierPoint::with_tangent(Vec3::ZERO, Vec3::Z, 1.0 / 3.0);
        let b = BezierPoint::with_tangent(Vec3::Z, Vec3::Z, 1.0 / 3.0);
        (a, b)
    }

    #[test]
    fn test_point_on_straight_segment_is_linear() {
        let (a, b) = straight_segment();
        for i in 0..=10 {
            let t = i as f32 / 10.0;
            let p = point_on_segment(t, &a, &b);
            assert!((p - Vec3::new(0.0, 0.0, t)).length() < 1e-5, "t={t} p={p:?}");
        }
    }

    #[test]
    fn test_endpoints_match_anchors() {
        let a = BezierPoint::with_tangent(Vec3::new(1.0, 2.0, 3.0), Vec3::X, 0.4);
        let b = BezierPoint::with_tangent(Vec3::new(2.0, 2.5, 4.0), Vec3::Y, 0.7);
        assert_eq!(point_on_segment(0.0, &a, &b), a.co);
        assert!((point_on_segment(1.0, &a, &b) - b.co).length() < 1e-6);
    }

    #[test]
    fn test_tangent_follows_handles_at_ends() {
        let a = BezierPoint::with_tangent(Vec3::ZERO, Vec3::X, 0.5);
        let b = BezierPoint::with_tangent(Vec3::new(1.0, 1.0, 0.0), Vec3::Y, 0.5);
        let t0 = tangent_on_segment(0.0, &a, &b).normalize();
        let t1 = tangent_on_segment(1.0, &a, &b).normalize();
        assert!((t0 - Vec3::X).length() < 1e-5);
        assert!((t1 - Vec3::Y).length() < 1e-5);
    }

    #[test]
    fn test_scale_handles() {
        let mut p = BezierPoint::with_tangent(Vec3::ONE, Vec3::Z, 1.0);
        p.scale_handles(0.25);
        assert!((p.handle_right - Vec3::new(1.0, 1.0, 1.25)).length() < 1e-6);
        assert!((p.handle_left - Vec3::new(1.0, 1.0, 0.75)).length() < 1e-6);
    }

    #[test]
    fn test_helix_anchors_keep_advancing() {
        let turtle = Turtle::default();
        let helix = helix_points(&turtle, 0.5, 2.0, 0.0);
        let mut pos = turtle.pos;
        let first = helix.anchor(0, pos);
        assert_eq!(first.co, pos);
        for seg in 1..=4 {
            let point = helix.anchor(seg, pos);
            // every half turn climbs half the pitch
            assert!(((point.co - pos).dot(helix.axis) - 1.0).abs() < 1e-4);
            // handles mirror through the anchor
            assert!((point.handle_right + point.handle_left - point.co * 2.0).length() < 1e-4);
            pos = point.co;
        }
        // whole turns land back above the start
        let radial = pos - helix.axis * pos.dot(helix.axis);
        assert!(radial.length() < 1e-4, "radial offset {radial:?}");
    }

    #[test]
    fn test_helix_step_advances_along_axis() {
        let turtle = Turtle::default();
        let helix = helix_points(&turtle, 0.5, 2.0, 0.3);
        // Half a turn advances half the pitch along the axis
        assert!((helix.step.dot(helix.axis) - 1.0).abs() < 1e-5);
        // and crosses the diameter
        let radial = helix.step - helix.axis * helix.step.dot(helix.axis);
        assert!((radial.length() - 1.0).abs() < 1e-5);
    }
}
