//! Turtle frame used to trace stem centerlines
//!
//! A turtle is a position plus an orthonormal (direction, right) frame. All
//! angles are in degrees. Every rotation renormalizes the frame so direction
//! and right stay unit length and mutually orthogonal however many steps a
//! stem takes.

use crate::core::types::{Quat, Vec3};

/// Position and orientation advanced step by step during stem growth
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Turtle {
    pub pos: Vec3,
    /// Forward direction (unit)
    pub dir: Vec3,
    /// Right vector (unit, orthogonal to `dir`)
    pub right: Vec3,
}

impl Default for Turtle {
    /// Turtle at the origin facing world up (+Z) with right along +X
    fn default() -> Self {
        Self {
            pos: Vec3::ZERO,
            dir: Vec3::Z,
            right: Vec3::X,
        }
    }
}

impl Turtle {
    /// Create a turtle, orthonormalizing the supplied frame
    pub fn new(pos: Vec3, dir: Vec3, right: Vec3) -> Self {
        let mut turtle = Self { pos, dir, right };
        turtle.renormalize();
        turtle
    }

    /// Local up vector (direction x right)
    pub fn up(&self) -> Vec3 {
        self.dir.cross(self.right)
    }

    /// Translate along the current direction
    pub fn forward(&mut self, distance: f32) {
        self.pos += self.dir * distance;
    }

    /// Rotate direction and right about the turtle's local up axis.
    ///
    /// The axis is `dir x right`, not world up, so a pitched or rolled
    /// turtle turns within its own frame. Callers that need a spin about
    /// world up use [`Turtle::rotate_frame`] with `Vec3::Z`.
    pub fn turn_left(&mut self, degrees: f32) {
        let axis = self.up();
        self.rotate_frame(axis, degrees);
    }

    pub fn turn_right(&mut self, degrees: f32) {
        self.turn_left(-degrees);
    }

    /// Rotate direction about the right axis
    pub fn pitch_down(&mut self, degrees: f32) {
        let q = Quat::from_axis_angle(self.right, -degrees.to_radians());
        self.dir = q * self.dir;
        self.renormalize();
    }

    pub fn pitch_up(&mut self, degrees: f32) {
        self.pitch_down(-degrees);
    }

    /// Rotate right about the direction axis
    pub fn roll_right(&mut self, degrees: f32) {
        let q = Quat::from_axis_angle(self.dir, degrees.to_radians());
        self.right = q * self.right;
        self.renormalize();
    }

    pub fn roll_left(&mut self, degrees: f32) {
        self.roll_right(-degrees);
    }

    /// Rotate the whole frame about an arbitrary axis. A degenerate axis is a no-op.
    pub fn rotate_frame(&mut self, axis: Vec3, degrees: f32) {
        let Some(axis) = axis.try_normalize() else {
            return;
        };
        let q = Quat::from_axis_angle(axis, degrees.to_radians());
        self.dir = q * self.dir;
        self.right = q * self.right;
        self.renormalize();
    }

    /// Angle in degrees between the direction and world up
    pub fn declination(&self) -> f32 {
        self.dir.angle_between(Vec3::Z).to_degrees()
    }

    /// Bend the frame toward a tropism vector.
    ///
    /// The rotation angle is `10 * |dir x tropism|` degrees about the axis
    /// perpendicular to both, which reproduces the attraction-up behaviour of
    /// the parametric model.
    pub fn apply_tropism(&mut self, tropism: Vec3) {
        let h_cross_t = self.dir.cross(tropism);
        let alpha = 10.0 * h_cross_t.length();
        if alpha <= f32::EPSILON {
            return;
        }
        self.rotate_frame(h_cross_t, alpha);
    }

    /// Gram-Schmidt the frame back to orthonormal
    fn renormalize(&mut self) {
        self.dir = self.dir.try_normalize().unwrap_or(Vec3::Z);
        let right = self.right - self.dir * self.dir.dot(self.right);
        self.right = right
            .try_normalize()
            .unwrap_or_else(|| self.dir.any_orthonormal_vector());
    }
}
