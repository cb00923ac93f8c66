//! Geometry utilities: turtle frames, Bezier curves and bounds

pub mod aabb;
pub mod bezier;
pub mod turtle;

pub use aabb::Aabb;
pub use bezier::{BezierPoint, HelixPoints};
pub use turtle::Turtle;
