//! Arbor - procedural tree skeletons from species parameters

pub mod core;
pub mod math;
pub mod tree;
pub mod generation;
