//! Parametric tree skeletons (Weber & Penn)
//!
//! Parameters and presets live in [`params`], the closed-form curves in
//! [`shape`] and [`formulas`], and the recursive engine in [`generator`].

pub mod params;
pub mod rng;
pub mod shape;
pub mod formulas;
pub mod stem;
pub mod skeleton;
pub mod generator;
mod branching;

pub use generator::TreeGenerator;
pub use params::{ShapeKind, TreeParams, TreeSpecies};
pub use skeleton::{GenerationStats, TreeSkeleton};
pub use stem::{LeafPlacement, Stem, StemId};
