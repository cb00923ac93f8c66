//! Silhouette curves and the pruning envelope test

use std::f32::consts::PI;

use crate::core::types::Vec3;
use super::params::{ShapeKind, TreeParams};

/// Silhouette multiplier at normalized position `ratio` (0 = top, 1 = base
/// of the crown). Only `ShapeKind::Envelope` reads the `prune_*` parameters.
pub fn shape_ratio(shape: ShapeKind, ratio: f32, params: &TreeParams) -> f32 {
    match shape {
        ShapeKind::Conical => 0.2 + 0.8 * ratio,
        ShapeKind::Spherical => 0.2 + 0.8 * (PI * ratio).sin(),
        ShapeKind::Hemispherical => 0.2 + 0.8 * (0.5 * PI * ratio).sin(),
        ShapeKind::Cylindrical => 1.0,
        ShapeKind::TaperedCylindrical => 0.5 + 0.5 * ratio,
        ShapeKind::Flame => {
            if ratio <= 0.7 {
                ratio / 0.7
            } else {
                (1.0 - ratio) / 0.3
            }
        }
        ShapeKind::InverseConical => 1.0 - 0.8 * ratio,
        ShapeKind::TendFlame => {
            if ratio <= 0.7 {
                0.5 + 0.5 * ratio / 0.7
            } else {
                0.5 + 0.5 * (1.0 - ratio) / 0.3
            }
        }
        ShapeKind::Envelope => {
            if !(0.0..=1.0).contains(&ratio) {
                return 0.0;
            }
            let peak = 1.0 - params.prune_width_peak;
            if ratio < peak {
                (ratio / peak).powf(params.prune_power_high)
            } else {
                ((1.0 - ratio) / (1.0 - peak)).powf(params.prune_power_low)
            }
        }
    }
}

/// Whether `point` lies inside the pruning silhouette of a tree of height
/// `scale`.
///
/// Everything below the bare base (`base_size_frac * scale`) counts as
/// inside. Above it the allowed horizontal distance from the trunk axis is
/// `prune_width * scale * envelope(ratio)`.
pub fn point_inside_envelope(
    point: Vec3,
    scale: f32,
    base_size_frac: f32,
    prune_width: f32,
    params: &TreeParams,
) -> bool {
    if point.z < scale * base_size_frac {
        return true;
    }
    let crown_height = scale * (1.0 - base_size_frac);
    if crown_height <= 0.0 {
        return true;
    }
    let ratio = (scale - point.z) / crown_height;
    let dist = (point.x * point.x + point.y * point.y).sqrt();
    dist / scale < prune_width * shape_ratio(ShapeKind::Envelope, ratio, params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_shapes() {
        let p = TreeParams::default();
        assert!((shape_ratio(ShapeKind::Conical, 1.0, &p) - 1.0).abs() < 1e-6);
        assert!((shape_ratio(ShapeKind::Conical, 0.0, &p) - 0.2).abs() < 1e-6);
        assert!((shape_ratio(ShapeKind::Spherical, 0.5, &p) - 1.0).abs() < 1e-6);
        assert!((shape_ratio(ShapeKind::Hemispherical, 1.0, &p) - 1.0).abs() < 1e-6);
        assert_eq!(shape_ratio(ShapeKind::Cylindrical, 0.3, &p), 1.0);
        assert!((shape_ratio(ShapeKind::TaperedCylindrical, 0.0, &p) - 0.5).abs() < 1e-6);
        assert!((shape_ratio(ShapeKind::InverseConical, 1.0, &p) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_flame_peaks_at_seventy_percent() {
        let p = TreeParams::default();
        assert!((shape_ratio(ShapeKind::Flame, 0.7, &p) - 1.0).abs() < 1e-6);
        assert!(shape_ratio(ShapeKind::Flame, 1.0, &p).abs() < 1e-6);
        assert!((shape_ratio(ShapeKind::TendFlame, 0.7, &p) - 1.0).abs() < 1e-6);
        assert!((shape_ratio(ShapeKind::TendFlame, 1.0, &p) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_envelope_peak_and_bounds() {
        let mut p = TreeParams::default();
        p.prune_width_peak = 0.5;
        p.prune_power_low = 0.5;
        p.prune_power_high = 0.5;
        assert!((shape_ratio(ShapeKind::Envelope, 0.5, &p) - 1.0).abs() < 1e-6);
        assert_eq!(shape_ratio(ShapeKind::Envelope, -0.1, &p), 0.0);
        assert_eq!(shape_ratio(ShapeKind::Envelope, 1.1, &p), 0.0);
        assert!(shape_ratio(ShapeKind::Envelope, 0.25, &p) < 1.0);
    }

    #[test]
    fn test_point_inside_envelope() {
        let mut p = TreeParams::default();
        p.prune_width_peak = 0.5;
        let scale = 10.0;
        // below the bare base everything is inside
        assert!(point_inside_envelope(Vec3::new(100.0, 0.0, 1.0), scale, 0.3, 0.5, &p));
        // on the axis at peak height
        assert!(point_inside_envelope(Vec3::new(0.0, 0.0, 6.5), scale, 0.3, 0.5, &p));
        // far out at peak height
        assert!(!point_inside_envelope(Vec3::new(6.0, 0.0, 6.5), scale, 0.3, 0.5, &p));
        // above the top
        assert!(!point_inside_envelope(Vec3::new(0.1, 0.0, 11.0), scale, 0.3, 0.5, &p));
    }
}
