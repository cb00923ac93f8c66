//! Closed-form stem formulas: length, radius, taper, angles and counts
//!
//! Each function reads the species parameters plus whatever parent values
//! it needs. Functions taking a [`TreeRng`] draw exactly the values noted in
//! their docs, so callers can reason about stream consumption.

use super::params::{level, ShapeKind, TreeParams};
use super::rng::TreeRng;
use super::shape::shape_ratio;

/// Smallest radius a branch is given before the parent limit is applied
pub const MIN_BRANCH_RADIUS: f32 = 0.005;

/// Values of the parent stem that child formulas read
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParentDims {
    pub length: f32,
    pub radius: f32,
    pub length_child_max: f32,
}

/// Length multiplier handed to children of a stem at `depth` (one draw)
pub fn length_child_max(params: &TreeParams, depth: u32, rng: &mut TreeRng) -> f32 {
    let next = level(depth + 1);
    params.length[next] + rng.signed() * params.length_v[next]
}

/// Trunk length `scale * (length0 +- length_v0)` (one draw)
pub fn trunk_length(params: &TreeParams, scale: f32, rng: &mut TreeRng) -> f32 {
    (scale * (params.length[0] + rng.signed() * params.length_v[0])).max(0.0)
}

/// Length of a branch attached `offset` along its parent
pub fn child_length(
    params: &TreeParams,
    depth: u32,
    parent: ParentDims,
    offset: f32,
    base_length: f32,
) -> f32 {
    let result = if depth == 1 {
        let span = parent.length - base_length;
        let ratio = if span > 0.0 {
            (parent.length - offset) / span
        } else {
            0.0
        };
        parent.length * parent.length_child_max * shape_ratio(params.shape, ratio, params)
    } else {
        parent.length_child_max * (parent.length - 0.7 * offset)
    };
    result.max(0.0)
}

/// Stem radius for the given length.
///
/// Trunks use `length * ratio * radius_mod0`; branches scale the parent
/// radius by `(length / parent.length)^ratio_power`, clamped to
/// `[MIN_BRANCH_RADIUS, radius_limit]`.
pub fn stem_radius(
    params: &TreeParams,
    depth: u32,
    length: f32,
    parent: Option<ParentDims>,
    radius_limit: Option<f32>,
) -> f32 {
    let Some(parent) = parent else {
        return (length * params.ratio * params.radius_mod[0]).max(0.0);
    };
    let length_ratio = if parent.length > 0.0 {
        length / parent.length
    } else {
        0.0
    };
    let mut radius = params.radius_mod[level(depth)]
        * parent.radius
        * length_ratio.max(0.0).powf(params.ratio_power);
    radius = radius.max(MIN_BRANCH_RADIUS);
    if let Some(limit) = radius_limit {
        radius = radius.min(limit);
    }
    radius.max(0.0)
}

/// Pitch applied per segment (one draw).
///
/// With `curve_back` set the first half of the stem bends by `curve` and the
/// second half by `curve_back`.
pub fn curve_angle(params: &TreeParams, depth: u32, seg_ind: u32, rng: &mut TreeRng) -> f32 {
    let d = level(depth);
    let res = params.curve_res[d].max(1) as f32;
    let base = if params.curve_back[d] == 0.0 {
        params.curve[d] / res
    } else if (seg_ind as f32) < res / 2.0 {
        params.curve[d] / (res / 2.0)
    } else {
        params.curve_back[d] / (res / 2.0)
    };
    base + rng.signed() * (params.curve_v[d] / res)
}

/// Down angle of a child leaving a stem at `depth` (one draw).
///
/// A negative variance switches to envelope tracking: the angle follows a
/// conical silhouette of the remaining stem length.
pub fn down_angle(
    params: &TreeParams,
    depth: u32,
    stem_length: f32,
    stem_offset: f32,
    rng: &mut TreeRng,
) -> f32 {
    let next = level(depth + 1);
    let variance = params.down_angle_v[next];
    if variance >= 0.0 {
        return params.down_angle[next] + rng.signed() * variance;
    }

    let span = stem_length * (1.0 - params.base_size[level(depth)]);
    let ratio = if span > 0.0 {
        (stem_length - stem_offset) / span
    } else {
        0.0
    };
    let angle = params.down_angle[next]
        + variance * (1.0 - 2.0 * shape_ratio(ShapeKind::Conical, ratio, params));
    angle + rng.signed() * (angle * 0.1).abs()
}

/// Next roll angle for an alternating branch (one draw).
///
/// Additive rule: `(prev + rotate +- rotate_v) mod 360`. Reflective rule
/// (negative `rotate`): `prev * (180 + rotate +- rotate_v)` where `prev` is
/// the alternating side multiplier.
pub fn rotate_angle(params: &TreeParams, next_level: usize, prev: f32, rng: &mut TreeRng) -> f32 {
    let rotate = params.rotate[next_level];
    let variance = rng.signed() * params.rotate_v[next_level];
    if rotate >= 0.0 {
        (prev + rotate + variance).rem_euclid(360.0)
    } else {
        prev * (180.0 + rotate + variance)
    }
}

/// Expected number of children for a stem.
///
/// `jitter` scales trunk counts and is drawn by the caller from
/// `[0.9, 1.1)`. Negative results request a fan of `|n|` children at the
/// stem tip.
pub fn branch_count(
    params: &TreeParams,
    depth: u32,
    length: f32,
    offset: f32,
    parent: Option<ParentDims>,
    jitter: f32,
) -> f32 {
    let next = level(depth + 1);
    let configured = params.branches[next];
    let result = match parent {
        None => configured * jitter,
        Some(_) if configured < 0.0 => configured,
        Some(parent) if depth == 1 => {
            let rel = if parent.length > 0.0 && parent.length_child_max > 0.0 {
                (length / parent.length) / parent.length_child_max
            } else {
                0.0
            };
            configured * (0.2 + 0.8 * rel)
        }
        Some(parent) => {
            let rel = if parent.length > 0.0 {
                offset / parent.length
            } else {
                0.0
            };
            configured * (1.0 - 0.5 * rel)
        }
    };
    result / (1.0 - params.base_size[level(depth)])
}

/// Expected leaves on a stem; negative requests a fan cluster
pub fn leaf_count(params: &TreeParams, scale: f32, length: f32, parent: ParentDims) -> f32 {
    if params.leaf_blos_num < 0.0 {
        return params.leaf_blos_num;
    }
    let denom = parent.length_child_max * parent.length;
    if denom <= 0.0 {
        return 0.0;
    }
    let leaves = params.leaf_blos_num * scale / params.g_scale;
    leaves * (length / denom)
}

/// Radius at normalized position `z1` along a stem.
///
/// `taper < 1` narrows linearly, `1..2` rounds the tip off, `>= 2` produces
/// periodic bulges. Trunks also flare exponentially below `z1 = 0.125`.
pub fn radius_at_offset(params: &TreeParams, depth: u32, radius: f32, length: f32, z1: f32) -> f32 {
    let n_taper = params.taper[level(depth)];
    let unit_taper = if n_taper < 1.0 {
        n_taper
    } else if n_taper < 2.0 {
        2.0 - n_taper
    } else {
        0.0
    };
    let taper = radius * (1.0 - unit_taper * z1);

    let mut result = if n_taper < 1.0 {
        taper
    } else {
        let z2 = (1.0 - z1) * length;
        let depth_mix = if n_taper < 2.0 || z2 < taper {
            1.0
        } else {
            n_taper - 2.0
        };
        let z3 = if n_taper < 2.0 || taper <= 0.0 {
            z2
        } else {
            (z2 - 2.0 * taper * (z2 / (2.0 * taper) + 0.5).trunc()).abs()
        };
        if n_taper < 2.0 && z3 >= taper {
            taper
        } else {
            let cap = (taper * taper - (z3 - taper) * (z3 - taper)).max(0.0).sqrt();
            (1.0 - depth_mix) * taper + depth_mix * cap
        }
    };

    if depth == 0 {
        let y = (1.0 - 8.0 * z1).max(0.0);
        let flare = params.flare * ((100f32.powf(y) - 1.0) / 100.0) + 1.0;
        result *= flare;
    }
    result.max(0.0)
}
