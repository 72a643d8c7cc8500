//! Jet color ramp for saliency values.

use image::Rgb;

// Piecewise-linear control points per channel, as (position, intensity).
const RED: [(f32, f32); 5] = [(0.0, 0.0), (0.35, 0.0), (0.66, 1.0), (0.89, 1.0), (1.0, 0.5)];
const GREEN: [(f32, f32); 6] = [
    (0.0, 0.0),
    (0.125, 0.0),
    (0.375, 1.0),
    (0.64, 1.0),
    (0.91, 0.0),
    (1.0, 0.0),
];
const BLUE: [(f32, f32); 5] = [(0.0, 0.5), (0.11, 1.0), (0.34, 1.0), (0.65, 0.0), (1.0, 0.0)];

fn channel(x: f32, anchors: &[(f32, f32)]) -> f32 {
    let mut i = 0;
    while i + 2 < anchors.len() && x > anchors[i + 1].0 {
        i += 1;
    }
    let (x0, y0) = anchors[i];
    let (x1, y1) = anchors[i + 1];
    let t = if x1 > x0 { ((x - x0) / (x1 - x0)).clamp(0.0, 1.0) } else { 0.0 };
    y0 + t * (y1 - y0)
}

/// Map a value in `[0, 1]` to the jet ramp: dark blue, cyan, yellow, dark red.
///
/// Values outside the range are clamped; NaN maps to the low end.
#[must_use]
pub fn jet(value: f32) -> Rgb<u8> {
    let x = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
    let to_u8 = |v: f32| (v * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgb([
        to_u8(channel(x, &RED)),
        to_u8(channel(x, &GREEN)),
        to_u8(channel(x, &BLUE)),
    ])
}
