//! The GlyphBuilder: maps bbox-relative pixel contours into a
//! font's em-box with uniform scaling and descender handling, and
//! emits the pure quadratic-B-spline point/flag sequence TrueType's
//! `glyf` table expects.

use serde::{Deserialize, Serialize};

use crate::contour::ExtractedContour;
use crate::geometry::FontPoint;
use crate::hebrew;

pub const UNITS_PER_EM: i32 = 1024;
pub const TARGET_HEIGHT: f64 = 750.0;
pub const LSB: i32 = 50;
pub const PREVIEW_DISPLAY_HEIGHT: f64 = 80.0;
pub const PX_TO_FONT: f64 = TARGET_HEIGHT / PREVIEW_DISPLAY_HEIGHT; // 9.375
const MIN_ADVANCE_WIDTH: i32 = 100;

/// Per-character tuning, all in preview pixels except `scale`
/// (percent; 100 = unchanged).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Adjustment {
    pub scale: f64,
    pub offset_x: f64,
    pub offset_y: f64,
    pub spacing: f64,
}

impl Default for Adjustment {
    fn default() -> Self {
        Self { scale: 100.0, offset_x: 0.0, offset_y: 0.0, spacing: 0.0 }
    }
}

/// A single TrueType contour: on-curve/off-curve flagged points. Every
/// point from the pure-B-spline path is off-curve except the
/// synthesized midpoints, which are on-curve.
#[derive(Debug, Clone)]
pub struct GlyphContour {
    pub points: Vec<FontPoint>,
    pub on_curve: Vec<bool>,
}

#[derive(Debug, Clone)]
pub struct GlyphOutline {
    pub glyph_name: String,
    pub contours: Vec<GlyphContour>,
    pub advance_width: i32,
    pub left_side_bearing: i32,
}

/// `s0 = 750 / reference_height`, falling back to `src_h`, and to 1.0
/// if both are zero.
pub fn base_scale(reference_height: Option<f64>, src_h: f64) -> f64 {
    let norm_h = reference_height.filter(|h| *h > 0.0).unwrap_or(src_h);
    if norm_h > 0.0 {
        TARGET_HEIGHT / norm_h
    } else {
        1.0
    }
}

/// Build a GlyphOutline for character `c` from its extracted contours,
/// or `None` if nothing survives the ≥4-point filter.
pub fn build_glyph(
    c: char,
    contours: &[ExtractedContour],
    src_w: f64,
    src_h: f64,
    reference_height: Option<f64>,
    adj: &Adjustment,
) -> Option<GlyphOutline> {
    if contours.is_empty() {
        return None;
    }

    let s0 = base_scale(reference_height, src_h);
    let scale = s0 * (adj.scale / 100.0);

    let font_offset_x = (adj.offset_x * PX_TO_FONT * (adj.scale / 100.0)).round() as i32;
    let font_offset_y = (-adj.offset_y * PX_TO_FONT * (adj.scale / 100.0)).round() as i32
        + if hebrew::is_descender(c) { hebrew::DESCENDER_SHIFT } else { 0 };

    let mut glyph_contours = Vec::new();

    for contour in contours {
        let font_pts: Vec<FontPoint> = contour
            .points
            .iter()
            .map(|p| {
                let fx = (p.x * scale).round() as i32 + LSB + font_offset_x;
                let fy = ((src_h - p.y) * scale).round() as i32 + font_offset_y;
                FontPoint::new(fx, fy)
            })
            .collect();

        if font_pts.len() < 4 {
            continue;
        }

        if font_pts.len() >= 6 {
            glyph_contours.push(quadratic_bspline_contour(&font_pts));
        } else {
            glyph_contours.push(polyline_contour(&font_pts));
        }
    }

    if glyph_contours.is_empty() {
        return None;
    }

    let target_w = (src_w * scale).round() as i32;
    let mut advance_width = target_w + 2 * LSB;
    if adj.spacing != 0.0 {
        let spacing_fu = (adj.spacing * PX_TO_FONT).round() as i32;
        advance_width = (advance_width + 2 * spacing_fu).max(MIN_ADVANCE_WIDTH);
    } else {
        advance_width = advance_width.max(MIN_ADVANCE_WIDTH);
    }

    Some(GlyphOutline {
        glyph_name: hebrew::glyph_name(c),
        contours: glyph_contours,
        advance_width,
        left_side_bearing: LSB,
    })
}

/// Every supplied control is off-curve; on-curve points are the
/// midpoints of consecutive controls, wrapping around.
fn quadratic_bspline_contour(controls: &[FontPoint]) -> GlyphContour {
    let n = controls.len();
    let midpoint = |a: FontPoint, b: FontPoint| {
        FontPoint::new(((a.x + b.x) as f64 / 2.0).round() as i32, ((a.y + b.y) as f64 / 2.0).round() as i32)
    };

    let start = midpoint(controls[n - 1], controls[0]);

    let mut points = Vec::with_capacity(n * 2);
    let mut on_curve = Vec::with_capacity(n * 2);

    points.push(start);
    on_curve.push(true);

    for i in 0..n {
        let ctrl = controls[i];
        let next = controls[(i + 1) % n];
        let end = midpoint(ctrl, next);

        points.push(ctrl);
        on_curve.push(false);

        // The final emitted on-curve point coincides with `start`;
        // TrueType contours are implicitly closed so it's dropped
        // rather than duplicated, except for the intermediate
        // midpoints which are genuinely new points.
        if i != n - 1 {
            points.push(end);
            on_curve.push(true);
        }
    }

    GlyphContour { points, on_curve }
}

fn polyline_contour(points: &[FontPoint]) -> GlyphContour {
    let on_curve = vec![true; points.len()];
    GlyphContour { points: points.to_vec(), on_curve }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;

    fn contour(points: &[(f64, f64)]) -> ExtractedContour {
        ExtractedContour { points: points.iter().map(|&(x, y)| Point::new(x, y)).collect(), is_hole: false }
    }

    #[test]
    fn uniform_scaling_preserves_aspect_across_letters() {
        let s_tall = base_scale(Some(100.0), 100.0);
        let s_short = base_scale(Some(100.0), 50.0);
        // same reference height => same base scale regardless of this glyph's own height
        assert_eq!(s_tall, s_short);
        assert_eq!(s_tall, 7.5);
    }

    #[test]
    fn descender_letter_gets_shifted_down() {
        let pts = contour(&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0), (5.0, 15.0), (5.0, 5.0)]);
        let adj = Adjustment::default();
        let glyph = build_glyph('ק', &[pts], 100.0, 100.0, Some(100.0), &adj).unwrap();
        let min_y = glyph.contours[0].points.iter().map(|p| p.y).min().unwrap();
        assert!(min_y < 0);
    }

    #[test]
    fn bspline_contour_has_equal_on_and_off_curve_points() {
        let controls = vec![
            FontPoint::new(0, 0),
            FontPoint::new(10, 0),
            FontPoint::new(10, 10),
            FontPoint::new(0, 10),
            FontPoint::new(5, 15),
            FontPoint::new(-5, 5),
        ];
        let c = quadratic_bspline_contour(&controls);
        let on = c.on_curve.iter().filter(|&&b| b).count();
        let off = c.on_curve.iter().filter(|&&b| !b).count();
        assert_eq!(on, off);
        assert_eq!(off, controls.len());
    }

    #[test]
    fn advance_width_has_100_unit_floor() {
        let pts = contour(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.5, 1.5), (0.5, 0.5)]);
        let adj = Adjustment::default();
        let glyph = build_glyph('א', &[pts], 1.0, 1.0, Some(100.0), &adj).unwrap();
        assert!(glyph.advance_width >= 100);
    }

    #[test]
    fn fewer_than_four_points_is_dropped() {
        let pts = contour(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)]);
        let adj = Adjustment::default();
        let glyph = build_glyph('א', &[pts], 10.0, 10.0, Some(100.0), &adj);
        assert!(glyph.is_none());
    }

    #[test]
    fn adjustment_offset_translates_every_point() {
        let pts = contour(&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0), (5.0, 15.0), (5.0, 5.0)]);
        let mut adj = Adjustment::default();
        adj.offset_x = 8.0;
        let base = build_glyph('א', &[pts.clone()], 100.0, 100.0, Some(100.0), &Adjustment::default()).unwrap();
        let shifted = build_glyph('א', &[pts], 100.0, 100.0, Some(100.0), &adj).unwrap();
        let dx = shifted.contours[0].points[0].x - base.contours[0].points[0].x;
        assert_eq!(dx, 75); // round(8 * 9.375)
    }
}
