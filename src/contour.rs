//! The Extractor: cuts a labeled blob out of the binary image
//! (or re-thresholds the original crop for higher fidelity), walks
//! its contour hierarchy to separate holes from outers, then smooths
//! and resamples each contour to a small, evenly-spaced point count.

use image::{GenericImageView, GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};

use crate::geometry::{BBox, Point};
use crate::image_ops;

/// One ring of a glyph's outline, in bbox-relative float pixel
/// coordinates.
#[derive(Debug, Clone)]
pub struct ExtractedContour {
    pub points: Vec<Point>,
    pub is_hole: bool,
}

const CROP_PADDING: i32 = 4;
const MIN_RAW_POINTS: usize = 6;

/// Extract every contour (outer and hole) for one detection's bbox.
pub fn extract_glyph_contours(
    binary_image: &GrayImage,
    bbox: &BBox,
    original_image: Option<&image::DynamicImage>,
) -> Vec<ExtractedContour> {
    let (img_w, img_h) = (binary_image.width() as i32, binary_image.height() as i32);
    let padded = bbox.pad(CROP_PADDING, img_w, img_h);

    let crop: GrayImage = if let Some(original) = original_image {
        let sub = original.view(padded.x as u32, padded.y as u32, padded.w as u32, padded.h as u32);
        let gray = image::DynamicImage::ImageRgba8(sub.to_image()).to_luma8();
        let (binary, _coverage) = image_ops::otsu_inverted(&gray);
        binary
    } else {
        let mut out = GrayImage::new(padded.w as u32, padded.h as u32);
        for y in 0..padded.h as u32 {
            for x in 0..padded.w as u32 {
                let src_x = padded.x as u32 + x;
                let src_y = padded.y as u32 + y;
                out.put_pixel(x, y, Luma([binary_image.get_pixel(src_x, src_y)[0]]));
            }
        }
        out
    };

    // Offset from the crop's origin back to the bbox's origin: the
    // padding actually applied, which clamping may have shrunk below
    // CROP_PADDING at image edges.
    let ox = (bbox.x - padded.x) as f64;
    let oy = (bbox.y - padded.y) as f64;

    let contours = find_contours::<i32>(&crop);

    let mut result = Vec::with_capacity(contours.len());
    for contour in &contours {
        if contour.points.len() < MIN_RAW_POINTS {
            continue;
        }
        let is_hole = contour.border_type == BorderType::Hole;

        let mut pts: Vec<Point> = contour
            .points
            .iter()
            .map(|p| Point::new(p.x as f64 - ox, p.y as f64 - oy))
            .collect();

        let n = pts.len();
        let window = smoothing_window(n);
        pts = smooth_circular(&pts, window);
        pts = resample(&pts, target_point_count(n));

        result.push(ExtractedContour { points: pts, is_hole });
    }

    result
}

fn smoothing_window(n: usize) -> usize {
    let raw = (n / 50).clamp(3, 9);
    if raw % 2 == 0 {
        raw + 1
    } else {
        raw
    }
}

fn target_point_count(n: usize) -> usize {
    (n / 4).clamp(24, 100)
}

/// Circular (wrap-around) moving average over `window` neighbours.
/// Pass-through if the contour is too short for the window to make
/// sense.
fn smooth_circular(pts: &[Point], window: usize) -> Vec<Point> {
    let n = pts.len();
    if n <= window || window < 3 {
        return pts.to_vec();
    }
    let half = (window / 2) as i64;
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let mut sx = 0.0;
        let mut sy = 0.0;
        for off in -half..=half {
            let idx = ((i as i64 + off).rem_euclid(n as i64)) as usize;
            sx += pts[idx].x;
            sy += pts[idx].y;
        }
        let count = (2 * half + 1) as f64;
        out.push(Point::new(sx / count, sy / count));
    }
    out
}

/// Resample to exactly `target` points by linear interpolation over
/// the (circular) point index, matching `numpy.linspace(0, n-1,
/// target)` rounded to the nearest source index. A no-op if the
/// contour already has fewer points than the target.
fn resample(pts: &[Point], target: usize) -> Vec<Point> {
    let n = pts.len();
    if n <= target {
        return pts.to_vec();
    }
    let mut out = Vec::with_capacity(target);
    for i in 0..target {
        let idx = if target <= 1 {
            0.0
        } else {
            i as f64 * (n - 1) as f64 / (target - 1) as f64
        };
        out.push(pts[idx.round() as usize]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_binary(size: u32) -> GrayImage {
        let mut img = GrayImage::from_pixel(size, size, Luma([0]));
        for y in 4..size - 4 {
            for x in 4..size - 4 {
                img.put_pixel(x, y, Luma([255]));
            }
        }
        img
    }

    #[test]
    fn extracts_outer_contour_for_filled_square() {
        let img = square_binary(40);
        let bbox = BBox::new(4, 4, 32, 32);
        let contours = extract_glyph_contours(&img, &bbox, None);
        assert!(!contours.is_empty());
        assert!(contours.iter().any(|c| !c.is_hole));
    }

    #[test]
    fn smoothing_window_is_always_odd_and_in_range() {
        for n in [10, 50, 200, 1000] {
            let w = smoothing_window(n);
            assert!(w >= 3 && w <= 9);
            assert_eq!(w % 2, 1);
        }
    }

    #[test]
    fn target_point_count_is_clamped() {
        assert_eq!(target_point_count(10), 24);
        assert_eq!(target_point_count(10_000), 100);
        assert_eq!(target_point_count(200), 50);
    }

    #[test]
    fn resample_keeps_short_contours_unchanged() {
        let pts = vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)];
        let out = resample(&pts, 24);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn resample_produces_exact_target_length() {
        let pts: Vec<Point> = (0..200).map(|i| Point::new(i as f64, 0.0)).collect();
        let out = resample(&pts, 50);
        assert_eq!(out.len(), 50);
    }
}
