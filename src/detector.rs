//! The Detector: binarizes an uploaded sheet, finds connected
//! ink components, classifies them as noise/fragment/letter, merges
//! dot-and-stroke fragments into their parent letter, and sorts the
//! survivors into Hebrew reading order (rows top-to-bottom, each row
//! right-to-left).

use image::{DynamicImage, GenericImageView, GrayImage};
use imageproc::contours::{find_contours, BorderType};

use crate::config::Config;
use crate::error::AppError;
use crate::geometry::{BBox, Point};
use crate::image_ops;

/// One connected ink region, in the space of the original image.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: BBox,
    pub area: f64,
    pub fill_ratio: f64,
    /// Outer contour points, in absolute image coordinates. Retained
    /// so `split` can re-run extraction on exactly this region later.
    pub contour: Vec<Point>,
}

impl Detection {
    fn from_bbox_area(bbox: BBox, area: f64, contour: Vec<Point>) -> Self {
        let fill_ratio = if bbox.area() > 0 { area / bbox.area() as f64 } else { 0.0 };
        Self { bbox, area, fill_ratio, contour }
    }

    /// Rebuild a Detection from its already-computed fields, as when
    /// restoring a project snapshot (`fill_ratio` is taken verbatim
    /// rather than recomputed, since a merged detection's stored
    /// fill_ratio may not equal `area / bbox.area()` after rounding).
    pub fn reconstruct(bbox: BBox, area: f64, fill_ratio: f64, contour: Vec<Point>) -> Self {
        Self { bbox, area, fill_ratio, contour }
    }
}

const OTSU_COVERAGE_LOW: f64 = 0.01;
const OTSU_COVERAGE_HIGH: f64 = 0.6;
const ADAPTIVE_BLOCK: u32 = 25;
const ADAPTIVE_C: i32 = 10;
const ASPECT_MIN: f64 = 0.15;
const ASPECT_MAX: f64 = 6.0;
const FILL_RATIO_MIN: f64 = 0.08;
const IMAGE_SPAN_FRACTION: f64 = 0.9;
const SMALL_LETTER_FRACTION: f64 = 0.25;
const MAX_VERTICAL_GAP_FRACTION: f64 = 0.8;
const ROW_GROUPING_FRACTION: f64 = 0.5;

pub fn load_image(path: &std::path::Path) -> Result<DynamicImage, AppError> {
    image::open(path).map_err(|e| AppError::DecodeFailure(e.to_string()))
}

/// Preprocessing pipeline. Returns an inverted binary
/// image (ink = 255, background = 0).
pub fn preprocess_image(image: &DynamicImage, separation_level: u8) -> GrayImage {
    let gray = image_ops::to_grayscale(image);
    let blurred = image_ops::bilateral_filter(&gray, 9, 75.0, 75.0);
    let enhanced = image_ops::clahe(&blurred, (8, 8), 2.0);

    let (otsu, coverage) = image_ops::otsu_inverted(&enhanced);
    let mut binary = if coverage > OTSU_COVERAGE_LOW && coverage < OTSU_COVERAGE_HIGH {
        otsu
    } else {
        image_ops::adaptive_threshold_inverted(&enhanced, ADAPTIVE_BLOCK, ADAPTIVE_C)
    };

    if separation_level > 0 {
        let kernel_size = 2 + separation_level as u32;
        let iterations = if separation_level <= 2 {
            1
        } else if separation_level <= 4 {
            2
        } else {
            3
        };
        binary = image_ops::morphological_open(&binary, kernel_size, iterations);
    }

    binary
}

struct RawComponent {
    bbox: BBox,
    area: f64,
    contour: Vec<Point>,
}

fn external_components(binary: &GrayImage) -> Vec<RawComponent> {
    find_contours::<i32>(binary)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.points.len() >= 3)
        .map(|c| {
            let xs = c.points.iter().map(|p| p.x);
            let ys = c.points.iter().map(|p| p.y);
            let x_min = xs.clone().min().unwrap_or(0);
            let x_max = xs.max().unwrap_or(0);
            let y_min = ys.clone().min().unwrap_or(0);
            let y_max = ys.max().unwrap_or(0);
            let bbox = BBox::new(x_min, y_min, x_max - x_min + 1, y_max - y_min + 1);
            let area = shoelace_area(&c.points);
            let contour = c.points.iter().map(|p| Point::new(p.x as f64, p.y as f64)).collect();
            RawComponent { bbox, area, contour }
        })
        .collect()
}

fn shoelace_area(points: &[imageproc::point::Point<i32>]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let mut sum = 0i64;
    for i in 0..n {
        let a = points[i];
        let b = points[(i + 1) % n];
        sum += a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64;
    }
    (sum.abs() as f64) / 2.0
}

/// Detect letters in `image`, returning detections in reading order
/// alongside the original image and the chosen binary image.
pub fn detect_letters(
    image: &DynamicImage,
    separation_level: u8,
    config: &Config,
) -> (Vec<Detection>, GrayImage) {
    let binary = preprocess_image(image, separation_level);
    let (img_w, img_h) = image.dimensions();

    let tiny_min = config.tiny_noise_floor() as i32;
    let max_size = config.max_letter_size as i32;
    let min_size = config.min_letter_size as i32;

    let mut letters = Vec::new();
    let mut fragments = Vec::new();

    for comp in external_components(&binary) {
        let BBox { w, h, .. } = comp.bbox;

        if w < tiny_min || h < tiny_min {
            continue;
        }
        if w as f64 > img_w as f64 * IMAGE_SPAN_FRACTION && h as f64 > img_h as f64 * IMAGE_SPAN_FRACTION {
            continue;
        }
        if w > max_size || h > max_size {
            continue;
        }
        let aspect = comp.bbox.aspect_ratio();
        if aspect < ASPECT_MIN || aspect > ASPECT_MAX {
            continue;
        }

        let detection = Detection::from_bbox_area(comp.bbox, comp.area, comp.contour);
        if detection.fill_ratio < FILL_RATIO_MIN {
            continue;
        }

        if w < min_size || h < min_size {
            fragments.push(detection);
        } else {
            letters.push(detection);
        }
    }

    let merged = merge_fragments(letters, fragments);
    let sorted = sort_reading_order(merged);
    (sorted, binary)
}

fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Merge small candidates (fragments, and letters below 25% of the
/// median letter area) into the nearest eligible larger letter.
/// Unmerged fragments are dropped; unmerged small letters survive.
fn merge_fragments(letters: Vec<Detection>, fragments: Vec<Detection>) -> Vec<Detection> {
    if letters.is_empty() {
        return letters;
    }

    let mut all: Vec<Detection> = letters;
    let fragment_start = all.len();
    all.extend(fragments);

    if all.len() < 2 {
        return all;
    }

    let mut areas: Vec<f64> = all[..fragment_start].iter().map(|d| d.area).collect();
    let mut heights: Vec<f64> = all[..fragment_start].iter().map(|d| d.bbox.h as f64).collect();
    let median_area = median(&mut areas);
    let median_h = median(&mut heights);

    let small_threshold = median_area * SMALL_LETTER_FRACTION;
    let max_gap = median_h * MAX_VERTICAL_GAP_FRACTION;

    let mut merged_into: Vec<Option<usize>> = vec![None; all.len()];

    for i in 0..all.len() {
        let is_fragment = i >= fragment_start;
        if !is_fragment && all[i].area >= small_threshold {
            continue;
        }

        let s_cx = all[i].bbox.center_x();
        let mut best_target = None;
        let mut best_dist = f64::INFINITY;

        for j in 0..all.len() {
            if i == j || j >= fragment_start || merged_into[j].is_some() {
                continue;
            }
            let l_cx = all[j].bbox.center_x();
            let h_tolerance = (all[j].bbox.w.max(all[i].bbox.w)) as f64 * 0.6;
            if (s_cx - l_cx).abs() > h_tolerance {
                continue;
            }
            let v_gap = all[i].bbox.vertical_gap(&all[j].bbox);
            if v_gap > max_gap {
                continue;
            }
            let dist = v_gap + 0.5 * (s_cx - l_cx).abs();
            if dist < best_dist {
                best_dist = dist;
                best_target = Some(j);
            }
        }

        merged_into[i] = best_target;
    }

    let mut absorbed: Vec<Vec<usize>> = vec![Vec::new(); all.len()];
    for (small_idx, target) in merged_into.iter().enumerate() {
        if let Some(t) = target {
            absorbed[*t].push(small_idx);
        }
    }

    let mut result = Vec::new();
    for idx in 0..all.len() {
        if merged_into[idx].is_some() {
            continue;
        }
        if idx >= fragment_start {
            // an unmerged fragment: too small to stand alone
            continue;
        }
        if absorbed[idx].is_empty() {
            result.push(all[idx].clone());
            continue;
        }

        let mut bbox = all[idx].bbox;
        let mut area = all[idx].area;
        let mut contour = all[idx].contour.clone();
        for &frag_idx in &absorbed[idx] {
            bbox = bbox.union(&all[frag_idx].bbox);
            area += all[frag_idx].area;
            contour.extend(all[frag_idx].contour.iter().copied());
        }
        result.push(Detection::from_bbox_area(bbox, area, contour));
    }

    result
}

/// Rows top-to-bottom; right-to-left within a row.
fn sort_reading_order(mut detections: Vec<Detection>) -> Vec<Detection> {
    if detections.is_empty() {
        return detections;
    }

    let avg_h: f64 = detections.iter().map(|d| d.bbox.h as f64).sum::<f64>() / detections.len() as f64;
    let row_threshold = avg_h * ROW_GROUPING_FRACTION;

    detections.sort_by_key(|d| d.bbox.y);

    let mut rows: Vec<Vec<Detection>> = Vec::new();
    let mut current_row = vec![detections.remove(0)];
    for d in detections {
        if (d.bbox.y - current_row[0].bbox.y).abs() as f64 < row_threshold {
            current_row.push(d);
        } else {
            rows.push(std::mem::take(&mut current_row));
            current_row = vec![d];
        }
    }
    rows.push(current_row);

    let mut sorted = Vec::new();
    for mut row in rows {
        row.sort_by(|a, b| b.bbox.x.cmp(&a.bbox.x));
        sorted.extend(row);
    }
    sorted
}

/// Manual edit: append a new rectangular detection.
pub fn add(detections: &mut Vec<Detection>, bbox: BBox, img_w: i32, img_h: i32) -> Result<(), AppError> {
    let clamped = bbox.clamp_to_image(img_w, img_h);
    if clamped.w < 4 || clamped.h < 4 {
        return Err(AppError::BadInput("detection too small: minimum 4x4 pixels".into()));
    }
    let contour = vec![
        Point::new(clamped.x as f64, clamped.y as f64),
        Point::new(clamped.right() as f64, clamped.y as f64),
        Point::new(clamped.right() as f64, clamped.bottom() as f64),
        Point::new(clamped.x as f64, clamped.bottom() as f64),
    ];
    detections.push(Detection::from_bbox_area(clamped, clamped.area() as f64, contour));
    Ok(())
}

pub fn remove(detections: &mut Vec<Detection>, index: usize) -> Result<(), AppError> {
    if index >= detections.len() {
        return Err(AppError::BadState(format!("no detection at index {index}")));
    }
    detections.remove(index);
    Ok(())
}

pub fn merge(detections: &mut Vec<Detection>, indices: &[usize]) -> Result<(), AppError> {
    if indices.len() < 2 {
        return Err(AppError::BadInput("merge requires at least two detections".into()));
    }
    for &i in indices {
        if i >= detections.len() {
            return Err(AppError::BadState(format!("no detection at index {i}")));
        }
    }

    let target = *indices.iter().min().unwrap();
    let mut bbox = detections[target].bbox;
    let mut area = 0.0;
    let mut contour = Vec::new();
    for &i in indices {
        bbox = bbox.union(&detections[i].bbox);
        area += detections[i].area;
        contour.extend(detections[i].contour.iter().copied());
    }

    let merged = Detection::from_bbox_area(bbox, area, contour);
    let mut sorted_indices = indices.to_vec();
    sorted_indices.sort_unstable();
    for &i in sorted_indices.iter().rev() {
        detections.remove(i);
    }
    detections.insert(target, merged);
    Ok(())
}

pub fn split(
    detections: &mut Vec<Detection>,
    index: usize,
    binary: &GrayImage,
) -> Result<(), AppError> {
    if index >= detections.len() {
        return Err(AppError::BadState(format!("no detection at index {index}")));
    }

    let bbox = detections[index].bbox;
    let (img_w, img_h) = (binary.width() as i32, binary.height() as i32);
    let padded = bbox.pad(4, img_w, img_h);

    let crop = image::imageops::crop_imm(binary, padded.x as u32, padded.y as u32, padded.w as u32, padded.h as u32)
        .to_image();

    let components: Vec<RawComponent> = external_components(&crop)
        .into_iter()
        .filter(|c| c.bbox.w >= 5 && c.bbox.h >= 5)
        .collect();

    if components.len() < 2 {
        return Err(AppError::BadState("fewer than two sub-components found".into()));
    }

    let mut pieces: Vec<Detection> = components
        .into_iter()
        .map(|c| {
            let shifted = BBox::new(c.bbox.x + padded.x, c.bbox.y + padded.y, c.bbox.w, c.bbox.h);
            let contour = c
                .contour
                .iter()
                .map(|p| Point::new(p.x + padded.x as f64, p.y + padded.y as f64))
                .collect();
            Detection::from_bbox_area(shifted, c.area, contour)
        })
        .collect();

    pieces.sort_by(|a, b| b.bbox.x.cmp(&a.bbox.x));

    detections.remove(index);
    for (offset, piece) in pieces.into_iter().enumerate() {
        detections.insert(index + offset, piece);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn rect_binary(w: u32, h: u32, rects: &[(u32, u32, u32, u32)]) -> GrayImage {
        let mut img = GrayImage::from_pixel(w, h, Luma([0]));
        for &(x, y, rw, rh) in rects {
            for yy in y..y + rh {
                for xx in x..x + rw {
                    img.put_pixel(xx, yy, Luma([255]));
                }
            }
        }
        img
    }

    #[test]
    fn detects_one_letter_per_blob() {
        let img = rect_binary(200, 200, &[(10, 10, 60, 60), (120, 10, 60, 60)]);
        let comps = external_components(&img);
        assert_eq!(comps.len(), 2);
    }

    #[test]
    fn reading_order_sorts_rows_then_right_to_left() {
        let d = |x: i32, y: i32| Detection::from_bbox_area(BBox::new(x, y, 60, 60), 3600.0, vec![]);
        let detections = vec![d(10, 10), d(100, 10), d(10, 200)];
        let sorted = sort_reading_order(detections);
        assert_eq!(sorted[0].bbox.x, 100);
        assert_eq!(sorted[1].bbox.x, 10);
        assert_eq!(sorted[2].bbox.y, 200);
    }

    #[test]
    fn add_rejects_tiny_boxes() {
        let mut detections = Vec::new();
        let result = add(&mut detections, BBox::new(0, 0, 2, 2), 100, 100);
        assert!(result.is_err());
    }

    #[test]
    fn add_clamps_to_image_bounds() {
        let mut detections = Vec::new();
        add(&mut detections, BBox::new(-5, -5, 20, 20), 100, 100).unwrap();
        assert_eq!(detections[0].bbox, BBox::new(0, 0, 15, 15));
    }

    #[test]
    fn remove_errors_on_bad_state() {
        let mut detections = Vec::new();
        assert!(remove(&mut detections, 0).is_err());
    }

    #[test]
    fn merge_unions_bboxes_and_replaces_smallest_index() {
        let mut detections = vec![
            Detection::from_bbox_area(BBox::new(0, 0, 10, 10), 50.0, vec![]),
            Detection::from_bbox_area(BBox::new(20, 0, 10, 10), 50.0, vec![]),
            Detection::from_bbox_area(BBox::new(40, 0, 10, 10), 50.0, vec![]),
        ];
        merge(&mut detections, &[0, 2]).unwrap();
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].bbox, BBox::new(0, 0, 50, 10));
    }

    #[test]
    fn merge_fragments_attaches_dot_below_hook() {
        let hook = Detection::from_bbox_area(BBox::new(0, 0, 60, 60), 2000.0, vec![]);
        let dot = Detection::from_bbox_area(BBox::new(20, 70, 15, 15), 150.0, vec![]);
        let merged = merge_fragments(vec![hook], vec![dot]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].bbox, BBox::new(0, 0, 60, 85));
    }
}
