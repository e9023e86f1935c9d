//! The Session: the single in-process editing context shared
//! by every endpoint in `api.rs`. Holds the loaded image, its binary,
//! the detection list, and the user's assignments, and knows how to
//! serialize/restore itself as a `.hfm` project snapshot.

use std::collections::BTreeMap;
use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::detector::{self, Detection};
use crate::error::{AppError, AppResult};
use crate::geometry::{BBox, Point};
use crate::glyph::Adjustment;

const SNAPSHOT_VERSION: u32 = 2;

#[derive(Default)]
pub struct Session {
    pub original_image: Option<DynamicImage>,
    pub binary_image: Option<GrayImage>,
    pub separation_level: u8,
    pub detections: Vec<Detection>,
    pub assignments: BTreeMap<char, usize>,
    pub adjustments: BTreeMap<char, Adjustment>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the image, detections, and binary; clear assignments.
    pub fn upload(&mut self, image: DynamicImage, separation_level: u8, config: &Config) {
        let (detections, binary) = detector::detect_letters(&image, separation_level, config);
        self.original_image = Some(image);
        self.binary_image = Some(binary);
        self.separation_level = separation_level;
        self.detections = detections;
        self.assignments.clear();
        self.adjustments.clear();
    }

    /// Re-run detection on the same image at a new separation level.
    /// Assignments are dropped since detection indices are no longer
    /// meaningful against the new list.
    pub fn redetect(&mut self, separation_level: u8, config: &Config) -> AppResult<()> {
        let image = self
            .original_image
            .as_ref()
            .ok_or_else(|| AppError::BadInput("no image loaded".into()))?
            .clone();
        let (detections, binary) = detector::detect_letters(&image, separation_level, config);
        self.binary_image = Some(binary);
        self.separation_level = separation_level;
        self.detections = detections;
        self.assignments.clear();
        Ok(())
    }

    fn image_dims(&self) -> AppResult<(i32, i32)> {
        let img = self.original_image.as_ref().ok_or_else(|| AppError::BadInput("no image loaded".into()))?;
        use image::GenericImageView;
        let (w, h) = img.dimensions();
        Ok((w as i32, h as i32))
    }

    pub fn add_detection(&mut self, bbox: BBox) -> AppResult<()> {
        let (w, h) = self.image_dims()?;
        detector::add(&mut self.detections, bbox, w, h)
    }

    pub fn remove_detection(&mut self, index: usize) -> AppResult<()> {
        detector::remove(&mut self.detections, index)?;
        self.reindex_assignments_after_removal(index);
        Ok(())
    }

    fn reindex_assignments_after_removal(&mut self, removed: usize) {
        self.assignments.retain(|_, idx| *idx != removed);
        for idx in self.assignments.values_mut() {
            if *idx > removed {
                *idx -= 1;
            }
        }
    }

    /// After a merge, every detection originally positioned after the
    /// smallest merged index shifts down as the other merged indices
    /// are spliced out and the merged detection is reinserted at the
    /// target position, so surviving assignments must be remapped,
    /// not just have the consumed indices dropped (as `remove` does).
    pub fn merge_detections(&mut self, indices: &[usize]) -> AppResult<()> {
        detector::merge(&mut self.detections, indices)?;
        let target = *indices.iter().min().unwrap();
        let removed: std::collections::HashSet<usize> = indices.iter().copied().collect();
        self.assignments.retain(|_, idx| !removed.contains(idx));
        for idx in self.assignments.values_mut() {
            if *idx > target {
                let shift = indices.iter().filter(|&&j| j < *idx).count();
                *idx = *idx - shift + 1;
            }
        }
        Ok(())
    }

    /// After a split, the replaced detection's index now holds the
    /// first piece and every later detection shifts down by
    /// `piece_count - 1`.
    pub fn split_detection(&mut self, index: usize) -> AppResult<()> {
        let binary = self
            .binary_image
            .as_ref()
            .ok_or_else(|| AppError::BadState("no binary image available".into()))?
            .clone();
        let before_len = self.detections.len();
        detector::split(&mut self.detections, index, &binary)?;
        let piece_count = self.detections.len() + 1 - before_len;

        self.assignments.retain(|_, idx| *idx != index);
        for idx in self.assignments.values_mut() {
            if *idx > index {
                *idx += piece_count - 1;
            }
        }
        Ok(())
    }

    /// Replace the assignment map atomically; every detection id must
    /// exist.
    pub fn assign(&mut self, assignments: BTreeMap<char, usize>) -> AppResult<()> {
        for &idx in assignments.values() {
            if idx >= self.detections.len() {
                return Err(AppError::BadState(format!("no detection at index {idx}")));
            }
        }
        self.assignments = assignments;
        Ok(())
    }

    pub fn set_adjustments(&mut self, adjustments: BTreeMap<char, Adjustment>) {
        self.adjustments = adjustments;
    }

    pub fn clear(&mut self) {
        *self = Session::default();
    }

    /// The maximum bbox height across assigned detections, used as
    /// the GlyphBuilder's `reference_height`.
    pub fn reference_height(&self) -> Option<f64> {
        self.assignments
            .values()
            .filter_map(|&idx| self.detections.get(idx))
            .map(|d| d.bbox.h as f64)
            .fold(None, |acc, h| Some(acc.map_or(h, |m: f64| m.max(h))))
    }

    pub fn export_project(&self, font_name: &str, metadata: &serde_json::Value) -> AppResult<ProjectSnapshot> {
        let image = self.original_image.as_ref().ok_or_else(|| AppError::BadState("no image to export".into()))?;
        let binary = self.binary_image.as_ref().ok_or_else(|| AppError::BadState("no binary image to export".into()))?;

        Ok(ProjectSnapshot {
            version: SNAPSHOT_VERSION,
            font_name: font_name.to_string(),
            image: encode_png_base64(&image.to_rgba8().into())?,
            binary: encode_gray_png_base64(binary)?,
            detections: self.detections.iter().map(DetectionSnapshot::from).collect(),
            assignments: self.assignments.clone(),
            adjustments: self.adjustments.clone(),
            metadata: metadata.clone(),
        })
    }

    pub fn import_project(&mut self, snapshot: ProjectSnapshot) -> AppResult<()> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(AppError::BadInput(format!(
                "unsupported project snapshot version {} (expected {SNAPSHOT_VERSION})",
                snapshot.version
            )));
        }

        let image = decode_png_base64(&snapshot.image)?;
        let binary = decode_gray_png_base64(&snapshot.binary)?;

        self.original_image = Some(image);
        self.binary_image = Some(binary);
        self.detections = snapshot.detections.into_iter().map(Detection::from).collect();
        self.assignments = snapshot.assignments;
        self.adjustments = snapshot.adjustments;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub version: u32,
    pub font_name: String,
    pub image: String,
    pub binary: String,
    pub detections: Vec<DetectionSnapshot>,
    pub assignments: BTreeMap<char, usize>,
    pub adjustments: BTreeMap<char, Adjustment>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionSnapshot {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
    pub area: f64,
    pub fill_ratio: f64,
    pub contour: Vec<(f64, f64)>,
}

impl From<&Detection> for DetectionSnapshot {
    fn from(d: &Detection) -> Self {
        Self {
            x: d.bbox.x,
            y: d.bbox.y,
            w: d.bbox.w,
            h: d.bbox.h,
            area: d.area,
            fill_ratio: d.fill_ratio,
            contour: d.contour.iter().map(|p| (p.x, p.y)).collect(),
        }
    }
}

impl From<DetectionSnapshot> for Detection {
    fn from(s: DetectionSnapshot) -> Self {
        let bbox = BBox::new(s.x, s.y, s.w, s.h);
        let contour: Vec<Point> = s.contour.into_iter().map(|(x, y)| Point::new(x, y)).collect();
        Detection::reconstruct(bbox, s.area, s.fill_ratio, contour)
    }
}

fn encode_png_base64(img: &image::RgbaImage) -> AppResult<String> {
    let mut bytes: Vec<u8> = Vec::new();
    image::DynamicImage::ImageRgba8(img.clone())
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .map_err(|e| AppError::InternalFailure(format!("encoding PNG: {e}")))?;
    Ok(BASE64.encode(bytes))
}

fn encode_gray_png_base64(img: &GrayImage) -> AppResult<String> {
    let mut bytes: Vec<u8> = Vec::new();
    image::DynamicImage::ImageLuma8(img.clone())
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .map_err(|e| AppError::InternalFailure(format!("encoding PNG: {e}")))?;
    Ok(BASE64.encode(bytes))
}

fn decode_png_base64(data: &str) -> AppResult<DynamicImage> {
    let bytes = BASE64.decode(data).map_err(|e| AppError::DecodeFailure(format!("base64: {e}")))?;
    image::load_from_memory(&bytes).map_err(|e| AppError::DecodeFailure(e.to_string()))
}

fn decode_gray_png_base64(data: &str) -> AppResult<GrayImage> {
    Ok(decode_png_base64(data)?.to_luma8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgba, RgbaImage};

    fn tiny_image() -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(16, 16, Rgba([255, 255, 255, 255])))
    }

    #[test]
    fn upload_clears_prior_assignments() {
        let mut session = Session::new();
        session.assignments.insert('א', 0);
        session.upload(tiny_image(), 1, &Config::default());
        assert!(session.assignments.is_empty());
    }

    #[test]
    fn redetect_without_upload_is_bad_input() {
        let mut session = Session::new();
        let err = session.redetect(2, &Config::default()).unwrap_err();
        assert_eq!(err.kind(), "BadInput");
    }

    #[test]
    fn assign_rejects_unknown_detection_index() {
        let mut session = Session::new();
        session.upload(tiny_image(), 0, &Config::default());
        let mut assignments = BTreeMap::new();
        assignments.insert('א', 99);
        let err = session.assign(assignments).unwrap_err();
        assert_eq!(err.kind(), "BadState");
    }

    #[test]
    fn removing_a_detection_drops_and_reindexes_assignments() {
        let mut session = Session::new();
        session.detections = vec![
            Detection::reconstruct(BBox::new(0, 0, 10, 10), 50.0, 0.5, vec![]),
            Detection::reconstruct(BBox::new(20, 0, 10, 10), 50.0, 0.5, vec![]),
            Detection::reconstruct(BBox::new(40, 0, 10, 10), 50.0, 0.5, vec![]),
        ];
        session.assignments.insert('א', 0);
        session.assignments.insert('ב', 2);
        session.remove_detection(1).unwrap();
        assert_eq!(session.assignments[&'א'], 0);
        assert_eq!(session.assignments[&'ב'], 1);
    }

    #[test]
    fn merging_drops_consumed_assignments_and_reindexes_the_rest() {
        let mut session = Session::new();
        session.detections = vec![
            Detection::reconstruct(BBox::new(0, 0, 10, 10), 50.0, 0.5, vec![]),
            Detection::reconstruct(BBox::new(20, 0, 10, 10), 50.0, 0.5, vec![]),
            Detection::reconstruct(BBox::new(40, 0, 10, 10), 50.0, 0.5, vec![]),
            Detection::reconstruct(BBox::new(60, 0, 10, 10), 50.0, 0.5, vec![]),
            Detection::reconstruct(BBox::new(80, 0, 10, 10), 50.0, 0.5, vec![]),
        ];
        session.assignments.insert('א', 1);
        session.assignments.insert('ב', 2);
        session.assignments.insert('ג', 4);
        session.merge_detections(&[1, 3]).unwrap();
        assert_eq!(session.detections.len(), 4);
        assert!(!session.assignments.contains_key(&'א'));
        assert_eq!(session.assignments[&'ב'], 2);
        assert_eq!(session.assignments[&'ג'], 3);
    }

    #[test]
    fn splitting_drops_the_split_assignment_and_shifts_later_ones() {
        use image::Luma;

        // Two 6x6 ink blocks inside detection 1's bbox, far enough
        // apart that `split` sees two >=5x5 components.
        let mut binary = image::GrayImage::from_pixel(100, 20, Luma([0]));
        for y in 2..8 {
            for x in 20..26 {
                binary.put_pixel(x, y, Luma([255]));
            }
            for x in 34..40 {
                binary.put_pixel(x, y, Luma([255]));
            }
        }

        let mut session = Session::new();
        session.binary_image = Some(binary);
        session.detections = vec![
            Detection::reconstruct(BBox::new(0, 0, 10, 10), 50.0, 0.5, vec![]),
            Detection::reconstruct(BBox::new(20, 0, 20, 10), 72.0, 0.5, vec![]),
            Detection::reconstruct(BBox::new(60, 0, 10, 10), 50.0, 0.5, vec![]),
        ];
        session.assignments.insert('א', 0);
        session.assignments.insert('ב', 1);
        session.assignments.insert('ג', 2);

        session.split_detection(1).unwrap();

        assert_eq!(session.detections.len(), 4);
        assert!(!session.assignments.contains_key(&'ב'));
        assert_eq!(session.assignments[&'א'], 0);
        assert_eq!(session.assignments[&'ג'], 3);
    }

    #[test]
    fn export_then_import_round_trips_detections() {
        let mut session = Session::new();
        session.upload(tiny_image(), 0, &Config::default());
        session.detections = vec![Detection::reconstruct(BBox::new(1, 1, 8, 8), 30.0, 0.47, vec![Point::new(1.0, 1.0)])];
        session.assignments.insert('א', 0);

        let snapshot = session.export_project("TestFont", &serde_json::json!({})).unwrap();
        let mut restored = Session::new();
        restored.import_project(snapshot).unwrap();

        assert_eq!(restored.detections.len(), 1);
        assert_eq!(restored.assignments[&'א'], 0);
    }

    #[test]
    fn import_rejects_unsupported_version() {
        let mut session = Session::new();
        let mut snapshot = session.export_project_skeleton();
        snapshot.version = 1;
        let err = session.import_project(snapshot).unwrap_err();
        assert_eq!(err.kind(), "BadInput");
    }

    impl Session {
        fn export_project_skeleton(&mut self) -> ProjectSnapshot {
            self.upload(tiny_image(), 0, &Config::default());
            self.export_project("X", &serde_json::json!({})).unwrap()
        }
    }
}
