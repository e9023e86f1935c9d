//! The HTTP surface: a thin JSON layer over `Session`. Every
//! Session-mutating handler takes the same mutex, matching the
//! single-threaded-core requirement; the framework may still accept
//! connections concurrently.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::GenericImageView;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::font::{self, FontMetadata};
use crate::geometry::BBox;
use crate::glyph::{self, Adjustment};
use crate::session::Session;

pub struct AppState {
    pub config: Config,
    pub session: Mutex<Session>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let max_upload = state.config.max_upload_bytes as usize;
    Router::new()
        .route("/health", get(health))
        .route("/upload", post(upload))
        .route("/redetect", post(redetect))
        .route("/add-detection", post(add_detection))
        .route("/remove-detection", post(remove_detection))
        .route("/merge-detections", post(merge_detections))
        .route("/split-detection", post(split_detection))
        .route("/assign-letters", post(assign_letters))
        .route("/generate-font", post(generate_font))
        .route("/session-clear", post(session_clear))
        .route("/export-project", post(export_project))
        .route("/import-project", post(import_project))
        .layer(DefaultBodyLimit::max(max_upload))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
}

async fn health() -> Json<HealthBody> {
    Json(HealthBody { status: "ok" })
}

#[derive(Serialize)]
struct BBoxBody {
    x: i32,
    y: i32,
    w: i32,
    h: i32,
}

impl From<BBox> for BBoxBody {
    fn from(b: BBox) -> Self {
        Self { x: b.x, y: b.y, w: b.w, h: b.h }
    }
}

#[derive(Serialize)]
struct DetectionBody {
    id: usize,
    bbox: BBoxBody,
    area: f64,
    fill_ratio: f64,
    image: String,
}

#[derive(Serialize)]
struct ImageInfo {
    width: u32,
    height: u32,
}

#[derive(Serialize)]
struct DetectResponse {
    count: usize,
    detections: Vec<DetectionBody>,
    image_info: ImageInfo,
}

const DETECTION_CROP_PADDING: i32 = 6;

fn build_detect_response(session: &Session) -> AppResult<DetectResponse> {
    let image = session.original_image.as_ref().ok_or_else(|| AppError::BadState("no image loaded".into()))?;
    let (w, h) = image.dimensions();

    let detections = session
        .detections
        .iter()
        .enumerate()
        .map(|(id, d)| {
            let padded = d.bbox.pad(DETECTION_CROP_PADDING, w as i32, h as i32);
            let crop = image.crop_imm(padded.x as u32, padded.y as u32, padded.w as u32, padded.h as u32);
            let mut bytes = Vec::new();
            crop.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
                .map_err(|e| AppError::InternalFailure(format!("encoding crop: {e}")))?;
            Ok(DetectionBody {
                id,
                bbox: d.bbox.into(),
                area: d.area,
                fill_ratio: d.fill_ratio,
                image: BASE64.encode(bytes),
            })
        })
        .collect::<AppResult<Vec<_>>>()?;

    Ok(DetectResponse { count: detections.len(), detections, image_info: ImageInfo { width: w, height: h } })
}

fn sanitize_filename(name: &str) -> String {
    let base: String = name.chars().filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-' || *c == '.').collect();
    let base = base.trim_start_matches('.');
    if base.is_empty() {
        "upload".to_string()
    } else {
        base.to_string()
    }
}

const ACCEPTED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp"];

async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> AppResult<Json<DetectResponse>> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut filename = String::new();
    let mut separation_level: u8 = 0;

    while let Some(field) = multipart.next_field().await.map_err(|e| AppError::BadInput(e.to_string()))? {
        match field.name().unwrap_or_default() {
            "file" => {
                filename = field.file_name().unwrap_or("upload").to_string();
                file_bytes = Some(field.bytes().await.map_err(|e| AppError::BadInput(e.to_string()))?.to_vec());
            }
            "separation_level" => {
                let text = field.text().await.map_err(|e| AppError::BadInput(e.to_string()))?;
                separation_level = text.trim().parse().map_err(|_| AppError::BadInput("separation_level must be an integer 0..5".into()))?;
            }
            _ => {}
        }
    }

    let bytes = file_bytes.ok_or_else(|| AppError::BadInput("missing file field".into()))?;
    if bytes.is_empty() {
        return Err(AppError::BadInput("uploaded file is empty".into()));
    }
    if bytes.len() as u64 > state.config.max_upload_bytes {
        return Err(AppError::BadInput(format!("upload exceeds {} bytes", state.config.max_upload_bytes)));
    }

    let ext = std::path::Path::new(&filename).extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase();
    if !ACCEPTED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(AppError::BadInput(format!("unsupported extension: {ext}")));
    }
    if !(0..=5).contains(&separation_level) {
        return Err(AppError::BadInput("separation_level must be 0..5".into()));
    }

    let saved_name = format!("{}_{}", chrono::Utc::now().timestamp_millis(), sanitize_filename(&filename));
    let saved_path = state.config.upload_dir.join(&saved_name);
    std::fs::write(&saved_path, &bytes).map_err(|e| AppError::InternalFailure(format!("saving upload: {e}")))?;

    let image = image::load_from_memory(&bytes).map_err(|e| AppError::DecodeFailure(e.to_string()))?;
    tracing::info!(width = image.width(), height = image.height(), bytes = bytes.len(), "image loaded");

    let mut session = state.session.lock().await;
    session.upload(image, separation_level, &state.config);
    tracing::info!(count = session.detections.len(), "detection complete");

    Ok(Json(build_detect_response(&session)?))
}

#[derive(Deserialize)]
struct RedetectRequest {
    separation_level: u8,
}

async fn redetect(State(state): State<Arc<AppState>>, Json(req): Json<RedetectRequest>) -> AppResult<Json<DetectResponse>> {
    if !(0..=5).contains(&req.separation_level) {
        return Err(AppError::BadInput("separation_level must be 0..5".into()));
    }
    let mut session = state.session.lock().await;
    session.redetect(req.separation_level, &state.config)?;
    Ok(Json(build_detect_response(&session)?))
}

fn build_list_response(session: &Session) -> AppResult<Json<DetectResponse>> {
    Ok(Json(build_detect_response(session)?))
}

#[derive(Deserialize)]
struct AddDetectionRequest {
    x: i32,
    y: i32,
    w: i32,
    h: i32,
}

async fn add_detection(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddDetectionRequest>,
) -> AppResult<Json<DetectResponse>> {
    let mut session = state.session.lock().await;
    session.add_detection(BBox::new(req.x, req.y, req.w, req.h))?;
    build_list_response(&session)
}

#[derive(Deserialize)]
struct RemoveDetectionRequest {
    id: usize,
}

async fn remove_detection(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RemoveDetectionRequest>,
) -> AppResult<Json<DetectResponse>> {
    let mut session = state.session.lock().await;
    session.remove_detection(req.id)?;
    build_list_response(&session)
}

#[derive(Deserialize)]
struct MergeDetectionsRequest {
    ids: Vec<usize>,
}

async fn merge_detections(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MergeDetectionsRequest>,
) -> AppResult<Json<DetectResponse>> {
    let mut session = state.session.lock().await;
    session.merge_detections(&req.ids)?;
    build_list_response(&session)
}

#[derive(Deserialize)]
struct SplitDetectionRequest {
    id: usize,
}

async fn split_detection(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SplitDetectionRequest>,
) -> AppResult<Json<DetectResponse>> {
    let mut session = state.session.lock().await;
    session.split_detection(req.id)?;
    build_list_response(&session)
}

#[derive(Deserialize)]
struct AssignmentEntry {
    detection_id: usize,
    hebrew_char: char,
}

#[derive(Deserialize)]
struct AssignLettersRequest {
    assignments: Vec<AssignmentEntry>,
}

#[derive(Serialize)]
struct AssignLettersResponse {
    assigned_count: usize,
}

async fn assign_letters(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AssignLettersRequest>,
) -> AppResult<Json<AssignLettersResponse>> {
    let mut map = BTreeMap::new();
    for entry in req.assignments {
        map.insert(entry.hebrew_char, entry.detection_id);
    }
    let assigned_count = map.len();

    let mut session = state.session.lock().await;
    session.assign(map)?;
    Ok(Json(AssignLettersResponse { assigned_count }))
}

#[derive(Deserialize, Clone)]
struct AdjustmentBody {
    #[serde(default = "default_scale")]
    scale: f64,
    #[serde(default, rename = "offsetX")]
    offset_x: f64,
    #[serde(default, rename = "offsetY")]
    offset_y: f64,
    #[serde(default)]
    spacing: f64,
}

fn default_scale() -> f64 {
    100.0
}

impl From<AdjustmentBody> for Adjustment {
    fn from(b: AdjustmentBody) -> Self {
        Adjustment { scale: b.scale, offset_x: b.offset_x, offset_y: b.offset_y, spacing: b.spacing }
    }
}

#[derive(Deserialize)]
struct GenerateFontRequest {
    font_name: String,
    ref_height: Option<f64>,
    #[serde(default)]
    adjustments: BTreeMap<char, AdjustmentBody>,
    #[serde(default)]
    metadata: FontMetadataBody,
}

#[derive(Deserialize, Default)]
struct FontMetadataBody {
    version: Option<String>,
    description: Option<String>,
    license: Option<String>,
    url: Option<String>,
    author: Option<String>,
}

impl From<FontMetadataBody> for FontMetadata {
    fn from(b: FontMetadataBody) -> Self {
        FontMetadata { version: b.version, description: b.description, license: b.license, url: b.url, author: b.author }
    }
}

#[derive(Serialize)]
struct GenerateFontResponse {
    filename: String,
    glyph_count: usize,
}

async fn generate_font(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GenerateFontRequest>,
) -> AppResult<Json<GenerateFontResponse>> {
    let session = state.session.lock().await;

    if session.original_image.is_none() {
        return Err(AppError::BadInput("no image loaded".into()));
    }

    if session.assignments.is_empty() {
        return Err(AppError::BadInput("cannot generate a font with no assignments".into()));
    }

    let reference_height = req.ref_height.or_else(|| session.reference_height());
    let default_adj = Adjustment::default();

    let mut outlines = BTreeMap::new();
    for (&ch, &detection_idx) in &session.assignments {
        let detection = &session.detections[detection_idx];
        let binary = session.binary_image.as_ref().ok_or_else(|| AppError::InternalFailure("missing binary image".into()))?;
        let contours = crate::contour::extract_glyph_contours(binary, &detection.bbox, session.original_image.as_ref());

        let adj: Adjustment = req.adjustments.get(&ch).cloned().map(Into::into).unwrap_or(default_adj);
        if let Some(outline) = glyph::build_glyph(ch, &contours, detection.bbox.w as f64, detection.bbox.h as f64, reference_height, &adj) {
            outlines.insert(ch, outline);
        }
    }

    let metadata: FontMetadata = req.metadata.into();
    let fallback_path = font::find_fallback_font();
    let (bytes, glyph_count) =
        font::assemble_font(state.config.units_per_em, &req.font_name, &metadata, &outlines, fallback_path.as_deref())?;

    let filename = format!("{}_{}.ttf", sanitize_filename(&req.font_name), chrono::Utc::now().timestamp_millis());
    let output_path = state.config.output_dir.join(&filename);
    std::fs::write(&output_path, &bytes).map_err(|e| AppError::AssemblyFailure(format!("writing font file: {e}")))?;

    tracing::info!(glyph_count, bytes = bytes.len(), filename = %filename, "font assembled");
    Ok(Json(GenerateFontResponse { filename, glyph_count }))
}

async fn session_clear(State(state): State<Arc<AppState>>) -> AppResult<Json<serde_json::Value>> {
    let mut session = state.session.lock().await;
    session.clear();
    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(Deserialize)]
struct ExportProjectRequest {
    font_name: String,
    #[serde(default)]
    assignments: BTreeMap<char, usize>,
    #[serde(default)]
    adjustments: BTreeMap<char, AdjustmentBody>,
    #[serde(default)]
    metadata: serde_json::Value,
}

async fn export_project(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ExportProjectRequest>,
) -> AppResult<Json<crate::session::ProjectSnapshot>> {
    let mut session = state.session.lock().await;
    if !req.assignments.is_empty() {
        session.assign(req.assignments)?;
    }
    if !req.adjustments.is_empty() {
        let converted: BTreeMap<char, Adjustment> = req.adjustments.into_iter().map(|(c, a)| (c, a.into())).collect();
        session.set_adjustments(converted);
    }
    let snapshot = session.export_project(&req.font_name, &req.metadata)?;
    Ok(Json(snapshot))
}

async fn import_project(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> AppResult<Json<DetectResponse>> {
    let mut file_bytes: Option<Vec<u8>> = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| AppError::BadInput(e.to_string()))? {
        if field.name().unwrap_or_default() == "file" {
            file_bytes = Some(field.bytes().await.map_err(|e| AppError::BadInput(e.to_string()))?.to_vec());
        }
    }
    let bytes = file_bytes.ok_or_else(|| AppError::BadInput("missing file field".into()))?;
    let snapshot: crate::session::ProjectSnapshot =
        serde_json::from_slice(&bytes).map_err(|e| AppError::BadInput(format!("invalid project file: {e}")))?;

    let mut session = state.session.lock().await;
    session.import_project(snapshot)?;
    Ok(Json(build_detect_response(&session)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_filename_strips_path_separators_and_leading_dots() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "etcpasswd");
        assert_eq!(sanitize_filename("...hidden.ttf"), "hidden.ttf");
        assert_eq!(sanitize_filename(""), "upload");
    }
}
