//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free decoding over three strides followed by NMS. Classroom photos
//! are letterboxed into the 640×640 model input, so every box and landmark is
//! mapped back into the original photo's coordinates.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
pub const SCRFD_DEFAULT_CONFIDENCE: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — download det_10g.onnx from insightface")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Scale and padding applied when letterboxing a photo into the model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn for_size(width: u32, height: u32) -> Self {
        let side = SCRFD_INPUT_SIZE as f32;
        let scale = (side / width as f32).min(side / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((side - new_w) / 2.0).floor(),
            pad_y: ((side - new_h) / 2.0).floor(),
        }
    }

    fn to_photo(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// (score, bbox, kps) output tensor indices for one stride.
type StrideOutputs = (usize, usize, usize);

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    confidence_threshold: f32,
    stride_outputs: [StrideOutputs; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path, confidence_threshold: f32) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD with keypoints needs 9 outputs, model has {}",
                output_names.len()
            )));
        }

        Ok(Self {
            session,
            confidence_threshold,
            stride_outputs: stride_output_indices(&output_names),
        })
    }

    /// Detect every face in a photo, highest confidence first.
    pub fn detect(&mut self, photo: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if photo.width() == 0 || photo.height() == 0 {
            return Ok(Vec::new());
        }
        let (input, letterbox) = preprocess(photo);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (slot, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_outputs[slot];
            let tensor = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| {
                        DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}"))
                    })
            };
            let scores = tensor(score_idx, "scores")?;
            let bboxes = tensor(bbox_idx, "bboxes")?;
            let kps = tensor(kps_idx, "kps")?;

            candidates.extend(decode_stride(
                scores,
                bboxes,
                kps,
                stride,
                &letterbox,
                self.confidence_threshold,
            ));
        }

        let faces = nms(candidates, SCRFD_NMS_THRESHOLD);
        tracing::debug!(count = faces.len(), "SCRFD detections after NMS");
        Ok(faces)
    }
}

/// Letterbox an RGB photo into a normalized 1×3×640×640 tensor.
fn preprocess(photo: &RgbImage) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::for_size(photo.width(), photo.height());
    let new_w = ((photo.width() as f32 * letterbox.scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
    let new_h = ((photo.height() as f32 * letterbox.scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
    let resized = imageops::resize(photo, new_w, new_h, FilterType::Triangle);

    let side = SCRFD_INPUT_SIZE as usize;
    // Padding is filled with the mean, which normalizes to 0.0.
    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
    let off_x = letterbox.pad_x as u32;
    let off_y = letterbox.pad_y as u32;

    for (x, y, pixel) in resized.enumerate_pixels() {
        let tx = (x + off_x) as usize;
        let ty = (y + off_y) as usize;
        if tx >= side || ty >= side {
            continue;
        }
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel.0[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (tensor, letterbox)
}

/// Map output tensors to strides by name ("score_8", "bbox_16", ...), falling
/// back to the standard positional layout [scores 8/16/32, bboxes, kps].
fn stride_output_indices(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?, find("kps", s)?)))
        .collect();

    match named {
        Some(v) if v.len() == 3 => [v[0], v[1], v[2]],
        _ => {
            tracing::debug!(?names, "SCRFD output names not recognized, using positional layout");
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

/// Decode detections for a single stride level.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid = SCRFD_INPUT_SIZE as usize / stride;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;
    let mut out = Vec::new();

    for idx in 0..anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }
        let Some(b) = bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let ax = (cell % grid) as f32 * step;
        let ay = (cell / grid) as f32 * step;

        let (x1, y1) = letterbox.to_photo(ax - b[0] * step, ay - b[1] * step);
        let (x2, y2) = letterbox.to_photo(ax + b[2] * step, ay + b[3] * step);

        let landmarks = kps.get(idx * 10..idx * 10 + 10).map(|k| {
            std::array::from_fn(|i| {
                letterbox.to_photo(ax + k[i * 2] * step, ay + k[i * 2 + 1] * step)
            })
        });

        out.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }

    out
}

/// Non-maximum suppression; output is sorted by confidence, descending.
fn nms(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<BoundingBox> = Vec::new();
    for candidate in candidates {
        if keep.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Intersection-over-union of two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32, confidence: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence, landmarks: None }
    }

    #[test]
    fn test_iou() {
        let a = bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert!(iou(&a, &bbox(20.0, 20.0, 10.0, 10.0, 1.0)).abs() < 1e-6);
        let half = bbox(5.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &half) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_separate_faces() {
        // A classroom photo: two overlapping proposals for one student, one distinct student.
        let result = nms(
            vec![
                bbox(5.0, 5.0, 100.0, 100.0, 0.8),
                bbox(200.0, 200.0, 50.0, 50.0, 0.7),
                bbox(0.0, 0.0, 100.0, 100.0, 0.9),
            ],
            0.4,
        );
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_letterbox_maps_back_to_photo() {
        let lb = Letterbox::for_size(1280, 720);
        assert!((lb.scale - 0.5).abs() < 1e-6);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 140.0);

        let (x, y) = lb.to_photo(100.0 * 0.5, 50.0 * 0.5 + 140.0);
        assert!((x - 100.0).abs() < 1e-3 && (y - 50.0).abs() < 1e-3);
    }

    #[test]
    fn test_preprocess_shape_and_padding() {
        let photo = RgbImage::from_pixel(320, 160, image::Rgb([255, 255, 255]));
        let (tensor, lb) = preprocess(&photo);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        // Top rows are letterbox padding.
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        let inside = tensor[[0, 1, lb.pad_y as usize + 10, 320]];
        assert!((inside - (255.0 - SCRFD_MEAN) / SCRFD_STD).abs() < 1e-3);
    }

    #[test]
    fn test_stride_output_indices() {
        let shuffled: Vec<String> = [
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32",
            "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(stride_output_indices(&shuffled), [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);

        let numeric: Vec<String> = (0..9).map(|i: usize| (428 + i).to_string()).collect();
        assert_eq!(stride_output_indices(&numeric), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_decode_stride_single_anchor() {
        let lb = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        let grid = 640 / 32;
        let anchors = grid * grid * 2;
        let mut scores = vec![0.0; anchors];
        let mut bboxes = vec![0.0; anchors * 4];
        let kps = vec![0.0; anchors * 10];
        // Anchor 2 sits in cell 1 → centre (32, 0).
        scores[2] = 0.9;
        bboxes[8..12].copy_from_slice(&[1.0, 0.0, 1.0, 2.0]);

        let dets = decode_stride(&scores, &bboxes, &kps, 32, &lb, 0.5);
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert_eq!((d.x, d.y, d.width, d.height), (0.0, 0.0, 64.0, 64.0));
        assert_eq!(d.landmarks.map(|l| l[0]), Some((32.0, 0.0)));
    }
}
