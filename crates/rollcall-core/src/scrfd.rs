//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes the grayscale image to 640×640, decodes the three anchor-free
//! stride heads, applies NMS and maps the survivors back to integer boxes
//! clamped to the source image.

use crate::detector::{Detector, DetectorError};
use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

/// Faces smaller than this on either side are discarded.
pub const DEFAULT_MIN_FACE_SIZE: u32 = 30;

/// Scale and padding applied by the letterbox resize.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Raw detection in source-image float coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Detection {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    confidence: f32,
}

/// Output tensor indices for one stride: (score_idx, bbox_idx).
type StrideOutputIndices = (usize, usize);

/// SCRFD-based face detector.
pub struct ScrfdDetector {
    session: Session,
    min_face_size: u32,
    stride_indices: [StrideOutputIndices; 3],
}

impl ScrfdDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: impl AsRef<Path>) -> Result<Self, DetectorError> {
        let model_path = model_path.as_ref();
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(
                model_path.display().to_string(),
            ));
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

        if output_names.len() < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires at least 6 outputs (3 strides × score/bbox), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            min_face_size: DEFAULT_MIN_FACE_SIZE,
            stride_indices,
        })
    }

    pub fn with_min_face_size(mut self, min_face_size: u32) -> Self {
        self.min_face_size = min_face_size;
        self
    }
}

impl Detector for ScrfdDetector {
    fn detect(&mut self, image: &DynamicImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }
        let (input, letterbox) = preprocess(&image.to_luma8());

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all_detections = Vec::new();
        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.stride_indices[stride_pos];

            let (_, scores) = outputs[score_idx].try_extract_tensor::<f32>().map_err(|e| {
                DetectorError::InferenceFailed(format!("scores stride {stride}: {e}"))
            })?;
            let (_, bboxes) = outputs[bbox_idx].try_extract_tensor::<f32>().map_err(|e| {
                DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}"))
            })?;

            all_detections.extend(decode_stride(
                scores,
                bboxes,
                stride,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        let kept = nms(all_detections, SCRFD_NMS_THRESHOLD);
        let boxes: Vec<BoundingBox> = kept
            .iter()
            .filter_map(|d| to_pixel_box(d, image.width(), image.height(), self.min_face_size))
            .collect();

        tracing::debug!(faces = boxes.len(), "SCRFD detection complete");
        Ok(boxes)
    }
}

/// Letterbox a grayscale frame into a normalized NCHW tensor.
fn preprocess(gray: &GrayImage) -> (Array4<f32>, LetterboxInfo) {
    let (width, height) = (gray.width() as f32, gray.height() as f32);
    let input = SCRFD_INPUT_SIZE as f32;
    let scale = (input / width).min(input / height);

    let new_w = ((width * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE as u32);
    let new_h = ((height * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE as u32);
    let pad_x = (SCRFD_INPUT_SIZE as u32 - new_w) as f32 / 2.0;
    let pad_y = (SCRFD_INPUT_SIZE as u32 - new_h) as f32 / 2.0;

    let resized = imageops::resize(gray, new_w, new_h, FilterType::Triangle);
    let (pad_x_start, pad_y_start) = (pad_x.floor() as usize, pad_y.floor() as usize);

    // Padding stays at zero, i.e. the normalized mean intensity.
    let mut tensor = Array4::<f32>::zeros((1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let normalized = (f32::from(pixel.0[0]) - SCRFD_MEAN) / SCRFD_STD;
        let (ty, tx) = (pad_y_start + y as usize, pad_x_start + x as usize);
        // Grayscale → 3-channel
        for channel in 0..3 {
            tensor[[0, channel, ty, tx]] = normalized;
        }
    }

    (tensor, LetterboxInfo { scale, pad_x, pad_y })
}

/// Map output tensors to stride slots by name ("score_8", "bbox_16", ...),
/// falling back to positional order [scores 8/16/32, bboxes 8/16/32].
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let mut named = [(0usize, 0usize); 3];
    for (slot, &stride) in named.iter_mut().zip(SCRFD_STRIDES.iter()) {
        match (find("score", stride), find("bbox", stride)) {
            (Some(score), Some(bbox)) => *slot = (score, bbox),
            _ => {
                tracing::info!(
                    ?names,
                    "SCRFD: output names not recognized, using positional mapping"
                );
                return [(0, 3), (1, 4), (2, 5)];
            }
        }
    }
    named
}

/// Decode detections for a single stride level into source coordinates.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<Detection> {
    let grid_w = SCRFD_INPUT_SIZE / stride;
    let grid_h = SCRFD_INPUT_SIZE / stride;
    let num_anchors = grid_h * grid_w * SCRFD_ANCHORS_PER_CELL;
    let stride_f = stride as f32;

    let mut detections = Vec::new();
    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let bbox_off = idx * 4;
        if bbox_off + 3 >= bboxes.len() {
            continue;
        }

        let anchor_idx = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_cx = (anchor_idx % grid_w) as f32 * stride_f;
        let anchor_cy = (anchor_idx / grid_w) as f32 * stride_f;

        let x1 = anchor_cx - bboxes[bbox_off] * stride_f;
        let y1 = anchor_cy - bboxes[bbox_off + 1] * stride_f;
        let x2 = anchor_cx + bboxes[bbox_off + 2] * stride_f;
        let y2 = anchor_cy + bboxes[bbox_off + 3] * stride_f;

        detections.push(Detection {
            x1: (x1 - letterbox.pad_x) / letterbox.scale,
            y1: (y1 - letterbox.pad_y) / letterbox.scale,
            x2: (x2 - letterbox.pad_x) / letterbox.scale,
            y2: (y2 - letterbox.pad_y) / letterbox.scale,
            confidence: score,
        });
    }

    detections
}

/// Non-Maximum Suppression; output is sorted by confidence, highest first.
fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Detection> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(k, &det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

fn iou(a: &Detection, b: &Detection) -> f32 {
    let inter_w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let inter_h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter_area = inter_w * inter_h;

    let area_a = (a.x2 - a.x1) * (a.y2 - a.y1);
    let area_b = (b.x2 - b.x1) * (b.y2 - b.y1);
    let union_area = area_a + area_b - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}

/// Round to whole pixels, clamp into the image and apply the size floor.
fn to_pixel_box(d: &Detection, width: u32, height: u32, min_size: u32) -> Option<BoundingBox> {
    let x1 = d.x1.round().clamp(0.0, width as f32) as i32;
    let y1 = d.y1.round().clamp(0.0, height as f32) as i32;
    let x2 = d.x2.round().clamp(0.0, width as f32) as i32;
    let y2 = d.y2.round().clamp(0.0, height as f32) as i32;

    let bbox = BoundingBox::new(x1, y1, x2 - x1, y2 - y1);
    let min = i32::try_from(min_size.max(1)).unwrap_or(i32::MAX);
    (bbox.width >= min && bbox.height >= min).then_some(bbox)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, y: f32, w: f32, h: f32, confidence: f32) -> Detection {
        Detection {
            x1: x,
            y1: y,
            x2: x + w,
            y2: y + h,
            confidence,
        }
    }

    #[test]
    fn test_iou_identical() {
        let a = det(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = det(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = det(5.0, 0.0, 10.0, 10.0, 1.0);
        // Overlap 50, union 150
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let result = nms(
            vec![
                det(5.0, 5.0, 100.0, 100.0, 0.8),
                det(0.0, 0.0, 100.0, 100.0, 0.9),
                det(200.0, 200.0, 50.0, 50.0, 0.7),
            ],
            0.4,
        );
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_to_pixel_box_clamps_to_image() {
        let d = det(-12.4, 5.6, 80.0, 300.0, 0.9);
        let bbox = to_pixel_box(&d, 64, 100, 30).unwrap();
        assert_eq!(bbox, BoundingBox::new(0, 6, 64, 94));
        assert!(bbox.fits_within(64, 100));
    }

    #[test]
    fn test_to_pixel_box_drops_small_faces() {
        let d = det(10.0, 10.0, 20.0, 50.0, 0.9);
        assert!(to_pixel_box(&d, 200, 200, 30).is_none());
        assert!(to_pixel_box(&d, 200, 200, 16).is_some());
    }

    #[test]
    fn test_letterbox_padding_centers_image() {
        let gray = GrayImage::from_pixel(320, 160, image::Luma([200u8]));
        let (tensor, letterbox) = preprocess(&gray);
        assert!((letterbox.scale - 2.0).abs() < 1e-6);
        assert!((letterbox.pad_y - 160.0).abs() < 1e-6);
        // Padding row normalizes to zero, image rows keep the upscaled value
        let expected = (200.0 - SCRFD_MEAN) / SCRFD_STD;
        assert!(tensor[[0, 0, 0, 320]].abs() < 1e-6);
        assert!((tensor[[0, 0, 160, 0]] - expected).abs() < 1e-6);
        assert!((tensor[[0, 2, 479, 639]] - expected).abs() < 1e-6);
        assert!(tensor[[0, 1, 480, 320]].abs() < 1e-6);
    }

    #[test]
    fn test_discover_output_indices_named() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32",
            "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(discover_output_indices(&names), [(2, 0), (5, 3), (8, 6)]);
    }

    #[test]
    fn test_discover_output_indices_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(discover_output_indices(&names), [(0, 3), (1, 4), (2, 5)]);
    }
}
