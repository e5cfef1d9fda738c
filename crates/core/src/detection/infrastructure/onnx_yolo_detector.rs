//! YOLO-pose face detector using ONNX Runtime via `ort`.
//!
//! Handles letterbox preprocessing, inference and NMS, then embeds every
//! surviving face with [`ArcFaceEmbedder`] so each [`Detection`] leaves the
//! detector with its raw recognition embedding attached.
use std::path::{Path, PathBuf};

use crate::detection::domain::detection::Detection;
use crate::detection::domain::face_detector::FaceDetector;
use crate::detection::domain::face_landmarks::FaceLandmarks;
use crate::detection::infrastructure::arcface_embedder::ArcFaceEmbedder;
use crate::detection::infrastructure::onnx_session::{load_session, SessionProfile};
use crate::shared::bounding_box::BoundingBox;
use crate::shared::config::DetectorConfig;
use crate::shared::frame::Frame;

/// Fallback input resolution when the model doesn't specify dimensions.
const DEFAULT_INPUT_SIZE: u32 = 640;

const NMS_IOU_THRESH: f64 = 0.45;

/// 5 landmarks × (x, y, conf).
const NUM_KEYPOINT_VALUES: usize = 15;

const KEYPOINT_CONF_THRESH: f64 = 0.5;

pub struct OnnxYoloDetector {
    session: ort::session::Session,
    embedder: ArcFaceEmbedder,
    model_path: PathBuf,
    config: DetectorConfig,
    input_size: u32,
}

impl OnnxYoloDetector {
    /// Load a YOLO-pose ONNX model.
    ///
    /// The input resolution is read from the model's NCHW input shape and
    /// falls back to 640 when the shape is dynamic.
    pub fn new(
        model_path: &Path,
        embedder: ArcFaceEmbedder,
        config: DetectorConfig,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let session = load_session(model_path, SessionProfile::Cpu)?;
        let input_size = read_input_size(&session).unwrap_or(DEFAULT_INPUT_SIZE);
        log::info!(
            "Loaded detector {} (input {input_size}px)",
            model_path.display()
        );

        Ok(Self {
            session,
            embedder,
            model_path: model_path.to_path_buf(),
            config,
            input_size,
        })
    }

    fn locate_faces(
        &mut self,
        frame: &Frame,
    ) -> Result<Vec<RawDetection>, Box<dyn std::error::Error>> {
        let (input_tensor, scale, pad_x, pad_y) = letterbox(frame, self.input_size);

        let input_value = ort::value::Tensor::from_array(input_tensor)?;
        let outputs = self.session.run(ort::inputs![input_value])?;
        if outputs.len() == 0 {
            return Err("YOLO model produced no outputs".into());
        }
        let tensor = outputs[0].try_extract_array::<f32>()?;
        let shape = tensor.shape();
        if shape.len() != 3 {
            return Err(format!("Unexpected YOLO output shape: {shape:?}").into());
        }

        // [1, features, detections] (transposed) or [1, detections, features]
        let transposed = shape[1] < shape[2];
        let (num_dets, num_feats) = if transposed {
            (shape[2], shape[1])
        } else {
            (shape[1], shape[2])
        };
        let data = tensor.as_slice().ok_or("Cannot get tensor slice")?;

        let mut raw = Vec::new();
        for i in 0..num_dets {
            let row: Vec<f32> = if transposed {
                (0..num_feats).map(|f| data[f * num_dets + i]).collect()
            } else {
                data[i * num_feats..(i + 1) * num_feats].to_vec()
            };
            if let Some(det) = parse_row(&row, scale, pad_x as f64, pad_y as f64) {
                if det.confidence >= self.config.min_detection_confidence {
                    raw.push(det);
                }
            }
        }

        let min_size = self.config.min_face_size;
        Ok(nms(&mut raw, NMS_IOU_THRESH)
            .into_iter()
            .filter(|d| d.bbox.width().min(d.bbox.height()) >= min_size)
            .collect())
    }
}

impl FaceDetector for OnnxYoloDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, Box<dyn std::error::Error>> {
        let faces = self.locate_faces(frame)?;

        let mut detections = Vec::with_capacity(faces.len());
        for face in faces {
            let raw_embedding = match frame.crop(&face.bbox) {
                Some(crop) => self.embedder.embed(&crop).unwrap_or_else(|e| {
                    log::warn!("Embedding failed for frame {}: {e}", frame.index());
                    Vec::new()
                }),
                None => Vec::new(),
            };
            detections.push(Detection {
                bbox: face.bbox,
                landmarks: face.keypoints.map(FaceLandmarks::new),
                confidence: face.confidence,
                raw_embedding,
            });
        }
        Ok(detections)
    }

    fn reinitialize(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        log::warn!("Reinitializing detector from {}", self.model_path.display());
        self.session = load_session(&self.model_path, SessionProfile::Cpu)?;
        self.embedder.reload()
    }
}

fn read_input_size(session: &ort::session::Session) -> Option<u32> {
    let input = session.inputs().first()?;
    if let ort::value::ValueType::Tensor { ref shape, .. } = input.dtype() {
        if shape.len() >= 4 && shape[2] > 0 {
            return Some(shape[2] as u32);
        }
    }
    None
}

/// Row layout: `[cx, cy, w, h, conf, kp0_x, kp0_y, kp0_conf, ...]` in
/// letterbox coordinates.
fn parse_row(row: &[f32], scale: f64, pad_x: f64, pad_y: f64) -> Option<RawDetection> {
    if row.len() < 5 {
        return None;
    }
    let (cx, cy, w, h) = (row[0] as f64, row[1] as f64, row[2] as f64, row[3] as f64);
    let bbox = BoundingBox::new(
        ((cx - w / 2.0) - pad_x) / scale,
        ((cy - h / 2.0) - pad_y) / scale,
        ((cx + w / 2.0) - pad_x) / scale,
        ((cy + h / 2.0) - pad_y) / scale,
    );

    let keypoints = (row.len() >= 5 + NUM_KEYPOINT_VALUES).then(|| {
        let mut pts = [(0.0f64, 0.0f64); 5];
        for (k, pt) in pts.iter_mut().enumerate() {
            let base = 5 + k * 3;
            if row[base + 2] as f64 >= KEYPOINT_CONF_THRESH {
                *pt = (
                    (row[base] as f64 - pad_x) / scale,
                    (row[base + 1] as f64 - pad_y) / scale,
                );
            }
        }
        pts
    });

    Some(RawDetection {
        bbox,
        confidence: row[4] as f64,
        keypoints,
    })
}

/// Letterbox-resize a frame to `target_size` × `target_size`.
///
/// Returns `(NCHW float32 tensor, scale, pad_x, pad_y)`.
fn letterbox(frame: &Frame, target_size: u32) -> (ndarray::Array4<f32>, f64, u32, u32) {
    let fw = frame.width() as f64;
    let fh = frame.height() as f64;
    let target = target_size as f64;

    let scale = (target / fw).min(target / fh);
    let new_w = (fw * scale).round() as u32;
    let new_h = (fh * scale).round() as u32;
    let pad_x = (target_size - new_w) / 2;
    let pad_y = (target_size - new_h) / 2;

    // Padding is 114/255 gray, YOLO convention.
    let gray = 114.0f32 / 255.0;
    let mut tensor =
        ndarray::Array4::<f32>::from_elem((1, 3, target_size as usize, target_size as usize), gray);

    let src = frame.data();
    let src_w = frame.width() as usize;
    let src_h = frame.height() as usize;
    let channels = frame.channels() as usize;

    for y in 0..new_h as usize {
        let src_y = ((y as f64 / scale) as usize).min(src_h - 1);
        for x in 0..new_w as usize {
            let src_x = ((x as f64 / scale) as usize).min(src_w - 1);
            let offset = (src_y * src_w + src_x) * channels;
            for c in 0..3 {
                let value = src[offset + c.min(channels - 1)];
                tensor[[0, c, pad_y as usize + y, pad_x as usize + x]] = value as f32 / 255.0;
            }
        }
    }

    (tensor, scale, pad_x, pad_y)
}

#[derive(Clone, Debug)]
struct RawDetection {
    bbox: BoundingBox,
    confidence: f64,
    keypoints: Option<[(f64, f64); 5]>,
}

/// Greedy NMS: sort by confidence descending, suppress overlapping boxes.
fn nms(dets: &mut [RawDetection], iou_thresh: f64) -> Vec<RawDetection> {
    dets.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<RawDetection> = Vec::new();
    for det in dets.iter() {
        if keep.iter().all(|k| k.bbox.iou(&det.bbox) <= iou_thresh) {
            keep.push(det.clone());
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn frame(value: u8, w: u32, h: u32) -> Frame {
        Frame::new(vec![value; (w * h * 3) as usize], w, h, 3, 0, Duration::ZERO)
    }

    fn raw(x1: f64, y1: f64, x2: f64, y2: f64, confidence: f64) -> RawDetection {
        RawDetection {
            bbox: BoundingBox::new(x1, y1, x2, y2),
            confidence,
            keypoints: None,
        }
    }

    #[test]
    fn test_letterbox_preserves_aspect_ratio() {
        // scale = min(640/200, 640/100) = 3.2 → 640x320, pad_y = 160
        let (tensor, scale, pad_x, pad_y) = letterbox(&frame(128, 200, 100), 640);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert!((scale - 3.2).abs() < 0.01);
        assert_eq!(pad_x, 0);
        assert_eq!(pad_y, 160);
    }

    #[test]
    fn test_letterbox_values_normalized() {
        let (tensor, _, pad_x, pad_y) = letterbox(&frame(255, 100, 50), 640);
        let (y, x) = (pad_y as usize + 1, pad_x as usize + 1);
        assert!((tensor[[0, 0, y, x]] - 1.0).abs() < 0.01);
        assert!((tensor[[0, 0, 0, 0]] - 114.0 / 255.0).abs() < 0.01);
    }

    #[test]
    fn test_parse_row_maps_back_to_frame_coords() {
        // Box centred at (330, 330) size 100 in letterbox space, scale 2, pad 10
        let mut row = vec![330.0, 330.0, 100.0, 100.0, 0.9];
        for _ in 0..5 {
            row.extend_from_slice(&[110.0, 210.0, 0.9]);
        }
        let det = parse_row(&row, 2.0, 10.0, 10.0).unwrap();
        assert_eq!(det.bbox.as_array(), [135.0, 135.0, 185.0, 185.0]);
        assert_eq!(det.keypoints.unwrap()[0], (50.0, 100.0));
    }

    #[test]
    fn test_parse_row_hides_low_confidence_keypoints() {
        let mut row = vec![50.0, 50.0, 20.0, 20.0, 0.9];
        for _ in 0..5 {
            row.extend_from_slice(&[40.0, 40.0, 0.1]);
        }
        let det = parse_row(&row, 1.0, 0.0, 0.0).unwrap();
        assert_eq!(det.keypoints.unwrap()[2], (0.0, 0.0));
    }

    #[test]
    fn test_parse_row_too_short() {
        assert!(parse_row(&[1.0, 2.0, 3.0], 1.0, 0.0, 0.0).is_none());
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let mut dets = vec![
            raw(0.0, 0.0, 100.0, 100.0, 0.8),
            raw(5.0, 5.0, 105.0, 105.0, 0.9),
        ];
        let kept = nms(&mut dets, 0.3);
        assert_eq!(kept.len(), 1);
        assert!((kept[0].confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_nms_keeps_non_overlapping() {
        let mut dets = vec![
            raw(0.0, 0.0, 50.0, 50.0, 0.9),
            raw(200.0, 200.0, 250.0, 250.0, 0.8),
        ];
        assert_eq!(nms(&mut dets, 0.3).len(), 2);
    }

    #[test]
    fn test_nms_empty_input() {
        assert!(nms(&mut [], 0.3).is_empty());
    }
}
