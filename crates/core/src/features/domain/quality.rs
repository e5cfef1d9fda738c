//! Image quality metrics for a face crop and the registration gates they
//! are checked against.

use crate::features::domain::feature_extractor::ExtractionError;
use crate::shared::bounding_box::BoundingBox;
use crate::shared::config::QualityGates;
use crate::shared::frame::Frame;

/// Brightness that scores best; mid-grey, well inside the default gate.
const IDEAL_BRIGHTNESS: f64 = 128.0;

/// Laplacian variance at which sharpness scores 0.5.
const BLUR_HALF_SCORE: f64 = 100.0;

/// Face dimension at which the size term saturates.
const FULL_SCORE_DIMENSION: f64 = 160.0;

#[derive(Clone, Debug, PartialEq)]
pub struct QualityMetrics {
    /// Mean luma of the crop, 0..=255.
    pub brightness: f64,
    /// Variance of the Laplacian; higher is sharper.
    pub blur_score: f64,
    /// Smaller side of the face box, pixels.
    pub face_dimension: f64,
    /// Width over height of the face box.
    pub aspect_ratio: f64,
}

impl QualityMetrics {
    /// Scalar quality in `[0, 1]` used to weight evidence and rank stored
    /// embeddings.
    pub fn score(&self) -> f64 {
        let brightness = 1.0 - ((self.brightness - IDEAL_BRIGHTNESS).abs() / IDEAL_BRIGHTNESS);
        let sharpness = self.blur_score.max(0.0) / (self.blur_score.max(0.0) + BLUR_HALF_SCORE);
        let size = self.face_dimension / FULL_SCORE_DIMENSION;
        let score =
            (brightness.clamp(0.0, 1.0) + sharpness.clamp(0.0, 1.0) + size.clamp(0.0, 1.0)) / 3.0;
        if score.is_finite() {
            score
        } else {
            0.0
        }
    }

    pub fn passes(&self, gates: &QualityGates) -> bool {
        self.failed_gate(gates).is_none()
    }

    /// Name of the first gate this crop fails, for logging.
    pub fn failed_gate(&self, gates: &QualityGates) -> Option<&'static str> {
        if !gates.brightness_range().contains(&self.brightness) {
            Some("brightness")
        } else if !(self.blur_score >= gates.min_blur_score) {
            Some("blur")
        } else if !(self.face_dimension >= gates.min_face_dimension) {
            Some("face dimension")
        } else if !gates.aspect_ratio_range().contains(&self.aspect_ratio) {
            Some("aspect ratio")
        } else {
            None
        }
    }
}

/// Scores the quality of a face crop. Pure and stateless.
pub trait QualityScorer: Send {
    fn score(&self, crop: &Frame, bbox: &BoundingBox) -> Result<QualityMetrics, ExtractionError>;
}
