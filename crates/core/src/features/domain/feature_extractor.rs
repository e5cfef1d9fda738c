use thiserror::Error;

use crate::detection::domain::detection::Detection;
use crate::shared::frame::Frame;

/// A scorer or extractor could not produce a value for one face crop.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    #[error("face crop is empty")]
    EmptyCrop,
    #[error("extracted features contain non-finite values")]
    NonFinite,
    #[error("feature extraction failed: {0}")]
    Failed(String),
}

/// Builds the hybrid vector for one detection.
///
/// Implementations are pure: the same crop and detection always give the
/// same vector, which is what lets the feature cache be dropped at will.
pub trait FeatureExtractor: Send {
    fn extract(&self, crop: &Frame, detection: &Detection) -> Result<Vec<f32>, ExtractionError>;
}
