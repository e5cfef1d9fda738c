use thiserror::Error;

use crate::detection::domain::face_landmarks::FaceLandmarks;
use crate::shared::bounding_box::BoundingBox;
use crate::shared::vector;

/// A face found in one frame. Ephemeral: never outlives the frame cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub landmarks: Option<FaceLandmarks>,
    pub confidence: f64,
    /// Recognition-model embedding, not yet normalized.
    pub raw_embedding: Vec<f32>,
}

/// Detection data unusable for the identity pipeline this frame.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameError {
    #[error("detection box is empty or non-finite")]
    InvalidBox,
    #[error("detection has no embedding")]
    MissingEmbedding,
    #[error("detection embedding contains non-finite values")]
    NonFiniteEmbedding,
}

impl Detection {
    /// Checks the fields the recognition path relies on.
    ///
    /// A detection with a valid box but a bad embedding can still continue a
    /// track; only its evidence is unusable.
    pub fn check_embedding(&self) -> Result<(), FrameError> {
        if self.raw_embedding.is_empty() {
            return Err(FrameError::MissingEmbedding);
        }
        if !vector::is_finite(&self.raw_embedding) {
            return Err(FrameError::NonFiniteEmbedding);
        }
        Ok(())
    }

    pub fn check_box(&self) -> Result<(), FrameError> {
        if self.bbox.is_valid() {
            Ok(())
        } else {
            Err(FrameError::InvalidBox)
        }
    }
}
