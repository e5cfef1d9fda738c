use crate::detection::domain::detection::Detection;
use crate::shared::frame::Frame;

/// Domain interface for the neural face detector/embedder.
///
/// An empty result is a valid "no faces" answer. Implementations hold model
/// sessions, hence `&mut self`.
pub trait FaceDetector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, Box<dyn std::error::Error>>;

    /// Rebuilds internal model state after repeated downstream failures.
    ///
    /// Must be idempotent and must not touch stored identities.
    fn reinitialize(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        Ok(())
    }
}
