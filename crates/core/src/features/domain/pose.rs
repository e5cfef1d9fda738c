use crate::detection::domain::face_landmarks::FaceLandmarks;
use crate::shared::bounding_box::BoundingBox;
use crate::shared::config::PoseGates;

/// Head pose measurements derived from 5-point landmarks.
#[derive(Clone, Debug, PartialEq)]
pub struct PoseMetrics {
    /// Roll of the eye line, degrees.
    pub eye_angle: f64,
    /// Eye distance relative to face width.
    pub eye_ratio: f64,
    /// Horizontal nose displacement relative to face width.
    pub nose_offset: f64,
    pub vertical_ratio: f64,
}

impl PoseMetrics {
    /// Metrics for a face without usable landmarks; fails every gate.
    pub fn unknown() -> Self {
        Self {
            eye_angle: f64::INFINITY,
            eye_ratio: 0.0,
            nose_offset: f64::INFINITY,
            vertical_ratio: f64::INFINITY,
        }
    }

    /// Frontalness in `[0, 1]`; 1.0 is a level, centred face.
    pub fn score(&self) -> f64 {
        let roll = 1.0 - self.eye_angle / 45.0;
        let yaw = 1.0 - self.nose_offset / 0.5;
        let pitch = 1.0 - (self.vertical_ratio - 1.0).abs();
        let score = (roll.clamp(0.0, 1.0) + yaw.clamp(0.0, 1.0) + pitch.clamp(0.0, 1.0)) / 3.0;
        if score.is_finite() {
            score
        } else {
            0.0
        }
    }

    pub fn passes(&self, gates: &PoseGates) -> bool {
        self.failed_gate(gates).is_none()
    }

    pub fn failed_gate(&self, gates: &PoseGates) -> Option<&'static str> {
        if !(self.eye_angle <= gates.max_eye_angle) {
            Some("eye angle")
        } else if !(self.eye_ratio >= gates.min_eye_ratio) {
            Some("eye ratio")
        } else if !(self.nose_offset <= gates.max_nose_offset) {
            Some("nose offset")
        } else if !gates.vertical_ratio_range().contains(&self.vertical_ratio) {
            Some("vertical ratio")
        } else {
            None
        }
    }
}

/// Scores head pose from landmarks. Pure and stateless.
pub trait PoseScorer: Send {
    fn score(&self, landmarks: Option<&FaceLandmarks>, bbox: &BoundingBox) -> PoseMetrics;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn frontal() -> PoseMetrics {
        PoseMetrics {
            eye_angle: 2.0,
            eye_ratio: 0.4,
            nose_offset: 0.02,
            vertical_ratio: 1.0,
        }
    }

    #[test]
    fn test_frontal_pose_passes() {
        assert!(frontal().passes(&PoseGates::default()));
        assert!(frontal().score() > 0.9);
    }

    #[test]
    fn test_unknown_pose_fails_and_scores_zero() {
        let pose = PoseMetrics::unknown();
        assert_eq!(pose.failed_gate(&PoseGates::default()), Some("eye angle"));
        assert_eq!(pose.score(), 0.0);
    }

    #[rstest]
    #[case(PoseMetrics { eye_angle: 15.0, ..frontal() }, "eye angle")]
    #[case(PoseMetrics { eye_ratio: 0.1, ..frontal() }, "eye ratio")]
    #[case(PoseMetrics { nose_offset: 0.2, ..frontal() }, "nose offset")]
    #[case(PoseMetrics { vertical_ratio: 0.5, ..frontal() }, "vertical ratio")]
    #[case(PoseMetrics { vertical_ratio: 1.8, ..frontal() }, "vertical ratio")]
    fn test_failing_pose_gate(#[case] pose: PoseMetrics, #[case] gate: &str) {
        assert_eq!(pose.failed_gate(&PoseGates::default()), Some(gate));
    }
}
