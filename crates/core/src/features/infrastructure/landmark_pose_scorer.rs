use crate::detection::domain::face_landmarks::FaceLandmarks;
use crate::features::domain::pose::{PoseMetrics, PoseScorer};
use crate::shared::bounding_box::BoundingBox;

/// Pose from 5-point landmarks, relative to the face box width.
#[derive(Default)]
pub struct LandmarkPoseScorer;

impl LandmarkPoseScorer {
    pub fn new() -> Self {
        Self
    }
}

impl PoseScorer for LandmarkPoseScorer {
    fn score(&self, landmarks: Option<&FaceLandmarks>, bbox: &BoundingBox) -> PoseMetrics {
        let Some(lm) = landmarks.filter(|lm| lm.is_complete()) else {
            return PoseMetrics::unknown();
        };
        let face_width = bbox.width();
        PoseMetrics {
            eye_angle: lm.eye_angle_degrees(),
            eye_ratio: if face_width > 0.0 {
                lm.eye_distance() / face_width
            } else {
                0.0
            },
            nose_offset: lm.nose_offset(face_width),
            vertical_ratio: lm.vertical_ratio(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::config::PoseGates;
    use approx::assert_relative_eq;

    fn frontal() -> FaceLandmarks {
        FaceLandmarks::new([
            (440.0, 350.0),
            (560.0, 350.0),
            (500.0, 410.0),
            (460.0, 470.0),
            (540.0, 470.0),
        ])
    }

    #[test]
    fn test_frontal_face_passes_gates() {
        let bbox = BoundingBox::new(400.0, 280.0, 600.0, 520.0);
        let pose = LandmarkPoseScorer::new().score(Some(&frontal()), &bbox);
        assert_relative_eq!(pose.eye_ratio, 0.6);
        assert_relative_eq!(pose.nose_offset, 0.0);
        assert!(pose.passes(&PoseGates::default()));
    }

    #[test]
    fn test_missing_landmarks_give_unknown_pose() {
        let bbox = BoundingBox::new(0.0, 0.0, 100.0, 100.0);
        assert_eq!(
            LandmarkPoseScorer::new().score(None, &bbox),
            PoseMetrics::unknown()
        );
    }

    #[test]
    fn test_incomplete_landmarks_give_unknown_pose() {
        let mut points = *frontal().points();
        points[4] = (0.0, 0.0);
        let bbox = BoundingBox::new(400.0, 280.0, 600.0, 520.0);
        let pose = LandmarkPoseScorer::new().score(Some(&FaceLandmarks::new(points)), &bbox);
        assert!(!pose.passes(&PoseGates::default()));
    }
}
