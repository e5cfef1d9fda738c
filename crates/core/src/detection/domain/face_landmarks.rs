//! 5-point face landmarks and the geometric pose measurements derived from them.

const LEFT_EYE: usize = 0;
const RIGHT_EYE: usize = 1;
const NOSE: usize = 2;
const LEFT_MOUTH: usize = 3;
const RIGHT_MOUTH: usize = 4;

#[derive(Clone, Debug, PartialEq)]
pub struct FaceLandmarks {
    /// `[left_eye, right_eye, nose, left_mouth, right_mouth]`.
    /// Points with x <= 0 are treated as invisible.
    points: [(f64, f64); 5],
}

impl FaceLandmarks {
    pub fn new(points: [(f64, f64); 5]) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[(f64, f64); 5] {
        &self.points
    }

    pub fn is_complete(&self) -> bool {
        self.points
            .iter()
            .all(|(x, y)| *x > 0.0 && x.is_finite() && y.is_finite())
    }

    pub fn left_eye(&self) -> (f64, f64) {
        self.points[LEFT_EYE]
    }

    pub fn right_eye(&self) -> (f64, f64) {
        self.points[RIGHT_EYE]
    }

    pub fn nose(&self) -> (f64, f64) {
        self.points[NOSE]
    }

    pub fn mouth_center(&self) -> (f64, f64) {
        let (l, r) = (self.points[LEFT_MOUTH], self.points[RIGHT_MOUTH]);
        ((l.0 + r.0) / 2.0, (l.1 + r.1) / 2.0)
    }

    pub fn eye_center(&self) -> (f64, f64) {
        let (l, r) = (self.left_eye(), self.right_eye());
        ((l.0 + r.0) / 2.0, (l.1 + r.1) / 2.0)
    }

    pub fn eye_distance(&self) -> f64 {
        let (l, r) = (self.left_eye(), self.right_eye());
        ((r.0 - l.0).powi(2) + (r.1 - l.1).powi(2)).sqrt()
    }

    /// Roll of the line through both eyes, degrees in `[0, 90]`.
    pub fn eye_angle_degrees(&self) -> f64 {
        let (l, r) = (self.left_eye(), self.right_eye());
        let angle = (r.1 - l.1).atan2(r.0 - l.0).to_degrees().abs();
        if angle > 90.0 {
            180.0 - angle
        } else {
            angle
        }
    }

    /// Horizontal nose displacement from the eye midpoint, relative to `face_width`.
    pub fn nose_offset(&self, face_width: f64) -> f64 {
        if face_width <= 0.0 {
            return f64::INFINITY;
        }
        (self.nose().0 - self.eye_center().0).abs() / face_width
    }

    /// Ratio of the nose-to-mouth drop over the eye-to-nose drop.
    ///
    /// Near 1.0 for a level gaze; grows when looking down and shrinks when
    /// looking up.
    pub fn vertical_ratio(&self) -> f64 {
        let eye_to_nose = self.nose().1 - self.eye_center().1;
        let nose_to_mouth = self.mouth_center().1 - self.nose().1;
        if eye_to_nose <= 0.0 {
            return f64::INFINITY;
        }
        nose_to_mouth / eye_to_nose
    }
}
