use std::time::Duration;

use crate::features::domain::pose::PoseMetrics;
use crate::features::domain::quality::QualityMetrics;
use crate::identity::person::{PersonId, TrackId};
use crate::identity::state_machine::{IdentityState, StepOutcome};
use crate::shared::bounding_box::BoundingBox;

/// Everything a display needs about one live track.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackView {
    pub track_id: TrackId,
    pub bbox: BoundingBox,
    /// Whether the track had a detection this frame.
    pub visible: bool,
    /// Person display name, or `Unknown`.
    pub name: String,
    pub person: Option<PersonId>,
    pub confidence: f64,
    pub high_confidence: bool,
    pub quality: Option<QualityMetrics>,
    pub pose: Option<PoseMetrics>,
    pub state: IdentityState,
    /// `(collected, required)` evidence frames.
    pub progress: (usize, usize),
    pub is_active: bool,
}

/// Outcome of processing one frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameReport {
    pub frame_index: usize,
    pub timestamp: Duration,
    /// Live tracks ordered by id.
    pub tracks: Vec<TrackView>,
    pub active_track: Option<TrackId>,
    /// State machine results for the tracks stepped this frame.
    pub outcomes: Vec<(TrackId, StepOutcome)>,
    pub created_tracks: Vec<TrackId>,
    pub removed_tracks: Vec<TrackId>,
    /// Detections dropped before tracking for a malformed box.
    pub dropped_detections: usize,
    /// Tracks whose feature extraction failed this frame.
    pub extraction_failures: usize,
    /// Set when repeated extraction failures call for a detector reset.
    pub reinitialize_detector: bool,
}

impl FrameReport {
    pub fn track(&self, id: TrackId) -> Option<&TrackView> {
        self.tracks.iter().find(|t| t.track_id == id)
    }
}
