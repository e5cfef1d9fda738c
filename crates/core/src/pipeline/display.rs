use crate::identity::frame_report::{FrameReport, TrackView};

/// Receives the per-frame view of every live track.
///
/// A GUI overlay would draw boxes and labels here; the stream loop only
/// requires that each processed frame is offered once, in order.
pub trait DisplaySink: Send {
    fn show(&mut self, report: &FrameReport);

    /// Called once when the stream ends.
    fn finish(&mut self) {}
}

/// Discards every frame.
pub struct NullDisplaySink;

impl DisplaySink for NullDisplaySink {
    fn show(&mut self, _report: &FrameReport) {}
}

/// Logs one line per visible track every `throttle_frames` frames, and
/// immediately whenever a track's label changes.
pub struct LogDisplaySink {
    throttle_frames: usize,
    last_labels: Vec<(u64, String)>,
    frames_shown: usize,
}

impl LogDisplaySink {
    pub fn new(throttle_frames: usize) -> Self {
        Self {
            throttle_frames: throttle_frames.max(1),
            last_labels: Vec::new(),
            frames_shown: 0,
        }
    }
}

impl Default for LogDisplaySink {
    fn default() -> Self {
        Self::new(30)
    }
}

/// One-line description of a track for logs and terminals.
pub fn format_track(view: &TrackView) -> String {
    let (collected, required) = view.progress;
    let mut line = format!(
        "{}{} {} ({:.2}{}) [{}",
        view.track_id,
        if view.is_active { "*" } else { "" },
        view.name,
        view.confidence,
        if view.high_confidence { ", high" } else { "" },
        view.state,
    );
    if !view.state.is_known() {
        line.push_str(&format!(" {collected}/{required}"));
    }
    line.push(']');
    if let Some(q) = &view.quality {
        line.push_str(&format!(" quality {:.2}", q.score()));
    }
    line
}

impl DisplaySink for LogDisplaySink {
    fn show(&mut self, report: &FrameReport) {
        self.frames_shown += 1;
        let labels: Vec<(u64, String)> = report
            .tracks
            .iter()
            .filter(|t| t.visible)
            .map(|t| (t.track_id.0, format!("{} {}", t.name, t.state)))
            .collect();
        let changed = labels != self.last_labels;
        self.last_labels = labels;

        if !changed && report.frame_index % self.throttle_frames != 0 {
            return;
        }
        for view in report.tracks.iter().filter(|t| t.visible) {
            log::info!("frame {}: {}", report.frame_index, format_track(view));
        }
    }

    fn finish(&mut self) {
        log::info!("Display closed after {} frames", self.frames_shown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::person::{PersonId, TrackId};
    use crate::identity::state_machine::IdentityState;
    use crate::shared::bounding_box::BoundingBox;

    fn view(state: IdentityState, name: &str) -> TrackView {
        TrackView {
            track_id: TrackId(3),
            bbox: BoundingBox::new(0.0, 0.0, 100.0, 100.0),
            visible: true,
            name: name.to_string(),
            person: None,
            confidence: 0.01,
            high_confidence: false,
            quality: None,
            pose: None,
            state,
            progress: (4, 10),
            is_active: true,
        }
    }

    #[test]
    fn test_format_unknown_track_shows_progress() {
        let line = format_track(&view(IdentityState::CollectingForRecognition, "Unknown"));
        assert!(line.starts_with("T3* Unknown (0.01)"));
        assert!(line.contains("4/10"));
    }

    #[test]
    fn test_format_known_track_hides_progress() {
        let mut v = view(IdentityState::KnownLearning, "Person_1");
        v.person = Some(PersonId(1));
        v.confidence = 0.95;
        v.high_confidence = true;
        let line = format_track(&v);
        assert!(line.contains("Person_1 (0.95, high)"));
        assert!(!line.contains("4/10"));
    }

    #[test]
    fn test_log_sink_counts_frames() {
        let mut sink = LogDisplaySink::new(5);
        let report = FrameReport {
            tracks: vec![view(IdentityState::CollectingForRecognition, "Unknown")],
            ..FrameReport::default()
        };
        sink.show(&report);
        sink.show(&report);
        assert_eq!(sink.frames_shown, 2);
        assert_eq!(sink.last_labels.len(), 1);
        sink.finish();
    }
}
