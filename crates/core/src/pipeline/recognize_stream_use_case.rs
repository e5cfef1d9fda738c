use std::time::Instant;

use crate::detection::domain::face_detector::FaceDetector;
use crate::identity::engine::IdentityEngine;
use crate::identity::state_machine::StepOutcome;
use crate::pipeline::control::{Control, ControlSource};
use crate::pipeline::display::DisplaySink;
use crate::pipeline::pipeline_logger::PipelineLogger;
use crate::shared::stream_metadata::StreamMetadata;
use crate::video::domain::frame_source::FrameSource;

/// Counters for one run of the stream loop.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: usize,
    pub unreadable_frames: usize,
    pub detector_failures: usize,
    pub registrations: usize,
    pub reinitializations: usize,
    pub quit_requested: bool,
}

/// Runs a frame source through detection and the identity engine.
///
/// Frames are handled strictly one at a time: detect, update identities,
/// show, then apply any pending operator controls before the next frame is
/// pulled.
pub struct RecognizeStreamUseCase {
    source: Box<dyn FrameSource>,
    detector: Box<dyn FaceDetector>,
    engine: IdentityEngine,
    display: Box<dyn DisplaySink>,
    controls: Box<dyn ControlSource>,
    logger: Box<dyn PipelineLogger>,
}

impl RecognizeStreamUseCase {
    pub fn new(
        source: Box<dyn FrameSource>,
        detector: Box<dyn FaceDetector>,
        engine: IdentityEngine,
        display: Box<dyn DisplaySink>,
        controls: Box<dyn ControlSource>,
        logger: Box<dyn PipelineLogger>,
    ) -> Self {
        Self {
            source,
            detector,
            engine,
            display,
            controls,
            logger,
        }
    }

    pub fn engine(&self) -> &IdentityEngine {
        &self.engine
    }

    /// Processes frames until the source ends or a quit control arrives.
    pub fn execute(&mut self, metadata: &StreamMetadata) -> RunSummary {
        let mut summary = RunSummary::default();
        let total = metadata.total_frames;

        for result in self.source.frames() {
            let frame = match result {
                Ok(frame) => frame,
                Err(e) => {
                    log::warn!("Skipping unreadable frame: {e}");
                    summary.unreadable_frames += 1;
                    continue;
                }
            };

            let t0 = Instant::now();
            let detections = match self.detector.detect(&frame) {
                Ok(d) => d,
                Err(e) => {
                    log::warn!("Frame {}: detection failed: {e}", frame.index());
                    summary.detector_failures += 1;
                    continue;
                }
            };
            self.logger
                .timing("detect", t0.elapsed().as_secs_f64() * 1000.0);

            let t1 = Instant::now();
            let report = self.engine.process_frame(&frame, &detections);
            self.logger
                .timing("identify", t1.elapsed().as_secs_f64() * 1000.0);
            self.logger.metric("detections", detections.len() as f64);
            self.logger.metric("live_tracks", report.tracks.len() as f64);

            summary.registrations += report
                .outcomes
                .iter()
                .filter(|(_, o)| matches!(o, StepOutcome::Registered(_)))
                .count();

            if report.reinitialize_detector {
                summary.reinitializations += 1;
                match self.detector.reinitialize() {
                    Ok(()) => log::info!("Detector reinitialized"),
                    Err(e) => log::error!("Detector reinitialization failed: {e}"),
                }
            }

            self.display.show(&report);
            summary.frames += 1;
            self.logger.progress(summary.frames, total);

            for control in self.controls.poll() {
                if !apply_control(&mut self.engine, self.logger.as_mut(), control) {
                    summary.quit_requested = true;
                }
            }
            if summary.quit_requested {
                log::info!("Quit requested after frame {}", frame.index());
                break;
            }
        }

        self.source.close();
        self.display.finish();
        self.logger.summary();
        summary
    }

    /// Applies one operator control. Returns `false` when the loop should
    /// stop.
    pub fn apply_control(&mut self, control: Control) -> bool {
        apply_control(&mut self.engine, self.logger.as_mut(), control)
    }
}

fn apply_control(
    engine: &mut IdentityEngine,
    logger: &mut dyn PipelineLogger,
    control: Control,
) -> bool {
    match control {
        Control::Quit => return false,
        Control::ManualRegisterActive => match engine.active_track() {
            Some(track) => {
                engine.force_registration(track);
            }
            None => logger.info("No active track to register"),
        },
        Control::ClearDatabase => match engine.clear_all() {
            Ok(()) => logger.info("Database cleared"),
            Err(e) => log::error!("Failed to clear database: {e}"),
        },
        Control::ListPersons => match engine.persons() {
            Ok(persons) if persons.is_empty() => logger.info("No persons registered"),
            Ok(persons) => {
                for summary in persons {
                    logger.info(&format!(
                        "{} {} ({} embeddings, created {})",
                        summary.person.id,
                        summary.person.display_name,
                        summary.embedding_count,
                        summary.person.created_at.format("%Y-%m-%d %H:%M:%S")
                    ));
                }
            }
            Err(e) => log::error!("Failed to list persons: {e}"),
        },
    }
    true
}
