//! Per-frame orchestration of tracking, feature extraction and the identity
//! state machines.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;

use crate::detection::domain::detection::Detection;
use crate::features::domain::feature_extractor::{ExtractionError, FeatureExtractor};
use crate::features::domain::pose::{PoseMetrics, PoseScorer};
use crate::features::domain::quality::{QualityMetrics, QualityScorer};
use crate::identity::errors::IdentityError;
use crate::identity::feature_cache::{CacheKey, FeatureCache};
use crate::identity::frame_report::{FrameReport, TrackView};
use crate::identity::matching_engine::MatchingEngine;
use crate::identity::person::{ActivePerson, PersonId, PersonSummary, TrackId};
use crate::identity::state_machine::{
    IdentityStateMachine, Observation, RegistrationCooldown, StepContext, StepOutcome,
};
use crate::identity::track_manager::TrackManager;
use crate::shared::bounding_box::BoundingBox;
use crate::shared::config::IdentityConfig;
use crate::shared::constants::{THUMBNAIL_MAX_SIDE, UNKNOWN_NAME};
use crate::shared::frame::Frame;
use crate::shared::thumbnail::encode_thumbnail;
use crate::shared::vector;
use crate::storage::domain::embedding_store::{EmbeddingStore, StorageError};

struct TrackSlot {
    machine: IdentityStateMachine,
    quality: Option<QualityMetrics>,
    pose: Option<PoseMetrics>,
}

pub struct IdentityEngine {
    config: Arc<IdentityConfig>,
    store: Box<dyn EmbeddingStore>,
    extractor: Box<dyn FeatureExtractor>,
    quality_scorer: Box<dyn QualityScorer>,
    pose_scorer: Box<dyn PoseScorer>,
    tracker: TrackManager,
    slots: BTreeMap<TrackId, TrackSlot>,
    matcher: MatchingEngine,
    cache: FeatureCache,
    cooldown: RegistrationCooldown,
    names: HashMap<PersonId, String>,
    consecutive_failures: usize,
    active_track: Option<TrackId>,
    active_person: Option<PersonId>,
}

impl IdentityEngine {
    /// Validates the configuration and loads every stored identity.
    ///
    /// This is the only fallible step of the engine: a store that cannot be
    /// read is fatal, anything later is handled per frame.
    pub fn new(
        config: IdentityConfig,
        store: Box<dyn EmbeddingStore>,
        extractor: Box<dyn FeatureExtractor>,
        quality_scorer: Box<dyn QualityScorer>,
        pose_scorer: Box<dyn PoseScorer>,
    ) -> Result<Self, IdentityError> {
        config.validate()?;
        let config = Arc::new(config);

        let records = store.load_all_embeddings(config.learning.max_embeddings_per_person)?;
        let embedding_total: usize = records.values().map(Vec::len).sum();
        let matcher = MatchingEngine::from_records(config.matching.clone(), records);
        let names = store
            .list_persons()?
            .into_iter()
            .map(|s| (s.person.id, s.person.display_name))
            .collect::<HashMap<_, _>>();
        log::info!(
            "Loaded {} persons with {} embeddings",
            names.len(),
            embedding_total
        );

        Ok(Self {
            tracker: TrackManager::new(&config.tracker),
            cache: FeatureCache::new(config.cache.capacity),
            cooldown: RegistrationCooldown::new(config.registration.cooldown()),
            slots: BTreeMap::new(),
            matcher,
            names,
            consecutive_failures: 0,
            active_track: None,
            active_person: None,
            config,
            store,
            extractor,
            quality_scorer,
            pose_scorer,
        })
    }

    pub fn config(&self) -> &IdentityConfig {
        &self.config
    }

    /// Runs one frame through tracking and every affected state machine.
    pub fn process_frame(&mut self, frame: &Frame, detections: &[Detection]) -> FrameReport {
        let mut report = FrameReport {
            frame_index: frame.index(),
            timestamp: frame.timestamp(),
            ..FrameReport::default()
        };

        let valid: Vec<&Detection> = detections
            .iter()
            .filter(|d| match d.check_box() {
                Ok(()) => true,
                Err(e) => {
                    log::debug!("Frame {}: dropping detection: {e}", frame.index());
                    false
                }
            })
            .collect();
        report.dropped_detections = detections.len() - valid.len();

        let boxes: Vec<BoundingBox> = valid.iter().map(|d| d.bbox).collect();
        let update = self.tracker.update(&boxes, frame.timestamp());
        for id in &update.removed {
            if let Some(slot) = self.slots.remove(id) {
                log::info!(
                    "Track {id} lost in state {}, evidence discarded",
                    slot.machine.state()
                );
            }
        }
        for id in &update.created {
            self.slots.insert(
                *id,
                TrackSlot {
                    machine: IdentityStateMachine::new(*id, self.config.clone()),
                    quality: None,
                    pose: None,
                },
            );
        }
        report.created_tracks = update.created.clone();
        report.removed_tracks = update.removed.clone();

        let mut extracted = 0usize;
        for (track_id, det_idx) in &update.assignments {
            let det = valid[*det_idx];
            let Some(slot) = self.slots.get_mut(track_id) else {
                continue;
            };
            if let Err(e) = det.check_embedding() {
                log::debug!("Track {track_id}: skipping frame {}: {e}", frame.index());
                continue;
            }
            let Some(crop) = frame.crop(&det.bbox) else {
                log::debug!("Track {track_id}: box outside frame {}", frame.index());
                continue;
            };

            let key = CacheKey {
                frame_index: frame.index(),
                track: *track_id,
            };
            let extractor = &self.extractor;
            let scored: Result<(Vec<f32>, QualityMetrics), ExtractionError> = self
                .cache
                .get_or_compute(key, || extractor.extract(&crop, det))
                .and_then(|v| Ok((v, self.quality_scorer.score(&crop, &det.bbox)?)));
            let (features, quality) = match scored {
                Ok(scored) => scored,
                Err(e) => {
                    log::warn!("Track {track_id}: feature extraction failed: {e}");
                    report.extraction_failures += 1;
                    continue;
                }
            };
            extracted += 1;

            let pose = self.pose_scorer.score(det.landmarks.as_ref(), &det.bbox);
            slot.quality = Some(quality.clone());
            slot.pose = Some(pose.clone());
            let obs = Observation {
                vector: vector::normalized(features),
                quality,
                pose,
            };

            let mut ctx = StepContext {
                matcher: &mut self.matcher,
                store: &mut *self.store,
                cooldown: &mut self.cooldown,
                now: frame.timestamp(),
            };
            match slot.machine.step(&obs, &mut ctx) {
                Ok(outcome) => {
                    if let StepOutcome::Registered(person) = &outcome {
                        self.names.insert(person.id, person.display_name.clone());
                        save_thumbnail(&mut *self.store, person.id, &crop);
                    }
                    report.outcomes.push((*track_id, outcome));
                }
                Err(e) => log::error!("Track {track_id}: storage error, will retry: {e}"),
            }
        }

        self.track_extraction_health(&mut report, extracted);
        self.update_active(frame);
        report.active_track = self.active_track;
        report.tracks = self.track_views();
        report
    }

    /// Moves an unbound track straight to registration collection.
    pub fn force_registration(&mut self, track: TrackId) -> bool {
        let Some(slot) = self.slots.get_mut(&track) else {
            log::info!("Manual registration: track {track} is not live");
            return false;
        };
        let accepted = slot.machine.force_registration();
        if accepted {
            log::info!("Manual registration started for track {track}");
        } else {
            log::info!("Manual registration ignored: track {track} is already identified");
        }
        accepted
    }

    /// The most central visible track as of the last processed frame.
    pub fn active_track(&self) -> Option<TrackId> {
        self.active_track
    }

    /// Deletes every stored identity and restarts all live tracks.
    pub fn clear_all(&mut self) -> Result<(), StorageError> {
        self.store.clear_all()?;
        self.matcher.clear();
        self.names.clear();
        self.cache.clear();
        self.cooldown.reset();
        self.active_person = None;
        for slot in self.slots.values_mut() {
            slot.machine.reset();
        }
        log::info!("Cleared all identities; {} live tracks restarted", self.slots.len());
        Ok(())
    }

    pub fn persons(&self) -> Result<Vec<PersonSummary>, StorageError> {
        self.store.list_persons()
    }

    pub fn active_person(&self) -> Result<Option<ActivePerson>, StorageError> {
        self.store.get_active_person()
    }

    /// `(hits, misses)` of the feature cache.
    pub fn cache_stats(&self) -> (u64, u64) {
        self.cache.stats()
    }

    fn track_extraction_health(&mut self, report: &mut FrameReport, extracted: usize) {
        if report.extraction_failures > 0 {
            self.consecutive_failures += 1;
        } else if extracted > 0 {
            self.consecutive_failures = 0;
        }
        if self.consecutive_failures >= self.config.recovery.max_consecutive_extraction_failures {
            log::warn!(
                "{} consecutive frames with extraction failures; clearing feature cache and \
                 requesting detector reinitialization",
                self.consecutive_failures
            );
            self.cache.clear();
            self.consecutive_failures = 0;
            report.reinitialize_detector = true;
        }
    }

    fn update_active(&mut self, frame: &Frame) {
        self.active_track = self.tracker.active_track(frame.width(), frame.height());
        let person = self
            .active_track
            .and_then(|id| self.slots.get(&id))
            .and_then(|slot| slot.machine.linked_person());
        let Some(person) = person else {
            return;
        };
        if self.active_person == Some(person) {
            return;
        }
        match self.store.update_active_person(person, Utc::now()) {
            Ok(()) => self.active_person = Some(person),
            Err(e) => log::warn!("Failed to record active person {person}: {e}"),
        }
    }

    fn track_views(&self) -> Vec<TrackView> {
        let default_confidence = self.config.matching.default_display_confidence;
        self.tracker
            .live_tracks()
            .filter_map(|track| {
                let slot = self.slots.get(&track.id)?;
                let machine = &slot.machine;
                let person = machine.linked_person();
                let name = match person {
                    Some(p) => self.names.get(&p).cloned().unwrap_or_else(|| p.to_string()),
                    None => UNKNOWN_NAME.to_string(),
                };
                Some(TrackView {
                    track_id: track.id,
                    bbox: track.bbox,
                    visible: track.visible,
                    name,
                    person,
                    confidence: machine.confidence().unwrap_or(default_confidence),
                    high_confidence: machine.is_high_confidence(),
                    quality: slot.quality.clone(),
                    pose: slot.pose.clone(),
                    state: machine.state(),
                    progress: machine.progress(),
                    is_active: self.active_track == Some(track.id),
                })
            })
            .collect()
    }
}

/// Stores the registering frame's face crop. A failure only costs the
/// thumbnail; the person is already committed.
fn save_thumbnail(store: &mut dyn EmbeddingStore, person: PersonId, crop: &Frame) {
    let saved = encode_thumbnail(crop, THUMBNAIL_MAX_SIDE)
        .map_err(|e| e.to_string())
        .and_then(|jpeg| store.set_thumbnail(person, &jpeg).map_err(|e| e.to_string()));
    if let Err(e) = saved {
        log::warn!("Person {person}: thumbnail not saved: {e}");
    }
}
