#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use facetrack_core::detection::domain::detection::Detection;
use facetrack_core::detection::domain::face_landmarks::FaceLandmarks;
use facetrack_core::features::domain::feature_extractor::{ExtractionError, FeatureExtractor};
use facetrack_core::features::domain::pose::{PoseMetrics, PoseScorer};
use facetrack_core::features::domain::quality::{QualityMetrics, QualityScorer};
use facetrack_core::identity::engine::IdentityEngine;
use facetrack_core::identity::frame_report::FrameReport;
use facetrack_core::identity::person::{
    ActivePerson, EmbeddingId, EmbeddingRecord, Person, PersonId, PersonSummary, TrackId,
};
use facetrack_core::identity::state_machine::StepOutcome;
use facetrack_core::shared::bounding_box::BoundingBox;
use facetrack_core::shared::config::IdentityConfig;
use facetrack_core::shared::frame::Frame;
use facetrack_core::storage::domain::embedding_store::{EmbeddingStore, StorageError};
use facetrack_core::storage::infrastructure::memory_store::MemoryEmbeddingStore;

pub const WIDTH: u32 = 640;
pub const HEIGHT: u32 = 480;
pub const FRAME_MS: u64 = 100;

/// Centre of the frame.
pub const CENTER: BoundingBox = BoundingBox::new(220.0, 140.0, 420.0, 340.0);
pub const TOP_LEFT: BoundingBox = BoundingBox::new(20.0, 20.0, 220.0, 220.0);
pub const BOTTOM_RIGHT: BoundingBox = BoundingBox::new(420.0, 260.0, 620.0, 460.0);

// --- Stubs ---

/// Uses the detector's embedding as the hybrid vector.
pub struct EmbeddingPassthrough {
    pub calls: Arc<AtomicUsize>,
}

impl EmbeddingPassthrough {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl FeatureExtractor for EmbeddingPassthrough {
    fn extract(&self, _crop: &Frame, detection: &Detection) -> Result<Vec<f32>, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(detection.raw_embedding.clone())
    }
}

/// Fails while the shared flag is set.
pub struct SwitchableExtractor {
    pub failing: Arc<AtomicBool>,
}

impl FeatureExtractor for SwitchableExtractor {
    fn extract(&self, _crop: &Frame, detection: &Detection) -> Result<Vec<f32>, ExtractionError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(ExtractionError::Failed("inference backend lost".into()))
        } else {
            Ok(detection.raw_embedding.clone())
        }
    }
}

/// Passes every quality gate; the face dimension follows the box.
pub struct GoodQuality;

impl QualityScorer for GoodQuality {
    fn score(&self, _crop: &Frame, bbox: &BoundingBox) -> Result<QualityMetrics, ExtractionError> {
        Ok(QualityMetrics {
            brightness: 110.0,
            blur_score: 80.0,
            face_dimension: bbox.width().min(bbox.height()),
            aspect_ratio: bbox.width() / bbox.height(),
        })
    }
}

pub struct FrontalPose;

impl PoseScorer for FrontalPose {
    fn score(&self, _landmarks: Option<&FaceLandmarks>, _bbox: &BoundingBox) -> PoseMetrics {
        PoseMetrics {
            eye_angle: 0.0,
            eye_ratio: 0.4,
            nose_offset: 0.0,
            vertical_ratio: 1.0,
        }
    }
}

/// Memory store whose writes fail while `failing` is set. With
/// `failing_evictions` set, only writes that would evict fail, and with
/// `failing_thumbnails` set, only thumbnail writes.
pub struct FlakyStore {
    inner: MemoryEmbeddingStore,
    pub failing: Arc<AtomicBool>,
    pub failing_evictions: Arc<AtomicBool>,
    pub failing_thumbnails: Arc<AtomicBool>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryEmbeddingStore::new(),
            failing: Arc::new(AtomicBool::new(false)),
            failing_evictions: Arc::new(AtomicBool::new(false)),
            failing_thumbnails: Arc::new(AtomicBool::new(false)),
        }
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(disk_full())
        } else {
            Ok(())
        }
    }

    fn check_eviction(&self) -> Result<(), StorageError> {
        self.check()?;
        if self.failing_evictions.load(Ordering::SeqCst) {
            Err(disk_full())
        } else {
            Ok(())
        }
    }
}

fn disk_full() -> StorageError {
    StorageError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
}

impl EmbeddingStore for FlakyStore {
    fn load_all_embeddings(
        &self,
        limit_per_person: usize,
    ) -> Result<BTreeMap<PersonId, Vec<EmbeddingRecord>>, StorageError> {
        self.inner.load_all_embeddings(limit_per_person)
    }

    fn next_person_sequence(&self) -> Result<u64, StorageError> {
        self.inner.next_person_sequence()
    }

    fn create_person(&mut self, display_name: &str) -> Result<Person, StorageError> {
        self.check()?;
        self.inner.create_person(display_name)
    }

    fn add_embedding(
        &mut self,
        person: PersonId,
        vector: &[f32],
        quality: f64,
    ) -> Result<EmbeddingRecord, StorageError> {
        self.check()?;
        self.inner.add_embedding(person, vector, quality)
    }

    fn add_embedding_capped(
        &mut self,
        person: PersonId,
        vector: &[f32],
        quality: f64,
        cap: usize,
    ) -> Result<(EmbeddingRecord, Vec<EmbeddingId>), StorageError> {
        self.check()?;
        if self.inner.embedding_count(person)? + 1 > cap {
            self.check_eviction()?;
        }
        self.inner.add_embedding_capped(person, vector, quality, cap)
    }

    fn evict_oldest_embedding(
        &mut self,
        person: PersonId,
    ) -> Result<Option<EmbeddingId>, StorageError> {
        self.check_eviction()?;
        self.inner.evict_oldest_embedding(person)
    }

    fn register_person(
        &mut self,
        vector: &[f32],
        quality: f64,
    ) -> Result<(Person, EmbeddingRecord), StorageError> {
        self.check()?;
        self.inner.register_person(vector, quality)
    }

    fn embedding_count(&self, person: PersonId) -> Result<usize, StorageError> {
        self.inner.embedding_count(person)
    }

    fn set_thumbnail(&mut self, person: PersonId, jpeg: &[u8]) -> Result<(), StorageError> {
        self.check()?;
        if self.failing_thumbnails.load(Ordering::SeqCst) {
            return Err(disk_full());
        }
        self.inner.set_thumbnail(person, jpeg)
    }

    fn thumbnail(&self, person: PersonId) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.thumbnail(person)
    }

    fn list_persons(&self) -> Result<Vec<PersonSummary>, StorageError> {
        self.inner.list_persons()
    }

    fn clear_all(&mut self) -> Result<(), StorageError> {
        self.check()?;
        self.inner.clear_all()
    }

    fn update_active_person(
        &mut self,
        person: PersonId,
        seen_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.inner.update_active_person(person, seen_at)
    }

    fn get_active_person(&self) -> Result<Option<ActivePerson>, StorageError> {
        self.inner.get_active_person()
    }
}

// --- Helpers ---

pub fn engine_with(
    config: IdentityConfig,
    store: Box<dyn EmbeddingStore>,
    extractor: Box<dyn FeatureExtractor>,
) -> IdentityEngine {
    IdentityEngine::new(
        config,
        store,
        extractor,
        Box::new(GoodQuality),
        Box::new(FrontalPose),
    )
    .unwrap()
}

pub fn engine() -> IdentityEngine {
    engine_with(
        IdentityConfig::default(),
        Box::new(MemoryEmbeddingStore::new()),
        Box::new(EmbeddingPassthrough::new()),
    )
}

pub fn frame_at(index: usize, millis: u64) -> Frame {
    Frame::new(
        vec![120; (WIDTH * HEIGHT * 3) as usize],
        WIDTH,
        HEIGHT,
        3,
        index,
        Duration::from_millis(millis),
    )
}

/// Frame `index` on a regular 10 fps clock.
pub fn frame(index: usize) -> Frame {
    frame_at(index, index as u64 * FRAME_MS)
}

pub fn face(bbox: BoundingBox, embedding: &[f32]) -> Detection {
    Detection {
        bbox,
        landmarks: None,
        confidence: 0.95,
        raw_embedding: embedding.to_vec(),
    }
}

/// Unit vector at `similarity` cosine from `[1, 0, 0, 0]`.
pub fn at_similarity(similarity: f32) -> Vec<f32> {
    vec![similarity, (1.0 - similarity * similarity).sqrt(), 0.0, 0.0]
}

pub fn outcome(report: &FrameReport, track: TrackId) -> Option<&StepOutcome> {
    report
        .outcomes
        .iter()
        .find(|(id, _)| *id == track)
        .map(|(_, o)| o)
}

/// Feeds frames `range` with the same detections and returns every report.
pub fn run_frames(
    engine: &mut IdentityEngine,
    range: std::ops::Range<usize>,
    detections: &[Detection],
) -> Vec<FrameReport> {
    range
        .map(|i| engine.process_frame(&frame(i), detections))
        .collect()
}

pub fn registered_name(outcome: Option<&StepOutcome>) -> Option<String> {
    match outcome {
        Some(StepOutcome::Registered(person)) => Some(person.display_name.clone()),
        _ => None,
    }
}
