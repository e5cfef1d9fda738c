//! Tunable thresholds for tracking, gating, matching and learning.
//!
//! Every field has a default, so a partial JSON file (or none at all) yields a
//! usable configuration. [`IdentityConfig::validate`] is the single place the
//! invariants between fields are enforced; the engine refuses to start with
//! an invalid configuration.

use std::fs;
use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Minimum IoU for a detection to continue an existing track.
    pub min_iou: f64,
    /// Unseen tracks older than this are destroyed.
    pub staleness_secs: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            min_iou: 0.5,
            staleness_secs: 1.0,
        }
    }
}

impl TrackerConfig {
    pub fn staleness(&self) -> Duration {
        Duration::from_secs_f64(self.staleness_secs.max(0.0))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// Frames of evidence gathered before recognizing or registering.
    pub evaluation_frames: usize,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            evaluation_frames: 10,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityGates {
    pub min_brightness: f64,
    pub max_brightness: f64,
    pub min_blur_score: f64,
    /// Smaller side of the face box, in pixels.
    pub min_face_dimension: f64,
    pub min_aspect_ratio: f64,
    pub max_aspect_ratio: f64,
}

impl Default for QualityGates {
    fn default() -> Self {
        Self {
            min_brightness: 65.0,
            max_brightness: 165.0,
            min_blur_score: 20.0,
            min_face_dimension: 80.0,
            min_aspect_ratio: 0.5,
            max_aspect_ratio: 1.5,
        }
    }
}

impl QualityGates {
    pub fn brightness_range(&self) -> RangeInclusive<f64> {
        self.min_brightness..=self.max_brightness
    }

    pub fn aspect_ratio_range(&self) -> RangeInclusive<f64> {
        self.min_aspect_ratio..=self.max_aspect_ratio
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseGates {
    /// Maximum roll of the eye line, degrees.
    pub max_eye_angle: f64,
    /// Minimum eye distance relative to face width.
    pub min_eye_ratio: f64,
    /// Maximum horizontal nose displacement relative to face width.
    pub max_nose_offset: f64,
    pub min_vertical_ratio: f64,
    pub max_vertical_ratio: f64,
}

impl Default for PoseGates {
    fn default() -> Self {
        Self {
            max_eye_angle: 10.0,
            min_eye_ratio: 0.25,
            max_nose_offset: 0.08,
            min_vertical_ratio: 0.8,
            max_vertical_ratio: 1.5,
        }
    }
}

impl PoseGates {
    pub fn vertical_ratio_range(&self) -> RangeInclusive<f64> {
        self.min_vertical_ratio..=self.max_vertical_ratio
    }
}

/// Adaptive acceptance table keyed by the candidate's embedding count.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Persons with fewer embeddings than this use `few_threshold`.
    pub few_embeddings_below: usize,
    /// Persons with more embeddings than this use `many_threshold`.
    pub many_embeddings_above: usize,
    pub few_threshold: f64,
    pub medium_threshold: f64,
    pub many_threshold: f64,
    /// Display/logging flag only; never changes acceptance.
    pub high_confidence_threshold: f64,
    /// Fixed duplicate-prevention threshold applied before registration.
    pub registration_similarity_threshold: f64,
    /// Best scores closer than this count as a tie.
    pub tie_epsilon: f64,
    /// Confidence reported for tracks without a match.
    pub default_display_confidence: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            few_embeddings_below: 5,
            many_embeddings_above: 15,
            few_threshold: 0.35,
            medium_threshold: 0.20,
            many_threshold: 0.15,
            high_confidence_threshold: 0.90,
            registration_similarity_threshold: 0.70,
            tie_epsilon: 1e-6,
            default_display_confidence: 0.01,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Global pause after a person is created.
    pub cooldown_secs: f64,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self { cooldown_secs: 2.0 }
    }
}

impl RegistrationConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.cooldown_secs.max(0.0))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub max_embeddings_per_person: usize,
    /// Observations at least this similar to a stored embedding add nothing new.
    pub novelty_ceiling: f64,
    /// When false, a track whose person is at capacity goes idle instead of
    /// evicting old embeddings.
    pub learn_at_capacity: bool,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            max_embeddings_per_person: 30,
            novelty_ceiling: 0.98,
            learn_at_capacity: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 1000 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Consecutive frames with extraction failures before the feature cache
    /// is dropped and the detector reinitialised.
    pub max_consecutive_extraction_failures: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_consecutive_extraction_failures: 3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub min_detection_confidence: f64,
    /// Detections with a smaller side than this are dropped, in pixels.
    pub min_face_size: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_detection_confidence: 0.5,
            min_face_size: 60.0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub tracker: TrackerConfig,
    pub collection: CollectionConfig,
    pub quality: QualityGates,
    pub pose: PoseGates,
    pub matching: MatchingConfig,
    pub registration: RegistrationConfig,
    pub learning: LearningConfig,
    pub cache: CacheConfig,
    pub recovery: RecoveryConfig,
    pub detector: DetectorConfig,
}

impl IdentityConfig {
    /// Reads a JSON config file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let json = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: IdentityConfig =
            serde_json::from_str(&json).map_err(|e| ConfigError::Parse {
                path: path.display().to_string(),
                source: e,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.tracker;
        ensure((0.0..=1.0).contains(&t.min_iou), "tracker.min_iou must be in [0, 1]")?;
        ensure(
            t.staleness_secs.is_finite() && t.staleness_secs > 0.0,
            "tracker.staleness_secs must be positive",
        )?;

        ensure(
            self.collection.evaluation_frames > 0,
            "collection.evaluation_frames must be at least 1",
        )?;

        let q = &self.quality;
        ensure(
            q.min_brightness <= q.max_brightness,
            "quality brightness range is inverted",
        )?;
        ensure(
            q.min_aspect_ratio <= q.max_aspect_ratio,
            "quality aspect ratio range is inverted",
        )?;
        ensure(q.min_face_dimension >= 0.0, "quality.min_face_dimension must be >= 0")?;

        let p = &self.pose;
        ensure(
            p.min_vertical_ratio <= p.max_vertical_ratio,
            "pose vertical ratio range is inverted",
        )?;
        ensure(p.max_eye_angle >= 0.0, "pose.max_eye_angle must be >= 0")?;

        let m = &self.matching;
        for (name, value) in [
            ("few_threshold", m.few_threshold),
            ("medium_threshold", m.medium_threshold),
            ("many_threshold", m.many_threshold),
            ("high_confidence_threshold", m.high_confidence_threshold),
            (
                "registration_similarity_threshold",
                m.registration_similarity_threshold,
            ),
        ] {
            ensure(
                (-1.0..=1.0).contains(&value),
                &format!("matching.{name} must be in [-1, 1]"),
            )?;
        }
        ensure(
            m.few_threshold >= m.medium_threshold && m.medium_threshold >= m.many_threshold,
            "matching thresholds must not tighten as embeddings grow",
        )?;
        ensure(
            m.few_embeddings_below <= m.many_embeddings_above + 1,
            "matching bucket bounds overlap",
        )?;
        ensure(m.tie_epsilon >= 0.0, "matching.tie_epsilon must be >= 0")?;

        ensure(
            self.registration.cooldown_secs.is_finite() && self.registration.cooldown_secs >= 0.0,
            "registration.cooldown_secs must be >= 0",
        )?;

        let l = &self.learning;
        ensure(
            l.max_embeddings_per_person > 0,
            "learning.max_embeddings_per_person must be at least 1",
        )?;
        ensure(
            (-1.0..=1.0).contains(&l.novelty_ceiling),
            "learning.novelty_ceiling must be in [-1, 1]",
        )?;

        ensure(self.cache.capacity > 0, "cache.capacity must be at least 1")?;
        ensure(
            self.recovery.max_consecutive_extraction_failures > 0,
            "recovery.max_consecutive_extraction_failures must be at least 1",
        )?;
        ensure(
            (0.0..=1.0).contains(&self.detector.min_detection_confidence),
            "detector.min_detection_confidence must be in [0, 1]",
        )?;
        Ok(())
    }
}

fn ensure(condition: bool, message: &str) -> Result<(), ConfigError> {
    if condition {
        Ok(())
    } else {
        Err(ConfigError::Invalid(message.to_string()))
    }
}
