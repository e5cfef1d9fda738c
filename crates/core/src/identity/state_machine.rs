//! Per-track identity lifecycle.
//!
//! ```text
//! COLLECTING_FOR_RECOGNITION --N frames--> RECOGNIZING --match--> KNOWN_LEARNING <-> KNOWN_IDLE
//!                                               |                       ^
//!                                            no match                   |
//!                                               v                       |
//!            COLLECTING_FOR_REGISTRATION --N gated frames--> REGISTERING
//! ```
//!
//! A machine only advances on frames where its track has a detection, and
//! once bound to a person it never goes back to collecting. Writes to the
//! store and the gallery happen only in the registering and learning steps.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::features::domain::pose::PoseMetrics;
use crate::features::domain::quality::QualityMetrics;
use crate::identity::matching_engine::{MatchResult, MatchingEngine};
use crate::identity::person::{EmbeddingId, Person, PersonId, TrackId};
use crate::shared::config::IdentityConfig;
use crate::shared::vector;
use crate::storage::domain::embedding_store::{EmbeddingStore, StorageError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IdentityState {
    CollectingForRecognition,
    Recognizing,
    CollectingForRegistration,
    Registering,
    KnownLearning,
    KnownIdle,
}

impl IdentityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CollectingForRecognition => "COLLECTING_FOR_RECOGNITION",
            Self::Recognizing => "RECOGNIZING",
            Self::CollectingForRegistration => "COLLECTING_FOR_REGISTRATION",
            Self::Registering => "REGISTERING",
            Self::KnownLearning => "KNOWN_LEARNING",
            Self::KnownIdle => "KNOWN_IDLE",
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Self::KnownLearning | Self::KnownIdle)
    }
}

impl fmt::Display for IdentityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the scorers saw for this track in one frame.
#[derive(Clone, Debug)]
pub struct Observation {
    /// Hybrid vector, L2-normalized.
    pub vector: Vec<f32>,
    pub quality: QualityMetrics,
    pub pose: PoseMetrics,
}

#[derive(Clone, Debug)]
struct Evidence {
    vector: Vec<f32>,
    quality_score: f64,
    pose_score: f64,
    passed_gates: bool,
}

/// Process-wide pause on new registrations after a person is created.
#[derive(Clone, Debug)]
pub struct RegistrationCooldown {
    window: Duration,
    last_registration: Option<Duration>,
}

impl RegistrationCooldown {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_registration: None,
        }
    }

    pub fn is_active(&self, now: Duration) -> bool {
        self.last_registration
            .is_some_and(|at| now.saturating_sub(at) < self.window)
    }

    pub fn record(&mut self, now: Duration) {
        self.last_registration = Some(now);
    }

    pub fn reset(&mut self) {
        self.last_registration = None;
    }
}

/// Shared state a machine may read or write during a step.
pub struct StepContext<'a> {
    pub matcher: &'a mut MatchingEngine,
    pub store: &'a mut dyn EmbeddingStore,
    pub cooldown: &'a mut RegistrationCooldown,
    /// Stream timestamp of the frame being processed.
    pub now: Duration,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StepOutcome {
    /// Evidence recorded; collection continues.
    Collected,
    /// Frame did not count toward registration evidence.
    Discarded(&'static str),
    Recognized(MatchResult),
    /// No person matched; collection for registration starts over.
    Unrecognized(Option<MatchResult>),
    Registered(Person),
    /// Registration found an existing person instead.
    BoundToExisting(MatchResult),
    /// Registration cooldown is active.
    Deferred,
    Learned { evicted: Vec<EmbeddingId> },
    /// Known person, nothing to store for this frame.
    Unchanged(&'static str),
}

pub struct IdentityStateMachine {
    track: TrackId,
    config: Arc<IdentityConfig>,
    state: IdentityState,
    evidence: Vec<Evidence>,
    linked_person: Option<PersonId>,
    confidence: Option<f64>,
    high_confidence: bool,
    /// Consecutive observations whose length disagreed with the evidence.
    dimension_mismatches: usize,
}

impl IdentityStateMachine {
    pub fn new(track: TrackId, config: Arc<IdentityConfig>) -> Self {
        Self {
            track,
            config,
            state: IdentityState::CollectingForRecognition,
            evidence: Vec::new(),
            linked_person: None,
            confidence: None,
            high_confidence: false,
            dimension_mismatches: 0,
        }
    }

    pub fn state(&self) -> IdentityState {
        self.state
    }

    pub fn linked_person(&self) -> Option<PersonId> {
        self.linked_person
    }

    /// `(collected, required)` for the current collection phase. Known
    /// tracks report a full bar.
    pub fn progress(&self) -> (usize, usize) {
        let required = self.config.collection.evaluation_frames;
        if self.state.is_known() {
            (required, required)
        } else {
            (self.evidence.len().min(required), required)
        }
    }

    /// Latest similarity to the bound or best-matching person.
    pub fn confidence(&self) -> Option<f64> {
        self.confidence
    }

    pub fn is_high_confidence(&self) -> bool {
        self.high_confidence
    }

    /// Skips recognition and starts collecting registration evidence.
    /// Returns false for tracks already bound to a person.
    pub fn force_registration(&mut self) -> bool {
        if self.linked_person.is_some() {
            return false;
        }
        self.clear_evidence();
        self.transition(IdentityState::CollectingForRegistration);
        true
    }

    /// Back to the initial state, forgetting any binding.
    pub fn reset(&mut self) {
        self.clear_evidence();
        self.linked_person = None;
        self.confidence = None;
        self.high_confidence = false;
        self.transition(IdentityState::CollectingForRecognition);
    }

    /// Advances the machine with one observation.
    ///
    /// A storage error leaves the track in REGISTERING or KNOWN_LEARNING with
    /// its evidence intact, so the write is retried on the next qualifying
    /// frame.
    pub fn step(
        &mut self,
        obs: &Observation,
        ctx: &mut StepContext<'_>,
    ) -> Result<StepOutcome, StorageError> {
        match self.state {
            IdentityState::CollectingForRecognition => {
                if !self.admit_dimension(obs) {
                    return Ok(StepOutcome::Discarded("dimension"));
                }
                let passed_gates = self.passes_gates(obs);
                self.push_evidence(obs, passed_gates);
                if self.evidence.len() < self.config.collection.evaluation_frames {
                    return Ok(StepOutcome::Collected);
                }
                self.transition(IdentityState::Recognizing);
                Ok(self.recognize(ctx))
            }
            IdentityState::Recognizing => Ok(self.recognize(ctx)),
            IdentityState::CollectingForRegistration => {
                if let Some(gate) = self.failed_gate(obs) {
                    return Ok(StepOutcome::Discarded(gate));
                }
                if !self.admit_dimension(obs) {
                    return Ok(StepOutcome::Discarded("dimension"));
                }
                self.push_evidence(obs, true);
                if self.evidence.len() < self.config.collection.evaluation_frames {
                    return Ok(StepOutcome::Collected);
                }
                self.transition(IdentityState::Registering);
                self.register(ctx)
            }
            IdentityState::Registering => self.register(ctx),
            IdentityState::KnownLearning => self.learn(obs, ctx),
            IdentityState::KnownIdle => Ok(self.idle(obs, ctx)),
        }
    }

    fn recognize(&mut self, ctx: &mut StepContext<'_>) -> StepOutcome {
        let query = self.aggregate(true);
        self.clear_evidence();
        let Some(query) = query else {
            self.transition(IdentityState::CollectingForRecognition);
            return StepOutcome::Unrecognized(None);
        };

        match ctx.matcher.recognize(&query) {
            Some(m) => {
                log::info!(
                    "Track {} recognized as {} (similarity {:.3})",
                    self.track,
                    m.person,
                    m.similarity
                );
                self.bind(&m);
                StepOutcome::Recognized(m)
            }
            None => {
                let best = ctx.matcher.best_match(&query);
                self.confidence = best.as_ref().map(|m| m.similarity);
                self.high_confidence = false;
                self.transition(IdentityState::CollectingForRegistration);
                StepOutcome::Unrecognized(best)
            }
        }
    }

    fn register(&mut self, ctx: &mut StepContext<'_>) -> Result<StepOutcome, StorageError> {
        let Some(query) = self.aggregate(false) else {
            self.clear_evidence();
            self.transition(IdentityState::CollectingForRegistration);
            return Ok(StepOutcome::Discarded("no evidence"));
        };

        if let Some(existing) = ctx.matcher.find_duplicate(&query) {
            log::info!(
                "Track {} resembles {} (similarity {:.3}), binding instead of registering",
                self.track,
                existing.person,
                existing.similarity
            );
            self.clear_evidence();
            self.bind(&existing);
            return Ok(StepOutcome::BoundToExisting(existing));
        }

        if ctx.cooldown.is_active(ctx.now) {
            log::debug!("Track {} registration deferred by cooldown", self.track);
            return Ok(StepOutcome::Deferred);
        }

        let quality = self.mean_quality();
        let (person, record) = ctx.store.register_person(&query, quality).map_err(|e| {
            log::error!("Track {} registration failed: {e}", self.track);
            e
        })?;
        ctx.matcher.insert(record);
        ctx.cooldown.record(ctx.now);
        log::info!(
            "Registered {} ({}) from track {}",
            person.display_name,
            person.id,
            self.track
        );

        self.clear_evidence();
        self.linked_person = Some(person.id);
        self.confidence = Some(1.0);
        self.high_confidence = true;
        self.transition(IdentityState::KnownLearning);
        Ok(StepOutcome::Registered(person))
    }

    fn learn(
        &mut self,
        obs: &Observation,
        ctx: &mut StepContext<'_>,
    ) -> Result<StepOutcome, StorageError> {
        let Some(person) = self.linked_person else {
            return Ok(StepOutcome::Unchanged("unbound"));
        };
        let Some(similarity) = self.refresh_confidence(person, obs, ctx.matcher) else {
            return Ok(StepOutcome::Unchanged("person has no embeddings"));
        };
        if !obs.quality.passes(&self.config.quality) {
            return Ok(StepOutcome::Unchanged("quality"));
        }

        let count = ctx.matcher.embedding_count(person);
        if similarity < ctx.matcher.adaptive_threshold(count) {
            return Ok(StepOutcome::Unchanged("below threshold"));
        }
        if similarity >= self.config.learning.novelty_ceiling {
            return Ok(StepOutcome::Unchanged("not novel"));
        }
        let cap = self.config.learning.max_embeddings_per_person;
        if count >= cap && !self.config.learning.learn_at_capacity {
            self.transition(IdentityState::KnownIdle);
            return Ok(StepOutcome::Unchanged("at capacity"));
        }

        let (record, evicted) = ctx.store.add_embedding_capped(
            person,
            &obs.vector,
            obs.quality.score(),
            cap,
        )?;
        ctx.matcher.insert(record);
        for id in &evicted {
            ctx.matcher.evict(person, *id);
        }
        log::debug!(
            "Learned embedding for {} from track {} ({} on file, {} evicted)",
            person,
            self.track,
            ctx.matcher.embedding_count(person),
            evicted.len()
        );
        Ok(StepOutcome::Learned { evicted })
    }

    fn idle(&mut self, obs: &Observation, ctx: &mut StepContext<'_>) -> StepOutcome {
        let Some(person) = self.linked_person else {
            return StepOutcome::Unchanged("unbound");
        };
        self.refresh_confidence(person, obs, ctx.matcher);
        if ctx.matcher.embedding_count(person) < self.config.learning.max_embeddings_per_person {
            self.transition(IdentityState::KnownLearning);
        }
        StepOutcome::Unchanged("idle")
    }

    fn refresh_confidence(
        &mut self,
        person: PersonId,
        obs: &Observation,
        matcher: &MatchingEngine,
    ) -> Option<f64> {
        let similarity = matcher.person_similarity(person, &obs.vector)?;
        self.confidence = Some(similarity);
        self.high_confidence = similarity >= matcher.config().high_confidence_threshold;
        Some(similarity)
    }

    fn bind(&mut self, m: &MatchResult) {
        self.linked_person = Some(m.person);
        self.confidence = Some(m.similarity);
        self.high_confidence = m.high_confidence;
        self.transition(IdentityState::KnownLearning);
    }

    fn transition(&mut self, next: IdentityState) {
        if self.state != next {
            log::debug!("Track {}: {} -> {}", self.track, self.state, next);
            self.state = next;
        }
    }

    fn clear_evidence(&mut self) {
        self.evidence.clear();
        self.dimension_mismatches = 0;
    }

    /// Whether `obs` can join the evidence buffer. An observation whose
    /// length differs from the buffered vectors is refused; once a full
    /// window of consecutive observations disagrees, the buffer is dropped
    /// and collection restarts at the new length.
    fn admit_dimension(&mut self, obs: &Observation) -> bool {
        let Some(buffered) = self.evidence.first().map(|e| e.vector.len()) else {
            self.dimension_mismatches = 0;
            return true;
        };
        if buffered == obs.vector.len() {
            self.dimension_mismatches = 0;
            return true;
        }
        self.dimension_mismatches += 1;
        if self.dimension_mismatches < self.config.collection.evaluation_frames {
            log::debug!(
                "Track {}: {}-dim observation does not fit {}-dim evidence",
                self.track,
                obs.vector.len(),
                buffered
            );
            return false;
        }
        log::warn!(
            "Track {}: feature length changed from {} to {}, restarting collection",
            self.track,
            buffered,
            obs.vector.len()
        );
        self.clear_evidence();
        true
    }

    fn push_evidence(&mut self, obs: &Observation, passed_gates: bool) {
        self.evidence.push(Evidence {
            vector: vector::normalized(obs.vector.clone()),
            quality_score: obs.quality.score(),
            pose_score: obs.pose.score(),
            passed_gates,
        });
    }

    fn passes_gates(&self, obs: &Observation) -> bool {
        self.failed_gate(obs).is_none()
    }

    fn failed_gate(&self, obs: &Observation) -> Option<&'static str> {
        obs.quality
            .failed_gate(&self.config.quality)
            .or_else(|| obs.pose.failed_gate(&self.config.pose))
    }

    /// Quality- and pose-weighted mean of the collected vectors. With
    /// `prefer_gated`, frames that passed the gates are used when any did.
    fn aggregate(&self, prefer_gated: bool) -> Option<Vec<f32>> {
        let any_gated = self.evidence.iter().any(|e| e.passed_gates);
        vector::weighted_mean(
            self.evidence
                .iter()
                .filter(|e| !prefer_gated || !any_gated || e.passed_gates)
                .map(|e| (e.vector.as_slice(), e.quality_score * e.pose_score)),
        )
    }

    fn mean_quality(&self) -> f64 {
        if self.evidence.is_empty() {
            return 0.0;
        }
        self.evidence.iter().map(|e| e.quality_score).sum::<f64>() / self.evidence.len() as f64
    }
}
