//! Similarity matching against the in-memory gallery of stored embeddings.
//!
//! The gallery mirrors the embedding store: it is loaded once at startup and
//! kept current by write-through from registration and learning. A person's
//! score is the best cosine similarity over all of their embeddings, and the
//! acceptance threshold loosens as the candidate accumulates embeddings.

use std::collections::BTreeMap;

use crate::identity::person::{EmbeddingId, EmbeddingRecord, PersonId};
use crate::shared::config::MatchingConfig;
use crate::shared::vector;

/// Best candidate for a query vector.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchResult {
    pub person: PersonId,
    pub similarity: f64,
    /// Embeddings on file for `person` at match time.
    pub embedding_count: usize,
    /// Adaptive threshold that applied to `person`.
    pub threshold: f64,
    pub accepted: bool,
    pub high_confidence: bool,
}

pub struct MatchingEngine {
    config: MatchingConfig,
    gallery: BTreeMap<PersonId, Vec<EmbeddingRecord>>,
}

impl MatchingEngine {
    pub fn new(config: MatchingConfig) -> Self {
        Self {
            config,
            gallery: BTreeMap::new(),
        }
    }

    /// Builds the gallery from stored records, normalizing every vector.
    pub fn from_records(
        config: MatchingConfig,
        records: BTreeMap<PersonId, Vec<EmbeddingRecord>>,
    ) -> Self {
        let mut engine = Self::new(config);
        for record in records.into_values().flatten() {
            engine.insert(record);
        }
        engine
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    /// Required similarity for a person with `embedding_count` embeddings.
    pub fn adaptive_threshold(&self, embedding_count: usize) -> f64 {
        let c = &self.config;
        if embedding_count < c.few_embeddings_below {
            c.few_threshold
        } else if embedding_count > c.many_embeddings_above {
            c.many_threshold
        } else {
            c.medium_threshold
        }
    }

    /// Best similarity between `query` and any of the person's embeddings.
    pub fn person_similarity(&self, person: PersonId, query: &[f32]) -> Option<f64> {
        self.gallery
            .get(&person)?
            .iter()
            .map(|r| vector::cosine_similarity(&r.vector, query))
            .fold(None, |best, s| Some(best.map_or(s, |b: f64| b.max(s))))
    }

    /// Highest-scoring person, whether or not they pass their threshold.
    ///
    /// Scores within `tie_epsilon` of each other go to the person with more
    /// embeddings, then to the lower id.
    pub fn best_match(&self, query: &[f32]) -> Option<MatchResult> {
        let query = vector::normalized(query.to_vec());
        let mut best: Option<(PersonId, f64, usize)> = None;

        for (person, records) in &self.gallery {
            let Some(score) = self.person_similarity(*person, &query) else {
                continue;
            };
            let count = records.len();
            best = match best {
                None => Some((*person, score, count)),
                Some((_, best_score, _)) if score > best_score + self.config.tie_epsilon => {
                    Some((*person, score, count))
                }
                Some((_, best_score, best_count))
                    if (score - best_score).abs() <= self.config.tie_epsilon
                        && count > best_count =>
                {
                    Some((*person, score, count))
                }
                keep => keep,
            };
        }

        best.map(|(person, similarity, embedding_count)| {
            let threshold = self.adaptive_threshold(embedding_count);
            MatchResult {
                person,
                similarity,
                embedding_count,
                threshold,
                accepted: similarity >= threshold,
                high_confidence: similarity >= self.config.high_confidence_threshold,
            }
        })
    }

    /// Best match if it clears its adaptive threshold.
    pub fn recognize(&self, query: &[f32]) -> Option<MatchResult> {
        let result = self.best_match(query)?;
        log::debug!(
            "Best candidate {} similarity {:.3} (threshold {:.2}, {} embeddings)",
            result.person,
            result.similarity,
            result.threshold,
            result.embedding_count
        );
        result.accepted.then_some(result)
    }

    /// Existing person similar enough that registering `query` would create
    /// a duplicate. Independent of the adaptive table.
    pub fn find_duplicate(&self, query: &[f32]) -> Option<MatchResult> {
        self.best_match(query)
            .filter(|m| m.similarity >= self.config.registration_similarity_threshold)
    }

    pub fn insert(&mut self, mut record: EmbeddingRecord) {
        vector::l2_normalize(&mut record.vector);
        self.gallery.entry(record.person_id).or_default().push(record);
    }

    pub fn evict(&mut self, person: PersonId, embedding: EmbeddingId) {
        if let Some(records) = self.gallery.get_mut(&person) {
            records.retain(|r| r.id != embedding);
        }
    }

    pub fn embedding_count(&self, person: PersonId) -> usize {
        self.gallery.get(&person).map_or(0, Vec::len)
    }

    pub fn person_count(&self) -> usize {
        self.gallery.len()
    }

    pub fn clear(&mut self) {
        self.gallery.clear();
    }
}
