//! Identifiers and records for tracks and persons.
//!
//! Track ids and person ids are separate newtypes: a track is a box that
//! persists across frames, a person is a stored identity, and the two are
//! only ever related through a state machine's binding.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::shared::constants::PERSON_NAME_PREFIX;

/// Process-lifetime unique, monotonic track identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(pub u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Storage-assigned person identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PersonId(pub i64);

impl fmt::Display for PersonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// Storage-assigned embedding identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EmbeddingId(pub i64);

#[derive(Clone, Debug, PartialEq)]
pub struct Person {
    pub id: PersonId,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

/// A person together with how many embeddings are on file for them.
#[derive(Clone, Debug, PartialEq)]
pub struct PersonSummary {
    pub person: Person,
    pub embedding_count: usize,
    pub has_thumbnail: bool,
}

/// One stored observation of a person. `vector` is L2-normalized.
#[derive(Clone, Debug, PartialEq)]
pub struct EmbeddingRecord {
    pub id: EmbeddingId,
    pub person_id: PersonId,
    pub vector: Vec<f32>,
    pub quality: f64,
    pub created_at: DateTime<Utc>,
}

/// The person last shown as the active (most central) face.
#[derive(Clone, Debug, PartialEq)]
pub struct ActivePerson {
    pub person: Person,
    pub last_seen: DateTime<Utc>,
}

/// `Person_N` for sequence number `n`.
pub fn display_name_for_sequence(n: u64) -> String {
    format!("{PERSON_NAME_PREFIX}{n}")
}

/// Picks the record to drop when a person is over capacity: lowest quality
/// first, then oldest, then lowest id.
pub fn eviction_candidate(records: &[EmbeddingRecord]) -> Option<&EmbeddingRecord> {
    records.iter().min_by(|a, b| {
        a.quality
            .partial_cmp(&b.quality)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(id: i64, quality: f64, secs: i64) -> EmbeddingRecord {
        EmbeddingRecord {
            id: EmbeddingId(id),
            person_id: PersonId(1),
            vector: vec![1.0],
            quality,
            created_at: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name_for_sequence(1), "Person_1");
        assert_eq!(display_name_for_sequence(42), "Person_42");
    }

    #[test]
    fn test_eviction_prefers_lowest_quality() {
        let records = vec![record(1, 0.9, 10), record(2, 0.4, 20), record(3, 0.7, 5)];
        assert_eq!(eviction_candidate(&records).unwrap().id, EmbeddingId(2));
    }

    #[test]
    fn test_eviction_tie_goes_to_oldest() {
        let records = vec![record(1, 0.5, 30), record(2, 0.5, 10), record(3, 0.5, 20)];
        assert_eq!(eviction_candidate(&records).unwrap().id, EmbeddingId(2));
    }

    #[test]
    fn test_eviction_of_empty_set() {
        assert!(eviction_candidate(&[]).is_none());
    }

    #[test]
    fn test_id_namespaces_display_differently() {
        assert_eq!(TrackId(3).to_string(), "T3");
        assert_eq!(PersonId(3).to_string(), "P3");
    }
}
