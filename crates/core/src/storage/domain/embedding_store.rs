use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::identity::person::{
    ActivePerson, EmbeddingId, EmbeddingRecord, Person, PersonId, PersonSummary,
};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("person {0} not found")]
    PersonNotFound(PersonId),
    #[error("stored record is corrupt: {0}")]
    Corrupt(String),
}

/// Durable store of persons and their embeddings.
///
/// Every write is atomic: a failed call leaves the store as it was. Vectors
/// passed in are expected to be L2-normalized already.
pub trait EmbeddingStore: Send {
    /// All persons' embeddings, each list ordered by quality descending and
    /// truncated to `limit_per_person`.
    fn load_all_embeddings(
        &self,
        limit_per_person: usize,
    ) -> Result<BTreeMap<PersonId, Vec<EmbeddingRecord>>, StorageError>;

    /// The sequence number the next registration will use. Never decreases,
    /// including across restarts and [`EmbeddingStore::clear_all`].
    fn next_person_sequence(&self) -> Result<u64, StorageError>;

    fn create_person(&mut self, display_name: &str) -> Result<Person, StorageError>;

    fn add_embedding(
        &mut self,
        person: PersonId,
        vector: &[f32],
        quality: f64,
    ) -> Result<EmbeddingRecord, StorageError>;

    /// Adds an embedding, then evicts (as [`EmbeddingStore::evict_oldest_embedding`])
    /// until the person holds at most `cap`, in one transaction. Returns the
    /// new record and the evicted ids; the new record may be among them.
    fn add_embedding_capped(
        &mut self,
        person: PersonId,
        vector: &[f32],
        quality: f64,
        cap: usize,
    ) -> Result<(EmbeddingRecord, Vec<EmbeddingId>), StorageError>;

    /// Removes the person's lowest-quality embedding (oldest among equals).
    /// Returns the removed id, or `None` when the person has no embeddings.
    fn evict_oldest_embedding(
        &mut self,
        person: PersonId,
    ) -> Result<Option<EmbeddingId>, StorageError>;

    /// Consumes the next sequence number, creates `Person_N` and stores its
    /// first embedding, all in one transaction.
    fn register_person(
        &mut self,
        vector: &[f32],
        quality: f64,
    ) -> Result<(Person, EmbeddingRecord), StorageError>;

    fn embedding_count(&self, person: PersonId) -> Result<usize, StorageError>;

    /// Replaces the person's face thumbnail (JPEG bytes).
    fn set_thumbnail(&mut self, person: PersonId, jpeg: &[u8]) -> Result<(), StorageError>;

    /// `None` when no thumbnail has been stored for the person.
    fn thumbnail(&self, person: PersonId) -> Result<Option<Vec<u8>>, StorageError>;

    /// Persons ordered by id, with their embedding counts.
    fn list_persons(&self) -> Result<Vec<PersonSummary>, StorageError>;

    /// Deletes every person and embedding. The sequence is kept.
    fn clear_all(&mut self) -> Result<(), StorageError>;

    fn update_active_person(
        &mut self,
        person: PersonId,
        seen_at: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    fn get_active_person(&self) -> Result<Option<ActivePerson>, StorageError>;
}
