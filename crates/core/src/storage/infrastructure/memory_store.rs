//! Non-persistent [`EmbeddingStore`] for tests and `--in-memory` runs.
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::identity::person::{
    display_name_for_sequence, eviction_candidate, ActivePerson, EmbeddingId, EmbeddingRecord,
    Person, PersonId, PersonSummary,
};
use crate::storage::domain::embedding_store::{EmbeddingStore, StorageError};

#[derive(Default)]
pub struct MemoryEmbeddingStore {
    persons: BTreeMap<PersonId, Person>,
    embeddings: BTreeMap<PersonId, Vec<EmbeddingRecord>>,
    last_sequence: u64,
    next_person_id: i64,
    next_embedding_id: i64,
    active: Option<(PersonId, DateTime<Utc>)>,
    thumbnails: BTreeMap<PersonId, Vec<u8>>,
}

impl MemoryEmbeddingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_person(&mut self, display_name: &str) -> Person {
        self.next_person_id += 1;
        let person = Person {
            id: PersonId(self.next_person_id),
            display_name: display_name.to_string(),
            created_at: Utc::now(),
        };
        self.persons.insert(person.id, person.clone());
        self.embeddings.insert(person.id, Vec::new());
        person
    }

    fn insert_embedding(
        &mut self,
        person: PersonId,
        vector: &[f32],
        quality: f64,
    ) -> EmbeddingRecord {
        self.next_embedding_id += 1;
        let record = EmbeddingRecord {
            id: EmbeddingId(self.next_embedding_id),
            person_id: person,
            vector: vector.to_vec(),
            quality,
            created_at: Utc::now(),
        };
        self.embeddings
            .entry(person)
            .or_default()
            .push(record.clone());
        record
    }
}

impl EmbeddingStore for MemoryEmbeddingStore {
    fn load_all_embeddings(
        &self,
        limit_per_person: usize,
    ) -> Result<BTreeMap<PersonId, Vec<EmbeddingRecord>>, StorageError> {
        Ok(self
            .embeddings
            .iter()
            .filter(|(_, records)| !records.is_empty())
            .map(|(id, records)| {
                let mut sorted = records.clone();
                sorted.sort_by(|a, b| {
                    b.quality
                        .partial_cmp(&a.quality)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                sorted.truncate(limit_per_person);
                (*id, sorted)
            })
            .collect())
    }

    fn next_person_sequence(&self) -> Result<u64, StorageError> {
        Ok(self.last_sequence + 1)
    }

    fn create_person(&mut self, display_name: &str) -> Result<Person, StorageError> {
        Ok(self.insert_person(display_name))
    }

    fn add_embedding(
        &mut self,
        person: PersonId,
        vector: &[f32],
        quality: f64,
    ) -> Result<EmbeddingRecord, StorageError> {
        if !self.persons.contains_key(&person) {
            return Err(StorageError::PersonNotFound(person));
        }
        Ok(self.insert_embedding(person, vector, quality))
    }

    fn add_embedding_capped(
        &mut self,
        person: PersonId,
        vector: &[f32],
        quality: f64,
        cap: usize,
    ) -> Result<(EmbeddingRecord, Vec<EmbeddingId>), StorageError> {
        let record = self.add_embedding(person, vector, quality)?;
        let records = self.embeddings.entry(person).or_default();
        let mut evicted = Vec::new();
        while records.len() > cap {
            let Some(victim) = eviction_candidate(records).map(|r| r.id) else {
                break;
            };
            records.retain(|r| r.id != victim);
            evicted.push(victim);
        }
        Ok((record, evicted))
    }

    fn evict_oldest_embedding(
        &mut self,
        person: PersonId,
    ) -> Result<Option<EmbeddingId>, StorageError> {
        let records = self
            .embeddings
            .get_mut(&person)
            .ok_or(StorageError::PersonNotFound(person))?;
        let Some(victim) = eviction_candidate(records).map(|r| r.id) else {
            return Ok(None);
        };
        records.retain(|r| r.id != victim);
        Ok(Some(victim))
    }

    fn register_person(
        &mut self,
        vector: &[f32],
        quality: f64,
    ) -> Result<(Person, EmbeddingRecord), StorageError> {
        self.last_sequence += 1;
        let person = self.insert_person(&display_name_for_sequence(self.last_sequence));
        let record = self.insert_embedding(person.id, vector, quality);
        Ok((person, record))
    }

    fn embedding_count(&self, person: PersonId) -> Result<usize, StorageError> {
        self.embeddings
            .get(&person)
            .map(Vec::len)
            .ok_or(StorageError::PersonNotFound(person))
    }

    fn set_thumbnail(&mut self, person: PersonId, jpeg: &[u8]) -> Result<(), StorageError> {
        if !self.persons.contains_key(&person) {
            return Err(StorageError::PersonNotFound(person));
        }
        self.thumbnails.insert(person, jpeg.to_vec());
        Ok(())
    }

    fn thumbnail(&self, person: PersonId) -> Result<Option<Vec<u8>>, StorageError> {
        if !self.persons.contains_key(&person) {
            return Err(StorageError::PersonNotFound(person));
        }
        Ok(self.thumbnails.get(&person).cloned())
    }

    fn list_persons(&self) -> Result<Vec<PersonSummary>, StorageError> {
        Ok(self
            .persons
            .values()
            .map(|p| PersonSummary {
                person: p.clone(),
                embedding_count: self.embeddings.get(&p.id).map_or(0, Vec::len),
                has_thumbnail: self.thumbnails.contains_key(&p.id),
            })
            .collect())
    }

    fn clear_all(&mut self) -> Result<(), StorageError> {
        self.persons.clear();
        self.embeddings.clear();
        self.thumbnails.clear();
        self.active = None;
        Ok(())
    }

    fn update_active_person(
        &mut self,
        person: PersonId,
        seen_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        if !self.persons.contains_key(&person) {
            return Err(StorageError::PersonNotFound(person));
        }
        self.active = Some((person, seen_at));
        Ok(())
    }

    fn get_active_person(&self) -> Result<Option<ActivePerson>, StorageError> {
        Ok(self.active.and_then(|(id, last_seen)| {
            self.persons.get(&id).map(|p| ActivePerson {
                person: p.clone(),
                last_seen,
            })
        }))
    }
}
