//! SQLite-backed [`EmbeddingStore`].
//!
//! Vectors are stored as little-endian `f32` blobs and timestamps as RFC 3339
//! text. Person ids come from `AUTOINCREMENT`, so they are never reused, and
//! `Person_N` numbering comes from the single-row `person_sequence` table,
//! which `clear_all` leaves alone.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::identity::person::{
    display_name_for_sequence, ActivePerson, EmbeddingId, EmbeddingRecord, Person, PersonId,
    PersonSummary,
};
use crate::storage::domain::embedding_store::{EmbeddingStore, StorageError};

pub struct SqliteEmbeddingStore {
    conn: Connection,
}

impl SqliteEmbeddingStore {
    /// Opens (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;",
        )?;
        let store = Self::with_connection(conn)?;
        log::info!(
            "Opened face database {} ({} persons)",
            path.display(),
            store.person_count()?
        );
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS persons (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                thumbnail BLOB
            );
            CREATE TABLE IF NOT EXISTS embeddings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                person_id INTEGER NOT NULL REFERENCES persons(id) ON DELETE CASCADE,
                vector BLOB NOT NULL,
                quality REAL NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS person_sequence (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                last_value INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS active_person (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                person_id INTEGER REFERENCES persons(id) ON DELETE SET NULL,
                last_seen TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_embeddings_person ON embeddings(person_id);
            CREATE INDEX IF NOT EXISTS idx_persons_name ON persons(name);
            INSERT OR IGNORE INTO person_sequence (id, last_value) VALUES (1, 0);
            INSERT OR IGNORE INTO active_person (id, person_id, last_seen) VALUES (1, NULL, NULL);",
        )?;

        // Databases written before thumbnails were kept lack the column.
        let has_thumbnail: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM pragma_table_info('persons') WHERE name = 'thumbnail'",
            [],
            |row| row.get(0),
        )?;
        if has_thumbnail == 0 {
            self.conn.execute("ALTER TABLE persons ADD COLUMN thumbnail BLOB", [])?;
        }
        Ok(())
    }

    fn person_count(&self) -> Result<usize, StorageError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM persons", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl EmbeddingStore for SqliteEmbeddingStore {
    fn load_all_embeddings(
        &self,
        limit_per_person: usize,
    ) -> Result<BTreeMap<PersonId, Vec<EmbeddingRecord>>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, person_id, vector, quality, created_at
             FROM embeddings
             ORDER BY person_id, quality DESC, id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(RawEmbedding {
                id: row.get(0)?,
                person_id: row.get(1)?,
                vector: row.get(2)?,
                quality: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;

        let mut out: BTreeMap<PersonId, Vec<EmbeddingRecord>> = BTreeMap::new();
        for row in rows {
            let record = row?.into_record()?;
            let list = out.entry(record.person_id).or_default();
            if list.len() < limit_per_person {
                list.push(record);
            }
        }
        Ok(out)
    }

    fn next_person_sequence(&self) -> Result<u64, StorageError> {
        let last: i64 = self.conn.query_row(
            "SELECT last_value FROM person_sequence WHERE id = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(last as u64 + 1)
    }

    fn create_person(&mut self, display_name: &str) -> Result<Person, StorageError> {
        let tx = self.conn.transaction()?;
        let person = insert_person(&tx, display_name)?;
        tx.commit()?;
        Ok(person)
    }

    fn add_embedding(
        &mut self,
        person: PersonId,
        vector: &[f32],
        quality: f64,
    ) -> Result<EmbeddingRecord, StorageError> {
        let tx = self.conn.transaction()?;
        ensure_person(&tx, person)?;
        let record = insert_embedding(&tx, person, vector, quality)?;
        tx.commit()?;
        Ok(record)
    }

    fn add_embedding_capped(
        &mut self,
        person: PersonId,
        vector: &[f32],
        quality: f64,
        cap: usize,
    ) -> Result<(EmbeddingRecord, Vec<EmbeddingId>), StorageError> {
        let tx = self.conn.transaction()?;
        ensure_person(&tx, person)?;
        let record = insert_embedding(&tx, person, vector, quality)?;
        let mut evicted = Vec::new();
        while count_embeddings(&tx, person)? > cap {
            match evict_one(&tx, person)? {
                Some(id) => evicted.push(id),
                None => break,
            }
        }
        tx.commit()?;
        Ok((record, evicted))
    }

    fn evict_oldest_embedding(
        &mut self,
        person: PersonId,
    ) -> Result<Option<EmbeddingId>, StorageError> {
        let tx = self.conn.transaction()?;
        ensure_person(&tx, person)?;
        let victim = evict_one(&tx, person)?;
        tx.commit()?;
        Ok(victim)
    }

    fn register_person(
        &mut self,
        vector: &[f32],
        quality: f64,
    ) -> Result<(Person, EmbeddingRecord), StorageError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "UPDATE person_sequence SET last_value = last_value + 1 WHERE id = 1",
            [],
        )?;
        let sequence: i64 = tx.query_row(
            "SELECT last_value FROM person_sequence WHERE id = 1",
            [],
            |row| row.get(0),
        )?;
        let person = insert_person(&tx, &display_name_for_sequence(sequence as u64))?;
        let record = insert_embedding(&tx, person.id, vector, quality)?;
        tx.commit()?;
        Ok((person, record))
    }

    fn embedding_count(&self, person: PersonId) -> Result<usize, StorageError> {
        ensure_person(&self.conn, person)?;
        count_embeddings(&self.conn, person)
    }

    fn set_thumbnail(&mut self, person: PersonId, jpeg: &[u8]) -> Result<(), StorageError> {
        let updated = self.conn.execute(
            "UPDATE persons SET thumbnail = ?1 WHERE id = ?2",
            params![jpeg, person.0],
        )?;
        if updated == 0 {
            return Err(StorageError::PersonNotFound(person));
        }
        Ok(())
    }

    fn thumbnail(&self, person: PersonId) -> Result<Option<Vec<u8>>, StorageError> {
        self.conn
            .query_row(
                "SELECT thumbnail FROM persons WHERE id = ?1",
                params![person.0],
                |row| row.get::<_, Option<Vec<u8>>>(0),
            )
            .optional()?
            .ok_or(StorageError::PersonNotFound(person))
    }

    fn list_persons(&self) -> Result<Vec<PersonSummary>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, p.name, p.created_at, COUNT(e.id), p.thumbnail IS NOT NULL
             FROM persons p
             LEFT JOIN embeddings e ON e.person_id = p.id
             GROUP BY p.id
             ORDER BY p.id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, bool>(4)?,
            ))
        })?;

        let mut persons = Vec::new();
        for row in rows {
            let (id, name, created_at, count, has_thumbnail) = row?;
            persons.push(PersonSummary {
                person: Person {
                    id: PersonId(id),
                    display_name: name,
                    created_at: parse_timestamp(&created_at)?,
                },
                embedding_count: count as usize,
                has_thumbnail,
            });
        }
        Ok(persons)
    }

    fn clear_all(&mut self) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "UPDATE active_person SET person_id = NULL, last_seen = NULL WHERE id = 1",
            [],
        )?;
        tx.execute("DELETE FROM embeddings", [])?;
        tx.execute("DELETE FROM persons", [])?;
        tx.commit()?;
        log::info!("Face database cleared");
        Ok(())
    }

    fn update_active_person(
        &mut self,
        person: PersonId,
        seen_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        ensure_person(&self.conn, person)?;
        self.conn.execute(
            "UPDATE active_person SET person_id = ?1, last_seen = ?2 WHERE id = 1",
            params![person.0, format_timestamp(&seen_at)],
        )?;
        Ok(())
    }

    fn get_active_person(&self) -> Result<Option<ActivePerson>, StorageError> {
        let row = self
            .conn
            .query_row(
                "SELECT p.id, p.name, p.created_at, a.last_seen
                 FROM active_person a
                 JOIN persons p ON a.person_id = p.id
                 WHERE a.id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(id, name, created_at, last_seen)| {
            Ok(ActivePerson {
                person: Person {
                    id: PersonId(id),
                    display_name: name,
                    created_at: parse_timestamp(&created_at)?,
                },
                last_seen: parse_timestamp(&last_seen)?,
            })
        })
        .transpose()
    }
}

struct RawEmbedding {
    id: i64,
    person_id: i64,
    vector: Vec<u8>,
    quality: f64,
    created_at: String,
}

impl RawEmbedding {
    fn into_record(self) -> Result<EmbeddingRecord, StorageError> {
        Ok(EmbeddingRecord {
            id: EmbeddingId(self.id),
            person_id: PersonId(self.person_id),
            vector: decode_vector(&self.vector)
                .ok_or_else(|| StorageError::Corrupt(format!("embedding {} vector", self.id)))?,
            quality: self.quality,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

fn insert_person(tx: &Transaction<'_>, display_name: &str) -> Result<Person, StorageError> {
    let created_at = Utc::now();
    tx.execute(
        "INSERT INTO persons (name, created_at) VALUES (?1, ?2)",
        params![display_name, format_timestamp(&created_at)],
    )?;
    Ok(Person {
        id: PersonId(tx.last_insert_rowid()),
        display_name: display_name.to_string(),
        created_at,
    })
}

fn insert_embedding(
    tx: &Transaction<'_>,
    person: PersonId,
    vector: &[f32],
    quality: f64,
) -> Result<EmbeddingRecord, StorageError> {
    let created_at = Utc::now();
    tx.execute(
        "INSERT INTO embeddings (person_id, vector, quality, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            person.0,
            encode_vector(vector),
            quality,
            format_timestamp(&created_at)
        ],
    )?;
    Ok(EmbeddingRecord {
        id: EmbeddingId(tx.last_insert_rowid()),
        person_id: person,
        vector: vector.to_vec(),
        quality,
        created_at,
    })
}

/// Deletes the lowest-quality embedding, oldest first among equals.
fn evict_one(
    tx: &Transaction<'_>,
    person: PersonId,
) -> Result<Option<EmbeddingId>, StorageError> {
    let victim: Option<i64> = tx
        .query_row(
            "SELECT id FROM embeddings WHERE person_id = ?1
             ORDER BY quality ASC, created_at ASC, id ASC LIMIT 1",
            params![person.0],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = victim {
        tx.execute("DELETE FROM embeddings WHERE id = ?1", params![id])?;
    }
    Ok(victim.map(EmbeddingId))
}

fn count_embeddings(conn: &Connection, person: PersonId) -> Result<usize, StorageError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM embeddings WHERE person_id = ?1",
        params![person.0],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

fn ensure_person(conn: &Connection, person: PersonId) -> Result<(), StorageError> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM persons WHERE id = ?1",
            params![person.0],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    if exists {
        Ok(())
    } else {
        Err(StorageError::PersonNotFound(person))
    }
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("timestamp {text:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_store() -> (TempDir, SqliteEmbeddingStore) {
        let dir = TempDir::new().unwrap();
        let store = SqliteEmbeddingStore::open(&dir.path().join("faces.sqlite")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_register_and_load() {
        let (_dir, mut store) = temp_store();
        let (person, record) = store.register_person(&[0.6, 0.8], 0.75).unwrap();
        assert_eq!(person.display_name, "Person_1");
        assert_eq!(record.person_id, person.id);

        let loaded = store.load_all_embeddings(30).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[&person.id][0].vector, vec![0.6, 0.8]);
        assert_eq!(loaded[&person.id][0].quality, 0.75);
    }

    #[test]
    fn test_sequence_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("faces.sqlite");
        {
            let mut store = SqliteEmbeddingStore::open(&path).unwrap();
            store.register_person(&[1.0], 0.5).unwrap();
            store.register_person(&[1.0], 0.5).unwrap();
        }
        let mut store = SqliteEmbeddingStore::open(&path).unwrap();
        assert_eq!(store.next_person_sequence().unwrap(), 3);
        let (person, _) = store.register_person(&[1.0], 0.5).unwrap();
        assert_eq!(person.display_name, "Person_3");
    }

    #[test]
    fn test_thumbnail_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("faces.sqlite");
        let person = {
            let mut store = SqliteEmbeddingStore::open(&path).unwrap();
            let (person, _) = store.register_person(&[1.0], 0.5).unwrap();
            assert_eq!(store.thumbnail(person.id).unwrap(), None);
            store.set_thumbnail(person.id, &[0xFF, 0xD8, 0xFF]).unwrap();
            person
        };
        let store = SqliteEmbeddingStore::open(&path).unwrap();
        assert_eq!(store.thumbnail(person.id).unwrap(), Some(vec![0xFF, 0xD8, 0xFF]));
        assert!(store.list_persons().unwrap()[0].has_thumbnail);
    }

    #[test]
    fn test_thumbnail_for_unknown_person_fails() {
        let (_dir, mut store) = temp_store();
        assert!(matches!(
            store.set_thumbnail(PersonId(4), &[1]),
            Err(StorageError::PersonNotFound(PersonId(4)))
        ));
        assert!(store.thumbnail(PersonId(4)).is_err());
    }

    #[test]
    fn test_database_without_thumbnail_column_is_upgraded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("faces.sqlite");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE persons (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );
                INSERT INTO persons (name, created_at)
                VALUES ('Person_1', '2024-01-01T00:00:00.000000Z');",
            )
            .unwrap();
        }
        let store = SqliteEmbeddingStore::open(&path).unwrap();
        let persons = store.list_persons().unwrap();
        assert_eq!(persons.len(), 1);
        assert!(!persons[0].has_thumbnail);
    }

    #[test]
    fn test_clear_all_keeps_sequence_and_ids_monotonic() {
        let (_dir, mut store) = temp_store();
        let (first, _) = store.register_person(&[1.0], 0.5).unwrap();
        store.clear_all().unwrap();
        assert!(store.list_persons().unwrap().is_empty());
        assert!(store.load_all_embeddings(30).unwrap().is_empty());

        let (second, _) = store.register_person(&[1.0], 0.5).unwrap();
        assert_eq!(second.display_name, "Person_2");
        assert!(second.id > first.id);
    }

    #[test]
    fn test_load_orders_by_quality_and_limits() {
        let (_dir, mut store) = temp_store();
        let (person, _) = store.register_person(&[1.0], 0.5).unwrap();
        store.add_embedding(person.id, &[1.0], 0.9).unwrap();
        store.add_embedding(person.id, &[1.0], 0.1).unwrap();

        let loaded = store.load_all_embeddings(2).unwrap();
        let qualities: Vec<f64> = loaded[&person.id].iter().map(|r| r.quality).collect();
        assert_eq!(qualities, vec![0.9, 0.5]);
    }

    #[test]
    fn test_evict_lowest_quality_first() {
        let (_dir, mut store) = temp_store();
        let (person, first) = store.register_person(&[1.0], 0.5).unwrap();
        let low = store.add_embedding(person.id, &[1.0], 0.2).unwrap();
        store.add_embedding(person.id, &[1.0], 0.8).unwrap();

        assert_eq!(store.evict_oldest_embedding(person.id).unwrap(), Some(low.id));
        assert_eq!(store.evict_oldest_embedding(person.id).unwrap(), Some(first.id));
        assert_eq!(store.embedding_count(person.id).unwrap(), 1);
    }

    #[test]
    fn test_capped_add_trims_in_one_transaction() {
        let (_dir, mut store) = temp_store();
        let (person, first) = store.register_person(&[1.0], 0.5).unwrap();
        store.add_embedding(person.id, &[1.0], 0.7).unwrap();

        let (record, evicted) = store.add_embedding_capped(person.id, &[0.5], 0.9, 2).unwrap();
        assert_eq!(evicted, vec![first.id]);
        assert_eq!(store.embedding_count(person.id).unwrap(), 2);
        let loaded = store.load_all_embeddings(30).unwrap();
        assert!(loaded[&person.id].iter().any(|r| r.id == record.id));
    }

    #[test]
    fn test_capped_add_for_unknown_person_writes_nothing() {
        let (_dir, mut store) = temp_store();
        assert!(matches!(
            store.add_embedding_capped(PersonId(7), &[1.0], 0.5, 1),
            Err(StorageError::PersonNotFound(PersonId(7)))
        ));
        assert!(store.load_all_embeddings(30).unwrap().is_empty());
    }

    #[test]
    fn test_evict_from_empty_person() {
        let (_dir, mut store) = temp_store();
        let person = store.create_person("Manual").unwrap();
        assert_eq!(store.evict_oldest_embedding(person.id).unwrap(), None);
    }

    #[test]
    fn test_add_embedding_unknown_person_rolls_back() {
        let (_dir, mut store) = temp_store();
        assert!(matches!(
            store.add_embedding(PersonId(42), &[1.0], 0.5),
            Err(StorageError::PersonNotFound(PersonId(42)))
        ));
        assert!(store.load_all_embeddings(30).unwrap().is_empty());
    }

    #[test]
    fn test_list_persons_counts_embeddings() {
        let (_dir, mut store) = temp_store();
        let (a, _) = store.register_person(&[1.0], 0.5).unwrap();
        store.add_embedding(a.id, &[1.0], 0.5).unwrap();
        store.register_person(&[1.0], 0.5).unwrap();

        let persons = store.list_persons().unwrap();
        let summary: Vec<(&str, usize)> = persons
            .iter()
            .map(|p| (p.person.display_name.as_str(), p.embedding_count))
            .collect();
        assert_eq!(summary, vec![("Person_1", 2), ("Person_2", 1)]);
    }

    #[test]
    fn test_active_person() {
        let (_dir, mut store) = temp_store();
        assert!(store.get_active_person().unwrap().is_none());

        let (person, _) = store.register_person(&[1.0], 0.5).unwrap();
        let seen = Utc::now();
        store.update_active_person(person.id, seen).unwrap();
        let active = store.get_active_person().unwrap().unwrap();
        assert_eq!(active.person.display_name, "Person_1");
        assert_eq!(format_timestamp(&active.last_seen), format_timestamp(&seen));

        store.clear_all().unwrap();
        assert!(store.get_active_person().unwrap().is_none());
    }

    #[test]
    fn test_in_memory_store() {
        let mut store = SqliteEmbeddingStore::open_in_memory().unwrap();
        store.register_person(&[1.0, 0.0], 0.5).unwrap();
        assert_eq!(store.list_persons().unwrap().len(), 1);
    }

    #[test]
    fn test_vector_codec_rejects_truncated_blob() {
        assert_eq!(decode_vector(&encode_vector(&[1.5, -2.0])), Some(vec![1.5, -2.0]));
        assert!(decode_vector(&[0, 1, 2]).is_none());
    }
}
