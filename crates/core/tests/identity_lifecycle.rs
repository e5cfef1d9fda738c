mod common;

use std::sync::atomic::Ordering;

use facetrack_core::identity::person::{PersonId, TrackId};
use facetrack_core::identity::state_machine::{IdentityState, StepOutcome};
use facetrack_core::shared::config::IdentityConfig;
use facetrack_core::storage::domain::embedding_store::EmbeddingStore;
use facetrack_core::storage::infrastructure::memory_store::MemoryEmbeddingStore;
use facetrack_core::storage::infrastructure::sqlite_store::SqliteEmbeddingStore;

use common::*;

const T1: TrackId = TrackId(1);
const T2: TrackId = TrackId(2);

#[test]
fn test_new_face_becomes_person_1_after_two_collection_windows() {
    let mut engine = engine();
    let reports = run_frames(&mut engine, 0..20, &[face(CENTER, &[1.0, 0.0, 0.0, 0.0])]);

    // recognition window finds nobody, registration window registers
    assert!(matches!(
        outcome(&reports[9], T1),
        Some(StepOutcome::Unrecognized(None))
    ));
    assert_eq!(
        reports[10].track(T1).unwrap().state,
        IdentityState::CollectingForRegistration
    );
    for report in &reports[..19] {
        assert!(registered_name(outcome(report, T1)).is_none());
    }
    assert_eq!(
        registered_name(outcome(&reports[19], T1)).as_deref(),
        Some("Person_1")
    );

    let view = reports[19].track(T1).unwrap();
    assert_eq!(view.name, "Person_1");
    assert_eq!(view.state, IdentityState::KnownLearning);
    assert!(view.is_active);

    let persons = engine.persons().unwrap();
    assert_eq!(persons.len(), 1);
    assert_eq!(persons[0].embedding_count, 1);
    assert!(persons[0].has_thumbnail);
    let active = engine.active_person().unwrap().unwrap();
    assert_eq!(active.person.display_name, "Person_1");
}

#[test]
fn test_progress_counts_collected_frames() {
    let mut engine = engine();
    let reports = run_frames(&mut engine, 0..4, &[face(CENTER, &[1.0, 0.0, 0.0, 0.0])]);
    assert_eq!(reports[3].track(T1).unwrap().progress, (4, 10));
    assert_eq!(reports[3].track(T1).unwrap().name, "Unknown");
}

#[test]
fn test_re_presented_face_is_recognized_and_learned() {
    let mut store = MemoryEmbeddingStore::new();
    let stored = [1.0, 0.0, 0.0, 0.0];
    let (person, _) = store.register_person(&stored, 0.8).unwrap();
    store.add_embedding(person.id, &stored, 0.8).unwrap();
    store.add_embedding(person.id, &stored, 0.8).unwrap();

    let mut engine = engine_with(
        IdentityConfig::default(),
        Box::new(store),
        Box::new(EmbeddingPassthrough::new()),
    );
    let reports = run_frames(&mut engine, 0..12, &[face(CENTER, &at_similarity(0.95))]);

    match outcome(&reports[9], T1) {
        Some(StepOutcome::Recognized(m)) => {
            assert_eq!(m.person, person.id);
            assert_eq!(m.embedding_count, 3);
            assert_eq!(m.threshold, 0.35);
            assert!((m.similarity - 0.95).abs() < 1e-3);
        }
        other => panic!("expected recognition, got {other:?}"),
    }
    assert!(matches!(
        outcome(&reports[10], T1),
        Some(StepOutcome::Learned { evicted }) if evicted.is_empty()
    ));
    // the learned embedding now matches the stream exactly
    assert_eq!(
        outcome(&reports[11], T1),
        Some(&StepOutcome::Unchanged("not novel"))
    );

    let persons = engine.persons().unwrap();
    assert_eq!(persons.len(), 1);
    assert_eq!(persons[0].embedding_count, 4);
    assert_eq!(reports[11].track(T1).unwrap().name, "Person_1");
}

#[test]
fn test_occluded_face_returns_as_new_track() {
    let mut engine = engine();
    let detections = [face(CENTER, &[1.0, 0.0, 0.0, 0.0])];
    run_frames(&mut engine, 0..10, &detections);

    // 1.5 s without the face, then it returns
    let mut removed_at = None;
    for i in 10..25 {
        let report = engine.process_frame(&frame(i), &[]);
        if report.removed_tracks.contains(&T1) {
            removed_at = Some(i);
        }
    }
    // last seen at 0.9 s; gone once more than 1 s has passed
    assert_eq!(removed_at, Some(20));

    let report = engine.process_frame(&frame(25), &detections);
    assert_eq!(report.created_tracks, vec![T2]);
    let view = report.track(T2).unwrap();
    assert_eq!(view.state, IdentityState::CollectingForRecognition);
    assert_eq!(view.progress, (1, 10));
    assert!(report.track(T1).is_none());
}

#[test]
fn test_timestamp_gap_expires_track_before_matching() {
    let mut engine = engine();
    let detections = [face(CENTER, &[1.0, 0.0, 0.0, 0.0])];
    run_frames(&mut engine, 0..5, &detections);

    let report = engine.process_frame(&frame_at(5, 2_000), &detections);
    assert_eq!(report.removed_tracks, vec![T1]);
    assert_eq!(report.created_tracks, vec![T2]);
}

#[test]
fn test_simultaneous_lookalikes_create_one_person() {
    let mut engine = engine();
    let detections = [
        face(TOP_LEFT, &[1.0, 0.0, 0.0, 0.0]),
        face(BOTTOM_RIGHT, &at_similarity(0.8)),
    ];
    let reports = run_frames(&mut engine, 0..20, &detections);

    assert_eq!(
        registered_name(outcome(&reports[19], T1)).as_deref(),
        Some("Person_1")
    );
    match outcome(&reports[19], T2) {
        Some(StepOutcome::BoundToExisting(m)) => assert_eq!(m.person, PersonId(1)),
        other => panic!("expected duplicate binding, got {other:?}"),
    }
    assert_eq!(reports[19].track(T2).unwrap().name, "Person_1");
    assert_eq!(engine.persons().unwrap().len(), 1);
}

#[test]
fn test_cooldown_defers_second_registration() {
    let mut engine = engine();
    let detections = [
        face(TOP_LEFT, &[1.0, 0.0, 0.0, 0.0]),
        face(BOTTOM_RIGHT, &[0.0, 1.0, 0.0, 0.0]),
    ];
    let reports = run_frames(&mut engine, 0..40, &detections);

    assert!(registered_name(outcome(&reports[19], T1)).is_some());
    for report in &reports[19..39] {
        assert_eq!(outcome(report, T2), Some(&StepOutcome::Deferred));
    }
    assert_eq!(
        registered_name(outcome(&reports[39], T2)).as_deref(),
        Some("Person_2")
    );
    assert_eq!(engine.persons().unwrap().len(), 2);
}

#[test]
fn test_feature_cache_does_not_change_outcomes() {
    let detections = [
        face(TOP_LEFT, &[1.0, 0.0, 0.0, 0.0]),
        face(BOTTOM_RIGHT, &at_similarity(0.8)),
    ];
    let mut tiny_cache = IdentityConfig::default();
    tiny_cache.cache.capacity = 1;

    let timeline = |config: IdentityConfig| {
        let mut engine = engine_with(
            config,
            Box::new(MemoryEmbeddingStore::new()),
            Box::new(EmbeddingPassthrough::new()),
        );
        run_frames(&mut engine, 0..30, &detections)
            .into_iter()
            .map(|r| {
                r.tracks
                    .into_iter()
                    .map(|t| (t.track_id, t.state, t.name, t.progress))
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>()
    };

    assert_eq!(timeline(IdentityConfig::default()), timeline(tiny_cache));
}

#[test]
fn test_reprocessed_frame_hits_feature_cache() {
    let extractor = EmbeddingPassthrough::new();
    let calls = extractor.calls.clone();
    let mut engine = engine_with(
        IdentityConfig::default(),
        Box::new(MemoryEmbeddingStore::new()),
        Box::new(extractor),
    );
    let detections = [face(CENTER, &[1.0, 0.0, 0.0, 0.0])];

    engine.process_frame(&frame(0), &detections);
    engine.process_frame(&frame(0), &detections);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(engine.cache_stats(), (1, 1));
}

#[test]
fn test_manual_registration_skips_recognition_window() {
    let mut engine = engine();
    let detections = [face(CENTER, &[1.0, 0.0, 0.0, 0.0])];
    engine.process_frame(&frame(0), &detections);

    let active = engine.active_track().unwrap();
    assert_eq!(active, T1);
    assert!(engine.force_registration(active));

    let reports = run_frames(&mut engine, 1..11, &detections);
    assert_eq!(
        registered_name(outcome(&reports[9], T1)).as_deref(),
        Some("Person_1")
    );
    // already bound: manual registration is ignored
    assert!(!engine.force_registration(T1));
    assert!(!engine.force_registration(TrackId(99)));
}

#[test]
fn test_clear_all_restarts_tracks_and_never_reuses_names() {
    let mut engine = engine();
    let detections = [face(CENTER, &[1.0, 0.0, 0.0, 0.0])];
    run_frames(&mut engine, 0..20, &detections);
    assert_eq!(engine.persons().unwrap().len(), 1);

    engine.clear_all().unwrap();
    assert!(engine.persons().unwrap().is_empty());

    let reports = run_frames(&mut engine, 20..40, &detections);
    assert_eq!(
        reports[0].track(T1).unwrap().state,
        IdentityState::CollectingForRecognition
    );
    assert_eq!(reports[0].track(T1).unwrap().name, "Unknown");
    assert!(matches!(
        outcome(&reports[9], T1),
        Some(StepOutcome::Unrecognized(None))
    ));
    assert_eq!(
        registered_name(outcome(&reports[19], T1)).as_deref(),
        Some("Person_2")
    );
}

#[test]
fn test_identities_survive_engine_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("faces.sqlite");
    let detections = [face(CENTER, &[1.0, 0.0, 0.0, 0.0])];

    {
        let store = SqliteEmbeddingStore::open(&db).unwrap();
        let mut engine = engine_with(
            IdentityConfig::default(),
            Box::new(store),
            Box::new(EmbeddingPassthrough::new()),
        );
        run_frames(&mut engine, 0..20, &detections);
    }

    let store = SqliteEmbeddingStore::open(&db).unwrap();
    let mut engine = engine_with(
        IdentityConfig::default(),
        Box::new(store),
        Box::new(EmbeddingPassthrough::new()),
    );
    let reports = run_frames(&mut engine, 0..10, &detections);
    match outcome(&reports[9], T1) {
        Some(StepOutcome::Recognized(m)) => assert_eq!(m.person, PersonId(1)),
        other => panic!("expected recognition after restart, got {other:?}"),
    }
    assert_eq!(reports[9].track(T1).unwrap().name, "Person_1");
}

#[test]
fn test_registration_stores_face_thumbnail() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("faces.sqlite");
    {
        let mut engine = engine_with(
            IdentityConfig::default(),
            Box::new(SqliteEmbeddingStore::open(&db).unwrap()),
            Box::new(EmbeddingPassthrough::new()),
        );
        run_frames(&mut engine, 0..20, &[face(CENTER, &[1.0, 0.0, 0.0, 0.0])]);
    }

    let store = SqliteEmbeddingStore::open(&db).unwrap();
    let jpeg = store.thumbnail(PersonId(1)).unwrap().unwrap();
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
}

#[test]
fn test_failed_thumbnail_write_keeps_registration() {
    let store = FlakyStore::new();
    store.failing_thumbnails.store(true, Ordering::SeqCst);
    let mut engine = engine_with(
        IdentityConfig::default(),
        Box::new(store),
        Box::new(EmbeddingPassthrough::new()),
    );
    let reports = run_frames(&mut engine, 0..20, &[face(CENTER, &[1.0, 0.0, 0.0, 0.0])]);

    assert_eq!(
        registered_name(outcome(&reports[19], T1)).as_deref(),
        Some("Person_1")
    );
    let persons = engine.persons().unwrap();
    assert_eq!(persons.len(), 1);
    assert!(!persons[0].has_thumbnail);
}
