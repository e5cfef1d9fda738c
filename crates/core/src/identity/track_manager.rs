//! IoU multi-object tracker.
//!
//! Keeps box identity across frames independently of recognition. Matching
//! is a single greedy pass over (track, detection) pairs sorted by IoU, with
//! track id and detection index as deterministic tie-breakers. Tracks that go
//! unseen for longer than the staleness window (measured on stream
//! timestamps) are dropped.
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use crate::identity::person::TrackId;
use crate::shared::bounding_box::BoundingBox;
use crate::shared::config::TrackerConfig;

#[derive(Clone, Debug, PartialEq)]
pub struct Track {
    pub id: TrackId,
    pub bbox: BoundingBox,
    pub last_seen: Duration,
    /// Whether a detection was assigned to this track in the latest update.
    pub visible: bool,
}

/// Result of one [`TrackManager::update`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrackUpdate {
    /// `(track, detection index)` for every detection, ordered by track id.
    pub assignments: Vec<(TrackId, usize)>,
    /// Tracks spawned this frame; also present in `assignments`.
    pub created: Vec<TrackId>,
    /// Tracks destroyed for staleness this frame.
    pub removed: Vec<TrackId>,
}

pub struct TrackManager {
    tracks: BTreeMap<TrackId, Track>,
    next_id: u64,
    min_iou: f64,
    staleness: Duration,
}

impl TrackManager {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            tracks: BTreeMap::new(),
            next_id: 1,
            min_iou: config.min_iou,
            staleness: config.staleness(),
        }
    }

    /// Associates this frame's boxes with live tracks.
    ///
    /// Stale tracks are expired against `now` before matching, so a face that
    /// reappears after a gap longer than the staleness window always gets a
    /// fresh track.
    pub fn update(&mut self, boxes: &[BoundingBox], now: Duration) -> TrackUpdate {
        let removed = self.expire_stale(now);
        for track in self.tracks.values_mut() {
            track.visible = false;
        }

        let mut assignments = Vec::with_capacity(boxes.len());
        let mut matched_dets = HashSet::new();
        for (track_id, det_idx) in self.greedy_match(boxes) {
            if let Some(track) = self.tracks.get_mut(&track_id) {
                track.bbox = boxes[det_idx];
                track.last_seen = now;
                track.visible = true;
            }
            matched_dets.insert(det_idx);
            assignments.push((track_id, det_idx));
        }

        let mut created = Vec::new();
        for (det_idx, bbox) in boxes.iter().enumerate() {
            if matched_dets.contains(&det_idx) {
                continue;
            }
            let id = TrackId(self.next_id);
            self.next_id += 1;
            self.tracks.insert(
                id,
                Track {
                    id,
                    bbox: *bbox,
                    last_seen: now,
                    visible: true,
                },
            );
            log::debug!("Track {id} created");
            created.push(id);
            assignments.push((id, det_idx));
        }

        assignments.sort_by_key(|(id, _)| *id);
        TrackUpdate {
            assignments,
            created,
            removed,
        }
    }

    pub fn live_tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// The visible track whose centre is closest to the frame centre; ties go
    /// to the larger box, then the lower id.
    pub fn active_track(&self, frame_width: u32, frame_height: u32) -> Option<TrackId> {
        let (cx, cy) = (frame_width as f64 / 2.0, frame_height as f64 / 2.0);
        self.tracks
            .values()
            .filter(|t| t.visible)
            .map(|t| {
                let (x, y) = t.bbox.center();
                let dist = ((x - cx).powi(2) + (y - cy).powi(2)).sqrt();
                (t.id, dist, t.bbox.area())
            })
            .min_by(|a, b| {
                a.1.partial_cmp(&b.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal))
                    .then(a.0.cmp(&b.0))
            })
            .map(|(id, _, _)| id)
    }

    fn expire_stale(&mut self, now: Duration) -> Vec<TrackId> {
        let staleness = self.staleness;
        let stale: Vec<TrackId> = self
            .tracks
            .values()
            .filter(|t| now.saturating_sub(t.last_seen) > staleness)
            .map(|t| t.id)
            .collect();
        for id in &stale {
            self.tracks.remove(id);
            log::debug!("Track {id} destroyed (unseen for more than {staleness:?})");
        }
        stale
    }

    fn greedy_match(&self, boxes: &[BoundingBox]) -> Vec<(TrackId, usize)> {
        let mut pairs: Vec<(TrackId, usize, f64)> = Vec::new();
        for track in self.tracks.values() {
            for (di, bbox) in boxes.iter().enumerate() {
                let iou = track.bbox.iou(bbox);
                if iou > 0.0 && iou >= self.min_iou {
                    pairs.push((track.id, di, iou));
                }
            }
        }
        pairs.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
                .then(a.1.cmp(&b.1))
        });

        let mut used_tracks = HashSet::new();
        let mut used_dets = HashSet::new();
        let mut matches = Vec::new();
        for (ti, di, _) in pairs {
            if !used_tracks.contains(&ti) && !used_dets.contains(&di) {
                used_tracks.insert(ti);
                used_dets.insert(di);
                matches.push((ti, di));
            }
        }
        matches
    }
}
