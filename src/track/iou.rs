use std::collections::HashSet;

use crate::detect::{BoundingBox, Detection};
use crate::frame::Frame;

use super::{Track, TrackState, Tracker};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IouTrackerConfig {
    /// Misses a confirmed track survives before deletion.
    pub max_age: u32,
    /// Consecutive hits needed to confirm a new track.
    pub n_init: u32,
    /// Minimum IoU for a detection to continue a track.
    pub min_iou: f32,
}

impl Default for IouTrackerConfig {
    fn default() -> Self {
        Self {
            max_age: 30,
            n_init: 3,
            min_iou: 0.3,
        }
    }
}

#[derive(Clone, Debug)]
struct TrackEntry {
    id: u64,
    bbox: BoundingBox,
    state: TrackState,
    hits: u32,
    time_since_update: u32,
}

/// Greedy IoU association with a tentative/confirmed/deleted lifecycle.
///
/// Confirmed tracks get first pick of detections, then tentative ones. A
/// tentative track that misses a frame is dropped immediately; a confirmed
/// track is dropped after missing more than `max_age` frames. Ids are never
/// reused within one tracker.
pub struct IouTracker {
    config: IouTrackerConfig,
    tracks: Vec<TrackEntry>,
    next_id: u64,
}

impl IouTracker {
    pub fn new(config: IouTrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            next_id: 1,
        }
    }

    fn snapshot(&self) -> Vec<Track> {
        self.tracks
            .iter()
            .map(|t| Track {
                id: t.id,
                bbox: t.bbox,
                state: t.state,
                time_since_update: t.time_since_update,
            })
            .collect()
    }

    fn associate(
        &mut self,
        detections: &[Detection],
        state: TrackState,
        used_tracks: &mut HashSet<usize>,
        used_dets: &mut HashSet<usize>,
    ) {
        let mut pairs: Vec<(usize, usize, f32)> = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            if track.state != state || used_tracks.contains(&ti) {
                continue;
            }
            for (di, det) in detections.iter().enumerate() {
                if used_dets.contains(&di) {
                    continue;
                }
                let score = track.bbox.iou(&det.bbox);
                if score >= self.config.min_iou {
                    pairs.push((ti, di, score));
                }
            }
        }
        pairs.sort_by(|a, b| b.2.total_cmp(&a.2));

        for (ti, di, _) in pairs {
            if used_tracks.contains(&ti) || used_dets.contains(&di) {
                continue;
            }
            used_tracks.insert(ti);
            used_dets.insert(di);
            let n_init = self.config.n_init;
            let track = &mut self.tracks[ti];
            track.bbox = detections[di].bbox;
            track.hits += 1;
            track.time_since_update = 0;
            if track.state == TrackState::Tentative && track.hits >= n_init {
                track.state = TrackState::Confirmed;
            }
        }
    }
}

impl Tracker for IouTracker {
    fn update(&mut self, detections: &[Detection], _frame: &Frame) -> Vec<Track> {
        for track in &mut self.tracks {
            track.time_since_update += 1;
        }

        let mut used_tracks = HashSet::new();
        let mut used_dets = HashSet::new();
        self.associate(
            detections,
            TrackState::Confirmed,
            &mut used_tracks,
            &mut used_dets,
        );
        self.associate(
            detections,
            TrackState::Tentative,
            &mut used_tracks,
            &mut used_dets,
        );

        let max_age = self.config.max_age;
        for (ti, track) in self.tracks.iter_mut().enumerate() {
            if used_tracks.contains(&ti) {
                continue;
            }
            match track.state {
                TrackState::Tentative => track.state = TrackState::Deleted,
                TrackState::Confirmed if track.time_since_update > max_age => {
                    track.state = TrackState::Deleted
                }
                _ => {}
            }
        }
        self.tracks.retain(|t| t.state != TrackState::Deleted);

        for (di, det) in detections.iter().enumerate() {
            if used_dets.contains(&di) {
                continue;
            }
            let state = if self.config.n_init <= 1 {
                TrackState::Confirmed
            } else {
                TrackState::Tentative
            };
            self.tracks.push(TrackEntry {
                id: self.next_id,
                bbox: det.bbox,
                state,
                hits: 1,
                time_since_update: 0,
            });
            self.next_id += 1;
        }

        self.snapshot()
    }
}
