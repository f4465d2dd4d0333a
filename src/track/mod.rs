//! Multi-object tracking.
//!
//! A `Tracker` turns per-frame detections into identity-bearing tracks. Trackers
//! carry history across calls, so each session owns exactly one, built fresh by a
//! `TrackerFactory` whenever analysis starts.

mod iou;

use std::sync::Arc;

use crate::detect::{BoundingBox, Detection};
use crate::frame::Frame;

pub use iou::{IouTracker, IouTrackerConfig};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackState {
    /// Seen, but not yet for enough consecutive frames to trust.
    Tentative,
    Confirmed,
    Deleted,
}

/// The tracker's belief about one object in the current frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Track {
    pub id: u64,
    pub bbox: BoundingBox,
    pub state: TrackState,
    /// Frames since this track was last matched to a detection (0 = this frame).
    pub time_since_update: u32,
}

impl Track {
    pub fn is_confirmed(&self) -> bool {
        self.state == TrackState::Confirmed
    }

    /// Confirmed and matched in this frame or the one before.
    pub fn is_active(&self) -> bool {
        self.is_confirmed() && self.time_since_update <= 1
    }

    pub fn to_ltrb(&self) -> [f32; 4] {
        self.bbox.to_ltrb()
    }
}

pub trait Tracker: Send {
    /// Associate this frame's detections with existing tracks and return the
    /// tracker's current track set (including tracks that missed this frame).
    fn update(&mut self, detections: &[Detection], frame: &Frame) -> Vec<Track>;
}

/// Builds a tracker with empty history.
pub type TrackerFactory = Arc<dyn Fn() -> Box<dyn Tracker> + Send + Sync>;

/// Factory for the built-in IoU tracker.
pub fn iou_tracker_factory(config: IouTrackerConfig) -> TrackerFactory {
    Arc::new(move || Box::new(IouTracker::new(config)) as Box<dyn Tracker>)
}
