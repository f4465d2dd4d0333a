//! zonewatch
//!
//! Per-user video analysis sessions: detect people frame by frame, follow them
//! with a multi-object tracker, count who stands in each user-drawn zone, and
//! accumulate a footprint heatmap.
//!
//! # Architecture
//!
//! - `session`: the session table and the `upload` / `start` / `step` / `teardown`
//!   lifecycle. Each user has at most one live session.
//! - `pipeline`: one frame through detect, track, zone count, heatmap, annotate, encode.
//! - `geometry`: normalized zone polygons and the point-in-zone test.
//! - `heatmap`: the lazily sized density buffer and its jet rendering.
//! - `detect` / `track`: detector backends and the IoU tracker behind traits.
//! - `ingest`: video decoding (GIF always, FFmpeg behind `ingest-file-ffmpeg`).
//! - `storage` / `upload`: zone persistence and uploaded file handling.
//! - `api`: the HTTP surface served by `zonewatchd`.

pub mod annotate;
pub mod api;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod heatmap;
pub mod ingest;
pub mod pipeline;
pub mod session;
pub mod storage;
pub mod track;
pub mod upload;

pub use annotate::{encode_jpeg, Annotator};
pub use config::{DetectorKind, DetectorSettings, RenderSettings, ZonewatchConfig};
pub use detect::{BlobBackend, BoundingBox, Detection, Detector, ModelSlot, ObjectClass};
pub use error::{AnalysisError, AnalysisResult};
pub use frame::Frame;
pub use geometry::{point_in_polygon, point_in_zone, NormalizedPoint, Point};
pub use heatmap::{Heatmap, HeatmapBuffer};
pub use ingest::VideoSource;
pub use pipeline::{FramePipeline, FrameResult, ZoneCount};
pub use session::{SessionManager, SessionStatus};
pub use storage::{InMemoryZoneStore, SqliteZoneStore, Zone, ZoneDraft, ZoneStore};
pub use track::{
    iou_tracker_factory, IouTracker, IouTrackerConfig, Track, TrackState, Tracker, TrackerFactory,
};
pub use upload::UploadStore;
