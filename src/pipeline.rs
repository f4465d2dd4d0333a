//! Single-frame analysis: detect, track, count, accumulate, render.

use std::collections::BTreeMap;

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Serialize, Serializer};

use crate::annotate::{encode_jpeg, Annotator};
use crate::config::RenderSettings;
use crate::detect::{Detection, Detector, ObjectClass};
use crate::frame::Frame;
use crate::geometry::{point_in_zone, Point};
use crate::heatmap::Heatmap;
use crate::storage::Zone;
use crate::track::{Track, Tracker};

/// Occupancy of one zone in one frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ZoneCount {
    pub name: String,
    pub count: usize,
}

/// Everything the caller learns from one `step`.
#[derive(Clone, Debug, Serialize)]
pub struct FrameResult {
    #[serde(
        serialize_with = "serialize_base64",
        skip_serializing_if = "Option::is_none"
    )]
    pub frame_image: Option<Vec<u8>>,
    #[serde(
        serialize_with = "serialize_base64",
        skip_serializing_if = "Option::is_none"
    )]
    pub heatmap_image: Option<Vec<u8>>,
    pub current_frame: u64,
    pub total_frames: u64,
    pub active_track_count: usize,
    /// Keyed by zone id.
    pub zone_counts: BTreeMap<String, ZoneCount>,
    pub end_of_stream: bool,
}

impl FrameResult {
    /// Terminal result: no images, counters frozen at the last decoded frame.
    pub fn end_of_stream(current_frame: u64, total_frames: u64) -> Self {
        Self {
            frame_image: None,
            heatmap_image: None,
            current_frame,
            total_frames,
            active_track_count: 0,
            zone_counts: BTreeMap::new(),
            end_of_stream: true,
        }
    }
}

fn serialize_base64<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
    match bytes {
        Some(bytes) => s.serialize_str(&BASE64.encode(bytes)),
        None => s.serialize_none(),
    }
}

/// Per-session mutable state the pipeline works on.
pub struct PipelineState<'a> {
    pub tracker: &'a mut dyn Tracker,
    pub heatmap: &'a mut Heatmap,
    pub current_frame: u64,
    pub total_frames: u64,
}

/// Run the detector on `frame`, keeping people only.
pub fn detect_people(detector: &dyn Detector, frame: &Frame) -> Result<Vec<Detection>> {
    detector.detect(frame, &[ObjectClass::Person])
}

/// Footprint anchor of a box: horizontal center of the bottom edge, in integer
/// pixels.
pub fn track_anchor(track: &Track) -> (i64, i64) {
    let [x1, _, x2, y2] = track.to_ltrb().map(|v| v as i64);
    ((x1 + x2).div_euclid(2), y2)
}

pub struct FramePipeline {
    annotator: Annotator,
    render: RenderSettings,
}

impl FramePipeline {
    pub fn new(render: RenderSettings) -> Self {
        let annotator = Annotator::from_font_path(render.font_path.as_deref());
        Self { annotator, render }
    }

    pub fn with_annotator(render: RenderSettings, annotator: Annotator) -> Self {
        Self { annotator, render }
    }

    /// Analyse one decoded frame given its person detections.
    pub fn process(
        &self,
        frame: Frame,
        detections: Vec<Detection>,
        zones: &[Zone],
        state: PipelineState<'_>,
    ) -> Result<FrameResult> {
        let tracks = state.tracker.update(&detections, &frame);
        let active: Vec<&Track> = tracks.iter().filter(|t| t.is_active()).collect();

        let (width, height) = (frame.width(), frame.height());
        let heatmap = state.heatmap.ensure_sized(width, height);

        let mut zone_counts: BTreeMap<String, ZoneCount> = zones
            .iter()
            .map(|zone| {
                (
                    zone.id.clone(),
                    ZoneCount {
                        name: zone.name.clone(),
                        count: 0,
                    },
                )
            })
            .collect();

        let mut annotated = frame.into_image();
        for track in &active {
            let (cx, cy) = track_anchor(track);
            if (0..width as i64).contains(&cx) && (0..height as i64).contains(&cy) {
                heatmap.increment(cx, cy, self.render.heatmap_radius);
            }
            self.annotator.draw_track(&mut annotated, track);

            let anchor = Point::new(cx as f64, cy as f64);
            for zone in zones {
                if point_in_zone(anchor, &zone.points, width, height) {
                    if let Some(entry) = zone_counts.get_mut(&zone.id) {
                        entry.count += 1;
                    }
                }
            }
        }

        log::debug!(
            "frame {}/{}: {} detections, {} active tracks",
            state.current_frame,
            state.total_frames,
            detections.len(),
            active.len()
        );

        let rendered = heatmap.render();
        Ok(FrameResult {
            frame_image: Some(encode_jpeg(&annotated, self.render.jpeg_quality)?),
            heatmap_image: Some(encode_jpeg(&rendered, self.render.jpeg_quality)?),
            current_frame: state.current_frame,
            total_frames: state.total_frames,
            active_track_count: active.len(),
            zone_counts,
            end_of_stream: false,
        })
    }
}
