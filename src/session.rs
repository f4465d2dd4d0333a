//! Per-user analysis sessions.
//!
//! The session table maps a user id to its own slot. The table lock is only
//! held to look up, insert or remove a slot; decoding and inference run under
//! the slot's lock, so users never wait on each other and a single user can
//! never have two frames in flight.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::anyhow;

use crate::config::ZonewatchConfig;
use crate::detect::ModelSlot;
use crate::error::{AnalysisError, AnalysisResult};
use crate::frame::Frame;
use crate::heatmap::Heatmap;
use crate::ingest::VideoSource;
use crate::pipeline::{detect_people, FramePipeline, FrameResult, PipelineState};
use crate::storage::ZoneStore;
use crate::track::{iou_tracker_factory, IouTrackerConfig, Tracker, TrackerFactory};
use crate::upload::UploadStore;

enum SessionSlot {
    /// A video is on disk but analysis has not started.
    Uploaded { path: PathBuf },
    Active(ActiveSession),
    /// Finished, torn down or superseded. Never revived; a new upload gets a new slot.
    Closed,
}

impl SessionSlot {
    /// Close the slot, returning the upload it was holding. Drops any open video.
    fn close(&mut self) -> Option<PathBuf> {
        match std::mem::replace(self, SessionSlot::Closed) {
            SessionSlot::Uploaded { path } => Some(path),
            SessionSlot::Active(session) => Some(session.path),
            SessionSlot::Closed => None,
        }
    }
}

struct ActiveSession {
    path: PathBuf,
    source: VideoSource,
    /// Decoded frame whose detection failed; retried by the next step.
    pending: Option<Frame>,
    tracker: Box<dyn Tracker>,
    heatmap: Heatmap,
    current_frame: u64,
    total_frames: u64,
}

type SharedSlot = Arc<Mutex<SessionSlot>>;

/// Externally visible summary of a user's session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    None,
    Uploaded,
    Active { current_frame: u64, total_frames: u64 },
}

pub struct SessionManager {
    sessions: Mutex<HashMap<String, SharedSlot>>,
    uploads: UploadStore,
    zones: Arc<dyn ZoneStore>,
    model: ModelSlot,
    tracker_factory: TrackerFactory,
    pipeline: FramePipeline,
}

impl SessionManager {
    pub fn new(uploads: UploadStore, zones: Arc<dyn ZoneStore>, model: ModelSlot) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            uploads,
            zones,
            model,
            tracker_factory: iou_tracker_factory(IouTrackerConfig::default()),
            pipeline: FramePipeline::new(Default::default()),
        }
    }

    /// Wire a manager from loaded configuration. The detector is loaded here;
    /// a failed load leaves the manager usable for zones and uploads.
    pub fn from_config(config: &ZonewatchConfig, zones: Arc<dyn ZoneStore>) -> Self {
        Self::new(
            UploadStore::new(config.upload_dir.clone(), config.max_upload_bytes),
            zones,
            ModelSlot::load(&config.detector),
        )
        .with_tracker_factory(iou_tracker_factory(config.tracker))
        .with_pipeline(FramePipeline::new(config.render.clone()))
    }

    pub fn with_tracker_factory(mut self, factory: TrackerFactory) -> Self {
        self.tracker_factory = factory;
        self
    }

    pub fn with_pipeline(mut self, pipeline: FramePipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn zones(&self) -> &dyn ZoneStore {
        self.zones.as_ref()
    }

    pub fn uploads(&self) -> &UploadStore {
        &self.uploads
    }

    pub fn model_ready(&self) -> bool {
        self.model.is_ready()
    }

    /// Store an upload and make it the user's pending video.
    ///
    /// Any previous session for the user is closed, after waiting for a step
    /// that is still running on it, and its upload is deleted.
    pub fn upload(&self, user: &str, file_name: &str, bytes: &[u8]) -> AnalysisResult<PathBuf> {
        let path = self.uploads.save(user, file_name, bytes)?;
        let fresh = Arc::new(Mutex::new(SessionSlot::Uploaded { path: path.clone() }));
        let previous = self.lock_table()?.insert(user.to_string(), fresh);
        if let Some(previous) = previous {
            let mut slot = lock_slot(&previous)?;
            if matches!(*slot, SessionSlot::Active(_)) {
                log::info!("user {}: new upload supersedes active session", user);
            }
            let superseded = slot.close();
            drop(slot);
            if let Some(old) = superseded {
                self.uploads.discard(&old);
            }
        }
        log::info!(
            "user {}: stored upload {} ({} bytes)",
            user,
            path.display(),
            bytes.len()
        );
        Ok(path)
    }

    /// Open the user's uploaded video and attach a fresh tracker and heatmap.
    /// Restarting an active session rewinds it. Returns the total frame count.
    pub fn start(&self, user: &str) -> AnalysisResult<u64> {
        let no_upload = || AnalysisError::NoUpload {
            user: user.to_string(),
        };
        let shared = self.lookup(user)?.ok_or_else(no_upload)?;
        let mut slot = lock_slot(&shared)?;
        let path = match &*slot {
            SessionSlot::Uploaded { path } => path.clone(),
            SessionSlot::Active(session) => session.path.clone(),
            SessionSlot::Closed => return Err(no_upload()),
        };
        self.model.get("start")?;

        let source = VideoSource::open(&path).map_err(|err| AnalysisError::VideoOpen {
            path: path.display().to_string(),
            reason: format!("{:#}", err),
        })?;
        let total_frames = source.total_frames();
        *slot = SessionSlot::Active(ActiveSession {
            path,
            source,
            pending: None,
            tracker: (self.tracker_factory)(),
            heatmap: Heatmap::default(),
            current_frame: 0,
            total_frames,
        });
        log::info!("user {}: analysis started ({} frames)", user, total_frames);
        Ok(total_frames)
    }

    /// Analyse the next frame of the user's active session.
    ///
    /// When the video is exhausted, or a frame cannot be decoded, the session and
    /// its upload are released and an end-of-stream result is returned. The next
    /// call fails with `NoActiveSession`.
    ///
    /// If detection fails the frame is kept and the next call retries it, so the
    /// frame counter only advances once a frame has been detected. A failure after
    /// detection (tracking has already seen the frame) consumes the frame.
    pub fn step(&self, user: &str) -> AnalysisResult<FrameResult> {
        let no_session = || AnalysisError::NoActiveSession {
            op: "step",
            user: user.to_string(),
        };
        let shared = self.lookup(user)?.ok_or_else(no_session)?;
        let mut slot = lock_slot(&shared)?;

        let end = {
            let SessionSlot::Active(session) = &mut *slot else {
                return Err(no_session());
            };
            let detector = self.model.get("step")?;
            let zones = self.zones.list_zones(user)?;

            let frame = match session.pending.take() {
                Some(frame) => Some(frame),
                None => session.source.next_frame().unwrap_or_else(|err| {
                    log::warn!(
                        "user {}: decode failed after frame {}: {:#}",
                        user,
                        session.current_frame,
                        err
                    );
                    None
                }),
            };

            match frame {
                Some(frame) => {
                    let index = session.current_frame + 1;
                    let frame_failed = |source| AnalysisError::FrameFailed {
                        op: "step",
                        user: user.to_string(),
                        frame: index,
                        source,
                    };
                    let detections = match detect_people(detector.as_ref(), &frame) {
                        Ok(detections) => detections,
                        Err(err) => {
                            log::warn!(
                                "user {}: detection failed on frame {}: {:#}",
                                user,
                                index,
                                err
                            );
                            session.pending = Some(frame);
                            return Err(frame_failed(err));
                        }
                    };
                    session.current_frame = index;
                    // Container metadata can undercount.
                    session.total_frames = session.total_frames.max(index);
                    return self
                        .pipeline
                        .process(
                            frame,
                            detections,
                            &zones,
                            PipelineState {
                                tracker: session.tracker.as_mut(),
                                heatmap: &mut session.heatmap,
                                current_frame: index,
                                total_frames: session.total_frames,
                            },
                        )
                        .map_err(frame_failed);
                }
                None => FrameResult::end_of_stream(session.current_frame, session.total_frames),
            }
        };

        let finished = slot.close();
        drop(slot);
        self.remove_if_current(user, &shared)?;
        if let Some(path) = finished {
            self.uploads.discard(&path);
        }
        log::info!(
            "user {}: end of stream after {} frames",
            user,
            end.current_frame
        );
        Ok(end)
    }

    /// Release the user's session, its video handle and the uploaded file. Safe to
    /// call repeatedly.
    pub fn teardown(&self, user: &str) -> AnalysisResult<()> {
        let removed = self.lock_table()?.remove(user);
        if let Some(shared) = removed {
            let released = lock_slot(&shared)?.close();
            if let Some(path) = released {
                self.uploads.discard(&path);
            }
            log::info!("user {}: session torn down", user);
        }
        Ok(())
    }

    pub fn status(&self, user: &str) -> AnalysisResult<SessionStatus> {
        let Some(shared) = self.lookup(user)? else {
            return Ok(SessionStatus::None);
        };
        let slot = lock_slot(&shared)?;
        Ok(match &*slot {
            SessionSlot::Uploaded { .. } => SessionStatus::Uploaded,
            SessionSlot::Active(session) => SessionStatus::Active {
                current_frame: session.current_frame,
                total_frames: session.total_frames,
            },
            SessionSlot::Closed => SessionStatus::None,
        })
    }

    pub fn session_count(&self) -> AnalysisResult<usize> {
        Ok(self.lock_table()?.len())
    }

    fn lookup(&self, user: &str) -> AnalysisResult<Option<SharedSlot>> {
        Ok(self.lock_table()?.get(user).cloned())
    }

    /// Drop the table entry unless a newer upload has already replaced it.
    fn remove_if_current(&self, user: &str, shared: &SharedSlot) -> AnalysisResult<()> {
        let mut table = self.lock_table()?;
        if table
            .get(user)
            .is_some_and(|current| Arc::ptr_eq(current, shared))
        {
            table.remove(user);
        }
        Ok(())
    }

    fn lock_table(&self) -> AnalysisResult<MutexGuard<'_, HashMap<String, SharedSlot>>> {
        self.sessions
            .lock()
            .map_err(|_| AnalysisError::Internal(anyhow!("session table lock poisoned")))
    }
}

fn lock_slot(slot: &Mutex<SessionSlot>) -> AnalysisResult<MutexGuard<'_, SessionSlot>> {
    slot.lock()
        .map_err(|_| AnalysisError::Internal(anyhow!("session lock poisoned")))
}
