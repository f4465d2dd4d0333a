use thiserror::Error;

/// Failures surfaced by the session engine and the zone/upload boundaries.
///
/// Each variant names the operation that failed and the cause a caller can act on.
/// `status_code` maps the variant onto the HTTP status the API layer reports.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("start: no video uploaded for user '{user}'")]
    NoUpload { user: String },

    #[error("start: could not open video {path}: {reason}")]
    VideoOpen { path: String, reason: String },

    #[error("{op}: analysis not started or session expired for user '{user}'")]
    NoActiveSession { op: &'static str, user: String },

    #[error("{op}: storage failure: {source}")]
    Storage {
        op: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("{op}: detection model is not loaded: {reason}")]
    ModelUnavailable { op: &'static str, reason: String },

    #[error("{op}: analysis of frame {frame} failed for user '{user}': {source}")]
    FrameFailed {
        op: &'static str,
        user: String,
        frame: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("zone rejected: {0}")]
    ZoneValidation(String),

    #[error("zone '{zone_id}' not found")]
    ZoneNotFound { zone_id: String },

    #[error("user identifier rejected: {0}")]
    InvalidUser(String),

    #[error("upload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AnalysisError {
    pub fn storage(op: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::Storage {
            op,
            source: source.into(),
        }
    }

    /// Stable machine-readable error code for API payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoUpload { .. } => "no_upload",
            Self::VideoOpen { .. } => "video_open_failed",
            Self::NoActiveSession { .. } => "no_active_session",
            Self::Storage { .. } => "storage_unavailable",
            Self::ModelUnavailable { .. } => "model_unavailable",
            Self::FrameFailed { .. } => "frame_failed",
            Self::ZoneValidation(_) => "invalid_zone",
            Self::ZoneNotFound { .. } => "zone_not_found",
            Self::InvalidUser(_) => "invalid_user",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::NoUpload { .. }
            | Self::NoActiveSession { .. }
            | Self::ZoneValidation(_) => 400,
            Self::InvalidUser(_) => 401,
            Self::ZoneNotFound { .. } => 404,
            Self::PayloadTooLarge { .. } => 413,
            Self::VideoOpen { .. } => 422,
            Self::Storage { .. } | Self::ModelUnavailable { .. } => 503,
            Self::FrameFailed { .. } | Self::Internal(_) => 500,
        }
    }
}

pub type AnalysisResult<T> = std::result::Result<T, AnalysisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_failures_map_to_unavailable() {
        let err = AnalysisError::storage("list zones", anyhow::anyhow!("disk gone"));
        assert_eq!(err.status_code(), 503);
        assert_eq!(err.code(), "storage_unavailable");
        assert!(err.to_string().contains("list zones"));

        let err = AnalysisError::ModelUnavailable {
            op: "step",
            reason: "missing weights".into(),
        };
        assert_eq!(err.status_code(), 503);
    }

    #[test]
    fn validation_failures_are_client_errors() {
        assert_eq!(
            AnalysisError::ZoneValidation("name is required".into()).status_code(),
            400
        );
        let err = AnalysisError::NoActiveSession {
            op: "step",
            user: "u1".into(),
        };
        assert_eq!(err.status_code(), 400);
        assert!(err.to_string().starts_with("step:"));
    }

    #[test]
    fn frame_failures_name_operation_and_frame() {
        let err = AnalysisError::FrameFailed {
            op: "step",
            user: "u1".into(),
            frame: 2,
            source: anyhow::anyhow!("inference failed"),
        };
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.code(), "frame_failed");
        assert_eq!(
            err.to_string(),
            "step: analysis of frame 2 failed for user 'u1': inference failed"
        );
    }
}
