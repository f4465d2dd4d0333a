use std::sync::Arc;

use anyhow::Result;

use crate::config::{DetectorKind, DetectorSettings};
use crate::detect::backend::Detector;
use crate::detect::backends::BlobBackend;
use crate::error::{AnalysisError, AnalysisResult};

/// The process-wide detector, or the reason it could not be loaded.
///
/// A failed load is not fatal to the process: zone management and uploads keep
/// working, and every analysis call reports `ModelUnavailable` instead.
#[derive(Clone)]
pub enum ModelSlot {
    Ready(Arc<dyn Detector>),
    Unavailable(String),
}

impl ModelSlot {
    /// Build and warm up the configured backend, logging on failure.
    pub fn load(settings: &DetectorSettings) -> Self {
        match build_detector(settings).and_then(|detector| {
            detector.warm_up()?;
            Ok(detector)
        }) {
            Ok(detector) => {
                log::info!("detector '{}' ready", detector.name());
                ModelSlot::Ready(detector)
            }
            Err(err) => {
                log::error!("could not load detector {:?}: {:#}", settings.kind, err);
                ModelSlot::Unavailable(format!("{:#}", err))
            }
        }
    }

    pub fn ready(detector: Arc<dyn Detector>) -> Self {
        ModelSlot::Ready(detector)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ModelSlot::Ready(_))
    }

    pub fn get(&self, op: &'static str) -> AnalysisResult<Arc<dyn Detector>> {
        match self {
            ModelSlot::Ready(detector) => Ok(detector.clone()),
            ModelSlot::Unavailable(reason) => Err(AnalysisError::ModelUnavailable {
                op,
                reason: reason.clone(),
            }),
        }
    }
}

fn build_detector(settings: &DetectorSettings) -> Result<Arc<dyn Detector>> {
    match settings.kind {
        DetectorKind::Blob => Ok(Arc::new(
            BlobBackend::new()
                .with_threshold(settings.blob_threshold)
                .with_min_area(settings.blob_min_area),
        )),
        DetectorKind::Tract => build_tract(settings),
    }
}

#[cfg(feature = "backend-tract")]
fn build_tract(settings: &DetectorSettings) -> Result<Arc<dyn Detector>> {
    use crate::detect::backends::TractBackend;

    let path = settings
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("tract detector requires a model path"))?;
    let backend = TractBackend::new(path, settings.input_width, settings.input_height)?
        .with_threshold(settings.confidence_threshold)
        .with_iou_threshold(settings.iou_threshold);
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn build_tract(_settings: &DetectorSettings) -> Result<Arc<dyn Detector>> {
    Err(anyhow::anyhow!(
        "tract detector requires the backend-tract feature"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_backend_always_loads() {
        let slot = ModelSlot::load(&DetectorSettings::default());
        assert!(slot.is_ready());
        assert_eq!(slot.get("step").map(|d| d.name()).ok(), Some("blob"));
    }

    #[test]
    fn missing_model_reports_unavailable() {
        let settings = DetectorSettings {
            kind: DetectorKind::Tract,
            model_path: None,
            ..DetectorSettings::default()
        };
        let slot = ModelSlot::load(&settings);
        assert!(!slot.is_ready());
        let err = slot.get("start").err().expect("unavailable");
        assert_eq!(err.status_code(), 503);
        assert!(err.to_string().starts_with("start:"));
    }
}
