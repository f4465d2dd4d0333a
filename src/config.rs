use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::track::IouTrackerConfig;

const DEFAULT_API_ADDR: &str = "127.0.0.1:8799";
const DEFAULT_DB_PATH: &str = "zonewatch.db";
const DEFAULT_UPLOAD_DIR: &str = "uploads";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_CONFIDENCE: f32 = 0.25;
const DEFAULT_IOU: f32 = 0.45;
const DEFAULT_BLOB_THRESHOLD: u8 = 128;
const DEFAULT_BLOB_MIN_AREA: usize = 64;
const DEFAULT_JPEG_QUALITY: u8 = 80;
const DEFAULT_HEATMAP_RADIUS: u32 = 5;

#[derive(Debug, Deserialize, Default)]
struct ZonewatchConfigFile {
    api: Option<ApiConfigFile>,
    storage: Option<StorageConfigFile>,
    detector: Option<DetectorConfigFile>,
    tracker: Option<TrackerConfigFile>,
    render: Option<RenderConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    max_upload_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    db_path: Option<String>,
    upload_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<DetectorKind>,
    model_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    blob_threshold: Option<u8>,
    blob_min_area: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackerConfigFile {
    max_age: Option<u32>,
    n_init: Option<u32>,
    min_iou: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct RenderConfigFile {
    jpeg_quality: Option<u8>,
    heatmap_radius: Option<u32>,
    font_path: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    Blob,
    Tract,
}

impl FromStr for DetectorKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "blob" => Ok(DetectorKind::Blob),
            "tract" => Ok(DetectorKind::Tract),
            other => Err(anyhow!(
                "unknown detector backend '{}' (expected blob or tract)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub kind: DetectorKind,
    pub model_path: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub blob_threshold: u8,
    pub blob_min_area: usize,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            kind: DetectorKind::Blob,
            model_path: None,
            input_width: DEFAULT_INPUT_SIZE,
            input_height: DEFAULT_INPUT_SIZE,
            confidence_threshold: DEFAULT_CONFIDENCE,
            iou_threshold: DEFAULT_IOU,
            blob_threshold: DEFAULT_BLOB_THRESHOLD,
            blob_min_area: DEFAULT_BLOB_MIN_AREA,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub jpeg_quality: u8,
    pub heatmap_radius: u32,
    /// TTF/OTF font overriding the bundled label font.
    pub font_path: Option<PathBuf>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            heatmap_radius: DEFAULT_HEATMAP_RADIUS,
            font_path: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ZonewatchConfig {
    pub api_addr: String,
    pub max_upload_bytes: usize,
    pub db_path: String,
    pub upload_dir: PathBuf,
    pub detector: DetectorSettings,
    pub tracker: IouTrackerConfig,
    pub render: RenderSettings,
}

impl ZonewatchConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ZONEWATCH_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ZonewatchConfigFile) -> Self {
        let api = file.api.unwrap_or_default();
        let storage = file.storage.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let tracker = file.tracker.unwrap_or_default();
        let render = file.render.unwrap_or_default();

        let detector_defaults = DetectorSettings::default();
        let tracker_defaults = IouTrackerConfig::default();
        let render_defaults = RenderSettings::default();

        Self {
            api_addr: api.addr.unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            max_upload_bytes: api.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            db_path: storage
                .db_path
                .unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            upload_dir: storage
                .upload_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOAD_DIR)),
            detector: DetectorSettings {
                kind: detector.backend.unwrap_or(detector_defaults.kind),
                model_path: detector.model_path,
                input_width: detector.input_width.unwrap_or(detector_defaults.input_width),
                input_height: detector
                    .input_height
                    .unwrap_or(detector_defaults.input_height),
                confidence_threshold: detector
                    .confidence_threshold
                    .unwrap_or(detector_defaults.confidence_threshold),
                iou_threshold: detector
                    .iou_threshold
                    .unwrap_or(detector_defaults.iou_threshold),
                blob_threshold: detector
                    .blob_threshold
                    .unwrap_or(detector_defaults.blob_threshold),
                blob_min_area: detector
                    .blob_min_area
                    .unwrap_or(detector_defaults.blob_min_area),
            },
            tracker: IouTrackerConfig {
                max_age: tracker.max_age.unwrap_or(tracker_defaults.max_age),
                n_init: tracker.n_init.unwrap_or(tracker_defaults.n_init),
                min_iou: tracker.min_iou.unwrap_or(tracker_defaults.min_iou),
            },
            render: RenderSettings {
                jpeg_quality: render.jpeg_quality.unwrap_or(render_defaults.jpeg_quality),
                heatmap_radius: render
                    .heatmap_radius
                    .unwrap_or(render_defaults.heatmap_radius),
                font_path: render.font_path,
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = non_empty_env("ZONEWATCH_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(path) = non_empty_env("ZONEWATCH_DB_PATH") {
            self.db_path = path;
        }
        if let Some(dir) = non_empty_env("ZONEWATCH_UPLOAD_DIR") {
            self.upload_dir = PathBuf::from(dir);
        }
        if let Some(kind) = non_empty_env("ZONEWATCH_DETECTOR") {
            self.detector.kind = kind.parse().context("ZONEWATCH_DETECTOR")?;
        }
        if let Some(path) = non_empty_env("ZONEWATCH_MODEL_PATH") {
            self.detector.model_path = Some(PathBuf::from(path));
        }
        if let Some(path) = non_empty_env("ZONEWATCH_FONT_PATH") {
            self.render.font_path = Some(PathBuf::from(path));
        }
        if let Some(limit) = non_empty_env("ZONEWATCH_MAX_UPLOAD_BYTES") {
            self.max_upload_bytes = limit.trim().parse().map_err(|_| {
                anyhow!("ZONEWATCH_MAX_UPLOAD_BYTES must be an integer number of bytes")
            })?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.max_upload_bytes == 0 {
            return Err(anyhow!("max_upload_bytes must be greater than zero"));
        }
        if !(1..=100).contains(&self.render.jpeg_quality) {
            return Err(anyhow!("render.jpeg_quality must be between 1 and 100"));
        }
        if self.render.heatmap_radius == 0 {
            return Err(anyhow!("render.heatmap_radius must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.tracker.min_iou) {
            return Err(anyhow!("tracker.min_iou must be within [0, 1]"));
        }
        if self.tracker.n_init == 0 {
            return Err(anyhow!("tracker.n_init must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.detector.confidence_threshold)
            || !(0.0..=1.0).contains(&self.detector.iou_threshold)
        {
            return Err(anyhow!("detector thresholds must be within [0, 1]"));
        }
        if self.detector.input_width == 0 || self.detector.input_height == 0 {
            return Err(anyhow!("detector input size must be non-zero"));
        }
        if self.detector.kind == DetectorKind::Tract && self.detector.model_path.is_none() {
            return Err(anyhow!(
                "detector backend 'tract' requires detector.model_path or ZONEWATCH_MODEL_PATH"
            ));
        }
        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<ZonewatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
