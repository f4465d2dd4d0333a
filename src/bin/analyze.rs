//! zonewatch-analyze - run one video through a full analysis session offline

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use zonewatch::{
    DetectorKind, FrameResult, InMemoryZoneStore, SessionManager, ZoneDraft, ZoneStore,
    ZonewatchConfig,
};

#[path = "../ui.rs"]
mod ui;

const CLI_USER: &str = "cli";

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Video file to analyse.
    video: PathBuf,
    /// JSON file holding an array of zones ({"name", "points": [{"x","y"}]}).
    #[arg(long)]
    zones: Option<PathBuf>,
    /// Output directory for the final frame, heatmap and summary.
    #[arg(long, default_value = "zonewatch_out")]
    out: PathBuf,
    /// Detector backend (blob|tract); overrides configuration.
    #[arg(long)]
    detector: Option<DetectorKind>,
    /// ONNX model for the tract backend; overrides configuration.
    #[arg(long)]
    model: Option<PathBuf>,
    /// Stop after this many frames.
    #[arg(long)]
    max_frames: Option<u64>,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

#[derive(Debug, Default, Serialize)]
struct ZoneSummary {
    name: String,
    peak: usize,
    /// Sum of per-frame counts: person-frames spent in the zone.
    occupancy_frames: u64,
}

#[derive(Debug, Serialize)]
struct Summary {
    video: String,
    frames_analysed: u64,
    total_frames: u64,
    peak_active: usize,
    zones: BTreeMap<String, ZoneSummary>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let ui = ui::Ui::from_args(&args.ui, std::io::stderr().is_terminal());

    let mut config = ZonewatchConfig::load()?;
    if let Some(kind) = args.detector {
        config.detector.kind = kind;
    }
    if let Some(model) = &args.model {
        config.detector.model_path = Some(model.clone());
    }
    config.upload_dir = args.out.join("uploads");
    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("create output dir {}", args.out.display()))?;

    let zones = Arc::new(InMemoryZoneStore::new());
    if let Some(path) = &args.zones {
        let _stage = ui.stage("Load zones");
        for draft in read_zone_file(path)? {
            zones.create_zone(CLI_USER, draft)?;
        }
    }

    let sessions = {
        let _stage = ui.stage("Load detector");
        SessionManager::from_config(&config, zones.clone())
    };

    let total_frames = {
        let _stage = ui.stage("Open video");
        let bytes = std::fs::read(&args.video)
            .with_context(|| format!("read video {}", args.video.display()))?;
        let file_name = args
            .video
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        sessions.upload(CLI_USER, &file_name, &bytes)?;
        sessions.start(CLI_USER)?
    };

    let mut summary = Summary {
        video: args.video.display().to_string(),
        frames_analysed: 0,
        total_frames,
        peak_active: 0,
        zones: BTreeMap::new(),
    };
    let mut last: Option<FrameResult> = None;
    let progress = ui.frames(total_frames);
    loop {
        if args.max_frames.is_some_and(|max| summary.frames_analysed >= max) {
            sessions.teardown(CLI_USER)?;
            break;
        }
        let result = sessions.step(CLI_USER)?;
        if result.end_of_stream {
            break;
        }
        summary.frames_analysed = result.current_frame;
        summary.total_frames = result.total_frames;
        summary.peak_active = summary.peak_active.max(result.active_track_count);
        for (id, count) in &result.zone_counts {
            let entry = summary.zones.entry(id.clone()).or_default();
            entry.name.clone_from(&count.name);
            entry.peak = entry.peak.max(count.count);
            entry.occupancy_frames += count.count as u64;
        }
        progress.update(result.current_frame, result.active_track_count);
        last = Some(result);
    }
    progress.finish(summary.frames_analysed);

    let _stage = ui.stage("Write outputs");
    if let Some(last) = &last {
        write_image(&args.out.join("last_frame.jpg"), last.frame_image.as_deref())?;
        write_image(&args.out.join("heatmap.jpg"), last.heatmap_image.as_deref())?;
    }
    let summary_path = args.out.join("summary.json");
    std::fs::write(&summary_path, serde_json::to_vec_pretty(&summary)?)
        .with_context(|| format!("write {}", summary_path.display()))?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn read_zone_file(path: &Path) -> Result<Vec<ZoneDraft>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read zones file {}: {}", path.display(), e))?;
    serde_json::from_str(&raw).map_err(|e| anyhow!("invalid zones file {}: {}", path.display(), e))
}

fn write_image(path: &Path, bytes: Option<&[u8]>) -> Result<()> {
    let Some(bytes) = bytes else {
        return Ok(());
    };
    std::fs::write(path, bytes).with_context(|| format!("write {}", path.display()))?;
    log::debug!("wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}
