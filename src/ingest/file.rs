use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::thread;

use anyhow::{anyhow, Context, Result};
use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, DynamicImage, RgbImage};

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use crate::frame::Frame;

const GIF_MAGIC: &[u8] = b"GIF8";

/// Sequential reader over one local video file.
pub struct VideoSource {
    path: PathBuf,
    backend: VideoBackend,
    total_frames: u64,
    frames_read: u64,
}

enum VideoBackend {
    Gif(GifFrames),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl std::fmt::Debug for VideoSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoSource")
            .field("path", &self.path)
            .field("total_frames", &self.total_frames)
            .field("frames_read", &self.frames_read)
            .finish()
    }
}

impl VideoSource {
    /// Open `path`, picking a decoder from the file's leading bytes.
    pub fn open(path: &Path) -> Result<Self> {
        let mut header = [0u8; 4];
        let mut file =
            File::open(path).with_context(|| format!("open video file {}", path.display()))?;
        let read = file
            .read(&mut header)
            .with_context(|| format!("read video header {}", path.display()))?;
        drop(file);

        let (backend, total_frames) = if read == header.len() && header == GIF_MAGIC {
            let (frames, total) = GifFrames::open(path)?;
            (VideoBackend::Gif(frames), total)
        } else {
            open_container(path)?
        };
        log::debug!(
            "opened video {} ({} frames)",
            path.display(),
            total_frames
        );
        Ok(Self {
            path: path.to_path_buf(),
            backend,
            total_frames,
            frames_read: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Frame count from the file's metadata. May be an estimate for containers
    /// that only record a duration.
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Decode the next frame. `Ok(None)` once the stream is exhausted.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        let next = match &mut self.backend {
            VideoBackend::Gif(gif) => gif.next()?.map(|image| Frame::new(0, image)),
            #[cfg(feature = "ingest-file-ffmpeg")]
            VideoBackend::Ffmpeg(source) => match source.next_frame()? {
                Some((pixels, width, height)) => Some(Frame::from_rgb(0, pixels, width, height)?),
                None => None,
            },
        };
        Ok(next.map(|mut frame| {
            self.frames_read += 1;
            frame.index = self.frames_read;
            frame
        }))
    }
}

#[cfg(feature = "ingest-file-ffmpeg")]
fn open_container(path: &Path) -> Result<(VideoBackend, u64)> {
    let source = FfmpegFileSource::new(path)?;
    let total = source.total_frames();
    Ok((VideoBackend::Ffmpeg(source), total))
}

#[cfg(not(feature = "ingest-file-ffmpeg"))]
fn open_container(path: &Path) -> Result<(VideoBackend, u64)> {
    Err(anyhow!(
        "{} is not a GIF; other containers require the ingest-file-ffmpeg feature",
        path.display()
    ))
}

/// GIF frames decoded on a dedicated reader thread. The `image` frame iterator
/// is not `Send` and sessions move between request threads. The bounded channel
/// keeps the reader at most two frames ahead of the session.
struct GifFrames {
    frames: Receiver<Result<RgbImage>>,
}

impl GifFrames {
    /// Count the frames, then start the reader. Returns the frame count.
    fn open(path: &Path) -> Result<(Self, u64)> {
        let total = count_gif_frames(path)?;
        if total == 0 {
            return Err(anyhow!("{} contains no frames", path.display()));
        }

        let (tx, rx) = mpsc::sync_channel(1);
        let path = path.to_path_buf();
        thread::Builder::new()
            .name("gif-reader".into())
            .spawn(move || {
                let decoder = match open_gif(&path) {
                    Ok(decoder) => decoder,
                    Err(err) => {
                        let _ = tx.send(Err(err));
                        return;
                    }
                };
                for frame in decoder.into_frames() {
                    let frame = frame
                        .map(|frame| DynamicImage::ImageRgba8(frame.into_buffer()).into_rgb8())
                        .with_context(|| format!("decode GIF frame {}", path.display()));
                    let failed = frame.is_err();
                    // A send error means the source was dropped.
                    if tx.send(frame).is_err() || failed {
                        return;
                    }
                }
            })
            .context("spawn GIF reader thread")?;
        Ok((Self { frames: rx }, total))
    }

    fn next(&mut self) -> Result<Option<RgbImage>> {
        match self.frames.recv() {
            Ok(frame) => frame.map(Some),
            // Reader finished.
            Err(mpsc::RecvError) => Ok(None),
        }
    }
}

fn open_gif(path: &Path) -> Result<GifDecoder<BufReader<File>>> {
    let file = File::open(path).with_context(|| format!("open GIF {}", path.display()))?;
    GifDecoder::new(BufReader::new(file))
        .with_context(|| format!("parse GIF header {}", path.display()))
}

/// Decode every frame once, dropping each, to learn the length.
fn count_gif_frames(path: &Path) -> Result<u64> {
    let mut count = 0;
    for frame in open_gif(path)?.into_frames() {
        frame.with_context(|| format!("decode GIF frames {}", path.display()))?;
        count += 1;
    }
    Ok(count)
}
