//! Video sources for uploaded files.
//!
//! Animated GIFs decode through the `image` crate and are always available.
//! Other containers decode through FFmpeg when the `ingest-file-ffmpeg` feature
//! is enabled. Every source yields RGB24 `Frame`s and reports its frame count
//! up front.

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;

pub use file::VideoSource;
