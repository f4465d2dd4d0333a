//! Frame annotation and image encoding.

use std::io::Cursor;
use std::path::Path;
use std::sync::OnceLock;

use ab_glyph::{FontArc, FontVec, PxScale};
use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::track::Track;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: i32 = 2;
const LABEL_SCALE: f32 = 18.0;

static BUILTIN_FONT: &[u8] = include_bytes!("../assets/fonts/DejaVuSansMono.ttf");

/// Draws track boxes with `ID:<n>` labels.
pub struct Annotator {
    font: FontArc,
}

impl Annotator {
    /// Annotator using the bundled DejaVu Sans Mono.
    pub fn new() -> Self {
        Self {
            font: builtin_font(),
        }
    }

    pub fn with_font_file(path: &Path) -> Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("read label font {}", path.display()))?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|e| anyhow!("invalid label font {}: {}", path.display(), e))?;
        Ok(Self {
            font: FontArc::new(font),
        })
    }

    /// Load an override font, keeping the bundled one if it is unusable.
    pub fn from_font_path(path: Option<&Path>) -> Self {
        match path {
            Some(path) => Self::with_font_file(path).unwrap_or_else(|err| {
                log::warn!("{:#}; using bundled label font", err);
                Self::new()
            }),
            None => Self::new(),
        }
    }

    pub fn draw_track(&self, image: &mut RgbImage, track: &Track) {
        let [x1, y1, x2, y2] = track.to_ltrb().map(|v| v as i32);
        for inset in 0..BOX_THICKNESS {
            let width = x2 - x1 - 2 * inset;
            let height = y2 - y1 - 2 * inset;
            if width <= 0 || height <= 0 {
                break;
            }
            let rect = Rect::at(x1 + inset, y1 + inset).of_size(width as u32, height as u32);
            draw_hollow_rect_mut(image, rect, BOX_COLOR);
        }

        let label = format!("ID:{}", track.id);
        let y = (y1 - LABEL_SCALE as i32 - 2).max(0);
        draw_text_mut(
            image,
            BOX_COLOR,
            x1.max(0),
            y,
            PxScale::from(LABEL_SCALE),
            &self.font,
            &label,
        );
    }
}

fn builtin_font() -> FontArc {
    static FONT: OnceLock<FontArc> = OnceLock::new();
    FONT.get_or_init(|| {
        FontArc::try_from_slice(BUILTIN_FONT).expect("bundled font is a valid TrueType file")
    })
    .clone()
}

impl Default for Annotator {
    fn default() -> Self {
        Self::new()
    }
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(image)
        .context("encode JPEG")?;
    Ok(out.into_inner())
}
