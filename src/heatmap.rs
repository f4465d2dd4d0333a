//! Footprint density accumulation.
//!
//! The heatmap starts unsized and takes the dimensions of the first decoded
//! frame. From then on it only grows: every active track adds to a small window
//! around its footprint each frame. Rendering normalizes against the running
//! min/max of the whole session, so colors are relative, not absolute.

use image::{GrayImage, Luma, Rgb, RgbImage};

/// Default half-width of the increment window (a 10x10 patch).
pub const DEFAULT_RADIUS: u32 = 5;

/// Per-session accumulator, sized lazily from the first frame.
#[derive(Clone, Debug, Default)]
pub struct Heatmap {
    buffer: Option<HeatmapBuffer>,
}

impl Heatmap {
    /// Size the buffer on first use and return it.
    pub fn ensure_sized(&mut self, width: u32, height: u32) -> &mut HeatmapBuffer {
        self.buffer.get_or_insert_with(|| {
            log::debug!("heatmap sized to {}x{}", width, height);
            HeatmapBuffer::new(width, height)
        })
    }

    /// `None` until the first frame has been seen.
    pub fn buffer(&self) -> Option<&HeatmapBuffer> {
        self.buffer.as_ref()
    }
}

/// Dense row-major `f32` counter matching the frame resolution.
#[derive(Clone, Debug, PartialEq)]
pub struct HeatmapBuffer {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl HeatmapBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            values: vec![0.0; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.values[y as usize * self.width as usize + x as usize])
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Add 1 to every cell of `[cy - radius, cy + radius) x [cx - radius, cx + radius)`,
    /// clipped to the buffer. Centers outside the buffer still touch any overlap.
    pub fn increment(&mut self, cx: i64, cy: i64, radius: u32) {
        let r = radius as i64;
        let x0 = (cx - r).clamp(0, self.width as i64) as usize;
        let x1 = (cx + r).clamp(0, self.width as i64) as usize;
        let y0 = (cy - r).clamp(0, self.height as i64) as usize;
        let y1 = (cy + r).clamp(0, self.height as i64) as usize;
        let stride = self.width as usize;
        for y in y0..y1 {
            for value in &mut self.values[y * stride + x0..y * stride + x1] {
                *value += 1.0;
            }
        }
    }

    /// Min-max normalize to 8 bits. A constant field maps to all zeros.
    pub fn normalized(&self) -> GrayImage {
        let (min, max) = self
            .values
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let range = max - min;
        let scale = if range > f32::EPSILON {
            255.0 / range
        } else {
            0.0
        };
        GrayImage::from_fn(self.width, self.height, |x, y| {
            let v = self.values[y as usize * self.width as usize + x as usize];
            Luma([((v - min) * scale).round().clamp(0.0, 255.0) as u8])
        })
    }

    /// False-color visualization of the accumulated density.
    pub fn render(&self) -> RgbImage {
        let gray = self.normalized();
        RgbImage::from_fn(self.width, self.height, |x, y| {
            jet(gray.get_pixel(x, y).0[0])
        })
    }
}

/// Jet colormap: dark blue through cyan, yellow to dark red.
pub fn jet(value: u8) -> Rgb<u8> {
    let t = value as f32 / 255.0;
    let channel =
        |offset: f32| ((1.5 - (4.0 * t - offset).abs()).clamp(0.0, 1.0) * 255.0).round() as u8;
    Rgb([channel(3.0), channel(2.0), channel(1.0)])
}
