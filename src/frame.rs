//! Decoded video frames.
//!
//! Every source (GIF, FFmpeg) converts to packed RGB24 at decode time so the
//! detector, tracker and annotator all see one pixel layout.

use anyhow::{anyhow, Result};
use image::RgbImage;

/// One decoded frame, in RGB24.
#[derive(Clone, Debug)]
pub struct Frame {
    /// 1-based position of the frame within its video.
    pub index: u64,
    image: RgbImage,
}

impl Frame {
    pub fn new(index: u64, image: RgbImage) -> Self {
        Self { index, image }
    }

    /// Build a frame from tightly packed RGB24 bytes.
    pub fn from_rgb(index: u64, pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("RGB buffer does not match {}x{}", width, height))?;
        Ok(Self { index, image })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb_constructor_validates_length() {
        assert!(Frame::from_rgb(1, vec![0u8; 12], 2, 2).is_ok());
        assert!(Frame::from_rgb(1, vec![0u8; 11], 2, 2).is_err());
    }

    #[test]
    fn exposes_dimensions() -> Result<()> {
        let frame = Frame::from_rgb(3, vec![7u8; 4 * 3 * 3], 4, 3)?;
        assert_eq!((frame.width(), frame.height(), frame.index), (4, 3, 3));
        assert_eq!(frame.image().get_pixel(3, 2).0, [7, 7, 7]);
        Ok(())
    }
}
