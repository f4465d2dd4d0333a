use std::collections::VecDeque;

use anyhow::Result;

use crate::detect::backend::Detector;
use crate::detect::result::{BoundingBox, Detection, ObjectClass};
use crate::frame::Frame;

const DEFAULT_LUMA_THRESHOLD: u8 = 128;
const DEFAULT_MIN_AREA: usize = 64;

/// CPU backend: bright connected regions on a dark background.
///
/// Every 4-connected region of pixels at or above the luminance threshold
/// becomes one detection labeled with the configured class. Meant for fixed
/// overhead cameras with controlled lighting, and for tests.
pub struct BlobBackend {
    threshold: u8,
    min_area: usize,
    label: ObjectClass,
}

impl BlobBackend {
    pub fn new() -> Self {
        Self {
            threshold: DEFAULT_LUMA_THRESHOLD,
            min_area: DEFAULT_MIN_AREA,
            label: ObjectClass::Person,
        }
    }

    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.threshold = threshold;
        self
    }

    /// Regions smaller than `min_area` pixels are ignored as noise.
    pub fn with_min_area(mut self, min_area: usize) -> Self {
        self.min_area = min_area;
        self
    }

    pub fn with_label(mut self, label: ObjectClass) -> Self {
        self.label = label;
        self
    }

    fn foreground_mask(&self, frame: &Frame) -> Vec<bool> {
        frame
            .image()
            .pixels()
            .map(|p| {
                let [r, g, b] = p.0;
                let luma = (299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000;
                luma >= self.threshold as u32
            })
            .collect()
    }
}

impl Default for BlobBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for BlobBackend {
    fn name(&self) -> &'static str {
        "blob"
    }

    fn detect(&self, frame: &Frame, classes: &[ObjectClass]) -> Result<Vec<Detection>> {
        if !classes.is_empty() && !classes.contains(&self.label) {
            return Ok(Vec::new());
        }

        let width = frame.width() as usize;
        let height = frame.height() as usize;
        let mask = self.foreground_mask(frame);
        let mut visited = vec![false; mask.len()];
        let mut queue = VecDeque::new();
        let mut detections = Vec::new();

        for start in 0..mask.len() {
            if !mask[start] || visited[start] {
                continue;
            }
            visited[start] = true;
            queue.push_back(start);

            let (mut min_x, mut min_y) = (usize::MAX, usize::MAX);
            let (mut max_x, mut max_y) = (0usize, 0usize);
            let mut area = 0usize;

            while let Some(idx) = queue.pop_front() {
                let (x, y) = (idx % width, idx / width);
                area += 1;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);

                let mut visit = |n: usize| {
                    if mask[n] && !visited[n] {
                        visited[n] = true;
                        queue.push_back(n);
                    }
                };
                if x > 0 {
                    visit(idx - 1);
                }
                if x + 1 < width {
                    visit(idx + 1);
                }
                if y > 0 {
                    visit(idx - width);
                }
                if y + 1 < height {
                    visit(idx + width);
                }
            }

            if area < self.min_area {
                continue;
            }
            let bbox = BoundingBox::from_ltrb(
                min_x as f32,
                min_y as f32,
                (max_x + 1) as f32,
                (max_y + 1) as f32,
            );
            // Fill ratio: solid shapes score 1.0, sparse noise scores low.
            let confidence = (area as f32 / bbox.area()).min(1.0);
            detections.push(Detection {
                bbox,
                confidence,
                class: self.label,
            });
        }

        log::trace!("blob backend: {} regions", detections.len());
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn frame_with_squares(squares: &[(u32, u32, u32)]) -> Frame {
        let mut image = RgbImage::new(64, 48);
        for &(x0, y0, size) in squares {
            for y in y0..y0 + size {
                for x in x0..x0 + size {
                    image.put_pixel(x, y, Rgb([255, 255, 255]));
                }
            }
        }
        Frame::new(1, image)
    }

    #[test]
    fn finds_each_bright_region() -> Result<()> {
        let backend = BlobBackend::new();
        let frame = frame_with_squares(&[(4, 4, 10), (40, 20, 12)]);
        let mut found = backend.detect(&frame, &[ObjectClass::Person])?;
        found.sort_by(|a, b| a.bbox.x.total_cmp(&b.bbox.x));

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].bbox, BoundingBox::new(4.0, 4.0, 10.0, 10.0));
        assert_eq!(found[1].bbox, BoundingBox::new(40.0, 20.0, 12.0, 12.0));
        assert!(found.iter().all(|d| d.confidence == 1.0));
        assert!(found.iter().all(|d| d.class == ObjectClass::Person));
        Ok(())
    }

    #[test]
    fn ignores_small_regions_and_dark_frames() -> Result<()> {
        let backend = BlobBackend::new();
        assert!(backend
            .detect(&frame_with_squares(&[]), &[ObjectClass::Person])?
            .is_empty());
        assert!(backend
            .detect(&frame_with_squares(&[(2, 2, 3)]), &[ObjectClass::Person])?
            .is_empty());
        Ok(())
    }

    #[test]
    fn respects_class_filter() -> Result<()> {
        let backend = BlobBackend::new();
        let frame = frame_with_squares(&[(4, 4, 10)]);
        assert!(backend.detect(&frame, &[ObjectClass::Vehicle])?.is_empty());
        assert_eq!(backend.detect(&frame, &[])?.len(), 1);
        Ok(())
    }
}
