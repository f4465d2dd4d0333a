#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use tract_onnx::prelude::*;

use crate::detect::backend::Detector;
use crate::detect::result::{BoundingBox, Detection, ObjectClass};
use crate::frame::Frame;

const BOX_CHANNELS: usize = 4;
const LETTERBOX_FILL: f32 = 114.0 / 255.0;

/// Tract-based backend for YOLOv8-style ONNX detectors.
///
/// Expects an exported model with input `[1, 3, H, W]` (RGB, 0..1) and output
/// `[1, 4 + classes, anchors]` where the first four rows are center-x,
/// center-y, width, height in input pixels.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    width: u32,
    height: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_iou_threshold(mut self, threshold: f32) -> Self {
        self.iou_threshold = threshold;
        self
    }

    /// Letterbox the frame into the model input and return the scale applied.
    fn build_input(&self, frame: &Frame) -> Result<(Tensor, f32)> {
        let (w0, h0) = (frame.width() as f32, frame.height() as f32);
        if w0 == 0.0 || h0 == 0.0 {
            return Err(anyhow!("cannot run inference on an empty frame"));
        }
        let ratio = (self.width as f32 / w0).min(self.height as f32 / h0);
        let w_new = ((w0 * ratio).round() as u32).clamp(1, self.width);
        let h_new = ((h0 * ratio).round() as u32).clamp(1, self.height);
        let resized = image::imageops::resize(frame.image(), w_new, h_new, FilterType::Triangle);

        let mut input = tract_ndarray::Array4::<f32>::from_elem(
            (1, 3, self.height as usize, self.width as usize),
            LETTERBOX_FILL,
        );
        for (x, y, pixel) in resized.enumerate_pixels() {
            for channel in 0..3 {
                input[[0, channel, y as usize, x as usize]] = pixel.0[channel] as f32 / 255.0;
            }
        }
        Ok((input.into_tensor(), ratio))
    }

    fn decode_outputs(
        &self,
        outputs: TVec<TValue>,
        ratio: f32,
        frame: &Frame,
        classes: &[ObjectClass],
    ) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let preds = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = preds.shape();
        if shape.len() != 3 || shape[1] <= BOX_CHANNELS {
            return Err(anyhow!("unexpected detector output shape {:?}", shape));
        }
        let (channels, anchors) = (shape[1], shape[2]);
        let (frame_w, frame_h) = (frame.width() as f32, frame.height() as f32);

        let mut detections = Vec::new();
        for a in 0..anchors {
            let (class_id, confidence) = (BOX_CHANNELS..channels)
                .map(|c| (c - BOX_CHANNELS, preds[[0, c, a]]))
                .fold((0, f32::NEG_INFINITY), |best, x| if x.1 > best.1 { x } else { best });
            if confidence < self.confidence_threshold {
                continue;
            }
            let class = ObjectClass::from_coco_id(class_id);
            if !classes.is_empty() && !classes.contains(&class) {
                continue;
            }

            let cx = preds[[0, 0, a]] / ratio;
            let cy = preds[[0, 1, a]] / ratio;
            let w = preds[[0, 2, a]] / ratio;
            let h = preds[[0, 3, a]] / ratio;
            let left = (cx - w / 2.0).clamp(0.0, frame_w);
            let top = (cy - h / 2.0).clamp(0.0, frame_h);
            let right = (cx + w / 2.0).clamp(0.0, frame_w);
            let bottom = (cy + h / 2.0).clamp(0.0, frame_h);
            detections.push(Detection {
                bbox: BoundingBox::from_ltrb(left, top, right, bottom),
                confidence,
                class,
            });
        }

        non_max_suppression(&mut detections, self.iou_threshold);
        Ok(detections)
    }
}

impl Detector for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&self, frame: &Frame, classes: &[ObjectClass]) -> Result<Vec<Detection>> {
        let (input, ratio) = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode_outputs(outputs, ratio, frame, classes)
    }

    fn warm_up(&self) -> Result<()> {
        let blank = Frame::new(0, image::RgbImage::new(self.width, self.height));
        self.detect(&blank, &[]).map(|_| ())
    }
}

/// Greedy NMS: keep the most confident box, drop any later box overlapping a kept one.
pub(crate) fn non_max_suppression(detections: &mut Vec<Detection>, iou_threshold: f32) {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept = 0;
    for index in 0..detections.len() {
        let suppressed = (0..kept).any(|prev| {
            detections[prev].class == detections[index].class
                && detections[prev].bbox.iou(&detections[index].bbox) > iou_threshold
        });
        if !suppressed {
            detections.swap(kept, index);
            kept += 1;
        }
    }
    detections.truncate(kept);
}
