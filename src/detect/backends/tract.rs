#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, DetectionBatch};

const NMS_IOU_THRESHOLD: f32 = 0.45;

/// COCO class names, in model output order.
const COCO_CLASSES: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

/// Tract-based backend for YOLO-family ONNX models.
///
/// Loads a local model file and runs inference on RGB frames. The model is
/// expected to take an NCHW f32 input of `input_width` x `input_height` and
/// emit a `[1, 4 + num_classes, N]` tensor of candidate boxes (cx, cy, w, h
/// followed by per-class scores), the YOLOv8 export layout.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_width: u32,
    input_height: u32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_width: u32, input_height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, input_height as usize, input_width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_width,
            input_height,
        })
    }

    fn class_index(class_name: &str) -> Result<usize> {
        COCO_CLASSES
            .iter()
            .position(|name| *name == class_name)
            .ok_or_else(|| anyhow!("class '{}' is not in the model's label set", class_name))
    }

    fn build_input(&self, image: &RgbImage) -> Result<Tensor> {
        let resized = image::imageops::resize(
            image,
            self.input_width,
            self.input_height,
            image::imageops::FilterType::Triangle,
        );
        let width = self.input_width as usize;
        let height = self.input_height as usize;
        let input =
            tract_ndarray::Array4::from_shape_fn((1, 3, height, width), |(_, channel, y, x)| {
                resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0
            });
        Ok(input.into_tensor())
    }

    fn decode_output(
        &self,
        outputs: TVec<TValue>,
        class_index: usize,
        class_name: &str,
        confidence_threshold: f32,
        frame_width: u32,
        frame_height: u32,
    ) -> Result<DetectionBatch> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape();
        if shape.len() != 3 || shape[0] != 1 || shape[1] <= 4 {
            return Err(anyhow!(
                "unexpected model output shape {:?}; expected [1, 4+classes, candidates]",
                shape
            ));
        }
        if class_index + 4 >= shape[1] {
            return Err(anyhow!(
                "class '{}' (index {}) exceeds model output with {} classes",
                class_name,
                class_index,
                shape[1] - 4
            ));
        }

        let scale_x = frame_width as f32 / self.input_width as f32;
        let scale_y = frame_height as f32 / self.input_height as f32;

        let mut candidates = Vec::new();
        for i in 0..shape[2] {
            let score = view[[0, 4 + class_index, i]];
            if score < confidence_threshold {
                continue;
            }
            let cx = view[[0, 0, i]];
            let cy = view[[0, 1, i]];
            let w = view[[0, 2, i]];
            let h = view[[0, 3, i]];
            let x_min = ((cx - w / 2.0) * scale_x).round() as i64;
            let y_min = ((cy - h / 2.0) * scale_y).round() as i64;
            let x_max = ((cx + w / 2.0) * scale_x).round() as i64;
            let y_max = ((cy + h / 2.0) * scale_y).round() as i64;
            candidates.push(BoundingBox {
                x_min,
                y_min,
                x_max,
                y_max,
                confidence: score,
                class_name: class_name.to_string(),
            });
        }

        Ok(non_maximum_suppression(candidates, NMS_IOU_THRESHOLD))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(
        &mut self,
        image: &RgbImage,
        class_name: &str,
        confidence_threshold: f32,
    ) -> Result<DetectionBatch> {
        let class_index = Self::class_index(class_name)?;
        let (frame_width, frame_height) = image.dimensions();
        let input = self.build_input(image)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode_output(
            outputs,
            class_index,
            class_name,
            confidence_threshold,
            frame_width,
            frame_height,
        )
    }
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let ix_min = a.x_min.max(b.x_min);
    let iy_min = a.y_min.max(b.y_min);
    let ix_max = a.x_max.min(b.x_max);
    let iy_max = a.y_max.min(b.y_max);
    let iw = (ix_max - ix_min).max(0) as f32;
    let ih = (iy_max - iy_min).max(0) as f32;
    let intersection = iw * ih;
    let area_a = ((a.x_max - a.x_min).max(0) * (a.y_max - a.y_min).max(0)) as f32;
    let area_b = ((b.x_max - b.x_min).max(0) * (b.y_max - b.y_min).max(0)) as f32;
    let union = area_a + area_b - intersection;
    if union <= 0.0 {
        0.0
    } else {
        intersection / union
    }
}

fn non_maximum_suppression(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> DetectionBatch {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut kept: DetectionBatch = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}
