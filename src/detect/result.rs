use serde::{Deserialize, Serialize};

/// One detected region, in the pixel space of the original decoded image.
///
/// Coordinates are raw detector output and may fall outside the image; the
/// gateway clamps them before use. `confidence` is in `[0, 1]`. The wire
/// field for the class is `class_name`, matching the inference contract.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: i64,
    pub y_min: i64,
    pub x_max: i64,
    pub y_max: i64,
    pub confidence: f32,
    pub class_name: String,
}

impl BoundingBox {
    pub fn new(x_min: i64, y_min: i64, x_max: i64, y_max: i64, confidence: f32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
            confidence,
            class_name: crate::DEFAULT_CLASS_NAME.to_string(),
        }
    }

    pub fn with_class(mut self, class_name: &str) -> Self {
        self.class_name = class_name.to_string();
        self
    }
}

/// Ordered per-request detector output. Order is the detector's native
/// output order, never re-sorted; empty is a valid, non-error outcome.
pub type DetectionBatch = Vec<BoundingBox>;
