use std::path::Path;

use anyhow::{Context, Result};
use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, DetectionBatch};

/// Stub backend for testing and bring-up.
///
/// Returns a fixed list of boxes, filtered by the requested class and
/// confidence threshold. With no fixtures configured it detects nothing,
/// which is a valid outcome for the whole pipeline.
pub struct StubBackend {
    fixtures: Vec<BoundingBox>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self { fixtures: vec![] }
    }

    pub fn with_boxes(fixtures: Vec<BoundingBox>) -> Self {
        Self { fixtures }
    }

    /// Load fixtures from a JSON array of bounding boxes.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read stub fixtures from {}", path.display()))?;
        let fixtures: Vec<BoundingBox> = serde_json::from_str(&raw)
            .with_context(|| format!("parse stub fixtures in {}", path.display()))?;
        Ok(Self { fixtures })
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(
        &mut self,
        _image: &RgbImage,
        class_name: &str,
        confidence_threshold: f32,
    ) -> Result<DetectionBatch> {
        Ok(self
            .fixtures
            .iter()
            .filter(|b| b.class_name == class_name && b.confidence >= confidence_threshold)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> RgbImage {
        RgbImage::new(64, 64)
    }

    #[test]
    fn empty_stub_detects_nothing() {
        let mut backend = StubBackend::new();
        let batch = backend.detect(&frame(), "person", 0.5).unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn filters_by_class_and_threshold() {
        let mut backend = StubBackend::with_boxes(vec![
            BoundingBox::new(1, 1, 10, 10, 0.9),
            BoundingBox::new(2, 2, 12, 12, 0.3),
            BoundingBox::new(3, 3, 14, 14, 0.8).with_class("dog"),
        ]);
        let batch = backend.detect(&frame(), "person", 0.5).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].x_min, 1);
    }

    #[test]
    fn preserves_fixture_order() {
        let mut backend = StubBackend::with_boxes(vec![
            BoundingBox::new(5, 5, 20, 20, 0.7),
            BoundingBox::new(1, 1, 10, 10, 0.9),
        ]);
        let batch = backend.detect(&frame(), "person", 0.5).unwrap();
        assert_eq!(batch[0].x_min, 5);
        assert_eq!(batch[1].x_min, 1);
    }
}
